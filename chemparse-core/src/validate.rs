use crate::error::InvalidInput;

const PDF_MAGIC: &[u8] = b"%PDF-";
const EOF_MARKER: &[u8] = b"%%EOF";
/// Readers accept the header anywhere in the first KiB
const HEADER_SCAN_LEN: usize = 1024;
/// Some producers append junk after the final `%%EOF`
const TRAILER_SCAN_LEN: usize = 2048;

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// What the cheap pre-check learned about a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfHeader {
    /// Declared version, e.g. `1.7`
    pub version: String,
    /// `%%EOF` seen near the end of the file
    pub has_trailer: bool,
}

/// Cheap readability check run once per submission, before any backend.
///
/// Only an empty file or a missing `%PDF-x.y` header is rejected. A missing `%%EOF`
/// trailer is reported in [`PdfHeader`] and left to the backends, which can often
/// still read the file.
pub fn validate_pdf(name: &str, data: &[u8]) -> Result<PdfHeader, InvalidInput> {
    if data.is_empty() {
        return Err(InvalidInput::Empty {
            name: name.to_owned(),
        });
    }

    let head = &data[..data.len().min(HEADER_SCAN_LEN)];
    let header_start = find(head, PDF_MAGIC).ok_or_else(|| InvalidInput::NotPdf {
        name: name.to_owned(),
    })?;

    let tail = &data[data.len().saturating_sub(TRAILER_SCAN_LEN)..];
    let has_trailer = find(tail, EOF_MARKER).is_some();

    let version = data[header_start + PDF_MAGIC.len()..]
        .iter()
        .take_while(|b| b.is_ascii_digit() || **b == b'.')
        .map(|b| *b as char)
        .collect::<String>();
    Ok(PdfHeader {
        version,
        has_trailer,
    })
}
