//! Side by side comparison of PDF parsing methods on chemistry documents.
//!
//! A [`ComparisonHarness`] validates one PDF, runs every registered
//! [`ParseBackend`](backends::ParseBackend) on it concurrently and collects one
//! [`BackendReport`](entities::BackendReport) per backend into a [`Submission`].

pub mod backends;
pub mod cache;
pub mod config;
pub mod entities;
pub mod error;
pub mod harness;
pub mod native;
pub mod render;
pub mod session;
pub mod utils;
pub mod validate;

pub use config::{BackendArgs, HarnessConfig};
pub use entities::{ExampleDoc, PdfDocument, Submission};
pub use error::{BackendError, InvalidInput};
pub use harness::ComparisonHarness;
pub use session::{SessionState, SessionStore};
