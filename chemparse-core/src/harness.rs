use std::{path::PathBuf, sync::Arc, time::Duration, time::Instant};

use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::Instrument;

use crate::{
    backends::{default_backends, ParseBackend},
    cache::ResultCache,
    config::HarnessConfig,
    entities::{BackendOutcome, BackendReport, ExampleDoc, PdfDocument, Submission},
    error::{BackendError, InvalidInput},
    validate::validate_pdf,
};

/// Runs every registered backend on one document and collects their outcomes.
///
/// Backends run concurrently, each in its own task under its own timeout. An error,
/// a panic or a timeout is recorded in that backend's report and never reaches the
/// others. Reports keep the registration order of the backends.
#[derive(Clone)]
pub struct ComparisonHarness {
    backends: Vec<Arc<dyn ParseBackend>>,
    timeout: Duration,
    examples_dir: PathBuf,
    cache: Option<ResultCache>,
}

impl ComparisonHarness {
    pub fn new(backends: Vec<Arc<dyn ParseBackend>>, timeout: Duration) -> Self {
        Self {
            backends,
            timeout,
            examples_dir: HarnessConfig::default().examples_dir,
            cache: None,
        }
    }

    /// Registers the default backends and opens the example cache if configured.
    ///
    /// Must be called from within a tokio runtime (the pdfium worker is spawned here).
    pub fn from_config(config: &HarnessConfig) -> anyhow::Result<Self> {
        let mut harness = Self::new(default_backends(config), config.backend_timeout)
            .with_examples_dir(config.examples_dir.clone());
        if let Some(cache_dir) = &config.cache_dir {
            harness = harness.with_cache(ResultCache::open(cache_dir)?);
        }
        tracing::info!(
            "registered backends: {}",
            harness
                .backends
                .iter()
                .map(|b| b.slug())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(harness)
    }

    pub fn with_examples_dir(mut self, examples_dir: PathBuf) -> Self {
        self.examples_dir = examples_dir;
        self
    }

    pub fn with_cache(mut self, cache: ResultCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// `(name, slug)` of each backend in display order.
    pub fn backends(&self) -> impl Iterator<Item = (&'static str, &'static str)> + '_ {
        self.backends.iter().map(|b| (b.name(), b.slug()))
    }

    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }

    pub fn examples_dir(&self) -> &std::path::Path {
        &self.examples_dir
    }

    /// Reads one of the bundled example documents.
    pub async fn load_example(&self, example: ExampleDoc) -> Result<PdfDocument, InvalidInput> {
        let path = example.path(&self.examples_dir);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(PdfDocument::example(example, data)),
            Err(e) => {
                tracing::warn!("can't read example {}: {e}", path.display());
                Err(InvalidInput::ExampleNotFound { path })
            }
        }
    }

    pub async fn compare(&self, document: PdfDocument) -> Result<Submission, InvalidInput> {
        self.compare_with_callback(document, None::<fn(&BackendReport)>)
            .await
    }

    /// Same as [`compare`](Self::compare), calling `callback` as each backend finishes.
    #[tracing::instrument(skip_all, fields(doc = document.name()))]
    pub async fn compare_with_callback<F>(
        &self,
        document: PdfDocument,
        callback: Option<F>,
    ) -> Result<Submission, InvalidInput>
    where
        F: Fn(&BackendReport) + Send + Sync,
    {
        let header = validate_pdf(document.name(), document.bytes())?;
        if !header.has_trailer {
            tracing::warn!("{} has no %%EOF trailer near its end", document.name());
        }
        tracing::debug!(
            "comparing {} (PDF {}, {} bytes) on {} backends",
            document.name(),
            header.version,
            document.len(),
            self.backends.len()
        );

        let start_time = Instant::now();
        let mut set = JoinSet::new();
        for (index, backend) in self.backends.iter().enumerate() {
            let task = run_backend(
                backend.clone(),
                document.clone(),
                self.cache.clone(),
                self.timeout,
            );
            set.spawn(async move { (index, task.await) }.in_current_span());
        }

        let mut slots: Vec<Option<BackendReport>> = vec![None; self.backends.len()];
        while let Some(result) = set.join_next().await {
            match result {
                Ok((index, report)) => {
                    if let Some(callback) = &callback {
                        callback(&report);
                    }
                    slots[index] = Some(report);
                }
                Err(e) => {
                    tracing::error!("Error joining backend task : {e:?}")
                }
            }
        }

        let reports = slots
            .into_iter()
            .zip(&self.backends)
            .map(|(slot, backend)| {
                slot.unwrap_or_else(|| BackendReport {
                    name: backend.name().to_owned(),
                    slug: backend.slug().to_owned(),
                    outcome: Err(BackendError::Panicked("backend task was lost".to_owned()))
                        .into(),
                    duration: Duration::ZERO,
                    cached: false,
                })
            })
            .collect();

        let duration = start_time.elapsed();
        tracing::debug!("comparison took {}ms", duration.as_millis());
        Ok(Submission::new(document, reports, duration))
    }
}

/// Aborts the wrapped task when dropped, so a cancelled comparison stops its parses.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn run_backend(
    backend: Arc<dyn ParseBackend>,
    document: PdfDocument,
    cache: Option<ResultCache>,
    timeout: Duration,
) -> BackendReport {
    let start = Instant::now();
    let report = |outcome: BackendOutcome, cached: bool| BackendReport {
        name: backend.name().to_owned(),
        slug: backend.slug().to_owned(),
        outcome,
        duration: start.elapsed(),
        cached,
    };

    let cache_key = cache.zip(document.source.example());
    if let Some((cache, example)) = &cache_key {
        if let Some(output) = cache.load(*example, backend.slug()).await {
            return report(BackendOutcome::Success(output), true);
        }
    }

    let task_backend = backend.clone();
    let task_document = document.clone();
    let mut handle = AbortOnDrop(tokio::spawn(
        async move { task_backend.parse(&task_document).await }.in_current_span(),
    ));

    let result = match tokio::time::timeout(timeout, &mut handle.0).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(BackendError::Panicked(panic_message(e))),
        Err(_) => Err(BackendError::Timeout(timeout)),
    };

    match &result {
        Ok(output) => {
            tracing::debug!(
                "{} finished in {}ms ({} warnings)",
                backend.slug(),
                start.elapsed().as_millis(),
                output.warnings.len()
            );
            if let Some((cache, example)) = &cache_key {
                if let Err(e) = cache.store(*example, backend.slug(), output).await {
                    tracing::warn!("can't cache {} output: {e}", backend.slug());
                }
            }
        }
        Err(e) => tracing::warn!("{} failed: {e}", backend.slug()),
    }
    report(result.into(), false)
}

fn panic_message(err: JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_owned()),
        Err(err) => err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{entities::BackendOutput, error::FailureKind};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const PDF: &[u8] = b"%PDF-1.5\n1 0 obj\n<<>>\nendobj\n%%EOF\n";

    enum Behaviour {
        Ok(&'static str),
        Fail,
        Panic,
        Stall,
    }

    struct MockBackend {
        slug: &'static str,
        behaviour: Behaviour,
        calls: Arc<AtomicUsize>,
        dropped: Arc<AtomicBool>,
    }

    struct SetOnDrop(Arc<AtomicBool>);

    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    impl MockBackend {
        fn new(slug: &'static str, behaviour: Behaviour) -> Self {
            Self {
                slug,
                behaviour,
                calls: Arc::default(),
                dropped: Arc::default(),
            }
        }
    }

    #[async_trait]
    impl ParseBackend for MockBackend {
        fn name(&self) -> &'static str {
            self.slug
        }

        fn slug(&self) -> &'static str {
            self.slug
        }

        async fn parse(&self, _document: &PdfDocument) -> Result<BackendOutput, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::Ok(text) => Ok(BackendOutput::new(text.to_owned(), Some(1))),
                Behaviour::Fail => Err(BackendError::InvalidResponse("broken xref".into())),
                Behaviour::Panic => panic!("layout exploded"),
                Behaviour::Stall => {
                    let _guard = SetOnDrop(self.dropped.clone());
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    unreachable!()
                }
            }
        }
    }

    fn harness(backends: Vec<MockBackend>) -> ComparisonHarness {
        let backends = backends
            .into_iter()
            .map(|b| Arc::new(b) as Arc<dyn ParseBackend>)
            .collect();
        ComparisonHarness::new(backends, Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let harness = harness(vec![
            MockBackend::new("stall", Behaviour::Stall),
            MockBackend::new("ok", Behaviour::Ok("# Ethanol")),
            MockBackend::new("panic", Behaviour::Panic),
            MockBackend::new("fail", Behaviour::Fail),
        ]);
        let doc = PdfDocument::uploaded("ethanol.pdf", PDF.to_vec());
        let submission = harness.compare(doc).await.unwrap();

        let slugs: Vec<_> = submission.reports().iter().map(|r| r.slug.as_str()).collect();
        assert_eq!(slugs, vec!["stall", "ok", "panic", "fail"]);

        let kind = |slug| submission.report(slug).unwrap().outcome.failure().unwrap().kind;
        assert_eq!(kind("stall"), FailureKind::Timeout);
        assert_eq!(kind("panic"), FailureKind::Panicked);
        assert_eq!(kind("fail"), FailureKind::InvalidResponse);
        assert_eq!(
            submission.report("ok").unwrap().outcome.output().unwrap().markdown,
            "# Ethanol"
        );
        assert!(submission
            .report("panic")
            .unwrap()
            .outcome
            .failure()
            .unwrap()
            .message
            .contains("layout exploded"));
        assert_eq!(submission.success_count(), 1);
    }

    #[tokio::test]
    async fn test_dropped_comparison_stops_backends() {
        let backend = MockBackend::new("stall", Behaviour::Stall);
        let calls = backend.calls.clone();
        let dropped = backend.dropped.clone();
        let backends = vec![Arc::new(backend) as Arc<dyn ParseBackend>];
        let harness = ComparisonHarness::new(backends, Duration::from_secs(3600));

        let comparison = tokio::spawn(async move {
            let doc = PdfDocument::uploaded("ethanol.pdf", PDF.to_vec());
            harness.compare(doc).await
        });
        while calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        comparison.abort();
        assert!(comparison.await.unwrap_err().is_cancelled());

        tokio::time::timeout(Duration::from_secs(5), async {
            while !dropped.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("parse kept running after the comparison was dropped");
    }

    #[tokio::test]
    async fn test_invalid_input_runs_no_backend() {
        let backend = MockBackend::new("ok", Behaviour::Ok("text"));
        let calls = backend.calls.clone();
        let harness = harness(vec![backend]);

        let err = harness
            .compare(PdfDocument::uploaded("notes.txt", b"just text".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, InvalidInput::NotPdf { .. }));
        let err = harness
            .compare(PdfDocument::uploaded("empty.pdf", Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, InvalidInput::Empty { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_trailer_still_runs_backends() {
        let backend = MockBackend::new("ok", Behaviour::Ok("# Toluene"));
        let calls = backend.calls.clone();
        let harness = harness(vec![backend]);
        let mut data = PDF.to_vec();
        data.extend(std::iter::repeat(b' ').take(4096));
        let submission = harness
            .compare(PdfDocument::uploaded("toluene.pdf", data))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(submission.success_count(), 1);
    }

    #[tokio::test]
    async fn test_callback_once_per_backend() {
        let harness = harness(vec![
            MockBackend::new("a", Behaviour::Ok("a")),
            MockBackend::new("b", Behaviour::Fail),
            MockBackend::new("c", Behaviour::Panic),
        ]);
        let finished = AtomicUsize::new(0);
        harness
            .compare_with_callback(
                PdfDocument::uploaded("x.pdf", PDF.to_vec()),
                Some(|_: &BackendReport| {
                    finished.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await
            .unwrap();
        assert_eq!(finished.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_same_document_twice_gives_distinct_submissions() {
        let harness = harness(vec![MockBackend::new("ok", Behaviour::Ok("C2H6O"))]);
        let doc = PdfDocument::uploaded("ethanol.pdf", PDF.to_vec());
        let first = harness.compare(doc.clone()).await.unwrap();
        let second = harness.compare(doc).await.unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(first.reports()[0].outcome, second.reports()[0].outcome);
    }

    #[tokio::test]
    async fn test_example_results_are_cached() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = MockBackend::new("ok", Behaviour::Ok("# Benzene"));
        let calls = backend.calls.clone();
        let harness = harness(vec![backend]).with_cache(ResultCache::open(tmp.path()).unwrap());

        let doc = PdfDocument::example(ExampleDoc::NonOcr, PDF.to_vec());
        let first = harness.compare(doc.clone()).await.unwrap();
        assert!(!first.reports()[0].cached);
        assert!(tmp.path().join("Non_Ocr_ok.md").exists());

        let second = harness.compare(doc).await.unwrap();
        assert!(second.reports()[0].cached);
        assert_eq!(
            second.reports()[0].outcome.output().unwrap().markdown,
            "# Benzene"
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // uploads always hit the backend
        harness
            .compare(PdfDocument::uploaded("Non_Ocr.pdf", PDF.to_vec()))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = MockBackend::new("fail", Behaviour::Fail);
        let calls = backend.calls.clone();
        let harness = harness(vec![backend]).with_cache(ResultCache::open(tmp.path()).unwrap());
        let doc = PdfDocument::example(ExampleDoc::Ocr, PDF.to_vec());
        harness.compare(doc.clone()).await.unwrap();
        harness.compare(doc).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_load_example() {
        let tmp = tempfile::tempdir().unwrap();
        let harness = harness(vec![]).with_examples_dir(tmp.path().to_owned());
        let err = harness.load_example(ExampleDoc::Ocr).await.unwrap_err();
        assert_eq!(
            err,
            InvalidInput::ExampleNotFound {
                path: tmp.path().join("Ocr.pdf")
            }
        );

        std::fs::write(tmp.path().join("Ocr.pdf"), PDF).unwrap();
        let doc = harness.load_example(ExampleDoc::Ocr).await.unwrap();
        assert_eq!(doc.source.example(), Some(ExampleDoc::Ocr));
        assert_eq!(doc.bytes(), PDF);
    }
}
