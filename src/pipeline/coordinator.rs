//! Pipeline coordinator - per-URL orchestration
//!
//! One run goes through:
//! - Expired-cookie check
//! - Page load, retried on timeouts with backoff
//! - Paywall gate
//! - Text extraction
//! - Image acquisition (optional)
//! - Summarization with model fallback (optional, blocking or streamed)

use super::PipelineResult;
use crate::browser::BrowserBackend;
use crate::config::Config;
use crate::cookies::{detect_expired_cookies, Cookie};
use crate::images::{discover_images, AcquisitionReport, ImageAcquisition};
use crate::loader::{extract_content, LoadOptions, PageLoadResult, PageLoader};
use crate::recovery::{
    normalize, ErrorContext, ErrorRecoveryEngine, PipelineError, RecoveryAction,
    RecoveryAttemptCounter, Stage,
};
use crate::summarize::{
    collect_stream, estimate_tokens, LlmError, SummarizationEngine, SummarizationResult,
    SummarizeOptions,
};
use crate::url::{cookie_domain_matches, extract_domain, slug_for_url};
use crate::DigestError;
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

/// Receives streamed summary fragments as `(url, fragment)`
pub type ChunkSink = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Stage switches and parameters for a run
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub load: LoadOptions,
    /// Abort the run when the page looks paywalled
    pub fail_on_paywall: bool,
    pub images_enabled: bool,
    pub max_concurrent_images: usize,
    pub summarize_enabled: bool,
    pub stream: bool,
    pub primary_model: String,
    pub fallback_models: Vec<String>,
    pub summarize: SummarizeOptions,
    /// Scratch directory for acquired images
    pub work_dir: PathBuf,
}

impl PipelineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            load: LoadOptions::from(&config.browser),
            fail_on_paywall: config.browser.fail_on_paywall,
            images_enabled: config.images.enabled,
            max_concurrent_images: config.images.max_concurrent,
            summarize_enabled: config.llm.enabled,
            stream: config.llm.stream,
            primary_model: config.llm.model.clone(),
            fallback_models: config.llm.fallback_models.clone(),
            summarize: SummarizeOptions::from(&config.llm),
            work_dir: PathBuf::from(&config.output.directory).join(".work"),
        }
    }
}

/// Main pipeline coordinator structure
pub struct PipelineCoordinator {
    loader: PageLoader,
    images: ImageAcquisition,
    summarizer: Arc<SummarizationEngine>,
    recovery: ErrorRecoveryEngine,
    options: PipelineOptions,
    chunk_sink: Option<ChunkSink>,
    next_run: AtomicU64,
}

impl PipelineCoordinator {
    pub fn new(
        loader: PageLoader,
        images: ImageAcquisition,
        summarizer: Arc<SummarizationEngine>,
        recovery: ErrorRecoveryEngine,
        options: PipelineOptions,
    ) -> Self {
        Self {
            loader,
            images,
            summarizer,
            recovery,
            options,
            chunk_sink: None,
            next_run: AtomicU64::new(1),
        }
    }

    /// Creates a coordinator from configuration
    ///
    /// # Arguments
    ///
    /// * `config` - Validated configuration
    /// * `backend` - Browser backend used to render pages
    ///
    /// # Returns
    ///
    /// * `Ok(PipelineCoordinator)` - Ready to run
    /// * `Err(DigestError)` - The LLM base URL or HTTP client could not be set up
    pub fn from_config(config: &Config, backend: Arc<dyn BrowserBackend>) -> Result<Self, DigestError> {
        let loader = PageLoader::from_config(backend, &config.browser);
        let images = ImageAcquisition::from_config(&config.images)?;
        let summarizer = Arc::new(SummarizationEngine::from_config(&config.llm)?);

        Ok(Self::new(
            loader,
            images,
            summarizer,
            ErrorRecoveryEngine::from_config(&config.recovery),
            PipelineOptions::from_config(config),
        ))
    }

    /// Forwards streamed summary fragments to `sink`
    pub fn with_chunk_sink(mut self, sink: ChunkSink) -> Self {
        self.chunk_sink = Some(sink);
        self
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn summarizer(&self) -> &Arc<SummarizationEngine> {
        &self.summarizer
    }

    /// Runs the pipeline for one URL
    ///
    /// Recoverable failures (image downloads, an unreachable LLM server, a
    /// missing model, timeouts while retries remain) are absorbed and listed
    /// in [`PipelineResult::suppressed_errors`]. Everything else ends the
    /// run with the classified error.
    pub async fn run(&self, url: &str, cookies: &[Cookie]) -> Result<PipelineResult, PipelineError> {
        let started = Instant::now();
        let run_id = self.next_run.fetch_add(1, Ordering::Relaxed);
        let mut counter = RecoveryAttemptCounter::new();
        let mut suppressed = Vec::new();

        tracing::info!("Run {}: processing {}", run_id, url);

        let cookies = cookies_for(url, cookies);
        let expired = detect_expired_cookies(&cookies);
        if !expired.is_empty() {
            let error = PipelineError::cookie_expired(&expired, ErrorContext::at(Stage::Cookies).url(url));
            self.recovery.handle(&error, &mut counter);
            return Err(error);
        }

        let page = self.load_page(url, &cookies, &mut counter, &mut suppressed).await?;

        let outcome = self
            .process_page(url, run_id, &page, &mut counter, &mut suppressed)
            .await;

        if let Err(e) = page.close().await {
            tracing::warn!("Failed to close page for {}: {}", url, e);
        }

        let mut result = outcome?;
        result.suppressed_errors = suppressed;
        result.duration = started.elapsed();

        tracing::info!(
            "Run {}: finished {} in {:?} ({} images, summary: {}, {} suppressed errors)",
            run_id,
            url,
            result.duration,
            result.images.len(),
            if result.summary.is_some() { "yes" } else { "no" },
            result.suppressed_errors.len()
        );

        Ok(result)
    }

    /// Runs independent pipelines for `urls`, at most `concurrency` at a time
    ///
    /// Results are returned in input order. A failure for one URL does not
    /// affect the others.
    pub async fn run_batch(
        &self,
        urls: &[String],
        cookies: &[Cookie],
        concurrency: usize,
    ) -> Vec<(String, Result<PipelineResult, PipelineError>)> {
        let mut results: Vec<_> = stream::iter(urls.iter().enumerate())
            .map(|(index, url)| async move { (index, url.clone(), self.run(url, cookies).await) })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        results.sort_by_key(|(index, _, _)| *index);
        results
            .into_iter()
            .map(|(_, url, result)| (url, result))
            .collect()
    }

    async fn load_page(
        &self,
        url: &str,
        cookies: &[Cookie],
        counter: &mut RecoveryAttemptCounter,
        suppressed: &mut Vec<PipelineError>,
    ) -> Result<PageLoadResult, PipelineError> {
        loop {
            match self.loader.load(url, cookies, &self.options.load).await {
                Ok(page) => return Ok(page),
                Err(e) => {
                    let error = normalize(&e, ErrorContext::at(Stage::Load).url(url));
                    let outcome = self.recovery.recover(&error, counter).await;

                    match outcome.action {
                        RecoveryAction::RetryAfter(_) if outcome.recovered => {
                            tracing::info!("Reloading {} after {}", url, error.code());
                            suppressed.push(error);
                        }
                        _ => return Err(error),
                    }
                }
            }
        }
    }

    async fn process_page(
        &self,
        url: &str,
        run_id: u64,
        page: &PageLoadResult,
        counter: &mut RecoveryAttemptCounter,
        suppressed: &mut Vec<PipelineError>,
    ) -> Result<PipelineResult, PipelineError> {
        if page.paywall.is_gated() {
            let error = PipelineError::paywall(
                &page.final_url,
                page.paywall,
                ErrorContext::at(Stage::Paywall).url(url),
            );
            if self.options.fail_on_paywall {
                self.recovery.handle(&error, counter);
                return Err(error);
            }
            tracing::warn!("{} (continuing with partial content)", error);
        }

        let content = extract_content(&page.html);
        let title = content.title.or_else(|| page.title.clone());
        let text = content.text;
        let estimated_tokens = estimate_tokens(&text);
        tracing::debug!(
            "Extracted {} chars (~{} tokens) from {}",
            text.chars().count(),
            estimated_tokens,
            url
        );

        let (images, images_dropped, image_dir) = if self.options.images_enabled {
            let report = self.acquire_images(url, run_id, page).await;
            let dropped = report.dropped();
            for failure in &report.failures {
                let error = normalize(
                    &failure.error,
                    ErrorContext::at(Stage::Images)
                        .url(url)
                        .image_src(&failure.image.src),
                );
                let outcome = self.recovery.handle(&error, counter);
                if !outcome.recovered {
                    tracing::debug!("Image failure for {} left unrecovered", failure.image.src);
                }
                suppressed.push(error);
            }
            (report.images, dropped, Some(self.image_dir(page, run_id)))
        } else {
            (Vec::new(), 0, None)
        };

        let summary = if self.options.summarize_enabled && !text.trim().is_empty() {
            self.summarize(url, &text, counter, suppressed).await?
        } else {
            None
        };

        Ok(PipelineResult {
            url: url.to_string(),
            final_url: page.final_url.clone(),
            title,
            text,
            paywall: page.paywall,
            images,
            images_dropped,
            image_dir,
            summary,
            estimated_tokens,
            suppressed_errors: Vec::new(),
            duration: Duration::ZERO,
        })
    }

    fn image_dir(&self, page: &PageLoadResult, run_id: u64) -> PathBuf {
        let slug = Url::parse(&page.final_url)
            .map(|u| slug_for_url(&u))
            .unwrap_or_else(|_| "article".to_string());
        self.options.work_dir.join(format!("{}-{}", slug, run_id))
    }

    async fn acquire_images(&self, url: &str, run_id: u64, page: &PageLoadResult) -> AcquisitionReport {
        let base = match Url::parse(&page.final_url).or_else(|_| Url::parse(url)) {
            Ok(base) => base,
            Err(e) => {
                tracing::warn!("Cannot resolve images for {}: {}", url, e);
                return AcquisitionReport::default();
            }
        };

        let discovered = discover_images(&page.html, &base);
        if discovered.is_empty() {
            return AcquisitionReport::default();
        }

        let dir = self.image_dir(page, run_id);
        self.images
            .acquire(&discovered, &dir, self.options.max_concurrent_images)
            .await
    }

    /// Summarizes `text`, applying recovery actions until a summary is
    /// produced or summarization is given up for this run
    async fn summarize(
        &self,
        url: &str,
        text: &str,
        counter: &mut RecoveryAttemptCounter,
        suppressed: &mut Vec<PipelineError>,
    ) -> Result<Option<SummarizationResult>, PipelineError> {
        let mut model = self.options.primary_model.clone();
        let mut tried = vec![model.clone()];

        loop {
            let error = match self.generate(url, text, &model).await {
                Ok(result) => return Ok(Some(result)),
                Err(e) => self.classify_llm_error(&e, url, &model).await,
            };

            let outcome = self.recovery.recover(&error, counter).await;
            if ErrorRecoveryEngine::is_fatal(&error) {
                return Err(error);
            }
            suppressed.push(error);

            if !outcome.recovered {
                tracing::warn!("Giving up on summarization for {}", url);
                return Ok(None);
            }

            match outcome.action {
                RecoveryAction::UseModel(next) if !tried.contains(&next) => {
                    tracing::info!("Retrying summary for {} with model {}", url, next);
                    tried.push(next.clone());
                    model = next;
                }
                RecoveryAction::RetryAfter(_) => {}
                _ => {
                    tracing::info!("Skipping summarization for {}", url);
                    return Ok(None);
                }
            }
        }
    }

    async fn generate(&self, url: &str, text: &str, model: &str) -> Result<SummarizationResult, LlmError> {
        let fallbacks = &self.options.fallback_models;
        let options = &self.options.summarize;

        if !self.options.stream {
            return self
                .summarizer
                .summarize_with_fallback(text, model, fallbacks, options)
                .await;
        }

        let started = Instant::now();
        let stream = self
            .summarizer
            .stream_with_fallback(text, model, fallbacks, options)
            .await?;

        let sink = self.chunk_sink.clone();
        collect_stream(stream, started, |fragment| {
            if let Some(sink) = &sink {
                sink(url, fragment);
            }
        })
        .await
    }

    /// Normalizes an LLM failure, filling in the installed models when no
    /// candidate of the fallback chain was installed
    async fn classify_llm_error(&self, error: &LlmError, url: &str, model: &str) -> PipelineError {
        let context = ErrorContext::at(Stage::Summarize).url(url).model(model);

        match error {
            LlmError::AllModelsFailed { last: None, .. } | LlmError::NoModelsAvailable => {
                let available = self
                    .summarizer
                    .models()
                    .await
                    .map(|models| models.into_iter().map(|m| m.name).collect())
                    .unwrap_or_default();
                PipelineError::model_not_found(model, available, context)
            }
            other => normalize(other, context),
        }
    }
}

/// Cookies whose domain covers the host of `url`
fn cookies_for(url: &str, cookies: &[Cookie]) -> Vec<Cookie> {
    let Some(host) = Url::parse(url).ok().and_then(|u| extract_domain(&u)) else {
        return cookies.to_vec();
    };

    cookies
        .iter()
        .filter(|cookie| cookie_domain_matches(&cookie.domain, &host))
        .cloned()
        .collect()
}
