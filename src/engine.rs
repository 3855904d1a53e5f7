use crate::errors::{AppError, AppResult};
use crate::models::{
    DateRange, DreamEntry, FilterCriteria, FilterOptions, FilterResult, NavigatorSettings, TransportKind,
};
use crate::protocol::{FilterRequestMessage, FilterResponse, ProgressUpdate};
use crate::transport::{EvaluationConfig, FilterTransport, InlineTransport, ProgressSink, WorkerTransport};
use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI16, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::time::{timeout, Duration};

pub type ProgressCallback = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub enum FilterOutcome {
    Applied(FilterResult),
    /// A newer request was issued before this one resolved; its result was dropped.
    Superseded { request_id: u64, latest_request_id: u64 },
}

impl FilterOutcome {
    pub fn applied(self) -> Option<FilterResult> {
        match self {
            Self::Applied(result) => Some(result),
            Self::Superseded { .. } => None,
        }
    }
}

/// Runs filter requests through the worker when one is available and falls
/// back to inline evaluation otherwise. Only the most recently issued request
/// may produce an applied result or forward progress.
pub struct FilterEngine {
    primary: RwLock<Option<Arc<dyn FilterTransport>>>,
    fallback: Arc<dyn FilterTransport>,
    latest_request: Arc<AtomicU64>,
    worker_timeout: Duration,
}

impl FilterEngine {
    pub async fn initialize(settings: &NavigatorSettings) -> Self {
        let config = EvaluationConfig {
            progress_interval: settings.progress_interval,
            thresholds: settings.thresholds,
        };
        let fallback: Arc<dyn FilterTransport> = Arc::new(InlineTransport::new(config));
        let worker_timeout = Duration::from_millis(settings.worker_timeout_ms);

        if !settings.use_background_worker {
            tracing::info!("background filter worker disabled by settings");
            return Self::with_transports(None, fallback, worker_timeout);
        }

        let worker = WorkerTransport::start(config, Duration::from_millis(settings.worker_ready_timeout_ms))
            .await
            .map(|worker| Arc::new(worker) as Arc<dyn FilterTransport>);
        Self::from_worker_start(worker, fallback, worker_timeout)
    }

    pub fn inline_only(config: EvaluationConfig) -> Self {
        Self::with_transports(None, Arc::new(InlineTransport::new(config)), Duration::from_secs(5))
    }

    pub fn with_transports(
        primary: Option<Arc<dyn FilterTransport>>,
        fallback: Arc<dyn FilterTransport>,
        worker_timeout: Duration,
    ) -> Self {
        Self {
            primary: RwLock::new(primary),
            fallback,
            latest_request: Arc::new(AtomicU64::new(0)),
            worker_timeout,
        }
    }

    fn from_worker_start(
        worker: AppResult<Arc<dyn FilterTransport>>,
        fallback: Arc<dyn FilterTransport>,
        worker_timeout: Duration,
    ) -> Self {
        match worker {
            Ok(worker) => Self::with_transports(Some(worker), fallback, worker_timeout),
            Err(error) => {
                tracing::warn!(error = %error, "filter worker failed to start; filtering inline");
                Self::with_transports(None, fallback, worker_timeout)
            }
        }
    }

    pub fn active_transport(&self) -> TransportKind {
        self.primary_transport()
            .map(|primary| primary.kind())
            .unwrap_or_else(|| self.fallback.kind())
    }

    pub fn latest_request_id(&self) -> u64 {
        self.latest_request.load(Ordering::SeqCst)
    }

    pub async fn filter_by_date_range(
        &self,
        entries: Arc<Vec<DreamEntry>>,
        range: DateRange,
        options: FilterOptions,
        progress: Option<ProgressCallback>,
    ) -> AppResult<FilterOutcome> {
        self.execute(entries, FilterCriteria::Range(range.normalized()), options, progress)
            .await
    }

    pub async fn filter_by_dates(
        &self,
        entries: Arc<Vec<DreamEntry>>,
        dates: BTreeSet<NaiveDate>,
        options: FilterOptions,
        progress: Option<ProgressCallback>,
    ) -> AppResult<FilterOutcome> {
        self.execute(entries, FilterCriteria::Dates { dates }, options, progress)
            .await
    }

    async fn execute(
        &self,
        entries: Arc<Vec<DreamEntry>>,
        criteria: FilterCriteria,
        options: FilterOptions,
        progress: Option<ProgressCallback>,
    ) -> AppResult<FilterOutcome> {
        let request_id = self.latest_request.fetch_add(1, Ordering::SeqCst) + 1;
        let sink = self.progress_sink(request_id, progress);
        let request = FilterRequestMessage {
            request_id,
            entries,
            criteria: criteria.clone(),
            options,
        };

        if let Some(primary) = self.primary_transport() {
            match self.dispatch_primary(primary.as_ref(), request.clone(), sink.clone()).await {
                Ok(response) => return Ok(self.accept(criteria, response, primary.kind())),
                Err(error) if error.is_worker_unavailable() => {
                    tracing::warn!(request_id, error = %error, "filter worker unavailable; disabling it");
                    self.disable_primary();
                }
                Err(error) => {
                    tracing::warn!(request_id, error = %error, "filter worker request failed; retrying inline");
                }
            }
        }

        if self.is_superseded(request_id) {
            return Ok(self.superseded(request_id));
        }

        let response = self.fallback.dispatch(request, sink).await.map_err(|error| {
            tracing::error!(request_id, error = %error, "inline filtering failed");
            error
        })?;
        Ok(self.accept(criteria, response, self.fallback.kind()))
    }

    async fn dispatch_primary(
        &self,
        primary: &dyn FilterTransport,
        request: FilterRequestMessage,
        sink: ProgressSink,
    ) -> AppResult<FilterResponse> {
        match timeout(self.worker_timeout, primary.dispatch(request, sink)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout(format!(
                "filter worker did not respond within {}ms",
                self.worker_timeout.as_millis()
            ))),
        }
    }

    fn accept(&self, criteria: FilterCriteria, response: FilterResponse, transport: TransportKind) -> FilterOutcome {
        if self.is_superseded(response.request_id) {
            return self.superseded(response.request_id);
        }
        tracing::debug!(
            request_id = response.request_id,
            transport = transport.as_str(),
            entries = response.visibility_map.len(),
            "filter result accepted"
        );
        FilterOutcome::Applied(FilterResult {
            request_id: response.request_id,
            criteria,
            visibility_map: response.visibility_map,
            statistics: response.statistics,
            transport,
        })
    }

    fn superseded(&self, request_id: u64) -> FilterOutcome {
        let latest_request_id = self.latest_request_id();
        tracing::debug!(request_id, latest_request_id, "dropping superseded filter result");
        FilterOutcome::Superseded {
            request_id,
            latest_request_id,
        }
    }

    fn is_superseded(&self, request_id: u64) -> bool {
        self.latest_request_id() != request_id
    }

    /// Forwards progress only while `request_id` is current, and only when the
    /// percentage moves forward.
    fn progress_sink(&self, request_id: u64, callback: Option<ProgressCallback>) -> ProgressSink {
        let latest = self.latest_request.clone();
        let last_percent = AtomicI16::new(-1);
        Arc::new(move |update: ProgressUpdate| {
            let Some(callback) = callback.as_ref() else {
                return;
            };
            if latest.load(Ordering::SeqCst) != request_id {
                return;
            }
            let percent = i16::from(update.progress);
            if last_percent.fetch_max(percent, Ordering::SeqCst) >= percent {
                return;
            }
            callback(update);
        })
    }

    fn primary_transport(&self) -> Option<Arc<dyn FilterTransport>> {
        self.primary
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn disable_primary(&self) {
        self.primary
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}
