use crate::calendar::{month_view, MonthView};
use crate::engine::{FilterEngine, FilterOutcome, ProgressCallback};
use crate::errors::{AppError, AppResult};
use crate::events::{
    EventEmitter, FILTER_APPLIED, FILTER_CLEARED, FILTER_EXTERNAL_SYNC, FILTER_FAILED, FILTER_INVALID_RANGE,
    FILTER_PROGRESS,
};
use crate::models::{DateRange, DreamEntry, FilterResult, NavigatorSettings, SelectionMode};
use crate::protocol::ProgressUpdate;
use crate::selection::{SelectionPhase, SelectionSnapshot, SelectionStateMachine};
use crate::store::{FilterStore, SubscriptionId};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

static ISO_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("valid iso date regex"));

const GENERIC_FAILURE_MESSAGE: &str = "Could not apply the date filter. The current filter was left unchanged.";

/// What a UI-facing coordinator call ended up doing. Never an error: failures
/// are reported here and through a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied { range: DateRange, visible_entries: usize },
    AwaitingSecondDate { anchor: NaiveDate },
    Cleared,
    Superseded { request_id: u64 },
    Rejected { reason: String },
    Failed { reason: String },
}

/// Sets a flag for the lifetime of the guard.
struct FlagGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> FlagGuard<'a> {
    fn engage(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self { flag }
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

struct CoordinatorInner {
    engine: FilterEngine,
    store: Arc<dyn FilterStore>,
    selection: Mutex<SelectionStateMachine>,
    entries: RwLock<Arc<Vec<DreamEntry>>>,
    last_result: Mutex<Option<FilterResult>>,
    /// Set while an externally sourced store change is mirrored locally.
    applying_external: AtomicBool,
    /// Set while this coordinator writes the store, so its own echo is ignored.
    writing_store: AtomicBool,
    /// Bumped on every external store change and every local clear;
    /// in-flight filters started before the bump are stale.
    filter_epoch: AtomicU64,
    subscription: Mutex<Option<SubscriptionId>>,
    events: EventEmitter,
    settings: NavigatorSettings,
}

/// Couples the selection state machine and the filter engine to the host's
/// shared filter store.
#[derive(Clone)]
pub struct FilterCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl FilterCoordinator {
    pub async fn initialize(
        store: Arc<dyn FilterStore>,
        events: EventEmitter,
        settings: NavigatorSettings,
    ) -> Self {
        let engine = FilterEngine::initialize(&settings).await;
        Self::new(engine, store, events, settings)
    }

    pub fn new(
        engine: FilterEngine,
        store: Arc<dyn FilterStore>,
        events: EventEmitter,
        settings: NavigatorSettings,
    ) -> Self {
        let inner = Arc::new(CoordinatorInner {
            engine,
            store: store.clone(),
            selection: Mutex::new(SelectionStateMachine::new(settings.default_selection_mode)),
            entries: RwLock::new(Arc::new(Vec::new())),
            last_result: Mutex::new(None),
            applying_external: AtomicBool::new(false),
            writing_store: AtomicBool::new(false),
            filter_epoch: AtomicU64::new(0),
            subscription: Mutex::new(None),
            events,
            settings,
        });

        let weak = Arc::downgrade(&inner);
        let id = store.on_filter_change(Arc::new(move |range: Option<DateRange>| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_store_change(range);
            }
        }));
        *inner
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(id);

        if let Some(range) = store.current_range() {
            inner.mirror_external(Some(range));
        }

        Self { inner }
    }

    pub fn load_entries(&self, entries: Vec<DreamEntry>) {
        tracing::debug!(entries = entries.len(), "navigator entries loaded");
        *self
            .inner
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(entries);
    }

    pub fn entries(&self) -> Arc<Vec<DreamEntry>> {
        self.inner.entries_snapshot()
    }

    pub fn engine(&self) -> &FilterEngine {
        &self.inner.engine
    }

    pub fn selection(&self) -> SelectionSnapshot {
        self.inner.lock_selection().snapshot()
    }

    pub fn last_result(&self) -> Option<FilterResult> {
        self.inner
            .last_result
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_applying_external(&self) -> bool {
        self.inner.applying_external.load(Ordering::SeqCst)
    }

    /// Switches selection mode. The in-progress selection is discarded; the
    /// shared filter is left as is.
    pub fn set_mode(&self, mode: SelectionMode) -> SelectionPhase {
        tracing::debug!(mode = mode.as_str(), "selection mode changed");
        self.inner.lock_selection().set_mode(mode)
    }

    pub async fn pick_date(&self, date: NaiveDate) -> ApplyOutcome {
        let picked = {
            let mut selection = self.inner.lock_selection();
            match selection.preview_pick(date).map(|range| self.inner.validate_range(range)) {
                Some(Err(error)) => Err(error),
                _ => {
                    let phase = selection.pick_date(date);
                    Ok((phase, selection.committed_range()))
                }
            }
        };
        let (phase, committed) = match picked {
            Ok(picked) => picked,
            Err(error) => return self.inner.reject(error),
        };

        match (phase, committed) {
            (SelectionPhase::RangeStart, _) => ApplyOutcome::AwaitingSecondDate { anchor: date },
            (SelectionPhase::Committed, Some(range)) => self.inner.run_filter(range).await,
            _ => self.inner.clear_filter(),
        }
    }

    /// Applies a range chosen outside the grid (e.g. a "go to" form).
    pub async fn apply_range(&self, range: DateRange) -> ApplyOutcome {
        let range = range.normalized();
        if let Err(error) = self.inner.validate_range(range) {
            return self.inner.reject(error);
        }
        self.inner.lock_selection().reflect_range(range);
        self.inner.run_filter(range).await
    }

    /// Free-text variant of [`FilterCoordinator::apply_range`]; both ends
    /// must be `YYYY-MM-DD` calendar dates.
    pub async fn apply_range_input(&self, start: &str, end: &str) -> ApplyOutcome {
        let parsed = parse_date_input(start).and_then(|start| Ok(DateRange::new(start, parse_date_input(end)?)));
        match parsed {
            Ok(range) => self.apply_range(range).await,
            Err(error) => self.inner.reject(error),
        }
    }

    pub fn clear(&self) -> ApplyOutcome {
        self.inner.lock_selection().clear();
        self.inner.clear_filter()
    }

    /// Month grid for the rendering layer, visibility taken from the shared store.
    pub fn month_view(&self, year: i32, month: u32) -> AppResult<MonthView> {
        let entries = self.inner.entries_snapshot();
        month_view(
            &entries,
            year,
            month,
            self.inner.store.current_range(),
            self.inner.settings.week_starts_on_monday,
            &self.inner.settings.thresholds,
        )
    }
}

impl CoordinatorInner {
    fn lock_selection(&self) -> MutexGuard<'_, SelectionStateMachine> {
        self.selection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn entries_snapshot(&self) -> Arc<Vec<DreamEntry>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_last_result(&self, result: Option<FilterResult>) {
        *self.last_result.lock().unwrap_or_else(PoisonError::into_inner) = result;
    }

    fn validate_range(&self, range: DateRange) -> AppResult<()> {
        let span = range.span_days();
        if span > self.settings.max_selection_span_days {
            return Err(AppError::InvalidRange(format!(
                "range {} to {} spans {} days; at most {} are allowed",
                range.start, range.end, span, self.settings.max_selection_span_days
            )));
        }
        Ok(())
    }

    async fn run_filter(&self, range: DateRange) -> ApplyOutcome {
        let range = range.normalized();
        if let Err(error) = self.validate_range(range) {
            return self.reject(error);
        }

        let epoch = self.filter_epoch.load(Ordering::SeqCst);
        let outcome = self
            .engine
            .filter_by_date_range(
                self.entries_snapshot(),
                range,
                self.settings.filter_options(),
                Some(self.progress_callback()),
            )
            .await;

        match outcome {
            Ok(FilterOutcome::Applied(result)) if self.filter_epoch.load(Ordering::SeqCst) != epoch => {
                tracing::debug!(
                    request_id = result.request_id,
                    "filter changed or cleared mid-request; dropping result"
                );
                ApplyOutcome::Superseded {
                    request_id: result.request_id,
                }
            }
            Ok(FilterOutcome::Applied(result)) => self.commit(range, result),
            Ok(FilterOutcome::Superseded { request_id, .. }) => ApplyOutcome::Superseded { request_id },
            Err(error) => self.fail(error),
        }
    }

    fn commit(&self, range: DateRange, result: FilterResult) -> ApplyOutcome {
        if let Err(error) = self.write_store(Some(range)) {
            return self.fail(error);
        }

        let visible_entries = result.visible_count();
        if self.settings.notify_on_success {
            self.events.emit(
                FILTER_APPLIED,
                json!({
                    "range": range,
                    "requestId": result.request_id,
                    "visibleEntries": visible_entries,
                    "totalEntries": result.visibility_map.len(),
                    "transport": result.transport.as_str(),
                    "statistics": result.statistics,
                    "message": format!(
                        "Showing {} of {} entries from {} to {}",
                        visible_entries,
                        result.visibility_map.len(),
                        range.start,
                        range.end
                    ),
                }),
            );
        }
        tracing::info!(
            start = %range.start,
            end = %range.end,
            visible_entries,
            transport = result.transport.as_str(),
            "date filter applied"
        );
        self.set_last_result(Some(result));
        ApplyOutcome::Applied { range, visible_entries }
    }

    fn clear_filter(&self) -> ApplyOutcome {
        self.filter_epoch.fetch_add(1, Ordering::SeqCst);
        if let Err(error) = self.write_store(None) {
            return self.fail(error);
        }
        self.set_last_result(None);
        self.events.emit(FILTER_CLEARED, json!({ "message": "Date filter cleared" }));
        ApplyOutcome::Cleared
    }

    fn reject(&self, error: AppError) -> ApplyOutcome {
        tracing::warn!(error = %error, "rejected date range");
        let reason = error.to_string();
        self.events.emit(FILTER_INVALID_RANGE, json!({ "message": reason }));
        ApplyOutcome::Rejected { reason }
    }

    fn fail(&self, error: AppError) -> ApplyOutcome {
        tracing::error!(error = %error, "date filter failed");
        let reason = error.to_string();
        self.events.emit(
            FILTER_FAILED,
            json!({ "message": GENERIC_FAILURE_MESSAGE, "detail": reason }),
        );
        ApplyOutcome::Failed { reason }
    }

    fn progress_callback(&self) -> ProgressCallback {
        let events = self.events.clone();
        Arc::new(move |update: ProgressUpdate| {
            events.emit(
                FILTER_PROGRESS,
                json!({
                    "requestId": update.request_id,
                    "progress": update.progress,
                    "entriesProcessed": update.entries_processed,
                    "currentPhase": update.current_phase.as_str(),
                }),
            );
        })
    }

    /// The single outbound write path to the shared store.
    fn write_store(&self, range: Option<DateRange>) -> AppResult<bool> {
        if self.applying_external.load(Ordering::SeqCst) {
            tracing::debug!(?range, "store write suppressed while mirroring an external change");
            return Ok(false);
        }

        let _writing = FlagGuard::engage(&self.writing_store);
        match range {
            Some(range) => self.store.set_custom_range(range.start, range.end)?,
            None => self.store.clear_current_filter()?,
        }
        Ok(true)
    }

    fn handle_store_change(&self, range: Option<DateRange>) {
        if self.writing_store.load(Ordering::SeqCst) {
            return;
        }
        self.filter_epoch.fetch_add(1, Ordering::SeqCst);
        self.mirror_external(range);
        self.events.emit(FILTER_EXTERNAL_SYNC, json!({ "range": range }));
    }

    fn mirror_external(&self, range: Option<DateRange>) {
        let _applying = FlagGuard::engage(&self.applying_external);
        {
            let mut selection = self.lock_selection();
            match range {
                Some(range) if self.validate_range(range).is_ok() => {
                    selection.reflect_range(range);
                }
                Some(range) => {
                    tracing::debug!(start = %range.start, end = %range.end, "external range too wide to mirror");
                    selection.clear();
                }
                None => {
                    selection.clear();
                }
            }
        }
        self.set_last_result(None);

        // Same path a local selection change takes; the flag keeps it from
        // writing the change straight back.
        let committed = self.lock_selection().committed_range();
        if let Err(error) = self.write_store(committed) {
            tracing::warn!(error = %error, "selection sync after external change failed");
        }
    }
}

impl Drop for CoordinatorInner {
    fn drop(&mut self) {
        let subscription = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(id) = subscription {
            self.store.unsubscribe(id);
        }
    }
}

pub fn parse_date_input(raw: &str) -> AppResult<NaiveDate> {
    let trimmed = raw.trim();
    if !ISO_DATE_RE.is_match(trimmed) {
        return Err(AppError::InvalidRange(format!("'{trimmed}' is not a YYYY-MM-DD date")));
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .map_err(|_| AppError::InvalidRange(format!("'{trimmed}' is not a valid calendar date")))
}

#[cfg(test)]
mod tests {
    use super::{parse_date_input, ApplyOutcome, FilterCoordinator};
    use crate::engine::FilterEngine;
    use crate::events::{EventEmitter, EventLog, FILTER_APPLIED, FILTER_FAILED, FILTER_INVALID_RANGE, FILTER_PROGRESS};
    use crate::models::{DateRange, DreamEntry, NavigatorSettings, SelectionMode};
    use crate::selection::SelectionPhase;
    use crate::store::{FilterStore, InMemoryFilterStore, QuickFilter};
    use crate::transport::EvaluationConfig;
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, d).expect("valid date")
    }

    fn setup(mode: SelectionMode) -> (FilterCoordinator, Arc<InMemoryFilterStore>, EventLog) {
        let store = Arc::new(InMemoryFilterStore::new());
        let log = EventLog::new();
        let settings = NavigatorSettings {
            default_selection_mode: mode,
            ..NavigatorSettings::default()
        };
        let coordinator = FilterCoordinator::new(
            FilterEngine::inline_only(EvaluationConfig::default()),
            store.clone(),
            EventEmitter::new(log.sink()),
            settings,
        );
        coordinator.load_entries((1..=30).map(|d| DreamEntry::new(day(d), format!("night {d}"))).collect());
        (coordinator, store, log)
    }

    #[tokio::test]
    async fn single_pick_filters_and_writes_store_once() {
        let (coordinator, store, log) = setup(SelectionMode::Single);
        let outcome = coordinator.pick_date(day(12)).await;
        assert_eq!(
            outcome,
            ApplyOutcome::Applied {
                range: DateRange::single(day(12)),
                visible_entries: 1
            }
        );
        assert_eq!(store.current_range(), Some(DateRange::single(day(12))));
        assert_eq!(store.write_count(), 1);
        assert_eq!(log.of_type(FILTER_APPLIED).len(), 1);
        assert!(!log.of_type(FILTER_PROGRESS).is_empty());
        assert_eq!(coordinator.selection().phase, SelectionPhase::Committed);
        assert!(coordinator.last_result().is_some());
    }

    #[tokio::test]
    async fn range_mode_waits_for_second_date() {
        let (coordinator, store, _log) = setup(SelectionMode::Range);
        assert_eq!(
            coordinator.pick_date(day(5)).await,
            ApplyOutcome::AwaitingSecondDate { anchor: day(5) }
        );
        assert_eq!(store.write_count(), 0);
        let outcome = coordinator.pick_date(day(1)).await;
        assert_eq!(
            outcome,
            ApplyOutcome::Applied {
                range: DateRange::new(day(1), day(5)),
                visible_entries: 5
            }
        );
    }

    #[tokio::test]
    async fn multi_mode_uses_selection_bounds_and_clears_when_empty() {
        let (coordinator, store, _log) = setup(SelectionMode::Multi);
        coordinator.pick_date(day(3)).await;
        let outcome = coordinator.pick_date(day(8)).await;
        assert_eq!(
            outcome,
            ApplyOutcome::Applied {
                range: DateRange::new(day(3), day(8)),
                visible_entries: 6
            }
        );
        // Own write must not be mirrored back into the multi selection.
        assert_eq!(coordinator.selection().selected, vec![day(3), day(8)]);

        coordinator.pick_date(day(3)).await;
        assert_eq!(coordinator.pick_date(day(8)).await, ApplyOutcome::Cleared);
        assert_eq!(store.current_range(), None);
    }

    #[tokio::test]
    async fn external_change_updates_selection_without_writing_back() {
        let (coordinator, store, _log) = setup(SelectionMode::Single);
        store.set_custom_range(day(1), day(5)).expect("external write");

        assert_eq!(store.write_count(), 1);
        let selection = coordinator.selection();
        assert_eq!(selection.mode, SelectionMode::Range);
        assert_eq!(selection.phase, SelectionPhase::Committed);
        assert_eq!(selection.selected.len(), 5);
        assert!(!coordinator.is_applying_external());

        store
            .apply_quick_filter(QuickFilter::AllTime, day(11), false)
            .expect("external clear");
        assert_eq!(store.write_count(), 2);
        assert!(coordinator.selection().selected.is_empty());
    }

    #[tokio::test]
    async fn malformed_input_is_rejected_before_dispatch() {
        let (coordinator, store, log) = setup(SelectionMode::Range);
        let outcome = coordinator.apply_range_input("2025-02-30", "2025-03-02").await;
        assert!(matches!(outcome, ApplyOutcome::Rejected { .. }));
        assert_eq!(coordinator.engine().latest_request_id(), 0);
        assert_eq!(store.write_count(), 0);
        assert_eq!(log.of_type(FILTER_INVALID_RANGE).len(), 1);

        let outcome = coordinator.apply_range_input(" 2025-06-09 ", "2025-06-02").await;
        assert_eq!(
            outcome,
            ApplyOutcome::Applied {
                range: DateRange::new(day(2), day(9)),
                visible_entries: 8
            }
        );
    }

    #[tokio::test]
    async fn overly_wide_range_is_rejected() {
        let (coordinator, store, _log) = setup(SelectionMode::Range);
        let far = NaiveDate::from_ymd_opt(2060, 1, 1).expect("valid date");
        let outcome = coordinator.apply_range(DateRange::new(day(1), far)).await;
        assert!(matches!(outcome, ApplyOutcome::Rejected { .. }));
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn wide_second_pick_is_rejected_before_commit() {
        let (coordinator, store, log) = setup(SelectionMode::Range);
        let first = NaiveDate::from_ymd_opt(1, 1, 1).expect("valid date");
        let last = NaiveDate::from_ymd_opt(9999, 12, 31).expect("valid date");

        coordinator.pick_date(first).await;
        let outcome = coordinator.pick_date(last).await;
        assert!(matches!(outcome, ApplyOutcome::Rejected { .. }));

        let selection = coordinator.selection();
        assert_eq!(selection.phase, SelectionPhase::RangeStart);
        assert_eq!(selection.anchor, Some(first));
        assert_eq!(selection.selected, vec![first]);
        assert_eq!(store.write_count(), 0);
        assert_eq!(coordinator.engine().latest_request_id(), 0);
        assert_eq!(log.of_type(FILTER_INVALID_RANGE).len(), 1);

        // The anchor survives, so a sensible end still commits.
        let outcome = coordinator
            .pick_date(NaiveDate::from_ymd_opt(1, 1, 10).expect("valid date"))
            .await;
        assert!(matches!(outcome, ApplyOutcome::Applied { .. }));
    }

    #[tokio::test]
    async fn wide_multi_toggle_is_rejected_and_not_recorded() {
        let (coordinator, store, _log) = setup(SelectionMode::Multi);
        coordinator.pick_date(day(3)).await;
        let far = NaiveDate::from_ymd_opt(2090, 1, 1).expect("valid date");
        let outcome = coordinator.pick_date(far).await;
        assert!(matches!(outcome, ApplyOutcome::Rejected { .. }));
        assert_eq!(coordinator.selection().selected, vec![day(3)]);
        assert_eq!(store.current_range(), Some(DateRange::single(day(3))));
    }

    #[tokio::test]
    async fn store_failure_becomes_notification() {
        let (coordinator, store, log) = setup(SelectionMode::Single);
        store.set_read_only(true);
        let outcome = coordinator.pick_date(day(4)).await;
        assert!(matches!(outcome, ApplyOutcome::Failed { .. }));
        assert_eq!(store.current_range(), None);
        assert_eq!(log.of_type(FILTER_FAILED).len(), 1);
        assert!(coordinator.last_result().is_none());
    }

    #[tokio::test]
    async fn set_mode_keeps_shared_filter() {
        let (coordinator, store, _log) = setup(SelectionMode::Single);
        coordinator.pick_date(day(4)).await;
        assert_eq!(coordinator.set_mode(SelectionMode::Multi), SelectionPhase::Idle);
        assert!(coordinator.selection().selected.is_empty());
        assert_eq!(store.current_range(), Some(DateRange::single(day(4))));
        assert_eq!(coordinator.clear(), ApplyOutcome::Cleared);
        assert_eq!(store.current_range(), None);
    }

    #[tokio::test]
    async fn existing_store_range_is_mirrored_on_open() {
        let store = Arc::new(InMemoryFilterStore::new());
        store.set_custom_range(day(2), day(4)).expect("seed");
        let coordinator = FilterCoordinator::new(
            FilterEngine::inline_only(EvaluationConfig::default()),
            store.clone(),
            EventEmitter::silent(),
            NavigatorSettings::default(),
        );
        assert_eq!(coordinator.selection().selected, vec![day(2), day(3), day(4)]);
        assert_eq!(store.write_count(), 1);
        assert_eq!(store.subscriber_count(), 1);
        drop(coordinator);
        assert_eq!(store.subscriber_count(), 0);
    }

    #[test]
    fn date_input_parsing() {
        assert_eq!(parse_date_input("2025-06-01").expect("valid"), day(1));
        assert!(parse_date_input("2025-6-1").is_err());
        assert!(parse_date_input("June 1").is_err());
        assert!(parse_date_input("2025-13-01").is_err());
    }
}
