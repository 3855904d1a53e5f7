pub mod inline;
pub mod worker;

use crate::errors::AppResult;
use crate::models::{FilterStatistics, TransportKind, VisibilityEntry};
use crate::pattern::{classify_with, ClassificationThresholds};
use crate::protocol::{FilterPhase, FilterRequestMessage, FilterResponse, ProgressUpdate};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

pub use inline::InlineTransport;
pub use worker::WorkerTransport;

pub type ProgressSink = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;
pub type TransportFuture<'a> = Pin<Box<dyn Future<Output = AppResult<FilterResponse>> + Send + 'a>>;

/// Something that can evaluate a filter request and stream progress back.
pub trait FilterTransport: Send + Sync {
    fn kind(&self) -> TransportKind;
    fn dispatch(&self, request: FilterRequestMessage, progress: ProgressSink) -> TransportFuture<'_>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluationConfig {
    pub progress_interval: usize,
    pub thresholds: ClassificationThresholds,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            progress_interval: 250,
            thresholds: ClassificationThresholds::default(),
        }
    }
}

const FILTERING_START_PERCENT: usize = 5;
const FILTERING_SPAN_PERCENT: usize = 85;
const STATISTICS_PERCENT: u8 = 95;

/// Evaluates a request on the calling thread. Progress percentages reported
/// through `emit` are strictly increasing and end at 100.
pub fn evaluate_request(
    request: &FilterRequestMessage,
    config: &EvaluationConfig,
    emit: &mut dyn FnMut(ProgressUpdate),
) -> FilterResponse {
    let started = Instant::now();
    let total = request.entries.len();
    let interval = config.progress_interval.max(1);
    let mut last_percent: Option<u8> = None;
    let mut report = |percent: u8, processed: usize, phase: FilterPhase| {
        if last_percent.is_some_and(|last| percent <= last) {
            return;
        }
        last_percent = Some(percent);
        emit(ProgressUpdate {
            request_id: request.request_id,
            progress: percent,
            entries_processed: processed,
            current_phase: phase,
        });
    };

    report(0, 0, FilterPhase::Preparing);

    let criteria = request.criteria.clone().normalized();
    let mut visibility_map = Vec::with_capacity(total);
    for (index, entry) in request.entries.iter().enumerate() {
        visibility_map.push(VisibilityEntry {
            entry_index: index,
            date: entry.date,
            visible: criteria.matches(entry.date),
        });
        let processed = index + 1;
        if processed % interval == 0 && processed < total {
            let percent = FILTERING_START_PERCENT + FILTERING_SPAN_PERCENT * processed / total;
            report(percent as u8, processed, FilterPhase::Filtering);
        }
    }

    let statistics = if request.options.include_statistics {
        report(STATISTICS_PERCENT, total, FilterPhase::Statistics);
        let mut stats = collect_statistics(request, &visibility_map, &config.thresholds);
        stats.elapsed_ms = started.elapsed().as_millis() as u64;
        Some(stats)
    } else {
        None
    };

    report(100, total, FilterPhase::Complete);

    FilterResponse {
        request_id: request.request_id,
        visibility_map,
        statistics,
    }
}

fn collect_statistics(
    request: &FilterRequestMessage,
    visibility_map: &[VisibilityEntry],
    thresholds: &ClassificationThresholds,
) -> FilterStatistics {
    let mut by_pattern = BTreeMap::new();
    let mut earliest_visible = None;
    let mut latest_visible = None;
    let mut visible_entries = 0usize;

    for item in visibility_map.iter().filter(|item| item.visible) {
        visible_entries += 1;
        let Some(entry) = request.entries.get(item.entry_index) else {
            continue;
        };
        let pattern = classify_with(entry, thresholds).base_pattern;
        *by_pattern.entry(pattern).or_insert(0) += 1;
        earliest_visible = Some(earliest_visible.map_or(item.date, |current: NaiveDate| current.min(item.date)));
        latest_visible = Some(latest_visible.map_or(item.date, |current: NaiveDate| current.max(item.date)));
    }

    FilterStatistics {
        total_entries: visibility_map.len(),
        visible_entries,
        hidden_entries: visibility_map.len() - visible_entries,
        by_pattern,
        earliest_visible,
        latest_visible,
        elapsed_ms: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::{evaluate_request, EvaluationConfig};
    use crate::models::{DateRange, DreamEntry, FilterCriteria, FilterOptions};
    use crate::pattern::{PatternKind, LOST_SEGMENTS};
    use crate::protocol::{FilterPhase, FilterRequestMessage};
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, d).expect("valid date")
    }

    fn request(entries: Vec<DreamEntry>, criteria: FilterCriteria) -> FilterRequestMessage {
        FilterRequestMessage {
            request_id: 1,
            entries: Arc::new(entries),
            criteria,
            options: FilterOptions::default(),
        }
    }

    #[test]
    fn inclusive_bounds_and_reversed_range() {
        let entries = (1..=12).map(|d| DreamEntry::new(day(d), format!("night {d}"))).collect();
        let req = request(entries, FilterCriteria::Range(DateRange::new(day(10), day(2))));
        let response = evaluate_request(&req, &EvaluationConfig::default(), &mut |_| {});
        let visible: Vec<u32> = response
            .visibility_map
            .iter()
            .filter(|item| item.visible)
            .map(|item| chrono::Datelike::day(&item.date))
            .collect();
        assert_eq!(visible, (2..=10).collect::<Vec<_>>());
        let stats = response.statistics.expect("statistics requested");
        assert_eq!(stats.total_entries, 12);
        assert_eq!(stats.visible_entries, 9);
        assert_eq!(stats.hidden_entries, 3);
        assert_eq!(stats.earliest_visible, Some(day(2)));
        assert_eq!(stats.latest_visible, Some(day(10)));
    }

    #[test]
    fn progress_is_strictly_increasing_and_completes() {
        let entries = (0..1_000)
            .map(|i| DreamEntry::new(day(1 + (i % 28) as u32), "n"))
            .collect();
        let req = request(entries, FilterCriteria::Range(DateRange::single(day(3))));
        let config = EvaluationConfig {
            progress_interval: 100,
            ..EvaluationConfig::default()
        };
        let mut updates = Vec::new();
        evaluate_request(&req, &config, &mut |update| updates.push(update));
        assert!(updates.len() > 3);
        assert!(updates.windows(2).all(|pair| pair[0].progress < pair[1].progress));
        let last = updates.last().expect("final progress");
        assert_eq!(last.progress, 100);
        assert_eq!(last.current_phase, FilterPhase::Complete);
        assert_eq!(last.entries_processed, 1_000);
    }

    #[test]
    fn statistics_count_visible_patterns_only() {
        let entries = vec![
            DreamEntry::new(day(1), "lost").with_metric(LOST_SEGMENTS, 10.0),
            DreamEntry::new(day(2), "plain"),
            DreamEntry::new(day(20), "outside").with_metric(LOST_SEGMENTS, 10.0),
        ];
        let mut req = request(entries, FilterCriteria::Range(DateRange::new(day(1), day(5))));
        let stats = evaluate_request(&req, &EvaluationConfig::default(), &mut |_| {})
            .statistics
            .expect("statistics");
        assert_eq!(stats.by_pattern.get(&PatternKind::Fragmented), Some(&1));
        assert_eq!(stats.by_pattern.get(&PatternKind::BasicRecall), Some(&1));

        req.options.include_statistics = false;
        assert!(evaluate_request(&req, &EvaluationConfig::default(), &mut |_| {})
            .statistics
            .is_none());
    }

    #[test]
    fn empty_entry_set_still_reports_start_and_finish() {
        let req = request(Vec::new(), FilterCriteria::Range(DateRange::single(day(1))));
        let mut updates = Vec::new();
        let response = evaluate_request(&req, &EvaluationConfig::default(), &mut |update| updates.push(update));
        assert!(response.visibility_map.is_empty());
        assert_eq!(updates.first().map(|u| u.progress), Some(0));
        assert_eq!(updates.last().map(|u| u.progress), Some(100));
    }
}
