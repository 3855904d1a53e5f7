use crate::pattern::{ClassificationThresholds, PatternKind};
use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One journal entry as produced by the note parsing layer. Read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DreamEntry {
    pub date: NaiveDate,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
}

impl DreamEntry {
    pub fn new(date: NaiveDate, title: impl Into<String>) -> Self {
        Self {
            date,
            title: title.into(),
            content: String::new(),
            metrics: BTreeMap::new(),
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    /// Looks a metric up by exact name, then case-insensitively. Non-finite
    /// values are treated as absent.
    pub fn metric(&self, name: &str) -> Option<f64> {
        let value = self.metrics.get(name).copied().or_else(|| {
            self.metrics
                .iter()
                .find(|(key, _)| key.trim().eq_ignore_ascii_case(name))
                .map(|(_, value)| *value)
        })?;
        value.is_finite().then_some(value)
    }
}

/// Inclusive calendar-day range. `start > end` is allowed on construction and
/// resolved by [`DateRange::normalized`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn single(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    pub fn normalized(self) -> Self {
        if self.start <= self.end {
            self
        } else {
            Self {
                start: self.end,
                end: self.start,
            }
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        let range = self.normalized();
        range.start <= date && date <= range.end
    }

    /// Number of days covered, both ends included.
    pub fn span_days(&self) -> i64 {
        let range = self.normalized();
        (range.end - range.start).num_days() + 1
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let range = self.normalized();
        range
            .start
            .iter_days()
            .take_while(move |day| *day <= range.end)
    }

    pub fn from_dates<'a>(dates: impl IntoIterator<Item = &'a NaiveDate>) -> Option<Self> {
        let mut iter = dates.into_iter();
        let first = *iter.next()?;
        let (start, end) = iter.fold((first, first), |(low, high), day| {
            (low.min(*day), high.max(*day))
        });
        Some(Self { start, end })
    }

    pub fn shifted(&self, days: i64) -> Option<Self> {
        let shift = |date: NaiveDate| {
            if days >= 0 {
                date.checked_add_days(Days::new(days as u64))
            } else {
                date.checked_sub_days(Days::new(days.unsigned_abs()))
            }
        };
        Some(Self {
            start: shift(self.start)?,
            end: shift(self.end)?,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionMode {
    #[default]
    Single,
    Range,
    Multi,
}

impl SelectionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Range => "range",
            Self::Multi => "multi",
        }
    }
}

/// What a filter request selects: a contiguous range or an explicit day set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum FilterCriteria {
    Range(DateRange),
    Dates { dates: BTreeSet<NaiveDate> },
}

impl FilterCriteria {
    pub fn normalized(self) -> Self {
        match self {
            Self::Range(range) => Self::Range(range.normalized()),
            other => other,
        }
    }

    pub fn matches(&self, date: NaiveDate) -> bool {
        match self {
            Self::Range(range) => range.contains(date),
            Self::Dates { dates } => dates.contains(&date),
        }
    }

    pub fn bounds(&self) -> Option<DateRange> {
        match self {
            Self::Range(range) => Some(range.normalized()),
            Self::Dates { dates } => DateRange::from_dates(dates),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterOptions {
    pub include_statistics: bool,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            include_statistics: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibilityEntry {
    pub entry_index: usize,
    pub date: NaiveDate,
    pub visible: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterStatistics {
    pub total_entries: usize,
    pub visible_entries: usize,
    pub hidden_entries: usize,
    pub by_pattern: BTreeMap<PatternKind, usize>,
    pub earliest_visible: Option<NaiveDate>,
    pub latest_visible: Option<NaiveDate>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    Worker,
    Inline,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Worker => "worker",
            Self::Inline => "inline",
        }
    }
}

/// Accepted result of the most recent filter request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterResult {
    pub request_id: u64,
    pub criteria: FilterCriteria,
    pub visibility_map: Vec<VisibilityEntry>,
    pub statistics: Option<FilterStatistics>,
    pub transport: TransportKind,
}

impl FilterResult {
    pub fn visible_count(&self) -> usize {
        self.visibility_map.iter().filter(|entry| entry.visible).count()
    }

    pub fn is_visible(&self, entry_index: usize) -> bool {
        self.visibility_map
            .iter()
            .find(|entry| entry.entry_index == entry_index)
            .is_some_and(|entry| entry.visible)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NavigatorSettings {
    pub use_background_worker: bool,
    pub worker_timeout_ms: u64,
    pub worker_ready_timeout_ms: u64,
    pub progress_interval: usize,
    pub include_statistics: bool,
    pub default_selection_mode: SelectionMode,
    pub max_selection_span_days: i64,
    pub notify_on_success: bool,
    pub week_starts_on_monday: bool,
    pub thresholds: ClassificationThresholds,
    pub log_level: String,
}

impl Default for NavigatorSettings {
    fn default() -> Self {
        Self {
            use_background_worker: true,
            worker_timeout_ms: 5_000,
            worker_ready_timeout_ms: 2_000,
            progress_interval: 250,
            include_statistics: true,
            default_selection_mode: SelectionMode::Single,
            max_selection_span_days: 3_660,
            notify_on_success: true,
            week_starts_on_monday: false,
            thresholds: ClassificationThresholds::default(),
            log_level: "info".to_string(),
        }
    }
}

impl NavigatorSettings {
    pub fn filter_options(&self) -> FilterOptions {
        FilterOptions {
            include_statistics: self.include_statistics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DateRange, DreamEntry, FilterCriteria};
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, d).expect("valid date")
    }

    #[test]
    fn reversed_range_normalizes_and_contains_bounds() {
        let range = DateRange::new(day(10), day(1));
        assert_eq!(range.normalized(), DateRange::new(day(1), day(10)));
        assert!(range.contains(day(1)));
        assert!(range.contains(day(10)));
        assert!(!range.contains(day(11)));
        assert_eq!(range.span_days(), 10);
        assert_eq!(range.days().count(), 10);
    }

    #[test]
    fn range_from_dates_uses_min_and_max() {
        let dates = [day(9), day(2), day(5)];
        let range = DateRange::from_dates(dates.iter()).expect("non-empty");
        assert_eq!(range, DateRange::new(day(2), day(9)));
        assert!(DateRange::from_dates(std::iter::empty()).is_none());
    }

    #[test]
    fn metric_lookup_is_case_insensitive_and_skips_nan() {
        let entry = DreamEntry::new(day(1), "flight")
            .with_metric("sensory detail", 4.0)
            .with_metric("Confidence Score", f64::NAN);
        assert_eq!(entry.metric("Sensory Detail"), Some(4.0));
        assert_eq!(entry.metric("Confidence Score"), None);
        assert_eq!(entry.metric("Lost Segments"), None);
    }

    #[test]
    fn date_set_criteria_matches_members_only() {
        let criteria = FilterCriteria::Dates {
            dates: [day(3), day(7)].into_iter().collect(),
        };
        assert!(criteria.matches(day(3)));
        assert!(!criteria.matches(day(5)));
        assert_eq!(criteria.bounds(), Some(DateRange::new(day(3), day(7))));
    }
}
