//! Month grid consumed by the rendering layer: per-day entry patterns and a
//! visibility flag against the active filter.

use crate::errors::{AppError, AppResult};
use crate::models::{DateRange, DreamEntry};
use crate::pattern::{classify_with, ClassificationThresholds, PatternVisualization};
use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub in_month: bool,
    /// True when no filter is active or the day falls inside it.
    pub visible: bool,
    pub entry_count: usize,
    pub patterns: Vec<PatternVisualization>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthView {
    pub year: i32,
    pub month: u32,
    pub weeks: Vec<Vec<CalendarDay>>,
}

impl MonthView {
    pub fn day(&self, date: NaiveDate) -> Option<&CalendarDay> {
        self.weeks.iter().flatten().find(|day| day.date == date)
    }
}

pub fn month_bounds(year: i32, month: u32) -> Option<DateRange> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next_first = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    let last = next_first.pred_opt()?;
    Some(DateRange::new(first, last))
}

/// Builds whole weeks covering `year`/`month`. Patterns are classified on
/// demand and not retained.
pub fn month_view(
    entries: &[DreamEntry],
    year: i32,
    month: u32,
    active_range: Option<DateRange>,
    week_starts_on_monday: bool,
    thresholds: &ClassificationThresholds,
) -> AppResult<MonthView> {
    let bounds = month_bounds(year, month)
        .ok_or_else(|| AppError::InvalidInput(format!("{year}-{month:02} is not a calendar month")))?;

    let lead = if week_starts_on_monday {
        bounds.start.weekday().num_days_from_monday()
    } else {
        bounds.start.weekday().num_days_from_sunday()
    };
    let grid_start = bounds
        .start
        .checked_sub_days(Days::new(u64::from(lead)))
        .ok_or_else(|| AppError::InvalidInput("month grid starts before the supported calendar".to_string()))?;
    let cells = (lead as i64 + bounds.span_days() + 6) / 7 * 7;

    let mut by_day: BTreeMap<NaiveDate, Vec<&DreamEntry>> = BTreeMap::new();
    for entry in entries {
        by_day.entry(entry.date).or_default().push(entry);
    }

    let days: Vec<CalendarDay> = grid_start
        .iter_days()
        .take(cells as usize)
        .map(|date| {
            let day_entries = by_day.get(&date).map(Vec::as_slice).unwrap_or_default();
            CalendarDay {
                date,
                in_month: bounds.contains(date),
                visible: active_range.map_or(true, |range| range.contains(date)),
                entry_count: day_entries.len(),
                patterns: day_entries
                    .iter()
                    .map(|entry| classify_with(entry, thresholds))
                    .collect(),
            }
        })
        .collect();

    Ok(MonthView {
        year,
        month,
        weeks: days.chunks(7).map(<[CalendarDay]>::to_vec).collect(),
    })
}
