use crate::calendar::month_bounds;
use crate::models::DateRange;
use anyhow::{anyhow, Context};
use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

pub type FilterChangeHandler = Arc<dyn Fn(Option<DateRange>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// The host's time filter: the single source of truth for what is currently
/// filtered. Owned outside the navigator.
pub trait FilterStore: Send + Sync {
    fn current_range(&self) -> Option<DateRange>;
    fn set_custom_range(&self, start: NaiveDate, end: NaiveDate) -> anyhow::Result<()>;
    fn clear_current_filter(&self) -> anyhow::Result<()>;
    fn on_filter_change(&self, handler: FilterChangeHandler) -> SubscriptionId;
    fn unsubscribe(&self, id: SubscriptionId);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuickFilter {
    Today,
    Yesterday,
    ThisWeek,
    LastWeek,
    ThisMonth,
    LastMonth,
    Last30Days,
    ThisYear,
    AllTime,
}

impl QuickFilter {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Today => "today",
            Self::Yesterday => "yesterday",
            Self::ThisWeek => "this-week",
            Self::LastWeek => "last-week",
            Self::ThisMonth => "this-month",
            Self::LastMonth => "last-month",
            Self::Last30Days => "last-30-days",
            Self::ThisYear => "this-year",
            Self::AllTime => "all-time",
        }
    }

    /// `None` means no date restriction.
    pub fn range(self, today: NaiveDate, week_starts_on_monday: bool) -> Option<DateRange> {
        match self {
            Self::Today => Some(DateRange::single(today)),
            Self::Yesterday => today.checked_sub_days(Days::new(1)).map(DateRange::single),
            Self::ThisWeek => week_containing(today, week_starts_on_monday),
            Self::LastWeek => week_containing(today, week_starts_on_monday)?.shifted(-7),
            Self::ThisMonth => month_bounds(today.year(), today.month()),
            Self::LastMonth => {
                let (year, month) = if today.month() == 1 {
                    (today.year() - 1, 12)
                } else {
                    (today.year(), today.month() - 1)
                };
                month_bounds(year, month)
            }
            Self::Last30Days => today
                .checked_sub_days(Days::new(29))
                .map(|start| DateRange::new(start, today)),
            Self::ThisYear => Some(DateRange::new(
                NaiveDate::from_ymd_opt(today.year(), 1, 1)?,
                NaiveDate::from_ymd_opt(today.year(), 12, 31)?,
            )),
            Self::AllTime => None,
        }
    }
}

fn week_containing(date: NaiveDate, week_starts_on_monday: bool) -> Option<DateRange> {
    let offset = if week_starts_on_monday {
        date.weekday().num_days_from_monday()
    } else {
        date.weekday().num_days_from_sunday()
    };
    let start = date.checked_sub_days(Days::new(u64::from(offset)))?;
    let end = start.checked_add_days(Days::new(6))?;
    Some(DateRange::new(start, end))
}

/// Process-local filter store. Notifies subscribers synchronously after each
/// write, outside its own locks.
#[derive(Default)]
pub struct InMemoryFilterStore {
    current: Mutex<Option<DateRange>>,
    handlers: Mutex<Vec<(SubscriptionId, FilterChangeHandler)>>,
    next_subscription: AtomicU64,
    write_count: AtomicUsize,
    read_only: AtomicBool,
}

impl InMemoryFilterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of accepted writes (custom ranges and clears).
    pub fn write_count(&self) -> usize {
        self.write_count.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    pub fn apply_quick_filter(
        &self,
        filter: QuickFilter,
        today: NaiveDate,
        week_starts_on_monday: bool,
    ) -> anyhow::Result<Option<DateRange>> {
        match filter.range(today, week_starts_on_monday) {
            Some(range) => {
                self.set_custom_range(range.start, range.end)
                    .with_context(|| format!("applying quick filter {}", filter.as_str()))?;
                Ok(Some(range))
            }
            None => {
                self.clear_current_filter()
                    .with_context(|| format!("applying quick filter {}", filter.as_str()))?;
                Ok(None)
            }
        }
    }

    fn write(&self, next: Option<DateRange>) -> anyhow::Result<()> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(anyhow!("filter store is read-only"));
        }
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = next;
        self.write_count.fetch_add(1, Ordering::SeqCst);

        let handlers: Vec<FilterChangeHandler> = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in handlers {
            handler(next);
        }
        Ok(())
    }
}

impl FilterStore for InMemoryFilterStore {
    fn current_range(&self) -> Option<DateRange> {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_custom_range(&self, start: NaiveDate, end: NaiveDate) -> anyhow::Result<()> {
        self.write(Some(DateRange::new(start, end).normalized()))
    }

    fn clear_current_filter(&self) -> anyhow::Result<()> {
        self.write(None)
    }

    fn on_filter_change(&self, handler: FilterChangeHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, handler));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(existing, _)| *existing != id);
    }
}
