use crate::models::{DateRange, SelectionMode};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionPhase {
    #[default]
    Idle,
    /// Range mode only: anchor chosen, waiting for the second endpoint.
    RangeStart,
    Committed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionSnapshot {
    pub mode: SelectionMode,
    pub phase: SelectionPhase,
    pub anchor: Option<NaiveDate>,
    pub selected: Vec<NaiveDate>,
}

/// Navigator selection state. Fields only change through the transition
/// methods below.
#[derive(Debug, Clone, Default)]
pub struct SelectionStateMachine {
    mode: SelectionMode,
    phase: SelectionPhase,
    anchor: Option<NaiveDate>,
    selected: BTreeSet<NaiveDate>,
}

impl SelectionStateMachine {
    pub fn new(mode: SelectionMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn mode(&self) -> SelectionMode {
        self.mode
    }

    pub fn phase(&self) -> SelectionPhase {
        self.phase
    }

    pub fn anchor(&self) -> Option<NaiveDate> {
        self.anchor
    }

    pub fn selected(&self) -> &BTreeSet<NaiveDate> {
        &self.selected
    }

    pub fn is_committed(&self) -> bool {
        self.phase == SelectionPhase::Committed
    }

    pub fn snapshot(&self) -> SelectionSnapshot {
        SelectionSnapshot {
            mode: self.mode,
            phase: self.phase,
            anchor: self.anchor,
            selected: self.selected.iter().copied().collect(),
        }
    }

    /// Range to filter on: the single day, or min/max of the selection.
    pub fn committed_range(&self) -> Option<DateRange> {
        if !self.is_committed() {
            return None;
        }
        DateRange::from_dates(&self.selected)
    }

    /// Range that `pick_date(date)` would commit, computed without touching
    /// state or expanding the span. `None` when the pick would not commit.
    pub fn preview_pick(&self, date: NaiveDate) -> Option<DateRange> {
        match self.mode {
            SelectionMode::Single => Some(DateRange::single(date)),
            SelectionMode::Range => match (self.phase, self.anchor) {
                (SelectionPhase::RangeStart, Some(anchor)) => Some(DateRange::new(anchor, date).normalized()),
                _ => None,
            },
            SelectionMode::Multi if self.selected.contains(&date) => {
                DateRange::from_dates(self.selected.iter().filter(|day| **day != date))
            }
            SelectionMode::Multi => DateRange::from_dates(self.selected.iter().chain(std::iter::once(&date))),
        }
    }

    pub fn set_mode(&mut self, mode: SelectionMode) -> SelectionPhase {
        self.mode = mode;
        self.reset()
    }

    pub fn clear(&mut self) -> SelectionPhase {
        self.reset()
    }

    pub fn pick_date(&mut self, date: NaiveDate) -> SelectionPhase {
        match self.mode {
            SelectionMode::Single => {
                self.selected.clear();
                self.selected.insert(date);
                self.anchor = None;
                self.phase = SelectionPhase::Committed;
            }
            SelectionMode::Range => match (self.phase, self.anchor) {
                (SelectionPhase::RangeStart, Some(anchor)) => {
                    self.selected = DateRange::new(anchor, date).days().collect();
                    self.anchor = None;
                    self.phase = SelectionPhase::Committed;
                }
                _ => {
                    self.selected.clear();
                    self.selected.insert(date);
                    self.anchor = Some(date);
                    self.phase = SelectionPhase::RangeStart;
                }
            },
            SelectionMode::Multi => {
                if !self.selected.remove(&date) {
                    self.selected.insert(date);
                }
                self.anchor = None;
                self.phase = if self.selected.is_empty() {
                    SelectionPhase::Idle
                } else {
                    SelectionPhase::Committed
                };
            }
        }
        self.phase
    }

    /// Mirrors a range that arrived from outside the navigator. A multi-day
    /// range switches Single mode to Range mode, since Single holds one day.
    pub fn reflect_range(&mut self, range: DateRange) -> SelectionPhase {
        let range = range.normalized();
        if self.mode == SelectionMode::Single && range.start != range.end {
            self.mode = SelectionMode::Range;
        }
        self.selected = range.days().collect();
        self.anchor = None;
        self.phase = SelectionPhase::Committed;
        self.phase
    }

    fn reset(&mut self) -> SelectionPhase {
        self.selected.clear();
        self.anchor = None;
        self.phase = SelectionPhase::Idle;
        self.phase
    }
}
