use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use tracing::trace;

use crate::datetime::{is_same_local_day, local_date};
use crate::error::TrackerError;
use crate::item::{Category, Item};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewMode {
    #[default]
    Today,
    All,
    Completed,
}

impl FromStr for ViewMode {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "today" => Ok(ViewMode::Today),
            "all" => Ok(ViewMode::All),
            "completed" | "completed-only" | "done" => Ok(ViewMode::Completed),
            other => Err(TrackerError::Config(format!("unknown view: {other}"))),
        }
    }
}

impl fmt::Display for ViewMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ViewMode::Today => "Today",
            ViewMode::All => "All",
            ViewMode::Completed => "Completed",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CategoryFilter {
    #[default]
    All,
    Only(Category),
}

impl CategoryFilter {
    fn admits(self, category: Category) -> bool {
        match self {
            CategoryFilter::All => true,
            CategoryFilter::Only(wanted) => wanted == category,
        }
    }
}

impl FromStr for CategoryFilter {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(CategoryFilter::All);
        }
        s.parse().map(CategoryFilter::Only)
    }
}

impl fmt::Display for CategoryFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CategoryFilter::All => f.write_str("all"),
            CategoryFilter::Only(category) => write!(f, "{category}"),
        }
    }
}

/// Time-window and category selection. Both predicates must hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ViewFilter {
    pub mode: ViewMode,
    pub category: CategoryFilter,
}

impl ViewFilter {
    pub fn new(mode: ViewMode, category: CategoryFilter) -> Self {
        Self { mode, category }
    }

    pub fn matches(&self, item: &Item, now: DateTime<Utc>, tz: &Tz) -> bool {
        let in_window = match self.mode {
            ViewMode::Today => is_same_local_day(item.due_at, now, tz),
            ViewMode::All => true,
            ViewMode::Completed => item.completed,
        };
        in_window && self.category.admits(item.category)
    }

    /// Derives the visible subset in source order. Never touches `items`.
    pub fn apply<'a>(&self, items: &'a [Item], now: DateTime<Utc>, tz: &Tz) -> Vec<&'a Item> {
        let out: Vec<&Item> = items
            .iter()
            .filter(|item| self.matches(item, now, tz))
            .collect();
        trace!(
            mode = %self.mode,
            category = %self.category,
            total = items.len(),
            visible = out.len(),
            "applied view filter"
        );
        out
    }
}

/// Memoized view keyed by collection revision, filter and local day.
///
/// The local day is part of the key so a long-lived `Today` view rolls over
/// at midnight.
#[derive(Debug, Default)]
pub struct ViewCache {
    key: Option<(u64, ViewFilter, NaiveDate)>,
    items: Vec<Item>,
}

impl ViewCache {
    pub fn get_or_compute(
        &mut self,
        revision: u64,
        filter: ViewFilter,
        source: impl FnOnce() -> Vec<Item>,
        now: DateTime<Utc>,
        tz: &Tz,
    ) -> &[Item] {
        let key = (revision, filter, local_date(now, tz));
        if self.key != Some(key) {
            let all = source();
            self.items = filter.apply(&all, now, tz).into_iter().cloned().collect();
            self.key = Some(key);
        }
        &self.items
    }

    pub fn invalidate(&mut self) {
        self.key = None;
        self.items.clear();
    }
}
