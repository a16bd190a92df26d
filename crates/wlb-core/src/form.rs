use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_tz::Tz;
use tracing::debug;

use crate::collection::Collection;
use crate::datetime::{next_half_hour, to_utc_from_local};
use crate::error::{TrackerError, TrackerResult};
use crate::item::{Category, Item, Title};

/// Normalized input ready to hand to [`Collection::create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub title: Title,
    pub category: Category,
    pub due_at: DateTime<Utc>,
}

/// Quick-add form state.
///
/// The title is cleared after a successful submission; category and due
/// time stay so several items can be entered in a row.
#[derive(Debug, Clone)]
pub struct CreationForm {
    pub title: String,
    pub category: Category,
    pub due_local: NaiveDateTime,
    tz: Tz,
    submitting: bool,
}

impl CreationForm {
    /// Starts empty, with the due time at the next half hour.
    pub fn new(now: DateTime<Utc>, tz: Tz) -> Self {
        Self {
            title: String::new(),
            category: Category::Work,
            due_local: next_half_hour(now, &tz),
            tz,
            submitting: false,
        }
    }

    pub fn is_submitting(&self) -> bool {
        self.submitting
    }

    pub fn can_submit(&self) -> bool {
        !self.submitting && !self.title.trim().is_empty()
    }

    /// Validates the form and marks it in flight.
    pub fn begin_submit(&mut self) -> TrackerResult<Submission> {
        if self.submitting {
            return Err(TrackerError::Busy("new item".to_string()));
        }
        let title = Title::parse(&self.title)?;
        let due_at = to_utc_from_local(self.due_local, &self.tz, "creation form")
            .map_err(|err| TrackerError::InvalidTime(format!("{err:#}")))?;
        self.submitting = true;
        Ok(Submission {
            title,
            category: self.category,
            due_at,
        })
    }

    /// Ends the in-flight state; clears the title only on success.
    pub fn finish_submit(&mut self, succeeded: bool) {
        self.submitting = false;
        if succeeded {
            self.title.clear();
        }
        debug!(succeeded, "finished form submission");
    }

    #[tracing::instrument(skip(self, collection))]
    pub async fn submit_to(&mut self, collection: &Collection) -> TrackerResult<Item> {
        let submission = self.begin_submit()?;
        let result = collection
            .create(submission.title.as_str(), submission.category, submission.due_at)
            .await;
        self.finish_submit(result.is_ok());
        result
    }
}
