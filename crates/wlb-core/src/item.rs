use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TrackerError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    #[serde(alias = "Work")]
    Work,
    #[serde(alias = "personal", alias = "Personal", alias = "Life")]
    Life,
    #[serde(alias = "Pet")]
    Pet,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Work => "work",
            Category::Life => "life",
            Category::Pet => "pet",
        }
    }

    /// Spelling used by the `type` column of the remote events table.
    pub fn remote_name(self) -> &'static str {
        match self {
            Category::Work => "Work",
            Category::Life => "Personal",
            Category::Pet => "Pet",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "work" => Ok(Category::Work),
            "life" | "personal" => Ok(Category::Life),
            "pet" => Ok(Category::Pet),
            _ => Err(TrackerError::InvalidCategory(s.to_string())),
        }
    }
}

/// A display title, trimmed and never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Title(String);

impl Title {
    pub fn parse(raw: &str) -> Result<Self, TrackerError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(TrackerError::EmptyTitle);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Title {
    type Error = TrackerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Title::parse(&value)
    }
}

impl From<Title> for String {
    fn from(value: Title) -> Self {
        value.0
    }
}

impl fmt::Display for Title {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,

    pub title: Title,

    pub category: Category,

    pub due_at: DateTime<Utc>,

    #[serde(default)]
    pub completed: bool,

    pub created_at: DateTime<Utc>,
}

/// Payload handed to a store when an item is created. Stores decide the
/// id and stamp the owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewItem {
    pub title: Title,
    pub category: Category,
    pub due_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl NewItem {
    pub fn new(title: Title, category: Category, due_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            title,
            category,
            due_at,
            created_at: now,
        }
    }

    /// Materializes the item with a client-assigned id.
    pub fn into_item(self, owner_id: Option<String>) -> Item {
        Item {
            id: Uuid::new_v4().to_string(),
            owner_id,
            title: self.title,
            category: self.category,
            due_at: self.due_at,
            completed: false,
            created_at: self.created_at,
        }
    }
}

impl Item {
    pub fn short_id(&self) -> &str {
        let end = self
            .id
            .char_indices()
            .nth(8)
            .map(|(idx, _)| idx)
            .unwrap_or(self.id.len());
        &self.id[..end]
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    #[test]
    fn category_accepts_personal_as_life() {
        assert_eq!("Personal".parse::<Category>().unwrap(), Category::Life);
        assert_eq!(" pet ".parse::<Category>().unwrap(), Category::Pet);
        assert!("chores".parse::<Category>().is_err());
    }

    #[test]
    fn title_is_trimmed_and_non_empty() {
        assert_eq!(Title::parse("  Feed cat ").unwrap().as_str(), "Feed cat");
        assert!(matches!(Title::parse(" \t "), Err(TrackerError::EmptyTitle)));
    }

    #[test]
    fn decoding_rejects_blank_title_and_unknown_category() {
        let blank = r#"{"id":"a","title":"  ","category":"work","dueAt":"2026-01-01T00:00:00Z","completed":false,"createdAt":"2026-01-01T00:00:00Z"}"#;
        assert!(serde_json::from_str::<Item>(blank).is_err());

        let bogus = r#"{"id":"a","title":"x","category":"chores","dueAt":"2026-01-01T00:00:00Z","completed":false,"createdAt":"2026-01-01T00:00:00Z"}"#;
        assert!(serde_json::from_str::<Item>(bogus).is_err());
    }

    #[test]
    fn local_blob_shape_uses_camel_case_keys() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap();
        let item = NewItem::new(Title::parse("Stand-up").unwrap(), Category::Work, now, now).into_item(None);
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["category"], "work");
        assert_eq!(value["dueAt"], "2026-03-01T09:30:00Z");
        assert!(value.get("ownerId").is_none());
        assert_eq!(value["completed"], false);
    }
}
