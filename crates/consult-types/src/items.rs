use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[default]
    PendingReview,
    Reviewed,
    Resolved,
    Dismissed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::PendingReview => "pending_review",
            ItemStatus::Reviewed => "reviewed",
            ItemStatus::Resolved => "resolved",
            ItemStatus::Dismissed => "dismissed",
        }
    }
}

impl FromStr for ItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending_review" | "pending" => Ok(ItemStatus::PendingReview),
            "reviewed" => Ok(ItemStatus::Reviewed),
            "resolved" => Ok(ItemStatus::Resolved),
            "dismissed" => Ok(ItemStatus::Dismissed),
            other => Err(format!("unknown status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            other => Err(format!("unknown priority '{other}'")),
        }
    }
}

/// An item flagged for special handling, usually from a room snapshot.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct CapturedItem {
    pub id: String,
    pub description: String,
    pub category: String,
    pub priority: Priority,
    pub status: ItemStatus,
    /// Size of the decoded snapshot; zero when captured without an image.
    pub image_bytes: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct Note {
    pub id: String,
    pub content: String,
    pub category: String,
    pub priority: Priority,
    pub status: ItemStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct AdminReport {
    pub total_items: usize,
    pub total_notes: usize,
    pub by_category: BTreeMap<String, usize>,
    pub by_priority: BTreeMap<String, usize>,
    pub by_status: BTreeMap<String, usize>,
    pub items: Vec<CapturedItem>,
}

/// `POST /api/admin/items` body.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct CaptureItemRequest {
    #[serde(rename = "imageData")]
    pub image_data: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub priority: Option<String>,
}

/// `POST /api/admin/notes` body.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct NoteRequest {
    pub content: Option<String>,
    pub category: Option<String>,
    pub priority: Option<String>,
}

/// `PUT .../{id}` and `PUT .../{id}/status` body.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct StatusUpdate {
    pub status: Option<String>,
}
