use crate::error::{ConsultError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use consult_types::items::{CaptureItemRequest, NoteRequest, StatusUpdate};
use consult_types::{AdminReport, CapturedItem, ImageData, ItemStatus, Note, Priority};
use tokio::sync::RwLock;

pub const DEFAULT_CATEGORY: &str = "general";

struct KeywordRule {
    phrases: &'static [&'static str],
    words: &'static [&'static str],
    description: &'static str,
    category: &'static str,
    priority: Priority,
}

const KEYWORD_RULES: &[KeywordRule] = &[
    KeywordRule {
        phrases: &["fragile", "glass", "delicate"],
        words: &[],
        description: "Fragile items requiring special care",
        category: "fragile",
        priority: Priority::High,
    },
    KeywordRule {
        phrases: &["heavy", "large furniture", "professional movers"],
        words: &[],
        description: "Heavy furniture requiring professional moving",
        category: "heavy_furniture",
        priority: Priority::High,
    },
    KeywordRule {
        phrases: &["valuable", "expensive", "insurance"],
        words: &[],
        description: "Valuable items requiring insurance",
        category: "valuable",
        priority: Priority::Medium,
    },
    KeywordRule {
        phrases: &["electronics", "computer"],
        words: &["tv"],
        description: "Electronics requiring special handling",
        category: "electronics",
        priority: Priority::Medium,
    },
];

impl KeywordRule {
    fn matches(&self, lowered: &str) -> bool {
        self.phrases.iter().any(|p| lowered.contains(p))
            || lowered
                .split(|c: char| !c.is_alphanumeric())
                .any(|token| self.words.contains(&token))
    }
}

fn parse_priority(raw: Option<&str>) -> Result<Option<Priority>> {
    raw.map(|p| p.parse::<Priority>().map_err(ConsultError::Validation))
        .transpose()
}

fn parse_status(update: &StatusUpdate) -> Result<ItemStatus> {
    update
        .status
        .as_deref()
        .ok_or_else(|| ConsultError::validation("status required"))?
        .parse::<ItemStatus>()
        .map_err(ConsultError::Validation)
}

fn category_or_default(raw: Option<&str>) -> String {
    raw.map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(DEFAULT_CATEGORY)
        .to_string()
}

fn required<'a>(raw: Option<&'a str>, field: &str) -> Result<&'a str> {
    raw.map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConsultError::validation(format!("{field} required")))
}

fn image_size(image: &ImageData) -> Result<usize> {
    STANDARD
        .decode(image.base64_payload().trim())
        .map(|bytes| bytes.len())
        .map_err(|e| ConsultError::validation(format!("invalid image data: {e}")))
}

/// In-memory catalog of flagged items and free-form notes, lost on restart.
#[derive(Default)]
pub struct ItemCatalog {
    items: RwLock<Vec<CapturedItem>>,
    notes: RwLock<Vec<Note>>,
}

impl ItemCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    async fn push_item(
        &self,
        description: &str,
        category: &str,
        priority: Priority,
        image_bytes: usize,
    ) -> CapturedItem {
        let item = CapturedItem {
            id: format!("item_{}", uuid::Uuid::new_v4().simple()),
            description: description.to_string(),
            category: category.to_string(),
            priority,
            status: ItemStatus::default(),
            image_bytes,
            created_at: Utc::now(),
            updated_at: None,
        };
        tracing::info!(id = %item.id, category, "item captured");
        self.items.write().await.push(item.clone());
        item
    }

    pub async fn add_item(&self, request: CaptureItemRequest) -> Result<CapturedItem> {
        let description = required(request.description.as_deref(), "description")?;
        let priority = parse_priority(request.priority.as_deref())?.unwrap_or_default();
        let image_bytes = match ImageData::from_raw(request.image_data.as_deref()) {
            Some(image) => image_size(&image)?,
            None => 0,
        };
        let category = category_or_default(request.category.as_deref());
        Ok(self
            .push_item(description, &category, priority, image_bytes)
            .await)
    }

    pub async fn list_items(&self) -> Vec<CapturedItem> {
        self.items.read().await.clone()
    }

    /// Edits description, category or priority; absent fields are left alone.
    pub async fn update_item(&self, id: &str, request: CaptureItemRequest) -> Result<CapturedItem> {
        let priority = parse_priority(request.priority.as_deref())?;
        let mut items = self.items.write().await;
        let item = items
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| ConsultError::NotFound(format!("item {id}")))?;

        if let Some(description) = request.description.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
            item.description = description.to_string();
        }
        if request.category.is_some() {
            item.category = category_or_default(request.category.as_deref());
        }
        if let Some(priority) = priority {
            item.priority = priority;
        }
        item.updated_at = Some(Utc::now());
        Ok(item.clone())
    }

    pub async fn set_item_status(&self, id: &str, update: StatusUpdate) -> Result<CapturedItem> {
        let status = parse_status(&update)?;
        let mut items = self.items.write().await;
        let item = items
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| ConsultError::NotFound(format!("item {id}")))?;
        item.status = status;
        item.updated_at = Some(Utc::now());
        tracing::info!(id, status = status.as_str(), "item status updated");
        Ok(item.clone())
    }

    pub async fn delete_item(&self, id: &str) -> Result<CapturedItem> {
        let mut items = self.items.write().await;
        let index = items
            .iter()
            .position(|i| i.id == id)
            .ok_or_else(|| ConsultError::NotFound(format!("item {id}")))?;
        Ok(items.remove(index))
    }

    pub async fn add_note(&self, request: NoteRequest) -> Result<Note> {
        let content = required(request.content.as_deref(), "content")?;
        let priority = parse_priority(request.priority.as_deref())?.unwrap_or_default();
        let note = Note {
            id: format!("note_{}", uuid::Uuid::new_v4().simple()),
            content: content.to_string(),
            category: category_or_default(request.category.as_deref()),
            priority,
            status: ItemStatus::default(),
            created_at: Utc::now(),
            updated_at: None,
        };
        tracing::info!(id = %note.id, "note added");
        self.notes.write().await.push(note.clone());
        Ok(note)
    }

    pub async fn list_notes(&self) -> Vec<Note> {
        self.notes.read().await.clone()
    }

    pub async fn update_note(&self, id: &str, request: NoteRequest) -> Result<Note> {
        let priority = parse_priority(request.priority.as_deref())?;
        let mut notes = self.notes.write().await;
        let note = notes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| ConsultError::NotFound(format!("note {id}")))?;

        if let Some(content) = request.content.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            note.content = content.to_string();
        }
        if request.category.is_some() {
            note.category = category_or_default(request.category.as_deref());
        }
        if let Some(priority) = priority {
            note.priority = priority;
        }
        note.updated_at = Some(Utc::now());
        Ok(note.clone())
    }

    pub async fn set_note_status(&self, id: &str, update: StatusUpdate) -> Result<Note> {
        let status = parse_status(&update)?;
        let mut notes = self.notes.write().await;
        let note = notes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| ConsultError::NotFound(format!("note {id}")))?;
        note.status = status;
        note.updated_at = Some(Utc::now());
        Ok(note.clone())
    }

    pub async fn delete_note(&self, id: &str) -> Result<Note> {
        let mut notes = self.notes.write().await;
        let index = notes
            .iter()
            .position(|n| n.id == id)
            .ok_or_else(|| ConsultError::NotFound(format!("note {id}")))?;
        Ok(notes.remove(index))
    }

    /// Flags items mentioned in a room analysis. A non-blank `note` is kept as a note.
    pub async fn capture_from_analysis(
        &self,
        analysis: &str,
        image: &ImageData,
        note: Option<&str>,
    ) -> Vec<CapturedItem> {
        let lowered = analysis.to_lowercase();
        let image_bytes = image_size(image).unwrap_or_else(|e| {
            tracing::debug!(error = %e, "could not size snapshot");
            0
        });

        let mut captured = Vec::new();
        for rule in KEYWORD_RULES.iter().filter(|r| r.matches(&lowered)) {
            captured.push(
                self.push_item(rule.description, rule.category, rule.priority, image_bytes)
                    .await,
            );
        }

        if let Some(text) = note.map(str::trim).filter(|n| !n.is_empty()) {
            let request = NoteRequest {
                content: Some(text.to_string()),
                ..NoteRequest::default()
            };
            if let Err(e) = self.add_note(request).await {
                tracing::warn!(error = %e, "failed to store capture note");
            }
        }
        captured
    }

    pub async fn report(&self) -> AdminReport {
        let items = self.items.read().await.clone();
        let total_notes = self.notes.read().await.len();

        let mut report = AdminReport {
            total_items: items.len(),
            total_notes,
            ..AdminReport::default()
        };
        for item in &items {
            *report.by_category.entry(item.category.clone()).or_default() += 1;
            *report
                .by_priority
                .entry(item.priority.as_str().to_string())
                .or_default() += 1;
            *report
                .by_status
                .entry(item.status.as_str().to_string())
                .or_default() += 1;
        }
        report.items = items;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> ImageData {
        // "hello" in base64.
        ImageData::from_raw(Some("data:image/jpeg;base64,aGVsbG8=")).unwrap()
    }

    #[tokio::test]
    async fn keyword_capture_flags_each_category_once() {
        let catalog = ItemCatalog::new();
        let analysis = "A glass cabinet, a heavy oak table, an expensive painting and a TV.";

        let items = catalog
            .capture_from_analysis(analysis, &snapshot(), Some("  "))
            .await;

        let categories: Vec<&str> = items.iter().map(|i| i.category.as_str()).collect();
        assert_eq!(
            categories,
            vec!["fragile", "heavy_furniture", "valuable", "electronics"]
        );
        assert!(items.iter().all(|i| i.image_bytes == 5));
        assert!(items.iter().all(|i| i.status == ItemStatus::PendingReview));
        assert!(catalog.list_notes().await.is_empty());
    }

    #[tokio::test]
    async fn tv_must_be_a_whole_word() {
        let catalog = ItemCatalog::new();
        let items = catalog
            .capture_from_analysis("A tvstand-free corner with activity mats.", &snapshot(), None)
            .await;
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn capture_note_is_stored() {
        let catalog = ItemCatalog::new();
        catalog
            .capture_from_analysis("An empty room.", &snapshot(), Some("Piano in basement"))
            .await;

        let notes = catalog.list_notes().await;
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].content, "Piano in basement");
        assert_eq!(notes[0].category, DEFAULT_CATEGORY);
    }

    #[tokio::test]
    async fn item_crud_and_status() {
        let catalog = ItemCatalog::new();
        let item = catalog
            .add_item(CaptureItemRequest {
                description: Some("Grandfather clock".into()),
                priority: Some("high".into()),
                ..CaptureItemRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(item.category, DEFAULT_CATEGORY);
        assert_eq!(item.image_bytes, 0);

        let updated = catalog
            .update_item(
                &item.id,
                CaptureItemRequest {
                    category: Some("antique".into()),
                    ..CaptureItemRequest::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.category, "antique");
        assert_eq!(updated.description, "Grandfather clock");

        let reviewed = catalog
            .set_item_status(
                &item.id,
                StatusUpdate {
                    status: Some("reviewed".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(reviewed.status, ItemStatus::Reviewed);

        catalog.delete_item(&item.id).await.unwrap();
        assert!(matches!(
            catalog.delete_item(&item.id).await,
            Err(ConsultError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn invalid_input_is_a_validation_error() {
        let catalog = ItemCatalog::new();
        assert!(matches!(
            catalog.add_item(CaptureItemRequest::default()).await,
            Err(ConsultError::Validation(_))
        ));
        assert!(matches!(
            catalog
                .add_note(NoteRequest {
                    content: Some("x".into()),
                    priority: Some("urgent".into()),
                    ..NoteRequest::default()
                })
                .await,
            Err(ConsultError::Validation(_))
        ));

        let note = catalog
            .add_note(NoteRequest {
                content: Some("Call back Friday".into()),
                ..NoteRequest::default()
            })
            .await
            .unwrap();
        assert!(matches!(
            catalog.set_note_status(&note.id, StatusUpdate { status: None }).await,
            Err(ConsultError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn report_counts_by_category_priority_and_status() {
        let catalog = ItemCatalog::new();
        catalog
            .capture_from_analysis("fragile vases and a computer", &snapshot(), Some("stairs"))
            .await;

        let report = catalog.report().await;
        assert_eq!(report.total_items, 2);
        assert_eq!(report.total_notes, 1);
        assert_eq!(report.by_category.get("fragile"), Some(&1));
        assert_eq!(report.by_priority.get("high"), Some(&1));
        assert_eq!(report.by_priority.get("medium"), Some(&1));
        assert_eq!(report.by_status.get("pending_review"), Some(&2));
    }
}
