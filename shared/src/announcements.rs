use chrono::{DateTime, NaiveDate, Utc};
use lambda_http::{Body, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::errors::{ApiError, ApiResult};
use crate::responses::{created, ok, parse_body};
use crate::store::{from_document, to_document, Condition, Key, Store, StoreError, Update};

const PARTITION: &str = "ANNOUNCEMENTS";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Announcement {
    pub id: String,
    pub title: String,
    pub content: String,
    /// Display date, `YYYY-MM-DD`
    pub date: NaiveDate,
    pub published: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Announcement {
    pub fn key(id: &str) -> Key {
        Key::new(PARTITION, format!("ANNOUNCEMENT#{}", id))
    }
}

async fn load(store: &dyn Store, id: &str) -> ApiResult<Option<Announcement>> {
    match store.get(&Announcement::key(id)).await? {
        Some(item) => Ok(Some(from_document(item)?)),
        None => Ok(None),
    }
}

/// GET /announcements, newest date first. Drafts only when `include_drafts`.
pub async fn list_announcements(store: &dyn Store, include_drafts: bool) -> ApiResult<Response<Body>> {
    let items = store.query(PARTITION, Some("ANNOUNCEMENT#")).await?;
    let mut announcements = items
        .into_iter()
        .map(from_document)
        .collect::<Result<Vec<Announcement>, _>>()?;
    announcements.retain(|a| include_drafts || a.published);
    announcements.sort_by(|a, b| {
        b.date
            .cmp(&a.date)
            .then_with(|| b.created_at.cmp(&a.created_at))
    });

    ok(&json!({ "announcements": announcements, "count": announcements.len() }))
}

/// GET /announcements/{id}. Drafts are hidden from the public.
pub async fn get_announcement(store: &dyn Store, id: &str, include_drafts: bool) -> ApiResult<Response<Body>> {
    match load(store, id).await? {
        Some(announcement) if announcement.published || include_drafts => {
            ok(&json!({ "announcement": announcement }))
        }
        _ => Err(ApiError::NotFound("Announcement not found".to_string())),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateAnnouncementRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    pub date: Option<NaiveDate>,
    pub published: Option<bool>,
}

/// POST /announcements
pub async fn create_announcement(store: &dyn Store, body: &[u8]) -> ApiResult<Response<Body>> {
    let req: CreateAnnouncementRequest = parse_body(body)?;
    let (Some(title), Some(content)) = (
        req.title.filter(|t| !t.trim().is_empty()),
        req.content.filter(|c| !c.trim().is_empty()),
    ) else {
        return Err(ApiError::BadRequest(
            "Title and content are required".to_string(),
        ));
    };

    let now = Utc::now();
    let published = req.published.unwrap_or(true);
    let announcement = Announcement {
        id: uuid::Uuid::new_v4().to_string(),
        title,
        content,
        date: req.date.unwrap_or_else(|| now.date_naive()),
        published,
        published_at: published.then_some(now),
        created_at: now,
        updated_at: now,
    };

    store
        .put(
            to_document(&announcement, &Announcement::key(&announcement.id))?,
            Condition::NotExists,
        )
        .await?;

    tracing::info!("Created announcement {}", announcement.id);
    created(&json!({ "announcement": announcement }))
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AnnouncementUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<bool>,
}

/// PUT /announcements/{id}
pub async fn update_announcement(store: &dyn Store, id: &str, body: &[u8]) -> ApiResult<Response<Body>> {
    let patch: AnnouncementUpdate = parse_body(body)?;
    let blank = |field: &Option<String>| field.as_deref().is_some_and(|v| v.trim().is_empty());
    if blank(&patch.title) || blank(&patch.content) {
        return Err(ApiError::BadRequest(
            "Title and content must not be empty".to_string(),
        ));
    }

    let Some(current) = load(store, id).await? else {
        return Err(ApiError::NotFound("Announcement not found".to_string()));
    };

    let now = Utc::now();
    let mut update = Update::new(Announcement::key(id)).set_fields(&patch)?;
    if update.is_empty() {
        return Err(ApiError::BadRequest("No updatable fields provided".to_string()));
    }
    if patch.published == Some(true) && current.published_at.is_none() {
        update = update.set("publishedAt", now.to_rfc3339());
    }

    let update = update
        .set("updatedAt", now.to_rfc3339())
        .when(Condition::Exists);
    let announcement: Announcement = match store.update(update).await {
        Ok(item) => from_document(item)?,
        Err(StoreError::ConditionFailed) => {
            return Err(ApiError::NotFound("Announcement not found".to_string()))
        }
        Err(e) => return Err(e.into()),
    };

    tracing::info!("Updated announcement {}", id);
    ok(&json!({ "announcement": announcement }))
}

/// DELETE /announcements/{id}
pub async fn delete_announcement(store: &dyn Store, id: &str) -> ApiResult<Response<Body>> {
    match store.delete(&Announcement::key(id), Condition::Exists).await {
        Ok(()) => {
            tracing::info!("Deleted announcement {}", id);
            ok(&json!({ "message": "Announcement deleted successfully" }))
        }
        Err(StoreError::ConditionFailed) => {
            Err(ApiError::NotFound("Announcement not found".to_string()))
        }
        Err(e) => Err(e.into()),
    }
}
