use chrono::{DateTime, Utc};
use lambda_http::{Body, Response};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::assets::AssetBucket;
use crate::errors::{ApiError, ApiResult};
use crate::responses::{ok, parse_body};
use crate::store::{from_document, to_document, Condition, Key, Store, StoreError};

const PARTITION: &str = "SETTINGS";
pub const SITE_ICON_KEY: &str = "siteIcon";

/// A named site setting holding arbitrary JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteSetting {
    pub setting_key: String,
    pub setting_value: Value,
    pub last_modified: DateTime<Utc>,
}

impl SiteSetting {
    pub fn key(setting_key: &str) -> Key {
        Key::new(PARTITION, format!("SETTING#{}", setting_key))
    }
}

pub async fn save_setting(store: &dyn Store, setting_key: &str, value: Value) -> ApiResult<SiteSetting> {
    if setting_key.trim().is_empty() {
        return Err(ApiError::BadRequest("settingKey is required".to_string()));
    }
    let setting = SiteSetting {
        setting_key: setting_key.to_string(),
        setting_value: value,
        last_modified: Utc::now(),
    };
    store
        .put(
            to_document(&setting, &SiteSetting::key(setting_key))?,
            Condition::Always,
        )
        .await?;
    tracing::info!("Saved site setting {}", setting_key);
    Ok(setting)
}

pub async fn load_setting(store: &dyn Store, setting_key: &str) -> ApiResult<Option<SiteSetting>> {
    match store.get(&SiteSetting::key(setting_key)).await? {
        Some(item) => Ok(Some(from_document(item)?)),
        None => Ok(None),
    }
}

/// GET /site-settings: every setting as `{key: value}`
pub async fn list_settings(store: &dyn Store) -> ApiResult<Response<Body>> {
    let items = store.query(PARTITION, Some("SETTING#")).await?;
    let mut settings = Map::new();
    for item in items {
        let setting: SiteSetting = from_document(item)?;
        settings.insert(setting.setting_key, setting.setting_value);
    }
    ok(&json!({ "settings": settings }))
}

/// GET /site-settings/{key}
pub async fn get_setting(store: &dyn Store, setting_key: &str) -> ApiResult<Response<Body>> {
    match load_setting(store, setting_key).await? {
        Some(setting) => ok(&setting),
        None => Err(ApiError::NotFound(format!(
            "Setting {} not found",
            setting_key
        ))),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingBody {
    pub setting_key: Option<String>,
    /// `Some(Value::Null)` when the body carries an explicit null
    #[serde(default, alias = "value", deserialize_with = "present")]
    pub setting_value: Option<Value>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// PUT|POST /site-settings/{key} and POST /site-settings.
/// The path key wins over a key in the body.
pub async fn put_setting(
    store: &dyn Store,
    path_key: Option<&str>,
    body: &[u8],
) -> ApiResult<Response<Body>> {
    let req: SettingBody = parse_body(body)?;
    let setting_key = path_key
        .map(str::to_string)
        .or(req.setting_key)
        .ok_or_else(|| ApiError::BadRequest("settingKey is required".to_string()))?;
    let value = req
        .setting_value
        .ok_or_else(|| ApiError::BadRequest("settingValue is required".to_string()))?;

    let setting = save_setting(store, &setting_key, value).await?;
    ok(&json!({ "message": "Setting saved successfully", "setting": setting }))
}

/// DELETE /site-settings/{key}
pub async fn delete_setting(store: &dyn Store, setting_key: &str) -> ApiResult<Response<Body>> {
    match store
        .delete(&SiteSetting::key(setting_key), Condition::Exists)
        .await
    {
        Ok(()) => {
            tracing::info!("Deleted site setting {}", setting_key);
            ok(&json!({ "message": "Setting deleted successfully" }))
        }
        Err(StoreError::ConditionFailed) => Err(ApiError::NotFound(format!(
            "Setting {} not found",
            setting_key
        ))),
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IconUploadRequest {
    pub base64_data: Option<String>,
    pub file_name: Option<String>,
}

/// POST /site-settings/icon: store the file in the assets bucket and point
/// the `siteIcon` setting at it
pub async fn upload_icon(
    store: &dyn Store,
    assets: Option<&AssetBucket>,
    body: &[u8],
) -> ApiResult<Response<Body>> {
    let Some(assets) = assets else {
        return Err(ApiError::Unavailable(
            "Icon upload is not configured".to_string(),
        ));
    };
    let req: IconUploadRequest = parse_body(body)?;
    let (Some(data), Some(file_name)) = (req.base64_data, req.file_name) else {
        return Err(ApiError::BadRequest(
            "base64Data and fileName are required".to_string(),
        ));
    };

    let url = assets.upload_icon(&data, &file_name, Utc::now()).await?;
    let setting = save_setting(store, SITE_ICON_KEY, Value::String(url.clone())).await?;

    ok(&json!({
        "message": "Icon uploaded successfully",
        "url": url,
        "setting": setting,
    }))
}
