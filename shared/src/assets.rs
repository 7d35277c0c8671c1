use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};

use crate::errors::{ApiError, ApiResult};

const MAX_ICON_BYTES: usize = 2 * 1024 * 1024;

/// Public assets bucket for site images
pub struct AssetBucket {
    client: S3Client,
    bucket: String,
    base_url: String,
}

impl AssetBucket {
    pub fn new(client: S3Client, bucket: impl Into<String>, base_url: Option<String>) -> Self {
        let bucket = bucket.into();
        let base_url = base_url.unwrap_or_else(|| format!("https://{}.s3.amazonaws.com", bucket));
        Self {
            client,
            bucket,
            base_url,
        }
    }

    /// Upload a base64 encoded icon and return its public URL
    pub async fn upload_icon(&self, data: &str, file_name: &str, now: DateTime<Utc>) -> ApiResult<String> {
        let extension = icon_extension(file_name)?;
        let bytes = decode_payload(data)?;
        let key = icon_key(extension, now);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(bytes))
            .content_type(content_type(extension))
            .cache_control("public, max-age=31536000")
            .send()
            .await
            .map_err(|e| ApiError::Internal(format!("Failed to upload to S3: {}", e)))?;

        tracing::info!("Uploaded site icon to s3://{}/{}", self.bucket, key);
        Ok(public_url(&self.base_url, &key))
    }
}

const ICON_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "gif", "svg", "ico", "webp"];

fn icon_extension(file_name: &str) -> ApiResult<&'static str> {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    ICON_EXTENSIONS
        .iter()
        .find(|allowed| **allowed == extension)
        .copied()
        .ok_or_else(|| {
            ApiError::BadRequest(format!(
                "Unsupported icon type, expected one of {}",
                ICON_EXTENSIONS.join(", ")
            ))
        })
}

/// Accepts raw base64 or a `data:<mime>;base64,` URL
fn decode_payload(data: &str) -> ApiResult<Vec<u8>> {
    let encoded = match data.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => data,
    };
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| ApiError::BadRequest(format!("Failed to decode base64: {}", e)))?;

    if bytes.is_empty() {
        return Err(ApiError::BadRequest("Icon data is empty".to_string()));
    }
    if bytes.len() > MAX_ICON_BYTES {
        return Err(ApiError::BadRequest("Icon must be 2MB or smaller".to_string()));
    }
    Ok(bytes)
}

fn icon_key(extension: &str, now: DateTime<Utc>) -> String {
    format!("custom-site-icon-{}.{}", now.timestamp_millis(), extension)
}

fn content_type(extension: &str) -> &'static str {
    match extension {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

fn public_url(base_url: &str, key: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), key)
}
