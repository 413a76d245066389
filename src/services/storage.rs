use bytes::Bytes;

use crate::db::Backend;
use crate::error::{Error, Result};
use crate::models::storage::{Bucket, StoredObject};
use crate::services::metrics::UPLOADS_COUNTER;

/// Relative object path: no empty, `.` or `..` segments, no leading slash.
fn check_path(path: &str) -> Result<()> {
    let valid = !path.is_empty()
        && !path.starts_with('/')
        && path
            .split('/')
            .all(|seg| !seg.is_empty() && seg != "." && seg != "..")
        && !path.chars().any(|c| c.is_control() || c == '\\');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("invalid object path {path:?}")))
    }
}

pub struct StorageService;

impl StorageService {
    /// Size is checked before anything is sent. The content type comes from
    /// the caller or is guessed from the path.
    pub async fn upload(
        backend: &dyn Backend,
        bucket: &Bucket,
        path: &str,
        body: Bytes,
        content_type: Option<&str>,
        max_bytes: usize,
    ) -> Result<StoredObject> {
        if body.len() > max_bytes {
            return Err(Error::PayloadTooLarge {
                size: body.len(),
                limit: max_bytes,
            });
        }
        check_path(path)?;

        let content_type = content_type
            .filter(|ct| !ct.is_empty() && *ct != mime::APPLICATION_OCTET_STREAM.essence_str())
            .map(str::to_string)
            .unwrap_or_else(|| mime_guess::from_path(path).first_or_octet_stream().to_string());
        let bucket_name = bucket.name();
        let size = body.len() as u64;

        backend.upload(&bucket_name, path, body, &content_type).await?;
        UPLOADS_COUNTER.with_label_values(&[bucket.kind()]).inc();
        tracing::info!("Uploaded {bucket_name}/{path} ({size} bytes, {content_type})");

        Ok(StoredObject {
            public_url: backend.public_url(&bucket_name, path),
            bucket: bucket_name,
            path: path.to_string(),
            size_bytes: Some(size),
            content_type: Some(content_type),
        })
    }

    pub async fn list(backend: &dyn Backend, bucket: &Bucket, prefix: &str) -> Result<Vec<StoredObject>> {
        if !prefix.is_empty() {
            check_path(prefix.trim_end_matches('/'))?;
        }
        backend.list_objects(&bucket.name(), prefix).await
    }
}
