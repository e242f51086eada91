use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::AppError;
use crate::storage::{ObjectStorage, StoredObject};

const FOLDER: &str = "attendance";

#[derive(Debug, Serialize, Deserialize)]
struct PresignClaims {
    /// object reference
    sub: String,
    exp: usize,
}

fn extension_for(content_type: &str) -> Option<&'static str> {
    match content_type {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}

fn content_type_for(reference: &str) -> &'static str {
    match reference.rsplit_once('.').map(|(_, ext)| ext) {
        Some("jpg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("heic") => "image/heic",
        _ => "application/octet-stream",
    }
}

/// References look like `attendance/<uuid>.<ext>`; anything else is refused
/// before it reaches the filesystem.
fn is_well_formed(reference: &str) -> bool {
    let Some((folder, file)) = reference.split_once('/') else {
        return false;
    };
    let Some((stem, ext)) = file.rsplit_once('.') else {
        return false;
    };
    folder == FOLDER
        && Uuid::parse_str(stem).is_ok()
        && extension_for(content_type_for(reference)) == Some(ext)
}

/// Filesystem-backed object store. Presigned URLs carry a signed, expiring
/// token that `open` verifies.
pub struct LocalObjectStorage {
    root: PathBuf,
    secret: String,
    base_url: String,
}

impl LocalObjectStorage {
    pub fn new(root: impl Into<PathBuf>, secret: &str, base_url: &str) -> Self {
        Self {
            root: root.into(),
            secret: secret.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn path_of(&self, reference: &str) -> Result<PathBuf, AppError> {
        if !is_well_formed(reference) {
            return Err(AppError::Validation(format!("'{reference}' is not a photo reference")));
        }
        Ok(self.root.join(reference))
    }

    async fn read(&self, reference: &str) -> Result<Vec<u8>, AppError> {
        let path = self.path_of(reference)?;
        tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => AppError::NotFound(format!("photo {reference} not found")),
            _ => AppError::ObjectStorage(format!("reading {}: {e}", path.display())),
        })
    }
}

#[async_trait]
impl ObjectStorage for LocalObjectStorage {
    async fn put(&self, bytes: Vec<u8>, content_type: &str) -> Result<String, AppError> {
        let content_type = content_type.trim().to_ascii_lowercase();
        let ext = extension_for(&content_type).ok_or_else(|| {
            AppError::Validation(format!("unsupported photo content type '{content_type}'"))
        })?;
        if bytes.is_empty() {
            return Err(AppError::Validation("photo is empty".to_string()));
        }

        let reference = format!("{FOLDER}/{}.{ext}", Uuid::new_v4());
        let path = self.root.join(&reference);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| AppError::ObjectStorage(format!("creating {}: {e}", dir.display())))?;
        }
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| AppError::ObjectStorage(format!("writing {}: {e}", path.display())))?;

        info!(reference = %reference, size = bytes.len(), "Photo stored");
        Ok(reference)
    }

    async fn presigned_url(&self, reference: &str, ttl: Duration) -> Result<String, AppError> {
        let path = self.path_of(reference)?;
        if !tokio::fs::try_exists(&path)
            .await
            .map_err(|e| AppError::ObjectStorage(e.to_string()))?
        {
            return Err(AppError::NotFound(format!("photo {reference} not found")));
        }

        let claims = PresignClaims {
            sub: reference.to_string(),
            exp: Utc::now().timestamp().max(0) as usize + ttl.as_secs() as usize,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| AppError::Internal(format!("presign failed: {e}")))?;

        debug!(reference = %reference, ttl_secs = ttl.as_secs(), "Presigned photo URL");
        Ok(format!("{}/files/{token}", self.base_url))
    }

    async fn open(&self, token: &str) -> Result<StoredObject, AppError> {
        let claims = decode::<PresignClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| AppError::Authentication("Invalid or expired link".to_string()))?
        .claims;

        let bytes = self.read(&claims.sub).await?;
        Ok(StoredObject {
            bytes,
            content_type: content_type_for(&claims.sub).to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> LocalObjectStorage {
        let root = std::env::temp_dir().join(format!("leavedesk-photos-{}", Uuid::new_v4()));
        LocalObjectStorage::new(root, "secret", "http://localhost:8080/")
    }

    fn token_of(url: &str) -> &str {
        url.rsplit_once("/files/").map(|(_, t)| t).unwrap()
    }

    #[actix_web::test]
    async fn stored_photo_is_served_through_its_presigned_url() {
        let storage = storage();
        let reference = storage.put(vec![0xFF, 0xD8, 0xFF], "image/jpeg").await.unwrap();
        assert!(reference.starts_with("attendance/") && reference.ends_with(".jpg"));

        let url = storage
            .presigned_url(&reference, Duration::from_secs(60))
            .await
            .unwrap();
        assert!(url.starts_with("http://localhost:8080/files/"));

        let object = storage.open(token_of(&url)).await.unwrap();
        assert_eq!(object.bytes, vec![0xFF, 0xD8, 0xFF]);
        assert_eq!(object.content_type, "image/jpeg");
    }

    #[actix_web::test]
    async fn rejects_non_images_and_empty_bodies() {
        let storage = storage();
        assert!(matches!(
            storage.put(b"hello".to_vec(), "text/plain").await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            storage.put(Vec::new(), "image/png").await,
            Err(AppError::Validation(_))
        ));
    }

    #[actix_web::test]
    async fn refuses_malformed_or_unknown_references() {
        let storage = storage();
        assert!(matches!(
            storage.presigned_url("../etc/passwd", Duration::from_secs(60)).await,
            Err(AppError::Validation(_))
        ));
        let missing = format!("attendance/{}.png", Uuid::new_v4());
        assert!(matches!(
            storage.presigned_url(&missing, Duration::from_secs(60)).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            storage.open("not-a-token").await,
            Err(AppError::Authentication(_))
        ));
    }
}
