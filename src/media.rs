//! Media store collaborator.
//!
//! Avatars and post images arrive from the browser as
//! `data:<mime>;base64,<payload>` URIs. The store hands back a
//! [`MediaRef`] whose `public_id` is later used to destroy the object.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;
use tokio::fs;
use tracing::debug;

use crate::core::errors::ApiError;
use crate::core::helpers::new_id;
use crate::models::models::MediaRef;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Invalid media payload: {0}")]
    InvalidPayload(String),
    #[error("Media store unavailable: {0}")]
    Unavailable(String),
}

impl From<MediaError> for ApiError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::InvalidPayload(_) => ApiError::Validation(err.to_string()),
            MediaError::Unavailable(_) => ApiError::Upstream(err.to_string()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct StoredMedia {
    pub extension: String,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn upload(&self, data_uri: &str, folder: &str) -> Result<MediaRef, MediaError>;

    /// Destroying an unknown id succeeds.
    async fn destroy(&self, public_id: &str) -> Result<(), MediaError>;

    async fn fetch(&self, public_id: &str) -> Result<Option<StoredMedia>, MediaError>;
}

/// Decoded `data:` URI: (mime, bytes).
pub fn decode_data_uri(data_uri: &str) -> Result<(String, Vec<u8>), MediaError> {
    let rest = data_uri
        .strip_prefix("data:")
        .ok_or_else(|| MediaError::InvalidPayload("expected a data: URI".to_string()))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| MediaError::InvalidPayload("missing data separator".to_string()))?;
    let mime = meta
        .strip_suffix(";base64")
        .ok_or_else(|| MediaError::InvalidPayload("only base64 data is accepted".to_string()))?;

    if !mime.starts_with("image/") {
        return Err(MediaError::InvalidPayload(format!("unsupported type {}", mime)));
    }

    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| MediaError::InvalidPayload(e.to_string()))?;
    if bytes.is_empty() {
        return Err(MediaError::InvalidPayload("empty image".to_string()));
    }

    Ok((mime.to_string(), bytes))
}

fn extension_for(mime: &str) -> String {
    mime_guess::get_mime_extensions_str(mime)
        .and_then(|exts| exts.first())
        .map(|ext| ext.to_string())
        .unwrap_or_else(|| "bin".to_string())
}

/// Keeps uploads in process memory and serves them under `url_prefix`.
pub struct MemoryMediaStore {
    url_prefix: String,
    objects: Mutex<HashMap<String, StoredMedia>>,
}

impl MemoryMediaStore {
    pub fn new(url_prefix: impl Into<String>) -> Self {
        Self {
            url_prefix: url_prefix.into().trim_end_matches('/').to_string(),
            objects: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.objects.lock().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, public_id: &str) -> bool {
        self.objects
            .lock()
            .map(|o| o.contains_key(public_id))
            .unwrap_or(false)
    }
}

impl Default for MemoryMediaStore {
    fn default() -> Self {
        Self::new("/media")
    }
}

#[async_trait]
impl MediaStore for MemoryMediaStore {
    async fn upload(&self, data_uri: &str, folder: &str) -> Result<MediaRef, MediaError> {
        let (mime, bytes) = decode_data_uri(data_uri)?;
        let extension = extension_for(&mime);
        let public_id = format!("{}-{}", folder, new_id());
        let url = format!("{}/{}.{}", self.url_prefix, public_id, extension);

        let mut objects = self
            .objects
            .lock()
            .map_err(|_| MediaError::Unavailable("media lock poisoned".to_string()))?;
        objects.insert(public_id.clone(), StoredMedia { extension, bytes });
        debug!(public_id = %public_id, "Stored media object");

        Ok(MediaRef { public_id, url })
    }

    async fn destroy(&self, public_id: &str) -> Result<(), MediaError> {
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| MediaError::Unavailable("media lock poisoned".to_string()))?;
        objects.remove(public_id);
        Ok(())
    }

    async fn fetch(&self, public_id: &str) -> Result<Option<StoredMedia>, MediaError> {
        let objects = self
            .objects
            .lock()
            .map_err(|_| MediaError::Unavailable("media lock poisoned".to_string()))?;
        Ok(objects.get(public_id).cloned())
    }
}

/// Keeps uploads as `{public_id}.{ext}` files under `root`, so media
/// survives restarts alongside a persistent document store.
pub struct FileMediaStore {
    root: PathBuf,
    url_prefix: String,
}

impl FileMediaStore {
    pub fn open(root: impl Into<PathBuf>, url_prefix: impl Into<String>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            url_prefix: url_prefix.into().trim_end_matches('/').to_string(),
        })
    }

    async fn locate(&self, public_id: &str) -> Result<Option<PathBuf>, MediaError> {
        // Ids come from URLs; anything but our own id alphabet is unknown.
        let well_formed = !public_id.is_empty()
            && public_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !well_formed {
            return Ok(None);
        }

        let mut entries = fs::read_dir(&self.root).await.map_err(unavailable)?;
        while let Some(entry) = entries.next_entry().await.map_err(unavailable)? {
            let path = entry.path();
            if path.file_stem().and_then(|s| s.to_str()) == Some(public_id) {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }
}

fn unavailable(err: std::io::Error) -> MediaError {
    MediaError::Unavailable(err.to_string())
}

#[async_trait]
impl MediaStore for FileMediaStore {
    async fn upload(&self, data_uri: &str, folder: &str) -> Result<MediaRef, MediaError> {
        let (mime, bytes) = decode_data_uri(data_uri)?;
        let extension = extension_for(&mime);
        let public_id = format!("{}-{}", folder, new_id());
        let path = self.root.join(format!("{}.{}", public_id, extension));

        fs::write(&path, &bytes).await.map_err(unavailable)?;
        debug!(public_id = %public_id, path = %path.display(), "Wrote media object");

        Ok(MediaRef {
            url: format!("{}/{}.{}", self.url_prefix, public_id, extension),
            public_id,
        })
    }

    async fn destroy(&self, public_id: &str) -> Result<(), MediaError> {
        if let Some(path) = self.locate(public_id).await? {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(unavailable(e)),
            }
        }
        Ok(())
    }

    async fn fetch(&self, public_id: &str) -> Result<Option<StoredMedia>, MediaError> {
        let Some(path) = self.locate(public_id).await? else {
            return Ok(None);
        };
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin")
            .to_string();
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(StoredMedia { extension, bytes })),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(unavailable(e)),
        }
    }
}
