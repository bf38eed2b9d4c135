use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::core::db::Store;
use crate::media::{FileMediaStore, MediaStore, MemoryMediaStore};
use crate::notifier::{LogNotifier, Notifier, WebhookNotifier};

/// Everything a handler needs, shared across workers through `web::Data`.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub media: Arc<dyn MediaStore>,
    pub notifier: Arc<dyn Notifier>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(
        store: Store,
        media: Arc<dyn MediaStore>,
        notifier: Arc<dyn Notifier>,
        config: Config,
    ) -> Self {
        Self {
            store,
            media,
            notifier,
            config: Arc::new(config),
        }
    }

    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let store = match &config.data_path {
            Some(path) => {
                info!(path = %path, "Opening persistent store");
                Store::open(path)?
            }
            None => {
                info!("BORD_DATA_PATH not set, data lives in memory only");
                Store::in_memory()
            }
        };

        let notifier: Arc<dyn Notifier> = match &config.mail_webhook_url {
            Some(url) => {
                info!(url = %url, "Delivering mail through webhook");
                Arc::new(WebhookNotifier::new(url.clone()))
            }
            None => Arc::new(LogNotifier),
        };

        let media: Arc<dyn MediaStore> = match config.media_dir() {
            Some(dir) => {
                info!(dir = %dir, "Storing media on disk");
                Arc::new(FileMediaStore::open(&dir, "/media")?)
            }
            None => Arc::new(MemoryMediaStore::default()),
        };

        Ok(Self::new(store, media, notifier, config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG: &str = "data:image/png;base64,iVBORw0KGgo=";

    #[tokio::test]
    async fn persistent_store_keeps_media_across_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            data_path: Some(dir.path().join("bord.json").display().to_string()),
            ..Config::default()
        };

        let media = {
            let state = AppState::from_config(config.clone()).unwrap();
            state.media.upload(PNG, "avatars").await.unwrap()
        };

        let restarted = AppState::from_config(config).unwrap();
        assert!(restarted.media.fetch(&media.public_id).await.unwrap().is_some());
    }
}
