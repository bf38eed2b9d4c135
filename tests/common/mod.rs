#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use actix_web::body::MessageBody;
use actix_web::dev::{Service, ServiceResponse};
use actix_web::http::StatusCode;
use actix_web::test;
use async_trait::async_trait;
use serde_json::Value;

use bord::config::{post_key, user_key, Config, FEED_KEY, USERS_LIST_KEY};
use bord::core::db::Store;
use bord::core::helpers::{add_unique, new_id, now};
use bord::media::{MediaError, MediaStore, MemoryMediaStore, StoredMedia};
use bord::models::models::{Comment, MediaRef, Post, User};
use bord::notifier::{Email, Notifier, NotifyError};
use bord::state::AppState;

pub const PNG: &str = "data:image/png;base64,iVBORw0KGgo=";

/// Keeps every message; can be switched to fail delivery.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Email>>,
    pub fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn last_reset_token(&self) -> Option<String> {
        let sent = self.sent.lock().unwrap();
        let message = &sent.last()?.message;
        let link = message.split_whitespace().find(|w| w.contains("/password/reset/"))?;
        link.rsplit('/').next().map(|t| t.to_string())
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, email: Email) -> Result<(), NotifyError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotifyError("smtp relay down".to_string()));
        }
        self.sent.lock().unwrap().push(email);
        Ok(())
    }
}

/// In-memory media whose `destroy` can be made to fail for chosen ids.
#[derive(Default)]
pub struct FlakyMedia {
    pub inner: MemoryMediaStore,
    pub failing: Mutex<HashSet<String>>,
}

impl FlakyMedia {
    pub fn fail_destroy(&self, public_id: &str) {
        self.failing.lock().unwrap().insert(public_id.to_string());
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }
}

#[async_trait]
impl MediaStore for FlakyMedia {
    async fn upload(&self, data_uri: &str, folder: &str) -> Result<MediaRef, MediaError> {
        self.inner.upload(data_uri, folder).await
    }

    async fn destroy(&self, public_id: &str) -> Result<(), MediaError> {
        if self.failing.lock().unwrap().contains(public_id) {
            return Err(MediaError::Unavailable("cdn timeout".to_string()));
        }
        self.inner.destroy(public_id).await
    }

    async fn fetch(&self, public_id: &str) -> Result<Option<StoredMedia>, MediaError> {
        self.inner.fetch(public_id).await
    }
}

pub struct Harness {
    pub state: AppState,
    pub media: Arc<FlakyMedia>,
    pub mail: Arc<RecordingNotifier>,
}

pub fn harness() -> Harness {
    harness_with(Store::in_memory(), Config::default())
}

pub fn harness_with(store: Store, config: Config) -> Harness {
    let media = Arc::new(FlakyMedia::default());
    let mail = Arc::new(RecordingNotifier::default());
    let state = AppState::new(store, media.clone(), mail.clone(), config);
    Harness { state, media, mail }
}

/// Account written straight into the store, skipping password hashing.
pub async fn seed_user(h: &Harness, name: &str) -> String {
    let id = new_id();
    let avatar = h.media.upload(PNG, "avatars").await.unwrap();
    let user = User {
        id: id.clone(),
        name: name.to_string(),
        email: format!("{}@x.com", name.to_lowercase()),
        password: String::new(),
        avatar,
        followers: Vec::new(),
        following: Vec::new(),
        posts: Vec::new(),
        reset_password_token: None,
        reset_password_expire: None,
        created_at: now(),
    };
    let store = &h.state.store;
    store.set_json(&user_key(&id), &user).unwrap();
    store
        .set_json(&bord::config::email_key(&user.email), &id)
        .unwrap();
    store
        .upsert_json::<Vec<String>, _, _>(USERS_LIST_KEY, |ids| add_unique(ids, &id))
        .unwrap();
    id
}

pub fn user(h: &Harness, id: &str) -> Option<User> {
    h.state.store.get_json(&user_key(id)).unwrap()
}

pub fn post(h: &Harness, id: &str) -> Option<Post> {
    h.state.store.get_json(&post_key(id)).unwrap()
}

pub fn all_posts(h: &Harness) -> Vec<Post> {
    let ids: Vec<String> = h.state.store.get_json(FEED_KEY).unwrap().unwrap_or_default();
    ids.iter().filter_map(|id| post(h, id)).collect()
}

pub fn all_users(h: &Harness) -> Vec<User> {
    let ids: Vec<String> = h
        .state
        .store
        .get_json(USERS_LIST_KEY)
        .unwrap()
        .unwrap_or_default();
    ids.iter().filter_map(|id| user(h, id)).collect()
}

pub fn comment_ids_by(post: &Post, user_id: &str) -> Vec<String> {
    post.comments
        .iter()
        .filter(|c: &&Comment| c.user == user_id)
        .map(|c| c.id.clone())
        .collect()
}

pub fn count(list: &[String], id: &str) -> usize {
    list.iter().filter(|x| *x == id).count()
}

pub struct Reply {
    pub status: StatusCode,
    pub body: Value,
    pub set_cookie: Option<String>,
}

pub async fn send<S, R, B>(app: &S, req: R) -> Reply
where
    S: Service<R, Response = ServiceResponse<B>, Error = actix_web::Error>,
    B: MessageBody,
{
    let resp = test::call_service(app, req).await;
    let status = resp.status();
    let set_cookie = resp
        .headers()
        .get("set-cookie")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());
    let bytes = test::read_body(resp).await;
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    Reply {
        status,
        body,
        set_cookie,
    }
}

pub fn bearer(token: &str) -> (&'static str, String) {
    ("Authorization", format!("Bearer {}", token))
}
