use std::future::{ready, Ready};

use actix_web::cookie::{time::Duration as CookieDuration, Cookie, SameSite};
use chrono::Duration;
use actix_web::{dev::Payload, web, FromRequest, HttpMessage, HttpRequest, HttpResponse};
use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::*;
use crate::core::db::Store;
use crate::core::errors::ApiError;
use crate::core::helpers::{normalize_email, now, remove_all, verify_password};
use crate::handlers::success;
use crate::models::models::{TokenData, User};
use crate::state::AppState;
use crate::users::resolve_profile;

/// Authenticated caller, resolved from the session cookie or bearer header
/// before the handler body runs.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub token: String,
}

pub fn token_from_request(req: &HttpRequest) -> Option<String> {
    if let Some(cookie) = req.cookie(SESSION_COOKIE) {
        if !cookie.value().is_empty() {
            return Some(cookie.value().to_string());
        }
    }

    let auth_header = req.headers().get("Authorization")?.to_str().ok()?;
    auth_header
        .strip_prefix("Bearer ")
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

pub fn issue_session(store: &Store, user_id: &str) -> Result<String, ApiError> {
    let token = Uuid::new_v4().to_string();
    let data = TokenData {
        user_id: user_id.to_string(),
        created_at: now(),
    };
    store.set_json(&token_key(&token), &data)?;
    store.upsert_json::<Vec<String>, _, _>(&user_tokens_key(user_id), |tokens| {
        tokens.push(token.clone())
    })?;
    debug!(user_id = %user_id, "Issued session");
    Ok(token)
}

/// Resolve a session token to its account id.
pub fn validate_session(
    store: &Store,
    expiration_hours: i64,
    token: &str,
) -> Result<String, ApiError> {
    let rejected = || ApiError::unauthorized("Please login first");

    let data = store
        .get_json::<TokenData>(&token_key(token))?
        .ok_or_else(rejected)?;

    if now() - data.created_at > Duration::hours(expiration_hours) {
        revoke_session(store, token)?;
        return Err(rejected());
    }

    if !store.exists(&user_key(&data.user_id))? {
        return Err(rejected());
    }

    Ok(data.user_id)
}

pub fn revoke_session(store: &Store, token: &str) -> Result<(), ApiError> {
    if let Some(data) = store.take_json::<TokenData>(&token_key(token))? {
        store.modify_json::<Vec<String>, _>(&user_tokens_key(&data.user_id), |tokens| {
            remove_all(tokens, token)
        })?;
    }
    Ok(())
}

/// Drop every session of `user_id` except `keep`.
///
/// The session list is taken or rewritten in one store step, so a session
/// issued concurrently is either revoked here or stays listed.
pub fn revoke_all_sessions(store: &Store, user_id: &str, keep: Option<&str>) -> Result<(), ApiError> {
    let key = user_tokens_key(user_id);
    let revoked: Vec<String> = match keep {
        None => store.take_json(&key)?.unwrap_or_default(),
        Some(kept) => store
            .update_json::<Vec<String>, _, _>(&key, |tokens| {
                let (stay, gone): (Vec<String>, Vec<String>) =
                    tokens.drain(..).partition(|t| t == kept);
                *tokens = stay;
                gone
            })?
            .unwrap_or_default(),
    };

    for token in &revoked {
        store.delete(&token_key(token))?;
    }
    debug!(user_id = %user_id, revoked = revoked.len(), "Revoked sessions");
    Ok(())
}

pub fn session_cookie(token: &str, config: &Config) -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE, token.to_string())
        .path("/")
        .http_only(true)
        .secure(config.secure_cookies)
        .same_site(SameSite::Lax)
        .max_age(CookieDuration::hours(config.token_expiration_hours))
        .finish()
}

pub fn cleared_cookie() -> Cookie<'static> {
    let mut cookie = Cookie::build(SESSION_COOKIE, "")
        .path("/")
        .http_only(true)
        .finish();
    cookie.make_removal();
    cookie
}

impl FromRequest for AuthUser {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(authenticate(req))
    }
}

fn authenticate(req: &HttpRequest) -> Result<AuthUser, ApiError> {
    let state = req
        .app_data::<web::Data<AppState>>()
        .ok_or_else(|| ApiError::Internal("application state missing".to_string()))?;
    let token = token_from_request(req).ok_or_else(|| ApiError::unauthorized("Please login first"))?;
    let user_id = validate_session(&state.store, state.config.token_expiration_hours, &token)?;
    Ok(AuthUser { user_id, token })
}

/// Check credentials and open a session. Unknown email and wrong password
/// are indistinguishable to the caller.
pub fn login(store: &Store, email: &str, password: &str) -> Result<(User, String), ApiError> {
    let rejected = || ApiError::unauthorized("Incorrect email or password");

    let email = normalize_email(email).ok_or_else(rejected)?;
    let user_id: String = store.get_json(&email_key(&email))?.ok_or_else(rejected)?;
    let user: User = store.get_json(&user_key(&user_id))?.ok_or_else(rejected)?;

    if !verify_password(password, &user.password) {
        return Err(rejected());
    }

    let token = issue_session(store, &user.id)?;
    info!(user_id = %user.id, "User logged in");
    Ok((user, token))
}

// === HTTP Handlers ===

#[derive(Deserialize)]
pub struct LoginBody {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

pub async fn login_user(
    state: web::Data<AppState>,
    body: web::Json<LoginBody>,
) -> Result<HttpResponse, ApiError> {
    if body.email.trim().is_empty() || body.password.is_empty() {
        return Err(ApiError::validation("Please provide email and password"));
    }

    let (user, token) = login(&state.store, &body.email, &body.password)?;
    let profile = resolve_profile(&state.store, &user)?;

    Ok(HttpResponse::Ok()
        .cookie(session_cookie(&token, &state.config))
        .json(success(serde_json::json!({ "user": profile, "token": token }))))
}

pub async fn logout_user(
    state: web::Data<AppState>,
    req: HttpRequest,
) -> Result<HttpResponse, ApiError> {
    if let Some(token) = token_from_request(&req) {
        revoke_session(&state.store, &token)?;
    }

    Ok(HttpResponse::Ok()
        .cookie(cleared_cookie())
        .json(success(serde_json::json!({ "message": "Logged out successfully" }))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::models::MediaRef;

    fn seed(store: &Store, id: &str) {
        let user = User {
            id: id.to_string(),
            name: id.to_string(),
            email: format!("{}@x.com", id),
            password: String::new(),
            avatar: MediaRef::default(),
            followers: Vec::new(),
            following: Vec::new(),
            posts: Vec::new(),
            reset_password_token: None,
            reset_password_expire: None,
            created_at: now(),
        };
        store.set_json(&user_key(id), &user).unwrap();
    }

    fn backdate(store: &Store, token: &str, age: Duration) {
        store
            .update_json::<TokenData, _, _>(&token_key(token), |t| t.created_at = now() - age)
            .unwrap();
    }

    #[test]
    fn session_expires_within_the_last_partial_hour() {
        let store = Store::in_memory();
        seed(&store, "u1");

        let fresh = issue_session(&store, "u1").unwrap();
        backdate(&store, &fresh, Duration::hours(2) - Duration::minutes(1));
        assert_eq!(validate_session(&store, 2, &fresh).unwrap(), "u1");

        let stale = issue_session(&store, "u1").unwrap();
        backdate(&store, &stale, Duration::hours(2) + Duration::minutes(30));
        let err = validate_session(&store, 2, &stale).unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
        assert!(!store.exists(&token_key(&stale)).unwrap());
    }

    #[test]
    fn revoking_keeps_only_the_current_session() {
        let store = Store::in_memory();
        seed(&store, "u1");
        let kept = issue_session(&store, "u1").unwrap();
        let other = issue_session(&store, "u1").unwrap();

        revoke_all_sessions(&store, "u1", Some(&kept)).unwrap();
        assert!(validate_session(&store, 24, &kept).is_ok());
        assert!(validate_session(&store, 24, &other).is_err());
        let listed: Vec<String> = store.get_json(&user_tokens_key("u1")).unwrap().unwrap();
        assert_eq!(listed, vec![kept.clone()]);

        // Sessions issued afterwards are listed and fall to the next revoke.
        let later = issue_session(&store, "u1").unwrap();
        revoke_all_sessions(&store, "u1", None).unwrap();
        assert!(validate_session(&store, 24, &kept).is_err());
        assert!(validate_session(&store, 24, &later).is_err());
        assert!(!store.exists(&user_tokens_key("u1")).unwrap());
    }

    #[test]
    fn concurrent_logins_never_outlive_a_full_revoke() {
        let store = Store::in_memory();
        seed(&store, "u1");

        let issuers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    (0..25)
                        .map(|_| issue_session(&store, "u1").unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        for _ in 0..10 {
            revoke_all_sessions(&store, "u1", None).unwrap();
        }
        let issued: Vec<String> = issuers
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();

        // Every surviving session is still reachable through the list.
        let listed: Vec<String> = store
            .get_json(&user_tokens_key("u1"))
            .unwrap()
            .unwrap_or_default();
        for token in &issued {
            if store.exists(&token_key(token)).unwrap() {
                assert!(listed.contains(token));
            }
        }

        revoke_all_sessions(&store, "u1", None).unwrap();
        for token in &issued {
            assert!(!store.exists(&token_key(token)).unwrap());
        }
    }
}
