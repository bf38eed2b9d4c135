use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Duration;
use serde::Deserialize;
use tracing::{info, warn};

use crate::auth::{issue_session, revoke_all_sessions, session_cookie, AuthUser};
use crate::config::*;
use crate::core::db::Store;
use crate::core::errors::ApiError;
use crate::core::helpers::{
    add_unique, hash_password, new_id, normalize_email, now, random_token, sanitize_text,
    sha256_hex, validate_uuid, verify_password,
};
use crate::handlers::success;
use crate::models::models::{MediaRef, Post, User, UserProfile, UserSummary};
use crate::notifier::Email;
use crate::state::AppState;

pub fn load_user(store: &Store, user_id: &str) -> Result<User, ApiError> {
    store
        .get_json::<User>(&user_key(user_id))?
        .ok_or_else(|| ApiError::not_found("User not found"))
}

/// Summaries for the ids that still resolve; dangling ids are skipped.
pub fn summaries(store: &Store, ids: &[String]) -> Result<Vec<UserSummary>, ApiError> {
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(user) = store.get_json::<User>(&user_key(id))? {
            out.push(UserSummary::from(&user));
        }
    }
    Ok(out)
}

pub fn resolve_profile(store: &Store, user: &User) -> Result<UserProfile, ApiError> {
    let mut posts = Vec::with_capacity(user.posts.len());
    for id in &user.posts {
        if let Some(post) = store.get_json::<Post>(&post_key(id))? {
            posts.push(post);
        }
    }

    Ok(UserProfile {
        id: user.id.clone(),
        name: user.name.clone(),
        email: user.email.clone(),
        avatar: user.avatar.clone(),
        followers: summaries(store, &user.followers)?,
        following: summaries(store, &user.following)?,
        posts,
        created_at: user.created_at,
    })
}

fn clean_name(name: &str) -> Result<String, ApiError> {
    let name = sanitize_text(name);
    let len = name.chars().count();
    if !(MIN_NAME_LENGTH..=MAX_NAME_LENGTH).contains(&len) {
        return Err(ApiError::validation(format!(
            "Name must be {}-{} characters",
            MIN_NAME_LENGTH, MAX_NAME_LENGTH
        )));
    }
    Ok(name)
}

fn check_password(password: &str) -> Result<(), ApiError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(ApiError::validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }
    Ok(())
}

#[derive(Deserialize, Default)]
pub struct RegisterBody {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub avatar: String,
}

pub async fn register(state: &AppState, input: &RegisterBody) -> Result<(User, String), ApiError> {
    if input.name.trim().is_empty()
        || input.email.trim().is_empty()
        || input.password.is_empty()
        || input.avatar.is_empty()
    {
        return Err(ApiError::validation(
            "Please provide name, email, password and avatar",
        ));
    }

    let name = clean_name(&input.name)?;
    let email = normalize_email(&input.email).ok_or_else(|| ApiError::validation("Invalid email"))?;
    check_password(&input.password)?;

    let store = &state.store;
    if store.exists(&email_key(&email))? {
        return Err(ApiError::Conflict("User already exists".to_string()));
    }

    let password = hash_password(&input.password)?;
    let avatar = state.media.upload(&input.avatar, AVATAR_FOLDER).await?;
    let id = new_id();

    // The email index entry is the uniqueness claim; losing the race means
    // another registration took the address after the check above.
    if !store.insert_if_absent(&email_key(&email), &id)? {
        if let Err(e) = state.media.destroy(&avatar.public_id).await {
            warn!(error = %e, "Failed to release avatar of rejected registration");
        }
        return Err(ApiError::Conflict("User already exists".to_string()));
    }

    let user = User {
        id: id.clone(),
        name,
        email,
        password,
        avatar,
        followers: Vec::new(),
        following: Vec::new(),
        posts: Vec::new(),
        reset_password_token: None,
        reset_password_expire: None,
        created_at: now(),
    };
    store.set_json(&user_key(&id), &user)?;
    store.upsert_json::<Vec<String>, _, _>(USERS_LIST_KEY, |users| add_unique(users, &id))?;

    let token = issue_session(store, &id)?;
    info!(user_id = %id, "Registered user");
    Ok((user, token))
}

/// Change the password of `user_id`, keeping only the session `current_token`.
pub fn change_password(
    store: &Store,
    user_id: &str,
    current_token: &str,
    old_password: &str,
    new_password: &str,
) -> Result<(), ApiError> {
    if old_password.is_empty() || new_password.is_empty() {
        return Err(ApiError::validation(
            "Please provide old password and new password",
        ));
    }

    let user = load_user(store, user_id)?;
    if !verify_password(old_password, &user.password) {
        return Err(ApiError::unauthorized("Incorrect old password"));
    }
    check_password(new_password)?;

    let hash = hash_password(new_password)?;
    store
        .update_json::<User, _, _>(&user_key(user_id), |u| u.password = hash)?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    revoke_all_sessions(store, user_id, Some(current_token))?;
    info!(user_id = %user_id, "Password changed");
    Ok(())
}

/// Issue a reset token for `email` and mail the link. Returns the address
/// the link was sent to.
pub async fn request_password_reset(
    state: &AppState,
    email: &str,
    base_url: &str,
) -> Result<String, ApiError> {
    let store = &state.store;
    let email = normalize_email(email).ok_or_else(|| ApiError::not_found("User not found"))?;
    let user_id: String = store
        .get_json(&email_key(&email))?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    let raw_token = random_token(20);
    let token_hash = sha256_hex(&raw_token);
    let expires = now() + Duration::minutes(state.config.reset_token_ttl_minutes);

    let previous = store
        .update_json::<User, _, _>(&user_key(&user_id), |u| {
            let previous = u.reset_password_token.take();
            u.reset_password_token = Some(token_hash.clone());
            u.reset_password_expire = Some(expires);
            previous
        })?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    if let Some(previous) = previous {
        store.delete(&reset_key(&previous))?;
    }
    store.set_json(&reset_key(&token_hash), &user_id)?;

    let reset_url = format!("{}/password/reset/{}", base_url.trim_end_matches('/'), raw_token);
    let message = format!(
        "You are receiving this email because you (or someone else) has requested the reset of a password.\n\
         Please follow this link to reset your password:\n\n{}",
        reset_url
    );

    let delivery = state
        .notifier
        .send(Email {
            to: email.clone(),
            subject: "Reset Password".to_string(),
            message,
        })
        .await;

    if let Err(e) = delivery {
        warn!(user_id = %user_id, error = %e, "Reset mail not delivered, clearing token");
        store.update_json::<User, _, _>(&user_key(&user_id), |u| {
            if u.reset_password_token.as_deref() == Some(token_hash.as_str()) {
                u.reset_password_token = None;
                u.reset_password_expire = None;
            }
        })?;
        store.delete(&reset_key(&token_hash))?;
        return Err(e.into());
    }

    info!(user_id = %user_id, "Password reset requested");
    Ok(email)
}

/// Redeem a reset token. Unknown or expired tokens leave the account untouched.
pub fn reset_password(store: &Store, raw_token: &str, new_password: &str) -> Result<(), ApiError> {
    let rejected = || ApiError::unauthorized("Password reset token is invalid or has expired");

    let token_hash = sha256_hex(raw_token);
    let user_id: String = store.get_json(&reset_key(&token_hash))?.ok_or_else(rejected)?;
    let user = store.get_json::<User>(&user_key(&user_id))?.ok_or_else(rejected)?;

    let matches = user.reset_password_token.as_deref() == Some(token_hash.as_str());
    let unexpired = user.reset_password_expire.is_some_and(|at| at > now());
    if !matches || !unexpired {
        return Err(rejected());
    }

    check_password(new_password)?;
    let hash = hash_password(new_password)?;

    store
        .update_json::<User, _, _>(&user_key(&user_id), |u| {
            u.password = hash;
            u.reset_password_token = None;
            u.reset_password_expire = None;
        })?
        .ok_or_else(rejected)?;
    store.delete(&reset_key(&token_hash))?;
    revoke_all_sessions(store, &user_id, None)?;

    info!(user_id = %user_id, "Password reset completed");
    Ok(())
}

#[derive(Deserialize, Default)]
pub struct UpdateProfileBody {
    pub name: Option<String>,
    pub email: Option<String>,
    pub avatar: Option<String>,
}

pub async fn update_profile(
    state: &AppState,
    user_id: &str,
    fields: &UpdateProfileBody,
) -> Result<User, ApiError> {
    let store = &state.store;
    let user = load_user(store, user_id)?;

    let name = match fields.name.as_deref().filter(|n| !n.trim().is_empty()) {
        Some(name) => Some(clean_name(name)?),
        None => None,
    };

    let email = match fields.email.as_deref().filter(|e| !e.trim().is_empty()) {
        Some(raw) => {
            let email = normalize_email(raw).ok_or_else(|| ApiError::validation("Invalid email"))?;
            if email == user.email {
                None
            } else {
                if !store.insert_if_absent(&email_key(&email), &user.id)? {
                    return Err(ApiError::Conflict("Email already in use".to_string()));
                }
                Some(email)
            }
        }
        None => None,
    };

    let avatar = match fields.avatar.as_deref().filter(|a| !a.is_empty()) {
        Some(data_uri) => match replace_avatar(state, &user.avatar.public_id, data_uri).await {
            Ok(media) => Some(media),
            Err(e) => {
                if let Some(claimed) = &email {
                    store.delete(&email_key(claimed))?;
                }
                return Err(e);
            }
        },
        None => None,
    };

    let new_avatar = avatar.clone();
    let updated = store.update_json::<User, _, _>(&user_key(user_id), |u| {
        if let Some(name) = name {
            u.name = name;
        }
        if let Some(email) = &email {
            u.email = email.clone();
        }
        if let Some(avatar) = avatar {
            u.avatar = avatar;
        }
        u.clone()
    })?;

    let Some(updated) = updated else {
        // The account was deleted while the avatar uploaded; nothing else
        // will ever release what was claimed for it here.
        if let Some(claimed) = &email {
            store.delete(&email_key(claimed))?;
        }
        if let Some(media) = new_avatar {
            if let Err(e) = state.media.destroy(&media.public_id).await {
                warn!(user_id = %user_id, error = %e, "Failed to release avatar of deleted account");
            }
        }
        return Err(ApiError::not_found("User not found"));
    };

    if email.is_some() {
        store.delete(&email_key(&user.email))?;
    }

    info!(user_id = %user_id, "Profile updated");
    Ok(updated)
}

async fn replace_avatar(
    state: &AppState,
    old_public_id: &str,
    data_uri: &str,
) -> Result<MediaRef, ApiError> {
    state.media.destroy(old_public_id).await?;
    Ok(state.media.upload(data_uri, AVATAR_FOLDER).await?)
}

/// Case-insensitive substring match on account names.
pub fn search_accounts(store: &Store, pattern: &str) -> Result<Vec<UserSummary>, ApiError> {
    let needle = pattern.trim().to_lowercase();
    let ids: Vec<String> = store.get_json(USERS_LIST_KEY)?.unwrap_or_default();

    let mut users = Vec::new();
    for id in &ids {
        if let Some(user) = store.get_json::<User>(&user_key(id))? {
            if user.name.to_lowercase().contains(&needle) {
                users.push(UserSummary::from(&user));
            }
        }
    }
    Ok(users)
}

fn public_base_url(state: &AppState, req: &HttpRequest) -> String {
    match &state.config.public_url {
        Some(url) => url.clone(),
        None => {
            let info = req.connection_info();
            format!("{}://{}", info.scheme(), info.host())
        }
    }
}

// === HTTP Handlers ===

pub async fn create_user(
    state: web::Data<AppState>,
    body: web::Json<RegisterBody>,
) -> Result<HttpResponse, ApiError> {
    let (user, token) = register(&state, &body).await?;

    Ok(HttpResponse::Created()
        .cookie(session_cookie(&token, &state.config))
        .json(success(serde_json::json!({
            "user": UserSummary::from(&user),
            "token": token,
        }))))
}

pub async fn get_profile(
    state: web::Data<AppState>,
    auth: AuthUser,
) -> Result<HttpResponse, ApiError> {
    let user = load_user(&state.store, &auth.user_id)?;
    let profile = resolve_profile(&state.store, &user)?;
    Ok(HttpResponse::Ok().json(success(serde_json::json!({ "user": profile }))))
}

pub async fn get_user_details(
    state: web::Data<AppState>,
    _auth: AuthUser,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let user_id = path.into_inner();
    if !validate_uuid(&user_id) {
        return Err(ApiError::not_found("User not found"));
    }

    let user = load_user(&state.store, &user_id)?;
    let profile = resolve_profile(&state.store, &user)?;
    Ok(HttpResponse::Ok().json(success(serde_json::json!({ "user": profile }))))
}

#[derive(Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub name: String,
}

pub async fn search_users(
    state: web::Data<AppState>,
    _auth: AuthUser,
    query: web::Query<SearchQuery>,
) -> Result<HttpResponse, ApiError> {
    let users = search_accounts(&state.store, &query.name)?;
    Ok(HttpResponse::Ok().json(success(serde_json::json!({ "users": users }))))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePasswordBody {
    #[serde(default)]
    pub old_password: String,
    #[serde(default)]
    pub new_password: String,
}

pub async fn update_password(
    state: web::Data<AppState>,
    auth: AuthUser,
    body: web::Json<UpdatePasswordBody>,
) -> Result<HttpResponse, ApiError> {
    change_password(
        &state.store,
        &auth.user_id,
        &auth.token,
        &body.old_password,
        &body.new_password,
    )?;
    Ok(HttpResponse::Ok().json(success(
        serde_json::json!({ "message": "Password updated successfully" }),
    )))
}

pub async fn update_profile_handler(
    state: web::Data<AppState>,
    auth: AuthUser,
    body: web::Json<UpdateProfileBody>,
) -> Result<HttpResponse, ApiError> {
    let user = update_profile(&state, &auth.user_id, &body).await?;
    Ok(HttpResponse::Ok().json(success(serde_json::json!({
        "message": "Profile updated successfully",
        "user": UserSummary::from(&user),
    }))))
}

#[derive(Deserialize)]
pub struct ForgotPasswordBody {
    #[serde(default)]
    pub email: String,
}

pub async fn forgot_password(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<ForgotPasswordBody>,
) -> Result<HttpResponse, ApiError> {
    if body.email.trim().is_empty() {
        return Err(ApiError::validation("Please provide an email"));
    }

    let base_url = public_base_url(&state, &req);
    let email = request_password_reset(&state, &body.email, &base_url).await?;
    Ok(HttpResponse::Ok().json(success(
        serde_json::json!({ "message": format!("Email sent to {}", email) }),
    )))
}

#[derive(Deserialize)]
pub struct ResetPasswordBody {
    #[serde(default)]
    pub password: String,
}

pub async fn reset_password_handler(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<ResetPasswordBody>,
) -> Result<HttpResponse, ApiError> {
    reset_password(&state.store, &path.into_inner(), &body.password)?;
    Ok(HttpResponse::Ok().json(success(
        serde_json::json!({ "message": "Password reset successfully" }),
    )))
}
