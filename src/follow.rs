use actix_web::{web, HttpResponse};
use serde::Serialize;
use tracing::info;

use crate::auth::AuthUser;
use crate::config::*;
use crate::core::db::Store;
use crate::core::errors::ApiError;
use crate::core::helpers::{add_unique, remove_all};
use crate::handlers::success;
use crate::models::models::{User, UserSummary};
use crate::state::AppState;
use crate::users::{load_user, summaries};

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FollowOutcome {
    Followed,
    Unfollowed,
}

impl FollowOutcome {
    pub fn message(self) -> &'static str {
        match self {
            FollowOutcome::Followed => "User followed",
            FollowOutcome::Unfollowed => "User Unfollowed",
        }
    }
}

/// Flip whether `follower_id` follows `target_id`.
///
/// Membership is decided by the follower's `following` list, and both
/// documents change under one store lock, so the two sides of an edge
/// always agree. Set helpers keep repeated ids from piling up.
pub fn toggle_follow(store: &Store, follower_id: &str, target_id: &str) -> Result<FollowOutcome, ApiError> {
    if follower_id == target_id {
        return Err(ApiError::validation("You cannot follow yourself"));
    }

    let outcome = store
        .update_pair_json::<User, User, _, _>(
            &user_key(follower_id),
            &user_key(target_id),
            |follower, target| {
                if remove_all(&mut follower.following, target_id) {
                    remove_all(&mut target.followers, follower_id);
                    FollowOutcome::Unfollowed
                } else {
                    add_unique(&mut follower.following, target_id);
                    add_unique(&mut target.followers, follower_id);
                    FollowOutcome::Followed
                }
            },
        )?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    match outcome {
        FollowOutcome::Followed => info!(follower = %follower_id, target = %target_id, "Followed"),
        FollowOutcome::Unfollowed => info!(follower = %follower_id, target = %target_id, "Unfollowed"),
    }
    Ok(outcome)
}

pub fn get_followings(store: &Store, user_id: &str) -> Result<Vec<UserSummary>, ApiError> {
    let user = load_user(store, user_id)?;
    summaries(store, &user.following)
}

pub fn get_followers(store: &Store, user_id: &str) -> Result<Vec<UserSummary>, ApiError> {
    let user = load_user(store, user_id)?;
    summaries(store, &user.followers)
}

// === HTTP Handlers ===

pub async fn handle_follow(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let outcome = toggle_follow(&state.store, &auth.user_id, &path.into_inner())?;
    Ok(HttpResponse::Ok().json(success(serde_json::json!({
        "message": outcome.message(),
        "status": outcome,
    }))))
}

pub async fn get_followings_list(
    state: web::Data<AppState>,
    _auth: AuthUser,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let users = get_followings(&state.store, &path.into_inner())?;
    Ok(HttpResponse::Ok().json(success(serde_json::json!({ "users": users }))))
}

pub async fn get_followers_list(
    state: web::Data<AppState>,
    _auth: AuthUser,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let users = get_followers(&state.store, &path.into_inner())?;
    Ok(HttpResponse::Ok().json(success(serde_json::json!({ "users": users }))))
}
