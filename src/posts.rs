use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::auth::AuthUser;
use crate::config::*;
use crate::core::db::Store;
use crate::core::errors::ApiError;
use crate::core::helpers::{add_unique, new_id, now, remove_all, sanitize_text};
use crate::handlers::success;
use crate::models::models::{Comment, CommentView, Post, PostView, User, UserSummary};
use crate::state::AppState;
use crate::users::{load_user, summaries};

pub fn load_post(store: &Store, post_id: &str) -> Result<Post, ApiError> {
    store
        .get_json::<Post>(&post_key(post_id))?
        .ok_or_else(|| ApiError::not_found("Post not found"))
}

fn clean_caption(caption: &str) -> Result<String, ApiError> {
    let caption = sanitize_text(caption);
    if caption.chars().count() > MAX_CAPTION_LENGTH {
        return Err(ApiError::validation(format!(
            "Caption too long (max {} chars)",
            MAX_CAPTION_LENGTH
        )));
    }
    Ok(caption)
}

pub fn resolve_post(store: &Store, post: &Post) -> Result<PostView, ApiError> {
    let owner = store
        .get_json::<User>(&user_key(&post.owner))?
        .map(|u| UserSummary::from(&u));

    let mut comments = Vec::with_capacity(post.comments.len());
    for c in &post.comments {
        let user = store
            .get_json::<User>(&user_key(&c.user))?
            .map(|u| UserSummary::from(&u));
        comments.push(CommentView {
            id: c.id.clone(),
            user,
            comment: c.comment.clone(),
        });
    }

    Ok(PostView {
        id: post.id.clone(),
        owner,
        image: post.image.clone(),
        caption: post.caption.clone(),
        likes: summaries(store, &post.likes)?,
        comments,
        created_at: post.created_at,
        updated_at: post.updated_at,
    })
}

pub async fn create_post(
    state: &AppState,
    owner_id: &str,
    caption: &str,
    image: &str,
) -> Result<Post, ApiError> {
    if image.is_empty() {
        return Err(ApiError::validation("Please provide an image"));
    }
    let caption = clean_caption(caption)?;
    let store = &state.store;
    load_user(store, owner_id)?;

    let media = state.media.upload(image, POST_FOLDER).await?;
    let post = Post {
        id: new_id(),
        owner: owner_id.to_string(),
        image: media,
        caption,
        likes: Vec::new(),
        comments: Vec::new(),
        created_at: now(),
        updated_at: None,
    };

    store.set_json(&post_key(&post.id), &post)?;
    store.upsert_json::<Vec<String>, _, _>(FEED_KEY, |feed| feed.insert(0, post.id.clone()))?;

    let attached = store
        .modify_json::<User, _>(&user_key(owner_id), |u| add_unique(&mut u.posts, &post.id))?
        .is_some();
    if !attached {
        // Owner was deleted while the image uploaded.
        discard_post(state, &post).await?;
        return Err(ApiError::not_found("User not found"));
    }

    info!(user_id = %owner_id, post_id = %post.id, "Post created");
    Ok(post)
}

/// Remove a post's media, record and feed entry. Safe to repeat.
pub async fn discard_post(state: &AppState, post: &Post) -> Result<(), ApiError> {
    state.media.destroy(&post.image.public_id).await?;
    state.store.delete(&post_key(&post.id))?;
    state
        .store
        .modify_json::<Vec<String>, _>(FEED_KEY, |feed| remove_all(feed, &post.id))?;
    Ok(())
}

pub fn update_caption(store: &Store, actor_id: &str, post_id: &str, caption: &str) -> Result<Post, ApiError> {
    let caption = clean_caption(caption)?;
    let post = load_post(store, post_id)?;
    if post.owner != actor_id {
        return Err(ApiError::forbidden("Unauthorized"));
    }

    store
        .update_json::<Post, _, _>(&post_key(post_id), |p| {
            p.caption = caption;
            p.updated_at = Some(now());
            p.clone()
        })?
        .ok_or_else(|| ApiError::not_found("Post not found"))
}

pub async fn delete_post(state: &AppState, actor_id: &str, post_id: &str) -> Result<(), ApiError> {
    let store = &state.store;
    let post = load_post(store, post_id)?;
    if post.owner != actor_id {
        return Err(ApiError::forbidden("Unauthorized"));
    }

    discard_post(state, &post).await?;
    store.modify_json::<User, _>(&user_key(&post.owner), |u| remove_all(&mut u.posts, post_id))?;

    info!(user_id = %actor_id, post_id = %post_id, "Post deleted");
    Ok(())
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LikeOutcome {
    Liked,
    Unliked,
}

impl LikeOutcome {
    pub fn message(self) -> &'static str {
        match self {
            LikeOutcome::Liked => "Post Liked",
            LikeOutcome::Unliked => "Post Unliked",
        }
    }
}

pub fn toggle_like(store: &Store, actor_id: &str, post_id: &str) -> Result<LikeOutcome, ApiError> {
    let outcome = store
        .update_json::<Post, _, _>(&post_key(post_id), |p| {
            if remove_all(&mut p.likes, actor_id) {
                LikeOutcome::Unliked
            } else {
                add_unique(&mut p.likes, actor_id);
                LikeOutcome::Liked
            }
        })?
        .ok_or_else(|| ApiError::not_found("Post not found"))?;

    // An account removed while this request was in flight must not leave
    // a like behind after its cascade has swept past this post.
    if outcome == LikeOutcome::Liked && !store.exists(&user_key(actor_id))? {
        store.modify_json::<Post, _>(&post_key(post_id), |p| remove_all(&mut p.likes, actor_id))?;
        return Err(ApiError::unauthorized("Please login first"));
    }

    Ok(outcome)
}

pub fn add_comment(store: &Store, actor_id: &str, post_id: &str, text: &str) -> Result<Comment, ApiError> {
    let text = sanitize_text(text);
    if text.is_empty() {
        return Err(ApiError::validation("Please provide a comment"));
    }
    if text.chars().count() > MAX_COMMENT_LENGTH {
        return Err(ApiError::validation(format!(
            "Comment too long (max {} chars)",
            MAX_COMMENT_LENGTH
        )));
    }

    let comment = Comment {
        id: new_id(),
        user: actor_id.to_string(),
        comment: text,
    };
    let pushed = comment.clone();
    store
        .update_json::<Post, _, _>(&post_key(post_id), |p| p.comments.push(pushed))?
        .ok_or_else(|| ApiError::not_found("Post not found"))?;

    if !store.exists(&user_key(actor_id))? {
        store.modify_json::<Post, _>(&post_key(post_id), |p| {
            let before = p.comments.len();
            p.comments.retain(|c| c.id != comment.id);
            p.comments.len() != before
        })?;
        return Err(ApiError::unauthorized("Please login first"));
    }

    Ok(comment)
}

/// Only the comment's author or the post's owner may delete a comment.
pub fn delete_comment(store: &Store, actor_id: &str, post_id: &str, comment_id: &str) -> Result<(), ApiError> {
    let post = load_post(store, post_id)?;
    let comment = post
        .comments
        .iter()
        .find(|c| c.id == comment_id)
        .ok_or_else(|| ApiError::not_found("Comment not found"))?;

    if comment.user != actor_id && post.owner != actor_id {
        return Err(ApiError::forbidden("Unauthorized"));
    }

    store.modify_json::<Post, _>(&post_key(post_id), |p| {
        let before = p.comments.len();
        p.comments.retain(|c| c.id != comment_id);
        p.comments.len() != before
    })?;
    Ok(())
}

fn views_for(store: &Store, ids: &[String]) -> Result<Vec<PostView>, ApiError> {
    let mut posts = Vec::with_capacity(ids.len());
    for id in ids {
        match store.get_json::<Post>(&post_key(id))? {
            Some(post) => posts.push(resolve_post(store, &post)?),
            None => warn!(post_id = %id, "Dangling post reference"),
        }
    }
    Ok(posts)
}

pub fn posts_of(store: &Store, user_id: &str) -> Result<Vec<PostView>, ApiError> {
    let user = load_user(store, user_id)?;
    views_for(store, &user.posts)
}

/// Posts by every account `user_id` follows, newest first.
pub fn following_posts(store: &Store, user_id: &str) -> Result<Vec<PostView>, ApiError> {
    let user = load_user(store, user_id)?;
    let mut ids = Vec::new();
    for followed in &user.following {
        if let Some(u) = store.get_json::<User>(&user_key(followed))? {
            ids.extend(u.posts);
        }
    }

    let mut posts = views_for(store, &ids)?;
    posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(posts)
}

// === HTTP Handlers ===

#[derive(Deserialize)]
pub struct CreatePostBody {
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub image: String,
}

pub async fn create_post_handler(
    state: web::Data<AppState>,
    auth: AuthUser,
    body: web::Json<CreatePostBody>,
) -> Result<HttpResponse, ApiError> {
    let post = create_post(&state, &auth.user_id, &body.caption, &body.image).await?;
    Ok(HttpResponse::Created().json(success(serde_json::json!({ "post": post }))))
}

pub async fn like_post(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let outcome = toggle_like(&state.store, &auth.user_id, &path.into_inner())?;
    Ok(HttpResponse::Ok().json(success(serde_json::json!({ "message": outcome.message() }))))
}

#[derive(Deserialize)]
pub struct CaptionBody {
    #[serde(default)]
    pub caption: String,
}

pub async fn edit_post(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<String>,
    body: web::Json<CaptionBody>,
) -> Result<HttpResponse, ApiError> {
    update_caption(&state.store, &auth.user_id, &path.into_inner(), &body.caption)?;
    Ok(HttpResponse::Ok().json(success(serde_json::json!({ "message": "Post updated" }))))
}

pub async fn delete_post_handler(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    delete_post(&state, &auth.user_id, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(success(serde_json::json!({ "message": "Post deleted" }))))
}

#[derive(Deserialize)]
pub struct CommentBody {
    #[serde(default)]
    pub comment: String,
}

pub async fn comment_on_post(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<String>,
    body: web::Json<CommentBody>,
) -> Result<HttpResponse, ApiError> {
    let comment = add_comment(&state.store, &auth.user_id, &path.into_inner(), &body.comment)?;
    Ok(HttpResponse::Ok().json(success(serde_json::json!({
        "message": "Comment added",
        "comment": comment,
    }))))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteCommentBody {
    #[serde(default)]
    pub comment_id: String,
}

pub async fn delete_comment_handler(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<String>,
    body: web::Json<DeleteCommentBody>,
) -> Result<HttpResponse, ApiError> {
    if body.comment_id.is_empty() {
        return Err(ApiError::validation("Comment id is required"));
    }
    delete_comment(&state.store, &auth.user_id, &path.into_inner(), &body.comment_id)?;
    Ok(HttpResponse::Ok().json(success(serde_json::json!({ "message": "Comment deleted" }))))
}

pub async fn get_feed(
    state: web::Data<AppState>,
    auth: AuthUser,
) -> Result<HttpResponse, ApiError> {
    let posts = following_posts(&state.store, &auth.user_id)?;
    Ok(HttpResponse::Ok().json(success(serde_json::json!({ "posts": posts }))))
}

pub async fn my_posts(
    state: web::Data<AppState>,
    auth: AuthUser,
) -> Result<HttpResponse, ApiError> {
    let posts = posts_of(&state.store, &auth.user_id)?;
    Ok(HttpResponse::Ok().json(success(serde_json::json!({ "posts": posts }))))
}

pub async fn user_posts(
    state: web::Data<AppState>,
    _auth: AuthUser,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let posts = posts_of(&state.store, &path.into_inner())?;
    Ok(HttpResponse::Ok().json(success(serde_json::json!({ "posts": posts }))))
}
