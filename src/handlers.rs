use actix_web::{web, HttpResponse};
use serde_json::Value;

use crate::auth::{cleared_cookie, login_user, logout_user, AuthUser};
use crate::core::errors::ApiError;
use crate::deletion::delete_account;
use crate::follow::{get_followers_list, get_followings_list, handle_follow};
use crate::posts::{
    comment_on_post, create_post_handler, delete_comment_handler, delete_post_handler, edit_post,
    get_feed, like_post, my_posts, user_posts,
};
use crate::state::AppState;
use crate::users::{
    create_user, forgot_password, get_profile, get_user_details, reset_password_handler,
    search_users, update_password, update_profile_handler,
};

/// Upper bound for JSON bodies; avatars and post images travel inline.
pub const MAX_JSON_BYTES: usize = 10 * 1024 * 1024;

/// Wrap a payload object in the `{success: true, ...}` envelope.
pub fn success(payload: Value) -> Value {
    let mut body = serde_json::Map::new();
    body.insert("success".to_string(), Value::Bool(true));
    if let Value::Object(fields) = payload {
        body.extend(fields);
    }
    Value::Object(body)
}

pub async fn delete_me(
    state: web::Data<AppState>,
    auth: AuthUser,
) -> Result<HttpResponse, ApiError> {
    let report = delete_account(&state, &auth.user_id).await?;
    Ok(HttpResponse::Ok()
        .cookie(cleared_cookie())
        .json(success(serde_json::json!({
            "message": "Profile deleted successfully",
            "report": report,
        }))))
}

pub async fn serve_media(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let file = path.into_inner();
    let public_id = file.split('.').next().unwrap_or_default();

    let media = state
        .media
        .fetch(public_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Media not found"))?;

    let mime = mime_guess::from_ext(&media.extension).first_or_octet_stream();
    Ok(HttpResponse::Ok()
        .content_type(mime.as_ref())
        .body(media.bytes))
}

async fn not_found() -> Result<HttpResponse, ApiError> {
    Err(ApiError::not_found("No route found"))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    let json_config = web::JsonConfig::default()
        .limit(MAX_JSON_BYTES)
        .error_handler(|err, _req| ApiError::validation(err.to_string()).into());

    cfg.app_data(json_config)
        .service(
            web::scope("/api/v1")
                .route("/register", web::post().to(create_user))
                .route("/login", web::post().to(login_user))
                .route("/logout", web::get().to(logout_user))
                .route("/me", web::get().to(get_profile))
                .route("/user/{id}", web::get().to(get_user_details))
                .route("/users", web::get().to(search_users))
                .route("/follow/{id}", web::get().to(handle_follow))
                .route("/followers/{id}", web::get().to(get_followers_list))
                .route("/following/{id}", web::get().to(get_followings_list))
                .route("/update/password", web::put().to(update_password))
                .route("/update/profile", web::put().to(update_profile_handler))
                .route("/delete/me", web::delete().to(delete_me))
                .route("/forgot/password", web::post().to(forgot_password))
                .route("/password/reset/{token}", web::put().to(reset_password_handler))
                .route("/posts", web::get().to(get_feed))
                .route("/my/posts", web::get().to(my_posts))
                .route("/userposts/{id}", web::get().to(user_posts))
                .route("/post/upload", web::post().to(create_post_handler))
                .route("/post/comment/{id}", web::put().to(comment_on_post))
                .route("/post/comment/{id}", web::delete().to(delete_comment_handler))
                .route("/post/{id}", web::get().to(like_post))
                .route("/post/{id}", web::put().to(edit_post))
                .route("/post/{id}", web::delete().to(delete_post_handler)),
        )
        .route("/media/{file}", web::get().to(serve_media))
        .default_service(web::route().to(not_found));
}
