use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reference to an object held by the media store.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct MediaRef {
    pub public_id: String,
    pub url: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password: String,
    pub avatar: MediaRef,
    #[serde(default)]
    pub followers: Vec<String>,
    #[serde(default)]
    pub following: Vec<String>,
    #[serde(default)]
    pub posts: Vec<String>,
    #[serde(default)]
    pub reset_password_token: Option<String>,
    #[serde(default)]
    pub reset_password_expire: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Comment {
    pub id: String,
    pub user: String,
    pub comment: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Post {
    pub id: String,
    pub owner: String,
    pub image: MediaRef,
    pub caption: String,
    #[serde(default)]
    pub likes: Vec<String>,
    #[serde(default)]
    pub comments: Vec<Comment>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TokenData {
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

/// Public view of an account: no credentials, relation lists as ids.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UserSummary {
    pub id: String,
    pub name: String,
    pub email: String,
    pub avatar: MediaRef,
    pub followers: Vec<String>,
    pub following: Vec<String>,
    pub posts: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            avatar: user.avatar.clone(),
            followers: user.followers.clone(),
            following: user.following.clone(),
            posts: user.posts.clone(),
            created_at: user.created_at,
        }
    }
}

/// Account with `posts`, `followers` and `following` resolved.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub email: String,
    pub avatar: MediaRef,
    pub followers: Vec<UserSummary>,
    pub following: Vec<UserSummary>,
    pub posts: Vec<Post>,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CommentView {
    pub id: String,
    pub user: Option<UserSummary>,
    pub comment: String,
}

/// Post with `owner`, `likes` and comment authors resolved.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PostView {
    pub id: String,
    pub owner: Option<UserSummary>,
    pub image: MediaRef,
    pub caption: String,
    pub likes: Vec<UserSummary>,
    pub comments: Vec<CommentView>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}
