//! Cascading account deletion.
//!
//! Removing an account touches an unbounded number of documents: the
//! account, its media, its posts, every account on either side of its
//! follow edges, and every post it liked or commented on. The store has no
//! multi-document transactions, so the cascade runs as a persisted
//! [`DeletionJob`]:
//!
//! 1. remove the avatar from the media store
//! 2. remove the account record, its email and reset index entries, and
//!    its sessions
//! 3. remove each owned post (image, record, feed entry)
//! 4. detach the account from its followers' `following` lists
//! 5. detach the account from the `followers` lists of those it follows
//! 6. sweep all posts in batches, dropping its likes and comments
//!
//! The job document is written before step 1 and after every stage and
//! sweep batch. Each step is idempotent, so a failed cascade is finished by
//! calling [`delete_account`] again, or by [`resume_pending`] at startup.
//! The job document is removed only after the sweep completes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::auth::revoke_all_sessions;
use crate::config::*;
use crate::core::errors::ApiError;
use crate::core::helpers::{add_unique, now, remove_all};
use crate::models::models::{MediaRef, Post, User};
use crate::posts::discard_post;
use crate::state::AppState;
use crate::users::load_user;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeletionStage {
    RemoveAvatar,
    RemoveAccount,
    RemovePosts,
    DetachFollowers,
    DetachFollowing,
    PurgeInteractions,
    Done,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct DeletionReport {
    pub posts_deleted: usize,
    pub followers_updated: usize,
    pub following_updated: usize,
    pub posts_purged: usize,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DeletionJob {
    pub user_id: String,
    pub avatar: MediaRef,
    pub posts: Vec<String>,
    pub followers: Vec<String>,
    pub following: Vec<String>,
    pub stage: DeletionStage,
    /// Post ids to sweep, captured when the sweep starts.
    #[serde(default)]
    pub sweep: Vec<String>,
    /// Index into `sweep` of the next unprocessed post.
    #[serde(default)]
    pub cursor: usize,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub report: DeletionReport,
}

impl DeletionJob {
    fn new(user: &User) -> Self {
        Self {
            user_id: user.id.clone(),
            avatar: user.avatar.clone(),
            posts: user.posts.clone(),
            followers: user.followers.clone(),
            following: user.following.clone(),
            stage: DeletionStage::RemoveAvatar,
            sweep: Vec::new(),
            cursor: 0,
            started_at: now(),
            report: DeletionReport::default(),
        }
    }

    /// Fold in relations the account gained after the job was created.
    fn absorb(&mut self, user: &User) {
        for id in &user.posts {
            add_unique(&mut self.posts, id);
        }
        for id in &user.followers {
            add_unique(&mut self.followers, id);
        }
        for id in &user.following {
            add_unique(&mut self.following, id);
        }
    }
}

pub fn pending_job(state: &AppState, user_id: &str) -> Result<Option<DeletionJob>, ApiError> {
    Ok(state.store.get_json(&deletion_key(user_id))?)
}

fn save(state: &AppState, job: &DeletionJob) -> Result<(), ApiError> {
    state.store.set_json(&deletion_key(&job.user_id), job)?;
    Ok(())
}

/// Delete `user_id` and everything that refers to it.
///
/// Resumes an existing job for the same account instead of starting over.
pub async fn delete_account(state: &AppState, user_id: &str) -> Result<DeletionReport, ApiError> {
    let mut job = match pending_job(state, user_id)? {
        Some(job) => {
            info!(user_id = %user_id, stage = ?job.stage, "Resuming account deletion");
            job
        }
        None => {
            let user = load_user(&state.store, user_id)?;
            let job = DeletionJob::new(&user);
            save(state, &job)?;
            state
                .store
                .upsert_json::<Vec<String>, _, _>(DELETIONS_LIST_KEY, |ids| add_unique(ids, user_id))?;
            info!(user_id = %user_id, posts = job.posts.len(), "Account deletion started");
            job
        }
    };

    if let Err(e) = run(state, &mut job).await {
        warn!(user_id = %user_id, stage = ?job.stage, error = %e, "Account deletion interrupted");
        return Err(e);
    }

    state.store.delete(&deletion_key(user_id))?;
    state
        .store
        .modify_json::<Vec<String>, _>(DELETIONS_LIST_KEY, |ids| remove_all(ids, user_id))?;
    info!(user_id = %user_id, report = ?job.report, "Account deletion finished");
    Ok(job.report)
}

/// Finish every cascade left behind by a crash or an upstream failure.
pub async fn resume_pending(state: &AppState) -> Result<usize, ApiError> {
    let ids: Vec<String> = state.store.get_json(DELETIONS_LIST_KEY)?.unwrap_or_default();
    let mut finished = 0;
    for id in &ids {
        match delete_account(state, id).await {
            Ok(_) => finished += 1,
            Err(ApiError::NotFound(_)) => {
                // Listed without a job document: nothing left to do.
                state
                    .store
                    .modify_json::<Vec<String>, _>(DELETIONS_LIST_KEY, |list| remove_all(list, id))?;
            }
            Err(e) => error!(user_id = %id, error = %e, "Could not resume account deletion"),
        }
    }
    Ok(finished)
}

async fn run(state: &AppState, job: &mut DeletionJob) -> Result<(), ApiError> {
    loop {
        let next = match job.stage {
            DeletionStage::RemoveAvatar => {
                if !job.avatar.public_id.is_empty() {
                    state.media.destroy(&job.avatar.public_id).await?;
                }
                DeletionStage::RemoveAccount
            }
            DeletionStage::RemoveAccount => {
                remove_account(state, job)?;
                DeletionStage::RemovePosts
            }
            DeletionStage::RemovePosts => {
                remove_posts(state, job).await?;
                DeletionStage::DetachFollowers
            }
            DeletionStage::DetachFollowers => {
                for id in &job.followers {
                    let changed = state
                        .store
                        .modify_json::<User, _>(&user_key(id), |u| remove_all(&mut u.following, &job.user_id))?;
                    if changed == Some(true) {
                        job.report.followers_updated += 1;
                    }
                }
                DeletionStage::DetachFollowing
            }
            DeletionStage::DetachFollowing => {
                for id in &job.following {
                    let changed = state
                        .store
                        .modify_json::<User, _>(&user_key(id), |u| remove_all(&mut u.followers, &job.user_id))?;
                    if changed == Some(true) {
                        job.report.following_updated += 1;
                    }
                }
                job.sweep = state.store.get_json(FEED_KEY)?.unwrap_or_default();
                job.cursor = 0;
                DeletionStage::PurgeInteractions
            }
            DeletionStage::PurgeInteractions => {
                purge_interactions(state, job)?;
                DeletionStage::Done
            }
            DeletionStage::Done => return Ok(()),
        };

        job.stage = next;
        save(state, job)?;
    }
}

fn remove_account(state: &AppState, job: &mut DeletionJob) -> Result<(), ApiError> {
    let store = &state.store;

    // Taking the record is the point after which no follow, like or comment
    // by or towards this account can stick; anything added since the job
    // was created is folded in here.
    if let Some(user) = store.take_json::<User>(&user_key(&job.user_id))? {
        job.absorb(&user);
        save(state, job)?;

        if store.get_json::<String>(&email_key(&user.email))?.as_deref() == Some(user.id.as_str()) {
            store.delete(&email_key(&user.email))?;
        }
        if let Some(hash) = &user.reset_password_token {
            store.delete(&reset_key(hash))?;
        }
    }

    store.modify_json::<Vec<String>, _>(USERS_LIST_KEY, |ids| remove_all(ids, &job.user_id))?;
    revoke_all_sessions(store, &job.user_id, None)?;
    Ok(())
}

async fn remove_posts(state: &AppState, job: &mut DeletionJob) -> Result<(), ApiError> {
    for id in job.posts.clone() {
        let Some(post) = state.store.get_json::<Post>(&post_key(&id))? else {
            continue;
        };
        discard_post(state, &post).await?;
        job.report.posts_deleted += 1;
    }
    Ok(())
}

fn purge_interactions(state: &AppState, job: &mut DeletionJob) -> Result<(), ApiError> {
    let batch_size = state.config.purge_batch_size.max(1);
    let user_id = job.user_id.clone();

    while job.cursor < job.sweep.len() {
        let end = (job.cursor + batch_size).min(job.sweep.len());
        for post_id in &job.sweep[job.cursor..end] {
            let changed = state.store.modify_json::<Post, _>(&post_key(post_id), |p| {
                let liked = remove_all(&mut p.likes, &user_id);
                let before = p.comments.len();
                p.comments.retain(|c| c.user != user_id);
                liked || p.comments.len() != before
            })?;
            if changed == Some(true) {
                job.report.posts_purged += 1;
            }
        }

        job.cursor = end;
        save(state, job)?;
    }
    Ok(())
}
