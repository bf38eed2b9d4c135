mod common;

use std::thread;

use bord::core::errors::ApiError;
use bord::follow::{get_followers, get_followings, toggle_follow, FollowOutcome};
use bord::posts::{add_comment, create_post, delete_comment, toggle_like, LikeOutcome};
use common::*;

#[tokio::test]
async fn toggle_twice_restores_state() {
    let h = harness();
    let a = seed_user(&h, "Alice").await;
    let b = seed_user(&h, "Bob").await;
    let store = &h.state.store;

    let before = (user(&h, &a).unwrap(), user(&h, &b).unwrap());
    assert_eq!(toggle_follow(store, &a, &b).unwrap(), FollowOutcome::Followed);
    assert_eq!(toggle_follow(store, &a, &b).unwrap(), FollowOutcome::Unfollowed);
    let after = (user(&h, &a).unwrap(), user(&h, &b).unwrap());

    assert_eq!(before.0.following, after.0.following);
    assert_eq!(before.0.followers, after.0.followers);
    assert_eq!(before.1.following, after.1.following);
    assert_eq!(before.1.followers, after.1.followers);
}

#[tokio::test]
async fn single_follow_records_each_side_once() {
    let h = harness();
    let a = seed_user(&h, "Alice").await;
    let b = seed_user(&h, "Bob").await;
    let c = seed_user(&h, "Carol").await;
    let store = &h.state.store;

    toggle_follow(store, &c, &b).unwrap();
    toggle_follow(store, &a, &b).unwrap();

    let a_doc = user(&h, &a).unwrap();
    let b_doc = user(&h, &b).unwrap();
    assert_eq!(count(&a_doc.following, &b), 1);
    assert_eq!(count(&b_doc.followers, &a), 1);
    assert_eq!(b_doc.followers, vec![c.clone(), a.clone()]);

    let followers: Vec<String> = get_followers(store, &b).unwrap().into_iter().map(|u| u.id).collect();
    assert_eq!(followers, vec![c, a.clone()]);
    let following: Vec<String> = get_followings(store, &a).unwrap().into_iter().map(|u| u.id).collect();
    assert_eq!(following, vec![b]);
}

#[tokio::test]
async fn self_follow_is_rejected() {
    let h = harness();
    let a = seed_user(&h, "Alice").await;
    let err = toggle_follow(&h.state.store, &a, &a).unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));
    assert!(user(&h, &a).unwrap().following.is_empty());
}

#[tokio::test]
async fn concurrent_followers_are_not_lost() {
    let h = harness();
    let target = seed_user(&h, "Target").await;
    let mut fans = Vec::new();
    for i in 0..16 {
        fans.push(seed_user(&h, &format!("Fan{}", i)).await);
    }

    let handles: Vec<_> = fans
        .iter()
        .cloned()
        .map(|fan| {
            let store = h.state.store.clone();
            let target = target.clone();
            thread::spawn(move || toggle_follow(&store, &fan, &target).unwrap())
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), FollowOutcome::Followed);
    }

    let followers = user(&h, &target).unwrap().followers;
    assert_eq!(followers.len(), fans.len());
    for fan in &fans {
        assert_eq!(count(&followers, fan), 1);
        assert_eq!(user(&h, fan).unwrap().following, vec![target.clone()]);
    }
}

#[tokio::test]
async fn racing_toggles_on_one_pair_keep_edges_symmetric() {
    let mut broken = 0;
    for _ in 0..200 {
        let h = harness();
        let a = seed_user(&h, "Alice").await;
        let b = seed_user(&h, "Bob").await;

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let store = h.state.store.clone();
                let (a, b) = (a.clone(), b.clone());
                thread::spawn(move || {
                    for _ in 0..25 {
                        toggle_follow(&store, &a, &b).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let a_doc = user(&h, &a).unwrap();
        let b_doc = user(&h, &b).unwrap();
        assert!(count(&a_doc.following, &b) <= 1);
        assert!(count(&b_doc.followers, &a) <= 1);
        if a_doc.following.contains(&b) != b_doc.followers.contains(&a) {
            broken += 1;
        }
    }
    assert_eq!(broken, 0);
}

#[tokio::test]
async fn likes_toggle_with_set_semantics() {
    let h = harness();
    let a = seed_user(&h, "Alice").await;
    let b = seed_user(&h, "Bob").await;
    let p = create_post(&h.state, &a, "hi", PNG).await.unwrap();
    let store = &h.state.store;

    assert_eq!(toggle_like(store, &b, &p.id).unwrap(), LikeOutcome::Liked);
    assert_eq!(post(&h, &p.id).unwrap().likes, vec![b.clone()]);
    assert_eq!(toggle_like(store, &b, &p.id).unwrap(), LikeOutcome::Unliked);
    assert!(post(&h, &p.id).unwrap().likes.is_empty());

    let err = toggle_like(store, &b, "missing").unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));
}

#[tokio::test]
async fn comment_deletion_requires_author_or_owner() {
    let h = harness();
    let owner = seed_user(&h, "Owner").await;
    let author = seed_user(&h, "Author").await;
    let stranger = seed_user(&h, "Stranger").await;
    let p = create_post(&h.state, &owner, "hi", PNG).await.unwrap();
    let store = &h.state.store;

    let first = add_comment(store, &author, &p.id, "one").unwrap();
    let second = add_comment(store, &author, &p.id, "two").unwrap();
    assert_eq!(comment_ids_by(&post(&h, &p.id).unwrap(), &author).len(), 2);

    let err = delete_comment(store, &stranger, &p.id, &first.id).unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));

    delete_comment(store, &author, &p.id, &first.id).unwrap();
    delete_comment(store, &owner, &p.id, &second.id).unwrap();
    assert!(post(&h, &p.id).unwrap().comments.is_empty());

    let err = delete_comment(store, &owner, &p.id, &second.id).unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));

    let err = add_comment(store, &author, &p.id, "   ").unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));
}
