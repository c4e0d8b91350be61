use spin_sdk::http::{Request, Response};
use crate::models::models::{Follow, Followers, Followings, NotificationKind};
use crate::core::db::{get_list, push_back, remove_from_list, KvStore};
use crate::core::errors::ApiError;
use crate::core::helpers::{json_response, now_iso};
use crate::auth::current_user;
use crate::notifications::notify;
use crate::users::{find_by_username, username_of};
use crate::config::*;

/// Creates the follower → following edge. Returns false when it already
/// existed.
pub fn follow_user(store: &impl KvStore, follower_id: &str, following_id: &str) -> anyhow::Result<bool> {
    let key = follow_key(follower_id, following_id);
    if store.exists(&key)? {
        return Ok(false);
    }

    let edge = Follow {
        follower_id: follower_id.to_string(),
        following_id: following_id.to_string(),
        created_at: now_iso(),
        notifications_enabled: true,
    };
    store.set_json(&key, &edge)?;
    push_back(store, &followings_key(follower_id), following_id)?;
    push_back(store, &followers_key(following_id), follower_id)?;

    Ok(true)
}

/// Removes the edge. Returns false when there was none.
pub fn unfollow_user(store: &impl KvStore, follower_id: &str, following_id: &str) -> anyhow::Result<bool> {
    let key = follow_key(follower_id, following_id);
    if !store.exists(&key)? {
        return Ok(false);
    }

    store.delete(&key)?;
    remove_from_list(store, &followings_key(follower_id), following_id)?;
    remove_from_list(store, &followers_key(following_id), follower_id)?;

    Ok(true)
}

pub fn is_following(store: &impl KvStore, follower_id: &str, following_id: &str) -> anyhow::Result<bool> {
    store.exists(&follow_key(follower_id, following_id))
}

pub fn get_followings(store: &impl KvStore, user_id: &str) -> anyhow::Result<Followings> {
    get_list(store, &followings_key(user_id))
}

pub fn get_followers(store: &impl KvStore, user_id: &str) -> anyhow::Result<Followers> {
    get_list(store, &followers_key(user_id))
}

pub fn follower_count(store: &impl KvStore, user_id: &str) -> anyhow::Result<usize> {
    Ok(get_followers(store, user_id)?.len())
}

pub fn following_count(store: &impl KvStore, user_id: &str) -> anyhow::Result<usize> {
    Ok(get_followings(store, user_id)?.len())
}

// === HTTP Handlers ===

/// `POST /follow/{username}`: follows when not following, unfollows
/// otherwise.
pub fn toggle_follow(store: &impl KvStore, req: &Request, username: &str) -> anyhow::Result<Response> {
    let user = match current_user(store, req)? {
        Some(u) => u,
        None => return Ok(ApiError::Unauthorized.into()),
    };

    let target = match find_by_username(store, username)? {
        Some(t) => t,
        None => return Ok(ApiError::NotFound("User not found".to_string()).into()),
    };

    if target.id == user.id {
        return Ok(ApiError::BadRequest("Cannot follow yourself".to_string()).into());
    }

    let is_following = if unfollow_user(store, &user.id, &target.id)? {
        false
    } else {
        follow_user(store, &user.id, &target.id)?;
        notify(
            store,
            &target.id,
            &user.id,
            NotificationKind::Follow,
            None,
            format!("{} started following you", user.username),
        )?;
        true
    };

    log::info!(
        "{} {} {}",
        user.username,
        if is_following { "followed" } else { "unfollowed" },
        target.username
    );

    json_response(200, &serde_json::json!({
        "is_following": is_following,
        "follower_count": follower_count(store, &target.id)?,
    }))
}

/// `POST /follow/{username}/notifications`: flips the edge's notification
/// preference.
pub fn toggle_follow_notifications(store: &impl KvStore, req: &Request, username: &str) -> anyhow::Result<Response> {
    let user = match current_user(store, req)? {
        Some(u) => u,
        None => return Ok(ApiError::Unauthorized.into()),
    };
    let target = match find_by_username(store, username)? {
        Some(t) => t,
        None => return Ok(ApiError::NotFound("User not found".to_string()).into()),
    };

    let key = follow_key(&user.id, &target.id);
    let mut edge = match store.get_json::<Follow>(&key)? {
        Some(e) => e,
        None => return Ok(ApiError::BadRequest("You are not following this user".to_string()).into()),
    };
    edge.notifications_enabled = !edge.notifications_enabled;
    store.set_json(&key, &edge)?;

    json_response(200, &serde_json::json!({
        "notifications_enabled": edge.notifications_enabled
    }))
}

fn usernames(store: &impl KvStore, ids: &[String]) -> anyhow::Result<Vec<String>> {
    ids.iter().map(|id| username_of(store, id)).collect()
}

pub fn get_followings_list(store: &impl KvStore, username: &str) -> anyhow::Result<Response> {
    let user = match find_by_username(store, username)? {
        Some(u) => u,
        None => return Ok(ApiError::NotFound("User not found".to_string()).into()),
    };

    let mut followings = Vec::new();
    for id in get_followings(store, &user.id)? {
        let edge = store.get_json::<Follow>(&follow_key(&user.id, &id))?;
        followings.push(serde_json::json!({
            "username": username_of(store, &id)?,
            "since": edge.as_ref().map(|e| e.created_at.clone()),
            "notifications_enabled": edge.map(|e| e.notifications_enabled).unwrap_or(true),
        }));
    }

    json_response(200, &followings)
}

pub fn get_followers_list(store: &impl KvStore, username: &str) -> anyhow::Result<Response> {
    let user = match find_by_username(store, username)? {
        Some(u) => u,
        None => return Ok(ApiError::NotFound("User not found".to_string()).into()),
    };

    let followers = usernames(store, &get_followers(store, &user.id)?)?;
    json_response(200, &followers)
}
