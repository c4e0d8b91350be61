use spin_sdk::http::{Request, Response};
use crate::models::models::{NotificationKind, Post};
use crate::core::db::KvStore;
use crate::core::errors::ApiError;
use crate::core::helpers::json_response;
use crate::auth::current_user;
use crate::notifications::notify;
use crate::config::post_key;

/// Adds or removes `user_id` from the post's likes. Returns the new state.
pub fn toggle(post: &mut Post, user_id: &str) -> bool {
    if post.is_liked_by(user_id) {
        post.likes.retain(|id| id != user_id);
        false
    } else {
        post.likes.push(user_id.to_string());
        true
    }
}

/// `POST /like/{id}`
pub fn toggle_like(store: &impl KvStore, req: &Request, post_id: &str) -> anyhow::Result<Response> {
    let user = match current_user(store, req)? {
        Some(u) => u,
        None => return Ok(ApiError::Unauthorized.into()),
    };

    let key = post_key(post_id);
    let mut post = match store.get_json::<Post>(&key)? {
        Some(p) => p,
        None => return Ok(ApiError::NotFound("Post not found".to_string()).into()),
    };

    let is_liked = toggle(&mut post, &user.id);
    store.set_json(&key, &post)?;

    if is_liked {
        notify(
            store,
            &post.user_id,
            &user.id,
            NotificationKind::Like,
            Some(&post.id),
            format!("{} liked your post: {}", user.username, post.preview()),
        )?;
    }
    log::debug!("{} {} post {}", user.username, if is_liked { "liked" } else { "unliked" }, post.id);

    json_response(200, &serde_json::json!({
        "is_liked": is_liked,
        "like_count": post.like_count(),
    }))
}
