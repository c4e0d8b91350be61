use spin_sdk::http::{Request, Response};
use uuid::Uuid;
use crate::models::models::{NotificationKind, Post, User};
use crate::core::db::{get_list, push_back, push_front, remove_from_list, KvStore};
use crate::core::errors::ApiError;
use crate::core::helpers::{body_fields, field, json_response, now_iso, redirect, wants_json};
use crate::core::pagination::paginate;
use crate::core::query_params::parse_query_params;
use crate::auth::{current_user, login_redirect, validate_token};
use crate::hashtags::{extract_hashtags, get_hashtag, index_post, unindex_post};
use crate::notifications::{notify, notify_mentions, purge_where};
use crate::users::{find_by_username, username_of};
use crate::config::*;

/// Trims and checks post content: non-empty and at most
/// [`MAX_POST_LENGTH`] characters.
pub fn validate_content(raw: &str) -> Result<String, ApiError> {
    let content = raw.trim();
    if content.is_empty() {
        return Err(ApiError::BadRequest("Content cannot be empty".to_string()));
    }
    if content.chars().count() > MAX_POST_LENGTH {
        return Err(ApiError::BadRequest(format!(
            "Post cannot exceed {} characters",
            MAX_POST_LENGTH
        )));
    }
    Ok(content.to_string())
}

pub fn get_post(store: &impl KvStore, post_id: &str) -> anyhow::Result<Option<Post>> {
    store.get_json(&post_key(post_id))
}

/// Stores a new post by `author` and fans out its side effects: feed entry,
/// reply edge, hashtag index, reply and mention notifications.
pub fn publish_post(
    store: &impl KvStore,
    author: &User,
    raw_content: &str,
    reply_to: Option<&str>,
    image_url: Option<&str>,
) -> Result<Post, ApiError> {
    let content = validate_content(raw_content)?;

    let parent = match reply_to {
        Some(parent_id) => match get_post(store, parent_id)? {
            Some(p) => Some(p),
            None => return Err(ApiError::NotFound("Post not found".to_string())),
        },
        None => None,
    };

    if let Some(url) = image_url {
        if url.len() > MAX_URL_LENGTH || !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ApiError::BadRequest("Image URL must be an http(s) URL".to_string()));
        }
    }

    let post = Post {
        id: Uuid::new_v4().to_string(),
        user_id: author.id.clone(),
        hashtags: extract_hashtags(&content),
        content,
        created_at: now_iso(),
        updated_at: None,
        reply_to: parent.as_ref().map(|p| p.id.clone()),
        image_url: image_url.map(|u| u.to_string()),
        likes: Vec::new(),
        is_pinned: false,
        is_edited: false,
        view_count: 0,
        share_count: 0,
    };

    // Save post object
    store.set_json(&post_key(&post.id), &post)?;
    // prepend newest
    push_front(store, FEED_KEY, &post.id)?;
    index_post(store, &post)?;

    if let Some(parent) = &parent {
        push_back(store, &replies_key(&parent.id), &post.id)?;
        notify(
            store,
            &parent.user_id,
            &author.id,
            NotificationKind::Reply,
            Some(&post.id),
            format!("{} replied to your post: {}", author.username, parent.preview()),
        )?;
    }
    notify_mentions(store, author, &post, parent.as_ref().map(|p| p.user_id.as_str()))?;

    log::info!("{} published post {}", author.username, post.id);
    Ok(post)
}

/// Deletes a post, its replies (recursively), its hashtag entries and every
/// notification that points at it.
pub fn delete_post_cascade(store: &impl KvStore, post: &Post) -> anyhow::Result<()> {
    for reply_id in get_list(store, &replies_key(&post.id))? {
        if let Some(reply) = get_post(store, &reply_id)? {
            delete_post_cascade(store, &reply)?;
        }
    }
    store.delete(&replies_key(&post.id))?;

    if let Some(parent_id) = &post.reply_to {
        remove_from_list(store, &replies_key(parent_id), &post.id)?;
    }

    unindex_post(store, &post.id, &post.hashtags)?;
    purge_where(store, |n| n.post_id.as_deref() == Some(post.id.as_str()))?;
    remove_from_list(store, FEED_KEY, &post.id)?;
    store.delete(&post_key(&post.id))?;
    Ok(())
}

/// Which posts a feed shows.
pub enum PostFilter<'a> {
    All,
    Author(&'a str),
    Authors(&'a [String]),
    Tag(&'a str),
    RepliesTo(&'a str),
}

/// Posts matching `filter`, newest first.
pub fn collect_posts(store: &impl KvStore, filter: PostFilter<'_>) -> anyhow::Result<Vec<Post>> {
    let ids = match &filter {
        PostFilter::Tag(name) => get_hashtag(store, name)?.map(|t| t.post_ids).unwrap_or_default(),
        PostFilter::RepliesTo(parent_id) => get_list(store, &replies_key(parent_id))?,
        _ => get_list(store, FEED_KEY)?,
    };

    let mut posts = Vec::new();
    for id in ids.iter() {
        if let Some(p) = get_post(store, id)? {
            let keep = match &filter {
                PostFilter::Author(user_id) => p.user_id == *user_id,
                PostFilter::Authors(user_ids) => user_ids.contains(&p.user_id),
                _ => true,
            };
            if keep {
                posts.push(p);
            }
        }
    }

    // Sort by created_at in descending order (newest first)
    posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(posts)
}

/// Post as exposed to clients, seen by `viewer_id`.
pub fn post_json(store: &impl KvStore, post: &Post, viewer_id: Option<&str>) -> anyhow::Result<serde_json::Value> {
    Ok(serde_json::json!({
        "id": post.id,
        "user_id": post.user_id,
        "author": username_of(store, &post.user_id)?,
        "content": post.content,
        "created_at": post.created_at,
        "updated_at": post.updated_at,
        "reply_to": post.reply_to,
        "image_url": post.image_url,
        "hashtags": post.hashtags,
        "like_count": post.like_count(),
        "is_liked": viewer_id.map(|v| post.is_liked_by(v)).unwrap_or(false),
        "reply_count": get_list(store, &replies_key(&post.id))?.len(),
        "is_pinned": post.is_pinned,
        "is_edited": post.is_edited,
        "view_count": post.view_count,
        "share_count": post.share_count,
    }))
}

// === HTTP Handlers ===

/// `POST /create_post` from the compose form or a JSON client.
pub fn create_post(store: &impl KvStore, req: &Request) -> anyhow::Result<Response> {
    let json = wants_json(req);
    let user = match current_user(store, req)? {
        Some(u) => u,
        None if json => return Ok(ApiError::Unauthorized.into()),
        None => return Ok(login_redirect(req)),
    };

    let fields = match body_fields(req) {
        Ok(f) => f,
        Err(e) => return Ok(e.into()),
    };
    let content = fields.get("content").map(String::as_str).unwrap_or_default();

    match publish_post(store, &user, content, field(&fields, "reply_to"), field(&fields, "image_url")) {
        Ok(post) if json => json_response(201, &post_json(store, &post, Some(&user.id))?),
        Ok(post) => match &post.reply_to {
            Some(parent) => Ok(redirect(&format!("/post/{}", parent))),
            None => Ok(redirect("/")),
        },
        Err(ApiError::InternalError(msg)) => Err(anyhow::anyhow!(msg)),
        Err(err) if json => Ok(err.into()),
        Err(err) => crate::templates::feed_page(
            store,
            req,
            Some(err.message()),
            err.status().as_u16(),
        ),
    }
}

/// `POST /edit_post/{id}` with JSON `{"content": ...}`. Author only.
pub fn edit_post(store: &impl KvStore, req: &Request, post_id: &str) -> anyhow::Result<Response> {
    let user_id = match validate_token(store, req) {
        Some(uid) => uid,
        None => return Ok(ApiError::Unauthorized.into()),
    };

    let key = post_key(post_id);

    // Check if post exists and belongs to user
    let mut post = match store.get_json::<Post>(&key)? {
        Some(p) => p,
        None => return Ok(ApiError::NotFound("Post not found".to_string()).into()),
    };
    if post.user_id != user_id {
        return Ok(ApiError::Forbidden("You can only edit your own posts".to_string()).into());
    }

    // Always JSON, whatever the Content-Type says
    let value: serde_json::Value = match serde_json::from_slice(req.body()) {
        Ok(v) => v,
        Err(_) => return Ok(ApiError::BadRequest("Invalid JSON body".to_string()).into()),
    };
    let content = match validate_content(value["content"].as_str().unwrap_or_default()) {
        Ok(c) => c,
        Err(e) => return Ok(e.into()),
    };

    // Skip update if content didn't change
    if post.content != content {
        let old_tags = std::mem::take(&mut post.hashtags);
        post.hashtags = extract_hashtags(&content);
        post.content = content;
        post.is_edited = true;
        post.updated_at = Some(now_iso());

        let dropped: Vec<String> = old_tags
            .into_iter()
            .filter(|t| !post.hashtags.contains(t))
            .collect();
        unindex_post(store, &post.id, &dropped)?;
        store.set_json(&key, &post)?;
        index_post(store, &post)?;
    }

    json_response(200, &serde_json::json!({
        "success": true,
        "content": post.content,
    }))
}

/// `DELETE /posts/{id}` or `POST /delete_post/{id}`. Author only.
pub fn delete_post(store: &impl KvStore, req: &Request, post_id: &str) -> anyhow::Result<Response> {
    let user_id = match validate_token(store, req) {
        Some(uid) => uid,
        None => return Ok(ApiError::Unauthorized.into()),
    };

    let post = match get_post(store, post_id)? {
        Some(p) => p,
        None => return Ok(ApiError::NotFound("Post not found".to_string()).into()),
    };
    if post.user_id != user_id {
        return Ok(ApiError::Forbidden("You can only delete your own posts".to_string()).into());
    }

    delete_post_cascade(store, &post)?;
    log::info!("Deleted post {}", post_id);
    Ok(Response::builder().status(204).body(Vec::new()).build())
}

/// `POST /pin/{id}`: author-only pin toggle.
pub fn toggle_pin(store: &impl KvStore, req: &Request, post_id: &str) -> anyhow::Result<Response> {
    let user_id = match validate_token(store, req) {
        Some(uid) => uid,
        None => return Ok(ApiError::Unauthorized.into()),
    };

    let mut post = match get_post(store, post_id)? {
        Some(p) => p,
        None => return Ok(ApiError::NotFound("Post not found".to_string()).into()),
    };
    if post.user_id != user_id {
        return Ok(ApiError::Forbidden("You can only pin your own posts".to_string()).into());
    }

    post.is_pinned = !post.is_pinned;
    store.set_json(&post_key(post_id), &post)?;

    json_response(200, &serde_json::json!({ "is_pinned": post.is_pinned }))
}

/// `POST /share/{id}`
pub fn share_post(store: &impl KvStore, req: &Request, post_id: &str) -> anyhow::Result<Response> {
    if validate_token(store, req).is_none() {
        return Ok(ApiError::Unauthorized.into());
    }

    let mut post = match get_post(store, post_id)? {
        Some(p) => p,
        None => return Ok(ApiError::NotFound("Post not found".to_string()).into()),
    };
    post.share_count += 1;
    store.set_json(&post_key(post_id), &post)?;

    json_response(200, &serde_json::json!({ "share_count": post.share_count }))
}

/// Loads a post for its detail page and counts the view.
pub fn view_post(store: &impl KvStore, post_id: &str) -> anyhow::Result<Option<Post>> {
    let Some(mut post) = get_post(store, post_id)? else {
        return Ok(None);
    };
    post.view_count += 1;
    store.set_json(&post_key(post_id), &post)?;
    Ok(Some(post))
}

/// `GET /api/posts?page=N&user=name&tag=name`
pub fn list_posts(store: &impl KvStore, req: &Request) -> anyhow::Result<Response> {
    let params = parse_query_params(req.uri());
    let viewer = validate_token(store, req);

    let posts = if let Some(username) = params.get("user") {
        match find_by_username(store, username)? {
            Some(u) => collect_posts(store, PostFilter::Author(u.id.as_str()))?,
            None => return Ok(ApiError::NotFound("User not found".to_string()).into()),
        }
    } else if let Some(tag) = params.get("tag") {
        collect_posts(store, PostFilter::Tag(tag.as_str()))?
    } else {
        collect_posts(store, PostFilter::All)?
    };

    let page = paginate(posts, params.get("page").map(String::as_str), POSTS_PER_PAGE);
    let mut items = Vec::with_capacity(page.items.len());
    for p in &page.items {
        items.push(post_json(store, p, viewer.as_deref())?);
    }

    json_response(200, &serde_json::json!({
        "posts": items,
        "page": page.number,
        "num_pages": page.num_pages,
        "total": page.total,
        "has_next": page.has_next(),
        "has_previous": page.has_previous(),
    }))
}
