use spin_sdk::http::{Request, Response};
use regex::Regex;
use std::sync::OnceLock;
use uuid::Uuid;
use crate::models::models::{Post, User};
use crate::core::db::{get_list, push_back, remove_from_list, KvStore};
use crate::core::errors::ApiError;
use crate::core::helpers::{
    hash_password, header_str, json_response, now_iso, sanitize_text, verify_password,
};
use crate::auth::{open_session, revoke_all_sessions, validate_token};
use crate::follow::{follower_count, following_count, get_followers, get_followings, unfollow_user};
use crate::config::*;

fn username_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^[\w.@+-]+$").expect("Regex should compile"))
}

pub fn validate_username(username: &str) -> Result<(), ApiError> {
    let len = username.chars().count();
    if len < MIN_USERNAME_LENGTH {
        return Err(ApiError::BadRequest("Username is required".to_string()));
    }
    if len > MAX_USERNAME_LENGTH {
        return Err(ApiError::BadRequest(format!(
            "Username must be at most {} characters",
            MAX_USERNAME_LENGTH
        )));
    }
    if !username_regex().is_match(username) {
        return Err(ApiError::BadRequest(
            "Username may only contain letters, digits and @/./+/-/_".to_string(),
        ));
    }
    Ok(())
}

fn validate_url(value: &str, what: &str) -> Result<(), ApiError> {
    if value.len() > MAX_URL_LENGTH {
        return Err(ApiError::BadRequest(format!("{} too long (max {} chars)", what, MAX_URL_LENGTH)));
    }
    if !(value.starts_with("http://") || value.starts_with("https://")) {
        return Err(ApiError::BadRequest(format!("{} must be an http(s) URL", what)));
    }
    Ok(())
}

pub fn public_user_json(user: &User) -> serde_json::Value {
    serde_json::json!({
        "id": user.id,
        "username": user.username,
        "bio": user.bio.as_deref().unwrap_or_default(),
        "avatar_url": user.avatar_url,
        "location": user.location,
        "website": user.website,
        "birth_date": user.birth_date,
        "verified": user.verified,
        "created_at": user.created_at,
    })
}

/// Creates an account. The username must be unused; the password is stored
/// as an argon2 hash only.
pub fn create_user(store: &impl KvStore, username: &str, email: &str, password: &str) -> Result<User, ApiError> {
    validate_username(username)?;
    if password.is_empty() {
        return Err(ApiError::BadRequest("Password is required".to_string()));
    }
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(ApiError::BadRequest(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }
    if !email.is_empty() && !email.contains('@') {
        return Err(ApiError::BadRequest("Enter a valid email address.".to_string()));
    }

    // Check duplicate username
    if store.exists(&username_key(username))? {
        return Err(ApiError::Conflict("Username already taken.".to_string()));
    }

    let now = now_iso();
    let user = User {
        id: Uuid::new_v4().to_string(),
        username: username.to_string(),
        email: email.to_string(),
        password: hash_password(password)?,
        bio: None,
        avatar_url: None,
        location: None,
        website: None,
        birth_date: None,
        verified: false,
        created_at: now.clone(),
        updated_at: now,
    };

    store.set_json(&user_key(&user.id), &user)?;
    store.set_json(&username_key(username), &user.id)?;
    push_back(store, USERS_LIST_KEY, &user.id)?;

    log::info!("Created user {}", user.username);
    Ok(user)
}

pub fn get_user(store: &impl KvStore, user_id: &str) -> anyhow::Result<Option<User>> {
    store.get_json(&user_key(user_id))
}

pub fn find_by_username(store: &impl KvStore, username: &str) -> anyhow::Result<Option<User>> {
    match store.get_json::<String>(&username_key(username))? {
        Some(id) => get_user(store, &id),
        None => Ok(None),
    }
}

/// Username for display, or a placeholder for a deleted account.
pub fn username_of(store: &impl KvStore, user_id: &str) -> anyhow::Result<String> {
    Ok(get_user(store, user_id)?
        .map(|u| u.username)
        .unwrap_or_else(|| "[deleted]".to_string()))
}

// === Account deletion ===

/// Removes a user and everything hanging off the account: posts (with their
/// replies), likes, follow edges in both directions, notifications received
/// or caused, sessions and API keys.
pub fn delete_user(store: &impl KvStore, user_id: &str) -> anyhow::Result<()> {
    let Some(user) = get_user(store, user_id)? else {
        return Ok(());
    };

    for post_id in get_list(store, FEED_KEY)? {
        // Earlier cascades may already have removed this post as a reply.
        let Some(mut post) = store.get_json::<Post>(&post_key(&post_id))? else {
            continue;
        };
        if post.user_id == user_id {
            crate::posts::delete_post_cascade(store, &post)?;
        } else if post.is_liked_by(user_id) {
            post.likes.retain(|id| id != user_id);
            store.set_json(&post_key(&post_id), &post)?;
        }
    }

    for following in get_followings(store, user_id)? {
        unfollow_user(store, user_id, &following)?;
    }
    for follower in get_followers(store, user_id)? {
        unfollow_user(store, &follower, user_id)?;
    }

    crate::notifications::delete_all_for(store, user_id)?;
    crate::notifications::purge_where(store, |n| n.actor_id == user_id)?;
    revoke_all_sessions(store, user_id)?;
    crate::api_keys::revoke_all(store, user_id)?;

    store.delete(&username_key(&user.username))?;
    store.delete(&user_key(user_id))?;
    remove_from_list(store, USERS_LIST_KEY, user_id)?;

    log::info!("Deleted user {}", user.username);
    Ok(())
}

// === HTTP Handlers ===

pub fn get_profile(store: &impl KvStore, req: &Request) -> anyhow::Result<Response> {
    let user_id = match validate_token(store, req) {
        Some(uid) => uid,
        None => return Ok(ApiError::Unauthorized.into()),
    };

    match get_user(store, &user_id)? {
        Some(user) => {
            let mut body = public_user_json(&user);
            body["email"] = serde_json::Value::String(user.email.clone());
            body["updated_at"] = serde_json::Value::String(user.updated_at.clone());
            body["follower_count"] = follower_count(store, &user.id)?.into();
            body["following_count"] = following_count(store, &user.id)?.into();
            json_response(200, &body)
        }
        None => Ok(ApiError::NotFound("User not found".to_string()).into()),
    }
}

pub fn get_user_details(store: &impl KvStore, username: &str) -> anyhow::Result<Response> {
    match find_by_username(store, username)? {
        Some(user) => {
            let mut body = public_user_json(&user);
            body["follower_count"] = follower_count(store, &user.id)?.into();
            body["following_count"] = following_count(store, &user.id)?.into();
            json_response(200, &body)
        }
        None => Ok(ApiError::NotFound("User not found".to_string()).into()),
    }
}

/// Optional text field: absent leaves the value alone, an empty string
/// clears it.
fn optional_text(value: &serde_json::Value, name: &str) -> Option<Option<String>> {
    value[name].as_str().map(|s| {
        let trimmed = s.trim();
        if trimmed.is_empty() { None } else { Some(trimmed.to_string()) }
    })
}

pub fn update_profile(store: &impl KvStore, req: &Request) -> anyhow::Result<Response> {
    let user_id = match validate_token(store, req) {
        Some(uid) => uid,
        None => return Ok(ApiError::Unauthorized.into()),
    };

    let mut user = match get_user(store, &user_id)? {
        Some(u) => u,
        None => return Ok(ApiError::NotFound("User not found".to_string()).into()),
    };

    let value: serde_json::Value = match serde_json::from_slice(req.body()) {
        Ok(v) => v,
        Err(_) => return Ok(ApiError::BadRequest("Invalid JSON body".to_string()).into()),
    };

    if let Some(bio) = optional_text(&value, "bio") {
        if let Some(b) = &bio {
            if b.chars().count() > MAX_BIO_LENGTH {
                return Ok(ApiError::BadRequest(format!("Bio too long (max {} chars)", MAX_BIO_LENGTH)).into());
            }
        }
        user.bio = bio.map(|b| sanitize_text(&b)).filter(|b| !b.is_empty());
    }

    if let Some(location) = optional_text(&value, "location") {
        if let Some(l) = &location {
            if l.chars().count() > MAX_LOCATION_LENGTH {
                return Ok(ApiError::BadRequest(format!("Location too long (max {} chars)", MAX_LOCATION_LENGTH)).into());
            }
        }
        user.location = location.map(|l| sanitize_text(&l)).filter(|l| !l.is_empty());
    }

    if let Some(avatar) = optional_text(&value, "avatar_url") {
        if let Some(a) = &avatar {
            if let Err(e) = validate_url(a, "Avatar URL") {
                return Ok(e.into());
            }
        }
        user.avatar_url = avatar;
    }

    if let Some(website) = optional_text(&value, "website") {
        if let Some(w) = &website {
            if let Err(e) = validate_url(w, "Website") {
                return Ok(e.into());
            }
        }
        user.website = website;
    }

    if let Some(birth_date) = optional_text(&value, "birth_date") {
        if let Some(d) = &birth_date {
            match chrono::NaiveDate::parse_from_str(d, "%Y-%m-%d") {
                Ok(date) if date <= chrono::Utc::now().date_naive() => {}
                Ok(_) => return Ok(ApiError::BadRequest("Birth date cannot be in the future".to_string()).into()),
                Err(_) => return Ok(ApiError::BadRequest("Birth date must be YYYY-MM-DD".to_string()).into()),
            }
        }
        user.birth_date = birth_date;
    }

    let mut new_token = None;
    if let Some(new_password) = value["new_password"].as_str() {
        if new_password.chars().count() < MIN_PASSWORD_LENGTH {
            return Ok(ApiError::BadRequest(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LENGTH
            )).into());
        }
        let old_password = match value["old_password"].as_str() {
            Some(p) => p,
            None => return Ok(ApiError::BadRequest("Current password required".to_string()).into()),
        };
        if !verify_password(old_password, &user.password) {
            return Ok(ApiError::Unauthorized.into());
        }
        user.password = hash_password(new_password)?;

        // Every other session ends with the old password
        revoke_all_sessions(store, &user_id)?;
        new_token = Some(open_session(store, &user_id, header_str(req, "User-Agent"))?);
    }

    user.updated_at = now_iso();
    store.set_json(&user_key(&user_id), &user)?;

    let mut response_data = public_user_json(&user);
    response_data["email"] = serde_json::Value::String(user.email.clone());
    if let Some(token) = new_token {
        response_data["token"] = serde_json::Value::String(token);
    }
    json_response(200, &response_data)
}

pub fn delete_account(store: &impl KvStore, req: &Request) -> anyhow::Result<Response> {
    let user_id = match validate_token(store, req) {
        Some(uid) => uid,
        None => return Ok(ApiError::Unauthorized.into()),
    };
    let user = match get_user(store, &user_id)? {
        Some(u) => u,
        None => return Ok(ApiError::NotFound("User not found".to_string()).into()),
    };

    let value: serde_json::Value = serde_json::from_slice(req.body()).unwrap_or_default();
    let password = value["password"].as_str().unwrap_or_default();
    if !verify_password(password, &user.password) {
        return Ok(ApiError::Forbidden("Password confirmation failed".to_string()).into());
    }

    delete_user(store, &user_id)?;
    Ok(Response::builder().status(204).body(Vec::new()).build())
}
