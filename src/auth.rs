use spin_sdk::http::{Request, Response};
use uuid::Uuid;
use crate::models::models::{User, UserSession};
use crate::config::*;
use crate::core::db::{get_list, push_back, remove_from_list, KvStore};
use crate::core::errors::ApiError;
use crate::core::helpers::{
    body_fields, expired_session_cookie, field, header_str, is_post, json_response, now_iso,
    redirect, redirect_with_cookie, session_cookie, session_token, verify_password, wants_json,
};
use crate::core::query_params::{get_string, parse_query_params};
use crate::templates::{render_login, render_register};
use crate::users::{create_user, find_by_username, public_user_json};

pub const INVALID_CREDENTIALS: &str = "Invalid username and/or password.";
pub const PASSWORD_MISMATCH: &str = "Passwords must match.";

// === Sessions ===

pub fn open_session(store: &impl KvStore, user_id: &str, user_agent: Option<&str>) -> anyhow::Result<String> {
    let token = Uuid::new_v4().to_string();
    let now = now_iso();
    let session = UserSession {
        key: token.clone(),
        user_id: user_id.to_string(),
        created_at: now.clone(),
        last_activity: now,
        user_agent: user_agent.map(|ua| ua.to_string()),
    };
    store.set_json(&token_key(&token), &session)?;
    push_back(store, &sessions_key(user_id), &token)?;
    Ok(token)
}

pub fn close_session(store: &impl KvStore, token: &str) -> anyhow::Result<()> {
    let key = token_key(token);
    if let Some(session) = store.get_json::<UserSession>(&key)? {
        remove_from_list(store, &sessions_key(&session.user_id), token)?;
    }
    store.delete(&key)
}

pub fn revoke_all_sessions(store: &impl KvStore, user_id: &str) -> anyhow::Result<()> {
    for token in get_list(store, &sessions_key(user_id))? {
        store.delete(&token_key(&token))?;
    }
    store.delete(&sessions_key(user_id))
}

fn session_expired(session: &UserSession) -> bool {
    match chrono::DateTime::parse_from_rfc3339(&session.created_at) {
        Ok(created) => {
            let age_hours = (chrono::Utc::now() - created.with_timezone(&chrono::Utc)).num_hours();
            age_hours > token_expiration_hours()
        }
        Err(_) => true,
    }
}

/// Resolves the requesting user from an API key, a bearer token or the
/// session cookie.
pub fn validate_token(store: &impl KvStore, req: &Request) -> Option<String> {
    if let Some(key) = header_str(req, API_KEY_HEADER) {
        return crate::api_keys::authenticate_key(store, key.trim()).ok()?;
    }

    let token = session_token(req)?;
    let key = token_key(&token);
    let mut session = store.get_json::<UserSession>(&key).ok()??;

    if session_expired(&session) {
        if let Err(e) = close_session(store, &token) {
            log::warn!("Failed to drop expired session: {:#}", e);
        }
        return None;
    }
    // Check if user still exists
    if !store.exists(&user_key(&session.user_id)).ok()? {
        return None;
    }

    session.last_activity = now_iso();
    if let Err(e) = store.set_json(&key, &session) {
        log::warn!("Failed to refresh session activity: {:#}", e);
    }
    Some(session.user_id)
}

pub fn current_user(store: &impl KvStore, req: &Request) -> anyhow::Result<Option<User>> {
    match validate_token(store, req) {
        Some(user_id) => store.get_json::<User>(&user_key(&user_id)),
        None => Ok(None),
    }
}

/// Checks credentials against the stored argon2 hash. An unknown username
/// is verified against a placeholder hash.
pub fn authenticate(store: &impl KvStore, username: &str, password: &str) -> anyhow::Result<Option<User>> {
    match find_by_username(store, username)? {
        Some(user) if verify_password(password, &user.password) => Ok(Some(user)),
        Some(_) => Ok(None),
        None => {
            let _ = verify_password(password, DUMMY_HASH);
            Ok(None)
        }
    }
}

const DUMMY_HASH: &str =
    "$argon2id$v=19$m=19456,t=2,p=1$c29tZXNhbHRzb21lc2FsdA$0Vn1Ld7sUZqYfO2bCN5c8gm2sn4L0B4bTZUQ3zoxsT4";

/// Only same-site relative paths are followed after login. Backslashes and
/// control characters are refused since browsers read `/\host` as `//host`.
fn safe_next(next: Option<String>) -> String {
    match next {
        Some(n)
            if n.starts_with('/')
                && !n.starts_with("//")
                && !n.chars().any(|c| c == '\\' || c.is_control()) =>
        {
            n
        }
        _ => "/".to_string(),
    }
}

// === HTTP Handlers ===

pub fn login_view(store: &impl KvStore, req: &Request) -> anyhow::Result<Response> {
    let query = parse_query_params(req.uri());
    if !is_post(req) {
        let next = get_string(&query, "next", None);
        return render_login(None, next.as_deref(), 200);
    }

    let fields = match body_fields(req) {
        Ok(f) => f,
        Err(e) => return Ok(e.into()),
    };
    let username = field(&fields, "username").unwrap_or_default();
    let password = fields.get("password").map(String::as_str).unwrap_or_default();
    let next = fields.get("next").cloned().or_else(|| get_string(&query, "next", None));

    let user = match authenticate(store, username, password)? {
        Some(user) => user,
        None => {
            log::warn!("Failed login attempt for {:?}", username);
            if wants_json(req) {
                return json_response(401, &serde_json::json!({ "error": INVALID_CREDENTIALS }));
            }
            return render_login(Some(INVALID_CREDENTIALS), next.as_deref(), 401);
        }
    };

    let token = open_session(store, &user.id, header_str(req, "User-Agent"))?;
    log::info!("User {} logged in", user.username);

    if wants_json(req) {
        return json_response(200, &serde_json::json!({
            "token": token,
            "user_id": user.id
        }));
    }
    Ok(redirect_with_cookie(&safe_next(next), &session_cookie(&token, token_expiration_hours())))
}

pub fn logout_view(store: &impl KvStore, req: &Request) -> anyhow::Result<Response> {
    if let Some(token) = session_token(req) {
        close_session(store, &token)?;
    }

    if wants_json(req) {
        return json_response(200, &serde_json::json!({
            "message": "Logged out successfully"
        }));
    }
    Ok(redirect_with_cookie("/", &expired_session_cookie()))
}

pub fn register_view(store: &impl KvStore, req: &Request) -> anyhow::Result<Response> {
    if !is_post(req) {
        return render_register(None, 200);
    }

    let json = wants_json(req);
    let fail = |err: ApiError| -> anyhow::Result<Response> {
        match err {
            ApiError::InternalError(msg) => Err(anyhow::anyhow!(msg)),
            err if json => Ok(err.into()),
            err => render_register(Some(err.message()), err.status().as_u16()),
        }
    };

    let fields = match body_fields(req) {
        Ok(f) => f,
        Err(e) => return fail(e),
    };
    let username = field(&fields, "username").unwrap_or_default();
    let email = field(&fields, "email").unwrap_or_default();
    let password = fields.get("password").map(String::as_str).unwrap_or_default();
    let confirmation = fields.get("confirmation").map(String::as_str).unwrap_or_default();

    // Ensure password matches confirmation
    if password != confirmation {
        return fail(ApiError::BadRequest(PASSWORD_MISMATCH.to_string()));
    }

    let user = match create_user(store, username, email, password) {
        Ok(user) => user,
        Err(err) => return fail(err),
    };

    let token = open_session(store, &user.id, header_str(req, "User-Agent"))?;

    if json {
        let mut body = public_user_json(&user);
        body["token"] = serde_json::Value::String(token);
        return json_response(201, &body);
    }
    Ok(redirect_with_cookie("/", &session_cookie(&token, token_expiration_hours())))
}

pub fn list_sessions(store: &impl KvStore, req: &Request) -> anyhow::Result<Response> {
    let user_id = match validate_token(store, req) {
        Some(uid) => uid,
        None => return Ok(ApiError::Unauthorized.into()),
    };
    let current = session_token(req);

    let mut sessions = Vec::new();
    for token in get_list(store, &sessions_key(&user_id))? {
        if let Some(s) = store.get_json::<UserSession>(&token_key(&token))? {
            sessions.push(serde_json::json!({
                "key": format!("{}...", &s.key[..8.min(s.key.len())]),
                "created_at": s.created_at,
                "last_activity": s.last_activity,
                "user_agent": s.user_agent,
                "current": current.as_deref() == Some(s.key.as_str()),
            }));
        }
    }

    json_response(200, &sessions)
}

/// HTML pages behind a login send anonymous visitors to the login form.
pub fn login_redirect(req: &Request) -> Response {
    let path = req.path();
    redirect(&format!("/login?next={}", urlencoding::encode(path)))
}
