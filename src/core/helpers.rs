use spin_sdk::http::{Method, Request, Response};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use argon2::password_hash::SaltString;
use ammonia::Builder;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;
use crate::core::errors::ApiError;
use crate::core::query_params::parse_form;

/// RFC 3339 with fixed microsecond precision, so timestamps order correctly
/// as plain strings.
pub fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    use argon2::PasswordHash;

    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

pub fn validate_uuid(id: &str) -> bool {
    Uuid::parse_str(id).is_ok()
}

pub fn random_token(len: usize) -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Plain text only: every tag is stripped.
pub fn sanitize_text(text: &str) -> String {
    Builder::default()
        .tags(std::collections::HashSet::new())
        .clean(text)
        .to_string()
}

// === Request inspection ===

pub fn method_name(req: &Request) -> &'static str {
    match req.method() {
        Method::Get => "GET",
        Method::Head => "HEAD",
        Method::Post => "POST",
        Method::Put => "PUT",
        Method::Delete => "DELETE",
        Method::Connect => "CONNECT",
        Method::Options => "OPTIONS",
        Method::Trace => "TRACE",
        Method::Patch => "PATCH",
        Method::Other(_) => "OTHER",
    }
}

pub fn is_post(req: &Request) -> bool {
    matches!(req.method(), Method::Post)
}

pub fn header_str<'a>(req: &'a Request, name: &str) -> Option<&'a str> {
    req.header(name).and_then(|h| h.as_str())
}

pub fn cookie(req: &Request, name: &str) -> Option<String> {
    let raw = header_str(req, "Cookie")?;
    raw.split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.to_string())
}

pub fn is_json_body(req: &Request) -> bool {
    header_str(req, "Content-Type")
        .map(|ct| ct.starts_with("application/json"))
        .unwrap_or(false)
}

/// JSON clients either send JSON or ask for it.
pub fn wants_json(req: &Request) -> bool {
    is_json_body(req)
        || header_str(req, "Accept")
            .map(|a| a.contains("application/json"))
            .unwrap_or(false)
}

/// Session key from `Authorization: Bearer` or the session cookie.
pub fn session_token(req: &Request) -> Option<String> {
    header_str(req, "Authorization")
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .or_else(|| cookie(req, crate::config::SESSION_COOKIE))
        .filter(|t| !t.is_empty())
}

/// Submitted fields from either a JSON object or a urlencoded form.
pub fn body_fields(req: &Request) -> Result<HashMap<String, String>, ApiError> {
    if !is_json_body(req) {
        return Ok(parse_form(req.body()));
    }

    let value: serde_json::Value = serde_json::from_slice(req.body())
        .map_err(|_| ApiError::BadRequest("Invalid JSON body".to_string()))?;
    let object = value
        .as_object()
        .ok_or_else(|| ApiError::BadRequest("Expected a JSON object".to_string()))?;

    Ok(object
        .iter()
        .filter_map(|(k, v)| match v {
            serde_json::Value::String(s) => Some((k.clone(), s.clone())),
            serde_json::Value::Number(n) => Some((k.clone(), n.to_string())),
            serde_json::Value::Bool(b) => Some((k.clone(), b.to_string())),
            _ => None,
        })
        .collect())
}

/// Field value with surrounding whitespace removed; empty counts as absent.
pub fn field<'a>(fields: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    fields.get(name).map(|v| v.trim()).filter(|v| !v.is_empty())
}

// === Responses ===

pub fn json_response<T: Serialize + ?Sized>(status: u16, value: &T) -> anyhow::Result<Response> {
    Ok(Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(serde_json::to_vec(value)?)
        .build())
}

pub fn html_response(status: u16, html: String) -> Response {
    Response::builder()
        .status(status)
        .header("Content-Type", "text/html; charset=utf-8")
        .body(html.into_bytes())
        .build()
}

pub fn redirect(location: &str) -> Response {
    Response::builder()
        .status(302)
        .header("Location", location)
        .body(Vec::new())
        .build()
}

pub fn redirect_with_cookie(location: &str, cookie: &str) -> Response {
    Response::builder()
        .status(302)
        .header("Location", location)
        .header("Set-Cookie", cookie)
        .body(Vec::new())
        .build()
}

pub fn session_cookie(token: &str, max_age_hours: i64) -> String {
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        crate::config::SESSION_COOKIE,
        token,
        max_age_hours * 3600
    )
}

pub fn expired_session_cookie() -> String {
    format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", crate::config::SESSION_COOKIE)
}
