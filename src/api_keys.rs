use spin_sdk::http::{Request, Response};
use crate::models::models::ApiKey;
use crate::core::db::{get_list, push_back, remove_from_list, KvStore};
use crate::core::errors::ApiError;
use crate::core::helpers::{body_fields, field, json_response, now_iso, random_token};
use crate::auth::validate_token;
use crate::config::*;

fn mask(key: &str) -> String {
    let tail: String = key.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
    format!("{}...{}", API_KEY_PREFIX, tail)
}

/// Issues a new key for `user_id`. Keys are unique across all users.
pub fn issue_key(store: &impl KvStore, user_id: &str, name: &str) -> Result<ApiKey, ApiError> {
    if name.is_empty() {
        return Err(ApiError::BadRequest("Key name is required".to_string()));
    }
    if name.chars().count() > MAX_API_KEY_NAME_LENGTH {
        return Err(ApiError::BadRequest(format!(
            "Key name too long (max {} chars)",
            MAX_API_KEY_NAME_LENGTH
        )));
    }

    let key = loop {
        let candidate = format!("{}{}", API_KEY_PREFIX, random_token(40));
        if !store.exists(&api_key_key(&candidate))? {
            break candidate;
        }
    };

    let api_key = ApiKey {
        key,
        user_id: user_id.to_string(),
        name: name.to_string(),
        created_at: now_iso(),
        last_used: None,
        is_active: true,
    };
    store.set_json(&api_key_key(&api_key.key), &api_key)?;
    push_back(store, &api_keys_key(user_id), &api_key.key)?;
    Ok(api_key)
}

/// Owner of an active key, refreshing its `last_used` stamp.
pub fn authenticate_key(store: &impl KvStore, key: &str) -> anyhow::Result<Option<String>> {
    let storage_key = api_key_key(key);
    let Some(mut api_key) = store.get_json::<ApiKey>(&storage_key)? else {
        return Ok(None);
    };
    if !api_key.is_active || !store.exists(&user_key(&api_key.user_id))? {
        return Ok(None);
    }
    api_key.last_used = Some(now_iso());
    store.set_json(&storage_key, &api_key)?;
    Ok(Some(api_key.user_id))
}

pub fn revoke_all(store: &impl KvStore, user_id: &str) -> anyhow::Result<()> {
    for key in get_list(store, &api_keys_key(user_id))? {
        store.delete(&api_key_key(&key))?;
    }
    store.delete(&api_keys_key(user_id))
}

// === HTTP Handlers ===

/// `POST /api/keys` with `{"name": ...}`. The full key is only shown here.
pub fn create_key(store: &impl KvStore, req: &Request) -> anyhow::Result<Response> {
    let user_id = match validate_token(store, req) {
        Some(uid) => uid,
        None => return Ok(ApiError::Unauthorized.into()),
    };
    let fields = match body_fields(req) {
        Ok(f) => f,
        Err(e) => return Ok(e.into()),
    };

    match issue_key(store, &user_id, field(&fields, "name").unwrap_or_default()) {
        Ok(api_key) => json_response(201, &serde_json::json!({
            "key": api_key.key,
            "name": api_key.name,
            "created_at": api_key.created_at,
        })),
        Err(ApiError::InternalError(msg)) => Err(anyhow::anyhow!(msg)),
        Err(e) => Ok(e.into()),
    }
}

/// `GET /api/keys`
pub fn list_keys(store: &impl KvStore, req: &Request) -> anyhow::Result<Response> {
    let user_id = match validate_token(store, req) {
        Some(uid) => uid,
        None => return Ok(ApiError::Unauthorized.into()),
    };

    let mut keys = Vec::new();
    for key in get_list(store, &api_keys_key(&user_id))? {
        if let Some(k) = store.get_json::<ApiKey>(&api_key_key(&key))? {
            keys.push(serde_json::json!({
                "key": mask(&k.key),
                "name": k.name,
                "created_at": k.created_at,
                "last_used": k.last_used,
                "is_active": k.is_active,
            }));
        }
    }
    json_response(200, &keys)
}

/// `DELETE /api/keys/{key}`: owner only; other users' keys look missing.
pub fn revoke_key(store: &impl KvStore, req: &Request, key: &str) -> anyhow::Result<Response> {
    let user_id = match validate_token(store, req) {
        Some(uid) => uid,
        None => return Ok(ApiError::Unauthorized.into()),
    };

    match store.get_json::<ApiKey>(&api_key_key(key))? {
        Some(k) if k.user_id == user_id => {
            store.delete(&api_key_key(key))?;
            remove_from_list(store, &api_keys_key(&user_id), key)?;
            Ok(Response::builder().status(204).body(Vec::new()).build())
        }
        _ => Ok(ApiError::NotFound("API key not found".to_string()).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::MemoryStore;

    #[test]
    fn keys_authenticate_their_owner_until_revoked() {
        let store = MemoryStore::new();
        store.set_json(&user_key("u1"), &serde_json::json!({})).unwrap();

        let issued = issue_key(&store, "u1", "ci").unwrap();
        assert!(issued.key.starts_with(API_KEY_PREFIX));
        assert_eq!(issued.key.len(), API_KEY_PREFIX.len() + 40);

        assert_eq!(authenticate_key(&store, &issued.key).unwrap().as_deref(), Some("u1"));
        let stored: ApiKey = store.get_json(&api_key_key(&issued.key)).unwrap().unwrap();
        assert!(stored.last_used.is_some());

        revoke_all(&store, "u1").unwrap();
        assert_eq!(authenticate_key(&store, &issued.key).unwrap(), None);
    }

    #[test]
    fn names_are_required() {
        let store = MemoryStore::new();
        assert!(matches!(issue_key(&store, "u1", ""), Err(ApiError::BadRequest(_))));
        assert_eq!(mask("nk_abcdefgh"), "nk_...efgh");
    }
}
