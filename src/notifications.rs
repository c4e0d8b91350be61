use spin_sdk::http::{Request, Response};
use regex::Regex;
use std::sync::OnceLock;
use uuid::Uuid;
use crate::models::models::{Notification, NotificationKind, Post, User};
use crate::core::db::{get_list, push_front, remove_from_list, KvStore};
use crate::core::errors::ApiError;
use crate::core::helpers::{json_response, now_iso};
use crate::core::pagination::paginate;
use crate::core::query_params::{get_bool_flag, parse_query_params};
use crate::auth::validate_token;
use crate::users::{find_by_username, username_of};
use crate::config::*;

fn mention_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"(?:^|[^\w@])@([\w.+-]*\w)").expect("Regex should compile"))
}

/// Usernames mentioned as `@name`, in order of first appearance.
pub fn extract_mentions(content: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in mention_regex().captures_iter(content) {
        let name = caps[1].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Records a notification for `recipient_id`. Nothing is recorded when
/// users act on their own content.
pub fn notify(
    store: &impl KvStore,
    recipient_id: &str,
    actor_id: &str,
    kind: NotificationKind,
    post_id: Option<&str>,
    message: String,
) -> anyhow::Result<Option<Notification>> {
    if recipient_id == actor_id {
        return Ok(None);
    }

    let notification = Notification {
        id: Uuid::new_v4().to_string(),
        recipient_id: recipient_id.to_string(),
        actor_id: actor_id.to_string(),
        kind,
        post_id: post_id.map(|p| p.to_string()),
        message,
        is_read: false,
        created_at: now_iso(),
    };

    store.set_json(&notification_key(&notification.id), &notification)?;
    push_front(store, &notifications_key(recipient_id), &notification.id)?;
    Ok(Some(notification))
}

/// Notifies every existing user mentioned in `post`, except `skip`.
pub fn notify_mentions(store: &impl KvStore, actor: &User, post: &Post, skip: Option<&str>) -> anyhow::Result<usize> {
    let mut sent = 0;
    for name in extract_mentions(&post.content) {
        let Some(mentioned) = find_by_username(store, &name)? else {
            continue;
        };
        if Some(mentioned.id.as_str()) == skip {
            continue;
        }
        let message = format!("{} mentioned you: {}", actor.username, post.preview());
        if notify(store, &mentioned.id, &actor.id, NotificationKind::Mention, Some(&post.id), message)?.is_some() {
            sent += 1;
        }
    }
    Ok(sent)
}

pub fn notifications_for(store: &impl KvStore, user_id: &str) -> anyhow::Result<Vec<Notification>> {
    let mut notifications = Vec::new();
    for id in get_list(store, &notifications_key(user_id))? {
        if let Some(n) = store.get_json::<Notification>(&notification_key(&id))? {
            notifications.push(n);
        }
    }
    notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(notifications)
}

pub fn unread_count(store: &impl KvStore, user_id: &str) -> anyhow::Result<usize> {
    Ok(notifications_for(store, user_id)?.iter().filter(|n| !n.is_read).count())
}

pub fn delete_all_for(store: &impl KvStore, user_id: &str) -> anyhow::Result<()> {
    for id in get_list(store, &notifications_key(user_id))? {
        store.delete(&notification_key(&id))?;
    }
    store.delete(&notifications_key(user_id))
}

/// Deletes every stored notification matching `pred`, across all users.
pub fn purge_where(store: &impl KvStore, pred: impl Fn(&Notification) -> bool) -> anyhow::Result<usize> {
    let mut removed = 0;
    for user_id in get_list(store, USERS_LIST_KEY)? {
        let list_key = notifications_key(&user_id);
        for id in get_list(store, &list_key)? {
            let key = notification_key(&id);
            match store.get_json::<Notification>(&key)? {
                Some(n) if pred(&n) => {
                    store.delete(&key)?;
                    remove_from_list(store, &list_key, &id)?;
                    removed += 1;
                }
                Some(_) => {}
                None => {
                    remove_from_list(store, &list_key, &id)?;
                }
            }
        }
    }
    Ok(removed)
}

// === HTTP Handlers ===

/// `GET /api/notifications?unread=true&page=N`
pub fn list_notifications(store: &impl KvStore, req: &Request) -> anyhow::Result<Response> {
    let user_id = match validate_token(store, req) {
        Some(uid) => uid,
        None => return Ok(ApiError::Unauthorized.into()),
    };

    let params = parse_query_params(req.uri());
    let all = notifications_for(store, &user_id)?;
    let unread = all.iter().filter(|n| !n.is_read).count();
    let selected: Vec<Notification> = if get_bool_flag(&params, "unread") {
        all.into_iter().filter(|n| !n.is_read).collect()
    } else {
        all
    };

    let page = paginate(selected, params.get("page").map(String::as_str), NOTIFICATIONS_PER_PAGE);
    let mut items = Vec::with_capacity(page.items.len());
    for n in &page.items {
        items.push(serde_json::json!({
            "id": n.id,
            "kind": n.kind,
            "actor": username_of(store, &n.actor_id)?,
            "post_id": n.post_id,
            "message": n.message,
            "is_read": n.is_read,
            "created_at": n.created_at,
        }));
    }

    json_response(200, &serde_json::json!({
        "notifications": items,
        "unread_count": unread,
        "page": page.number,
        "num_pages": page.num_pages,
        "has_next": page.has_next(),
        "has_previous": page.has_previous(),
    }))
}

/// `POST /api/notifications/{id}/read`
pub fn mark_read(store: &impl KvStore, req: &Request, notification_id: &str) -> anyhow::Result<Response> {
    let user_id = match validate_token(store, req) {
        Some(uid) => uid,
        None => return Ok(ApiError::Unauthorized.into()),
    };

    let key = notification_key(notification_id);
    let mut notification = match store.get_json::<Notification>(&key)? {
        Some(n) if n.recipient_id == user_id => n,
        _ => return Ok(ApiError::NotFound("Notification not found".to_string()).into()),
    };

    if !notification.is_read {
        notification.is_read = true;
        store.set_json(&key, &notification)?;
    }

    json_response(200, &serde_json::json!({
        "success": true,
        "unread_count": unread_count(store, &user_id)?,
    }))
}

/// `POST /api/notifications/read`
pub fn mark_all_read(store: &impl KvStore, req: &Request) -> anyhow::Result<Response> {
    let user_id = match validate_token(store, req) {
        Some(uid) => uid,
        None => return Ok(ApiError::Unauthorized.into()),
    };

    let mut marked = 0;
    for mut n in notifications_for(store, &user_id)? {
        if !n.is_read {
            n.is_read = true;
            store.set_json(&notification_key(&n.id), &n)?;
            marked += 1;
        }
    }

    json_response(200, &serde_json::json!({
        "success": true,
        "marked": marked,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::MemoryStore;

    #[test]
    fn mentions_skip_emails_and_duplicates() {
        assert_eq!(
            extract_mentions("@alice hi @bob, mail me at carl@example.com or ping @alice"),
            vec!["alice", "bob"]
        );
        assert!(extract_mentions("no mentions here").is_empty());
    }

    #[test]
    fn mentions_keep_dotted_usernames() {
        assert_eq!(
            extract_mentions("thanks @john.doe. and @a-b+c!"),
            vec!["john.doe", "a-b+c"]
        );
    }

    #[test]
    fn self_notifications_are_dropped() {
        let store = MemoryStore::new();
        let sent = notify(&store, "u1", "u1", NotificationKind::Like, None, "x".to_string()).unwrap();
        assert!(sent.is_none());
        assert!(notifications_for(&store, "u1").unwrap().is_empty());
    }

    #[test]
    fn newest_notification_first() {
        let store = MemoryStore::new();
        notify(&store, "u1", "u2", NotificationKind::Follow, None, "first".to_string()).unwrap();
        notify(&store, "u1", "u3", NotificationKind::Like, Some("p1"), "second".to_string()).unwrap();

        let list = notifications_for(&store, "u1").unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].message, "second");
        assert_eq!(list[0].kind, NotificationKind::Like);
        assert_eq!(unread_count(&store, "u1").unwrap(), 2);

        delete_all_for(&store, "u1").unwrap();
        assert!(notifications_for(&store, "u1").unwrap().is_empty());
    }
}
