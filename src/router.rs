use spin_sdk::http::{Request, Response};
use crate::core::db::KvStore;
use crate::core::errors::ApiError;
use crate::core::helpers::method_name;
use crate::core::static_server::serve_static;
use crate::{api_keys, auth, follow, hashtags, likes, notifications, posts, templates, users};

/// Paths whose handlers only accept `POST`.
fn post_only(segments: &[&str]) -> bool {
    matches!(
        segments,
        ["create_post"]
            | ["follow", _]
            | ["follow", _, "notifications"]
            | ["like", _]
            | ["edit_post", _]
            | ["pin", _]
            | ["share", _]
            | ["delete_post", _]
            | ["api", "notifications", "read"]
            | ["api", "notifications", _, "read"]
    )
}

/// Dispatches a request to its handler.
pub fn route(store: &impl KvStore, req: &Request) -> anyhow::Result<Response> {
    let path = req.path().to_string();
    if path.starts_with("/static/") {
        return serve_static(&path);
    }

    let decoded: Vec<String> = path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| urlencoding::decode(s).map(|d| d.into_owned()).unwrap_or_else(|_| s.to_string()))
        .collect();
    let segments: Vec<&str> = decoded.iter().map(String::as_str).collect();

    match (method_name(req), segments.as_slice()) {
        ("GET", []) => templates::index_page(store, req),
        ("GET", ["following"]) => templates::following_page(store, req),
        ("GET", ["profile", username]) => templates::profile_page(store, req, username),
        ("GET", ["post", id]) => templates::post_page(store, req, id),
        ("GET", ["hashtag", name]) => templates::hashtag_page(store, req, name),

        ("POST", ["create_post"]) => posts::create_post(store, req),
        ("POST", ["edit_post", id]) => posts::edit_post(store, req, id),
        ("POST", ["pin", id]) => posts::toggle_pin(store, req, id),
        ("POST", ["share", id]) => posts::share_post(store, req, id),
        ("POST", ["delete_post", id]) | ("DELETE", ["posts", id]) => posts::delete_post(store, req, id),
        ("POST", ["like", id]) => likes::toggle_like(store, req, id),

        ("POST", ["follow", username]) => follow::toggle_follow(store, req, username),
        ("POST", ["follow", username, "notifications"]) => {
            follow::toggle_follow_notifications(store, req, username)
        }
        ("GET", ["followers", username]) => follow::get_followers_list(store, username),
        ("GET", ["followings", username]) => follow::get_followings_list(store, username),

        ("GET" | "POST", ["login"]) => auth::login_view(store, req),
        ("GET", ["logout"]) => auth::logout_view(store, req),
        ("GET" | "POST", ["register"]) => auth::register_view(store, req),

        ("GET", ["api", "posts"]) => posts::list_posts(store, req),
        ("GET", ["api", "hashtags"]) => hashtags::list_hashtags(store),
        ("GET", ["api", "profile"]) => users::get_profile(store, req),
        ("PUT", ["api", "profile"]) => users::update_profile(store, req),
        ("DELETE", ["api", "profile"]) => users::delete_account(store, req),
        ("GET", ["api", "users", username]) => users::get_user_details(store, username),
        ("GET", ["api", "notifications"]) => notifications::list_notifications(store, req),
        ("POST", ["api", "notifications", "read"]) => notifications::mark_all_read(store, req),
        ("POST", ["api", "notifications", id, "read"]) => notifications::mark_read(store, req, id),
        ("GET", ["api", "sessions"]) => auth::list_sessions(store, req),
        ("GET", ["api", "keys"]) => api_keys::list_keys(store, req),
        ("POST", ["api", "keys"]) => api_keys::create_key(store, req),
        ("DELETE", ["api", "keys", key]) => api_keys::revoke_key(store, req, key),

        (_, segs) if post_only(segs) => {
            Ok(ApiError::BadRequest("POST request required".to_string()).into())
        }
        _ => Ok(ApiError::NotFound("No route found".to_string()).into()),
    }
}

/// [`route`], with handler failures logged and turned into a 500.
pub fn handle(store: &impl KvStore, req: &Request) -> Response {
    match route(store, req) {
        Ok(resp) => resp,
        Err(err) => {
            log::error!("{} {} failed: {:#}", method_name(req), req.path(), err);
            ApiError::InternalError("Internal server error".to_string()).into()
        }
    }
}
