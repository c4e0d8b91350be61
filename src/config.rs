pub const MAX_POST_LENGTH: usize = 280;
pub const POSTS_PER_PAGE: usize = 10;
pub const NOTIFICATIONS_PER_PAGE: usize = 20;
pub const MIN_USERNAME_LENGTH: usize = 1;
pub const MAX_USERNAME_LENGTH: usize = 150;
pub const MIN_PASSWORD_LENGTH: usize = 3;
pub const MAX_BIO_LENGTH: usize = 500;
pub const MAX_LOCATION_LENGTH: usize = 100;
pub const MAX_URL_LENGTH: usize = 200;
pub const MAX_API_KEY_NAME_LENGTH: usize = 100;
pub const PREVIEW_LENGTH: usize = 50;

pub const SESSION_COOKIE: &str = "sessionid";
pub const API_KEY_HEADER: &str = "X-API-Key";
pub const API_KEY_PREFIX: &str = "nk_";

pub const USERS_LIST_KEY: &str = "users_list";
pub const FEED_KEY: &str = "feed";
pub const HASHTAGS_LIST_KEY: &str = "hashtags_list";

pub fn user_key(id: &str) -> String {
    format!("user:{}", id)
}

pub fn username_key(username: &str) -> String {
    format!("username:{}", username)
}

pub fn post_key(id: &str) -> String {
    format!("post:{}", id)
}

pub fn replies_key(post_id: &str) -> String {
    format!("replies:{}", post_id)
}

pub fn follow_key(follower_id: &str, following_id: &str) -> String {
    format!("follow:{}:{}", follower_id, following_id)
}

pub fn followings_key(user_id: &str) -> String {
    format!("followings:{}", user_id)
}

pub fn followers_key(user_id: &str) -> String {
    format!("followers:{}", user_id)
}

pub fn notification_key(id: &str) -> String {
    format!("notification:{}", id)
}

pub fn notifications_key(user_id: &str) -> String {
    format!("notifications:{}", user_id)
}

pub fn hashtag_key(name: &str) -> String {
    format!("hashtag:{}", name)
}

pub fn token_key(token: &str) -> String {
    format!("token:{}", token)
}

pub fn sessions_key(user_id: &str) -> String {
    format!("sessions:{}", user_id)
}

pub fn api_key_key(key: &str) -> String {
    format!("apikey:{}", key)
}

pub fn api_keys_key(user_id: &str) -> String {
    format!("apikeys:{}", user_id)
}

/// Session lifetime, two weeks unless overridden.
pub fn token_expiration_hours() -> i64 {
    std::env::var("NETWORK_SESSION_EXPIRATION_HOURS")
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(24 * 14)
}

pub fn bind_address() -> String {
    std::env::var("NETWORK_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string())
}

/// JSON snapshot file for the native store. In-memory only when unset.
pub fn data_file() -> Option<std::path::PathBuf> {
    std::env::var("NETWORK_DATA_FILE")
        .ok()
        .filter(|v| !v.is_empty())
        .map(std::path::PathBuf::from)
}

pub fn seed_demo_data() -> bool {
    std::env::var("NETWORK_SEED_DEMO")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
}
