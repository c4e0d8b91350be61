use network::core::db::{get_list, KvStore, MemoryStore};
use network::config::USERS_LIST_KEY;
use network::router::route;
use serde_json::{json, Value};
use spin_sdk::http::{Method, Request, Response};

fn json_request(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Request {
    let mut builder = Request::builder();
    builder
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json")
        .header("Accept", "application/json");
    if let Some(t) = token {
        builder.header("Authorization", format!("Bearer {}", t));
    }
    let bytes = body.map(|b| b.to_string().into_bytes()).unwrap_or_default();
    builder.body(bytes).build()
}

fn form_request(uri: &str, cookie: Option<&str>, form: &str) -> Request {
    let mut builder = Request::builder();
    builder
        .method(Method::Post)
        .uri(uri)
        .header("Content-Type", "application/x-www-form-urlencoded");
    if let Some(c) = cookie {
        builder.header("Cookie", format!("sessionid={}", c));
    }
    builder.body(form.as_bytes().to_vec()).build()
}

fn page_request(uri: &str, cookie: Option<&str>) -> Request {
    let mut builder = Request::builder();
    builder.method(Method::Get).uri(uri);
    if let Some(c) = cookie {
        builder.header("Cookie", format!("sessionid={}", c));
    }
    builder.body(Vec::new()).build()
}

fn send(store: &MemoryStore, req: Request) -> Response {
    route(store, &req).expect("handler should not fail")
}

fn body_json(resp: &Response) -> Value {
    serde_json::from_slice(resp.body()).expect("Response body should be JSON")
}

fn body_text(resp: &Response) -> String {
    String::from_utf8_lossy(resp.body()).into_owned()
}

fn header(resp: &Response, name: &str) -> Option<String> {
    resp.header(name).and_then(|h| h.as_str()).map(|s| s.to_string())
}

/// Registers through the JSON API and returns the session token.
fn register(store: &MemoryStore, username: &str) -> String {
    let resp = send(store, json_request(Method::Post, "/register", None, Some(json!({
        "username": username,
        "email": format!("{}@example.com", username),
        "password": "secret",
        "confirmation": "secret",
    }))));
    assert_eq!(*resp.status(), 201, "register failed: {}", body_text(&resp));
    body_json(&resp)["token"].as_str().unwrap().to_string()
}

fn create_post(store: &MemoryStore, token: &str, content: &str) -> Value {
    let resp = send(store, json_request(Method::Post, "/create_post", Some(token), Some(json!({
        "content": content,
    }))));
    assert_eq!(*resp.status(), 201, "create_post failed: {}", body_text(&resp));
    body_json(&resp)
}

fn count_users_named(store: &MemoryStore, username: &str) -> usize {
    get_list(store, USERS_LIST_KEY)
        .unwrap()
        .iter()
        .filter_map(|id| store.get_json::<Value>(&format!("user:{}", id)).unwrap())
        .filter(|u| u["username"] == username)
        .count()
}

// === Posts ===

#[test]
fn post_over_280_chars_is_rejected() {
    let store = MemoryStore::new();
    let token = register(&store, "alice");

    let long = "x".repeat(281);
    let resp = send(&store, json_request(Method::Post, "/create_post", Some(&token), Some(json!({
        "content": long,
    }))));
    assert_eq!(*resp.status(), 400);
    assert_eq!(body_json(&resp)["error"], "Post cannot exceed 280 characters");

    let exact = "é".repeat(280);
    let post = create_post(&store, &token, &exact);
    assert_eq!(post["content"].as_str().unwrap().chars().count(), 280);
}

#[test]
fn empty_post_is_rejected_and_form_rerenders() {
    let store = MemoryStore::new();
    let token = register(&store, "alice");

    let resp = send(&store, form_request("/create_post", Some(&token), "content=+++"));
    assert_eq!(*resp.status(), 400);
    assert!(body_text(&resp).contains("Content cannot be empty"));
    assert!(get_list(&store, "feed").unwrap().is_empty());
}

#[test]
fn form_post_redirects_to_feed() {
    let store = MemoryStore::new();
    let token = register(&store, "alice");

    let resp = send(&store, form_request("/create_post", Some(&token), "content=Hello+%23World"));
    assert_eq!(*resp.status(), 302);
    assert_eq!(header(&resp, "Location").as_deref(), Some("/"));

    let page = send(&store, page_request("/", None));
    assert_eq!(*page.status(), 200);
    let html = body_text(&page);
    assert!(html.contains("Hello"));
    assert!(html.contains(r#"<a href="/hashtag/world">#World</a>"#));
}

#[test]
fn anonymous_compose_redirects_to_login() {
    let store = MemoryStore::new();
    let resp = send(&store, form_request("/create_post", None, "content=hi"));
    assert_eq!(*resp.status(), 302);
    assert_eq!(header(&resp, "Location").as_deref(), Some("/login?next=%2Fcreate_post"));
}

#[test]
fn only_author_can_edit() {
    let store = MemoryStore::new();
    let alice = register(&store, "alice");
    let bob = register(&store, "bob");
    let post = create_post(&store, &alice, "original");
    let id = post["id"].as_str().unwrap();

    let resp = send(&store, json_request(Method::Post, &format!("/edit_post/{}", id), Some(&bob), Some(json!({
        "content": "hijacked",
    }))));
    assert_eq!(*resp.status(), 403);

    let resp = send(&store, json_request(Method::Post, &format!("/edit_post/{}", id), Some(&alice), Some(json!({
        "content": "  updated #rust  ",
    }))));
    assert_eq!(*resp.status(), 200);
    let body = body_json(&resp);
    assert_eq!(body["success"], true);
    assert_eq!(body["content"], "updated #rust");

    let resp = send(&store, json_request(Method::Get, &format!("/post/{}", id), None, None));
    let body = body_json(&resp);
    assert_eq!(body["content"], "updated #rust");
    assert_eq!(body["is_edited"], true);
    assert_eq!(body["hashtags"], json!(["rust"]));
}

#[test]
fn edit_requires_post_method() {
    let store = MemoryStore::new();
    let resp = send(&store, json_request(Method::Get, "/edit_post/abc", None, None));
    assert_eq!(*resp.status(), 400);
    assert_eq!(body_json(&resp)["error"], "POST request required");
}

#[test]
fn deleting_a_post_removes_its_replies() {
    let store = MemoryStore::new();
    let alice = register(&store, "alice");
    let bob = register(&store, "bob");
    let post = create_post(&store, &alice, "parent");
    let id = post["id"].as_str().unwrap().to_string();

    let resp = send(&store, json_request(Method::Post, "/create_post", Some(&bob), Some(json!({
        "content": "a reply",
        "reply_to": id,
    }))));
    assert_eq!(*resp.status(), 201);
    let reply_id = body_json(&resp)["id"].as_str().unwrap().to_string();

    let resp = send(&store, json_request(Method::Delete, &format!("/posts/{}", id), Some(&bob), None));
    assert_eq!(*resp.status(), 403);

    let resp = send(&store, json_request(Method::Delete, &format!("/posts/{}", id), Some(&alice), None));
    assert_eq!(*resp.status(), 204);

    for gone in [&id, &reply_id] {
        let resp = send(&store, json_request(Method::Get, &format!("/post/{}", gone), None, None));
        assert_eq!(*resp.status(), 404);
    }
}

#[test]
fn viewing_a_post_counts_views_and_lists_replies() {
    let store = MemoryStore::new();
    let alice = register(&store, "alice");
    let post = create_post(&store, &alice, "parent");
    let id = post["id"].as_str().unwrap().to_string();

    send(&store, json_request(Method::Post, "/create_post", Some(&alice), Some(json!({
        "content": "first reply",
        "reply_to": id,
    }))));

    send(&store, json_request(Method::Get, &format!("/post/{}", id), None, None));
    let resp = send(&store, json_request(Method::Get, &format!("/post/{}", id), None, None));
    let body = body_json(&resp);
    assert_eq!(body["view_count"], 2);
    assert_eq!(body["replies"][0]["content"], "first reply");
}

// === Feeds and pagination ===

#[test]
fn api_feed_paginates_newest_first() {
    let store = MemoryStore::new();
    let token = register(&store, "alice");
    for i in 0..12 {
        create_post(&store, &token, &format!("post {}", i));
    }

    let resp = send(&store, json_request(Method::Get, "/api/posts", None, None));
    let body = body_json(&resp);
    assert_eq!(body["posts"].as_array().unwrap().len(), 10);
    assert_eq!(body["posts"][0]["content"], "post 11");
    assert_eq!(body["num_pages"], 2);
    assert_eq!(body["has_next"], true);

    let resp = send(&store, json_request(Method::Get, "/api/posts?page=2", None, None));
    let body = body_json(&resp);
    assert_eq!(body["posts"].as_array().unwrap().len(), 2);
    assert_eq!(body["posts"][1]["content"], "post 0");

    // Out of range falls back to the last page, garbage to the first
    let resp = send(&store, json_request(Method::Get, "/api/posts?page=99", None, None));
    assert_eq!(body_json(&resp)["page"], 2);
    let resp = send(&store, json_request(Method::Get, "/api/posts?page=abc", None, None));
    assert_eq!(body_json(&resp)["page"], 1);
}

#[test]
fn following_page_shows_only_followed_authors() {
    let store = MemoryStore::new();
    let alice = register(&store, "alice");
    let bob = register(&store, "bob");
    let carol = register(&store, "carol");
    create_post(&store, &bob, "from bob");
    create_post(&store, &carol, "from carol");

    send(&store, json_request(Method::Post, "/follow/bob", Some(&alice), None));

    let html = body_text(&send(&store, page_request("/following", Some(&alice))));
    assert!(html.contains("from bob"));
    assert!(!html.contains("from carol"));

    let resp = send(&store, page_request("/following", None));
    assert_eq!(*resp.status(), 302);
}

#[test]
fn hashtag_filter_is_case_insensitive() {
    let store = MemoryStore::new();
    let token = register(&store, "alice");
    create_post(&store, &token, "learning #Rust today");
    create_post(&store, &token, "nothing tagged");

    let resp = send(&store, json_request(Method::Get, "/api/posts?tag=RUST", None, None));
    let body = body_json(&resp);
    assert_eq!(body["total"], 1);

    let resp = send(&store, json_request(Method::Get, "/api/hashtags", None, None));
    assert_eq!(body_json(&resp), json!([{ "name": "rust", "post_count": 1 }]));
}

// === Follows ===

#[test]
fn follow_toggle_twice_restores_state() {
    let store = MemoryStore::new();
    let alice = register(&store, "alice");
    register(&store, "bob");

    let before = body_json(&send(&store, json_request(Method::Get, "/api/users/bob", None, None)));
    assert_eq!(before["follower_count"], 0);

    let resp = send(&store, json_request(Method::Post, "/follow/bob", Some(&alice), None));
    assert_eq!(body_json(&resp), json!({ "is_following": true, "follower_count": 1 }));

    let resp = send(&store, json_request(Method::Post, "/follow/bob", Some(&alice), None));
    assert_eq!(body_json(&resp), json!({ "is_following": false, "follower_count": 0 }));

    let after = body_json(&send(&store, json_request(Method::Get, "/api/users/bob", None, None)));
    assert_eq!(after["follower_count"], before["follower_count"]);
}

#[test]
fn cannot_follow_yourself() {
    let store = MemoryStore::new();
    let alice = register(&store, "alice");

    let resp = send(&store, json_request(Method::Post, "/follow/alice", Some(&alice), None));
    assert_eq!(*resp.status(), 400);
    assert_eq!(body_json(&resp)["error"], "Cannot follow yourself");
}

#[test]
fn follow_requires_login_and_known_user() {
    let store = MemoryStore::new();
    let alice = register(&store, "alice");

    let resp = send(&store, json_request(Method::Post, "/follow/alice", None, None));
    assert_eq!(*resp.status(), 401);

    let resp = send(&store, json_request(Method::Post, "/follow/nobody", Some(&alice), None));
    assert_eq!(*resp.status(), 404);
}

#[test]
fn follower_lists_and_notification_preference() {
    let store = MemoryStore::new();
    let alice = register(&store, "alice");
    register(&store, "bob");
    send(&store, json_request(Method::Post, "/follow/bob", Some(&alice), None));

    let resp = send(&store, json_request(Method::Get, "/followers/bob", None, None));
    assert_eq!(body_json(&resp), json!(["alice"]));

    let resp = send(&store, json_request(Method::Post, "/follow/bob/notifications", Some(&alice), None));
    assert_eq!(body_json(&resp)["notifications_enabled"], false);

    let resp = send(&store, json_request(Method::Get, "/followings/alice", None, None));
    let body = body_json(&resp);
    assert_eq!(body[0]["username"], "bob");
    assert_eq!(body[0]["notifications_enabled"], false);
}

// === Likes and notifications ===

#[test]
fn likes_toggle_and_notify_the_author() {
    let store = MemoryStore::new();
    let alice = register(&store, "alice");
    let bob = register(&store, "bob");
    let post = create_post(&store, &alice, "like me");
    let id = post["id"].as_str().unwrap();

    let resp = send(&store, json_request(Method::Post, &format!("/like/{}", id), Some(&bob), None));
    assert_eq!(body_json(&resp), json!({ "is_liked": true, "like_count": 1 }));

    let resp = send(&store, json_request(Method::Get, "/api/notifications", Some(&alice), None));
    let body = body_json(&resp);
    assert_eq!(body["unread_count"], 1);
    assert_eq!(body["notifications"][0]["kind"], "like");
    assert_eq!(body["notifications"][0]["actor"], "bob");

    let resp = send(&store, json_request(Method::Post, &format!("/like/{}", id), Some(&bob), None));
    assert_eq!(body_json(&resp), json!({ "is_liked": false, "like_count": 0 }));

    let resp = send(&store, json_request(Method::Post, "/api/notifications/read", Some(&alice), None));
    assert_eq!(body_json(&resp)["marked"], 1);
    let resp = send(&store, json_request(Method::Get, "/api/notifications?unread=true", Some(&alice), None));
    assert!(body_json(&resp)["notifications"].as_array().unwrap().is_empty());
}

#[test]
fn mentions_and_replies_notify() {
    let store = MemoryStore::new();
    let alice = register(&store, "alice");
    let bob = register(&store, "bob");
    let post = create_post(&store, &alice, "hello @bob");
    let id = post["id"].as_str().unwrap();

    send(&store, json_request(Method::Post, "/create_post", Some(&bob), Some(json!({
        "content": "hi back",
        "reply_to": id,
    }))));

    let bob_inbox = body_json(&send(&store, json_request(Method::Get, "/api/notifications", Some(&bob), None)));
    assert_eq!(bob_inbox["notifications"][0]["kind"], "mention");

    let alice_inbox = body_json(&send(&store, json_request(Method::Get, "/api/notifications", Some(&alice), None)));
    let note = &alice_inbox["notifications"][0];
    assert_eq!(note["kind"], "reply");
    let note_id = note["id"].as_str().unwrap();

    let resp = send(&store, json_request(Method::Post, &format!("/api/notifications/{}/read", note_id), Some(&bob), None));
    assert_eq!(*resp.status(), 404);
    let resp = send(&store, json_request(Method::Post, &format!("/api/notifications/{}/read", note_id), Some(&alice), None));
    assert_eq!(body_json(&resp)["unread_count"], 0);
}

// === Accounts ===

#[test]
fn password_mismatch_creates_no_user() {
    let store = MemoryStore::new();

    let resp = send(&store, form_request("/register", None, "username=dave&email=d%40x.io&password=abc&confirmation=abd"));
    assert_eq!(*resp.status(), 400);
    assert!(body_text(&resp).contains("Passwords must match."));
    assert_eq!(count_users_named(&store, "dave"), 0);
    assert!(!store.exists("username:dave").unwrap());
}

#[test]
fn duplicate_username_is_rejected() {
    let store = MemoryStore::new();
    register(&store, "erin");

    let resp = send(&store, json_request(Method::Post, "/register", None, Some(json!({
        "username": "erin",
        "email": "other@example.com",
        "password": "secret",
        "confirmation": "secret",
    }))));
    assert_eq!(*resp.status(), 409);
    assert_eq!(body_json(&resp)["error"], "Username already taken.");
    assert_eq!(count_users_named(&store, "erin"), 1);
}

#[test]
fn form_login_sets_cookie_and_logout_clears_it() {
    let store = MemoryStore::new();
    register(&store, "alice");

    let resp = send(&store, form_request("/login", None, "username=alice&password=wrong"));
    assert_eq!(*resp.status(), 401);
    assert!(body_text(&resp).contains("Invalid username and/or password."));

    let resp = send(&store, form_request("/login", None, "username=alice&password=secret&next=%2Ffollowing"));
    assert_eq!(*resp.status(), 302);
    assert_eq!(header(&resp, "Location").as_deref(), Some("/following"));
    let cookie = header(&resp, "Set-Cookie").unwrap();
    let token = cookie
        .trim_start_matches("sessionid=")
        .split(';')
        .next()
        .unwrap()
        .to_string();

    let resp = send(&store, page_request("/following", Some(&token)));
    assert_eq!(*resp.status(), 200);

    let resp = send(&store, page_request("/logout", Some(&token)));
    assert_eq!(*resp.status(), 302);
    let resp = send(&store, page_request("/following", Some(&token)));
    assert_eq!(*resp.status(), 302);
}

#[test]
fn profile_update_and_account_deletion() {
    let store = MemoryStore::new();
    let alice = register(&store, "alice");
    let bob = register(&store, "bob");
    create_post(&store, &alice, "soon gone");
    send(&store, json_request(Method::Post, "/follow/alice", Some(&bob), None));

    let resp = send(&store, json_request(Method::Put, "/api/profile", Some(&alice), Some(json!({
        "bio": "Rustacean",
        "website": "https://example.com",
    }))));
    assert_eq!(*resp.status(), 200);
    assert_eq!(body_json(&resp)["bio"], "Rustacean");

    let html = body_text(&send(&store, page_request("/profile/alice", None)));
    assert!(html.contains("Rustacean"));

    let resp = send(&store, json_request(Method::Delete, "/api/profile", Some(&alice), Some(json!({
        "password": "nope",
    }))));
    assert_eq!(*resp.status(), 403);

    let resp = send(&store, json_request(Method::Delete, "/api/profile", Some(&alice), Some(json!({
        "password": "secret",
    }))));
    assert_eq!(*resp.status(), 204);

    assert_eq!(*send(&store, page_request("/profile/alice", None)).status(), 404);
    let feed = body_json(&send(&store, json_request(Method::Get, "/api/posts", None, None)));
    assert_eq!(feed["total"], 0);
    let bob_profile = body_json(&send(&store, json_request(Method::Get, "/api/profile", Some(&bob), None)));
    assert_eq!(bob_profile["following_count"], 0);
    assert_eq!(*send(&store, json_request(Method::Get, "/api/profile", Some(&alice), None)).status(), 401);
}

#[test]
fn api_keys_authenticate_requests() {
    let store = MemoryStore::new();
    let alice = register(&store, "alice");

    let resp = send(&store, json_request(Method::Post, "/api/keys", Some(&alice), Some(json!({ "name": "ci" }))));
    assert_eq!(*resp.status(), 201);
    let key = body_json(&resp)["key"].as_str().unwrap().to_string();

    let mut builder = Request::builder();
    builder
        .method(Method::Get)
        .uri("/api/profile")
        .header("X-API-Key", key.as_str());
    let resp = send(&store, builder.body(Vec::new()).build());
    assert_eq!(body_json(&resp)["username"], "alice");

    let resp = send(&store, json_request(Method::Delete, &format!("/api/keys/{}", key), Some(&alice), None));
    assert_eq!(*resp.status(), 204);
    let resp = send(&store, json_request(Method::Get, "/api/keys", Some(&alice), None));
    assert_eq!(body_json(&resp), json!([]));
}

// === Misc ===

#[test]
fn unknown_routes_and_assets() {
    let store = MemoryStore::new();

    let resp = send(&store, page_request("/nowhere/at/all", None));
    assert_eq!(*resp.status(), 404);

    let resp = send(&store, page_request("/static/styles.css", None));
    assert_eq!(*resp.status(), 200);
    assert!(header(&resp, "Content-Type").unwrap().starts_with("text/css"));

    let resp = send(&store, page_request("/static/missing.js", None));
    assert_eq!(*resp.status(), 404);
}

#[test]
fn sessions_are_listed_and_revoked_on_password_change() {
    let store = MemoryStore::new();
    let first = register(&store, "alice");

    let resp = send(&store, json_request(Method::Post, "/login", None, Some(json!({
        "username": "alice",
        "password": "secret",
    }))));
    assert_eq!(*resp.status(), 200);
    let second = body_json(&resp)["token"].as_str().unwrap().to_string();

    let sessions = body_json(&send(&store, json_request(Method::Get, "/api/sessions", Some(&second), None)));
    let sessions = sessions.as_array().unwrap();
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions.iter().filter(|s| s["current"] == true).count(), 1);

    let resp = send(&store, json_request(Method::Put, "/api/profile", Some(&second), Some(json!({
        "old_password": "secret",
        "new_password": "changed",
    }))));
    assert_eq!(*resp.status(), 200);
    let fresh = body_json(&resp)["token"].as_str().unwrap().to_string();

    for old in [&first, &second] {
        let resp = send(&store, json_request(Method::Get, "/api/sessions", Some(old), None));
        assert_eq!(*resp.status(), 401);
    }
    let sessions = body_json(&send(&store, json_request(Method::Get, "/api/sessions", Some(&fresh), None)));
    assert_eq!(sessions.as_array().unwrap().len(), 1);
}

#[test]
fn usernames_with_symbols_route_after_decoding() {
    let store = MemoryStore::new();
    let alice = register(&store, "alice");
    register(&store, "a@b");

    let resp = send(&store, json_request(Method::Post, "/follow/a%40b", Some(&alice), None));
    assert_eq!(*resp.status(), 200);
    assert_eq!(body_json(&resp), json!({ "is_following": true, "follower_count": 1 }));

    let resp = send(&store, page_request("/profile/a%40b", None));
    assert_eq!(*resp.status(), 200);
    assert!(body_text(&resp).contains("a@b"));

    let resp = send(&store, json_request(Method::Get, "/api/users/a%40b", None, None));
    assert_eq!(body_json(&resp)["follower_count"], 1);
}

#[test]
fn encoded_hashtag_paths_resolve() {
    let store = MemoryStore::new();
    let alice = register(&store, "alice");
    create_post(&store, &alice, "coffee at the #café");

    let resp = send(&store, page_request("/hashtag/caf%C3%A9", None));
    assert_eq!(*resp.status(), 200);
    assert!(body_text(&resp).contains("coffee at the"));
}

#[test]
fn login_ignores_backslash_next() {
    let store = MemoryStore::new();
    register(&store, "alice");

    let resp = send(&store, form_request("/login", None, "username=alice&password=secret&next=%2F%5Cevil.example"));
    assert_eq!(*resp.status(), 302);
    assert_eq!(header(&resp, "Location").as_deref(), Some("/"));

    let resp = send(&store, form_request("/login", None, "username=alice&password=secret&next=%2F%2Fevil.example"));
    assert_eq!(header(&resp, "Location").as_deref(), Some("/"));
}

#[test]
fn edit_accepts_json_without_content_type() {
    let store = MemoryStore::new();
    let alice = register(&store, "alice");
    let post = create_post(&store, &alice, "before");
    let id = post["id"].as_str().unwrap();

    let mut builder = Request::builder();
    builder
        .method(Method::Post)
        .uri(format!("/edit_post/{}", id))
        .header("Authorization", format!("Bearer {}", alice));
    let req = builder.body(br#"{"content":"new text"}"#.to_vec()).build();

    let resp = send(&store, req);
    assert_eq!(*resp.status(), 200, "edit failed: {}", body_text(&resp));
    assert_eq!(body_json(&resp)["content"], "new text");
}

#[test]
fn expired_sessions_are_rejected_and_removed() {
    let store = MemoryStore::new();
    let alice = register(&store, "alice");
    let key = format!("token:{}", alice);

    let mut session: Value = store.get_json(&key).unwrap().unwrap();
    session["created_at"] = json!("2000-01-01T00:00:00.000000Z");
    store.set_json(&key, &session).unwrap();

    let resp = send(&store, json_request(Method::Get, "/api/profile", Some(&alice), None));
    assert_eq!(*resp.status(), 401);
    assert!(!store.exists(&key).unwrap());
}
