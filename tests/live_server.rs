//! Smoke test against a running server:
//! `NETWORK_SEED_DEMO=true cargo run` then `cargo test -- --ignored`.

use serde_json::json;

const BASE_URL: &str = "http://127.0.0.1:8000";

#[ignore]
#[tokio::test]
async fn test_full_user_flow() {
    let client = reqwest::Client::new();

    // 1. Register
    let username = format!("flow_{}", &uuid::Uuid::new_v4().simple().to_string()[..12]);
    let register_resp = client
        .post(&format!("{}/register", BASE_URL))
        .json(&json!({
            "username": username,
            "email": format!("{}@example.com", username),
            "password": "test",
            "confirmation": "test"
        }))
        .send()
        .await
        .expect("Failed to register");

    assert_eq!(register_resp.status(), 201);
    let user = register_resp.json::<serde_json::Value>().await.unwrap();
    let token = user["token"].as_str().expect("Token missing").to_string();

    // 2. Create post
    let post_resp = client
        .post(&format!("{}/create_post", BASE_URL))
        .header("Authorization", format!("Bearer {}", token))
        .json(&json!({ "content": "Hello from the smoke test #smoke" }))
        .send()
        .await
        .expect("Failed to create post");

    assert_eq!(post_resp.status(), 201);
    let post = post_resp.json::<serde_json::Value>().await.unwrap();
    assert_eq!(post["author"], username.as_str());
    let post_id = post["id"].as_str().unwrap().to_string();

    // 3. Edit post
    let edit_resp = client
        .post(&format!("{}/edit_post/{}", BASE_URL, post_id))
        .header("Authorization", format!("Bearer {}", token))
        .json(&json!({ "content": "Edited by the smoke test" }))
        .send()
        .await
        .expect("Failed to edit post");

    assert_eq!(edit_resp.status(), 200);
    let edited = edit_resp.json::<serde_json::Value>().await.unwrap();
    assert_eq!(edited["content"], "Edited by the smoke test");

    // 4. Follow the demo user twice
    for expected in [true, false] {
        let follow_resp = client
            .post(&format!("{}/follow/bob", BASE_URL))
            .header("Authorization", format!("Bearer {}", token))
            .send()
            .await
            .expect("Failed to toggle follow");
        assert_eq!(follow_resp.status(), 200);
        let body = follow_resp.json::<serde_json::Value>().await.unwrap();
        assert_eq!(body["is_following"], expected);
    }

    // 5. Like own post
    let like_resp = client
        .post(&format!("{}/like/{}", BASE_URL, post_id))
        .header("Authorization", format!("Bearer {}", token))
        .send()
        .await
        .expect("Failed to like post");
    assert_eq!(like_resp.json::<serde_json::Value>().await.unwrap()["like_count"], 1);

    // 6. Delete post
    let delete_resp = client
        .delete(&format!("{}/posts/{}", BASE_URL, post_id))
        .header("Authorization", format!("Bearer {}", token))
        .send()
        .await
        .expect("Failed to delete post");
    assert_eq!(delete_resp.status(), 204);

    // 7. Logout
    let logout_resp = client
        .get(&format!("{}/logout", BASE_URL))
        .header("Authorization", format!("Bearer {}", token))
        .header("Accept", "application/json")
        .send()
        .await
        .expect("Failed to logout");
    assert_eq!(logout_resp.status(), 200);

    let profile_resp = client
        .get(&format!("{}/api/profile", BASE_URL))
        .header("Authorization", format!("Bearer {}", token))
        .send()
        .await
        .unwrap();
    assert_eq!(profile_resp.status(), 401);
}
