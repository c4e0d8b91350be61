use spin_sdk::http::Response;
use regex::Regex;
use std::sync::OnceLock;
use crate::models::models::{HashTag, Post};
use crate::core::db::{get_list, push_back, remove_from_list, KvStore};
use crate::core::helpers::{json_response, now_iso};
use crate::config::*;

fn hashtag_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"(?:^|[^\w&#])#(\w+)").expect("Regex should compile"))
}

/// Lowercased `#tag` names, deduplicated, in order of first appearance.
pub fn extract_hashtags(content: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for caps in hashtag_regex().captures_iter(content) {
        let tag = caps[1].to_lowercase();
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    tags
}

pub fn get_hashtag(store: &impl KvStore, name: &str) -> anyhow::Result<Option<HashTag>> {
    store.get_json(&hashtag_key(&name.to_lowercase()))
}

/// Adds the post to the index of each of its tags.
pub fn index_post(store: &impl KvStore, post: &Post) -> anyhow::Result<()> {
    for name in &post.hashtags {
        let key = hashtag_key(name);
        let mut tag = store.get_json::<HashTag>(&key)?.unwrap_or_else(|| HashTag {
            name: name.clone(),
            post_ids: Vec::new(),
            created_at: now_iso(),
        });
        if !tag.post_ids.contains(&post.id) {
            tag.post_ids.insert(0, post.id.clone());
        }
        store.set_json(&key, &tag)?;
        push_back(store, HASHTAGS_LIST_KEY, name)?;
    }
    Ok(())
}

/// Drops the post from the given tags; tags left without posts are deleted.
pub fn unindex_post(store: &impl KvStore, post_id: &str, tags: &[String]) -> anyhow::Result<()> {
    for name in tags {
        let key = hashtag_key(name);
        let Some(mut tag) = store.get_json::<HashTag>(&key)? else {
            continue;
        };
        tag.post_ids.retain(|id| id != post_id);
        if tag.post_ids.is_empty() {
            store.delete(&key)?;
            remove_from_list(store, HASHTAGS_LIST_KEY, name)?;
        } else {
            store.set_json(&key, &tag)?;
        }
    }
    Ok(())
}

/// `GET /api/hashtags`: tags by post count, most used first.
pub fn list_hashtags(store: &impl KvStore) -> anyhow::Result<Response> {
    let mut tags = Vec::new();
    for name in get_list(store, HASHTAGS_LIST_KEY)? {
        if let Some(tag) = get_hashtag(store, &name)? {
            tags.push((tag.name, tag.post_ids.len()));
        }
    }
    tags.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let body: Vec<serde_json::Value> = tags
        .into_iter()
        .map(|(name, count)| serde_json::json!({ "name": name, "post_count": count }))
        .collect();
    json_response(200, &body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::MemoryStore;

    #[test]
    fn tags_are_lowercased_and_deduplicated() {
        assert_eq!(
            extract_hashtags("#Rust is fun. #rust #web_dev, but not a#b or ##x"),
            vec!["rust", "web_dev"]
        );
    }

    #[test]
    fn empty_tags_are_dropped_from_the_index() {
        let store = MemoryStore::new();
        let post = Post {
            id: "p1".to_string(),
            user_id: "u1".to_string(),
            content: "#one #two".to_string(),
            created_at: now_iso(),
            updated_at: None,
            reply_to: None,
            image_url: None,
            likes: Vec::new(),
            hashtags: vec!["one".to_string(), "two".to_string()],
            is_pinned: false,
            is_edited: false,
            view_count: 0,
            share_count: 0,
        };
        index_post(&store, &post).unwrap();
        assert_eq!(get_hashtag(&store, "ONE").unwrap().unwrap().post_ids, vec!["p1"]);

        unindex_post(&store, "p1", &["one".to_string()]).unwrap();
        assert!(get_hashtag(&store, "one").unwrap().is_none());
        assert_eq!(get_list(&store, HASHTAGS_LIST_KEY).unwrap(), vec!["two"]);
    }
}
