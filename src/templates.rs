use spin_sdk::http::{Request, Response};
use html_escape::{encode_double_quoted_attribute, encode_text};
use regex::Regex;
use std::sync::OnceLock;
use crate::models::models::{Post, User};
use crate::core::db::KvStore;
use crate::core::errors::ApiError;
use crate::core::helpers::{html_response, json_response, validate_uuid, wants_json};
use crate::core::pagination::{paginate, Page};
use crate::core::query_params::parse_query_params;
use crate::core::static_server::template;
use crate::auth::{current_user, login_redirect};
use crate::follow::{follower_count, following_count, get_followings, is_following};
use crate::notifications::unread_count;
use crate::posts::{collect_posts, post_json, view_post, PostFilter};
use crate::users::{find_by_username, get_user};
use crate::config::*;

/// Substitutes placeholders in one pass, so inserted values are never
/// scanned for further placeholders.
fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    loop {
        let next = values
            .iter()
            .filter_map(|(key, value)| rest.find(key).map(|i| (i, *key, *value)))
            .min_by_key(|(i, _, _)| *i);
        match next {
            Some((i, key, value)) => {
                out.push_str(&rest[..i]);
                out.push_str(value);
                rest = &rest[i + key.len()..];
            }
            None => {
                out.push_str(rest);
                return out;
            }
        }
    }
}

fn content_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"(?P<url>https?://[^\s<]+)|(?P<pre>^|[\s(])(?:#(?P<tag>\w+)|@(?P<user>[\w.+-]*\w))")
            .expect("Regex should compile")
    })
}

/// Escapes post text, then turns URLs, `#tags` and `@mentions` into links.
pub fn render_content(content: &str) -> String {
    let escaped = encode_text(content);
    content_regex()
        .replace_all(&escaped, |caps: &regex::Captures| {
            if let Some(url) = caps.name("url") {
                let href = url.as_str().replace('"', "&quot;");
                return format!(
                    r#"<a href="{}" target="_blank" rel="noopener noreferrer">{}</a>"#,
                    href,
                    url.as_str()
                );
            }
            let pre = &caps["pre"];
            match (caps.name("tag"), caps.name("user")) {
                (Some(tag), _) => format!(
                    r#"{}<a href="/hashtag/{}">#{}</a>"#,
                    pre,
                    tag.as_str().to_lowercase(),
                    tag.as_str()
                ),
                (None, Some(user)) => format!(
                    r#"{}<a href="/profile/{}">@{}</a>"#,
                    pre,
                    urlencoding::encode(user.as_str()),
                    user.as_str()
                ),
                (None, None) => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn display_time(ts: &str) -> String {
    chrono::DateTime::parse_from_rfc3339(ts)
        .map(|d| d.format("%b %-d %Y, %-I:%M %p").to_string())
        .unwrap_or_else(|_| ts.to_string())
}

fn message_html(message: Option<&str>) -> String {
    message
        .map(|m| format!(r#"<div class="alert">{}</div>"#, encode_text(m)))
        .unwrap_or_default()
}

fn nav(viewer: Option<&User>, unread: usize) -> String {
    match viewer {
        Some(user) => {
            let name = encode_text(&user.username);
            let badge = if unread > 0 {
                format!(r#" <span class="badge">{}</span>"#, unread)
            } else {
                String::new()
            };
            format!(
                r#"<li><a href="/profile/{attr}"><strong>{name}</strong></a></li>
<li><a href="/">All Posts</a></li>
<li><a href="/following">Following</a></li>
<li><a href="/api/notifications">Notifications{badge}</a></li>
<li><a href="/logout">Log Out</a></li>"#,
                attr = encode_double_quoted_attribute(&user.username),
                name = name,
                badge = badge,
            )
        }
        None => r#"<li><a href="/">All Posts</a></li>
<li><a href="/login">Log In</a></li>
<li><a href="/register">Register</a></li>"#
            .to_string(),
    }
}

fn render_page(store: &impl KvStore, viewer: Option<&User>, title: &str, content: &str) -> anyhow::Result<String> {
    let unread = match viewer {
        Some(u) => unread_count(store, &u.id)?,
        None => 0,
    };
    let layout = template("layout.html")?;
    Ok(fill(&layout, &[
        ("PAGE_TITLE", &encode_text(title)),
        ("PAGE_NAV", &nav(viewer, unread)),
        ("PAGE_CONTENT", content),
    ]))
}

fn compose_form(heading: &str, message: Option<&str>, reply_to: Option<&str>) -> anyhow::Result<String> {
    let compose = template("compose.html")?;
    Ok(fill(&compose, &[
        ("COMPOSE_HEADING", &encode_text(heading)),
        ("FORM_MESSAGE", &message_html(message)),
        ("REPLY_TO", &encode_double_quoted_attribute(reply_to.unwrap_or_default())),
    ]))
}

fn render_post(store: &impl KvStore, post: &Post, viewer: Option<&User>) -> anyhow::Result<String> {
    let author = get_user(store, &post.user_id)?;
    let author_name = author.as_ref().map(|u| u.username.as_str()).unwrap_or("[deleted]");
    let id = encode_double_quoted_attribute(&post.id);

    let mut html = format!(r#"<div class="post" id="post-{}">"#, id);
    html.push_str(&format!(
        r#"<div class="post-header"><a href="/profile/{}"><strong>{}</strong></a>{}<span class="timestamp">{}</span>{}{}</div>"#,
        encode_double_quoted_attribute(author_name),
        encode_text(author_name),
        if author.as_ref().map(|u| u.verified).unwrap_or(false) { r#" <span class="verified">&#10003;</span>"# } else { "" },
        display_time(&post.created_at),
        if post.is_edited { r#" <span class="edited">(edited)</span>"# } else { "" },
        if post.is_pinned { r#" <span class="pinned">Pinned</span>"# } else { "" },
    ));

    if let Some(parent) = &post.reply_to {
        html.push_str(&format!(
            r#"<div class="reply-context">Replying to <a href="/post/{}">a post</a></div>"#,
            encode_double_quoted_attribute(parent)
        ));
    }

    html.push_str(&format!(
        r#"<div class="post-content" id="post-content-{}">{}</div>"#,
        id,
        render_content(&post.content)
    ));

    if let Some(url) = &post.image_url {
        html.push_str(&format!(
            r#"<img class="post-image" src="{}" alt="">"#,
            encode_double_quoted_attribute(url)
        ));
    }

    let is_owner = viewer.map(|v| v.id == post.user_id).unwrap_or(false);
    if is_owner {
        html.push_str(&format!(
            r#"<div class="post-edit" id="post-edit-{id}" style="display: none;">
<textarea id="edit-content-{id}" rows="3" maxlength="{max}">{raw}</textarea>
<button class="btn btn-primary save-btn" data-post-id="{id}">Save</button>
<button class="btn cancel-btn" data-post-id="{id}">Cancel</button>
</div>
<button class="btn edit-btn" data-post-id="{id}">Edit</button>"#,
            id = id,
            max = MAX_POST_LENGTH,
            raw = encode_text(&post.content),
        ));
    }

    let liked = viewer.map(|v| post.is_liked_by(&v.id)).unwrap_or(false);
    let like_button = if viewer.is_some() {
        format!(
            r#"<button class="btn like-btn{}" data-post-id="{}">&#9829;</button>"#,
            if liked { " btn-danger" } else { "" },
            id
        )
    } else {
        "&#9829;".to_string()
    };
    let replies = collect_posts(store, PostFilter::RepliesTo(&post.id))?.len();
    html.push_str(&format!(
        r#"<div class="post-actions">{} <span class="like-count" id="like-count-{}">{}</span><a href="/post/{}">{} {}</a></div></div>"#,
        like_button,
        id,
        post.like_count(),
        id,
        replies,
        if replies == 1 { "reply" } else { "replies" },
    ));

    Ok(html)
}

fn render_posts(store: &impl KvStore, page: &Page<Post>, viewer: Option<&User>, base: &str) -> anyhow::Result<String> {
    let mut html = String::new();
    if page.items.is_empty() {
        html.push_str(r#"<p class="empty">No posts yet.</p>"#);
    }
    for post in &page.items {
        html.push_str(&render_post(store, post, viewer)?);
    }

    if page.num_pages > 1 {
        html.push_str(r#"<nav class="pagination">"#);
        if page.has_previous() {
            html.push_str(&format!(r#"<a class="btn" href="{}?page={}">Previous</a>"#, base, page.number - 1));
        }
        html.push_str(&format!(r#"<span>Page {} of {}</span>"#, page.number, page.num_pages));
        if page.has_next() {
            html.push_str(&format!(r#"<a class="btn" href="{}?page={}">Next</a>"#, base, page.number + 1));
        }
        html.push_str("</nav>");
    }
    Ok(html)
}

fn page_param(req: &Request) -> Option<String> {
    parse_query_params(req.uri()).remove("page")
}

// === Pages ===

pub fn render_login(message: Option<&str>, next: Option<&str>, status: u16) -> anyhow::Result<Response> {
    let form = fill(&template("login.html")?, &[
        ("FORM_MESSAGE", &message_html(message)),
        ("LOGIN_NEXT", &encode_double_quoted_attribute(next.unwrap_or("/"))),
    ]);
    let layout = fill(&template("layout.html")?, &[
        ("PAGE_TITLE", "Login"),
        ("PAGE_NAV", &nav(None, 0)),
        ("PAGE_CONTENT", &form),
    ]);
    Ok(html_response(status, layout))
}

pub fn render_register(message: Option<&str>, status: u16) -> anyhow::Result<Response> {
    let form = fill(&template("register.html")?, &[("FORM_MESSAGE", &message_html(message))]);
    let layout = fill(&template("layout.html")?, &[
        ("PAGE_TITLE", "Register"),
        ("PAGE_NAV", &nav(None, 0)),
        ("PAGE_CONTENT", &form),
    ]);
    Ok(html_response(status, layout))
}

/// `GET /`: every post, newest first. `message` is shown above the compose
/// form when a submission was rejected.
pub fn feed_page(store: &impl KvStore, req: &Request, message: Option<&str>, status: u16) -> anyhow::Result<Response> {
    let viewer = current_user(store, req)?;
    let posts = collect_posts(store, PostFilter::All)?;
    let page = paginate(posts, page_param(req).as_deref(), POSTS_PER_PAGE);

    let mut content = String::from("<h2>All Posts</h2>");
    if viewer.is_some() {
        content.push_str(&compose_form("New Post", message, None)?);
    } else {
        content.push_str(&message_html(message));
    }
    content.push_str(&render_posts(store, &page, viewer.as_ref(), "/")?);

    Ok(html_response(status, render_page(store, viewer.as_ref(), "All Posts", &content)?))
}

pub fn index_page(store: &impl KvStore, req: &Request) -> anyhow::Result<Response> {
    feed_page(store, req, None, 200)
}

/// `GET /following`: posts by the users the viewer follows.
pub fn following_page(store: &impl KvStore, req: &Request) -> anyhow::Result<Response> {
    let viewer = match current_user(store, req)? {
        Some(u) => u,
        None => return Ok(login_redirect(req)),
    };

    let followings = get_followings(store, &viewer.id)?;
    let posts = collect_posts(store, PostFilter::Authors(&followings))?;
    let page = paginate(posts, page_param(req).as_deref(), POSTS_PER_PAGE);

    let mut content = String::from("<h2>Following</h2>");
    content.push_str(&render_posts(store, &page, Some(&viewer), "/following")?);

    Ok(html_response(200, render_page(store, Some(&viewer), "Following", &content)?))
}

/// `GET /profile/{username}`
pub fn profile_page(store: &impl KvStore, req: &Request, username: &str) -> anyhow::Result<Response> {
    let user = match find_by_username(store, username)? {
        Some(u) => u,
        None => return Ok(ApiError::NotFound("User not found".to_string()).into()),
    };
    let viewer = current_user(store, req)?;

    let posts = collect_posts(store, PostFilter::Author(&user.id))?;
    let page = paginate(posts, page_param(req).as_deref(), POSTS_PER_PAGE);
    let base = format!("/profile/{}", encode_double_quoted_attribute(&user.username));

    let mut details = String::new();
    let mut field = |label: &str, value: String| {
        details.push_str(&format!(
            r#"<div class="profile-field"><div class="profile-field-label">{}</div><div class="profile-field-value">{}</div></div>"#,
            label, value
        ));
    };
    if let Some(bio) = &user.bio {
        field("Bio", encode_text(bio).into_owned());
    }
    if let Some(location) = &user.location {
        field("Location", encode_text(location).into_owned());
    }
    if let Some(website) = &user.website {
        field("Website", format!(
            r#"<a href="{}" target="_blank" rel="noopener noreferrer">{}</a>"#,
            encode_double_quoted_attribute(website),
            encode_text(website)
        ));
    }
    if let Some(birth_date) = &user.birth_date {
        field("Born", encode_text(birth_date).into_owned());
    }
    field("Joined", display_time(&user.created_at));

    let follow_button = match &viewer {
        Some(v) if v.id != user.id => {
            let following = is_following(store, &v.id, &user.id)?;
            format!(
                r#"<button class="btn follow-btn{}" data-username="{}">{}</button>"#,
                if following { "" } else { " btn-primary" },
                encode_double_quoted_attribute(&user.username),
                if following { "Unfollow" } else { "Follow" }
            )
        }
        _ => String::new(),
    };

    let profile = fill(&template("profile.html")?, &[
        ("PROFILE_USERNAME", &encode_text(&user.username)),
        ("PROFILE_USER_ID", &encode_double_quoted_attribute(&user.id)),
        ("PROFILE_VERIFIED", if user.verified { r#"<span class="verified">&#10003;</span>"# } else { "" }),
        ("PROFILE_DETAILS", &details),
        ("FOLLOWER_COUNT", &follower_count(store, &user.id)?.to_string()),
        ("FOLLOWING_COUNT", &following_count(store, &user.id)?.to_string()),
        ("FOLLOW_BUTTON", &follow_button),
        ("PROFILE_POSTS", &render_posts(store, &page, viewer.as_ref(), &base)?),
    ]);

    Ok(html_response(200, render_page(store, viewer.as_ref(), &user.username, &profile)?))
}

/// `GET /hashtag/{name}`
pub fn hashtag_page(store: &impl KvStore, req: &Request, name: &str) -> anyhow::Result<Response> {
    let viewer = current_user(store, req)?;
    let tag = name.to_lowercase();
    let posts = collect_posts(store, PostFilter::Tag(&tag))?;
    let page = paginate(posts, page_param(req).as_deref(), POSTS_PER_PAGE);

    let title = format!("#{}", tag);
    let mut content = format!("<h2>{}</h2>", encode_text(&title));
    content.push_str(&render_posts(store, &page, viewer.as_ref(), &format!("/hashtag/{}", encode_double_quoted_attribute(&tag)))?);

    Ok(html_response(200, render_page(store, viewer.as_ref(), &title, &content)?))
}

/// `GET /post/{id}`: the post with its replies, oldest reply first.
pub fn post_page(store: &impl KvStore, req: &Request, post_id: &str) -> anyhow::Result<Response> {
    if !validate_uuid(post_id) {
        return Ok(ApiError::NotFound("Post not found".to_string()).into());
    }
    let post = match view_post(store, post_id)? {
        Some(p) => p,
        None => return Ok(ApiError::NotFound("Post not found".to_string()).into()),
    };
    let viewer = current_user(store, req)?;
    let mut replies = collect_posts(store, PostFilter::RepliesTo(&post.id))?;
    replies.reverse();

    if wants_json(req) {
        let viewer_id = viewer.as_ref().map(|v| v.id.as_str());
        let mut body = post_json(store, &post, viewer_id)?;
        let mut reply_items = Vec::with_capacity(replies.len());
        for r in &replies {
            reply_items.push(post_json(store, r, viewer_id)?);
        }
        body["replies"] = serde_json::Value::Array(reply_items);
        return json_response(200, &body);
    }

    let mut content = render_post(store, &post, viewer.as_ref())?;
    if viewer.is_some() {
        content.push_str(&compose_form("Reply", None, Some(&post.id))?);
    }
    content.push_str("<h3>Replies</h3>");
    if replies.is_empty() {
        content.push_str(r#"<p class="empty">No replies yet.</p>"#);
    }
    for reply in &replies {
        content.push_str(&render_post(store, reply, viewer.as_ref())?);
    }

    Ok(html_response(200, render_page(store, viewer.as_ref(), "Post", &content)?))
}
