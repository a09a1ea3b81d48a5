use std::sync::OnceLock;

use ammonia::Builder;
use html_escape::{encode_double_quoted_attribute, encode_text};
use regex::Regex;
use rust_embed::RustEmbed;

use crate::auth::RequestContext;
use crate::core::errors::AppError;
use crate::core::form::FieldErrors;
use crate::core::helpers::display_time;
use crate::core::reply::Reply;
use crate::models::models::{Comment, Post, User};

#[derive(RustEmbed)]
#[folder = "templates"]
struct Templates;

/// A post as listed on the home and profile pages.
pub struct PostCard {
    pub post: Post,
    pub author: String,
    pub likes: usize,
    pub liked: bool,
}

pub struct CommentView {
    pub comment: Comment,
    pub author: String,
}

fn load(name: &str) -> anyhow::Result<String> {
    let file = Templates::get(name)
        .ok_or_else(|| anyhow::anyhow!("Template {} not found", name))?;
    Ok(String::from_utf8(file.data.to_vec())?)
}

/// Substitute `{{key}}` placeholders in one pass, so inserted values are
/// never scanned for placeholders themselves. Unknown keys are left as is.
fn fill(template: &str, values: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = after[..end].trim();
                match values.iter().find(|(k, _)| *k == key) {
                    Some((_, value)) => out.push_str(value),
                    None => out.push_str(&rest[start..start + 2 + end + 2]),
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn render(name: &str, values: &[(&str, String)]) -> anyhow::Result<String> {
    Ok(fill(&load(name)?, values))
}

fn url_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r#"https?://[^\s<>"']+"#).expect("Regex should compile")
    })
}

/// User-written text as HTML: escaped, URLs turned into links, newlines kept,
/// then passed through ammonia so only safe markup leaves.
pub fn rich_text(content: &str) -> String {
    let escaped = encode_text(content).to_string();
    let linked = url_regex().replace_all(&escaped, |caps: &regex::Captures| {
        let url = &caps[0];
        format!(r#"<a href="{}" target="_blank">{}</a>"#, url, url)
    });
    let html = linked.replace('\n', "<br>");

    Builder::default()
        .link_rel(Some("noopener noreferrer"))
        .clean(&html)
        .to_string()
}

fn field_errors(errors: &FieldErrors, field: &str) -> String {
    let items: Vec<String> = errors
        .for_field(field)
        .map(|msg| format!("<li>{}</li>", encode_text(msg)))
        .collect();
    if items.is_empty() {
        String::new()
    } else {
        format!(r#"<ul class="errors">{}</ul>"#, items.concat())
    }
}

fn nav(actor: Option<&User>) -> String {
    match actor {
        Some(user) => format!(
            r#"<a href="/">Home</a><a href="/post/new">New Post</a><a href="/profile">{}</a><a href="/logout">Logout</a>"#,
            encode_text(&user.username)
        ),
        None => r#"<a href="/">Home</a><a href="/login">Login</a><a href="/register">Register</a>"#.to_string(),
    }
}

/// Wrap page content in the layout, draining pending flash notices.
pub fn render_page(ctx: &mut RequestContext, title: &str, content: &str) -> Result<String, AppError> {
    let flashes: String = ctx
        .take_flashes()
        .iter()
        .map(|f| format!(r#"<div class="flash flash-{}">{}</div>"#, f.level.as_str(), encode_text(&f.message)))
        .collect();

    Ok(render(
        "layout.html",
        &[
            ("title", encode_text(title).into_owned()),
            ("nav", nav(ctx.actor.as_ref())),
            ("flashes", flashes),
            ("content", content.to_string()),
        ],
    )?)
}

fn like_button(post_id: &str, liked: bool) -> String {
    format!(
        r#"<form class="inline" method="POST" action="/post/{}/like"><button class="link" type="submit">{}</button></form>"#,
        encode_double_quoted_attribute(post_id),
        if liked { "Unlike" } else { "Like" }
    )
}

fn likes_label(count: usize) -> String {
    match count {
        1 => "1 like".to_string(),
        n => format!("{} likes", n),
    }
}

fn post_card(card: &PostCard, signed_in: bool) -> String {
    let like = if signed_in {
        format!(" · {}", like_button(&card.post.id, card.liked))
    } else {
        String::new()
    };

    format!(
        r#"<article class="post">
    <h2><a href="/post/{id}">{title}</a></h2>
    <p class="meta">by {author} on {date} · {likes}{like}</p>
    <div class="body">{body}</div>
</article>
"#,
        id = encode_double_quoted_attribute(&card.post.id),
        title = encode_text(&card.post.title),
        author = encode_text(&card.author),
        date = display_time(&card.post.created_at),
        likes = likes_label(card.likes),
        like = like,
        body = rich_text(&card.post.content),
    )
}

fn post_list(cards: &[PostCard], signed_in: bool) -> String {
    if cards.is_empty() {
        return r#"<p class="empty">No posts yet.</p>"#.to_string();
    }
    cards.iter().map(|c| post_card(c, signed_in)).collect()
}

pub fn home_page(ctx: &mut RequestContext, cards: &[PostCard]) -> Result<Reply, AppError> {
    let posts = post_list(cards, ctx.actor.is_some());
    let content = render("home.html", &[("posts", posts)])?;
    Ok(Reply::page(render_page(ctx, "Home", &content)?))
}

pub fn profile_page(ctx: &mut RequestContext, user: &User, cards: &[PostCard]) -> Result<Reply, AppError> {
    let posts = post_list(cards, true);
    let content = render(
        "profile.html",
        &[
            ("username", encode_text(&user.username).into_owned()),
            ("email", encode_text(&user.email).into_owned()),
            ("joined", display_time(&user.created_at)),
            ("posts", posts),
        ],
    )?;
    Ok(Reply::page(render_page(ctx, "Profile", &content)?))
}

pub fn register_page(
    ctx: &mut RequestContext,
    username: &str,
    email: &str,
    errors: &FieldErrors,
    status: u16,
) -> Result<Reply, AppError> {
    let content = render(
        "register.html",
        &[
            ("username", encode_double_quoted_attribute(username).into_owned()),
            ("email", encode_double_quoted_attribute(email).into_owned()),
            ("username_errors", field_errors(errors, "username")),
            ("email_errors", field_errors(errors, "email")),
            ("password_errors", field_errors(errors, "password")),
            ("confirm_password_errors", field_errors(errors, "confirm_password")),
        ],
    )?;
    Ok(Reply::page_with_status(status, render_page(ctx, "Register", &content)?))
}

pub fn login_page(
    ctx: &mut RequestContext,
    username: &str,
    errors: &FieldErrors,
    status: u16,
) -> Result<Reply, AppError> {
    let content = render(
        "login.html",
        &[
            ("username", encode_double_quoted_attribute(username).into_owned()),
            ("username_errors", field_errors(errors, "username")),
            ("password_errors", field_errors(errors, "password")),
        ],
    )?;
    Ok(Reply::page_with_status(status, render_page(ctx, "Login", &content)?))
}

pub struct PostFormPage<'f> {
    pub legend: &'f str,
    pub action: String,
    pub title: &'f str,
    pub content: &'f str,
}

pub fn post_form_page(
    ctx: &mut RequestContext,
    page: &PostFormPage,
    errors: &FieldErrors,
    status: u16,
) -> Result<Reply, AppError> {
    let content = render(
        "post_form.html",
        &[
            ("legend", encode_text(page.legend).into_owned()),
            ("action", encode_double_quoted_attribute(&page.action).into_owned()),
            ("title", encode_double_quoted_attribute(page.title).into_owned()),
            ("content", encode_text(page.content).into_owned()),
            ("title_errors", field_errors(errors, "title")),
            ("content_errors", field_errors(errors, "content")),
        ],
    )?;
    Ok(Reply::page_with_status(status, render_page(ctx, page.legend, &content)?))
}

pub fn post_page(ctx: &mut RequestContext, card: &PostCard, comments: &[CommentView]) -> Result<Reply, AppError> {
    let post = &card.post;
    let id = encode_double_quoted_attribute(&post.id).to_string();

    let mut actions = String::new();
    if let Some(actor) = ctx.actor.as_ref() {
        actions.push_str(&like_button(&post.id, card.liked));
        if crate::auth::can_modify(actor, post) {
            actions.push_str(&format!(
                r#" · <a href="/post/{id}/edit">Edit</a> · <form class="inline" method="POST" action="/post/{id}/delete"><button class="link" type="submit">Delete</button></form>"#,
                id = id
            ));
        }
    }

    let comment_list: String = if comments.is_empty() {
        r#"<p class="empty">No replies yet.</p>"#.to_string()
    } else {
        comments
            .iter()
            .map(|c| {
                format!(
                    r#"<div class="comment"><p class="meta">{} · {}</p><div class="body">{}</div></div>"#,
                    encode_text(&c.author),
                    display_time(&c.comment.timestamp),
                    rich_text(&c.comment.content)
                )
            })
            .collect()
    };

    let comment_form = if ctx.actor.is_some() {
        format!(
            r#"<form method="POST" action="/post/{}/comment" class="card"><label for="reply">Reply</label><textarea id="reply" name="content" rows="3" required></textarea><button type="submit">Post Reply</button></form>"#,
            id
        )
    } else {
        r#"<p class="meta"><a href="/login">Log in</a> to reply.</p>"#.to_string()
    };

    let edited = post
        .updated_at
        .as_deref()
        .map(|t| format!(" (edited {})", display_time(t)))
        .unwrap_or_default();

    let content = render(
        "post.html",
        &[
            ("title", encode_text(&post.title).into_owned()),
            ("author", encode_text(&card.author).into_owned()),
            ("date", display_time(&post.created_at)),
            ("edited", edited),
            ("likes", likes_label(card.likes)),
            ("body", rich_text(&post.content)),
            ("actions", actions),
            ("comments", comment_list),
            ("comment_form", comment_form),
        ],
    )?;
    Ok(Reply::page(render_page(ctx, &post.title, &content)?))
}

pub fn error_page(ctx: &mut RequestContext, status: u16, message: &str) -> Result<Reply, AppError> {
    let content = render(
        "error.html",
        &[("status", status.to_string()), ("message", encode_text(message).into_owned())],
    )?;
    Ok(Reply::page_with_status(status, render_page(ctx, &status.to_string(), &content)?))
}
