use std::collections::HashMap;

use spin_sdk::http::Request;
use tracing::info;

use crate::auth::{can_modify, RequestContext};
use crate::config::MAX_TITLE_LENGTH;
use crate::core::errors::AppError;
use crate::core::form::{get_string, parse_form, FieldErrors};
use crate::core::reply::Reply;
use crate::models::models::{FlashLevel, Post, User};
use crate::router::PathParams;
use crate::templates::{self, CommentView, PostCard, PostFormPage};

#[derive(Debug, Default)]
pub struct PostForm {
    pub title: String,
    pub content: String,
}

impl PostForm {
    pub fn from_fields(fields: &HashMap<String, String>) -> Self {
        Self {
            title: get_string(fields, "title").trim().to_string(),
            content: get_string(fields, "content"),
        }
    }

    pub fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::default();
        if self.title.is_empty() {
            errors.add("title", "This field is required.");
        } else if self.title.chars().count() > MAX_TITLE_LENGTH {
            errors.add("title", format!("Field must be between 1 and {} characters long.", MAX_TITLE_LENGTH));
        }
        if self.content.trim().is_empty() {
            errors.add("content", "This field is required.");
        }
        errors
    }
}

/// Resolves authors, like counts and the actor's own likes for listing.
pub fn post_cards(ctx: &RequestContext, posts: Vec<Post>) -> Result<Vec<PostCard>, AppError> {
    posts.into_iter().map(|post| post_card(ctx, post)).collect()
}

fn post_card(ctx: &RequestContext, post: Post) -> Result<PostCard, AppError> {
    let likers = ctx.db.likers(&post.id)?;
    let liked = ctx
        .actor
        .as_ref()
        .map(|a| likers.iter().any(|id| id == &a.id))
        .unwrap_or(false);

    Ok(PostCard {
        author: ctx.db.username_of(&post.user_id)?,
        likes: likers.len(),
        liked,
        post,
    })
}

/// Loads the post and checks the actor owns it. A missing post wins over a
/// missing permission.
fn owned_post(ctx: &RequestContext, actor: &User, id: &str, action: &str) -> Result<Post, AppError> {
    let post = ctx.db.require_post(id)?;
    if !can_modify(actor, &post) {
        return Err(AppError::Authorization(format!(
            "You do not have permission to {} this post.",
            action
        )));
    }
    Ok(post)
}

pub fn home(ctx: &mut RequestContext, _req: &Request, _params: &PathParams) -> Result<Reply, AppError> {
    let posts = ctx.db.all_posts()?;
    let cards = post_cards(ctx, posts)?;
    templates::home_page(ctx, &cards)
}

pub fn new_post_form(ctx: &mut RequestContext, _actor: &User, _req: &Request, _params: &PathParams) -> Result<Reply, AppError> {
    let page = PostFormPage {
        legend: "New Post",
        action: "/post/new".to_string(),
        title: "",
        content: "",
    };
    templates::post_form_page(ctx, &page, &FieldErrors::default(), 200)
}

pub fn create_post(ctx: &mut RequestContext, actor: &User, req: &Request, _params: &PathParams) -> Result<Reply, AppError> {
    let form = PostForm::from_fields(&parse_form(req.body()));
    let errors = form.validate();
    if !errors.is_empty() {
        let page = PostFormPage {
            legend: "New Post",
            action: "/post/new".to_string(),
            title: &form.title,
            content: &form.content,
        };
        return templates::post_form_page(ctx, &page, &errors, 400);
    }

    let post = ctx.db.insert_post(&actor.id, &form.title, &form.content)?;
    info!(post_id = %post.id, user_id = %actor.id, "post created");

    ctx.flash(FlashLevel::Success, "Your post has been created!");
    Ok(Reply::redirect("/"))
}

pub fn edit_post_form(ctx: &mut RequestContext, actor: &User, _req: &Request, params: &PathParams) -> Result<Reply, AppError> {
    let post = owned_post(ctx, actor, params.id()?, "edit")?;
    let page = PostFormPage {
        legend: "Edit Post",
        action: format!("/post/{}/edit", post.id),
        title: &post.title,
        content: &post.content,
    };
    templates::post_form_page(ctx, &page, &FieldErrors::default(), 200)
}

pub fn update_post(ctx: &mut RequestContext, actor: &User, req: &Request, params: &PathParams) -> Result<Reply, AppError> {
    let post = owned_post(ctx, actor, params.id()?, "edit")?;

    let form = PostForm::from_fields(&parse_form(req.body()));
    let errors = form.validate();
    if !errors.is_empty() {
        let page = PostFormPage {
            legend: "Edit Post",
            action: format!("/post/{}/edit", post.id),
            title: &form.title,
            content: &form.content,
        };
        return templates::post_form_page(ctx, &page, &errors, 400);
    }

    ctx.db.update_post(&post.id, &form.title, &form.content)?;
    info!(post_id = %post.id, user_id = %actor.id, "post updated");

    ctx.flash(FlashLevel::Success, "Your post has been updated!");
    Ok(Reply::redirect("/"))
}

pub fn delete_post(ctx: &mut RequestContext, actor: &User, _req: &Request, params: &PathParams) -> Result<Reply, AppError> {
    let post = owned_post(ctx, actor, params.id()?, "delete")?;

    ctx.db.delete_post(&post.id)?;
    info!(post_id = %post.id, user_id = %actor.id, "post deleted");

    ctx.flash(FlashLevel::Success, "Your post has been deleted!");
    Ok(Reply::redirect("/"))
}

pub fn view_post(ctx: &mut RequestContext, _req: &Request, params: &PathParams) -> Result<Reply, AppError> {
    let post = ctx.db.require_post(params.id()?)?;

    let mut comments = Vec::new();
    for comment in ctx.db.comments_by_post(&post.id)? {
        comments.push(CommentView {
            author: ctx.db.username_of(&comment.user_id)?,
            comment,
        });
    }

    let card = post_card(ctx, post)?;
    templates::post_page(ctx, &card, &comments)
}
