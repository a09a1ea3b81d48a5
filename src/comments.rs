use spin_sdk::http::Request;
use tracing::{info, warn};

use crate::auth::RequestContext;
use crate::core::errors::AppError;
use crate::core::form::{get_string, parse_form};
use crate::core::reply::Reply;
use crate::models::models::{FlashLevel, User};
use crate::router::PathParams;

/// Adds a reply to a post. Whatever happens to the reply, the actor lands
/// back on the home page.
pub fn add_comment(ctx: &mut RequestContext, actor: &User, req: &Request, params: &PathParams) -> Result<Reply, AppError> {
    let post = ctx.db.require_post(params.id()?)?;

    let fields = parse_form(req.body());
    let content = get_string(&fields, "content");

    if content.trim().is_empty() {
        warn!(post_id = %post.id, user_id = %actor.id, "empty reply rejected");
        ctx.flash(FlashLevel::Danger, "Your reply cannot be empty.");
        return Ok(Reply::redirect("/"));
    }

    let comment = ctx.db.insert_comment(&post.id, &actor.id, content.trim())?;
    info!(comment_id = %comment.id, post_id = %post.id, user_id = %actor.id, "reply posted");

    ctx.flash(FlashLevel::Success, "Your reply has been posted!");
    Ok(Reply::redirect("/"))
}
