use spin_sdk::http::Request;
use tracing::info;

use crate::auth::RequestContext;
use crate::core::errors::AppError;
use crate::core::reply::Reply;
use crate::models::models::User;
use crate::router::PathParams;

pub fn toggle_like(ctx: &mut RequestContext, actor: &User, _req: &Request, params: &PathParams) -> Result<Reply, AppError> {
    let post = ctx.db.require_post(params.id()?)?;

    let liked = ctx.db.toggle_like(&actor.id, &post.id)?;
    info!(post_id = %post.id, user_id = %actor.id, liked, "like toggled");

    Ok(Reply::redirect("/"))
}
