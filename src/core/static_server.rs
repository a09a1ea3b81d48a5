use rust_embed::RustEmbed;
use mime_guess::from_path;

use crate::core::reply::Reply;

#[derive(RustEmbed)]
#[folder = "static"]
struct Assets;

/// Serve an embedded asset for a `/static/...` path.
pub fn serve_static(path: &str) -> Option<Reply> {
    let file_path = path.trim_start_matches("/static/");
    let file = Assets::get(file_path)?;
    let mime = from_path(file_path).first_or_octet_stream();

    Some(Reply::Asset {
        content_type: mime.as_ref().to_string(),
        body: file.data.to_vec(),
    })
}
