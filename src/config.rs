pub const MIN_USERNAME_LENGTH: usize = 2;
pub const MAX_USERNAME_LENGTH: usize = 20;
pub const MIN_PASSWORD_LENGTH: usize = 6;
pub const MAX_TITLE_LENGTH: usize = 100;

pub const SESSION_COOKIE: &str = "session";

pub const FEED_KEY: &str = "feed";

pub fn user_key(id: &str) -> String {
    format!("user:{}", id)
}

pub fn username_key(username: &str) -> String {
    format!("username:{}", username)
}

pub fn email_key(email: &str) -> String {
    format!("email:{}", email.to_lowercase())
}

pub fn post_key(id: &str) -> String {
    format!("post:{}", id)
}

pub fn comment_key(id: &str) -> String {
    format!("comment:{}", id)
}

pub fn post_comments_key(post_id: &str) -> String {
    format!("post_comments:{}", post_id)
}

pub fn likes_key(post_id: &str) -> String {
    format!("likes:{}", post_id)
}

pub fn session_key(token: &str) -> String {
    format!("session:{}", token)
}

pub fn session_expiration_hours() -> i64 {
    std::env::var("SOCIAL_SESSION_EXPIRATION_HOURS")
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(24)
}

pub fn bind_addr() -> String {
    std::env::var("SOCIAL_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
}

pub fn db_path() -> String {
    std::env::var("SOCIAL_DB_PATH").unwrap_or_else(|_| "social.db".to_string())
}
