use thiserror::Error;

/// Failures a request can end in. All of them are recovered at the request
/// boundary in [`crate::router`]; none are fatal to the process.
#[derive(Debug, Error)]
pub enum AppError {
    /// Missing or malformed input, or a uniqueness violation.
    #[error("{0}")]
    Validation(String),
    /// Bad credentials. Never says which half was wrong.
    #[error("Login failed. Check your username and password.")]
    Authentication,
    /// The actor may not touch this resource.
    #[error("{0}")]
    Authorization(String),
    #[error("{0}")]
    NotFound(String),
    #[error("Method not allowed")]
    MethodNotAllowed,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> u16 {
        match self {
            AppError::Validation(_) => 400,
            AppError::Authentication => 401,
            AppError::Authorization(_) => 403,
            AppError::NotFound(_) => 404,
            AppError::MethodNotAllowed => 405,
            AppError::Internal(_) => 500,
        }
    }

    pub fn post_not_found() -> Self {
        AppError::NotFound("Post not found".to_string())
    }
}
