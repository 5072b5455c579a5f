/// Application-level errors
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] sqlx::Error),

    #[error("Cache unavailable: {0}")]
    CacheUnavailable(#[from] redis::RedisError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Store and cache failures are transient; callers degrade instead of failing.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AppError::StoreUnavailable(_) | AppError::CacheUnavailable(_)
        )
    }

    /// Rejections that happen before any computation starts
    pub fn is_rejection(&self) -> bool {
        matches!(self, AppError::InvalidInput(_) | AppError::NotFound(_))
    }
}

pub type AppResult<T> = Result<T, AppError>;
