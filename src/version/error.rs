use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Rate limited: retry after {retry_after_secs:?} seconds")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Image not found: {0}")]
    NotFound(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache lock poisoned")]
    LockPoisoned,

    #[error("Fetch cancelled")]
    Cancelled,

    #[error("Fetch failed: {0}")]
    Fetch(#[from] RegistryError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SelectError {
    #[error("No tag satisfies the policy")]
    NotFound,
}

#[derive(Debug, Error)]
pub enum CheckError {
    #[error("No tag found for {image_url} matching the policy")]
    NotFound { image_url: String },

    #[error("Failed to fetch tags for {image_url}: {source}")]
    Fetch {
        image_url: String,
        #[source]
        source: CacheError,
    },
}

impl CheckError {
    /// NotFound is expected when a policy filters out every tag; callers log it
    /// and wait for the next check instead of aborting.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CheckError::NotFound { .. })
    }

    /// The check was interrupted by its cancellation token
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            CheckError::Fetch {
                source: CacheError::Cancelled,
                ..
            }
        )
    }
}
