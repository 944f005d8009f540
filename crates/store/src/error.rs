use domain::ShopError;
use thiserror::Error;

/// Errors that can occur when interacting with the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A domain rule rejected the operation.
    #[error(transparent)]
    Shop(#[from] ShopError),

    /// Concurrent transactions conflicted and the retry budget is spent.
    #[error("conflicting concurrent update, retries exhausted")]
    ConflictingUpdate,

    /// An unexpected storage failure aborted the checkout transaction.
    /// Everything was rolled back; no order, order item, stock, or cart
    /// change was persisted.
    #[error("checkout failed: {0}")]
    CheckoutFailed(String),

    /// A database error occurred.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    /// Returns the domain error, if this is one.
    pub fn as_shop(&self) -> Option<&ShopError> {
        match self {
            StoreError::Shop(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
