use thiserror::Error;

/// Errors surfaced by the stage pipeline.
///
/// Missing history and zero denominators are not errors: they show up as
/// `None` indicator/slope values and the classifier falls back to the
/// previous stage.
#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl Error {
    /// True for failures writing or reading a store, as opposed to bad input.
    pub fn is_persistence(&self) -> bool {
        matches!(self, Error::Database(_) | Error::Persistence(_))
    }
}
