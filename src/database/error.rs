#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("SQL error: {0}")]
    SqlError(#[from] sqlx::Error),

    #[error("Invalid schema name '{0}': only ASCII letters, digits and '_' are allowed (max 64)")]
    InvalidSchemaName(String),
}
