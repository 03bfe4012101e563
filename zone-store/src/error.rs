use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Unknown zone type '{0}'")]
    UnknownZoneType(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
