use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration (bad selection parameters, zero threads,
    /// missing LOD geometry column).
    #[error("configuration error: {0}")]
    Config(String),

    /// The resolved tile set is empty.
    #[error("selection error: {0}")]
    Selection(String),

    /// Driver-level failure while executing a table's query. Aborts the
    /// whole batch.
    #[error("query on table {table} failed ({code}): {message}")]
    Query {
        table: String,
        code: String,
        message: String,
    },

    /// Geometry or attribute conversion failure, scoped to one tile.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// Output write failure, scoped to one tile.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn selection(msg: impl Into<String>) -> Self {
        Error::Selection(msg.into())
    }

    pub fn conversion(msg: impl Into<String>) -> Self {
        Error::Conversion(msg.into())
    }

    pub fn query(table: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Query {
            table: table.into(),
            code: code.into(),
            message: message.into(),
        }
    }
}
