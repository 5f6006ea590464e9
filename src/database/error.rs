//! Storage error type, mapped from sqlx at the repository boundary.

pub type DbResult<T> = Result<T, DatabaseError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum DatabaseError {
    #[error("database connection pool exhausted")]
    PoolExhausted,

    #[error("{entity} with id '{id}' not found")]
    NotFound { entity: String, id: String },

    #[error("a record with {column} '{value}' already exists")]
    UniqueViolation { column: String, value: String },

    #[error("database query failed: {message}")]
    Query { message: String },

    #[error("database connection error: {message}")]
    Connection { message: String },

    #[error("database configuration error: {message}")]
    Config { message: String },

    #[error("database error: {message}")]
    Unknown { message: String },
}

impl DatabaseError {
    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PoolExhausted | Self::Connection { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn from_sqlx(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::RowNotFound => Self::not_found("record", "unknown"),
            sqlx::Error::PoolTimedOut => Self::PoolExhausted,
            sqlx::Error::PoolClosed => Self::Connection {
                message: "connection pool is closed".to_string(),
            },
            sqlx::Error::Configuration(msg) => Self::Config {
                message: msg.to_string(),
            },
            sqlx::Error::Database(db_err) => {
                // 23505: Postgres unique constraint violation
                if db_err.code().as_deref() == Some("23505") {
                    Self::UniqueViolation {
                        column: db_err.constraint().unwrap_or("unknown").to_string(),
                        value: "provided value".to_string(),
                    }
                } else {
                    Self::Query {
                        message: db_err.message().to_string(),
                    }
                }
            }
            sqlx::Error::Io(io_err) => Self::Connection {
                message: io_err.to_string(),
            },
            _ => Self::Unknown {
                message: error.to_string(),
            },
        }
    }
}
