//! Agent error types

use chatrag_core::{CoreError, ErrorKind};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Database error: {0}")]
    Database(#[from] chatrag_db::DbError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl AgentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::Core(err) => err.kind(),
            AgentError::Database(chatrag_db::DbError::InvalidCollectionName(_)) => {
                ErrorKind::Config
            }
            AgentError::Database(_) => ErrorKind::Store,
            AgentError::Config(_) => ErrorKind::Config,
            AgentError::Io { .. } => ErrorKind::Format,
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_follows_core_error() {
        let err = AgentError::from(CoreError::Model("timed out".into()));
        assert_eq!(err.kind(), ErrorKind::Model);
        assert_eq!(err.to_string(), CoreError::Model("timed out".into()).to_string());

        let err = AgentError::from(chatrag_db::DbError::InvalidCollectionName("a b".into()));
        assert_eq!(err.kind(), ErrorKind::Config);
    }
}
