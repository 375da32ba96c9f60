use thiserror::Error;

use crate::index::persistence::PersistenceError;

pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Change applied in memory but not persisted: {0}")]
    NotDurable(#[source] PersistenceError),

    #[error("Consistency error: {0}")]
    Consistency(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod commands;
pub mod config;
pub mod index;
pub mod ranking;
pub mod retrieval;
