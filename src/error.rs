//! Application-wide error types.

use thiserror::Error;

use crate::component_ids::ComponentIdError;
use crate::interaction::registry::RegistryError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("dispatch error: {0}")]
    Dispatch(String),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ComponentIdError> for AppError {
    fn from(e: ComponentIdError) -> Self {
        AppError::Store(e.to_string())
    }
}
