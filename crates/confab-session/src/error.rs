use thiserror::Error;

use crate::backend::BackendError;
use crate::state::SessionState;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Invalid session transition from {from:?} to {to:?}")]
    InvalidTransition { from: SessionState, to: SessionState },

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("{0} is required")]
    MissingComponent(&'static str),
}

pub type Result<T> = std::result::Result<T, SessionError>;
