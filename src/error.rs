//! Crate-wide error type — unifies every module's structured error behind
//! one `#[error(transparent)]` enum, per the error-handling design: callers
//! who want to match on cause still can, callers who just want a string
//! keep using `{e}`.

#![forbid(unsafe_code)]

use thiserror::Error;

use crate::params::ConfigError;
use crate::piecewise::PiecewiseError;
use crate::solver::{BackendError, ModelError};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Piecewise(#[from] PiecewiseError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}
