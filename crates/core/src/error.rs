use thiserror::Error;

use crate::model::{IdError, PercentError};

/// Validation failures raised while building domain values from raw input.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Id(#[from] IdError),
    #[error(transparent)]
    Percent(#[from] PercentError),
}
