use std::io;

use thiserror::Error;

use crate::scheduler::Stage;

pub type Result<T> = std::result::Result<T, ProfileError>;

/// Failures raised by the instrument transport.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("could not open instrument at {address}")]
    Connection {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to send `{command}` to the instrument")]
    Communication {
        command: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("{stage} stage aborted at tick {tick}")]
    StageAborted {
        stage: Stage,
        tick: u64,
        #[source]
        source: GatewayError,
    },
}

impl ProfileError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        ProfileError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }

    pub fn is_invalid_parameter(&self) -> bool {
        matches!(self, ProfileError::InvalidParameter { .. })
    }
}
