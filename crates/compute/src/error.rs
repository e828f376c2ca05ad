use mlq_core::Fault;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("could not decode {what}: {reason}")]
    Decode { what: &'static str, reason: String },

    #[error("could not encode {what}: {reason}")]
    Encode { what: &'static str, reason: String },
}

impl From<ComputeError> for Fault {
    fn from(e: ComputeError) -> Self {
        match e {
            ComputeError::InvalidInput(_) | ComputeError::Decode { .. } => {
                Fault::validation(e.to_string())
            }
            ComputeError::Encode { .. } => Fault::internal(e.to_string()),
        }
    }
}
