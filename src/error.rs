use thiserror::Error;

/// Errors surfaced to callers of the preprocessing core.
///
/// Only contract violations (`InvalidInput`, `InvalidFrame`) are expected to
/// reach a caller of `PreprocessingService::preprocess`; runtime detector
/// failures are absorbed into a low-confidence result.
#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("no detection tier produced an estimate")]
    EstimatorExhausted,

    #[error("configuration: {0}")]
    Config(String),

    #[error("image: {0}")]
    Image(#[from] image::ImageError),
}

impl PreprocessError {
    /// True for errors caused by the caller breaking the API contract.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            PreprocessError::InvalidInput(_) | PreprocessError::InvalidFrame(_)
        )
    }
}
