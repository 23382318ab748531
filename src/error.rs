//! Error handling for iqchain
//!
//! Errors only arise on control and configuration paths. Block execution and
//! typed setters never fail: degenerate values are clamped instead.

use thiserror::Error;

/// Result type alias for iqchain operations
pub type Result<T> = std::result::Result<T, StageError>;

/// Main error type for iqchain operations
#[derive(Error, Debug)]
pub enum StageError {
    // Parameter Errors
    #[error("Invalid value for {param}: {value} (expected {expected})")]
    InvalidParameter {
        param: String,
        value: String,
        expected: String,
    },

    #[error("Unknown parameter '{param}' for {stage} stage")]
    UnknownParameter { stage: String, param: String },

    // Chain Errors
    #[error("Stage not found: {stage_id}")]
    StageNotFound { stage_id: String },

    #[error("Duplicate stage id: {stage_id}")]
    DuplicateStage { stage_id: String },

    #[error("Channel not found: {channel}")]
    ChannelNotFound { channel: u32 },

    // Configuration Errors
    #[error("Unknown buffer: {name}")]
    UnknownBuffer { name: String },

    #[error("Buffer '{buffer}' too small: {required} floats required, {actual} available")]
    BufferTooSmall {
        buffer: String,
        required: usize,
        actual: usize,
    },

    #[error("Unknown run flag: {name}")]
    UnknownRunFlag { name: String },

    // I/O Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Unsupported audio format: {format}")]
    UnsupportedFormat { format: String },

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StageError {
    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            StageError::InvalidParameter { .. } => "INVALID_PARAMETER",
            StageError::UnknownParameter { .. } => "UNKNOWN_PARAMETER",
            StageError::StageNotFound { .. } => "STAGE_NOT_FOUND",
            StageError::DuplicateStage { .. } => "DUPLICATE_STAGE",
            StageError::ChannelNotFound { .. } => "CHANNEL_NOT_FOUND",
            StageError::UnknownBuffer { .. } => "UNKNOWN_BUFFER",
            StageError::BufferTooSmall { .. } => "BUFFER_TOO_SMALL",
            StageError::UnknownRunFlag { .. } => "UNKNOWN_RUN_FLAG",
            StageError::Io(_) => "IO_ERROR",
            StageError::Wav(_) => "WAV_ERROR",
            StageError::UnsupportedFormat { .. } => "UNSUPPORTED_FORMAT",
            StageError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            StageError::InvalidParameter { .. } => vec![
                "Check the value type: numbers for frequencies and gains, booleans for enables",
            ],
            StageError::UnknownParameter { .. } => {
                vec!["Use 'inspect' to list the parameters a stage accepts"]
            }
            StageError::UnknownBuffer { .. } => {
                vec!["Declare the buffer in the 'buffers' section of the chain config"]
            }
            StageError::BufferTooSmall { .. } => vec![
                "Increase 'complex_len' for the buffer",
                "Resampler outputs need room for ceil(size * L / M) + 1 samples",
            ],
            StageError::UnknownRunFlag { .. } => {
                vec!["Declare the flag in the 'run_flags' section of the chain config"]
            }
            StageError::DuplicateStage { .. } => vec!["Give every stage a unique 'id'"],
            StageError::Wav(_) | StageError::UnsupportedFormat { .. } => vec![
                "Input must be a stereo WAV file (left = I, right = Q)",
                "Supported sample formats: 16/24/32-bit integer and 32-bit float",
            ],
            _ => vec![],
        }
    }
}
