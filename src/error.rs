use thiserror::Error;
use uuid::Uuid;

use crate::gatt::CharacteristicId;

/// Errors that can occur when driving the virtual trainer
#[derive(Error, Debug)]
pub enum TrainerError {
    /// The transport asked for a characteristic this peripheral does not expose
    #[error("Unknown characteristic: {0}")]
    UnknownCharacteristic(Uuid),

    /// Read requested on a characteristic without the read property
    #[error("Characteristic {0} is not readable")]
    NotReadable(CharacteristicId),

    /// Write requested on a characteristic without the write property
    #[error("Characteristic {0} is not writable")]
    NotWritable(CharacteristicId),

    /// Subscription requested on a characteristic that neither notifies nor indicates
    #[error("Characteristic {0} does not support notifications")]
    NotSubscribable(CharacteristicId),

    /// Invalid or undersized command parameters
    #[error("Invalid command parameters: {0}")]
    InvalidParameters(String),

    /// Message parsing failed
    #[error("Failed to parse message: {0}")]
    ParseError(String),
}

/// Result type for trainer operations
pub type Result<T> = std::result::Result<T, TrainerError>;

impl TrainerError {
    /// Check if this error was caused by malformed bytes from a remote central
    #[must_use]
    pub const fn is_protocol_error(&self) -> bool {
        matches!(self, Self::InvalidParameters(_) | Self::ParseError(_))
    }

    /// Check if this error was caused by the transport addressing the GATT table incorrectly
    #[must_use]
    pub const fn is_adapter_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownCharacteristic(_)
                | Self::NotReadable(_)
                | Self::NotWritable(_)
                | Self::NotSubscribable(_)
        )
    }
}
