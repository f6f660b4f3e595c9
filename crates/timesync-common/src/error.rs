use thiserror::Error;

/// Time synchronization errors covering transport, descriptor, and configuration failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SyncError {
    /// Transport or protocol failure reported by the device collaborator.
    #[error("device communication error: {0}")]
    DeviceCommunication(String),

    /// Epoch descriptor bytes do not decode to a valid calendar instant.
    #[error("malformed epoch descriptor: {0}")]
    MalformedEpoch(String),

    /// A descriptor tag is already claimed by another subsystem.
    #[error("descriptor tag {tag} already claimed by {owner}")]
    TagConflict {
        /// Contested descriptor tag.
        tag: u8,
        /// Subsystem currently holding the tag.
        owner: String,
    },

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Whether this error originated in the device transport.
    pub fn is_communication(&self) -> bool {
        matches!(self, Self::DeviceCommunication(_))
    }
}

/// Convenience type alias for time synchronization operations.
pub type SyncResult<T> = Result<T, SyncError>;
