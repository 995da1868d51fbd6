use crate::runtime::RemoteError;
use crate::sessions::StoreError;

/// Errors surfaced by the conversation routing layer.
///
/// A store uniqueness conflict never appears here: it is absorbed by
/// re-reading the winning row.
#[derive(Debug, thiserror::Error)]
pub enum ConversationError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The conversation stayed busy through every retry.
    #[error("conversation {handle} still busy after {attempts} attempts: {source}")]
    BusyExhausted {
        handle: String,
        attempts: u32,
        #[source]
        source: RemoteError,
    },

    /// The send was abandoned while waiting to retry.
    #[error("send to conversation {handle} cancelled after {attempts} attempts")]
    Cancelled { handle: String, attempts: u32 },

    /// An insert lost a uniqueness race but the winning row could not be read back.
    #[error("conversation mapping for {key} conflicted on insert but is missing on re-read")]
    Consistency { key: String },

    /// Missing or invalid endpoint, credentials, or store settings.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ConversationError {
    /// The remote error kind behind this failure, if it came from the runtime.
    pub fn remote_kind(&self) -> Option<crate::runtime::RemoteErrorKind> {
        match self {
            Self::Remote(err) | Self::BusyExhausted { source: err, .. } => Some(err.kind),
            _ => None,
        }
    }
}
