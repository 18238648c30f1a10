//! Error types for the public command surface.

use thiserror::Error;

/// Errors surfaced to callers of [`crate::BleHandle`].
///
/// Radio-level failures never appear here: they degrade to event-log
/// entries and a safe state inside the coordination task.
#[derive(Debug, Error)]
pub enum Error {
    /// The coordination task has shut down and can no longer accept
    /// commands.
    #[error("coordination task is no longer running")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, Error>;
