use thiserror::Error;

/// Errors surfaced by session, buffer, and parameter operations.
///
/// Voice-level backend failures are deliberately absent: a voice that fails
/// mid-playback degrades its buffer to the stopped state instead of failing
/// the call that noticed it.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EngineError {
    /// Every voice in the device's pool is in use. Retry after a buffer
    /// stops, or accept that the sound is skipped.
    #[error("no free voice available")]
    ResourceExhausted,
    /// The session (or the buffer's session) has already been torn down.
    #[error("session is not initialized")]
    NotInitialized,
    /// The target was already set up by an earlier call. Reserved for
    /// embeddings with an explicit one-shot initialize step; the registry's
    /// shared sessions join instead of failing, so no engine path raises it.
    #[error("already initialized")]
    AlreadyInitialized,
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),
    /// The backend device could not be opened or its context could not be
    /// created.
    #[error("no usable audio driver")]
    NoDriver,
    /// The operation is not permitted by the buffer's capability flags.
    #[error("control not available for this buffer")]
    ControlUnavailable,
}
