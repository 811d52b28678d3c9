//! Error types for the H.264 RTP streamer.

use std::fmt;

/// Errors that can occur while synchronizing, packetizing or sending.
///
/// Variants map to specific failure modes across the pipeline:
///
/// - **Input**: [`Io`](Self::Io), [`EndOfStream`](Self::EndOfStream),
///   [`Interrupted`](Self::Interrupted).
/// - **Container**: [`SyncFailed`](Self::SyncFailed).
/// - **Bitstream**: [`InvalidNalLength`](Self::InvalidNalLength).
/// - **Output**: [`Transport`](Self::Transport).
/// - **Lifecycle**: [`AlreadyStarted`](Self::AlreadyStarted),
///   [`NotStarted`](Self::NotStarted), [`InvalidConfig`](Self::InvalidConfig).
///
/// None of them is retried. Every error ends the streaming session.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Underlying read or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The `mdat` atom was never found before the input ended or failed.
    #[error("stream synchronization failed: {reason}")]
    SyncFailed { reason: SyncFailure },

    /// A NAL length prefix announced fewer than two bytes.
    ///
    /// Such a unit cannot carry a header and a payload, and reading it would
    /// desynchronize the length-prefix framing.
    #[error("invalid NAL unit length: {0}")]
    InvalidNalLength(usize),

    /// The encoder closed its output.
    #[error("end of input stream")]
    EndOfStream,

    /// A stop was requested while the packetizer was waiting for input.
    #[error("streaming interrupted by stop request")]
    Interrupted,

    /// The RTP sink failed to deliver a packet.
    #[error("transport error: {0}")]
    Transport(#[source] std::io::Error),

    /// [`Streamer::start`](crate::Streamer::start) was called twice.
    #[error("streamer already started")]
    AlreadyStarted,

    /// [`Streamer::join`](crate::Streamer::join) was called before start.
    #[error("streamer not started")]
    NotStarted,

    /// The configuration cannot produce a valid packet.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl StreamError {
    /// Whether this error is a normal way for a session to end.
    ///
    /// The encoder closing its output and an explicit stop request are not
    /// failures from the orchestrator's point of view.
    pub fn is_clean_stop(&self) -> bool {
        matches!(self, Self::EndOfStream | Self::Interrupted)
    }
}

/// Specific reason the container scan gave up.
#[derive(Debug)]
pub enum SyncFailure {
    /// The input ended in the middle of the container header.
    UnexpectedEof,
    /// The underlying reader failed.
    Read(std::io::ErrorKind),
}

impl fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEof => write!(f, "input ended before mdat atom"),
            Self::Read(kind) => write!(f, "read error before mdat atom ({kind})"),
        }
    }
}

/// Convenience alias for `Result<T, StreamError>`.
pub type Result<T> = std::result::Result<T, StreamError>;
