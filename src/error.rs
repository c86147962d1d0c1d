//! Error types for the room server.

use thiserror::Error;

/// Why a client command was refused. The room state is untouched whenever
/// one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// The sender is not a player of this room.
    #[error("unknown player")]
    UnknownPlayer,

    /// The command names an entity that does not exist (or no longer exists).
    #[error("unknown {kind} '{id}'")]
    UnknownEntity { kind: &'static str, id: String },

    /// The sender is too far away from the thing it wants to interact with.
    #[error("target is out of range")]
    OutOfRange,

    /// A precondition on room or entity state does not hold.
    #[error("cannot do that now: {0}")]
    InvalidState(&'static str),

    /// The command is disabled for this sender or this room.
    #[error("not allowed: {0}")]
    NotAllowed(&'static str),

    #[error("room is full")]
    RoomFull,

    #[error("room is closed")]
    RoomClosed,
}

impl CommandError {
    pub fn unknown(kind: &'static str, id: impl Into<String>) -> Self {
        Self::UnknownEntity {
            kind,
            id: id.into(),
        }
    }
}

/// Failures of the binaries themselves.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server terminated: {0}")]
    Serve(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}
