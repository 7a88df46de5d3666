use thiserror::Error;

use crate::opcode::{ErrorCode, Opcode};

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown opcode: {0:#010x}")]
    UnknownOpcode(u32),

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("{what} too large: {len} (max {max})")]
    TooLarge {
        what: &'static str,
        len: usize,
        max: usize,
    },

    #[error("unexpected response: expected {expected}, got {actual}")]
    UnexpectedResponse { expected: Opcode, actual: Opcode },

    #[error("remote error ({code}): {message}")]
    Remote { code: ErrorCode, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Returns `true` if the peer closed the pipe mid-message.
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
