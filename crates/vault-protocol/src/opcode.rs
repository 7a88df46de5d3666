use std::fmt;

use crate::error::{ProtocolError, ProtocolResult};

/// Most entries accepted in one hash or chunk list.
pub const MAX_LIST_LEN: usize = 1 << 20;

/// Largest single chunk payload accepted.
pub const MAX_CHUNK_LEN: usize = 64 * 1024 * 1024;

/// Message opcodes. Numeric values are fixed by the wire format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Opcode {
    GetRemoteTip,
    GetChunks,
    PutChunks,
    HasChunks,
    Error,
}

impl Opcode {
    pub const fn code(self) -> u32 {
        match self {
            Self::GetRemoteTip => 1,
            Self::GetChunks => 2,
            Self::PutChunks => 3,
            Self::HasChunks => 4,
            Self::Error => 0xFFFF_FFFF,
        }
    }

    pub fn from_code(code: u32) -> ProtocolResult<Self> {
        match code {
            1 => Ok(Self::GetRemoteTip),
            2 => Ok(Self::GetChunks),
            3 => Ok(Self::PutChunks),
            4 => Ok(Self::HasChunks),
            0xFFFF_FFFF => Ok(Self::Error),
            other => Err(ProtocolError::UnknownOpcode(other)),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::GetRemoteTip => "GET_REMOTE_TIP",
            Self::GetChunks => "GET_CHUNKS",
            Self::PutChunks => "PUT_CHUNKS",
            Self::HasChunks => "HAS_CHUNKS",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Reason carried by an `ERROR` frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The responder failed while handling a well-formed request.
    Internal,
    /// The request could not be decoded.
    Malformed,
    /// The request opcode is not one the responder serves.
    UnknownOpcode,
    /// The branch exists but the caller may not use it.
    AccessDenied,
    /// A requested branch or chunk does not exist.
    NotFound,
    /// A code this build does not know.
    Other(u32),
}

impl ErrorCode {
    pub const fn code(self) -> u32 {
        match self {
            Self::Internal => 1,
            Self::Malformed => 2,
            Self::UnknownOpcode => 3,
            Self::AccessDenied => 4,
            Self::NotFound => 5,
            Self::Other(code) => code,
        }
    }

    pub const fn from_code(code: u32) -> Self {
        match code {
            1 => Self::Internal,
            2 => Self::Malformed,
            3 => Self::UnknownOpcode,
            4 => Self::AccessDenied,
            5 => Self::NotFound,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal => f.write_str("ERROR"),
            Self::Malformed => f.write_str("MALFORMED"),
            Self::UnknownOpcode => f.write_str("UNKNOWN_OPCODE"),
            Self::AccessDenied => f.write_str("ACCESS_DENIED"),
            Self::NotFound => f.write_str("NOT_FOUND"),
            Self::Other(code) => write!(f, "code {code}"),
        }
    }
}

/// Outcome of a `PUT_CHUNKS` request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PutStatus {
    /// Chunks written and the log entry appended.
    Ok,
    /// The branch moved past the expected revision; nothing was written.
    PullRequired,
}

impl PutStatus {
    pub const fn code(self) -> u32 {
        match self {
            Self::Ok => 0,
            Self::PullRequired => 1,
        }
    }

    pub fn from_code(code: u32) -> ProtocolResult<Self> {
        match code {
            0 => Ok(Self::Ok),
            1 => Ok(Self::PullRequired),
            other => Err(ProtocolError::Malformed(format!("unknown put status {other}"))),
        }
    }
}

impl fmt::Display for PutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => f.write_str("OK"),
            Self::PullRequired => f.write_str("PULL_REQUIRED"),
        }
    }
}
