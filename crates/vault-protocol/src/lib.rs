//! Wire protocol for Chunk Vault.
//!
//! Every message starts with a big-endian `u32` opcode. A request is answered
//! by exactly one response that echoes the opcode, or by an `ERROR` frame
//! carrying an [`ErrorCode`] and a message. Field encodings:
//!
//! | field      | encoding                                               |
//! |------------|--------------------------------------------------------|
//! | string     | `u16` length, UTF-8 bytes                              |
//! | hash list  | `i32` count, `count x 32` hash bytes                   |
//! | chunk list | `i32` count, `count x (hash, i32 length, payload)`     |
//! | revision   | `u64`                                                  |
//!
//! Readers take any [`tokio::io::AsyncRead`]; writers encode into a
//! [`bytes::BytesMut`] and flush it in one `write_all`.

pub mod codec;
pub mod error;
pub mod message;
pub mod opcode;

pub use error::{ProtocolError, ProtocolResult};
pub use message::{Request, Response, WireChunk};
pub use opcode::{ErrorCode, Opcode, PutStatus, MAX_CHUNK_LEN, MAX_LIST_LEN};
