//! Branch logs for Chunk Vault.
//!
//! A branch log is the append-only history of one branch: a sequence of
//! [`LogEntry`] values with revisions 1, 2, 3, ... Each entry names the
//! commit that became the branch tip and carries an opaque message. The
//! latest entry is the tip; revision 0 stands for an empty branch.
//!
//! The log tip is the only mutable pointer in a vault. Everything it points
//! at lives in the chunk store and never changes.
//!
//! # Modules
//!
//! - [`entry`] -- [`LogEntry`] and its wire header
//! - [`traits`] -- the [`BranchLog`] trait
//! - [`memory`] -- [`InMemoryBranchLog`] for tests
//! - [`file`] -- [`FileBranchLog`], a CRC-framed log file

pub mod entry;
pub mod error;
pub mod file;
pub mod memory;
pub mod traits;

pub use entry::{parse_header, LogEntry};
pub use error::{LogError, LogResult};
pub use file::FileBranchLog;
pub use memory::InMemoryBranchLog;
pub use traits::{BranchLog, MAX_MESSAGE_LEN};
