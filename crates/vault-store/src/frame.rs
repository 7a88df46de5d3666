//! Length- and CRC-framed records shared by the file-backed stores.
//!
//! On-disk format of one frame:
//! ```text
//! [4 bytes: payload length (big-endian u32)]
//! [4 bytes: CRC32 of payload (big-endian u32)]
//! [N bytes: payload]
//! ```
//!
//! A file is a sequence of frames. A crash can leave a torn frame at the
//! tail; [`scan_frames`] stops at the first frame that fails validation and
//! reports where the valid prefix ends so the caller can truncate there.

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::Path;

use tracing::warn;

/// Header size: 4 bytes length + 4 bytes CRC.
pub const HEADER_SIZE: usize = 8;

/// Largest payload a single frame may carry.
pub const MAX_FRAME_LEN: u32 = 1 << 30;

/// A validated frame read back from disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Byte offset of the frame header in the file.
    pub offset: u64,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Offset of the first payload byte.
    pub fn payload_offset(&self) -> u64 {
        self.offset + HEADER_SIZE as u64
    }
}

/// Result of scanning a framed file.
#[derive(Debug, Default)]
pub struct FrameScan {
    pub frames: Vec<Frame>,
    /// Length of the valid prefix. Anything past it is a torn tail.
    pub valid_len: u64,
    /// Length of the file as found.
    pub file_len: u64,
}

impl FrameScan {
    /// Returns `true` if the file carries bytes past the last valid frame.
    pub fn has_torn_tail(&self) -> bool {
        self.valid_len < self.file_len
    }
}

/// Encode one frame into `out`. Returns the number of bytes written.
pub fn encode_frame(out: &mut Vec<u8>, payload: &[u8]) -> usize {
    let length = payload.len() as u32;
    let crc = crc32fast::hash(payload);
    out.extend_from_slice(&length.to_be_bytes());
    out.extend_from_slice(&crc.to_be_bytes());
    out.extend_from_slice(payload);
    HEADER_SIZE + payload.len()
}

/// Write one frame. Returns the number of bytes written.
pub fn append_frame<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<usize> {
    if payload.len() as u64 > MAX_FRAME_LEN as u64 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("frame payload of {} bytes exceeds limit", payload.len()),
        ));
    }
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    let written = encode_frame(&mut buf, payload);
    writer.write_all(&buf)?;
    Ok(written)
}

/// An append-only file that frames are written to.
pub trait FrameFile: Write {
    /// Flush written bytes to stable storage.
    fn sync(&mut self) -> io::Result<()>;

    /// Cut the file back to `len` bytes.
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl FrameFile for File {
    fn sync(&mut self) -> io::Result<()> {
        File::sync_data(self)
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        File::set_len(self, len)
    }
}

/// A failed [`append_durable`].
#[derive(Debug)]
pub struct AppendError {
    pub source: io::Error,
    /// `false` when the file could not be cut back and may end in a partial frame.
    pub rolled_back: bool,
}

/// Append one frame at `end`, the current length of `file`, flushing it
/// (and syncing when `sync` is set).
///
/// If any step fails the file is truncated back to `end`, so a failed
/// append never leaves bytes that a later frame would land behind.
pub fn append_durable<F: FrameFile>(
    file: &mut F,
    end: u64,
    payload: &[u8],
    sync: bool,
) -> Result<usize, AppendError> {
    let result = append_frame(file, payload).and_then(|written| {
        file.flush()?;
        if sync {
            file.sync()?;
        }
        Ok(written)
    });
    let source = match result {
        Ok(written) => return Ok(written),
        Err(e) => e,
    };
    match file.truncate(end) {
        Ok(()) => {
            warn!(end, error = %source, "frame append failed; file cut back");
            Err(AppendError {
                source,
                rolled_back: true,
            })
        }
        Err(cut) => {
            warn!(end, error = %source, cut_error = %cut, "frame append failed and could not be rolled back");
            Err(AppendError {
                source,
                rolled_back: false,
            })
        }
    }
}

/// Read every valid frame of the file at `path`, front to back.
///
/// A missing file scans as empty.
pub fn scan_frames(path: &Path) -> io::Result<FrameScan> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(FrameScan::default()),
        Err(e) => return Err(e),
    };
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    let mut frames = Vec::new();
    let mut offset: u64 = 0;

    while offset + HEADER_SIZE as u64 <= file_len {
        let mut header = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header)?;

        let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let expected_crc = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);

        if length > MAX_FRAME_LEN || offset + HEADER_SIZE as u64 + length as u64 > file_len {
            warn!(offset, length, file_len, "invalid frame length; stopping scan");
            break;
        }

        let mut payload = vec![0u8; length as usize];
        reader.read_exact(&mut payload)?;

        let actual_crc = crc32fast::hash(&payload);
        if actual_crc != expected_crc {
            warn!(
                offset,
                expected_crc, actual_crc, "frame CRC mismatch; stopping scan"
            );
            break;
        }

        frames.push(Frame { offset, payload });
        offset += HEADER_SIZE as u64 + length as u64;
    }

    if offset < file_len {
        warn!(valid_len = offset, file_len, "torn tail after last valid frame");
    }

    Ok(FrameScan {
        frames,
        valid_len: offset,
        file_len,
    })
}
