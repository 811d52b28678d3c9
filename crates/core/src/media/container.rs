//! Stream synchronization on an MPEG-4 / 3GPP container (ISO/IEC 14496-12).
//!
//! Live encoders writing to a pipe still emit a container: a few metadata
//! atoms (`ftyp`, `free`, …) followed by the `mdat` atom whose body is the
//! length-prefixed H.264 bitstream. Everything before the `mdat` body is
//! skipped:
//!
//! ```text
//! +--------+------+---------------+--------+------+----------------------
//! | size   | type | body          | size   | mdat | NAL NAL NAL …
//! | 4B BE  | 4B   | size - 8      | 4B BE  | 4B   |
//! +--------+------+---------------+--------+------+----------------------
//!                                                 ^ stream position after sync
//! ```
//!
//! Atom sizes are not trustworthy on a non-seekable output: an encoder that
//! cannot seek back writes `0` and never fixes it. When a size is unusable
//! the scan switches to a byte-by-byte search for the `mdat` tag.

use std::io::Read;
use std::sync::atomic::AtomicBool;

use crate::error::{Result, StreamError, SyncFailure};
use crate::source::read_some;

/// Type tag of the media data atom.
pub const MDAT: [u8; 4] = *b"mdat";

const ATOM_HEADER_LEN: usize = 8;
const LARGESIZE_LEN: usize = 8;
const SKIP_CHUNK: usize = 4096;

/// What the synchronizer went through to reach the media data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Bytes consumed, `mdat` header included.
    pub consumed: u64,
    /// Atoms skipped using their declared size.
    pub skipped_atoms: usize,
    /// Whether the byte-by-byte fallback search was needed.
    pub scanned: bool,
}

/// Size of an atom body as declared by its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AtomBody {
    Sized(u64),
    /// `size == 1`: a 64-bit size follows the type tag.
    Large,
    /// Zero or smaller than the header itself.
    Unknown,
}

fn atom_body(size: u32) -> AtomBody {
    match size {
        1 => AtomBody::Large,
        0 | 2..=7 => AtomBody::Unknown,
        n => AtomBody::Sized(u64::from(n) - ATOM_HEADER_LEN as u64),
    }
}

/// An atom whose declared size is usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SkippedAtom {
    /// 8, or 16 with a `largesize` field.
    header_len: u64,
    body: u64,
}

impl SkippedAtom {
    fn new(header_len: usize, body: u64) -> Self {
        Self {
            header_len: header_len as u64,
            body,
        }
    }

    /// Full atom size, header included.
    fn size(&self) -> u64 {
        self.header_len + self.body
    }
}

/// Consume the container header so that the next byte read from `reader`
/// is the first NAL length prefix.
///
/// Fails with [`StreamError::SyncFailed`] when the input ends or errors
/// before the `mdat` atom, and with [`StreamError::Interrupted`] when `stop`
/// is raised while waiting for input.
pub fn synchronize<R: Read + ?Sized>(reader: &mut R, stop: &AtomicBool) -> Result<SyncReport> {
    let mut sync = Synchronizer {
        reader,
        stop,
        report: SyncReport::default(),
    };
    sync.run().map_err(|e| match e {
        StreamError::EndOfStream => StreamError::SyncFailed {
            reason: SyncFailure::UnexpectedEof,
        },
        StreamError::Io(e) => StreamError::SyncFailed {
            reason: SyncFailure::Read(e.kind()),
        },
        other => other,
    })?;

    tracing::debug!(
        consumed = sync.report.consumed,
        skipped_atoms = sync.report.skipped_atoms,
        scanned = sync.report.scanned,
        "synchronized on mdat"
    );
    Ok(sync.report)
}

struct Synchronizer<'a, R: Read + ?Sized> {
    reader: &'a mut R,
    stop: &'a AtomicBool,
    report: SyncReport,
}

impl<R: Read + ?Sized> Synchronizer<'_, R> {
    fn run(&mut self) -> Result<()> {
        let mut header = [0u8; ATOM_HEADER_LEN];
        loop {
            self.read_exact(&mut header)?;
            let size = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
            let kind = [header[4], header[5], header[6], header[7]];

            if kind == MDAT {
                if atom_body(size) == AtomBody::Large {
                    let mut largesize = [0u8; LARGESIZE_LEN];
                    self.read_exact(&mut largesize)?;
                }
                return Ok(());
            }

            let skipped = match atom_body(size) {
                AtomBody::Sized(n) => Some(SkippedAtom::new(ATOM_HEADER_LEN, n)),
                AtomBody::Large => {
                    let mut largesize = [0u8; LARGESIZE_LEN];
                    self.read_exact(&mut largesize)?;
                    let header_len = ATOM_HEADER_LEN + LARGESIZE_LEN;
                    u64::from_be_bytes(largesize)
                        .checked_sub(header_len as u64)
                        .map(|n| SkippedAtom::new(header_len, n))
                }
                AtomBody::Unknown => None,
            };

            match skipped {
                Some(atom) => {
                    tracing::debug!(
                        atom = %String::from_utf8_lossy(&kind),
                        size = atom.size(),
                        "skipping atom"
                    );
                    self.skip(atom.body)?;
                    self.report.skipped_atoms += 1;
                }
                None => {
                    tracing::debug!(
                        atom = %String::from_utf8_lossy(&kind),
                        size,
                        "atom size unusable, scanning for mdat"
                    );
                    return self.scan(kind);
                }
            }
        }
    }

    /// Slide a 4-byte window over the input until it reads `mdat`.
    fn scan(&mut self, mut window: [u8; 4]) -> Result<()> {
        self.report.scanned = true;
        let mut byte = [0u8; 1];
        while window != MDAT {
            self.read_exact(&mut byte)?;
            window.rotate_left(1);
            window[3] = byte[0];
        }
        Ok(())
    }

    fn skip(&mut self, mut remaining: u64) -> Result<()> {
        let mut scratch = [0u8; SKIP_CHUNK];
        while remaining > 0 {
            let len = remaining.min(SKIP_CHUNK as u64) as usize;
            self.read_exact(&mut scratch[..len])?;
            remaining -= len as u64;
        }
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            match read_some(&mut *self.reader, &mut buf[filled..], self.stop)? {
                0 => return Err(StreamError::EndOfStream),
                n => filled += n,
            }
        }
        self.report.consumed += buf.len() as u64;
        Ok(())
    }
}
