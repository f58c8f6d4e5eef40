//! Error taxonomy shared by every layer of the library.
//!
//! Operations never panic or unwind; they return an [`Ext2Error`] whose
//! variant matches one of the kinds of spec §7. Each variant carries enough
//! context (block/inode number, feature bit, path...) for a caller to print
//! a short, prefixed message the way the teacher's binaries do
//! (`eprintln!("{}: {}: {}", prog, path, err)`).

use std::fmt;
use std::io;

/// Result type used throughout the crate.
pub type Ext2Result<T> = Result<T, Ext2Error>;

/// A typed error, one variant per taxonomy kind of spec §7.
#[derive(Debug)]
pub enum Ext2Error {
	/// Channel read/write failure, short transfer, or seek failure.
	Io(io::Error),
	/// A short read past end-of-device.
	ShortRead { block: u64, requested: u32, got: u32 },
	/// A short write past end-of-device.
	ShortWrite { block: u64, requested: u32, wrote: u32 },
	/// An on-disk invariant was violated.
	Corruption(Corruption),
	/// Allocation exhaustion (`ENOSPC`/`ENOMEM`).
	Exhaustion(Exhaustion),
	/// Device open denied, mount conflict, or MMP lease conflict.
	Permission(String),
	/// An INCOMPAT bit is unknown, or an RO_COMPAT bit is unknown and a
	/// writable open was requested.
	FeatureUnsupported { field: &'static str, bit: u32 },
	/// Invalid caller input (unparseable block/inode number, zero block...).
	BadArgument(String),
	/// A progress callback requested cancellation.
	Canceled,
}

/// On-disk invariant violations (checker-surfaced, fatal elsewhere).
#[derive(Debug)]
pub enum Corruption {
	BadMagic { expected: u16, found: u16 },
	BadSuperblock(String),
	BadGroupDescriptor { group: u32, reason: String },
	BadDirectoryEntry { block: u64, offset: u32, reason: String },
	BadExtentNode { block: u64, reason: String },
	BadBlockInInodeTable { inode: u32 },
	BadIndirectBlock { block: u64 },
}

/// Resource exhaustion kinds.
#[derive(Debug)]
pub enum Exhaustion {
	NoSpace,
	NoMemory,
	InodeCountOverflow,
}

impl fmt::Display for Ext2Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Io(e) => write!(f, "I/O error: {e}"),
			Self::ShortRead { block, requested, got } => write!(
				f,
				"short read at block {block}: requested {requested} blocks, got {got}"
			),
			Self::ShortWrite { block, requested, wrote } => write!(
				f,
				"short write at block {block}: requested {requested} blocks, wrote {wrote}"
			),
			Self::Corruption(c) => write!(f, "filesystem corruption: {c}"),
			Self::Exhaustion(e) => write!(f, "{e}"),
			Self::Permission(msg) => write!(f, "permission denied: {msg}"),
			Self::FeatureUnsupported { field, bit } => {
				write!(f, "unsupported feature: {field} bit {bit:#x}")
			}
			Self::BadArgument(msg) => write!(f, "invalid argument: {msg}"),
			Self::Canceled => write!(f, "operation canceled"),
		}
	}
}

impl fmt::Display for Corruption {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::BadMagic { expected, found } => {
				write!(f, "bad magic number: expected {expected:#x}, found {found:#x}")
			}
			Self::BadSuperblock(reason) => write!(f, "invalid superblock: {reason}"),
			Self::BadGroupDescriptor { group, reason } => {
				write!(f, "invalid group descriptor {group}: {reason}")
			}
			Self::BadDirectoryEntry { block, offset, reason } => {
				write!(f, "invalid directory entry at block {block}, offset {offset}: {reason}")
			}
			Self::BadExtentNode { block, reason } => {
				write!(f, "invalid extent node at block {block}: {reason}")
			}
			Self::BadBlockInInodeTable { inode } => {
				write!(f, "bad block encountered while reading inode {inode}")
			}
			Self::BadIndirectBlock { block } => write!(f, "bad indirect block {block}"),
		}
	}
}

impl fmt::Display for Exhaustion {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::NoSpace => write!(f, "no space left on device"),
			Self::NoMemory => write!(f, "out of memory"),
			Self::InodeCountOverflow => write!(f, "inode count would overflow 32 bits"),
		}
	}
}

impl std::error::Error for Ext2Error {}

impl From<io::Error> for Ext2Error {
	fn from(e: io::Error) -> Self {
		Self::Io(e)
	}
}
