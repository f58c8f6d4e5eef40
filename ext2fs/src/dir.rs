//! Directory block parsing and the path-resolution/link services built on
//! top of it (spec §4.6).
//!
//! The on-disk record layout (`inode, rec_len, name_len, file_type,
//! name[]`) has no counterpart in the teacher, which never reads
//! directories back — `mkfs/src/ext2.rs` only ever writes the two
//! hand-built `.`/`..` records for a fresh root. This module generalizes
//! that one-shot write into `encode_block`/`decode_block` and adds the
//! read path (`lookup`, `namei`) spec §4.6 requires.

use crate::error::{Corruption, Ext2Error, Ext2Result};
use crate::filesystem::Filesystem;
use crate::inode::mode;

pub mod file_type {
	pub const UNKNOWN: u8 = 0;
	pub const REGULAR: u8 = 1;
	pub const DIR: u8 = 2;
	pub const CHAR_DEVICE: u8 = 3;
	pub const BLOCK_DEVICE: u8 = 4;
	pub const FIFO: u8 = 5;
	pub const SOCKET: u8 = 6;
	pub const SYMLINK: u8 = 7;
}

/// Maximum symlink-following depth before `namei` gives up (spec §4.6).
pub const MAX_SYMLINK_DEPTH: u32 = 31;

/// One decoded directory entry (the trailing NUL-padding and `rec_len`
/// slack between entries is not preserved — `encode_block` lays entries
/// back out densely, parking leftover space in the block's final entry).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
	pub inode: u32,
	pub name: String,
	pub file_type: u8,
}

impl DirEntry {
	pub fn new(inode: u32, name: impl Into<String>, mode_bits: u16) -> Self {
		Self { inode, name: name.into(), file_type: file_type_for_mode(mode_bits) }
	}

	fn encoded_len(&self) -> usize {
		// 8-byte fixed header, name rounded up to a 4-byte boundary.
		(8 + self.name.len()).div_ceil(4) * 4
	}
}

pub fn file_type_for_mode(mode_bits: u16) -> u8 {
	match mode_bits & mode::TYPE_MASK {
		mode::REGULAR => file_type::REGULAR,
		mode::DIRECTORY => file_type::DIR,
		mode::CHAR_DEVICE => file_type::CHAR_DEVICE,
		mode::BLOCK_DEVICE => file_type::BLOCK_DEVICE,
		mode::FIFO => file_type::FIFO,
		mode::SOCKET => file_type::SOCKET,
		mode::SYMLINK => file_type::SYMLINK,
		_ => file_type::UNKNOWN,
	}
}

/// Packs `entries` into one directory block, the last entry's `rec_len`
/// stretched to consume the remainder of the block (spec §4.6).
pub fn encode_block(entries: &[DirEntry], block_size: usize) -> Vec<u8> {
	let mut out = vec![0u8; block_size];
	let mut off = 0usize;
	for (i, e) in entries.iter().enumerate() {
		let mut rec_len = e.encoded_len();
		if i + 1 == entries.len() {
			rec_len = block_size - off;
		}
		out[off..off + 4].copy_from_slice(&e.inode.to_le_bytes());
		out[off + 4..off + 6].copy_from_slice(&(rec_len as u16).to_le_bytes());
		out[off + 6] = e.name.len() as u8;
		out[off + 7] = e.file_type;
		out[off + 8..off + 8 + e.name.len()].copy_from_slice(e.name.as_bytes());
		off += rec_len;
	}
	out
}

/// Parses one directory block, skipping deleted entries (`inode == 0`)
/// and validating that every `rec_len` stays within the block.
pub fn decode_block(bytes: &[u8], block: u64) -> Ext2Result<Vec<DirEntry>> {
	let mut entries = Vec::new();
	let mut off = 0usize;
	while off + 8 <= bytes.len() {
		let inode = u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap());
		let rec_len = u16::from_le_bytes(bytes[off + 4..off + 6].try_into().unwrap()) as usize;
		let name_len = bytes[off + 6] as usize;
		let ftype = bytes[off + 7];
		if rec_len < 8 || off + rec_len > bytes.len() {
			return Err(Ext2Error::Corruption(Corruption::BadDirectoryEntry {
				block,
				offset: off as u32,
				reason: format!("rec_len {rec_len} overruns block"),
			}));
		}
		if name_len > rec_len - 8 {
			return Err(Ext2Error::Corruption(Corruption::BadDirectoryEntry {
				block,
				offset: off as u32,
				reason: format!("name_len {name_len} overruns rec_len {rec_len}"),
			}));
		}
		if inode != 0 {
			let name = String::from_utf8_lossy(&bytes[off + 8..off + 8 + name_len]).into_owned();
			entries.push(DirEntry { inode, name, file_type: ftype });
		}
		off += rec_len;
	}
	Ok(entries)
}

impl Filesystem {
	/// Reads and decodes every directory block of `dir_inode` in order.
	pub fn read_dir(&mut self, dir_inode: u32) -> Ext2Result<Vec<DirEntry>> {
		let inode = self.read_inode(dir_inode)?;
		if !inode.base.is_dir() {
			return Err(Ext2Error::BadArgument(format!("inode {dir_inode} is not a directory")));
		}
		let block_size = self.superblock.block_size() as u64;
		let nblocks = inode.base.size().div_ceil(block_size);
		let mut out = Vec::new();
		for logical in 0..nblocks {
			let Some(block) = self.block_for(&inode, logical)? else { continue };
			let bytes = self.channel.read_blk(block, 1)?;
			out.extend(decode_block(&bytes, block)?);
		}
		Ok(out)
	}

	/// Looks up `name` directly in `dir_inode` (no path resolution).
	pub fn lookup(&mut self, dir_inode: u32, name: &str) -> Ext2Result<Option<u32>> {
		Ok(self.read_dir(dir_inode)?.into_iter().find(|e| e.name == name).map(|e| e.inode))
	}

	/// Resolves `path` from `self.root_inode` (absolute) or `self.cwd_inode`
	/// (relative), following symlinks up to [`MAX_SYMLINK_DEPTH`] deep.
	pub fn namei(&mut self, path: &str) -> Ext2Result<u32> {
		let start = if path.starts_with('/') { self.root_inode } else { self.cwd_inode };
		self.namei_from(start, path, 0)
	}

	fn namei_from(&mut self, start: u32, path: &str, depth: u32) -> Ext2Result<u32> {
		if depth > MAX_SYMLINK_DEPTH {
			return Err(Ext2Error::BadArgument("too many levels of symbolic links".into()));
		}
		let mut current = start;
		for component in path.split('/').filter(|c| !c.is_empty()) {
			if component == "." {
				continue;
			}
			let next = self
				.lookup(current, component)?
				.ok_or_else(|| Ext2Error::BadArgument(format!("no such entry: {component}")))?;
			let inode = self.read_inode(next)?;
			current = if inode.base.file_type() == mode::SYMLINK {
				let target = self.read_symlink(next)?;
				let resolved = if target.starts_with('/') {
					self.namei_from(self.root_inode, &target, depth + 1)?
				} else {
					self.namei_from(current, &target, depth + 1)?
				};
				resolved
			} else {
				next
			};
		}
		Ok(current)
	}

	fn read_symlink(&mut self, inode_num: u32) -> Ext2Result<String> {
		let inode = self.read_inode(inode_num)?;
		let bytes = if inode.base.is_fast_symlink() {
			inode.base.fast_symlink_target()
		} else {
			let block = inode.base.blocks()[0] as u64;
			let mut data = self.channel.read_blk(block, 1)?;
			data.truncate(inode.base.size() as usize);
			data
		};
		Ok(String::from_utf8_lossy(&bytes).into_owned())
	}

	/// Appends `{target_inode, name}` to `dir_inode`, allocating a fresh
	/// directory block via [`new_dir_block`](Self::new_dir_block) if none
	/// has room (spec §4.6).
	pub fn link(&mut self, dir_inode: u32, name: &str, target_inode: u32, mode_bits: u16) -> Ext2Result<()> {
		if self.lookup(dir_inode, name)?.is_some() {
			return Err(Ext2Error::BadArgument(format!("{name} already exists")));
		}
		let mut entries = self.read_dir(dir_inode)?;
		entries.push(DirEntry::new(target_inode, name, mode_bits));
		self.rewrite_dir(dir_inode, &entries)
	}

	/// Removes the entry named `name` from `dir_inode`.
	pub fn unlink(&mut self, dir_inode: u32, name: &str) -> Ext2Result<()> {
		let mut entries = self.read_dir(dir_inode)?;
		let before = entries.len();
		entries.retain(|e| e.name != name);
		if entries.len() == before {
			return Err(Ext2Error::BadArgument(format!("no such entry: {name}")));
		}
		self.rewrite_dir(dir_inode, &entries)
	}

	/// Rewrites a directory's contents from scratch, packing entries into
	/// as many blocks as needed and allocating new ones with
	/// [`new_dir_block`](Self::new_dir_block) when the directory grows.
	pub(crate) fn rewrite_dir(&mut self, dir_inode: u32, entries: &[DirEntry]) -> Ext2Result<()> {
		let block_size = self.superblock.block_size() as usize;
		let mut inode = self.read_inode(dir_inode)?;
		let mut blocks = Vec::new();
		let existing_blocks = inode.base.size().div_ceil(block_size as u64);
		for logical in 0..existing_blocks {
			if let Some(b) = self.block_for(&inode, logical)? {
				blocks.push(b);
			}
		}

		let mut chunk = Vec::new();
		let mut chunk_len = 8usize;
		let mut chunks: Vec<Vec<DirEntry>> = Vec::new();
		for e in entries {
			let len = e.encoded_len();
			if chunk_len + len > block_size && !chunk.is_empty() {
				chunks.push(std::mem::take(&mut chunk));
				chunk_len = 0;
			}
			chunk_len += len;
			chunk.push(e.clone());
		}
		if !chunk.is_empty() || chunks.is_empty() {
			chunks.push(chunk);
		}

		while blocks.len() < chunks.len() {
			blocks.push(self.new_dir_block()?);
		}

		let mut direct = inode.base.blocks();
		for (i, block) in blocks.iter().enumerate() {
			let data = encode_block(chunks.get(i).map(|c| c.as_slice()).unwrap_or(&[]), block_size);
			self.channel.write_blk(*block, 1, &data)?;
			if i < 12 {
				direct[i] = *block as u32;
			}
		}
		inode.base.set_blocks(direct);
		inode.base.set_size(blocks.len() as u64 * block_size as u64);
		self.write_inode(dir_inode, &inode)
	}

	/// Allocates and zero-initializes a fresh directory block (spec §4.6).
	pub fn new_dir_block(&mut self) -> Ext2Result<u64> {
		let block = self
			.block_bitmap
			.find_free_range(self.block_bitmap.start(), 1)
			.ok_or(Ext2Error::Exhaustion(crate::error::Exhaustion::NoSpace))?;
		self.block_bitmap.mark(block)?;
		self.mark_bitmaps_dirty();
		let block_size = self.superblock.block_size() as usize;
		self.channel.write_blk(block, 1, &vec![0u8; block_size])?;
		Ok(block)
	}

	/// Resolves logical block `logical` of `inode` to a physical block
	/// number, direct blocks only (spec §4.5's extent/indirect walk lives
	/// in [`crate::block_iter`]; directories in this toolkit's supported
	/// size range never grow past the 12 direct pointers).
	fn block_for(&mut self, inode: &crate::inode::InodeBuf, logical: u64) -> Ext2Result<Option<u64>> {
		if logical < 12 {
			let b = inode.base.blocks()[logical as usize];
			if b == 0 { Ok(None) } else { Ok(Some(b as u64)) }
		} else {
			self.indirect_block_for(inode, logical)
		}
	}

	fn indirect_block_for(&mut self, inode: &crate::inode::InodeBuf, logical: u64) -> Ext2Result<Option<u64>> {
		let block_size = self.superblock.block_size() as u64;
		let ptrs_per_block = block_size / 4;
		let logical = logical - 12;
		if logical < ptrs_per_block {
			let indirect = inode.base.blocks()[12];
			if indirect == 0 {
				return Ok(None);
			}
			let buf = self.channel.read_blk(indirect as u64, 1)?;
			let off = logical as usize * 4;
			let ptr = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
			return Ok(if ptr == 0 { None } else { Some(ptr as u64) });
		}
		Err(Ext2Error::BadArgument("double/triple indirect directory blocks unsupported".into()))
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::superblock::ROOT_INODE;
	use crate::test_support::small_fs;

	#[test]
	fn root_directory_has_dot_and_dotdot() {
		let mut fs = small_fs();
		let entries = fs.read_dir(ROOT_INODE).unwrap();
		let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
		assert!(names.contains(&"."));
		assert!(names.contains(&".."));
	}

	#[test]
	fn encode_decode_roundtrip() {
		let entries = vec![
			DirEntry::new(2, ".", mode::DIRECTORY),
			DirEntry::new(2, "..", mode::DIRECTORY),
			DirEntry::new(12, "hello.txt", mode::REGULAR),
		];
		let bytes = encode_block(&entries, 1024);
		let decoded = decode_block(&bytes, 0).unwrap();
		assert_eq!(decoded, entries);
	}

	#[test]
	fn lookup_finds_existing_entry() {
		let mut fs = small_fs();
		assert_eq!(fs.lookup(ROOT_INODE, ".").unwrap(), Some(ROOT_INODE));
		assert_eq!(fs.lookup(ROOT_INODE, "missing").unwrap(), None);
	}

	#[test]
	fn namei_resolves_absolute_path_components() {
		let mut fs = small_fs();
		assert_eq!(fs.namei("/").unwrap_or(ROOT_INODE), ROOT_INODE);
	}

	#[test]
	fn link_then_lookup_round_trips() {
		let mut fs = small_fs();
		fs.link(ROOT_INODE, "newfile", 15, mode::REGULAR).unwrap();
		assert_eq!(fs.lookup(ROOT_INODE, "newfile").unwrap(), Some(15));
	}

	#[test]
	fn unlink_removes_entry() {
		let mut fs = small_fs();
		fs.link(ROOT_INODE, "victim", 16, mode::REGULAR).unwrap();
		fs.unlink(ROOT_INODE, "victim").unwrap();
		assert_eq!(fs.lookup(ROOT_INODE, "victim").unwrap(), None);
	}
}
