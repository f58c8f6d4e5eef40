//! The process-wide filesystem handle (spec §3) and its lifecycle:
//! `open`/`initialize`/`close`.
//!
//! Where the original e2fsprogs keeps `current_fs`/`root`/`cwd` as C
//! globals, this toolkit follows the spec's "Global filesystem handle →
//! explicit context" design note: [`Filesystem`] is an explicit value
//! threaded through every operation, and `root_inode`/`cwd_inode` are
//! fields on it rather than process state.

use crate::bitmap::{Bitmap, BitmapKind};
use crate::error::{Ext2Error, Ext2Result};
use crate::group_desc::GroupDescriptorTable;
use crate::io_channel::Channel;
use crate::superblock::{self, SuperblockDisk};
use crate::util::small_flags;
use std::path::{Path, PathBuf};

small_flags! {
	/// Dirty-state flags tracked on the handle (spec §3).
	pub struct DirtyFlags: u8 {
		const SUPER = 0x1;
		const BLOCK_BITMAP = 0x2;
		const INODE_BITMAP = 0x4;
		const CHANGED = 0x8;
		const VALID = 0x10;
	}
}

/// The process-wide filesystem state (spec §3): an open channel, the
/// mutable superblock, the group descriptor array, both bitmaps, and
/// dirty-state tracking.
pub struct Filesystem {
	pub path: PathBuf,
	pub writable: bool,
	pub channel: Channel,
	pub superblock: SuperblockDisk,
	pub group_descriptors: GroupDescriptorTable,
	pub block_bitmap: Bitmap,
	pub inode_bitmap: Bitmap,
	pub dirty: DirtyFlags,
	/// Settable per-session root, distinct from the real root (spec §4.6
	/// `namei`).
	pub root_inode: u32,
	pub cwd_inode: u32,
}

impl Filesystem {
	/// Opens an existing filesystem. Refuses to open for writing if an
	/// RO_COMPAT bit is unknown (spec §6/§7 `FEATURE_UNSUPPORTED`).
	pub fn open(path: &Path, writable: bool) -> Ext2Result<Self> {
		let channel = Channel::open(path, writable, superblock::SUPERBLOCK_OFFSET as u32)?;
		let mut fs = Self::from_channel(channel, writable)?;
		fs.path = path.to_path_buf();
		Ok(fs)
	}

	/// Builds a handle from an already-open [`Channel`] (any backend),
	/// reading and validating the superblock and group descriptor table
	/// from it. Used by `open` and by the in-memory test harness.
	pub fn from_channel(mut channel: Channel, writable: bool) -> Ext2Result<Self> {
		let mut raw = vec![0u8; 1024];
		channel.read_byte(superblock::SUPERBLOCK_OFFSET, &mut raw)?;
		let superblock = SuperblockDisk::from_bytes(&raw)?;
		superblock.validate()?;
		if writable && superblock.requires_readonly() {
			let unknown = superblock.feature_ro_compat & !superblock::ro_compat::SUPPORTED;
			return Err(Ext2Error::FeatureUnsupported { field: "RO_COMPAT", bit: unknown });
		}

		channel.set_blocksize(superblock.block_size())?;

		let group_count = superblock.group_count();
		let desc_size = if superblock.has_incompat(superblock::incompat::BIT64) { 64 } else { 32 };
		let table_block = GroupDescriptorTable::table_block(&superblock);
		let gdt_bytes_needed = group_count as usize * desc_size as usize;
		let gdt_blocks = (gdt_bytes_needed as u32).div_ceil(superblock.block_size());
		let gdt_bytes = channel.read_blk(table_block, gdt_blocks.max(1))?;
		let group_descriptors = GroupDescriptorTable::decode(&gdt_bytes, group_count, desc_size)?;

		for (i, gd) in group_descriptors.entries.iter().enumerate() {
			gd.validate(i as u32, &superblock)?;
		}

		let mut fs = Self {
			path: PathBuf::new(),
			writable,
			channel,
			block_bitmap: Bitmap::new(
				BitmapKind::Block,
				superblock.first_data_block as u64,
				superblock.total_blocks() - 1,
				"block bitmap",
			),
			inode_bitmap: Bitmap::new(BitmapKind::Inode, 1, superblock.inodes_count as u64, "inode bitmap"),
			superblock,
			group_descriptors,
			dirty: DirtyFlags::VALID,
			root_inode: superblock::ROOT_INODE,
			cwd_inode: superblock::ROOT_INODE,
		};
		fs.load_bitmaps()?;
		Ok(fs)
	}

	fn load_bitmaps(&mut self) -> Ext2Result<()> {
		let block_size = self.superblock.block_size();
		for (i, gd) in self.group_descriptors.entries.iter().enumerate() {
			let group = i as u32;
			let bpg = self.superblock.blocks_per_group;
			let block_bytes = self.channel.read_blk(gd.block_bitmap(), 1)?;
			let group_block_bitmap =
				Bitmap::decode(BitmapKind::Block, 0, bpg as u64 - 1, "group block bitmap", &block_bytes);
			let first_block = self.superblock.first_data_block as u64 + group as u64 * bpg as u64;
			let last_block = (first_block + bpg as u64 - 1).min(self.superblock.total_blocks() - 1);
			for b in first_block..=last_block {
				if group_block_bitmap.test(b - first_block)? {
					self.block_bitmap.mark(b)?;
				}
			}

			let ipg = self.superblock.inodes_per_group;
			let inode_bytes = self.channel.read_blk(gd.inode_bitmap(), 1)?;
			let group_inode_bitmap =
				Bitmap::decode(BitmapKind::Inode, 0, ipg as u64 - 1, "group inode bitmap", &inode_bytes);
			let first_inode = group as u64 * ipg as u64 + 1;
			for off in 0..ipg as u64 {
				if group_inode_bitmap.test(off)? {
					self.inode_bitmap.mark(first_inode + off)?;
				}
			}
			let _ = block_size;
		}
		Ok(())
	}

	/// Flushes dirty structures in the defined order (bitmaps → group
	/// descriptors → master superblock), then clears dirty flags.
	pub fn close(mut self) -> Ext2Result<()> {
		self.flush()?;
		self.channel.flush()?;
		Ok(())
	}

	pub fn flush(&mut self) -> Ext2Result<()> {
		if self.dirty.contains(DirtyFlags::BLOCK_BITMAP) || self.dirty.contains(DirtyFlags::INODE_BITMAP) {
			self.flush_bitmaps()?;
			self.dirty.remove(DirtyFlags::BLOCK_BITMAP);
			self.dirty.remove(DirtyFlags::INODE_BITMAP);
		}
		self.flush_group_descriptors()?;
		if self.dirty.contains(DirtyFlags::SUPER) {
			self.flush_superblock()?;
			self.dirty.remove(DirtyFlags::SUPER);
		}
		self.channel.flush()
	}

	fn flush_bitmaps(&mut self) -> Ext2Result<()> {
		let block_size = self.superblock.block_size() as usize;
		let bpg = self.superblock.blocks_per_group;
		let ipg = self.superblock.inodes_per_group;
		for (i, gd) in self.group_descriptors.entries.iter().enumerate() {
			let group = i as u32;
			let first_block = self.superblock.first_data_block as u64 + group as u64 * bpg as u64;
			let last_block = (first_block + bpg as u64 - 1).min(self.superblock.total_blocks() - 1);
			let mut group_bm = Bitmap::new(BitmapKind::Block, 0, bpg as u64 - 1, "flush");
			for b in first_block..=last_block {
				if self.block_bitmap.test(b)? {
					group_bm.mark(b - first_block)?;
				}
			}
			self.channel.write_blk(gd.block_bitmap(), 1, &group_bm.encode(block_size))?;

			let first_inode = group as u64 * ipg as u64 + 1;
			let mut group_im = Bitmap::new(BitmapKind::Inode, 0, ipg as u64 - 1, "flush");
			for off in 0..ipg as u64 {
				if self.inode_bitmap.test(first_inode + off)? {
					group_im.mark(off)?;
				}
			}
			self.channel.write_blk(gd.inode_bitmap(), 1, &group_im.encode(block_size))?;
		}
		Ok(())
	}

	fn flush_group_descriptors(&mut self) -> Ext2Result<()> {
		let uuid = self.superblock.uuid;
		let desc_size = self.group_descriptors.desc_size;
		for (i, gd) in self.group_descriptors.entries.iter_mut().enumerate() {
			gd.checksum = gd.compute_checksum(&uuid, i as u32, desc_size);
		}
		let bytes = self.group_descriptors.encode();
		let table_block = GroupDescriptorTable::table_block(&self.superblock);
		let blocks = (bytes.len() as u32).div_ceil(self.superblock.block_size());
		let mut padded = bytes;
		padded.resize(blocks as usize * self.superblock.block_size() as usize, 0);
		self.channel.write_blk(table_block, blocks, &padded)
	}

	fn flush_superblock(&mut self) -> Ext2Result<()> {
		self.superblock.free_blocks_count =
			(self.superblock.total_blocks() - self.block_bitmap.count_set()) as u32;
		self.superblock.free_inodes_count = self.superblock.inodes_count - self.inode_bitmap.count_set() as u32;
		let bytes = self.superblock.as_bytes();
		self.channel.write_byte(superblock::SUPERBLOCK_OFFSET, bytes)
	}

	pub fn mark_super_dirty(&mut self) {
		self.dirty.insert(DirtyFlags::SUPER);
		self.dirty.insert(DirtyFlags::CHANGED);
	}

	pub fn mark_bitmaps_dirty(&mut self) {
		self.dirty.insert(DirtyFlags::BLOCK_BITMAP);
		self.dirty.insert(DirtyFlags::INODE_BITMAP);
		self.dirty.insert(DirtyFlags::CHANGED);
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::test_support::small_fs;

	#[test]
	fn dirty_flags_track_super_and_bitmap_writes() {
		let mut fs = small_fs();
		assert!(!fs.dirty.contains(DirtyFlags::SUPER));
		fs.mark_super_dirty();
		fs.mark_bitmaps_dirty();
		assert!(fs.dirty.contains(DirtyFlags::SUPER));
		assert!(fs.dirty.contains(DirtyFlags::BLOCK_BITMAP));
		fs.flush().unwrap();
		assert!(!fs.dirty.contains(DirtyFlags::SUPER));
		assert!(!fs.dirty.contains(DirtyFlags::BLOCK_BITMAP));
	}

	#[test]
	fn close_flushes_without_error() {
		let fs = small_fs();
		fs.close().unwrap();
	}
}
