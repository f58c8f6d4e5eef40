//! Shared fixtures for unit tests across the crate.
//!
//! `small_fs` builds the smallest filesystem image the layout rules in
//! [`crate::superblock`]/[`crate::group_desc`] allow: one block group,
//! 4KiB blocks, 256-byte inodes, a root directory already linked.
//! Everything here is `#[cfg(test)]`-only and lives in its own module so
//! every other module's test block can pull in one `use` instead of
//! repeating the same dozen lines of setup.

#![cfg(test)]

use crate::dir::DirEntry;
use crate::filesystem::Filesystem;
use crate::group_desc::GroupDescriptorTable;
use crate::inode::{mode, InodeBuf, InodeDisk};
use crate::io_channel::{Channel, TestBackend};
use crate::superblock::{self, SuperblockDisk, EXT2_MAGIC};

const BLOCK_SIZE: u32 = 4096;
const BLOCKS_PER_GROUP: u32 = 8192;
const INODES_PER_GROUP: u32 = 128;
const TOTAL_BLOCKS: u64 = 512;

/// Block layout within the single group: superblock occupies bytes
/// [1024, 2048) of block 0; block 1 is the group descriptor table; block
/// 2 the block bitmap; block 3 the inode bitmap; blocks 4.. the inode
/// table; the first free data block follows it.
fn inode_table_blocks() -> u32 {
	(INODES_PER_GROUP as u64 * 256).div_ceil(BLOCK_SIZE as u64) as u32
}

/// Builds a small, internally consistent [`Filesystem`] backed by an
/// in-memory [`TestBackend`], with the root directory already containing
/// `.` and `..`.
pub fn small_fs() -> Filesystem {
	let mut sb = SuperblockDisk::default();
	sb.magic = EXT2_MAGIC;
	sb.log_block_size = 2; // 4096
	sb.first_data_block = 0;
	sb.blocks_per_group = BLOCKS_PER_GROUP;
	sb.fragments_per_group = BLOCKS_PER_GROUP;
	sb.inodes_per_group = INODES_PER_GROUP;
	sb.inode_size = 256;
	sb.rev_level = 1;
	sb.first_inode = superblock::FIRST_INODE_REV0;
	sb.set_total_blocks(TOTAL_BLOCKS);
	sb.inodes_count = INODES_PER_GROUP;
	sb.state = superblock::state::CLEAN;

	let block_bitmap_blk = 2u32;
	let inode_bitmap_blk = 3u32;
	let inode_table_blk = 4u32;
	let itable_blocks = inode_table_blocks();
	let first_free_data_block = inode_table_blk + itable_blocks;

	let mut gdt = GroupDescriptorTable::new(1, 32);
	gdt.entries[0].set_block_bitmap(block_bitmap_blk as u64);
	gdt.entries[0].set_inode_bitmap(inode_bitmap_blk as u64);
	gdt.entries[0].set_inode_table(inode_table_blk as u64);

	let backend = TestBackend::new(TOTAL_BLOCKS as usize * BLOCK_SIZE as usize);
	let mut channel = Channel::new(Box::new(backend), 1024);
	channel.write_byte(superblock::SUPERBLOCK_OFFSET, sb.as_bytes()).unwrap();
	channel.set_blocksize(BLOCK_SIZE).unwrap();
	let gdt_bytes = gdt.encode();
	let mut padded = gdt_bytes;
	padded.resize(BLOCK_SIZE as usize, 0);
	channel.write_blk(1, 1, &padded).unwrap();

	let mut fs = Filesystem::from_channel(channel, true).unwrap();

	fs.block_bitmap.mark_range(0, first_free_data_block as u64).unwrap();
	fs.inode_bitmap.mark_range(1, superblock::FIRST_INODE_REV0 as u64 - 1).unwrap();

	let root_data_block = first_free_data_block as u64;
	fs.block_bitmap.mark(root_data_block).unwrap();
	fs.inode_bitmap.mark(superblock::ROOT_INODE as u64).unwrap();

	let mut root = InodeDisk::default();
	root.mode = mode::DIRECTORY | 0o755;
	root.links_count = 2;
	root.set_size(BLOCK_SIZE as u64);
	let mut root_blocks = root.blocks();
	root_blocks[0] = root_data_block as u32;
	root.set_blocks(root_blocks);
	let root_buf = InodeBuf { base: root, extra: Vec::new() };
	fs.write_inode(superblock::ROOT_INODE, &root_buf).unwrap();

	let entries = vec![
		DirEntry::new(superblock::ROOT_INODE, ".", mode::DIRECTORY),
		DirEntry::new(superblock::ROOT_INODE, "..", mode::DIRECTORY),
	];
	let block = crate::dir::encode_block(&entries, BLOCK_SIZE as usize);
	fs.channel.write_blk(root_data_block, 1, &block).unwrap();

	fs.mark_bitmaps_dirty();
	fs.mark_super_dirty();
	fs.flush().unwrap();

	fs
}
