//! The ext4 extent tree: header/node layout and the walk used for
//! extent-mapped inodes (spec §3, `flags::EXTENTS`).
//!
//! No teacher analogue (`mkfs/src/ext2.rs` only ever builds the classic
//! indirect-block layout); grounded instead on spec §3's description of
//! the header (`magic=0xF30A, entries, max, depth, generation`) and the
//! internal/leaf node shapes, in the same manual `#[repr(C, packed)]`
//! plus accessor-method style [`crate::group_desc::GroupDescriptor`]
//! uses for its 64-bit split fields.

use crate::block_iter::{visit, BlockRef, Visitor};
use crate::error::{Corruption, Ext2Error, Ext2Result};
use crate::filesystem::Filesystem;
use crate::inode::InodeBuf;
use crate::util;

pub const EXTENT_MAGIC: u16 = 0xF30A;
/// High bit of `len` in a leaf extent: when set, the extent is
/// uninitialized (preallocated but unwritten) and `len - 0x8000` is its
/// true block count.
const UNINIT_BIT: u16 = 0x8000;

#[repr(C, packed)]
#[derive(Clone, Copy, Default)]
struct ExtentHeader {
	magic: u16,
	entries: u16,
	max: u16,
	depth: u16,
	generation: u32,
}

const _: () = assert!(std::mem::size_of::<ExtentHeader>() == 12);

/// An internal (index) node entry: maps a logical-block range starting at
/// `block` to the child node at `leaf`.
#[repr(C, packed)]
#[derive(Clone, Copy, Default)]
struct ExtentIndex {
	block: u32,
	leaf_lo: u32,
	leaf_hi: u16,
	unused: u16,
}

const _: () = assert!(std::mem::size_of::<ExtentIndex>() == 12);

/// A leaf node entry: maps `len` logical blocks starting at `block` to
/// physical blocks starting at `start`.
#[repr(C, packed)]
#[derive(Clone, Copy, Default)]
struct ExtentLeaf {
	block: u32,
	len: u16,
	start_hi: u16,
	start_lo: u32,
}

const _: () = assert!(std::mem::size_of::<ExtentLeaf>() == 12);

impl ExtentLeaf {
	fn start(&self) -> u64 {
		(self.start_lo as u64) | ((self.start_hi as u64) << 32)
	}

	fn length(&self) -> u16 {
		self.len & !UNINIT_BIT
	}

	fn uninitialized(&self) -> bool {
		self.len & UNINIT_BIT != 0
	}
}

impl ExtentIndex {
	fn leaf(&self) -> u64 {
		(self.leaf_lo as u64) | ((self.leaf_hi as u64) << 32)
	}
}

/// The 60 inline bytes of `InodeDisk::block` reinterpreted as an extent
/// tree root: a 12-byte header followed by up to 4 entries (index or
/// leaf, chosen by `header.depth`).
fn root_bytes(inode: &InodeBuf) -> [u8; 60] {
	let ptr = std::ptr::addr_of!(inode.base.block) as *const u8;
	let mut out = [0u8; 60];
	unsafe { std::ptr::copy_nonoverlapping(ptr, out.as_mut_ptr(), 60) };
	out
}

fn parse_header(bytes: &[u8]) -> Ext2Result<ExtentHeader> {
	if bytes.len() < 12 {
		return Err(Ext2Error::BadArgument("extent node shorter than header".into()));
	}
	let hdr: ExtentHeader = unsafe { std::ptr::read_unaligned(bytes.as_ptr() as *const ExtentHeader) };
	let magic = hdr.magic;
	if magic != EXTENT_MAGIC {
		return Err(Ext2Error::Corruption(Corruption::BadExtentNode {
			block: 0,
			reason: format!("bad magic {:#x}", magic),
		}));
	}
	Ok(hdr)
}

impl Filesystem {
	/// Walks the extent tree rooted in `inode`'s inline 60 bytes,
	/// reporting every leaf's physical blocks and (with
	/// [`crate::block_iter::IterFlags::DEPTH_TRAVERSE`]-equivalent intent,
	/// always for extent nodes since the tree itself is metadata) every
	/// internal node block, through `visitor`.
	pub fn iterate_extents(&mut self, inode_num: u32, inode: &mut InodeBuf, visitor: &mut Visitor) -> Ext2Result<bool> {
		let root = root_bytes(inode);
		let hdr = parse_header(&root)?;
		let mut changed = false;
		let mut local = root.to_vec();
		self.walk_extent_node(inode_num, &mut local, hdr.depth, visitor, &mut changed)?;
		if changed {
			let ptr = std::ptr::addr_of_mut!(inode.base.block) as *mut u8;
			unsafe { std::ptr::copy_nonoverlapping(local.as_ptr(), ptr, 60) };
			self.write_inode(inode_num, inode)?;
		}
		Ok(changed)
	}

	/// Walks one extent node's entries in place. `node` holds the node's own
	/// bytes (the inode's inline 60 bytes for the root, or a freshly-read
	/// child block otherwise); any leaf/index entry the visitor asks to
	/// relocate is rewritten directly into `node` and `changed` is set, the
	/// same contract [`crate::block_iter`]'s indirect-block walk uses for its
	/// `new_ptr != ptr` pointer rewrites. Writing the updated bytes back to
	/// disk (or, for the root, into the inode) is the caller's job.
	fn walk_extent_node(
		&mut self,
		inode_num: u32,
		node: &mut [u8],
		depth: u16,
		visitor: &mut Visitor,
		changed: &mut bool,
	) -> Ext2Result<()> {
		let hdr = parse_header(node)?;
		let entries = hdr.entries as usize;
		if depth == 0 {
			for i in 0..entries {
				let off = 12 + i * 12;
				let mut leaf: ExtentLeaf = unsafe { std::ptr::read_unaligned(node[off..].as_ptr() as *const ExtentLeaf) };
				let orig_start = leaf.start();
				let mut new_start = orig_start;
				let mut aborted = false;
				for b in 0..leaf.length() as u64 {
					let physical = orig_start + b;
					let logical = leaf.block as u64 + b;
					let (new_phys, bits) = visitor(BlockRef { logical, physical, is_metadata: false });
					if bits & visit::ERROR != 0 {
						return Err(Ext2Error::Corruption(Corruption::BadExtentNode {
							block: physical,
							reason: "visitor reported an error".into(),
						}));
					}
					// The mover phase only ever relocates a contiguous run of
					// blocks as a unit, so the first block's new address
					// carries the whole extent's shift.
					if b == 0 && new_phys != physical {
						new_start = new_phys;
					}
					if bits & visit::ABORT != 0 {
						aborted = true;
						break;
					}
				}
				if new_start != orig_start {
					leaf.start_lo = new_start as u32;
					leaf.start_hi = (new_start >> 32) as u16;
					node[off..off + 12].copy_from_slice(unsafe { util::reinterpret(&leaf) });
					*changed = true;
				}
				let _ = leaf.uninitialized();
				if aborted {
					return Ok(());
				}
			}
			return Ok(());
		}
		for i in 0..entries {
			let off = 12 + i * 12;
			let idx: ExtentIndex = unsafe { std::ptr::read_unaligned(node[off..].as_ptr() as *const ExtentIndex) };
			let child_block = idx.leaf();
			let mut child = self.channel.read_blk(child_block, 1)?;
			let (new_block, bits) =
				visitor(BlockRef { logical: idx.block as u64, physical: child_block, is_metadata: true });
			if bits & visit::ERROR != 0 {
				return Err(Ext2Error::Corruption(Corruption::BadExtentNode {
					block: child_block,
					reason: "visitor reported an error".into(),
				}));
			}
			let mut child_changed = false;
			self.walk_extent_node(inode_num, &mut child, depth - 1, visitor, &mut child_changed)?;
			if child_changed {
				self.channel.write_blk(child_block, 1, &child)?;
			}
			if new_block != child_block {
				let mut idx = idx;
				idx.leaf_lo = new_block as u32;
				idx.leaf_hi = (new_block >> 32) as u16;
				node[off..off + 12].copy_from_slice(unsafe { util::reinterpret(&idx) });
				*changed = true;
			}
			if bits & visit::ABORT != 0 {
				return Ok(());
			}
		}
		Ok(())
	}

	/// Validates that `inode`'s extent tree header is well-formed (magic,
	/// `entries <= max`, `depth` within the 5-level bound spec §3 allows),
	/// without walking leaves. Used by the checker's per-inode pass.
	pub fn validate_extent_header(&self, inode: &InodeBuf) -> Ext2Result<()> {
		let root = root_bytes(inode);
		let hdr = parse_header(&root)?;
		let (entries, max, depth) = (hdr.entries, hdr.max, hdr.depth);
		if entries > max {
			return Err(Ext2Error::Corruption(Corruption::BadExtentNode {
				block: 0,
				reason: format!("entries {} exceeds max {}", entries, max),
			}));
		}
		if depth > 5 {
			return Err(Ext2Error::Corruption(Corruption::BadExtentNode {
				block: 0,
				reason: format!("depth {} exceeds bound", depth),
			}));
		}
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn leaf_root(entries: &[(u32, u16, u64)]) -> [u8; 60] {
		let mut buf = [0u8; 60];
		let hdr = ExtentHeader { magic: EXTENT_MAGIC, entries: entries.len() as u16, max: 4, depth: 0, generation: 0 };
		buf[..12].copy_from_slice(unsafe { util::reinterpret(&hdr) });
		for (i, (block, len, start)) in entries.iter().enumerate() {
			let leaf = ExtentLeaf { block: *block, len: *len, start_hi: (*start >> 32) as u16, start_lo: *start as u32 };
			let off = 12 + i * 12;
			buf[off..off + 12].copy_from_slice(unsafe { util::reinterpret(&leaf) });
		}
		buf
	}

	#[test]
	fn header_parses_magic_and_bounds() {
		let root = leaf_root(&[(0, 4, 100)]);
		let hdr = parse_header(&root).unwrap();
		assert_eq!({ hdr.magic }, EXTENT_MAGIC);
		assert_eq!({ hdr.entries }, 1);
	}

	#[test]
	fn leaf_length_masks_uninit_bit() {
		let leaf = ExtentLeaf { block: 0, len: 4 | UNINIT_BIT, start_hi: 0, start_lo: 10 };
		assert_eq!(leaf.length(), 4);
		assert!(leaf.uninitialized());
	}

	#[test]
	fn rejects_bad_magic() {
		let mut root = leaf_root(&[(0, 1, 1)]);
		root[0] = 0;
		assert!(parse_header(&root).is_err());
	}
}
