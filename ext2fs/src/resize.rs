//! Offline resize engine (spec §4.7): the 8-phase grow/shrink pipeline.
//!
//! Grounded on `examples/original_source/resize/resize2fs.c`'s phase
//! sequence (`adjust_fs_info`, `blocks_to_move`, `block_mover`,
//! `inode_scan_and_fix`, `inode_ref_fix`, `move_itables`,
//! `resize2fs_calculate_summary_stats`, the final three commit writes in
//! `resize_fs`), reworked per the spec's "Setjmp/longjmp-style fatal_error →
//! typed fallible returns" design note: each phase returns an [`Ext2Result`]
//! and the driver tags the first failure with the [`Phase`] it occurred in,
//! rather than unwinding through a `longjmp`.
//!
//! **Scoping decision** (recorded in `DESIGN.md`): this implementation does
//! not repack the metadata layout of block groups that survive a resize —
//! an existing group keeps its block/inode bitmap and inode table at
//! exactly the blocks it already occupied. Only the trailing groups added
//! by a grow, or removed by a shrink, change shape. This keeps phases 2, 3
//! and 6 a direct consequence of "did this block fall off the end" rather
//! than the original's fully general meta_bg/flex_bg-aware repacking, while
//! still satisfying every invariant and end-to-end scenario in spec §8.

use crate::bitmap::{Bitmap, BitmapKind};
use crate::block_iter::{self, IterFlags};
use crate::error::{Exhaustion, Ext2Error, Ext2Result};
use crate::filesystem::Filesystem;
use crate::group_desc::GroupDescriptorTable;
use crate::inode;
use crate::range_table::RangeTable;
use crate::superblock::{self, SuperblockDisk};
use std::collections::BTreeSet;

/// Heuristic slack added to the trailing-group-size rejection check, named
/// per spec §9's open-question resolution rather than left as a bare
/// literal ("policy parameter, not an invariant").
pub const MIN_TRAILING_SLACK: u64 = 50;

/// Which of the 8 phases a resize failure occurred in, so the caller (and
/// the checker, on a later re-open) knows how much of the pipeline ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
	AdjustMetadata,
	DetermineMoves,
	BlockMover,
	InodeScan,
	InodeRefFix,
	MoveItables,
	PostMoveFixups,
	Commit,
}

/// A resize failure, tagged with the phase it occurred in. Phases 1–2 are
/// fully safe to abandon (spec §5 "Cancellation"); phases 3–7 leave the
/// filesystem's `ERRORS` state bit set for the checker to clear; phase 8's
/// three commit writes are bracketed by flushes and not individually
/// cancelable.
#[derive(Debug)]
pub struct PhaseError {
	pub phase: Phase,
	pub source: Ext2Error,
}

impl std::fmt::Display for PhaseError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "resize failed during {:?}: {}", self.phase, self.source)
	}
}

impl std::error::Error for PhaseError {}

fn wrap<T>(phase: Phase, r: Ext2Result<T>) -> Result<T, PhaseError> {
	r.map_err(|source| PhaseError { phase, source })
}

/// A progress tick (spec §5): per-group for the metadata moves of phase 6,
/// per-inode for the scan of phase 4, per-byte-fraction for the block
/// copies of phase 3.
#[derive(Debug, Clone, Copy)]
pub enum Tick {
	Phase(Phase),
	Group { done: u32, total: u32 },
	Inode { done: u32, total: u32 },
	Bytes { done: u64, total: u64 },
}

/// Returning `false` requests cancellation; the engine checks after every
/// tick, per spec §5 ("the caller MUST check after each phase").
pub type Progress<'a> = dyn FnMut(Tick) -> bool + 'a;

fn tick(progress: &mut Progress, t: Tick) -> Ext2Result<()> {
	if progress(t) {
		Ok(())
	} else {
		Err(Ext2Error::Canceled)
	}
}

/// Two-tier first-fit allocator for relocation destinations (spec §4.7
/// "Block allocator"): `AVOID_OLD` skips blocks the old layout still holds
/// allocated; once a full scan fails, `DESPERATION` retries honoring only
/// the new bitmap and the reserve bitmap.
struct BlockAllocator {
	next: u64,
	desperation: bool,
}

impl BlockAllocator {
	fn new(start: u64) -> Self {
		Self { next: start, desperation: false }
	}

	fn alloc(&mut self, new_bitmap: &mut Bitmap, reserve: &Bitmap, old_bitmap: &Bitmap) -> Ext2Result<u64> {
		loop {
			while self.next <= new_bitmap.logical_end() {
				let b = self.next;
				self.next += 1;
				if reserve.test(b).unwrap_or(true) {
					continue;
				}
				if new_bitmap.test(b).unwrap_or(true) {
					continue;
				}
				if !self.desperation && old_bitmap.test(b).unwrap_or(false) {
					continue;
				}
				new_bitmap.mark(b)?;
				return Ok(b);
			}
			if self.desperation {
				return Err(Ext2Error::Exhaustion(Exhaustion::NoSpace));
			}
			self.desperation = true;
			self.next = new_bitmap.start();
		}
	}
}

/// Resources the resize context exclusively owns (spec §5 "Resource
/// ownership"): the two scratch bitmaps, both relocation tables, and enough
/// of the old layout to read inodes and blocks that the new descriptor
/// table no longer describes.
pub struct ResizeContext {
	old_sb: SuperblockDisk,
	old_gdt: GroupDescriptorTable,
	old_block_bitmap: Bitmap,
	old_inode_bitmap: Bitmap,
	old_inodes_count: u32,
	/// Every old group's own bitmap/inode-table/backup footprint. A group
	/// dropped by a shrink never needs its metadata relocated — only file
	/// data found beyond the new size does — so phase 2 excludes these.
	old_reserve_blocks: Bitmap,
	move_blocks: Bitmap,
	reserve_blocks: Bitmap,
	block_relocation: RangeTable,
	inode_relocation: RangeTable,
	dir_blocks: Vec<u64>,
	new_size: u64,
	allocator: BlockAllocator,
}

fn inode_table_blocks(sb: &SuperblockDisk) -> u64 {
	(sb.inodes_per_group as u64 * sb.inode_size() as u64).div_ceil(sb.block_size() as u64)
}

fn gdt_blocks_for(group_count: u32, desc_size: u16, block_size: u32) -> u64 {
	let per_block = (block_size as u64 / desc_size as u64).max(1);
	(group_count as u64).div_ceil(per_block)
}

/// Per-group overhead in blocks: the two bitmaps, the inode table, and —
/// for groups that host a backup under the active sparse-super policy —
/// the backup superblock, descriptor table, and reserved-GDT blocks.
fn group_overhead_blocks(sb: &SuperblockDisk, group: u32, group_count: u32, desc_size: u16) -> u64 {
	let mut overhead = 2 + inode_table_blocks(sb);
	if superblock::hosts_backup(sb, group) {
		overhead += 1 + gdt_blocks_for(group_count, desc_size, sb.block_size()) + sb.reserved_gdt_blocks as u64;
	}
	overhead
}

/// The natural (non-scanned) metadata position for a brand-new group:
/// right after its backup superblock/descriptor/reserved-GDT blocks, if
/// any, else at the group's first block.
fn natural_group_layout(sb: &SuperblockDisk, group: u32, group_count: u32, desc_size: u16) -> (u64, u64, u64) {
	let mut cur = sb.first_data_block as u64 + group as u64 * sb.blocks_per_group as u64;
	if superblock::hosts_backup(sb, group) {
		cur += 1 + gdt_blocks_for(group_count, desc_size, sb.block_size()) + sb.reserved_gdt_blocks as u64;
	}
	(cur, cur + 1, cur + 2)
}

/// Finds the first free inode slot in `[1, limit]`, marking it allocated.
fn alloc_inode_slot(bitmap: &mut Bitmap, limit: u64) -> Ext2Result<u32> {
	for n in 1..=limit {
		if !bitmap.test(n)? {
			bitmap.mark(n)?;
			return Ok(n as u32);
		}
	}
	Err(Ext2Error::Exhaustion(Exhaustion::NoSpace))
}

/// **Phase 1 — adjust metadata.** Computes the new group count and inode
/// count, rejects a too-small trailing group or an inode-count overflow,
/// resizes both bitmaps, and lays out a fresh group-descriptor table:
/// existing groups keep their metadata blocks unchanged, new groups get a
/// natural-position placement. Marks the on-disk state `ERRORS` so an
/// abort from here on forces a full check.
pub fn phase1_adjust_metadata(fs: &mut Filesystem, new_size: u64) -> Ext2Result<ResizeContext> {
	let old_sb = fs.superblock;
	let old_gdt = fs.group_descriptors.clone();
	let old_block_bitmap = fs.block_bitmap.clone();
	let old_inode_bitmap = fs.inode_bitmap.clone();
	let desc_size = fs.group_descriptors.desc_size;
	let fdb = old_sb.first_data_block as u64;
	let bpg = old_sb.blocks_per_group as u64;

	if new_size <= fdb {
		return Err(Ext2Error::BadArgument("new size does not leave room for any block group".into()));
	}
	let new_group_count = ((new_size - fdb) as u64).div_ceil(bpg) as u32;

	let last_group = new_group_count - 1;
	let last_group_first = fdb + last_group as u64 * bpg;
	let last_group_blocks = new_size - last_group_first;
	let overhead = group_overhead_blocks(&old_sb, last_group, new_group_count, desc_size);
	if last_group_blocks < overhead + MIN_TRAILING_SLACK {
		return Err(Ext2Error::BadArgument(format!(
			"trailing group holds only {last_group_blocks} blocks, needs at least {}",
			overhead + MIN_TRAILING_SLACK
		)));
	}

	let new_inodes_count_u64 = old_sb.inodes_per_group as u64 * new_group_count as u64;
	if new_inodes_count_u64 > u32::MAX as u64 {
		return Err(Ext2Error::Exhaustion(Exhaustion::InodeCountOverflow));
	}
	let new_inodes_count = new_inodes_count_u64 as u32;

	let union_blocks_end = old_sb.total_blocks().max(new_size) - 1;
	fs.block_bitmap.resize(union_blocks_end, union_blocks_end)?;
	let union_inodes_end = (old_sb.inodes_count as u64).max(new_inodes_count_u64);
	fs.inode_bitmap.resize(union_inodes_end, union_inodes_end)?;

	let mut new_gdt = GroupDescriptorTable::new(new_group_count, desc_size);
	let copy_count = new_group_count.min(old_sb.group_count()) as usize;
	new_gdt.entries[..copy_count].copy_from_slice(&old_gdt.entries[..copy_count]);

	let mut reserve_blocks = Bitmap::new(BitmapKind::Block, fdb, union_blocks_end, "resize reserve");
	let itb = inode_table_blocks(&old_sb);
	for gd in &new_gdt.entries[..copy_count] {
		reserve_blocks.mark(gd.block_bitmap())?;
		reserve_blocks.mark(gd.inode_bitmap())?;
		reserve_blocks.mark_range(gd.inode_table(), itb)?;
	}

	for group in copy_count as u32..new_group_count {
		let (mut bb, mut ib, mut it) = natural_group_layout(&old_sb, group, new_group_count, desc_size);
		if fs.block_bitmap.test(bb)? || fs.block_bitmap.test(ib)? || fs.block_bitmap.test_range(it, itb)? {
			// Natural position already taken — shouldn't happen for a
			// brand-new trailing group, but fall back to a scan per spec.
			let group_first = fdb + group as u64 * bpg;
			bb = fs.block_bitmap.find_free_range(group_first, 1).ok_or(Ext2Error::Exhaustion(Exhaustion::NoSpace))?;
			ib = fs.block_bitmap.find_free_range(bb + 1, 1).ok_or(Ext2Error::Exhaustion(Exhaustion::NoSpace))?;
			it = fs.block_bitmap.find_free_range(ib + 1, itb).ok_or(Ext2Error::Exhaustion(Exhaustion::NoSpace))?;
		}
		fs.block_bitmap.mark(bb)?;
		fs.block_bitmap.mark(ib)?;
		fs.block_bitmap.mark_range(it, itb)?;
		reserve_blocks.mark(bb)?;
		reserve_blocks.mark(ib)?;
		reserve_blocks.mark_range(it, itb)?;

		if superblock::hosts_backup(&old_sb, group) {
			let group_first = fdb + group as u64 * bpg;
			let backup_len = 1 + gdt_blocks_for(new_group_count, desc_size, old_sb.block_size()) + old_sb.reserved_gdt_blocks as u64;
			fs.block_bitmap.mark_range(group_first, backup_len)?;
			reserve_blocks.mark_range(group_first, backup_len)?;
		}

		new_gdt.entries[group as usize].set_block_bitmap(bb);
		new_gdt.entries[group as usize].set_inode_bitmap(ib);
		new_gdt.entries[group as usize].set_inode_table(it);
	}

	let mut old_reserve_blocks = Bitmap::new(BitmapKind::Block, fdb, union_blocks_end, "resize old reserve");
	for (group, gd) in old_gdt.entries.iter().enumerate() {
		old_reserve_blocks.mark(gd.block_bitmap())?;
		old_reserve_blocks.mark(gd.inode_bitmap())?;
		old_reserve_blocks.mark_range(gd.inode_table(), itb)?;
		if superblock::hosts_backup(&old_sb, group as u32) {
			let group_first = fdb + group as u64 * bpg;
			let backup_len = 1 + gdt_blocks_for(old_sb.group_count(), old_gdt.desc_size, old_sb.block_size()) + old_sb.reserved_gdt_blocks as u64;
			old_reserve_blocks.mark_range(group_first, backup_len)?;
		}
	}

	let old_inodes_count = old_sb.inodes_count;
	fs.group_descriptors = new_gdt;
	fs.superblock.set_total_blocks(new_size);
	fs.superblock.inodes_count = new_inodes_count;
	fs.superblock.state |= superblock::state::ERRORS;
	fs.mark_super_dirty();
	fs.mark_bitmaps_dirty();

	Ok(ResizeContext {
		old_sb,
		old_gdt,
		old_block_bitmap,
		old_inode_bitmap,
		old_inodes_count,
		old_reserve_blocks,
		move_blocks: Bitmap::new(BitmapKind::Block, fdb, union_blocks_end, "resize move"),
		reserve_blocks,
		block_relocation: RangeTable::new(),
		inode_relocation: RangeTable::new(),
		dir_blocks: Vec::new(),
		new_size,
		allocator: BlockAllocator::new(fdb),
	})
}

/// **Phase 2 — determine blocks to move.** Under the scoping decision
/// above, the only blocks that must move are ones that were allocated in
/// the old layout but now fall at or beyond `new_size` (a shrink).
pub fn phase2_determine_moves(ctx: &mut ResizeContext) -> Ext2Result<()> {
	if ctx.new_size < ctx.old_sb.total_blocks() {
		for b in ctx.new_size..ctx.old_sb.total_blocks() {
			if ctx.old_block_bitmap.test(b)? && !ctx.old_reserve_blocks.test(b)? {
				ctx.move_blocks.mark(b)?;
			}
		}
	}
	Ok(())
}

/// **Phase 3 — block mover.** Allocates a destination for every block in
/// `move_blocks`, copies its data, records the relocation, and flushes
/// after each copy so an abort mid-move is restart-safe.
pub fn phase3_block_mover(fs: &mut Filesystem, ctx: &mut ResizeContext, progress: &mut Progress) -> Ext2Result<()> {
	let total = ctx.move_blocks.count_set();
	let mut done = 0u64;
	let start = ctx.move_blocks.start();
	let end = ctx.move_blocks.logical_end();
	for b in start..=end {
		if !ctx.move_blocks.test(b)? {
			continue;
		}
		let new_b = ctx.allocator.alloc(&mut fs.block_bitmap, &ctx.reserve_blocks, &ctx.old_block_bitmap)?;
		let data = fs.channel.read_blk(b, 1)?;
		fs.channel.write_blk(new_b, 1, &data)?;
		fs.channel.flush()?;
		ctx.block_relocation.add(b, new_b);
		done += 1;
		tick(progress, Tick::Bytes { done, total })?;
	}
	Ok(())
}

/// **Phase 4 — inode table scan & fix.** Walks every allocated inode:
/// rewrites a relocated ACL block, renumbers an inode that now falls above
/// the new inode count, rewrites any relocated data block found while
/// walking its block tree, and — for directories — records its (possibly
/// relocated) data blocks for phase 5.
pub fn phase4_inode_scan_and_fix(fs: &mut Filesystem, ctx: &mut ResizeContext, progress: &mut Progress) -> Ext2Result<()> {
	let new_inodes_count = fs.superblock.inodes_count as u64;
	let total = ctx.old_inodes_count;
	let mut done = 0u32;

	for n in 1..=ctx.old_inodes_count as u64 {
		if !ctx.old_inode_bitmap.test(n)? {
			continue;
		}
		let renumbering = n > new_inodes_count;
		let mut inode = if renumbering {
			inode::read_inode_at(&ctx.old_sb, &ctx.old_gdt, &mut fs.channel, n as u32)?
		} else {
			fs.read_inode(n as u32)?
		};

		if inode.base.file_acl_lo != 0 {
			if let Some(new_acl) = ctx.block_relocation.translate(inode.base.file_acl_lo as u64) {
				inode.base.file_acl_lo = new_acl as u32;
			}
		}

		let working_ino = if renumbering {
			let slot = alloc_inode_slot(&mut fs.inode_bitmap, new_inodes_count)?;
			ctx.inode_relocation.add(n, slot as u64);
			slot
		} else {
			n as u32
		};

		let is_dir = inode.base.is_dir();
		let mut collected = Vec::new();
		{
			let reloc = &mut ctx.block_relocation;
			fs.iterate_blocks(working_ino, &mut inode, IterFlags::default(), &mut |r| {
				let new_phys = reloc.translate(r.physical).unwrap_or(r.physical);
				if is_dir && !r.is_metadata && new_phys != 0 {
					collected.push(new_phys);
				}
				if new_phys != r.physical {
					(new_phys, block_iter::visit::CHANGED)
				} else {
					(r.physical, 0)
				}
			})?;
		}
		if is_dir {
			ctx.dir_blocks.extend(collected);
		}

		if renumbering {
			fs.write_inode(working_ino, &inode)?;
			fs.inode_bitmap.unmark(n)?;
		}

		done += 1;
		tick(progress, Tick::Inode { done, total: total.max(1) })?;
	}
	Ok(())
}

/// **Phase 5 — inode reference fix.** Rewrites every directory entry whose
/// inode was renumbered by phase 4.
pub fn phase5_inode_ref_fix(fs: &mut Filesystem, ctx: &mut ResizeContext) -> Ext2Result<()> {
	let block_size = fs.superblock.block_size() as usize;
	let mut seen = BTreeSet::new();
	for &block in &ctx.dir_blocks {
		if !seen.insert(block) {
			continue;
		}
		let bytes = fs.channel.read_blk(block, 1)?;
		let mut entries = crate::dir::decode_block(&bytes, block)?;
		let mut changed = false;
		for e in &mut entries {
			if let Some(new_ino) = ctx.inode_relocation.translate(e.inode as u64) {
				e.inode = new_ino as u32;
				changed = true;
			}
		}
		if changed {
			let out = crate::dir::encode_block(&entries, block_size);
			fs.channel.write_blk(block, 1, &out)?;
		}
	}
	Ok(())
}

/// **Phase 6 — move inode tables.** Under the scoping decision above, a
/// surviving group's inode table never actually relocates (its descriptor
/// entry was copied unchanged in phase 1); the only inode tables that need
/// initializing are the brand-new trailing groups' — zero-filled so an
/// unallocated slot reads back as an empty inode.
pub fn phase6_move_itables(fs: &mut Filesystem, ctx: &mut ResizeContext, progress: &mut Progress) -> Ext2Result<()> {
	let itb = inode_table_blocks(&fs.superblock);
	let zero = vec![0u8; fs.superblock.block_size() as usize];
	let old_group_count = ctx.old_gdt.entries.len();
	let new_group_count = fs.group_descriptors.entries.len();
	let total = new_group_count.saturating_sub(old_group_count) as u32;
	let mut done = 0u32;

	for group in old_group_count..new_group_count {
		let it = fs.group_descriptors.entries[group].inode_table();
		for off in 0..itb {
			fs.channel.write_blk(it + off, 1, &zero)?;
		}
		fs.channel.flush()?;
		done += 1;
		tick(progress, Tick::Group { done, total: total.max(1) })?;
	}
	Ok(())
}

/// **Phase 7 — post-move fixups.** Recomputes every group descriptor's
/// free-block, free-inode, and used-dirs counts from the (now final)
/// bitmaps and inode table, and rotates the sparse_super2 backup-group
/// bookkeeping to the new last group.
pub fn phase7_post_move_fixups(fs: &mut Filesystem) -> Ext2Result<()> {
	let bpg = fs.superblock.blocks_per_group as u64;
	let ipg = fs.superblock.inodes_per_group as u64;
	let fdb = fs.superblock.first_data_block as u64;
	let group_count = fs.group_descriptors.entries.len();

	for g in 0..group_count {
		let first = fdb + g as u64 * bpg;
		let last = (first + bpg - 1).min(fs.superblock.total_blocks() - 1);
		let mut free_blocks = 0u32;
		for b in first..=last {
			if !fs.block_bitmap.test(b)? {
				free_blocks += 1;
			}
		}

		let first_inode = g as u64 * ipg + 1;
		let mut free_inodes = 0u32;
		let mut used_dirs = 0u32;
		for off in 0..ipg {
			let n = first_inode + off;
			if !fs.inode_bitmap.test(n)? {
				free_inodes += 1;
			} else if fs.read_inode(n as u32)?.base.is_dir() {
				used_dirs += 1;
			}
		}

		let gd = &mut fs.group_descriptors.entries[g];
		gd.set_free_blocks_count(free_blocks);
		gd.set_free_inodes_count(free_inodes);
		gd.set_used_dirs_count(used_dirs);
	}

	if fs.superblock.has_ro_compat(superblock::ro_compat::SPARSE_SUPER2) {
		let last_group = group_count as u32 - 1;
		fs.superblock.backup_bgs[1] = fs.superblock.backup_bgs[0];
		fs.superblock.backup_bgs[0] = last_group;
	}

	fs.mark_bitmaps_dirty();
	fs.mark_super_dirty();
	Ok(())
}

/// **Phase 8 — commit.** Clears the `ERRORS` state flag, trims both
/// bitmaps down from their working (union) range to the final one, and
/// flushes bitmaps → group descriptors → superblock in that order (spec §5
/// "Ordering guarantees"), with no cancellation point between the three.
pub fn phase8_commit(fs: &mut Filesystem, ctx: &ResizeContext) -> Ext2Result<()> {
	fs.superblock.state &= !superblock::state::ERRORS;
	fs.block_bitmap.resize(ctx.new_size - 1, ctx.new_size - 1)?;
	let new_inodes_count = fs.superblock.inodes_count as u64;
	fs.inode_bitmap.resize(new_inodes_count, new_inodes_count)?;
	fs.mark_super_dirty();
	fs.mark_bitmaps_dirty();
	fs.flush()
}

/// Runs the full 8-phase pipeline, tagging the first failure with the
/// phase it occurred in.
pub fn resize_fs(fs: &mut Filesystem, new_size: u64, progress: &mut Progress) -> Result<(), PhaseError> {
	wrap(Phase::AdjustMetadata, tick(progress, Tick::Phase(Phase::AdjustMetadata)))?;
	let mut ctx = wrap(Phase::AdjustMetadata, phase1_adjust_metadata(fs, new_size))?;

	wrap(Phase::DetermineMoves, tick(progress, Tick::Phase(Phase::DetermineMoves)))?;
	wrap(Phase::DetermineMoves, phase2_determine_moves(&mut ctx))?;

	wrap(Phase::BlockMover, tick(progress, Tick::Phase(Phase::BlockMover)))?;
	wrap(Phase::BlockMover, phase3_block_mover(fs, &mut ctx, progress))?;

	wrap(Phase::InodeScan, tick(progress, Tick::Phase(Phase::InodeScan)))?;
	wrap(Phase::InodeScan, phase4_inode_scan_and_fix(fs, &mut ctx, progress))?;

	wrap(Phase::InodeRefFix, tick(progress, Tick::Phase(Phase::InodeRefFix)))?;
	wrap(Phase::InodeRefFix, phase5_inode_ref_fix(fs, &mut ctx))?;

	wrap(Phase::MoveItables, tick(progress, Tick::Phase(Phase::MoveItables)))?;
	wrap(Phase::MoveItables, phase6_move_itables(fs, &mut ctx, progress))?;

	wrap(Phase::PostMoveFixups, tick(progress, Tick::Phase(Phase::PostMoveFixups)))?;
	wrap(Phase::PostMoveFixups, phase7_post_move_fixups(fs))?;

	wrap(Phase::Commit, tick(progress, Tick::Phase(Phase::Commit)))?;
	wrap(Phase::Commit, phase8_commit(fs, &ctx))?;

	Ok(())
}

/// **Minimum-size computation** (spec §4.7, supporting `-M`). Starts from
/// the count of allocated inodes, derives the minimum group count needed to
/// hold them plus their data, then grows the estimate until the last group
/// can hold any leftover, adding a margin proportional to the shrink's
/// size bounded by worst-case extent-tree growth.
pub fn compute_min_size(fs: &mut Filesystem) -> Ext2Result<u64> {
	let sb = fs.superblock;
	let desc_size = fs.group_descriptors.desc_size;
	let fdb = sb.first_data_block as u64;
	let bpg = sb.blocks_per_group as u64;
	let ipg = sb.inodes_per_group as u64;

	let used_inodes = fs.inode_bitmap.count_set();
	let used_blocks = fs.block_bitmap.count_set();

	let mut group_count = used_inodes.div_ceil(ipg).max(1) as u32;
	loop {
		let overhead: u64 = (0..group_count).map(|g| group_overhead_blocks(&sb, g, group_count, desc_size)).sum();
		let capacity = group_count as u64 * bpg;
		if used_blocks + overhead <= capacity {
			break;
		}
		group_count += 1;
	}

	let old_size = sb.total_blocks();
	let tentative = fdb + group_count as u64 * bpg;
	let margin = (old_size.saturating_sub(tentative) / 500).min(used_blocks + used_inodes + MIN_TRAILING_SLACK);
	Ok((tentative + margin).min(old_size))
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::test_support::small_fs;

	fn no_cancel() -> impl FnMut(Tick) -> bool {
		|_| true
	}

	#[test]
	fn grow_adds_a_group_without_moving_blocks() {
		let mut fs = small_fs();
		let old_total = fs.superblock.total_blocks();
		let mut progress = no_cancel();
		resize_fs(&mut fs, old_total + 8192, &mut progress).unwrap();
		assert_eq!(fs.superblock.total_blocks(), old_total + 8192);
		assert_eq!(fs.superblock.group_count(), 2);
		assert_eq!(fs.lookup(superblock::ROOT_INODE, ".").unwrap(), Some(superblock::ROOT_INODE));
	}

	#[test]
	fn grow_then_shrink_back_preserves_root_directory() {
		let mut fs = small_fs();
		let old_total = fs.superblock.total_blocks();
		let mut progress = no_cancel();
		resize_fs(&mut fs, old_total + 8192, &mut progress).unwrap();
		resize_fs(&mut fs, old_total, &mut progress).unwrap();
		assert_eq!(fs.superblock.total_blocks(), old_total);
		assert_eq!(fs.lookup(superblock::ROOT_INODE, "..").unwrap(), Some(superblock::ROOT_INODE));
	}

	#[test]
	fn shrink_relocates_blocks_beyond_the_new_size() {
		let mut fs = small_fs();
		let old_total = fs.superblock.total_blocks();
		let grown = old_total + 8192;
		let mut progress = no_cancel();
		resize_fs(&mut fs, grown, &mut progress).unwrap();

		// Put a file's single data block at the very end of the grown
		// image, then shrink back: its content must survive at a
		// relocated, in-range block.
		let far_block = grown - 1;
		fs.block_bitmap.mark(far_block).unwrap();
		let mut file = crate::inode::InodeBuf { base: crate::inode::InodeDisk::default(), extra: Vec::new() };
		file.base.mode = crate::inode::mode::REGULAR | 0o644;
		file.base.links_count = 1;
		file.base.set_size(4096);
		let mut blocks = file.base.blocks();
		blocks[0] = far_block as u32;
		file.base.set_blocks(blocks);
		let ino = 12u32;
		fs.inode_bitmap.mark(ino as u64).unwrap();
		fs.write_inode(ino, &file).unwrap();
		fs.channel.write_blk(far_block, 1, &vec![0x42u8; 4096]).unwrap();
		fs.link(superblock::ROOT_INODE, "far", ino, crate::inode::mode::REGULAR).unwrap();

		resize_fs(&mut fs, old_total, &mut progress).unwrap();

		let found = fs.lookup(superblock::ROOT_INODE, "far").unwrap().unwrap();
		let blocks = fs.list_blocks(found).unwrap();
		assert_eq!(blocks.len(), 1);
		assert!(blocks[0] < old_total);
		let content = fs.channel.read_blk(blocks[0], 1).unwrap();
		assert!(content.iter().all(|&b| b == 0x42));
	}

	#[test]
	fn rejects_a_new_size_with_no_room_for_a_group() {
		let mut fs = small_fs();
		let mut progress = no_cancel();
		assert!(resize_fs(&mut fs, 1, &mut progress).is_err());
	}

	#[test]
	fn cancellation_is_observed_between_phases() {
		let mut fs = small_fs();
		let old_total = fs.superblock.total_blocks();
		let mut calls = 0;
		let mut progress = |_: Tick| {
			calls += 1;
			calls < 1
		};
		let err = resize_fs(&mut fs, old_total + 8192, &mut progress).unwrap_err();
		assert_eq!(err.phase, Phase::AdjustMetadata);
	}

	#[test]
	fn min_size_is_at_least_the_used_block_count() {
		let mut fs = small_fs();
		let used = fs.block_bitmap.count_set();
		let min = compute_min_size(&mut fs).unwrap();
		assert!(min >= used);
	}
}
