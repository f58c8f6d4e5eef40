//! `e2fsck` checks and, optionally, repairs an unmounted ext2/3/4
//! filesystem image (spec §4.8/§6).

use ext2fs::checker::{self, CheckSummary, Problem, ProblemContext};
use ext2fs::error::Ext2Error;
use ext2fs::filesystem::Filesystem;
use ext2fs::io_channel::{self, Channel, RawBackend, UndoBackend};
use ext2fs::superblock;
use std::env;
use std::fs::OpenOptions;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::exit;

/// Exit codes spec §6 assigns to `e2fsck`.
mod exit_code {
	pub const OK: i32 = 0;
	pub const FIXED: i32 = 1;
	pub const UNCORRECTED: i32 = 4;
	pub const ERROR: i32 = 8;
	pub const USAGE: i32 = 16;
	pub const CANCELED: i32 = 32;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
	Interactive,
	Preen,
	YesToAll,
	NoToAll,
}

#[derive(Default)]
struct Args {
	prog: String,
	device_path: Option<PathBuf>,
	mode: Option<Mode>,
	undo_log: Option<PathBuf>,
	apply_undo: Option<PathBuf>,
	help: bool,
}

impl Default for Mode {
	fn default() -> Self {
		Mode::Interactive
	}
}

fn parse_args() -> Args {
	let mut args = Args { mode: None, ..Default::default() };
	let mut iter = env::args();
	args.prog = iter.next().unwrap_or_else(|| "e2fsck".to_owned());

	while let Some(arg) = iter.next() {
		match arg.as_str() {
			"-h" | "--help" => args.help = true,
			"-p" | "-a" | "--preen" => args.mode = Some(Mode::Preen),
			"-y" => args.mode = Some(Mode::YesToAll),
			"-n" => args.mode = Some(Mode::NoToAll),
			// Every run walks all six passes; there is no superblock-clean
			// fast path to skip, so `-f` is accepted but has nothing to force.
			"-f" => {}
			"-z" => args.undo_log = iter.next().map(PathBuf::from),
			"--undo" => args.apply_undo = iter.next().map(PathBuf::from),
			_ => args.device_path = Some(PathBuf::from(arg)),
		}
	}

	args
}

fn usage(prog: &str) {
	eprintln!("Usage: {prog} [-p | -y | -n] [-f] [-z undofile] device");
	eprintln!("       {prog} --undo undofile device");
}

/// Renders a problem the way the prompt-driven passes of spec §4.8 would:
/// a short description, then "Fix? yes/no".
fn describe(problem: &Problem, ctx: &ProblemContext) -> String {
	let mut s = match problem {
		Problem::SuperblockFieldOutOfRange { field } => format!("Superblock field {field} out of range"),
		Problem::FirstDataBlockMismatch { found, expected } => {
			format!("First data block is {found}, should be {expected}")
		}
		Problem::GroupMetadataOutOfRange { group, which } => {
			format!("Group {group}'s {which} is outside the group's block range")
		}
		Problem::BlockBitmapDiffersFromComputed => "Block bitmap differs from the computed bitmap".to_owned(),
		Problem::InodeBitmapDiffersFromComputed => "Inode bitmap differs from the computed bitmap".to_owned(),
		Problem::DeletedInodeStillReferenced { inode } => format!("Deleted inode {inode} has zero dtime but is referenced"),
		Problem::ZeroDtimeOnUnusedInode { inode } => format!("Inode {inode} has zero dtime"),
		Problem::LinkCountWrong { inode, found, should_be } => {
			format!("Inode {inode} has link count {found}, should be {should_be}")
		}
		Problem::UnattachedInode { inode } => format!("Inode {inode} is unattached, reconnecting to /lost+found"),
		Problem::DirectoryDotDotMismatch { inode, dotdot, should_be } => {
			format!("Directory inode {inode}'s '..' points to {dotdot}, should be {should_be}")
		}
		Problem::FreeBlocksCountWrong { group, found, should_be } => match group {
			Some(g) => format!("Group {g}'s free blocks count is {found}, should be {should_be}"),
			None => format!("Free blocks count in the superblock is {found}, should be {should_be}"),
		},
		Problem::FreeInodesCountWrong { group, found, should_be } => match group {
			Some(g) => format!("Group {g}'s free inodes count is {found}, should be {should_be}"),
			None => format!("Free inodes count in the superblock is {found}, should be {should_be}"),
		},
	};
	if let Some(inode) = ctx.inode {
		s.push_str(&format!(" (inode {inode})"));
	}
	s
}

/// Reads a single `y`/`n` answer from stdin, defaulting to `no` on EOF or
/// unparseable input (spec §4.8's interactive mode).
fn prompt_yes_no(question: &str) -> bool {
	print!("{question}? yes/no ");
	let _ = io::stdout().flush();
	let mut line = String::new();
	match io::stdin().lock().lines().next() {
		Some(Ok(s)) => {
			line = s;
		}
		_ => return false,
	}
	line.trim().eq_ignore_ascii_case("y") || line.trim().eq_ignore_ascii_case("yes")
}

fn main() {
	let args = parse_args();

	if args.help {
		usage(&args.prog);
		exit(exit_code::OK);
	}

	let device_path = args.device_path.unwrap_or_else(|| {
		usage(&args.prog);
		exit(exit_code::USAGE);
	});

	if let Some(log_path) = args.apply_undo {
		let mut file = OpenOptions::new().write(true).open(&device_path).unwrap_or_else(|e| {
			eprintln!("{}: {}: {}", args.prog, device_path.display(), e);
			exit(exit_code::ERROR);
		});
		io_channel::apply_undo_log(&log_path, &mut file).unwrap_or_else(|e| {
			eprintln!("{}: {}: {}", args.prog, log_path.display(), e);
			exit(exit_code::ERROR);
		});
		exit(exit_code::OK);
	}

	let mode = args.mode.unwrap_or(Mode::Interactive);
	// `check_fs` always rewrites the group descriptor checksums as part of
	// its closing flush, so even `-n` needs a writable channel open; "-n"
	// is enforced entirely by `auto_no` never disposing a problem to fix.
	let mut fs = match &args.undo_log {
		Some(log_path) => {
			let raw = RawBackend::open(&device_path, true).unwrap_or_else(|e| {
				eprintln!("{}: {}: {}", args.prog, device_path.display(), e);
				exit(exit_code::ERROR);
			});
			let undo = UndoBackend::wrap(Box::new(raw), log_path, superblock::SUPERBLOCK_OFFSET as u32).unwrap_or_else(|e| {
				eprintln!("{}: {}: {}", args.prog, log_path.display(), e);
				exit(exit_code::ERROR);
			});
			let channel = Channel::new(Box::new(undo), superblock::SUPERBLOCK_OFFSET as u32);
			Filesystem::from_channel(channel, true).unwrap_or_else(|e| {
				eprintln!("{}: {}: {}", args.prog, device_path.display(), e);
				exit(exit_code::ERROR);
			})
		}
		None => Filesystem::open(&device_path, true).unwrap_or_else(|e| {
			eprintln!("{}: {}: {}", args.prog, device_path.display(), e);
			exit(exit_code::ERROR);
		}),
	};

	let summary: Result<CheckSummary, Ext2Error> = match mode {
		Mode::Preen | Mode::YesToAll => checker::check_fs(&mut fs, &mut checker::auto_yes),
		Mode::NoToAll => checker::check_fs(&mut fs, &mut checker::auto_no),
		Mode::Interactive => {
			let mut fix = |problem: &Problem, ctx: &ProblemContext| prompt_yes_no(&describe(problem, ctx));
			checker::check_fs(&mut fs, &mut fix)
		}
	};

	let summary = match summary {
		Ok(s) => s,
		Err(Ext2Error::Canceled) => {
			eprintln!("{}: {}: check canceled", args.prog, device_path.display());
			exit(exit_code::CANCELED);
		}
		Err(e) => {
			eprintln!("{}: {}: {}", args.prog, device_path.display(), e);
			exit(exit_code::ERROR);
		}
	};

	if mode == Mode::Preen {
		let inodes_count = fs.superblock.inodes_count;
		println!(
			"{}: {}/{} files, {}/{} blocks",
			device_path.display(),
			fs.inode_bitmap.count_set(),
			inodes_count,
			fs.block_bitmap.count_set(),
			fs.superblock.total_blocks()
		);
	}

	if summary.has_uncorrected() {
		eprintln!(
			"{}: {}: {} of {} problems left uncorrected",
			args.prog,
			device_path.display(),
			summary.problems_found - summary.problems_fixed,
			summary.problems_found
		);
		exit(exit_code::UNCORRECTED);
	}
	if summary.fixed_anything() {
		println!("{}: {}: {} problems corrected", args.prog, device_path.display(), summary.problems_fixed);
		exit(exit_code::FIXED);
	}
	exit(exit_code::OK);
}
