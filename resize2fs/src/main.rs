//! `resize2fs` grows or shrinks an unmounted ext2/3/4 filesystem image to
//! a new block count (spec §4.7/§6).

use ext2fs::filesystem::Filesystem;
use ext2fs::io_channel::{self, Channel, RawBackend, UndoBackend};
use ext2fs::resize::{self, Tick};
use ext2fs::superblock;
use ext2fs::util::{self, ByteSize};
use std::env;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::exit;

/// Exit codes spec §6 assigns to `resize2fs` ("0 success, 1 usage/IO/ENOSPC,
/// other nonzero for internal error").
mod exit_code {
	pub const OK: i32 = 0;
	pub const FAIL: i32 = 1;
}

#[derive(Default)]
struct Args {
	prog: String,
	device_path: Option<PathBuf>,
	new_size: Option<String>,
	print_min_size: bool,
	verbose: bool,
	undo_log: Option<PathBuf>,
	apply_undo: Option<PathBuf>,
	help: bool,
}

fn parse_args() -> Args {
	let mut args = Args::default();
	let mut iter = env::args();
	args.prog = iter.next().unwrap_or_else(|| "resize2fs".to_owned());

	while let Some(arg) = iter.next() {
		match arg.as_str() {
			"-h" | "--help" => args.help = true,
			"-v" => args.verbose = true,
			"-M" | "-P" => args.print_min_size = true,
			"-z" => args.undo_log = iter.next().map(PathBuf::from),
			"--undo" => args.apply_undo = iter.next().map(PathBuf::from),
			_ if args.device_path.is_none() => args.device_path = Some(PathBuf::from(arg)),
			_ => args.new_size = Some(arg),
		}
	}

	args
}

fn usage(prog: &str) {
	eprintln!("Usage: {prog} [-v] [-M|-P] [-z undofile] device [new_size]");
	eprintln!("       {prog} --undo undofile device");
}

fn main() {
	let args = parse_args();

	if args.help {
		usage(&args.prog);
		exit(exit_code::OK);
	}

	let device_path = args.device_path.unwrap_or_else(|| {
		usage(&args.prog);
		exit(exit_code::FAIL);
	});

	if let Some(log_path) = args.apply_undo {
		let mut file = OpenOptions::new().write(true).open(&device_path).unwrap_or_else(|e| {
			eprintln!("{}: {}: {}", args.prog, device_path.display(), e);
			exit(exit_code::FAIL);
		});
		io_channel::apply_undo_log(&log_path, &mut file).unwrap_or_else(|e| {
			eprintln!("{}: {}: {}", args.prog, log_path.display(), e);
			exit(exit_code::FAIL);
		});
		exit(exit_code::OK);
	}

	let mut fs = match &args.undo_log {
		Some(log_path) => {
			let raw = RawBackend::open(&device_path, true).unwrap_or_else(|e| {
				eprintln!("{}: {}: {}", args.prog, device_path.display(), e);
				exit(exit_code::FAIL);
			});
			let undo = UndoBackend::wrap(Box::new(raw), log_path, superblock::SUPERBLOCK_OFFSET as u32).unwrap_or_else(|e| {
				eprintln!("{}: {}: {}", args.prog, log_path.display(), e);
				exit(exit_code::FAIL);
			});
			let channel = Channel::new(Box::new(undo), superblock::SUPERBLOCK_OFFSET as u32);
			Filesystem::from_channel(channel, true).unwrap_or_else(|e| {
				eprintln!("{}: {}: {}", args.prog, device_path.display(), e);
				exit(exit_code::FAIL);
			})
		}
		None => Filesystem::open(&device_path, true).unwrap_or_else(|e| {
			eprintln!("{}: {}: {}", args.prog, device_path.display(), e);
			exit(exit_code::FAIL);
		}),
	};

	if args.print_min_size {
		let min = resize::compute_min_size(&mut fs).unwrap_or_else(|e| {
			eprintln!("{}: {}: {}", args.prog, device_path.display(), e);
			exit(exit_code::FAIL);
		});
		println!("Estimated minimum size of the filesystem: {min} ({})", ByteSize(min * fs.superblock.block_size() as u64));
		exit(exit_code::OK);
	}

	let block_size = fs.superblock.block_size();
	let old_size = fs.superblock.total_blocks();

	let new_size = match &args.new_size {
		Some(s) => util::parse_size_arg(s, block_size).unwrap_or_else(|| {
			eprintln!("{}: {}: invalid new size `{}`", args.prog, device_path.display(), s);
			exit(exit_code::FAIL);
		}),
		None => resize::compute_min_size(&mut fs).unwrap_or_else(|e| {
			eprintln!("{}: {}: {}", args.prog, device_path.display(), e);
			exit(exit_code::FAIL);
		}),
	};

	if args.verbose {
		println!(
			"Resizing {} from {} ({}) to {} ({})",
			device_path.display(),
			old_size,
			ByteSize(old_size * block_size as u64),
			new_size,
			ByteSize(new_size * block_size as u64)
		);
	}

	let verbose = args.verbose;
	let mut progress = |t: Tick| {
		if verbose {
			match t {
				Tick::Phase(p) => println!("Phase: {p:?}"),
				Tick::Group { done, total } => print!("\rmoving group metadata: {done}/{total}"),
				Tick::Inode { done, total } => print!("\rscanning inodes: {done}/{total}"),
				Tick::Bytes { done, total } => print!("\rcopying blocks: {done}/{total}"),
			}
			let _ = std::io::Write::flush(&mut std::io::stdout());
		}
		true
	};

	resize::resize_fs(&mut fs, new_size, &mut progress).unwrap_or_else(|e| {
		eprintln!("{}: {}: {}", args.prog, device_path.display(), e);
		exit(exit_code::FAIL);
	});

	if verbose {
		println!();
	}
	println!(
		"The filesystem on {} is now {} ({}) blocks long.",
		device_path.display(),
		new_size,
		ByteSize(new_size * block_size as u64)
	);
	exit(exit_code::OK);
}
