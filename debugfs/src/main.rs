//! `debugfs` is an interactive inspector/editor for an unmounted
//! ext2/3/4 filesystem image (spec §4.6/§6). The REPL loop itself is the
//! external collaborator; each command below is a thin caller into the
//! core library.

use ext2fs::dir::file_type;
use ext2fs::filesystem::Filesystem;
use ext2fs::io_channel::read_partitions;
use ext2fs::superblock::ROOT_INODE;
use std::env;
use std::fs::OpenOptions;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::exit;

#[derive(Default)]
struct Args {
	prog: String,
	device_path: Option<PathBuf>,
	writable: bool,
	help: bool,
}

fn parse_args() -> Args {
	let mut args = Args::default();
	let mut iter = env::args();
	args.prog = iter.next().unwrap_or_else(|| "debugfs".to_owned());

	while let Some(arg) = iter.next() {
		match arg.as_str() {
			"-h" | "--help" => args.help = true,
			"-w" => args.writable = true,
			_ => args.device_path = Some(PathBuf::from(arg)),
		}
	}

	args
}

fn usage(prog: &str) {
	eprintln!("Usage: {prog} [-w] device");
}

/// Splits a path into `(parent directory path, final component)`, the
/// way `ln`/`rm` need to resolve a destination.
fn split_path(path: &str) -> (&str, &str) {
	match path.trim_end_matches('/').rsplit_once('/') {
		Some(("", name)) => ("/", name),
		Some((dir, name)) => (dir, name),
		None => (".", path),
	}
}

fn type_char(file_type: u8) -> char {
	match file_type {
		file_type::DIR => 'd',
		file_type::SYMLINK => 'l',
		file_type::CHAR_DEVICE => 'c',
		file_type::BLOCK_DEVICE => 'b',
		file_type::FIFO => 'p',
		file_type::SOCKET => 's',
		_ => '-',
	}
}

fn cmd_show_super_stats(fs: &Filesystem) {
	let sb = fs.superblock;
	println!("Filesystem volume name:   {}", String::from_utf8_lossy(&sb.volume_name).trim_end_matches('\0'));
	println!("Block size:               {}", sb.block_size());
	println!("Inode size:               {}", sb.inode_size());
	let inodes_count = sb.inodes_count;
	let first_inode = sb.first_inode;
	println!("Inode count:              {}", inodes_count);
	println!("Block count:              {}", sb.total_blocks());
	println!("Free blocks:              {}", sb.total_blocks() - fs.block_bitmap.count_set());
	println!("Free inodes:              {}", inodes_count as u64 - fs.inode_bitmap.count_set());
	println!("Groups:                   {}", fs.group_descriptors.entries.len());
	println!("First inode:              {}", first_inode);
}

fn cmd_ls(fs: &mut Filesystem, dir_inode: u32) {
	match fs.read_dir(dir_inode) {
		Ok(entries) => {
			for e in &entries {
				println!("{:>7}  {}  {}", e.inode, type_char(e.file_type), e.name);
			}
		}
		Err(e) => eprintln!("ls: {e}"),
	}
}

fn cmd_stat(fs: &mut Filesystem, inode_num: u32) {
	match fs.read_inode(inode_num) {
		Ok(inode) => {
			let base = inode.base;
			println!("Inode: {inode_num}");
			println!("Mode:  {:o}", base.mode & 0o7777);
			println!("Type:  {:#06x}", base.file_type());
			let links_count = base.links_count;
			let blocks_lo = base.blocks_lo;
			println!("Links: {}", links_count);
			println!("Size:  {}", base.size());
			println!("Blocks (512B units): {}", blocks_lo);
		}
		Err(e) => eprintln!("stat: {e}"),
	}
}

fn cmd_blocks(fs: &mut Filesystem, inode_num: u32) {
	match fs.list_blocks(inode_num) {
		Ok(blocks) => println!("{}", blocks.iter().map(|b| b.to_string()).collect::<Vec<_>>().join(" ")),
		Err(e) => eprintln!("blocks: {e}"),
	}
}

fn cmd_ln(fs: &mut Filesystem, source_inode: u32, dest: &str) {
	let (dir_path, name) = split_path(dest);
	let dir_inode = match fs.namei(dir_path) {
		Ok(n) => n,
		Err(e) => {
			eprintln!("ln: {e}");
			return;
		}
	};
	let mode_bits = match fs.read_inode(source_inode) {
		Ok(inode) => inode.base.mode,
		Err(e) => {
			eprintln!("ln: {e}");
			return;
		}
	};
	if let Err(e) = fs.link(dir_inode, name, source_inode, mode_bits) {
		eprintln!("ln: {e}");
	}
}

fn cmd_rm(fs: &mut Filesystem, path: &str) {
	let (dir_path, name) = split_path(path);
	let dir_inode = match fs.namei(dir_path) {
		Ok(n) => n,
		Err(e) => {
			eprintln!("rm: {e}");
			return;
		}
	};
	if let Err(e) = fs.unlink(dir_inode, name) {
		eprintln!("rm: {e}");
	}
}

/// Flushes pending writes and, for a whole-disk device, asks the kernel to
/// re-read its partition table -- what the `close` command does.
fn close_fs(fs: &mut Filesystem, device_path: &std::path::Path, writable: bool) {
	if !writable {
		return;
	}
	if let Err(e) = fs.flush() {
		eprintln!("close: {e}");
		return;
	}
	if let Ok(file) = OpenOptions::new().read(true).open(device_path) {
		let _ = read_partitions(&file);
	}
}

fn run_repl(fs: &mut Filesystem, device_path: &std::path::Path, writable: bool) {
	let stdin = io::stdin();
	loop {
		print!("debugfs:  ");
		let _ = io::stdout().flush();
		let mut line = String::new();
		if stdin.lock().read_line(&mut line).unwrap_or(0) == 0 {
			println!();
			break;
		}
		let mut words = line.split_whitespace();
		let Some(cmd) = words.next() else { continue };
		let rest: Vec<&str> = words.collect();

		match cmd {
			"quit" | "q" => break,
			"show_super_stats" | "stats" => cmd_show_super_stats(fs),
			"pwd" => println!("cwd inode: {}", fs.cwd_inode),
			"cd" => match rest.first() {
				Some(path) => match fs.namei(path) {
					Ok(n) => fs.cwd_inode = n,
					Err(e) => eprintln!("cd: {e}"),
				},
				None => fs.cwd_inode = fs.root_inode,
			},
			"ls" => {
				let target = rest.first().copied().unwrap_or(".");
				match fs.namei(target) {
					Ok(n) => cmd_ls(fs, n),
					Err(e) => eprintln!("ls: {e}"),
				}
			}
			"stat" | "show_inode_info" => match rest.first() {
				Some(path) => match fs.namei(path) {
					Ok(n) => cmd_stat(fs, n),
					Err(e) => eprintln!("stat: {e}"),
				},
				None => eprintln!("stat: missing path"),
			},
			"blocks" => match rest.first() {
				Some(path) => match fs.namei(path) {
					Ok(n) => cmd_blocks(fs, n),
					Err(e) => eprintln!("blocks: {e}"),
				},
				None => eprintln!("blocks: missing path"),
			},
			"ln" => match (rest.first(), rest.get(1)) {
				(Some(source), Some(dest)) => {
					let resolved = match source.parse::<u32>() {
						Ok(n) => Some(n),
						Err(_) => fs.namei(source).ok(),
					};
					match resolved {
						Some(n) => cmd_ln(fs, n, dest),
						None => eprintln!("ln: no such inode or path `{source}`"),
					}
				}
				_ => eprintln!("ln: usage: ln <source-inode-or-path> <dest-path>"),
			},
			"rm" | "unlink" => match rest.first() {
				Some(path) => cmd_rm(fs, path),
				None => eprintln!("rm: missing path"),
			},
			"close" => close_fs(fs, device_path, writable),
			"" => {}
			other => eprintln!("{other}: unknown request"),
		}
	}
}

fn main() {
	let args = parse_args();

	if args.help {
		usage(&args.prog);
		exit(0);
	}

	let device_path = args.device_path.unwrap_or_else(|| {
		usage(&args.prog);
		exit(1);
	});

	let mut fs = Filesystem::open(&device_path, args.writable).unwrap_or_else(|e| {
		eprintln!("{}: {}: {}", args.prog, device_path.display(), e);
		exit(1);
	});
	fs.root_inode = ROOT_INODE;
	fs.cwd_inode = ROOT_INODE;

	run_repl(&mut fs, &device_path, args.writable);

	// A session ended via `quit` rather than `close` still has dirty
	// metadata pending; flush it on the way out.
	close_fs(&mut fs, &device_path, args.writable);
}
