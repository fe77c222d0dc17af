//! `fsd` serves the filesystem RPC protocol over TCP, backed by a remote
//! `diskd` sector server. Ported from `original_source/step2/server.cc`.

use std::env;
use std::io;
use std::net::TcpListener;
use std::net::TcpStream;
use std::process::exit;
use std::sync::Arc;
use std::thread;

use fscore::op;
use fscore::Ecode;
use fscore::FSCore;
use fscore::SectorClient;
use fscore::WorkingDir;
use utils::prompt::prompt;
use wire::Packer;
use wire::Unpacker;

const FLUSH_INTERVAL: i32 = 16;

struct Args {
	prog: String,
	disk_host: String,
	disk_port: u16,
	fs_port: u16,
}

fn usage(prog: &str) -> ! {
	eprintln!("Usage: {prog} <DiskServerAddr> <DiskServerPort> <FSPort>");
	exit(1);
}

fn parse_args() -> Args {
	let mut iter = env::args();
	let prog = iter.next().unwrap_or_else(|| "fsd".to_owned());
	let rest: Vec<String> = iter.collect();
	if rest.len() != 3 {
		usage(&prog);
	}
	let disk_port: u32 = rest[1].parse().unwrap_or(0);
	let fs_port: u32 = rest[2].parse().unwrap_or(0);
	if disk_port == 0 || disk_port > 65535 || fs_port == 0 || fs_port > 65535 {
		eprintln!("{prog}: error: invalid port");
		exit(1);
	}
	Args {
		prog,
		disk_host: rest[0].clone(),
		disk_port: disk_port as u16,
		fs_port: fs_port as u16,
	}
}

fn pack_err(response: &mut Packer, ecode: i32) {
	response.pack_i32(ecode);
}

/// Handles one authenticated client connection to completion.
fn handle_client(core: Arc<FSCore>, mut stream: TcpStream, peer: String) {
	println!("{peer} asking for username");
	let request = match wire::recv_frame(&mut stream) {
		Ok(r) => r,
		Err(_) => return,
	};
	if request.is_empty() {
		return;
	}
	let username = {
		let mut u = Unpacker::new(&request);
		match u.unpack_str() {
			Ok(s) => s,
			Err(_) => return,
		}
	};
	let uid = match core.login(&username) {
		Ok(Some(uid)) => uid,
		Ok(None) => {
			let mut response = Packer::new();
			pack_err(&mut response, Ecode::UserNotFound.code());
			let _ = wire::send_frame(&mut stream, response.as_slice());
			return;
		}
		Err(_) => return,
	};
	let mut response = Packer::new();
	pack_err(&mut response, Ecode::Success.code());
	if wire::send_frame(&mut stream, response.as_slice()).is_err() {
		return;
	}
	println!("{peer} Authenticated for: {username}");

	let mut wd = match WorkingDir::new(core.clone(), uid) {
		Ok(wd) => Some(wd),
		Err(_) => return,
	};

	let mut flush_counter = FLUSH_INTERVAL;
	loop {
		flush_counter -= 1;
		if flush_counter < 0 {
			println!("Flushing...");
			if core.flush().is_err() {
				break;
			}
			flush_counter = FLUSH_INTERVAL;
		}

		let request = match wire::recv_frame(&mut stream) {
			Ok(r) => r,
			Err(_) => break,
		};
		if request.is_empty() {
			break;
		}
		let mut u = Unpacker::new(&request);
		let op = match u.unpack_i32() {
			Ok(v) => v,
			Err(_) => break,
		};
		if op == op::OP_NOPE {
			continue;
		}
		if op == op::OP_EXIT {
			break;
		}

		let mut response = Packer::new();
		if op == op::OP_FORMAT {
			// Drop the working dir first: format() wipes the node table,
			// and the current dir's node must not outlive that.
			wd = None;
			let code = match core.format() {
				Ok(ec) => ec.code(),
				Err(_) => Ecode::Invalid.code(),
			};
			pack_err(&mut response, code);
			wd = match WorkingDir::new(core.clone(), 0) {
				Ok(w) => Some(w),
				Err(_) => break,
			};
			if wire::send_frame(&mut stream, response.as_slice()).is_err() {
				break;
			}
			continue;
		}

		let wd_ref = wd.as_mut().expect("working dir always present outside OP_FORMAT");
		match dispatch(&core, wd_ref, op, &mut u, &mut response) {
			Dispatched::Replied => {}
			Dispatched::NoReply => continue,
		}
		if wire::send_frame(&mut stream, response.as_slice()).is_err() {
			break;
		}
	}
	println!("Client disconnected: {peer}");
}

enum Dispatched {
	Replied,
	NoReply,
}

fn dispatch(core: &Arc<FSCore>, wd: &mut WorkingDir, op: i32, req: &mut Unpacker, resp: &mut Packer) -> Dispatched {
	match op {
		op::OP_CREATE => {
			let name = req.unpack_str().unwrap_or_default();
			let ec = wd.create_file(&name, fscore::core::DEFAULT_FILE_MODE).unwrap_or(Ecode::Invalid);
			pack_err(resp, ec.code());
		}
		op::OP_MKDIR => {
			let name = req.unpack_str().unwrap_or_default();
			let ec = wd.create_dir(&name, fscore::core::DEFAULT_DIR_MODE).unwrap_or(Ecode::Invalid);
			pack_err(resp, ec.code());
		}
		op::OP_RMFILE => {
			let name = req.unpack_str().unwrap_or_default();
			let ec = wd.remove_file(&name).unwrap_or(Ecode::Invalid);
			pack_err(resp, ec.code());
		}
		op::OP_CD => {
			let name = req.unpack_str().unwrap_or_default();
			let ec = wd.change_dir(&name).unwrap_or(Ecode::Invalid);
			pack_err(resp, ec.code());
		}
		op::OP_RMDIR => {
			let name = req.unpack_str().unwrap_or_default();
			let ec = wd.remove_dir(&name).unwrap_or(Ecode::Invalid);
			pack_err(resp, ec.code());
		}
		op::OP_LS => match wd.list_dir() {
			Ok(Ok(entries)) => {
				pack_err(resp, Ecode::Success.code());
				resp.pack_i64(entries.len() as i64);
				for (name, _, _) in &entries {
					resp.pack_str(name);
				}
			}
			Ok(Err(e)) => pack_err(resp, e.code()),
			Err(_) => pack_err(resp, Ecode::Invalid.code()),
		},
		op::OP_CAT => {
			let name = req.unpack_str().unwrap_or_default();
			match wd.acquire_file(&name, false) {
				Ok(Ecode::Success) => {
					let data = wd.read(wd.size().unwrap_or(0), 0).unwrap_or(Ok(Vec::new())).unwrap_or_default();
					pack_err(resp, Ecode::Success.code());
					resp.pack_i64(data.len() as i64);
					resp.pack_bytes(&data);
					let _ = wd.release_file();
				}
				Ok(e) => pack_err(resp, e.code()),
				Err(_) => pack_err(resp, Ecode::Invalid.code()),
			}
		}
		op::OP_WRITE => {
			let name = req.unpack_str().unwrap_or_default();
			let offset = req.unpack_i64().unwrap_or(0) as u64;
			let size = req.unpack_i64().unwrap_or(0) as u64;
			let data = req.unpack_bytes().unwrap_or_default();
			let _ = size;
			match wd.acquire_file(&name, true) {
				Ok(Ecode::Success) => {
					let ec = match wd.write(&data, offset) {
						Ok(Ok(n)) if n == data.len() as u64 => Ecode::Success,
						Ok(Ok(_)) => Ecode::Invalid,
						Ok(Err(e)) => e,
						Err(_) => Ecode::Invalid,
					};
					let _ = wd.release_file();
					pack_err(resp, ec.code());
				}
				Ok(e) => pack_err(resp, e.code()),
				Err(_) => pack_err(resp, Ecode::Invalid.code()),
			}
		}
		op::OP_INSERT => {
			let name = req.unpack_str().unwrap_or_default();
			let offset = req.unpack_i64().unwrap_or(0) as u64;
			let _size = req.unpack_i64().unwrap_or(0);
			let data = req.unpack_bytes().unwrap_or_default();
			match wd.acquire_file(&name, true) {
				Ok(Ecode::Success) => {
					let ec = match wd.insert(&data, offset) {
						Ok(Ok(n)) if n == data.len() as u64 => Ecode::Success,
						Ok(Ok(_)) => Ecode::Invalid,
						Ok(Err(e)) => e,
						Err(_) => Ecode::Invalid,
					};
					let _ = wd.release_file();
					pack_err(resp, ec.code());
				}
				Ok(e) => pack_err(resp, e.code()),
				Err(_) => pack_err(resp, Ecode::Invalid.code()),
			}
		}
		op::OP_DELETE => {
			let name = req.unpack_str().unwrap_or_default();
			let offset = req.unpack_i64().unwrap_or(0) as u64;
			let size = req.unpack_i64().unwrap_or(0) as u64;
			match wd.acquire_file(&name, true) {
				Ok(Ecode::Success) => {
					let ec = match wd.remove_bytes(size, offset) {
						Ok(Ok(n)) if n == size => Ecode::Success,
						Ok(Ok(_)) => Ecode::Invalid,
						Ok(Err(e)) => e,
						Err(_) => Ecode::Invalid,
					};
					let _ = wd.release_file();
					pack_err(resp, ec.code());
				}
				Ok(e) => pack_err(resp, e.code()),
				Err(_) => pack_err(resp, Ecode::Invalid.code()),
			}
		}
		op::OP_SIZE | op::OP_DELUSER => {
			pack_err(resp, Ecode::InvalidOp.code());
		}
		op::OP_TRUNCATE => {
			let name = req.unpack_str().unwrap_or_default();
			let size = req.unpack_i64().unwrap_or(0) as u64;
			match wd.acquire_file(&name, true) {
				Ok(Ecode::Success) => {
					let ec = match wd.truncate(size) {
						Ok(Ok(())) => Ecode::Success,
						Ok(Err(e)) => e,
						Err(_) => Ecode::Invalid,
					};
					let _ = wd.release_file();
					pack_err(resp, ec.code());
				}
				Ok(e) => pack_err(resp, e.code()),
				Err(_) => pack_err(resp, Ecode::Invalid.code()),
			}
		}
		op::OP_STAT => {
			let name = req.unpack_str().unwrap_or_default();
			match wd.acquire_file(&name, false) {
				Ok(Ecode::Success) => {
					let info = wd.stat().unwrap_or_default();
					pack_err(resp, Ecode::Success.code());
					resp.pack_i64(info.len() as i64 + 1);
					resp.pack_str(&info);
					let _ = wd.release_file();
				}
				Ok(e) => pack_err(resp, e.code()),
				Err(_) => pack_err(resp, Ecode::Invalid.code()),
			}
		}
		op::OP_CHMOD => {
			let name = req.unpack_str().unwrap_or_default();
			let mode = req.unpack_i32().unwrap_or(0) as u16;
			let ec = wd.chmod(&name, mode).unwrap_or(Ecode::Invalid);
			pack_err(resp, ec.code());
		}
		op::OP_CHOWN => {
			let name = req.unpack_str().unwrap_or_default();
			let owner = req.unpack_i32().unwrap_or(0) as u32;
			let ec = wd.chown(&name, owner).unwrap_or(Ecode::Invalid);
			pack_err(resp, ec.code());
		}
		op::OP_ADDUSER => {
			if wd.uid() != 0 {
				pack_err(resp, Ecode::Permission.code());
			} else {
				let name = req.unpack_str().unwrap_or_default();
				match core.add_user(&name) {
					Ok(Some(uid)) => {
						pack_err(resp, Ecode::Success.code());
						resp.pack_i64(uid as i64);
					}
					Ok(None) => pack_err(resp, Ecode::Exist.code()),
					Err(_) => pack_err(resp, Ecode::Invalid.code()),
				}
			}
		}
		op::OP_LSUSER => match core.list_users() {
			Ok(users) => {
				pack_err(resp, Ecode::Success.code());
				resp.pack_i64(users.len() as i64);
				for (_, name) in &users {
					resp.pack_str(name);
				}
			}
			Err(_) => pack_err(resp, Ecode::Invalid.code()),
		},
		op::OP_READ => {
			let name = req.unpack_str().unwrap_or_default();
			let offset = req.unpack_i64().unwrap_or(0) as u64;
			let size = req.unpack_i64().unwrap_or(0) as u64;
			match wd.acquire_file(&name, false) {
				Ok(Ecode::Success) => {
					let data = wd.read(size, offset).unwrap_or(Ok(Vec::new()));
					let _ = wd.release_file();
					match data {
						Ok(bytes) => {
							pack_err(resp, Ecode::Success.code());
							resp.pack_i64(bytes.len() as i64);
							resp.pack_bytes(&bytes);
						}
						Err(e) => pack_err(resp, e.code()),
					}
				}
				Ok(e) => pack_err(resp, e.code()),
				Err(_) => pack_err(resp, Ecode::Invalid.code()),
			}
		}
		op::OP_DELALL => {
			let name = req.unpack_str().unwrap_or_default();
			match wd.acquire_file(&name, true) {
				Ok(Ecode::Success) => {
					let result = wd.removeall_active().unwrap_or(Ok(()));
					let _ = wd.release_file();
					match result {
						Ok(()) => pack_err(resp, Ecode::Success.code()),
						Err(e) => pack_err(resp, e.code()),
					}
				}
				Ok(e) => pack_err(resp, e.code()),
				Err(_) => pack_err(resp, Ecode::Invalid.code()),
			}
		}
		op::OP_FLUSH => {
			let _ = core.flush();
			return Dispatched::NoReply;
		}
		op::OP_RENAME => {
			let old = req.unpack_str().unwrap_or_default();
			let new = req.unpack_str().unwrap_or_default();
			let ec = wd.rename(&old, &new).unwrap_or(Ecode::Invalid);
			pack_err(resp, ec.code());
		}
		_ => pack_err(resp, Ecode::InvalidOp.code()),
	}
	Dispatched::Replied
}

fn main() {
	let args = parse_args();

	let disk = match SectorClient::connect((args.disk_host.as_str(), args.disk_port)) {
		Ok(d) => d,
		Err(e) => {
			eprintln!("{}: error: could not connect to disk server: {e}", args.prog);
			exit(1);
		}
	};

	let answer = prompt(Some("Would you like to format the disk? (y/n): "), false).unwrap_or_default();
	let core = match FSCore::open(disk, answer == "y") {
		Ok(c) => c,
		Err(e) => {
			eprintln!("{}: error: failed to open filesystem: {e}", args.prog);
			exit(1);
		}
	};

	let listener = match TcpListener::bind(("0.0.0.0", args.fs_port)) {
		Ok(l) => l,
		Err(e) => {
			eprintln!("{}: error: could not bind port {}: {e}", args.prog, args.fs_port);
			exit(1);
		}
	};
	println!("Server started on port {}", args.fs_port);

	for conn in listener.incoming() {
		let stream = match conn {
			Ok(s) => s,
			Err(_) => continue,
		};
		let peer = stream.peer_addr().map(|a| a.to_string()).unwrap_or_else(|_| "?".to_owned());
		let core = Arc::clone(&core);
		thread::spawn(move || handle_client(core, stream, peer));
	}
}
