//! `fsclient` is an interactive REPL speaking the filesystem RPC protocol.
//! Ported from `original_source/step2/client.cc`.

use std::collections::VecDeque;
use std::env;
use std::io;
use std::io::Write;
use std::net::TcpStream;
use std::process::exit;

use fscore::op;
use wire::Packer;
use wire::Unpacker;

struct Args {
	prog: String,
	host: String,
	port: u16,
}

fn usage(prog: &str) -> ! {
	eprintln!("Usage: {prog} <ip> <port>");
	exit(1);
}

fn parse_args() -> Args {
	let mut iter = env::args();
	let prog = iter.next().unwrap_or_else(|| "fsclient".to_owned());
	let rest: Vec<String> = iter.collect();
	if rest.len() != 2 {
		usage(&prog);
	}
	let port: u32 = rest[1].parse().unwrap_or(0);
	if port == 0 || port > 65535 {
		eprintln!("{prog}: error: invalid port");
		exit(1);
	}
	Args {
		prog,
		host: rest[0].clone(),
		port: port as u16,
	}
}

/// Pulls whitespace-separated tokens from stdin, refilling a line at a time.
/// Mirrors `std::cin >> token`: a command and its arguments can span
/// multiple physical lines.
struct Tokens {
	pending: VecDeque<String>,
}

impl Tokens {
	fn new() -> Self {
		Self { pending: VecDeque::new() }
	}

	fn next(&mut self) -> Option<String> {
		loop {
			if let Some(tok) = self.pending.pop_front() {
				return Some(tok);
			}
			let mut line = String::new();
			if io::stdin().read_line(&mut line).unwrap_or(0) == 0 {
				return None;
			}
			self.pending.extend(line.split_whitespace().map(str::to_owned));
		}
	}
}

fn ecode_message(code: i32) -> String {
	if code == 0 {
		return "success".to_owned();
	}
	let text = match code {
		-9 => "Permission denied",
		-15 => "File exists",
		-1 => "No such file or directory",
		-17 => "Invalid operation",
		-3 => "No space left on device",
		-11 => "Not a directory",
		-12 => "Not a file",
		-16 => "User not found",
		-14 => "Device or resource busy",
		_ => "Unknown error",
	};
	format!("Error ({code}): {text}")
}

fn send_recv(stream: &mut TcpStream, request: &Packer) -> io::Result<Vec<u8>> {
	wire::send_frame(stream, request.as_slice())?;
	wire::recv_frame(stream)
}

fn print_help() {
	println!(
		"Commands:\n\
		  format\n\
		  mk <filename>\n\
		  mkdir <dirname>\n\
		  rm <filename>\n\
		  rmdir <dirname>\n\
		  cd <dirname>\n\
		  ls\n\
		  cat <filename>\n\
		  r <filename> <offset> <size>\n\
		  w <filename> <offset> <data>: overwrite file\n\
		  i <filename> <offset> <data>: insert\n\
		  d <filename> <offset> <size>: delete from file\n\
		  trunc <filename> <size>: truncate file\n\
		  stat <filename>\n\
		  chmod <filename> <mode>\n\
		  chown <filename> <owner>\n\
		  adduser <username>\n\
		  lsuser: list all users\n\
		  del <filename>: delete all contents in <filename>\n\
		  flush: flush cached blocks to disk\n\
		  rn <oldname> <newname>\n\
		  exit"
	);
}

fn main() {
	let args = parse_args();

	let mut stream = match TcpStream::connect((args.host.as_str(), args.port)) {
		Ok(s) => s,
		Err(e) => {
			eprintln!("{}: error: could not connect to {}:{}: {e}", args.prog, args.host, args.port);
			exit(1);
		}
	};

	let mut tokens = Tokens::new();

	print!("Enter username: ");
	io::stdout().flush().ok();
	let username = tokens.next().unwrap_or_default();
	let mut request = Packer::new();
	request.pack_str(&username);
	let response = match send_recv(&mut stream, &request) {
		Ok(r) => r,
		Err(e) => {
			eprintln!("{}: error: {e}", args.prog);
			exit(1);
		}
	};
	let mut u = Unpacker::new(&response);
	let result = u.unpack_i32().unwrap_or(-1);
	if result != 0 {
		eprintln!("{}", ecode_message(result));
		exit(1);
	}
	println!("Login successful");

	loop {
		print!("\nFS >> ");
		io::stdout().flush().ok();
		let cmd = match tokens.next() {
			Some(c) => c,
			None => break,
		};
		let mut request = Packer::new();
		match cmd.as_str() {
			"format" => {
				request.pack_i32(op::OP_FORMAT);
				if let Ok(resp) = send_recv(&mut stream, &request) {
					let result = Unpacker::new(&resp).unpack_i32().unwrap_or(-1);
					println!("{}", ecode_message(result));
				}
			}
			"mk" => {
				let name = tokens.next().unwrap_or_default();
				request.pack_i32(op::OP_CREATE).pack_str(&name);
				if let Ok(resp) = send_recv(&mut stream, &request) {
					let result = Unpacker::new(&resp).unpack_i32().unwrap_or(-1);
					println!("{}", ecode_message(result));
				}
			}
			"mkdir" => {
				let name = tokens.next().unwrap_or_default();
				request.pack_i32(op::OP_MKDIR).pack_str(&name);
				if let Ok(resp) = send_recv(&mut stream, &request) {
					let result = Unpacker::new(&resp).unpack_i32().unwrap_or(-1);
					println!("{}", ecode_message(result));
				}
			}
			"rm" => {
				let name = tokens.next().unwrap_or_default();
				request.pack_i32(op::OP_RMFILE).pack_str(&name);
				if let Ok(resp) = send_recv(&mut stream, &request) {
					let result = Unpacker::new(&resp).unpack_i32().unwrap_or(-1);
					println!("{}", ecode_message(result));
				}
			}
			"rmdir" => {
				let name = tokens.next().unwrap_or_default();
				request.pack_i32(op::OP_RMDIR).pack_str(&name);
				if let Ok(resp) = send_recv(&mut stream, &request) {
					let result = Unpacker::new(&resp).unpack_i32().unwrap_or(-1);
					println!("{}", ecode_message(result));
				}
			}
			"ls" => {
				request.pack_i32(op::OP_LS);
				if let Ok(resp) = send_recv(&mut stream, &request) {
					let mut u = Unpacker::new(&resp);
					let result = u.unpack_i32().unwrap_or(-1);
					if result != 0 {
						println!("{}", ecode_message(result));
					} else {
						let count = u.unpack_i64().unwrap_or(0);
						println!("total: {count}");
						for _ in 0..count {
							println!("{}", u.unpack_str().unwrap_or_default());
						}
					}
				}
			}
			"cd" => {
				let name = tokens.next().unwrap_or_default();
				request.pack_i32(op::OP_CD).pack_str(&name);
				if let Ok(resp) = send_recv(&mut stream, &request) {
					let result = Unpacker::new(&resp).unpack_i32().unwrap_or(-1);
					println!("{}", ecode_message(result));
				}
			}
			"chmod" => {
				let name = tokens.next().unwrap_or_default();
				let mode: i32 = tokens.next().and_then(|s| s.parse().ok()).unwrap_or(0);
				request.pack_i32(op::OP_CHMOD).pack_str(&name).pack_i32(mode);
				if let Ok(resp) = send_recv(&mut stream, &request) {
					let result = Unpacker::new(&resp).unpack_i32().unwrap_or(-1);
					println!("{}", ecode_message(result));
				}
			}
			"chown" => {
				let name = tokens.next().unwrap_or_default();
				let owner: i32 = tokens.next().and_then(|s| s.parse().ok()).unwrap_or(0);
				request.pack_i32(op::OP_CHOWN).pack_str(&name).pack_i32(owner);
				if let Ok(resp) = send_recv(&mut stream, &request) {
					let result = Unpacker::new(&resp).unpack_i32().unwrap_or(-1);
					println!("{}", ecode_message(result));
				}
			}
			"rename" | "rn" => {
				let old = tokens.next().unwrap_or_default();
				let new = tokens.next().unwrap_or_default();
				request.pack_i32(op::OP_RENAME).pack_str(&old).pack_str(&new);
				if let Ok(resp) = send_recv(&mut stream, &request) {
					let result = Unpacker::new(&resp).unpack_i32().unwrap_or(-1);
					println!("{}", ecode_message(result));
				}
			}
			"exit" | "e" => {
				request.pack_i32(op::OP_EXIT);
				let _ = wire::send_frame(&mut stream, request.as_slice());
				break;
			}
			"cat" => {
				let name = tokens.next().unwrap_or_default();
				request.pack_i32(op::OP_CAT).pack_str(&name);
				if let Ok(resp) = send_recv(&mut stream, &request) {
					let mut u = Unpacker::new(&resp);
					let result = u.unpack_i32().unwrap_or(-1);
					if result != 0 {
						println!("{}", ecode_message(result));
					} else {
						let _len = u.unpack_i64().unwrap_or(0);
						let data = u.unpack_bytes().unwrap_or_default();
						io::stdout().write_all(&data).ok();
					}
				}
			}
			"w" => {
				let name = tokens.next().unwrap_or_default();
				let offset: i64 = tokens.next().and_then(|s| s.parse().ok()).unwrap_or(0);
				let data = tokens.next().unwrap_or_default();
				request
					.pack_i32(op::OP_WRITE)
					.pack_str(&name)
					.pack_i64(offset)
					.pack_i64(data.len() as i64)
					.pack_bytes(data.as_bytes());
				if let Ok(resp) = send_recv(&mut stream, &request) {
					let result = Unpacker::new(&resp).unpack_i32().unwrap_or(-1);
					println!("{}", ecode_message(result));
				}
			}
			"i" => {
				let name = tokens.next().unwrap_or_default();
				let offset: i64 = tokens.next().and_then(|s| s.parse().ok()).unwrap_or(0);
				let data = tokens.next().unwrap_or_default();
				request
					.pack_i32(op::OP_INSERT)
					.pack_str(&name)
					.pack_i64(offset)
					.pack_i64(data.len() as i64)
					.pack_bytes(data.as_bytes());
				if let Ok(resp) = send_recv(&mut stream, &request) {
					let result = Unpacker::new(&resp).unpack_i32().unwrap_or(-1);
					println!("{}", ecode_message(result));
				}
			}
			"d" => {
				let name = tokens.next().unwrap_or_default();
				let offset: i64 = tokens.next().and_then(|s| s.parse().ok()).unwrap_or(0);
				let size: i64 = tokens.next().and_then(|s| s.parse().ok()).unwrap_or(0);
				request.pack_i32(op::OP_DELETE).pack_str(&name).pack_i64(offset).pack_i64(size);
				if let Ok(resp) = send_recv(&mut stream, &request) {
					let result = Unpacker::new(&resp).unpack_i32().unwrap_or(-1);
					println!("{}", ecode_message(result));
				}
			}
			"stat" => {
				let name = tokens.next().unwrap_or_default();
				request.pack_i32(op::OP_STAT).pack_str(&name);
				if let Ok(resp) = send_recv(&mut stream, &request) {
					let mut u = Unpacker::new(&resp);
					let result = u.unpack_i32().unwrap_or(-1);
					if result != 0 {
						println!("{}", ecode_message(result));
					} else {
						let _len = u.unpack_i64().unwrap_or(0);
						println!("{}", u.unpack_str().unwrap_or_default());
					}
				}
			}
			"trunc" => {
				let name = tokens.next().unwrap_or_default();
				let size: i64 = tokens.next().and_then(|s| s.parse().ok()).unwrap_or(0);
				request.pack_i32(op::OP_TRUNCATE).pack_str(&name).pack_i64(size);
				if let Ok(resp) = send_recv(&mut stream, &request) {
					let result = Unpacker::new(&resp).unpack_i32().unwrap_or(-1);
					println!("{}", ecode_message(result));
				}
			}
			"del" => {
				let name = tokens.next().unwrap_or_default();
				request.pack_i32(op::OP_DELALL).pack_str(&name);
				if let Ok(resp) = send_recv(&mut stream, &request) {
					let result = Unpacker::new(&resp).unpack_i32().unwrap_or(-1);
					println!("{}", ecode_message(result));
				}
			}
			"flush" => {
				request.pack_i32(op::OP_FLUSH);
				let _ = wire::send_frame(&mut stream, request.as_slice());
			}
			"adduser" => {
				let name = tokens.next().unwrap_or_default();
				request.pack_i32(op::OP_ADDUSER).pack_str(&name);
				if let Ok(resp) = send_recv(&mut stream, &request) {
					let result = Unpacker::new(&resp).unpack_i32().unwrap_or(-1);
					println!("{}", ecode_message(result));
				}
			}
			"r" => {
				let name = tokens.next().unwrap_or_default();
				let offset: i64 = tokens.next().and_then(|s| s.parse().ok()).unwrap_or(0);
				let size: i64 = tokens.next().and_then(|s| s.parse().ok()).unwrap_or(0);
				request.pack_i32(op::OP_READ).pack_str(&name).pack_i64(offset).pack_i64(size);
				if let Ok(resp) = send_recv(&mut stream, &request) {
					let mut u = Unpacker::new(&resp);
					let result = u.unpack_i32().unwrap_or(-1);
					if result != 0 {
						println!("{}", ecode_message(result));
					} else {
						let _len = u.unpack_i64().unwrap_or(0);
						let data = u.unpack_bytes().unwrap_or_default();
						io::stdout().write_all(&data).ok();
						println!();
					}
				}
			}
			"lsuser" => {
				request.pack_i32(op::OP_LSUSER);
				if let Ok(resp) = send_recv(&mut stream, &request) {
					let mut u = Unpacker::new(&resp);
					let result = u.unpack_i32().unwrap_or(-1);
					if result != 0 {
						println!("{}", ecode_message(result));
					} else {
						let count = u.unpack_i64().unwrap_or(0);
						print!("total: {count}");
						for _ in 0..count {
							print!("\n{}", u.unpack_str().unwrap_or_default());
						}
						println!();
					}
				}
			}
			"help" | "h" => print_help(),
			other => {
				println!("Unknown command: {other}");
				print_help();
			}
		}
	}
}
