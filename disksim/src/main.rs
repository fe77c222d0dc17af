//! `diskd` simulates a rotating disk and serves sector read/write/clear
//! requests over TCP. Ported from `original_source/step1/server.c`.

use std::env;
use std::net::TcpListener;
use std::net::TcpStream;
use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;
use std::thread;

use disksim::Disk;
use wire::Packer;

struct Args {
	prog: String,
	diskfile: PathBuf,
	num_cylinders: i32,
	num_sectors: i32,
	sector_move_time_us: i64,
	port: u16,
}

fn usage(prog: &str) -> ! {
	eprintln!(
		"Usage: {prog} <diskfile> <num_cylinders> <num_sectors> <sector_move_time_us> <port>"
	);
	exit(1);
}

fn parse_args() -> Args {
	let mut iter = env::args();
	let prog = iter.next().unwrap_or_else(|| "diskd".to_owned());
	let rest: Vec<String> = iter.collect();
	if rest.len() != 5 {
		usage(&prog);
	}

	let num_cylinders: i32 = rest[1].parse().unwrap_or(0);
	let num_sectors: i32 = rest[2].parse().unwrap_or(0);
	let sector_move_time_us: i64 = rest[3].parse().unwrap_or(0);
	let port: i64 = rest[4].parse().unwrap_or(0);
	if num_cylinders <= 0 || num_sectors <= 0 || sector_move_time_us < 0 || port <= 64 || port >= 65536 {
		eprintln!("{prog}: error: invalid arguments");
		exit(1);
	}

	Args {
		prog,
		diskfile: rest[0].clone().into(),
		num_cylinders,
		num_sectors,
		sector_move_time_us,
		port: port as u16,
	}
}

fn handle_client(disk: Arc<Disk>, mut stream: TcpStream) {
	let peer = stream
		.peer_addr()
		.map(|a| a.to_string())
		.unwrap_or_else(|_| "?".to_owned());
	println!("Receiving connection from {peer}");
	loop {
		let request = match wire::recv_frame(&mut stream) {
			Ok(r) => r,
			Err(_) => break,
		};
		if request.is_empty() {
			break;
		}
		let mut response = Packer::new();
		let is_elapsed_query = disk.serve(&request, &mut response);
		if is_elapsed_query {
			break;
		}
		if wire::send_frame(&mut stream, response.as_slice()).is_err() {
			break;
		}
	}
	println!("Client {peer} disconnected");
}

fn main() {
	let args = parse_args();

	let disk = match Disk::open(
		&args.diskfile,
		args.num_cylinders,
		args.num_sectors,
		args.sector_move_time_us,
	) {
		Ok(d) => Arc::new(d),
		Err(e) => {
			eprintln!("{}: error: disk_init failed: {e}", args.prog);
			exit(1);
		}
	};

	let listener = match TcpListener::bind(("0.0.0.0", args.port)) {
		Ok(l) => l,
		Err(e) => {
			eprintln!("{}: error: could not bind port {}: {e}", args.prog, args.port);
			exit(1);
		}
	};
	println!("Server started on port {}", args.port);

	for conn in listener.incoming() {
		let stream = match conn {
			Ok(s) => s,
			Err(_) => continue,
		};
		let disk = Arc::clone(&disk);
		thread::spawn(move || handle_client(disk, stream));
	}
}
