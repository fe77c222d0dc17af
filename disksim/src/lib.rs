//! A simulated rotating disk: a flat, sector-addressed file with an
//! artificial seek delay between cylinders. Ported from
//! `original_source/step1/disksim.c`.

use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use wire::Packer;
use wire::Unpacker;

/// Size in bytes of one sector, and thus of one disk block.
pub const SECTOR_SIZE: usize = 256;

struct State {
	file: File,
	current_cylinder: i32,
	total_time_us: i64,
}

/// A simulated disk: `cylinders * sectors * SECTOR_SIZE` bytes backed by a
/// single file, plus a seek-time model charged on every `R`/`W`/`C`.
pub struct Disk {
	num_cylinders: i32,
	num_sectors: i32,
	sector_move_time_us: i64,
	state: Mutex<State>,
}

impl Disk {
	/// Opens (creating if necessary) the disk file at `path`, sized to hold
	/// exactly `num_cylinders * num_sectors` sectors.
	pub fn open(
		path: &Path,
		num_cylinders: i32,
		num_sectors: i32,
		sector_move_time_us: i64,
	) -> io::Result<Self> {
		let file = OpenOptions::new()
			.read(true)
			.write(true)
			.create(true)
			.open(path)?;
		let size = num_cylinders as u64 * num_sectors as u64 * SECTOR_SIZE as u64;
		file.set_len(size)?;
		Ok(Self {
			num_cylinders,
			num_sectors,
			sector_move_time_us,
			state: Mutex::new(State {
				file,
				current_cylinder: 0,
				total_time_us: 0,
			}),
		})
	}

	/// Cylinder/sector geometry.
	pub fn geometry(&self) -> (i32, i32) {
		(self.num_cylinders, self.num_sectors)
	}

	fn in_range(&self, cylinder: i32, sector: i32) -> bool {
		cylinder >= 0 && cylinder < self.num_cylinders && sector >= 0 && sector < self.num_sectors
	}

	fn offset(&self, cylinder: i32, sector: i32) -> u64 {
		(cylinder as u64 * self.num_sectors as u64 + sector as u64) * SECTOR_SIZE as u64
	}

	/// Moves the head to `cylinder`, sleeping `sector_move_time_us *
	/// |delta|` and accruing that into the elapsed-time counter.
	fn move_head(&self, state: &mut State, cylinder: i32) {
		let wait_us = (state.current_cylinder - cylinder).unsigned_abs() as i64
			* self.sector_move_time_us;
		state.total_time_us += wait_us;
		state.current_cylinder = cylinder;
		if wait_us > 0 {
			thread::sleep(Duration::from_micros(wait_us as u64));
		}
	}

	/// Serves one already-unpacked request, writing the response into
	/// `response`. Returns `true` if this was an `'E'` (elapsed-time query)
	/// request, in which case the caller's protocol does not send a reply
	/// (ported from `server.c`'s `handler`, which `break`s before
	/// `bytepack_send` when `disk_serve_request` returns `'E'`).
	pub fn serve(&self, request: &[u8], response: &mut Packer) -> bool {
		let mut unpacker = Unpacker::new(request);
		let request_type = match unpacker.unpack_u8() {
			Ok(c) => c,
			Err(_) => {
				response.pack_i32(0).pack_str("Error: empty request");
				return false;
			}
		};
		let mut state = self.state.lock().unwrap();
		match request_type {
			b'I' => {
				response.pack_i32(self.num_cylinders).pack_i32(self.num_sectors);
			}
			b'C' => {
				let (cylinder, sector) = match (unpacker.unpack_i32(), unpacker.unpack_i32()) {
					(Ok(c), Ok(s)) => (c, s),
					_ => {
						response.pack_i32(0).pack_str("Error: malformed request");
						return false;
					}
				};
				self.clear_section(&mut state, cylinder, sector, response);
			}
			b'R' => {
				let (cylinder, sector) = match (unpacker.unpack_i32(), unpacker.unpack_i32()) {
					(Ok(c), Ok(s)) => (c, s),
					_ => {
						response.pack_i32(0).pack_str("Error: malformed request");
						return false;
					}
				};
				self.read_sector(&mut state, cylinder, sector, response);
			}
			b'W' => {
				let cylinder = unpacker.unpack_i32();
				let sector = unpacker.unpack_i32();
				let data_size = unpacker.unpack_i32();
				let data = unpacker.unpack_bytes();
				match (cylinder, sector, data_size, data) {
					(Ok(cylinder), Ok(sector), Ok(data_size), Ok(data)) => {
						if (data.len() as i64) < data_size as i64 {
							response.pack_i32(0).pack_str("Error: Data size mismatch");
						} else {
							self.write_sector(&mut state, cylinder, sector, data_size, &data, response);
						}
					}
					_ => {
						response.pack_i32(0).pack_str("Error: malformed request");
					}
				}
			}
			b'E' => {
				response.pack_i32(1).pack_i64(state.total_time_us);
				return true;
			}
			_ => {
				response.pack_i32(0).pack_str("Error: Invalid request type");
			}
		}
		false
	}

	fn check_range(&self, cylinder: i32, sector: i32, response: &mut Packer) -> bool {
		if !self.in_range(cylinder, sector) {
			response
				.pack_i32(0)
				.pack_str("Error: Cylinder or sector out of range");
			return false;
		}
		true
	}

	fn read_sector(&self, state: &mut State, cylinder: i32, sector: i32, response: &mut Packer) {
		if !self.check_range(cylinder, sector, response) {
			return;
		}
		self.move_head(state, cylinder);
		let mut buf = [0u8; SECTOR_SIZE];
		if let Err(e) = state.file.seek(SeekFrom::Start(self.offset(cylinder, sector))) {
			response.pack_i32(0).pack_str(&format!("Error: {e}"));
			return;
		}
		if let Err(e) = state.file.read_exact(&mut buf) {
			response.pack_i32(0).pack_str(&format!("Error: {e}"));
			return;
		}
		response.pack_i32(SECTOR_SIZE as i32).pack_bytes(&buf);
	}

	fn write_sector(
		&self,
		state: &mut State,
		cylinder: i32,
		sector: i32,
		data_size: i32,
		data: &[u8],
		response: &mut Packer,
	) {
		if !self.check_range(cylinder, sector, response) {
			return;
		}
		if data_size as usize > SECTOR_SIZE {
			response.pack_i32(0).pack_str("Error: Data size too large");
			return;
		}
		self.move_head(state, cylinder);
		let mut buf = [0u8; SECTOR_SIZE];
		buf[..data_size as usize].copy_from_slice(&data[..data_size as usize]);
		if let Err(e) = state.file.seek(SeekFrom::Start(self.offset(cylinder, sector))) {
			response.pack_i32(0).pack_str(&format!("Error: {e}"));
			return;
		}
		if let Err(e) = state.file.write_all(&buf) {
			response.pack_i32(0).pack_str(&format!("Error: {e}"));
			return;
		}
		response.pack_i32(1);
	}

	fn clear_section(&self, state: &mut State, cylinder: i32, sector: i32, response: &mut Packer) {
		if !self.check_range(cylinder, sector, response) {
			return;
		}
		self.move_head(state, cylinder);
		if let Err(e) = state.file.seek(SeekFrom::Start(self.offset(cylinder, sector))) {
			response.pack_i32(0).pack_str(&format!("Error: {e}"));
			return;
		}
		if let Err(e) = state.file.write_all(&[0u8; SECTOR_SIZE]) {
			response.pack_i32(0).pack_str(&format!("Error: {e}"));
			return;
		}
		response.pack_i32(1);
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn scratch_disk(name: &str) -> Disk {
		let path = std::env::temp_dir().join(name);
		let _ = std::fs::remove_file(&path);
		Disk::open(&path, 2, 4, 0).unwrap()
	}

	#[test]
	fn info_reports_geometry() {
		let disk = scratch_disk("disksim_test_info.img");
		let mut resp = Packer::new();
		let mut req = Packer::new();
		req.pack_u8(b'I');
		disk.serve(&req.into_vec(), &mut resp);
		let buf = resp.into_vec();
		let mut u = Unpacker::new(&buf);
		assert_eq!(u.unpack_i32().unwrap(), 2);
		assert_eq!(u.unpack_i32().unwrap(), 4);
	}

	#[test]
	fn write_then_read_roundtrips() {
		let disk = scratch_disk("disksim_test_rw.img");
		let mut req = Packer::new();
		req.pack_u8(b'W').pack_i32(0).pack_i32(1).pack_i32(5).pack_bytes(b"hello");
		let mut resp = Packer::new();
		disk.serve(&req.into_vec(), &mut resp);
		let mut u = Unpacker::new(&resp.into_vec());
		assert_eq!(u.unpack_i32().unwrap(), 1);

		let mut req = Packer::new();
		req.pack_u8(b'R').pack_i32(0).pack_i32(1);
		let mut resp = Packer::new();
		disk.serve(&req.into_vec(), &mut resp);
		let buf = resp.into_vec();
		let mut u = Unpacker::new(&buf);
		assert_eq!(u.unpack_i32().unwrap(), SECTOR_SIZE as i32);
		let data = u.unpack_bytes().unwrap();
		assert_eq!(&data[..5], b"hello");
		assert!(data[5..].iter().all(|&b| b == 0));
	}

	#[test]
	fn read_out_of_range_is_an_error() {
		let disk = scratch_disk("disksim_test_oob.img");
		let mut req = Packer::new();
		req.pack_u8(b'R').pack_i32(99).pack_i32(0);
		let mut resp = Packer::new();
		disk.serve(&req.into_vec(), &mut resp);
		let mut u = Unpacker::new(&resp.into_vec());
		assert_eq!(u.unpack_i32().unwrap(), 0);
	}

	#[test]
	fn elapsed_time_query_signals_no_reply() {
		let disk = scratch_disk("disksim_test_elapsed.img");
		let mut req = Packer::new();
		req.pack_u8(b'E');
		let mut resp = Packer::new();
		assert!(disk.serve(&req.into_vec(), &mut resp));
	}
}
