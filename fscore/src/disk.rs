//! The filesystem server's client to the remote disk. Ported from
//! `original_source/step2/idisk.{h,cc}`.

use std::io;
use std::net::TcpStream;
use std::net::ToSocketAddrs;

use wire::Packer;
use wire::Unpacker;

use crate::block::BLOCK_SIZE;

/// A connection to a `diskd` sector server. Caches the disk's geometry at
/// connect time, matching `RemoteDisk`'s unconditional `get_disk_info` call
/// in its constructor. Single-threaded, no retry.
pub struct SectorClient {
	stream: TcpStream,
	cylinders: i32,
	sectors: i32,
}

impl SectorClient {
	/// Connects to `addr` and immediately queries geometry.
	pub fn connect<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
		let stream = TcpStream::connect(addr)?;
		let mut client = Self {
			stream,
			cylinders: 0,
			sectors: 0,
		};
		client.refresh_info()?;
		Ok(client)
	}

	fn refresh_info(&mut self) -> io::Result<()> {
		let mut req = Packer::new();
		req.pack_u8(b'I');
		wire::send_frame(&mut self.stream, req.as_slice())?;
		let resp = wire::recv_frame(&mut self.stream)?;
		let mut u = Unpacker::new(&resp);
		self.cylinders = u.unpack_i32().map_err(io::Error::from)?;
		self.sectors = u.unpack_i32().map_err(io::Error::from)?;
		Ok(())
	}

	/// `(cylinders, sectors)`, cached at connect time.
	pub fn geometry(&self) -> (i32, i32) {
		(self.cylinders, self.sectors)
	}

	fn check_section(&self, cylinder: i32, sector: i32) -> io::Result<()> {
		if cylinder < 0 || sector < 0 || cylinder >= self.cylinders || sector >= self.sectors {
			return Err(io::Error::new(
				io::ErrorKind::InvalidInput,
				format!("invalid disk section {cylinder}:{sector}"),
			));
		}
		Ok(())
	}

	/// Reads one sector, returning exactly `BLOCK_SIZE` bytes.
	pub fn read(&mut self, cylinder: i32, sector: i32) -> io::Result<[u8; BLOCK_SIZE]> {
		self.check_section(cylinder, sector)?;
		let mut req = Packer::new();
		req.pack_u8(b'R').pack_i32(cylinder).pack_i32(sector);
		wire::send_frame(&mut self.stream, req.as_slice())?;
		let resp = wire::recv_frame(&mut self.stream)?;
		let mut u = Unpacker::new(&resp);
		let sector_size = u.unpack_i32().map_err(io::Error::from)?;
		if sector_size == 0 {
			let msg = u.unpack_str().unwrap_or_else(|_| "unknown error".to_owned());
			return Err(io::Error::new(
				io::ErrorKind::Other,
				format!("failed to read disk section {cylinder}:{sector}: {msg}"),
			));
		}
		let data = u.unpack_bytes().map_err(io::Error::from)?;
		if data.len() != BLOCK_SIZE {
			return Err(io::Error::new(io::ErrorKind::InvalidData, "short sector read"));
		}
		let mut buf = [0u8; BLOCK_SIZE];
		buf.copy_from_slice(&data);
		Ok(buf)
	}

	/// Writes `data` (at most `BLOCK_SIZE` bytes; the server tail-pads).
	pub fn write(&mut self, cylinder: i32, sector: i32, data: &[u8]) -> io::Result<()> {
		self.check_section(cylinder, sector)?;
		let mut req = Packer::new();
		req.pack_u8(b'W')
			.pack_i32(cylinder)
			.pack_i32(sector)
			.pack_i32(data.len() as i32)
			.pack_bytes(data);
		wire::send_frame(&mut self.stream, req.as_slice())?;
		let resp = wire::recv_frame(&mut self.stream)?;
		let mut u = Unpacker::new(&resp);
		let ok = u.unpack_i32().map_err(io::Error::from)?;
		if ok == 0 {
			let msg = u.unpack_str().unwrap_or_else(|_| "unknown error".to_owned());
			return Err(io::Error::new(
				io::ErrorKind::Other,
				format!("failed to write disk section {cylinder}:{sector}: {msg}"),
			));
		}
		Ok(())
	}

	/// Zeroes a sector server-side.
	pub fn clear(&mut self, cylinder: i32, sector: i32) -> io::Result<()> {
		self.check_section(cylinder, sector)?;
		let mut req = Packer::new();
		req.pack_u8(b'C').pack_i32(cylinder).pack_i32(sector);
		wire::send_frame(&mut self.stream, req.as_slice())?;
		let resp = wire::recv_frame(&mut self.stream)?;
		let mut u = Unpacker::new(&resp);
		let ok = u.unpack_i32().map_err(io::Error::from)?;
		if ok == 0 {
			return Err(io::Error::new(io::ErrorKind::Other, "failed to clear disk section"));
		}
		Ok(())
	}
}

impl Drop for SectorClient {
	fn drop(&mut self) {
		let mut req = Packer::new();
		req.pack_u8(b'E');
		let _ = wire::send_frame(&mut self.stream, req.as_slice());
	}
}
