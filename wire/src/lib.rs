//! The byte-pack codec and length-prefixed framing shared by the disk RPC
//! and the filesystem RPC (see the operation tables in the protocol spec).
//!
//! Every message on the wire is a 64-bit little-endian length followed by a
//! payload built from a handful of fixed-width fields: a 1-byte `u8`, a
//! 4-byte `i32`, an 8-byte `i64`, a NUL-terminated string, and a
//! length-prefixed raw byte blob. [`Packer`] writes that payload;
//! [`Unpacker`] reads it back.

use std::fmt;
use std::io;
use std::io::Read;
use std::io::Write;

/// An error unpacking a byte-pack payload, or a framing error.
#[derive(Debug)]
pub enum WireError {
	/// The underlying I/O failed.
	Io(io::Error),
	/// Fewer bytes remained in the buffer than the field being read needs.
	ShortBuffer,
	/// A string field had no terminating NUL before the buffer ran out.
	UnterminatedString,
}

impl fmt::Display for WireError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Io(e) => write!(f, "{e}"),
			Self::ShortBuffer => write!(f, "buffer underflow"),
			Self::UnterminatedString => write!(f, "unterminated string field"),
		}
	}
}

impl std::error::Error for WireError {}

impl From<io::Error> for WireError {
	fn from(e: io::Error) -> Self {
		Self::Io(e)
	}
}

impl From<WireError> for io::Error {
	fn from(e: WireError) -> Self {
		match e {
			WireError::Io(e) => e,
			other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
		}
	}
}

/// A growable buffer that fields are packed into, in wire order.
#[derive(Default)]
pub struct Packer {
	buf: Vec<u8>,
}

impl Packer {
	/// Creates an empty packer.
	pub fn new() -> Self {
		Self::default()
	}

	/// Packs a single byte.
	pub fn pack_u8(&mut self, v: u8) -> &mut Self {
		self.buf.push(v);
		self
	}

	/// Packs a 4-byte little-endian integer.
	pub fn pack_i32(&mut self, v: i32) -> &mut Self {
		self.buf.extend_from_slice(&v.to_le_bytes());
		self
	}

	/// Packs an 8-byte little-endian integer.
	pub fn pack_i64(&mut self, v: i64) -> &mut Self {
		self.buf.extend_from_slice(&v.to_le_bytes());
		self
	}

	/// Packs a NUL-terminated string. `s` must not itself contain a NUL byte.
	pub fn pack_str(&mut self, s: &str) -> &mut Self {
		debug_assert!(!s.as_bytes().contains(&0), "string field contains NUL");
		self.buf.extend_from_slice(s.as_bytes());
		self.buf.push(0);
		self
	}

	/// Packs a length-prefixed blob of raw bytes: an 8-byte length followed
	/// by the bytes themselves.
	pub fn pack_bytes(&mut self, data: &[u8]) -> &mut Self {
		self.buf.extend_from_slice(&(data.len() as u64).to_le_bytes());
		self.buf.extend_from_slice(data);
		self
	}

	/// Consumes the packer, returning the packed payload.
	pub fn into_vec(self) -> Vec<u8> {
		self.buf
	}

	/// Returns the packed payload so far.
	pub fn as_slice(&self) -> &[u8] {
		&self.buf
	}
}

/// A read-only cursor over a received payload.
pub struct Unpacker<'a> {
	buf: &'a [u8],
	offset: usize,
}

impl<'a> Unpacker<'a> {
	/// Wraps `buf` for unpacking, starting at offset 0.
	pub fn new(buf: &'a [u8]) -> Self {
		Self { buf, offset: 0 }
	}

	/// Number of bytes not yet consumed.
	pub fn remaining(&self) -> usize {
		self.buf.len() - self.offset
	}

	fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
		if self.remaining() < n {
			return Err(WireError::ShortBuffer);
		}
		let slice = &self.buf[self.offset..self.offset + n];
		self.offset += n;
		Ok(slice)
	}

	/// Unpacks a single byte.
	pub fn unpack_u8(&mut self) -> Result<u8, WireError> {
		Ok(self.take(1)?[0])
	}

	/// Unpacks a 4-byte little-endian integer.
	pub fn unpack_i32(&mut self) -> Result<i32, WireError> {
		let bytes: [u8; 4] = self.take(4)?.try_into().unwrap();
		Ok(i32::from_le_bytes(bytes))
	}

	/// Unpacks an 8-byte little-endian integer.
	pub fn unpack_i64(&mut self) -> Result<i64, WireError> {
		let bytes: [u8; 8] = self.take(8)?.try_into().unwrap();
		Ok(i64::from_le_bytes(bytes))
	}

	/// Unpacks a NUL-terminated string.
	pub fn unpack_str(&mut self) -> Result<String, WireError> {
		let rest = &self.buf[self.offset..];
		let nul = rest.iter().position(|&b| b == 0).ok_or(WireError::UnterminatedString)?;
		let s = std::str::from_utf8(&rest[..nul])
			.map_err(|_| WireError::UnterminatedString)?
			.to_owned();
		self.offset += nul + 1;
		Ok(s)
	}

	/// Unpacks a length-prefixed blob of raw bytes.
	pub fn unpack_bytes(&mut self) -> Result<Vec<u8>, WireError> {
		let len_bytes: [u8; 8] = self.take(8)?.try_into().unwrap();
		let len = u64::from_le_bytes(len_bytes) as usize;
		Ok(self.take(len)?.to_vec())
	}
}

/// Sends one length-prefixed frame: an 8-byte little-endian length followed
/// by `payload`.
pub fn send_frame<W: Write>(w: &mut W, payload: &[u8]) -> io::Result<()> {
	w.write_all(&(payload.len() as u64).to_le_bytes())?;
	w.write_all(payload)?;
	w.flush()
}

/// Receives one length-prefixed frame. A frame of length 0 is a valid
/// message (used as a disconnect signal by both RPCs) and is returned as an
/// empty vector rather than an error.
pub fn recv_frame<R: Read>(r: &mut R) -> io::Result<Vec<u8>> {
	let mut len_bytes = [0u8; 8];
	r.read_exact(&mut len_bytes)?;
	let len = u64::from_le_bytes(len_bytes) as usize;
	let mut payload = vec![0u8; len];
	r.read_exact(&mut payload)?;
	Ok(payload)
}

#[cfg(test)]
mod test {
	use super::*;
	use std::io::Cursor;

	#[test]
	fn pack_unpack_scalars() {
		let mut p = Packer::new();
		p.pack_u8(b'W').pack_i32(-7).pack_i64(123456789);
		let buf = p.into_vec();
		let mut u = Unpacker::new(&buf);
		assert_eq!(u.unpack_u8().unwrap(), b'W');
		assert_eq!(u.unpack_i32().unwrap(), -7);
		assert_eq!(u.unpack_i64().unwrap(), 123456789);
		assert_eq!(u.remaining(), 0);
	}

	#[test]
	fn pack_unpack_str_and_bytes() {
		let mut p = Packer::new();
		p.pack_str("home").pack_bytes(b"hello world");
		let buf = p.into_vec();
		let mut u = Unpacker::new(&buf);
		assert_eq!(u.unpack_str().unwrap(), "home");
		assert_eq!(u.unpack_bytes().unwrap(), b"hello world");
	}

	#[test]
	fn unpack_short_buffer_errors() {
		let mut u = Unpacker::new(&[1, 2]);
		assert!(matches!(u.unpack_i32(), Err(WireError::ShortBuffer)));
	}

	#[test]
	fn unpack_unterminated_string_errors() {
		let mut u = Unpacker::new(b"no-nul-here");
		assert!(matches!(u.unpack_str(), Err(WireError::UnterminatedString)));
	}

	#[test]
	fn frame_roundtrip() {
		let mut buf = Vec::new();
		send_frame(&mut buf, b"payload").unwrap();
		let mut cursor = Cursor::new(buf);
		let received = recv_frame(&mut cursor).unwrap();
		assert_eq!(received, b"payload");
	}

	#[test]
	fn zero_length_frame_is_empty_not_an_error() {
		let mut buf = Vec::new();
		send_frame(&mut buf, &[]).unwrap();
		let mut cursor = Cursor::new(buf);
		let received = recv_frame(&mut cursor).unwrap();
		assert!(received.is_empty());
	}
}
