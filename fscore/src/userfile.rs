//! `UserFile`: an append-only, fixed-record user table stored as the byte
//! stream of one inode. Ported from `original_source/step2/userfile.{h,cc}`.

use std::io;
use std::sync::Arc;

use crate::block::BlockId;
use crate::block::FileType;
use crate::cache::BlockCache;
use crate::inode::InodeFile;

/// Bytes reserved per username record (including the NUL terminator).
pub const USERNAME_RECORD_SIZE: usize = 32;

/// uid 0 always maps to the superuser and is seeded at construction time.
pub const ROOT_UID: u32 = 0;

fn encode_record(name: &str) -> [u8; USERNAME_RECORD_SIZE] {
	let mut buf = [0u8; USERNAME_RECORD_SIZE];
	let bytes = name.as_bytes();
	let len = bytes.len().min(USERNAME_RECORD_SIZE - 1);
	buf[..len].copy_from_slice(&bytes[..len]);
	buf
}

fn decode_record(buf: &[u8]) -> String {
	let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
	String::from_utf8_lossy(&buf[..end]).into_owned()
}

/// The user table, one fixed-size record per uid; a uid is simply its
/// record's index. Unlike [`crate::directory::Directory`], tombstoned slots
/// (a zero-length username) are never reused by `add_user`.
pub struct UserFile {
	file: InodeFile,
}

impl UserFile {
	pub fn new(cache: Arc<BlockCache>) -> Self {
		Self {
			file: InodeFile::new(cache),
		}
	}

	pub fn open(&mut self, inode_id: BlockId) -> io::Result<bool> {
		self.file.open(inode_id)
	}

	/// Creates a fresh table and seeds uid 0 as `root`.
	pub fn create(&mut self, owner_mode: u16) -> io::Result<BlockId> {
		let inode_id = self.file.create(ROOT_UID, owner_mode, FileType::File)?;
		if inode_id.is_null() {
			return Ok(BlockId::NULL);
		}
		let record = encode_record("root");
		self.file.write(&record, 0)?;
		Ok(inode_id)
	}

	pub fn close(&mut self) -> io::Result<()> {
		self.file.close()
	}

	pub fn inode_id(&self) -> BlockId {
		self.file.inode_id()
	}

	fn record_count(&self) -> u64 {
		self.file.size() / USERNAME_RECORD_SIZE as u64
	}

	/// Appends a new record, always growing the table; never reuses a
	/// tombstoned slot.
	pub fn add_user(&mut self, username: &str) -> io::Result<Option<u32>> {
		if username.is_empty() || username.as_bytes().len() >= USERNAME_RECORD_SIZE {
			return Ok(None);
		}
		if self.lookup(username)?.is_some() {
			return Ok(None);
		}
		let uid = self.record_count() as u32;
		let record = encode_record(username);
		let offset = uid as u64 * USERNAME_RECORD_SIZE as u64;
		let written = self.file.write(&record, offset)?;
		if written != USERNAME_RECORD_SIZE as u64 {
			return Ok(None);
		}
		Ok(Some(uid))
	}

	/// Tombstones `uid`'s record. Refuses to remove uid 0 (root).
	pub fn remove_user(&mut self, uid: u32) -> io::Result<bool> {
		if uid == ROOT_UID {
			return Ok(false);
		}
		if (uid as u64) >= self.record_count() {
			return Ok(false);
		}
		let offset = uid as u64 * USERNAME_RECORD_SIZE as u64;
		let empty = [0u8; USERNAME_RECORD_SIZE];
		let written = self.file.write(&empty, offset)?;
		Ok(written == USERNAME_RECORD_SIZE as u64)
	}

	/// Looks up a username, returning its uid, or `None` on a miss. Callers
	/// still special-case the literal name `root` before calling this
	/// (matching the original dispatcher's auth flow), since uid 0 is a
	/// legitimate hit distinct from a miss.
	pub fn lookup(&mut self, username: &str) -> io::Result<Option<u32>> {
		let count = self.record_count();
		for uid in 0..count {
			let raw = self.file.read(USERNAME_RECORD_SIZE as u64, uid * USERNAME_RECORD_SIZE as u64)?;
			if raw.is_empty() {
				continue;
			}
			if decode_record(&raw) == username {
				return Ok(Some(uid as u32));
			}
		}
		Ok(None)
	}

	pub fn get_username(&mut self, uid: u32) -> io::Result<Option<String>> {
		if (uid as u64) >= self.record_count() {
			return Ok(None);
		}
		let raw = self.file.read(
			USERNAME_RECORD_SIZE as u64,
			uid as u64 * USERNAME_RECORD_SIZE as u64,
		)?;
		if raw.is_empty() {
			return Ok(None);
		}
		let name = decode_record(&raw);
		if name.is_empty() {
			return Ok(None);
		}
		Ok(Some(name))
	}

	pub fn set_username(&mut self, uid: u32, username: &str) -> io::Result<bool> {
		if username.is_empty() || username.as_bytes().len() >= USERNAME_RECORD_SIZE {
			return Ok(false);
		}
		if (uid as u64) >= self.record_count() {
			return Ok(false);
		}
		let record = encode_record(username);
		let offset = uid as u64 * USERNAME_RECORD_SIZE as u64;
		let written = self.file.write(&record, offset)?;
		Ok(written == USERNAME_RECORD_SIZE as u64)
	}

	/// All live `(uid, username)` pairs, in uid order.
	pub fn list_users(&mut self) -> io::Result<Vec<(u32, String)>> {
		let count = self.record_count();
		let mut out = Vec::new();
		for uid in 0..count {
			let raw = self.file.read(USERNAME_RECORD_SIZE as u64, uid * USERNAME_RECORD_SIZE as u64)?;
			if raw.is_empty() {
				continue;
			}
			let name = decode_record(&raw);
			if !name.is_empty() {
				out.push((uid as u32, name));
			}
		}
		Ok(out)
	}
}
