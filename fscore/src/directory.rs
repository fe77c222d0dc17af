//! `Directory`: a directory's entry list, materialized in memory over an
//! inode's byte stream and fully rewritten on drop. Ported from
//! `original_source/step2/directory.{h,cc}`.

use std::io;
use std::sync::Arc;

use crate::block::BlockId;
use crate::block::FileType;
use crate::cache::BlockCache;
use crate::error::Ecode;
use crate::inode::InodeFile;

/// Bytes reserved for a directory entry's name, including the NUL
/// terminator. Names of 31 bytes or more are rejected by `add_entry`.
pub const DIR_NAME_SIZE: usize = 32;
const DIR_RECORD_SIZE: usize = DIR_NAME_SIZE + 8;

struct Slot {
	name: String,
	inode: BlockId,
}

fn encode_name(name: &str) -> [u8; DIR_NAME_SIZE] {
	let mut buf = [0u8; DIR_NAME_SIZE];
	let bytes = name.as_bytes();
	buf[..bytes.len()].copy_from_slice(bytes);
	buf
}

fn decode_name(buf: &[u8]) -> String {
	let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
	String::from_utf8_lossy(&buf[..end]).into_owned()
}

/// A directory inode's entry table. Tombstoned (removed) slots are reused by
/// `add_entry` while the directory stays open, and compacted away the next
/// time the entry table is rewritten.
pub struct Directory {
	file: InodeFile,
	entries: Vec<Option<Slot>>,
}

impl Directory {
	pub fn new(cache: Arc<BlockCache>) -> Self {
		Self {
			file: InodeFile::new(cache),
			entries: Vec::new(),
		}
	}

	pub fn inode_id(&self) -> BlockId {
		self.file.inode_id()
	}

	pub fn inode(&self) -> &crate::block::InodeBlock {
		self.file.inode()
	}

	/// Loads an existing directory's entries.
	pub fn open(&mut self, inode_id: BlockId) -> io::Result<bool> {
		if !self.file.open(inode_id)? {
			return Ok(false);
		}
		self.load_entries()?;
		Ok(true)
	}

	/// Creates a new directory inode, seeding `.` and `..`. When `parent` is
	/// null the new directory is its own parent (used for the root).
	pub fn create(&mut self, owner: u32, mode: u16, parent: BlockId) -> io::Result<BlockId> {
		let inode_id = self.file.create(owner, mode, FileType::Dir)?;
		if inode_id.is_null() {
			return Ok(BlockId::NULL);
		}
		let parent = if parent.is_null() { inode_id } else { parent };
		self.entries = vec![
			Some(Slot {
				name: ".".to_owned(),
				inode: inode_id,
			}),
			Some(Slot {
				name: "..".to_owned(),
				inode: parent,
			}),
		];
		self.save()?;
		Ok(inode_id)
	}

	pub fn close(&mut self) -> io::Result<()> {
		self.save()?;
		self.file.close()
	}

	fn load_entries(&mut self) -> io::Result<()> {
		let raw = self.file.readall()?;
		self.entries.clear();
		for chunk in raw.chunks(DIR_RECORD_SIZE) {
			if chunk.len() < DIR_RECORD_SIZE {
				break;
			}
			let name = decode_name(&chunk[..DIR_NAME_SIZE]);
			let inode = BlockId(u64::from_le_bytes(chunk[DIR_NAME_SIZE..].try_into().unwrap()));
			if name.is_empty() {
				self.entries.push(None);
			} else {
				self.entries.push(Some(Slot { name, inode }));
			}
		}
		Ok(())
	}

	/// Rewrites the whole entry stream, compacting away tombstones.
	fn save(&mut self) -> io::Result<()> {
		self.file.removeall()?;
		let mut buf = Vec::new();
		for slot in self.entries.iter().flatten() {
			buf.extend_from_slice(&encode_name(&slot.name));
			buf.extend_from_slice(&slot.inode.0.to_le_bytes());
		}
		if !buf.is_empty() {
			self.file.write(&buf, 0)?;
		}
		Ok(())
	}

	pub fn lookup(&self, name: &str) -> Option<BlockId> {
		self.entries
			.iter()
			.flatten()
			.find(|s| s.name == name)
			.map(|s| s.inode)
	}

	/// The name under which `inode` appears, if any (used for `..`-relative
	/// rename and for printing working paths).
	pub fn lookup_name(&self, inode: BlockId) -> Option<&str> {
		self.entries
			.iter()
			.flatten()
			.find(|s| s.inode == inode)
			.map(|s| s.name.as_str())
	}

	pub fn list(&self) -> Vec<(&str, BlockId)> {
		self.entries
			.iter()
			.flatten()
			.map(|s| (s.name.as_str(), s.inode))
			.collect()
	}

	/// Adds a new entry, reusing a tombstoned slot if one exists.
	pub fn add_entry(&mut self, name: &str, inode: BlockId) -> Ecode {
		if name.is_empty() || name.as_bytes().len() >= DIR_NAME_SIZE {
			return Ecode::Invalid;
		}
		if self.lookup(name).is_some() {
			return Ecode::Exist;
		}
		let slot = Slot {
			name: name.to_owned(),
			inode,
		};
		if let Some(empty) = self.entries.iter_mut().find(|s| s.is_none()) {
			*empty = Some(slot);
		} else {
			self.entries.push(Some(slot));
		}
		Ecode::Success
	}

	/// Tombstones the entry named `name`.
	pub fn remove_entry(&mut self, name: &str) -> Ecode {
		match self.entries.iter_mut().find(|s| s.as_ref().is_some_and(|s| s.name == name)) {
			Some(slot) => {
				*slot = None;
				Ecode::Success
			}
			None => Ecode::NotFound,
		}
	}

	pub fn set_mode(&mut self, mode: u16) -> bool {
		self.file.set_mode(mode)
	}

	pub fn set_owner(&mut self, owner: u32) -> bool {
		self.file.set_owner(owner)
	}

	pub fn is_empty_dir(&self) -> bool {
		self.entries.iter().flatten().all(|s| s.name == "." || s.name == "..")
	}
}
