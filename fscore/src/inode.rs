//! `InodeFile`: a byte-addressable stream over an inode's direct, indirect,
//! double-indirect and triple-indirect block tree. Ported from
//! `original_source/step2/inodefile.{h,cc}`.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use crate::block::BlockId;
use crate::block::FileType;
use crate::block::InodeBlock;
use crate::block::InodeDataBlock;
use crate::block::InodeEntryBlock;
use crate::block::INODE_DATA_SIZE;
use crate::block::INODE_DIRECT_BLOCKS;
use crate::block::INODE_ENTRY_CHILDREN;
use crate::cache::BlockCache;

fn now_secs() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_secs())
		.unwrap_or(0)
}

/// Buffers bytes into freshly allocated data blocks; only spliced into an
/// `InodeFile`'s live chain on success, so a failed `insert`/`remove` never
/// leaves dangling references. Rust port of `TempData`.
struct TempChain {
	cache: Arc<BlockCache>,
	cur_offset: usize,
	last_block: Option<BlockId>,
	data_ids: Vec<BlockId>,
	cached: HashMap<BlockId, InodeDataBlock>,
}

impl TempChain {
	fn new(cache: Arc<BlockCache>) -> Self {
		Self {
			cache,
			cur_offset: 0,
			last_block: None,
			data_ids: Vec::new(),
			cached: HashMap::new(),
		}
	}

	fn write(&mut self, buf: &[u8]) -> io::Result<bool> {
		let mut written = 0;
		while written < buf.len() {
			if self.last_block.is_none() {
				let (id, mut block) = match self.cache.allocate::<InodeDataBlock>()? {
					Some(v) => v,
					None => return Ok(false),
				};
				block.magic = InodeDataBlock::MAGIC;
				self.cached.insert(id, block);
				self.data_ids.push(id);
				self.last_block = Some(id);
			}
			let id = self.last_block.unwrap();
			let block = self.cached.get_mut(&id).unwrap();
			let take = (buf.len() - written).min(INODE_DATA_SIZE - self.cur_offset);
			block.data[self.cur_offset..self.cur_offset + take]
				.copy_from_slice(&buf[written..written + take]);
			self.cache.store(id, block);
			written += take;
			self.cur_offset += take;
			if self.cur_offset == INODE_DATA_SIZE {
				self.cur_offset = 0;
				self.last_block = None;
			}
		}
		Ok(true)
	}

	/// Splices the buffered chain into `data_ids`/`cached` starting at
	/// `start`, freeing whatever used to occupy those slots.
	fn move_into(
		mut self,
		data_ids: &mut Vec<BlockId>,
		cached: &mut HashMap<BlockId, InodeDataBlock>,
		start: usize,
	) {
		while data_ids.len() > start {
			let id = data_ids.pop().unwrap();
			self.cache.free(id);
			cached.remove(&id);
		}
		for id in self.data_ids.drain(..) {
			if let Some(block) = self.cached.remove(&id) {
				cached.insert(id, block);
			}
			data_ids.push(id);
		}
	}
}

impl Drop for TempChain {
	fn drop(&mut self) {
		for id in self.data_ids.drain(..) {
			self.cache.unref(id);
		}
	}
}

/// An open inode: its decoded metadata plus the materialized list of
/// data-block IDs backing its byte stream.
pub struct InodeFile {
	cache: Arc<BlockCache>,
	inode: Option<InodeBlock>,
	inode_id: BlockId,
	data_ids: Vec<BlockId>,
	entry_ids: Vec<BlockId>,
	cached_data: HashMap<BlockId, InodeDataBlock>,
}

impl InodeFile {
	/// An unopened handle bound to `cache`.
	pub fn new(cache: Arc<BlockCache>) -> Self {
		Self {
			cache,
			inode: None,
			inode_id: BlockId::NULL,
			data_ids: Vec::new(),
			entry_ids: Vec::new(),
			cached_data: HashMap::new(),
		}
	}

	pub fn is_open(&self) -> bool {
		self.inode.is_some()
	}

	pub fn inode_id(&self) -> BlockId {
		self.inode_id
	}

	pub fn inode(&self) -> &InodeBlock {
		self.inode.as_ref().expect("InodeFile not open")
	}

	pub fn size(&self) -> u64 {
		self.inode.as_ref().map(|i| i.size).unwrap_or(0)
	}

	/// Opens the inode at `inode_id`, loading its direct/indirect data-block
	/// chain.
	pub fn open(&mut self, inode_id: BlockId) -> io::Result<bool> {
		if self.is_open() {
			self.close()?;
		}
		let inode: InodeBlock = match self.cache.load(inode_id)? {
			Some(i) => i,
			None => return Ok(false),
		};
		if inode.magic != InodeBlock::MAGIC {
			eprintln!("InodeFile::open: bad magic number");
			self.cache.unref(inode_id);
			return Ok(false);
		}
		self.inode = Some(inode);
		self.inode_id = inode_id;
		if !self.load_entries()? {
			eprintln!("InodeFile::open: failed to load entries");
			self.close()?;
			return Ok(false);
		}
		self.inode.as_mut().unwrap().atime = now_secs();
		Ok(true)
	}

	/// Allocates a fresh inode of the given type/owner/mode.
	pub fn create(&mut self, owner: u32, mode: u16, file_type: FileType) -> io::Result<BlockId> {
		if self.is_open() {
			self.close()?;
		}
		let (inode_id, mut inode) = match self.cache.allocate::<InodeBlock>()? {
			Some(v) => v,
			None => return Ok(BlockId::NULL),
		};
		inode.magic = InodeBlock::MAGIC;
		inode.owner = owner;
		inode.mode = mode;
		inode.file_type = file_type as u16;
		inode.nlink = 1;
		let now = now_secs();
		inode.atime = now;
		inode.mtime = now;
		inode.ctime = now;
		self.cache.store(inode_id, &inode);
		self.inode = Some(inode);
		self.inode_id = inode_id;
		Ok(inode_id)
	}

	/// Persists the entry tree and releases every reference this handle
	/// holds.
	pub fn close(&mut self) -> io::Result<()> {
		if self.inode_id.is_null() {
			return Ok(());
		}
		self.save_entries()?;
		for id in self.cached_data.keys() {
			self.cache.unref(*id);
		}
		if let Some(inode) = &self.inode {
			self.cache.store(self.inode_id, inode);
		}
		self.cache.unref(self.inode_id);
		self.cached_data.clear();
		self.data_ids.clear();
		self.entry_ids.clear();
		self.inode = None;
		self.inode_id = BlockId::NULL;
		Ok(())
	}

	pub fn read(&mut self, size: u64, offset: u64) -> io::Result<Vec<u8>> {
		let file_size = match &self.inode {
			Some(i) => i.size,
			None => return Ok(Vec::new()),
		};
		if offset + size > file_size {
			return Ok(Vec::new());
		}
		self.inode.as_mut().unwrap().atime = now_secs();
		let size = size.min(file_size - offset) as usize;
		let mut out = vec![0u8; size];
		let mut read_size = 0usize;
		let mut index = (offset as usize) / INODE_DATA_SIZE;
		let mut offset_in_block = (offset as usize) % INODE_DATA_SIZE;
		while read_size < size {
			let id = match self.load_data(index, false)? {
				Some(id) => id,
				None => return Ok(out[..read_size].to_vec()),
			};
			let block = &self.cached_data[&id];
			let take = (size - read_size).min(INODE_DATA_SIZE - offset_in_block);
			out[read_size..read_size + take]
				.copy_from_slice(&block.data[offset_in_block..offset_in_block + take]);
			read_size += take;
			offset_in_block = 0;
			index += 1;
		}
		Ok(out)
	}

	pub fn write(&mut self, buf: &[u8], offset: u64) -> io::Result<u64> {
		let file_size = match &self.inode {
			Some(i) => i.size,
			None => return Ok(0),
		};
		if offset > file_size {
			return Ok(0);
		}
		let now = now_secs();
		self.inode.as_mut().unwrap().mtime = now;
		self.inode.as_mut().unwrap().atime = now;
		let mut write_size = 0usize;
		let mut index = (offset as usize) / INODE_DATA_SIZE;
		let mut offset_in_block = (offset as usize) % INODE_DATA_SIZE;
		while write_size < buf.len() {
			let id = match self.load_data(index, true)? {
				Some(id) => id,
				None => return Ok(write_size as u64),
			};
			let take = (buf.len() - write_size).min(INODE_DATA_SIZE - offset_in_block);
			{
				let block = self.cached_data.get_mut(&id).unwrap();
				block.data[offset_in_block..offset_in_block + take]
					.copy_from_slice(&buf[write_size..write_size + take]);
			}
			self.cache.store(id, &self.cached_data[&id]);
			write_size += take;
			offset_in_block = 0;
			index += 1;
		}
		if offset + buf.len() as u64 > self.inode.as_ref().unwrap().size {
			self.inode.as_mut().unwrap().size = offset + buf.len() as u64;
		}
		Ok(write_size as u64)
	}

	pub fn insert(&mut self, buf: &[u8], offset: u64) -> io::Result<u64> {
		let file_size = match &self.inode {
			Some(i) => i.size,
			None => return Ok(0),
		};
		if offset > file_size {
			return Ok(0);
		}
		let now = now_secs();
		self.inode.as_mut().unwrap().mtime = now;
		self.inode.as_mut().unwrap().atime = now;
		let index = (offset as usize) / INODE_DATA_SIZE;
		let mut offset_in_block = (offset as usize) % INODE_DATA_SIZE;
		let mut remaining = (file_size - offset) as usize;

		let first_id = match self.load_data(index, true)? {
			Some(id) => id,
			None => return Ok(0),
		};
		let mut temp = TempChain::new(self.cache.clone());
		let prefix = self.cached_data[&first_id].data[..offset_in_block].to_vec();
		if !temp.write(&prefix)? {
			return Ok(0);
		}
		if !temp.write(buf)? {
			return Ok(0);
		}
		let mut i = index;
		while remaining > 0 {
			let id = match self.load_data(i, true)? {
				Some(id) => id,
				None => return Ok(0),
			};
			let take = (INODE_DATA_SIZE - offset_in_block).min(remaining);
			let slice = self.cached_data[&id].data[offset_in_block..offset_in_block + take].to_vec();
			if !temp.write(&slice)? {
				return Ok(0);
			}
			offset_in_block = 0;
			remaining -= take;
			i += 1;
		}
		temp.move_into(&mut self.data_ids, &mut self.cached_data, index);
		self.inode.as_mut().unwrap().size += buf.len() as u64;
		Ok(buf.len() as u64)
	}

	pub fn remove(&mut self, size: u64, offset: u64) -> io::Result<u64> {
		let file_size = match &self.inode {
			Some(i) => i.size,
			None => return Ok(0),
		};
		if offset >= file_size {
			return Ok(0);
		}
		let now = now_secs();
		self.inode.as_mut().unwrap().mtime = now;
		self.inode.as_mut().unwrap().atime = now;
		let size = size.min(file_size - offset) as usize;
		let index = (offset as usize) / INODE_DATA_SIZE;
		let mut offset_in_block = (offset as usize) % INODE_DATA_SIZE;
		let mut remaining = (file_size - offset) as usize - size;
		let mut delete_size = size;

		let first_id = match self.load_data(index, false)? {
			Some(id) => id,
			None => return Ok(0),
		};
		let mut temp = TempChain::new(self.cache.clone());
		let prefix = self.cached_data[&first_id].data[..offset_in_block].to_vec();
		if !temp.write(&prefix)? {
			return Ok(0);
		}
		let mut i = index;
		loop {
			if offset_in_block + delete_size < INODE_DATA_SIZE {
				offset_in_block += delete_size;
				break;
			}
			delete_size -= INODE_DATA_SIZE - offset_in_block;
			offset_in_block = 0;
			i += 1;
			if i >= self.data_ids.len() {
				break;
			}
		}
		while remaining > 0 {
			let id = match self.load_data(i, false)? {
				Some(id) => id,
				None => return Ok(0),
			};
			let take = (INODE_DATA_SIZE - offset_in_block).min(remaining);
			let slice = self.cached_data[&id].data[offset_in_block..offset_in_block + take].to_vec();
			if !temp.write(&slice)? {
				return Ok(0);
			}
			remaining -= take;
			offset_in_block = 0;
			i += 1;
		}
		temp.move_into(&mut self.data_ids, &mut self.cached_data, index);
		self.inode.as_mut().unwrap().size -= size as u64;
		Ok(size as u64)
	}

	pub fn readall(&mut self) -> io::Result<Vec<u8>> {
		let size = self.size();
		self.read(size, 0)
	}

	pub fn removeall(&mut self) -> io::Result<bool> {
		if self.inode_id.is_null() {
			return Ok(false);
		}
		let now = now_secs();
		self.inode.as_mut().unwrap().mtime = now;
		self.inode.as_mut().unwrap().atime = now;
		self.inode.as_mut().unwrap().size = 0;
		for id in self.data_ids.drain(..) {
			self.cache.free(id);
		}
		self.cached_data.clear();
		Ok(true)
	}

	pub fn truncate(&mut self, size: u64) -> io::Result<bool> {
		if self.inode_id.is_null() {
			return Ok(false);
		}
		let id_len = (size as usize).div_ceil(INODE_DATA_SIZE);
		let now = now_secs();
		self.inode.as_mut().unwrap().mtime = now;
		self.inode.as_mut().unwrap().atime = now;
		let cur_size = self.inode.as_ref().unwrap().size;
		if size >= cur_size {
			for i in self.data_ids.len()..id_len {
				if self.load_data(i, true)?.is_none() {
					return Ok(false);
				}
			}
		} else {
			for i in id_len..self.data_ids.len() {
				self.cache.free(self.data_ids[i]);
			}
			self.data_ids.truncate(id_len);
		}
		self.inode.as_mut().unwrap().size = size;
		Ok(true)
	}

	pub fn set_mode(&mut self, mode: u16) -> bool {
		if self.inode_id.is_null() {
			return false;
		}
		let now = now_secs();
		let inode = self.inode.as_mut().unwrap();
		inode.mtime = now;
		inode.atime = now;
		inode.mode = mode;
		true
	}

	pub fn set_owner(&mut self, owner: u32) -> bool {
		if self.inode_id.is_null() {
			return false;
		}
		let now = now_secs();
		let inode = self.inode.as_mut().unwrap();
		inode.mtime = now;
		inode.atime = now;
		inode.owner = owner;
		true
	}

	/// A short textual summary, for the `STAT` operation.
	pub fn dump(&self) -> String {
		let Some(inode) = &self.inode else {
			return "File not open.\n".to_owned();
		};
		let type_str = match inode.file_type() {
			FileType::File => "Regular",
			FileType::Dir => "Directory",
			FileType::Symlink => "Symlink",
		};
		format!(
			"inode={} size={} owner={} mode={:o} type={} nlink={} atime={} mtime={} ctime={}\n",
			self.inode_id.0,
			inode.size,
			inode.owner,
			inode.mode,
			type_str,
			inode.nlink,
			inode.atime,
			inode.mtime,
			inode.ctime,
		)
	}

	fn load_data(&mut self, index: usize, create: bool) -> io::Result<Option<BlockId>> {
		if index >= self.data_ids.len() {
			if !create || index > self.data_ids.len() {
				return Ok(None);
			}
			let (data_id, mut block) = match self.cache.allocate::<InodeDataBlock>()? {
				Some(v) => v,
				None => return Ok(None),
			};
			block.magic = InodeDataBlock::MAGIC;
			self.cache.store(data_id, &block);
			self.data_ids.push(data_id);
			self.cached_data.insert(data_id, block);
			return Ok(Some(data_id));
		}
		let id = self.data_ids[index];
		if self.cached_data.contains_key(&id) {
			return Ok(Some(id));
		}
		let data: InodeDataBlock = match self.cache.load(id)? {
			Some(d) => d,
			None => return Ok(None),
		};
		if data.magic != InodeDataBlock::MAGIC {
			eprintln!("InodeFile::load_data: bad magic number");
			self.cache.unref(id);
			return Ok(None);
		}
		self.cached_data.insert(id, data);
		Ok(Some(id))
	}

	fn load_entries(&mut self) -> io::Result<bool> {
		let inode = self.inode.as_ref().unwrap();
		let mut data_num = (inode.size as usize).div_ceil(INODE_DATA_SIZE);
		self.cached_data.clear();
		if data_num == 0 {
			return Ok(true);
		}
		self.entry_ids.clear();
		let direct = inode.direct;
		let indirect = inode.indirect;
		let double_indirect = inode.double_indirect;
		let triple_indirect = inode.triple_indirect;
		for id in direct.iter().take(INODE_DIRECT_BLOCKS) {
			self.data_ids.push(*id);
			data_num -= 1;
			if data_num == 0 {
				return Ok(true);
			}
		}
		if !self.load_entries_level(1, indirect, &mut data_num)? {
			return Ok(false);
		}
		if !self.load_entries_level(2, double_indirect, &mut data_num)? {
			return Ok(false);
		}
		if !self.load_entries_level(3, triple_indirect, &mut data_num)? {
			return Ok(false);
		}
		Ok(true)
	}

	fn load_entries_level(
		&mut self,
		level: u32,
		entry_id: BlockId,
		data_num: &mut usize,
	) -> io::Result<bool> {
		if *data_num == 0 {
			return Ok(true);
		}
		if entry_id.is_null() {
			return Ok(false);
		}
		let entry: InodeEntryBlock = match self.cache.load(entry_id)? {
			Some(e) => e,
			None => return Ok(false),
		};
		self.entry_ids.push(entry_id);
		if entry.magic != InodeEntryBlock::MAGIC {
			eprintln!("InodeFile::load_entries: bad magic number");
			self.cache.unref(entry_id);
			return Ok(false);
		}
		for child in entry.children.iter().take(entry.count as usize) {
			if level == 1 {
				self.data_ids.push(*child);
				*data_num -= 1;
				if *data_num == 0 {
					self.cache.unref(entry_id);
					return Ok(true);
				}
			} else if !self.load_entries_level(level - 1, *child, data_num)? {
				self.cache.unref(entry_id);
				return Ok(false);
			}
		}
		self.cache.unref(entry_id);
		Ok(true)
	}

	fn save_entries(&mut self) -> io::Result<bool> {
		if self.inode_id.is_null() {
			return Ok(false);
		}
		let mut i = 0usize;
		let mut direct = [BlockId::NULL; INODE_DIRECT_BLOCKS];
		while i < INODE_DIRECT_BLOCKS && i < self.data_ids.len() {
			direct[i] = self.data_ids[i];
			i += 1;
		}
		let indirect = self.save_entries_level(1, &mut i)?;
		let double_indirect = self.save_entries_level(2, &mut i)?;
		let triple_indirect = self.save_entries_level(3, &mut i)?;
		for id in self.entry_ids.drain(..) {
			self.cache.free(id);
		}
		let inode = self.inode.as_mut().unwrap();
		inode.direct = direct;
		inode.indirect = indirect;
		inode.double_indirect = double_indirect;
		inode.triple_indirect = triple_indirect;
		Ok(i == self.data_ids.len())
	}

	fn save_entries_level(&mut self, level: u32, i: &mut usize) -> io::Result<BlockId> {
		if *i == self.data_ids.len() {
			return Ok(BlockId::NULL);
		}
		let (entry_id, mut entry): (BlockId, InodeEntryBlock) = if let Some(id) = self.entry_ids.pop() {
			let loaded: InodeEntryBlock = match self.cache.load(id)? {
				Some(e) => e,
				None => return Ok(BlockId::NULL),
			};
			(id, loaded)
		} else {
			match self.cache.allocate::<InodeEntryBlock>()? {
				Some(v) => v,
				None => return Ok(BlockId::NULL),
			}
		};
		entry.magic = InodeEntryBlock::MAGIC;
		entry.count = 0;
		let mut count = 0usize;
		while *i < self.data_ids.len() && count < INODE_ENTRY_CHILDREN {
			if level == 1 {
				entry.children[count] = self.data_ids[*i];
				count += 1;
				*i += 1;
			} else {
				let child = self.save_entries_level(level - 1, i)?;
				if child.is_null() {
					self.cache.free(entry_id);
					return Ok(BlockId::NULL);
				}
				entry.children[count] = child;
				count += 1;
			}
		}
		entry.count = count as u32;
		self.cache.store(entry_id, &entry);
		self.cache.unref(entry_id);
		Ok(entry_id)
	}
}
