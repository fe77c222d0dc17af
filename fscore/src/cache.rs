//! `BlockCache`: the reference-counted, dirty-tracked page cache in front of
//! the remote disk. Ported from `original_source/step2/blockmgr.{h,cc}`.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::io;
use std::sync::Mutex;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use crate::block::BlockId;
use crate::block::FreeBlock;
use crate::block::SuperBlock;
use crate::block::BLOCK_SIZE;
use crate::disk::SectorClient;

/// Soft cap on resident pages. Exceeding it triggers eviction of
/// zero-refcount pages on the next touch, not an immediate flush.
pub const MAX_DATA_POOL_SIZE: usize = 1024;

/// A decodable/encodable on-disk block type, usable with
/// [`BlockCache::load`]/[`BlockCache::allocate`]/[`BlockCache::store`].
pub trait BlockView: Sized {
	fn decode(buf: &[u8]) -> Self;
	fn encode(&self, buf: &mut [u8]);
	fn zeroed() -> Self;
}

macro_rules! block_view {
	($t:ty) => {
		impl BlockView for $t {
			fn decode(buf: &[u8]) -> Self {
				<$t>::decode(buf)
			}
			fn encode(&self, buf: &mut [u8]) {
				<$t>::encode(self, buf)
			}
			fn zeroed() -> Self {
				<$t>::zeroed()
			}
		}
	};
}

block_view!(crate::block::InodeBlock);
block_view!(crate::block::InodeEntryBlock);
block_view!(crate::block::InodeDataBlock);

struct Page {
	dirty: bool,
	refcnt: i64,
	data: Box<[u8]>,
}

struct Inner {
	disk: SectorClient,
	resident: HashMap<BlockId, Page>,
	free_pool: VecDeque<Box<[u8]>>,
}

/// The shared block cache sitting in front of one disk connection.
pub struct BlockCache {
	inner: Mutex<Inner>,
}

fn now_secs() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_secs())
		.unwrap_or(0)
}

impl BlockCache {
	/// Loads (or formats) the superblock from `disk`, matching
	/// `BlockManager::BlockManager`.
	pub fn open(mut disk: SectorClient, create: bool) -> io::Result<Self> {
		let raw = disk.read(0, 0)?;
		let mut page = Page {
			dirty: true,
			refcnt: 1,
			data: raw.to_vec().into_boxed_slice(),
		};
		let mut sb = SuperBlock::decode(&page.data);
		if sb.magic != SuperBlock::MAGIC || create {
			println!("BlockCache: Creating file system on remote disk...");
			sb = SuperBlock {
				magic: SuperBlock::MAGIC,
				block_size: BLOCK_SIZE as u32,
				free_list_head: BlockId::NULL,
				root_inode: BlockId::NULL,
				block_end: BlockId::NULL,
				version: now_secs(),
				user_table: BlockId::NULL,
			};
			sb.encode(&mut page.data);
		}
		println!(
			"BlockCache: Block size: {}, Free list head: {}, Root inode: {}, Block end: {}, Version: {}",
			sb.block_size, sb.free_list_head.0, sb.root_inode.0, sb.block_end.0, sb.version
		);
		let mut resident = HashMap::new();
		resident.insert(BlockId::NULL, page);
		Ok(Self {
			inner: Mutex::new(Inner {
				disk,
				resident,
				free_pool: VecDeque::new(),
			}),
		})
	}

	/// The current superblock contents.
	pub fn superblock(&self) -> SuperBlock {
		let inner = self.inner.lock().unwrap();
		SuperBlock::decode(&inner.resident[&BlockId::NULL].data)
	}

	/// Overwrites the superblock and marks it dirty.
	pub fn set_superblock(&self, sb: &SuperBlock) {
		let mut inner = self.inner.lock().unwrap();
		let page = inner.resident.get_mut(&BlockId::NULL).unwrap();
		sb.encode(&mut page.data);
		page.dirty = true;
	}

	fn check_range(inner: &Inner, block: BlockId) -> bool {
		let sb = SuperBlock::decode(&inner.resident[&BlockId::NULL].data);
		block.0 <= sb.block_end.0
	}

	/// Loads a block's content, bumping its refcount. Returns `None` for
	/// block 0 (the caller should use [`Self::superblock`]) or an
	/// out-of-range block.
	pub fn load<T: BlockView>(&self, block: BlockId) -> io::Result<Option<T>> {
		if block.is_null() {
			return Ok(None);
		}
		let mut inner = self.inner.lock().unwrap();
		if !Self::check_range(&inner, block) {
			eprintln!("BlockCache: invalid block {}", block.0);
			return Ok(None);
		}
		Self::load_block(&mut inner, block, true)?;
		let page = inner.resident.get_mut(&block).unwrap();
		page.refcnt += 1;
		Ok(Some(T::decode(&page.data)))
	}

	/// Writes `value` back into a resident block and marks it dirty. The
	/// block must already be resident via `load` or `allocate`.
	pub fn store<T: BlockView>(&self, block: BlockId, value: &T) {
		if block.is_null() {
			return;
		}
		let mut inner = self.inner.lock().unwrap();
		if let Some(page) = inner.resident.get_mut(&block) {
			value.encode(&mut page.data);
			page.dirty = true;
		}
	}

	/// Allocates a new zeroed block, preferring the free list, falling back
	/// to extending `block_end`. Returns `None` if the disk is full.
	pub fn allocate<T: BlockView>(&self) -> io::Result<Option<(BlockId, T)>> {
		let mut inner = self.inner.lock().unwrap();
		let block = match Self::allocate_block(&mut inner)? {
			Some(b) => b,
			None => return Ok(None),
		};
		Ok(Some((block, T::zeroed())))
	}

	/// Marks a resident block dirty without loading it.
	pub fn dirtify(&self, block: BlockId) {
		if block.is_null() {
			return;
		}
		let mut inner = self.inner.lock().unwrap();
		if !Self::check_range(&inner, block) {
			return;
		}
		if let Some(page) = inner.resident.get_mut(&block) {
			page.dirty = true;
		}
	}

	/// Releases one reference, evicting the page if the cache is over its
	/// soft cap.
	pub fn unref(&self, block: BlockId) {
		if block.is_null() {
			return;
		}
		let mut inner = self.inner.lock().unwrap();
		if !Self::check_range(&inner, block) {
			return;
		}
		if let Some(page) = inner.resident.get_mut(&block) {
			page.refcnt -= 1;
			if page.refcnt <= 0 && inner.resident.len() > MAX_DATA_POOL_SIZE {
				Self::flush_one(&mut inner, block);
				Self::release_one(&mut inner, block);
			}
		}
	}

	/// Returns `block` to the free list. A block already on the free list
	/// (current magic and version) is logged and left untouched, matching
	/// the original's double-free detection.
	pub fn free(&self, block: BlockId) {
		if block.is_null() {
			return;
		}
		let mut inner = self.inner.lock().unwrap();
		if !Self::check_range(&inner, block) {
			return;
		}
		if Self::load_block(&mut inner, block, true).is_err() {
			return;
		}
		let version = SuperBlock::decode(&inner.resident[&BlockId::NULL].data).version;
		let page = inner.resident.get_mut(&block).unwrap();
		page.dirty = true;
		page.refcnt = 0;
		let existing = FreeBlock::decode(&page.data);
		if existing.magic == FreeBlock::MAGIC && existing.version == version {
			eprintln!("BlockCache: Block {} is already free", block.0);
			return;
		}
		let mut sb = SuperBlock::decode(&inner.resident[&BlockId::NULL].data);
		let fb = FreeBlock {
			magic: FreeBlock::MAGIC,
			next: sb.free_list_head,
			id: block,
			version: sb.version,
		};
		let page = inner.resident.get_mut(&block).unwrap();
		fb.encode(&mut page.data);
		sb.free_list_head = block;
		let sb_page = inner.resident.get_mut(&BlockId::NULL).unwrap();
		sb.encode(&mut sb_page.data);
	}

	/// Writes every dirty resident block to disk.
	pub fn flush(&self) -> io::Result<()> {
		let mut inner = self.inner.lock().unwrap();
		let blocks: Vec<BlockId> = inner.resident.keys().copied().collect();
		for block in blocks {
			Self::flush_one(&mut inner, block);
		}
		Ok(())
	}

	/// Flushes dirty pages, then returns the underlying disk connection so
	/// a fresh `BlockCache` can be opened on it (reformat).
	pub fn into_disk(self) -> io::Result<SectorClient> {
		self.flush()?;
		Ok(self.inner.into_inner().unwrap().disk)
	}

	fn flush_one(inner: &mut Inner, block: BlockId) {
		let cylinder = block.cylinder() as i32;
		let sector = block.sector() as i32;
		let write = match inner.resident.get(&block) {
			Some(page) if page.dirty => Some(page.data.clone()),
			_ => None,
		};
		if let Some(data) = write {
			if inner.disk.write(cylinder, sector, &data).is_ok() {
				if let Some(page) = inner.resident.get_mut(&block) {
					page.dirty = false;
				}
			}
		}
	}

	fn release_one(inner: &mut Inner, block: BlockId) {
		if let Some(page) = inner.resident.remove(&block) {
			if inner.free_pool.len() < MAX_DATA_POOL_SIZE {
				inner.free_pool.push_back(page.data);
			}
		}
	}

	fn incr_next_block(inner: &mut Inner) -> bool {
		let (cylinders, sectors) = inner.disk.geometry();
		let mut sb = SuperBlock::decode(&inner.resident[&BlockId::NULL].data);
		let mut cylinder = sb.block_end.cylinder() as i32;
		let mut sector = sb.block_end.sector() as i32;
		if cylinder == cylinders {
			return false;
		}
		sector += 1;
		if sector == sectors {
			sector = 0;
			cylinder += 1;
		}
		sb.block_end = BlockId::new(cylinder as u32, sector as u32);
		let page = inner.resident.get_mut(&BlockId::NULL).unwrap();
		sb.encode(&mut page.data);
		cylinder != cylinders
	}

	fn allocate_block(inner: &mut Inner) -> io::Result<Option<BlockId>> {
		let mut sb = SuperBlock::decode(&inner.resident[&BlockId::NULL].data);
		let block;
		if sb.free_list_head.is_null() {
			if !Self::incr_next_block(inner) {
				eprintln!("BlockCache: Disk is full");
				return Ok(None);
			}
			sb = SuperBlock::decode(&inner.resident[&BlockId::NULL].data);
			block = sb.block_end;
			Self::load_block(inner, block, false)?;
		} else {
			block = sb.free_list_head;
			Self::load_block(inner, block, true)?;
			let page = &inner.resident[&block];
			let free_block = FreeBlock::decode(&page.data);
			let mut sb2 = SuperBlock::decode(&inner.resident[&BlockId::NULL].data);
			if free_block.magic == FreeBlock::MAGIC && free_block.version == sb2.version {
				sb2.free_list_head = free_block.next;
			} else {
				sb2.free_list_head = BlockId::NULL;
			}
			let sb_page = inner.resident.get_mut(&BlockId::NULL).unwrap();
			sb2.encode(&mut sb_page.data);
		}
		let page = inner.resident.get_mut(&block).unwrap();
		page.data = vec![0u8; BLOCK_SIZE].into_boxed_slice();
		page.dirty = true;
		page.refcnt = 1;
		Ok(Some(block))
	}

	fn get_free_page(inner: &mut Inner) -> Box<[u8]> {
		if let Some(buf) = inner.free_pool.pop_front() {
			return buf;
		}
		if inner.resident.len() < MAX_DATA_POOL_SIZE {
			return vec![0u8; BLOCK_SIZE].into_boxed_slice();
		}
		let evictable = inner
			.resident
			.iter()
			.find(|(_, page)| page.refcnt == 0)
			.map(|(id, _)| *id);
		if let Some(id) = evictable {
			Self::flush_one(inner, id);
			if let Some(page) = inner.resident.remove(&id) {
				return page.data;
			}
		}
		vec![0u8; BLOCK_SIZE].into_boxed_slice()
	}

	fn load_block(inner: &mut Inner, block: BlockId, read: bool) -> io::Result<()> {
		if inner.resident.contains_key(&block) {
			let page = inner.resident.get_mut(&block).unwrap();
			if page.refcnt < 0 {
				page.refcnt = 0;
			}
			return Ok(());
		}
		let mut data = Self::get_free_page(inner);
		if read {
			let cylinder = block.cylinder() as i32;
			let sector = block.sector() as i32;
			let sector_data = inner.disk.read(cylinder, sector)?;
			data.copy_from_slice(&sector_data);
		} else {
			data.iter_mut().for_each(|b| *b = 0);
		}
		inner.resident.insert(
			block,
			Page {
				dirty: false,
				refcnt: 0,
				data,
			},
		);
		Ok(())
	}
}
