//! `FSCore`/`WorkingDir`: the per-inode node cache, permission model and
//! working-directory operations sitting on top of [`InodeFile`],
//! [`Directory`] and [`UserFile`]. Ported from
//! `original_source/step2/filesystem.{h,cc}`.
//!
//! Node locking ports the original's `node_t::try_lock`/`unlock`: a plain
//! `rwcnt` counter (`>0` readers, `-1` a writer, `0` idle) gives a
//! non-blocking acquire that returns `Busy` on contention instead of
//! parking the thread. [`RwLock`] still guards the node body itself, but
//! purely as Rust's memory-safety mechanism — it is never held across an
//! operation the way `rwcnt` is. [`NodeLock`] wraps a held `rwcnt` slot and
//! releases it on drop, so a subtree acquired node-by-node in
//! [`walk_and_lock`] unwinds itself automatically if any node along the
//! way is busy.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::RwLock;

use crate::block::mode;
use crate::block::BlockId;
use crate::block::FileType;
use crate::block::InodeBlock;
use crate::cache::BlockCache;
use crate::directory::Directory;
use crate::disk::SectorClient;
use crate::error::Ecode;
use crate::inode::InodeFile;
use crate::userfile::UserFile;

/// Default mode for freshly created directories: owner rwx, other r-x.
pub const DEFAULT_DIR_MODE: u16 =
	mode::FILE_READ | mode::FILE_WRITE | mode::FILE_EXEC | mode::FILE_OTHER_READ | mode::FILE_OTHER_EXEC;
/// Default mode for freshly created files: owner rw, other r.
pub const DEFAULT_FILE_MODE: u16 = mode::FILE_READ | mode::FILE_WRITE | mode::FILE_OTHER_READ;

enum NodeBody {
	File(InodeFile),
	Dir(Directory),
}

struct NodeSlot {
	body: RwLock<NodeBody>,
	refcnt: Mutex<i64>,
	rwcnt: Mutex<i64>,
}

impl NodeSlot {
	/// Non-blocking acquire: a writer needs `rwcnt == 0`, a reader needs
	/// `rwcnt >= 0`. Mirrors `node_t::try_lock` exactly.
	fn try_lock(&self, write: bool) -> bool {
		let mut cnt = self.rwcnt.lock().unwrap();
		if write {
			if *cnt == 0 {
				*cnt = -1;
				true
			} else {
				false
			}
		} else if *cnt >= 0 {
			*cnt += 1;
			true
		} else {
			false
		}
	}

	fn unlock(&self) {
		let mut cnt = self.rwcnt.lock().unwrap();
		if *cnt > 0 {
			*cnt -= 1;
		} else {
			*cnt = 0;
		}
	}
}

/// A held `rwcnt` slot; releases it when dropped.
struct NodeLock {
	node: Arc<NodeSlot>,
}

impl Drop for NodeLock {
	fn drop(&mut self) {
		self.node.unlock();
	}
}

fn try_lock_or_busy(node: &Arc<NodeSlot>, write: bool) -> Result<NodeLock, Ecode> {
	if node.try_lock(write) {
		Ok(NodeLock { node: node.clone() })
	} else {
		Err(Ecode::Busy)
	}
}

/// The shared filesystem state: the block cache, the resident node table and
/// the user table. Cheaply cloned and shared across client threads.
pub struct FSCore {
	cache: Arc<BlockCache>,
	nodes: Mutex<HashMap<BlockId, Arc<NodeSlot>>>,
	userfile: Mutex<UserFile>,
}

fn test_permission(uid: u32, owner: u32, file_mode: u16, need_owner_bit: u16) -> bool {
	if uid == 0 {
		return true;
	}
	let bit = if uid == owner { need_owner_bit } else { need_owner_bit << 3 };
	file_mode & bit != 0
}

/// Depth-first write-locks every node in the subtree rooted at `id`,
/// refusing (and unwinding everything acquired so far) if any node is
/// already locked or externally referenced (`refcnt > 0`). Ports
/// `walk_and_acquire_`.
fn walk_and_lock(core: &FSCore, id: BlockId, locks: &mut Vec<(BlockId, NodeLock)>) -> io::Result<Ecode> {
	let slot = core.fetch_node(id)?;
	let lock = match try_lock_or_busy(&slot, true) {
		Ok(l) => l,
		Err(e) => return Ok(e),
	};
	if *slot.refcnt.lock().unwrap() > 0 {
		return Ok(Ecode::Busy);
	}
	let children: Option<Vec<BlockId>> = {
		let guard = slot.body.read().unwrap();
		match &*guard {
			NodeBody::Dir(d) => Some(
				d.list()
					.into_iter()
					.filter(|(name, _)| *name != "." && *name != "..")
					.map(|(_, child)| child)
					.collect(),
			),
			NodeBody::File(_) => None,
		}
	};
	locks.push((id, lock));
	if let Some(children) = children {
		for child in children {
			let ec = walk_and_lock(core, child, locks)?;
			if !ec.is_success() {
				return Ok(ec);
			}
		}
	}
	Ok(Ecode::Success)
}

/// Destroys every node in a set acquired by [`walk_and_lock`]: frees its
/// contents, closes it, drops it from the node table and frees its inode
/// block. Ports the destructive half of `remove_`.
fn destroy_locked(core: &FSCore, locks: Vec<(BlockId, NodeLock)>) -> io::Result<()> {
	for (id, lock) in locks {
		{
			let mut guard = lock.node.body.write().unwrap();
			match &mut *guard {
				NodeBody::File(f) => {
					f.removeall()?;
					f.close()?;
				}
				NodeBody::Dir(d) => d.close()?,
			}
		}
		core.nodes.lock().unwrap().remove(&id);
		core.cache.free(id);
	}
	Ok(())
}

impl FSCore {
	/// Opens (or, if `format` is set or the superblock is freshly minted,
	/// formats) the filesystem backed by `disk`.
	pub fn open(disk: SectorClient, format: bool) -> io::Result<Arc<Self>> {
		let cache = Arc::new(BlockCache::open(disk, format)?);
		let core = Arc::new(Self {
			cache: cache.clone(),
			nodes: Mutex::new(HashMap::new()),
			userfile: Mutex::new(UserFile::new(cache.clone())),
		});
		let sb = cache.superblock();
		if format || sb.root_inode.is_null() {
			core.format()?;
		} else {
			let mut uf = core.userfile.lock().unwrap();
			uf.open(sb.user_table)?;
		}
		Ok(core)
	}

	/// Wipes the node table and recreates an empty root directory and user
	/// table. Busy if the root (or anything beneath it) is locked or held
	/// open by another session; the root is left untouched in that case.
	pub fn format(&self) -> io::Result<Ecode> {
		let root = self.root_inode();
		if !root.is_null() {
			let mut locks = Vec::new();
			let ec = walk_and_lock(self, root, &mut locks)?;
			if !ec.is_success() {
				return Ok(ec);
			}
		}
		self.nodes.lock().unwrap().clear();
		let mut root_dir = Directory::new(self.cache.clone());
		let root_id = root_dir.create(0, DEFAULT_DIR_MODE, BlockId::NULL)?;
		root_dir.close()?;
		let mut uf = self.userfile.lock().unwrap();
		let user_table_id = uf.create(DEFAULT_FILE_MODE)?;
		let mut sb = self.cache.superblock();
		sb.root_inode = root_id;
		sb.user_table = user_table_id;
		self.cache.set_superblock(&sb);
		self.cache.flush()?;
		Ok(Ecode::Success)
	}

	pub fn root_inode(&self) -> BlockId {
		self.cache.superblock().root_inode
	}

	fn slot(&self, id: BlockId) -> Option<Arc<NodeSlot>> {
		self.nodes.lock().unwrap().get(&id).cloned()
	}

	/// Fetches `id` into the node table without touching its `refcnt`,
	/// opening it from disk on first touch. Ports `load_node_`.
	fn fetch_node(&self, id: BlockId) -> io::Result<Arc<NodeSlot>> {
		{
			let table = self.nodes.lock().unwrap();
			if let Some(slot) = table.get(&id) {
				return Ok(slot.clone());
			}
		}
		let inode: InodeBlock = match self.cache.load(id)? {
			Some(i) => i,
			None => return Err(io::Error::new(io::ErrorKind::NotFound, "no such inode")),
		};
		self.cache.unref(id);
		let body = match inode.file_type() {
			FileType::Dir => {
				let mut dir = Directory::new(self.cache.clone());
				dir.open(id)?;
				NodeBody::Dir(dir)
			}
			_ => {
				let mut file = InodeFile::new(self.cache.clone());
				file.open(id)?;
				NodeBody::File(file)
			}
		};
		let mut table = self.nodes.lock().unwrap();
		if let Some(existing) = table.get(&id) {
			return Ok(existing.clone());
		}
		let slot = Arc::new(NodeSlot {
			body: RwLock::new(body),
			refcnt: Mutex::new(0),
			rwcnt: Mutex::new(0),
		});
		table.insert(id, slot.clone());
		Ok(slot)
	}

	/// Loads `id` into the node table and bumps its reference count: the
	/// node stays resident until a matching [`FSCore::release_node`].
	fn load_node(&self, id: BlockId) -> io::Result<Arc<NodeSlot>> {
		let slot = self.fetch_node(id)?;
		*slot.refcnt.lock().unwrap() += 1;
		Ok(slot)
	}

	fn release_node(&self, id: BlockId) -> io::Result<()> {
		let mut table = self.nodes.lock().unwrap();
		let slot = match table.get(&id) {
			Some(s) => s.clone(),
			None => return Ok(()),
		};
		{
			let mut rc = slot.refcnt.lock().unwrap();
			*rc -= 1;
			if *rc > 0 {
				return Ok(());
			}
		}
		table.remove(&id);
		drop(table);
		let mut body = slot.body.write().unwrap();
		match &mut *body {
			NodeBody::File(f) => f.close(),
			NodeBody::Dir(d) => d.close(),
		}
	}

	pub fn login(&self, username: &str) -> io::Result<Option<u32>> {
		if username == "root" {
			return Ok(Some(0));
		}
		let mut uf = self.userfile.lock().unwrap();
		uf.lookup(username)
	}

	pub fn add_user(&self, username: &str) -> io::Result<Option<u32>> {
		self.userfile.lock().unwrap().add_user(username)
	}

	pub fn remove_user(&self, uid: u32) -> io::Result<bool> {
		self.userfile.lock().unwrap().remove_user(uid)
	}

	pub fn list_users(&self) -> io::Result<Vec<(u32, String)>> {
		self.userfile.lock().unwrap().list_users()
	}

	pub fn flush(&self) -> io::Result<()> {
		self.cache.flush()
	}
}

/// A single client's session: its uid, its current directory, and at most
/// one actively open file.
pub struct WorkingDir {
	core: Arc<FSCore>,
	uid: u32,
	cwd: BlockId,
	active_file: Option<BlockId>,
	active_lock: Option<NodeLock>,
}

impl WorkingDir {
	pub fn new(core: Arc<FSCore>, uid: u32) -> io::Result<Self> {
		let root = core.root_inode();
		core.load_node(root)?;
		Ok(Self {
			core,
			uid,
			cwd: root,
			active_file: None,
			active_lock: None,
		})
	}

	pub fn uid(&self) -> u32 {
		self.uid
	}

	fn dir_slot(&self) -> Arc<NodeSlot> {
		self.core.slot(self.cwd).expect("cwd resident")
	}

	/// Read-locks the current directory, looks up `name` in it and returns
	/// the looked-up entry's slot, id and held lock. The lock is released
	/// when the returned guard drops. Used by `chmod`/`chown`, which only
	/// need the lookup and mutate the victim inode directly.
	fn take_entry(&mut self, name: &str) -> io::Result<Result<(Arc<NodeSlot>, BlockId, NodeLock), Ecode>> {
		if name == "." || name == ".." {
			return Ok(Err(Ecode::Invalid));
		}
		let slot = self.dir_slot();
		let lock = match try_lock_or_busy(&slot, false) {
			Ok(l) => l,
			Err(e) => return Ok(Err(e)),
		};
		let target = {
			let guard = slot.body.read().unwrap();
			let dir = match &*guard {
				NodeBody::Dir(d) => d,
				_ => return Ok(Err(Ecode::NotDir)),
			};
			match dir.lookup(name) {
				Some(id) => id,
				None => return Ok(Err(Ecode::NotFound)),
			}
		};
		Ok(Ok((slot, target, lock)))
	}

	pub fn create_file(&mut self, name: &str, mode: u16) -> io::Result<Ecode> {
		let slot = self.dir_slot();
		let _lock = match try_lock_or_busy(&slot, true) {
			Ok(l) => l,
			Err(e) => return Ok(e),
		};
		let mut guard = slot.body.write().unwrap();
		let dir = match &mut *guard {
			NodeBody::Dir(d) => d,
			_ => return Ok(Ecode::NotDir),
		};
		let (owner, dmode, _) = (dir.inode().owner, dir.inode().mode, dir.inode().file_type());
		if !test_permission(self.uid, owner, dmode, mode::FILE_WRITE) {
			return Ok(Ecode::Permission);
		}
		if dir.lookup(name).is_some() {
			return Ok(Ecode::Exist);
		}
		let mut file = InodeFile::new(self.core.cache.clone());
		let inode_id = file.create(self.uid, mode, FileType::File)?;
		if inode_id.is_null() {
			return Ok(Ecode::NoSpace);
		}
		file.close()?;
		Ok(dir.add_entry(name, inode_id))
	}

	pub fn create_dir(&mut self, name: &str, mode: u16) -> io::Result<Ecode> {
		let slot = self.dir_slot();
		let _lock = match try_lock_or_busy(&slot, true) {
			Ok(l) => l,
			Err(e) => return Ok(e),
		};
		let mut guard = slot.body.write().unwrap();
		let dir = match &mut *guard {
			NodeBody::Dir(d) => d,
			_ => return Ok(Ecode::NotDir),
		};
		let (owner, dmode, _) = (dir.inode().owner, dir.inode().mode, dir.inode().file_type());
		if !test_permission(self.uid, owner, dmode, mode::FILE_WRITE) {
			return Ok(Ecode::Permission);
		}
		if dir.lookup(name).is_some() {
			return Ok(Ecode::Exist);
		}
		let cwd_id = dir.inode_id();
		let mut new_dir = Directory::new(self.core.cache.clone());
		let inode_id = new_dir.create(self.uid, mode, cwd_id)?;
		if inode_id.is_null() {
			return Ok(Ecode::NoSpace);
		}
		new_dir.close()?;
		Ok(dir.add_entry(name, inode_id))
	}

	/// Unlinks a regular file. Ad hoc, like the original's `remove`: it
	/// never enters the node-cache table, so it needs no walk-and-lock —
	/// a plain file has no children to hold busy.
	pub fn remove_file(&mut self, name: &str) -> io::Result<Ecode> {
		if name == "." || name == ".." {
			return Ok(Ecode::Invalid);
		}
		let dir_slot = self.dir_slot();
		let _lock = match try_lock_or_busy(&dir_slot, true) {
			Ok(l) => l,
			Err(e) => return Ok(e),
		};
		let target = {
			let guard = dir_slot.body.read().unwrap();
			let dir = match &*guard {
				NodeBody::Dir(d) => d,
				_ => return Ok(Ecode::NotDir),
			};
			match dir.lookup(name) {
				Some(id) => id,
				None => return Ok(Ecode::NotFound),
			}
		};
		let inode: InodeBlock = match self.core.cache.load(target)? {
			Some(i) => i,
			None => return Ok(Ecode::NotFound),
		};
		self.core.cache.unref(target);
		if inode.file_type() == FileType::Dir {
			return Ok(Ecode::NotFile);
		}
		if !test_permission(self.uid, inode.owner, inode.mode, mode::FILE_WRITE) {
			return Ok(Ecode::Permission);
		}
		{
			let mut guard = dir_slot.body.write().unwrap();
			if let NodeBody::Dir(d) = &mut *guard {
				d.remove_entry(name);
			}
		}
		let mut file = InodeFile::new(self.core.cache.clone());
		file.open(target)?;
		file.removeall()?;
		file.close()?;
		self.core.cache.free(target);
		Ok(Ecode::Success)
	}

	/// Recursively removes a directory and everything beneath it. Refuses
	/// with `Busy` if any node in the subtree is locked or externally
	/// referenced. Ports `remove_`/`walk_and_acquire_`.
	pub fn remove_dir(&mut self, name: &str) -> io::Result<Ecode> {
		if name == "." || name == ".." {
			return Ok(Ecode::Invalid);
		}
		let dir_slot = self.dir_slot();
		let _lock = match try_lock_or_busy(&dir_slot, true) {
			Ok(l) => l,
			Err(e) => return Ok(e),
		};
		let target = {
			let guard = dir_slot.body.read().unwrap();
			let dir = match &*guard {
				NodeBody::Dir(d) => d,
				_ => return Ok(Ecode::NotDir),
			};
			match dir.lookup(name) {
				Some(id) => id,
				None => return Ok(Ecode::NotFound),
			}
		};
		let inode: InodeBlock = match self.core.cache.load(target)? {
			Some(i) => i,
			None => return Ok(Ecode::NotFound),
		};
		self.core.cache.unref(target);
		if inode.file_type() != FileType::Dir {
			return Ok(Ecode::NotFile);
		}
		if !test_permission(self.uid, inode.owner, inode.mode, mode::FILE_WRITE) {
			return Ok(Ecode::Permission);
		}
		let mut locks = Vec::new();
		let ec = walk_and_lock(&self.core, target, &mut locks)?;
		if !ec.is_success() {
			return Ok(ec);
		}
		destroy_locked(&self.core, locks)?;
		let mut guard = dir_slot.body.write().unwrap();
		if let NodeBody::Dir(d) = &mut *guard {
			d.remove_entry(name);
		}
		Ok(Ecode::Success)
	}

	pub fn change_dir(&mut self, name: &str) -> io::Result<Ecode> {
		let target = match name {
			"." => self.cwd,
			_ => {
				let slot = self.dir_slot();
				let _lock = match try_lock_or_busy(&slot, false) {
					Ok(l) => l,
					Err(e) => return Ok(e),
				};
				let guard = slot.body.read().unwrap();
				let dir = match &*guard {
					NodeBody::Dir(d) => d,
					_ => return Ok(Ecode::NotDir),
				};
				if !test_permission(self.uid, dir.inode().owner, dir.inode().mode, mode::FILE_EXEC) {
					return Ok(Ecode::Permission);
				}
				match dir.lookup(name) {
					Some(id) => id,
					None => return Ok(Ecode::NotFound),
				}
			}
		};
		if target == self.cwd {
			return Ok(Ecode::Success);
		}
		let inode: InodeBlock = match self.core.cache.load(target)? {
			Some(i) => i,
			None => return Ok(Ecode::NotFound),
		};
		self.core.cache.unref(target);
		if inode.file_type() != FileType::Dir {
			return Ok(Ecode::NotDir);
		}
		self.core.load_node(target)?;
		let old = self.cwd;
		self.cwd = target;
		self.core.release_node(old)?;
		Ok(Ecode::Success)
	}

	pub fn list_dir(&self) -> io::Result<Result<Vec<(String, BlockId, FileType)>, Ecode>> {
		let slot = self.dir_slot();
		let _lock = match try_lock_or_busy(&slot, false) {
			Ok(l) => l,
			Err(e) => return Ok(Err(e)),
		};
		let guard = slot.body.read().unwrap();
		let dir = match &*guard {
			NodeBody::Dir(d) => d,
			_ => return Ok(Err(Ecode::NotDir)),
		};
		if !test_permission(self.uid, dir.inode().owner, dir.inode().mode, mode::FILE_READ) {
			return Ok(Err(Ecode::Permission));
		}
		let mut out = Vec::new();
		for (name, id) in dir.list() {
			let inode: InodeBlock = match self.core.cache.load(id)? {
				Some(i) => i,
				None => continue,
			};
			self.core.cache.unref(id);
			out.push((name.to_owned(), id, inode.file_type()));
		}
		Ok(Ok(out))
	}

	/// Changes `name`'s mode, ad hoc (opening the victim inode directly)
	/// while holding the current directory's write lock for the lookup and
	/// the mutation, matching the original's `chmod`.
	pub fn chmod(&mut self, name: &str, new_mode: u16) -> io::Result<Ecode> {
		let (_slot, target, _lock) = match self.take_entry(name)? {
			Ok(v) => v,
			Err(e) => return Ok(e),
		};
		let mut file = InodeFile::new(self.core.cache.clone());
		if !file.open(target)? {
			return Ok(Ecode::Invalid);
		}
		if self.uid != 0 && file.inode().owner != self.uid {
			file.close()?;
			return Ok(Ecode::Permission);
		}
		file.set_mode(new_mode);
		file.close()?;
		Ok(Ecode::Success)
	}

	pub fn chown(&mut self, name: &str, new_owner: u32) -> io::Result<Ecode> {
		if self.uid != 0 {
			return Ok(Ecode::Permission);
		}
		let (_slot, target, _lock) = match self.take_entry(name)? {
			Ok(v) => v,
			Err(e) => return Ok(e),
		};
		let mut file = InodeFile::new(self.core.cache.clone());
		if !file.open(target)? {
			return Ok(Ecode::Invalid);
		}
		file.set_owner(new_owner);
		file.close()?;
		Ok(Ecode::Success)
	}

	pub fn rename(&mut self, old: &str, new: &str) -> io::Result<Ecode> {
		if old == "." || old == ".." {
			return Ok(Ecode::Invalid);
		}
		let slot = self.dir_slot();
		let _lock = match try_lock_or_busy(&slot, true) {
			Ok(l) => l,
			Err(e) => return Ok(e),
		};
		let mut guard = slot.body.write().unwrap();
		let dir = match &mut *guard {
			NodeBody::Dir(d) => d,
			_ => return Ok(Ecode::NotDir),
		};
		if !test_permission(self.uid, dir.inode().owner, dir.inode().mode, mode::FILE_WRITE) {
			return Ok(Ecode::Permission);
		}
		let target = match dir.lookup(old) {
			Some(id) => id,
			None => return Ok(Ecode::NotFound),
		};
		if dir.lookup(new).is_some() {
			return Ok(Ecode::Exist);
		}
		let ec = dir.add_entry(new, target);
		if ec.is_success() {
			dir.remove_entry(old);
		}
		Ok(ec)
	}

	/// Opens `name` as the session's single active file for subsequent
	/// read/write/insert/remove/truncate/stat/size operations, taking a
	/// read or write lock on the current directory and holding it until
	/// [`WorkingDir::release_file`].
	pub fn acquire_file(&mut self, name: &str, write: bool) -> io::Result<Ecode> {
		if self.active_file.is_some() {
			return Ok(Ecode::Busy);
		}
		let slot = self.dir_slot();
		let lock = match try_lock_or_busy(&slot, write) {
			Ok(l) => l,
			Err(e) => return Ok(e),
		};
		let target = {
			let guard = slot.body.read().unwrap();
			let dir = match &*guard {
				NodeBody::Dir(d) => d,
				_ => return Ok(Ecode::NotDir),
			};
			match dir.lookup(name) {
				Some(id) => id,
				None => return Ok(Ecode::NotFound),
			}
		};
		let inode: InodeBlock = match self.core.cache.load(target)? {
			Some(i) => i,
			None => return Ok(Ecode::NotFound),
		};
		self.core.cache.unref(target);
		if inode.file_type() == FileType::Dir {
			return Ok(Ecode::NotFile);
		}
		let need = if write { mode::FILE_WRITE } else { mode::FILE_READ };
		if !test_permission(self.uid, inode.owner, inode.mode, need) {
			return Ok(Ecode::Permission);
		}
		self.core.load_node(target)?;
		self.active_file = Some(target);
		self.active_lock = Some(lock);
		Ok(Ecode::Success)
	}

	pub fn release_file(&mut self) -> io::Result<()> {
		if let Some(id) = self.active_file.take() {
			self.core.release_node(id)?;
		}
		self.active_lock = None;
		Ok(())
	}

	fn active_slot(&self) -> Result<Arc<NodeSlot>, Ecode> {
		match self.active_file {
			Some(id) => Ok(self.core.slot(id).expect("active file resident")),
			None => Err(Ecode::Invalid),
		}
	}

	pub fn read(&mut self, size: u64, offset: u64) -> io::Result<Result<Vec<u8>, Ecode>> {
		let slot = match self.active_slot() {
			Ok(s) => s,
			Err(e) => return Ok(Err(e)),
		};
		let mut guard = slot.body.write().unwrap();
		let file = match &mut *guard {
			NodeBody::File(f) => f,
			_ => return Ok(Err(Ecode::NotFile)),
		};
		if !test_permission(self.uid, file.inode().owner, file.inode().mode, mode::FILE_READ) {
			return Ok(Err(Ecode::Permission));
		}
		Ok(Ok(file.read(size, offset)?))
	}

	pub fn write(&mut self, data: &[u8], offset: u64) -> io::Result<Result<u64, Ecode>> {
		let slot = match self.active_slot() {
			Ok(s) => s,
			Err(e) => return Ok(Err(e)),
		};
		let mut guard = slot.body.write().unwrap();
		let file = match &mut *guard {
			NodeBody::File(f) => f,
			_ => return Ok(Err(Ecode::NotFile)),
		};
		if !test_permission(self.uid, file.inode().owner, file.inode().mode, mode::FILE_WRITE) {
			return Ok(Err(Ecode::Permission));
		}
		Ok(Ok(file.write(data, offset)?))
	}

	pub fn insert(&mut self, data: &[u8], offset: u64) -> io::Result<Result<u64, Ecode>> {
		let slot = match self.active_slot() {
			Ok(s) => s,
			Err(e) => return Ok(Err(e)),
		};
		let mut guard = slot.body.write().unwrap();
		let file = match &mut *guard {
			NodeBody::File(f) => f,
			_ => return Ok(Err(Ecode::NotFile)),
		};
		if !test_permission(self.uid, file.inode().owner, file.inode().mode, mode::FILE_WRITE) {
			return Ok(Err(Ecode::Permission));
		}
		Ok(Ok(file.insert(data, offset)?))
	}

	pub fn remove_bytes(&mut self, size: u64, offset: u64) -> io::Result<Result<u64, Ecode>> {
		let slot = match self.active_slot() {
			Ok(s) => s,
			Err(e) => return Ok(Err(e)),
		};
		let mut guard = slot.body.write().unwrap();
		let file = match &mut *guard {
			NodeBody::File(f) => f,
			_ => return Ok(Err(Ecode::NotFile)),
		};
		if !test_permission(self.uid, file.inode().owner, file.inode().mode, mode::FILE_WRITE) {
			return Ok(Err(Ecode::Permission));
		}
		Ok(Ok(file.remove(size, offset)?))
	}

	pub fn truncate(&mut self, size: u64) -> io::Result<Result<(), Ecode>> {
		let slot = match self.active_slot() {
			Ok(s) => s,
			Err(e) => return Ok(Err(e)),
		};
		let mut guard = slot.body.write().unwrap();
		let file = match &mut *guard {
			NodeBody::File(f) => f,
			_ => return Ok(Err(Ecode::NotFile)),
		};
		if !test_permission(self.uid, file.inode().owner, file.inode().mode, mode::FILE_WRITE) {
			return Ok(Err(Ecode::Permission));
		}
		if !file.truncate(size)? {
			return Ok(Err(Ecode::BadSize));
		}
		Ok(Ok(()))
	}

	/// Empties the active file's contents, freeing its data blocks but
	/// leaving the entry itself in place at size 0.
	pub fn removeall_active(&mut self) -> io::Result<Result<(), Ecode>> {
		let slot = match self.active_slot() {
			Ok(s) => s,
			Err(e) => return Ok(Err(e)),
		};
		let mut guard = slot.body.write().unwrap();
		let file = match &mut *guard {
			NodeBody::File(f) => f,
			_ => return Ok(Err(Ecode::NotFile)),
		};
		if !test_permission(self.uid, file.inode().owner, file.inode().mode, mode::FILE_WRITE) {
			return Ok(Err(Ecode::Permission));
		}
		file.removeall()?;
		Ok(Ok(()))
	}

	pub fn stat(&self) -> Result<String, Ecode> {
		let slot = self.active_slot()?;
		let guard = slot.body.read().unwrap();
		match &*guard {
			NodeBody::File(f) => Ok(f.dump()),
			NodeBody::Dir(_) => Err(Ecode::NotFile),
		}
	}

	pub fn size(&self) -> Result<u64, Ecode> {
		let slot = self.active_slot()?;
		let guard = slot.body.read().unwrap();
		match &*guard {
			NodeBody::File(f) => Ok(f.size()),
			NodeBody::Dir(_) => Err(Ecode::NotFile),
		}
	}
}

impl Drop for WorkingDir {
	fn drop(&mut self) {
		self.active_lock = None;
		if let Some(id) = self.active_file.take() {
			let _ = self.core.release_node(id);
		}
		let _ = self.core.release_node(self.cwd);
	}
}
