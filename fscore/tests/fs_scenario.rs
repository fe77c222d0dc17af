//! End-to-end scenarios over a real (loopback) disk server, exercising
//! `FSCore`/`WorkingDir` the way `original_source/step2/fstest.cc`'s
//! `FileSystemTest` drives `FileSystem`/`WorkingDir`.

use std::net::TcpListener;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use fscore::block::mode;
use fscore::block::FileType;
use fscore::core::DEFAULT_DIR_MODE;
use fscore::core::DEFAULT_FILE_MODE;
use fscore::Ecode;
use fscore::FSCore;
use fscore::SectorClient;
use fscore::WorkingDir;

static DISK_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Starts a `diskd`-equivalent loopback server backed by a scratch file
/// under the OS temp directory, and returns a connected client plus the
/// listener thread's join handle.
fn start_disk() -> SectorClient {
	let n = DISK_COUNTER.fetch_add(1, Ordering::Relaxed);
	let path = std::env::temp_dir().join(format!("fscore-test-disk-{}-{n}.img", std::process::id()));
	let disk = Arc::new(disksim::Disk::open(&path, 4, 64, 0).expect("open scratch disk"));

	let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
	let addr = listener.local_addr().expect("local addr");

	thread::spawn(move || {
		if let Ok((mut stream, _)) = listener.accept() {
			loop {
				let request = match wire::recv_frame(&mut stream) {
					Ok(r) => r,
					Err(_) => break,
				};
				if request.is_empty() {
					break;
				}
				let mut response = wire::Packer::new();
				let elapsed_query = disk.serve(&request, &mut response);
				if elapsed_query {
					break;
				}
				if wire::send_frame(&mut stream, response.as_slice()).is_err() {
					break;
				}
			}
		}
	});

	SectorClient::connect(addr).expect("connect to scratch disk")
}

fn fresh_root() -> (Arc<FSCore>, WorkingDir) {
	let disk = start_disk();
	let core = FSCore::open(disk, true).expect("format fresh filesystem");
	let wd = WorkingDir::new(core.clone(), 0).expect("open root working dir");
	(core, wd)
}

#[test]
fn format_seeds_root_with_dot_entries() {
	let (_core, wd) = fresh_root();
	let entries = wd.list_dir().unwrap().unwrap();
	let names: Vec<&str> = entries.iter().map(|(n, _, _)| n.as_str()).collect();
	assert!(names.contains(&"."));
	assert!(names.contains(&".."));
}

#[test]
fn create_write_read_roundtrip() {
	let (_core, mut wd) = fresh_root();
	assert_eq!(wd.create_file("greeting", DEFAULT_FILE_MODE).unwrap(), Ecode::Success);

	assert_eq!(wd.acquire_file("greeting", true).unwrap(), Ecode::Success);
	let n = wd.write(b"hello, world", 0).unwrap().unwrap();
	assert_eq!(n, 12);
	let data = wd.read(12, 0).unwrap().unwrap();
	assert_eq!(&data, b"hello, world");
	wd.release_file().unwrap();
}

#[test]
fn insert_shifts_existing_bytes() {
	let (_core, mut wd) = fresh_root();
	wd.create_file("doc", DEFAULT_FILE_MODE).unwrap();
	wd.acquire_file("doc", true).unwrap();
	wd.write(b"helloworld", 0).unwrap().unwrap();
	wd.insert(b", ", 5).unwrap().unwrap();
	let data = wd.read(12, 0).unwrap().unwrap();
	assert_eq!(&data, b"hello, world");
	wd.release_file().unwrap();
}

#[test]
fn remove_bytes_then_truncate() {
	let (_core, mut wd) = fresh_root();
	wd.create_file("doc", DEFAULT_FILE_MODE).unwrap();
	wd.acquire_file("doc", true).unwrap();
	wd.write(b"hello, world", 0).unwrap().unwrap();
	wd.remove_bytes(2, 5).unwrap().unwrap();
	assert_eq!(&wd.read(10, 0).unwrap().unwrap(), b"helloworld");
	wd.truncate(5).unwrap().unwrap();
	assert_eq!(wd.size().unwrap(), 5);
	wd.release_file().unwrap();
}

#[test]
fn del_empties_file_but_keeps_entry() {
	let (_core, mut wd) = fresh_root();
	wd.create_file("scratch", DEFAULT_FILE_MODE).unwrap();
	wd.acquire_file("scratch", true).unwrap();
	wd.write(b"throwaway", 0).unwrap().unwrap();
	assert_eq!(wd.size().unwrap(), 9);
	wd.removeall_active().unwrap().unwrap();
	assert_eq!(wd.size().unwrap(), 0);
	wd.release_file().unwrap();

	// the entry itself still resolves
	assert_eq!(wd.acquire_file("scratch", false).unwrap(), Ecode::Success);
	wd.release_file().unwrap();
}

#[test]
fn mkdir_cd_and_nested_files() {
	let (_core, mut wd) = fresh_root();
	assert_eq!(wd.create_dir("sub", DEFAULT_DIR_MODE).unwrap(), Ecode::Success);
	assert_eq!(wd.change_dir("sub").unwrap(), Ecode::Success);
	assert_eq!(wd.create_file("leaf", DEFAULT_FILE_MODE).unwrap(), Ecode::Success);
	let entries = wd.list_dir().unwrap().unwrap();
	assert!(entries.iter().any(|(n, _, t)| n == "leaf" && *t == FileType::File));
	assert_eq!(wd.change_dir("..").unwrap(), Ecode::Success);
	let entries = wd.list_dir().unwrap().unwrap();
	assert!(entries.iter().any(|(n, _, t)| n == "sub" && *t == FileType::Dir));
}

#[test]
fn rmdir_removes_a_populated_subtree_recursively() {
	let (_core, mut wd) = fresh_root();
	wd.create_dir("sub", DEFAULT_DIR_MODE).unwrap();
	wd.change_dir("sub").unwrap();
	wd.create_file("leaf", DEFAULT_FILE_MODE).unwrap();
	wd.create_dir("nested", DEFAULT_DIR_MODE).unwrap();
	wd.change_dir("nested").unwrap();
	wd.create_file("deep", DEFAULT_FILE_MODE).unwrap();
	wd.change_dir("..").unwrap();
	wd.change_dir("..").unwrap();

	assert_eq!(wd.remove_dir("sub").unwrap(), Ecode::Success);
	let entries = wd.list_dir().unwrap().unwrap();
	assert!(!entries.iter().any(|(n, _, _)| n == "sub"));
}

#[test]
fn rmdir_is_busy_while_a_descendant_is_held_open() {
	let (core, mut wd) = fresh_root();
	wd.create_dir("sub", DEFAULT_DIR_MODE).unwrap();
	wd.change_dir("sub").unwrap();
	wd.create_file("leaf", DEFAULT_FILE_MODE).unwrap();
	wd.change_dir("..").unwrap();

	let mut other = WorkingDir::new(core.clone(), 0).unwrap();
	other.change_dir("sub").unwrap();

	assert_eq!(wd.remove_dir("sub").unwrap(), Ecode::Busy);
}

#[test]
fn rename_moves_an_entry_within_the_directory() {
	let (_core, mut wd) = fresh_root();
	wd.create_file("old", DEFAULT_FILE_MODE).unwrap();
	assert_eq!(wd.rename("old", "new").unwrap(), Ecode::Success);
	assert_eq!(wd.acquire_file("old", false).unwrap(), Ecode::NotFound);
	assert_eq!(wd.acquire_file("new", false).unwrap(), Ecode::Success);
	wd.release_file().unwrap();
}

#[test]
fn chown_is_root_only() {
	let (core, mut root_wd) = fresh_root();
	root_wd.create_file("shared", DEFAULT_FILE_MODE).unwrap();
	core.add_user("alice").unwrap();

	let mut alice_wd = WorkingDir::new(core.clone(), core.login("alice").unwrap().unwrap()).unwrap();
	assert_eq!(alice_wd.chown("shared", 0).unwrap(), Ecode::Permission);
	assert_eq!(root_wd.chown("shared", alice_wd.uid()).unwrap(), Ecode::Success);
}

#[test]
fn write_permission_is_enforced_for_non_owners() {
	let (core, mut root_wd) = fresh_root();
	root_wd.create_file("locked", mode::FILE_READ | mode::FILE_WRITE).unwrap();
	core.add_user("bob").unwrap();
	let bob_uid = core.login("bob").unwrap().unwrap();
	let mut bob_wd = WorkingDir::new(core.clone(), bob_uid).unwrap();

	assert_eq!(bob_wd.acquire_file("locked", true).unwrap(), Ecode::Success);
	let result = bob_wd.write(b"oops", 0).unwrap();
	assert_eq!(result, Err(Ecode::Permission));
	bob_wd.release_file().unwrap();
}

#[test]
fn concurrent_writers_in_the_same_directory_observe_busy_not_blocking() {
	let (core, mut wd) = fresh_root();
	wd.create_file("a", DEFAULT_FILE_MODE).unwrap();
	wd.create_file("b", DEFAULT_FILE_MODE).unwrap();

	let mut other = WorkingDir::new(core.clone(), 0).unwrap();
	assert_eq!(wd.acquire_file("a", true).unwrap(), Ecode::Success);
	// other's write on a different file in the same directory returns Busy
	// immediately instead of blocking on wd's held directory lock.
	assert_eq!(other.acquire_file("b", true).unwrap(), Ecode::Busy);
	wd.release_file().unwrap();
	assert_eq!(other.acquire_file("b", true).unwrap(), Ecode::Success);
	other.release_file().unwrap();
}

#[test]
fn adduser_lsuser_and_login_roundtrip() {
	let (core, _wd) = fresh_root();
	let uid = core.add_user("carol").unwrap().unwrap();
	assert!(uid > 0);
	assert_eq!(core.add_user("carol").unwrap(), None);
	let users = core.list_users().unwrap();
	assert!(users.iter().any(|(id, name)| *id == uid && name == "carol"));
	assert_eq!(core.login("carol").unwrap(), Some(uid));
	assert_eq!(core.login("root").unwrap(), Some(0));
	assert_eq!(core.login("nobody").unwrap(), None);
}

#[test]
fn format_resets_the_tree() {
	let (core, mut wd) = fresh_root();
	wd.create_file("leftover", DEFAULT_FILE_MODE).unwrap();
	drop(wd);

	assert_eq!(core.format().unwrap(), Ecode::Success);
	let wd = WorkingDir::new(core.clone(), 0).unwrap();
	let entries = wd.list_dir().unwrap().unwrap();
	assert!(!entries.iter().any(|(n, _, _)| n == "leftover"));
}

#[test]
fn format_is_busy_while_a_working_dir_is_rooted() {
	let (core, wd) = fresh_root();
	assert_eq!(core.format().unwrap(), Ecode::Busy);
	drop(wd);
	assert_eq!(core.format().unwrap(), Ecode::Success);
}
