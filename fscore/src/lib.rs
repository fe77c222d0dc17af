//! Filesystem core: on-disk block layouts, the block cache, inode/directory/
//! user-table abstractions, and the permission-checked working-directory
//! API consumed by `fsd`.

pub mod block;
pub mod cache;
pub mod core;
pub mod directory;
pub mod disk;
pub mod error;
pub mod inode;
pub mod op;
pub mod userfile;

pub use block::BlockId;
pub use block::FileType;
pub use cache::BlockCache;
pub use core::FSCore;
pub use core::WorkingDir;
pub use directory::Directory;
pub use disk::SectorClient;
pub use error::Ecode;
pub use inode::InodeFile;
pub use userfile::UserFile;
