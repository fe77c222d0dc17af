//! Wire operation codes shared between `fsd` and `fsclient`. Ported from the
//! `Operation` enum in `original_source/step2/errorcode.h`. `OP_SIZE` and
//! `OP_DELUSER` are reserved numbers the original dispatcher never wired up;
//! `fsd` preserves that by answering both with `Ecode::InvalidOp`.

pub const OP_NOPE: i32 = 0;
pub const OP_FORMAT: i32 = 1;
pub const OP_CREATE: i32 = 2;
pub const OP_MKDIR: i32 = 3;
pub const OP_RMFILE: i32 = 4;
pub const OP_CD: i32 = 5;
pub const OP_RMDIR: i32 = 6;
pub const OP_LS: i32 = 7;
pub const OP_CAT: i32 = 8;
pub const OP_WRITE: i32 = 9;
pub const OP_INSERT: i32 = 10;
pub const OP_DELETE: i32 = 11;
pub const OP_SIZE: i32 = 12;
pub const OP_TRUNCATE: i32 = 13;
pub const OP_STAT: i32 = 14;
pub const OP_CHMOD: i32 = 15;
pub const OP_CHOWN: i32 = 16;
pub const OP_ADDUSER: i32 = 17;
pub const OP_DELUSER: i32 = 18;
pub const OP_LSUSER: i32 = 19;
pub const OP_READ: i32 = 20;
pub const OP_DELALL: i32 = 21;
pub const OP_EXIT: i32 = 22;
pub const OP_FLUSH: i32 = 23;
pub const OP_RENAME: i32 = 24;
