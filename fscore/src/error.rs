//! The filesystem's integer error codes. Ported from
//! `original_source/step2/errorcode.h`.

/// A filesystem result code, returned to clients as a signed `i32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Ecode {
	Success = 0,
	NotFound = -1,
	Invalid = -2,
	NoSpace = -3,
	BadSize = -8,
	Permission = -9,
	NotDir = -11,
	NotFile = -12,
	NotSymlink = -13,
	Busy = -14,
	Exist = -15,
	UserNotFound = -16,
	InvalidOp = -17,
}

impl Ecode {
	/// The wire representation of this code.
	pub fn code(self) -> i32 {
		self as i32
	}

	/// `true` for `Success`.
	pub fn is_success(self) -> bool {
		matches!(self, Ecode::Success)
	}
}

impl From<Ecode> for i32 {
	fn from(e: Ecode) -> Self {
		e.code()
	}
}
