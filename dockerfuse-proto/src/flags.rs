//! System-agnostic `open(2)` flags.
//!
//! Different operating systems use different numeric values for the `O_*`
//! flags, so the wire carries a fixed 16-bit positional encoding instead.
//! `O_RDONLY` is the all-zeros sentinel on every supported system and must
//! round-trip as such.

/// Portable open-flag bit positions.
pub const RDONLY: u16 = 0b0000_0000_0000_0000;
pub const WRONLY: u16 = 0b0000_0000_0000_0001;
pub const RDWR: u16 = 0b0000_0000_0000_0010;
pub const APPEND: u16 = 0b0000_0000_0000_0100;
pub const ASYNC: u16 = 0b0000_0000_0000_1000;
pub const CREAT: u16 = 0b0000_0000_0001_0000;
pub const EXCL: u16 = 0b0000_0000_0010_0000;
pub const NOCTTY: u16 = 0b0000_0000_0100_0000;
pub const NONBLOCK: u16 = 0b0000_0000_1000_0000;
pub const SYNC: u16 = 0b0000_0001_0000_0000;
pub const TRUNC: u16 = 0b0000_0010_0000_0000;

/// (system bit, portable bit) pairs for the named flags.
const FLAG_TABLE: &[(i32, u16)] = &[
    (libc::O_WRONLY, WRONLY),
    (libc::O_RDWR, RDWR),
    (libc::O_APPEND, APPEND),
    (libc::O_ASYNC, ASYNC),
    (libc::O_CREAT, CREAT),
    (libc::O_EXCL, EXCL),
    (libc::O_NOCTTY, NOCTTY),
    (libc::O_NONBLOCK, NONBLOCK),
    (libc::O_SYNC, SYNC),
    (libc::O_TRUNC, TRUNC),
];

/// Convert system-specific `open(2)` flags to the portable representation.
///
/// Bits outside the named flag set are dropped. See also
/// [`portable_to_system`].
pub fn system_to_portable(sys_flags: i32) -> u16 {
    if sys_flags == libc::O_RDONLY {
        return RDONLY;
    }
    FLAG_TABLE
        .iter()
        .filter(|(sys, _)| sys_flags & sys == *sys)
        .fold(0, |acc, (_, portable)| acc | portable)
}

/// Convert the portable representation back to system-specific flags.
///
/// See also [`system_to_portable`].
pub fn portable_to_system(portable: u16) -> i32 {
    if portable == RDONLY {
        return libc::O_RDONLY; // O_RDONLY == 0
    }
    FLAG_TABLE
        .iter()
        .filter(|(_, p)| portable & p == *p)
        .fold(0, |acc, (sys, _)| acc | sys)
}
