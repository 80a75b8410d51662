//! Standard exit codes for the xtmask binary
//!
//! The low codes follow the numbering packet-filter frontends use for
//! their own errors, so scripts wrapping either tool see the same values.

/// Successful execution
pub const EXIT_SUCCESS: i32 = 0;

/// Anything that is not the user's fault (I/O, logging setup, bad records)
pub const EXIT_OTHER_PROBLEM: i32 = 1;

/// Invalid option, option combination or operand
pub const EXIT_PARAMETER_PROBLEM: i32 = 2;

/// Unknown extension or revision
pub const EXIT_VERSION_PROBLEM: i32 = 3;

/// Resource error (unreadable map files, malformed input blobs)
pub const EXIT_RESOURCE_PROBLEM: i32 = 4;

/// Panic or unrecoverable error
pub const EXIT_PANIC: i32 = 101;
