//! Masked-value operation codec
//!
//! Every mark-style target stores one `(value, mask)` pair and lets the
//! kernel compute `(old & !mask) ^ value`. This module turns the user-level
//! operations into that pair, turns arbitrary pairs back into the simplest
//! operation that displays them, and decides which operations a given
//! record revision may carry.

pub mod capability;
pub mod decode;
pub mod masked;
pub mod operation;

pub use capability::{Capabilities, RevisionTable};
pub use decode::{Decoded, MaskedOptionNames, OperationName, decode, show_masked};
pub use masked::{FULL_MASK, MASKED_VALUE_SIZE, MaskedValue};
pub use operation::{Operation, OperationKind, encode};
