//! xtmask - masked-value codec for packet-filter extensions
//!
//! This crate converts between rule options and the fixed-size kernel
//! records of mark-style targets and a few related matches, gating each
//! operation by the record revision that has to carry it.

#![deny(
    // Safety
    unsafe_code,

    // Future compatibility
    future_incompatible,

    // Rust 2018 idioms
    rust_2018_idioms,
)]
#![warn(
    missing_debug_implementations,

    // Error handling best practices
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::unimplemented,
    clippy::todo,

    // Code clarity and maintainability
    clippy::cognitive_complexity,
    clippy::type_complexity,

    // Best practices
    clippy::clone_on_ref_ptr,
    clippy::wildcard_imports,
    clippy::enum_glob_use,
    clippy::needless_continue,
    clippy::explicit_iter_loop,
    clippy::explicit_into_iter_loop,
)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod api;
pub mod codec;
pub mod exceptions;
pub mod exit_codes;
pub mod logger;
pub mod utils;
pub mod version;
pub mod xt;

// Re-export main API functions
pub use api::{
    ParseOptions, ParsedRule, RecordView, describe_record, describe_record_with, parse_rule,
    translate_record,
};
pub use exceptions::{Result, XtError};

// Re-export the codec for callers that only need the arithmetic
pub use codec::{Decoded, MaskedValue, Operation, decode, encode};
