//! Core types for threadctx.
//!
//! - [`key`]: Identifier types ([`ElementKey`])

pub mod key;

pub use key::ElementKey;
