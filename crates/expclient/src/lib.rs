#![doc = include_str!("../../../README.md")]
//!

//! This crate re-exports the SDK so applications depend on a single name.

pub use expclient_core::*;
