//! A completion-based I/O engine, an in-memory deterministic network
//! simulation, and a DER-style tag/length/value codec over an
//! arbitrary-precision integer.
//!
//! These three pieces share nothing at runtime; they share a dependency
//! order. [`bigint`] is the leaf: [`asn`]'s codec encodes and decodes
//! [`bigint::BigInt`] as DER INTEGER content. [`proactor`] is a standalone
//! completion engine generic over a raw handle. [`net`] is a deterministic,
//! in-process network of [`net::Session`]s that a test harness drives
//! without touching a real socket.

#![allow(dead_code)]

pub mod asn;
pub mod bigint;
pub mod config;
pub mod error;
pub mod net;
pub mod proactor;

pub use config::Config;
pub use error::{Error, Result};
