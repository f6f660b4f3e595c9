//! Modbus TCP transport for the time synchronization protocol.
//!
//! This crate provides:
//! - [`frame`] with Modbus function codes, exception codes, and PDU encoding
//! - [`client`] with a blocking Modbus TCP client implementing
//!   [`timesync_core::RegisterAccess`]
//!
//! Supported functions:
//! - Read Holding Registers (0x03)
//! - Write Single Register (0x06)
//! - Read Exception Status (0x07)
//! - Write Multiple Registers (0x10)
//! - Read/Write Multiple Registers (0x17)

pub mod client;
pub mod frame;

pub use client::*;
pub use frame::{ExceptionCode, FunctionCode};
