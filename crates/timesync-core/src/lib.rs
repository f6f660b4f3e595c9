//! Host/device clock synchronization over a Modbus register interface.
//!
//! This crate provides:
//! - [`codec`] converting between host timestamps and device register words
//! - [`epoch`] parsing the device epoch descriptor (tag 130)
//! - [`descriptor`] with the descriptor-tag parser registry
//! - [`registers`] with the register capability trait and time register map
//! - [`sync`] with the synchronization controller
//! - [`hotplug`] tracking device presence
//! - [`device`] composing the above around a register transport
//!
//! Everything here is synchronous and blocking. A sync sequence needs
//! exclusive access to the device for its whole duration, which the
//! `&mut` receivers enforce.

pub mod clock;
pub mod codec;
pub mod descriptor;
pub mod device;
pub mod epoch;
pub mod hotplug;
pub mod registers;
pub mod sync;

pub use clock::*;
pub use codec::*;
pub use descriptor::*;
pub use device::*;
pub use epoch::*;
pub use hotplug::*;
pub use registers::*;
pub use sync::*;

pub use timesync_common::{SyncError, SyncResult, TimestampLayout};
