#![doc = "Common types shared across the timesync workspace."]

pub mod config;
pub mod error;
pub mod layout;

pub use config::*;
pub use error::*;
pub use layout::*;
