//! Register layouts used by device firmware to expose a timestamp.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire layout of a timestamp in the device register map.
///
/// Two incompatible layouts exist across firmware generations. The layout
/// is chosen once, when the time subsystem is constructed, and must match
/// the firmware on the other end of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimestampLayout {
    /// `[milliseconds, seconds_high16, seconds_low16]`.
    #[default]
    ThreeWord,
    /// `[seconds_high16, seconds_low16, milliseconds_high16, milliseconds_low16]`.
    FourWord,
}

impl TimestampLayout {
    /// Number of 16-bit registers occupied by one timestamp.
    pub const fn word_count(self) -> u16 {
        match self {
            Self::ThreeWord => 3,
            Self::FourWord => 4,
        }
    }
}

impl fmt::Display for TimestampLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ThreeWord => write!(f, "three_word"),
            Self::FourWord => write!(f, "four_word"),
        }
    }
}
