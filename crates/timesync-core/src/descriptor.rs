//! Descriptor-tag parser registry.
//!
//! Devices publish self-description records ("descriptors"), each keyed by
//! a numeric tag. Fetching the records is the job of the descriptor
//! subsystem; this registry only maps tags to the parsers the host-side
//! subsystems contribute. Each subsystem registers its tags when it is
//! constructed, and a tag can have exactly one owner.

use crate::epoch::Epoch;
use std::collections::BTreeMap;
use timesync_common::{SyncError, SyncResult};
use tracing::debug;

/// Decoded descriptor value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Descriptor {
    /// Device epoch (tag 130).
    Epoch(Epoch),
}

/// Parser turning a raw descriptor payload into a [`Descriptor`].
pub type DescriptorParser = fn(&[u8]) -> SyncResult<Descriptor>;

#[derive(Debug, Clone, Copy)]
struct Registration {
    owner: &'static str,
    parser: DescriptorParser,
}

/// Registry of descriptor parsers keyed by tag.
#[derive(Debug, Clone, Default)]
pub struct DescriptorRegistry {
    parsers: BTreeMap<u8, Registration>,
}

impl DescriptorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `tag` for `owner` with the given parser.
    ///
    /// Registering again from the same owner keeps the existing entry.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::TagConflict`] if another owner already holds `tag`.
    pub fn register(
        &mut self,
        tag: u8,
        owner: &'static str,
        parser: DescriptorParser,
    ) -> SyncResult<()> {
        if let Some(existing) = self.parsers.get(&tag) {
            if existing.owner == owner {
                return Ok(());
            }
            return Err(SyncError::TagConflict {
                tag,
                owner: existing.owner.to_string(),
            });
        }

        debug!(tag, owner, "Registered descriptor parser");
        self.parsers.insert(tag, Registration { owner, parser });
        Ok(())
    }

    /// Whether any subsystem has claimed `tag`.
    pub fn is_claimed(&self, tag: u8) -> bool {
        self.parsers.contains_key(&tag)
    }

    /// Owner of `tag`, if claimed.
    pub fn owner(&self, tag: u8) -> Option<&'static str> {
        self.parsers.get(&tag).map(|r| r.owner)
    }

    /// Claimed tags in ascending order.
    pub fn tags(&self) -> impl Iterator<Item = u8> + '_ {
        self.parsers.keys().copied()
    }

    /// Parse a descriptor payload with the parser registered for `tag`.
    ///
    /// Returns `None` when no subsystem has claimed the tag.
    pub fn parse(&self, tag: u8, payload: &[u8]) -> Option<SyncResult<Descriptor>> {
        self.parsers.get(&tag).map(|r| (r.parser)(payload))
    }
}
