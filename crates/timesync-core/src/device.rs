//! A device handle composed from the time subsystem, the descriptor
//! registry, and presence tracking around one register transport.

use crate::clock::{HostClock, SystemClock};
use crate::descriptor::{Descriptor, DescriptorRegistry};
use crate::epoch::Epoch;
use crate::hotplug::{HotplugWatcher, Presence};
use crate::registers::{RegisterAccess, RegisterMap};
use crate::sync::{SyncAttemptResult, TimeSyncController};
use chrono::NaiveDateTime;
use serde::Serialize;
use timesync_common::{SyncConfig, SyncError, SyncResult, TimestampLayout};
use tracing::{debug, info};

/// Snapshot of device and host time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeInfo {
    /// Device epoch.
    pub epoch: Epoch,
    /// Device time as a calendar instant.
    pub current_time: NaiveDateTime,
    /// Device time in seconds since its epoch.
    pub current_timestamp: f64,
    /// Host time in seconds since the Unix epoch.
    pub host_time: f64,
    /// `current_timestamp - host_time`, in seconds.
    pub offset: f64,
}

/// Connected device exposing time synchronization.
///
/// Owns the register transport. Every transaction outcome is reported to
/// the hot-plug watcher.
#[derive(Debug)]
pub struct Device<R, C = SystemClock> {
    transport: R,
    time: TimeSyncController<C>,
    descriptors: DescriptorRegistry,
    hotplug: HotplugWatcher,
    epoch: Option<Epoch>,
}

impl<R: RegisterAccess> Device<R, SystemClock> {
    /// Create a device with an empty descriptor registry and the system clock.
    ///
    /// # Errors
    ///
    /// Fails only if the time subsystem cannot claim its descriptor tag.
    pub fn new(transport: R, layout: TimestampLayout, map: RegisterMap) -> SyncResult<Self> {
        Self::with_registry(transport, DescriptorRegistry::new(), layout, map)
    }

    /// Create a device around a registry other subsystems have already populated.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::TagConflict`] if the epoch tag is already claimed.
    pub fn with_registry(
        transport: R,
        mut registry: DescriptorRegistry,
        layout: TimestampLayout,
        map: RegisterMap,
    ) -> SyncResult<Self> {
        let time = TimeSyncController::new(layout, map, &mut registry)?;
        Ok(Self::from_parts(transport, time, registry))
    }

    /// Create a device from the sync section of the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] for invalid settings.
    pub fn from_config(transport: R, config: &SyncConfig) -> SyncResult<Self> {
        let mut registry = DescriptorRegistry::new();
        let time = TimeSyncController::from_config(config, &mut registry)?;
        Ok(Self::from_parts(transport, time, registry))
    }
}

impl<R: RegisterAccess, C: HostClock> Device<R, C> {
    /// Assemble a device from an already constructed controller and the
    /// registry it registered into.
    pub fn from_parts(
        transport: R,
        time: TimeSyncController<C>,
        descriptors: DescriptorRegistry,
    ) -> Self {
        Self {
            transport,
            time,
            descriptors,
            hotplug: HotplugWatcher::new(),
            epoch: None,
        }
    }

    /// Replace the presence watcher.
    #[must_use]
    pub fn with_hotplug(mut self, hotplug: HotplugWatcher) -> Self {
        self.hotplug = hotplug;
        self
    }

    /// The register transport.
    pub fn transport(&self) -> &R {
        &self.transport
    }

    /// Mutable access to the register transport.
    pub fn transport_mut(&mut self) -> &mut R {
        &mut self.transport
    }

    /// Release the transport.
    pub fn into_transport(self) -> R {
        self.transport
    }

    /// The time synchronization controller.
    pub fn time_sync(&self) -> &TimeSyncController<C> {
        &self.time
    }

    /// The descriptor registry.
    pub fn descriptors(&self) -> &DescriptorRegistry {
        &self.descriptors
    }

    /// Last observed device presence.
    pub fn presence(&self) -> Presence {
        self.hotplug.presence()
    }

    /// The presence watcher.
    pub fn hotplug(&self) -> &HotplugWatcher {
        &self.hotplug
    }

    /// Device epoch, the Unix epoch until a descriptor says otherwise.
    pub fn epoch(&self) -> Epoch {
        self.epoch.unwrap_or_default()
    }

    /// Whether the epoch came from a device descriptor.
    pub fn has_device_epoch(&self) -> bool {
        self.epoch.is_some()
    }

    /// Parse descriptor records fetched from the device.
    ///
    /// Records whose tag no subsystem claimed are skipped. Returns the
    /// number of records parsed.
    ///
    /// # Errors
    ///
    /// Returns the first parser error, e.g. [`SyncError::MalformedEpoch`].
    pub fn ingest_descriptors<I, P>(&mut self, records: I) -> SyncResult<usize>
    where
        I: IntoIterator<Item = (u8, P)>,
        P: AsRef<[u8]>,
    {
        let mut parsed = 0;
        for (tag, payload) in records {
            match self.descriptors.parse(tag, payload.as_ref()) {
                None => debug!(tag, "Skipping unclaimed descriptor"),
                Some(Ok(Descriptor::Epoch(epoch))) => {
                    info!(%epoch, "Device epoch loaded");
                    self.epoch = Some(epoch);
                    parsed += 1;
                }
                Some(Err(e)) => return Err(e),
            }
        }
        Ok(parsed)
    }

    /// Push host time to the device. See [`TimeSyncController::sync_time`].
    ///
    /// # Errors
    ///
    /// Propagates transport failures unchanged.
    pub fn sync_time(
        &mut self,
        force: bool,
        threshold: Option<f64>,
        max_attempts: u32,
    ) -> SyncResult<u32> {
        let result = self
            .time
            .sync_time(&mut self.transport, force, threshold, max_attempts);
        self.observe(result)
    }

    /// Push host time to the device and report the full outcome.
    ///
    /// # Errors
    ///
    /// Propagates transport failures unchanged.
    pub fn sync_time_detailed(
        &mut self,
        force: bool,
        threshold: Option<f64>,
        max_attempts: u32,
    ) -> SyncResult<SyncAttemptResult> {
        let result =
            self.time
                .sync_time_detailed(&mut self.transport, force, threshold, max_attempts);
        self.observe(result)
    }

    /// Device time in seconds since its epoch.
    ///
    /// # Errors
    ///
    /// Propagates transport failures.
    pub fn current_timestamp(&mut self) -> SyncResult<f64> {
        let result = self.time.read_timestamp(&mut self.transport);
        self.observe(result)
    }

    /// Device time as a calendar instant.
    ///
    /// # Errors
    ///
    /// Propagates transport failures.
    pub fn current_time(&mut self) -> SyncResult<NaiveDateTime> {
        let timestamp = self.current_timestamp()?;
        self.calendar_time(timestamp)
    }

    /// Device time minus host time, in seconds.
    ///
    /// # Errors
    ///
    /// Propagates transport failures.
    pub fn time_offset(&mut self) -> SyncResult<f64> {
        let result = self.time.time_offset(&mut self.transport);
        self.observe(result)
    }

    /// Read the device clock once and report it against the host clock.
    ///
    /// # Errors
    ///
    /// Propagates transport failures.
    pub fn time_info(&mut self) -> SyncResult<TimeInfo> {
        let current_timestamp = self.current_timestamp()?;
        let host_time = self.time.host_time();
        Ok(TimeInfo {
            epoch: self.epoch(),
            current_time: self.calendar_time(current_timestamp)?,
            current_timestamp,
            host_time,
            offset: current_timestamp - host_time,
        })
    }

    fn calendar_time(&self, timestamp: f64) -> SyncResult<NaiveDateTime> {
        let epoch = self.epoch();
        epoch.at(timestamp).ok_or_else(|| {
            SyncError::DeviceCommunication(format!(
                "device timestamp {timestamp} is outside the calendar range from epoch {epoch}"
            ))
        })
    }

    fn observe<T>(&mut self, result: SyncResult<T>) -> SyncResult<T> {
        match &result {
            Ok(_) => {
                self.hotplug.record_success();
            }
            Err(e) if e.is_communication() => {
                self.hotplug.record_failure();
            }
            Err(_) => {}
        }
        result
    }
}
