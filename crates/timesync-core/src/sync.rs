//! Host-to-device time synchronization.
//!
//! One sync iteration is three register transactions:
//! 1. write the packed host time to the staged write block,
//! 2. read the time block while writing the trigger register in a single
//!    read/write transaction, so the device latches the staged time and the
//!    read cannot race a half-applied write,
//! 3. write a fresh host time again, compensating for the latency spent in
//!    step 2.
//!
//! With a threshold, the device clock is read back after each iteration and
//! the sequence repeats until the offset is inside the threshold or the
//! attempt budget runs out. Running out of attempts is not an error; the
//! caller gets the attempt count and can inspect the offset.
//!
//! Transport failures abort the sequence immediately and are never retried
//! here.

use crate::clock::{HostClock, SystemClock};
use crate::codec::{pack_timestamp, unpack_timestamp};
use crate::descriptor::{Descriptor, DescriptorRegistry};
use crate::epoch::{parse_epoch, EPOCH_DESCRIPTOR_TAG};
use crate::registers::{RegisterAccess, RegisterMap, TIME_SYNC_REQUEST_BIT, TRIGGER_WORD};
use serde::Serialize;
use timesync_common::{SyncConfig, SyncResult, TimestampLayout, DEFAULT_MAX_ATTEMPTS};
use tracing::{debug, info, trace, warn};

/// Owner name under which the time subsystem claims its descriptor tags.
pub const TIME_DESCRIPTOR_OWNER: &str = "time";

/// Outcome of a sync call.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct SyncAttemptResult {
    /// Number of iterations performed. Zero when the device did not ask for a sync.
    pub attempts: u32,
    /// Offset measured after the last iteration, if a threshold was checked.
    pub final_offset: Option<f64>,
    /// Whether the last measured offset was inside the threshold.
    pub converged: bool,
}

impl SyncAttemptResult {
    /// Whether the call returned at the exception-status gate.
    pub fn skipped(&self) -> bool {
        self.attempts == 0
    }
}

/// Orchestrates the synchronization protocol against a borrowed device.
///
/// The controller holds no connection state. Every call borrows the device
/// for its whole duration; no other register traffic may reach the same
/// device while a sync is running.
#[derive(Debug, Clone)]
pub struct TimeSyncController<C = SystemClock> {
    layout: TimestampLayout,
    map: RegisterMap,
    clock: C,
}

fn parse_epoch_descriptor(payload: &[u8]) -> SyncResult<Descriptor> {
    parse_epoch(payload).map(Descriptor::Epoch)
}

impl TimeSyncController<SystemClock> {
    /// Create a controller using the system clock, registering the epoch
    /// parser into `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`timesync_common::SyncError::TagConflict`] if another
    /// subsystem already claimed the epoch tag.
    pub fn new(
        layout: TimestampLayout,
        map: RegisterMap,
        registry: &mut DescriptorRegistry,
    ) -> SyncResult<Self> {
        Self::with_clock(layout, map, SystemClock, registry)
    }

    /// Create a controller from configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for invalid settings, or a tag conflict
    /// from the registry.
    pub fn from_config(config: &SyncConfig, registry: &mut DescriptorRegistry) -> SyncResult<Self> {
        config.validate()?;
        Self::new(config.layout, RegisterMap::new(config.base_address)?, registry)
    }
}

impl<C: HostClock> TimeSyncController<C> {
    /// Create a controller with a custom host clock, registering the epoch
    /// parser into `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`timesync_common::SyncError::TagConflict`] if another
    /// subsystem already claimed the epoch tag.
    pub fn with_clock(
        layout: TimestampLayout,
        map: RegisterMap,
        clock: C,
        registry: &mut DescriptorRegistry,
    ) -> SyncResult<Self> {
        registry.register(
            EPOCH_DESCRIPTOR_TAG,
            TIME_DESCRIPTOR_OWNER,
            parse_epoch_descriptor,
        )?;
        Ok(Self { layout, map, clock })
    }

    /// Register layout in use.
    pub fn layout(&self) -> TimestampLayout {
        self.layout
    }

    /// Register map in use.
    pub fn register_map(&self) -> RegisterMap {
        self.map
    }

    /// Host clock in use.
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Current host time in seconds.
    pub fn host_time(&self) -> f64 {
        self.clock.now()
    }

    /// Read the device timestamp (seconds since the device epoch).
    ///
    /// # Errors
    ///
    /// Propagates transport failures.
    pub fn read_timestamp<R: RegisterAccess + ?Sized>(&self, device: &mut R) -> SyncResult<f64> {
        let words = device.read_holding_registers(self.map.time_block(), self.layout.word_count())?;
        unpack_timestamp(&words, self.layout)
    }

    /// Device time minus host time, in seconds.
    ///
    /// # Errors
    ///
    /// Propagates transport failures.
    pub fn time_offset<R: RegisterAccess + ?Sized>(&self, device: &mut R) -> SyncResult<f64> {
        let device_time = self.read_timestamp(device)?;
        Ok(device_time - self.host_time())
    }

    /// Whether the device has raised its time sync request bit.
    ///
    /// # Errors
    ///
    /// Propagates transport failures.
    pub fn sync_requested<R: RegisterAccess + ?Sized>(&self, device: &mut R) -> SyncResult<bool> {
        let status = device.read_exception_status()?;
        Ok(status & TIME_SYNC_REQUEST_BIT != 0)
    }

    /// Push host time to the device.
    ///
    /// Without `force`, the device exception status is consulted first and
    /// nothing else happens unless it requests a sync. Without `threshold`,
    /// a single iteration runs. A threshold that is not a positive finite
    /// number counts as no threshold. A `max_attempts` of zero performs no
    /// register traffic at all and returns 0.
    ///
    /// Returns the number of iterations performed.
    ///
    /// # Errors
    ///
    /// Propagates transport failures unchanged.
    pub fn sync_time<R: RegisterAccess + ?Sized>(
        &self,
        device: &mut R,
        force: bool,
        threshold: Option<f64>,
        max_attempts: u32,
    ) -> SyncResult<u32> {
        self.sync_time_detailed(device, force, threshold, max_attempts)
            .map(|result| result.attempts)
    }

    /// Same as [`sync_time`](Self::sync_time) with the default attempt budget.
    ///
    /// # Errors
    ///
    /// Propagates transport failures unchanged.
    pub fn sync_time_default<R: RegisterAccess + ?Sized>(
        &self,
        device: &mut R,
        force: bool,
        threshold: Option<f64>,
    ) -> SyncResult<u32> {
        self.sync_time(device, force, threshold, DEFAULT_MAX_ATTEMPTS)
    }

    /// Push host time to the device and report the full outcome.
    ///
    /// # Errors
    ///
    /// Propagates transport failures unchanged.
    pub fn sync_time_detailed<R: RegisterAccess + ?Sized>(
        &self,
        device: &mut R,
        force: bool,
        threshold: Option<f64>,
        max_attempts: u32,
    ) -> SyncResult<SyncAttemptResult> {
        let mut result = SyncAttemptResult::default();
        if max_attempts == 0 {
            trace!("Empty attempt budget, not syncing");
            return Ok(result);
        }

        if !force && !self.sync_requested(device)? {
            trace!("Device has not requested a time sync");
            return Ok(result);
        }

        let threshold = threshold.filter(|t| t.is_finite() && *t > 0.0);

        while result.attempts < max_attempts {
            result.attempts += 1;
            debug!(
                attempt = result.attempts,
                budget = max_attempts,
                "Pushing host time to device"
            );

            self.exchange(device)?;

            let Some(threshold) = threshold else {
                break;
            };

            let offset = self.time_offset(device)?;
            result.final_offset = Some(offset);
            if offset.abs() < threshold {
                result.converged = true;
                break;
            }
        }

        if let (Some(threshold), Some(offset), false) =
            (threshold, result.final_offset, result.converged)
        {
            warn!(
                attempts = result.attempts,
                offset,
                threshold,
                "Time sync did not converge within attempt budget"
            );
        }

        info!(
            attempts = result.attempts,
            offset = ?result.final_offset,
            "Time sync complete"
        );
        Ok(result)
    }

    /// One write / read-write / write iteration.
    fn exchange<R: RegisterAccess + ?Sized>(&self, device: &mut R) -> SyncResult<()> {
        let staged = pack_timestamp(self.host_time(), self.layout);
        device.write_registers(self.map.write_block(), &staged)?;

        let latched = device.readwrite_registers(
            self.map.time_block(),
            self.layout.word_count(),
            self.map.trigger(self.layout),
            &[TRIGGER_WORD],
        )?;
        trace!(?latched, "Device time block after trigger");

        let staged = pack_timestamp(self.host_time(), self.layout);
        device.write_registers(self.map.write_block(), &staged)
    }
}
