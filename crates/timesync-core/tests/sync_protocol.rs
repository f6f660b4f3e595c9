//! Synchronization protocol tests against an in-memory device.
//!
//! These tests verify the register traffic of a sync call:
//! - Exception-status gating and forced syncs
//! - Single-shot write / read-write / write sequence
//! - Threshold loop and attempt budget
//! - Transport failure propagation
//! - Descriptor ingestion through the device handle

use std::cell::Cell;
use timesync_core::{
    pack_timestamp, unpack_timestamp, Device, DescriptorRegistry, Epoch, HostClock, Presence, RegisterAccess,
    RegisterMap, SyncError, SyncResult, TimeSyncController, TimestampLayout,
    EPOCH_DESCRIPTOR_TAG, TIME_SYNC_REQUEST_BIT, TRIGGER_WORD,
};

// ============================================================================
// Test Helpers
// ============================================================================

/// Register transaction seen by the device.
#[derive(Debug, Clone, PartialEq)]
enum Op {
    Status,
    Write { address: u16, values: Vec<u16> },
    ReadWrite { address: u16, count: u16, write_address: u16, values: Vec<u16> },
    Read { address: u16, count: u16 },
}

/// Sync handler state of the emulated firmware.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Handler {
    Idle,
    /// Trigger written as zero, the host timestamp follows.
    FollowUp,
    /// Host timestamp received, waiting for the host to read device time.
    DelayOut,
    /// Device time read out, waiting for the host's second timestamp.
    DelayIn,
}

/// Device emulation following the firmware sync handler.
///
/// The write block is a separate set of staging registers, so a four-word
/// block may overlap the time block without touching it. Any write that
/// reaches the trigger register, the last word of the write block, runs
/// the handler. The device clock does not advance on its own, so the
/// two-way offset reduces to the mean of the two host timestamps.
struct EmulatedDevice {
    map: RegisterMap,
    layout: TimestampLayout,
    time: Vec<u16>,
    staged: Vec<u16>,
    handler: Handler,
    first_stamp: Vec<u16>,
    status: u16,
    /// Words latched in place of the computed time, for a device that drifts.
    drift_words: Option<Vec<u16>>,
    fail_after: Option<usize>,
    log: Vec<Op>,
}

impl EmulatedDevice {
    fn new(layout: TimestampLayout) -> Self {
        let words = usize::from(layout.word_count());
        Self {
            map: RegisterMap::default(),
            layout,
            time: vec![0; words],
            staged: vec![0; words],
            handler: Handler::Idle,
            first_stamp: Vec::new(),
            status: 0,
            drift_words: None,
            fail_after: None,
            log: Vec::new(),
        }
    }

    fn requesting_sync(mut self) -> Self {
        self.status |= TIME_SYNC_REQUEST_BIT;
        self
    }

    fn record(&mut self, op: Op) -> SyncResult<()> {
        if self.fail_after.is_some_and(|n| self.log.len() >= n) {
            return Err(SyncError::DeviceCommunication("Receive timeout".into()));
        }
        self.log.push(op);
        Ok(())
    }

    fn read(&mut self, address: u16, count: u16) -> Vec<u16> {
        assert_eq!(address, self.map.time_block(), "read outside the time block");
        if self.handler == Handler::DelayOut {
            self.handler = Handler::DelayIn;
        }
        let mut words = self.time.clone();
        words.resize(usize::from(count), 0);
        words
    }

    fn write(&mut self, address: u16, values: &[u16]) {
        let block = self.map.write_block();
        for (address, value) in (address..).zip(values) {
            if let Some(slot) = address
                .checked_sub(block)
                .and_then(|i| self.staged.get_mut(usize::from(i)))
            {
                *slot = *value;
            }
        }
        let trigger = self.map.trigger(self.layout);
        let count = u16::try_from(values.len()).unwrap();
        if (address..address + count).contains(&trigger) {
            self.on_trigger();
        }
    }

    fn on_trigger(&mut self) {
        let trigger_word = self.staged.last().copied().unwrap_or_default();
        self.handler = match self.handler {
            Handler::Idle if trigger_word == 0 => Handler::FollowUp,
            Handler::Idle | Handler::FollowUp => {
                self.first_stamp = self.staged.clone();
                Handler::DelayOut
            }
            Handler::DelayOut => Handler::DelayOut,
            Handler::DelayIn => {
                self.time = match self.drift_words.clone() {
                    Some(words) => words,
                    None => {
                        let t1 = unpack_timestamp(&self.first_stamp, self.layout).unwrap();
                        let t2 = unpack_timestamp(&self.staged, self.layout).unwrap();
                        pack_timestamp((t1 + t2) / 2.0, self.layout)
                    }
                };
                self.status &= !TIME_SYNC_REQUEST_BIT;
                Handler::Idle
            }
        };
    }

    fn count(&self, pred: fn(&Op) -> bool) -> usize {
        self.log.iter().filter(|op| pred(op)).count()
    }
}

impl RegisterAccess for EmulatedDevice {
    fn read_holding_registers(&mut self, address: u16, count: u16) -> SyncResult<Vec<u16>> {
        self.record(Op::Read { address, count })?;
        Ok(self.read(address, count))
    }

    fn write_registers(&mut self, address: u16, values: &[u16]) -> SyncResult<()> {
        self.record(Op::Write {
            address,
            values: values.to_vec(),
        })?;
        self.write(address, values);
        Ok(())
    }

    fn readwrite_registers(
        &mut self,
        address: u16,
        read_count: u16,
        write_address: u16,
        values: &[u16],
    ) -> SyncResult<Vec<u16>> {
        self.record(Op::ReadWrite {
            address,
            count: read_count,
            write_address,
            values: values.to_vec(),
        })?;

        // Write before read, as Modbus function 0x17 specifies
        self.write(write_address, values);
        Ok(self.read(address, read_count))
    }

    fn read_exception_status(&mut self) -> SyncResult<u16> {
        self.record(Op::Status)?;
        Ok(self.status)
    }
}

/// Clock that advances a fixed step every time it is read.
struct SteppingClock {
    now: Cell<f64>,
    step: f64,
}

impl SteppingClock {
    fn fixed(now: f64) -> Self {
        Self {
            now: Cell::new(now),
            step: 0.0,
        }
    }
}

impl HostClock for SteppingClock {
    fn now(&self) -> f64 {
        let t = self.now.get();
        self.now.set(t + self.step);
        t
    }
}

fn controller(layout: TimestampLayout, clock: SteppingClock) -> TimeSyncController<SteppingClock> {
    let mut registry = DescriptorRegistry::new();
    TimeSyncController::with_clock(layout, RegisterMap::default(), clock, &mut registry)
        .expect("fresh registry")
}

// ============================================================================
// Gating
// ============================================================================

#[test]
fn test_no_request_no_traffic() {
    let ctrl = controller(TimestampLayout::ThreeWord, SteppingClock::fixed(1_000.0));
    let mut device = EmulatedDevice::new(TimestampLayout::ThreeWord);

    assert_eq!(ctrl.sync_time(&mut device, false, None, 3).unwrap(), 0);
    assert_eq!(device.log, vec![Op::Status]);
}

#[test]
fn test_force_skips_status_read() {
    let ctrl = controller(TimestampLayout::ThreeWord, SteppingClock::fixed(1_000.0));
    let mut device = EmulatedDevice::new(TimestampLayout::ThreeWord);

    assert_eq!(ctrl.sync_time(&mut device, true, None, 3).unwrap(), 1);
    assert!(!device.log.contains(&Op::Status));
}

#[test]
fn test_second_call_is_noop_after_device_clears_request() {
    let ctrl = controller(TimestampLayout::ThreeWord, SteppingClock::fixed(1_000.0));
    let mut device = EmulatedDevice::new(TimestampLayout::ThreeWord).requesting_sync();

    assert_eq!(ctrl.sync_time(&mut device, false, None, 3).unwrap(), 1);
    let traffic = device.log.len();

    assert_eq!(ctrl.sync_time(&mut device, false, None, 3).unwrap(), 0);
    assert_eq!(device.log.len(), traffic + 1);
    assert_eq!(device.log.last(), Some(&Op::Status));
}

// ============================================================================
// Single shot
// ============================================================================

#[test]
fn test_single_shot_register_sequence() {
    let t = 1_700_000_000.25;
    let ctrl = controller(TimestampLayout::ThreeWord, SteppingClock::fixed(t));
    let mut device = EmulatedDevice::new(TimestampLayout::ThreeWord).requesting_sync();

    assert_eq!(ctrl.sync_time(&mut device, false, None, 3).unwrap(), 1);

    let staged = pack_timestamp(t, TimestampLayout::ThreeWord);
    assert_eq!(
        device.log,
        vec![
            Op::Status,
            Op::Write {
                address: 5,
                values: staged.clone()
            },
            Op::ReadWrite {
                address: 2,
                count: 3,
                write_address: 7,
                values: vec![TRIGGER_WORD]
            },
            Op::Write {
                address: 5,
                values: staged.clone()
            },
        ]
    );
    assert_eq!(device.time, staged);
    assert_eq!(device.status & TIME_SYNC_REQUEST_BIT, 0);
}

#[test]
fn test_final_write_uses_fresh_host_time() {
    let ctrl = controller(
        TimestampLayout::ThreeWord,
        SteppingClock {
            now: Cell::new(100.0),
            step: 0.5,
        },
    );
    let mut device = EmulatedDevice::new(TimestampLayout::ThreeWord);
    ctrl.sync_time(&mut device, true, None, 1).unwrap();

    let writes: Vec<_> = device
        .log
        .iter()
        .filter_map(|op| match op {
            Op::Write { values, .. } => Some(values.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(writes[0], pack_timestamp(100.0, TimestampLayout::ThreeWord));
    assert_eq!(writes[1], pack_timestamp(100.5, TimestampLayout::ThreeWord));
}

#[test]
fn test_four_word_layout_traffic() {
    let ctrl = controller(TimestampLayout::FourWord, SteppingClock::fixed(70_000.125));
    let mut device = EmulatedDevice::new(TimestampLayout::FourWord);

    ctrl.sync_time(&mut device, true, None, 1).unwrap();
    assert!(device.log.contains(&Op::ReadWrite {
        address: 2,
        count: 4,
        write_address: 8,
        values: vec![TRIGGER_WORD]
    }));
    assert!(device.log.contains(&Op::Write {
        address: 5,
        values: vec![1, 4464, 0, 125]
    }));
}

#[test]
fn test_trigger_ends_the_staged_write() {
    let map = RegisterMap::default();
    for layout in [TimestampLayout::ThreeWord, TimestampLayout::FourWord] {
        let ctrl = controller(layout, SteppingClock::fixed(70_000.125));
        let mut device = EmulatedDevice::new(layout);
        ctrl.sync_time(&mut device, true, None, 1).unwrap();

        for op in &device.log {
            match op {
                Op::Write { address, values } => {
                    let end = address + u16::try_from(values.len()).unwrap();
                    assert_eq!(end - 1, map.trigger(layout), "{layout}: {op:?}");
                }
                Op::ReadWrite { write_address, .. } => {
                    assert_eq!(*write_address, map.trigger(layout), "{layout}");
                }
                _ => {}
            }
        }
    }
}

#[test]
fn test_four_word_sync_latches_host_time() {
    // Whole seconds leave the trigger word zero, which takes the follow-up path
    for t in [70_000.125, 70_000.0] {
        let ctrl = controller(TimestampLayout::FourWord, SteppingClock::fixed(t));
        let mut device = EmulatedDevice::new(TimestampLayout::FourWord).requesting_sync();

        assert_eq!(ctrl.sync_time(&mut device, false, None, 3).unwrap(), 1);
        assert_eq!(device.time, pack_timestamp(t, TimestampLayout::FourWord), "{t}");
        assert_eq!(device.status & TIME_SYNC_REQUEST_BIT, 0);
        assert!(ctrl.time_offset(&mut device).unwrap().abs() < 1e-9);
    }
}

// ============================================================================
// Threshold loop
// ============================================================================

#[test]
fn test_threshold_exhausts_budget() {
    let ctrl = controller(TimestampLayout::ThreeWord, SteppingClock::fixed(1_000.0));
    let mut device = EmulatedDevice::new(TimestampLayout::ThreeWord).requesting_sync();
    // Device clock stays ten seconds ahead no matter what is latched
    device.drift_words = Some(pack_timestamp(1_010.0, TimestampLayout::ThreeWord));

    let result = ctrl
        .sync_time_detailed(&mut device, false, Some(0.001), 3)
        .unwrap();

    assert_eq!(result.attempts, 3);
    assert!(!result.converged);
    assert!((result.final_offset.unwrap() - 10.0).abs() < 1e-9);

    assert_eq!(device.count(|op| matches!(op, Op::Status)), 1);
    assert_eq!(device.count(|op| matches!(op, Op::Write { .. })), 6);
    assert_eq!(device.count(|op| matches!(op, Op::ReadWrite { .. })), 3);
    assert_eq!(device.count(|op| matches!(op, Op::Read { .. })), 3);
}

#[test]
fn test_threshold_converges_immediately() {
    let ctrl = controller(TimestampLayout::ThreeWord, SteppingClock::fixed(5_000.5));
    let mut device = EmulatedDevice::new(TimestampLayout::ThreeWord);

    let attempts = ctrl.sync_time(&mut device, true, Some(0.01), 3).unwrap();
    assert_eq!(attempts, 1);
    assert_eq!(device.count(|op| matches!(op, Op::Read { .. })), 1);
}

#[test]
fn test_zero_budget_performs_no_traffic() {
    let ctrl = controller(TimestampLayout::ThreeWord, SteppingClock::fixed(1_000.0));
    let mut device = EmulatedDevice::new(TimestampLayout::ThreeWord).requesting_sync();

    assert_eq!(ctrl.sync_time(&mut device, true, Some(0.001), 0).unwrap(), 0);
    assert_eq!(ctrl.sync_time(&mut device, false, None, 0).unwrap(), 0);
    assert!(device.log.is_empty());
    assert_ne!(device.status & TIME_SYNC_REQUEST_BIT, 0);
}

#[test]
fn test_default_budget_is_three() {
    let ctrl = controller(TimestampLayout::ThreeWord, SteppingClock::fixed(1_000.0));
    let mut device = EmulatedDevice::new(TimestampLayout::ThreeWord);
    device.drift_words = Some(vec![0, 0, 0]);

    assert_eq!(
        ctrl.sync_time_default(&mut device, true, Some(0.5)).unwrap(),
        3
    );
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn test_status_failure_propagates() {
    let ctrl = controller(TimestampLayout::ThreeWord, SteppingClock::fixed(1_000.0));
    let mut device = EmulatedDevice::new(TimestampLayout::ThreeWord);
    device.fail_after = Some(0);

    let err = ctrl.sync_time(&mut device, false, None, 3).unwrap_err();
    assert!(err.is_communication());
    assert!(device.log.is_empty());
}

#[test]
fn test_mid_sequence_failure_aborts_without_retry() {
    let ctrl = controller(TimestampLayout::ThreeWord, SteppingClock::fixed(1_000.0));
    let mut device = EmulatedDevice::new(TimestampLayout::ThreeWord).requesting_sync();
    // Status and the first write succeed, the read/write transaction fails
    device.fail_after = Some(2);

    let err = ctrl
        .sync_time(&mut device, false, Some(0.001), 3)
        .unwrap_err();
    assert_eq!(err, SyncError::DeviceCommunication("Receive timeout".into()));
    assert_eq!(device.log.len(), 2);
}

// ============================================================================
// Device handle
// ============================================================================

#[test]
fn test_device_handle_end_to_end() {
    let emulated = EmulatedDevice::new(TimestampLayout::ThreeWord).requesting_sync();
    let mut device = Device::new(emulated, TimestampLayout::ThreeWord, RegisterMap::default())
        .expect("fresh registry");

    let parsed = device
        .ingest_descriptors(vec![
            (4u8, vec![1, 2, 3]),
            (EPOCH_DESCRIPTOR_TAG, vec![19, 70, 1, 1, 0, 0, 0, 0, 0]),
        ])
        .unwrap();
    assert_eq!(parsed, 1);
    assert_eq!(device.epoch(), Epoch::unix());

    assert_eq!(device.sync_time(false, None, 3).unwrap(), 1);
    assert_eq!(device.presence(), Presence::Present);

    // The emulated device latched host time, so the offset is small
    let offset = device.time_offset().unwrap();
    assert!(offset.abs() < 5.0, "offset {offset}");

    assert_eq!(device.sync_time(false, None, 3).unwrap(), 0);
}

#[test]
fn test_device_handle_accepts_prepopulated_registry() {
    let mut registry = DescriptorRegistry::new();
    let _first = TimeSyncController::new(
        TimestampLayout::ThreeWord,
        RegisterMap::default(),
        &mut registry,
    )
    .unwrap();

    // Same owner re-registering is harmless
    let device = Device::with_registry(
        EmulatedDevice::new(TimestampLayout::ThreeWord),
        registry,
        TimestampLayout::ThreeWord,
        RegisterMap::default(),
    );
    assert!(device.is_ok());
}
