// One MASSBUS: up to eight drive slots, a bridge, and a service thread
//
// The service thread and the operator both mutate drive state, so every
// command dispatch and every configuration change runs under the bus gate.
// Status display takes the gate only long enough to copy a snapshot; what it
// prints is not atomic across buses and is documented as such.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;
use thiserror::Error;

use crate::bridge::{Bridge, BridgeError, BridgeFamily};
use crate::drive_type::DriveType;
use crate::drives::{DiskDrive, DriveCommon, DriveUnit, TapeDrive};
use crate::massbus::{cmd_unit, CMD_VALID, MAX_UNITS, WAIT_ERROR, WAIT_TIMEOUT};

// How long one service-loop pass blocks waiting for the host. Shutdown
// latency is bounded by the same value.
pub const COMMAND_WAIT: Duration = Duration::from_millis(1000);

#[derive(Debug, Error)]
pub enum BusError {
    #[error("unit {0} already holds a drive")]
    SlotOccupied(usize),
    #[error("unit {0} is empty")]
    SlotEmpty(usize),
    #[error("{0} drives do not fit a {1} bus")]
    Incompatible(&'static str, BridgeFamily),
    #[error("{0} drives are not serviced")]
    Unsupported(&'static str),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

struct BusState {
    slots: [Option<DriveUnit>; MAX_UNITS],
}

pub struct Bus {
    name: char,
    bridge: Arc<Bridge>,
    family: BridgeFamily,
    state: Mutex<BusState>,
    exit: AtomicBool,
    service: Mutex<Option<JoinHandle<()>>>,
}

impl Bus {
    pub fn new(name: char, bridge: Arc<Bridge>) -> Result<Arc<Self>, BusError> {
        let family = bridge.family()?;
        info!("bus {}: {} family, bridge {}", name, family, bridge.name());
        Ok(Arc::new(Self {
            name,
            bridge,
            family,
            state: Mutex::new(BusState {
                slots: std::array::from_fn(|_| None),
            }),
            exit: AtomicBool::new(false),
            service: Mutex::new(None),
        }))
    }

    pub fn name(&self) -> char {
        self.name
    }

    pub fn family(&self) -> BridgeFamily {
        self.family
    }

    pub fn bridge(&self) -> &Arc<Bridge> {
        &self.bridge
    }

    pub fn is_compatible(&self, dtype: &DriveType) -> bool {
        match self.family {
            BridgeFamily::Disk => dtype.is_disk(),
            BridgeFamily::Tape => dtype.is_tape(),
            BridgeFamily::Network => dtype.family == crate::drive_type::Family::Network,
        }
    }

    /// Place a new drive in a slot and advertise the updated presence map.
    pub fn connect(
        &self,
        unit: usize,
        dtype: &'static DriveType,
        serial: u16,
        alias: &str,
    ) -> Result<(), BusError> {
        debug_assert!(unit < MAX_UNITS);
        if !self.is_compatible(dtype) {
            return Err(BusError::Incompatible(dtype.name, self.family));
        }
        if !matches!(
            dtype.family,
            crate::drive_type::Family::Rp | crate::drive_type::Family::Rm | crate::drive_type::Family::Tm78
        ) {
            return Err(BusError::Unsupported(dtype.name));
        }
        let mut state = self.state.lock();
        if state.slots[unit].is_some() {
            return Err(BusError::SlotOccupied(unit));
        }
        let mut common = DriveCommon::new(unit, dtype, Arc::clone(&self.bridge));
        common.serial = serial;
        common.alias = alias.to_string();
        let drive = if dtype.is_disk() {
            DriveUnit::Disk(DiskDrive::new(common, false))
        } else {
            DriveUnit::Tape(TapeDrive::new(common))
        };
        drive.clear();
        state.slots[unit] = Some(drive);
        self.update_attached(&state);
        info!("bus {}: unit {} connected as {}", self.name, unit, dtype.name);
        Ok(())
    }

    /// Remove a drive, releasing its image with it.
    pub fn disconnect(&self, unit: usize) -> Result<(), BusError> {
        let mut state = self.state.lock();
        let mut drive = state.slots[unit].take().ok_or(BusError::SlotEmpty(unit))?;
        drive.detach();
        self.update_attached(&state);
        info!("bus {}: unit {} disconnected", self.name, unit);
        Ok(())
    }

    /// Run a closure against one drive under the bus gate.
    pub fn with_drive<R>(&self, unit: usize, f: impl FnOnce(&mut DriveUnit) -> R) -> Option<R> {
        let mut state = self.state.lock();
        state.slots[unit].as_mut().map(f)
    }

    pub fn find_by_alias(&self, alias: &str) -> Option<usize> {
        let state = self.state.lock();
        state
            .slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|d| d.common().alias.eq_ignore_ascii_case(alias)))
    }

    pub fn units_connected(&self) -> u8 {
        let state = self.state.lock();
        Self::bitmap(&state)
    }

    pub fn units_online(&self) -> u8 {
        let state = self.state.lock();
        let mut map = 0u8;
        for (i, slot) in state.slots.iter().enumerate() {
            if slot.as_ref().is_some_and(|d| d.common().online) {
                map |= 1 << i;
            }
        }
        map
    }

    /// Snapshot of per-unit descriptions for display; see the module
    /// comment on atomicity.
    pub fn describe_units(&self) -> Vec<(usize, String)> {
        let state = self.state.lock();
        state
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|d| (i, d.describe())))
            .collect()
    }

    /// Service one command descriptor under the bus gate. The operator (and
    /// the tests) inject descriptors here; the service thread feeds it from
    /// the bridge.
    pub fn do_command(&self, descriptor: u32) {
        let mut state = self.state.lock();
        self.dispatch(&mut state, descriptor);
    }

    fn dispatch(&self, state: &mut BusState, descriptor: u32) {
        let unit = cmd_unit(descriptor);
        let drive = match state.slots[unit].as_mut() {
            Some(drive) => drive,
            None => {
                warn!("bus {}: command for empty unit {} dropped", self.name, unit);
                return;
            }
        };
        // A formatter answers even when its transport is not online, so
        // tape commands always go through; a spun-down disk does not.
        if let DriveUnit::Disk(disk) = &*drive {
            if !disk.common.online {
                warn!("bus {}: command for offline unit {} dropped", self.name, unit);
                return;
            }
        }
        drive.do_command(descriptor);
    }

    fn bitmap(state: &BusState) -> u8 {
        let mut map = 0u8;
        for (i, slot) in state.slots.iter().enumerate() {
            if slot.is_some() {
                map |= 1 << i;
            }
        }
        map
    }

    fn update_attached(&self, state: &BusState) {
        self.bridge.set_attached(Self::bitmap(state));
    }

    // -----------------------------------------------------------------
    // Service thread

    /// Start the background loop that drains the bridge's command FIFO.
    pub fn begin_service(self: &Arc<Self>) {
        let bus = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name(format!("bus-{}", self.name))
            .spawn(move || bus.service_loop())
            .expect("spawning a bus service thread");
        *self.service.lock() = Some(handle);
    }

    fn service_loop(&self) {
        debug!("bus {}: service running", self.name);
        while !self.exit.load(Ordering::Acquire) {
            let cmd = self.bridge.wait_command(COMMAND_WAIT);
            match cmd {
                WAIT_TIMEOUT => continue,
                WAIT_ERROR => {
                    warn!("bus {}: command wait failed, backing off", self.name);
                    std::thread::sleep(COMMAND_WAIT);
                }
                word if word & CMD_VALID != 0 => self.do_command(word),
                other => {
                    warn!("bus {}: ignoring invalid descriptor {:#010x}", self.name, other);
                }
            }
        }
        debug!("bus {}: service stopped", self.name);
    }

    pub fn request_stop(&self) {
        self.exit.store(true, Ordering::Release);
    }

    /// Join the service thread. Returns once the loop has observed the exit
    /// flag, at most one command-wait period after request_stop.
    pub fn wait_stop(&self) {
        if let Some(handle) = self.service.lock().take() {
            let _ = handle.join();
        }
    }

    /// Stop service, detach every drive, and clear the presence map.
    pub fn teardown(&self) {
        self.request_stop();
        self.wait_stop();
        let mut state = self.state.lock();
        for slot in state.slots.iter_mut() {
            if let Some(drive) = slot.as_mut() {
                drive.detach();
            }
            *slot = None;
        }
        self.bridge.set_attached(0);
        info!("bus {}: torn down", self.name);
    }
}

/// Every bus in the process, in creation order.
pub struct BusSet {
    buses: Vec<Arc<Bus>>,
}

impl BusSet {
    pub fn new() -> Self {
        Self { buses: Vec::new() }
    }

    pub fn add(&mut self, bus: Arc<Bus>) {
        self.buses.push(bus);
    }

    pub fn find(&self, name: char) -> Option<&Arc<Bus>> {
        self.buses
            .iter()
            .find(|b| b.name().eq_ignore_ascii_case(&name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Bus>> {
        self.buses.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.buses.is_empty()
    }

    /// Strict shutdown order: stop and join every service thread first,
    /// then tear the buses down.
    pub fn shutdown(&mut self) {
        for bus in &self.buses {
            bus.request_stop();
        }
        for bus in &self.buses {
            bus.wait_stop();
        }
        for bus in &self.buses {
            bus.teardown();
        }
        self.buses.clear();
    }
}
