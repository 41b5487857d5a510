// Per-unit drive state and the disk/tape dispatch seam
pub mod disk;
pub mod fiddler;
pub mod tape;

pub use disk::DiskDrive;
pub use tape::TapeDrive;

use std::sync::Arc;

use crate::bridge::Bridge;
use crate::drive_type::DriveType;
use crate::massbus::{cmd_register, cmd_unit, cmd_value};

/// State every unit carries regardless of family.
pub struct DriveCommon {
    pub unit: usize,
    pub alias: String,
    pub serial: u16,
    pub online: bool,
    pub read_only: bool,
    pub dtype: &'static DriveType,
    pub bridge: Arc<Bridge>,
}

impl DriveCommon {
    pub fn new(unit: usize, dtype: &'static DriveType, bridge: Arc<Bridge>) -> Self {
        Self {
            unit,
            alias: String::new(),
            serial: 1,
            online: false,
            read_only: false,
            dtype,
            bridge,
        }
    }
}

/// One connected unit. The family set is closed, so the drives live in a
/// variant and every family check is an exhaustive match.
pub enum DriveUnit {
    Disk(DiskDrive),
    Tape(TapeDrive),
}

impl DriveUnit {
    pub fn common(&self) -> &DriveCommon {
        match self {
            DriveUnit::Disk(d) => &d.common,
            DriveUnit::Tape(t) => &t.common,
        }
    }

    pub fn common_mut(&mut self) -> &mut DriveCommon {
        match self {
            DriveUnit::Disk(d) => &mut d.common,
            DriveUnit::Tape(t) => &mut t.common,
        }
    }

    /// Reset the unit's register file to a consistent initial state.
    pub fn clear(&self) {
        match self {
            DriveUnit::Disk(d) => d.clear(),
            DriveUnit::Tape(t) => t.clear(),
        }
    }

    /// Service one command descriptor from the bus.
    pub fn do_command(&mut self, descriptor: u32) {
        debug_assert_eq!(cmd_unit(descriptor), self.common().unit);
        match self {
            DriveUnit::Disk(d) => d.do_command(cmd_value(descriptor)),
            DriveUnit::Tape(t) => t.do_command(cmd_register(descriptor), cmd_value(descriptor)),
        }
    }

    pub fn is_attached(&self) -> bool {
        match self {
            DriveUnit::Disk(d) => d.is_attached(),
            DriveUnit::Tape(t) => t.is_attached(),
        }
    }

    pub fn go_online(&mut self) -> bool {
        match self {
            DriveUnit::Disk(d) => d.spin_up(),
            DriveUnit::Tape(t) => t.go_online(),
        }
    }

    pub fn go_offline(&mut self) {
        match self {
            DriveUnit::Disk(d) => d.spin_down(),
            DriveUnit::Tape(t) => t.go_offline(),
        }
    }

    pub fn detach(&mut self) {
        match self {
            DriveUnit::Disk(d) => d.detach(),
            DriveUnit::Tape(t) => t.detach(),
        }
    }

    pub fn set_serial(&mut self, serial: u16) {
        self.common_mut().serial = serial;
        match self {
            DriveUnit::Disk(d) => d.refresh_registers(),
            DriveUnit::Tape(t) => t.refresh_status(),
        }
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        self.common_mut().read_only = read_only;
        match self {
            DriveUnit::Disk(d) => d.refresh_registers(),
            DriveUnit::Tape(t) => t.refresh_status(),
        }
    }

    pub fn describe(&self) -> String {
        let c = self.common();
        let state = if c.online {
            "online"
        } else if self.is_attached() {
            "attached"
        } else {
            "idle"
        };
        let media = match self {
            DriveUnit::Disk(d) => d
                .image_path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".into()),
            DriveUnit::Tape(t) => t
                .image_path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".into()),
        };
        format!(
            "{} {:8} serial {:5} {:8} {}{}  {}",
            c.dtype.name,
            if c.alias.is_empty() { "-" } else { c.alias.as_str() },
            c.serial,
            state,
            if c.read_only { "ro " } else { "rw " },
            match self {
                DriveUnit::Disk(d) => if d.packing18() { "18-bit" } else { "16-bit" },
                DriveUnit::Tape(_) => "tape  ",
            },
            media
        )
    }
}
