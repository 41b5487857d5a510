// RP/RM disk command execution
//
// Only data-transfer functions arrive here; seeks, recalibrates and drive
// clears are retired by the bridge without software help. A command failure
// never propagates: the drive logs it and drops itself offline, which is
// what the host sees.
use std::path::Path;

use log::{error, warn};

use crate::drive_type::{Packing, INVALID_SECTOR};
use crate::drives::DriveCommon;
use crate::image::disk::SECTOR_WORDS;
use crate::image::DiskImage;
use crate::massbus::{
    rpda_sector, rpda_track, FN_MASK, FN_READ, FN_READ_HDR, FN_WRITE, FN_WRITE_CHECK,
    FN_WRITE_CHECK_HDR, FN_WRITE_HDR, OF_FMT18, RPDA, RPDC, RPDS, RPDT, RPOF, RPSN, RpDs,
};

pub struct DiskDrive {
    pub common: DriveCommon,
    image: Option<DiskImage>,
    packing: Packing,
}

impl DiskDrive {
    pub fn new(common: DriveCommon, packing18: bool) -> Self {
        Self {
            common,
            image: None,
            packing: if packing18 { Packing::Bits18 } else { Packing::Bits16 },
        }
    }

    pub fn packing18(&self) -> bool {
        self.packing == Packing::Bits18
    }

    pub fn is_attached(&self) -> bool {
        self.image.is_some()
    }

    pub fn image_path(&self) -> Option<&Path> {
        self.image.as_ref().map(|i| i.path())
    }

    /// Reset the register file: ready status, advertised type and serial,
    /// format bit, and the geometry the bridge reports for this unit.
    pub fn clear(&self) {
        let c = &self.common;
        let mut ds = RpDs::DRY;
        if c.read_only {
            ds |= RpDs::WRL;
        }
        c.bridge.write_reg(c.unit, RPDS, ds.bits());
        c.bridge.write_reg(c.unit, RPDT, c.dtype.type_word);
        c.bridge.write_reg(c.unit, RPSN, c.serial);
        let of = if self.packing == Packing::Bits18 { OF_FMT18 } else { 0 };
        c.bridge.write_reg(c.unit, RPOF, of);
        self.advertise_geometry();
    }

    pub fn refresh_registers(&self) {
        let c = &self.common;
        c.bridge.write_reg(c.unit, RPSN, c.serial);
        if c.read_only {
            c.bridge.set_bits(c.unit, RPDS, RpDs::WRL.bits());
        } else {
            c.bridge.clear_bits(c.unit, RPDS, RpDs::WRL.bits());
        }
    }

    fn advertise_geometry(&self) {
        let c = &self.common;
        c.bridge.set_geometry(
            c.unit,
            c.dtype.cylinders,
            c.dtype.heads,
            c.dtype.sectors(self.packing),
        );
    }

    pub fn attach_image(&mut self, image: DiskImage) {
        self.common.read_only = image.read_only();
        self.image = Some(image);
        self.clear();
    }

    pub fn detach(&mut self) {
        if self.common.online {
            self.spin_down();
        }
        self.image = None;
    }

    /// Declare the pack loaded. MOL's 0-to-1 edge makes the bridge raise
    /// attention on the host's behalf; VV stays clear until the host issues
    /// its pack acknowledge, which the bridge also handles.
    pub fn spin_up(&mut self) -> bool {
        if self.image.is_none() {
            warn!("unit {}: spin up with no image attached", self.common.unit);
            return false;
        }
        self.common.online = true;
        self.common
            .bridge
            .set_bits(self.common.unit, RPDS, RpDs::MOL.bits());
        true
    }

    pub fn spin_down(&mut self) {
        self.common.online = false;
        self.common
            .bridge
            .clear_bits(self.common.unit, RPDS, (RpDs::MOL | RpDs::VV).bits());
    }

    /// Switch between 16-bit and 18-bit packing. Sector size and
    /// sectors-per-track both change, so the format register and the
    /// advertised geometry are rewritten.
    pub fn set_packing(&mut self, bits18: bool) {
        self.packing = if bits18 { Packing::Bits18 } else { Packing::Bits16 };
        let of = if bits18 { OF_FMT18 } else { 0 };
        self.common.bridge.write_reg(self.common.unit, RPOF, of);
        self.advertise_geometry();
    }

    pub fn do_command(&mut self, value: u16) {
        match value & FN_MASK {
            FN_READ | FN_READ_HDR | FN_WRITE_CHECK | FN_WRITE_CHECK_HDR => self.read_sector(),
            FN_WRITE | FN_WRITE_HDR => self.write_sector(),
            other => {
                warn!(
                    "unit {}: unrecognised function {:#o} ignored",
                    self.common.unit, other
                );
            }
        }
    }

    // Desired address from the register file, as the host last wrote it.
    fn target_lba(&self) -> u32 {
        let c = &self.common;
        let cyl = c.bridge.read_reg(c.unit, RPDC) as u32;
        let da = c.bridge.read_reg(c.unit, RPDA);
        c.dtype
            .to_lba(cyl, rpda_track(da), rpda_sector(da), self.packing)
    }

    fn read_sector(&mut self) {
        let lba = self.target_lba();
        if lba == INVALID_SECTOR {
            error!("unit {}: read outside geometry", self.common.unit);
            self.fault();
            return;
        }
        let mut buf = [0u32; SECTOR_WORDS];
        let image = match &self.image {
            Some(image) => image,
            None => {
                error!("unit {}: read with no image", self.common.unit);
                self.fault();
                return;
            }
        };
        if let Err(err) = image.read_sector(lba, self.packing, &mut buf) {
            error!("unit {}: sector {} read failed: {}", self.common.unit, lba, err);
            self.fault();
            return;
        }
        // Sector payloads always fit the outbound FIFO, so no backpressure
        // check on the way out.
        if let Err(err) = self.common.bridge.write_data(&buf, false, false) {
            error!("unit {}: sector {} send failed: {}", self.common.unit, lba, err);
            self.fault();
        }
    }

    fn write_sector(&mut self) {
        let lba = self.target_lba();
        if lba == INVALID_SECTOR {
            error!("unit {}: write outside geometry", self.common.unit);
            self.fault();
            return;
        }
        let mut buf = [0u32; SECTOR_WORDS];
        if let Err(err) = self.common.bridge.read_data(&mut buf, false) {
            error!("unit {}: sector {} receive failed: {}", self.common.unit, lba, err);
            self.fault();
            return;
        }
        if self.common.read_only {
            error!("unit {}: write to read-only pack refused", self.common.unit);
            self.fault();
            return;
        }
        let image = match &self.image {
            Some(image) => image,
            None => {
                error!("unit {}: write with no image", self.common.unit);
                self.fault();
                return;
            }
        };
        if let Err(err) = image.write_sector(lba, self.packing, &buf) {
            error!("unit {}: sector {} write failed: {}", self.common.unit, lba, err);
            self.fault();
        }
    }

    // Any command failure takes the drive offline; the host notices MOL
    // dropping and raises its own error.
    fn fault(&mut self) {
        self.spin_down();
    }
}
