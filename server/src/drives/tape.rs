// TM78 formatter and TU78 transport command execution
//
// A tape unit is addressed as a formatter fanning out to four slave
// transports; only slave 0 exists here. The formatter itself is always
// willing to talk, so the bus forwards every descriptor regardless of the
// slave's state and the checks happen per command.
//
// Interrupt discipline: motion completions go to TMMIR, which the bridge
// turns into an attention interrupt. Data-transfer completions go to TMDIR,
// which does not interrupt by itself: the host's channel interrupts when
// the transfer drains, so TMDIR must carry final status before the payload
// is handed to the bridge.
use std::path::Path;

use log::{error, info, warn};

use crate::drives::fiddler::{self, Direction, MAXSKIP};
use crate::drives::DriveCommon;
use crate::image::{ImageError, TapeImage, TapeRead};
use crate::massbus::{
    dcr_function, mcr_count, mcr_function, mk_mcr_count, mk_tmdir, mk_tmmir, tcr_format,
    tcr_records, tcr_skip, tcr_slave, TmUs, DC_READ_EXT_SENSE, DC_READ_FWD, DC_READ_REV,
    DC_WRITE_GCR, DC_WRITE_PE, DIR_DPR, GO, HCR_FORMATTER_CLEAR, MC_ERASE_GAP, MC_REWIND,
    MC_SECURITY_ERASE, MC_SENSE, MC_SPACE_FWD_FILE, MC_SPACE_FWD_REC, MC_SPACE_REV_FILE,
    MC_SPACE_REV_REC, MC_UNLOAD, MC_WRITE_MARK_GCR, MC_WRITE_MARK_PE, MI_BAD_TAPE, MI_BOT,
    MI_DONE, MI_EOT, MI_FILE_PROTECT, MI_LONG_RECORD, MI_NOT_AVAIL, MI_OFFLINE, MI_SHORT_RECORD,
    MI_TAPE_MARK, MI_TM_FAULT_A, MI_UNREADABLE, SLAVES, TCR_RECORDS_MASK, TMBCR, TMDCR, TMDIR,
    TMDT, TMDT_VALUE, TMHCR, TMMCR0, TMMCR3, TMMIR, TMSN, TMTCR, TMUS,
};

// A byte count of zero asks for the largest possible record.
pub const MAX_RECORD_BYTES: usize = 65536;

// Extended sense replies are a fixed shape the host only logs.
const EXT_SENSE_HALFWORDS: usize = 30;

pub struct TapeDrive {
    pub common: DriveCommon,
    image: Option<TapeImage>,
    // Working buffers sized once for the biggest record. The byte buffer
    // carries MAXSKIP bytes of slack so the fiddler can round a non-aligned
    // record up to a whole group.
    byte_buf: Vec<u8>,
    half_buf: Vec<u32>,
}

impl TapeDrive {
    pub fn new(common: DriveCommon) -> Self {
        Self {
            common,
            image: None,
            byte_buf: vec![0; MAX_RECORD_BYTES + MAXSKIP],
            half_buf: vec![0; (MAX_RECORD_BYTES + MAXSKIP).div_ceil(4) * 2],
        }
    }

    pub fn is_attached(&self) -> bool {
        self.image.is_some()
    }

    pub fn image_path(&self) -> Option<&Path> {
        self.image.as_ref().map(|i| i.path())
    }

    pub fn clear(&self) {
        let c = &self.common;
        c.bridge.write_reg(c.unit, TMDIR, 0);
        c.bridge.write_reg(c.unit, TMMIR, 0);
        c.bridge.write_reg(c.unit, TMBCR, 0);
        for slave in 0..SLAVES {
            self.set_status(slave);
        }
    }

    pub fn refresh_status(&self) {
        self.set_status(0);
    }

    pub fn attach_image(&mut self, image: TapeImage) {
        self.common.read_only = image.read_only();
        self.image = Some(image);
        self.clear();
    }

    pub fn detach(&mut self) {
        self.common.online = false;
        self.image = None;
        self.refresh_status();
    }

    pub fn go_online(&mut self) -> bool {
        if self.image.is_none() {
            warn!("unit {}: online with no tape attached", self.common.unit);
            return false;
        }
        self.common.online = true;
        self.refresh_status();
        true
    }

    pub fn go_offline(&mut self) {
        self.common.online = false;
        self.refresh_status();
    }

    /// Operator rewind: same repositioning as the REWIND motion command but
    /// with no interrupt, since no host command asked for it.
    pub fn rewind(&mut self) {
        if let Some(image) = self.image.as_mut() {
            image.rewind();
        }
        self.refresh_status();
    }

    /// Refresh the status registers a slave presents to the host. TMDT is
    /// treated as hard-wired so a probe of a missing slave still sees the
    /// formatter family; everything else reads as absent for slaves > 0.
    pub fn set_status(&self, slave: usize) {
        let c = &self.common;
        c.bridge.write_reg(c.unit, TMDT, TMDT_VALUE);
        if slave != 0 {
            c.bridge.write_reg(c.unit, TMUS, 0);
            c.bridge.write_reg(c.unit, TMSN, 0);
            return;
        }
        let mut us = TmUs::AVAIL | TmUs::PRES | TmUs::PE;
        if c.online {
            us |= TmUs::ONL | TmUs::RDY;
        }
        if c.read_only {
            us |= TmUs::FPT;
        }
        if let Some(image) = &self.image {
            if image.at_bot() {
                us |= TmUs::BOT;
            }
            if image.at_eot() {
                us |= TmUs::EOT;
            }
        }
        c.bridge.write_reg(c.unit, TMUS, us.bits());
        c.bridge.write_reg(c.unit, TMSN, to_bcd(c.serial));
    }

    pub fn do_command(&mut self, reg: usize, value: u16) {
        match reg {
            TMDCR => self.transfer(value),
            TMMCR0..=TMMCR3 => self.motion(reg - TMMCR0, value),
            TMHCR => {
                if value & HCR_FORMATTER_CLEAR != 0 {
                    info!("unit {}: formatter clear requested", self.common.unit);
                }
            }
            other => {
                warn!(
                    "unit {}: command write to unexpected register {:#o}",
                    self.common.unit, other
                );
            }
        }
    }

    // -----------------------------------------------------------------
    // Motion commands

    fn motion(&mut self, slave: usize, value: u16) {
        let c = &self.common;
        let mcr_reg = TMMCR0 + slave;
        let func = mcr_function(value);
        // The GO bit retires with the command; data transfers are the only
        // commands whose GO the bridge clears instead.
        c.bridge.clear_bits(c.unit, mcr_reg, GO);

        if slave != 0 {
            // The only legal probe of a slave that is not there.
            if func == MC_SENSE {
                self.set_status(slave);
                self.motion_interrupt(MI_DONE, slave, false);
            } else {
                self.motion_interrupt(MI_NOT_AVAIL, slave, true);
            }
            return;
        }

        if !c.online || self.image.is_none() {
            self.motion_interrupt(MI_OFFLINE, 0, true);
            return;
        }
        let writes = matches!(
            func,
            MC_WRITE_MARK_PE | MC_WRITE_MARK_GCR | MC_ERASE_GAP | MC_SECURITY_ERASE
        );
        if writes && c.read_only {
            self.motion_interrupt(MI_FILE_PROTECT, 0, true);
            return;
        }

        let count = match mcr_count(value) {
            0 => 1,
            n => n,
        };
        match func {
            MC_SENSE => {
                self.set_status(0);
                self.motion_interrupt(MI_DONE, 0, false);
            }
            MC_REWIND => {
                self.image.as_mut().expect("preflight").rewind();
                self.set_status(0);
                self.store_motion_count(mcr_reg, 0);
                self.motion_interrupt(MI_DONE, 0, false);
            }
            MC_UNLOAD => {
                self.motion_interrupt(MI_DONE, 0, false);
                self.common.online = false;
                self.image = None;
                self.refresh_status();
            }
            MC_SPACE_FWD_REC => self.space(mcr_reg, count, true, false),
            MC_SPACE_REV_REC => self.space(mcr_reg, count, false, false),
            MC_SPACE_FWD_FILE => self.space(mcr_reg, count, true, true),
            MC_SPACE_REV_FILE => self.space(mcr_reg, count, false, true),
            MC_WRITE_MARK_PE | MC_WRITE_MARK_GCR => self.write_marks(count),
            MC_ERASE_GAP | MC_SECURITY_ERASE => self.erase(),
            other => {
                warn!("unit {}: unrecognised motion function {:#o}", c.unit, other);
                self.motion_interrupt(MI_TM_FAULT_A, 0, true);
            }
        }
    }

    /// Skip `count` records or files. The motion register's count field is
    /// rewritten with whatever was not completed; a terminating tape mark,
    /// BOT or EOT reports its own code with the remainder still pending.
    fn space(&mut self, mcr_reg: usize, count: u16, forward: bool, by_file: bool) {
        let image = self.image.as_mut().expect("preflight");
        let mut remaining = count;
        let code = loop {
            if remaining == 0 {
                break MI_DONE;
            }
            let step = if forward {
                image.space_forward()
            } else {
                image.space_reverse()
            };
            match step {
                Ok(TapeRead::Data(_)) => {
                    if !by_file {
                        remaining -= 1;
                    }
                }
                Ok(TapeRead::TapeMark) => {
                    if by_file {
                        remaining -= 1;
                    } else {
                        break MI_TAPE_MARK;
                    }
                }
                Ok(TapeRead::End) => break if forward { MI_EOT } else { MI_BOT },
                Err(err) => {
                    warn!("unit {}: spacing failed: {}", self.common.unit, err);
                    break MI_BAD_TAPE;
                }
            }
        };
        self.store_motion_count(mcr_reg, remaining);
        self.set_status(0);
        self.motion_interrupt(code, 0, code == MI_BAD_TAPE);
    }

    fn write_marks(&mut self, count: u16) {
        let image = self.image.as_mut().expect("preflight");
        let mut code = MI_DONE;
        for _ in 0..count {
            if let Err(err) = image.write_mark() {
                warn!("unit {}: write mark failed: {}", self.common.unit, err);
                code = MI_BAD_TAPE;
                break;
            }
        }
        self.set_status(0);
        self.motion_interrupt(code, 0, code == MI_BAD_TAPE);
    }

    fn erase(&mut self) {
        let image = self.image.as_mut().expect("preflight");
        let code = match image.truncate() {
            Ok(()) => MI_DONE,
            Err(err) => {
                warn!("unit {}: erase failed: {}", self.common.unit, err);
                MI_BAD_TAPE
            }
        };
        self.set_status(0);
        self.motion_interrupt(code, 0, code == MI_BAD_TAPE);
    }

    fn store_motion_count(&self, mcr_reg: usize, remaining: u16) {
        let c = &self.common;
        let mcr = c.bridge.read_reg(c.unit, mcr_reg);
        c.bridge.write_reg(c.unit, mcr_reg, mk_mcr_count(mcr, remaining));
    }

    // Motion completion; the bridge raises attention when TMMIR lands.
    fn motion_interrupt(&self, code: u16, slave: usize, failure: bool) {
        let c = &self.common;
        c.bridge.write_reg(c.unit, TMMIR, mk_tmmir(code, slave, failure));
    }

    // -----------------------------------------------------------------
    // Data-transfer commands

    fn transfer(&mut self, value: u16) {
        let c = &self.common;
        let func = dcr_function(value);
        let tcr = c.bridge.read_reg(c.unit, TMTCR);
        let slave = tcr_slave(tcr);
        let format = tcr_format(tcr);
        let bcr = c.bridge.read_reg(c.unit, TMBCR);
        let requested = if bcr == 0 { MAX_RECORD_BYTES } else { bcr as usize };

        // GO in TMDCR stays set; the bridge clears it when the transfer
        // completes.

        if slave != 0
            || fiddler::group_size(format).is_none()
            || tcr_skip(tcr) != 0
            || tcr_records(tcr) > 1
        {
            warn!(
                "unit {}: unsupported transfer (slave {}, format {:#o}, skip {}, records {})",
                c.unit,
                slave,
                format,
                tcr_skip(tcr),
                tcr_records(tcr)
            );
            self.transfer_fault(MI_TM_FAULT_A, slave);
            return;
        }
        if !c.online || self.image.is_none() {
            self.transfer_fault(MI_OFFLINE, 0);
            return;
        }

        match func {
            DC_READ_FWD => self.read_record(requested, format, Direction::Forward),
            DC_READ_REV => self.read_record(requested, format, Direction::Reverse),
            DC_WRITE_PE | DC_WRITE_GCR => self.write_record(requested, format),
            DC_READ_EXT_SENSE => self.read_extended_sense(),
            other => {
                warn!("unit {}: unrecognised transfer function {:#o}", c.unit, other);
                self.transfer_fault(MI_TM_FAULT_A, 0);
            }
        }
    }

    fn read_record(&mut self, requested: usize, format: u16, dir: Direction) {
        if dir == Direction::Reverse && self.image.as_ref().is_some_and(|i| i.at_bot()) {
            self.read_aborted(MI_BOT);
            return;
        }
        // Cap reads at the record maximum; the slack beyond it belongs to
        // the fiddler's rounding, not the container.
        let image = self.image.as_mut().expect("preflight");
        let outcome = match dir {
            Direction::Forward => image.read_record_forward(&mut self.byte_buf[..MAX_RECORD_BYTES]),
            Direction::Reverse => image.read_record_reverse(&mut self.byte_buf[..MAX_RECORD_BYTES]),
        };
        let actual = match outcome {
            Ok(TapeRead::Data(n)) => n,
            Ok(TapeRead::TapeMark) => {
                self.read_aborted(MI_TAPE_MARK);
                return;
            }
            Ok(TapeRead::End) => {
                self.read_aborted(if dir == Direction::Forward { MI_EOT } else { MI_BOT });
                return;
            }
            Err(err) => {
                error!("unit {}: record read failed: {}", self.common.unit, err);
                self.read_aborted(MI_UNREADABLE);
                return;
            }
        };

        let c = &self.common;
        let tcr = c.bridge.read_reg(c.unit, TMTCR);
        c.bridge.write_reg(c.unit, TMTCR, tcr & !TCR_RECORDS_MASK);
        c.bridge.write_reg(c.unit, TMBCR, actual as u16);
        let code = match actual.cmp(&requested) {
            std::cmp::Ordering::Equal => MI_DONE,
            std::cmp::Ordering::Less => MI_SHORT_RECORD,
            std::cmp::Ordering::Greater => MI_LONG_RECORD,
        };
        // Final status first; the host reads TMDIR off its channel-complete
        // interrupt, after the payload below has drained.
        c.bridge
            .write_reg(c.unit, TMDIR, mk_tmdir(code, code != MI_DONE) | DIR_DPR);

        let group = fiddler::group_size(format).expect("validated");
        let rounded = actual.div_ceil(group) * group;
        self.byte_buf[actual..rounded].fill(0);
        let halves = fiddler::bytes_to_halfwords(&self.byte_buf, actual, format, dir, &mut self.half_buf);
        self.set_status(0);
        if let Err(err) = self
            .common
            .bridge
            .write_data(&self.half_buf[..halves], actual != requested, true)
        {
            error!("unit {}: record send failed: {}", self.common.unit, err);
        }
    }

    // A read that produced no data: zero the byte count, report the code,
    // and run an exception-flagged null transfer so the host's channel
    // still completes.
    fn read_aborted(&mut self, code: u16) {
        let c = &self.common;
        c.bridge.write_reg(c.unit, TMBCR, 0);
        c.bridge
            .write_reg(c.unit, TMDIR, mk_tmdir(code, true) | DIR_DPR);
        self.set_status(0);
        if let Err(err) = c.bridge.empty_transfer(true) {
            error!("unit {}: null transfer failed: {}", c.unit, err);
        }
    }

    fn write_record(&mut self, requested: usize, format: u16) {
        let c = &self.common;
        if c.read_only {
            error!("unit {}: write to protected tape refused", c.unit);
            c.bridge
                .write_reg(c.unit, TMDIR, mk_tmdir(MI_FILE_PROTECT, true) | DIR_DPR);
            return;
        }
        let group = fiddler::group_size(format).expect("validated");
        let halfwords = requested * 2 / group;
        if halfwords == 0 || halfwords % 2 != 0 {
            warn!(
                "unit {}: byte count {} does not assemble into whole words",
                c.unit, requested
            );
            self.transfer_fault(MI_TM_FAULT_A, 0);
            return;
        }
        let tcr = c.bridge.read_reg(c.unit, TMTCR);
        c.bridge.write_reg(c.unit, TMTCR, tcr & !TCR_RECORDS_MASK);
        // Status goes up before the data is pulled: when the host's channel
        // completes the transfer, TMDIR must already be final.
        c.bridge
            .write_reg(c.unit, TMDIR, mk_tmdir(MI_DONE, false) | DIR_DPR);

        if let Err(err) = self.common.bridge.read_data(&mut self.half_buf[..halfwords], true) {
            error!("unit {}: record receive failed: {}", self.common.unit, err);
            return;
        }
        let produced = fiddler::halfwords_to_bytes(&self.half_buf[..halfwords], format, &mut self.byte_buf);
        let len = produced.min(requested);
        let image = self.image.as_mut().expect("preflight");
        match image.write_record(&self.byte_buf[..len]) {
            Ok(()) => {}
            Err(ImageError::ReadOnly) => {
                error!("unit {}: tape image is read-only", self.common.unit);
            }
            Err(err) => {
                error!("unit {}: record write failed: {}", self.common.unit, err);
            }
        }
        self.set_status(0);
    }

    fn read_extended_sense(&mut self) {
        let c = &self.common;
        c.bridge
            .write_reg(c.unit, TMDIR, mk_tmdir(MI_DONE, false) | DIR_DPR);
        let sense = [0u32; EXT_SENSE_HALFWORDS];
        if let Err(err) = c.bridge.write_data(&sense, false, true) {
            error!("unit {}: sense send failed: {}", c.unit, err);
        }
    }

    // Reject a transfer the formatter does not implement: failure status in
    // TMDIR, then an exception-marked null transfer in case the host's
    // channel is waiting on data.
    fn transfer_fault(&mut self, code: u16, slave: usize) {
        let c = &self.common;
        let dpr = if slave == 0 { DIR_DPR } else { 0 };
        c.bridge.write_reg(c.unit, TMDIR, mk_tmdir(code, true) | dpr);
        if let Err(err) = c.bridge.empty_transfer(true) {
            error!("unit {}: null transfer failed: {}", c.unit, err);
        }
    }
}

// Serial numbers cross the bus in binary-coded decimal.
fn to_bcd(serial: u16) -> u16 {
    let v = serial % 10000;
    let thousands = v / 1000;
    let hundreds = v / 100 % 10;
    let tens = v / 10 % 10;
    let ones = v % 10;
    (thousands << 12) | (hundreds << 8) | (tens << 4) | ones
}
