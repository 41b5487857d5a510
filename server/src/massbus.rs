// MASSBUS register assignments and bit definitions (RP/RM disks, TM78 tape)
use bitflags::bitflags;

// A drive occupies one of eight unit positions on the bus; each unit owns a
// register file of up to 32 sixteen-bit registers.
pub const MAX_UNITS: usize = 8;
pub const MAX_REGS: usize = 32;

// Command FIFO word: 31=valid, 24=end-of-block, 23:19=register, 18:16=unit,
// 15:0=value the host wrote.
pub const CMD_VALID: u32 = 1 << 31;
pub const CMD_EOB: u32 = 1 << 24;

// Data FIFO word: 31=valid, 17:0=data.
pub const DATA_VALID: u32 = 1 << 31;
pub const DATA_MASK: u32 = 0x3FFFF;

// Sentinels returned by Bridge::wait_command alongside valid descriptors.
pub const WAIT_TIMEOUT: u32 = 0;
pub const WAIT_ERROR: u32 = 0x0FFF_FFFF;

// High bit of the to-host send count; tells the bridge to assert the MASSBUS
// exception line when the transfer completes.
pub const FORCE_EXCEPTION: u32 = 0x0100_0000;

#[inline]
pub fn cmd_register(word: u32) -> usize {
    ((word >> 19) & 0x1F) as usize
}

#[inline]
pub fn cmd_unit(word: u32) -> usize {
    ((word >> 16) & 0x7) as usize
}

#[inline]
pub fn cmd_value(word: u32) -> u16 {
    (word & 0xFFFF) as u16
}

/// Assemble a command descriptor the way the bridge queues one.
#[inline]
pub fn mk_command(unit: usize, reg: usize, value: u16) -> u32 {
    CMD_VALID | ((reg as u32 & 0x1F) << 19) | ((unit as u32 & 0x7) << 16) | value as u32
}

// ---------------------------------------------------------------------------
// RP/RM disk register file (register index within the unit, octal)

pub const RPCS1: usize = 0o00; // control/command
pub const RPDS: usize = 0o01; // drive status
pub const RPER1: usize = 0o02; // error 1
pub const RPMR: usize = 0o03; // maintenance
pub const RPAS: usize = 0o04; // attention summary
pub const RPDA: usize = 0o05; // desired track/sector
pub const RPDT: usize = 0o06; // drive type
pub const RPLA: usize = 0o07; // look-ahead
pub const RPSN: usize = 0o10; // serial number
pub const RPOF: usize = 0o11; // offset/format
pub const RPDC: usize = 0o12; // desired cylinder

// RPCS1<5:0> function codes, GO bit included. Only the data-transfer
// functions reach the server; positioning commands are retired by the bridge.
pub const FN_WRITE_CHECK: u16 = 0o51;
pub const FN_WRITE_CHECK_HDR: u16 = 0o53;
pub const FN_WRITE: u16 = 0o61;
pub const FN_WRITE_HDR: u16 = 0o63;
pub const FN_READ: u16 = 0o71;
pub const FN_READ_HDR: u16 = 0o73;
pub const FN_MASK: u16 = 0o77;

// RPDA fields: track in <12:8>, sector in <5:0>.
#[inline]
pub fn rpda_track(da: u16) -> u32 {
    ((da >> 8) & 0o37) as u32
}

#[inline]
pub fn rpda_sector(da: u16) -> u32 {
    (da & 0o77) as u32
}

// RPOF: format bit. Set selects 18-bit packing (128 x 36-bit words per
// sector); clear selects 16-bit packing (256 x 16-bit words).
pub const OF_FMT18: u16 = 0o10000;

bitflags! {
    // RPDS drive status
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RpDs: u16 {
        const OM  = 0o000001; // offset mode
        const VV  = 0o000100; // volume valid
        const DRY = 0o000200; // drive ready
        const DPR = 0o000400; // drive present
        const PGM = 0o001000; // programmable
        const LST = 0o002000; // last sector transferred
        const WRL = 0o004000; // write locked
        const MOL = 0o010000; // medium online
        const PIP = 0o020000; // positioning in progress
        const ERR = 0o040000; // composite error
        const ATA = 0o100000; // attention active
    }
}

// ---------------------------------------------------------------------------
// TM78 formatter register file (register index within the unit, octal)

pub const TMDCR: usize = 0o00; // data-transfer command
pub const TMTCR: usize = 0o01; // tape control
pub const TMBCR: usize = 0o02; // byte count
pub const TMDIR: usize = 0o03; // data-transfer interrupt
pub const TMAS: usize = 0o04; // attention summary
pub const TMUS: usize = 0o05; // unit status
pub const TMDT: usize = 0o06; // drive type
pub const TMMIR: usize = 0o07; // motion interrupt
pub const TMSN: usize = 0o10; // serial number (BCD)
pub const TMMCR0: usize = 0o11; // motion command, slave 0
pub const TMMCR1: usize = 0o12; // motion command, slave 1
pub const TMMCR2: usize = 0o13; // motion command, slave 2
pub const TMMCR3: usize = 0o14; // motion command, slave 3
pub const TMHCR: usize = 0o15; // hardware control

pub const SLAVES: usize = 4;

// TMHCR
pub const HCR_FORMATTER_CLEAR: u16 = 0o000001;

// TMDT is treated as hard-wired: tape flag, TM78 formatter family, TU78
// transport, reported identically for every slave index.
pub const DT_TAPE: u16 = 0o40000;
pub const DT_TM78: u16 = 0o04000;
pub const DT_TU78: u16 = 0o00102;
pub const TMDT_VALUE: u16 = DT_TAPE | DT_TM78 | DT_TU78;

bitflags! {
    // TMUS unit status
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TmUs: u16 {
        const BOT   = 0o000002; // at beginning of tape
        const EOT   = 0o000004; // past end-of-tape marker
        const FPT   = 0o000010; // file protected
        const ONL   = 0o000100; // online
        const RDY   = 0o000200; // ready
        const PE    = 0o004000; // PE capable
        const PRES  = 0o020000; // slave present
        const AVAIL = 0o040000; // available (single port)
    }
}

// TMTCR fields: format <15:12>, skip count <11:8>, record count <7:2>,
// slave select <1:0>.
#[inline]
pub fn tcr_format(tcr: u16) -> u16 {
    (tcr >> 12) & 0o17
}

#[inline]
pub fn tcr_skip(tcr: u16) -> u16 {
    (tcr >> 8) & 0o17
}

#[inline]
pub fn tcr_records(tcr: u16) -> u16 {
    (tcr >> 2) & 0o77
}

#[inline]
pub fn tcr_slave(tcr: u16) -> usize {
    (tcr & 0o3) as usize
}

pub const TCR_RECORDS_MASK: u16 = 0o77 << 2;

// Assembly formats (TMTCR<15:12>)
pub const FMT_10_CORE_DUMP: u16 = 0o00;
pub const FMT_10_COMPAT: u16 = 0o03;

// TMMCRn fields: repeat count <15:8>, function <7:1>, GO <0>.
pub const GO: u16 = 0o000001;

#[inline]
pub fn mcr_count(mcr: u16) -> u16 {
    (mcr >> 8) & 0o377
}

#[inline]
pub fn mcr_function(mcr: u16) -> u16 {
    (mcr >> 1) & 0o77
}

#[inline]
pub fn mk_mcr_count(mcr: u16, count: u16) -> u16 {
    (mcr & 0o377) | ((count & 0o377) << 8)
}

// Motion functions (TMMCRn<7:1>)
pub const MC_SENSE: u16 = 0o01;
pub const MC_REWIND: u16 = 0o02;
pub const MC_UNLOAD: u16 = 0o03;
pub const MC_SPACE_FWD_REC: u16 = 0o04;
pub const MC_SPACE_REV_REC: u16 = 0o05;
pub const MC_SPACE_FWD_FILE: u16 = 0o06;
pub const MC_SPACE_REV_FILE: u16 = 0o07;
pub const MC_WRITE_MARK_PE: u16 = 0o10;
pub const MC_WRITE_MARK_GCR: u16 = 0o11;
pub const MC_ERASE_GAP: u16 = 0o12;
pub const MC_SECURITY_ERASE: u16 = 0o13;

// TMDCR fields: function <7:1>, GO <0>.
#[inline]
pub fn dcr_function(dcr: u16) -> u16 {
    (dcr >> 1) & 0o77
}

// Transfer functions (TMDCR<7:1>)
pub const DC_READ_FWD: u16 = 0o01;
pub const DC_READ_REV: u16 = 0o02;
pub const DC_WRITE_PE: u16 = 0o03;
pub const DC_WRITE_GCR: u16 = 0o04;
pub const DC_READ_EXT_SENSE: u16 = 0o05;

// Interrupt codes, shared by TMMIR and TMDIR
pub const MI_DONE: u16 = 0o01;
pub const MI_SHORT_RECORD: u16 = 0o02;
pub const MI_LONG_RECORD: u16 = 0o03;
pub const MI_TAPE_MARK: u16 = 0o05;
pub const MI_BOT: u16 = 0o06;
pub const MI_EOT: u16 = 0o07;
pub const MI_UNREADABLE: u16 = 0o10;
pub const MI_OFFLINE: u16 = 0o12;
pub const MI_FILE_PROTECT: u16 = 0o13;
pub const MI_NOT_AVAIL: u16 = 0o14;
pub const MI_BAD_TAPE: u16 = 0o16;
pub const MI_TM_FAULT_A: u16 = 0o30;

// TMDIR: DPR <15>, failure <14>, interrupt code <5:0>. Writing TMDIR does
// not interrupt by itself; the host sees it when its channel completes.
pub const DIR_DPR: u16 = 0o100000;
pub const DIR_FAIL: u16 = 0o040000;

#[inline]
pub fn mk_tmdir(code: u16, failure: bool) -> u16 {
    (code & 0o77) | if failure { DIR_FAIL } else { 0 }
}

// TMMIR: failure <14>, slave <11:10>, interrupt code <5:0>. Writing TMMIR
// raises an attention interrupt through the bridge.
pub const MIR_FAIL: u16 = 0o040000;

#[inline]
pub fn mk_tmmir(code: u16, slave: usize, failure: bool) -> u16 {
    (code & 0o77) | (((slave as u16) & 0o3) << 10) | if failure { MIR_FAIL } else { 0 }
}

#[inline]
pub fn mir_slave(mir: u16) -> usize {
    ((mir >> 10) & 0o3) as usize
}

#[inline]
pub fn mir_code(mir: u16) -> u16 {
    mir & 0o77
}
