// Shared-memory window layout exposed by the FPGA bridge
//
// The board decodes a request by its slot address with the low 8 bits
// ignored, so every slot aliases across a 256-byte region; the layout below
// names the canonical offsets. All slots are 32 bits wide and must be
// accessed volatilely; the hardware changes them behind the compiler's
// back.
use bitflags::bitflags;
use volatile::Volatile;

use crate::massbus::{MAX_REGS, MAX_UNITS};

pub const WINDOW_BYTES: usize = 0x8004;
pub const WINDOW_WORDS: usize = WINDOW_BYTES / 4;

#[repr(C)]
pub struct BridgeWindow {
    /// 0x0000: MASSBUS register files, one per unit, low 16 bits significant
    pub regs: [[Volatile<u32>; MAX_REGS]; MAX_UNITS],
    /// 0x0400: attached-drives bitmap <7:0>; <8> set = MASSBUS cable present
    pub attached: Volatile<u32>,
    _rsvd0: [u32; 255],
    /// 0x0800: data-clock divisor <7:0>
    pub data_clock: Volatile<u32>,
    _rsvd1: [u32; 255],
    /// 0x0C00: transfer-delay shift-register value <7:0>
    pub transfer_delay: Volatile<u32>,
    _rsvd2: [u32; 255],
    /// 0x1000: command FIFO head; a read dequeues
    pub command_fifo: Volatile<u32>,
    _rsvd3: [u32; 255],
    /// 0x1400: per-unit geometry words
    pub geometry: [Volatile<u32>; MAX_UNITS],
    _rsvd4: [u32; 248],
    /// 0x1800: control-bus parity error counter
    pub cbus_parity: Volatile<u32>,
    /// 0x1804: data-bus parity error counter
    pub dbus_parity: Volatile<u32>,
    /// 0x1808: FIFO status flags, both directions
    pub fifo_status: Volatile<u32>,
    _rsvd5: [u32; 1],
    /// 0x1810: VHDL version <15:0> and type tag <18:16>
    pub vhdl_id: Volatile<u32>,
    _rsvd6: [u32; 763],
    /// 0x2400: to-host send count; 0x01000000 forces a MASSBUS exception
    pub send_count: Volatile<u32>,
    /// 0x2404: from-host receive count
    pub recv_count: Volatile<u32>,
    _rsvd7: [u32; 5886],
    /// 0x8000: data FIFO slot, both directions; a read dequeues
    pub data_fifo: Volatile<u32>,
}

// The offsets above are load-bearing; a field out of place corrupts every
// register access.
const _: () = assert!(std::mem::size_of::<BridgeWindow>() == WINDOW_BYTES);

pub const ATTACHED_LINK_UP: u32 = 1 << 8;

// VHDL type tags at vhdl_id<18:16>
pub const VHDL_TYPE_DISK: u32 = 0;
pub const VHDL_TYPE_TAPE: u32 = 1;
pub const VHDL_TYPE_NETWORK: u32 = 2;

bitflags! {
    // fifo_status: to-host flags in the low nibble, from-host in the next
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FifoStatus: u32 {
        const TH_EMPTY        = 1 << 0;
        const TH_ALMOST_EMPTY = 1 << 1;
        const TH_ALMOST_FULL  = 1 << 2;
        const TH_FULL         = 1 << 3;
        const FH_EMPTY        = 1 << 4;
        const FH_ALMOST_EMPTY = 1 << 5;
        const FH_ALMOST_FULL  = 1 << 6;
        const FH_FULL         = 1 << 7;
    }
}

/// Geometry advertisement word: `(cyl-1)<<16 | (heads-1)<<8 | (sectors-1)`.
pub fn geometry_word(cylinders: u32, heads: u32, sectors: u32) -> u32 {
    ((cylinders - 1) << 16) | ((heads - 1) << 8) | (sectors - 1)
}
