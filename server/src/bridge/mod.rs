// FPGA bridge interface: register file, command FIFO, data FIFO, interrupts
//
// The bridge carries MASSBUS signalling into a shared-memory window and an
// interrupt line. This module moves words across that window; it never
// interprets MASSBUS semantics; that is the drives' business.
pub mod window;

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use log::{debug, info, trace, warn};
use memmap2::MmapRaw;
use parking_lot::Mutex;
use thiserror::Error;

use crate::massbus::{DATA_MASK, DATA_VALID, CMD_VALID, FORCE_EXCEPTION, MAX_REGS, MAX_UNITS, WAIT_ERROR, WAIT_TIMEOUT};
use window::{
    geometry_word, BridgeWindow, FifoStatus, ATTACHED_LINK_UP, VHDL_TYPE_DISK, VHDL_TYPE_NETWORK,
    VHDL_TYPE_TAPE, WINDOW_WORDS,
};

// Bound on data-FIFO polling, expressed as a retry count. At one pause per
// retry this lands in the low tens of milliseconds on real hardware.
pub const FIFO_RETRY_LIMIT: u32 = 77_777;

/// Device family implemented by the bridge's loaded bitstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeFamily {
    Disk,
    Tape,
    Network,
}

impl std::fmt::Display for BridgeFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeFamily::Disk => write!(f, "disk"),
            BridgeFamily::Tape => write!(f, "tape"),
            BridgeFamily::Network => write!(f, "network"),
        }
    }
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("bridge i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("bridge {0} is held by another process")]
    Busy(PathBuf),
    #[error("data FIFO timed out after {FIFO_RETRY_LIMIT} polls")]
    FifoTimeout,
    #[error("bridge reports unknown VHDL type tag {0}")]
    UnknownType(u32),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

struct HardwareBacking {
    // Held to keep the node open and the window mapped.
    _file: File,
    _map: MmapRaw,
    fd: i32,
}

struct OfflineBacking {
    // Owns the window allocation the raw pointer below aliases.
    _storage: Box<[u32]>,
    family: BridgeFamily,
    command_queue: Mutex<VecDeque<u32>>,
    host_in: Mutex<VecDeque<u32>>,
    host_out: Mutex<Vec<u32>>,
}

enum Backing {
    Hardware(HardwareBacking),
    Offline(OfflineBacking),
}

/// One bridge board (or its offline stand-in) and its shared-memory window.
pub struct Bridge {
    name: String,
    win: *mut BridgeWindow,
    backing: Backing,
}

// The raw window pointer is shared between the bus service thread and the
// operator thread. Every access is a single volatile load or store of one
// slot; cross-slot ordering is the callers' concern and is serialised by the
// per-bus gate.
unsafe impl Send for Bridge {}
unsafe impl Sync for Bridge {}

impl Bridge {
    /// Open and lock a hardware bridge node and map its window. `force`
    /// skips the exclusivity check after a conflict was reported.
    pub fn open(path: &Path, force: bool) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let fd = file.as_raw_fd();
        let locked = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) } == 0;
        if !locked && !force {
            return Err(BridgeError::Busy(path.to_path_buf()));
        }
        let map = MmapRaw::map_raw(&file)?;
        let win = map.as_mut_ptr() as *mut BridgeWindow;
        info!("opened bridge {}", path.display());
        Ok(Self {
            name: path.display().to_string(),
            win,
            backing: Backing::Hardware(HardwareBacking { _file: file, _map: map, fd }),
        })
    }

    /// Build an offline bridge: a plain-memory window plus software FIFOs
    /// that keep the hardware's destructive-read contract. Commands never
    /// arrive through wait_command; they are injected by the operator (or a
    /// test) straight into the bus dispatch path.
    pub fn offline(family: BridgeFamily) -> Self {
        let mut storage = vec![0u32; WINDOW_WORDS].into_boxed_slice();
        let win = storage.as_mut_ptr() as *mut BridgeWindow;
        let bridge = Self {
            name: format!("offline-{}", family),
            win,
            backing: Backing::Offline(OfflineBacking {
                _storage: storage,
                family,
                command_queue: Mutex::new(VecDeque::new()),
                host_in: Mutex::new(VecDeque::new()),
                host_out: Mutex::new(Vec::new()),
            }),
        };
        let tag = match family {
            BridgeFamily::Disk => VHDL_TYPE_DISK,
            BridgeFamily::Tape => VHDL_TYPE_TAPE,
            BridgeFamily::Network => VHDL_TYPE_NETWORK,
        };
        unsafe {
            (*bridge.win).vhdl_id.write(tag << 16);
            (*bridge.win).attached.write(ATTACHED_LINK_UP);
        }
        bridge
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_offline(&self) -> bool {
        matches!(self.backing, Backing::Offline(_))
    }

    // -----------------------------------------------------------------
    // Register file

    pub fn read_reg(&self, unit: usize, reg: usize) -> u16 {
        debug_assert!(unit < MAX_UNITS && reg < MAX_REGS);
        unsafe { (*self.win).regs[unit][reg].read() as u16 }
    }

    pub fn write_reg(&self, unit: usize, reg: usize, value: u16) {
        debug_assert!(unit < MAX_UNITS && reg < MAX_REGS);
        unsafe { (*self.win).regs[unit][reg].write(value as u32) };
        // The bridge is known to filter some writes; report but do not
        // retry, the host is the one that has to notice.
        #[cfg(debug_assertions)]
        {
            let back = self.read_reg(unit, reg);
            if back != value {
                warn!(
                    "{}: unit {} reg {:#o} wrote {:#o}, read back {:#o}",
                    self.name, unit, reg, value, back
                );
            }
        }
    }

    pub fn set_bits(&self, unit: usize, reg: usize, mask: u16) {
        self.write_reg(unit, reg, self.read_reg(unit, reg) | mask);
    }

    pub fn clear_bits(&self, unit: usize, reg: usize, mask: u16) {
        self.write_reg(unit, reg, self.read_reg(unit, reg) & !mask);
    }

    pub fn toggle_bits(&self, unit: usize, reg: usize, mask: u16) {
        self.write_reg(unit, reg, self.read_reg(unit, reg) ^ mask);
    }

    // -----------------------------------------------------------------
    // Command FIFO

    /// Sample and dequeue the command FIFO head. The returned word is only
    /// meaningful when its validity bit is set, and a second read will not
    /// see the same descriptor, so callers keep the word in a local.
    pub fn read_command(&self) -> u32 {
        match &self.backing {
            Backing::Hardware(_) => unsafe { (*self.win).command_fifo.read() },
            Backing::Offline(off) => off.command_queue.lock().pop_front().unwrap_or(0),
        }
    }

    /// Block until the host posts a command, the timeout lapses, or the
    /// wait fails. Returns a valid descriptor, WAIT_TIMEOUT, or WAIT_ERROR.
    pub fn wait_command(&self, timeout: Duration) -> u32 {
        let hw = match &self.backing {
            Backing::Hardware(hw) => hw,
            Backing::Offline(_) => {
                thread::sleep(timeout);
                return WAIT_TIMEOUT;
            }
        };

        let cmd = self.read_command();
        if cmd & CMD_VALID != 0 {
            return cmd;
        }

        // Reception must be enabled before the device-side line is armed;
        // arming first can lose the edge that fires between the two steps.
        // The node write below re-enables the PCI gate first and the board
        // arms its side when the write lands.
        let enable: u32 = 1;
        let wrote = unsafe { libc::write(hw.fd, &enable as *const u32 as *const libc::c_void, 4) };
        if wrote != 4 {
            warn!("{}: interrupt enable failed", self.name);
            return WAIT_ERROR;
        }

        let mut pfd = libc::pollfd {
            fd: hw.fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let rc = unsafe { libc::poll(&mut pfd, 1, timeout.as_millis() as libc::c_int) };
        if rc == 0 {
            return WAIT_TIMEOUT;
        }
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                return WAIT_TIMEOUT;
            }
            warn!("{}: interrupt wait failed: {}", self.name, err);
            return WAIT_ERROR;
        }

        // Consume the event count so the next wait starts clean.
        let mut count: u32 = 0;
        unsafe { libc::read(hw.fd, &mut count as *mut u32 as *mut libc::c_void, 4) };

        let cmd = self.read_command();
        if cmd & CMD_VALID == 0 {
            warn!("{}: spurious interrupt, command FIFO empty", self.name);
            return WAIT_TIMEOUT;
        }
        cmd
    }

    // -----------------------------------------------------------------
    // Data FIFO

    /// Pull `out.len()` half-words from the host. Tape transfers prime the
    /// send count first so the bridge knows how many words to supply.
    pub fn read_data(&self, out: &mut [u32], prime: bool) -> Result<()> {
        if prime {
            self.write_send_count(out.len() as u32);
        }
        match &self.backing {
            Backing::Hardware(_) => {
                for slot in out.iter_mut() {
                    let mut spins = 0;
                    loop {
                        let word = unsafe { (*self.win).data_fifo.read() };
                        if word & DATA_VALID != 0 {
                            *slot = word & DATA_MASK;
                            break;
                        }
                        spins += 1;
                        if spins >= FIFO_RETRY_LIMIT {
                            return Err(BridgeError::FifoTimeout);
                        }
                        std::hint::spin_loop();
                    }
                }
                Ok(())
            }
            Backing::Offline(off) => {
                let mut queue = off.host_in.lock();
                for slot in out.iter_mut() {
                    match queue.pop_front() {
                        Some(word) => *slot = word & DATA_MASK,
                        None => return Err(BridgeError::FifoTimeout),
                    }
                }
                Ok(())
            }
        }
    }

    /// Push half-words toward the host. Tape transfers throttle on the
    /// FIFO's almost-full flag; disk sectors are known to fit and skip the
    /// check.
    pub fn write_data(&self, data: &[u32], force_exception: bool, throttle: bool) -> Result<()> {
        let mut count = data.len() as u32;
        if force_exception {
            count |= FORCE_EXCEPTION;
        }
        self.write_send_count(count);
        for &word in data {
            self.push_data_word(word & DATA_MASK, throttle)?;
        }
        Ok(())
    }

    /// Send a zero-length record. The transfer state machine needs at least
    /// one dequeue event to complete, so a single zero word is pushed and
    /// discarded on the far side.
    pub fn empty_transfer(&self, force_exception: bool) -> Result<()> {
        let count = if force_exception { FORCE_EXCEPTION } else { 0 };
        self.write_send_count(count);
        self.push_data_word(0, true)
    }

    fn push_data_word(&self, word: u32, throttle: bool) -> Result<()> {
        if throttle {
            let status = FifoStatus::from_bits_truncate(self.fifo_status());
            if status.contains(FifoStatus::TH_ALMOST_FULL) {
                let mut spins = 0;
                loop {
                    let status = FifoStatus::from_bits_truncate(self.fifo_status());
                    if status.contains(FifoStatus::TH_ALMOST_EMPTY) {
                        break;
                    }
                    spins += 1;
                    if spins >= FIFO_RETRY_LIMIT {
                        return Err(BridgeError::FifoTimeout);
                    }
                    std::hint::spin_loop();
                }
            }
        }
        match &self.backing {
            Backing::Hardware(_) => unsafe { (*self.win).data_fifo.write(word) },
            Backing::Offline(off) => off.host_out.lock().push(word),
        }
        Ok(())
    }

    fn write_send_count(&self, count: u32) {
        unsafe { (*self.win).send_count.write(count) };
        trace!("{}: send count {:#x}", self.name, count);
    }

    pub fn fifo_status(&self) -> u32 {
        unsafe { (*self.win).fifo_status.read() }
    }

    // -----------------------------------------------------------------
    // Advertisement and identification

    pub fn set_geometry(&self, unit: usize, cylinders: u32, heads: u32, sectors: u32) {
        debug_assert!(unit < MAX_UNITS);
        let word = geometry_word(cylinders, heads, sectors);
        unsafe { (*self.win).geometry[unit].write(word) };
        debug!(
            "{}: unit {} geometry {}x{}x{}",
            self.name, unit, cylinders, heads, sectors
        );
    }

    pub fn geometry(&self, unit: usize) -> u32 {
        debug_assert!(unit < MAX_UNITS);
        unsafe { (*self.win).geometry[unit].read() }
    }

    /// Advertise which unit positions hold a drive. The link-status bit and
    /// the rest of the slot are preserved.
    pub fn set_attached(&self, bitmap: u8) {
        unsafe {
            let old = (*self.win).attached.read();
            (*self.win).attached.write((old & !0xFF) | bitmap as u32);
        }
    }

    pub fn attached(&self) -> u8 {
        unsafe { ((*self.win).attached.read() & 0xFF) as u8 }
    }

    pub fn link_up(&self) -> bool {
        unsafe { (*self.win).attached.read() & ATTACHED_LINK_UP != 0 }
    }

    pub fn vhdl_version(&self) -> u16 {
        unsafe { ((*self.win).vhdl_id.read() & 0xFFFF) as u16 }
    }

    pub fn family(&self) -> Result<BridgeFamily> {
        if let Backing::Offline(off) = &self.backing {
            return Ok(off.family);
        }
        let tag = unsafe { ((*self.win).vhdl_id.read() >> 16) & 0x7 };
        match tag {
            VHDL_TYPE_DISK => Ok(BridgeFamily::Disk),
            VHDL_TYPE_TAPE => Ok(BridgeFamily::Tape),
            VHDL_TYPE_NETWORK => Ok(BridgeFamily::Network),
            other => Err(BridgeError::UnknownType(other)),
        }
    }

    pub fn set_data_clock(&self, divisor: u8) {
        unsafe { (*self.win).data_clock.write(divisor as u32) };
    }

    pub fn set_transfer_delay(&self, delay: u8) {
        unsafe { (*self.win).transfer_delay.write(delay as u32) };
    }

    pub fn parity_errors(&self) -> (u32, u32) {
        unsafe { ((*self.win).cbus_parity.read(), (*self.win).dbus_parity.read()) }
    }

    // -----------------------------------------------------------------
    // Host-side surface of an offline bridge

    /// Enqueue a descriptor as if the host had written a register. The
    /// value also lands in the register file, exactly as the hardware
    /// mirrors a host write before queueing it.
    pub fn host_push_command(&self, word: u32) {
        if let Backing::Offline(off) = &self.backing {
            let unit = crate::massbus::cmd_unit(word);
            let reg = crate::massbus::cmd_register(word);
            unsafe { (*self.win).regs[unit][reg].write((word & 0xFFFF) as u32) };
            off.command_queue.lock().push_back(word);
        }
    }

    /// Supply the half-words an upcoming read_data will consume.
    pub fn host_push_data(&self, words: &[u32]) {
        if let Backing::Offline(off) = &self.backing {
            off.host_in.lock().extend(words.iter().copied());
        }
    }

    /// Drain everything written toward the host since the last call.
    pub fn host_take_data(&self) -> Vec<u32> {
        match &self.backing {
            Backing::Offline(off) => std::mem::take(&mut *off.host_out.lock()),
            Backing::Hardware(_) => Vec::new(),
        }
    }

    /// Last value written to the send-count slot.
    pub fn host_last_send_count(&self) -> u32 {
        unsafe { (*self.win).send_count.read() }
    }

    /// From-host receive count as the bridge last published it.
    pub fn recv_count(&self) -> u32 {
        unsafe { (*self.win).recv_count.read() }
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        if let Backing::Hardware(hw) = &self.backing {
            unsafe { libc::flock(hw.fd, libc::LOCK_UN) };
            debug!("closed bridge {}", self.name);
        }
    }
}

/// Candidate bridge nodes discovered on the local machine.
pub struct BridgeSet {
    nodes: Vec<PathBuf>,
}

impl BridgeSet {
    /// Scan for bridge device nodes without opening them.
    pub fn enumerate() -> Self {
        let mut nodes: Vec<PathBuf> = Vec::new();
        if let Ok(entries) = std::fs::read_dir("/dev") {
            for entry in entries.flatten() {
                let name = entry.file_name();
                if name.to_string_lossy().starts_with("massbus") {
                    nodes.push(entry.path());
                }
            }
        }
        nodes.sort();
        info!("found {} bridge node(s)", nodes.len());
        Self { nodes }
    }

    pub fn empty() -> Self {
        Self { nodes: Vec::new() }
    }

    pub fn nodes(&self) -> &[PathBuf] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> Option<&Path> {
        self.nodes.get(index).map(|p| p.as_path())
    }
}
