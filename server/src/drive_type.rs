// Drive type registry and disk geometry arithmetic
use lazy_static::lazy_static;

// Sentinel for a C/H/S triple outside the drive's geometry. Callers decide
// whether to surface this as a drive fault.
pub const INVALID_SECTOR: u32 = u32::MAX;

/// Controller family a drive type belongs to. The bus family (derived from
/// the bridge's VHDL type tag) must match at connect time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Rp,
    Rm,
    Tm78,
    Tm03,
    Network,
    None,
}

impl Family {
    pub fn is_disk(self) -> bool {
        matches!(self, Family::Rp | Family::Rm)
    }

    pub fn is_tape(self) -> bool {
        matches!(self, Family::Tm78 | Family::Tm03)
    }
}

/// Word packing of a disk sector as it crosses the MASSBUS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packing {
    /// 256 x 16-bit words, 512 bytes in the image.
    Bits16,
    /// 128 x 36-bit words in simh layout, 1024 bytes in the image.
    Bits18,
}

impl Packing {
    pub fn sector_bytes(self) -> usize {
        match self {
            Packing::Bits16 => 512,
            Packing::Bits18 => 1024,
        }
    }
}

/// Immutable characteristics of one drive model. Built once at startup and
/// never mutated, so geometry queries are lock-free from any thread.
#[derive(Debug)]
pub struct DriveType {
    pub name: &'static str,
    /// Value advertised in the drive-type register.
    pub type_word: u16,
    pub family: Family,
    /// Sectors per track in 16-bit packing.
    pub sectors16: u32,
    /// Sectors per track in 18-bit packing.
    pub sectors18: u32,
    pub heads: u32,
    pub cylinders: u32,
}

impl DriveType {
    pub fn is_disk(&self) -> bool {
        self.family.is_disk()
    }

    pub fn is_tape(&self) -> bool {
        self.family.is_tape()
    }

    pub fn sectors(&self, packing: Packing) -> u32 {
        match packing {
            Packing::Bits16 => self.sectors16,
            Packing::Bits18 => self.sectors18,
        }
    }

    pub fn total_sectors(&self, packing: Packing) -> u32 {
        self.cylinders * self.heads * self.sectors(packing)
    }

    pub fn capacity_bytes(&self, packing: Packing) -> u64 {
        self.total_sectors(packing) as u64 * packing.sector_bytes() as u64
    }

    /// C/H/S to absolute sector number. Out-of-range addresses map to
    /// INVALID_SECTOR rather than an error.
    pub fn to_lba(&self, cyl: u32, head: u32, sector: u32, packing: Packing) -> u32 {
        let sectors = self.sectors(packing);
        if cyl >= self.cylinders || head >= self.heads || sector >= sectors {
            return INVALID_SECTOR;
        }
        (cyl * self.heads + head) * sectors + sector
    }

    /// Absolute sector number back to C/H/S.
    pub fn from_lba(&self, lba: u32, packing: Packing) -> Option<(u32, u32, u32)> {
        let sectors = self.sectors(packing);
        if lba >= self.total_sectors(packing) {
            return None;
        }
        let sector = lba % sectors;
        let track = lba / sectors;
        let head = track % self.heads;
        let cyl = track / self.heads;
        Some((cyl, head, sector))
    }
}

lazy_static! {
    static ref DRIVE_TYPES: [DriveType; 9] = [
        DriveType { name: "RP04", type_word: 0o20020, family: Family::Rp,
                    sectors16: 22, sectors18: 20, heads: 19, cylinders: 411 },
        DriveType { name: "RP06", type_word: 0o20022, family: Family::Rp,
                    sectors16: 22, sectors18: 20, heads: 19, cylinders: 815 },
        DriveType { name: "RP07", type_word: 0o20042, family: Family::Rm,
                    sectors16: 50, sectors18: 43, heads: 32, cylinders: 630 },
        DriveType { name: "RM03", type_word: 0o20024, family: Family::Rm,
                    sectors16: 32, sectors18: 30, heads: 5, cylinders: 823 },
        DriveType { name: "RM05", type_word: 0o20027, family: Family::Rm,
                    sectors16: 32, sectors18: 30, heads: 19, cylinders: 823 },
        DriveType { name: "RM80", type_word: 0o20026, family: Family::Rm,
                    sectors16: 31, sectors18: 30, heads: 14, cylinders: 559 },
        DriveType { name: "TU78", type_word: crate::massbus::TMDT_VALUE, family: Family::Tm78,
                    sectors16: 0, sectors18: 0, heads: 0, cylinders: 0 },
        // Declared for completeness; never serviced.
        DriveType { name: "TM03", type_word: 0o40000, family: Family::Tm03,
                    sectors16: 0, sectors18: 0, heads: 0, cylinders: 0 },
        DriveType { name: "MEIS", type_word: 0, family: Family::Network,
                    sectors16: 0, sectors18: 0, heads: 0, cylinders: 0 },
    ];
}

/// Look up a drive type by name, case-insensitively.
pub fn lookup(name: &str) -> Option<&'static DriveType> {
    DRIVE_TYPES.iter().find(|t| t.name.eq_ignore_ascii_case(name))
}

pub fn all() -> &'static [DriveType] {
    &*DRIVE_TYPES
}
