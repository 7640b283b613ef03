//! CID / CSD / SCR / switch-status decoders
//!
//! Diagnostic only: bring-up logs these but never gates on them. Long
//! responses arrive with the CRC byte stripped, so CID/CSD bit `n` sits at
//! bit `n - 8` of [`CommandResult::long`](super::command::CommandResult::long).

use heapless::String;
use zerocopy::byteorder::{BigEndian, U16, U64};
use zerocopy::{FromBytes, Immutable, KnownLayout};

/// Extract `width` bits of a long response at register bit `reg_bit`
fn field(raw: u128, reg_bit: u32, width: u32) -> u32 {
    ((raw >> (reg_bit - 8)) & ((1u128 << width) - 1)) as u32
}

// ============================================================================
// CID
// ============================================================================

/// Card identification register
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cid {
    pub manufacturer_id: u8,
    /// Two ASCII characters
    pub oem_id: u16,
    pub product_name: String<5>,
    pub revision: u8,
    pub serial: u32,
    pub year: u16,
    pub month: u8,
}

impl Cid {
    pub fn decode(raw: u128) -> Self {
        let mut product_name = String::new();
        for i in (0..5).rev() {
            let c = (raw >> (56 + i * 8)) as u8;
            let c = if c.is_ascii_graphic() || c == b' ' { c as char } else { '?' };
            // Capacity is exactly five characters
            let _ = product_name.push(c);
        }

        let mdt = field(raw, 8, 12);
        Self {
            manufacturer_id: field(raw, 120, 8) as u8,
            oem_id: field(raw, 104, 16) as u16,
            product_name,
            revision: field(raw, 56, 8) as u8,
            serial: field(raw, 24, 32),
            year: 2000 + ((mdt >> 4) & 0xFF) as u16,
            month: (mdt & 0xF) as u8,
        }
    }

    pub fn log(&self) {
        let oem = self.oem_id.to_be_bytes();
        log::info!(
            "SD: CID mid={:#04x} oid={}{} pnm={} rev={}.{} psn={:#010x} mdt={}/{}",
            self.manufacturer_id,
            oem[0] as char,
            oem[1] as char,
            self.product_name,
            self.revision >> 4,
            self.revision & 0xF,
            self.serial,
            self.year,
            self.month
        );
    }
}

// ============================================================================
// CSD
// ============================================================================

/// Card-specific data, tagged by CSD_STRUCTURE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Csd {
    /// Standard capacity
    V1 {
        tran_speed: u8,
        read_bl_len: u8,
        c_size: u16,
        c_size_mult: u8,
    },
    /// High / extended capacity
    V2 {
        tran_speed: u8,
        read_bl_len: u8,
        c_size: u32,
    },
    /// Reserved structure version; fields not interpreted
    Unsupported { structure: u8 },
}

impl Csd {
    pub fn decode(raw: u128) -> Self {
        let structure = field(raw, 126, 2) as u8;
        let tran_speed = field(raw, 96, 8) as u8;
        let read_bl_len = field(raw, 80, 4) as u8;
        match structure {
            0 => Csd::V1 {
                tran_speed,
                read_bl_len,
                c_size: field(raw, 62, 12) as u16,
                c_size_mult: field(raw, 47, 3) as u8,
            },
            1 => Csd::V2 {
                tran_speed,
                read_bl_len,
                c_size: field(raw, 48, 22),
            },
            _ => Csd::Unsupported { structure },
        }
    }

    /// Card capacity in bytes
    pub fn capacity(&self) -> Option<u64> {
        match *self {
            Csd::V1 {
                read_bl_len,
                c_size,
                c_size_mult,
                ..
            } => Some(
                (u64::from(c_size) + 1) << (u32::from(c_size_mult) + 2 + u32::from(read_bl_len)),
            ),
            Csd::V2 { c_size, .. } => Some((u64::from(c_size) + 1) * 512 * 1024),
            Csd::Unsupported { .. } => None,
        }
    }

    pub fn log(&self) {
        match self {
            Csd::Unsupported { structure } => {
                log::warn!("SD: CSD structure {} not supported", structure)
            }
            csd => log::info!(
                "SD: CSD {:?}, capacity {} MiB",
                csd,
                csd.capacity().unwrap_or(0) >> 20
            ),
        }
    }
}

// ============================================================================
// SCR
// ============================================================================

/// SD configuration register, tagged by SCR_STRUCTURE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scr {
    V1 {
        sd_spec: u8,
        data_stat_after_erase: bool,
        security: u8,
        /// Bit 0 = 1-bit bus, bit 2 = 4-bit bus
        bus_widths: u8,
        sd_spec3: bool,
        ex_security: u8,
        sd_spec4: bool,
        sd_specx: u8,
        cmd_support: u8,
    },
    Unsupported { structure: u8 },
}

impl Scr {
    /// Decode the 8 bytes returned by ACMD51 (big-endian on the wire)
    pub fn decode(bytes: [u8; 8]) -> Self {
        let v = U64::<BigEndian>::from_bytes(bytes).get();
        let bits = |shift: u32, width: u32| ((v >> shift) & ((1 << width) - 1)) as u8;

        match bits(60, 4) {
            0 => Scr::V1 {
                sd_spec: bits(56, 4),
                data_stat_after_erase: bits(55, 1) != 0,
                security: bits(52, 3),
                bus_widths: bits(48, 4),
                sd_spec3: bits(47, 1) != 0,
                ex_security: bits(43, 4),
                sd_spec4: bits(42, 1) != 0,
                sd_specx: bits(38, 4),
                cmd_support: bits(32, 2),
            },
            structure => Scr::Unsupported { structure },
        }
    }

    /// Physical layer version as `(major, minor)`
    pub fn version(&self) -> Option<(u8, u8)> {
        let Scr::V1 {
            sd_spec,
            sd_spec3,
            sd_spec4,
            sd_specx,
            ..
        } = *self
        else {
            return None;
        };
        Some(match (sd_spec, sd_spec3, sd_spec4, sd_specx) {
            (0, ..) => (1, 0),
            (1, ..) => (1, 10),
            (2, false, ..) => (2, 0),
            (2, true, false, 0) => (3, 0),
            (2, true, true, 0) => (4, 0),
            (2, true, _, x) => (4 + x, 0),
            _ => (0, 0),
        })
    }
}

// ============================================================================
// SWITCH_FUNC status
// ============================================================================

/// Wire layout of the 512-bit SWITCH_FUNC status block
#[derive(FromBytes, KnownLayout, Immutable)]
#[repr(C)]
struct SwitchStatusRaw {
    max_current: U16<BigEndian>,
    /// Group 6 first
    group_support: [U16<BigEndian>; 6],
    /// Nibbles: g6 g5 | g4 g3 | g2 g1
    selection: [u8; 3],
    version: u8,
    /// Group 6 first
    busy: [U16<BigEndian>; 6],
    _reserved: [u8; 34],
}

/// Decoded SWITCH_FUNC status; groups are numbered 1..=6
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchStatus {
    /// Maximum current consumption in mA (0 = error)
    pub max_current_ma: u16,
    /// Supported-function bitmap per group
    pub support: [u16; 6],
    /// Selected function per group, 0xF if the request was rejected
    pub selected: [u8; 6],
    pub version: u8,
    pub busy: [u16; 6],
}

impl SwitchStatus {
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let raw = SwitchStatusRaw::read_from_bytes(bytes).ok()?;

        let mut support = [0; 6];
        let mut busy = [0; 6];
        let mut selected = [0; 6];
        for g in 0..6 {
            support[g] = raw.group_support[5 - g].get();
            busy[g] = raw.busy[5 - g].get();
            let byte = raw.selection[2 - g / 2];
            selected[g] = if g % 2 == 0 { byte & 0xF } else { byte >> 4 };
        }

        Some(Self {
            max_current_ma: raw.max_current.get(),
            support,
            selected,
            version: raw.version,
            busy,
        })
    }

    pub fn selected(&self, group: usize) -> Option<u8> {
        self.selected.get(group.checked_sub(1)?).copied()
    }

    pub fn supports(&self, group: usize, function: u8) -> bool {
        group
            .checked_sub(1)
            .and_then(|g| self.support.get(g))
            .is_some_and(|bits| function < 16 && bits & (1 << function) != 0)
    }
}
