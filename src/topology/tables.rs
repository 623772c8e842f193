//! String to enum lookup tables used by ingestion
//!
//! Each table is an ordered association list; the first exact match wins and
//! anything else resolves to the table's fallback.

use super::node::{CpuArch, CpuVendor};

/// Ordered string → value table with a fallback for unmatched keys
pub struct KvTable<T: Copy + 'static> {
    entries: &'static [(&'static str, T)],
    fallback: T,
}

impl<T: Copy + 'static> KvTable<T> {
    /// Build a table
    pub const fn new(entries: &'static [(&'static str, T)], fallback: T) -> Self {
        Self { entries, fallback }
    }

    /// Look up a key, `None` if unmatched
    pub fn get(&self, key: &str) -> Option<T> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|&(_, v)| v)
    }

    /// Look up a key, falling back when unmatched or absent
    pub fn resolve(&self, key: Option<&str>) -> T {
        key.and_then(|k| self.get(k)).unwrap_or(self.fallback)
    }
}

/// What a PCI class code represents in the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PciClass {
    /// PCI bridge / switch port
    Bridge,
    /// NVSwitch
    NvSwitch,
    /// CPU (used as NVLink target class)
    Cpu,
    /// 3D or VGA controller
    Gpu,
    /// InfiniBand or Ethernet controller
    Nic,
    /// Anything else
    Other,
}

/// PCI class codes
pub static PCI_CLASS: KvTable<PciClass> = KvTable::new(
    &[
        ("0x060400", PciClass::Bridge),
        ("0x068000", PciClass::NvSwitch),
        ("0x068001", PciClass::Cpu),
        ("0x030200", PciClass::Gpu),
        ("0x030000", PciClass::Gpu),
        ("0x020700", PciClass::Nic),
        ("0x020000", PciClass::Nic),
    ],
    PciClass::Other,
);

/// Default PCI generation string when sysfs does not report one
pub const DEFAULT_PCI_SPEED: &str = "8 GT/s";

/// Default lane count when sysfs does not report one
pub const DEFAULT_PCI_LANES: i64 = 16;

/// PCI generation, per lane, in units of 100 Mbps
pub static PCI_GEN: KvTable<i64> = KvTable::new(
    &[
        ("2.5 GT/s", 15),
        ("5 GT/s", 30),
        ("8 GT/s", 60),
        ("16 GT/s", 120),
    ],
    60,
);

/// CPU architecture names
pub static CPU_ARCH: KvTable<CpuArch> = KvTable::new(
    &[
        ("x86_64", CpuArch::X86),
        ("arm64", CpuArch::Arm),
        ("ppc64", CpuArch::Power),
    ],
    CpuArch::Undefined,
);

/// CPU vendor strings
pub static CPU_VENDOR: KvTable<CpuVendor> = KvTable::new(
    &[
        ("GenuineIntel", CpuVendor::Intel),
        ("AuthenticAMD", CpuVendor::Amd),
    ],
    CpuVendor::Undefined,
);
