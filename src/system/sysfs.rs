//! Host probing through sysfs
//!
//! [`SysfsProbe`] reads PCI and NUMA attributes from `/sys/bus/pci/devices`
//! and `/sys/devices/system/node`; [`SysfsNet`] lists InfiniBand devices from
//! `/sys/class/infiniband`. Both take the sysfs root as a parameter so they
//! can run against a copied tree.

use super::numa::{read_node_cpus, CpuSet};
use crate::discovery::{CpuAttrs, HostProbe, NetDevices, NetProperties, PciAttrs, PTR_CUDA, PTR_HOST};
use crate::error::{IoResultExt, Result, TopoError};
use std::path::{Path, PathBuf};

/// Default sysfs mount point
pub const SYSFS_ROOT: &str = "/sys";

/// [`HostProbe`] backed by sysfs and `/proc/cpuinfo`
#[derive(Debug, Clone)]
pub struct SysfsProbe {
    root: PathBuf,
}

impl Default for SysfsProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SysfsProbe {
    /// Probe the running host
    pub fn new() -> Self {
        Self::with_root(SYSFS_ROOT)
    }

    /// Probe a sysfs tree mounted elsewhere
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn device_dir(&self, bus_id: &str) -> PathBuf {
        self.root
            .join("bus/pci/devices")
            .join(bus_id.to_ascii_lowercase())
    }

    fn read_attr(&self, bus_id: &str, attr: &str) -> Option<String> {
        std::fs::read_to_string(self.device_dir(bus_id).join(attr))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

impl HostProbe for SysfsProbe {
    fn pci_path(&self, bus_id: &str) -> Result<String> {
        let dir = self.device_dir(bus_id);
        let path = std::fs::canonicalize(&dir).with_path(&dir)?;
        Ok(path.to_string_lossy().into_owned())
    }

    fn numa_node(&self, bus_id: &str) -> Result<i32> {
        Ok(self
            .read_attr(bus_id, "numa_node")
            .and_then(|s| s.parse().ok())
            .unwrap_or(-1))
    }

    fn pci_attrs(&self, bus_id: &str) -> Result<PciAttrs> {
        let class = self
            .read_attr(bus_id, "class")
            .ok_or_else(|| TopoError::device(format!("no PCI class for {}", bus_id)))?;
        Ok(PciAttrs {
            class,
            link_width: self
                .read_attr(bus_id, "max_link_width")
                .and_then(|s| s.parse().ok()),
            link_speed: self
                .read_attr(bus_id, "max_link_speed")
                .and_then(|s| normalize_link_speed(&s)),
        })
    }

    fn cpu_attrs(&self, numa_id: i32) -> Result<CpuAttrs> {
        let (vendor, family_id, model_id) = cpu_identity();
        Ok(CpuAttrs {
            affinity: read_node_cpus(&self.root, numa_id).or_else(|| {
                // Hosts without NUMA sysfs expose a single domain
                (numa_id == 0).then(|| CpuSet::from_cpus(0..num_cpus::get()))
            }),
            arch: arch_name(std::env::consts::ARCH).map(str::to_string),
            vendor,
            family_id,
            model_id,
        })
    }
}

/// Rewrite a sysfs link speed (`8.0 GT/s PCIe`) to the `8 GT/s` form
pub fn normalize_link_speed(speed: &str) -> Option<String> {
    let number = speed.split_whitespace().next()?;
    let value: f64 = number.parse().ok()?;
    if !speed.contains("GT/s") {
        return None;
    }
    Some(format!("{} GT/s", value))
}

/// Architecture name as used in hardware descriptions
pub fn arch_name(rust_arch: &str) -> Option<&'static str> {
    match rust_arch {
        "x86_64" => Some("x86_64"),
        "aarch64" => Some("arm64"),
        "powerpc64" => Some("ppc64"),
        _ => None,
    }
}

/// Vendor, family and model of the first CPU
#[cfg(target_os = "linux")]
fn cpu_identity() -> (Option<String>, Option<i32>, Option<i32>) {
    use procfs::Current;

    match procfs::CpuInfo::current() {
        Ok(info) => (
            info.vendor_id(0).map(str::to_string),
            info.get_field(0, "cpu family").and_then(|s| s.trim().parse().ok()),
            info.get_field(0, "model").and_then(|s| s.trim().parse().ok()),
        ),
        Err(e) => {
            tracing::debug!("Could not read /proc/cpuinfo: {}", e);
            (None, None, None)
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn cpu_identity() -> (Option<String>, Option<i32>, Option<i32>) {
    (None, None, None)
}

/// [`NetDevices`] listing InfiniBand devices from sysfs, in name order
#[derive(Debug, Clone)]
pub struct SysfsNet {
    root: PathBuf,
    names: Vec<String>,
}

impl SysfsNet {
    /// Devices of the running host
    pub fn new() -> Result<Self> {
        Self::with_root(SYSFS_ROOT)
    }

    /// Devices of a sysfs tree mounted elsewhere. A missing class directory
    /// means no devices.
    pub fn with_root(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let class_dir = root.join("class/infiniband");
        let mut names = Vec::new();
        if class_dir.is_dir() {
            for entry in std::fs::read_dir(&class_dir).with_path(&class_dir)? {
                let entry = entry.with_path(&class_dir)?;
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        tracing::debug!("Found {} InfiniBand devices", names.len());
        Ok(Self { root, names })
    }

    /// Device names, index = device number
    pub fn names(&self) -> &[String] {
        &self.names
    }

    fn device_dir(&self, dev: usize) -> Result<PathBuf> {
        let name = self
            .names
            .get(dev)
            .ok_or_else(|| TopoError::device(format!("no network device {}", dev)))?;
        Ok(self.root.join("class/infiniband").join(name))
    }
}

impl NetDevices for SysfsNet {
    fn device_count(&self) -> Result<usize> {
        Ok(self.names.len())
    }

    fn pci_path(&self, dev: usize) -> Result<Option<String>> {
        let device = self.device_dir(dev)?.join("device");
        match std::fs::canonicalize(&device) {
            Ok(path) => Ok(Some(path.to_string_lossy().into_owned())),
            Err(_) => Ok(None),
        }
    }

    fn ptr_support(&self, _dev: usize) -> Result<u32> {
        let peer_mem = self.root.join("kernel/mm/memory_peers/nv_mem/version");
        let peermem_module = self.root.join("module/nvidia_peermem");
        if peer_mem.exists() || peermem_module.exists() {
            Ok(PTR_HOST | PTR_CUDA)
        } else {
            Ok(PTR_HOST)
        }
    }

    fn properties(&self, dev: usize) -> Result<Option<NetProperties>> {
        let dir = self.device_dir(dev)?;
        let read = |p: &Path| {
            std::fs::read_to_string(dir.join(p))
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        Ok(Some(NetProperties {
            name: self.names.get(dev).cloned(),
            guid: read(Path::new("sys_image_guid")),
            link_rate: read(Path::new("ports/1/rate")),
            speed: None,
        }))
    }
}
