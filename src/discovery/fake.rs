//! In-memory collaborators for tests

use super::collab::{
    CpuAttrs, GpuQuery, HostProbe, NetDevices, NetProperties, NvLinkInfo, PciAttrs,
};
use crate::error::{Result, TopoError};
use crate::hwdesc::pci_chain;
use crate::system::CpuSet;
use crate::topology::AffinityOs;
use std::cell::RefCell;
use std::collections::HashMap;
use std::ops::Range;

/// Host with a fixed set of PCI devices and NUMA nodes
#[derive(Default)]
pub(crate) struct FakeHost {
    paths: HashMap<String, String>,
    numa: HashMap<String, i32>,
    classes: HashMap<String, String>,
    cpus: HashMap<i32, CpuAttrs>,
}

impl FakeHost {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Skylake NUMA node owning `cpus`
    pub(crate) fn with_cpu(mut self, numa_id: i32, cpus: Range<usize>) -> Self {
        self.cpus.insert(
            numa_id,
            CpuAttrs {
                affinity: Some(CpuSet::from_cpus(cpus)),
                arch: Some("x86_64".to_string()),
                vendor: Some("GenuineIntel".to_string()),
                family_id: Some(6),
                model_id: Some(0x55),
            },
        );
        self
    }

    /// Device at the end of `path`; every bus id before it is a bridge
    pub(crate) fn with_device(mut self, path: &str, class: &str, numa_id: i32) -> Self {
        let chain = pci_chain(path);
        for (i, bus_id) in chain.iter().enumerate() {
            let class = if i + 1 == chain.len() { class } else { "0x060400" };
            self.classes.insert(bus_id.clone(), class.to_string());
            self.numa.insert(bus_id.clone(), numa_id);
        }
        if let Some(bus_id) = chain.last() {
            self.paths.insert(bus_id.clone(), path.to_string());
        }
        self
    }
}

impl HostProbe for FakeHost {
    fn pci_path(&self, bus_id: &str) -> Result<String> {
        self.paths
            .get(&bus_id.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| TopoError::device(format!("no sysfs path for {}", bus_id)))
    }

    fn numa_node(&self, bus_id: &str) -> Result<i32> {
        Ok(self.numa.get(&bus_id.to_ascii_lowercase()).copied().unwrap_or(-1))
    }

    fn pci_attrs(&self, bus_id: &str) -> Result<PciAttrs> {
        let class = self
            .classes
            .get(&bus_id.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| TopoError::device(format!("unknown PCI device {}", bus_id)))?;
        Ok(PciAttrs {
            class,
            link_width: Some(16),
            link_speed: Some("8 GT/s".to_string()),
        })
    }

    fn cpu_attrs(&self, numa_id: i32) -> Result<CpuAttrs> {
        Ok(self.cpus.get(&numa_id).cloned().unwrap_or_default())
    }
}

/// GPU driver with a fixed set of GPUs
#[derive(Default)]
pub(crate) struct FakeGpus {
    gpus: HashMap<String, (i32, i32, Vec<NvLinkInfo>)>,
}

impl FakeGpus {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_gpu(mut self, bus_id: &str, dev: i32, sm: i32) -> Self {
        self.gpus.insert(bus_id.to_string(), (dev, sm, Vec::new()));
        self
    }

    pub(crate) fn with_nvlink(mut self, bus_id: &str, target: &str, tclass: &str, count: i32) -> Self {
        self.gpus
            .entry(bus_id.to_string())
            .or_insert((0, 0, Vec::new()))
            .2
            .push(NvLinkInfo {
                target: target.to_string(),
                tclass: tclass.to_string(),
                count,
            });
        self
    }

    fn get(&self, bus_id: &str) -> Result<&(i32, i32, Vec<NvLinkInfo>)> {
        self.gpus
            .get(bus_id)
            .ok_or_else(|| TopoError::device(format!("no GPU at {}", bus_id)))
    }
}

impl GpuQuery for FakeGpus {
    fn device_index(&self, bus_id: &str) -> Result<i32> {
        Ok(self.get(bus_id)?.0)
    }

    fn compute_capability(&self, bus_id: &str) -> Result<i32> {
        Ok(self.get(bus_id)?.1)
    }

    fn nvlinks(&self, bus_id: &str) -> Result<Vec<NvLinkInfo>> {
        Ok(self.get(bus_id)?.2.clone())
    }
}

/// One device of a [`FakeNet`]
pub(crate) struct FakeNetDevice {
    pub path: Option<String>,
    pub ptr_support: u32,
    pub properties: Option<NetProperties>,
}

/// Network transport with a fixed device list
#[derive(Default)]
pub(crate) struct FakeNet {
    pub devices: Vec<FakeNetDevice>,
}

impl FakeNet {
    pub(crate) fn with_device(mut self, path: Option<&str>, ptr_support: u32) -> Self {
        self.devices.push(FakeNetDevice {
            path: path.map(str::to_string),
            ptr_support,
            properties: None,
        });
        self
    }

    pub(crate) fn with_properties(mut self, properties: NetProperties) -> Self {
        if let Some(device) = self.devices.last_mut() {
            device.properties = Some(properties);
        }
        self
    }

    fn device(&self, dev: usize) -> Result<&FakeNetDevice> {
        self.devices
            .get(dev)
            .ok_or_else(|| TopoError::device(format!("no network device {}", dev)))
    }
}

impl NetDevices for FakeNet {
    fn device_count(&self) -> Result<usize> {
        Ok(self.devices.len())
    }

    fn pci_path(&self, dev: usize) -> Result<Option<String>> {
        Ok(self.device(dev)?.path.clone())
    }

    fn ptr_support(&self, dev: usize) -> Result<u32> {
        Ok(self.device(dev)?.ptr_support)
    }

    fn properties(&self, dev: usize) -> Result<Option<NetProperties>> {
        Ok(self.device(dev)?.properties.clone())
    }
}

/// Thread mask seam that records applied masks, or rejects them
pub(crate) struct FakeOs {
    current: CpuSet,
    reject: bool,
    pub applied: RefCell<Vec<CpuSet>>,
}

impl FakeOs {
    pub(crate) fn new(current: CpuSet) -> Self {
        Self {
            current,
            reject: false,
            applied: RefCell::new(Vec::new()),
        }
    }

    /// Every `apply` fails
    pub(crate) fn rejecting(current: CpuSet) -> Self {
        Self {
            reject: true,
            ..Self::new(current)
        }
    }
}

impl AffinityOs for FakeOs {
    fn current(&self) -> Result<CpuSet> {
        Ok(self.current)
    }

    fn apply(&self, mask: &CpuSet) -> Result<()> {
        if self.reject {
            return Err(TopoError::Os {
                call: "sched_setaffinity",
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "mask rejected"),
            });
        }
        self.applied.borrow_mut().push(*mask);
        Ok(())
    }
}
