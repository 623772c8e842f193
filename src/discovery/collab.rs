//! Collaborator interfaces used during discovery
//!
//! The builder never touches drivers or sysfs directly. Everything it learns
//! about the host comes through these traits, so tests can substitute fakes
//! and other transports can plug in their own device lists.

use crate::error::{Result, TopoError};
use crate::system::CpuSet;
use crate::topology::busid::bus_id_to_u64;
use xxhash_rust::xxh64::xxh64;

/// Device can send/receive from host memory
pub const PTR_HOST: u32 = 0x1;
/// Device can send/receive from GPU memory (GPU Direct RDMA)
pub const PTR_CUDA: u32 = 0x2;

/// Optional descriptive properties of a network device
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetProperties {
    /// Device name (e.g. `mlx5_0`)
    pub name: Option<String>,
    /// System image GUID, `xxxx:xxxx:xxxx:xxxx`
    pub guid: Option<String>,
    /// Link rate as reported by the driver (`100 Gb/sec (4X EDR)`)
    pub link_rate: Option<String>,
    /// Speed in Mbps
    pub speed: Option<i64>,
}

/// A network transport's device list
pub trait NetDevices {
    /// Number of devices
    fn device_count(&self) -> Result<usize>;

    /// Sysfs path of the PCI function backing device `dev`, if any
    fn pci_path(&self, dev: usize) -> Result<Option<String>>;

    /// Memory types the device can use directly, a mask of `PTR_*`
    fn ptr_support(&self, dev: usize) -> Result<u32>;

    /// Descriptive properties, when the transport knows them
    fn properties(&self, _dev: usize) -> Result<Option<NetProperties>> {
        Ok(None)
    }
}

/// One NVLink reported by the GPU driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NvLinkInfo {
    /// Bus id of the remote end
    pub target: String,
    /// PCI class code of the remote end (`0x030200`, `0x068000`, ...)
    pub tclass: String,
    /// Number of links to that remote
    pub count: i32,
}

/// GPU driver queries, keyed by bus id
pub trait GpuQuery {
    /// Device index of the GPU
    fn device_index(&self, bus_id: &str) -> Result<i32>;

    /// Compute capability, major × 10 + minor
    fn compute_capability(&self, bus_id: &str) -> Result<i32>;

    /// Active NVLinks of the GPU
    fn nvlinks(&self, bus_id: &str) -> Result<Vec<NvLinkInfo>>;
}

/// PCI attributes of one function
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PciAttrs {
    /// Class code, `0x060400` form
    pub class: String,
    /// Maximum lane count
    pub link_width: Option<i32>,
    /// Maximum link speed (`8 GT/s`)
    pub link_speed: Option<String>,
}

/// Description of the CPUs of one NUMA domain
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CpuAttrs {
    /// Local CPUs
    pub affinity: Option<CpuSet>,
    /// Architecture name (`x86_64`, `arm64`, `ppc64`)
    pub arch: Option<String>,
    /// Vendor id (`GenuineIntel`)
    pub vendor: Option<String>,
    /// CPU family
    pub family_id: Option<i32>,
    /// CPU model
    pub model_id: Option<i32>,
}

/// Host bus and NUMA information
pub trait HostProbe {
    /// Canonical sysfs path of a PCI function
    fn pci_path(&self, bus_id: &str) -> Result<String>;

    /// NUMA node of a PCI function; negative when unknown
    fn numa_node(&self, bus_id: &str) -> Result<i32>;

    /// Class and link attributes of a PCI function
    fn pci_attrs(&self, bus_id: &str) -> Result<PciAttrs>;

    /// CPU attributes of a NUMA domain
    fn cpu_attrs(&self, numa_id: i32) -> Result<CpuAttrs>;
}

/// Per-rank information exchanged by the communicator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    /// Rank in the job
    pub rank: i32,
    /// Hash identifying the host the rank runs on
    pub host_hash: u64,
    /// Numeric bus id of the rank's GPU
    pub bus_id: u64,
    /// Whether the rank can use GPU Direct RDMA
    pub gdr_support: bool,
}

/// The calling rank and every peer of the job, indexed by rank
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommInfo {
    /// Calling rank
    pub rank: i32,
    /// All ranks, including the caller
    pub peers: Vec<PeerInfo>,
}

impl CommInfo {
    /// Information about the calling rank
    pub fn local(&self) -> Result<&PeerInfo> {
        self.peers
            .iter()
            .find(|p| p.rank == self.rank)
            .ok_or_else(|| TopoError::config(format!("rank {} missing from peer list", self.rank)))
    }
}

/// Stand-in for a collaborator that was not configured; every query fails
#[derive(Debug, Clone, Copy, Default)]
pub struct Unavailable;

impl GpuQuery for Unavailable {
    fn device_index(&self, bus_id: &str) -> Result<i32> {
        Err(TopoError::device(format!("no GPU driver to query {}", bus_id)))
    }

    fn compute_capability(&self, bus_id: &str) -> Result<i32> {
        Err(TopoError::device(format!("no GPU driver to query {}", bus_id)))
    }

    fn nvlinks(&self, bus_id: &str) -> Result<Vec<NvLinkInfo>> {
        Err(TopoError::device(format!("no GPU driver to query {}", bus_id)))
    }
}

impl HostProbe for Unavailable {
    fn pci_path(&self, bus_id: &str) -> Result<String> {
        Err(TopoError::device(format!("no host probe to locate {}", bus_id)))
    }

    fn numa_node(&self, bus_id: &str) -> Result<i32> {
        Err(TopoError::device(format!("no host probe to locate {}", bus_id)))
    }

    fn pci_attrs(&self, bus_id: &str) -> Result<PciAttrs> {
        Err(TopoError::device(format!("no host probe to read {}", bus_id)))
    }

    fn cpu_attrs(&self, numa_id: i32) -> Result<CpuAttrs> {
        Err(TopoError::device(format!("no host probe to read NUMA node {}", numa_id)))
    }
}

/// GPUs given by bus id, in device order, all of one compute capability.
///
/// For hosts without a driver binding; reports no NVLinks.
#[derive(Debug, Clone)]
pub struct ListedGpus {
    bus_ids: Vec<u64>,
    sm: i32,
}

impl ListedGpus {
    /// GPUs at `bus_ids`, device index = position
    pub fn new<S: AsRef<str>>(bus_ids: &[S], sm: i32) -> Result<Self> {
        let bus_ids = bus_ids
            .iter()
            .map(|b| bus_id_to_u64(b.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { bus_ids, sm })
    }

    fn position(&self, bus_id: &str) -> Result<usize> {
        let id = bus_id_to_u64(bus_id)?;
        self.bus_ids
            .iter()
            .position(|&b| b == id)
            .ok_or_else(|| TopoError::device(format!("GPU {} was not listed", bus_id)))
    }
}

impl GpuQuery for ListedGpus {
    fn device_index(&self, bus_id: &str) -> Result<i32> {
        Ok(self.position(bus_id)? as i32)
    }

    fn compute_capability(&self, bus_id: &str) -> Result<i32> {
        self.position(bus_id)?;
        Ok(self.sm)
    }

    fn nvlinks(&self, bus_id: &str) -> Result<Vec<NvLinkInfo>> {
        self.position(bus_id)?;
        Ok(Vec::new())
    }
}

/// Hash of this host's name, shared by every rank on the host
pub fn host_hash() -> Result<u64> {
    let name = hostname::get()
        .map_err(|e| TopoError::device(format!("hostname lookup failed: {}", e)))?;
    Ok(hash_host_name(&name.to_string_lossy()))
}

/// Hash of a host name
pub fn hash_host_name(name: &str) -> u64 {
    xxh64(name.trim().as_bytes(), 0)
}
