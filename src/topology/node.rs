//! Node, link and path types of the topology graph
//!
//! Cross-node references are [`NodeRef`] handles (type + slot index) into the
//! per-type node arrays owned by [`System`](super::System). They are never
//! raw addresses, so node removal can renumber them explicitly.

use crate::system::CpuSet;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of nodes of a single type
pub const MAX_NODES: usize = 256;

/// Maximum number of links on a single node
pub const MAX_LINKS: usize = 32;

/// Marker for payload fields that have not been filled in
pub const TOPO_UNDEF: i32 = -1;

/// Width of a node's link to itself
pub const LOC_WIDTH: f32 = 5000.0;
/// Per-lane NVLink width for compute capability 6.0
pub const PASCAL_NVLINK_WIDTH: f32 = 18.0;
/// Per-lane NVLink width for every other compute capability
pub const VOLTA_NVLINK_WIDTH: f32 = 21.0;
/// PCI Gen3 x16
pub const PCI_WIDTH: f32 = 12.0;
/// Intel QPI before Skylake
pub const QPI_WIDTH: f32 = 6.0;
/// Intel UPI on Skylake and later
pub const SKL_QPI_WIDTH: f32 = 9.0;
/// POWER9 inter-socket bus
pub const P9_WIDTH: f32 = 32.0;
/// ARM inter-socket bus
pub const ARM_WIDTH: f32 = 6.0;

/// Number of node types
pub const NODE_TYPE_COUNT: usize = 6;

/// Kind of hardware a node models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeType {
    /// GPU that belongs to this job
    Gpu,
    /// PCI switch or bridge
    Pci,
    /// NVSwitch
    Nvs,
    /// CPU / NUMA domain
    Cpu,
    /// Network adapter (PCI function, all ports merged)
    Nic,
    /// Network port
    Net,
}

impl NodeType {
    /// All node types in storage order
    pub const ALL: [NodeType; NODE_TYPE_COUNT] = [
        NodeType::Gpu,
        NodeType::Pci,
        NodeType::Nvs,
        NodeType::Cpu,
        NodeType::Nic,
        NodeType::Net,
    ];

    /// Storage slot of this type
    pub fn index(self) -> usize {
        match self {
            NodeType::Gpu => 0,
            NodeType::Pci => 1,
            NodeType::Nvs => 2,
            NodeType::Cpu => 3,
            NodeType::Nic => 4,
            NodeType::Net => 5,
        }
    }

    /// Short name used in dumps
    pub fn as_str(self) -> &'static str {
        match self {
            NodeType::Gpu => "GPU",
            NodeType::Pci => "PCI",
            NodeType::Nvs => "NVS",
            NodeType::Cpu => "CPU",
            NodeType::Nic => "NIC",
            NodeType::Net => "NET",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Physical kind of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkKind {
    /// Loopback
    Loc,
    /// NVLink
    NvLink,
    /// PCI Express
    Pci,
    /// Inter-socket interconnect
    Sys,
    /// Network
    Net,
}

impl LinkKind {
    /// Short name used in dumps
    pub fn as_str(self) -> &'static str {
        match self {
            LinkKind::Loc => "LOC",
            LinkKind::NvLink => "NVL",
            LinkKind::Pci => "PCI",
            LinkKind::Sys => "SYS",
            LinkKind::Net => "NET",
        }
    }
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a multi-hop path, ordered from closest to farthest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PathKind {
    /// Same device
    Loc,
    /// NVLink only
    NvLink,
    /// Through a single PCI switch
    Pix,
    /// Through multiple PCI switches, not crossing a host bridge
    Pxb,
    /// Through a PCI host bridge
    Phb,
    /// Across the inter-socket interconnect
    Sys,
    /// Through the network
    Net,
}

impl fmt::Display for PathKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PathKind::Loc => "LOC",
            PathKind::NvLink => "NVL",
            PathKind::Pix => "PIX",
            PathKind::Pxb => "PXB",
            PathKind::Phb => "PHB",
            PathKind::Sys => "SYS",
            PathKind::Net => "NET",
        })
    }
}

/// Handle to a node: its type and its slot in that type's array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    /// Node type
    pub node_type: NodeType,
    /// Slot index within the type's array
    pub index: usize,
}

impl NodeRef {
    /// Create a handle
    pub fn new(node_type: NodeType, index: usize) -> Self {
        Self { node_type, index }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.node_type, self.index)
    }
}

/// Directed edge record
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Link {
    /// Physical kind
    pub kind: LinkKind,
    /// Aggregated width of all physical links of this kind to `remote`
    pub width: f32,
    /// Remote end
    pub remote: NodeRef,
}

/// Summary of the best path to one node of a target type
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TopoPath {
    /// Number of hops
    pub count: usize,
    /// Bottleneck width along the path
    pub width: f32,
    /// Farthest classification crossed
    pub kind: PathKind,
}

/// CPU architecture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CpuArch {
    /// Not reported or not recognised
    #[default]
    Undefined,
    /// x86_64
    X86,
    /// POWER
    Power,
    /// ARM
    Arm,
}

/// CPU vendor (only resolved on x86)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CpuVendor {
    /// Not reported or not recognised
    #[default]
    Undefined,
    /// GenuineIntel
    Intel,
    /// AuthenticAMD
    Amd,
}

/// CPU microarchitecture class (only resolved on Intel)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CpuModel {
    /// Not reported or not Intel
    #[default]
    Undefined,
    /// Broadwell and older
    Broadwell,
    /// Skylake and newer
    Skylake,
}

/// GPU payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuInfo {
    /// CUDA device index
    pub dev: i32,
    /// Rank in the job
    pub rank: i32,
    /// Compute capability (e.g. 70, 80)
    pub cuda_comp_cap: i32,
    /// GPU Direct RDMA support
    pub gdr_support: bool,
}

impl Default for GpuInfo {
    fn default() -> Self {
        Self {
            dev: TOPO_UNDEF,
            rank: TOPO_UNDEF,
            cuda_comp_cap: TOPO_UNDEF,
            gdr_support: false,
        }
    }
}

/// CPU payload
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CpuInfo {
    /// Architecture
    pub arch: CpuArch,
    /// Vendor
    pub vendor: CpuVendor,
    /// Microarchitecture class
    pub model: CpuModel,
    /// CPUs local to this NUMA domain
    pub affinity: CpuSet,
}

/// NET payload
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NetInfo {
    /// ASIC identifier (system image GUID or device index)
    pub asic: u64,
    /// Port index on the ASIC
    pub port: i32,
    /// Port width
    pub width: f32,
    /// GPU Direct RDMA support
    pub gdr_support: bool,
    /// Collective network support
    pub coll_support: bool,
}

impl Default for NetInfo {
    fn default() -> Self {
        Self {
            asic: 0,
            port: TOPO_UNDEF,
            width: 0.0,
            gdr_support: false,
            coll_support: false,
        }
    }
}

/// Type-specific data carried by a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeInfo {
    /// GPU data
    Gpu(GpuInfo),
    /// CPU data
    Cpu(CpuInfo),
    /// NET data
    Net(NetInfo),
    /// PCI switches, NVSwitches and NICs carry nothing
    None,
}

/// Path tables, one per target node type
pub type PathTables = [Option<Vec<TopoPath>>; NODE_TYPE_COUNT];

/// A node of the topology graph
#[derive(Debug, Clone, Serialize)]
pub struct Node {
    /// Node type
    pub node_type: NodeType,
    /// Identity, unique within the type
    pub id: u64,
    pub(crate) links: Vec<Link>,
    /// Type-specific data
    pub info: NodeInfo,
    #[serde(skip)]
    pub(crate) paths: PathTables,
}

impl Node {
    pub(crate) fn new(node_type: NodeType, id: u64) -> Self {
        let info = match node_type {
            NodeType::Gpu => NodeInfo::Gpu(GpuInfo::default()),
            NodeType::Cpu => NodeInfo::Cpu(CpuInfo::default()),
            NodeType::Net => NodeInfo::Net(NetInfo::default()),
            _ => NodeInfo::None,
        };
        Self {
            node_type,
            id,
            links: Vec::with_capacity(MAX_LINKS),
            info,
            paths: Default::default(),
        }
    }

    /// Links in non-increasing width order (after canonical sort: PCI up-link last)
    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Path table towards all nodes of `target`, if computed
    pub fn paths(&self, target: NodeType) -> Option<&[TopoPath]> {
        self.paths[target.index()].as_deref()
    }

    /// GPU payload
    pub fn gpu(&self) -> Option<&GpuInfo> {
        match &self.info {
            NodeInfo::Gpu(gpu) => Some(gpu),
            _ => None,
        }
    }

    /// Mutable GPU payload
    pub fn gpu_mut(&mut self) -> Option<&mut GpuInfo> {
        match &mut self.info {
            NodeInfo::Gpu(gpu) => Some(gpu),
            _ => None,
        }
    }

    /// CPU payload
    pub fn cpu(&self) -> Option<&CpuInfo> {
        match &self.info {
            NodeInfo::Cpu(cpu) => Some(cpu),
            _ => None,
        }
    }

    /// Mutable CPU payload
    pub fn cpu_mut(&mut self) -> Option<&mut CpuInfo> {
        match &mut self.info {
            NodeInfo::Cpu(cpu) => Some(cpu),
            _ => None,
        }
    }

    /// NET payload
    pub fn net(&self) -> Option<&NetInfo> {
        match &self.info {
            NodeInfo::Net(net) => Some(net),
            _ => None,
        }
    }

    /// Mutable NET payload
    pub fn net_mut(&mut self) -> Option<&mut NetInfo> {
        match &mut self.info {
            NodeInfo::Net(net) => Some(net),
            _ => None,
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.info {
            NodeInfo::Gpu(gpu) => write!(f, "{}/{:X} ({})", self.node_type, self.id, gpu.rank),
            NodeInfo::Cpu(cpu) => write!(
                f,
                "{}/{:X} ({:?}/{:?}/{:?})",
                self.node_type, self.id, cpu.arch, cpu.vendor, cpu.model
            ),
            NodeInfo::Net(net) => write!(
                f,
                "{}/{:X} ({:x}/{}/{:.1})",
                self.node_type, self.id, net.asic, net.port, net.width
            ),
            NodeInfo::None => write!(f, "{}/{:X}", self.node_type, self.id),
        }
    }
}
