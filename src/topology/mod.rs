//! Topology graph
//!
//! Builds the typed node/link graph of one host from a hardware description:
//! - `ingest`: CPUs, PCI switches, GPUs, NICs and network ports
//! - `nvlink`: NVLinks between GPUs, NVSwitches and CPUs
//! - [`fabric`]: inter-socket links and canonical link ordering
//! - [`affinity`]: thread pinning to the CPUs closest to a rank's GPU

pub mod affinity;
pub mod busid;
pub mod fabric;
mod ingest;
pub mod node;
mod nvlink;
pub mod system;
pub mod tables;

pub use affinity::{find_gpu_by_rank, select_cpu, set_affinity, AffinityOs};
pub use busid::{bus_id_key, bus_id_to_u64, ib_guid_to_u64, pci_path_to_key, u64_to_bus_id};
pub use node::{
    CpuArch, CpuInfo, CpuModel, CpuVendor, GpuInfo, Link, LinkKind, NetInfo, Node, NodeInfo,
    NodeRef, NodeType, PathKind, TopoPath, LOC_WIDTH, MAX_LINKS, MAX_NODES, PCI_WIDTH,
};
pub use nvlink::find_local_cpu;
pub use system::System;
