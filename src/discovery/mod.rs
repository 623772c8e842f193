//! Topology discovery
//!
//! Merges a cached hardware description with what the GPU driver, the
//! network transports and the host report, then builds the graph.

mod builder;
mod collab;
#[cfg(test)]
pub(crate) mod fake;

pub use builder::TopologyBuilder;
pub use collab::{
    hash_host_name, host_hash, CommInfo, CpuAttrs, GpuQuery, HostProbe, ListedGpus, NetDevices,
    NetProperties, NvLinkInfo, PciAttrs, PeerInfo, Unavailable, PTR_CUDA, PTR_HOST,
};
