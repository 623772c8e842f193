//! # GpuTopo - Interconnect Topology Discovery for Multi-GPU Hosts
//!
//! GpuTopo builds a typed graph of the hardware a collective communication
//! library has to route over: CPU sockets, PCI switches, GPUs, NICs, NVLink
//! switches and network ports, joined by links annotated with bandwidth.
//!
//! ## Features
//!
//! - **Hardware Descriptions**: JSON attribute trees that can be cached, edited and reloaded
//! - **Host Discovery**: Fills missing elements from sysfs and the GPU and network drivers
//! - **Graph Building**: Bounded node arenas with bandwidth-ordered link lists
//! - **NVLink Resolution**: GPU peers, NVSwitches and CPU attachments
//! - **CPU Affinity**: Pins the calling thread to the socket closest to a GPU
//!
//! ## Quick Start
//!
//! ```no_run
//! use gputopo::hwdesc::HwNode;
//! use gputopo::topology::System;
//! use std::path::Path;
//!
//! let desc = HwNode::load(Path::new("/etc/gputopo/node.json")).unwrap();
//! let system = System::from_description(&desc).unwrap();
//!
//! system.print();
//! ```
//!
//! ## Discovery
//!
//! ```no_run
//! use gputopo::config::TopoConfig;
//! use gputopo::discovery::{host_hash, CommInfo, ListedGpus, PeerInfo};
//! use gputopo::system::{SysfsNet, SysfsProbe};
//! use gputopo::topology::bus_id_to_u64;
//! use gputopo::TopologyBuilder;
//!
//! let comm = CommInfo {
//!     rank: 0,
//!     peers: vec![PeerInfo {
//!         rank: 0,
//!         host_hash: host_hash().unwrap(),
//!         bus_id: bus_id_to_u64("0000:3b:00.0").unwrap(),
//!         gdr_support: false,
//!     }],
//! };
//!
//! let builder = TopologyBuilder::new(TopoConfig::default())
//!     .with_host_probe(Box::new(SysfsProbe::new()))
//!     .with_gpu_query(Box::new(ListedGpus::new(&["0000:3b:00.0"], 80).unwrap()))
//!     .with_net(Box::new(SysfsNet::new().unwrap()));
//!
//! let system = builder.build(&comm).unwrap();
//! println!("{} GPUs", system.count(gputopo::topology::NodeType::Gpu));
//! ```
//!
//! ## CPU Affinity
//!
//! ```no_run
//! use gputopo::system::ThreadAffinity;
//! use gputopo::topology::{set_affinity, System};
//!
//! # let system = System::new();
//! // Needs path counts from CPU nodes to the GPU
//! if let Some(mask) = set_affinity(&system, 0, false, &ThreadAffinity).unwrap() {
//!     println!("Pinned to CPUs {}", mask.to_list_string());
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod discovery;
pub mod error;
pub mod hwdesc;
pub mod system;
pub mod topology;

// Re-export commonly used types
pub use config::TopoConfig;
pub use discovery::TopologyBuilder;
pub use error::{Result, TopoError};
pub use hwdesc::HwNode;
pub use topology::{NodeRef, NodeType, System};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    //! Convenient re-exports for common usage
    //!
    //! ```no_run
    //! use gputopo::prelude::*;
    //! ```

    pub use crate::config::{OutputFormat, TopoConfig};
    pub use crate::discovery::{CommInfo, GpuQuery, HostProbe, NetDevices, PeerInfo, TopologyBuilder};
    pub use crate::error::{Result, TopoError};
    pub use crate::hwdesc::HwNode;
    pub use crate::system::{CpuSet, SysfsNet, SysfsProbe, ThreadAffinity};
    pub use crate::topology::{
        select_cpu, set_affinity, AffinityOs, Link, LinkKind, Node, NodeRef, NodeType, System,
    };
}
