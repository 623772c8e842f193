//! Host system access
//!
//! CPU sets and thread affinity, and the sysfs-backed probes used to
//! describe the local host.

pub mod numa;
pub mod sysfs;

pub use numa::{read_node_cpus, CpuSet, ThreadAffinity, MAX_CPUS};
pub use sysfs::{SysfsNet, SysfsProbe};
