//! Hardware description
//!
//! The attribute tree consumed by topology ingestion, and the functions that
//! fill it from the host.

mod fill;
mod tree;

pub use fill::{fill_gpu, fill_nic, pci_chain};
pub use tree::{HwNode, TOPO_DESC_VERSION};
