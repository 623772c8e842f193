//! Inter-socket links and canonical link order

use super::node::{
    CpuArch, CpuInfo, CpuModel, CpuVendor, LinkKind, NodeRef, NodeType, ARM_WIDTH, LOC_WIDTH,
    P9_WIDTH, QPI_WIDTH, SKL_QPI_WIDTH,
};
use super::system::System;
use crate::error::Result;

/// Width of the inter-socket link leaving a CPU of this kind
pub fn inter_cpu_width(cpu: &CpuInfo) -> f32 {
    match (cpu.arch, cpu.vendor, cpu.model) {
        (CpuArch::Power, _, _) => P9_WIDTH,
        (CpuArch::Arm, _, _) => ARM_WIDTH,
        (CpuArch::X86, CpuVendor::Intel, CpuModel::Skylake) => SKL_QPI_WIDTH,
        (CpuArch::X86, CpuVendor::Intel, _) => QPI_WIDTH,
        _ => LOC_WIDTH,
    }
}

/// Connect every ordered pair of distinct CPUs with a `Sys` link
pub fn connect_cpus(system: &mut System) -> Result<()> {
    let count = system.count(NodeType::Cpu);
    for n in 0..count {
        let from = NodeRef::new(NodeType::Cpu, n);
        let width = system.node(from)?.cpu().map_or(LOC_WIDTH, inter_cpu_width);
        for p in (0..count).filter(|&p| p != n) {
            system.connect_nodes(from, NodeRef::new(NodeType::Cpu, p), LinkKind::Sys, width)?;
        }
    }
    Ok(())
}

/// Put the PCI link back to the parent last on every node below each CPU.
///
/// Path search relies on this to walk downward first.
pub fn sort_system(system: &mut System) -> Result<()> {
    for n in 0..system.count(NodeType::Cpu) {
        sort_rec(system, NodeRef::new(NodeType::Cpu, n), None)?;
    }
    Ok(())
}

fn sort_rec(system: &mut System, node_ref: NodeRef, up: Option<NodeRef>) -> Result<()> {
    let node = system.node_mut(node_ref)?;
    if let Some(up) = up {
        if let Some(pos) = node
            .links
            .iter()
            .position(|l| l.kind == LinkKind::Pci && l.remote == up)
        {
            node.links[pos..].rotate_left(1);
        }
    }

    let children: Vec<NodeRef> = node
        .links
        .iter()
        .filter(|l| l.kind == LinkKind::Pci && Some(l.remote) != up)
        .map(|l| l.remote)
        .collect();
    for child in children {
        sort_rec(system, child, Some(node_ref))?;
    }
    Ok(())
}
