//! CPU affinity selection
//!
//! Pins the calling thread to the CPUs of the NUMA domain closest to the GPU
//! of a rank. Closeness comes from the GPU → CPU path table, so the path
//! search must have run before [`set_affinity`].

use super::node::{NodeRef, NodeType};
use super::system::System;
use crate::error::{Result, TopoError};
use crate::system::CpuSet;

/// Operating system seam for reading and applying the thread's CPU mask
pub trait AffinityOs {
    /// Current scheduling mask of the calling thread
    fn current(&self) -> Result<CpuSet>;

    /// Replace the scheduling mask of the calling thread
    fn apply(&self, mask: &CpuSet) -> Result<()>;
}

/// GPU of `rank`, if it is part of the graph
pub fn find_gpu_by_rank(system: &System, rank: i32) -> Option<NodeRef> {
    system
        .nodes(NodeType::Gpu)
        .iter()
        .position(|n| n.gpu().map_or(false, |g| g.rank == rank))
        .map(|index| NodeRef::new(NodeType::Gpu, index))
}

/// CPU with the fewest hops from the GPU of `rank`; ties go to the lowest slot
pub fn select_cpu(system: &System, rank: i32) -> Result<NodeRef> {
    let gpu = find_gpu_by_rank(system, rank).ok_or(TopoError::NoAffinityTarget(rank))?;
    let paths = system
        .node(gpu)?
        .paths(NodeType::Cpu)
        .ok_or(TopoError::PathsNotComputed {
            from: NodeType::Gpu,
            to: NodeType::Cpu,
        })?;

    paths
        .iter()
        .take(system.count(NodeType::Cpu))
        .enumerate()
        .min_by_key(|&(index, path)| (path.count, index))
        .map(|(index, _)| NodeRef::new(NodeType::Cpu, index))
        .ok_or(TopoError::NoAffinityTarget(rank))
}

/// Restrict the calling thread to the CPUs local to the GPU of `rank`.
///
/// The new mask is the intersection of the current mask with the CPU's
/// affinity, or the CPU's affinity alone when `ignore_current` is set. It is
/// applied only if non-empty. Returns the applied mask.
pub fn set_affinity(
    system: &System,
    rank: i32,
    ignore_current: bool,
    os: &dyn AffinityOs,
) -> Result<Option<CpuSet>> {
    let cpu = select_cpu(system, rank)?;
    let cpu_mask = system
        .node(cpu)?
        .cpu()
        .map(|info| info.affinity)
        .unwrap_or_default();

    let current = os.current()?;
    tracing::debug!("Current affinity for rank {}: {}", rank, current);
    tracing::debug!("CPU GPU affinity for rank {}: {}", rank, cpu_mask);

    let mask = if ignore_current {
        cpu_mask
    } else {
        current.intersection(&cpu_mask)
    };

    if mask.is_empty() {
        tracing::debug!("Empty affinity for rank {}, leaving the thread unchanged", rank);
        return Ok(None);
    }

    os.apply(&mask)?;
    tracing::info!("Setting affinity for rank {} to {}", rank, mask);
    Ok(Some(mask))
}
