//! NVLink pass
//!
//! Runs after PCI ingestion, once every GPU node exists, so `nvlink` entries
//! can resolve their targets regardless of document order.

use super::busid::bus_id_key;
use super::node::{LinkKind, NodeRef, NodeType, PASCAL_NVLINK_WIDTH, VOLTA_NVLINK_WIDTH};
use super::system::System;
use super::tables::{PciClass, PCI_CLASS};
use crate::error::{Result, TopoError};
use crate::hwdesc::HwNode;
use std::collections::{HashSet, VecDeque};

/// Walk the description and add every NVLink.
///
/// `parent_bus_id` is the bus id of the closest enclosing element that has
/// one; for an `nvlink` element that is its GPU.
pub(crate) fn add_nvlinks(
    system: &mut System,
    node: &HwNode,
    parent_bus_id: Option<&str>,
) -> Result<()> {
    if node.name == "nvlink" {
        return add_nvlink(system, node, parent_bus_id);
    }

    // GPUs outside the job are not in the graph, neither are their links
    if node.name == "gpu" && !node.has_attr("rank") {
        return Ok(());
    }

    let bus_id = node.attr("busid").or(parent_bus_id);
    for sub in &node.subs {
        add_nvlinks(system, sub, bus_id)?;
    }
    Ok(())
}

fn add_nvlink(system: &mut System, xml_nvlink: &HwNode, parent_bus_id: Option<&str>) -> Result<()> {
    let bus_id = parent_bus_id
        .ok_or_else(|| TopoError::UnresolvedNvLink("nvlink outside of a GPU".to_string()))?;
    let gpu = system
        .get_node(NodeType::Gpu, bus_id_key(bus_id)?)
        .ok_or_else(|| TopoError::UnresolvedNvLink(format!("could not find GPU {}", bus_id)))?;

    let count = xml_nvlink.require_int("count")?;
    let target_class = PCI_CLASS.resolve(Some(xml_nvlink.require_attr("tclass")?));

    let remote = match target_class {
        PciClass::Gpu => {
            let target = xml_nvlink.require_attr("target")?;
            match system.get_node(NodeType::Gpu, bus_id_key(target)?) {
                Some(remote) => remote,
                None => {
                    // Peer GPU not in this job
                    tracing::debug!("Skipping NVLink {} -> {}: target not in topology", bus_id, target);
                    return Ok(());
                }
            }
        }
        PciClass::Cpu => find_local_cpu(system, gpu)?.ok_or_else(|| {
            TopoError::UnresolvedNvLink(format!("no CPU reachable from GPU {}", bus_id))
        })?,
        _ => match system.nodes(NodeType::Nvs).first() {
            Some(_) => NodeRef::new(NodeType::Nvs, 0),
            None => system.create_node(NodeType::Nvs, 0)?,
        },
    };

    let sm = system
        .node(gpu)?
        .gpu()
        .map_or(0, |info| info.cuda_comp_cap);
    let lane_width = if sm == 60 {
        PASCAL_NVLINK_WIDTH
    } else {
        VOLTA_NVLINK_WIDTH
    };
    let width = count as f32 * lane_width;

    system.connect_nodes(gpu, remote, LinkKind::NvLink, width)?;
    // GPU targets list the link from their own side
    if remote.node_type != NodeType::Gpu {
        system.connect_nodes(remote, gpu, LinkKind::NvLink, width)?;
    }
    Ok(())
}

/// Nearest CPU reachable from `start` over PCI links, breadth first
pub fn find_local_cpu(system: &System, start: NodeRef) -> Result<Option<NodeRef>> {
    let mut visited = HashSet::from([start]);
    let mut queue = VecDeque::from([start]);

    while let Some(current) = queue.pop_front() {
        if current.node_type == NodeType::Cpu {
            return Ok(Some(current));
        }
        for link in system.node(current)?.links() {
            if link.kind == LinkKind::Pci && visited.insert(link.remote) {
                queue.push_back(link.remote);
            }
        }
    }
    Ok(None)
}
