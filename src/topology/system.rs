//! Fixed-capacity node registry
//!
//! One node array per [`NodeType`], each bounded by [`MAX_NODES`]. Nodes
//! reference each other through [`NodeRef`] handles, so removing a node has to
//! renumber the handles that point past the removed slot.

use super::node::{
    CpuArch, CpuModel, CpuVendor, Link, LinkKind, Node, NodeRef, NodeType, TopoPath, LOC_WIDTH,
    MAX_LINKS, MAX_NODES, NODE_TYPE_COUNT,
};
use crate::error::{Result, TopoError};
use serde::Serialize;

/// The topology graph of one host
#[derive(Debug, Clone, Serialize)]
pub struct System {
    nodes: [Vec<Node>; NODE_TYPE_COUNT],
    /// Largest link width seen so far
    pub max_width: f32,
}

impl Default for System {
    fn default() -> Self {
        Self::new()
    }
}

impl System {
    /// Create an empty system with all node storage allocated up front
    pub fn new() -> Self {
        Self {
            nodes: std::array::from_fn(|_| Vec::with_capacity(MAX_NODES)),
            max_width: 0.0,
        }
    }

    /// Nodes of one type, in slot order
    pub fn nodes(&self, node_type: NodeType) -> &[Node] {
        &self.nodes[node_type.index()]
    }

    /// Number of nodes of one type
    pub fn count(&self, node_type: NodeType) -> usize {
        self.nodes[node_type.index()].len()
    }

    /// Resolve a handle
    pub fn node(&self, node: NodeRef) -> Result<&Node> {
        self.nodes[node.node_type.index()]
            .get(node.index)
            .ok_or(TopoError::InvalidNode {
                node_type: node.node_type,
                index: node.index,
            })
    }

    /// Resolve a handle mutably
    pub fn node_mut(&mut self, node: NodeRef) -> Result<&mut Node> {
        self.nodes[node.node_type.index()]
            .get_mut(node.index)
            .ok_or(TopoError::InvalidNode {
                node_type: node.node_type,
                index: node.index,
            })
    }

    /// Find a node by identity. A miss is a normal outcome.
    pub fn get_node(&self, node_type: NodeType, id: u64) -> Option<NodeRef> {
        self.nodes[node_type.index()]
            .iter()
            .position(|n| n.id == id)
            .map(|index| NodeRef::new(node_type, index))
    }

    /// Append a new node. GPUs start with a loopback link to themselves.
    pub fn create_node(&mut self, node_type: NodeType, id: u64) -> Result<NodeRef> {
        let nodes = &mut self.nodes[node_type.index()];
        if nodes.len() == MAX_NODES {
            tracing::warn!("Tried to create too many nodes of type {}", node_type);
            return Err(TopoError::CapacityExceeded {
                node_type,
                capacity: MAX_NODES,
            });
        }

        let node_ref = NodeRef::new(node_type, nodes.len());
        let mut node = Node::new(node_type, id);
        if node_type == NodeType::Gpu {
            // Used in some corner cases by path search
            node.links.push(Link {
                kind: LinkKind::Loc,
                width: LOC_WIDTH,
                remote: node_ref,
            });
        }
        nodes.push(node);
        Ok(node_ref)
    }

    /// Look up a node, creating it if absent. Returns whether it was created.
    pub fn get_or_create_node(&mut self, node_type: NodeType, id: u64) -> Result<(NodeRef, bool)> {
        match self.get_node(node_type, id) {
            Some(node) => Ok((node, false)),
            None => Ok((self.create_node(node_type, id)?, true)),
        }
    }

    /// Add `width` to the `from → to` link of `kind`, creating it if needed.
    ///
    /// Repeated connections aggregate into one entry (e.g. several NVLink
    /// lanes to the same peer). Only the touched entry moves, one backward
    /// insertion pass, so the list stays sorted by non-increasing width.
    pub fn connect_nodes(
        &mut self,
        from: NodeRef,
        to: NodeRef,
        kind: LinkKind,
        width: f32,
    ) -> Result<()> {
        self.node(to)?;
        let node = self.node_mut(from)?;

        let mut pos = match node
            .links
            .iter()
            .position(|l| l.remote == to && l.kind == kind)
        {
            Some(pos) => pos,
            None => {
                if node.links.len() == MAX_LINKS {
                    return Err(TopoError::LinkCapacityExceeded {
                        node_type: node.node_type,
                        id: node.id,
                        capacity: MAX_LINKS,
                    });
                }
                node.links.push(Link {
                    kind,
                    width: 0.0,
                    remote: to,
                });
                node.links.len() - 1
            }
        };
        node.links[pos].width += width;
        let new_width = node.links[pos].width;

        while pos > 0 && node.links[pos - 1].width < new_width {
            node.links.swap(pos - 1, pos);
            pos -= 1;
        }

        if kind != LinkKind::Loc && new_width > self.max_width {
            self.max_width = new_width;
        }
        Ok(())
    }

    /// Store the path table computed by the path search for `node → target type`
    pub fn set_paths(&mut self, node: NodeRef, target: NodeType, paths: Vec<TopoPath>) -> Result<()> {
        self.node_mut(node)?.paths[target.index()] = Some(paths);
        Ok(())
    }

    /// Remove the node at `index` of `node_type`.
    ///
    /// Every link pointing at it is dropped, and every handle to a same-type
    /// node at a higher slot is decremented to follow the compaction.
    pub fn remove_node(&mut self, node_type: NodeType, index: usize) -> Result<()> {
        if index >= self.count(node_type) {
            return Err(TopoError::InvalidNode { node_type, index });
        }
        let removed = NodeRef::new(node_type, index);

        for t in NodeType::ALL {
            for (n, node) in self.nodes[t.index()].iter_mut().enumerate() {
                if t == node_type && n == index {
                    continue;
                }
                node.links.retain(|l| l.remote != removed);
                for link in node.links.iter_mut() {
                    if link.remote.node_type == node_type && link.remote.index > index {
                        link.remote.index -= 1;
                    }
                }
                if let Some(paths) = node.paths[node_type.index()].as_mut() {
                    if index < paths.len() {
                        paths.remove(index);
                    }
                }
            }
        }

        // Path tables go with the node
        self.nodes[node_type.index()].remove(index);
        tracing::debug!("Removed {} from topology", removed);
        Ok(())
    }

    /// Architecture, vendor and model of the first CPU
    pub fn cpu_type(&self) -> Option<(CpuArch, CpuVendor, CpuModel)> {
        self.nodes(NodeType::Cpu)
            .first()
            .and_then(|n| n.cpu())
            .map(|cpu| (cpu.arch, cpu.vendor, cpu.model))
    }

    /// Number of network ports usable by the collective network
    pub fn coll_net_device_count(&self) -> usize {
        self.nodes(NodeType::Net)
            .iter()
            .filter(|n| n.net().map_or(false, |net| net.coll_support))
            .count()
    }

    /// Log the graph as a tree rooted at each CPU.
    ///
    /// PCI links are followed downward; every other link is printed as a leaf.
    pub fn print(&self) {
        tracing::info!("=== System : maxWidth {:.1} ===", self.max_width);
        for line in self.tree_lines() {
            tracing::info!("{}", line);
        }
        tracing::info!("==========================================");
    }

    /// Lines of the tree dump used by [`System::print`]
    pub fn tree_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for index in 0..self.count(NodeType::Cpu) {
            self.tree_lines_rec(NodeRef::new(NodeType::Cpu, index), None, String::new(), &mut lines);
        }
        lines
    }

    fn tree_lines_rec(
        &self,
        node_ref: NodeRef,
        prev: Option<NodeRef>,
        prefix: String,
        lines: &mut Vec<String>,
    ) {
        let Ok(node) = self.node(node_ref) else {
            return;
        };
        lines.push(format!("{}{}", prefix, node));
        let indent = " ".repeat(prefix.chars().count());

        for link in node.links() {
            if link.kind == LinkKind::Loc {
                continue;
            }
            if link.kind == LinkKind::Pci && Some(link.remote) == prev {
                continue;
            }
            let head = format!("{}+ {}[{:.1}] - ", indent, link.kind, link.width);
            if link.kind == LinkKind::Pci {
                self.tree_lines_rec(link.remote, Some(node_ref), head, lines);
            } else if let Ok(remote) = self.node(link.remote) {
                lines.push(format!("{}{}", head, remote));
            }
        }
    }
}
