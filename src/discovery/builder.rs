//! Topology builder
//!
//! Assembles the hardware description of the local host from a cached file
//! and the collaborators, optionally dumps it, then builds the graph.

use super::collab::{CommInfo, GpuQuery, HostProbe, NetDevices, NetProperties, Unavailable, PTR_CUDA};
use crate::config::TopoConfig;
use crate::error::{Result, TopoError};
use crate::hwdesc::{fill_gpu, fill_nic, HwNode};
use crate::system::CpuSet;
use crate::topology::{set_affinity, u64_to_bus_id, AffinityOs, System};

/// Builds the topology graph of the local host
pub struct TopologyBuilder {
    config: TopoConfig,
    net: Option<Box<dyn NetDevices>>,
    coll_net: Option<Box<dyn NetDevices>>,
    gpus: Box<dyn GpuQuery>,
    probe: Box<dyn HostProbe>,
}

impl TopologyBuilder {
    /// Create a builder with no network and no device access
    pub fn new(config: TopoConfig) -> Self {
        Self {
            config,
            net: None,
            coll_net: None,
            gpus: Box::new(Unavailable),
            probe: Box::new(Unavailable),
        }
    }

    /// Set the point-to-point network devices
    pub fn with_net(mut self, net: Box<dyn NetDevices>) -> Self {
        self.net = Some(net);
        self
    }

    /// Set the collective network devices
    pub fn with_coll_net(mut self, coll_net: Box<dyn NetDevices>) -> Self {
        self.coll_net = Some(coll_net);
        self
    }

    /// Set the GPU driver queries
    pub fn with_gpu_query(mut self, gpus: Box<dyn GpuQuery>) -> Self {
        self.gpus = gpus;
        self
    }

    /// Set the host bus/NUMA probe
    pub fn with_host_probe(mut self, probe: Box<dyn HostProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Configuration in use
    pub fn config(&self) -> &TopoConfig {
        &self.config
    }

    /// Build the graph of the local host for `comm.rank`
    pub fn build(&self, comm: &CommInfo) -> Result<System> {
        let desc = self.describe(comm)?;
        System::from_description(&desc)
    }

    /// Pin the calling thread to the CPUs closest to the GPU of `rank`.
    ///
    /// With `ignore_cpu_affinity` set the thread's current mask is replaced
    /// instead of narrowed. `system` needs its GPU → CPU path tables.
    pub fn bind_thread(
        &self,
        system: &System,
        rank: i32,
        os: &dyn AffinityOs,
    ) -> Result<Option<CpuSet>> {
        set_affinity(system, rank, self.config.ignore_cpu_affinity, os)
    }

    /// Produce the merged hardware description without building the graph
    pub fn describe(&self, comm: &CommInfo) -> Result<HwNode> {
        let mut desc = match &self.config.topo_file {
            Some(path) => {
                let desc = HwNode::load(path)?;
                tracing::info!("Loaded topology description from {}", path.display());
                desc
            }
            None => HwNode::system(),
        };
        if desc.name != "system" {
            return Err(TopoError::MissingSystem);
        }

        self.fill_gpus(&mut desc, comm)?;
        if let Some(net) = &self.net {
            self.fill_net(&mut desc, net.as_ref())?;
        }
        if let Some(coll_net) = &self.coll_net {
            self.fill_coll_net(&mut desc, coll_net.as_ref())?;
        }

        if self.config.dumps_for(comm.rank) {
            if let Some(path) = &self.config.dump_file {
                desc.save(path)?;
                tracing::info!("Dumped topology description to {}", path.display());
            }
        }
        Ok(desc)
    }

    /// One GPU entry per rank sharing this host
    fn fill_gpus(&self, desc: &mut HwNode, comm: &CommInfo) -> Result<()> {
        let host_hash = comm.local()?.host_hash;
        for peer in comm.peers.iter().filter(|p| p.host_hash == host_hash) {
            let bus_id = u64_to_bus_id(peer.bus_id);
            let gpu = fill_gpu(desc, &bus_id, self.probe.as_ref(), self.gpus.as_ref())?;
            gpu.set_attr("rank", peer.rank);
            if !gpu.has_attr("gdr") {
                gpu.set_attr("gdr", peer.gdr_support as i32);
            }
            tracing::debug!("Rank {} uses GPU {}", peer.rank, bus_id);
        }
        Ok(())
    }

    fn fill_net(&self, desc: &mut HwNode, net: &dyn NetDevices) -> Result<()> {
        for dev in 0..net.device_count()? {
            let path = device_path(net, dev);
            let xml_net = fill_nic(desc, path.as_deref(), dev, self.probe.as_ref())?;
            xml_net.set_attr("dev", dev);
            if !xml_net.has_attr("gdr") {
                xml_net.set_attr("gdr", gdr_flag(net.ptr_support(dev)?));
            }
            if let Some(properties) = net.properties(dev)? {
                apply_properties(xml_net, &properties);
            }
        }
        Ok(())
    }

    /// Mark collective network devices. GPU Direct is only kept when both
    /// networks support it.
    fn fill_coll_net(&self, desc: &mut HwNode, coll_net: &dyn NetDevices) -> Result<()> {
        for dev in 0..coll_net.device_count()? {
            let path = device_path(coll_net, dev);
            let xml_net = fill_nic(desc, path.as_deref(), dev, self.probe.as_ref())?;
            xml_net.set_attr("coll", 1);
            let mut gdr = gdr_flag(coll_net.ptr_support(dev)?);
            if let Some(p2p_gdr) = xml_net.attr_int("gdr")? {
                gdr = gdr.min(p2p_gdr as i32);
            }
            xml_net.set_attr("gdr", gdr);
        }
        Ok(())
    }
}

/// PCI path of a device; a failed lookup means no PCI device
fn device_path(net: &dyn NetDevices, dev: usize) -> Option<String> {
    match net.pci_path(dev) {
        Ok(path) => path,
        Err(e) => {
            tracing::debug!("No PCI path for network device {}: {}", dev, e);
            None
        }
    }
}

fn gdr_flag(ptr_support: u32) -> i32 {
    i32::from(ptr_support & PTR_CUDA != 0)
}

fn apply_properties(xml_net: &mut HwNode, properties: &NetProperties) {
    let attrs = [
        ("name", properties.name.clone()),
        ("sys_guid", properties.guid.clone()),
        ("link_rate", properties.link_rate.clone()),
        ("speed", properties.speed.map(|s| s.to_string())),
    ];
    for (key, value) in attrs {
        if let Some(value) = value {
            if !xml_net.has_attr(key) {
                xml_net.set_attr(key, value);
            }
        }
    }
}
