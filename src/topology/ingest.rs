//! Hardware description ingestion
//!
//! Walks a [`HwNode`] tree and populates a [`System`]. Every element is
//! get-or-create, so a device reached twice (e.g. a NIC merged from two
//! ports) yields one node, and it is connected to its parent only the first
//! time so revisits never inflate link widths.

use super::busid::{bus_id_key, ib_guid_to_u64};
use super::fabric::{connect_cpus, sort_system};
use super::node::{
    CpuArch, CpuModel, CpuVendor, LinkKind, NodeRef, NodeType, LOC_WIDTH,
};
use super::nvlink::add_nvlinks;
use super::system::System;
use super::tables::{
    PciClass, CPU_ARCH, CPU_VENDOR, DEFAULT_PCI_LANES, DEFAULT_PCI_SPEED, PCI_CLASS, PCI_GEN,
};
use crate::error::{Result, TopoError};
use crate::hwdesc::HwNode;
use crate::system::CpuSet;

/// Network port speed when nothing is reported, in Mbps
const DEFAULT_NET_MBPS: i64 = 10_000;

impl System {
    /// Build the full graph from a hardware description.
    ///
    /// Runs the PCI/NUMA ingestion, then the NVLink pass, then connects the
    /// CPUs and applies the canonical link order. Any error aborts the build.
    pub fn from_description(desc: &HwNode) -> Result<System> {
        let top = desc.find("system").ok_or(TopoError::MissingSystem)?;
        let mut system = System::new();

        for sub in top.subs.iter().filter(|s| s.name == "cpu") {
            add_cpu(&mut system, sub)?;
        }
        add_nvlinks(&mut system, top, None)?;
        connect_cpus(&mut system)?;
        sort_system(&mut system)?;

        tracing::debug!(
            "Built topology: {} CPU, {} PCI, {} GPU, {} NIC, {} NET, {} NVS",
            system.count(NodeType::Cpu),
            system.count(NodeType::Pci),
            system.count(NodeType::Gpu),
            system.count(NodeType::Nic),
            system.count(NodeType::Net),
            system.count(NodeType::Nvs),
        );
        Ok(system)
    }
}

/// Ingest one `cpu` element and everything below it
pub(crate) fn add_cpu(system: &mut System, xml_cpu: &HwNode) -> Result<NodeRef> {
    let numa_id = xml_cpu.require_int("numaid")?;
    let (cpu, _) = system.get_or_create_node(NodeType::Cpu, numa_id as u64)?;

    let affinity = xml_cpu.attr("affinity").map(CpuSet::parse_mask).transpose()?;
    let arch = CPU_ARCH.resolve(xml_cpu.attr("arch"));
    let mut vendor = CpuVendor::Undefined;
    let mut model = CpuModel::Undefined;
    if arch == CpuArch::X86 {
        vendor = CPU_VENDOR.resolve(xml_cpu.attr("vendor"));
        if vendor == CpuVendor::Intel {
            let family_id = xml_cpu.require_int("familyid")?;
            let model_id = xml_cpu.require_int("modelid")?;
            model = if family_id == 6 && model_id >= 0x55 {
                CpuModel::Skylake
            } else {
                CpuModel::Broadwell
            };
        }
    }

    if let Some(info) = system.node_mut(cpu)?.cpu_mut() {
        if let Some(affinity) = affinity {
            info.affinity = affinity;
        }
        info.arch = arch;
        info.vendor = vendor;
        info.model = model;
    }

    for sub in &xml_cpu.subs {
        match sub.name.as_str() {
            "pci" => add_pci(system, sub, cpu)?,
            "nic" => {
                let id = sub.require_int("id")?;
                let (nic, created) = system.get_or_create_node(NodeType::Nic, id as u64)?;
                if created {
                    system.connect_nodes(cpu, nic, LinkKind::Pci, LOC_WIDTH)?;
                    system.connect_nodes(nic, cpu, LinkKind::Pci, LOC_WIDTH)?;
                }
                add_nic(system, sub, nic)?;
            }
            _ => {}
        }
    }
    Ok(cpu)
}

/// Ingest one `pci` element under `parent`
pub(crate) fn add_pci(system: &mut System, xml_pci: &HwNode, parent: NodeRef) -> Result<()> {
    let class_str = xml_pci.require_attr("class")?;
    let class = PCI_CLASS.resolve(Some(class_str));
    let bus_id = bus_id_key(xml_pci.require_attr("busid")?)?;

    let (node, created) = match class {
        PciClass::Gpu => {
            let Some(xml_gpu) = xml_pci.sub("gpu") else {
                return Ok(());
            };
            if !xml_gpu.has_attr("rank") {
                // Not part of this job
                tracing::debug!("Skipping GPU {:x} without rank", bus_id);
                return Ok(());
            }
            let (gpu, created) = system.get_or_create_node(NodeType::Gpu, bus_id)?;
            add_gpu(system, xml_gpu, gpu)?;
            (gpu, created)
        }
        PciClass::Nic => {
            let Some(xml_nic) = xml_pci.sub("nic") else {
                return Ok(());
            };
            // Ports of a multi-port NIC share the upstream PCI link
            let (nic, created) = system.get_or_create_node(NodeType::Nic, bus_id)?;
            add_nic(system, xml_nic, nic)?;
            (nic, created)
        }
        PciClass::Bridge => {
            let (pci, created) = system.get_or_create_node(NodeType::Pci, bus_id)?;
            for sub in &xml_pci.subs {
                add_pci(system, sub, pci)?;
            }
            (pci, created)
        }
        _ => {
            tracing::debug!("Ignoring PCI device {:x} of class {}", bus_id, class_str);
            return Ok(());
        }
    };

    if created {
        let width = pci_link_width(xml_pci)?;
        system.connect_nodes(node, parent, LinkKind::Pci, width)?;
        system.connect_nodes(parent, node, LinkKind::Pci, width)?;
    }
    Ok(())
}

/// Width of the upstream link of a PCI element: lanes × per-lane rate / 80
pub(crate) fn pci_link_width(xml_pci: &HwNode) -> Result<f32> {
    let mut lanes = xml_pci.attr_int("link_width")?.unwrap_or(0);
    if lanes <= 0 {
        lanes = DEFAULT_PCI_LANES;
    }

    let speed_str = match xml_pci.attr("link_speed").map(str::trim) {
        None | Some("") => DEFAULT_PCI_SPEED,
        Some(s) if s.eq_ignore_ascii_case("Unknown speed") || s.eq_ignore_ascii_case("unknown") => {
            DEFAULT_PCI_SPEED
        }
        Some(s) => s,
    };
    let speed = PCI_GEN.get(speed_str).unwrap_or_else(|| {
        tracing::debug!(
            "Unknown PCI speed '{}', falling back to {}",
            speed_str,
            DEFAULT_PCI_SPEED
        );
        PCI_GEN.resolve(Some(DEFAULT_PCI_SPEED))
    });

    Ok(lanes.saturating_mul(speed) as f32 / 80.0)
}

/// Copy the GPU attributes. NVLinks are added in a second pass.
pub(crate) fn add_gpu(system: &mut System, xml_gpu: &HwNode, gpu: NodeRef) -> Result<()> {
    let sm = xml_gpu.require_int("sm")? as i32;
    let rank = xml_gpu.require_int("rank")? as i32;
    let dev = xml_gpu.require_int("dev")? as i32;
    let gdr = xml_gpu.attr_int("gdr")?.unwrap_or(0) != 0;

    if let Some(info) = system.node_mut(gpu)?.gpu_mut() {
        info.cuda_comp_cap = sm;
        info.rank = rank;
        info.dev = dev;
        info.gdr_support = gdr;
    }
    Ok(())
}

/// Attach the `net` ports of a `nic` element, numbering them after any
/// ports the NIC already has.
pub(crate) fn add_nic(system: &mut System, xml_nic: &HwNode, nic: NodeRef) -> Result<()> {
    let mut port = system
        .node(nic)?
        .links()
        .iter()
        .filter(|l| l.remote.node_type == NodeType::Net)
        .count() as i32;

    for xml_net in xml_nic.subs.iter().filter(|s| s.name == "net") {
        if !xml_net.has_attr("dev") {
            continue;
        }
        if add_net(system, xml_net, nic, port)? {
            port += 1;
        }
    }
    Ok(())
}

/// Ingest one `net` port. Returns false if the port already existed.
pub(crate) fn add_net(system: &mut System, xml_net: &HwNode, nic: NodeRef, port: i32) -> Result<bool> {
    let dev = xml_net.require_int("dev")?;
    let (net, created) = system.get_or_create_node(NodeType::Net, dev as u64)?;
    if !created {
        tracing::debug!("NET {} already attached, skipping", dev);
        return Ok(false);
    }

    let asic = match xml_net.attr("sys_guid") {
        Some(guid) => ib_guid_to_u64(guid)?,
        None => dev as u64,
    };

    let link_rate_mbps = xml_net
        .attr("link_rate")
        .and_then(leading_int)
        .map(|gbps| gbps * 1000)
        .filter(|&mbps| mbps > 0);
    let speed_mbps = xml_net
        .attr("speed")
        .and_then(leading_int)
        .filter(|&mbps| mbps > 0);
    let mbps = link_rate_mbps.or(speed_mbps).unwrap_or(DEFAULT_NET_MBPS);
    let width = mbps as f32 / 8000.0;

    let gdr = xml_net.attr_int("gdr")?.unwrap_or(0) != 0;
    let coll = xml_net.attr_int("coll")?.unwrap_or(0) != 0;

    if let Some(info) = system.node_mut(net)?.net_mut() {
        info.asic = asic;
        info.port = port;
        info.width = width;
        info.gdr_support = gdr;
        info.coll_support = coll;
    }

    system.connect_nodes(nic, net, LinkKind::Net, width)?;
    system.connect_nodes(net, nic, LinkKind::Net, width)?;
    Ok(true)
}

/// Leading decimal integer of a string ("100 Gb/sec (4X EDR)" → 100)
fn leading_int(s: &str) -> Option<i64> {
    let digits: String = s.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::node::{CpuModel, PCI_WIDTH};

    fn pci(class: &str, bus_id: &str) -> HwNode {
        HwNode::new("pci")
            .with_attr("class", class)
            .with_attr("busid", bus_id)
            .with_attr("link_width", 16)
            .with_attr("link_speed", "8 GT/s")
    }

    fn gpu(rank: i32, sm: i32) -> HwNode {
        HwNode::new("gpu")
            .with_attr("dev", rank)
            .with_attr("rank", rank)
            .with_attr("sm", sm)
            .with_attr("gdr", 1)
    }

    fn scenario() -> HwNode {
        HwNode::system().with_sub(
            HwNode::new("cpu")
                .with_attr("numaid", 0)
                .with_attr("arch", "x86_64")
                .with_attr("vendor", "GenuineIntel")
                .with_attr("familyid", 6)
                .with_attr("modelid", 85)
                .with_attr("affinity", "0000ffff")
                .with_sub(
                    pci("0x060400", "0000:00:02.0")
                        .with_sub(pci("0x030200", "0000:02:00.0").with_sub(gpu(0, 80))),
                ),
        )
    }

    fn link_width(system: &System, from: NodeRef, to: NodeRef) -> Option<f32> {
        system
            .node(from)
            .unwrap()
            .links()
            .iter()
            .find(|l| l.remote == to)
            .map(|l| l.width)
    }

    #[test]
    fn test_single_gpu_scenario() {
        let system = System::from_description(&scenario()).unwrap();

        let cpu = system.get_node(NodeType::Cpu, 0).unwrap();
        let sw = system.get_node(NodeType::Pci, 0x20).unwrap();
        let gpu = system.get_node(NodeType::Gpu, 0x2000).unwrap();

        assert_eq!(link_width(&system, cpu, sw), Some(PCI_WIDTH));
        assert_eq!(link_width(&system, sw, gpu), Some(12.0));
        assert_eq!(link_width(&system, gpu, sw), Some(12.0));
        assert_eq!(link_width(&system, gpu, gpu), Some(LOC_WIDTH));
        assert!(link_width(&system, cpu, gpu).is_none());

        let info = system.node(gpu).unwrap().gpu().unwrap();
        assert_eq!(info.rank, 0);
        assert_eq!(info.cuda_comp_cap, 80);
        assert!(info.gdr_support);

        let cpu_info = system.node(cpu).unwrap().cpu().unwrap();
        assert_eq!(cpu_info.model, CpuModel::Skylake);
        assert_eq!(cpu_info.affinity.count(), 16);
        assert_eq!(system.max_width, 12.0);
    }

    #[test]
    fn test_pci_width_defaults() {
        let explicit = pci("0x060400", "0000:00:02.0");
        assert_eq!(pci_link_width(&explicit).unwrap(), 12.0);

        let bare = HwNode::new("pci");
        assert_eq!(pci_link_width(&bare).unwrap(), 12.0);

        let unknown = HwNode::new("pci")
            .with_attr("link_width", 0)
            .with_attr("link_speed", "Unknown speed");
        assert_eq!(pci_link_width(&unknown).unwrap(), 12.0);

        let gen4_x8 = HwNode::new("pci")
            .with_attr("link_width", 8)
            .with_attr("link_speed", "16 GT/s");
        assert_eq!(pci_link_width(&gen4_x8).unwrap(), 12.0);

        let gen2_x4 = HwNode::new("pci")
            .with_attr("link_width", 4)
            .with_attr("link_speed", "5 GT/s");
        assert_eq!(pci_link_width(&gen2_x4).unwrap(), 1.5);

        let absurd = HwNode::new("pci").with_attr("link_width", i64::MAX);
        let width = pci_link_width(&absurd).unwrap();
        assert!(width.is_finite() && width > 0.0);
    }

    #[test]
    fn test_pci_functions_merge() {
        let desc = HwNode::system().with_sub(
            HwNode::new("cpu")
                .with_attr("numaid", 0)
                .with_sub(pci("0x060400", "0000:00:02.0"))
                .with_sub(pci("0x060400", "0000:00:02.1")),
        );
        let system = System::from_description(&desc).unwrap();
        assert_eq!(system.count(NodeType::Pci), 1);
        let cpu = system.get_node(NodeType::Cpu, 0).unwrap();
        let sw = system.get_node(NodeType::Pci, 0x20).unwrap();
        // Connected once, not twice
        assert_eq!(link_width(&system, cpu, sw), Some(12.0));
    }

    #[test]
    fn test_gpu_without_rank_skipped() {
        let desc = HwNode::system().with_sub(
            HwNode::new("cpu").with_attr("numaid", 0).with_sub(
                pci("0x030200", "0000:02:00.0").with_sub(
                    HwNode::new("gpu").with_attr("dev", 0).with_attr("sm", 70),
                ),
            ),
        );
        let system = System::from_description(&desc).unwrap();
        assert_eq!(system.count(NodeType::Gpu), 0);
    }

    #[test]
    fn test_gpu_missing_sm_is_fatal() {
        let desc = HwNode::system().with_sub(
            HwNode::new("cpu").with_attr("numaid", 0).with_sub(
                pci("0x030200", "0000:02:00.0").with_sub(
                    HwNode::new("gpu").with_attr("dev", 0).with_attr("rank", 0),
                ),
            ),
        );
        let err = System::from_description(&desc).unwrap_err();
        assert!(matches!(err, TopoError::MissingAttribute { ref attr, .. } if attr == "sm"));
    }

    #[test]
    fn test_missing_numaid_is_fatal() {
        let desc = HwNode::system().with_sub(HwNode::new("cpu"));
        assert!(System::from_description(&desc).is_err());
        assert!(matches!(
            System::from_description(&HwNode::new("cpu")),
            Err(TopoError::MissingSystem)
        ));
    }

    #[test]
    fn test_cpu_models() {
        let cases = [
            ("x86_64", "GenuineIntel", 6, 0x4f, CpuArch::X86, CpuVendor::Intel, CpuModel::Broadwell),
            ("x86_64", "GenuineIntel", 6, 0x55, CpuArch::X86, CpuVendor::Intel, CpuModel::Skylake),
            ("x86_64", "AuthenticAMD", 23, 1, CpuArch::X86, CpuVendor::Amd, CpuModel::Undefined),
            ("ppc64", "", 0, 0, CpuArch::Power, CpuVendor::Undefined, CpuModel::Undefined),
            ("sparc", "", 0, 0, CpuArch::Undefined, CpuVendor::Undefined, CpuModel::Undefined),
        ];
        for (arch, vendor, family, model, e_arch, e_vendor, e_model) in cases {
            let desc = HwNode::system().with_sub(
                HwNode::new("cpu")
                    .with_attr("numaid", 0)
                    .with_attr("arch", arch)
                    .with_attr("vendor", vendor)
                    .with_attr("familyid", family)
                    .with_attr("modelid", model),
            );
            let system = System::from_description(&desc).unwrap();
            assert_eq!(system.cpu_type(), Some((e_arch, e_vendor, e_model)), "{}", arch);
        }
    }

    #[test]
    fn test_multi_port_nic() {
        let nic_pci = |bus_id: &str, dev: i32, rate: &str| {
            pci("0x020700", bus_id).with_sub(
                HwNode::new("nic").with_sub(
                    HwNode::new("net")
                        .with_attr("dev", dev)
                        .with_attr("link_rate", rate)
                        .with_attr("sys_guid", "0002:c903:00a1:b2c4")
                        .with_attr("gdr", 1)
                        .with_attr("coll", 1),
                ),
            )
        };
        let desc = HwNode::system().with_sub(
            HwNode::new("cpu")
                .with_attr("numaid", 0)
                .with_sub(nic_pci("0000:5e:00.0", 0, "100 Gb/sec (4X EDR)"))
                .with_sub(nic_pci("0000:5e:00.1", 1, "100 Gb/sec (4X EDR)")),
        );
        let system = System::from_description(&desc).unwrap();
        assert_eq!(system.count(NodeType::Nic), 1);
        assert_eq!(system.count(NodeType::Net), 2);

        let ports: Vec<i32> = system
            .nodes(NodeType::Net)
            .iter()
            .map(|n| n.net().unwrap().port)
            .collect();
        assert_eq!(ports, vec![0, 1]);

        let net = system.nodes(NodeType::Net)[0].net().unwrap();
        assert_eq!(net.width, 12.5);
        assert_eq!(net.asic, 0x0002_c903_00a1_b2c4);
        assert!(net.gdr_support);
        assert_eq!(system.coll_net_device_count(), 2);
    }

    #[test]
    fn test_net_bandwidth_fallbacks() {
        let desc = HwNode::system().with_sub(
            HwNode::new("cpu").with_attr("numaid", 0).with_sub(
                HwNode::new("nic")
                    .with_attr("id", 7)
                    .with_sub(HwNode::new("net").with_attr("dev", 0).with_attr("speed", 25000))
                    .with_sub(HwNode::new("net").with_attr("dev", 1))
                    .with_sub(HwNode::new("net").with_attr("speed", 1000)),
            ),
        );
        let system = System::from_description(&desc).unwrap();
        let nets = system.nodes(NodeType::Net);
        // The port without a dev attribute is ignored
        assert_eq!(nets.len(), 2);
        assert_eq!(nets[0].net().unwrap().width, 3.125);
        assert_eq!(nets[1].net().unwrap().width, 1.25);
        assert_eq!(nets[1].net().unwrap().asic, 1);

        let cpu = system.get_node(NodeType::Cpu, 0).unwrap();
        let nic = system.get_node(NodeType::Nic, 7).unwrap();
        assert_eq!(link_width(&system, cpu, nic), Some(LOC_WIDTH));
    }

    #[test]
    fn test_unknown_class_ignored() {
        let desc = HwNode::system().with_sub(
            HwNode::new("cpu")
                .with_attr("numaid", 0)
                .with_sub(pci("0x010802", "0000:81:00.0")),
        );
        let system = System::from_description(&desc).unwrap();
        assert_eq!(system.count(NodeType::Pci), 0);
    }

    #[test]
    fn test_leading_int() {
        assert_eq!(leading_int("100 Gb/sec (4X EDR)"), Some(100));
        assert_eq!(leading_int(" 25000"), Some(25000));
        assert_eq!(leading_int("fast"), None);
    }
}
