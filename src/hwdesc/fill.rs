//! Description filling from the host
//!
//! Adds GPUs and network ports to a description, creating the `cpu` element
//! and the chain of `pci` bridges above each device from its sysfs path when
//! the description does not have them yet. Attributes that are already
//! present (e.g. from a loaded topology file) are never overwritten.

use super::tree::{parse_int, HwNode};
use crate::discovery::{GpuQuery, HostProbe};
use crate::error::{Result, TopoError};
use crate::topology::busid::{bus_id_to_u64, is_bus_id, pci_path_to_key};

/// Bus ids along a sysfs PCI path, root port first.
///
/// `/sys/devices/pci0000:00/0000:00:02.0/0000:02:00.0` gives
/// `["0000:00:02.0", "0000:02:00.0"]`.
pub fn pci_chain(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|c| is_bus_id(c))
        .map(str::to_ascii_lowercase)
        .collect()
}

/// Make sure the GPU at `bus_id` is described and return its `gpu` element.
///
/// `dev`, `sm` and the NVLinks come from the driver when absent.
pub fn fill_gpu<'a>(
    desc: &'a mut HwNode,
    bus_id: &str,
    probe: &dyn HostProbe,
    gpus: &dyn GpuQuery,
) -> Result<&'a mut HwNode> {
    let pci = fill_pci(desc, bus_id, None, probe)?;
    let gpu = pci.sub_or_insert("gpu");

    if !gpu.has_attr("dev") {
        gpu.set_attr("dev", gpus.device_index(bus_id)?);
    }
    if !gpu.has_attr("sm") {
        gpu.set_attr("sm", gpus.compute_capability(bus_id)?);
    }
    if gpu.sub("nvlink").is_none() {
        for link in gpus.nvlinks(bus_id)? {
            gpu.subs.push(
                HwNode::new("nvlink")
                    .with_attr("target", &link.target)
                    .with_attr("tclass", &link.tclass)
                    .with_attr("count", link.count),
            );
        }
    }
    Ok(gpu)
}

/// Make sure network device `dev` is described and return its `net` element.
///
/// A device without a PCI path is a virtual NIC and hangs off the first CPU.
pub fn fill_nic<'a>(
    desc: &'a mut HwNode,
    path: Option<&str>,
    dev: usize,
    probe: &dyn HostProbe,
) -> Result<&'a mut HwNode> {
    let dev_matches = |d: &str| parse_int(d) == Some(dev as i64);

    if desc.find_mut_by("net", "dev", &dev_matches).is_none() {
        let bus_id = path.and_then(|p| pci_chain(p).pop());
        let nic = match (path, bus_id) {
            (Some(path), Some(bus_id)) => fill_pci(desc, &bus_id, Some(path), probe)?.sub_or_insert("nic"),
            (path, _) => {
                if let Some(path) = path {
                    tracing::debug!("Network path {} is not a PCI device, attaching to first CPU", path);
                }
                let cpu = first_cpu(desc, probe)?;
                virtual_nic(cpu, dev)
            }
        };
        nic.subs.push(HwNode::new("net").with_attr("dev", dev));
    }

    desc.find_mut_by("net", "dev", &dev_matches)
        .ok_or_else(|| TopoError::device(format!("network device {} could not be described", dev)))
}

/// `pci` element of `bus_id`, creating it and its ancestors if absent
fn fill_pci<'a>(
    desc: &'a mut HwNode,
    bus_id: &str,
    path: Option<&str>,
    probe: &dyn HostProbe,
) -> Result<&'a mut HwNode> {
    let key = bus_id_to_u64(bus_id)?;
    let matches = |b: &str| bus_id_to_u64(b).map_or(false, |v| v == key);

    if desc.find_mut_by("pci", "busid", &matches).is_none() {
        let path = match path {
            Some(path) => path.to_string(),
            None => probe.pci_path(bus_id)?,
        };
        if pci_path_to_key(&path).ok() != Some(key & !0xf) {
            return Err(TopoError::device(format!(
                "PCI path {} does not lead to {}",
                path, bus_id
            )));
        }
        let chain = pci_chain(&path);

        let numa_id = probe.numa_node(bus_id)?.max(0);
        let mut parent = cpu_element(desc, numa_id, probe)?;
        for link in &chain {
            parent = pci_element(parent, link, probe)?;
            if matches(link.as_str()) {
                break;
            }
        }
    }

    desc.find_mut_by("pci", "busid", &matches)
        .ok_or_else(|| TopoError::device(format!("PCI device {} could not be described", bus_id)))
}

/// `cpu` element of a NUMA domain, created with the host's CPU attributes
fn cpu_element<'a>(desc: &'a mut HwNode, numa_id: i32, probe: &dyn HostProbe) -> Result<&'a mut HwNode> {
    let existing = desc.subs.iter().position(|s| {
        s.name == "cpu" && s.attr("numaid").and_then(parse_int) == Some(numa_id as i64)
    });
    let index = match existing {
        Some(index) => index,
        None => {
            let attrs = probe.cpu_attrs(numa_id)?;
            let mut cpu = HwNode::new("cpu").with_attr("numaid", numa_id);
            if let Some(affinity) = attrs.affinity {
                cpu.set_attr("affinity", affinity.to_mask_string());
            }
            if let Some(arch) = attrs.arch {
                cpu.set_attr("arch", arch);
            }
            if let Some(vendor) = attrs.vendor {
                cpu.set_attr("vendor", vendor);
            }
            if let Some(family_id) = attrs.family_id {
                cpu.set_attr("familyid", family_id);
            }
            if let Some(model_id) = attrs.model_id {
                cpu.set_attr("modelid", model_id);
            }
            tracing::debug!("Adding CPU element for NUMA node {}", numa_id);
            desc.subs.push(cpu);
            desc.subs.len() - 1
        }
    };
    Ok(&mut desc.subs[index])
}

/// First `cpu` element, creating NUMA node 0 if there is none
fn first_cpu<'a>(desc: &'a mut HwNode, probe: &dyn HostProbe) -> Result<&'a mut HwNode> {
    match desc.subs.iter().position(|s| s.name == "cpu") {
        Some(index) => Ok(&mut desc.subs[index]),
        None => cpu_element(desc, 0, probe),
    }
}

/// Child `pci` element of `parent` for `bus_id`, created with its PCI attributes
fn pci_element<'a>(parent: &'a mut HwNode, bus_id: &str, probe: &dyn HostProbe) -> Result<&'a mut HwNode> {
    let key = bus_id_to_u64(bus_id)?;
    let existing = parent.subs.iter().position(|s| {
        s.name == "pci" && s.attr("busid").map_or(false, |b| bus_id_to_u64(b).ok() == Some(key))
    });
    let index = match existing {
        Some(index) => index,
        None => {
            let attrs = probe.pci_attrs(bus_id)?;
            let mut pci = HwNode::new("pci")
                .with_attr("busid", bus_id)
                .with_attr("class", &attrs.class);
            if let Some(width) = attrs.link_width {
                pci.set_attr("link_width", width);
            }
            if let Some(speed) = attrs.link_speed {
                pci.set_attr("link_speed", speed);
            }
            parent.subs.push(pci);
            parent.subs.len() - 1
        }
    };
    Ok(&mut parent.subs[index])
}

/// `nic{id}` directly under a CPU, for devices without a PCI function
fn virtual_nic(cpu: &mut HwNode, dev: usize) -> &mut HwNode {
    let existing = cpu
        .subs
        .iter()
        .position(|s| s.name == "nic" && s.attr("id").and_then(parse_int) == Some(dev as i64));
    let index = match existing {
        Some(index) => index,
        None => {
            cpu.subs.push(HwNode::new("nic").with_attr("id", dev));
            cpu.subs.len() - 1
        }
    };
    &mut cpu.subs[index]
}
