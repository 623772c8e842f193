//! CPU sets and thread affinity for multi-socket systems
//!
//! A [`CpuSet`] is the modelled scheduling mask of a NUMA domain. It reads
//! both textual forms the kernel exposes under `/sys/devices/system/node`:
//! - `cpumap`: comma-separated 32-bit hex words, most significant first
//!   (`ffffffff,00000000`)
//! - `cpulist`: ranges (`0-3,8-11`)

use crate::error::{Result, TopoError};
use crate::topology::AffinityOs;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::Path;

/// Maximum CPU index representable in a set (matches `CPU_SETSIZE`)
pub const MAX_CPUS: usize = 1024;

const WORDS: usize = MAX_CPUS / 64;

/// Fixed-size CPU bitmask
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CpuSet {
    bits: [u64; WORDS],
}

impl CpuSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a set from CPU indices; indices past [`MAX_CPUS`] are dropped
    pub fn from_cpus<I: IntoIterator<Item = usize>>(cpus: I) -> Self {
        let mut set = Self::new();
        for cpu in cpus {
            set.insert(cpu);
        }
        set
    }

    /// Add a CPU to the set
    pub fn insert(&mut self, cpu: usize) {
        if cpu < MAX_CPUS {
            self.bits[cpu / 64] |= 1u64 << (cpu % 64);
        }
    }

    /// Check whether a CPU is in the set
    pub fn contains(&self, cpu: usize) -> bool {
        cpu < MAX_CPUS && self.bits[cpu / 64] & (1u64 << (cpu % 64)) != 0
    }

    /// Number of CPUs in the set
    pub fn count(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|&w| w == 0)
    }

    /// CPUs present in both sets
    pub fn intersection(&self, other: &CpuSet) -> CpuSet {
        let mut out = CpuSet::new();
        for (i, word) in out.bits.iter_mut().enumerate() {
            *word = self.bits[i] & other.bits[i];
        }
        out
    }

    /// Iterate over CPU indices in ascending order
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..MAX_CPUS).filter(move |&cpu| self.contains(cpu))
    }

    /// Parse the kernel `cpumap` format (e.g. "ff,ffffffff")
    pub fn parse_mask(s: &str) -> Result<Self> {
        let s = s.trim();
        let words: Vec<&str> = s.split(',').collect();
        if s.is_empty() || words.len() > MAX_CPUS / 32 {
            return Err(TopoError::invalid("cpu", "affinity", s));
        }

        let mut set = CpuSet::new();
        // Least significant 32-bit word comes last
        for (shift, word) in words.iter().rev().enumerate() {
            let value = u32::from_str_radix(word.trim(), 16)
                .map_err(|_| TopoError::invalid("cpu", "affinity", s))?;
            for bit in 0..32 {
                if value & (1u32 << bit) != 0 {
                    set.insert(shift * 32 + bit);
                }
            }
        }
        Ok(set)
    }

    /// Format in the kernel `cpumap` format
    pub fn to_mask_string(&self) -> String {
        let mut words: Vec<u32> = Vec::with_capacity(MAX_CPUS / 32);
        for w in self.bits.iter() {
            words.push(*w as u32);
            words.push((*w >> 32) as u32);
        }
        while words.len() > 1 && words.last() == Some(&0) {
            words.pop();
        }
        words
            .iter()
            .rev()
            .map(|w| format!("{:08x}", w))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Parse CPU list format (e.g., "0-3,8-11" -> [0,1,2,3,8,9,10,11])
    pub fn parse_list(s: &str) -> Self {
        let mut set = CpuSet::new();

        for part in s.split(',') {
            let part = part.trim();
            if part.contains('-') {
                let mut range = part.split('-');
                if let (Some(start), Some(end)) = (range.next(), range.next()) {
                    if let (Ok(start), Ok(end)) = (start.parse::<usize>(), end.parse::<usize>()) {
                        for cpu in start..=end.min(MAX_CPUS - 1) {
                            set.insert(cpu);
                        }
                    }
                }
            } else if let Ok(cpu) = part.parse::<usize>() {
                set.insert(cpu);
            }
        }

        set
    }

    /// Format as a CPU list (e.g. "0-3,8-11")
    pub fn to_list_string(&self) -> String {
        let mut parts = Vec::new();
        let mut run: Option<(usize, usize)> = None;
        for cpu in self.iter() {
            run = match run {
                Some((start, end)) if end + 1 == cpu => Some((start, cpu)),
                Some(prev) => {
                    parts.push(prev);
                    Some((cpu, cpu))
                }
                None => Some((cpu, cpu)),
            };
        }
        parts.extend(run);
        parts
            .iter()
            .map(|&(start, end)| {
                if start == end {
                    start.to_string()
                } else {
                    format!("{}-{}", start, end)
                }
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    #[cfg(target_os = "linux")]
    fn to_libc(self) -> libc::cpu_set_t {
        // SAFETY: cpu_set_t is a plain bitmask, all-zero is a valid empty set
        let mut set: libc::cpu_set_t = unsafe { std::mem::zeroed() };
        for cpu in self.iter() {
            unsafe { libc::CPU_SET(cpu, &mut set) };
        }
        set
    }

    #[cfg(target_os = "linux")]
    fn from_libc(set: &libc::cpu_set_t) -> Self {
        let mut out = CpuSet::new();
        for cpu in 0..MAX_CPUS {
            if unsafe { libc::CPU_ISSET(cpu, set) } {
                out.insert(cpu);
            }
        }
        out
    }
}

impl fmt::Debug for CpuSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CpuSet[{}]", self.to_list_string())
    }
}

impl fmt::Display for CpuSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_mask_string())
    }
}

impl Serialize for CpuSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_mask_string())
    }
}

impl<'de> Deserialize<'de> for CpuSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        CpuSet::parse_mask(&s).map_err(serde::de::Error::custom)
    }
}

/// Read the CPU list of a NUMA node under a sysfs root (normally `/sys`)
#[cfg(target_os = "linux")]
pub fn read_node_cpus(sys_root: &Path, numa_id: i32) -> Option<CpuSet> {
    let cpulist_path = sys_root.join(format!("devices/system/node/node{}/cpulist", numa_id));
    std::fs::read_to_string(cpulist_path)
        .ok()
        .map(|content| CpuSet::parse_list(content.trim()))
}

/// Without NUMA information every CPU belongs to node 0
#[cfg(not(target_os = "linux"))]
pub fn read_node_cpus(_sys_root: &Path, numa_id: i32) -> Option<CpuSet> {
    (numa_id == 0).then(|| CpuSet::from_cpus(0..num_cpus::get()))
}

/// Scheduling mask of the calling thread
pub struct ThreadAffinity;

impl AffinityOs for ThreadAffinity {
    #[cfg(target_os = "linux")]
    fn current(&self) -> Result<CpuSet> {
        // SAFETY: zeroed cpu_set_t is valid and sized for the call
        let mut set: libc::cpu_set_t = unsafe { std::mem::zeroed() };
        let result = unsafe {
            libc::sched_getaffinity(
                0, // current thread
                std::mem::size_of::<libc::cpu_set_t>(),
                &mut set,
            )
        };

        if result == 0 {
            Ok(CpuSet::from_libc(&set))
        } else {
            Err(TopoError::last_os_error("sched_getaffinity"))
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn current(&self) -> Result<CpuSet> {
        Ok(CpuSet::from_cpus(0..num_cpus::get()))
    }

    #[cfg(target_os = "linux")]
    fn apply(&self, mask: &CpuSet) -> Result<()> {
        let set = mask.to_libc();
        let result =
            unsafe { libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) };

        if result == 0 {
            Ok(())
        } else {
            Err(TopoError::last_os_error("sched_setaffinity"))
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn apply(&self, _mask: &CpuSet) -> Result<()> {
        // Thread affinity not supported on this platform
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_list_parsing() {
        let set = CpuSet::parse_list("0-3");
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![0, 1, 2, 3]);
        let set = CpuSet::parse_list("0,2,4");
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![0, 2, 4]);
        let set = CpuSet::parse_list("0-2,4-6");
        assert_eq!(set.to_list_string(), "0-2,4-6");
    }

    #[test]
    fn test_mask_parsing() {
        let set = CpuSet::parse_mask("0000000f").unwrap();
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![0, 1, 2, 3]);

        let set = CpuSet::parse_mask("ff,00000000").unwrap();
        assert_eq!(set.count(), 8);
        assert!(set.contains(32));
        assert!(set.contains(39));
        assert!(!set.contains(0));

        assert!(CpuSet::parse_mask("xyz").is_err());
        assert!(CpuSet::parse_mask("").is_err());
    }

    #[test]
    fn test_mask_formatting() {
        let set = CpuSet::from_cpus([0, 1, 2, 3, 32]);
        assert_eq!(set.to_mask_string(), "00000001,0000000f");
        assert_eq!(CpuSet::parse_mask(&set.to_mask_string()).unwrap(), set);
        assert_eq!(CpuSet::new().to_mask_string(), "00000000");
    }

    #[test]
    fn test_intersection() {
        let a = CpuSet::parse_list("0-7");
        let b = CpuSet::parse_list("4-11");
        assert_eq!(a.intersection(&b).to_list_string(), "4-7");

        let c = CpuSet::parse_list("16-23");
        assert!(a.intersection(&c).is_empty());
    }

    #[test]
    fn test_out_of_range_cpus_dropped() {
        let set = CpuSet::from_cpus([1, MAX_CPUS + 5]);
        assert_eq!(set.count(), 1);
    }

    #[test]
    fn test_current_affinity_not_empty() {
        let set = ThreadAffinity.current().unwrap();
        assert!(!set.is_empty());
    }
}
