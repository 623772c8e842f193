//! Hierarchical hardware description
//!
//! A tree of named elements with string attributes that mirrors the physical
//! bus hierarchy:
//!
//! ```text
//! system{version}
//!   cpu{numaid,affinity,arch,vendor,familyid,modelid}
//!     pci{class,busid,link_width,link_speed}
//!       pci ...
//!       gpu{dev,rank,sm,gdr}
//!         nvlink{tclass,target,count}
//!       nic
//!         net{dev,speed,link_rate,gdr,coll,sys_guid}
//!     nic{id}
//! ```
//!
//! Descriptions are persisted as JSON.

use crate::error::{IoResultExt, Result, TopoError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Current description format version
pub const TOPO_DESC_VERSION: i32 = 1;

/// One element of the hardware description
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HwNode {
    /// Element name (`system`, `cpu`, `pci`, ...)
    pub name: String,
    /// Attributes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, String>,
    /// Child elements in document order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subs: Vec<HwNode>,
}

impl HwNode {
    /// Create an element without attributes
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Create an empty `system` root
    pub fn system() -> Self {
        Self::new("system").with_attr("version", TOPO_DESC_VERSION)
    }

    /// Builder-style attribute setter
    pub fn with_attr(mut self, key: &str, value: impl ToString) -> Self {
        self.set_attr(key, value);
        self
    }

    /// Builder-style child append
    pub fn with_sub(mut self, sub: HwNode) -> Self {
        self.subs.push(sub);
        self
    }

    /// Raw attribute value
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    /// Whether an attribute is present
    pub fn has_attr(&self, key: &str) -> bool {
        self.attrs.contains_key(key)
    }

    /// Set (or overwrite) an attribute
    pub fn set_attr(&mut self, key: &str, value: impl ToString) {
        self.attrs.insert(key.to_string(), value.to_string());
    }

    /// Required string attribute
    pub fn require_attr(&self, key: &str) -> Result<&str> {
        self.attr(key).ok_or_else(|| TopoError::missing(&self.name, key))
    }

    /// Optional integer attribute; decimal or `0x`-prefixed hex
    pub fn attr_int(&self, key: &str) -> Result<Option<i64>> {
        match self.attr(key) {
            None => Ok(None),
            Some(value) => parse_int(value)
                .map(Some)
                .ok_or_else(|| TopoError::invalid(&self.name, key, value)),
        }
    }

    /// Required integer attribute
    pub fn require_int(&self, key: &str) -> Result<i64> {
        self.attr_int(key)?
            .ok_or_else(|| TopoError::missing(&self.name, key))
    }

    /// First direct child with this name
    pub fn sub(&self, name: &str) -> Option<&HwNode> {
        self.subs.iter().find(|s| s.name == name)
    }

    /// First direct child with this name, appended if absent
    pub fn sub_or_insert(&mut self, name: &str) -> &mut HwNode {
        let index = match self.subs.iter().position(|s| s.name == name) {
            Some(index) => index,
            None => {
                self.subs.push(HwNode::new(name));
                self.subs.len() - 1
            }
        };
        &mut self.subs[index]
    }

    /// First element named `name` in this subtree (pre-order, self included)
    pub fn find(&self, name: &str) -> Option<&HwNode> {
        if self.name == name {
            return Some(self);
        }
        self.subs.iter().find_map(|s| s.find(name))
    }

    /// First element named `name` whose `attr` satisfies `pred`, mutably
    pub fn find_mut_by<F>(&mut self, name: &str, attr: &str, pred: &F) -> Option<&mut HwNode>
    where
        F: Fn(&str) -> bool,
    {
        if self.name == name && self.attr(attr).map_or(false, pred) {
            return Some(self);
        }
        self.subs
            .iter_mut()
            .find_map(|s| s.find_mut_by(name, attr, pred))
    }

    /// Load a description from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_path(path)?;
        serde_json::from_str(&content)
            .map_err(|e| TopoError::Description(format!("{}: {}", path.display(), e)))
    }

    /// Save a description as pretty-printed JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_path(path)?;
        Ok(())
    }
}

/// Parse a decimal or `0x` hex integer
pub(crate) fn parse_int(value: &str) -> Option<i64> {
    let value = value.trim();
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> HwNode {
        HwNode::system().with_sub(
            HwNode::new("cpu").with_attr("numaid", 0).with_sub(
                HwNode::new("pci")
                    .with_attr("busid", "0000:00:02.0")
                    .with_attr("class", "0x060400"),
            ),
        )
    }

    #[test]
    fn test_attributes() {
        let node = HwNode::new("cpu")
            .with_attr("numaid", 1)
            .with_attr("modelid", "0x55")
            .with_attr("bad", "x1");
        assert_eq!(node.require_int("numaid").unwrap(), 1);
        assert_eq!(node.require_int("modelid").unwrap(), 0x55);
        assert_eq!(node.attr_int("missing").unwrap(), None);
        assert!(node.attr_int("bad").unwrap_err().is_description_error());
        assert!(matches!(
            node.require_attr("arch"),
            Err(TopoError::MissingAttribute { .. })
        ));
    }

    #[test]
    fn test_find() {
        let mut tree = sample();
        assert_eq!(tree.find("pci").unwrap().attr("class"), Some("0x060400"));
        assert!(tree.find("gpu").is_none());

        let pci = tree
            .find_mut_by("pci", "busid", &|b: &str| b == "0000:00:02.0")
            .unwrap();
        pci.set_attr("link_width", 16);
        assert_eq!(tree.find("pci").unwrap().attr("link_width"), Some("16"));

        let cpu = tree.sub_or_insert("cpu");
        cpu.set_attr("arch", "x86_64");
        tree.sub_or_insert("cpu");
        assert_eq!(tree.subs.len(), 1);
        assert_eq!(tree.subs[0].attr("arch"), Some("x86_64"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("topo.json");
        let tree = sample();
        tree.save(&path).unwrap();
        assert_eq!(HwNode::load(&path).unwrap(), tree);
    }

    #[test]
    fn test_load_errors() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("absent.json");
        assert!(matches!(HwNode::load(&missing), Err(TopoError::Io { .. })));

        let garbage = dir.path().join("garbage.json");
        std::fs::write(&garbage, "{not json").unwrap();
        assert!(HwNode::load(&garbage).unwrap_err().is_description_error());
    }
}
