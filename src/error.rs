//! Error types for GpuTopo
//!
//! Every fallible topology operation returns [`Result`]. All variants are
//! fatal for the build that produced them: a topology is either constructed
//! completely or not at all. A lookup miss is never an error and is modelled
//! with `Option` instead.

use crate::topology::NodeType;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for GpuTopo operations
#[derive(Error, Debug)]
pub enum TopoError {
    /// I/O error while reading or writing a description file
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Too many nodes of one type
    #[error("Tried to create too many nodes of type {node_type} (capacity {capacity})")]
    CapacityExceeded { node_type: NodeType, capacity: usize },

    /// Too many links on one node
    #[error("Too many links on {node_type}/{id:x} (capacity {capacity})")]
    LinkCapacityExceeded {
        node_type: NodeType,
        id: u64,
        capacity: usize,
    },

    /// A required attribute is absent from a description element
    #[error("Missing attribute '{attr}' on <{element}>")]
    MissingAttribute { element: String, attr: String },

    /// An attribute is present but cannot be parsed
    #[error("Invalid value '{value}' for attribute '{attr}' on <{element}>")]
    InvalidAttribute {
        element: String,
        attr: String,
        value: String,
    },

    /// The description tree has no `system` element
    #[error("Description has no <system> element")]
    MissingSystem,

    /// An NVLink entry references a node that cannot be resolved
    #[error("Add NVLink error: {0}")]
    UnresolvedNvLink(String),

    /// A handle points past the end of its node array
    #[error("Invalid node reference {node_type}[{index}]")]
    InvalidNode { node_type: NodeType, index: usize },

    /// Affinity selection could not find a GPU or CPU for the rank
    #[error("Set CPU affinity: unable to find GPU/CPU for rank {0}")]
    NoAffinityTarget(i32),

    /// Path tables have not been populated yet
    #[error("Path tables from {from} to {to} are not computed")]
    PathsNotComputed { from: NodeType, to: NodeType },

    /// Operating system call failed
    #[error("{call} failed: {source}")]
    Os {
        call: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Device or network collaborator failure
    #[error("Device query error: {0}")]
    DeviceQuery(String),

    /// Description file parsing/writing error
    #[error("Description error: {0}")]
    Description(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl TopoError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a missing attribute error
    pub fn missing(element: impl Into<String>, attr: impl Into<String>) -> Self {
        Self::MissingAttribute {
            element: element.into(),
            attr: attr.into(),
        }
    }

    /// Create an invalid attribute error
    pub fn invalid(
        element: impl Into<String>,
        attr: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::InvalidAttribute {
            element: element.into(),
            attr: attr.into(),
            value: value.into(),
        }
    }

    /// Create an OS error from the last errno
    pub fn last_os_error(call: &'static str) -> Self {
        Self::Os {
            call,
            source: std::io::Error::last_os_error(),
        }
    }

    /// Create a device query error
    pub fn device(message: impl Into<String>) -> Self {
        Self::DeviceQuery(message.into())
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    /// Check if this error was caused by malformed description input
    pub fn is_description_error(&self) -> bool {
        matches!(
            self,
            Self::MissingAttribute { .. }
                | Self::InvalidAttribute { .. }
                | Self::MissingSystem
                | Self::Description(_)
        )
    }

    /// Get the path associated with this error, if any
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::Io { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// Result type alias for GpuTopo operations
pub type Result<T> = std::result::Result<T, TopoError>;

impl From<std::io::Error> for TopoError {
    fn from(err: std::io::Error) -> Self {
        TopoError::Io {
            path: PathBuf::new(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for TopoError {
    fn from(err: serde_json::Error) -> Self {
        TopoError::Description(err.to_string())
    }
}

/// Extension trait for adding path context to std::io::Result
pub trait IoResultExt<T> {
    /// Add path context to an I/O error
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| TopoError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_with_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = TopoError::io("/etc/topo.json", io_err);
        assert_eq!(err.path().unwrap(), &PathBuf::from("/etc/topo.json"));
    }

    #[test]
    fn test_description_error_classification() {
        assert!(TopoError::missing("cpu", "numaid").is_description_error());
        assert!(TopoError::invalid("pci", "busid", "zz").is_description_error());
        assert!(!TopoError::CapacityExceeded {
            node_type: NodeType::Gpu,
            capacity: 256
        }
        .is_description_error());
    }

    #[test]
    fn test_error_messages() {
        let err = TopoError::missing("cpu", "numaid");
        assert_eq!(err.to_string(), "Missing attribute 'numaid' on <cpu>");

        let err = TopoError::CapacityExceeded {
            node_type: NodeType::Pci,
            capacity: 256,
        };
        assert!(err.to_string().contains("PCI"));
    }
}
