//! Configuration settings for GpuTopo
//!
//! Defines the CLI arguments and the runtime configuration handed to the
//! topology builder. Environment variables are read here, through clap, and
//! nowhere else.

use crate::error::{Result, TopoError};
use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// GpuTopo - interconnect topology discovery for multi-GPU hosts
#[derive(Parser, Debug, Clone)]
#[command(name = "gputopo")]
#[command(author = "GpuTopo Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Discover the CPU/PCI/NVLink/NIC topology of a GPU host")]
#[command(long_about = r#"
GpuTopo builds a typed graph of the hardware interconnect of one host:
NUMA domains, PCI switches, GPUs, NVLinks, NVSwitches, NICs and network ports.

Examples:
  gputopo show topo.json                         # Print the graph of a description
  gputopo show topo.json --format json           # Graph as JSON
  gputopo detect --gpu 0000:3b:00.0 --sm 80      # Probe this host
  gputopo detect --gpu 0000:3b:00.0 -o topo.json # Probe and save the description
"#)]
pub struct CliArgs {
    /// Hardware description to start from instead of an empty one
    #[arg(long, env = "GPUTOPO_TOPO_FILE", value_name = "PATH", global = true)]
    pub topo_file: Option<PathBuf>,

    /// Write the merged hardware description here before building
    #[arg(long, env = "GPUTOPO_DUMP_FILE", value_name = "PATH", global = true)]
    pub dump_file: Option<PathBuf>,

    /// Only this rank writes the dump file
    #[arg(long, env = "GPUTOPO_DUMP_FILE_RANK", default_value = "0", value_name = "RANK", global = true)]
    pub dump_file_rank: i32,

    /// Use the NUMA domain's CPUs as-is instead of intersecting with the current mask
    #[arg(long, env = "GPUTOPO_IGNORE_CPU_AFFINITY", global = true)]
    pub ignore_cpu_affinity: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Build a hardware description into a graph and print it
    #[command(name = "show")]
    Show {
        /// Description file (JSON)
        file: PathBuf,
        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Probe this host through sysfs and print the resulting graph
    #[command(name = "detect")]
    Detect {
        /// Bus id of a GPU of the job, in rank order (repeatable)
        #[arg(long = "gpu", value_name = "BUSID", required = true)]
        gpus: Vec<String>,
        /// Compute capability of the GPUs (major × 10 + minor)
        #[arg(long, default_value = "80", value_name = "SM")]
        sm: i32,
        /// Rank of the calling process
        #[arg(long, default_value = "0", value_name = "RANK")]
        rank: i32,
        /// Save the merged description here
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

/// Output format for graphs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
pub enum OutputFormat {
    /// Indented tree
    #[default]
    Text,
    /// Graph as JSON
    Json,
}

/// Runtime configuration for topology discovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopoConfig {
    /// Cached description to start from
    pub topo_file: Option<PathBuf>,
    /// Where to dump the merged description
    pub dump_file: Option<PathBuf>,
    /// Rank that performs the dump
    pub dump_file_rank: i32,
    /// Replace the thread's mask instead of intersecting with it
    pub ignore_cpu_affinity: bool,
}

impl Default for TopoConfig {
    fn default() -> Self {
        Self {
            topo_file: None,
            dump_file: None,
            dump_file_rank: 0,
            ignore_cpu_affinity: false,
        }
    }
}

impl TopoConfig {
    /// Create config from CLI arguments
    pub fn from_cli(args: &CliArgs) -> Result<Self> {
        if let Some(path) = &args.topo_file {
            if !path.is_file() {
                return Err(TopoError::config(format!(
                    "topology file {} does not exist",
                    path.display()
                )));
            }
        }

        Ok(Self {
            topo_file: args.topo_file.clone(),
            dump_file: args.dump_file.clone(),
            dump_file_rank: args.dump_file_rank,
            ignore_cpu_affinity: args.ignore_cpu_affinity,
        })
    }

    /// Whether `rank` should write the dump file
    pub fn dumps_for(&self, rank: i32) -> bool {
        self.dump_file.is_some() && rank == self.dump_file_rank
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_show() {
        let args = CliArgs::try_parse_from(["gputopo", "show", "topo.json", "--format", "json"]).unwrap();
        match args.command {
            Commands::Show { file, format } => {
                assert_eq!(file, PathBuf::from("topo.json"));
                assert_eq!(format, OutputFormat::Json);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_detect() {
        let args = CliArgs::try_parse_from([
            "gputopo",
            "detect",
            "--gpu",
            "0000:3b:00.0",
            "--gpu",
            "0000:5e:00.0",
            "--dump-file-rank",
            "1",
        ])
        .unwrap();
        assert_eq!(args.dump_file_rank, 1);
        match args.command {
            Commands::Detect { gpus, sm, rank, .. } => {
                assert_eq!(gpus.len(), 2);
                assert_eq!(sm, 80);
                assert_eq!(rank, 0);
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert!(CliArgs::try_parse_from(["gputopo", "detect"]).is_err());
    }

    #[test]
    fn test_from_cli() {
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let args = CliArgs::try_parse_from([
            "gputopo",
            "--topo-file",
            &path,
            "--dump-file",
            "/tmp/dump.json",
            "show",
            "x.json",
        ])
        .unwrap();
        let config = TopoConfig::from_cli(&args).unwrap();
        assert_eq!(config.topo_file.as_deref(), Some(file.path()));
        assert!(config.dumps_for(0));
        assert!(!config.dumps_for(1));

        let args =
            CliArgs::try_parse_from(["gputopo", "--topo-file", "/nonexistent/topo.json", "show", "x"]).unwrap();
        assert!(matches!(TopoConfig::from_cli(&args), Err(TopoError::ConfigError(_))));
    }

    #[test]
    fn test_default_never_dumps() {
        let config = TopoConfig::default();
        assert!(!config.dumps_for(0));
        assert_eq!(config.dump_file_rank, 0);
    }

    #[test]
    fn test_help_examples_parse() {
        let about = CliArgs::command()
            .get_long_about()
            .map(|a| a.to_string())
            .unwrap_or_default();
        let examples: Vec<&str> = about
            .lines()
            .map(str::trim)
            .filter(|l| l.starts_with("gputopo "))
            .collect();
        assert_eq!(examples.len(), 4);
        for line in examples {
            let argv: Vec<&str> = line.split('#').next().unwrap().split_whitespace().collect();
            assert!(CliArgs::try_parse_from(&argv).is_ok(), "example does not parse: {}", line);
        }
    }
}
