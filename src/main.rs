//! GpuTopo CLI - interconnect topology discovery
//!
//! Prints the topology graph of a hardware description file, or of the
//! local host probed through sysfs.

use anyhow::Context;
use clap::Parser;
use gputopo::config::{CliArgs, Commands, OutputFormat, TopoConfig};
use gputopo::discovery::{host_hash, CommInfo, ListedGpus, NetDevices, PeerInfo, PTR_CUDA};
use gputopo::hwdesc::HwNode;
use gputopo::system::{SysfsNet, SysfsProbe};
use gputopo::topology::{bus_id_to_u64, NodeType, System};
use gputopo::TopologyBuilder;
use std::path::Path;
use tracing_subscriber::EnvFilter;

fn main() {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Initialize logging; RUST_LOG wins over -v/-q
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    // Handle result
    if let Err(e) = run(args) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: CliArgs) -> anyhow::Result<()> {
    let config = TopoConfig::from_cli(&args)?;

    if args.verbose > 0 {
        print_config(&config);
    }

    match &args.command {
        Commands::Show { file, format } => cmd_show(file, *format),
        Commands::Detect {
            gpus,
            sm,
            rank,
            output,
            format,
        } => cmd_detect(config, gpus, *sm, *rank, output.as_deref(), *format),
    }
}

fn cmd_show(file: &Path, format: OutputFormat) -> anyhow::Result<()> {
    let desc = HwNode::load(file)?;
    let system = System::from_description(&desc)
        .with_context(|| format!("building topology from {}", file.display()))?;
    print_system(&system, format)
}

fn cmd_detect(
    config: TopoConfig,
    gpus: &[String],
    sm: i32,
    rank: i32,
    output: Option<&Path>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let net = SysfsNet::new().context("listing InfiniBand devices")?;
    let gdr_support = net.device_count()? > 0 && net.ptr_support(0)? & PTR_CUDA != 0;

    let host_hash = host_hash()?;
    let peers = gpus
        .iter()
        .enumerate()
        .map(|(r, bus_id)| {
            Ok(PeerInfo {
                rank: r as i32,
                host_hash,
                bus_id: bus_id_to_u64(bus_id)?,
                gdr_support,
            })
        })
        .collect::<gputopo::Result<Vec<_>>>()?;
    if rank < 0 || rank as usize >= peers.len() {
        anyhow::bail!("rank {} is out of range for {} GPUs", rank, peers.len());
    }
    let comm = CommInfo { rank, peers };

    let builder = TopologyBuilder::new(config)
        .with_host_probe(Box::new(SysfsProbe::new()))
        .with_gpu_query(Box::new(ListedGpus::new(gpus, sm)?))
        .with_net(Box::new(net));

    let desc = builder.describe(&comm).context("describing the local host")?;
    if let Some(path) = output {
        desc.save(path)?;
        tracing::info!("Saved hardware description to {}", path.display());
    }

    let system = System::from_description(&desc)?;
    print_system(&system, format)
}

fn print_system(system: &System, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(system)?);
        }
        OutputFormat::Text => {
            println!("=== System : maxWidth {:.1} ===", system.max_width);
            for line in system.tree_lines() {
                println!("{}", line);
            }
            println!();
            for node_type in NodeType::ALL {
                println!("{:<4} {}", node_type, system.count(node_type));
            }
        }
    }
    Ok(())
}

fn print_config(config: &TopoConfig) {
    println!("=== Configuration ===");
    match &config.topo_file {
        Some(path) => println!("Topology file:   {}", path.display()),
        None => println!("Topology file:   (none)"),
    }
    match &config.dump_file {
        Some(path) => println!("Dump file:       {} (rank {})", path.display(), config.dump_file_rank),
        None => println!("Dump file:       (none)"),
    }
    println!("Ignore affinity: {}", config.ignore_cpu_affinity);
    println!();
}
