//! CLI entry point: load a specification, run the compile pipeline,
//! optionally dump Graphviz views, and print a single diagnostic line on
//! error.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use interconnect_compile::driver::{self, CompileOptions, SpecSource};
use interconnect_compile::primitives::Catalog;
use interconnect_compile::spec_source::JsonSpecSource;

#[derive(Debug, Parser)]
#[command(name = "interconnect-compile", about = "Interconnect synthesis compiler")]
struct Cli {
    /// Path to the input specification document.
    spec_path: PathBuf,

    /// Write the finalized point-to-point netlist as a Graphviz `.dot` file.
    #[arg(long, value_name = "PATH")]
    p2p_dot: Option<PathBuf>,

    /// Write the input topology graph as a Graphviz `.dot` file.
    #[arg(long, value_name = "PATH")]
    topo_dot: Option<PathBuf>,

    /// Pipeline a register onto every Merge node's outputs.
    #[arg(long)]
    register_merge: bool,

    /// Treat an unproduced, undefaulted field as a hard error.
    #[arg(long)]
    strict: bool,

    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

fn run(cli: &Cli) -> interconnect_compile::error::Result<()> {
    let source = JsonSpecSource;
    let (registry, system) = source.load(&cli.spec_path)?;

    let options = CompileOptions {
        register_merge: cli.register_merge,
        strict_fields: cli.strict,
        emit_p2p_dot: cli.p2p_dot.clone(),
        emit_topo_dot: cli.topo_dot.clone(),
    };
    let catalog = Catalog::builtin();
    let system = driver::compile(system, &registry, &catalog, &options)?;

    tracing::info!(
        nodes = system.netlist.nodes.len(),
        connections = system.netlist.connections.len(),
        flows = system.netlist.flows.len(),
        "compile finished"
    );
    Ok(())
}
