use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use plancheck_core::round_seconds;
use plancheck_runner::{
    describe_catalog, load_config_or_default, run_harness, write_default_config,
    BenchmarkDescription, ConfigOverrides, ConfigSource, HarnessConfig, RunAborted,
    DEFAULT_CONFIG_FILE,
};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "plancheck",
    version,
    about = "Planner regression harness over HDDL benchmark suites"
)]
struct Cli {
    /// Raise log verbosity (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the planner on every sampled instance; stop at the first failure.
    Run {
        /// Config file (defaults to ./plancheck.yaml, else built-in catalog).
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        timeout_s: Option<u64>,
        #[arg(long)]
        memory_limit_gb: Option<u64>,
        /// Replace the planner executable of the command template.
        #[arg(long)]
        planner: Option<String>,
        /// Restrict the run to these benchmark names (repeatable).
        #[arg(long = "benchmark")]
        benchmarks: Vec<String>,
    },
    /// Resolve every benchmark and list the instances a run would attempt.
    Describe {
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Write the built-in configuration to a file.
    Init {
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        path: PathBuf,
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    install_interrupt_handler();
    let code = match run_command(cli.command) {
        Ok(()) => 0,
        Err(err) => {
            report_failure(&err);
            1
        }
    };
    std::process::exit(code);
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S,%3f".to_string()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn install_interrupt_handler() {
    let installed = ctrlc::set_handler(|| {
        warn!("interrupted, stopping the running planner");
        plancheck_runner::process::terminate_active_planner();
        std::process::exit(130);
    });
    if let Err(err) = installed {
        warn!("cannot install interrupt handler: {}", err);
    }
}

fn report_failure(err: &anyhow::Error) {
    match err.downcast_ref::<RunAborted>() {
        Some(aborted) => {
            error!("{}", aborted);
            info!(
                "Checked {} problems before the failure (done in {} s)",
                aborted.tally.instances_checked,
                round_seconds(aborted.tally.elapsed)
            );
        }
        None => error!("{:#}", err),
    }
}

fn run_command(command: Commands) -> Result<()> {
    match command {
        Commands::Run {
            config,
            timeout_s,
            memory_limit_gb,
            planner,
            benchmarks,
        } => {
            let mut config = load(config.as_deref())?;
            config.apply_overrides(&ConfigOverrides {
                timeout_s,
                memory_limit_gb,
                planner,
                benchmarks,
            })?;
            info!(
                "{} benchmarks, timeout {} s, memory limit {} GB",
                config.benchmarks.len(),
                config.timeout.as_secs(),
                config.memory_limit_gb
            );
            run_harness(&config)?;
        }
        Commands::Describe { config } => {
            let config = load(config.as_deref())?;
            let described = describe_catalog(&config)?;
            print_description(&described);
        }
        Commands::Init { path, force } => {
            write_default_config(&path, force)?;
            info!("wrote default configuration to {}", path.display());
        }
    }
    Ok(())
}

fn load(path: Option<&Path>) -> Result<HarnessConfig> {
    let (config, source) = load_config_or_default(path)?;
    match source {
        ConfigSource::File(path) => info!("using configuration {}", path.display()),
        ConfigSource::BuiltinDefaults => info!(
            "no {} found, using the built-in benchmark catalog",
            DEFAULT_CONFIG_FILE
        ),
    }
    Ok(config)
}

fn print_description(described: &[BenchmarkDescription]) {
    let mut total = 0;
    for benchmark in described {
        println!(
            "{}: {} of {} problems ({})",
            benchmark.name,
            benchmark.instances.len(),
            benchmark.available,
            benchmark.directory.display()
        );
        for instance in &benchmark.instances {
            println!(
                "  {}  <-  {}",
                instance.problem_name(),
                instance.domain_name()
            );
        }
        total += benchmark.instances.len();
    }
    println!("total: {} instances in {} benchmarks", total, described.len());
}
