//! jobwave CLI: compile plan documents and run them on a simulated cluster.

use clap::{Parser, Subcommand};
use jobwave_core::config::RunConfig;
use jobwave_core::id::NodeId;
use jobwave_exec::{FsCommitter, Launcher, NoopCommitter, OutputCommitter, SimulatedCluster};
use jobwave_planner::{parse_yaml_plan, ExplainFormat, ParsedPlan};
use std::fs;
use std::io;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "jobwave")]
#[command(about = "Compile dataflow plans into waves of map/reduce jobs and drive them", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a plan against the simulated cluster
    Run {
        /// Path to the plan YAML file
        #[arg(short, long)]
        plan: PathBuf,

        /// Group id used in job names
        #[arg(long, default_value = "jobwave")]
        group: String,

        /// Chunk-size hint for the combiner and join streaming (overrides config)
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Never insert a combine phase
        #[arg(long)]
        no_combiner: bool,

        /// Poll interval in milliseconds (overrides config)
        #[arg(long)]
        poll_ms: Option<u64>,

        /// Make the job running this node fail (repeatable)
        #[arg(long)]
        fail_node: Vec<u64>,

        /// Write staging markers and move them into place on commit
        #[arg(long)]
        commit: bool,

        /// Print the run outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate a plan YAML file (syntax and structure)
    Validate {
        /// Path to the plan YAML file
        #[arg(short, long)]
        plan: PathBuf,
    },

    /// Show the compiled job graph (EXPLAIN)
    Explain {
        /// Path to the plan YAML file
        #[arg(short, long)]
        plan: PathBuf,

        /// text or dot
        #[arg(long, default_value = "text")]
        format: ExplainFormat,

        /// Include pass annotations
        #[arg(long)]
        verbose: bool,
    },
}

struct RunArgs {
    group: String,
    chunk_size: Option<usize>,
    no_combiner: bool,
    poll_ms: Option<u64>,
    fail_node: Vec<u64>,
    commit: bool,
    json: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            plan,
            group,
            chunk_size,
            no_combiner,
            poll_ms,
            fail_node,
            commit,
            json,
        } => {
            let args = RunArgs {
                group,
                chunk_size,
                no_combiner,
                poll_ms,
                fail_node,
                commit,
                json,
            };
            match run_plan(&plan, args) {
                Ok(true) => {}
                Ok(false) => std::process::exit(1),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Validate { plan } => {
            if let Err(e) = validate_plan(&plan) {
                eprintln!("Validation failed: {}", e);
                std::process::exit(1);
            }
            println!("✓ Plan is valid");
        }
        Commands::Explain {
            plan,
            format,
            verbose,
        } => {
            if let Err(e) = explain_plan(&plan, format, verbose) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

fn load_plan(path: &PathBuf) -> Result<(ParsedPlan, RunConfig), Box<dyn std::error::Error>> {
    let yaml_content = fs::read_to_string(path)?;
    let parsed = parse_yaml_plan(&yaml_content)?;
    let mut config = RunConfig::from_env();
    parsed.config.apply(&mut config);
    Ok((parsed, config))
}

fn apply_run_args(config: &mut RunConfig, args: &RunArgs) {
    if let Some(n) = args.chunk_size {
        config.last_input_chunk_size = n;
    }
    if args.no_combiner {
        config.disable_combiner = true;
    }
    if let Some(ms) = args.poll_ms {
        config.poll_interval_ms = ms;
    }
}

fn run_plan(path: &PathBuf, args: RunArgs) -> Result<bool, Box<dyn std::error::Error>> {
    let (parsed, mut config) = load_plan(path)?;
    apply_run_args(&mut config, &args);
    config.validate()?;

    let mut cluster = SimulatedCluster::new().with_staging_output(args.commit);
    for node in &args.fail_node {
        cluster = cluster.fail_node(NodeId::new(*node), format!("scripted failure of node-{node}"));
    }
    let committer: Box<dyn OutputCommitter> = if args.commit {
        Box::new(FsCommitter)
    } else {
        Box::new(NoopCommitter)
    };

    let launcher = Launcher::new(config);
    let outcome = launcher.launch_plan(&parsed.plan, &args.group, committer, &mut cluster)?;

    if args.json {
        println!("{}", outcome.to_json_pretty()?);
    } else {
        let summary = outcome.summary();
        let mark = if outcome.succeeded() { "✓" } else { "✗" };
        println!(
            "{mark} Run {} finished: {} jobs in {} waves, {} failed",
            outcome.run_id,
            summary.jobs,
            outcome.waves.len(),
            summary.failed_jobs
        );
        println!(
            "  Records: {} in, {} out ({} bytes written)",
            summary.records_in, summary.records_out, summary.bytes_written
        );
    }
    Ok(outcome.succeeded())
}

fn validate_plan(path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let (parsed, config) = load_plan(path)?;
    let graph = jobwave_planner::compile(&parsed.plan, &config)?;
    println!("  {} operators → {} jobs", parsed.plan.len(), graph.len());
    Ok(())
}

fn explain_plan(
    path: &PathBuf,
    format: ExplainFormat,
    verbose: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let (parsed, config) = load_plan(path)?;
    let launcher = Launcher::new(config);
    let stdout = io::stdout();
    let mut sink = stdout.lock();
    launcher.explain(&parsed.plan, &mut sink, format, verbose)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{apply_run_args, RunArgs};
    use jobwave_core::config::RunConfig;
    use jobwave_planner::PlanConfig;

    fn args() -> RunArgs {
        RunArgs {
            group: "g".into(),
            chunk_size: None,
            no_combiner: false,
            poll_ms: None,
            fail_node: vec![],
            commit: false,
            json: false,
        }
    }

    #[test]
    fn plan_config_overrides_env_defaults() {
        let mut config = RunConfig::default();
        let doc = PlanConfig {
            last_input_chunk_size: Some(42),
            temp_dir: Some("/tmp/plan".into()),
            ..Default::default()
        };
        doc.apply(&mut config);
        assert_eq!(config.last_input_chunk_size, 42);
        assert_eq!(config.temp_dir, "/tmp/plan");
    }

    #[test]
    fn cli_flags_win_over_plan_config() {
        let mut config = RunConfig::default();
        PlanConfig {
            last_input_chunk_size: Some(42),
            ..Default::default()
        }
        .apply(&mut config);

        let args = RunArgs {
            chunk_size: Some(7),
            no_combiner: true,
            ..args()
        };
        apply_run_args(&mut config, &args);
        assert_eq!(config.last_input_chunk_size, 7);
        assert!(config.disable_combiner);
        assert_eq!(config.poll_interval_ms, 500);
    }
}
