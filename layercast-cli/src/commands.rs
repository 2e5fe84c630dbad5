//! CLI command implementations

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;
use layercast_core::channel::BandwidthTrace;
use layercast_core::config::ExperimentConfig;
use layercast_core::scheduler::PolicyKind;
use layercast_core::tracing_setup::{CliLogLevel, init_tracing};
use layercast_sim::Simulation;
use tracing::info;

/// Available CLI commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run an experiment and print its report
    Run {
        /// JSON experiment file; the built-in sample is used when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Override the RNG seed
        #[arg(long)]
        seed: Option<u64>,
        /// Override the scheduling policy
        #[arg(long)]
        policy: Option<PolicyKind>,
        /// Stop once this many frames have been transmitted
        #[arg(long)]
        frames: Option<u64>,
        /// Stop after this many seconds of simulated time
        #[arg(long)]
        secs: Option<f64>,
        /// Console log level
        #[arg(long, value_enum, default_value_t = CliLogLevel::Info)]
        log_level: CliLogLevel,
        /// Directory for the per-run trace log
        #[arg(long)]
        logs_dir: Option<PathBuf>,
        /// Print the report as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// Check an experiment file without running it
    Validate {
        /// JSON experiment file
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Summarize a bandwidth trace file
    Trace {
        /// Trace file with one bytes-per-second sample per line
        path: PathBuf,
        /// Seconds covered by each sample
        #[arg(long, default_value_t = BandwidthTrace::DEFAULT_SAMPLE_INTERVAL)]
        sample_interval: f64,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Returns the error of whichever command fails
pub fn handle_command(command: Commands) -> Result<()> {
    match command {
        Commands::Run {
            config,
            seed,
            policy,
            frames,
            secs,
            log_level,
            logs_dir,
            json,
        } => {
            init_tracing(log_level.as_tracing_level(), logs_dir.as_deref())?;
            let overrides = RunOverrides {
                seed,
                policy,
                frames,
                secs,
            };
            run_experiment(config.as_deref(), overrides, json)
        }
        Commands::Validate { config } => validate_config(&config),
        Commands::Trace {
            path,
            sample_interval,
        } => show_trace(&path, sample_interval),
    }
}

/// Command-line values that take precedence over the experiment file.
#[derive(Debug, Default, Clone, Copy)]
pub struct RunOverrides {
    pub seed: Option<u64>,
    pub policy: Option<PolicyKind>,
    pub frames: Option<u64>,
    pub secs: Option<f64>,
}

/// Loads the experiment, applying environment then command-line overrides.
///
/// # Errors
/// - Fails if the experiment file cannot be read or parsed
pub fn load_config(path: Option<&Path>, overrides: RunOverrides) -> Result<ExperimentConfig> {
    let mut config = match path {
        Some(path) => ExperimentConfig::from_path(path)
            .with_context(|| format!("Failed to load experiment {}", path.display()))?,
        None => ExperimentConfig::sample(),
    };
    config.apply_env_overrides();

    if let Some(seed) = overrides.seed {
        config.simulation.seed = seed;
    }
    if let Some(policy) = overrides.policy {
        config.scheduler.policy = policy;
    }
    if let Some(frames) = overrides.frames {
        config.simulation.stop_after_frames = Some(frames);
    }
    if let Some(secs) = overrides.secs {
        config.simulation.stop_after_secs = Some(secs);
    }
    Ok(config)
}

/// Runs an experiment to completion and prints its report
///
/// # Errors
/// - Fails on configuration errors or when the run aborts
pub fn run_experiment(path: Option<&Path>, overrides: RunOverrides, json: bool) -> Result<()> {
    let config = load_config(path, overrides)?;
    let mut simulation = Simulation::new(config).context("Failed to build simulation")?;
    let report = simulation.run().context("Simulation aborted")?;

    if json {
        println!("{}", report.to_json()?);
    } else {
        print!("{}", report.summary());
    }

    if !report.success() {
        anyhow::bail!("{} invariant violations recorded", report.violations.len());
    }
    Ok(())
}

/// Builds every component of an experiment without running it
///
/// # Errors
/// - Fails if the file is unreadable or any component is rejected
pub fn validate_config(path: &Path) -> Result<()> {
    let config = ExperimentConfig::from_path(path)
        .with_context(|| format!("Failed to load experiment {}", path.display()))?;
    let streamers = config.streamers.len();
    let policy = config.scheduler.policy;

    let simulation = Simulation::new(config).context("Experiment is invalid")?;
    info!("Validated {}", path.display());

    println!("{} is valid", path.display());
    println!("  Streamers: {streamers}");
    println!("  Policy: {policy}");
    println!("  Channel: {}", simulation.channel().name());
    println!("  Seed: {}", simulation.seed());
    Ok(())
}

/// Prints summary statistics of a bandwidth trace
///
/// # Errors
/// - Fails if the trace cannot be read or holds no samples
pub fn show_trace(path: &Path, sample_interval: f64) -> Result<()> {
    let trace = BandwidthTrace::from_path(path, sample_interval)?;

    println!("Trace {}", path.display());
    println!("{:-<60}", "");
    println!("  Samples: {}", trace.len());
    println!("  Interval: {:.3}s", trace.sample_interval());
    println!("  Duration: {:.3}s", trace.duration());
    println!("  Mean bandwidth: {:.1} B/s", trace.mean());
    println!(
        "  Peak bandwidth: {} B/s",
        trace.samples().iter().max().copied().unwrap_or(0)
    );
    println!("  Outage intervals: {}", trace.outages());
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct TestCli {
        #[command(subcommand)]
        command: Commands,
    }

    #[test]
    fn test_parse_run_defaults() {
        let cli = TestCli::try_parse_from(["layercast", "run"]).unwrap();
        match cli.command {
            Commands::Run {
                config,
                seed,
                log_level,
                json,
                ..
            } => {
                assert!(config.is_none());
                assert!(seed.is_none());
                assert_eq!(log_level, CliLogLevel::Info);
                assert!(!json);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_run_overrides() {
        let cli = TestCli::try_parse_from([
            "layercast",
            "run",
            "--seed",
            "7",
            "--policy",
            "fifo",
            "--frames",
            "100",
            "--log-level",
            "debug",
            "--json",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                seed,
                policy,
                frames,
                log_level,
                json,
                ..
            } => {
                assert_eq!(seed, Some(7));
                assert_eq!(policy, Some(PolicyKind::Fifo));
                assert_eq!(frames, Some(100));
                assert_eq!(log_level, CliLogLevel::Debug);
                assert!(json);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_policy() {
        assert!(TestCli::try_parse_from(["layercast", "run", "--policy", "lifo"]).is_err());
    }

    #[test]
    fn test_validate_requires_config() {
        assert!(TestCli::try_parse_from(["layercast", "validate"]).is_err());
    }

    #[test]
    fn test_load_config_applies_overrides() {
        let overrides = RunOverrides {
            seed: Some(9),
            policy: Some(PolicyKind::Priority),
            frames: Some(10),
            secs: Some(2.5),
        };
        let config = load_config(None, overrides).unwrap();

        assert_eq!(config.simulation.seed, 9);
        assert_eq!(config.scheduler.policy, PolicyKind::Priority);
        assert_eq!(config.simulation.stop_after_frames, Some(10));
        assert_eq!(config.simulation.stop_after_secs, Some(2.5));
        assert_eq!(config.streamers.len(), 2);
    }

    #[test]
    fn test_validate_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let trace_path = dir.path().join("trace.txt");
        std::fs::write(&trace_path, "1000\n0\n2000\n").unwrap();

        let config_path = dir.path().join("experiment.json");
        let mut file = std::fs::File::create(&config_path).unwrap();
        write!(
            file,
            r#"{{
                "channel": {{ "kind": "trace", "path": "trace.txt" }},
                "streamers": [{{
                    "name": "alice",
                    "layers": ["Base"],
                    "arrival_rate": 30000.0,
                    "mean_frame_size": [1000.0],
                    "variance_frame_size": [10.0]
                }}]
            }}"#
        )
        .unwrap();

        validate_config(&config_path).unwrap();
        assert!(validate_config(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_show_trace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.txt");
        std::fs::write(&path, "500\n0\n1500\n").unwrap();

        show_trace(&path, 0.5).unwrap();
        assert!(show_trace(&dir.path().join("missing.txt"), 1.0).is_err());
    }
}
