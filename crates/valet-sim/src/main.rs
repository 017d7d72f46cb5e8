//! Valet simulation CLI.
//!
//! Commands:
//! - run: Run the actor pipeline until arrivals end, a deadline, or Ctrl-C
//! - sample: Print a sampled arrival schedule without running any actors

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use valet_kernel::{ChannelCapacity, PolicyKind, SimConfig};
use valet_sim::report::{
    format_duration, timestamped_path, RunOutcome, RunSummary, DEFAULT_TIMELINE_LIMIT,
};
use valet_sim::runner::{sample_schedule, SimulationRunner};

#[derive(Parser)]
#[command(name = "valet-sim")]
#[command(version)]
#[command(about = "Automated valet facility simulation")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum PolicyArg {
    AcceptAll,
    RejectAll,
}

impl From<PolicyArg> for PolicyKind {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::AcceptAll => PolicyKind::AcceptAll,
            PolicyArg::RejectAll => PolicyKind::RejectAll,
        }
    }
}

/// Flags shared by `run` and `sample`.
#[derive(clap::Args)]
struct ArrivalArgs {
    /// Configuration file (.toml or .json)
    #[arg(long, env = "VALET_CONFIG")]
    config: Option<PathBuf>,

    /// Average arrivals per second
    #[arg(long)]
    arrival_rate: Option<f64>,

    /// Average park duration in seconds
    #[arg(long)]
    mean_park: Option<f64>,

    /// Random seed
    #[arg(long, env = "VALET_SEED")]
    seed: Option<u64>,

    /// Disable the random pause after each arrival
    #[arg(long)]
    no_jitter: bool,
}

impl ArrivalArgs {
    fn load(&self) -> Result<SimConfig> {
        let mut config = match &self.config {
            Some(path) => SimConfig::load(path)?,
            None => SimConfig::default(),
        };
        if let Some(rate) = self.arrival_rate {
            config.arrival_rate = rate;
        }
        if let Some(park) = self.mean_park {
            config.mean_park_secs = park;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        if self.no_jitter {
            config.max_emission_pause_ms = 0;
        }
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the simulation
    Run {
        #[command(flatten)]
        arrivals: ArrivalArgs,

        /// Stop generating arrivals after this many vehicles
        #[arg(long)]
        max_vehicles: Option<usize>,

        /// Cancel the run after this many seconds
        #[arg(long)]
        duration: Option<f64>,

        /// Length of one vehicle tracking tick in milliseconds
        #[arg(long)]
        tracking_tick_ms: Option<u64>,

        /// Admission policy
        #[arg(long, value_enum)]
        policy: Option<PolicyArg>,

        /// Admit at most this many vehicles that have not been released
        #[arg(long)]
        admission_capacity: Option<usize>,

        /// Vehicles send a departure request back to admission control
        #[arg(long)]
        departure_requests: bool,

        /// Bound every channel to this capacity (default: unbounded)
        #[arg(long)]
        bounded: Option<usize>,

        /// Write the run summary to a timestamped JSON file
        #[arg(long)]
        output: Option<PathBuf>,

        /// Keep per-vehicle timelines for at most this many vehicles
        #[arg(long, default_value_t = DEFAULT_TIMELINE_LIMIT)]
        timeline_limit: usize,
    },

    /// Print a sampled arrival schedule
    Sample {
        #[command(flatten)]
        arrivals: ArrivalArgs,

        /// Number of arrivals to draw
        #[arg(long, default_value = "10")]
        count: usize,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .init();

    match cli.command {
        Commands::Run {
            arrivals,
            max_vehicles,
            duration,
            tracking_tick_ms,
            policy,
            admission_capacity,
            departure_requests,
            bounded,
            output,
            timeline_limit,
        } => {
            let mut config = arrivals.load()?;
            if max_vehicles.is_some() {
                config.max_vehicles = max_vehicles;
            }
            if let Some(tick) = tracking_tick_ms {
                config.tracking_tick_ms = tick;
            }
            if let Some(policy) = policy {
                config.policy = policy.into();
            }
            if admission_capacity.is_some() {
                config.extensions.admission_capacity = admission_capacity;
            }
            if departure_requests {
                config.extensions.departure_requests = true;
            }
            if let Some(n) = bounded {
                config.channels.static_capacity = ChannelCapacity::Bounded(n);
                config.channels.vehicle_capacity = ChannelCapacity::Bounded(n);
            }
            config.validate()?;

            let duration = match duration {
                Some(secs) if !secs.is_finite() || secs <= 0.0 => {
                    anyhow::bail!("--duration must be a positive number of seconds, got {}", secs)
                }
                Some(secs) => Some(Duration::from_secs_f64(secs)),
                None => None,
            };
            if duration.is_none() && config.max_vehicles.is_none() {
                info!("No --duration or --max-vehicles given; press Ctrl-C to stop");
            }

            let summary = SimulationRunner::new(config)
                .with_duration(duration)
                .with_timeline_limit(timeline_limit)
                .run()
                .await?;

            print_summary(&summary);

            if let Some(output) = output {
                let output_path = timestamped_path(&output);
                summary.save(&output_path)?;
                println!("\nSummary saved to: {}", output_path.display());
            }

            if let RunOutcome::Failed { error } = &summary.outcome {
                anyhow::bail!("Simulation failed: {}", error);
            }
        }

        Commands::Sample { arrivals, count } => {
            let config = arrivals.load()?;
            let schedule = sample_schedule(&config, count)?;

            println!(
                "  {:>4} {:>10} {:>10} {:>10}",
                "#", "Arrive", "Park", "Depart"
            );
            for (i, row) in schedule.iter().enumerate() {
                println!(
                    "  {:>4} {:>10.3} {:>10.3} {:>10.3}",
                    i + 1,
                    row.arrive_time,
                    row.park_duration,
                    row.depart_time
                );
            }
        }
    }

    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("\n=== Simulation Result ===");
    println!("Outcome: {:?}", summary.outcome);
    println!("Wall time: {}", format_duration(summary.elapsed_ms()));
    println!("Simulated: {:.3}s", summary.sim_seconds);

    println!("\nVehicles:");
    println!("  Arrived: {}", summary.count("arrived"));
    println!("  Admitted: {}", summary.count("admitted"));
    println!("  Rejected: {}", summary.count("rejected"));
    println!("  Agents finished: {}", summary.count("agent_finished"));
    if summary.config.extensions.departure_requests {
        println!("  Departure requests: {}", summary.count("departure_requested"));
        println!("  Released: {}", summary.count("released"));
    }
    let unfinished = summary.unfinished();
    if unfinished > 0 {
        println!("  Still tracking at exit: {}", unfinished);
    }
    if summary.untracked_vehicles > 0 {
        println!(
            "  Without timeline: {} (limit {})",
            summary.untracked_vehicles, summary.timeline_limit
        );
    }

    println!("\nEvents:");
    for (kind, count) in &summary.counts {
        println!("  {:<20} {}", kind, count);
    }
}
