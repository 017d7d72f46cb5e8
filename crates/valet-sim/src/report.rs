//! Run summaries for valet simulations.
//!
//! Folds the kernel's event stream into:
//! - counts per event kind
//! - a timeline per vehicle, in arrival order, for the first vehicles only
//! - wall-clock start/end and how the run ended
//!
//! Events are folded as they arrive and never buffered, so an unbounded run
//! holds at most [`RunSummary::timeline_limit`] timelines.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use valet_kernel::{EventKind, ScopeSummary, SimConfig, SimEvent, VehicleId};

/// Vehicles that get a full timeline unless the runner says otherwise.
pub const DEFAULT_TIMELINE_LIMIT: usize = 1_000;

fn default_timeline_limit() -> usize {
    DEFAULT_TIMELINE_LIMIT
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every actor finished on its own (bounded or scripted arrivals).
    Completed,
    /// Stopped from outside: Ctrl-C or the `--duration` deadline.
    Cancelled,
    /// A task failed and the failure policy stopped the run.
    Failed { error: String },
}

impl RunOutcome {
    pub fn from_result(result: &valet_kernel::Result<ScopeSummary>) -> Self {
        match result {
            Ok(summary) if summary.cancelled > 0 => RunOutcome::Cancelled,
            Ok(_) => RunOutcome::Completed,
            Err(e) => RunOutcome::Failed {
                error: e.to_string(),
            },
        }
    }
}

/// One entry of a vehicle timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    /// Simulation seconds
    pub at: f64,
    pub event: String,
}

/// Everything observed about one vehicle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleTimeline {
    pub vehicle: VehicleId,
    pub arrive_time: f64,
    /// Scheduled departure (known from the arrival event)
    pub depart_time: Option<f64>,
    pub admitted: bool,
    /// Result of the departure check, if the agent got that far
    pub departure_requested: Option<bool>,
    pub finished: bool,
    pub events: Vec<TimelineEntry>,
}

impl VehicleTimeline {
    fn new(vehicle: VehicleId, at: f64) -> Self {
        Self {
            vehicle,
            arrive_time: at,
            depart_time: None,
            admitted: false,
            departure_requested: None,
            finished: false,
            events: Vec::new(),
        }
    }
}

/// Results from a single simulation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Effective configuration
    pub config: SimConfig,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    /// Simulation time of the last observed event
    pub sim_seconds: f64,
    /// Number of events seen, by kind
    pub counts: BTreeMap<String, usize>,
    /// Per-vehicle timelines, in the order vehicles were first seen
    pub vehicles: Vec<VehicleTimeline>,
    /// Most timelines kept; later vehicles only show up in `counts`
    #[serde(default = "default_timeline_limit")]
    pub timeline_limit: usize,
    /// Vehicles that arrived after the timeline limit was reached
    #[serde(default)]
    pub untracked_vehicles: usize,
    #[serde(skip)]
    index: HashMap<VehicleId, usize>,
}

impl RunSummary {
    pub fn new(config: SimConfig) -> Self {
        let now = Utc::now();
        Self {
            config,
            started_at: now,
            ended_at: now,
            outcome: RunOutcome::Completed,
            sim_seconds: 0.0,
            counts: BTreeMap::new(),
            vehicles: Vec::new(),
            timeline_limit: DEFAULT_TIMELINE_LIMIT,
            untracked_vehicles: 0,
            index: HashMap::new(),
        }
    }

    /// Keep timelines for at most `limit` vehicles.
    pub fn with_timeline_limit(mut self, limit: usize) -> Self {
        self.timeline_limit = limit;
        self
    }

    /// Fold one event into the summary.
    pub fn record(&mut self, event: &SimEvent) {
        let name = event.kind.name();
        *self.counts.entry(name.to_string()).or_default() += 1;
        self.sim_seconds = self.sim_seconds.max(event.at);

        let slot = match self.index.get(&event.vehicle) {
            Some(&slot) => slot,
            None if self.vehicles.len() >= self.timeline_limit => {
                // Every vehicle's first event is its arrival
                if matches!(event.kind, EventKind::Arrived { .. }) {
                    self.untracked_vehicles += 1;
                }
                return;
            }
            None => {
                self.vehicles
                    .push(VehicleTimeline::new(event.vehicle, event.at));
                self.index.insert(event.vehicle, self.vehicles.len() - 1);
                self.vehicles.len() - 1
            }
        };
        let timeline = &mut self.vehicles[slot];

        match &event.kind {
            EventKind::Arrived { depart_time } => {
                timeline.arrive_time = event.at;
                timeline.depart_time = Some(*depart_time);
            }
            EventKind::Admitted => timeline.admitted = true,
            EventKind::DepartureChecked { requested } => {
                timeline.departure_requested = Some(*requested)
            }
            EventKind::AgentFinished => timeline.finished = true,
            _ => {}
        }
        timeline.events.push(TimelineEntry {
            at: event.at,
            event: name.to_string(),
        });
    }

    /// Close the summary with the run's result.
    pub fn finish(&mut self, result: &valet_kernel::Result<ScopeSummary>) {
        self.ended_at = Utc::now();
        self.outcome = RunOutcome::from_result(result);
    }

    /// Number of events of the given kind (e.g. `"admitted"`).
    pub fn count(&self, kind: &str) -> usize {
        self.counts.get(kind).copied().unwrap_or(0)
    }

    /// Admitted vehicles whose agent never finished, tracked or not.
    pub fn unfinished(&self) -> usize {
        self.count("admitted")
            .saturating_sub(self.count("agent_finished"))
    }

    pub fn elapsed_ms(&self) -> u64 {
        (self.ended_at - self.started_at).num_milliseconds().max(0) as u64
    }

    /// Save the summary to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load a summary from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let mut summary: RunSummary = serde_json::from_str(&json)?;
        summary.index = summary
            .vehicles
            .iter()
            .enumerate()
            .map(|(slot, v)| (v.vehicle, slot))
            .collect();
        Ok(summary)
    }
}

/// Generate a timestamped output path from the given path.
/// e.g., "run.json" -> "run-20260108-010530.json"
pub fn timestamped_path(path: &Path) -> PathBuf {
    let timestamp = Local::now().format("%Y%m%d-%H%M%S");
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("run");
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("json");
    let parent = path.parent().unwrap_or(Path::new("."));
    parent.join(format!("{}-{}.{}", stem, timestamp, ext))
}

/// Format a duration in milliseconds for display.
pub fn format_duration(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        format!("{:.1}m", ms as f64 / 60_000.0)
    }
}
