//! Drives a supervisor to completion or cancellation, folding its events into
//! a summary as they arrive.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{info, warn};

use valet_kernel::{
    ArrivalProcess, EventSink, ExponentialArrivals, SimConfig, SimEvent, Supervisor, Vehicle,
};

use crate::report::{RunSummary, DEFAULT_TIMELINE_LIMIT};

/// Runs one simulation and turns its event stream into a [`RunSummary`].
pub struct SimulationRunner {
    config: SimConfig,
    duration: Option<Duration>,
    timeline_limit: usize,
}

impl SimulationRunner {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            duration: None,
            timeline_limit: DEFAULT_TIMELINE_LIMIT,
        }
    }

    /// Cancel the run after this much simulated time.
    pub fn with_duration(mut self, duration: Option<Duration>) -> Self {
        self.duration = duration;
        self
    }

    /// Keep per-vehicle timelines for at most `limit` vehicles.
    pub fn with_timeline_limit(mut self, limit: usize) -> Self {
        self.timeline_limit = limit;
        self
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Run with the configured collaborators until the arrivals end, the
    /// deadline passes, or Ctrl-C is pressed.
    pub async fn run(self) -> Result<RunSummary> {
        let supervisor = Supervisor::new(self.config.clone())?;
        let duration = self.duration;

        let shutdown = async move {
            let deadline = async {
                match duration {
                    Some(d) => tokio::time::sleep(d).await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                _ = deadline => info!("Duration elapsed, stopping simulation"),
                signal = tokio::signal::ctrl_c() => match signal {
                    Ok(()) => info!("Ctrl-C received, stopping simulation"),
                    // Without a signal handler only the deadline can stop the run
                    Err(e) => {
                        warn!(error = %e, "Could not listen for Ctrl-C");
                        std::future::pending::<()>().await
                    }
                },
            }
        };

        self.run_until(supervisor, shutdown).await
    }

    /// Run `supervisor`, cancelling it when `shutdown` resolves first.
    pub async fn run_until<F>(self, supervisor: Supervisor, shutdown: F) -> Result<RunSummary>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (events, rx) = EventSink::channel();
        let summary = RunSummary::new(self.config).with_timeline_limit(self.timeline_limit);
        let collector = tokio::spawn(fold(rx, summary));

        let handle = supervisor.with_events(events).start()?;
        let token = handle.cancellation_token();
        let watcher = tokio::spawn(async move {
            shutdown.await;
            token.cancel();
        });

        let result = handle.join().await;
        watcher.abort();

        // Every sink clone is gone once the actors are, which ends the stream
        let mut summary = collector.await?;
        summary.finish(&result);

        info!(
            outcome = ?summary.outcome,
            arrived = summary.count("arrived"),
            admitted = summary.count("admitted"),
            rejected = summary.count("rejected"),
            "Run complete"
        );
        Ok(summary)
    }
}

async fn fold(mut rx: mpsc::UnboundedReceiver<SimEvent>, mut summary: RunSummary) -> RunSummary {
    while let Some(event) = rx.recv().await {
        summary.record(&event);
    }
    summary
}

/// One row of a sampled arrival schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledArrival {
    pub arrive_time: f64,
    pub park_duration: f64,
    pub depart_time: f64,
}

/// Draw `count` arrivals from the configured process without running any actors.
///
/// Arrival times include the post-emission pause, as in a real run.
pub fn sample_schedule(config: &SimConfig, count: usize) -> Result<Vec<ScheduledArrival>> {
    config.validate()?;
    let mut process = ExponentialArrivals::new(config.arrival_rate, config.mean_park_secs, config.seed)?
        .with_max_pause(config.max_emission_pause());

    let mut now = 0.0;
    let mut schedule = Vec::with_capacity(count);
    for _ in 0..count {
        let Some(interval) = process.next_interval() else {
            break;
        };
        now += interval;
        let vehicle = Vehicle::new(now, process.park_duration())?;
        schedule.push(ScheduledArrival {
            arrive_time: vehicle.arrive_time,
            park_duration: vehicle.park_duration(),
            depart_time: vehicle.depart_time,
        });
        now += process.emission_pause().as_secs_f64();
    }
    Ok(schedule)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::RunOutcome;

    fn quick_config() -> SimConfig {
        SimConfig {
            arrival_rate: 4.0,
            mean_park_secs: 2.0,
            max_emission_pause_ms: 0,
            tracking_tick_ms: 100,
            seed: Some(17),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_run_completes() {
        let config = SimConfig {
            max_vehicles: Some(6),
            ..quick_config()
        };
        let runner = SimulationRunner::new(config.clone());
        let supervisor = Supervisor::new(config).unwrap();

        let summary = runner
            .run_until(supervisor, std::future::pending())
            .await
            .unwrap();

        assert_eq!(summary.outcome, RunOutcome::Completed);
        assert_eq!(summary.count("arrived"), 6);
        assert_eq!(summary.count("admitted"), 6);
        assert_eq!(summary.count("agent_finished"), 6);
        assert_eq!(summary.vehicles.len(), 6);
        assert_eq!(summary.unfinished(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_run_keeps_counts_past_the_timeline_limit() {
        let config = SimConfig {
            max_vehicles: Some(40),
            ..quick_config()
        };
        let runner = SimulationRunner::new(config.clone()).with_timeline_limit(5);
        let supervisor = Supervisor::new(config).unwrap();

        let summary = runner
            .run_until(supervisor, std::future::pending())
            .await
            .unwrap();

        assert_eq!(summary.outcome, RunOutcome::Completed);
        assert_eq!(summary.vehicles.len(), 5);
        assert_eq!(summary.untracked_vehicles, 35);
        assert_eq!(summary.count("arrived"), 40);
        assert_eq!(summary.count("agent_finished"), 40);
        assert_eq!(summary.unfinished(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cancels_unbounded_run() {
        let config = quick_config();
        let runner = SimulationRunner::new(config.clone());
        let supervisor = Supervisor::new(config).unwrap();

        let summary = runner
            .run_until(supervisor, tokio::time::sleep(Duration::from_secs(3)))
            .await
            .unwrap();

        assert_eq!(summary.outcome, RunOutcome::Cancelled);
        assert!(summary.count("arrived") > 0);
        assert!(summary.sim_seconds <= 3.01);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_honors_duration() {
        let summary = SimulationRunner::new(quick_config())
            .with_duration(Some(Duration::from_secs(2)))
            .run()
            .await
            .unwrap();
        assert_eq!(summary.outcome, RunOutcome::Cancelled);
    }

    #[test]
    fn test_sample_schedule_is_reproducible() {
        let config = SimConfig {
            seed: Some(5),
            ..Default::default()
        };
        let a = sample_schedule(&config, 10).unwrap();
        let b = sample_schedule(&config, 10).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 10);

        for pair in a.windows(2) {
            assert!(pair[1].arrive_time > pair[0].arrive_time);
        }
        for row in &a {
            assert!(row.depart_time > row.arrive_time);
        }
    }

    #[test]
    fn test_sample_schedule_rejects_bad_config() {
        let config = SimConfig {
            arrival_rate: -2.0,
            ..Default::default()
        };
        assert!(sample_schedule(&config, 3).is_err());
    }
}
