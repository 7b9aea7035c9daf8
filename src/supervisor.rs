//! Fleet-level coordination
//!
//! Starts `instances` worker loops with a fixed stagger, replaces the whole
//! fleet on a periodic timer, and drains every worker when the shutdown token
//! fires. Each generation of workers shares one stop token, a child of the
//! shutdown token, so cancelling shutdown reaches every live generation and a
//! restart never has to clear a flag that old workers might still observe.

use crate::config::SupervisorConfig;
use crate::core::models::{FleetReport, GenerationReport, WorkerId, WorkerReport};
use crate::error::{SupervisorError, SupervisorResult};
use crate::terminator::ProcessTerminator;
use crate::worker::run_worker;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// One generation of running workers
struct Fleet {
    generation: u64,
    stop: CancellationToken,
    workers: Vec<(WorkerId, JoinHandle<WorkerReport>)>,
}

impl Fleet {
    /// Cancel this generation's stop token and wait for every worker to
    /// terminate its child and return.
    async fn stop_and_join(self) -> GenerationReport {
        self.stop.cancel();
        let mut reports = Vec::with_capacity(self.workers.len());
        for (id, handle) in self.workers {
            match handle.await {
                Ok(report) => reports.push(report),
                Err(join_err) => {
                    let err = SupervisorError::WorkerJoin {
                        worker: id,
                        message: join_err.to_string(),
                    };
                    error!(worker = %id, generation = self.generation, category = %err.category(), "{}", err);
                    reports.push(WorkerReport::new(id));
                }
            }
        }
        GenerationReport {
            generation: self.generation,
            workers: reports,
        }
    }
}

pub struct FleetSupervisor {
    config: Arc<SupervisorConfig>,
    terminator: ProcessTerminator,
    shutdown: CancellationToken,
}

impl FleetSupervisor {
    pub fn new(config: SupervisorConfig) -> SupervisorResult<Self> {
        config.validate()?;
        let terminator = ProcessTerminator::new(config.grace_period);
        Ok(Self {
            config: Arc::new(config),
            terminator,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Token that, once cancelled, drains the fleet and ends [`run`](Self::run).
    ///
    /// Cancelling an already cancelled token is a no-op, so repeated
    /// interrupts have no further effect.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run the fleet until shutdown, restarting it on every periodic tick.
    pub async fn run(&self) -> FleetReport {
        let mut report = FleetReport::default();
        let mut generation = 0;

        info!(instances = self.config.instances, "Starting {} workers", self.config.instances);
        let mut fleet = self.launch(generation).await;

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = self.next_restart() => {
                    info!(generation, "Restarting all workers...");
                    report.generations.push(fleet.stop_and_join().await);
                    if self.shutdown.is_cancelled() {
                        info!("All workers have finished");
                        return report;
                    }
                    generation += 1;
                    fleet = self.launch(generation).await;
                }
            }
        }

        info!(generation, "Stopping all workers...");
        report.generations.push(fleet.stop_and_join().await);
        info!("All workers have finished");
        report
    }

    /// Start workers `0..instances` in ascending order with the configured
    /// stagger between consecutive starts.
    ///
    /// Once shutdown has been requested the remaining workers are still
    /// started, without delay; they observe the cancelled token and return
    /// immediately, so every id is joined.
    async fn launch(&self, generation: u64) -> Fleet {
        let stop = self.shutdown.child_token();
        let mut workers = Vec::with_capacity(self.config.instances);

        for index in 0..self.config.instances {
            if index > 0 && !self.shutdown.is_cancelled() {
                tokio::select! {
                    _ = self.shutdown.cancelled() => {}
                    _ = sleep(self.config.stagger) => {}
                }
            }
            let id = WorkerId(index);
            info!(worker = %id, generation, "Worker {}: Starting", id);
            let handle = tokio::spawn(run_worker(
                id,
                Arc::clone(&self.config),
                self.terminator.clone(),
                stop.clone(),
            ));
            workers.push((id, handle));
        }

        Fleet {
            generation,
            stop,
            workers,
        }
    }

    async fn next_restart(&self) {
        match self.config.fleet_restart_interval {
            Some(interval) => sleep(interval).await,
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn quiet_config(instances: usize) -> SupervisorConfig {
        SupervisorConfig::new("sleep 30", instances)
            .with_silent(true)
            .with_stagger(Duration::from_millis(10))
            .with_grace_period(Duration::from_millis(500))
            .with_fleet_restart_interval(None)
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        assert!(FleetSupervisor::new(quiet_config(0)).is_err());
    }

    #[tokio::test]
    async fn shutdown_before_run_still_joins_every_worker() {
        let supervisor = FleetSupervisor::new(quiet_config(3)).expect("valid config");
        supervisor.shutdown_token().cancel();

        let report = supervisor.run().await;

        assert_eq!(report.generations.len(), 1);
        let generation = &report.generations[0];
        assert_eq!(
            generation.worker_ids(),
            vec![WorkerId(0), WorkerId(1), WorkerId(2)]
        );
        assert_eq!(report.total_spawns(), 0);
    }
}
