use inference_warden::commands::Cli;
use inference_warden::utils::init_logger;
use inference_warden::{signal, FleetReport, FleetSupervisor};
use std::process::ExitCode;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();

    if let Err(err) = init_logger(cli.log_level.as_deref(), cli.log_file.clone()) {
        eprintln!("Failed to initialize logging: {}", err);
        return ExitCode::from(1);
    }

    let supervisor = match FleetSupervisor::new(cli.to_config()) {
        Ok(supervisor) => supervisor,
        Err(err) => {
            error!("{}", err);
            return ExitCode::from(1);
        }
    };

    let _signal_guard = match signal::install(supervisor.shutdown_token()) {
        Ok(guard) => guard,
        Err(err) => {
            error!("Failed to install signal handlers: {}", err);
            return ExitCode::from(1);
        }
    };

    let report = supervisor.run().await;
    log_summary(&report);
    ExitCode::SUCCESS
}

fn log_summary(report: &FleetReport) {
    info!(
        generations = report.generations.len(),
        spawns = report.total_spawns(),
        "Supervisor finished"
    );
    for generation in &report.generations {
        for worker in &generation.workers {
            info!(
                generation = generation.generation,
                worker = %worker.id,
                spawns = worker.spawns,
                exits = worker.exits,
                stalls = worker.stalls,
                read_errors = worker.read_errors,
                spawn_failures = worker.spawn_failures,
                "Worker {} summary",
                worker.id
            );
        }
    }
}
