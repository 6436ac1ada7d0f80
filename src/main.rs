use ingest_relay_lib::{
    cli::{parse_args, Command},
    commands::{enqueue_lines, open_queue, queue_stats, run_drain, CommandError},
    config::Config,
    logging::{format_error_report, init_logging},
};

use dotenv::dotenv;
use tracing::{error, info};

fn exit_with_report(context: &str, err: &(dyn std::error::Error + 'static)) -> ! {
    let error_report = format_error_report(err);
    error!(event = "command_failed", error = %err, error_report = %error_report, "{context}");
    eprintln!("{context}: {error_report}");
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    let args = parse_args();

    let mode = match &args.command {
        Command::Enqueue => "enqueue",
        Command::Drain(_) => "drain",
        Command::Stats => "stats",
    };
    let run = init_logging("ingest_relay", mode, &args.log_level);
    let run_span = tracing::info_span!(
        "relay_run",
        service = %run.service,
        mode = %run.mode,
        run_id = %run.run_id,
        build_commit = %run.build_commit
    );
    let _run_guard = run_span.enter();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(2);
        }
    };

    match args.command {
        Command::Enqueue => {
            let added = tokio::task::spawn_blocking(move || -> Result<usize, CommandError> {
                let queue = open_queue(&config)?;
                enqueue_lines(&queue, std::io::stdin().lock())
            })
            .await;
            match added {
                Ok(Ok(added)) => info!(event = "enqueue_complete", added, "requests queued"),
                Ok(Err(err)) => exit_with_report("enqueue failed", &err),
                Err(err) => exit_with_report("enqueue task failed", &err),
            }
        }
        Command::Stats => match open_queue(&config) {
            Ok(queue) => {
                let stats = queue_stats(&queue);
                println!(
                    "queue={} len={} segments={}",
                    queue.name(),
                    stats.len,
                    stats.segments
                );
            }
            Err(err) => exit_with_report("failed to open queue", &err),
        },
        Command::Drain(drain_args) => {
            let code = run_drain(config, drain_args).await;
            if code != 0 {
                std::process::exit(code);
            }
        }
    }
}
