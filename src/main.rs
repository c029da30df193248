use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use judge_dispatcher::{
    Collaborators, Scheduler,
    backend::HttpBackend,
    config::Config,
    docker::DockerExecutor,
    set_panic_hook,
    stubs::{IsolatedNetwork, LocalAssetStore, SkipAnalysis},
};

/// Judges submissions placed under the submission directory.
///
/// Reads one command per line on stdin: `<submission_id> <problem_id>` hands a
/// submission over, `status` prints the scheduler status as JSON.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Overrides MAX_CONTAINER_NUMBER.
    #[arg(long)]
    max_containers: Option<usize>,
    /// Overrides QUEUE_SIZE.
    #[arg(long)]
    queue_size: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    set_panic_hook();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(v) = cli.max_containers {
        config.dispatcher.max_container_number = v;
    }
    if let Some(v) = cli.queue_size {
        config.dispatcher.queue_size = v;
    }

    let collaborators = Collaborators {
        executor: Arc::new(DockerExecutor::connect(config.submission.docker_url.as_deref())?),
        analyzer: Arc::new(SkipAnalysis),
        network: Arc::new(IsolatedNetwork),
        assets: Arc::new(LocalAssetStore::new(config.storage.testdata_root.clone())),
        backend: Arc::new(HttpBackend::new(&config.backend.api)?),
        custom_checker: None,
    };
    let scheduler = Scheduler::new(&config, collaborators);
    let runner = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run().await })
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
            line = lines.next_line() => match line? {
                Some(line) => intake(&scheduler, line.trim()).await,
                None => break,
            },
        }
    }

    scheduler.stop();
    runner.await?;
    Ok(())
}

async fn intake(scheduler: &Scheduler, line: &str) {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (None, _) => {}
        (Some("status"), None) => match serde_json::to_string(&scheduler.status()) {
            Ok(status) => println!("{}", status),
            Err(e) => tracing::error!("failed to serialize status: {}", e),
        },
        (Some(submission_id), Some(problem_id)) => match problem_id.parse::<i64>() {
            Ok(problem_id) => {
                if let Err(e) = scheduler.handle(submission_id, problem_id).await {
                    tracing::warn!(submission_id, retriable = e.is_retriable(), "submission refused: {}", e);
                }
            }
            Err(_) => tracing::warn!("invalid problem id {:?}", problem_id),
        },
        _ => tracing::warn!("unrecognized command {:?}", line),
    }
}
