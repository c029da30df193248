use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use judge_dispatcher::{
    core::domain::Language,
    interactive::{InteractiveConfig, OrchestrateRequest, Orchestrator, PipeMode},
    set_panic_hook,
};

/// Runs one interactive case and prints the verdict as a single JSON line.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(long, default_value = "/workspace")]
    workdir: PathBuf,
    #[arg(long, default_value = "/teacher")]
    teacher_dir: PathBuf,
    #[arg(long, default_value = "/src")]
    student_dir: PathBuf,
    #[arg(long, value_parser = parse_language)]
    student_lang: Language,
    #[arg(long, value_parser = parse_language)]
    teacher_lang: Language,
    #[arg(long)]
    teacher_first: bool,
    /// ms
    #[arg(long)]
    time_limit: u64,
    /// KB
    #[arg(long)]
    mem_limit: u64,
    #[arg(long)]
    case_path: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = PipeMode::Auto)]
    pipe_mode: PipeMode,
}

fn parse_language(key: &str) -> Result<Language, String> {
    Language::from_key(key).ok_or_else(|| format!("unknown language {:?}", key))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // stdout carries the report line only
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    set_panic_hook();

    let cli = Cli::parse();
    let request = OrchestrateRequest {
        workdir: cli.workdir,
        teacher_dir: cli.teacher_dir,
        student_dir: cli.student_dir,
        student_lang: cli.student_lang,
        teacher_lang: cli.teacher_lang,
        teacher_first: cli.teacher_first,
        time_limit_ms: cli.time_limit,
        memory_limit_kb: cli.mem_limit,
        case_path: cli.case_path,
        pipe_mode: cli.pipe_mode,
    };
    let keep_tmp = std::env::var_os("KEEP_INTERACTIVE_TMP").is_some_and(|v| v == "1");

    let orchestrator = Orchestrator::new(InteractiveConfig::from_env(), keep_tmp);
    let report = orchestrator.run(&request).await;
    println!("{}", serde_json::to_string(&report)?);
    Ok(())
}
