//! mdflow CLI
//!
//! # 使用例
//!
//! ```bash
//! # 推論サービスに1回だけ問い合わせる
//! mdflow ask "List common DNS enumeration techniques" --json
//!
//! # ワークフローの一覧と検証
//! mdflow list
//! mdflow validate workflows/basic-recon.md
//!
//! # ワークフローを実行
//! mdflow run workflows/basic-recon.md --param target=10.0.0.5 --dump job.json
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use mdflow::archive::ResultArchive;
use mdflow::config::{EngineSettings, Settings};
use mdflow::engine::{Job, JobEvent, JobStatus, Orchestrator};
use mdflow::provider::{create_provider, InferenceClient, InferenceRequest};
use mdflow::worker::WorkerRegistry;
use mdflow::workflow::{validate, WorkflowParser};

type CliResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Parser)]
#[command(name = "mdflow")]
#[command(about = "Run Markdown-defined workflows against LLM-backed workers", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a single prompt to the inference service
    Ask {
        prompt: String,

        /// JSON schema file for the response
        #[arg(short, long)]
        schema: Option<PathBuf>,

        /// Let the service add context from the internet
        #[arg(short, long)]
        context: bool,

        /// Always print the response as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// List workflow files
    List {
        /// Directory to scan (default: paths.workflows_dir)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Parse and validate a workflow file
    Validate { file: PathBuf },

    /// Run a workflow
    Run {
        file: PathBuf,

        /// Job parameter (repeatable), referenced as ${job.<key>}
        #[arg(short, long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
        params: Vec<(String, String)>,

        /// Skip the final report
        #[arg(long)]
        no_report: bool,

        /// Write the final job snapshot as JSON
        #[arg(long, value_name = "FILE")]
        dump: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match Settings::load(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("{}", err);
            return ExitCode::FAILURE;
        }
    };

    let _guard = match mdflow::telemetry::init(settings.logging(), cli.verbose) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("ログ出力を初期化できません: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Commands::Ask {
            prompt,
            schema,
            context,
            json,
        } => ask(&settings, prompt, schema.as_deref(), context, json).await,
        Commands::List { dir } => list(&settings, dir.as_deref()),
        Commands::Validate { file } => validate_file(&file),
        Commands::Run {
            file,
            params,
            no_report,
            dump,
        } => run(&settings, &file, params, no_report, dump.as_deref()).await,
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            error!(error = %err, "コマンドが失敗しました");
            eprintln!("error: {}", err);
            ExitCode::FAILURE
        }
    }
}

async fn ask(
    settings: &Settings,
    prompt: String,
    schema: Option<&Path>,
    context: bool,
    json: bool,
) -> CliResult<ExitCode> {
    let client = create_provider(settings.inference())?;
    let schema = match schema {
        Some(path) => Some(serde_json::from_str::<Value>(&std::fs::read_to_string(path)?)?),
        None => None,
    };

    let request = InferenceRequest::new(prompt)
        .with_internet_context(context || settings.inference().add_context_from_internet)
        .with_schema(schema);
    let response = client.invoke(&request).await?;

    match response {
        Value::String(text) if !json => println!("{}", text),
        other => println!("{}", serde_json::to_string_pretty(&other)?),
    }
    Ok(ExitCode::SUCCESS)
}

fn list(settings: &Settings, dir: Option<&Path>) -> CliResult<ExitCode> {
    let dir = dir.unwrap_or(&settings.paths().workflows_dir);
    let files = Orchestrator::list_available_workflows(dir)?;

    if files.is_empty() {
        println!("No workflows found in {}", dir.display());
        return Ok(ExitCode::SUCCESS);
    }
    for file in files {
        println!("{:<32} {:>8} bytes  {}", file.name, file.size, file.path.display());
    }
    Ok(ExitCode::SUCCESS)
}

fn validate_file(file: &Path) -> CliResult<ExitCode> {
    let workflow = WorkflowParser::new().parse_file(file)?;
    let report = validate(&workflow);

    println!("{} ({})", workflow.name(), workflow.id());
    for phase in workflow.phases() {
        println!("  {}. {}", phase.order, phase.name);
        for name in &phase.tasks {
            if let Some(task) = workflow.task(name) {
                println!("     - {} [{} / {}]", task.name(), task.worker(), task.action());
            }
        }
    }
    for warning in &report.warnings {
        println!("warning: {}", warning);
    }
    for err in &report.errors {
        println!("error: {}", err);
    }

    if report.valid {
        println!("OK: {} tasks", workflow.tasks().len());
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

async fn run(
    settings: &Settings,
    file: &Path,
    params: Vec<(String, String)>,
    no_report: bool,
    dump: Option<&Path>,
) -> CliResult<ExitCode> {
    let engine = EngineSettings {
        generate_report: settings.engine().generate_report && !no_report,
        ..settings.engine().clone()
    };
    let client: Arc<dyn InferenceClient> = Arc::from(create_provider(settings.inference())?);
    let registry = WorkerRegistry::bundled(client, settings);

    let (sender, mut receiver) = mpsc::unbounded_channel();
    let orchestrator = Orchestrator::new(registry, engine).with_events(sender);
    let workflow = orchestrator.load_workflow(file)?;

    let archive = ResultArchive::new(&settings.paths().results_dir);
    let printer = tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            print_event(&event);
            if let Err(err) = archive.record(&event) {
                warn!(error = %err, "結果を保存できませんでした");
            }
        }
    });

    let params: BTreeMap<String, Value> = params
        .into_iter()
        .map(|(key, value)| (key, Value::String(value)))
        .collect();

    let result = {
        let execution = orchestrator.execute_workflow(workflow.id(), params);
        tokio::pin!(execution);
        tokio::select! {
            result = &mut execution => result,
            _ = tokio::signal::ctrl_c() => {
                warn!("中断を受け付けました。ジョブを停止します");
                for job in orchestrator.active_jobs() {
                    if let Err(err) = orchestrator.stop_job(&job.id) {
                        warn!(job_id = %job.id, error = %err, "ジョブを停止できませんでした");
                    }
                }
                execution.await
            }
        }
    };

    let job = orchestrator.jobs().pop();
    drop(orchestrator);
    printer.await?;

    if let Err(err) = &result {
        eprintln!("error: {}", err);
    }
    let Some(job) = job else {
        return Ok(ExitCode::FAILURE);
    };

    print_summary(&job);
    if let Some(path) = dump {
        std::fs::write(path, job.to_json()?)?;
        info!(path = %path.display(), "ジョブを書き出しました");
    }

    Ok(if job.status == JobStatus::Completed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_event(event: &JobEvent) {
    match event {
        JobEvent::JobStarted { job_id, workflow_id } => println!("[job] {} started ({})", job_id, workflow_id),
        JobEvent::TaskStarted { task, worker, .. } => println!("[{}] {} ...", worker, task),
        JobEvent::TaskCompleted { task, worker, .. } => println!("[{}] {} done", worker, task),
        JobEvent::TaskFailed {
            task,
            worker,
            error,
            continued,
            ..
        } => {
            let suffix = if *continued { " (continuing)" } else { "" };
            println!("[{}] {} failed: {}{}", worker, task, error, suffix);
        }
        JobEvent::JobCompleted { job_id, duration_ms } => println!("[job] {} completed in {} ms", job_id, duration_ms),
        JobEvent::JobFailed { job_id, error } => println!("[job] {} failed: {}", job_id, error),
        JobEvent::JobStopped { job_id } => println!("[job] {} stopped", job_id),
        JobEvent::ReportGenerated { .. } => println!("[report] final report generated"),
        JobEvent::ReportFailed { error, .. } => println!("[report] final report failed: {}", error),
    }
}

fn print_summary(job: &Job) {
    println!();
    println!("Workflow:  {} ({})", job.workflow_name, job.workflow_id);
    println!("Job:       {}", job.id);
    println!("Status:    {}", job.status);
    println!("Completed: {}", job.completed_tasks.len());
    println!("Failed:    {}", job.failed_tasks.len());
    if let Some(duration_ms) = job.duration_ms {
        println!("Duration:  {} ms", duration_ms);
    }
    if let Some(err) = &job.error {
        println!("Error:     {}", err);
    }
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_ask_short_flags() {
        let cli = Cli::try_parse_from(["mdflow", "ask", "hello", "-s", "schema.json", "-c", "-j"]).unwrap();

        match cli.command {
            Commands::Ask {
                prompt,
                schema,
                context,
                json,
            } => {
                assert_eq!(prompt, "hello");
                assert_eq!(schema, Some(PathBuf::from("schema.json")));
                assert!(context);
                assert!(json);
            }
            _ => panic!("Expected Ask command"),
        }
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_config_flag_is_long_only() {
        let cli = Cli::try_parse_from(["mdflow", "list", "--config", "mdflow.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("mdflow.toml")));
    }
}
