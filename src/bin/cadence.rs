//! CLI binary for cadence.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use cadence::config::HostConfig;
use cadence::runner::{RunRequest, TriggerType};
use cadence::Host;
use cadence_watch::activity::ActivitySink;
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Cadence: scheduled modules and job-board watching.
#[derive(Parser)]
#[command(name = "cadence", version, about)]
struct Cli {
    /// Path to a TOML or JSON configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler until interrupted.
    Serve,

    /// Run one module now.
    Run {
        module: String,
        /// `key=value` pairs; values are JSON-decoded when possible.
        #[arg(long = "kwargs", value_name = "KEY=VALUE", num_args = 1..)]
        kwargs: Vec<String>,
        /// Do not send the module's HTML.
        #[arg(long)]
        no_email: bool,
        /// Print the module's HTML to stdout.
        #[arg(long)]
        print_html: bool,
    },

    /// List configured jobs with their next fire time.
    ListJobs,

    /// Load the config and compile every job.
    ValidateConfig,

    /// Show upcoming fire times.
    Preview {
        /// Only this job.
        job_id: Option<String>,
        #[arg(short = 'n', long, default_value_t = 5)]
        count: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (config, path) = HostConfig::load(cli.config.as_deref()).context("loading config")?;
    let _log_guard = init_tracing(&config);
    match &path {
        Some(path) => info!(config = %path.display(), "config loaded"),
        None => info!("no config file found; using defaults"),
    }

    cadence_watch::registry::install_global(cadence_watch::default_registry()?);

    match cli.command {
        Command::Serve => serve(config).await,
        Command::Run {
            module,
            kwargs,
            no_email,
            print_html,
        } => run_module(config, module, &kwargs, !no_email, print_html).await,
        Command::ListJobs => list_jobs(config),
        Command::ValidateConfig => validate_config(config),
        Command::Preview { job_id, count } => preview(config, job_id.as_deref(), count),
    }
}

/// `RUST_LOG` wins, then `LOG_LEVEL`, then `info`. A daily rolling file is
/// added when `log_dir` is configured; the returned guard flushes it.
fn init_tracing(config: &HostConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into());
        EnvFilter::try_new(level.to_lowercase()).unwrap_or_else(|_| EnvFilter::new("info"))
    });

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "cadence.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(file_layer)
        .init();
    guard
}

async fn serve(config: HostConfig) -> anyhow::Result<()> {
    let host = Host::from_config(config)?;
    let (scheduler, failures) = host.scheduler();
    if !failures.is_empty() {
        error!(count = failures.len(), "some jobs were not registered");
    }
    if scheduler.jobs().is_empty() {
        anyhow::bail!("no valid jobs configured");
    }

    let mut controller = scheduler.run();
    info!(jobs = controller.job_ids().len(), "scheduler running; Ctrl-C to stop");
    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;

    info!("shutting down");
    controller.stop();
    if !controller.join(Some(Duration::from_secs(30))).await {
        error!("scheduler did not stop within 30s");
    }
    Ok(())
}

async fn run_module(
    config: HostConfig,
    module: String,
    pairs: &[String],
    send_email: bool,
    print_html: bool,
) -> anyhow::Result<()> {
    let host = Host::from_config(config)?;
    let kwargs = parse_kwargs(pairs)?;
    let request = RunRequest::new(&module)
        .with_kwargs(kwargs.clone())
        .with_send_email(send_email)
        .with_trigger_type(TriggerType::Cli);
    let run_id = request.run_id.clone();

    let result = host.runner.run_module_once(request).await;
    let mut record = json!({
        "source": "cli",
        "event": "cli_run",
        "run_id": run_id,
        "module": module,
        "kwargs": kwargs,
        "send_email": send_email,
    });
    match result {
        Ok(report) => {
            record["status"] = json!("ok");
            record["summary"] = json!(report.describe());
            host.activity.record(record);
            if print_html {
                if let Some(html) = &report.output.html {
                    println!("{html}");
                }
            }
            println!("{}: {}", report.module, report.describe());
            Ok(())
        }
        Err(e) => {
            record["status"] = json!(e.status());
            record["error"] = json!(e.to_string());
            host.activity.record_error(record);
            Err(anyhow::Error::new(e).context(format!("module '{module}' failed")))
        }
    }
}

/// `key=value` → JSON map; values that parse as JSON keep their type.
fn parse_kwargs(pairs: &[String]) -> anyhow::Result<Map<String, Value>> {
    let mut out = Map::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("kwargs must be KEY=VALUE (got '{pair}')"))?;
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_owned()));
        out.insert(key.trim().to_owned(), value);
    }
    Ok(out)
}

fn list_jobs(config: HostConfig) -> anyhow::Result<()> {
    let host = Host::from_config(config)?;
    let (scheduler, failures) = host.scheduler();
    let now = Utc::now();
    for job in scheduler.jobs() {
        let next = job
            .trigger
            .next_fire_time(None, now)
            .map(|t| t.with_timezone(&host.timezone).to_rfc3339())
            .unwrap_or_else(|| "never".into());
        println!("{}\t{}\t{}\t{}", job.id, job.module, job.trigger, next);
    }
    for failure in &failures {
        eprintln!("invalid: {failure}");
    }
    Ok(())
}

fn validate_config(config: HostConfig) -> anyhow::Result<()> {
    let host = Host::from_config(config)?;
    let (scheduler, failures) = host.scheduler();
    for job in scheduler.jobs() {
        println!("ok\t{}\t{}", job.id, job.trigger);
    }
    for failure in &failures {
        println!("error\t{failure}");
    }
    if !failures.is_empty() {
        anyhow::bail!("{} job(s) failed validation", failures.len());
    }
    println!("{} job(s) valid", scheduler.jobs().len());
    Ok(())
}

fn preview(config: HostConfig, job_id: Option<&str>, count: usize) -> anyhow::Result<()> {
    let host = Host::from_config(config)?;
    let (scheduler, _) = host.scheduler();
    let now = Utc::now();
    let mut shown = 0;
    for job in scheduler.jobs() {
        if job_id.is_some_and(|id| id != job.id) {
            continue;
        }
        shown += 1;
        println!("{} ({})", job.id, job.trigger);
        for at in job.trigger.preview(count, now) {
            println!("  {}", at.with_timezone(&host.timezone).to_rfc3339());
        }
    }
    if let (Some(id), 0) = (job_id, shown) {
        anyhow::bail!("no valid job with id '{id}'");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use cadence::scheduler::{compile, TriggerSpec};

    #[test]
    fn kwargs_pairs_decode_json() {
        let pairs = vec![
            "name=ben".to_owned(),
            "items=[1,2]".to_owned(),
            "skip_network=true".to_owned(),
            "note=a=b".to_owned(),
        ];
        let kwargs = parse_kwargs(&pairs).unwrap();
        assert_eq!(kwargs["name"], json!("ben"));
        assert_eq!(kwargs["items"], json!([1, 2]));
        assert_eq!(kwargs["skip_network"], json!(true));
        assert_eq!(kwargs["note"], json!("a=b"));
        assert!(parse_kwargs(&["bare".to_owned()]).is_err());
    }

    #[test]
    fn trigger_compiles_from_cli_shape() {
        let obj = json!({"interval": {"minutes": 5}});
        let spec = TriggerSpec::from_container(obj.as_object().unwrap()).unwrap();
        let trigger = compile(&spec, chrono_tz::Tz::UTC).unwrap();
        assert_eq!(trigger.preview(3, Utc::now()).len(), 3);
    }
}
