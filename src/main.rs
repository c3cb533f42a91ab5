use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use secrecy::SecretString;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

use sleuth_core::agent::Agent;
use sleuth_core::events::{
    ChannelEmitter, Emitter, ErrorData, Event, EventType, InfoData, PlanCreatedData, ReportGeneratedData,
    StepFindingsData, StepStartedData,
};
use sleuth_core::ids::SessionId;
use sleuth_engine::{
    CompactingAgent, CompactionConfig, Compactor, EstimatingCounter, ExecutorConfig, RoundOutcome, Session,
    SessionDeps,
};
use sleuth_llm::{OpenAiAgent, OpenAiConfig, ReliableAgent, ReliableConfig};
use sleuth_settings::{load_settings, load_settings_from_path, SleuthSettings};
use sleuth_store::{Database, EventRecorder, EventRepo, Ledger};
use sleuth_telemetry::{init_telemetry, parse_level, TelemetryConfig};

/// Investigate a packet capture through planned, multi-step agent rounds.
#[derive(Parser, Debug)]
#[command(name = "sleuth", version)]
struct Cli {
    /// Capture file under investigation.
    pcap_path: String,

    /// Continue an existing session instead of starting a new one.
    #[arg(long, value_name = "SESSION_ID")]
    resume: Option<String>,

    /// Settings file (defaults to ~/.sleuth/settings.json).
    #[arg(long, value_name = "FILE")]
    settings: Option<PathBuf>,

    /// Session database (overrides storage.dbPath).
    #[arg(long, value_name = "FILE")]
    db: Option<PathBuf>,

    /// Run a single round with this query and exit.
    #[arg(long, value_name = "TEXT")]
    query: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.settings {
        Some(path) => load_settings_from_path(path),
        None => load_settings(),
    }
    .context("failed to load settings")?;

    let _telemetry = init_telemetry(TelemetryConfig {
        log_level: parse_level(&settings.logging.level).unwrap_or(Level::INFO),
        module_levels: Vec::new(),
        json: settings.logging.json,
        log_to_sqlite: settings.storage.log_to_sqlite,
        log_db_path: settings.storage.log_db_path(),
    });

    let db_path = cli.db.clone().unwrap_or_else(|| settings.storage.db_path());
    let db = Database::open(&db_path).with_context(|| format!("failed to open {}", db_path.display()))?;
    info!(path = %db_path.display(), "database opened");

    let emitter = Arc::new(ChannelEmitter::new(settings.events.subscriber_buffer));
    let recorder = settings
        .events
        .persist
        .then(|| EventRecorder::spawn(emitter.subscribe(), EventRepo::new(db.clone())));
    let printer = spawn_printer(emitter.subscribe());

    let deps = SessionDeps {
        ledger: Arc::new(Ledger::new(db)),
        agent: build_agent(&settings)?,
        emitter: emitter.clone(),
        executor: ExecutorConfig {
            steps_per_plan_step: settings.executor.steps_per_plan_step,
            iteration_slack: settings.executor.iteration_slack,
            findings_preview_chars: settings.executor.findings_preview_chars,
            report_preview_chars: settings.executor.report_preview_chars,
        },
    };

    let session = match &cli.resume {
        Some(id) => {
            let session = Session::resume(deps, SessionId::from_raw(id.clone()))
                .with_context(|| format!("cannot resume session {id}"))?;
            if session.pcap_path() != cli.pcap_path {
                warn!(
                    recorded = session.pcap_path(),
                    given = %cli.pcap_path,
                    "resumed session investigates a different capture; using the recorded one"
                );
            }
            session
        }
        None => Session::create(deps, &cli.pcap_path).context("failed to create session")?,
    };
    eprintln!("session {} ({})", session.id(), session.pcap_path());

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, cancelling");
                cancel.cancel();
            }
        });
    }

    match &cli.query {
        Some(query) => run_round(&session, query, &cancel).await,
        None => interactive(&session, &cancel).await?,
    }

    emitter.close();
    join_task("event printer", printer).await;
    if let Some(recorder) = recorder {
        if let Some(written) = join_task("event recorder", recorder).await {
            info!(events = written, "event log flushed");
        }
    }
    Ok(())
}

/// Wait for a background task; a panicked or aborted task is logged.
async fn join_task<T>(name: &str, handle: JoinHandle<T>) -> Option<T> {
    match handle.await {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(task = name, error = %e, "background task did not finish cleanly");
            None
        }
    }
}

fn build_agent(settings: &SleuthSettings) -> Result<Arc<dyn Agent>> {
    let model = &settings.model;
    let api_key = std::env::var(&model.api_key_env)
        .with_context(|| format!("environment variable {} is not set", model.api_key_env))?;

    let openai = OpenAiAgent::new(OpenAiConfig {
        base_url: model.base_url.clone(),
        model: model.model.clone(),
        api_key: SecretString::from(api_key),
        request_timeout: Duration::from_millis(model.request_timeout_ms),
        temperature: model.temperature,
    })?;

    let retry = &settings.retry;
    let reliable = ReliableAgent::new(
        openai,
        ReliableConfig {
            max_retries: retry.max_retries,
            base_delay: Duration::from_millis(retry.base_delay_ms),
            max_delay: Duration::from_millis(retry.max_delay_ms),
            jitter_factor: retry.jitter_factor,
            circuit_breaker_threshold: retry.circuit_breaker_threshold,
            circuit_breaker_cooldown: Duration::from_millis(retry.circuit_breaker_cooldown_ms),
        },
    );

    let compaction = &settings.compaction;
    if !compaction.enabled {
        return Ok(Arc::new(reliable));
    }
    let compactor = Compactor::new(
        CompactionConfig::new(
            compaction.max_tokens_before_summary,
            compaction.max_tokens_for_recent_messages,
        ),
        Arc::new(EstimatingCounter::new(compaction.chars_per_token)),
    );
    Ok(Arc::new(CompactingAgent::new(reliable, compactor)))
}

/// Read queries from stdin until EOF, `quit`/`exit`, or an interrupt.
async fn interactive(session: &Session, cancel: &CancellationToken) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stderr = tokio::io::stderr();

    loop {
        stderr.write_all(b"query> ").await?;
        stderr.flush().await?;

        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };

        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if matches!(query, "quit" | "exit") {
            break;
        }

        run_round(session, query, cancel).await;
        if cancel.is_cancelled() {
            break;
        }
    }
    Ok(())
}

async fn run_round(session: &Session, query: &str, cancel: &CancellationToken) {
    match session.run_round(query, cancel).await {
        Ok(outcome) => print_outcome(&outcome),
        Err(e) => println!("no report produced for this query: {e}"),
    }
}

fn print_outcome(outcome: &RoundOutcome) {
    println!("{}", outcome.result.report);
    match (&outcome.round_num, &outcome.ledger_error) {
        (Some(n), _) => eprintln!("(saved as round {n})"),
        (None, Some(e)) => eprintln!("warning: this round was not saved: {e}"),
        (None, None) => {}
    }
}

fn spawn_printer(mut rx: mpsc::Receiver<Event>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Some(line) = describe(&event) {
                eprintln!("{line}");
            }
        }
    })
}

/// One-line (or short block) rendering of an event for the terminal.
fn describe(event: &Event) -> Option<String> {
    match event.event_type {
        EventType::PlanCreated => {
            let data: PlanCreatedData = event.data_as()?;
            let mut out = format!("plan: {} step(s)", data.total_steps);
            for step in &data.steps {
                let _ = write!(out, "\n  {}. {}", step.step_id, step.intent);
            }
            Some(out)
        }
        EventType::StepStarted => {
            let data: StepStartedData = event.data_as()?;
            Some(format!("[step {}] {}", data.step_id, data.intent))
        }
        EventType::StepFindings => {
            let data: StepFindingsData = event.data_as()?;
            Some(format!("[step {}] findings:\n{}", data.step_id, data.findings))
        }
        EventType::ReportGenerated => {
            let data: ReportGeneratedData = event.data_as()?;
            Some(format!(
                "report ready: {} bytes in {:.1}s",
                data.content_length,
                data.duration_ms as f64 / 1000.0
            ))
        }
        EventType::PlanError | EventType::Error => {
            let data: ErrorData = event.data_as()?;
            Some(match data.step_id {
                Some(id) => format!("error [{} step {}]: {}", data.phase, id, data.message),
                None => format!("error [{}]: {}", data.phase, data.message),
            })
        }
        EventType::Info => event.data_as::<InfoData>().map(|d| d.message),
        EventType::StepError | EventType::StepCompleted => None,
    }
}
