use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncBufReadExt;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::LinesStream;

use ticket_scout::config::{AllowedValues, PipelineConfig};
use ticket_scout::ingest::{Normalizer, RawEvent, WindowBuilder};
use ticket_scout::llm::{LlmBackend, LlmConfig, create_provider};
use ticket_scout::pipeline::{LexicalSimilarity, Pipeline};
use ticket_scout::tracker::{JiraConfig, JiraTracker, Tracker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing. With TICKET_SCOUT_LOG_DIR set, logs go to a
    // daily-rolling file instead of stderr.
    let env_filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    let _log_guard = match std::env::var("TICKET_SCOUT_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "ticket-scout.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false)
                .init();
            Some(guard)
        }
        Err(_) => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_target(false)
                .init();
            None
        }
    };

    // ── LLM provider ─────────────────────────────────────────────────
    let (backend, api_key) = if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
        (LlmBackend::Anthropic, key)
    } else if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        (LlmBackend::OpenAi, key)
    } else {
        eprintln!("Error: ANTHROPIC_API_KEY or OPENAI_API_KEY not set");
        eprintln!("  export ANTHROPIC_API_KEY=sk-ant-...");
        std::process::exit(1);
    };

    let model = std::env::var("TICKET_SCOUT_MODEL")
        .unwrap_or_else(|_| "claude-sonnet-4-20250514".to_string());

    let llm_config = LlmConfig {
        backend,
        api_key: secrecy::SecretString::from(api_key),
        model: model.clone(),
    };
    let llm = create_provider(&llm_config)?;

    // ── Tracker ──────────────────────────────────────────────────────
    let jira_config = JiraConfig {
        base_url: require_env("JIRA_BASE_URL"),
        email: require_env("JIRA_EMAIL"),
        api_token: secrecy::SecretString::from(require_env("JIRA_TOKEN")),
        project_key: std::env::var("JIRA_PROJECT_KEY").unwrap_or_else(|_| "AI".to_string()),
        timeout: Duration::from_secs(30),
    };
    let project_key = jira_config.project_key.clone();
    let jira = JiraTracker::new(jira_config);

    // Allowed value sets come from the tracker; fall back to standard
    // Jira values when the fetch fails.
    let mut allowed = AllowedValues::jira_defaults();
    match jira.fetch_issue_types().await {
        Ok(types) if !types.is_empty() => allowed.issue_types = types,
        Ok(_) => tracing::warn!("Tracker returned no issue types, using defaults"),
        Err(e) => tracing::warn!(error = %e, "Issue type fetch failed, using defaults"),
    }
    match jira.fetch_priorities().await {
        Ok(priorities) if !priorities.is_empty() => allowed.priorities = priorities,
        Ok(_) => tracing::warn!("Tracker returned no priorities, using defaults"),
        Err(e) => tracing::warn!(error = %e, "Priority fetch failed, using defaults"),
    }
    allowed.validate().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    // ── Pipeline ─────────────────────────────────────────────────────
    let config = PipelineConfig {
        similarity_threshold: env_f32("TICKET_SCOUT_SIMILARITY", 0.85),
        min_confidence: env_f32("TICKET_SCOUT_MIN_CONFIDENCE", 0.5),
        ..Default::default()
    };
    config.validate().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    let tracker: Arc<dyn Tracker> = Arc::new(jira);
    let pipeline = Pipeline::new(
        llm,
        tracker,
        Arc::new(LexicalSimilarity::default()),
        allowed,
        config.clone(),
    );

    eprintln!("🎫 ticket-scout v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", model);
    eprintln!("   Project: {}", project_key);
    eprintln!("   Reading conversation events from stdin (one JSON object per line)\n");

    // Seed deduplication state from the tracker. Starting without it
    // would re-file every known ticket.
    let seeded = pipeline.refresh_working_set().await.unwrap_or_else(|e| {
        eprintln!("Error: failed to seed working set from tracker: {e}");
        std::process::exit(1);
    });
    eprintln!("   Seeded {seeded} tickets into the working set\n");

    // ── Event loop ───────────────────────────────────────────────────
    let normalizer = Normalizer::new();
    let mut builder = WindowBuilder::new(config.max_window_utterances, config.max_window_span);

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = LinesStream::new(stdin.lines());

    while let Some(line) = lines.next().await {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let event: RawEvent = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping undecodable event");
                continue;
            }
        };

        let utterance = match normalizer.normalize(&event) {
            Ok(Some(utterance)) => utterance,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed event");
                continue;
            }
        };

        if let Some(window) = builder.push(utterance) {
            match pipeline.process_window(window).await {
                Ok(report) => print_report(&report),
                // Extraction outage: the window is deferred, never fatal.
                Err(e) => tracing::warn!(error = %e, "Window deferred"),
            }
        }
    }

    // End of stream: process whatever is buffered.
    for report in pipeline.process_windows(builder.flush()).await {
        print_report(&report);
    }

    Ok(())
}

fn print_report(report: &ticket_scout::pipeline::WindowReport) {
    for outcome in &report.outcomes {
        eprintln!("   [{}] {}", outcome.disposition.label(), outcome.title);
    }
}

fn require_env(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| {
        eprintln!("Error: {key} not set");
        std::process::exit(1);
    })
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
