// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::collections::HashMap;
use std::io::{self, Read};
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use clap::Parser;
use cli::{Cli, Commands, ConfigCommands, IsTerminal, OutputFormatArg, SessionCommands};
use sven_ci::{find_project_root, CiOptions, CiRunner, OutputFormat};
use sven_core::SessionStore;
use sven_input::{history, parse_frontmatter, parse_workflow};
use sven_model::catalog::ModelCatalogEntry;

const EXIT_SUCCESS: i32 = 0;
const EXIT_GENERIC: i32 = 1;
const EXIT_QUOTA: i32 = 2;
const EXIT_SESSION: i32 = 3;
const EXIT_CONFIG: i32 = 4;
const EXIT_SIGINT: i32 = 130;
const EXIT_SIGTERM: i32 = 131;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let code = tokio::select! {
        result = run(cli) => match result {
            Ok(code) => code,
            Err(e) => {
                eprintln!("sven: error: {e:#}");
                EXIT_GENERIC
            }
        },
        () = wait_for_sigterm() => {
            tracing::info!("received SIGTERM, shutting down");
            EXIT_SIGTERM
        }
    };
    std::process::exit(code);
}

/// Resolves on SIGTERM (§6 exit code 131). Graceful per-session cleanup
/// (PID-lock release, final save, watch-socket removal) happens in each
/// runner's own guaranteed-exit path (`Drop` / exit-hook), not here — this
/// future only decides the process exit code for the top-level subcommands
/// that don't already install their own signal handling (e.g. the CI runner
/// in `run_headless`, which races its own `ctrl_c` future).
#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            term.recv().await;
        }
        Err(_) => std::future::pending::<()>().await,
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    // Quick commands that never load the full config / start a loop.
    if cli.list {
        return list_sessions_cmd();
    }
    if let Some(id) = &cli.watch {
        return watch_session_cmd(id).await;
    }

    if let Some(cmd) = &cli.command {
        match cmd {
            Commands::Session { command } => {
                return session_command(command, cli.config.as_deref()).await
            }
            Commands::Config { command } => return config_command(command, cli.config.as_deref()),
            Commands::Completions { shell } => {
                cli::print_completions(*shell);
                return Ok(EXIT_SUCCESS);
            }
            Commands::Chats { limit } => {
                print_chats(*limit);
                return Ok(EXIT_SUCCESS);
            }
            Commands::Validate { file } => {
                validate_workflow(file)?;
                return Ok(EXIT_SUCCESS);
            }
            Commands::ListModels {
                provider,
                refresh,
                json,
            } => {
                let config = match sven_config::load(cli.config.as_deref()) {
                    Ok(c) => c,
                    Err(e) => {
                        eprintln!("sven: config error: {e:#}");
                        return Ok(EXIT_CONFIG);
                    }
                };
                list_models_cmd(&config, provider.as_deref(), *refresh, *json).await?;
                return Ok(EXIT_SUCCESS);
            }
            Commands::ListProviders { verbose, json } => {
                list_providers_cmd(*verbose, *json)?;
                return Ok(EXIT_SUCCESS);
            }
            // `chat` / `repl` are mode synonyms; fall through into the loop
            // with the execution mode implied by the subcommand.
            Commands::Chat | Commands::Repl => {}
        }
    }

    let config = match sven_config::load(cli.config.as_deref()) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("sven: config error: {e:#}");
            return Ok(EXIT_CONFIG);
        }
    };

    run_headless(cli, config).await
}

// ── Session subcommand ────────────────────────────────────────────────────────

async fn session_command(
    cmd: &SessionCommands,
    config_path: Option<&std::path::Path>,
) -> anyhow::Result<i32> {
    let store = SessionStore::new(SessionStore::default_base_dir());
    match cmd {
        SessionCommands::List => list_sessions_cmd(),
        SessionCommands::Show { id } => {
            let loaded = match store.load_full_session(id) {
                Ok(l) => l,
                Err(e) => {
                    eprintln!("sven: session error: {e}");
                    return Ok(EXIT_SESSION);
                }
            };
            println!("{}", serde_json::to_string_pretty(&loaded.metadata)?);
            for msg in &loaded.messages {
                println!("--- {} ({}) ---", msg.role, msg.id);
                for part in &msg.parts {
                    println!("{part:?}");
                }
            }
            Ok(EXIT_SUCCESS)
        }
        SessionCommands::Resume { id, prompt } => resume_session_cmd(&store, id, prompt, config_path).await,
        SessionCommands::Create { name } => {
            match store.create_session(None, Some(name.as_str())) {
                Ok(meta) => {
                    println!("{}", meta.id);
                    Ok(EXIT_SUCCESS)
                }
                Err(e) => {
                    eprintln!("sven: session error: {e}");
                    Ok(EXIT_SESSION)
                }
            }
        }
        SessionCommands::Watch { id } => watch_session_cmd(id).await,
        SessionCommands::Delete { id } => match store.delete_session(id) {
            Ok(()) => Ok(EXIT_SUCCESS),
            Err(e) => {
                eprintln!("sven: session error: {e}");
                Ok(EXIT_SESSION)
            }
        },
        SessionCommands::Clean { older_than_days } => clean_sessions_cmd(&store, *older_than_days),
    }
}

/// `sven session resume <id> <prompt>` — continue a durably-stored session
/// in place, picking up the same session id rather than `--resume`'s
/// markdown-history flow (which resumes a conversation *file*, not a
/// `SessionStore` session). Loads the persisted message log, projects it
/// back to wire messages (§4.5), seeds a fresh `Agent` with that history,
/// and submits `prompt` through a `SessionRunner` bound to the original
/// session id so the new turn is appended to the same durable log.
async fn resume_session_cmd(
    store: &SessionStore,
    id: &str,
    prompt: &str,
    config_path: Option<&std::path::Path>,
) -> anyhow::Result<i32> {
    let loaded = match store.load_full_session(id) {
        Ok(l) => l,
        Err(e) => {
            eprintln!("sven: session error: {e}");
            return Ok(EXIT_SESSION);
        }
    };

    let config = match sven_config::load(config_path) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("sven: config error: {e:#}");
            return Ok(EXIT_CONFIG);
        }
    };

    let model = match sven_model::from_config(&config.model) {
        Ok(m) => Arc::from(m) as Arc<dyn sven_model::ModelProvider>,
        Err(e) => {
            eprintln!("sven: failed to initialise model provider: {e:#}");
            return Ok(EXIT_CONFIG);
        }
    };

    let todos: Arc<tokio::sync::Mutex<Vec<sven_tools::events::TodoItem>>> =
        Arc::new(tokio::sync::Mutex::new(Vec::new()));
    let task_depth = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let profile = sven_bootstrap::ToolSetProfile::Full {
        question_tx: None,
        todos,
        task_depth,
    };

    let mut agent = sven_bootstrap::AgentBuilder::new(config.clone())
        .build(sven_config::AgentMode::Agent, model, profile);
    agent.seed_history(loaded.to_wire_messages()).await;

    let bus = Arc::new(sven_core::EventBus::new());
    let control = Arc::new(sven_core::ControlManager::new());
    let metrics = Arc::new(sven_core::MetricsCollector::new());

    let mut bus_rx = bus.subscribe_all();
    let (stop_tx, mut stop_rx) = tokio::sync::oneshot::channel::<()>();
    let printer = tokio::spawn(async move {
        let mut failed = false;
        loop {
            tokio::select! {
                biased;
                _ = &mut stop_rx => break,
                maybe_event = bus_rx.recv() => {
                    match maybe_event {
                        Some(event) => print_resume_event(event, &mut failed),
                        None => break,
                    }
                }
            }
        }
        while let Ok(event) = bus_rx.try_recv() {
            print_resume_event(event, &mut failed);
        }
        failed
    });

    let cfg = sven_core::SessionRunnerConfig {
        session_id: loaded.metadata.id.clone(),
        store: store.clone(),
        bus,
        control,
        metrics,
    };
    let handle = match sven_core::SessionRunner::start(cfg, agent).await {
        Ok(h) => h,
        Err(e) => {
            eprintln!("sven: session error: {e:#}");
            let _ = stop_tx.send(());
            printer.abort();
            return Ok(EXIT_SESSION);
        }
    };
    let mut runner = handle.runner;

    let submit_result = runner.submit(prompt).await;
    let _ = stop_tx.send(());
    let failed = printer.await.context("event printer task panicked")?;
    runner.stop().await;

    if let Err(e) = submit_result {
        eprintln!("sven: fatal: {e:#}");
        return Ok(EXIT_GENERIC);
    }
    println!();

    Ok(if failed { EXIT_GENERIC } else { EXIT_SUCCESS })
}

/// Prints one `AgentEvent` to stdout/stderr during `session resume`. Mirrors
/// the event → output mapping the conversation runner uses, minus the
/// `Vec<Message>` accumulation (the turn is already durably persisted by
/// `SessionRunner::submit` itself).
fn print_resume_event(event: sven_core::AgentEvent, failed: &mut bool) {
    use sven_core::AgentEvent;
    match event {
        AgentEvent::TextDelta(delta) => {
            print!("{delta}");
            let _ = io::Write::flush(&mut io::stdout());
        }
        AgentEvent::ToolCallStarted(tc) => {
            eprintln!(
                "[sven:tool:call] id=\"{}\" name=\"{}\" args={}",
                tc.id,
                tc.name,
                serde_json::to_string(&tc.args).unwrap_or_default()
            );
        }
        AgentEvent::ToolCallFinished { call_id, tool_name, is_error, is_interrupted, .. } => {
            if is_error {
                eprintln!("[sven:tool:result] id=\"{call_id}\" name=\"{tool_name}\" success=false");
            } else if is_interrupted {
                eprintln!("[sven:tool:result] id=\"{call_id}\" name=\"{tool_name}\" interrupted");
            }
        }
        AgentEvent::Error(msg) => {
            eprintln!("[sven:error] {msg}");
            *failed = true;
        }
        AgentEvent::Aborted { partial_text } => {
            eprintln!("[sven:aborted] {partial_text}");
        }
        _ => {}
    }
}

fn list_sessions_cmd() -> anyhow::Result<i32> {
    let store = SessionStore::new(SessionStore::default_base_dir());
    let sessions = match store.list_sessions() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("sven: session error: {e}");
            return Ok(EXIT_SESSION);
        }
    };
    if sessions.is_empty() {
        println!("No sessions found.");
        return Ok(EXIT_SUCCESS);
    }
    println!("{:<40}  {:<10}  {:<20}  TITLE", "ID", "STATUS", "UPDATED");
    println!("{}", "-".repeat(90));
    for s in &sessions {
        println!(
            "{:<40}  {:<10}  {:<20}  {}",
            s.id, s.status, s.updated_at, s.title
        );
    }
    Ok(EXIT_SUCCESS)
}

fn clean_sessions_cmd(store: &SessionStore, older_than_days: u64) -> anyhow::Result<i32> {
    let cutoff = sven_core::store::now_epoch() - (older_than_days as f64 * 86_400.0);
    let sessions = match store.list_sessions() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("sven: session error: {e}");
            return Ok(EXIT_SESSION);
        }
    };
    let mut removed = 0usize;
    for s in &sessions {
        let is_done = s.status == "completed" || s.status == "error";
        if is_done && s.updated_at_epoch < cutoff {
            if store.delete_session(&s.id).is_ok() {
                removed += 1;
            }
        }
    }
    println!("Removed {removed} session(s) older than {older_than_days} day(s).");
    Ok(EXIT_SUCCESS)
}

/// Connect to `{session_dir}/watch.sock` and print newline-delimited JSON
/// events as they arrive. Never writes to the session (§6 Watch socket).
#[cfg(unix)]
async fn watch_session_cmd(id: &str) -> anyhow::Result<i32> {
    use tokio::io::AsyncBufReadExt;
    use tokio::net::UnixStream;

    let store = SessionStore::new(SessionStore::default_base_dir());
    let socket_path = store.watch_socket_path(id);
    let stream = match UnixStream::connect(&socket_path).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!(
                "sven: could not connect to watch socket {}: {e}",
                socket_path.display()
            );
            return Ok(EXIT_SESSION);
        }
    };
    let mut lines = tokio::io::BufReader::new(stream).lines();
    while let Some(line) = lines.next_line().await? {
        println!("{line}");
    }
    Ok(EXIT_SUCCESS)
}

#[cfg(not(unix))]
async fn watch_session_cmd(_id: &str) -> anyhow::Result<i32> {
    eprintln!("sven: --watch is only supported on unix platforms");
    Ok(EXIT_GENERIC)
}

// ── Config subcommand ─────────────────────────────────────────────────────────

fn config_command(cmd: &ConfigCommands, config_path: Option<&std::path::Path>) -> anyhow::Result<i32> {
    match cmd {
        ConfigCommands::Init => {
            let path = config_path
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| sven_config::default_config_path());
            if path.exists() {
                eprintln!("sven: config already exists at {}", path.display());
                return Ok(EXIT_GENERIC);
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, sven_config::example_config_yaml())?;
            println!("Wrote default config to {}", path.display());
            Ok(EXIT_SUCCESS)
        }
        ConfigCommands::Show => {
            let config = sven_config::load(config_path)?;
            println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
            Ok(EXIT_SUCCESS)
        }
        ConfigCommands::ListEndpoints => {
            let config = sven_config::load(config_path)?;
            println!("provider: {}", config.model.provider);
            if let Some(base) = &config.model.base_url {
                println!("base_url: {base}");
            }
            Ok(EXIT_SUCCESS)
        }
        ConfigCommands::Example => {
            println!("{}", sven_config::example_config_yaml());
            Ok(EXIT_SUCCESS)
        }
        ConfigCommands::Docs => {
            println!("Configuration reference: ~/.sven/config.yaml (see README for the full schema).");
            Ok(EXIT_SUCCESS)
        }
    }
}

/// Validate a workflow file: parse frontmatter, count steps, report to stdout.
fn validate_workflow(file: &std::path::Path) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("reading workflow file {}", file.display()))?;

    let (frontmatter, markdown_body) = parse_frontmatter(&content);
    let workflow = parse_workflow(markdown_body);

    let title = frontmatter
        .as_ref()
        .and_then(|fm| fm.title.as_deref())
        .or(workflow.title.as_deref());
    if let Some(t) = title {
        println!("Title: {t}");
    }

    if let Some(fm) = &frontmatter {
        println!("Frontmatter: OK");
        if let Some(models) = &fm.models {
            println!("  models ({}):", models.len());
            let mut pairs: Vec<_> = models.iter().collect();
            pairs.sort_by_key(|(k, _)| k.as_str());
            for (mode, model) in pairs {
                println!("    {mode}: {model}");
            }
        }
        if let Some(vars) = &fm.vars {
            println!("  vars ({}):", vars.len());
            let mut pairs: Vec<_> = vars.iter().collect();
            pairs.sort_by_key(|(k, _)| k.as_str());
            for (k, v) in pairs {
                println!("    {k} = {v}");
            }
        }
    } else {
        println!("Frontmatter: (none)");
    }

    if let Some(preamble) = &workflow.system_prompt_append {
        println!(
            "Preamble: {} chars (appended to system prompt)",
            preamble.chars().count()
        );
    }

    let mut queue = workflow.steps;
    let total = queue.len();
    println!("Steps: {total}");

    let mut i = 0;
    while let Some(step) = queue.pop() {
        i += 1;
        let label = step.label.as_deref().unwrap_or("(unlabelled)");
        let mode = step.options.mode.as_deref().unwrap_or("(inherit)");
        let provider = step.options.provider.as_deref().unwrap_or("(inherit)");
        let model = step.options.model.as_deref().unwrap_or("(inherit)");
        let timeout = step
            .options
            .timeout_secs
            .map(|t| format!("{t}s"))
            .unwrap_or_else(|| "(inherit)".to_string());
        println!("  Step {i}/{total}: {label:?}  mode={mode}  provider={provider}  model={model}  timeout={timeout}");
        if !step.content.is_empty() {
            let preview = step.content.chars().take(80).collect::<String>();
            let ellipsis = if step.content.chars().count() > 80 {
                "…"
            } else {
                ""
            };
            println!("    {preview}{ellipsis}");
        }
    }

    println!("\nWorkflow is valid.");
    Ok(())
}

/// List available models, optionally querying the provider API for live data.
async fn list_models_cmd(
    config: &sven_config::Config,
    provider_filter: Option<&str>,
    refresh: bool,
    as_json: bool,
) -> anyhow::Result<()> {
    if let Some(prov) = provider_filter {
        if sven_model::get_driver(prov).is_none() {
            eprintln!("Unknown provider: {prov:?}");
            eprintln!("\nAvailable providers (run `sven list-providers` for details):");
            for d in sven_model::list_drivers() {
                eprintln!("  {:20} {}", d.id, d.name);
            }
            anyhow::bail!("Invalid provider: {prov}");
        }
    }

    let entries: Vec<ModelCatalogEntry> = if refresh {
        let model_cfg = if let Some(prov) = provider_filter {
            let mut c = config.model.clone();
            c.provider = prov.to_string();
            c
        } else {
            config.model.clone()
        };
        let model = sven_model::from_config(&model_cfg)?;
        let mut live = model.list_models().await?;
        if let Some(prov) = provider_filter {
            live.retain(|e| e.provider == prov);
        }
        live
    } else {
        let mut all = sven_model::catalog::static_catalog();
        if let Some(prov) = provider_filter {
            all.retain(|e| e.provider == prov);
        }
        all.sort_by(|a, b| a.provider.cmp(&b.provider).then(a.id.cmp(&b.id)));
        all
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No models found.");
        return Ok(());
    }

    let id_w = entries.iter().map(|e| e.id.len()).max().unwrap_or(10).max(10);
    let prov_w = entries
        .iter()
        .map(|e| e.provider.len())
        .max()
        .unwrap_or(8)
        .max(8);

    println!(
        "{:<id_w$}  {:<prov_w$}  {:>12}  {:>16}  DESCRIPTION",
        "ID",
        "PROVIDER",
        "CTX WINDOW",
        "MAX OUT TOKENS",
        id_w = id_w,
        prov_w = prov_w,
    );
    println!("{}", "-".repeat(id_w + prov_w + 50));

    for e in &entries {
        let ctx = if e.context_window == 0 {
            "  -".to_string()
        } else {
            format!("{:>12}", e.context_window)
        };
        let max_out = if e.max_output_tokens == 0 {
            "  -".to_string()
        } else {
            format!("{:>16}", e.max_output_tokens)
        };
        println!(
            "{:<id_w$}  {:<prov_w$}  {}  {}  {}",
            e.id,
            e.provider,
            ctx,
            max_out,
            e.description,
            id_w = id_w,
            prov_w = prov_w,
        );
    }
    println!("\nTotal: {} model(s)", entries.len());
    Ok(())
}

/// List all registered model providers.
fn list_providers_cmd(verbose: bool, as_json: bool) -> anyhow::Result<()> {
    let drivers = sven_model::list_drivers();

    if as_json {
        #[derive(serde::Serialize)]
        struct ProviderJson {
            id: &'static str,
            name: &'static str,
            description: &'static str,
            default_api_key_env: Option<&'static str>,
            default_base_url: Option<&'static str>,
            requires_api_key: bool,
        }
        let rows: Vec<ProviderJson> = drivers
            .iter()
            .map(|d| ProviderJson {
                id: d.id,
                name: d.name,
                description: d.description,
                default_api_key_env: d.default_api_key_env,
                default_base_url: d.default_base_url,
                requires_api_key: d.requires_api_key,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("Supported Model Providers ({} total)\n", drivers.len());

    if verbose {
        for d in drivers {
            println!("  {} — {}", d.id, d.name);
            println!("    {}", d.description);
            if let Some(env) = d.default_api_key_env {
                println!("    API key env : {env}");
            }
            if let Some(url) = d.default_base_url {
                println!("    Default URL : {url}");
            }
            if !d.requires_api_key {
                println!("    Auth        : none required");
            }
            println!();
        }
    } else {
        let id_w = drivers.iter().map(|d| d.id.len()).max().unwrap_or(10).max(10);
        let name_w = drivers
            .iter()
            .map(|d| d.name.len())
            .max()
            .unwrap_or(8)
            .max(8);
        println!("{:<id_w$}  {:<name_w$}  DESCRIPTION", "ID", "NAME");
        println!("{}", "-".repeat(id_w + name_w + 40));
        for d in drivers {
            println!("{:<id_w$}  {:<name_w$}  {}", d.id, d.name, d.description);
        }
        println!("\nUse `sven list-providers --verbose` for API key and URL details.");
        println!("Use `sven list-models --provider <ID>` to see models for a specific provider.");
    }
    Ok(())
}

/// Print the list of saved conversations to stdout.
fn print_chats(limit: usize) {
    match history::list(Some(limit)) {
        Ok(entries) if entries.is_empty() => {
            println!("No saved conversations found.");
            println!(
                "Conversations are stored in: {}",
                history::history_dir().display()
            );
        }
        Ok(entries) => {
            println!(
                "{:<45}  {:<16}  {:<5}  TITLE",
                "ID (use with --resume)", "DATE", "TURNS"
            );
            println!("{}", "-".repeat(95));
            for e in &entries {
                let display_id = if e.id.len() > 44 {
                    format!("{}…", &e.id[..43])
                } else {
                    e.id.clone()
                };
                let date = e.timestamp.replace('T', " ");
                let date = &date[..16.min(date.len())];
                let title = if e.title.chars().count() > 50 {
                    format!("{}…", e.title.chars().take(49).collect::<String>())
                } else {
                    e.title.clone()
                };
                println!(
                    "{:<45}  {:<16}  {:<5}  {}",
                    display_id, date, e.turns, title
                );
            }
            println!("\nTotal: {} conversation(s)", entries.len());
            println!("History dir: {}", history::history_dir().display());
        }
        Err(e) => {
            eprintln!("Error listing conversations: {e}");
        }
    }
}

async fn run_headless(cli: Cli, config: Arc<sven_config::Config>) -> anyhow::Result<i32> {
    let project_root = find_project_root().ok();
    let tool_mode = cli.agent.tool_mode();

    // ── --resume ──────────────────────────────────────────────────────────────
    if let Some(id) = &cli.resume {
        if id.is_empty() {
            eprintln!("--resume requires an explicit ID.\nUse 'sven session list' to list available sessions.");
            return Ok(EXIT_GENERIC);
        }
        let file_path = match history::resolve(id) {
            Ok(p) => p,
            Err(e) => {
                eprintln!("sven: could not resolve conversation id '{id}': {e:#}");
                return Ok(EXIT_SESSION);
            }
        };

        if let Some(prompt) = &cli.prompt {
            use std::fmt::Write as _;
            let current = std::fs::read_to_string(&file_path)
                .with_context(|| format!("reading {}", file_path.display()))?;
            let mut updated = current.trim_end().to_string();
            let _ = write!(updated, "\n\n## User\n\n{}\n", prompt.trim());
            std::fs::write(&file_path, &updated)
                .with_context(|| format!("appending user message to {}", file_path.display()))?;
        }

        use sven_ci::{ConversationOptions, ConversationRunner};
        let content = std::fs::read_to_string(&file_path)
            .with_context(|| format!("reading {}", file_path.display()))?;
        let opts = ConversationOptions {
            mode: tool_mode,
            model_override: cli.model,
            file_path,
            content,
        };
        ConversationRunner::new(config).run(opts).await?;
        return Ok(EXIT_SUCCESS);
    }

    // ── Resolve effective JSONL I/O paths ────────────────────────────────────
    let file_is_jsonl = cli
        .file
        .as_ref()
        .and_then(|p| p.extension())
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("jsonl"))
        .unwrap_or(false);

    let load_jsonl = cli.effective_load_jsonl().cloned().or_else(|| {
        if file_is_jsonl {
            cli.file.clone()
        } else {
            None
        }
    });

    let output_jsonl = cli.effective_output_jsonl().cloned();

    let input = if file_is_jsonl {
        if !is_stdin_tty() {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf).context("reading stdin")?;
            buf
        } else {
            String::new()
        }
    } else if let Some(path) = &cli.file {
        std::fs::read_to_string(path)
            .with_context(|| format!("reading input file {}", path.display()))?
    } else if !is_stdin_tty() {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf).context("reading stdin")?;
        buf
    } else {
        String::new()
    };

    let mut vars: HashMap<String, String> = HashMap::new();
    for spec in &cli.vars {
        if let Some((k, v)) = sven_ci::template::parse_var(spec) {
            vars.insert(k, v);
        } else {
            eprintln!("[sven:warn] Ignoring invalid --var argument: {spec:?}  (expected KEY=VALUE)");
        }
    }

    let output_format = match cli.output_format {
        OutputFormatArg::Conversation => OutputFormat::Conversation,
        OutputFormatArg::Json => OutputFormat::Json,
        OutputFormatArg::Compact => OutputFormat::Compact,
        OutputFormatArg::Jsonl => OutputFormat::Jsonl,
    };

    let opts = CiOptions {
        mode: tool_mode,
        model_override: cli.model,
        input,
        extra_prompt: cli.prompt,
        project_root,
        output_format,
        artifacts_dir: cli.artifacts_dir,
        vars,
        step_timeout_secs: cli.step_timeout,
        run_timeout_secs: cli.run_timeout,
        dry_run: cli.dry_run,
        output_last_message: cli.output_last_message,
        system_prompt_file: cli.system_prompt_file,
        append_system_prompt: cli.append_system_prompt,
        trace_level: cli.verbose,
        load_jsonl,
        output_jsonl,
        rerun_toolcalls: cli.rerun_toolcalls,
    };

    tokio::select! {
        result = CiRunner::new(config).run(opts) => {
            result?;
            Ok(EXIT_SUCCESS)
        }
        _ = tokio::signal::ctrl_c() => {
            Ok(EXIT_SIGINT)
        }
    }
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    // RUST_LOG wins when set (full directive syntax); SVEN_LOG_LEVEL is the
    // simpler single-level override; -v/-vv flags are the last resort.
    let level = std::env::var("SVEN_LOG_LEVEL")
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| level.to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

fn is_stdin_tty() -> bool {
    io::stdin().is_terminal()
}
