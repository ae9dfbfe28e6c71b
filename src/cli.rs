//! Command-line front end.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use crate::api::{ControlApi, DownloadJobStatus, FleetSnapshot, HttpControlApi};
use crate::config::{load_config, ClientConfig, KNOWN_DOCUMENTS};
use crate::error::{AppError, ErrorKind, Result};
use crate::fleet::{FleetView, StoreEvent};
use crate::ids::ProcessId;
use crate::logs::{LogLine, LogView};
use crate::session::Session;

#[derive(Parser, Debug)]
#[command(name = "fleet-console", version, about = "Operator console for a game-server fleet")]
struct Cli {
    /// Base URL of the control API
    #[arg(long, global = true, env = "FLEET_API_URL")]
    api_url: Option<String>,
    /// Config file (defaults to <config dir>/fleet-console/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the fleet once
    Status,
    /// Print the fleet every time it changes
    Watch,
    Start {
        id: String,
    },
    Stop {
        id: String,
    },
    /// Start the next instance of a game-server group
    Add {
        group: String,
    },
    /// Remove one instance of a game-server group
    Remove {
        group: String,
        instance: u32,
    },
    Logs {
        id: String,
        #[arg(long)]
        lines: Option<u32>,
        #[arg(long)]
        filter: Option<String>,
        /// Keep tailing until interrupted
        #[arg(long)]
        follow: bool,
    },
    /// Download server assets; all of them unless ids are given
    Download {
        #[arg(long)]
        force: bool,
        ids: Vec<String>,
    },
    DownloadStatus,
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    Health,
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// List the documents the control API serves
    List,
    Show {
        name: String,
    },
    /// Replace a document with the contents of a local file
    Save {
        name: String,
        file: PathBuf,
    },
    SetField {
        name: String,
        path: String,
        value: String,
        /// Parse the value as JSON instead of sending it as a string
        #[arg(long)]
        json: bool,
    },
    QuickEdits,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Entry point of the `fleet-console` binary.
pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("Failed to start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(execute(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if e.kind().is_local() {
                log::warn!("{}", e);
            } else {
                log::error!("{}", e);
            }
            eprintln!("{}", describe_error(&e));
            ExitCode::FAILURE
        }
    }
}

/// One-line message for the operator. Local refusals are told apart from
/// failures reported by the control API or the network.
fn describe_error(e: &AppError) -> String {
    let text = e.detail().map_or_else(|| e.to_string(), str::to_string);
    if e.kind().is_local() {
        format!("refused: {}", text)
    } else {
        format!("error: {}", text)
    }
}

/// Lifecycle commands that end by waiting for the follow-up poll.
enum Action {
    Start(ProcessId),
    Stop(ProcessId),
    Add(String),
    Remove(String, u32),
}

async fn execute(cli: Cli) -> Result<()> {
    let mut config = load_config(cli.config.as_deref())?;
    if let Some(url) = cli.api_url {
        config.api_url = url;
    }
    let api: Arc<dyn ControlApi> = Arc::new(HttpControlApi::from_config(&config)?);

    match cli.command {
        Command::Status => {
            let session = Session::new(api, config);
            session.refresh().await?;
            session.refresh_downloads().await?;
            print_view(&session.view());
        }
        Command::Watch => watch(&Session::mount(api, config)).await,
        Command::Start { id } => run_action(api, config, Action::Start(ProcessId::new(id))).await?,
        Command::Stop { id } => run_action(api, config, Action::Stop(ProcessId::new(id))).await?,
        Command::Add { group } => run_action(api, config, Action::Add(group)).await?,
        Command::Remove { group, instance } => {
            run_action(api, config, Action::Remove(group, instance)).await?;
        }
        Command::Logs {
            id,
            lines,
            filter,
            follow,
        } => {
            let request = LogRequest {
                id: ProcessId::new(id),
                lines,
                filter: filter.unwrap_or_default(),
                follow,
            };
            logs_command(api, config, request).await?;
        }
        Command::Download { force, ids } => download_command(api, config, force, ids).await?,
        Command::DownloadStatus => print_download(&api.fetch_download_status().await?),
        Command::Config { command } => config_command(api, &config, command).await?,
        Command::Health => {
            api.health().await?;
            println!("{} is healthy", config.api_url);
        }
    }
    Ok(())
}

async fn run_action(
    api: Arc<dyn ControlApi>,
    config: ClientConfig,
    action: Action,
) -> Result<()> {
    let session = Session::new(api, config);
    session.refresh().await?;
    let events = session.subscribe();
    let actions = session.actions();
    let id = match action {
        Action::Start(id) => {
            actions.start(&id).await?;
            id
        }
        Action::Stop(id) => {
            actions.stop(&id).await?;
            id
        }
        Action::Add(group) => actions.add_instance(&group).await?,
        Action::Remove(group, instance) => {
            actions.remove_instance(&group, instance).await?;
            ProcessId::new(crate::ids::derive_id(&group, instance))
        }
    };
    report_settled(&session, events, &id).await;
    Ok(())
}

struct LogRequest {
    id: ProcessId,
    lines: Option<u32>,
    filter: String,
    follow: bool,
}

async fn logs_command(
    api: Arc<dyn ControlApi>,
    config: ClientConfig,
    request: LogRequest,
) -> Result<()> {
    let lines = request.lines.unwrap_or(config.logs.default_lines);
    if !config.logs.allows(lines) {
        return Err(AppError::invalid_line_window(lines));
    }
    if request.follow {
        let session = Session::new(api, config);
        return follow_logs(&session, request.id, lines, request.filter).await;
    }

    let mut view = LogView::default();
    view.replace_lines(api.fetch_logs(&request.id, lines).await?);
    view.set_filter(request.filter);
    print_log_lines(&view.filtered());
    if !view.filter().is_empty() {
        eprintln!("{} of {} lines", view.filtered_count(), view.total_count());
    }
    Ok(())
}

async fn download_command(
    api: Arc<dyn ControlApi>,
    config: ClientConfig,
    force: bool,
    ids: Vec<String>,
) -> Result<()> {
    let session = Session::new(api, config);
    let downloads = session.downloads();
    if ids.is_empty() {
        downloads.download_all(force).await?;
    } else {
        for id in ids {
            downloads.toggle(&ProcessId::new(id));
        }
        downloads.download_selection(force).await?;
    }
    println!("Download started; follow it with `fleet-console download-status`");
    Ok(())
}

async fn config_command(
    api: Arc<dyn ControlApi>,
    config: &ClientConfig,
    command: ConfigCommand,
) -> Result<()> {
    match command {
        ConfigCommand::List => {
            for name in KNOWN_DOCUMENTS {
                println!("{}", name);
            }
        }
        ConfigCommand::Show { name } => {
            let editor = crate::editor::ConfigEditor::open(api, name).await?;
            print!("{}", editor.buffer());
        }
        ConfigCommand::Save { name, file } => {
            let text = std::fs::read_to_string(&file)
                .map_err(|e| AppError::io(format!("Failed to read {}: {}", file.display(), e)))?;
            let editor = crate::editor::ConfigEditor::open(api, name).await?;
            editor.set_buffer(text);
            match editor.save().await {
                Ok(()) => println!("Saved {}", editor.name()),
                Err(e) if e.kind() == ErrorKind::NothingToSave => {
                    println!("{} is unchanged", editor.name());
                }
                Err(e) => return Err(e),
            }
        }
        ConfigCommand::SetField {
            name,
            path,
            value,
            json,
        } => set_field(api, config, &name, &path, value, json).await?,
        ConfigCommand::QuickEdits => {
            for edit in &config.quick_edits {
                println!("{:<18} {:<24} {}", edit.document, edit.field_path, edit.label);
            }
        }
    }
    Ok(())
}

async fn set_field(
    api: Arc<dyn ControlApi>,
    config: &ClientConfig,
    name: &str,
    path: &str,
    value: String,
    json: bool,
) -> Result<()> {
    let editor = crate::editor::ConfigEditor::open(api, name).await?;
    let quick_edit = config
        .quick_edits_for(editor.name())
        .find(|e| e.field_path == path);
    match quick_edit {
        Some(edit) if !json => editor.apply_quick_edit(edit, &value).await?,
        _ => {
            let value = if json {
                serde_json::from_str(&value)
                    .map_err(|e| AppError::invalid_format(path, e.to_string()))?
            } else {
                serde_json::Value::String(value)
            };
            editor.save_field(path, value).await?;
        }
    }
    println!("Saved {} in {}", path, editor.name());
    Ok(())
}

/// Wait for the follow-up poll of an action, then print where the target ended up.
async fn report_settled(
    session: &Session,
    mut events: broadcast::Receiver<StoreEvent>,
    id: &ProcessId,
) {
    let window = session.config().actions.settle_window();
    let _ = tokio::time::timeout(window, async {
        while let Ok(event) = events.recv().await {
            if event == StoreEvent::FleetUpdated {
                break;
            }
        }
    })
    .await;

    match session.store().running_state(id) {
        Some(true) => println!("{} is running", id),
        Some(false) => println!("{} is stopped", id),
        None => println!("{} is not part of the fleet", id),
    }
}

async fn watch(session: &Session) {
    let mut events = session.subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(StoreEvent::FleetUpdated) => print_view(&session.view()),
                Ok(StoreEvent::DownloadUpdated) => print_download(&session.view().download),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("Fleet listener lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    session.shutdown();
}

async fn follow_logs(session: &Session, id: ProcessId, lines: u32, filter: String) -> Result<()> {
    let viewer = session.open_logs(id);
    if lines != viewer.line_window() {
        viewer.set_line_window(lines)?;
    }
    viewer.with_view_mut(|view| view.set_filter(filter));

    let mut printed: Vec<String> = Vec::new();
    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                let filtered = viewer.with_view(LogView::filtered);
                let fresh = unseen_lines(&printed, &filtered);
                print_log_lines(fresh);
                printed = filtered.into_iter().map(|l| l.text).collect();
            }
        }
    }
    session.close_logs();
    Ok(())
}

/// Lines of `current` that come after the last line already printed.
fn unseen_lines<'a>(printed: &[String], current: &'a [LogLine]) -> &'a [LogLine] {
    let Some(last) = printed.last() else {
        return current;
    };
    match current.iter().rposition(|l| &l.text == last) {
        Some(idx) => &current[idx + 1..],
        None => current,
    }
}

fn print_log_lines(lines: &[LogLine]) {
    for line in lines {
        println!("{:>5} {}", line.number, line.text);
    }
}

fn state(running: bool) -> &'static str {
    if running {
        "running"
    } else {
        "stopped"
    }
}

fn print_view(view: &FleetView) {
    match &view.snapshot {
        Some(snapshot) => print_fleet(snapshot),
        None => println!("No fleet snapshot yet"),
    }
    if view.download.is_active() {
        print_download(&view.download);
    }
}

fn print_fleet(snapshot: &FleetSnapshot) {
    for process in snapshot.processes() {
        println!(
            "{:<16} {:<20} {}",
            process.name,
            process.id,
            state(process.running)
        );
    }
    for group in snapshot.gameservers.values() {
        let running = group.instances.iter().filter(|i| i.running).count();
        println!(
            "[{}] {}/{} running",
            group.name,
            running,
            group.instances.len()
        );
        for instance in &group.instances {
            println!("  {:<18} {}", instance.id, state(instance.running));
        }
    }
    println!(
        "{} of {} processes running",
        snapshot.running_count(),
        snapshot.processes().count() + snapshot.instance_count()
    );
}

fn print_download(status: &DownloadJobStatus) {
    println!(
        "download {:?}: {}% {}",
        status.status, status.progress, status.current
    );
    for error in &status.errors {
        println!("  error: {}", error);
    }
}
