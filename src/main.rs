mod cli;

use reelforge::{app::App, app::ToolPaths, config, server};
use reelforge_av::{Ffprobe, MediaProber};
use reelforge_common::{TaskKind, TaskParams};
use reelforge_db::pool::{get_conn, init_memory_pool, init_pool};
use reelforge_db::queries::tasks;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::{Path, PathBuf};

async fn start_server(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&Path>,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    config::validate_config(&config)?;

    tracing::info!("Starting Reelforge server");
    tracing::info!(
        "Server will listen on {}:{}",
        config.server.host,
        config.server.port
    );

    if let Some(parent) = config.database.path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create database directory {:?}", parent))?;
    }
    let db_path = config.database.path.to_string_lossy().to_string();
    tracing::info!("Initializing database at {}", db_path);
    let db_pool = init_pool(&db_path)?;

    let app = App::build(config, db_pool)?;
    server::start_server(app).await
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "reelforge=trace,reelforge_av=trace,reelforge_db=debug,reelforge_common=debug,tower_http=debug".to_string()
        } else {
            "reelforge=debug,reelforge_av=debug,reelforge_db=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::Run {
            params,
            kind,
            output_dir,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_task(
                &params,
                kind.into(),
                output_dir,
                cli.config.as_deref(),
            ))
        }
        Commands::Probe { file, json } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(probe_file(&file, json, cli.config.as_deref()))
        }
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("reelforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Compose one video without the server: the task lives in an in-memory
/// database and its progress is printed as it arrives.
async fn run_task(
    params_path: &Path,
    kind: TaskKind,
    output_dir: Option<PathBuf>,
    config_path: Option<&Path>,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;
    if let Some(dir) = output_dir {
        config.storage.output_dir = dir;
    }

    let raw = std::fs::read_to_string(params_path)
        .with_context(|| format!("Failed to read parameters: {:?}", params_path))?;
    let params: TaskParams = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse parameters: {:?}", params_path))?;

    let app = App::build(config, init_memory_pool()?)?;
    let task = app.tasks.create(kind, params).await?;

    let conn = get_conn(&app.pool)?;
    let task = tasks::claim_next_pending(&conn)?
        .with_context(|| format!("Task {} was not claimable", task.id))?;
    drop(conn);

    let mut events = app
        .hubs
        .subscribe(task.id, app.config.hub.queue_capacity);
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            println!("[{:>5.1}%] {}", event.progress, event.message);
        }
    });

    let outcome = app.orchestrator.run(task).await;
    let _ = printer.await;

    match outcome {
        reelforge::orchestrator::TaskOutcome::Completed { output_url } => {
            println!("\nOutput: {}", output_url);
            Ok(())
        }
        reelforge::orchestrator::TaskOutcome::Failed { error } => {
            anyhow::bail!("Composition failed: {}", error)
        }
    }
}

async fn probe_file(file: &Path, json: bool, config_path: Option<&Path>) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }

    let config = config::load_config_or_default(config_path)?;
    let tools = ToolPaths::resolve(&config);
    let info = Ffprobe::new(tools.ffprobe).probe(file).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("File: {}", file.display());
    println!("Format: {}", info.format_name);
    if let Some(duration) = info.duration {
        let secs = duration as u64;
        println!(
            "Duration: {:02}:{:02}:{:02} ({:.2}s)",
            secs / 3600,
            (secs / 60) % 60,
            secs % 60,
            duration
        );
    }
    if let Some(codec) = &info.video_codec {
        print!("Video: {}", codec);
        if let (Some(w), Some(h)) = (info.width, info.height) {
            print!(" {}x{}", w, h);
        }
        if let Some(fps) = info.fps {
            print!(" @ {:.3} fps", fps);
        }
        println!();
    }
    if let Some(codec) = &info.audio_codec {
        println!("Audio: {}", codec);
    }
    if let Some(frames) = info.total_frames() {
        println!("Frames: {}", frames);
    }

    Ok(())
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = config::load_config_or_default(config_path)?;
    let tools = ToolPaths::resolve(&config);
    let infos = reelforge_av::check_tools(&tools.ffmpeg, &tools.ffprobe);
    let mut all_ok = true;

    for tool in &infos {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version);
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
        Ok(())
    } else {
        anyhow::bail!("ffmpeg and ffprobe are both required")
    }
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            println!("  Server: {}:{}", config.server.host, config.server.port);
            println!("  Database: {}", config.database.path.display());
            println!("  Storage: {:?}", config.storage.kind);
            println!(
                "  Workers: {} (timeout {}s)",
                config.worker.concurrency, config.worker.task_timeout_secs
            );
            println!(
                "  Watchdog: startup {}s, stall {}s",
                config.watchdog.startup_timeout_secs, config.watchdog.stall_timeout_secs
            );
        }
        None => {
            println!("No config file specified, using defaults");
            let config = config::Config::default();
            println!("Default config:");
            println!("  Server: {}:{}", config.server.host, config.server.port);
        }
    }

    Ok(())
}
