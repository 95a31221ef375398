//! dhamma-stream - Dhamma talks from YouTube in your terminal
//!
//! Browse a channel's talks, search them and stream the audio.

use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use dhamma_stream::bridge::AppBridge;
use dhamma_stream::core::player::MpvEngine;
use dhamma_stream::core::youtube::YtDlpProvider;
use dhamma_stream::storage::config;
use dhamma_stream::types::{ChannelInfo, Config, PlaybackSnapshot, PlaybackState, VideoSummary};
use dhamma_stream::ui::selector;
use dhamma_stream::utils::paths::get_ipc_socket_path;
use dhamma_stream::Coordinator;

/// Dhamma talks from YouTube channels, audio only
#[derive(Parser, Debug)]
#[command(name = "dhamma-stream")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Include video (audio-only by default)
    #[arg(long, global = true)]
    video: bool,

    /// Limit the number of videos listed
    #[arg(short, long, global = true)]
    limit: Option<usize>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Edit the configuration file
    #[arg(short, long)]
    edit: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show channel details
    Channel { channel: String },
    /// List a channel's recent talks
    Videos { channel: String },
    /// Search talks, optionally within one channel
    Search {
        /// Channel URL, @handle or channel id
        #[arg(short, long)]
        channel: Option<String>,
        #[arg(trailing_var_arg = true, required = true)]
        query: Vec<String>,
    },
    /// Play a video by URL or id
    Play { video: String },
    /// Pick a talk from a channel and play it
    Browse { channel: Option<String> },
    /// Serve the JSON-lines application bridge on stdin/stdout
    Serve,
    /// Print the effective configuration
    Config,
}

fn init_logging(verbose: bool, serving: bool) {
    let default = match (verbose, serving) {
        (true, _) => "dhamma_stream=debug",
        (false, true) => "dhamma_stream=info",
        (false, false) => "dhamma_stream=warn",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Run `fut` behind a spinner
async fn with_spinner<T>(message: &str, fut: impl Future<Output = T>) -> T {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(100));

    let out = fut.await;
    spinner.finish_and_clear();
    out
}

fn print_channel(info: &ChannelInfo) {
    println!("{} {}", info.name.bold(), format!("({})", info.id).dimmed());
    if let Some(subs) = info.subscriber_count {
        println!("{} {}", "Subscribers:".dimmed(), subs);
    }
    if !info.description.is_empty() {
        println!("\n{}", info.description);
    }
}

fn print_videos(videos: &[VideoSummary]) {
    if videos.is_empty() {
        println!("{}", "No results.".yellow());
        return;
    }
    for video in videos {
        println!("{}  {}", video.id.dimmed(), selector::format_video_label(video));
    }
}

/// `Some` once the session has finished; a failed session is an error
fn finished(snapshot: &PlaybackSnapshot) -> Option<anyhow::Result<()>> {
    match snapshot.state {
        PlaybackState::Ended | PlaybackState::Idle => Some(Ok(())),
        PlaybackState::Failed => {
            let message = snapshot.error.clone().unwrap_or_else(|| "playback failed".into());
            Some(Err(anyhow::anyhow!(message)))
        }
        _ => None,
    }
}

/// Play until the talk ends, fails or the user presses Ctrl-C
async fn play(coordinator: &Coordinator, video: &str) -> anyhow::Result<()> {
    let mut feed = coordinator.subscribe();
    let ticket = coordinator.play_video(video);

    let resolving = with_spinner("Fetching stream...", async {
        loop {
            if feed.borrow_and_update().state != PlaybackState::Resolving {
                return true;
            }
            if feed.changed().await.is_err() {
                return false;
            }
        }
    });

    tokio::select! {
        ready = resolving => {
            if !ready {
                return Ok(());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            let _ = coordinator.stop();
            return Ok(());
        }
    }
    tracing::debug!(seq = ticket.seq(), "stream delivered");

    loop {
        let snapshot = feed.borrow_and_update().clone();
        if snapshot.state == PlaybackState::Playing {
            let bitrate = snapshot
                .stream
                .as_ref()
                .and_then(|s| s.bitrate_kbps)
                .map(|b| format!("{} kbps", b))
                .unwrap_or_default();
            println!("{} {}", "🎵 Playing...".green(), bitrate.dimmed());
        }
        if let Some(done) = finished(&snapshot) {
            if done.is_ok() {
                println!("👋 May you be well.");
            }
            return done;
        }

        tokio::select! {
            changed = feed.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
            }
            _ = tokio::signal::ctrl_c() => {
                let _ = coordinator.stop();
                println!();
                return Ok(());
            }
        }
    }
}

fn build_coordinator(cfg: Config, video: bool) -> anyhow::Result<Coordinator> {
    let provider = Arc::new(YtDlpProvider::new(cfg.ytdlp_path.clone()));
    let engine = Arc::new(MpvEngine::new(cfg.player_path.clone(), get_ipc_socket_path()).with_video(video));
    Ok(Coordinator::new(cfg, provider, engine)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, matches!(cli.command, Some(Command::Serve)));

    // Handle --edit flag
    if cli.edit {
        let cfg = config::load_config().await?;
        config::edit_config(&cfg.editor).await?;
        return Ok(());
    }

    let mut cfg = config::load_config().await?;
    if let Some(limit) = cli.limit {
        cfg.video_limit = limit;
    }

    let command = cli.command.unwrap_or(Command::Browse { channel: None });
    if let Command::Config = command {
        println!("{}", serde_json::to_string_pretty(&cfg)?);
        return Ok(());
    }

    let coordinator = build_coordinator(cfg, cli.video)?;

    let outcome: anyhow::Result<()> = match command {
        Command::Channel { channel } => with_spinner("Looking up channel...", coordinator.get_channel_info(&channel))
            .await
            .map(|info| print_channel(&info))
            .map_err(Into::into),
        Command::Videos { channel } => with_spinner("Fetching talks...", coordinator.get_channel_videos(&channel))
            .await
            .map(|videos| print_videos(&videos))
            .map_err(Into::into),
        Command::Search { channel, query } => {
            let query = query.join(" ");
            let results = match channel {
                Some(channel) => {
                    with_spinner("Searching...", coordinator.search_in_channel(&channel, &query)).await
                }
                None => with_spinner("Searching...", coordinator.search(&query)).await,
            };
            results.map(|videos| print_videos(&videos)).map_err(Into::into)
        }
        Command::Play { video } => play(&coordinator, &video).await,
        Command::Browse { channel } => {
            let channel = match channel {
                Some(channel) => channel,
                None => dialoguer::Input::<String>::new()
                    .with_prompt("Channel (URL or @handle)")
                    .interact_text()?,
            };
            match with_spinner("Fetching talks...", coordinator.get_channel_videos(&channel)).await {
                Ok(videos) => match selector::select(&selector::video_menu(&videos), "Select Talk") {
                    Some(id) => play(&coordinator, &id).await,
                    None => Ok(()),
                },
                Err(e) => Err(e.into()),
            }
        }
        Command::Serve => AppBridge::new(coordinator.clone())
            .serve_stdio()
            .await
            .map_err(Into::into),
        Command::Config => Ok(()),
    };

    coordinator.shutdown();

    if let Err(e) = outcome {
        eprintln!("{} {}", "Error:".red(), e);
        std::process::exit(1);
    }
    Ok(())
}
