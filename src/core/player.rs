//! Player module - mpv integration
//!
//! One mpv process per loaded stream. Pause and resume go over mpv's JSON
//! IPC socket; process exit is reported as an engine event.

use crate::core::engine::MediaEngine;
use crate::error::{DhammaError, Result};
use crate::types::{EngineEvent, EngineEventKind};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

/// mpv's exit code when the user quits
const EXIT_QUIT: i32 = 4;

/// Upper bound on an IPC write; callers hold the playback session lock
#[cfg(unix)]
const IPC_WRITE_TIMEOUT: Duration = Duration::from_millis(250);

struct Loaded {
    seq: u64,
    url: String,
    /// Present once the process is running
    stop: Option<oneshot::Sender<()>>,
}

/// Media engine backed by an external mpv process
pub struct MpvEngine {
    program: String,
    socket: PathBuf,
    video: bool,
    events: broadcast::Sender<EngineEvent>,
    current: Mutex<Option<Loaded>>,
}

impl MpvEngine {
    pub fn new(program: impl Into<String>, socket: PathBuf) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            program: program.into(),
            socket,
            video: false,
            events,
            current: Mutex::new(None),
        }
    }

    /// Show video instead of playing audio only
    pub fn with_video(mut self, video: bool) -> Self {
        self.video = video;
        self
    }

    fn spawn(&self, seq: u64, url: &str) -> Result<oneshot::Sender<()>> {
        let args = build_args(url, &self.socket, self.video);
        debug!(program = %self.program, seq, "spawning player");

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => DhammaError::MissingDependency(self.program.clone()),
                _ => DhammaError::Spawn(format!("Failed to start {}: {}", self.program, e)),
            })?;

        let (stop_tx, stop_rx) = oneshot::channel();
        let events = self.events.clone();
        let _ = events.send(EngineEvent {
            seq,
            kind: EngineEventKind::Started,
        });

        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    let kind = match status {
                        Ok(status) => exit_event(status),
                        Err(e) => EngineEventKind::Error(format!("Failed to wait for player: {}", e)),
                    };
                    info!(seq, ?kind, "player exited");
                    let _ = events.send(EngineEvent { seq, kind });
                }
                _ = stop_rx => {
                    if let Err(e) = child.kill().await {
                        warn!(seq, error = %e, "failed to kill player");
                    }
                }
            }
        });

        Ok(stop_tx)
    }

    fn set_pause(&self, paused: bool) -> Result<()> {
        let running = self.current.lock().as_ref().is_some_and(|l| l.stop.is_some());
        if !running {
            return Err(DhammaError::NotLoaded);
        }
        let command = serde_json::json!({ "command": ["set_property", "pause", paused] });
        send_ipc(&self.socket, &command.to_string())
    }
}

impl MediaEngine for MpvEngine {
    fn load(&self, seq: u64, url: &str) -> Result<()> {
        self.stop()?;
        *self.current.lock() = Some(Loaded {
            seq,
            url: url.to_string(),
            stop: None,
        });
        Ok(())
    }

    fn play(&self) -> Result<()> {
        let mut current = self.current.lock();
        let Some(loaded) = current.as_mut() else {
            return Err(DhammaError::NotLoaded);
        };
        if loaded.stop.is_some() {
            drop(current);
            return self.set_pause(false);
        }
        loaded.stop = Some(self.spawn(loaded.seq, &loaded.url)?);
        Ok(())
    }

    fn pause(&self) -> Result<()> {
        self.set_pause(true)
    }

    fn stop(&self) -> Result<()> {
        if let Some(loaded) = self.current.lock().take()
            && let Some(stop) = loaded.stop
        {
            let _ = stop.send(());
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}

impl Drop for MpvEngine {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn build_args(url: &str, socket: &Path, video: bool) -> Vec<String> {
    let mut args = vec![
        "--really-quiet".to_string(),
        "--no-terminal".to_string(),
        format!("--input-ipc-server={}", socket.display()),
    ];
    if !video {
        args.push("--no-video".into());
    }
    args.push(url.to_string());
    args
}

/// Don't treat user quit (q key) as an error
fn exit_event(status: ExitStatus) -> EngineEventKind {
    match status.code() {
        Some(0) | Some(EXIT_QUIT) => EngineEventKind::Ended,
        code => EngineEventKind::Error(format!("mpv exited with code: {:?}", code)),
    }
}

/// Connecting to a local socket returns at once (it either has a listener
/// or fails); the write is bounded by `IPC_WRITE_TIMEOUT`.
#[cfg(unix)]
fn send_ipc(socket: &Path, command: &str) -> Result<()> {
    use std::io::Write;
    use std::os::unix::net::UnixStream;

    let mut stream = UnixStream::connect(socket)
        .map_err(|e| DhammaError::Engine(format!("player IPC unavailable: {}", e)))?;
    stream
        .set_write_timeout(Some(IPC_WRITE_TIMEOUT))
        .map_err(|e| DhammaError::Engine(format!("player IPC setup failed: {}", e)))?;
    stream
        .write_all(format!("{}\n", command).as_bytes())
        .map_err(|e| DhammaError::Engine(format!("player IPC write failed: {}", e)))
}

#[cfg(not(unix))]
fn send_ipc(_socket: &Path, _command: &str) -> Result<()> {
    Err(DhammaError::Engine("player IPC is only supported on unix".into()))
}
