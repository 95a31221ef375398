//! Application bridge
//!
//! JSON-lines protocol between a UI process and the [`Coordinator`]. Each
//! request line carries an `id` and a `method`; each response echoes the id
//! with either `data` or a typed `error`. Playback state changes are pushed
//! as `playbackStateChanged` event lines.

use crate::core::coordinator::Coordinator;
use crate::error::{DhammaError, ErrorCode, Result};
use crate::types::PlaybackSnapshot;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum BridgeCall {
    GetChannelInfo { channel_id: String },
    GetChannelVideos { channel_id: String },
    SearchChannel { channel_id: String, query: String },
    Search { query: String },
    PlayVideo { video_id: String },
    Pause,
    Resume,
    Stop,
    GetPlaybackState,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BridgeRequest {
    #[serde(default)]
    pub id: Value,
    #[serde(flatten)]
    pub call: BridgeCall,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BridgeError {
    pub code: ErrorCode,
    pub message: String,
}

impl From<&DhammaError> for BridgeError {
    fn from(e: &DhammaError) -> Self {
        Self {
            code: e.code(),
            message: e.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BridgeResponse {
    pub id: Value,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<BridgeError>,
}

impl BridgeResponse {
    fn ok(id: Value, data: Value) -> Self {
        Self {
            id,
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn failed(id: Value, error: &DhammaError) -> Self {
        Self {
            id,
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Pushed to the UI on every playback state change
#[derive(Debug, Clone, Serialize)]
pub struct BridgeEvent<'a> {
    pub event: &'static str,
    pub data: &'a PlaybackSnapshot,
}

pub fn state_event(snapshot: &PlaybackSnapshot) -> String {
    let event = BridgeEvent {
        event: "playbackStateChanged",
        data: snapshot,
    };
    serde_json::to_string(&event).unwrap_or_default()
}

#[derive(Clone)]
pub struct AppBridge {
    coordinator: Coordinator,
}

impl AppBridge {
    pub fn new(coordinator: Coordinator) -> Self {
        Self { coordinator }
    }

    /// Execute one call. `playVideo` returns as soon as the request is
    /// registered; progress arrives as state events.
    pub async fn handle(&self, call: BridgeCall) -> Result<Value> {
        let c = &self.coordinator;
        let data = match call {
            BridgeCall::GetChannelInfo { channel_id } => to_value(c.get_channel_info(&channel_id).await?)?,
            BridgeCall::GetChannelVideos { channel_id } => to_value(c.get_channel_videos(&channel_id).await?)?,
            BridgeCall::SearchChannel { channel_id, query } => {
                to_value(c.search_in_channel(&channel_id, &query).await?)?
            }
            BridgeCall::Search { query } => to_value(c.search(&query).await?)?,
            BridgeCall::PlayVideo { video_id } => {
                let ticket = c.play_video(&video_id);
                json!({ "seq": ticket.seq() })
            }
            BridgeCall::Pause => {
                c.pause()?;
                Value::Null
            }
            BridgeCall::Resume => {
                c.resume()?;
                Value::Null
            }
            BridgeCall::Stop => {
                c.stop()?;
                Value::Null
            }
            BridgeCall::GetPlaybackState => to_value(c.playback_state())?,
        };
        Ok(data)
    }

    /// Parse, execute and encode one request line
    pub async fn handle_line(&self, line: &str) -> String {
        let response = match serde_json::from_str::<BridgeRequest>(line) {
            Ok(request) => {
                debug!(id = %request.id, call = ?request.call, "bridge request");
                match self.handle(request.call).await {
                    Ok(data) => BridgeResponse::ok(request.id, data),
                    Err(e) => BridgeResponse::failed(request.id, &e),
                }
            }
            Err(e) => {
                let id = serde_json::from_str::<Value>(line)
                    .ok()
                    .and_then(|v| v.get("id").cloned())
                    .unwrap_or(Value::Null);
                BridgeResponse::failed(id, &DhammaError::from(e))
            }
        };
        serde_json::to_string(&response).unwrap_or_default()
    }

    /// Serve requests from stdin until EOF, writing responses and state
    /// events to stdout. Requests run concurrently; responses are written
    /// in completion order.
    pub async fn serve_stdio(self) -> Result<()> {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

        let writer = tokio::spawn(async move {
            let mut stdout = tokio::io::stdout();
            while let Some(line) = out_rx.recv().await {
                if stdout.write_all(format!("{}\n", line).as_bytes()).await.is_err() {
                    break;
                }
                let _ = stdout.flush().await;
            }
        });

        let mut feed = self.coordinator.subscribe();
        let events_tx = out_tx.clone();
        let events = tokio::spawn(async move {
            while feed.changed().await.is_ok() {
                let line = state_event(&feed.borrow_and_update());
                if events_tx.send(line).is_err() {
                    break;
                }
            }
        });

        info!("bridge listening on stdin");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let bridge = self.clone();
            let tx = out_tx.clone();
            tokio::spawn(async move {
                let response = bridge.handle_line(&line).await;
                if tx.send(response).is_err() {
                    warn!("bridge output closed");
                }
            });
        }

        info!("bridge input closed");
        events.abort();
        drop(out_tx);
        let _ = writer.await;
        Ok(())
    }
}

fn to_value<T: Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}
