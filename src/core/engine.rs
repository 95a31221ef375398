//! Media engine seam

use crate::error::Result;
use crate::types::EngineEvent;
use tokio::sync::broadcast;

/// Something that can play one stream URL at a time.
///
/// Calls are made while the playback session lock is held, so they must
/// return quickly and must not call back into the coordinator. Progress is
/// reported through [`MediaEngine::subscribe`], tagged with the `seq` passed
/// to the matching `load`.
pub trait MediaEngine: Send + Sync {
    fn load(&self, seq: u64, url: &str) -> Result<()>;
    fn play(&self) -> Result<()>;
    fn pause(&self) -> Result<()>;
    fn stop(&self) -> Result<()>;
    fn subscribe(&self) -> broadcast::Receiver<EngineEvent>;
}
