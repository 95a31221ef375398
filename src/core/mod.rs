//! Core modules: resolution, playback and the external tool adapters

pub mod coordinator;
pub mod engine;
pub mod executor;
pub mod player;
pub mod provider;
pub mod selection;
pub mod session;
pub mod youtube;
