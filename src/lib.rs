//! dhamma-stream library
//!
//! Resolution, caching and playback coordination for streaming talks from
//! YouTube channels.

pub mod bridge;
pub mod core;
pub mod error;
pub mod storage;
pub mod types;
pub mod ui;
pub mod utils;

pub use crate::core::coordinator::{Coordinator, PlayTicket};
pub use crate::error::{DhammaError, ErrorCode, Result};
