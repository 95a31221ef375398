//! Storage modules: config, resolution cache

pub mod cache;
pub mod config;
