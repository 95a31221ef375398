//! Terminal UI helpers

pub mod selector;
