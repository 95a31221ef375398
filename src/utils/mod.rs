pub mod ids;
pub mod paths;
