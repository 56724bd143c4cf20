pub mod classifier;
pub mod config;
pub mod domain;
pub mod pipeline;
pub mod sink;
pub mod traits;
