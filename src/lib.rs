pub mod cli;
pub mod config;
pub mod db;
pub mod detect;
pub mod keypoint;
mod metrics;
pub mod pipeline;
pub mod queue;
pub mod transport;
pub mod utils;

pub use config::Opts;
pub use keypoint::{Keypoint, MalformedRecordBuffer};
