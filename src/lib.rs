pub mod config;
pub mod db;
pub mod detection;
pub mod lock;
pub mod models;
pub mod monitor;
pub mod pose;
pub mod relay;
pub mod runtime;
pub mod storage;
pub mod submission;
pub mod trace;
pub mod ui;
pub mod utils;

pub use config::ProctorConfig;
pub use runtime::{AttemptContext, PageDisposition, PageRuntime};
