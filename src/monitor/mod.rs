pub mod controller;
pub mod loop_worker;

pub use controller::{EngineReceiver, MonitorController, VisibilityEvent};
pub use loop_worker::MonitorContext;
