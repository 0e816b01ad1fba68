//! Periodic shipping of the event log to a remote collector.

pub mod collector;
pub mod export_cycle;
pub mod json_stream;

pub use collector::{Collector, HttpCollector};
pub use export_cycle::{CycleReport, CycleState, ExportCycle, ExportScheduler, ExportTrigger};
pub use json_stream::{export, ExportProgress, JsonArrayStream};
