pub mod recorder;
pub mod types;

pub use recorder::EventRecorder;
pub use types::{CapturedEvent, HttpRequestCapture, SshAuthCapture};
