//! User-action telemetry sink.

pub mod jsonl;
pub mod recorder;

pub use jsonl::ActionEvent;
pub use recorder::ActionRecorder;
