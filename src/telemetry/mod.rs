pub mod bus;
pub mod recorder;

pub use bus::{EventRecord, Stage, TelemetryBus};
pub use recorder::run_recorder;
