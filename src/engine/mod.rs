pub mod anomaly;
pub mod detector;
pub mod edge;
pub mod pnl;
pub mod risk;
pub mod runner;

pub use anomaly::{AnomalyAssessment, AnomalyGuard};
pub use detector::Detector;
pub use edge::EdgeCalculator;
pub use pnl::{PairPnl, PnlTracker};
pub use risk::RiskManager;
pub use runner::{run_engine, SignalQueue};
