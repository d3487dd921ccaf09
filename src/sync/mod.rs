pub mod orchestrator;
pub mod price;
pub mod retention;
pub mod scheduler;

pub use orchestrator::{AggregationOrchestrator, CyclePhase, CycleReport, OrchestratorConfig};
pub use price::{HttpPriceOracle, PriceOracle};
pub use retention::{RetentionTrimmer, DEFAULT_MAX_RECORDS};
pub use scheduler::SyncScheduler;
