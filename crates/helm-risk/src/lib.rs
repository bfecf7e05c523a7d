pub mod autonomy;
pub mod budget;
pub mod envelope;

pub use autonomy::{autonomy_level, AutonomyGate};
pub use budget::{Budget, BudgetBook};
pub use envelope::{RiskAccountant, RiskEnvelope, RiskEvent, RiskWindow};
