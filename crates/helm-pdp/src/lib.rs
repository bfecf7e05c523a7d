pub mod engine;
pub mod expr;
pub mod profile;
pub mod request;
pub mod rules;
pub mod swarm;
pub mod trace;

pub use engine::{Clock, LocalPdp, Pdp};
pub use expr::{BinOp, EvalError, Expr, UnaryOp};
pub use profile::{validate_expression, IssueType, ValidationIssue, PROFILE_VERSION};
pub use request::{PdpRequest, PdpResponse};
pub use rules::{Rule, RuleSet};
pub use swarm::{BatchOutcome, MergeStrategy, ParlMetrics, SwarmPdp};
pub use trace::{trace_hash, TraceStep};
