pub mod denial;
pub mod envelope;
pub mod jurisdiction;
pub mod liveness;

pub use denial::DenialLedger;
pub use envelope::{Envelope, InjectionIndicator, Segment, SourceType, TrustLevel};
pub use jurisdiction::{
    JurisdictionConflict, JurisdictionContext, JurisdictionQuery, JurisdictionResolver,
    JurisdictionRule,
};
pub use liveness::{BlockingKind, LivenessEntry, LivenessManager, LivenessState};
