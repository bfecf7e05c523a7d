pub mod metadata;
pub mod pack;
pub mod registry;
pub mod translog;

pub use metadata::{
    verify_threshold, MetadataSignature, RoleKeys, TufMetadata, TufRole, TufVerifier,
    VerifiedMetadata,
};
pub use pack::{
    InstallReceipt, PackCandidate, PackLoader, PackRef, PublisherKey, PublisherKeyStatus,
    QuarantineOverride, RollbackOverride, UpgradeReceipt,
};
pub use registry::{TrustEvent, TrustEventType, TrustRegistry};
pub use translog::{verify_inclusion, InclusionProof, SignedTreeHead};
