pub mod keypair;
pub mod kms;
pub mod provider;
pub mod sign;

pub use keypair::KeyPair;
pub use kms::Kms;
pub use provider::{KeyProvider, LocalKeyProvider};
pub use sign::{verify_detached, verify_hex, SignatureError};
