pub mod bridge;
pub mod config;

pub use bridge::{EffectResult, GovernRequest, KernelBridge};
pub use config::KernelConfig;
