use helm_pdp::MergeStrategy;
use helm_risk::RiskWindow;

/// Kernel construction parameters. Everything else is configured through
/// the component accessors after construction.
#[derive(Clone, Debug)]
pub struct KernelConfig {
    pub policy_version: String,
    /// When set, tools without a rule are auto-registered as observe-allow
    /// instead of hitting the fail-closed default. Proxy-observation mode.
    pub observe_mode: bool,
    pub merge_strategy: MergeStrategy,
    pub risk_window: RiskWindow,
    pub max_parallel_pdps: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            policy_version: "policy-v1".into(),
            observe_mode: true,
            merge_strategy: MergeStrategy::Strict,
            risk_window: RiskWindow::default(),
            max_parallel_pdps: helm_core::MAX_PARALLEL_PDPS,
        }
    }
}
