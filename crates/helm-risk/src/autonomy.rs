use helm_core::{
    RiskLevel, AUTONOMY_THRESHOLD_HIGH, AUTONOMY_THRESHOLD_LOW, AUTONOMY_THRESHOLD_MED,
};

/// Autonomy shrinks linearly with uncertainty:
/// `level = floor(100 * (1 - uncertainty))`, clamped into `[0, 100]`.
pub fn autonomy_level(uncertainty: f64) -> u8 {
    let clamped = uncertainty.clamp(0.0, 1.0);
    (100.0 * (1.0 - clamped)).floor() as u8
}

/// Fixed thresholds gating unattended execution per risk level.
/// CRITICAL actions are never autonomous.
pub struct AutonomyGate;

impl AutonomyGate {
    pub fn permits(level: u8, risk: RiskLevel) -> bool {
        match risk {
            RiskLevel::None => true,
            RiskLevel::Low => level >= AUTONOMY_THRESHOLD_LOW,
            RiskLevel::Med => level >= AUTONOMY_THRESHOLD_MED,
            RiskLevel::High => level >= AUTONOMY_THRESHOLD_HIGH,
            RiskLevel::Critical => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_shrinks_linearly_with_uncertainty() {
        assert_eq!(autonomy_level(0.0), 100);
        assert_eq!(autonomy_level(0.25), 75);
        assert_eq!(autonomy_level(1.0), 0);
        // Out-of-range inputs clamp instead of wrapping.
        assert_eq!(autonomy_level(-3.0), 100);
        assert_eq!(autonomy_level(7.5), 0);
    }

    #[test]
    fn thresholds_gate_by_risk() {
        assert!(AutonomyGate::permits(10, RiskLevel::Low));
        assert!(!AutonomyGate::permits(9, RiskLevel::Low));
        assert!(AutonomyGate::permits(40, RiskLevel::Med));
        assert!(!AutonomyGate::permits(39, RiskLevel::Med));
        assert!(AutonomyGate::permits(70, RiskLevel::High));
        assert!(!AutonomyGate::permits(69, RiskLevel::High));
    }

    #[test]
    fn critical_is_never_autonomous() {
        assert!(!AutonomyGate::permits(100, RiskLevel::Critical));
    }
}
