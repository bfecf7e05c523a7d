use serde::{Deserialize, Serialize};

use helm_core::sha256_hex;

/// One fired rule in evaluation order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceStep {
    pub step: u32,
    pub expression: String,
    pub result_hash: String,
}

impl TraceStep {
    pub fn new(step: u32, expression: impl Into<String>, result: &[u8]) -> Self {
        Self {
            step,
            expression: expression.into(),
            result_hash: sha256_hex(result),
        }
    }
}

/// Hash the ordered step sequence: SHA-256 over
/// `"{step}:{expression}:{result_hash};"` concatenated. Order is
/// significant; reordering two steps changes the hash by construction.
pub fn trace_hash(steps: &[TraceStep]) -> String {
    let mut buf = String::new();
    for s in steps {
        buf.push_str(&format!("{}:{}:{};", s.step, s.expression, s.result_hash));
    }
    sha256_hex(buf.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reordering_changes_the_hash() {
        let a = TraceStep::new(1, "(cost <= 500)", b"true");
        let b = TraceStep::new(2, "(region in [\"eu\"])", b"true");
        let forward = trace_hash(&[a.clone(), b.clone()]);
        let reversed = trace_hash(&[b, a]);
        assert_ne!(forward, reversed);
    }

    #[test]
    fn identical_sequences_hash_identically() {
        let steps = vec![
            TraceStep::new(1, "x", b"true"),
            TraceStep::new(2, "y", b"false"),
        ];
        assert_eq!(trace_hash(&steps), trace_hash(&steps.clone()));
    }
}
