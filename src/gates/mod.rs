//! Approval gate evaluation.
//!
//! The graph consults [`should_interrupt`] after each phase to decide whether
//! to suspend; the CLI uses the same function to decide whether a waiting run
//! is sitting at a gate.

use shipyard_common::ApprovalGates;

use crate::phase::Phase;

/// Which approval flag governs a phase boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateGroup {
    Prd,
    Plan,
    Merge,
}

impl GateGroup {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Prd => "PRD",
            Self::Plan => "plan",
            Self::Merge => "merge",
        }
    }
}

/// Gate group for a phase. The merge phase is the final node and is never gated.
pub fn gate_group(phase: Phase) -> Option<GateGroup> {
    match phase {
        Phase::Analyze | Phase::Requirements => Some(GateGroup::Prd),
        Phase::Research | Phase::Plan => Some(GateGroup::Plan),
        Phase::Implement => Some(GateGroup::Merge),
        Phase::Merge => None,
    }
}

/// True when the run must pause for a human decision after `phase`.
///
/// No gates at all means fully autonomous.
pub fn should_interrupt(phase: Phase, gates: Option<&ApprovalGates>) -> bool {
    let Some(gates) = gates else {
        return false;
    };
    match gate_group(phase) {
        Some(GateGroup::Prd) => !gates.allow_prd,
        Some(GateGroup::Plan) => !gates.allow_plan,
        Some(GateGroup::Merge) => !gates.allow_merge,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gates(allow_prd: bool, allow_plan: bool, allow_merge: bool) -> ApprovalGates {
        ApprovalGates {
            allow_prd,
            allow_plan,
            allow_merge,
        }
    }

    #[test]
    fn test_no_gates_never_interrupts() {
        for phase in Phase::ALL {
            assert!(!should_interrupt(phase, None), "{phase} interrupted");
        }
    }

    #[test]
    fn test_truth_table() {
        for bits in 0..8u8 {
            let g = gates(bits & 1 != 0, bits & 2 != 0, bits & 4 != 0);
            for phase in Phase::ALL {
                let expected = match phase {
                    Phase::Analyze | Phase::Requirements => !g.allow_prd,
                    Phase::Research | Phase::Plan => !g.allow_plan,
                    Phase::Implement => !g.allow_merge,
                    Phase::Merge => false,
                };
                assert_eq!(
                    should_interrupt(phase, Some(&g)),
                    expected,
                    "phase={phase} gates={g:?}"
                );
            }
        }
    }

    #[test]
    fn test_all_denied_gates_every_phase_but_merge() {
        let g = ApprovalGates::default();
        let gated: Vec<Phase> = Phase::ALL
            .into_iter()
            .filter(|p| should_interrupt(*p, Some(&g)))
            .collect();
        assert_eq!(
            gated,
            vec![
                Phase::Analyze,
                Phase::Requirements,
                Phase::Research,
                Phase::Plan,
                Phase::Implement
            ]
        );
    }

    #[test]
    fn test_all_allowed_is_autonomous() {
        let g = gates(true, true, true);
        assert!(Phase::ALL.iter().all(|p| !should_interrupt(*p, Some(&g))));
    }

    #[test]
    fn test_gate_group_labels() {
        assert_eq!(gate_group(Phase::Requirements).map(|g| g.label()), Some("PRD"));
        assert_eq!(gate_group(Phase::Research).map(|g| g.label()), Some("plan"));
        assert_eq!(gate_group(Phase::Merge), None);
    }
}
