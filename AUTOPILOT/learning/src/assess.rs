use autopilot_actions::{Action, ActionKind, MetricsSnapshot};
use autopilot_knowledge::Outcome;
use autopilot_skills::ReflectionThresholds;

const BREAK_EVEN: f64 = 1.0;

/// Deterministic hindsight judgement of an executed action.
///
/// Shared by the reflection fallback and the auditor so both grade decisions the same way.
#[must_use]
pub fn assess(
    action: &Action,
    post: Option<&MetricsSnapshot>,
    t: &ReflectionThresholds,
) -> (Outcome, String) {
    let (Some(pre), Some(post)) = (action.pre_metrics.as_ref(), post) else {
        return (
            Outcome::Unclear,
            "no metrics to compare before and after the action".into(),
        );
    };
    match action.kind {
        ActionKind::Pause => assess_pause(pre, post, t),
        ActionKind::AdjustBudget => {
            let increased = match (action.params.previous_budget, action.params.new_budget) {
                (Some(previous), Some(new_budget)) => new_budget > previous,
                _ => true,
            };
            if increased {
                assess_increase(pre, post, t)
            } else {
                assess_decrease(pre, post)
            }
        }
        ActionKind::Resume => assess_resume(pre, post),
    }
}

fn assess_pause(
    pre: &MetricsSnapshot,
    post: &MetricsSnapshot,
    t: &ReflectionThresholds,
) -> (Outcome, String) {
    let recovery_bar = (pre.roas_3d * (1.0 + t.pause_recovery)).max(BREAK_EVEN);
    if post.roas_3d >= recovery_bar {
        (
            Outcome::Wrong,
            format!(
                "paused at roas {:.2} but it recovered to {:.2}; the dip was temporary",
                pre.roas_3d, post.roas_3d
            ),
        )
    } else if pre.roas_3d < BREAK_EVEN {
        (
            Outcome::Correct,
            format!(
                "paused a loss-making entity (roas {:.2}) that did not recover ({:.2})",
                pre.roas_3d, post.roas_3d
            ),
        )
    } else {
        (
            Outcome::Unclear,
            format!("paused a profitable entity (roas {:.2}); no clear signal", pre.roas_3d),
        )
    }
}

fn assess_increase(
    pre: &MetricsSnapshot,
    post: &MetricsSnapshot,
    t: &ReflectionThresholds,
) -> (Outcome, String) {
    let kept = pre.roas_3d * (1.0 - t.budget_tolerance);
    let collapsed = pre.roas_3d * (1.0 - t.budget_collapse);
    if post.roas_3d >= kept && post.conversions_3d >= pre.conversions_3d {
        (
            Outcome::Correct,
            format!(
                "budget increase held roas {:.2} -> {:.2} with conversions {:.0} -> {:.0}",
                pre.roas_3d, post.roas_3d, pre.conversions_3d, post.conversions_3d
            ),
        )
    } else if post.roas_3d < collapsed {
        (
            Outcome::Wrong,
            format!(
                "budget increase collapsed roas {:.2} -> {:.2}",
                pre.roas_3d, post.roas_3d
            ),
        )
    } else {
        (
            Outcome::Unclear,
            format!(
                "budget increase moved roas {:.2} -> {:.2}, conversions {:.0} -> {:.0}",
                pre.roas_3d, post.roas_3d, pre.conversions_3d, post.conversions_3d
            ),
        )
    }
}

fn assess_decrease(pre: &MetricsSnapshot, post: &MetricsSnapshot) -> (Outcome, String) {
    if post.roas_3d > pre.roas_3d {
        (
            Outcome::Correct,
            format!("budget cut improved roas {:.2} -> {:.2}", pre.roas_3d, post.roas_3d),
        )
    } else {
        (
            Outcome::Unclear,
            format!("budget cut left roas at {:.2}", post.roas_3d),
        )
    }
}

fn assess_resume(pre: &MetricsSnapshot, post: &MetricsSnapshot) -> (Outcome, String) {
    if post.roas_3d >= BREAK_EVEN {
        (
            Outcome::Correct,
            format!("resumed entity is profitable (roas {:.2})", post.roas_3d),
        )
    } else if post.spend_3d > pre.spend_3d {
        (
            Outcome::Wrong,
            format!("resumed entity is losing money (roas {:.2})", post.roas_3d),
        )
    } else {
        (Outcome::Unclear, "resumed entity has not spent enough to judge".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autopilot_actions::ProposedAction;

    fn snapshot(roas_3d: f64, conversions_3d: f64) -> MetricsSnapshot {
        MetricsSnapshot {
            roas_3d,
            conversions_3d,
            spend_3d: 100.0,
            ..MetricsSnapshot::default()
        }
    }

    fn action(kind: ActionKind, pre: MetricsSnapshot) -> Action {
        let mut proposal = ProposedAction::new("c1", kind, "test");
        proposal.pre_metrics = Some(pre);
        if kind == ActionKind::AdjustBudget {
            proposal = proposal.with_budget(100.0, 125.0);
        }
        Action::from_proposal(proposal)
    }

    #[test]
    fn pause_outcomes() {
        let t = ReflectionThresholds::default();
        let paused = action(ActionKind::Pause, snapshot(0.15, 0.0));
        assert_eq!(assess(&paused, Some(&snapshot(0.1, 0.0)), &t).0, Outcome::Correct);
        assert_eq!(assess(&paused, Some(&snapshot(1.4, 2.0)), &t).0, Outcome::Wrong);
        assert_eq!(assess(&paused, None, &t).0, Outcome::Unclear);
    }

    #[test]
    fn budget_increase_outcomes() {
        let t = ReflectionThresholds::default();
        let scaled = action(ActionKind::AdjustBudget, snapshot(3.0, 6.0));
        assert_eq!(assess(&scaled, Some(&snapshot(2.7, 7.0)), &t).0, Outcome::Correct);
        assert_eq!(assess(&scaled, Some(&snapshot(1.5, 7.0)), &t).0, Outcome::Wrong);
        assert_eq!(assess(&scaled, Some(&snapshot(2.3, 7.0)), &t).0, Outcome::Unclear);
    }
}
