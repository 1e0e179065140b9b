#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Decision engine.
//!
//! Turns classified entities into [`ProposedAction`](autopilot_actions::ProposedAction)s. The
//! reasoning service is tried first; the deterministic threshold rules take over when it is
//! missing, unreachable or unparseable. Decision never persists or executes anything.

/// Candidates, briefs and the shared strategy input.
pub mod context;
/// Engine wiring the strategies together.
pub mod engine;
/// Deterministic threshold rules.
pub mod fallback;
/// Reasoning-service strategy.
pub mod model;

pub use context::{DecisionCandidate, DecisionContext, EntityBrief};
pub use engine::{DecisionEngine, DecisionOutcome};
pub use fallback::{FallbackDecision, FALLBACK_ORIGIN};
pub use model::{ModelDecision, MODEL_ORIGIN, POLICY_PREAMBLE};
