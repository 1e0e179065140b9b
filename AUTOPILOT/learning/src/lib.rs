#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Learning loop: reflection grades executed actions in hindsight, evolution retunes the rule
//! skills that proposed them. All writes go through the librarian.

/// Deterministic hindsight assessment shared with the auditor.
pub mod assess;
/// Skill evolution from aggregated reflections.
pub mod evolution;
/// Per-action reflection.
pub mod reflection;

pub use assess::assess;
pub use evolution::{EvolutionEngine, EvolutionPolicy, EvolutionReport, OutcomeGroup};
pub use reflection::{
    clamp_delay, Judgement, ModelReflection, ReflectionEngine, ReflectionInput, ReflectionLog,
    ReflectionRecord, ReflectionSummary, RuleReflection, MAX_DELAY_HOURS, MIN_DELAY_HOURS,
};
