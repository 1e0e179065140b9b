#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Knowledge base and librarian.
//!
//! Every persisted change to skills or knowledge goes through the [`Librarian`]: audit
//! findings, reflection outcomes and lessons, evolution mutations, decay and promotion.

/// Knowledge entries and the queryable base.
pub mod entry;
/// Audit findings.
pub mod finding;
/// The sole mutator of skill and knowledge state.
pub mod librarian;

use autopilot_skills::SkillError;
use thiserror::Error;

pub use entry::{KnowledgeBase, KnowledgeEntry, KnowledgeKind, KnowledgeQuery};
pub use finding::{CorrectiveAction, Finding, FindingCategory, FindingSeverity};
pub use librarian::{
    DecayReport, FindingsApplied, Librarian, MutationChange, Outcome, SkillMutation,
};

/// Librarian failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KnowledgeError {
    /// Skill registry refused the change.
    #[error(transparent)]
    Skill(#[from] SkillError),
}
