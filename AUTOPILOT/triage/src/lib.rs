#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Triage: the screener decides which entities need a decision this cycle, the
//! classifier labels them with a single performance state.

/// Ordered threshold cascade.
pub mod classifier;
/// Three-way screening verdicts and bounded fan-out.
pub mod screener;

pub use classifier::{Classification, Classifier, Label};
pub use screener::{screen_batch, ScreenJob, ScreenRecord, ScreenResult, Screener};
