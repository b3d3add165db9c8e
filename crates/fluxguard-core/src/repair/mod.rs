//! Deterministic repair of model-written snippets.
//!
//! Stages run in a fixed order: [`normalize`] pulls the snippet out of the
//! raw text, [`contract`] makes a bare expression bind `result`,
//! [`neutralize`] marks capability-escaping text, and [`pipeline`] parses
//! the result with two bounded fallbacks.

pub mod contract;
pub mod neutralize;
pub mod normalize;
pub mod pipeline;

pub use contract::enforce_contract;
pub use neutralize::{neutralize, DangerCategory, DangerFinding, NEUTRALIZED_MARKER};
pub use normalize::{normalize, Extraction, ExtractionSource};
pub use pipeline::{repair, Fallback, RepairOutcome, RepairReport, RepairState};
