//! # fluxguard-core
//!
//! Deterministic guard rails for model-written analysis code and
//! model-written narratives over tabular data.
//!
//! This crate answers two questions about language-model output:
//! - Can this snippet be made runnable, and what does it compute?
//! - Are the facts in this narrative backed by the data?
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: same input, same output; no network, no clock
//! 2. **Fail-soft**: every public entry point returns a tagged outcome
//! 3. **Capability-free execution**: snippets run in an interpreter that
//!    has no filesystem, network, process or import capability
//! 4. **Isolated**: the sandbox works on a private copy of the dataset
//!
//! ## Example
//!
//! ```rust,ignore
//! use fluxguard_core::{repair, Dataset, Executor, SandboxExecutor};
//!
//! let data = Dataset::from_json_str(r#"[{"src": "1.1.1.1", "Bytes_int": 100}]"#)?;
//! let report = repair("```python\ndf['Bytes_int'].sum()\n```");
//!
//! match report.outcome.validated() {
//!     Some(snippet) => println!("{:?}", SandboxExecutor::default().execute(snippet, &data)),
//!     None => println!("BEST_EFFORT: {}", report.outcome.text()),
//! }
//! ```

pub mod dataset;
pub mod faithfulness;
pub mod repair;
pub mod sandbox;
pub mod script;
pub mod types;

// Re-export main types at crate root
pub use dataset::{Cell, Dataset, DatasetError};
pub use faithfulness::{
    check_addresses, compute_aggregates, verify, AddressCheck, Aggregates, Claim, CountTable,
    FaithfulnessReport, Narrative, Recommendation, SupportBasis, SupportedClaim, VerifierConfig,
};
pub use repair::{repair, RepairOutcome, RepairReport, RepairState};
pub use sandbox::{
    ExecutionResult, Executor, ResultPreview, SandboxExecutor, SandboxLimits, RESULT_BINDING,
};
pub use script::{ParseError, ValidatedSnippet};
pub use types::{QueryResponse, QueryStatus};

/// Repair `raw` and, if it validates, execute it against `dataset`.
///
/// The one-call form of the repair + execute path with no model in the
/// loop: the answer text is empty and `raw_llm` carries `raw`.
pub fn repair_and_execute(raw: &str, dataset: &Dataset, executor: &dyn Executor) -> QueryResponse {
    let report = repair(raw);
    match &report.outcome {
        RepairOutcome::Validated(snippet) => QueryResponse::from_execution(
            executor.execute(snippet, dataset),
            "",
            snippet.source(),
            Some(raw.to_string()),
        ),
        RepairOutcome::BestEffort(text) => QueryResponse::best_effort(text.clone(), Some(raw.to_string())),
    }
}
