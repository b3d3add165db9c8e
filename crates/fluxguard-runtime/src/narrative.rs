//! Executive narrative generation and its faithfulness audit.
//!
//! The model sees dataset metrics plus a handful of evidence rows and
//! writes `{summary, recommendations}`. Replies are parsed leniently; when
//! no provider is configured a deterministic summary stands in. The audit
//! then checks whatever was written against the evidence.

use std::sync::Arc;

use fluxguard_core::{
    compute_aggregates, verify, CountTable, Dataset, FaithfulnessReport, Narrative, Recommendation,
    VerifierConfig,
};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use tracing::{debug, info, warn};

use crate::analyst::find_json_object;
use crate::config::RuntimeConfig;
use crate::prompts::{narrative_prompt, NARRATIVE_SYSTEM_PROMPT};
use crate::providers::{ChatMessage, CompletionConfig, LlmProvider};

/// Category tables passed to the model keep this many entries.
pub const METRICS_TOP_N: usize = 10;

/// Evidence rows used when the caller supplies none.
pub const DEFAULT_EVIDENCE_ROWS: usize = 20;

/// Dataset-level figures the narrative prompt is built from.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NarrativeMetrics {
    pub total_rows: usize,
    pub unique_attack_types: usize,
    pub suspicious_rows: usize,
    pub top_attack_types: CountTable,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_src_ips: Option<CountTable>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_dst_ips: Option<CountTable>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<i64>,
}

impl NarrativeMetrics {
    pub fn compute(dataset: &Dataset, config: &VerifierConfig) -> Self {
        let aggregates = compute_aggregates(dataset, config);
        let top = |name: &str| {
            dataset
                .value_counts(name)
                .map(|counts| CountTable::from_counts(counts).head(METRICS_TOP_N))
        };
        let unique_attack_types = config
            .attack_columns
            .iter()
            .find(|c| dataset.has_column(c))
            .and_then(|c| dataset.value_counts(c))
            .map_or(0, |counts| counts.len());

        Self {
            total_rows: aggregates.n_rows,
            unique_attack_types,
            suspicious_rows: aggregates.suspicious_rows.unwrap_or(0),
            top_attack_types: aggregates.attack_counts.head(METRICS_TOP_N),
            top_src_ips: top(&config.src_column),
            top_dst_ips: top(&config.dst_column),
            total_bytes: aggregates.total_bytes,
        }
    }

    fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or_else(|_| json!({ "total_rows": self.total_rows }))
    }
}

/// Where a narrative came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrativeSource {
    /// The model replied with a JSON narrative.
    Model,
    /// The model replied, but not with a JSON narrative.
    Unparsed,
    /// The model call failed.
    ModelError,
    /// No provider; deterministic summary.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedNarrative {
    #[serde(flatten)]
    pub narrative: Narrative,
    /// Raw reply (or call error) when no narrative could be parsed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_raw: Option<String>,
    pub source: NarrativeSource,
}

impl GeneratedNarrative {
    fn parsed(narrative: Narrative) -> Self {
        Self {
            narrative,
            summary_raw: None,
            source: NarrativeSource::Model,
        }
    }

    fn raw(text: String, source: NarrativeSource) -> Self {
        Self {
            narrative: Narrative::default(),
            summary_raw: Some(text),
            source,
        }
    }

    /// The text the audit checks: the narrative, or an unparsed reply
    /// taken as its summary.
    pub fn audited_narrative(&self) -> Narrative {
        match (&self.source, &self.summary_raw) {
            (NarrativeSource::Unparsed, Some(raw)) => Narrative::new(raw.clone()),
            _ => self.narrative.clone(),
        }
    }
}

/// Parse a model reply: the whole text, then the outermost `{...}`,
/// else keep it raw.
pub fn parse_narrative(reply: &str) -> GeneratedNarrative {
    match find_json_object(reply).and_then(|v| serde_json::from_value::<Narrative>(v).ok()) {
        Some(narrative) => GeneratedNarrative::parsed(narrative),
        None => GeneratedNarrative::raw(reply.to_string(), NarrativeSource::Unparsed),
    }
}

/// Summary written without a model.
pub fn fallback_narrative(metrics: &NarrativeMetrics, evidence: &Dataset) -> Narrative {
    let top = metrics
        .top_attack_types
        .iter()
        .next()
        .map(|(name, _)| format!("'{}'", name))
        .unwrap_or_default();
    let summary = format!(
        "{} rows, {} unique attack types. Top: [{}]",
        metrics.total_rows, metrics.unique_attack_types, top
    );

    let recommendations = if evidence.is_empty() {
        Vec::new()
    } else {
        [
            "Investigate top source IP (highest bytes).",
            "Check large flows for possible exfiltration.",
        ]
        .into_iter()
        .map(|text| Recommendation::Detailed {
            text: text.to_string(),
            evidence_ids: vec![json!(0)],
        })
        .collect()
    };

    Narrative {
        summary,
        recommendations,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditReport {
    pub metrics: NarrativeMetrics,
    pub narrative: GeneratedNarrative,
    pub faithfulness: FaithfulnessReport,
}

/// Writes narratives and audits them.
pub struct Auditor {
    provider: Option<Arc<dyn LlmProvider>>,
    completion: CompletionConfig,
    verifier: VerifierConfig,
}

impl Auditor {
    pub fn new(provider: Option<Arc<dyn LlmProvider>>, config: &RuntimeConfig) -> Self {
        Self {
            provider,
            completion: config.narrative_completion_config(),
            verifier: config.verifier.clone(),
        }
    }

    pub fn metrics(&self, dataset: &Dataset) -> NarrativeMetrics {
        NarrativeMetrics::compute(dataset, &self.verifier)
    }

    pub async fn generate(&self, metrics: &NarrativeMetrics, evidence: &Dataset) -> GeneratedNarrative {
        let Some(provider) = &self.provider else {
            debug!("no provider configured; using fallback narrative");
            return GeneratedNarrative {
                narrative: fallback_narrative(metrics, evidence),
                summary_raw: None,
                source: NarrativeSource::Fallback,
            };
        };

        let messages = vec![
            ChatMessage::system(NARRATIVE_SYSTEM_PROMPT),
            ChatMessage::user(narrative_prompt(&metrics.to_json(), evidence)),
        ];
        match provider.complete(messages, &self.completion).await {
            Ok(response) => parse_narrative(&response.content),
            Err(e) => {
                warn!(provider = provider.name(), error = %e, "narrative call failed");
                GeneratedNarrative::raw(format!("LLM call error:\n{}", e), NarrativeSource::ModelError)
            }
        }
    }

    /// Generate a narrative over `dataset` and check it against `evidence`.
    ///
    /// With no evidence, the first [`DEFAULT_EVIDENCE_ROWS`] rows are used.
    pub async fn audit(&self, dataset: &Dataset, evidence: Option<&Dataset>) -> AuditReport {
        let sample;
        let evidence = match evidence {
            Some(evidence) => evidence,
            None => {
                let positions: Vec<usize> = (0..dataset.len().min(DEFAULT_EVIDENCE_ROWS)).collect();
                sample = dataset.select_rows(&positions);
                &sample
            }
        };

        let metrics = self.metrics(dataset);
        let narrative = self.generate(&metrics, evidence).await;
        let faithfulness = verify(&narrative.audited_narrative(), evidence, &self.verifier);
        info!(
            source = ?narrative.source,
            trust_score = faithfulness.trust_score,
            "narrative audited"
        );

        AuditReport {
            metrics,
            narrative,
            faithfulness,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::testing::ScriptedProvider;
    use crate::providers::ProviderError;

    fn flows() -> Dataset {
        Dataset::from_json_str(
            r#"[
                {"src": "1.1.1.1", "dst": "9.9.9.9", "bytes": 100, "attackType": "dos"},
                {"src": "2.2.2.2", "dst": "9.9.9.9", "bytes": 200, "attackType": "dos"},
                {"src": "1.1.1.1", "dst": "8.8.8.8", "bytes": 50, "attackType": "normal"}
            ]"#,
        )
        .unwrap()
    }

    fn auditor(replies: Vec<Result<String, ProviderError>>) -> (Arc<ScriptedProvider>, Auditor) {
        let provider = Arc::new(ScriptedProvider::new(replies));
        let auditor = Auditor::new(
            Some(provider.clone() as Arc<dyn LlmProvider>),
            &RuntimeConfig::default(),
        );
        (provider, auditor)
    }

    #[test]
    fn test_metrics() {
        let metrics = NarrativeMetrics::compute(&flows(), &VerifierConfig::default());
        assert_eq!(metrics.total_rows, 3);
        assert_eq!(metrics.unique_attack_types, 2);
        assert_eq!(metrics.suspicious_rows, 2);
        assert_eq!(metrics.top_attack_types.get("dos"), Some(2));
        assert_eq!(metrics.total_bytes, Some(350));
        assert_eq!(metrics.top_src_ips.unwrap().get("1.1.1.1"), Some(2));
    }

    #[test]
    fn test_parse_narrative_variants() {
        let parsed = parse_narrative(r#"Here you go: {"summary": "All quiet.", "recommendations": []} done"#);
        assert_eq!(parsed.source, NarrativeSource::Model);
        assert_eq!(parsed.narrative.summary, "All quiet.");

        let raw = parse_narrative("nothing structured here");
        assert_eq!(raw.source, NarrativeSource::Unparsed);
        assert_eq!(raw.summary_raw.as_deref(), Some("nothing structured here"));
    }

    #[tokio::test]
    async fn test_fallback_without_provider() {
        let auditor = Auditor::new(None, &RuntimeConfig::default());
        let metrics = auditor.metrics(&flows());
        let generated = auditor.generate(&metrics, &flows()).await;
        assert_eq!(generated.source, NarrativeSource::Fallback);
        assert_eq!(
            generated.narrative.summary,
            "3 rows, 2 unique attack types. Top: ['dos']"
        );
        assert_eq!(generated.narrative.recommendations.len(), 2);

        let empty = auditor.generate(&metrics, &Dataset::default()).await;
        assert!(empty.narrative.recommendations.is_empty());
    }

    #[tokio::test]
    async fn test_prompt_carries_metrics_and_evidence() {
        let (provider, auditor) = auditor(vec![Ok(r#"{"summary": "ok"}"#.to_string())]);
        auditor.audit(&flows(), None).await;
        let prompts = provider.prompts.lock().unwrap();
        let user = &prompts[0][1].content;
        assert!(user.contains("\"total_rows\": 3"));
        assert!(user.contains("[2]  | 1.1.1.1 -> 8.8.8.8 | bytes=50 | attackType=normal"));
    }

    #[tokio::test]
    async fn test_audit_flags_unknown_address() {
        let (_, auditor) = auditor(vec![Ok(
            r#"{"summary": "Flows from 1.1.1.1 and 6.6.6.6 stand out."}"#.to_string(),
        )]);
        let report = auditor.audit(&flows(), None).await;
        assert_eq!(report.narrative.source, NarrativeSource::Model);
        assert_eq!(report.faithfulness.ip_check.ips_verified, 1);
        assert_eq!(report.faithfulness.trust_score, 0.5);
    }

    #[tokio::test]
    async fn test_unparsed_reply_is_still_audited() {
        let (_, auditor) = auditor(vec![Ok("3 rows were seen".to_string())]);
        let report = auditor.audit(&flows(), None).await;
        assert_eq!(report.narrative.source, NarrativeSource::Unparsed);
        assert_eq!(report.faithfulness.claims_parsed.len(), 1);
        assert_eq!(report.faithfulness.trust_score, 1.0);
    }

    #[tokio::test]
    async fn test_model_error_is_kept_raw() {
        let (_, auditor) = auditor(vec![Err(ProviderError::AuthError)]);
        let report = auditor.audit(&flows(), Some(&flows())).await;
        assert_eq!(report.narrative.source, NarrativeSource::ModelError);
        assert_eq!(
            report.narrative.summary_raw.as_deref(),
            Some("LLM call error:\nAuthentication failed")
        );
        assert!(report.faithfulness.claims_parsed.is_empty());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["narrative"]["source"], "model_error");
        assert_eq!(json["narrative"]["summary"], "");
    }
}
