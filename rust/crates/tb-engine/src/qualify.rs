//! Batch qualification orchestration.
//!
//! Structurally the reconciliation engine's twin: a bounded set of leads,
//! one external scorer call per lead, per-lead failure isolation, and a
//! fixed inter-call delay to respect the scorer's rate limits. The batch
//! runs on the same isolated-iteration helper as the merge step.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use tb_core::{
    LeadScorer, LeadStatus, LeadStore, PlatformLead, QualificationError, QualificationReport,
    ScoredLead, TbResult,
};

use crate::config::QualifyConfig;
use crate::isolation::{run_isolated, StepOutcome};

/// How the batch is chosen: an explicit id list, or the tenant's most
/// recently stored leads. Either way the configured cap bounds the batch.
#[derive(Debug, Clone)]
pub enum BatchSelection {
    Ids(Vec<Uuid>),
    Recent { limit: usize },
}

pub struct QualificationOrchestrator {
    leads: Arc<dyn LeadStore>,
    scorer: Arc<dyn LeadScorer>,
    config: QualifyConfig,
}

impl QualificationOrchestrator {
    pub fn new(
        leads: Arc<dyn LeadStore>,
        scorer: Arc<dyn LeadScorer>,
        config: QualifyConfig,
    ) -> Self {
        Self {
            leads,
            scorer,
            config,
        }
    }

    pub async fn qualify_batch(
        &self,
        tenant_id: Uuid,
        selection: BatchSelection,
    ) -> TbResult<QualificationReport> {
        let mut report = QualificationReport::default();
        let batch = self.select_batch(tenant_id, selection, &mut report).await?;

        let ids: Vec<Uuid> = batch.iter().map(|lead| lead.id).collect();
        let tasks = batch
            .into_iter()
            .map(|lead| (lead.id.to_string(), self.score_one(lead)))
            .collect();
        let delay = Duration::from_millis(self.config.inter_call_delay_ms);
        let outcomes = run_isolated(tasks, Some(delay)).await;

        for (lead_id, outcome) in ids.into_iter().zip(outcomes) {
            match outcome {
                StepOutcome::Ok(scored) => report.results.push(scored),
                StepOutcome::Failed { error, .. } => report.errors.push(QualificationError {
                    lead_id,
                    error: error.to_string(),
                }),
            }
        }
        report.qualified = report.results.len();
        report.failed = report.errors.len();

        tracing::info!(
            tenant_id = %tenant_id,
            qualified = report.qualified,
            failed = report.failed,
            "qualification batch complete"
        );
        Ok(report)
    }

    async fn select_batch(
        &self,
        tenant_id: Uuid,
        selection: BatchSelection,
        report: &mut QualificationReport,
    ) -> TbResult<Vec<PlatformLead>> {
        match selection {
            BatchSelection::Ids(mut ids) => {
                if ids.len() > self.config.max_batch {
                    tracing::debug!(
                        requested = ids.len(),
                        cap = self.config.max_batch,
                        "qualification batch truncated to cap"
                    );
                    ids.truncate(self.config.max_batch);
                }
                let mut batch = Vec::with_capacity(ids.len());
                for id in ids {
                    match self.leads.get(id).await? {
                        Some(lead) => batch.push(lead),
                        None => report.errors.push(QualificationError {
                            lead_id: id,
                            error: format!("lead not found: {id}"),
                        }),
                    }
                }
                Ok(batch)
            }
            BatchSelection::Recent { limit } => {
                let limit = limit.min(self.config.max_batch);
                self.leads.list(tenant_id, limit, 0).await
            }
        }
    }

    async fn score_one(&self, lead: PlatformLead) -> TbResult<ScoredLead> {
        let lead_id = lead.id;
        let score = self.scorer.score(&lead).await?;

        // The scorer is authoritative for the qualified category; other
        // categories leave the stored status untouched.
        if score.category.eq_ignore_ascii_case("qualified") {
            let mut updated = lead;
            updated.status = LeadStatus::Qualified;
            updated.updated_at = Utc::now();
            self.leads.update(&updated).await?;
        }

        Ok(ScoredLead { lead_id, score })
    }
}
