//! HTTP client for the external qualification scorer.
//!
//! The scoring heuristics live in a separate service; this client only
//! carries the wire contract: POST the lead's profile, get back a numeric
//! score and a category.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use tb_core::{LeadScore, LeadScorer, PlatformLead, TbError, TbResult};

use crate::config::ScorerConfig;

pub struct HttpLeadScorer {
    base_url: String,
    client: reqwest::Client,
}

impl HttpLeadScorer {
    pub fn new(config: &ScorerConfig) -> TbResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TbError::Internal(format!("http client error: {e}")))?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[derive(Debug, Serialize)]
struct ScoreRequest<'a> {
    email: &'a str,
    first_name: &'a str,
    last_name: &'a str,
    company: &'a str,
    job_title: &'a str,
    status: &'a str,
}

#[derive(Debug, Deserialize)]
struct ScoreResponse {
    score: f64,
    category: String,
}

#[async_trait]
impl LeadScorer for HttpLeadScorer {
    async fn score(&self, lead: &PlatformLead) -> TbResult<LeadScore> {
        let url = format!("{}/v1/score", self.base_url);
        let request = ScoreRequest {
            email: &lead.email,
            first_name: &lead.first_name,
            last_name: &lead.last_name,
            company: &lead.company,
            job_title: &lead.job_title,
            status: lead.status.as_str(),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| TbError::Scorer(format!("scorer request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(TbError::Scorer(format!(
                "scorer returned {}",
                response.status()
            )));
        }

        let body: ScoreResponse = response
            .json()
            .await
            .map_err(|e| TbError::Scorer(format!("scorer response parse failed: {e}")))?;

        Ok(LeadScore {
            score: body.score,
            category: body.category,
        })
    }
}
