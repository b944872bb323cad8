//! Hand-off to the commentary writer.
//!
//! The pipeline never waits on commentary: requests are offered to a bounded
//! queue and dropped (with a log line) when the consumer is behind or gone.

use attribution_engine::AttributionResult;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::prompts::{attribution_prompt, SYSTEM_PROMPT};

/// Totals and top movers the writer is allowed to cite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionSummary {
    pub active_return: f64,
    pub allocation_effect: f64,
    pub selection_effect: f64,
    pub top_contributors: Vec<String>,
    pub top_detractors: Vec<String>,
}

impl From<&AttributionResult> for AttributionSummary {
    fn from(result: &AttributionResult) -> Self {
        Self {
            active_return: result.active_return,
            allocation_effect: result.allocation_effect,
            selection_effect: result.selection_effect,
            top_contributors: result.top_contributors.iter().map(|c| c.ticker.clone()).collect(),
            top_detractors: result.top_detractors.iter().map(|c| c.ticker.clone()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentaryRequest {
    pub client_id: String,
    pub as_of: NaiveDate,
    pub system_prompt: String,
    pub user_prompt: String,
    pub summary: AttributionSummary,
}

impl CommentaryRequest {
    pub fn build(
        client_id: &str,
        result: &AttributionResult,
        exclusions: &str,
        lookback_periods: usize,
        as_of: NaiveDate,
    ) -> Self {
        Self {
            client_id: client_id.to_string(),
            as_of,
            system_prompt: SYSTEM_PROMPT.to_string(),
            user_prompt: attribution_prompt(result, exclusions, lookback_periods, as_of),
            summary: AttributionSummary::from(result),
        }
    }
}

/// What happened to one hand-off attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentaryDispatch {
    Queued,
    /// Queue at capacity; the request was dropped
    QueueFull,
    /// Consumer is gone
    Closed,
    /// No attribution to comment on
    Skipped,
}

/// Producer side of the commentary queue
#[derive(Debug, Clone)]
pub struct CommentaryHandoff {
    tx: mpsc::Sender<CommentaryRequest>,
}

impl CommentaryHandoff {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<CommentaryRequest>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn submit(&self, request: CommentaryRequest) -> CommentaryDispatch {
        let client_id = request.client_id.clone();
        match self.tx.try_send(request) {
            Ok(()) => {
                tracing::debug!("Commentary queued for {}", client_id);
                CommentaryDispatch::Queued
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Commentary queue full, dropping request for {}", client_id);
                CommentaryDispatch::QueueFull
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!("Commentary consumer closed, dropping request for {}", client_id);
                CommentaryDispatch::Closed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result() -> AttributionResult {
        AttributionResult {
            sectors: Vec::new(),
            portfolio_return: 0.02,
            benchmark_return: 0.01,
            active_return: 0.01,
            allocation_effect: 0.004,
            selection_effect: 0.006,
            interaction_effect: 0.0,
            top_sectors: Vec::new(),
            top_contributors: Vec::new(),
            top_detractors: Vec::new(),
        }
    }

    fn request(client: &str) -> CommentaryRequest {
        let as_of = NaiveDate::from_ymd_opt(2024, 6, 20).unwrap();
        CommentaryRequest::build(client, &result(), "None", 30, as_of)
    }

    #[tokio::test]
    async fn test_submit_queues_until_full() {
        let (handoff, mut rx) = CommentaryHandoff::channel(1);
        assert_eq!(handoff.submit(request("a")), CommentaryDispatch::Queued);
        assert_eq!(handoff.submit(request("b")), CommentaryDispatch::QueueFull);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.client_id, "a");
        assert_eq!(received.system_prompt, SYSTEM_PROMPT);
        assert!(received.user_prompt.contains("Total Active Return (Alpha): 1.00%"));
    }

    #[tokio::test]
    async fn test_closed_consumer_is_reported() {
        let (handoff, rx) = CommentaryHandoff::channel(4);
        drop(rx);
        assert_eq!(handoff.submit(request("a")), CommentaryDispatch::Closed);
    }

    #[test]
    fn test_summary_from_result() {
        let summary = AttributionSummary::from(&result());
        assert_eq!(summary.active_return, 0.01);
        assert!(summary.top_contributors.is_empty());
    }
}
