//! Rubric scoring with an LLM acting as judge.
//!
//! The judge call itself is behind [`RubricJudge`]; this module owns the
//! prompt, the reply parsing, and normalization to the 0–5 scale.

use anyhow::{Context, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Responses longer than this are cut before being shown to the judge.
pub const MAX_JUDGED_CHARS: usize = 8000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RubricCriterion {
    pub name: String,
    pub max_points: u32,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionScore {
    pub criterion: String,
    pub points: f64,
    #[serde(default)]
    pub reason: String,
}

/// The judge's scoring of one response.
#[derive(Debug, Clone, PartialEq)]
pub struct RubricVerdict {
    pub scores: Vec<CriterionScore>,
    pub total: f64,
    pub max_total: u32,
    pub summary: String,
}

impl RubricVerdict {
    /// Total on the 0–5 scale.
    pub fn normalized(&self) -> f64 {
        normalize_score(self.total, self.max_total)
    }
}

/// What the judge is asked to score.
#[derive(Debug, Clone, Copy)]
pub struct JudgeRequest<'a> {
    pub task_id: &'a str,
    pub task_name: &'a str,
    pub response: &'a str,
    pub criteria: &'a [RubricCriterion],
}

/// Scores a response against a rubric.
///
/// Failures are returned, not swallowed: they surface as evaluation errors.
#[async_trait]
pub trait RubricJudge: Send + Sync {
    async fn judge(&self, request: &JudgeRequest<'_>) -> anyhow::Result<RubricVerdict>;
}

pub fn max_total(criteria: &[RubricCriterion]) -> u32 {
    criteria.iter().map(|c| c.max_points).sum()
}

/// Maps a rubric total onto 0–5 with one decimal.
pub fn normalize_score(total: f64, max_total: u32) -> f64 {
    if max_total == 0 {
        return 0.0;
    }
    (total / f64::from(max_total) * 5.0 * 10.0).round() / 10.0
}

/// The prompt sent to the judge model.
pub fn build_judge_prompt(request: &JudgeRequest<'_>) -> String {
    let rubric = request
        .criteria
        .iter()
        .map(|c| format!("- {} [0-{} pts]: {}", c.name, c.max_points, c.description))
        .collect::<Vec<_>>()
        .join("\n");
    let response = crate::process::truncate(request.response, MAX_JUDGED_CHARS);

    format!(
        "You are evaluating an AI response for a software engineering task.

TASK: {id} - {name}

RUBRIC (score each criterion independently):
{rubric}

RESPONSE TO EVALUATE:
{response}

Return JSON only - no markdown, no explanation:
{{
  \"scores\": [{{ \"criterion\": \"...\", \"points\": N, \"reason\": \"...\" }}],
  \"total\": N,
  \"summary\": \"one sentence overall assessment\"
}}",
        id = request.task_id,
        name = request.task_name,
    )
}

#[derive(Debug, Deserialize)]
struct JudgeReply {
    #[serde(default)]
    scores: Vec<CriterionScore>,
    total: Option<f64>,
    #[serde(default)]
    summary: String,
}

/// Extracts the verdict from the judge's reply text.
///
/// The outermost `{...}` span is parsed; surrounding prose or code fences are
/// ignored. A missing `total` is recomputed from the per-criterion points.
pub fn parse_judge_reply(text: &str, criteria: &[RubricCriterion]) -> anyhow::Result<RubricVerdict> {
    let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) else {
        bail!("Judge did not return valid JSON");
    };
    if end < start {
        bail!("Judge did not return valid JSON");
    }

    let reply: JudgeReply =
        serde_json::from_str(&text[start..=end]).context("Judge returned malformed JSON")?;
    let max_total = max_total(criteria);
    let total = reply
        .total
        .unwrap_or_else(|| reply.scores.iter().map(|s| s.points).sum())
        .clamp(0.0, f64::from(max_total));

    Ok(RubricVerdict {
        scores: reply.scores,
        total,
        max_total,
        summary: reply.summary,
    })
}
