//! Centralized prompt definitions for pipeline stages
//!
//! Every instruction block sent to the completion service lives here. Stage
//! modules only fill in the case-specific context around these blocks.

/// Instruction block for metric extraction.
pub const METRIC_EXTRACTION_PROMPT: &str = r#"You are a marketing analyst. Extract quantitative campaign performance metrics from the source text below.

Respond with valid JSON only, in this exact format:
{
  "metrics": [
    {
      "name": "metric name",
      "before_value": 1000,
      "after_value": 1500,
      "percent_change": 50,
      "unit": "visits/month",
      "timeframe": "Q1 2024 vs Q1 2023",
      "evidence_quote": "exact sentence from the source"
    }
  ]
}

Rules:
- Only include metrics that are explicitly stated in the source text
- Use null for any value the source does not state; never estimate
- Keep evidence_quote verbatim
- Return {"metrics": []} when no metrics are stated"#;

/// Instruction block for industry benchmark summaries.
pub const BENCHMARK_PROMPT: &str = r#"You are a marketing research analyst. Summarize the industry benchmark for the metric named below using only the search excerpts provided.

Respond with valid JSON only, in this exact format:
{
  "metric_name": "metric name",
  "average": "2.5%",
  "top_performer_value": "6%",
  "range_min": "1%",
  "range_max": "8%",
  "unit": "%",
  "source": "publisher or report name",
  "year": 2024
}

Use null for anything the excerpts do not state."#;

/// Instruction block for fact verification.
pub const FACT_VERIFICATION_PROMPT: &str = r#"You are a fact-checker for marketing case studies. Cross-check each claimed metric against the source evidence below.

Respond with valid JSON only, in this exact format:
{
  "metrics": [
    {
      "metric_name": "metric name",
      "verified": true,
      "credibility_score": 80,
      "confidence_level": "high",
      "supporting_evidence": "what in the sources supports the claim",
      "contradicting_evidence": "what in the sources contradicts it, or empty",
      "suggested_adjustment": "a more defensible phrasing, or null"
    }
  ],
  "overall_reliability": "short judgment of the whole set",
  "potential_biases": ["bias"],
  "missing_context": ["gap"]
}

Rules:
- credibility_score is an integer from 0 to 100
- confidence_level is one of "low", "medium", "high"
- A metric with no support in the evidence must not be marked verified"#;

/// Instruction block for style recommendation.
///
/// The reply contract is a strictly numbered list, one style per line.
pub const STYLE_RECOMMENDATION_PROMPT: &str = r#"You are an editorial director choosing narrative styles for a marketing case study.

Recommend exactly {count} distinct narrative styles suited to the material below.

Format rules (mandatory):
- Output exactly {count} lines, numbered 1 to {count}
- Each line is: <number>. <Style Name>: <one-sentence reason>
- Style names are 2 to 5 words, without quotes or markdown
- After the list, add one blank line and a short paragraph headed "Recommendation:" naming the best fit"#;

/// Instruction block for case study composition.
pub const CASE_STUDY_PROMPT: &str = r#"You are a strategist and creative copywriter. Write a structured, professional, story-driven case study for an advertising/media project.

Use markdown. Use exactly these second-level section headings, in this order:
## Overview
## Strategic Approach
## Creative Execution
## Results & Metrics
## Learnings & Summary

Rules:
- Use only the facts provided below; never invent numbers, clients or quotes
- Where a data block says "not available", state plainly in the Results & Metrics section that the figure is not available
- Prefer verified metrics; qualify any metric the verification marks as low confidence"#;

/// Instruction block for feedback-driven revision.
pub const REVISION_PROMPT: &str = r#"You are revising a marketing case study according to editor feedback.

Rules:
- Apply the feedback fully
- Keep the markdown section headings unless the feedback asks otherwise
- Do not introduce facts or numbers that are not in the current draft
- Return the complete revised case study in markdown, with no commentary"#;

/// Fallback text substituted where a completion call failed.
pub const UNAVAILABLE_PLACEHOLDER: &str = "Unable to process this request at the moment.";

/// Marker used wherever a data block has nothing to offer.
pub const NOT_AVAILABLE: &str = "not available";
