use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tracing::{info, warn};

use super::{CampaignBrief, GatheredContext};
use crate::llm::CompletionService;
use crate::prompts::{STYLE_RECOMMENDATION_PROMPT, UNAVAILABLE_PLACEHOLDER};
use crate::search::Shortfall;

/// Label of the synthetic option that is always offered last.
pub const DEFAULT_STYLE_LABEL: &str = "Default/Structured";

/// Most styles ever requested from the completion service.
pub const MAX_RECOMMENDED_STYLES: usize = 3;

/// Longest accepted style name; longer lines are prose, not names.
const MAX_STYLE_NAME_CHARS: usize = 60;

/// `<n>. <rest>` or `<n>) <rest>`, optionally bulleted or bolded.
fn numbered_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(?:[-*]\s+)?(?:\*\*)?\s*\d{1,2}\s*[.)]\s*(?P<rest>.+?)\s*$")
            .expect("numbered line regex must compile")
    })
}

/// A narrative style the user may choose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleOption {
    pub label: String,
}

impl StyleOption {
    /// Create a style option
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }

    /// The synthetic structured default.
    pub fn default_structured() -> Self {
        Self::new(DEFAULT_STYLE_LABEL)
    }

    /// Whether this is the synthetic default.
    pub fn is_default(&self) -> bool {
        self.label == DEFAULT_STYLE_LABEL
    }
}

/// Styles offered to the user plus the service's reasoning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleRecommendation {
    /// Parsed styles followed by the default; never empty.
    pub options: Vec<StyleOption>,
    /// Human-readable recommendation text.
    pub narrative: String,
    /// Fewer styles than requested could be offered.
    pub degraded: bool,
    /// Set when the completion call itself failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shortfall: Option<Shortfall>,
}

impl StyleRecommendation {
    fn from_names(names: Vec<String>, narrative: String, requested: usize) -> Self {
        let degraded = names.len() < requested;
        let mut options: Vec<StyleOption> = names.into_iter().map(StyleOption::new).collect();
        options.push(StyleOption::default_structured());

        Self {
            options,
            narrative,
            degraded,
            shortfall: None,
        }
    }
}

/// Parse style names from a numbered-list reply.
///
/// Each numbered line contributes the text before its first `:` or ` - `
/// (the whole line when neither is present). Markdown emphasis and quotes are
/// stripped, names are deduplicated case-insensitively, the default label is
/// skipped, and at most `max` names are returned.
pub fn parse_style_names(reply: &str, max: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut names = Vec::new();

    for line in reply.lines() {
        if names.len() >= max {
            break;
        }
        let Some(caps) = numbered_line_re().captures(line) else {
            continue;
        };
        let Some(name) = clean_style_name(&caps["rest"]) else {
            continue;
        };
        if name.eq_ignore_ascii_case(DEFAULT_STYLE_LABEL) {
            continue;
        }
        if seen.insert(name.to_lowercase()) {
            names.push(name);
        }
    }

    names
}

fn clean_style_name(rest: &str) -> Option<String> {
    let head = [":", " - ", " – ", " — "]
        .iter()
        .filter_map(|sep| rest.find(sep))
        .min()
        .map_or(rest, |idx| &rest[..idx]);

    let name = head
        .replace("**", "")
        .replace(['*', '_', '"', '`'], "")
        .trim()
        .trim_end_matches(['.', ','])
        .trim()
        .to_string();

    if name.is_empty() || name.chars().count() > MAX_STYLE_NAME_CHARS {
        None
    } else {
        Some(name)
    }
}

/// Asks the completion service for narrative styles.
#[derive(Clone)]
pub struct StyleRecommender {
    completion: Arc<dyn CompletionService>,
    count: usize,
}

impl StyleRecommender {
    /// Create a recommender asking for `count` styles, capped at three
    pub fn new(completion: Arc<dyn CompletionService>, count: usize) -> Self {
        Self {
            completion,
            count: count.clamp(1, MAX_RECOMMENDED_STYLES),
        }
    }

    /// Number of styles requested from the completion service.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Recommend styles for the brief and gathered context.
    ///
    /// Never fails: a failed call or an unparseable reply still offers the
    /// default option, flagged as degraded.
    pub async fn recommend(
        &self,
        brief: &CampaignBrief,
        context: &GatheredContext,
    ) -> StyleRecommendation {
        let start = Instant::now();
        let prompt = self.build_prompt(brief, context);

        let reply = match self.completion.generate(&prompt).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(stage = "styles", error = %e, "Style recommendation failed");
                let mut recommendation = StyleRecommendation::from_names(
                    Vec::new(),
                    UNAVAILABLE_PLACEHOLDER.to_string(),
                    self.count,
                );
                recommendation.shortfall = Some(Shortfall::CompletionFailed);
                return recommendation;
            }
        };

        let names = parse_style_names(&reply, self.count);
        let recommendation =
            StyleRecommendation::from_names(names, reply.trim().to_string(), self.count);

        if recommendation.degraded {
            warn!(
                stage = "styles",
                requested = self.count,
                parsed = recommendation.options.len() - 1,
                "Fewer styles parsed than requested"
            );
        }
        info!(
            stage = "styles",
            options = recommendation.options.len(),
            latency_ms = start.elapsed().as_millis() as u64,
            "Style recommendation completed"
        );

        recommendation
    }

    fn build_prompt(&self, brief: &CampaignBrief, context: &GatheredContext) -> String {
        let instructions = STYLE_RECOMMENDATION_PROMPT.replace("{count}", &self.count.to_string());
        format!("{}\n\n{}", instructions, context.describe(brief))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompletionError;
    use crate::llm::MockCompletionService;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_colon_terminated() {
        let reply = "1. Hero's Journey: the brand as guide\n2. Data Story: numbers first\n3. Behind the Scenes: process focus\n\nRecommendation: Data Story";
        assert_eq!(
            parse_style_names(reply, 3),
            vec!["Hero's Journey", "Data Story", "Behind the Scenes"]
        );
    }

    #[test]
    fn test_parse_dash_and_bare_forms() {
        let reply = "Here are some ideas:\n1) Problem-Solution - classic arc\n2. **Customer Voice**\n- 3. Before and After – contrast";
        assert_eq!(
            parse_style_names(reply, 3),
            vec!["Problem-Solution", "Customer Voice", "Before and After"]
        );
    }

    #[test]
    fn test_parse_strips_emphasis_and_dedupes() {
        let reply = "1. **Data Story**: a\n2. data story: b\n3. \"Default/Structured\": c\n4. Timeline: d";
        assert_eq!(parse_style_names(reply, 3), vec!["Data Story", "Timeline"]);
    }

    #[test]
    fn test_parse_caps_at_max() {
        let reply = "1. A: x\n2. B: x\n3. C: x\n4. D: x";
        assert_eq!(parse_style_names(reply, 2), vec!["A", "B"]);
    }

    #[test]
    fn test_parse_skips_prose_lines() {
        let reply = "1. This line is a full sentence of prose that goes on far too long to be a style name at all\nNo numbered list here.";
        assert!(parse_style_names(reply, 3).is_empty());
    }

    #[test]
    fn test_default_always_appended() {
        let recommendation = StyleRecommendation::from_names(Vec::new(), String::new(), 3);
        assert_eq!(recommendation.options, vec![StyleOption::default_structured()]);
        assert!(recommendation.degraded);

        let recommendation = StyleRecommendation::from_names(
            vec!["A".into(), "B".into(), "C".into()],
            String::new(),
            3,
        );
        assert_eq!(recommendation.options.len(), 4);
        assert!(recommendation.options[3].is_default());
        assert!(!recommendation.degraded);
    }

    #[test]
    fn test_count_is_capped() {
        let recommender = StyleRecommender::new(Arc::new(MockCompletionService::new()), 9);
        assert_eq!(recommender.count(), MAX_RECOMMENDED_STYLES);
        let recommender = StyleRecommender::new(Arc::new(MockCompletionService::new()), 0);
        assert_eq!(recommender.count(), 1);
    }

    #[tokio::test]
    async fn test_recommend_parses_reply() {
        let mut mock = MockCompletionService::new();
        mock.expect_generate()
            .withf(|prompt| prompt.contains("exactly 3 distinct") && prompt.contains("Acme"))
            .times(1)
            .returning(|_| Ok("1. Bold Launch: x\n2. Quiet Confidence: y\n3. Data Story: z".to_string()));

        let recommender = StyleRecommender::new(Arc::new(mock), 3);
        let brief = CampaignBrief::new("Launch X", "Acme", "brief");
        let recommendation = recommender
            .recommend(&brief, &GatheredContext::default())
            .await;

        let labels: Vec<_> = recommendation.options.iter().map(|o| o.label.as_str()).collect();
        assert_eq!(
            labels,
            vec!["Bold Launch", "Quiet Confidence", "Data Story", DEFAULT_STYLE_LABEL]
        );
        assert!(!recommendation.degraded);
        assert!(recommendation.shortfall.is_none());
    }

    #[tokio::test]
    async fn test_recommend_survives_completion_failure() {
        let mut mock = MockCompletionService::new();
        mock.expect_generate()
            .returning(|_| Err(CompletionError::Timeout { timeout_ms: 5 }));

        let recommender = StyleRecommender::new(Arc::new(mock), 3);
        let recommendation = recommender
            .recommend(&CampaignBrief::new("T", "C", "B"), &GatheredContext::default())
            .await;

        assert_eq!(recommendation.options, vec![StyleOption::default_structured()]);
        assert!(recommendation.degraded);
        assert_eq!(recommendation.shortfall, Some(Shortfall::CompletionFailed));
        assert_eq!(recommendation.narrative, UNAVAILABLE_PLACEHOLDER);
    }
}
