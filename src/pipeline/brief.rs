use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::ToolError;

/// Campaign details submitted by the user.
///
/// Every field deserializes with a default so that missing input is reported
/// by [`CampaignBrief::validate`] with the offending field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignBrief {
    #[serde(default)]
    pub project_title: String,
    #[serde(default)]
    pub client_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign_name: Option<String>,
    #[serde(default)]
    pub industry: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default)]
    pub brief_text: String,
    #[serde(default)]
    pub achievements_text: String,
    #[serde(default)]
    pub target_metric_names: BTreeSet<String>,
}

impl CampaignBrief {
    /// Create a brief with the required fields
    pub fn new(
        project_title: impl Into<String>,
        client_name: impl Into<String>,
        brief_text: impl Into<String>,
    ) -> Self {
        Self {
            project_title: project_title.into(),
            client_name: client_name.into(),
            brief_text: brief_text.into(),
            ..Default::default()
        }
    }

    /// Set the campaign name
    pub fn with_campaign(mut self, campaign_name: impl Into<String>) -> Self {
        self.campaign_name = Some(campaign_name.into());
        self
    }

    /// Set the industry
    pub fn with_industry(mut self, industry: impl Into<String>) -> Self {
        self.industry = industry.into();
        self
    }

    /// Set the campaign duration
    pub fn with_duration(mut self, duration: impl Into<String>) -> Self {
        self.duration = Some(duration.into());
        self
    }

    /// Set the achievements text
    pub fn with_achievements(mut self, achievements: impl Into<String>) -> Self {
        self.achievements_text = achievements.into();
        self
    }

    /// Add a metric to research
    pub fn with_metric(mut self, metric: impl Into<String>) -> Self {
        self.target_metric_names.insert(metric.into());
        self
    }

    /// Reject briefs missing a required field.
    ///
    /// Pure: no I/O happens here, so a rejected brief never reaches an external
    /// service.
    pub fn validate(&self) -> Result<(), ToolError> {
        let required = [
            ("project_title", &self.project_title),
            ("client_name", &self.client_name),
            ("brief_text", &self.brief_text),
        ];

        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ToolError::Validation {
                    field: field.to_string(),
                    reason: "Field is required and cannot be empty".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Campaign label used in search queries and prompts.
    pub fn campaign_label(&self) -> &str {
        self.campaign_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(self.project_title.trim())
    }

    /// Trimmed, non-empty metric names in sorted order.
    pub fn metric_names(&self) -> Vec<String> {
        self.target_metric_names
            .iter()
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Whether any metric research was requested.
    pub fn wants_metrics(&self) -> bool {
        !self.metric_names().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid() -> CampaignBrief {
        CampaignBrief::new("Launch X", "Acme", "Launch the X product line")
            .with_industry("Retail")
            .with_achievements("Sold out in two weeks")
    }

    #[test]
    fn test_valid_brief_passes() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_blank_required_fields_are_rejected() {
        for field in ["project_title", "client_name", "brief_text"] {
            let mut brief = valid();
            match field {
                "project_title" => brief.project_title = "  ".to_string(),
                "client_name" => brief.client_name = String::new(),
                _ => brief.brief_text = "\n".to_string(),
            }

            match brief.validate() {
                Err(ToolError::Validation { field: f, .. }) => assert_eq!(f, field),
                other => panic!("expected validation error for {}, got {:?}", field, other),
            }
        }
    }

    #[test]
    fn test_optional_fields_may_be_empty() {
        let brief = CampaignBrief::new("T", "C", "B");
        assert!(brief.industry.is_empty());
        assert!(brief.validate().is_ok());
    }

    #[test]
    fn test_missing_fields_deserialize_to_defaults() {
        let brief: CampaignBrief = serde_json::from_value(json!({"client_name": "Acme"})).unwrap();
        assert_eq!(brief.client_name, "Acme");
        assert!(matches!(
            brief.validate(),
            Err(ToolError::Validation { field, .. }) if field == "project_title"
        ));
    }

    #[test]
    fn test_campaign_label_falls_back_to_title() {
        assert_eq!(valid().campaign_label(), "Launch X");
        assert_eq!(valid().with_campaign("Spring Push").campaign_label(), "Spring Push");
        assert_eq!(valid().with_campaign("   ").campaign_label(), "Launch X");
    }

    #[test]
    fn test_metric_names_are_trimmed_and_sorted() {
        let brief = valid()
            .with_metric(" ROI ")
            .with_metric("CTR")
            .with_metric("ROI")
            .with_metric("  ");
        assert_eq!(brief.metric_names(), vec!["CTR".to_string(), "ROI".to_string()]);
        assert!(brief.wants_metrics());
        assert!(!valid().wants_metrics());
    }
}
