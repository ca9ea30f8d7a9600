//! Risk assessment stage.
//!
//! A research document is scored against six fixed categories. The report
//! always carries all six, in a fixed order; a category the model could not
//! assess is reported as insufficient evidence rather than left out.

pub mod evaluator;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use evaluator::RiskEvaluator;

/// The six risk categories, in report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskCategory {
    StructuralEngineering,
    EnvironmentalNaturalDisaster,
    SafetySecurity,
    FinancialEconomic,
    RegulatoryLegal,
    OperationalBusiness,
}

impl RiskCategory {
    pub const ALL: [RiskCategory; 6] = [
        RiskCategory::StructuralEngineering,
        RiskCategory::EnvironmentalNaturalDisaster,
        RiskCategory::SafetySecurity,
        RiskCategory::FinancialEconomic,
        RiskCategory::RegulatoryLegal,
        RiskCategory::OperationalBusiness,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            RiskCategory::StructuralEngineering => "Structural & Engineering",
            RiskCategory::EnvironmentalNaturalDisaster => "Environmental & Natural Disaster",
            RiskCategory::SafetySecurity => "Safety & Security",
            RiskCategory::FinancialEconomic => "Financial & Economic",
            RiskCategory::RegulatoryLegal => "Regulatory & Legal",
            RiskCategory::OperationalBusiness => "Operational & Business",
        }
    }

    /// The snake_case key used in configuration files.
    pub fn key(&self) -> &'static str {
        match self {
            RiskCategory::StructuralEngineering => "structural_engineering",
            RiskCategory::EnvironmentalNaturalDisaster => "environmental_natural_disaster",
            RiskCategory::SafetySecurity => "safety_security",
            RiskCategory::FinancialEconomic => "financial_economic",
            RiskCategory::RegulatoryLegal => "regulatory_legal",
            RiskCategory::OperationalBusiness => "operational_business",
        }
    }

    /// What the category covers, used to brief the model.
    pub fn scope(&self) -> &'static str {
        match self {
            RiskCategory::StructuralEngineering => {
                "building integrity, foundation and seismic vulnerability, material degradation, \
                 construction quality and code compliance"
            }
            RiskCategory::EnvironmentalNaturalDisaster => {
                "climate and extreme weather, flood, earthquake and wildfire exposure, air and \
                 water quality, contamination"
            }
            RiskCategory::SafetySecurity => {
                "crime and security vulnerabilities, emergency response, fire safety and \
                 evacuation, accessibility"
            }
            RiskCategory::FinancialEconomic => {
                "property value volatility, insurance cost and availability, market conditions, \
                 compliance costs"
            }
            RiskCategory::RegulatoryLegal => {
                "zoning and land use, building codes and permits, environmental regulation, \
                 liability exposure"
            }
            RiskCategory::OperationalBusiness => {
                "supply chain and logistics, technology and infrastructure dependencies, \
                 staffing, business continuity"
            }
        }
    }

    /// Lowercase words that identify the category in a heading.
    fn keywords(&self) -> &'static [&'static str] {
        match self {
            RiskCategory::StructuralEngineering => &["structural", "engineering"],
            RiskCategory::EnvironmentalNaturalDisaster => {
                &["environmental", "natural disaster", "natural hazard"]
            }
            RiskCategory::SafetySecurity => &["safety", "security"],
            RiskCategory::FinancialEconomic => &["financial", "economic"],
            RiskCategory::RegulatoryLegal => &["regulatory", "legal"],
            RiskCategory::OperationalBusiness => &["operational", "business"],
        }
    }

    /// The single category a heading names, if exactly one matches.
    pub fn from_heading(heading: &str) -> Option<RiskCategory> {
        let lower = heading.to_lowercase();
        let mut matches = RiskCategory::ALL
            .into_iter()
            .filter(|c| c.keywords().iter().any(|k| lower.contains(k)));
        match (matches.next(), matches.next()) {
            (Some(category), None) => Some(category),
            _ => None,
        }
    }
}

impl fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for RiskCategory {
    type Err = String;

    /// Accepts the snake_case key, a kebab-case key, or the first keyword
    /// (`structural`, `environmental`, `safety`, ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase().replace(['-', ' '], "_");
        RiskCategory::ALL
            .into_iter()
            .find(|c| c.key() == key || c.keywords().first().is_some_and(|k| *k == key))
            .ok_or_else(|| {
                format!(
                    "unknown risk category '{s}' (expected one of: structural, environmental, \
                     safety, financial, regulatory, operational)"
                )
            })
    }
}

/// Severity scale. `Undetermined` only marks categories without evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskRating {
    Undetermined,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskRating {
    /// The first rating word found in free text (`moderate` counts as medium).
    pub fn from_text(text: &str) -> Option<RiskRating> {
        text.split(|c: char| !c.is_alphabetic())
            .find_map(|word| match word.to_lowercase().as_str() {
                "critical" | "severe" | "catastrophic" | "extreme" => Some(RiskRating::Critical),
                "high" => Some(RiskRating::High),
                "medium" | "moderate" => Some(RiskRating::Medium),
                "low" | "minimal" | "negligible" => Some(RiskRating::Low),
                _ => None,
            })
    }
}

impl fmt::Display for RiskRating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RiskRating::Undetermined => "Undetermined",
            RiskRating::Low => "Low",
            RiskRating::Medium => "Medium",
            RiskRating::High => "High",
            RiskRating::Critical => "Critical",
        };
        f.write_str(label)
    }
}

/// The assessment of one category.
///
/// `likelihood` and `impact` sit on the same ordinal scale as `rating`;
/// any prose the model gave for them is kept in `evidence`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskCategoryAssessment {
    pub category: RiskCategory,
    pub rating: RiskRating,
    pub likelihood: RiskRating,
    pub impact: RiskRating,
    pub evidence: String,
    pub mitigation: String,
    pub insufficient_evidence: bool,
}

impl RiskCategoryAssessment {
    /// A placeholder for a category that could not be assessed.
    pub fn insufficient_evidence(category: RiskCategory, reason: &str) -> Self {
        Self {
            category,
            rating: RiskRating::Undetermined,
            likelihood: RiskRating::Undetermined,
            impact: RiskRating::Undetermined,
            evidence: format!("Insufficient evidence: {reason}"),
            mitigation: "Gather more information before assessing this category.".to_string(),
            insufficient_evidence: true,
        }
    }
}

/// The output of the risk stage: exactly one assessment per category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskReport {
    pub topic: String,
    pub categories: Vec<RiskCategoryAssessment>,
    pub summary: Option<String>,
    pub generated_at: DateTime<Utc>,
}

impl RiskReport {
    /// Build a report from whatever assessments are available.
    ///
    /// Missing categories become insufficient-evidence placeholders, the
    /// first assessment wins for duplicates, and order is fixed.
    pub fn from_assessments(
        topic: impl Into<String>,
        assessments: Vec<RiskCategoryAssessment>,
        summary: Option<String>,
    ) -> Self {
        let categories = RiskCategory::ALL
            .into_iter()
            .map(|category| {
                assessments
                    .iter()
                    .find(|a| a.category == category)
                    .cloned()
                    .unwrap_or_else(|| {
                        RiskCategoryAssessment::insufficient_evidence(
                            category,
                            "the assessment did not cover this category",
                        )
                    })
            })
            .collect();

        Self {
            topic: topic.into(),
            categories,
            summary,
            generated_at: Utc::now(),
        }
    }

    pub fn get(&self, category: RiskCategory) -> Option<&RiskCategoryAssessment> {
        self.categories.iter().find(|a| a.category == category)
    }

    /// The highest rating across all categories.
    pub fn overall_rating(&self) -> RiskRating {
        self.categories
            .iter()
            .map(|a| a.rating)
            .max()
            .unwrap_or(RiskRating::Undetermined)
    }

    /// Render the risk body with headings starting at level three.
    pub fn render_markdown(&self) -> String {
        let mut md = String::new();
        md.push_str(&format!(
            "**Overall Risk Rating:** {}\n\n",
            self.overall_rating()
        ));

        if let Some(summary) = &self.summary {
            md.push_str("### Executive Risk Summary\n\n");
            md.push_str(summary.trim());
            md.push_str("\n\n");
        }

        md.push_str("| Category | Risk Level | Likelihood | Impact |\n|---|---|---|---|\n");
        for a in &self.categories {
            md.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                a.category, a.rating, a.likelihood, a.impact
            ));
        }
        md.push('\n');

        for (i, a) in self.categories.iter().enumerate() {
            md.push_str(&format!("### {}. {}\n\n", i + 1, a.category));
            if a.insufficient_evidence {
                md.push_str(&format!("- **Risk Level:** {} (insufficient evidence)\n", a.rating));
            } else {
                md.push_str(&format!("- **Risk Level:** {}\n", a.rating));
            }
            md.push_str(&format!("- **Likelihood:** {}\n", a.likelihood));
            md.push_str(&format!("- **Impact:** {}\n", a.impact));
            md.push_str(&format!("- **Evidence:** {}\n", a.evidence));
            md.push_str(&format!("- **Mitigation:** {}\n\n", a.mitigation));
        }
        md
    }
}
