use serde::{Deserialize, Serialize};
use std::fmt;

/// How a plan's quoted price is charged.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BillingPeriod {
    Monthly,
    Yearly,
    Unknown,
}

impl BillingPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingPeriod::Monthly => "monthly",
            BillingPeriod::Yearly => "yearly",
            BillingPeriod::Unknown => "unknown",
        }
    }
}

impl Default for BillingPeriod {
    fn default() -> Self {
        BillingPeriod::Unknown
    }
}

impl fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A quantitative allowance included in a plan ("5 seats", "100 GB storage").
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IncludedUnit {
    pub name: String,
    pub amount: Option<f64>,
    pub unit: Option<String>,
    pub raw_text: String,
}

/// Verbatim source snippets proving extracted fields. Absence of a snippet
/// means the corresponding field must be null, never guessed.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlanEvidence {
    pub name: Option<String>,
    pub price: Option<String>,
    #[serde(default)]
    pub units: Vec<String>,
    pub billing_period: Option<String>,
}

/// One pricing tier as derived from a single source pass. Instances are
/// never mutated in place; later stages only merge two into a new, richer
/// instance so evidence stays attributable to its originating snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedPlan {
    pub name: String,
    pub price_amount: Option<f64>,
    #[serde(default)]
    pub price_raw: String,
    pub currency: Option<String>,
    #[serde(default)]
    pub billing_period: BillingPeriod,
    pub monthly_equivalent: Option<f64>,
    pub annual_billed: Option<f64>,
    #[serde(default)]
    pub included_units: Vec<IncludedUnit>,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub evidence: PlanEvidence,
}

/// Non-fatal extraction-quality warning codes. Serialized as plain strings so
/// codes emitted by the model pass through unmangled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "String", into = "String")]
pub enum Warning {
    FeaturesNotVisible,
    PricingGated,
    MonthlyToggleFailed,
    YearlyToggleFailed,
    NoToggleClicked,
    ParseError,
    RenderFailed,
    Other(String),
}

impl Warning {
    pub fn as_str(&self) -> &str {
        match self {
            Warning::FeaturesNotVisible => "features_not_visible",
            Warning::PricingGated => "pricing_gated",
            Warning::MonthlyToggleFailed => "monthly_toggle_failed",
            Warning::YearlyToggleFailed => "yearly_toggle_failed",
            Warning::NoToggleClicked => "no_toggle_clicked",
            Warning::ParseError => "parse_error",
            Warning::RenderFailed => "render_failed",
            Warning::Other(s) => s,
        }
    }
}

impl From<String> for Warning {
    fn from(s: String) -> Self {
        match s.as_str() {
            "features_not_visible" => Warning::FeaturesNotVisible,
            "pricing_gated" => Warning::PricingGated,
            "monthly_toggle_failed" => Warning::MonthlyToggleFailed,
            "yearly_toggle_failed" => Warning::YearlyToggleFailed,
            "no_toggle_clicked" => Warning::NoToggleClicked,
            "parse_error" => Warning::ParseError,
            "render_failed" => Warning::RenderFailed,
            _ => Warning::Other(s),
        }
    }
}

impl From<Warning> for String {
    fn from(w: Warning) -> Self {
        w.as_str().to_string()
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The pipeline's terminal output. Built once per invocation, immutable
/// after construction.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PricingExtractResult {
    pub plans: Vec<ExtractedPlan>,
    pub billing_periods: Vec<BillingPeriod>,
    pub render_required: bool,
    pub render_used: bool,
    pub warnings: Vec<Warning>,
}

impl PricingExtractResult {
    /// Distinct billing periods present in `plans`, in enum order.
    pub fn periods_of(plans: &[ExtractedPlan]) -> Vec<BillingPeriod> {
        let mut periods: Vec<BillingPeriod> =
            plans.iter().map(|p| p.billing_period).collect();
        periods.sort();
        periods.dedup();
        periods
    }
}
