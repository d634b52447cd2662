use super::CompletionClient;
use crate::browser::dynamic::Snapshot;
use crate::error::PricingError;
use crate::plan::{BillingPeriod, ExtractedPlan, IncludedUnit, PlanEvidence, Warning};
use crate::segment::PageSegments;
use serde::Deserialize;
use std::sync::Arc;

/// Per-channel truncation so one oversized page cannot blow the prompt.
const MAX_CHANNEL_CHARS: usize = 24_000;

const SYSTEM_PROMPT: &str = r#"You extract pricing-plan data from website content for competitive analysis.

Respond with ONLY a JSON object of this exact shape, no prose:
{
  "plans": [
    {
      "name": "string",
      "price_amount": number or null,
      "price_raw": "verbatim price string",
      "currency": "ISO code or null",
      "billing_period": "monthly" | "yearly" | "unknown",
      "monthly_equivalent": number or null,
      "annual_billed": number or null,
      "included_units": [{"name": "string", "amount": number or null, "unit": "string or null", "raw_text": "verbatim"}],
      "features": ["string"],
      "evidence": {"name": "verbatim snippet", "price": "verbatim snippet", "units": ["verbatim snippet"], "billing_period": "verbatim snippet or null"}
    }
  ],
  "warnings": ["features_not_visible" and/or "pricing_gated" when applicable]
}

Hard constraints:
- NEVER invent a price, plan name, feature, or quantity that is not explicitly present in the content.
- Every populated field must be backed by a verbatim evidence snippet copied from the content. A field without evidence must be null or omitted.
- If the billing period is not explicitly stated, set "billing_period" to "unknown". Never guess.
- When content is labeled with a SNAPSHOT billing-mode banner, that label is authoritative: every plan extracted from that snapshot uses the banner's billing period even if the surrounding text is ambiguous.
- "monthly_equivalent" is the per-month figure shown for an annually billed plan (e.g. "$8/mo billed annually"); "annual_billed" is the full amount charged per year. Populate them only when the content states them.
- Add the warning "features_not_visible" if feature lists appear truncated or hidden; add "pricing_gated" if prices require contacting sales or logging in."#;

/// Typed result of one extraction pass.
#[derive(Debug, Default)]
pub struct Extraction {
    pub plans: Vec<ExtractedPlan>,
    pub warnings: Vec<Warning>,
}

/// Builds constrained prompts, parses the model's JSON reply into typed plan
/// records, and enforces the evidence invariant on the way out.
pub struct PlanExtractor {
    client: Arc<dyn CompletionClient>,
}

impl PlanExtractor {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self { client }
    }

    /// Extraction over the static visible/hidden/structured channels.
    pub async fn extract_static(&self, segments: &PageSegments) -> Result<Extraction, PricingError> {
        let prompt = build_static_prompt(segments);
        self.run(prompt, None).await
    }

    /// Extraction over one or two labeled billing-mode snapshots.
    pub async fn extract_snapshots(&self, snapshots: &[Snapshot]) -> Result<Extraction, PricingError> {
        let prompt = build_snapshot_prompt(snapshots);
        // With a single known-mode snapshot the label is enforced post-parse
        // as well; with two, the per-banner instruction carries it.
        let force = match snapshots {
            [single] if single.mode != BillingPeriod::Unknown => Some(single.mode),
            _ => None,
        };
        self.run(prompt, force).await
    }

    /// Pasted-text fallback, same labeling convention as snapshots.
    pub async fn extract_pasted(
        &self,
        monthly_text: Option<&str>,
        yearly_text: Option<&str>,
    ) -> Result<Extraction, PricingError> {
        let mut sections = Vec::new();
        if let Some(text) = monthly_text {
            sections.push(format!(
                "=== SNAPSHOT: MONTHLY BILLING MODE ===\n{}",
                truncate(text, MAX_CHANNEL_CHARS)
            ));
        }
        if let Some(text) = yearly_text {
            sections.push(format!(
                "=== SNAPSHOT: YEARLY BILLING MODE ===\n{}",
                truncate(text, MAX_CHANNEL_CHARS)
            ));
        }
        let force = match (monthly_text, yearly_text) {
            (Some(_), None) => Some(BillingPeriod::Monthly),
            (None, Some(_)) => Some(BillingPeriod::Yearly),
            _ => None,
        };
        self.run(sections.join("\n\n"), force).await
    }

    async fn run(
        &self,
        user_prompt: String,
        force_period: Option<BillingPeriod>,
    ) -> Result<Extraction, PricingError> {
        let reply = self
            .client
            .complete(SYSTEM_PROMPT, &user_prompt)
            .await
            .map_err(|e| PricingError::ExtractionFailed(e.to_string()))?;

        let stripped = strip_code_fences(&reply);
        let parsed: LlmReply = serde_json::from_str(stripped)
            .map_err(|e| PricingError::ExtractionFailed(format!("unparseable model reply: {}", e)))?;

        let mut plans = Vec::new();
        for raw in parsed.plans {
            match convert_plan(raw, force_period) {
                Some(plan) => plans.push(plan),
                None => tracing::debug!("dropped model plan violating the evidence invariant"),
            }
        }

        let warnings = parsed.warnings.into_iter().map(Warning::from).collect();

        Ok(Extraction { plans, warnings })
    }
}

fn build_static_prompt(segments: &PageSegments) -> String {
    let mut prompt = String::from("Extract all pricing plans from this website content.\n");

    prompt.push_str("\n=== VISIBLE TEXT ===\n");
    prompt.push_str(&truncate(&segments.visible_text, MAX_CHANNEL_CHARS));

    if !segments.hidden_text.is_empty() {
        prompt.push_str("\n\n=== HIDDEN TEXT (in markup, not rendered by default) ===\n");
        prompt.push_str(&truncate(&segments.hidden_text, MAX_CHANNEL_CHARS));
    }

    if !segments.structured_blobs.is_empty() {
        prompt.push_str("\n\n=== EMBEDDED STRUCTURED DATA ===\n");
        let joined = segments.structured_blobs.join("\n---\n");
        prompt.push_str(&truncate(&joined, MAX_CHANNEL_CHARS));
    }

    prompt
}

fn build_snapshot_prompt(snapshots: &[Snapshot]) -> String {
    let mut sections = vec![String::from(
        "Extract all pricing plans from these rendered page snapshots.",
    )];
    for snapshot in snapshots {
        let banner = match snapshot.mode {
            BillingPeriod::Monthly => "=== SNAPSHOT: MONTHLY BILLING MODE ===",
            BillingPeriod::Yearly => "=== SNAPSHOT: YEARLY BILLING MODE ===",
            BillingPeriod::Unknown => "=== SNAPSHOT: UNKNOWN BILLING MODE ===",
        };
        sections.push(format!(
            "{}\n{}",
            banner,
            truncate(&snapshot.text, MAX_CHANNEL_CHARS)
        ));
    }
    sections.join("\n\n")
}

/// Models often wrap JSON in a markdown code fence despite instructions.
fn strip_code_fences(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening fence line.
    let rest = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => rest,
    };
    rest.trim_end().trim_end_matches("```").trim()
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

#[derive(Debug, Deserialize)]
struct LlmReply {
    #[serde(default)]
    plans: Vec<LlmPlan>,
    #[serde(default)]
    warnings: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct LlmPlan {
    name: Option<String>,
    price_amount: Option<f64>,
    price_raw: Option<String>,
    currency: Option<String>,
    billing_period: Option<String>,
    monthly_equivalent: Option<f64>,
    annual_billed: Option<f64>,
    #[serde(default)]
    included_units: Vec<LlmUnit>,
    #[serde(default)]
    features: Vec<String>,
    evidence: Option<LlmEvidence>,
}

#[derive(Debug, Deserialize)]
struct LlmUnit {
    name: Option<String>,
    amount: Option<f64>,
    unit: Option<String>,
    raw_text: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct LlmEvidence {
    name: Option<String>,
    price: Option<String>,
    #[serde(default)]
    units: Vec<String>,
    billing_period: Option<String>,
}

/// Convert a raw model record, enforcing the evidence invariant: a populated
/// price without a price-evidence snippet disqualifies the record.
fn convert_plan(raw: LlmPlan, force_period: Option<BillingPeriod>) -> Option<ExtractedPlan> {
    let name = raw.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty())?;
    let evidence = raw.evidence.unwrap_or_default();

    let price_raw = raw.price_raw.unwrap_or_default();
    let has_price = raw.price_amount.is_some() || !price_raw.trim().is_empty();
    let price_evidence_empty = evidence.price.as_deref().map_or(true, |s| s.trim().is_empty());
    if has_price && price_evidence_empty {
        return None;
    }

    let billing_period = force_period.unwrap_or_else(|| parse_period(raw.billing_period.as_deref()));

    Some(ExtractedPlan {
        name,
        price_amount: raw.price_amount,
        price_raw,
        currency: raw.currency.filter(|c| !c.trim().is_empty()),
        billing_period,
        monthly_equivalent: raw.monthly_equivalent,
        annual_billed: raw.annual_billed,
        included_units: raw
            .included_units
            .into_iter()
            .filter_map(|u| {
                let raw_text = u.raw_text.unwrap_or_default();
                let name = u.name.unwrap_or_default();
                if name.is_empty() && raw_text.is_empty() {
                    return None;
                }
                Some(IncludedUnit { name, amount: u.amount, unit: u.unit, raw_text })
            })
            .collect(),
        features: raw.features,
        evidence: PlanEvidence {
            name: evidence.name,
            price: evidence.price,
            units: evidence.units,
            billing_period: evidence.billing_period,
        },
    })
}

fn parse_period(raw: Option<&str>) -> BillingPeriod {
    match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        Some("monthly") | Some("month") => BillingPeriod::Monthly,
        Some("yearly") | Some("annual") | Some("annually") | Some("year") => BillingPeriod::Yearly,
        _ => BillingPeriod::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use url::Url;

    struct CannedClient {
        reply: String,
    }

    #[async_trait]
    impl CompletionClient for CannedClient {
        async fn complete(&self, _system: &str, _user: &str) -> anyhow::Result<String> {
            Ok(self.reply.clone())
        }
    }

    fn extractor(reply: &str) -> PlanExtractor {
        PlanExtractor::new(Arc::new(CannedClient { reply: reply.to_string() }))
    }

    fn segments(visible: &str) -> PageSegments {
        let base = Url::parse("https://example.com/pricing").unwrap();
        let mut s = crate::segment::segment("", &base);
        s.visible_text = visible.to_string();
        s
    }

    const GOOD_REPLY: &str = r#"{
        "plans": [{
            "name": "Pro",
            "price_amount": 12.0,
            "price_raw": "$12",
            "currency": "USD",
            "billing_period": "monthly",
            "features": ["API access"],
            "evidence": {"name": "Pro", "price": "$12/mo"}
        }],
        "warnings": []
    }"#;

    #[tokio::test]
    async fn parses_plain_json_reply() {
        let result = extractor(GOOD_REPLY)
            .extract_static(&segments("Pro $12/mo"))
            .await
            .unwrap();
        assert_eq!(result.plans.len(), 1);
        assert_eq!(result.plans[0].name, "Pro");
        assert_eq!(result.plans[0].billing_period, BillingPeriod::Monthly);
    }

    #[tokio::test]
    async fn strips_markdown_fences() {
        let fenced = format!("```json\n{}\n```", GOOD_REPLY);
        let result = extractor(&fenced)
            .extract_static(&segments("Pro $12/mo"))
            .await
            .unwrap();
        assert_eq!(result.plans.len(), 1);
    }

    #[tokio::test]
    async fn rejects_plan_with_price_but_no_evidence() {
        let reply = r#"{
            "plans": [
                {"name": "Fabricated", "price_amount": 99.0, "price_raw": "$99",
                 "billing_period": "monthly", "evidence": {"name": "Fabricated"}},
                {"name": "Free", "price_raw": "", "billing_period": "unknown",
                 "evidence": {"name": "Free"}}
            ],
            "warnings": []
        }"#;
        let result = extractor(reply).extract_static(&segments("Free plan")).await.unwrap();
        assert_eq!(result.plans.len(), 1);
        assert_eq!(result.plans[0].name, "Free");
    }

    #[tokio::test]
    async fn parse_failure_is_extraction_failed() {
        let err = extractor("not json at all")
            .extract_static(&segments("whatever"))
            .await
            .unwrap_err();
        assert!(matches!(err, PricingError::ExtractionFailed(_)));
    }

    #[tokio::test]
    async fn single_snapshot_label_is_authoritative() {
        let reply = r#"{
            "plans": [{"name": "Pro", "price_amount": 8.0, "price_raw": "$8/mo",
                       "billing_period": "monthly",
                       "evidence": {"name": "Pro", "price": "$8/mo billed annually"}}],
            "warnings": []
        }"#;
        let snapshots = vec![Snapshot {
            mode: BillingPeriod::Yearly,
            text: "$8/mo billed annually".into(),
            html: String::new(),
        }];
        let result = extractor(reply).extract_snapshots(&snapshots).await.unwrap();
        // The model said monthly; the yearly snapshot label wins.
        assert_eq!(result.plans[0].billing_period, BillingPeriod::Yearly);
    }

    #[tokio::test]
    async fn model_warnings_pass_through() {
        let reply = r#"{"plans": [], "warnings": ["pricing_gated"]}"#;
        let result = extractor(reply).extract_static(&segments("Contact sales")).await.unwrap();
        assert_eq!(result.warnings, vec![Warning::PricingGated]);
    }

    #[test]
    fn snapshot_prompt_carries_mode_banners() {
        let snapshots = vec![
            Snapshot { mode: BillingPeriod::Monthly, text: "m".into(), html: String::new() },
            Snapshot { mode: BillingPeriod::Yearly, text: "y".into(), html: String::new() },
        ];
        let prompt = build_snapshot_prompt(&snapshots);
        assert!(prompt.contains("=== SNAPSHOT: MONTHLY BILLING MODE ==="));
        assert!(prompt.contains("=== SNAPSHOT: YEARLY BILLING MODE ==="));
    }

    #[test]
    fn fence_stripping_handles_bare_and_labeled_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("{\"a\":1}"), "{\"a\":1}");
    }
}
