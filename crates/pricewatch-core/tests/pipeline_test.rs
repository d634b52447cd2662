use async_trait::async_trait;
use pricewatch_core::browser::{BrowserEngine, BrowserPage};
use pricewatch_core::llm::CompletionClient;
use pricewatch_core::segment::fetch::PageFetcher;
use pricewatch_core::{BillingPeriod, PricingError, PricingPipeline, Warning};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use url::Url;

struct StaticFetcher {
    html: String,
}

#[async_trait]
impl PageFetcher for StaticFetcher {
    async fn fetch(&self, _url: &Url) -> anyhow::Result<String> {
        Ok(self.html.clone())
    }
}

struct FailingFetcher;

#[async_trait]
impl PageFetcher for FailingFetcher {
    async fn fetch(&self, _url: &Url) -> anyhow::Result<String> {
        anyhow::bail!("connection refused")
    }
}

/// Replies in order, one per completion call, and counts the calls.
struct ScriptedCompletion {
    replies: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedCompletion {
    fn new(replies: Vec<&str>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().rev().map(String::from).collect()),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletion {
    async fn complete(&self, _system: &str, _user: &str) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.replies
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| anyhow::anyhow!("no scripted reply left"))
    }
}

/// A fake rendered page with a monthly/yearly toggle: clicking the tagged
/// yearly control swaps the body text.
struct TogglePage {
    text: Mutex<String>,
    yearly_text: String,
    clicks: AtomicUsize,
}

impl TogglePage {
    fn new(monthly_text: &str, yearly_text: &str) -> Self {
        Self {
            text: Mutex::new(monthly_text.to_string()),
            yearly_text: yearly_text.to_string(),
            clicks: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl BrowserPage for TogglePage {
    async fn navigate(&self, _url: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn wait_for_visible(&self, _selector: &str, _timeout_ms: u64) -> anyhow::Result<()> {
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> anyhow::Result<serde_json::Value> {
        if script.contains("data-pw-toggle") {
            return Ok(serde_json::json!([
                { "selector": "[data-pw-toggle=\"0\"]", "label": "Monthly", "kind": "tab" },
                { "selector": "[data-pw-toggle=\"1\"]", "label": "Annually", "kind": "tab" },
            ]));
        }
        if script.contains("aria-selected") {
            return Ok(serde_json::json!(""));
        }
        Ok(serde_json::Value::Null)
    }

    async fn click(&self, selector: &str) -> anyhow::Result<()> {
        self.clicks.fetch_add(1, Ordering::SeqCst);
        if selector == "[data-pw-toggle=\"1\"]" {
            *self.text.lock().unwrap() = self.yearly_text.clone();
        }
        Ok(())
    }

    async fn inner_text(&self) -> anyhow::Result<String> {
        Ok(self.text.lock().unwrap().clone())
    }

    async fn content(&self) -> anyhow::Result<String> {
        Ok(format!("<body>{}</body>", self.text.lock().unwrap()))
    }

    async fn screenshot(&self) -> anyhow::Result<Vec<u8>> {
        Ok(Vec::new())
    }
}

struct ToggleEngine {
    monthly_text: String,
    yearly_text: String,
}

#[async_trait]
impl BrowserEngine for ToggleEngine {
    async fn open_page(&self) -> anyhow::Result<Box<dyn BrowserPage>> {
        Ok(Box::new(TogglePage::new(&self.monthly_text, &self.yearly_text)))
    }
}

const STATIC_FILLER: &str =
    "<p>Choose the plan that fits your team. Every plan includes unlimited projects, \
     advanced analytics, and support from real humans whenever you need it. Upgrade, \
     downgrade, or cancel at any time. Prices shown before tax.</p>";

const MONTHLY_RENDERED: &str =
    "Basic $10 per month. Pro $20 per month. Billed monthly. Pay monthly today.";
const YEARLY_RENDERED: &str =
    "Basic $96 per year. Pro $192 per year. Billed annually. Save with annual billing.";

const MONTHLY_PLANS_REPLY: &str = r#"{
    "plans": [
        {"name": "Basic", "price_amount": 10.0, "price_raw": "$10", "billing_period": "monthly",
         "features": ["Email support"], "evidence": {"name": "Basic", "price": "$10 per month"}},
        {"name": "Pro", "price_amount": 20.0, "price_raw": "$20", "billing_period": "monthly",
         "features": ["Priority support"], "evidence": {"name": "Pro", "price": "$20 per month"}}
    ],
    "warnings": []
}"#;

const BOTH_PERIODS_REPLY: &str = r#"{
    "plans": [
        {"name": "Basic", "price_amount": 10.0, "price_raw": "$10", "billing_period": "monthly",
         "evidence": {"name": "Basic", "price": "$10 per month"}},
        {"name": "Basic", "price_amount": 96.0, "price_raw": "$96", "billing_period": "yearly",
         "evidence": {"name": "Basic", "price": "$96 per year"}},
        {"name": "Pro", "price_amount": 20.0, "price_raw": "$20", "billing_period": "monthly",
         "evidence": {"name": "Pro", "price": "$20 per month"}},
        {"name": "Pro", "price_amount": 192.0, "price_raw": "$192", "billing_period": "yearly",
         "evidence": {"name": "Pro", "price": "$192 per year"}}
    ],
    "warnings": []
}"#;

#[tokio::test]
async fn short_static_page_goes_straight_to_dynamic() {
    // 40 characters of visible text: an SPA shell. The static pass must not
    // spend an LLM call on it.
    let fetcher = Arc::new(StaticFetcher {
        html: "<body><div id=\"root\">Loading your experience, please wait</div></body>".into(),
    });
    let completion = ScriptedCompletion::new(vec![MONTHLY_PLANS_REPLY]);
    let engine = Arc::new(ToggleEngine {
        monthly_text: MONTHLY_RENDERED.into(),
        yearly_text: YEARLY_RENDERED.into(),
    });

    let pipeline = PricingPipeline::new(fetcher, completion.clone(), Some(engine));
    let result = pipeline.extract_pricing("https://example.com/pricing").await.unwrap();

    assert!(result.render_required);
    assert!(result.render_used);
    assert_eq!(result.plans.len(), 2);
    // Only the snapshot pass hit the model.
    assert_eq!(completion.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn toggle_with_one_period_triggers_dynamic_and_prefers_richer_result() {
    let fetcher = Arc::new(StaticFetcher {
        html: format!(
            "<body><div role=\"tablist\"><button role=\"tab\">Monthly</button>\
             <button role=\"tab\">Annually</button></div><main>{}{}</main></body>",
            STATIC_FILLER, MONTHLY_RENDERED
        ),
    });
    // First reply feeds the static pass (one period), second the snapshot
    // pass (two periods).
    let completion = ScriptedCompletion::new(vec![MONTHLY_PLANS_REPLY, BOTH_PERIODS_REPLY]);
    let engine = Arc::new(ToggleEngine {
        monthly_text: MONTHLY_RENDERED.into(),
        yearly_text: YEARLY_RENDERED.into(),
    });

    let pipeline = PricingPipeline::new(fetcher, completion.clone(), Some(engine));
    let result = pipeline.extract_pricing("https://example.com/pricing").await.unwrap();

    assert!(!result.render_required);
    assert!(result.render_used);
    assert_eq!(completion.calls.load(Ordering::SeqCst), 2);
    assert_eq!(result.plans.len(), 4);
    assert_eq!(
        result.billing_periods,
        vec![BillingPeriod::Monthly, BillingPeriod::Yearly]
    );
}

#[tokio::test]
async fn dynamic_failure_degrades_to_static_result() {
    let fetcher = Arc::new(StaticFetcher {
        html: format!(
            "<body><div role=\"tablist\">Pay monthly or billed annually</div>{}{}</body>",
            STATIC_FILLER, MONTHLY_RENDERED
        ),
    });
    let completion = ScriptedCompletion::new(vec![MONTHLY_PLANS_REPLY]);

    // No browser engine configured: the dynamic pass fails outright.
    let pipeline = PricingPipeline::new(fetcher, completion, None);
    let result = pipeline.extract_pricing("https://example.com/pricing").await.unwrap();

    assert!(!result.render_used);
    assert_eq!(result.plans.len(), 2);
    assert!(result.warnings.contains(&Warning::RenderFailed));
}

#[tokio::test]
async fn static_result_survives_snapshot_parse_failure() {
    let fetcher = Arc::new(StaticFetcher {
        html: format!(
            "<body><div role=\"tablist\"><button role=\"tab\">Monthly</button>\
             <button role=\"tab\">Annually</button></div>{}{}</body>",
            STATIC_FILLER, MONTHLY_RENDERED
        ),
    });
    let completion = ScriptedCompletion::new(vec![MONTHLY_PLANS_REPLY, "this is not json"]);
    let engine = Arc::new(ToggleEngine {
        monthly_text: MONTHLY_RENDERED.into(),
        yearly_text: YEARLY_RENDERED.into(),
    });

    let pipeline = PricingPipeline::new(fetcher, completion, Some(engine));
    let result = pipeline.extract_pricing("https://example.com/pricing").await.unwrap();

    assert!(result.render_used);
    assert_eq!(result.plans.len(), 2);
    assert!(result.warnings.contains(&Warning::ParseError));
}

#[tokio::test]
async fn forbidden_and_malformed_urls_are_rejected_before_any_fetch() {
    let completion = ScriptedCompletion::new(vec![]);
    let pipeline = PricingPipeline::new(Arc::new(FailingFetcher), completion, None);

    for bad in ["http://127.0.0.1/x", "http://169.254.169.254/", "ftp://example.com"] {
        let err = pipeline.extract_pricing(bad).await.unwrap_err();
        assert!(
            matches!(err, PricingError::InvalidUrl(_)),
            "expected InvalidUrl for {}",
            bad
        );
    }
}

#[tokio::test]
async fn fetch_failure_is_structured_with_no_plan_data() {
    let completion = ScriptedCompletion::new(vec![]);
    let pipeline = PricingPipeline::new(Arc::new(FailingFetcher), completion, None);

    let err = pipeline.extract_pricing("https://example.com/pricing").await.unwrap_err();
    assert!(matches!(err, PricingError::Fetch(_)));
}

#[tokio::test]
async fn pasted_text_extraction_uses_snapshot_labels() {
    let completion = ScriptedCompletion::new(vec![BOTH_PERIODS_REPLY]);
    let pipeline = PricingPipeline::new(Arc::new(FailingFetcher), completion, None);

    let result = pipeline
        .extract_from_text(Some(MONTHLY_RENDERED), Some(YEARLY_RENDERED))
        .await
        .unwrap();

    assert!(!result.render_used);
    assert_eq!(result.plans.len(), 4);
    assert_eq!(
        result.billing_periods,
        vec![BillingPeriod::Monthly, BillingPeriod::Yearly]
    );
}

#[tokio::test]
async fn pasted_text_requires_some_text() {
    let completion = ScriptedCompletion::new(vec![]);
    let pipeline = PricingPipeline::new(Arc::new(FailingFetcher), completion, None);

    let err = pipeline.extract_from_text(None, Some("  ")).await.unwrap_err();
    assert!(matches!(err, PricingError::ExtractionFailed(_)));
}
