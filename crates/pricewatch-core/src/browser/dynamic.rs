use super::controls::{score_controls, CandidateControl, ToggleControl};
use super::BrowserPage;
use crate::plan::{BillingPeriod, Warning};
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;
use uuid::Uuid;

/// Overall deadline for a browser-driven sub-pipeline, distinct from the
/// page-fetch deadline.
pub const DYNAMIC_DEADLINE: Duration = Duration::from_secs(90);

/// Post-click texts more similar than this are treated as "nothing changed".
const SIMILARITY_THRESHOLD: f64 = 0.95;

const SETTLE_AFTER_LOAD: Duration = Duration::from_millis(1200);
const SETTLE_AFTER_CLICK: Duration = Duration::from_millis(800);

const MAX_EXPAND_CLICKS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Load,
    Expand,
    DetectMode,
    LocateControls,
    SwitchMode,
    Capture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchReason {
    AlreadyInMode,
    TextDiverged,
    TabSelected,
    ModeDetected,
    NoCandidate,
    ClickFailed,
    VerifyFailed,
}

/// Typed transition result for one switch attempt, kept inspectable in tests
/// and logs instead of threading booleans through call sites.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SwitchResult {
    pub success: bool,
    pub state_changed: bool,
    pub reason: SwitchReason,
}

impl SwitchResult {
    fn ok(reason: SwitchReason, state_changed: bool) -> Self {
        Self { success: true, state_changed, reason }
    }

    fn failed(reason: SwitchReason) -> Self {
        Self { success: false, state_changed: false, reason }
    }
}

/// A captured text/markup state of the page under one billing mode.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub mode: BillingPeriod,
    pub text: String,
    pub html: String,
}

#[derive(Debug, Default)]
pub struct DynamicCapture {
    pub snapshots: Vec<Snapshot>,
    pub warnings: Vec<Warning>,
}

/// Drive the page through load → expand → detect-mode → locate-controls →
/// switch-mode → verify → capture, producing one snapshot per billing mode
/// that could be reached. Control and click failures degrade to warnings; a
/// navigation failure is fatal for this component.
pub async fn extract(page: &dyn BrowserPage, url: &str) -> anyhow::Result<DynamicCapture> {
    let mut artifact = DebugArtifact::begin(url);

    artifact.stage(Stage::Load);
    page.navigate(url).await.context("page navigation failed")?;
    let _ = page.wait_for_visible("body", 10_000).await;
    tokio::time::sleep(SETTLE_AFTER_LOAD).await;

    artifact.stage(Stage::Expand);
    expand_disclosures(page).await;

    artifact.stage(Stage::DetectMode);
    let initial_text = page.inner_text().await.context("initial text capture failed")?;
    let initial_mode = detect_billing_mode(&initial_text);
    tracing::debug!("detected initial billing mode: {}", initial_mode);

    artifact.stage(Stage::LocateControls);
    let candidates = collect_candidates(page).await.unwrap_or_else(|e| {
        tracing::debug!("control enumeration failed: {}", e);
        Vec::new()
    });
    let (monthly_control, yearly_control) = score_controls(&candidates);

    let mut capture = DynamicCapture::default();
    let mut current_mode = initial_mode;
    let mut current_text = initial_text;

    let targets = [
        (BillingPeriod::Monthly, monthly_control, Warning::MonthlyToggleFailed),
        (BillingPeriod::Yearly, yearly_control, Warning::YearlyToggleFailed),
    ];

    for (target, control, failure_warning) in targets {
        artifact.stage(Stage::SwitchMode);
        let result =
            switch_billing_mode(page, target, current_mode, control.as_ref(), &current_text).await;
        artifact.switch(target, &result);

        if result.success {
            let text = if result.state_changed {
                page.inner_text().await.unwrap_or_else(|_| current_text.clone())
            } else {
                current_text.clone()
            };
            let html = page.content().await.unwrap_or_default();
            capture.snapshots.push(Snapshot { mode: target, text: text.clone(), html });
            current_mode = target;
            current_text = text;
        } else {
            tracing::debug!("switch to {} failed: {:?}", target, result.reason);
            capture.warnings.push(failure_warning);
        }
    }

    artifact.stage(Stage::Capture);
    if capture.snapshots.is_empty() {
        capture.warnings.push(Warning::NoToggleClicked);
        let html = page.content().await.unwrap_or_default();
        capture.snapshots.push(Snapshot { mode: current_mode, text: current_text, html });
    }

    artifact.finish(&capture);
    Ok(capture)
}

/// Switch the page to the target billing mode and verify the switch actually
/// happened. Already being in the target mode is a success without a click.
pub async fn switch_billing_mode(
    page: &dyn BrowserPage,
    target: BillingPeriod,
    current: BillingPeriod,
    control: Option<&ToggleControl>,
    pre_text: &str,
) -> SwitchResult {
    if current == target {
        return SwitchResult::ok(SwitchReason::AlreadyInMode, false);
    }

    let Some(control) = control else {
        return SwitchResult::failed(SwitchReason::NoCandidate);
    };

    let mut click_failed = false;
    // One retry before giving up.
    for _attempt in 0..2 {
        if let Err(e) = page.click(&control.selector).await {
            tracing::debug!("click on {} failed: {}", control.selector, e);
            click_failed = true;
            continue;
        }
        click_failed = false;
        tokio::time::sleep(SETTLE_AFTER_CLICK).await;

        let post_text = match page.inner_text().await {
            Ok(t) => t,
            Err(_) => continue,
        };

        // Any one of three independent checks is sufficient.
        if word_overlap_ratio(pre_text, &post_text) < SIMILARITY_THRESHOLD {
            return SwitchResult::ok(SwitchReason::TextDiverged, true);
        }
        if selected_tab_matches(page, target).await {
            return SwitchResult::ok(SwitchReason::TabSelected, true);
        }
        if detect_billing_mode(&post_text) == target {
            return SwitchResult::ok(SwitchReason::ModeDetected, true);
        }
    }

    if click_failed {
        SwitchResult::failed(SwitchReason::ClickFailed)
    } else {
        SwitchResult::failed(SwitchReason::VerifyFailed)
    }
}

/// Classify rendered text as monthly, yearly, or unknown. Regex-matched
/// price-per-period patterns count double compared to plain substring hits;
/// majority wins, tie goes to unknown.
pub fn detect_billing_mode(text: &str) -> BillingPeriod {
    const MONTHLY_SIGNALS: [&str; 4] = ["per month", "billed monthly", "monthly billing", "pay monthly"];
    const YEARLY_SIGNALS: [&str; 6] = [
        "per year",
        "billed annually",
        "billed yearly",
        "annual billing",
        "pay annually",
        "pay yearly",
    ];

    static MONTHLY_PRICE_RE: OnceLock<regex::Regex> = OnceLock::new();
    static YEARLY_PRICE_RE: OnceLock<regex::Regex> = OnceLock::new();

    let monthly_re = MONTHLY_PRICE_RE.get_or_init(|| {
        regex::Regex::new(r"(?i)[$€£]\s*\d+(?:[.,]\d+)?\s*/\s*mo(?:nth)?\b").unwrap()
    });
    let yearly_re = YEARLY_PRICE_RE.get_or_init(|| {
        regex::Regex::new(r"(?i)[$€£]\s*\d+(?:[.,]\d+)?\s*/\s*y(?:ea)?r\b").unwrap()
    });

    let lower = text.to_ascii_lowercase();

    let monthly_score: usize = MONTHLY_SIGNALS
        .iter()
        .map(|s| lower.matches(s).count())
        .sum::<usize>()
        + 2 * monthly_re.find_iter(text).count();
    let yearly_score: usize = YEARLY_SIGNALS
        .iter()
        .map(|s| lower.matches(s).count())
        .sum::<usize>()
        + 2 * yearly_re.find_iter(text).count();

    if monthly_score > yearly_score {
        BillingPeriod::Monthly
    } else if yearly_score > monthly_score {
        BillingPeriod::Yearly
    } else {
        BillingPeriod::Unknown
    }
}

/// Jaccard-style word-overlap ratio between two texts.
pub fn word_overlap_ratio(a: &str, b: &str) -> f64 {
    let words_a: HashSet<&str> = a.split_whitespace().collect();
    let words_b: HashSet<&str> = b.split_whitespace().collect();

    if words_a.is_empty() && words_b.is_empty() {
        return 1.0;
    }

    let intersection = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();
    intersection as f64 / union as f64
}

/// Scroll to trigger lazy content, then click up to five disclosure controls
/// to reveal feature lists hidden behind "show more" style elements.
async fn expand_disclosures(page: &dyn BrowserPage) {
    let _ = page
        .evaluate("window.scrollTo(0, document.body.scrollHeight)")
        .await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    let _ = page.evaluate("window.scrollTo(0, 0)").await;

    const TAG_EXPANDERS: &str = r#"
(() => {
  const kws = ['show more', 'see all', 'expand', 'compare plans', 'view features', 'all features', 'compare'];
  const nodes = Array.from(document.querySelectorAll('button, a, [role="button"], summary'));
  const out = [];
  let n = 0;
  for (const el of nodes) {
    const t = (el.innerText || '').trim().toLowerCase();
    if (!t || t.length > 60) continue;
    if (kws.some(k => t.includes(k))) {
      el.setAttribute('data-pw-expand', String(n));
      out.push('[data-pw-expand="' + n + '"]');
      n++;
    }
    if (n >= 5) break;
  }
  return out;
})()"#;

    let selectors = match page.evaluate(TAG_EXPANDERS).await {
        Ok(serde_json::Value::Array(values)) => values
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect::<Vec<_>>(),
        _ => Vec::new(),
    };

    for selector in selectors.iter().take(MAX_EXPAND_CLICKS) {
        if page.click(selector).await.is_ok() {
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }
}

/// Enumerate toggle-control candidates. Each candidate is tagged in-page with
/// a data attribute so later clicks have a stable selector.
async fn collect_candidates(page: &dyn BrowserPage) -> anyhow::Result<Vec<CandidateControl>> {
    const TAG_CANDIDATES: &str = r#"
(() => {
  const nodes = Array.from(document.querySelectorAll('[role="tab"], [role="switch"], button, label'));
  const out = [];
  let n = 0;
  for (const el of nodes) {
    const label = (el.innerText || el.textContent || '').trim();
    if (!label || label.length > 60) continue;
    const role = (el.getAttribute('role') || '').toLowerCase();
    const kind = role === 'tab' ? 'tab'
      : role === 'switch' ? 'switch'
      : el.tagName === 'LABEL' ? 'label'
      : 'button';
    el.setAttribute('data-pw-toggle', String(n));
    out.push({ selector: '[data-pw-toggle="' + n + '"]', label, kind });
    n++;
    if (n >= 40) break;
  }
  return out;
})()"#;

    let value = page.evaluate(TAG_CANDIDATES).await?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// Verification check (b): a tab now reports `aria-selected="true"` and its
/// label matches the target direction.
async fn selected_tab_matches(page: &dyn BrowserPage, target: BillingPeriod) -> bool {
    const SELECTED_TABS: &str = r#"
(() => Array.from(document.querySelectorAll('[role="tab"][aria-selected="true"]'))
  .map(t => (t.innerText || '').trim().toLowerCase())
  .join(' | '))()"#;

    let labels = match page.evaluate(SELECTED_TABS).await {
        Ok(v) => v.as_str().unwrap_or_default().to_string(),
        Err(_) => return false,
    };

    match target {
        BillingPeriod::Monthly => ["monthly", "month", "/mo"].iter().any(|k| labels.contains(k)),
        BillingPeriod::Yearly => ["annual", "yearly", "year", "/yr"]
            .iter()
            .any(|k| labels.contains(k)),
        BillingPeriod::Unknown => false,
    }
}

#[derive(Debug, Serialize)]
struct SwitchOutcome {
    target: BillingPeriod,
    success: bool,
    state_changed: bool,
    reason: SwitchReason,
}

/// Per-run diagnostics: which stages ran, whether each toggle click produced
/// a verified state change, and where raw captures were saved. Written once
/// after the run when `PRICEWATCH_DEBUG_DIR` is set; never mutated afterward.
#[derive(Debug, Serialize)]
pub struct DebugArtifact {
    run_id: Uuid,
    url: String,
    stages: Vec<Stage>,
    switches: Vec<SwitchOutcome>,
    capture_paths: Vec<String>,
    created_at: DateTime<Utc>,
}

impl DebugArtifact {
    fn begin(url: &str) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            url: url.to_string(),
            stages: Vec::new(),
            switches: Vec::new(),
            capture_paths: Vec::new(),
            created_at: Utc::now(),
        }
    }

    fn stage(&mut self, stage: Stage) {
        self.stages.push(stage);
    }

    fn switch(&mut self, target: BillingPeriod, result: &SwitchResult) {
        self.switches.push(SwitchOutcome {
            target,
            success: result.success,
            state_changed: result.state_changed,
            reason: result.reason,
        });
    }

    fn finish(mut self, capture: &DynamicCapture) {
        let Ok(dir) = std::env::var("PRICEWATCH_DEBUG_DIR") else {
            return;
        };
        let dir = std::path::Path::new(&dir);

        for snapshot in &capture.snapshots {
            let path = dir.join(format!("{}-{}.html", self.run_id, snapshot.mode));
            if std::fs::write(&path, &snapshot.html).is_ok() {
                self.capture_paths.push(path.display().to_string());
            }
        }

        let path = dir.join(format!("{}.json", self.run_id));
        match serde_json::to_vec_pretty(&self) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&path, json) {
                    tracing::debug!("failed to write debug artifact {}: {}", path.display(), e);
                }
            }
            Err(e) => tracing::debug!("failed to serialize debug artifact: {}", e),
        }
    }
}
