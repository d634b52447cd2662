/// Phrases that tend to appear around a monthly/annual billing toggle.
const TOGGLE_PHRASES: [&str; 14] = [
    "pay monthly",
    "pay annually",
    "pay yearly",
    "billed monthly",
    "billed annually",
    "billed yearly",
    "annual billing",
    "monthly billing",
    "per month",
    "per year",
    "/mo",
    "/yr",
    "save 2",
    "save with annual",
];

/// Markup idioms used for tab/switch style billing toggles.
const STRUCTURAL_IDIOMS: [&str; 6] = [
    r#"role="tablist""#,
    r#"role="switch""#,
    r#"role="tab""#,
    "billing-toggle",
    "billing-switch",
    "pricing-toggle",
];

/// Cheap, imprecise signal for whether the page exposes a monthly/annual
/// billing toggle. A false positive only costs a capped browser pass; false
/// negatives are mitigated by the static pass reading hidden content and
/// structured data first.
pub fn detect_billing_toggle(visible_text: &str, html: &str) -> bool {
    let text = visible_text.to_ascii_lowercase();
    let markup = html.to_ascii_lowercase();

    let phrase_hits: usize = TOGGLE_PHRASES
        .iter()
        .map(|p| text.matches(p).count())
        .sum();

    let structural = STRUCTURAL_IDIOMS.iter().any(|i| markup.contains(i));

    phrase_hits >= 2 || (phrase_hits >= 1 && structural)
}
