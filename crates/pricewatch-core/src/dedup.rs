use crate::plan::ExtractedPlan;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Canonical identity for a plan extraction: normalized name + billing
/// period + normalized numeric price token. Records sharing a key describe
/// the same tier seen through different passes.
pub fn canonical_key(plan: &ExtractedPlan) -> String {
    format!(
        "{}|{}|{}",
        normalize_name(&plan.name),
        plan.billing_period,
        normalize_price(plan)
    )
}

fn normalize_name(name: &str) -> String {
    let lowered = name.to_ascii_lowercase();
    let mut collapsed = lowered.split_whitespace().collect::<Vec<_>>().join(" ");
    for suffix in [" plan", " tier"] {
        if let Some(stripped) = collapsed.strip_suffix(suffix) {
            collapsed = stripped.trim_end().to_string();
        }
    }
    collapsed
}

fn normalize_price(plan: &ExtractedPlan) -> String {
    if let Some(amount) = plan.price_amount {
        return trim_number(amount);
    }
    static PRICE_TOKEN_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = PRICE_TOKEN_RE.get_or_init(|| regex::Regex::new(r"\d+(?:[.,]\d+)?").unwrap());
    match re.find(&plan.price_raw) {
        Some(m) => m.as_str().replace(',', "."),
        None => String::new(),
    }
}

fn trim_number(value: f64) -> String {
    let formatted = format!("{:.2}", value);
    formatted
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

/// Merge duplicate records left-to-right, preferring the richer evidence,
/// then sort by (name, billing period) for deterministic output.
pub fn dedup_plans(plans: Vec<ExtractedPlan>) -> Vec<ExtractedPlan> {
    let mut order: Vec<String> = Vec::new();
    let mut by_key: HashMap<String, ExtractedPlan> = HashMap::new();

    for plan in plans {
        let key = canonical_key(&plan);
        match by_key.remove(&key) {
            Some(existing) => {
                by_key.insert(key, merge(existing, plan));
            }
            None => {
                order.push(key.clone());
                by_key.insert(key, plan);
            }
        }
    }

    let mut merged: Vec<ExtractedPlan> = order
        .into_iter()
        .filter_map(|key| by_key.remove(&key))
        .collect();

    merged.sort_by(|a, b| {
        normalize_name(&a.name)
            .cmp(&normalize_name(&b.name))
            .then(a.billing_period.cmp(&b.billing_period))
    });
    merged
}

/// Combine two records for the same canonical key into a new, richer record.
/// No non-empty field present in either input is lost.
fn merge(a: ExtractedPlan, b: ExtractedPlan) -> ExtractedPlan {
    let (mut keep, other) = if richness(&b) > richness(&a) { (b, a) } else { (a, b) };

    if keep.features.len() < other.features.len() {
        keep.features = other.features;
    }
    if keep.included_units.len() < other.included_units.len() {
        keep.included_units = other.included_units;
    }

    let keep_price_ev = keep.evidence.price.as_deref().unwrap_or("").len();
    let other_price_ev = other.evidence.price.as_deref().unwrap_or("").len();
    if other_price_ev > keep_price_ev {
        keep.evidence.price = other.evidence.price;
    }
    if keep.evidence.name.is_none() {
        keep.evidence.name = other.evidence.name;
    }
    if keep.evidence.billing_period.is_none() {
        keep.evidence.billing_period = other.evidence.billing_period;
    }
    if keep.evidence.units.len() < other.evidence.units.len() {
        keep.evidence.units = other.evidence.units;
    }

    // Numeric amounts backfill from whichever side has them.
    keep.price_amount = keep.price_amount.or(other.price_amount);
    keep.monthly_equivalent = keep.monthly_equivalent.or(other.monthly_equivalent);
    keep.annual_billed = keep.annual_billed.or(other.annual_billed);
    keep.currency = keep.currency.or(other.currency);
    if keep.price_raw.is_empty() {
        keep.price_raw = other.price_raw;
    }

    keep
}

fn richness(plan: &ExtractedPlan) -> usize {
    plan.features.len()
        + plan.included_units.len()
        + plan.evidence.price.as_deref().unwrap_or("").len()
}
