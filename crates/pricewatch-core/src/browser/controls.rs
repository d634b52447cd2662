use serde::{Deserialize, Serialize};

/// Keyword affinity weights: a substring hit is worth more than a fuzzy
/// near-match, and `role="tab"` elements get a confidence bonus.
const SUBSTRING_WEIGHT: f32 = 2.0;
const FUZZY_WEIGHT: f32 = 1.0;
const TAB_BONUS: f32 = 1.5;
const FUZZY_MIN: f64 = 0.85;

const MONTHLY_KEYWORDS: [&str; 4] = ["monthly", "month", "/mo", "per mo"];
const YEARLY_KEYWORDS: [&str; 6] = ["annually", "annual", "yearly", "year", "/yr", "per yr"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlKind {
    Tab,
    Button,
    Label,
    Switch,
}

/// A normalized clickable candidate enumerated from the rendered DOM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateControl {
    pub selector: String,
    pub label: String,
    pub kind: ControlKind,
}

/// A scored toggle candidate. Transient, produced only during dynamic
/// extraction.
#[derive(Debug, Clone)]
pub struct ToggleControl {
    pub selector: String,
    pub label: String,
    pub kind: ControlKind,
    pub monthly_score: f32,
    pub yearly_score: f32,
}

/// Score every candidate against both keyword sets and pick the best monthly
/// and best yearly control independently. A control whose score is higher for
/// one direction is never selected for the other; ties between directions
/// disqualify the control for both.
pub fn score_controls(
    candidates: &[CandidateControl],
) -> (Option<ToggleControl>, Option<ToggleControl>) {
    let scored: Vec<ToggleControl> = candidates.iter().map(score_one).collect();

    let monthly = scored
        .iter()
        .filter(|c| c.monthly_score > 0.0 && c.monthly_score > c.yearly_score)
        .max_by(|a, b| a.monthly_score.total_cmp(&b.monthly_score))
        .cloned();

    let yearly = scored
        .iter()
        .filter(|c| c.yearly_score > 0.0 && c.yearly_score > c.monthly_score)
        .max_by(|a, b| a.yearly_score.total_cmp(&b.yearly_score))
        .cloned();

    (monthly, yearly)
}

fn score_one(candidate: &CandidateControl) -> ToggleControl {
    let label = candidate.label.to_ascii_lowercase();
    let mut monthly = direction_score(&label, &MONTHLY_KEYWORDS);
    let mut yearly = direction_score(&label, &YEARLY_KEYWORDS);

    if candidate.kind == ControlKind::Tab {
        if monthly > 0.0 {
            monthly += TAB_BONUS;
        }
        if yearly > 0.0 {
            yearly += TAB_BONUS;
        }
    }

    ToggleControl {
        selector: candidate.selector.clone(),
        label: candidate.label.clone(),
        kind: candidate.kind,
        monthly_score: monthly,
        yearly_score: yearly,
    }
}

fn direction_score(label: &str, keywords: &[&str]) -> f32 {
    let mut score = 0.0;
    for keyword in keywords {
        if label.contains(keyword) {
            score += SUBSTRING_WEIGHT;
        }
    }
    if score == 0.0 {
        // Near-misses like "anually" or single-word labels still get partial
        // credit via string similarity.
        let best = keywords
            .iter()
            .map(|k| strsim::jaro(label, k))
            .fold(0.0_f64, f64::max);
        if best >= FUZZY_MIN {
            score += FUZZY_WEIGHT;
        }
    }
    score
}
