use super::fetch::PageFetcher;
use super::{anchors, collapse_whitespace};
use crate::error::PricingError;
use crate::resolve::{normalize_url, validate_url};
use std::collections::HashMap;
use std::sync::Arc;
use texting_robots::Robot;
use url::Url;

/// Well-known pricing paths, ordered by how likely they are to be the real
/// pricing page. Score decays with list position.
const CANDIDATE_PATHS: [&str; 8] = [
    "/pricing",
    "/plans",
    "/pricing-plans",
    "/price",
    "/plans-and-pricing",
    "/subscribe",
    "/premium",
    "/upgrade",
];

const LINK_KEYWORDS: [&str; 6] = ["pricing", "plans", "price", "premium", "upgrade", "subscribe"];

const MAX_CANDIDATES: usize = 5;

const ROBOTS_AGENT: &str = "PricewatchBot";

/// Discover likely pricing-page URLs for a site: same-host links whose path
/// or anchor text matches pricing keywords, merged with well-known candidate
/// paths, filtered through robots.txt, ranked, capped at five.
pub async fn discover_pricing_pages(
    fetcher: &Arc<dyn PageFetcher>,
    raw_url: &str,
) -> Result<Vec<String>, PricingError> {
    let base = normalize_url(raw_url)?;
    validate_url(&base)?;

    let mut scored: HashMap<String, i32> = HashMap::new();

    // Blind path candidates, scored by list position.
    for (i, path) in CANDIDATE_PATHS.iter().enumerate() {
        if let Ok(mut candidate) = base.join(path) {
            candidate.set_query(None);
            candidate.set_fragment(None);
            let score = 60 - (i as i32) * 5;
            scored.entry(candidate.to_string()).or_insert(score);
        }
    }

    // Links actually present on the page outrank blind probes.
    if let Ok(html) = fetcher.fetch(&base).await {
        for anchor in anchors(&html, &base) {
            let Ok(mut href) = Url::parse(&anchor.href) else { continue };
            if href.host_str() != base.host_str() {
                continue;
            }
            href.set_query(None);
            href.set_fragment(None);

            let path = href.path().to_ascii_lowercase();
            let text = collapse_whitespace(&anchor.text).to_ascii_lowercase();

            let path_hit = LINK_KEYWORDS.iter().position(|k| path.contains(k));
            let text_hit = LINK_KEYWORDS.iter().any(|k| text.contains(k));
            if path_hit.is_none() && !text_hit {
                continue;
            }

            let mut score = 70;
            if let Some(i) = path_hit {
                score += 20 - (i as i32) * 2;
            }
            if text_hit {
                score += 10;
            }
            let entry = scored.entry(href.to_string()).or_insert(0);
            *entry = (*entry).max(score);
        }
    } else {
        tracing::debug!("base page fetch failed during discovery, using path candidates only");
    }

    // Drop candidates the site's robots.txt disallows.
    if let Some(robot) = fetch_robots(fetcher, &base).await {
        scored.retain(|url, _| robot.allowed(url));
    }

    let mut ranked: Vec<(String, i32)> = scored.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(MAX_CANDIDATES);

    Ok(ranked.into_iter().map(|(url, _)| url).collect())
}

async fn fetch_robots(fetcher: &Arc<dyn PageFetcher>, base: &Url) -> Option<Robot> {
    let mut robots_url = base.clone();
    robots_url.set_path("/robots.txt");
    robots_url.set_query(None);

    let body = fetcher.fetch(&robots_url).await.ok()?;
    match Robot::new(ROBOTS_AGENT, body.as_bytes()) {
        Ok(robot) => Some(robot),
        Err(e) => {
            tracing::debug!("unparseable robots.txt at {}: {}", robots_url, e);
            None
        }
    }
}
