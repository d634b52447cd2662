pub mod discover;
pub mod fetch;

use kuchikiki::traits::TendrilSink;
use kuchikiki::{ElementData, NodeRef};
use url::Url;

/// Each embedded structured-data blob is captured verbatim up to this size.
const MAX_BLOB_CHARS: usize = 20_000;
/// Combined cap across all captured blobs.
const MAX_BLOBS_TOTAL_CHARS: usize = 60_000;

/// A fetched page split into the three channels the extractor consumes.
///
/// Hidden text matters because billing-toggle alternate states are often
/// pre-rendered but hidden, which lets the static pass see both modes without
/// a browser.
#[derive(Debug, Clone, Default)]
pub struct PageSegments {
    pub visible_text: String,
    pub hidden_text: String,
    pub structured_blobs: Vec<String>,
    pub links: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Anchor {
    pub href: String,
    pub text: String,
}

/// Partition raw markup into visible text, intentionally-hidden text, and
/// embedded structured-data blobs, and surface anchor hrefs for discovery.
pub fn segment(html: &str, base: &Url) -> PageSegments {
    let document = kuchikiki::parse_html().one(html);

    let mut visible = String::new();
    let mut hidden = String::new();
    walk_text(&document, false, &mut visible, &mut hidden);

    let structured_blobs = collect_structured_blobs(&document);
    let links = collect_anchors(&document, base)
        .into_iter()
        .map(|a| a.href)
        .collect();

    PageSegments {
        visible_text: collapse_whitespace(&visible),
        hidden_text: collapse_whitespace(&hidden),
        structured_blobs,
        links,
    }
}

/// Anchor hrefs with their display text, resolved against the base URL.
pub fn anchors(html: &str, base: &Url) -> Vec<Anchor> {
    let document = kuchikiki::parse_html().one(html);
    collect_anchors(&document, base)
}

fn walk_text(node: &NodeRef, hidden: bool, visible_out: &mut String, hidden_out: &mut String) {
    if let Some(element) = node.as_element() {
        let tag = element.name.local.to_ascii_lowercase();
        // Script payloads belong to the structured channel, never to text.
        if matches!(&*tag, "script" | "style" | "noscript" | "template" | "head") {
            return;
        }
        let hidden = hidden || element_is_hidden(element);
        for child in node.children() {
            walk_text(&child, hidden, visible_out, hidden_out);
        }
    } else if let Some(text) = node.as_text() {
        let text = text.borrow();
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            let out = if hidden { hidden_out } else { visible_out };
            out.push_str(trimmed);
            out.push(' ');
        }
    } else {
        for child in node.children() {
            walk_text(&child, hidden, visible_out, hidden_out);
        }
    }
}

fn element_is_hidden(element: &ElementData) -> bool {
    let attrs = element.attributes.borrow();

    if attrs.get("hidden").is_some() {
        return true;
    }
    if attrs.get("aria-hidden").map(|v| v.eq_ignore_ascii_case("true")) == Some(true) {
        return true;
    }
    if let Some(style) = attrs.get("style") {
        let style: String = style.chars().filter(|c| !c.is_whitespace()).collect();
        let style = style.to_ascii_lowercase();
        if style.contains("display:none") || style.contains("visibility:hidden") {
            return true;
        }
    }
    // Unselected tab panels exist in markup but are not rendered by default.
    if attrs.get("role").map(|r| r.eq_ignore_ascii_case("tabpanel")) == Some(true) {
        let unselected = attrs
            .get("data-state")
            .map(|v| v.eq_ignore_ascii_case("inactive"))
            == Some(true)
            || attrs
                .get("aria-expanded")
                .map(|v| v.eq_ignore_ascii_case("false"))
                == Some(true);
        if unselected {
            return true;
        }
    }

    false
}

/// Known script payload shapes captured verbatim: JSON-LD blocks, framework
/// hydration islands, and global state injections. These often contain exact,
/// already-structured pricing.
fn collect_structured_blobs(document: &NodeRef) -> Vec<String> {
    const STATE_MARKERS: [&str; 3] = [
        "window.__INITIAL_STATE__",
        "window.__APP_STATE__",
        "window.__NUXT__",
    ];

    let mut blobs = Vec::new();
    let mut total = 0usize;

    let scripts = match document.select("script") {
        Ok(s) => s,
        Err(()) => return blobs,
    };

    for script in scripts {
        if total >= MAX_BLOBS_TOTAL_CHARS {
            break;
        }
        let attrs = script.attributes.borrow();
        let kind = attrs.get("type").map(str::to_ascii_lowercase);
        let id = attrs.get("id").unwrap_or_default();
        let content = script.as_node().text_contents();
        let content = content.trim();
        if content.is_empty() {
            continue;
        }

        let is_ld_json = kind.as_deref() == Some("application/ld+json");
        let is_hydration = id == "__NEXT_DATA__" || kind.as_deref() == Some("application/json");
        let is_state = STATE_MARKERS.iter().any(|m| content.contains(m));

        if is_ld_json || is_hydration || is_state {
            let cap = MAX_BLOB_CHARS.min(MAX_BLOBS_TOTAL_CHARS - total);
            let blob: String = content.chars().take(cap).collect();
            total += blob.chars().count();
            blobs.push(blob);
        }
    }

    blobs
}

fn collect_anchors(document: &NodeRef, base: &Url) -> Vec<Anchor> {
    let mut anchors = Vec::new();
    let selected = match document.select("a[href]") {
        Ok(s) => s,
        Err(()) => return anchors,
    };
    for a in selected {
        let attrs = a.attributes.borrow();
        let Some(href) = attrs.get("href") else { continue };
        if href.starts_with('#') || href.starts_with("javascript:") || href.starts_with("mailto:") {
            continue;
        }
        let Ok(resolved) = base.join(href) else { continue };
        anchors.push(Anchor {
            href: resolved.to_string(),
            text: collapse_whitespace(&a.as_node().text_contents()),
        });
    }
    anchors
}

pub(crate) fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.com/pricing").unwrap()
    }

    #[test]
    fn partitions_visible_and_hidden_text() {
        let html = r#"
            <html><head><title>ignored</title></head><body>
              <h1>Pro Plan</h1>
              <div aria-hidden="true">$96 billed annually</div>
              <div style="display: none">Hidden yearly panel</div>
              <p hidden>Also hidden</p>
              <p>$12 per month</p>
              <script>var x = 1;</script>
            </body></html>"#;
        let segments = segment(html, &base());

        assert!(segments.visible_text.contains("Pro Plan"));
        assert!(segments.visible_text.contains("$12 per month"));
        assert!(!segments.visible_text.contains("billed annually"));
        assert!(!segments.visible_text.contains("ignored"));
        assert!(!segments.visible_text.contains("var x"));

        assert!(segments.hidden_text.contains("$96 billed annually"));
        assert!(segments.hidden_text.contains("Hidden yearly panel"));
        assert!(segments.hidden_text.contains("Also hidden"));
    }

    #[test]
    fn hidden_state_inherits_to_descendants() {
        let html = r#"<div aria-hidden="true"><span><b>nested secret</b></span></div><p>shown</p>"#;
        let segments = segment(html, &base());
        assert!(segments.hidden_text.contains("nested secret"));
        assert!(!segments.visible_text.contains("nested secret"));
        assert!(segments.visible_text.contains("shown"));
    }

    #[test]
    fn unselected_tab_panels_are_hidden() {
        let html = r#"
            <div role="tabpanel" data-state="inactive">Yearly: $96/yr</div>
            <div role="tabpanel">Monthly: $12/mo</div>"#;
        let segments = segment(html, &base());
        assert!(segments.hidden_text.contains("Yearly: $96/yr"));
        assert!(segments.visible_text.contains("Monthly: $12/mo"));
    }

    #[test]
    fn captures_ld_json_verbatim() {
        let html = r#"<head><script type="application/ld+json">{"@type":"Product","offers":{"price":"12.00"}}</script></head>"#;
        let segments = segment(html, &base());
        assert_eq!(segments.structured_blobs.len(), 1);
        assert!(segments.structured_blobs[0].contains(r#""price":"12.00""#));
    }

    #[test]
    fn captures_hydration_and_state_blobs() {
        let html = r#"
            <script id="__NEXT_DATA__" type="application/json">{"props":{"plans":[]}}</script>
            <script>window.__INITIAL_STATE__ = {"pricing": true};</script>
            <script>console.log("not captured");</script>"#;
        let segments = segment(html, &base());
        assert_eq!(segments.structured_blobs.len(), 2);
    }

    #[test]
    fn resolves_relative_links() {
        let html = r##"<a href="/plans">Plans</a><a href="#top">Top</a><a href="mailto:x@y.z">Mail</a>"##;
        let segments = segment(html, &base());
        assert_eq!(segments.links, vec!["https://example.com/plans"]);
    }
}
