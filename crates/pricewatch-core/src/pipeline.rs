use crate::browser::{dynamic, BrowserEngine};
use crate::dedup::dedup_plans;
use crate::error::PricingError;
use crate::llm::extractor::PlanExtractor;
use crate::llm::CompletionClient;
use crate::plan::{ExtractedPlan, PricingExtractResult, Warning};
use crate::resolve::{normalize_url, validate_url};
use crate::segment::fetch::PageFetcher;
use crate::segment::{discover, segment};
use crate::toggle::detect_billing_toggle;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Static visible text shorter than this is treated as an SPA shell and
    /// sent straight to dynamic extraction without a static LLM pass.
    pub min_static_text_chars: usize,
    /// Overall deadline for the browser-driven sub-pipeline.
    pub dynamic_deadline: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_static_text_chars: 200,
            dynamic_deadline: dynamic::DYNAMIC_DEADLINE,
        }
    }
}

/// Sequences the extraction stages: static fetch and segmentation, static
/// LLM pass, toggle detection, conditional browser pass, snapshot LLM pass,
/// dedup. Warnings accumulate across stages; dynamic failures degrade to the
/// best static result.
pub struct PricingPipeline {
    fetcher: Arc<dyn PageFetcher>,
    extractor: PlanExtractor,
    browser: Option<Arc<dyn BrowserEngine>>,
    config: PipelineConfig,
}

impl PricingPipeline {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        completion: Arc<dyn CompletionClient>,
        browser: Option<Arc<dyn BrowserEngine>>,
    ) -> Self {
        Self::with_config(fetcher, completion, browser, PipelineConfig::default())
    }

    pub fn with_config(
        fetcher: Arc<dyn PageFetcher>,
        completion: Arc<dyn CompletionClient>,
        browser: Option<Arc<dyn BrowserEngine>>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            fetcher,
            extractor: PlanExtractor::new(completion),
            browser,
            config,
        }
    }

    /// Rank likely pricing-page URLs for a site, up to five.
    pub async fn discover_pricing_page(&self, url: &str) -> Result<Vec<String>, PricingError> {
        discover::discover_pricing_pages(&self.fetcher, url).await
    }

    /// Full extraction over a live URL.
    pub async fn extract_pricing(&self, raw_url: &str) -> Result<PricingExtractResult, PricingError> {
        let url = normalize_url(raw_url)?;
        validate_url(&url)?;

        let html = self
            .fetcher
            .fetch(&url)
            .await
            .map_err(|e| PricingError::Fetch(e.to_string()))?;
        let segments = segment(&html, &url);

        let mut warnings: Vec<Warning> = Vec::new();
        let mut static_plans: Vec<ExtractedPlan> = Vec::new();

        let render_required =
            segments.visible_text.trim().len() < self.config.min_static_text_chars;

        if render_required {
            tracing::info!(
                "visible text is {} chars, treating {} as an SPA shell",
                segments.visible_text.trim().len(),
                url
            );
        } else {
            match self.extractor.extract_static(&segments).await {
                Ok(extraction) => {
                    static_plans = dedup_plans(extraction.plans);
                    warnings.extend(extraction.warnings);
                }
                Err(e) => {
                    tracing::warn!("static extraction pass failed: {}", e);
                    warnings.push(Warning::ParseError);
                }
            }
        }

        let static_periods = PricingExtractResult::periods_of(&static_plans);
        let toggle_detected = detect_billing_toggle(&segments.visible_text, &html);
        let needs_dynamic = render_required || (toggle_detected && static_periods.len() < 2);

        let mut chosen = static_plans;
        let mut render_used = false;

        if needs_dynamic {
            match self.run_dynamic(url.as_str()).await {
                Ok((dynamic_plans, dynamic_warnings)) => {
                    render_used = true;
                    warnings.extend(dynamic_warnings);

                    // Prefer the dynamic result only when it is strictly
                    // better than what the static pass already produced.
                    let dynamic_periods = PricingExtractResult::periods_of(&dynamic_plans);
                    let current_periods = PricingExtractResult::periods_of(&chosen);
                    if dynamic_plans.len() > chosen.len()
                        || dynamic_periods.len() > current_periods.len()
                    {
                        chosen = dynamic_plans;
                    }
                }
                Err(e) => {
                    tracing::warn!("dynamic extraction failed, falling back to static: {}", e);
                    warnings.push(Warning::RenderFailed);
                }
            }
        }

        let plans = dedup_plans(chosen);
        let billing_periods = PricingExtractResult::periods_of(&plans);

        Ok(PricingExtractResult {
            plans,
            billing_periods,
            render_required,
            render_used,
            warnings,
        })
    }

    /// Pasted-text fallback: no fetch, no browser, same labeling convention
    /// as snapshot extraction.
    pub async fn extract_from_text(
        &self,
        monthly_text: Option<&str>,
        yearly_text: Option<&str>,
    ) -> Result<PricingExtractResult, PricingError> {
        if monthly_text.map_or(true, |t| t.trim().is_empty())
            && yearly_text.map_or(true, |t| t.trim().is_empty())
        {
            return Err(PricingError::ExtractionFailed("no text provided".into()));
        }

        let extraction = self.extractor.extract_pasted(monthly_text, yearly_text).await?;
        let plans = dedup_plans(extraction.plans);
        let billing_periods = PricingExtractResult::periods_of(&plans);

        Ok(PricingExtractResult {
            plans,
            billing_periods,
            render_required: false,
            render_used: false,
            warnings: extraction.warnings,
        })
    }

    async fn run_dynamic(
        &self,
        url: &str,
    ) -> anyhow::Result<(Vec<ExtractedPlan>, Vec<Warning>)> {
        let Some(engine) = &self.browser else {
            anyhow::bail!("no browser engine configured");
        };

        // The page guard tears the browser context down when this scope ends,
        // including on deadline or caller cancellation.
        let page = engine.open_page().await?;
        let capture = tokio::time::timeout(
            self.config.dynamic_deadline,
            dynamic::extract(page.as_ref(), url),
        )
        .await
        .map_err(|_| anyhow::anyhow!("dynamic extraction deadline exceeded"))??;

        let mut warnings = capture.warnings.clone();
        match self.extractor.extract_snapshots(&capture.snapshots).await {
            Ok(extraction) => {
                warnings.extend(extraction.warnings);
                Ok((dedup_plans(extraction.plans), warnings))
            }
            Err(e) => {
                // Terminal for this pass only; a static result may exist.
                tracing::warn!("snapshot extraction pass failed: {}", e);
                warnings.push(Warning::ParseError);
                Ok((Vec::new(), warnings))
            }
        }
    }
}
