#![deny(clippy::all)]

pub use crate::dedup::{canonical_key, dedup_plans};
pub use crate::error::PricingError;
pub use crate::pipeline::{PipelineConfig, PricingPipeline};
pub use crate::plan::*;
pub use crate::store::{save_plans, PgPlanStore, PlanStore};

pub mod browser;
pub mod dedup;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod plan;
pub mod resolve;
pub mod segment;
pub mod store;
pub mod toggle;

pub use serde::{Deserialize, Serialize};
