use axum::{
    extract::{Json, Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use deadpool_redis::redis::AsyncCommands;
use pricewatch_core::browser::{BrowserEngine, HeadlessBrowser};
use pricewatch_core::llm::OpenAiClient;
use pricewatch_core::segment::fetch::HttpFetcher;
use pricewatch_core::store::{save_plans, PgPlanStore, PlanStore};
use pricewatch_core::{ExtractedPlan, PricingExtractResult, PricingPipeline};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pricewatch_api=debug,pricewatch_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".into());

    let llm_api_key = std::env::var("LLM_API_KEY").expect("LLM_API_KEY must be set");
    let llm_base_url =
        std::env::var("LLM_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into());
    let llm_model = std::env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());

    // Try to launch a browser, but don't fail if it's not available: the
    // pipeline degrades to static-only extraction.
    let browser: Option<Arc<dyn BrowserEngine>> = match HeadlessBrowser::launch().await {
        Ok(b) => Some(Arc::new(b)),
        Err(e) => {
            tracing::warn!("Failed to launch headless browser: {}", e);
            None
        }
    };

    let pipeline = Arc::new(PricingPipeline::new(
        Arc::new(HttpFetcher::new()),
        Arc::new(OpenAiClient::new(llm_base_url, llm_api_key, llm_model)),
        browser,
    ));

    // Shared Redis pool for request rate limiting.
    let mut cfg = deadpool_redis::Config::default();
    cfg.url = Some(redis_url);
    let redis_pool = cfg
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))
        .expect("Failed to create Redis pool");

    let database_url = std::env::var("DATABASE_URL").ok();
    let store = if let Some(url) = database_url {
        let pg_pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .expect("Failed to connect to Postgres");

        sqlx::migrate!("../../crates/pricewatch-core/migrations")
            .run(&pg_pool)
            .await
            .expect("Failed to run migrations");

        Some(Arc::new(PgPlanStore::new(pg_pool)))
    } else {
        tracing::warn!("DATABASE_URL not set, extracted plans will not be persisted");
        None
    };

    let app_state = Arc::new(AppState {
        pipeline,
        store,
        redis_pool,
    });

    let app = Router::new()
        .route("/health", get(health))
        .nest(
            "/v1",
            Router::new()
                .route("/discover", post(discover))
                .route("/extract", post(extract))
                .route("/extract-text", post(extract_text))
                .route("/plans/:owner", get(get_plans))
                .layer(middleware::from_fn_with_state(app_state.clone(), rate_limit))
                .layer(middleware::from_fn(auth)),
        )
        .with_state(app_state);

    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".into());
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    tracing::info!("listening on {}", listener.local_addr().unwrap());
    axum::serve(listener, app).await.unwrap();
}

async fn health() -> &'static str {
    "OK"
}

async fn rate_limit(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let api_key = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("anonymous");

    let mut conn = state
        .redis_pool
        .get()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let key = format!("pricewatch:ratelimit:{}", api_key);

    // Simple fixed window rate limiting: 60 requests per minute.
    let count: u32 = conn
        .incr(&key, 1)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    if count == 1 {
        let _: () = conn
            .expire(&key, 60)
            .await
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    }

    if count > 60 {
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }

    Ok(next.run(req).await)
}

async fn auth(req: Request, next: Next) -> Result<Response, StatusCode> {
    let api_key = std::env::var("API_KEY").ok();

    // If API_KEY is not set, allow all requests (for development)
    if api_key.is_none() {
        return Ok(next.run(req).await);
    }

    let api_key = api_key.unwrap();
    let auth_header = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok());

    if let Some(auth_header) = auth_header {
        if auth_header == format!("Bearer {}", api_key) {
            return Ok(next.run(req).await);
        }
    }

    Err(StatusCode::UNAUTHORIZED)
}

struct AppState {
    pipeline: Arc<PricingPipeline>,
    store: Option<Arc<PgPlanStore>>,
    redis_pool: deadpool_redis::Pool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }

    fn err(error: impl ToString) -> Json<Self> {
        Json(Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiscoverRequest {
    url: String,
}

async fn discover(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DiscoverRequest>,
) -> Json<ApiResponse<Vec<String>>> {
    match state.pipeline.discover_pricing_page(&req.url).await {
        Ok(candidates) => ApiResponse::ok(candidates),
        Err(e) => ApiResponse::err(e),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtractRequest {
    url: String,
    owner_id: Option<String>,
}

async fn extract(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ExtractRequest>,
) -> Json<ApiResponse<PricingExtractResult>> {
    let result = match state.pipeline.extract_pricing(&req.url).await {
        Ok(result) => result,
        Err(e) => return ApiResponse::err(e),
    };

    if let (Some(owner_id), Some(store)) = (&req.owner_id, &state.store) {
        match save_plans(store.as_ref(), owner_id, &result.plans).await {
            Ok(count) => tracing::info!("saved {} plans for owner {}", count, owner_id),
            Err(e) => tracing::error!("failed to save plans for owner {}: {}", owner_id, e),
        }
    }

    ApiResponse::ok(result)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtractTextRequest {
    monthly_text: Option<String>,
    yearly_text: Option<String>,
}

async fn extract_text(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ExtractTextRequest>,
) -> Json<ApiResponse<PricingExtractResult>> {
    match state
        .pipeline
        .extract_from_text(req.monthly_text.as_deref(), req.yearly_text.as_deref())
        .await
    {
        Ok(result) => ApiResponse::ok(result),
        Err(e) => ApiResponse::err(e),
    }
}

async fn get_plans(
    State(state): State<Arc<AppState>>,
    Path(owner): Path<String>,
) -> Json<ApiResponse<Vec<ExtractedPlan>>> {
    let Some(store) = &state.store else {
        return ApiResponse::err("plan storage is not configured");
    };

    match store.find_by_owner(&owner).await {
        Ok(plans) => ApiResponse::ok(plans),
        Err(e) => ApiResponse::err(e),
    }
}
