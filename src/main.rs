//! Storyboard Gateway
//!
//! HTTP service backing the storyboard app: verifies externally issued
//! JWTs against the identity provider's JWKS endpoint (with a persisted,
//! TTL-bounded key cache), provisions local users on first sight, meters
//! generations against a point balance, credits Stripe purchases, and
//! proxies the storyboard AI endpoints to a DashScope-compatible API.

mod auth;
mod billing;
mod error;
mod studio;
mod users;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::FromRef;
use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use auth::{Authenticator, FileCacheStore, KeyResolver};
use billing::{BillingConfig, StripeClient};
use studio::{StudioClient, StudioConfig};
use users::UserStore;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "storyboard-gateway")]
#[command(about = "Account, billing, and AI-proxy gateway for the storyboard app")]
struct Args {
    /// Address to bind the HTTP server to
    #[arg(long, default_value = "0.0.0.0:5001", env = "BIND_ADDR")]
    bind: SocketAddr,

    /// JWKS endpoint of the identity provider
    #[arg(long, env = "JWKS_URL")]
    jwks_url: String,

    /// Expected token audience
    #[arg(long, default_value = "authenticated", env = "JWT_AUDIENCE")]
    audience: String,

    /// Path of the persisted JWKS cache
    #[arg(long, default_value = "jwks_cache.json", env = "JWKS_CACHE_FILE")]
    jwks_cache: PathBuf,

    /// JWKS cache time-to-live in seconds
    #[arg(long, default_value_t = 3600, env = "JWKS_CACHE_TTL_SECS")]
    jwks_cache_ttl_secs: u64,

    /// Path of the user database
    #[arg(long, default_value = "users.redb", env = "USER_DB_PATH")]
    user_db: PathBuf,

    /// Starting point balance for newly registered users
    #[arg(long, default_value_t = 10, env = "STARTING_POINTS")]
    starting_points: i64,

    /// Points deducted per generation
    #[arg(long, default_value_t = 1, env = "COST_PER_GENERATION")]
    cost_per_generation: i64,

    /// Points granted per completed purchase
    #[arg(long, default_value_t = 10, env = "POINTS_PER_PURCHASE")]
    points_per_purchase: i64,

    /// Stripe secret key
    #[arg(long, env = "STRIPE_SECRET_KEY")]
    stripe_secret_key: String,

    /// Stripe webhook signing secret
    #[arg(long, env = "STRIPE_WEBHOOK_SECRET")]
    stripe_webhook_secret: String,

    /// Stripe price id of the point bundle
    #[arg(long, env = "STRIPE_PRICE_ID")]
    stripe_price_id: String,

    /// Frontend base URL for checkout redirects
    #[arg(long, default_value = "http://localhost:3000", env = "FRONTEND_URL")]
    frontend_url: String,

    /// Webhook signature timestamp tolerance in seconds
    #[arg(long, default_value_t = 300, env = "WEBHOOK_TOLERANCE_SECS")]
    webhook_tolerance_secs: i64,

    /// Model provider API key
    #[arg(long, env = "DASHSCOPE_API_KEY")]
    dashscope_api_key: String,

    /// Base URL of the OpenAI-compatible chat endpoint
    #[arg(
        long,
        default_value = "https://dashscope.aliyuncs.com/compatible-mode/v1",
        env = "DASHSCOPE_CHAT_BASE_URL"
    )]
    dashscope_chat_base_url: String,

    /// URL of the multimodal generation endpoint
    #[arg(
        long,
        default_value = "https://dashscope.aliyuncs.com/api/v1/services/aigc/multimodal-generation/generation",
        env = "DASHSCOPE_MULTIMODAL_URL"
    )]
    dashscope_multimodal_url: String,

    /// Model used for story segmentation
    #[arg(long, default_value = "qwen-plus", env = "STORY_MODEL")]
    story_model: String,

    /// Model used for character image analysis
    #[arg(long, default_value = "qwen3-vl-plus", env = "VISION_MODEL")]
    vision_model: String,

    /// Model used for image generation
    #[arg(long, default_value = "qwen-image-plus", env = "IMAGE_MODEL")]
    image_model: String,

    /// Enable verbose logging
    #[arg(short, long, env = "GATEWAY_VERBOSE")]
    verbose: bool,
}

/// Point economics shared by the profile, debit, and webhook handlers.
#[derive(Debug, Clone)]
pub struct Economy {
    pub cost_per_generation: i64,
    pub points_per_purchase: i64,
}

/// Shared application state.
#[derive(Clone, FromRef)]
pub struct AppState {
    pub auth: Arc<Authenticator>,
    pub users: Arc<UserStore>,
    pub stripe: Arc<StripeClient>,
    pub studio: Arc<StudioClient>,
    pub economy: Economy,
}

/// Build the route table.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/breakdown-story", post(studio::handler::breakdown_story))
        .route("/api/analyze-character", post(studio::handler::analyze_character))
        .route("/api/generate-image", post(studio::handler::generate_image))
        .route("/api/user/profile", get(users::handler::profile))
        .route("/api/generate", post(users::handler::generate))
        .route(
            "/api/create-checkout-session",
            post(billing::handler::create_checkout_session),
        )
        .route("/webhook/stripe", post(billing::handler::stripe_webhook))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("{}={}", env!("CARGO_CRATE_NAME"), log_level))
        .json()
        .init();

    info!("Starting storyboard gateway");

    let billing_config = BillingConfig {
        secret_key: args.stripe_secret_key.clone(),
        webhook_secret: args.stripe_webhook_secret.clone(),
        price_id: args.stripe_price_id.clone(),
        frontend_url: args.frontend_url.clone(),
        signature_tolerance_secs: args.webhook_tolerance_secs,
    };
    if let Err(e) = billing_config.validate() {
        anyhow::bail!("billing config validation failed: {e}");
    }

    let studio_config = StudioConfig {
        api_key: args.dashscope_api_key.clone(),
        chat_base_url: args.dashscope_chat_base_url.clone(),
        multimodal_url: args.dashscope_multimodal_url.clone(),
        story_model: args.story_model.clone(),
        vision_model: args.vision_model.clone(),
        image_model: args.image_model.clone(),
    };
    if let Err(e) = studio_config.validate() {
        anyhow::bail!("studio config validation failed: {e}");
    }

    let users = Arc::new(
        UserStore::open(args.user_db.clone(), args.starting_points)
            .context("Failed to open user store")?,
    );
    info!(path = ?args.user_db, "user store initialized");

    let cache_store = Arc::new(FileCacheStore::new(args.jwks_cache.clone()));
    let resolver = KeyResolver::new(cache_store, args.jwks_url.clone(), args.jwks_cache_ttl_secs)
        .context("Failed to create key resolver")?;
    let auth = Arc::new(Authenticator::new(
        resolver,
        args.audience.clone(),
        users.clone(),
    ));
    info!(
        jwks_url = %args.jwks_url,
        audience = %args.audience,
        cache = ?args.jwks_cache,
        "token verification configured"
    );

    let state = AppState {
        auth,
        users,
        stripe: Arc::new(StripeClient::new(billing_config)?),
        studio: Arc::new(StudioClient::new(studio_config)?),
        economy: Economy {
            cost_per_generation: args.cost_per_generation,
            points_per_purchase: args.points_per_purchase,
        },
    };

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("Failed to bind {}", args.bind))?;
    info!(addr = %args.bind, "listening");

    axum::serve(listener, router(state))
        .await
        .context("Server error")?;

    Ok(())
}
