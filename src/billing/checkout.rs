//! Stripe Checkout session creation.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

use super::config::BillingConfig;
use crate::error::ApiError;

const STRIPE_API_BASE: &str = "https://api.stripe.com";

/// Thin client for the Stripe REST API.
pub struct StripeClient {
    http: reqwest::Client,
    api_base: String,
    pub config: BillingConfig,
}

/// The slice of a Checkout Session response this service reads.
#[derive(Debug, Deserialize)]
struct CheckoutSession {
    id: String,
    url: String,
}

impl StripeClient {
    pub fn new(config: BillingConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            api_base: STRIPE_API_BASE.to_string(),
            config,
        })
    }

    /// Point the client at a different API base (tests).
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    /// Create a Checkout session for the user and return its redirect URL.
    ///
    /// The user's subject id rides along as `client_reference_id` so the
    /// completion webhook can name the account to credit.
    pub async fn create_checkout_session(&self, user_id: &str) -> Result<String, ApiError> {
        let success_url = format!("{}/payment-success", self.config.frontend_url);
        let cancel_url = format!("{}/", self.config.frontend_url);

        let params = [
            ("client_reference_id", user_id),
            ("line_items[0][price]", &self.config.price_id),
            ("line_items[0][quantity]", "1"),
            ("mode", "payment"),
            ("success_url", &success_url),
            ("cancel_url", &cancel_url),
        ];

        debug!(user_id, "creating checkout session");

        let response = self
            .http
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .basic_auth(&self.config.secret_key, None::<&str>)
            .form(&params)
            .send()
            .await
            .map_err(|e| ApiError::Upstream(format!("stripe request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(ApiError::Upstream(format!(
                "stripe returned status {}",
                response.status()
            )));
        }

        let session: CheckoutSession = response
            .json()
            .await
            .map_err(|e| ApiError::Upstream(format!("unparseable stripe response: {e}")))?;

        info!(user_id, session_id = %session.id, "checkout session created");
        Ok(session.url)
    }
}
