//! Stripe billing configuration.

/// Settings for checkout creation and webhook verification.
#[derive(Debug, Clone)]
pub struct BillingConfig {
    /// Stripe secret key (`sk_...`).
    pub secret_key: String,

    /// Webhook signing secret (`whsec_...`).
    pub webhook_secret: String,

    /// Price id of the point bundle (`price_...`).
    pub price_id: String,

    /// Frontend base URL; checkout redirects back here.
    pub frontend_url: String,

    /// Accepted clock drift for webhook signature timestamps, in seconds.
    pub signature_tolerance_secs: i64,
}

impl BillingConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.secret_key.is_empty() {
            return Err("Stripe secret key is required".to_string());
        }
        if self.webhook_secret.is_empty() {
            return Err("Stripe webhook secret is required".to_string());
        }
        if self.price_id.is_empty() {
            return Err("Stripe price id is required".to_string());
        }
        Ok(())
    }
}
