//! Outbound calls to the subscription billing provider (Stripe).

use anyhow::{anyhow, Context};
use async_trait::async_trait;

const STRIPE_API: &str = "https://api.stripe.com/v1";

/// What registration needs from a completed web checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    pub customer_id: Option<String>,
    pub subscription_id: Option<String>,
    pub complete: bool,
}

#[async_trait]
pub trait BillingProvider: Send + Sync {
    async fn cancel_subscription(&self, subscription_id: &str) -> anyhow::Result<()>;

    /// Credit a customer's balance; applied to their next invoice.
    async fn credit_customer(
        &self,
        customer_id: &str,
        amount_cents: i64,
        description: &str,
    ) -> anyhow::Result<()>;

    async fn checkout_session(&self, session_id: &str) -> anyhow::Result<CheckoutSession>;
}

pub struct StripeClient {
    http: reqwest::Client,
    secret_key: String,
}

impl StripeClient {
    pub fn new(secret_key: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            secret_key,
        }
    }

    fn key(&self) -> anyhow::Result<&str> {
        if self.secret_key.is_empty() {
            return Err(anyhow!("Stripe not configured"));
        }
        Ok(&self.secret_key)
    }

    async fn read(resp: reqwest::Response) -> anyhow::Result<serde_json::Value> {
        let status = resp.status();
        let body: serde_json::Value = resp.json().await.context("Stripe parse error")?;
        if !status.is_success() {
            let message = body["error"]["message"].as_str().unwrap_or("unknown error");
            return Err(anyhow!("Stripe returned {}: {}", status, message));
        }
        Ok(body)
    }
}

#[async_trait]
impl BillingProvider for StripeClient {
    async fn cancel_subscription(&self, subscription_id: &str) -> anyhow::Result<()> {
        let resp = self
            .http
            .delete(format!("{}/subscriptions/{}", STRIPE_API, subscription_id))
            .bearer_auth(self.key()?)
            .send()
            .await
            .context("Stripe error")?;

        Self::read(resp).await?;
        Ok(())
    }

    async fn credit_customer(
        &self,
        customer_id: &str,
        amount_cents: i64,
        description: &str,
    ) -> anyhow::Result<()> {
        // Negative balance transactions are credits.
        let amount = (-amount_cents.abs()).to_string();
        let resp = self
            .http
            .post(format!(
                "{}/customers/{}/balance_transactions",
                STRIPE_API, customer_id
            ))
            .bearer_auth(self.key()?)
            .form(&[
                ("amount", amount.as_str()),
                ("currency", "usd"),
                ("description", description),
            ])
            .send()
            .await
            .context("Stripe error")?;

        Self::read(resp).await?;
        Ok(())
    }

    async fn checkout_session(&self, session_id: &str) -> anyhow::Result<CheckoutSession> {
        let resp = self
            .http
            .get(format!("{}/checkout/sessions/{}", STRIPE_API, session_id))
            .bearer_auth(self.key()?)
            .send()
            .await
            .context("Stripe error")?;

        let session = Self::read(resp).await?;
        Ok(CheckoutSession {
            customer_id: session["customer"].as_str().map(String::from),
            subscription_id: session["subscription"].as_str().map(String::from),
            complete: session["status"].as_str() == Some("complete"),
        })
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records calls; optionally fails every one of them.
    #[derive(Default)]
    pub struct FakeBilling {
        fail: bool,
        canceled: Mutex<Vec<String>>,
        credits: Mutex<Vec<(String, i64)>>,
        sessions: Mutex<Vec<(String, CheckoutSession)>>,
    }

    impl FakeBilling {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub fn with_session(self, session_id: &str, session: CheckoutSession) -> Self {
            self.sessions
                .lock()
                .unwrap()
                .push((session_id.to_string(), session));
            self
        }

        pub fn canceled(&self) -> Vec<String> {
            self.canceled.lock().unwrap().clone()
        }

        pub fn credits(&self) -> Vec<(String, i64)> {
            self.credits.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BillingProvider for FakeBilling {
        async fn cancel_subscription(&self, subscription_id: &str) -> anyhow::Result<()> {
            if self.fail {
                return Err(anyhow!("stripe unavailable"));
            }
            self.canceled.lock().unwrap().push(subscription_id.to_string());
            Ok(())
        }

        async fn credit_customer(
            &self,
            customer_id: &str,
            amount_cents: i64,
            _description: &str,
        ) -> anyhow::Result<()> {
            if self.fail {
                return Err(anyhow!("stripe unavailable"));
            }
            self.credits
                .lock()
                .unwrap()
                .push((customer_id.to_string(), amount_cents));
            Ok(())
        }

        async fn checkout_session(&self, session_id: &str) -> anyhow::Result<CheckoutSession> {
            self.sessions
                .lock()
                .unwrap()
                .iter()
                .find(|(id, _)| id == session_id)
                .map(|(_, s)| s.clone())
                .ok_or_else(|| anyhow!("No such checkout session: {}", session_id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfigured_client_refuses_calls() {
        let client = StripeClient::new(String::new());
        let err = client.cancel_subscription("sub_123").await.unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }
}
