//! Push delivery through the Expo push service.

use async_trait::async_trait;
use serde_json::{json, Value};

const EXPO_PUSH_URL: &str = "https://exp.host/--/api/v2/push/send";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Delivered,
    /// The device token is permanently invalid and should be forgotten.
    StaleToken,
    Failed(String),
}

#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn send(&self, token: &str, title: &str, body: &str, data: Value) -> PushOutcome;
}

pub struct ExpoPushGateway {
    http: reqwest::Client,
    access_token: Option<String>,
}

impl ExpoPushGateway {
    pub fn new(access_token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            access_token,
        }
    }
}

/// Interpret one Expo push ticket.
fn classify_ticket(ticket: &Value) -> PushOutcome {
    match ticket["status"].as_str() {
        Some("ok") => PushOutcome::Delivered,
        Some("error") => {
            if ticket["details"]["error"].as_str() == Some("DeviceNotRegistered") {
                PushOutcome::StaleToken
            } else {
                let message = ticket["message"].as_str().unwrap_or("push rejected");
                PushOutcome::Failed(message.to_string())
            }
        }
        _ => PushOutcome::Failed("malformed push ticket".into()),
    }
}

#[async_trait]
impl PushGateway for ExpoPushGateway {
    async fn send(&self, token: &str, title: &str, body: &str, data: Value) -> PushOutcome {
        let mut req = self.http.post(EXPO_PUSH_URL).json(&json!({
            "to": token,
            "title": title,
            "body": body,
            "data": data,
            "sound": "default",
        }));
        if let Some(access_token) = &self.access_token {
            req = req.bearer_auth(access_token);
        }

        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(e) => return PushOutcome::Failed(format!("push transport error: {}", e)),
        };
        let status = resp.status();
        let payload: Value = match resp.json().await {
            Ok(v) => v,
            Err(e) => return PushOutcome::Failed(format!("push parse error: {}", e)),
        };
        if !status.is_success() {
            return PushOutcome::Failed(format!("push service returned {}", status));
        }

        // A single message yields an object; batches yield an array.
        match &payload["data"] {
            Value::Array(tickets) => tickets
                .first()
                .map(classify_ticket)
                .unwrap_or_else(|| PushOutcome::Failed("empty push response".into())),
            ticket => classify_ticket(ticket),
        }
    }
}
