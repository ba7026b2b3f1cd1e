use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crewforge_core::config::EmailConfig;
use crewforge_core::error::Result;
use crewforge_core::traits::Tool;
use crewforge_core::types::{ToolContext, ToolResult};

use super::{exec_err, parse_input};

/// Sends a plain-text email through the configured mail API.
pub struct EmailSenderTool {
    config: EmailConfig,
    http: reqwest::Client,
}

impl EmailSenderTool {
    pub fn new(config: EmailConfig, http: reqwest::Client) -> Self {
        Self { config, http }
    }

    fn payload(&self, msg: &EmailInput) -> Value {
        json!({
            "from": self.config.from_address,
            "to": [msg.recipient],
            "subject": msg.subject,
            "text": msg.body,
        })
    }
}

#[derive(Deserialize)]
struct EmailInput {
    #[serde(alias = "to")]
    recipient: String,
    subject: String,
    body: String,
}

impl Tool for EmailSenderTool {
    fn name(&self) -> &str {
        "send_email"
    }

    fn description(&self) -> &str {
        "Sends a real email to the recipient."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "recipient": { "type": "string", "description": "Email address of the recipient" },
                "subject": { "type": "string", "description": "Email subject line" },
                "body": { "type": "string", "description": "Plain text email body content" }
            },
            "required": ["recipient", "subject", "body"]
        })
    }

    fn execute(&self, input: Value, _ctx: ToolContext) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let msg: EmailInput = parse_input(input)?;
            if !msg.recipient.contains('@') {
                return Ok(ToolResult::error(format!(
                    "'{}' is not an email address",
                    msg.recipient
                )));
            }

            let mut req = self.http.post(&self.config.api_url).json(&self.payload(&msg));
            if let Some(key) = &self.config.api_key {
                req = req.bearer_auth(key);
            }
            let resp = req.send().await.map_err(|e| exec_err(self.name(), e))?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Ok(ToolResult::error(format!(
                    "Failed to send email: HTTP {}: {}",
                    status, body
                )));
            }

            info!(recipient = %msg.recipient, "Email sent");
            Ok(ToolResult::success(format!(
                "Email sent successfully to {}",
                msg.recipient
            )))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> EmailSenderTool {
        EmailSenderTool::new(
            EmailConfig {
                api_url: "http://127.0.0.1:9/send".into(),
                api_key: None,
                from_address: "bot@example.com".into(),
            },
            reqwest::Client::new(),
        )
    }

    #[test]
    fn payload_shape() {
        let msg = EmailInput {
            recipient: "a@b.c".into(),
            subject: "Hi".into(),
            body: "Hello".into(),
        };
        let p = tool().payload(&msg);
        assert_eq!(p["from"], "bot@example.com");
        assert_eq!(p["to"], json!(["a@b.c"]));
        assert_eq!(p["text"], "Hello");
    }

    #[tokio::test]
    async fn rejects_bad_recipient() {
        let result = tool()
            .execute(
                json!({"recipient": "nobody", "subject": "s", "body": "b"}),
                ToolContext::default(),
            )
            .await
            .unwrap();
        assert!(result.is_error);
    }
}
