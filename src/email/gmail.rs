use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::email::{EmailGateway, InboundMessage};
use crate::error::EmailError;

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
const MAX_RESULTS: u32 = 10;

pub struct GmailConfig {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    pub poll_query: String,
}

/// Gmail REST gateway. Access tokens are obtained through the refresh-token
/// flow and cached until shortly before expiry.
pub struct GmailClient {
    http: reqwest::Client,
    config: GmailConfig,
    token: Mutex<Option<(String, Instant)>>,
}

impl GmailClient {
    pub fn new(config: GmailConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            token: Mutex::new(None),
        }
    }

    async fn access_token(&self) -> Result<String, EmailError> {
        let mut cached = self.token.lock().await;
        if let Some((token, expires)) = cached.as_ref() {
            if Instant::now() < *expires {
                return Ok(token.clone());
            }
        }

        let response = self
            .http
            .post(TOKEN_URL)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("refresh_token", self.config.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(EmailError::Api(format!(
                "token refresh failed with {}",
                response.status()
            )));
        }

        let body: Value = response.json().await?;
        let token = body["access_token"]
            .as_str()
            .ok_or_else(|| EmailError::Api("token response missing access_token".to_string()))?
            .to_string();
        let expires_in = body["expires_in"].as_u64().unwrap_or(3600);

        // refresh a minute early
        let expires = Instant::now() + Duration::from_secs(expires_in.saturating_sub(60));
        *cached = Some((token.clone(), expires));
        Ok(token)
    }

    async fn get(&self, url: &str) -> Result<Value, EmailError> {
        self.get_with_query(url, &[]).await
    }

    async fn get_with_query(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<Value, EmailError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .get(url)
            .query(query)
            .bearer_auth(token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(EmailError::Api(format!(
                "GET {url} returned {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }

    async fn post(&self, url: &str, body: Value) -> Result<(), EmailError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(EmailError::Api(format!(
                "POST {url} returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Pull the sender address out of the `From:` header, handling both
/// `Name <email>` and bare-address forms.
pub(crate) fn extract_sender(message: &Value) -> Option<String> {
    let headers = message["payload"]["headers"].as_array()?;
    let from = headers.iter().find_map(|header| {
        let name = header["name"].as_str()?;
        if name.eq_ignore_ascii_case("from") {
            header["value"].as_str()
        } else {
            None
        }
    })?;

    let address = match (from.find('<'), from.find('>')) {
        (Some(start), Some(end)) if start < end => &from[start + 1..end],
        _ => from.split_whitespace().find(|token| token.contains('@'))?,
    };
    Some(address.trim().to_lowercase())
}

/// Decode the first text/plain part of the message body.
pub(crate) fn extract_body(message: &Value) -> Option<String> {
    let payload = &message["payload"];

    let decode = |data: &Value| {
        data.as_str()
            .and_then(|raw| URL_SAFE_NO_PAD.decode(raw.trim_end_matches('=')).ok())
            .and_then(|bytes| String::from_utf8(bytes).ok())
    };

    if let Some(parts) = payload["parts"].as_array() {
        for part in parts {
            if part["mimeType"].as_str() == Some("text/plain") {
                if let Some(text) = decode(&part["body"]["data"]) {
                    return Some(text);
                }
            }
        }
    }

    decode(&payload["body"]["data"])
}

fn encode_rfc822(to: &str, subject: &str, body: &str, in_reply_to: Option<&str>) -> String {
    let mut lines = vec![
        format!("To: {to}"),
        format!("Subject: {subject}"),
        "MIME-Version: 1.0".to_string(),
        "Content-Type: text/plain; charset=utf-8".to_string(),
    ];
    if let Some(id) = in_reply_to {
        lines.push(format!("In-Reply-To: {id}"));
        lines.push(format!("References: {id}"));
    }
    lines.push(String::new());
    lines.push(body.to_string());

    URL_SAFE_NO_PAD.encode(lines.join("\r\n"))
}

#[async_trait]
impl EmailGateway for GmailClient {
    async fn poll_new_messages(&self) -> Result<Vec<InboundMessage>, EmailError> {
        let max_results = MAX_RESULTS.to_string();
        let list = self
            .get_with_query(
                &format!("{API_BASE}/messages"),
                &[
                    ("q", self.config.poll_query.as_str()),
                    ("maxResults", max_results.as_str()),
                ],
            )
            .await?;

        let ids: Vec<String> = list["messages"]
            .as_array()
            .map(|messages| {
                messages
                    .iter()
                    .filter_map(|m| m["id"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let fetches = ids.iter().map(|id| {
            let url = format!("{API_BASE}/messages/{id}?format=full");
            async move { self.get(&url).await }
        });
        let details = futures::future::join_all(fetches).await;

        let mut messages = Vec::with_capacity(ids.len());
        for (id, detail) in ids.into_iter().zip(details) {
            match detail {
                Ok(message) => messages.push(InboundMessage {
                    sender: extract_sender(&message),
                    body: extract_body(&message),
                    id,
                }),
                Err(err) => tracing::error!("failed to fetch message {id}: {err}"),
            }
        }
        Ok(messages)
    }

    async fn mark_read(&self, id: &str) -> Result<(), EmailError> {
        self.post(
            &format!("{API_BASE}/messages/{id}/modify"),
            json!({ "removeLabelIds": ["UNREAD"] }),
        )
        .await
    }

    async fn trash(&self, id: &str) -> Result<(), EmailError> {
        self.post(&format!("{API_BASE}/messages/{id}/trash"), json!({}))
            .await
    }

    async fn send_reply(
        &self,
        to: &str,
        subject: &str,
        body: &str,
        in_reply_to: Option<&str>,
    ) -> Result<(), EmailError> {
        let raw = encode_rfc822(to, subject, body, in_reply_to);
        self.post(&format!("{API_BASE}/messages/send"), json!({ "raw": raw }))
            .await?;
        tracing::info!("sent reply to {to}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bracketed_sender() {
        let message = json!({
            "payload": { "headers": [
                { "name": "From", "value": "Alice Example <Alice@X.com>" }
            ]}
        });
        assert_eq!(extract_sender(&message), Some("alice@x.com".to_string()));
    }

    #[test]
    fn extracts_bare_sender() {
        let message = json!({
            "payload": { "headers": [
                { "name": "from", "value": "bob@x.com" }
            ]}
        });
        assert_eq!(extract_sender(&message), Some("bob@x.com".to_string()));
    }

    #[test]
    fn extracts_plain_text_part() {
        let data = URL_SAFE_NO_PAD.encode("send 5 PYUSD to c@x.com");
        let message = json!({
            "payload": { "parts": [
                { "mimeType": "text/html", "body": { "data": "ignored" } },
                { "mimeType": "text/plain", "body": { "data": data } }
            ]}
        });
        assert_eq!(
            extract_body(&message),
            Some("send 5 PYUSD to c@x.com".to_string())
        );
    }

    #[test]
    fn falls_back_to_top_level_body() {
        let data = URL_SAFE_NO_PAD.encode("balance");
        let message = json!({ "payload": { "body": { "data": data } } });
        assert_eq!(extract_body(&message), Some("balance".to_string()));
    }

    #[test]
    fn missing_body_yields_none() {
        let message = json!({ "payload": {} });
        assert_eq!(extract_body(&message), None);
    }

    #[test]
    fn reply_headers_thread_the_conversation() {
        let raw = encode_rfc822("a@x.com", "subject", "hello", Some("<msg-1>"));
        let decoded = String::from_utf8(URL_SAFE_NO_PAD.decode(raw).unwrap()).unwrap();
        assert!(decoded.contains("In-Reply-To: <msg-1>"));
        assert!(decoded.contains("References: <msg-1>"));
        assert!(decoded.ends_with("hello"));
    }
}
