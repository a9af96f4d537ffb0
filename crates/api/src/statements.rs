//! HTTP client for the SQL statements endpoint.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tracing::debug;

use talkdata_core::Config;
use talkdata_runtime::{StatementExecutor, StatementRequest, StatementResponse, TransportError};

use crate::agent::Credentials;

pub struct HttpStatementExecutor {
    client: reqwest::Client,
    url: String,
    credentials: Credentials,
}

impl HttpStatementExecutor {
    pub fn new(client: reqwest::Client, url: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            client,
            url: url.into(),
            credentials,
        }
    }

    pub fn from_config(client: reqwest::Client, config: &Config) -> Self {
        Self::new(
            client,
            config.statements.url.clone(),
            Credentials {
                token: config.agent.auth_token.clone(),
                token_type: config.agent.auth_token_type.clone(),
            },
        )
    }
}

#[async_trait]
impl StatementExecutor for HttpStatementExecutor {
    async fn execute(
        &self,
        request: &StatementRequest,
    ) -> Result<StatementResponse, TransportError> {
        debug!(url = %self.url, warehouse = ?request.warehouse, "executing statement");

        let builder = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .json(request);
        let response = self
            .credentials
            .apply(builder)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        if status.is_success() {
            return serde_json::from_str(&body)
                .map_err(|e| TransportError::InvalidResponse(e.to_string()));
        }

        // Error bodies in the service's own shape go back to the caller so the
        // message can be inspected.
        match serde_json::from_str::<StatementResponse>(&body) {
            Ok(parsed) if parsed.code.is_some() && parsed.message.is_some() => {
                debug!(status = status.as_u16(), code = ?parsed.code, "statement error response");
                Ok(parsed)
            }
            _ => Err(TransportError::Api {
                status: status.as_u16(),
                message: body,
            }),
        }
    }
}
