//! Built-in HTTP Investigator.

use crate::analysis::{Finding, GenerationError, Investigator};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct FindingsResponse {
    #[serde(default)]
    findings: Vec<Finding>,
}

/// Queries `GET {base_url}/incidents/{id}/findings`. A 404 means the tool
/// knows nothing about the incident.
pub struct HttpInvestigator {
    name: String,
    base_url: String,
    client: Client,
}

impl HttpInvestigator {
    pub fn new(name: &str, base_url: &str, timeout: Duration) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GenerationError::Investigator {
                tool: name.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            name: name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn failure(&self, reason: impl ToString) -> GenerationError {
        GenerationError::Investigator {
            tool: self.name.clone(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl Investigator for HttpInvestigator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn investigate(&self, incident_id: &str) -> Result<Option<Vec<Finding>>, GenerationError> {
        let url = format!("{}/incidents/{}/findings", self.base_url, incident_id);
        let resp = self.client.get(&url).send().await.map_err(|e| self.failure(e))?;

        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => {
                let body: FindingsResponse = resp
                    .json()
                    .await
                    .map_err(|e| GenerationError::Malformed(format!("{}: {}", self.name, e)))?;
                Ok(Some(body.findings))
            }
            s => Err(self.failure(format!("HTTP {}", s.as_u16()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::FindingKind;
    use axum::extract::Path;
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;

    async fn spawn_tool() -> String {
        let app = Router::new().route(
            "/incidents/{id}/findings",
            get(|Path(id): Path<String>| async move {
                match id.as_str() {
                    "known" => Ok(Json(json!({
                        "findings": [{"kind": "service_down", "summary": "payments down"}]
                    }))),
                    "broken" => Err(AxumStatus::INTERNAL_SERVER_ERROR),
                    _ => Err(AxumStatus::NOT_FOUND),
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn parses_findings_and_treats_404_as_absent() {
        let base = spawn_tool().await;
        let tool = HttpInvestigator::new("monitoring", &format!("{base}/"), Duration::from_secs(5)).unwrap();

        let findings = tool.investigate("known").await.unwrap().unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, FindingKind::ServiceDown);

        assert!(tool.investigate("unknown").await.unwrap().is_none());

        let err = tool.investigate("broken").await.unwrap_err();
        assert!(matches!(err, GenerationError::Investigator { .. }));
    }
}
