use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;
use url::Url;

use crate::error::{BookingError, BookingResult};

/// The provider's view of a payment.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayPayment {
    pub id: String,
    pub status: String,
    pub metadata: Option<Map<String, Value>>,
}

impl GatewayPayment {
    pub fn is_approved(&self) -> bool {
        self.status.eq_ignore_ascii_case("approved")
    }
}

/// Read-only payment lookup.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn fetch_payment(&self, payment_id: &str) -> BookingResult<GatewayPayment>;
}

/// Mercado Pago `GET /v1/payments/{id}`.
pub struct MercadoPagoGateway {
    http: reqwest::Client,
    base_url: Url,
    access_token: String,
}

impl MercadoPagoGateway {
    pub fn new(base_url: &str, access_token: String, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: Url::parse(base_url)?,
            access_token,
        })
    }
}

#[async_trait]
impl PaymentGateway for MercadoPagoGateway {
    async fn fetch_payment(&self, payment_id: &str) -> BookingResult<GatewayPayment> {
        if payment_id.is_empty() || !payment_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(BookingError::Validation(format!(
                "invalid payment id {payment_id:?}"
            )));
        }

        let url = self
            .base_url
            .join(&format!("v1/payments/{payment_id}"))
            .map_err(|e| BookingError::Integration(format!("bad payment url: {e}")))?;

        let resp = self
            .http
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| BookingError::Integration(format!("payment lookup failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            tracing::error!("Payment lookup {} failed: {} - {}", payment_id, status, text);
            return Err(BookingError::Integration(format!(
                "payment lookup returned {status}"
            )));
        }

        let json: Value = resp
            .json()
            .await
            .map_err(|e| BookingError::Integration(format!("unreadable payment body: {e}")))?;

        let status = json["status"]
            .as_str()
            .ok_or_else(|| BookingError::Integration("payment without status".into()))?
            .to_string();
        let id = match &json["id"] {
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.clone(),
            _ => payment_id.to_string(),
        };

        Ok(GatewayPayment {
            id,
            status,
            metadata: json["metadata"].as_object().cloned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Path, http::StatusCode, routing::get, Json, Router};
    use serde_json::json;

    async fn fake_provider() -> String {
        let app = Router::new().route(
            "/v1/payments/{id}",
            get(|Path(id): Path<String>| async move {
                if id == "404" {
                    return Err(StatusCode::NOT_FOUND);
                }
                Ok(Json(json!({
                    "id": id.parse::<i64>().unwrap(),
                    "status": "approved",
                    "metadata": { "barber_id": 1 }
                })))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn gateway(base: &str) -> MercadoPagoGateway {
        MercadoPagoGateway::new(base, "TEST-token".into(), Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_payment() {
        let base = fake_provider().await;
        let payment = gateway(&base).fetch_payment("123").await.unwrap();
        assert_eq!(payment.id, "123");
        assert!(payment.is_approved());
        assert_eq!(payment.metadata.unwrap()["barber_id"], json!(1));
    }

    #[tokio::test]
    async fn test_provider_error_is_integration_failure() {
        let base = fake_provider().await;
        let err = gateway(&base).fetch_payment("404").await.unwrap_err();
        assert!(matches!(err, BookingError::Integration(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_non_numeric_id_is_rejected_before_any_request() {
        let err = gateway("http://127.0.0.1:9").fetch_payment("../admin").await.unwrap_err();
        assert!(matches!(err, BookingError::Validation(_)));
    }
}
