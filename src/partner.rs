//! Settlement partner client. The partner is contractually idempotent on
//! `external_id`: a duplicate submission returns the same payment as the
//! original instead of creating a second one, and this client reports that
//! replay as success.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::PartnerConfig;
use crate::error::{ExpenseError, Result};

const PAYMENTS_PATH: &str = "/v1/payments";
const DUPLICATE_ID_MESSAGE: &str = "external id already exists";

#[derive(Debug, Clone, Serialize)]
struct PaymentRequest<'a> {
    amount: i64,
    external_id: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct PaymentResponseBody {
    #[serde(default)]
    data: PaymentData,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PaymentData {
    #[serde(default)]
    id: String,
    #[serde(default)]
    external_id: String,
    #[serde(default)]
    status: String,
}

/// A settled payment as reported by the partner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartnerPayment {
    pub partner_id: String,
    pub external_id: String,
    /// True when the partner had already executed this external id and
    /// replayed the original result.
    pub duplicate: bool,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentPartner: Send + Sync {
    /// Submit a payment. `external_id` de-duplicates repeated submissions
    /// of the same logical payment on the partner side.
    async fn execute(&self, amount: i64, external_id: &str) -> Result<PartnerPayment>;
}

/// HTTP client for the partner API
#[derive(Clone)]
pub struct HttpPartner {
    http: Client,
    base_url: String,
}

impl HttpPartner {
    pub fn new(config: &PartnerConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PaymentPartner for HttpPartner {
    async fn execute(&self, amount: i64, external_id: &str) -> Result<PartnerPayment> {
        let url = format!("{}{}", self.base_url, PAYMENTS_PATH);
        let response = self
            .http
            .post(&url)
            .json(&PaymentRequest {
                amount,
                external_id,
            })
            .send()
            .await?;

        let status = response.status();
        if status.is_server_error() {
            return Err(ExpenseError::Partner {
                status: status.as_u16(),
            });
        }

        let body: PaymentResponseBody = response
            .json()
            .await
            .map_err(|e| ExpenseError::PartnerResponse(e.to_string()))?;

        let duplicate = status == StatusCode::BAD_REQUEST && body.message == DUPLICATE_ID_MESSAGE;
        if status == StatusCode::OK || duplicate {
            debug!(external_id, partner_id = %body.data.id, duplicate, "partner settled payment");
            return Ok(PartnerPayment {
                partner_id: body.data.id,
                external_id: body.data.external_id,
                duplicate,
            });
        }

        Err(ExpenseError::Partner {
            status: status.as_u16(),
        })
    }
}
