//! Billing: daily cost report model and the fetch seam the cost monitor uses.

pub mod client;

use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::core::errors::Result;

pub use client::BillingClient;

/// One cost bucket as returned by the billing API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostBucket {
    /// Bucket day as `YYYY-MM-DD`.
    pub date: String,
    /// Spend in US dollars.
    pub cost_usd: f64,
}

/// `GET /v1/cost` response body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostReport {
    /// Buckets in the requested range; absent means no spend.
    #[serde(default)]
    pub data: Vec<CostBucket>,
}

impl CostReport {
    /// Sum of every bucket in the report.
    #[must_use]
    pub fn total_usd(&self) -> f64 {
        self.data.iter().map(|b| b.cost_usd).sum()
    }
}

/// Source of cost reports for a half-open date range `[start, end)`.
pub trait CostFetcher: Send + Sync {
    /// Fetch the report, giving up after `timeout`.
    fn get_cost(&self, start: NaiveDate, end: NaiveDate, timeout: Duration) -> Result<CostReport>;
}
