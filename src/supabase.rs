use anyhow::{Context, Result};
use futures::future::BoxFuture;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde::Serialize;

use crate::sink::{MetricsRecord, MetricsSink};

/// Arguments of the `upsert_metrics` RPC.
#[derive(Debug, Serialize)]
struct UpsertMetrics<'a> {
    p_device_id: &'a str,
    p_keypresses: i64,
    p_mouse_clicks: i64,
    p_mouse_distance_in: f64,
    p_mouse_distance_mi: f64,
    p_scroll_steps: i64,
}

pub struct SupabaseClient {
    client: reqwest::Client,
    base_url: String,
    device_id: String,
}

impl SupabaseClient {
    pub fn new(supabase_url: &str, api_key: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "apikey",
            HeaderValue::from_str(api_key).context("Invalid Supabase API key")?,
        );
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key)).context("Invalid Supabase API key")?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(SupabaseClient {
            client,
            base_url: supabase_url.trim_end_matches('/').to_string(),
            device_id: uuid::Uuid::new_v4().to_string(),
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    fn upsert_url(&self) -> String {
        format!("{}/rest/v1/rpc/upsert_metrics", self.base_url)
    }

    pub async fn upsert_metrics(&self, record: &MetricsRecord) -> Result<()> {
        let body = UpsertMetrics {
            p_device_id: &self.device_id,
            p_keypresses: record.keypresses,
            p_mouse_clicks: record.mouse_clicks,
            p_mouse_distance_in: record.mouse_distance_in,
            p_mouse_distance_mi: record.mouse_distance_mi,
            p_scroll_steps: record.scroll_steps,
        };

        let response = self
            .client
            .post(self.upsert_url())
            .json(&body)
            .send()
            .await
            .context("Supabase request failed")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Supabase request failed with {}: {}", status, error_text);
        }

        Ok(())
    }
}

impl MetricsSink for SupabaseClient {
    fn name(&self) -> &str {
        "supabase"
    }

    fn flush<'a>(&'a self, record: &'a MetricsRecord) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.upsert_metrics(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_rpc_url_without_double_slash() {
        let client = SupabaseClient::new("https://example.supabase.co/", "anon").unwrap();
        assert_eq!(client.upsert_url(), "https://example.supabase.co/rest/v1/rpc/upsert_metrics");
        assert_eq!(client.device_id().len(), 36);
    }

    #[test]
    fn rejects_keys_that_are_not_header_safe() {
        assert!(SupabaseClient::new("https://example.supabase.co", "bad\nkey").is_err());
    }

    #[test]
    fn rpc_body_uses_prefixed_argument_names() {
        let body = UpsertMetrics {
            p_device_id: "device",
            p_keypresses: 1,
            p_mouse_clicks: 2,
            p_mouse_distance_in: 3.0,
            p_mouse_distance_mi: 0.0,
            p_scroll_steps: 4,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["p_device_id"], "device");
        assert_eq!(json["p_scroll_steps"], 4);
    }
}
