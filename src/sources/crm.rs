//! Live CRM source backed by the HubSpot CRM v3 search API.

use super::{CrmSnapshot, Deal, FetchParams, MetricSource, SourceRecord};
use crate::error::SourceError;
use crate::models::SourceId;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// Connection settings for the CRM API.
#[derive(Debug, Clone)]
pub struct CrmSettings {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

/// HubSpot-backed CRM source.
pub struct CrmSource {
    settings: CrmSettings,
    http_client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    total: u64,
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[allow(dead_code)] // Response field
    id: String,
    properties: DealProperties,
}

#[derive(Debug, Deserialize)]
struct DealProperties {
    #[serde(default)]
    dealname: Option<String>,
    #[serde(default)]
    amount: Option<String>,
    #[serde(default)]
    dealstage: Option<String>,
    #[serde(default)]
    createdate: Option<String>,
}

impl CrmSource {
    pub fn new(settings: CrmSettings) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            settings,
            http_client,
        })
    }

    /// "List pipeline records": deals created inside the window.
    pub async fn list_deals(&self, params: &FetchParams) -> Result<Vec<Deal>, SourceError> {
        let body = json!({
            "filterGroups": [{
                "filters": [{
                    "propertyName": "createdate",
                    "operator": "BETWEEN",
                    "value": params.from_iso(),
                    "highValue": params.to_iso(),
                }]
            }],
            "properties": ["dealname", "amount", "dealstage", "createdate"],
            "limit": params.limit,
        });

        let response = self.search("deals", &body).await?;
        let mut deals = response
            .results
            .into_iter()
            .map(to_deal)
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(ref filter) = params.filter {
            deals.retain(|d| filter.matches_stage(&d.stage));
        }

        Ok(deals)
    }

    /// Count contacts matching the given filters.
    pub async fn count_contacts(&self, filters: Value) -> Result<u64, SourceError> {
        let body = json!({
            "filterGroups": if filters.is_null() { json!([]) } else { json!([{ "filters": filters }]) },
            "limit": 1,
        });
        Ok(self.search("contacts", &body).await?.total)
    }

    async fn search(&self, object: &str, body: &Value) -> Result<SearchResponse, SourceError> {
        let url = format!(
            "{}/crm/v3/objects/{}/search",
            self.settings.base_url.trim_end_matches('/'),
            object
        );
        debug!("CRM search: {}", url);

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.settings.api_key)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Unavailable(format!(
                "CRM API error {}: {}",
                status, body
            )));
        }

        Ok(response.json().await?)
    }
}

fn to_deal(result: SearchResult) -> Result<Deal, SourceError> {
    let props = result.properties;

    let amount = match props.amount.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(
            raw.parse::<f64>()
                .map_err(|_| SourceError::Malformed(format!("deal amount '{}'", raw)))?,
        ),
    };

    // createdate is an RFC 3339 timestamp; only the date part matters here.
    let created_at = props
        .createdate
        .as_deref()
        .and_then(|s| s.get(..10))
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok());

    Ok(Deal {
        name: props.dealname.unwrap_or_default(),
        amount,
        stage: props
            .dealstage
            .ok_or_else(|| SourceError::Malformed("deal without dealstage".to_string()))?,
        created_at,
    })
}

fn created_between(params: &FetchParams) -> Value {
    json!([{
        "propertyName": "createdate",
        "operator": "BETWEEN",
        "value": params.from_iso(),
        "highValue": params.to_iso(),
    }])
}

fn lifecycle_is(stage: &str) -> Value {
    json!([{
        "propertyName": "lifecyclestage",
        "operator": "EQ",
        "value": stage,
    }])
}

#[async_trait]
impl MetricSource for CrmSource {
    fn id(&self) -> SourceId {
        SourceId::Crm
    }

    async fn fetch(&self, params: &FetchParams) -> Result<SourceRecord, SourceError> {
        let (deals, total, new, qualified, customers) = futures::try_join!(
            self.list_deals(params),
            self.count_contacts(Value::Null),
            self.count_contacts(created_between(params)),
            self.count_contacts(lifecycle_is("salesqualifiedlead")),
            self.count_contacts(lifecycle_is("customer")),
        )?;

        if deals.is_empty() && total == 0 {
            return Err(SourceError::Empty);
        }

        Ok(SourceRecord::Crm(CrmSnapshot {
            total_contacts: Some(total),
            new_contacts: Some(new),
            qualified_leads: Some(qualified),
            customers: Some(customers),
            deals,
            as_of: Some(Utc::now()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(amount: Option<&str>, stage: Option<&str>) -> SearchResult {
        SearchResult {
            id: "1".to_string(),
            properties: DealProperties {
                dealname: Some("93281 - Zentor".to_string()),
                amount: amount.map(String::from),
                dealstage: stage.map(String::from),
                createdate: Some("2025-06-02T16:31:22.697Z".to_string()),
            },
        }
    }

    #[test]
    fn test_to_deal() {
        let deal = to_deal(result(Some("122500"), Some("presentationscheduled"))).unwrap();
        assert_eq!(deal.amount, Some(122_500.0));
        assert_eq!(deal.created_at, NaiveDate::from_ymd_opt(2025, 6, 2));
        assert!(deal.is_open());
    }

    #[test]
    fn test_to_deal_rejects_bad_amount() {
        let err = to_deal(result(Some("lots"), Some("closedwon"))).unwrap_err();
        assert!(matches!(err, SourceError::Malformed(_)));
    }

    #[test]
    fn test_to_deal_requires_stage() {
        assert!(to_deal(result(Some("10"), None)).is_err());
        assert_eq!(to_deal(result(Some(""), Some("closedwon"))).unwrap().amount, None);
    }

    #[test]
    fn test_search_response_shape() {
        let json = r#"{"total": 23, "results": [{"id": "38286292543", "properties": {"dealname": "X", "amount": "5", "dealstage": "closedwon"}}]}"#;
        let parsed: SearchResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.total, 23);
        assert_eq!(parsed.results.len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_api_is_unavailable() {
        let source = CrmSource::new(CrmSettings {
            base_url: "http://127.0.0.1:9".to_string(),
            api_key: "test".to_string(),
            timeout: Duration::from_secs(2),
        })
        .unwrap();

        let params = FetchParams::window(NaiveDate::from_ymd_opt(2025, 6, 30).unwrap(), 30, 10);
        let result = source.fetch(&params).await;
        assert!(matches!(result, Err(SourceError::Unavailable(_))));
    }
}
