//! HTTP content store client
//!
//! Lookup: `GET {base}/api/{slug}?filters[field][$eq]=value&pagination[limit]=1`
//! answered with `{"data": [{"id": n, ...}]}`.
//!
//! Create: `POST {base}/api/{slug}` with body `{"data": payload}` answered with
//! `{"data": {"id": n, ...}}`.

use super::{Collection, Filter, RemoteId, RemoteStore, StoreError};
use crate::utils::retry_on_throttle;
use async_trait::async_trait;
use pmig_common::config::StoreConfig;
use serde::Deserialize;
use serde_json::{json, Value};
use std::num::NonZeroU32;
use std::time::Duration;

const USER_AGENT: &str = concat!("pmig/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct EntityRef {
    id: RemoteId,
}

#[derive(Debug, Deserialize)]
struct FindResponse {
    data: Vec<EntityRef>,
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    data: EntityRef,
}

/// reqwest-backed [`RemoteStore`]
pub struct HttpStore {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
    max_retry_wait_ms: u64,
    rate_limiter: governor::RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl HttpStore {
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| StoreError::Network(e.to_string()))?;

        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = governor::RateLimiter::direct(governor::Quota::per_second(per_second));

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token: config.token().map(str::to_string),
            max_retry_wait_ms: config.max_retry_wait_ms,
            rate_limiter,
        })
    }

    fn collection_url(&self, collection: Collection) -> String {
        format!("{}/api/{}", self.base_url, collection.slug())
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn find_once(
        &self,
        collection: Collection,
        query: &[(String, String)],
    ) -> Result<Option<RemoteId>, StoreError> {
        self.rate_limiter.until_ready().await;

        let request = self.client.get(self.collection_url(collection)).query(query);
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| StoreError::Network(e.to_string()))?;

        let response = check_status(response).await?;
        let body: FindResponse = response
            .json()
            .await
            .map_err(|e| StoreError::Parse(e.to_string()))?;

        Ok(body.data.first().map(|entity| entity.id))
    }

    async fn create_once(
        &self,
        collection: Collection,
        body: &Value,
    ) -> Result<RemoteId, StoreError> {
        self.rate_limiter.until_ready().await;

        let request = self.client.post(self.collection_url(collection)).json(body);
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| StoreError::Network(e.to_string()))?;

        let response = check_status(response).await?;
        let body: CreateResponse = response
            .json()
            .await
            .map_err(|e| StoreError::Parse(e.to_string()))?;

        Ok(body.data.id)
    }
}

/// Query string pairs for an equality lookup limited to one result
pub fn lookup_query(filter: &Filter) -> Vec<(String, String)> {
    let mut query: Vec<(String, String)> = filter
        .conditions()
        .iter()
        .map(|(field, value)| (format!("filters[{}][$eq]", field), value.clone()))
        .collect();
    query.push(("pagination[limit]".to_string(), "1".to_string()));
    query
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let error_text = response.text().await.unwrap_or_default();
    Err(StoreError::Api(status.as_u16(), error_text))
}

#[async_trait]
impl RemoteStore for HttpStore {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn find(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> Result<Option<RemoteId>, StoreError> {
        let query = lookup_query(filter);
        tracing::debug!(collection = %collection, ?query, "Store lookup");

        retry_on_throttle("find", self.max_retry_wait_ms, || {
            self.find_once(collection, &query)
        })
        .await
    }

    async fn create(&self, collection: Collection, payload: Value) -> Result<RemoteId, StoreError> {
        let body = json!({ "data": payload });
        tracing::debug!(collection = %collection, "Store create");

        retry_on_throttle("create", self.max_retry_wait_ms, || {
            self.create_once(collection, &body)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let store = HttpStore::new(&StoreConfig::default());
        assert!(store.is_ok());
    }

    #[test]
    fn test_zero_rate_falls_back_to_one_per_second() {
        let config = StoreConfig {
            requests_per_second: 0,
            ..Default::default()
        };
        assert!(HttpStore::new(&config).is_ok());
    }

    #[test]
    fn test_collection_url_trims_trailing_slash() {
        let config = StoreConfig {
            base_url: "https://cms.example.org/".to_string(),
            ..Default::default()
        };
        let store = HttpStore::new(&config).unwrap();
        assert_eq!(
            store.collection_url(Collection::Participants),
            "https://cms.example.org/api/participantes"
        );
    }

    #[test]
    fn test_lookup_query_limits_to_one() {
        let query = lookup_query(&Filter::eq("participante", 4).and("email", "a@x.com"));
        assert_eq!(
            query,
            vec![
                ("filters[participante][$eq]".to_string(), "4".to_string()),
                ("filters[email][$eq]".to_string(), "a@x.com".to_string()),
                ("pagination[limit]".to_string(), "1".to_string()),
            ]
        );
    }

    #[test]
    fn test_response_shapes_parse() {
        let find: FindResponse =
            serde_json::from_str(r#"{"data":[{"id":12,"attributes":{}}],"meta":{}}"#).unwrap();
        assert_eq!(find.data.first().map(|e| e.id), Some(12));

        let empty: FindResponse = serde_json::from_str(r#"{"data":[]}"#).unwrap();
        assert!(empty.data.is_empty());

        let created: CreateResponse = serde_json::from_str(r#"{"data":{"id":99}}"#).unwrap();
        assert_eq!(created.data.id, 99);
    }
}
