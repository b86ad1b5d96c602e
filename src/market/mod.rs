//! A thin typed client for the marketplace service REST API, used by the
//! outbound event handlers and the reconciliation loop. All calls use HTTP
//! basic authentication with the statically configured credentials.

use ethers::types::Address;
use serde::{Deserialize, Serialize};

use crate::config::MarketServiceConfig;
use crate::error::{Error, Result};

/// Comparison operator of a [`QueryFilter`]. Equality is the default and is
/// omitted on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum QueryOp {
    /// Exact match (the default).
    #[default]
    #[serde(rename = "=")]
    Eq,
    /// Greater than; used for `updatedOn` cursors.
    #[serde(rename = ">")]
    Gt,
    /// Fuzzy match.
    #[serde(rename = "~")]
    Like,
}

impl QueryOp {
    fn is_eq(&self) -> bool {
        *self == Self::Eq
    }
}

/// One attribute filter of a `GET /request` listing, serialized into the
/// JSON array carried by the `q` query parameter.
#[derive(Debug, Clone, Serialize)]
pub struct QueryFilter {
    /// Attribute to filter on.
    pub key: String,
    /// Value to compare against.
    pub value: serde_json::Value,
    /// Comparison operator.
    #[serde(skip_serializing_if = "QueryOp::is_eq")]
    pub op: QueryOp,
}

impl QueryFilter {
    /// An equality filter.
    pub fn eq<K, V>(key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<serde_json::Value>,
    {
        Self {
            key: key.into(),
            value: value.into(),
            op: QueryOp::Eq,
        }
    }

    /// A greater-than filter.
    pub fn gt<K, V>(key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<serde_json::Value>,
    {
        Self {
            key: key.into(),
            value: value.into(),
            op: QueryOp::Gt,
        }
    }
}

/// Status of a work record on the marketplace service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    /// Submitted, not matched yet.
    Created,
    /// A producer picked the work up.
    Processing,
    /// The proof is ready to be settled.
    Completed,
    /// The producer gave up on the work.
    Failed,
    /// The ledger order was closed.
    Closed,
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

/// A work record as the marketplace service reports it. The record id
/// doubles as the originating ledger order id.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkRecord {
    /// Service-assigned key, equal to the ledger order id.
    pub id: u64,
    /// Current status of the work.
    pub status: RequestStatus,
    /// Name of the assigned producer, if any.
    #[serde(default)]
    pub producer: Option<String>,
    /// The computed cost of the work.
    #[serde(default)]
    pub cost: Option<f64>,
    /// Key of the finished proof, once completed.
    #[serde(default)]
    pub proof_key: Option<String>,
    /// Last update timestamp; the reconciliation cursor.
    #[serde(rename = "updatedOn", default)]
    pub updated_on: u64,
    /// The statement the work belongs to.
    #[serde(default)]
    pub statement_key: Option<String>,
    /// The account that filed the request.
    #[serde(default)]
    pub sender: Option<String>,
}

/// The payload submitted for a newly created order.
#[derive(Debug, Clone, Serialize)]
pub struct WorkSubmission {
    /// The order price, in whole tokens.
    pub cost: f64,
    /// The statement the proof is requested for.
    pub statement_key: String,
    /// The serialized public inputs.
    pub input: String,
}

/// A finished proof, fetched by proof key.
#[derive(Debug, Clone, Deserialize)]
pub struct ProofRecord {
    /// The proof blob; opaque to the relayer.
    pub proof: String,
    /// The producer that generated it.
    pub sender: String,
}

/// A producer directory entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ProducerRecord {
    /// The producer's on-chain address, if they registered one.
    #[serde(default)]
    pub eth_address: Option<Address>,
}

/// One side level of a statement order book.
#[derive(Debug, Clone, Deserialize)]
pub struct BookEntry {
    /// Price of this level, in whole tokens.
    pub cost: f64,
}

/// Top of the order book for one statement, from `GET /top`.
#[derive(Debug, Clone, Deserialize)]
pub struct StatementBook {
    /// The statement identifier.
    pub statement_key: String,
    /// Human readable statement name.
    #[serde(default)]
    pub name: String,
    /// Best bids, descending.
    #[serde(default)]
    pub bids: Vec<BookEntry>,
    /// Best asks, ascending.
    #[serde(default)]
    pub asks: Vec<BookEntry>,
}

#[derive(Serialize)]
struct StatusUpdate {
    status: RequestStatus,
}

/// The marketplace service REST client.
#[derive(Clone)]
pub struct MarketplaceClient {
    http: reqwest::Client,
    config: MarketServiceConfig,
}

impl std::fmt::Debug for MarketplaceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketplaceClient")
            .field("url", &self.config.url.as_str())
            .finish()
    }
}

impl MarketplaceClient {
    /// Creates a new client from the service configuration.
    pub fn new(config: MarketServiceConfig) -> Result<Self> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self { http, config })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<url::Url> {
        let mut url = self.config.url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| Error::Generic("marketplace url cannot be a base"))?;
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.basic_auth(&self.config.username, Some(&self.config.password))
    }

    /// Lists work records matching the given attribute filters.
    pub async fn list_requests(
        &self,
        filters: &[QueryFilter],
    ) -> Result<Vec<WorkRecord>> {
        let mut url = self.endpoint(&["request"])?;
        url.query_pairs_mut()
            .append_pair("q", &serde_json::to_string(filters)?);
        let response = self
            .authorized(self.http.get(url))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    /// Submits a new work request for a created order.
    pub async fn submit_request(
        &self,
        submission: &WorkSubmission,
    ) -> Result<serde_json::Value> {
        let url = self.endpoint(&["request"])?;
        let response = self
            .authorized(self.http.post(url))
            .json(submission)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    /// Transitions a work record to the given status.
    pub async fn update_request_status(
        &self,
        id: u64,
        status: RequestStatus,
    ) -> Result<()> {
        let url = self.endpoint(&["request", &id.to_string()])?;
        self.authorized(self.http.patch(url))
            .json(&StatusUpdate { status })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Fetches a finished proof by its key.
    pub async fn proof(&self, proof_key: &str) -> Result<ProofRecord> {
        let url = self.endpoint(&["proof", proof_key])?;
        let response = self
            .authorized(self.http.get(url))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    /// Looks a producer up in the service's directory.
    pub async fn producer(&self, name: &str) -> Result<ProducerRecord> {
        let url = self.endpoint(&["producer", name])?;
        let response = self
            .authorized(self.http.get(url))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    /// Fetches the top of the order book for every statement.
    pub async fn order_book_top(&self) -> Result<Vec<StatementBook>> {
        let url = self.endpoint(&["top"])?;
        let response = self
            .authorized(self.http.get(url))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_serialize_like_the_service_expects() {
        let filters = vec![
            QueryFilter::eq("sender", "relayer"),
            QueryFilter::eq("status", "completed"),
            QueryFilter::gt("updatedOn", 1234),
        ];
        let q = serde_json::to_string(&filters).unwrap();
        assert_eq!(
            q,
            r#"[{"key":"sender","value":"relayer"},{"key":"status","value":"completed"},{"key":"updatedOn","value":1234,"op":">"}]"#
        );
    }

    #[test]
    fn null_filter_values_are_allowed() {
        let filters = vec![QueryFilter::eq("relayerFetched", serde_json::Value::Null)];
        let q = serde_json::to_string(&filters).unwrap();
        assert_eq!(q, r#"[{"key":"relayerFetched","value":null}]"#);
    }

    #[test]
    fn submission_payload_shape() {
        let submission = WorkSubmission {
            cost: 10.0,
            statement_key: "567".into(),
            input: "[[1,2,3]]".into(),
        };
        let payload = serde_json::to_value(&submission).unwrap();
        assert_eq!(
            payload,
            serde_json::json!({
                "cost": 10.0,
                "statement_key": "567",
                "input": "[[1,2,3]]",
            })
        );
    }

    #[test]
    fn work_record_parses_with_missing_optionals() {
        let raw = serde_json::json!({
            "id": 1,
            "status": "completed",
            "proof_key": "pk1",
            "cost": 10,
            "updatedOn": 99,
        });
        let record: WorkRecord = serde_json::from_value(raw).unwrap();
        assert_eq!(record.id, 1);
        assert_eq!(record.status, RequestStatus::Completed);
        assert_eq!(record.proof_key.as_deref(), Some("pk1"));
        assert_eq!(record.updated_on, 99);
        assert_eq!(record.producer, None);
    }

    #[test]
    fn producer_record_tolerates_null_address() {
        let record: ProducerRecord =
            serde_json::from_value(serde_json::json!({ "eth_address": null }))
                .unwrap();
        assert_eq!(record.eth_address, None);
    }
}
