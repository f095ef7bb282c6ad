//! Typed GraphQL payload builders
//!
//! Queries are assembled from typed fields only. Integers are rendered from
//! integer types and every string argument goes through
//! [`graphql_string`], so caller input can never break out of a string
//! literal into the query syntax.

use serde::Serialize;

use crate::fetcher::config::{DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
use crate::fetcher::{FetcherError, FetcherResult};
use crate::{PageCursor, TimeWindow};

/// Request body sent to the upstream: `{"query": "..."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphqlPayload {
    query: String,
}

impl GraphqlPayload {
    /// Wrap a query or mutation document
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
        }
    }

    /// The GraphQL document
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Serialized body; these exact bytes are signed and sent
    pub fn to_body(&self) -> FetcherResult<String> {
        serde_json::to_string(self)
            .map_err(|e| FetcherError::InvalidQuery(format!("failed to serialize payload: {e}")))
    }
}

/// Builds the payload for one page of a paginated report
pub trait QueryBuilder: Send + Sync {
    /// Field under `data` holding `nodes` and `pageInfo`
    fn report_field(&self) -> &'static str;

    /// Payload for the page at `cursor` within `window`
    fn build(&self, window: TimeWindow, cursor: &PageCursor) -> FetcherResult<GraphqlPayload>;
}

/// Operation label for documents that target no known root field
pub const UNKNOWN_OPERATION: &str = "graphql";

const KNOWN_OPERATIONS: [&str; 3] = ["conversionReport", "clickReport", "generateShortLink"];

/// Known root field a raw document targets, or [`UNKNOWN_OPERATION`]
///
/// When several appear, the first one in the document wins.
pub fn operation_name(document: &str) -> &'static str {
    KNOWN_OPERATIONS
        .iter()
        .filter_map(|op| document.find(op).map(|at| (at, *op)))
        .min_by_key(|(at, _)| *at)
        .map_or(UNKNOWN_OPERATION, |(_, op)| op)
}

/// Render a string as a quoted, escaped GraphQL string literal
pub fn graphql_string(value: &str) -> String {
    // JSON string escaping is a subset of GraphQL's
    serde_json::Value::String(value.to_string()).to_string()
}

fn validate_limit(limit: u32) -> FetcherResult<u32> {
    if limit == 0 || limit > MAX_PAGE_LIMIT {
        return Err(FetcherError::InvalidQuery(format!(
            "page limit must be between 1 and {MAX_PAGE_LIMIT}, got {limit}"
        )));
    }
    Ok(limit)
}

const CONVERSION_NODE_SELECTION: &str = "\
purchaseTime clickTime conversionId conversionStatus shopeeCommissionCapped \
sellerCommission totalCommission buyerType utmContent device referrer \
orders { orderId orderStatus shopType items { shopId shopName completeTime \
itemId itemName itemPrice actualAmount qty imageUrl itemTotalCommission \
itemSellerCommission itemShopeeCommissionCapped itemNotes channelType \
attributionType globalCategoryLv1Name globalCategoryLv2Name \
globalCategoryLv3Name refundAmount fraudStatus } }";

const CLICK_NODE_SELECTION: &str = "\
clickTime subId utmSource utmMedium utmCampaign utmContent utmTerm device \
referrer clickCount shortLink originUrl";

/// Conversion report filtered by purchase time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionReportQuery {
    limit: u32,
}

impl Default for ConversionReportQuery {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversionReportQuery {
    /// Query with the default page size
    pub fn new() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
        }
    }

    /// Set the page size (1..=500)
    pub fn with_limit(mut self, limit: u32) -> FetcherResult<Self> {
        self.limit = validate_limit(limit)?;
        Ok(self)
    }

    /// Page size
    pub fn limit(&self) -> u32 {
        self.limit
    }
}

impl QueryBuilder for ConversionReportQuery {
    fn report_field(&self) -> &'static str {
        "conversionReport"
    }

    fn build(&self, window: TimeWindow, cursor: &PageCursor) -> FetcherResult<GraphqlPayload> {
        let query = format!(
            "{{ conversionReport(purchaseTimeStart: {}, purchaseTimeEnd: {}, limit: {}, scrollId: {}) \
             {{ nodes {{ {} }} pageInfo {{ hasNextPage scrollId }} }} }}",
            window.start,
            window.end,
            self.limit,
            graphql_string(cursor.as_str()),
            CONVERSION_NODE_SELECTION,
        );
        Ok(GraphqlPayload::new(query))
    }
}

/// Click report filtered by click time and optional sub id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClickReportQuery {
    limit: u32,
    sub_id: Option<String>,
}

impl Default for ClickReportQuery {
    fn default() -> Self {
        Self::new()
    }
}

impl ClickReportQuery {
    /// Query with the default page size and no sub id filter
    pub fn new() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
            sub_id: None,
        }
    }

    /// Set the page size (1..=500)
    pub fn with_limit(mut self, limit: u32) -> FetcherResult<Self> {
        self.limit = validate_limit(limit)?;
        Ok(self)
    }

    /// Only return clicks tagged with `sub_id`; blank values clear the filter
    pub fn with_sub_id(mut self, sub_id: impl Into<String>) -> Self {
        let sub_id = sub_id.into();
        self.sub_id = if sub_id.trim().is_empty() {
            None
        } else {
            Some(sub_id)
        };
        self
    }
}

impl QueryBuilder for ClickReportQuery {
    fn report_field(&self) -> &'static str {
        "clickReport"
    }

    fn build(&self, window: TimeWindow, cursor: &PageCursor) -> FetcherResult<GraphqlPayload> {
        let sub_id = self
            .sub_id
            .as_deref()
            .map(|s| format!(", subId: {}", graphql_string(s)))
            .unwrap_or_default();

        let query = format!(
            "{{ clickReport(clickTimeStart: {}, clickTimeEnd: {}, limit: {}, scrollId: {}{}) \
             {{ nodes {{ {} }} pageInfo {{ hasNextPage scrollId }} }} }}",
            window.start,
            window.end,
            self.limit,
            graphql_string(cursor.as_str()),
            sub_id,
            CLICK_NODE_SELECTION,
        );
        Ok(GraphqlPayload::new(query))
    }
}

/// `generateShortLink` mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortLinkMutation {
    origin_url: String,
    sub_ids: Vec<String>,
}

impl ShortLinkMutation {
    /// Mutation for `origin_url`, which must be an http(s) URL
    pub fn new(origin_url: impl Into<String>) -> FetcherResult<Self> {
        let origin_url = origin_url.into();
        let trimmed = origin_url.trim();
        if !(trimmed.starts_with("https://") || trimmed.starts_with("http://")) {
            return Err(FetcherError::InvalidQuery(format!(
                "origin url must be an http(s) URL, got {origin_url:?}"
            )));
        }

        Ok(Self {
            origin_url: trimmed.to_string(),
            sub_ids: Vec::new(),
        })
    }

    /// Tag the link with sub ids; blank entries are dropped
    pub fn with_sub_ids<I, S>(mut self, sub_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sub_ids = sub_ids
            .into_iter()
            .map(Into::into)
            .filter(|s: &String| !s.trim().is_empty())
            .collect();
        self
    }

    /// Mutation payload
    pub fn build(&self) -> GraphqlPayload {
        let sub_ids = self
            .sub_ids
            .iter()
            .map(|s| graphql_string(s))
            .collect::<Vec<_>>()
            .join(", ");

        GraphqlPayload::new(format!(
            "mutation {{ generateShortLink(input: {{ originUrl: {}, subIds: [{}] }}) {{ shortLink }} }}",
            graphql_string(&self.origin_url),
            sub_ids,
        ))
    }
}
