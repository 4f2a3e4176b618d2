use async_trait::async_trait;

use cwtail_types::{FetchPage, PollWindow, SourceError};

/// A remote log source that can be queried by time range
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Fetch one page of records in `window`, ascending by timestamp.
    ///
    /// `filter_pattern` is passed through to the source untouched. When the
    /// returned page carries a `next_token`, call again with the same window
    /// and that token to continue.
    async fn fetch_page(
        &self,
        source_id: &str,
        window: PollWindow,
        filter_pattern: Option<&str>,
        pagination_token: Option<&str>,
    ) -> Result<FetchPage, SourceError>;
}

/// Lists the source names available for identifier resolution
#[async_trait]
pub trait SourceCatalog: Send + Sync {
    /// Names containing `pattern` (all names if None)
    async fn list_sources(&self, pattern: Option<&str>) -> Result<Vec<String>, SourceError>;
}
