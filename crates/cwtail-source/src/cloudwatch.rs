//! CloudWatch Logs client for cwtail

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_cloudwatchlogs::Client;
use aws_sdk_cloudwatchlogs::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};

use crate::client::{SourceCatalog, SourceClient};
use cwtail_types::{FetchPage, LogRecord, PollWindow, SourceError};

/// Maximum events per FilterLogEvents page
const DEFAULT_PAGE_LIMIT: i32 = 10_000;

/// CloudWatch Logs client wrapper
#[derive(Clone)]
pub struct CloudWatchClient {
    client: Client,
    page_limit: i32,
}

impl CloudWatchClient {
    /// Create a client from the default AWS credential and region chain
    pub async fn new(region: Option<String>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region));
        }
        let config = loader.load().await;

        Self {
            client: Client::new(&config),
            page_limit: DEFAULT_PAGE_LIMIT,
        }
    }

    /// Override the per-page event limit
    pub fn with_page_limit(mut self, page_limit: i32) -> Self {
        self.page_limit = page_limit;
        self
    }
}

#[async_trait]
impl SourceClient for CloudWatchClient {
    async fn fetch_page(
        &self,
        source_id: &str,
        window: PollWindow,
        filter_pattern: Option<&str>,
        pagination_token: Option<&str>,
    ) -> Result<FetchPage, SourceError> {
        let response = self
            .client
            .filter_log_events()
            .log_group_name(source_id)
            .start_time(window.start_millis)
            .end_time(window.end_millis)
            .set_filter_pattern(filter_pattern.filter(|p| !p.is_empty()).map(str::to_string))
            .set_next_token(pagination_token.map(str::to_string))
            .limit(self.page_limit)
            .send()
            .await
            .map_err(|e| classify_error(source_id, e))?;

        // endTime is inclusive on the API side, the window is not
        let mut records: Vec<LogRecord> = response
            .events()
            .iter()
            .filter_map(|event| {
                let timestamp = event.timestamp()?;
                if !window.contains(timestamp) {
                    return None;
                }
                let mut record =
                    LogRecord::new(source_id, timestamp, event.message().unwrap_or_default());
                record.event_id = event.event_id().map(str::to_string);
                record.stream = event.log_stream_name().map(str::to_string);
                Some(record)
            })
            .collect();
        records.sort_by_key(|r| r.timestamp_millis);

        tracing::trace!(
            source = source_id,
            %window,
            count = records.len(),
            more = response.next_token().is_some(),
            "fetched page"
        );

        Ok(FetchPage {
            records,
            next_token: response.next_token().map(str::to_string),
        })
    }
}

#[async_trait]
impl SourceCatalog for CloudWatchClient {
    async fn list_sources(&self, pattern: Option<&str>) -> Result<Vec<String>, SourceError> {
        let mut names = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let response = self
                .client
                .describe_log_groups()
                .set_log_group_name_pattern(pattern.filter(|p| !p.is_empty()).map(str::to_string))
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| classify_error(pattern.unwrap_or("*"), e))?;

            names.extend(
                response
                    .log_groups()
                    .iter()
                    .filter_map(|g| g.log_group_name().map(str::to_string)),
            );

            match response.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }

        Ok(names)
    }
}

/// Map an SDK failure onto the source error taxonomy
fn classify_error<E, R>(source_id: &str, err: SdkError<E, R>) -> SourceError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let code = err.code().map(str::to_string);
    let is_service = matches!(err, SdkError::ServiceError(_));
    let detail = DisplayErrorContext(&err).to_string();
    error_from_code(source_id, code.as_deref(), is_service, detail)
}

fn error_from_code(
    source_id: &str,
    code: Option<&str>,
    is_service: bool,
    detail: String,
) -> SourceError {
    match code {
        Some("ThrottlingException" | "LimitExceededException" | "TooManyRequestsException") => {
            SourceError::RateLimited
        }
        Some("ResourceNotFoundException") => SourceError::SourceNotFound(source_id.to_string()),
        Some("ServiceUnavailableException" | "InternalFailure") => SourceError::Transient(detail),
        // Timeouts, dispatch and response errors carry no service code
        _ if !is_service => SourceError::Transient(detail),
        _ => SourceError::SourceFailed(detail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttling_maps_to_rate_limited() {
        let err = error_from_code("g", Some("ThrottlingException"), true, String::new());
        assert_eq!(err, SourceError::RateLimited);
    }

    #[test]
    fn test_missing_group_maps_to_not_found() {
        let err = error_from_code("/aws/x", Some("ResourceNotFoundException"), true, String::new());
        assert_eq!(err, SourceError::SourceNotFound("/aws/x".to_string()));
    }

    #[test]
    fn test_dispatch_failure_is_transient() {
        let err = error_from_code("g", None, false, "connection reset".to_string());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_unknown_service_error_is_fatal() {
        let err = error_from_code("g", Some("InvalidParameterException"), true, "bad".into());
        assert!(matches!(err, SourceError::SourceFailed(_)));
    }
}
