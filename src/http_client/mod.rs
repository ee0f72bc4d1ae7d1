//! HTTP plumbing shared by the collectors.
//!
//! Every collector polls its upstream through a client built here: transient
//! connection resets, 5xx responses and rate limiting are retried with
//! exponential backoff before the collector sees an error.

use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{Jitter, RetryTransientMiddleware, policies::ExponentialBackoff};

use crate::config::{HttpRetryConfig, JitterSetting};

/// Builds an HTTP client that retries transient failures with exponential
/// backoff according to the given policy.
pub fn retryable_client(config: &HttpRetryConfig) -> ClientWithMiddleware {
    let jitter = match config.jitter {
        JitterSetting::None => Jitter::None,
        JitterSetting::Full => Jitter::Full,
    };

    let retry_policy = ExponentialBackoff::builder()
        .jitter(jitter)
        .base(config.backoff_base)
        .retry_bounds(config.initial_backoff, config.max_backoff)
        .build_with_max_retries(config.max_retries);

    ClientBuilder::new(reqwest::Client::new())
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .build()
}
