use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use std::time::Duration;
use url::Url;

pub struct HttpClientFactory;

impl HttpClientFactory {
    /// Creates an HTTP client that retries transient failures (5xx, 429,
    /// connect errors) with exponential backoff.
    ///
    /// `timeout` bounds each individual attempt.
    pub fn create_client(timeout: Duration, max_retries: u32) -> ClientWithMiddleware {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);

        let client = Client::builder()
            .pool_max_idle_per_host(5)
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .build()
            .unwrap_or_else(|_| Client::new());

        ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build()
    }
}

/// Appends percent-encoded query parameters to `base_url`.
///
/// reqwest-middleware's request builder does not expose `.query()`, so the
/// query string is built up front.
pub fn build_url_with_query<K, V>(base_url: &str, params: &[(K, V)]) -> anyhow::Result<Url>
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let url = Url::parse_with_params(
        base_url,
        params.iter().map(|(k, v)| (k.as_ref(), v.as_ref())),
    )?;
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_is_appended_and_encoded() {
        let url = build_url_with_query(
            "https://api.binance.com/api/v3/klines",
            &[("symbol", "BTCUSDT"), ("interval", "1m"), ("note", "a b&c")],
        )
        .unwrap();

        assert_eq!(url.path(), "/api/v3/klines");
        assert_eq!(
            url.query(),
            Some("symbol=BTCUSDT&interval=1m&note=a+b%26c")
        );
    }

    #[test]
    fn test_existing_query_is_preserved() {
        let url = build_url_with_query("http://localhost/x?a=1", &[("b", "2")]).unwrap();
        assert_eq!(url.query(), Some("a=1&b=2"));
    }

    #[test]
    fn test_invalid_base_is_rejected() {
        let params: [(&str, &str); 0] = [];
        assert!(build_url_with_query("not a url", &params).is_err());
    }
}
