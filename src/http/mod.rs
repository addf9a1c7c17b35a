// src/http/mod.rs

//! HTTP plumbing shared by the fetcher, the generators and the extensions

mod client;
mod limiter;

pub use client::{HTTP_TIMEOUT, HttpClient, HttpOptions, MAX_RETRIES, RETRY_DELAY_MS, download_bar};
pub use limiter::HostRateLimiter;

/// Last path segment of a URL, without query or fragment
pub fn url_basename(url: &str) -> Option<String> {
    let path = match url::Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or(url).to_string(),
    };
    path.rsplit('/')
        .find(|s| !s.is_empty())
        .map(|s| urlencoding::decode(s).map(|d| d.into_owned()).unwrap_or_else(|_| s.to_string()))
}

/// Join a base URL and a relative path with exactly one slash
pub fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_basename() {
        assert_eq!(url_basename("https://a.example/x/foo-1.0.tar.gz?raw=1").as_deref(), Some("foo-1.0.tar.gz"));
        assert_eq!(url_basename("https://a.example/dir/").as_deref(), Some("dir"));
        assert_eq!(url_basename("https://a.example/a%2Bb.zip").as_deref(), Some("a+b.zip"));
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("https://a.example/", "/x.tar.gz"), "https://a.example/x.tar.gz");
        assert_eq!(join_url("https://a.example", "x.tar.gz"), "https://a.example/x.tar.gz");
    }
}
