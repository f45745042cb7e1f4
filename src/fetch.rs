//! An HTTP client that fetches alternate content and fragment manifests.

use reqwest::Url;
use scraper::Html;

use crate::dom;
use crate::manifest::Manifest;
use crate::{Error, Result};

/// A client that fetches alternate page content and fragment manifests.
pub struct FragmentFetcher {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::Client,
}

impl FragmentFetcher {
    pub fn new() -> FragmentFetcher {
        FragmentFetcher {
            client: reqwest::Client::new(),
        }
    }

    /// Fetch and parse an HTML document.
    pub async fn fetch_html(&self, url: &Url) -> Result<Html> {
        log::debug!(target: "pagefork", url:display = url; "fetching alternate content");
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            log::warn!(target: "pagefork", url:display = url, status:display = status; "received non-success response while fetching alternate content");
            return Err(Error::HttpStatus(status));
        }
        let body = response.text().await?;
        Ok(Html::parse_document(&body))
    }

    /// Fetch alternate content from `url` and extract the replacement inner HTML
    /// for a target (the whole `<main>` region for a page root, its first element
    /// child for a section).
    ///
    /// On any failure (network error, non-success status, fetched page without a
    /// `<main>` region) a warning is logged and `None` is returned; this function
    /// never fails the caller. Distinguishing "same path, no fetch needed" is the
    /// caller's job.
    pub async fn fetch_replacement(&self, url: &Url, target_is_main: bool) -> Option<String> {
        let fetched = match self.fetch_html(url).await {
            Ok(fetched) => fetched,
            Err(err) => {
                log::warn!(target: "pagefork", url:display = url; "failed to fetch alternate content: {err}");
                return None;
            }
        };
        let inner = dom::extract_main_inner(&fetched, target_is_main);
        if inner.is_none() {
            log::warn!(target: "pagefork", url:display = url; "fetched content has no main region");
        }
        inner
    }

    /// Fetch and parse a fragment manifest, keeping only entries for `current_path`.
    pub async fn fetch_manifest(&self, url: &Url, current_path: &str) -> Result<Manifest> {
        log::debug!(target: "pagefork", url:display = url; "fetching fragment manifest");
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus(status));
        }
        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|err| Error::ManifestFormat(err.to_string()))?;
        Ok(Manifest::from_value(value, current_path))
    }
}

impl Default for FragmentFetcher {
    fn default() -> FragmentFetcher {
        FragmentFetcher::new()
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    async fn server_with(route: &str, body: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_string(body.to_owned()))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn extracts_replacement_from_fetched_page() {
        let server = server_with(
            "/promo",
            "<html><body><main><div><h1>promo</h1></div><script>x()</script></main></body></html>",
        )
        .await;
        let url = Url::parse(&format!("{}/promo", server.uri())).unwrap();

        let fetcher = FragmentFetcher::new();
        let inner = fetcher.fetch_replacement(&url, true).await.unwrap();
        assert!(inner.contains("<h1>promo</h1>"));
        assert!(!inner.contains("script"));
    }

    #[tokio::test]
    async fn fetch_failure_yields_no_replacement() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let url = Url::parse(&format!("{}/missing", server.uri())).unwrap();

        let fetcher = FragmentFetcher::new();
        assert_eq!(fetcher.fetch_replacement(&url, true).await, None);
    }

    #[tokio::test]
    async fn fetched_page_without_main_yields_no_replacement() {
        let server = server_with("/bare", "<html><body><p>bare</p></body></html>").await;
        let url = Url::parse(&format!("{}/bare", server.uri())).unwrap();

        let fetcher = FragmentFetcher::new();
        assert_eq!(fetcher.fetch_replacement(&url, true).await, None);
    }

    #[tokio::test]
    async fn manifest_fetch_parses_entries() {
        let server = server_with(
            "/experiments/manifest.json",
            r#"{"data":[{"Selector":".hero","URL":"/fragments/hero-b","Experiment":"hero"}]}"#,
        )
        .await;
        let url = Url::parse(&format!("{}/experiments/manifest.json", server.uri())).unwrap();
        let fetcher = FragmentFetcher::new();
        let manifest = fetcher.fetch_manifest(&url, "/").await.unwrap();
        assert_eq!(manifest.entries.len(), 1);
        assert_eq!(manifest.entries[0].experiment.as_str(), "hero");
    }
}
