//! Request context: the URL of the page being served.

use url::Url;

use crate::{Error, Result};

/// The request being personalized: supplies the current path, the query parameters
/// and the base for resolving configured content URLs.
#[derive(Debug, Clone)]
pub struct RequestContext {
    url: Url,
}

impl RequestContext {
    pub fn new(url: Url) -> RequestContext {
        RequestContext { url }
    }

    pub fn parse(url: &str) -> Result<RequestContext> {
        Ok(RequestContext::new(Url::parse(url)?))
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Path of the current page.
    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// First value of the query parameter `name`.
    pub fn query(&self, name: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    /// All values of the query parameter `name`, in order of appearance.
    pub fn query_all(&self, name: &str) -> Vec<String> {
        self.url
            .query_pairs()
            .filter(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
            .collect()
    }

    /// Resolve a configured content URL against the request URL.
    pub fn resolve(&self, raw: &str) -> Result<Url> {
        self.url.join(raw).map_err(Error::from)
    }

    /// Whether diagnostic logging should be verbose for this request. Enabled on
    /// non-production hosts (localhost and `*.page` preview hosts) and via the
    /// `experimentation-debug` query parameter.
    pub fn is_debug_enabled(&self) -> bool {
        let host = self.url.host_str().unwrap_or("");
        host == "localhost"
            || host == "127.0.0.1"
            || host.ends_with(".page")
            || self.query("experimentation-debug").is_some()
    }
}
