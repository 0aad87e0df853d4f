//! Content retrieval by URI.
//!
//! Retrieval is a chain of [`FetchHandler`] middleware: each handler is given
//! the request plus a continuation for the rest of the chain, which it may
//! invoke, skip, or short-circuit. Handlers that resolve one URI into another
//! (a release listing into an asset download, say) re-enter the whole chain
//! with [`FetchChain::restart`] so every other handler gets a look at the
//! rewritten request.
//!
//! Registration may happen from any thread; the list is snapshotted before a
//! chain runs, so execution itself is a plain sequential call sequence.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::error::{Error, Result};

/// Redirection hops allowed before a chain restart is considered a loop.
const MAX_CHAIN_RESTARTS: u32 = 8;

/// Settings shared by the HTTP-backed handlers.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        FetchConfig {
            user_agent: format!("modfold/{}", env!("CARGO_PKG_VERSION")),
            timeout: Duration::from_secs(30),
        }
    }
}

impl FetchConfig {
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// One link in the retrieval chain.
pub trait FetchHandler: Send + Sync {
    /// Handle `uri` or delegate to `chain.next(uri)`.
    fn fetch(&self, uri: &Url, chain: &FetchChain<'_>) -> Result<Vec<u8>>;
}

/// Continuation handed to a [`FetchHandler`]: the rest of the chain.
pub struct FetchChain<'a> {
    handlers: &'a [Arc<dyn FetchHandler>],
    position: usize,
    restarts: u32,
}

impl FetchChain<'_> {
    /// Pass the request on to the next handler; NotFound when the chain is
    /// exhausted.
    pub fn next(&self, uri: &Url) -> Result<Vec<u8>> {
        match self.handlers.get(self.position) {
            Some(handler) => handler.fetch(
                uri,
                &FetchChain {
                    handlers: self.handlers,
                    position: self.position + 1,
                    restarts: self.restarts,
                },
            ),
            None => Err(Error::not_found(format!("content at '{uri}'"))),
        }
    }

    /// Re-enter the whole chain with a rewritten URI.
    pub fn restart(&self, uri: &Url) -> Result<Vec<u8>> {
        if self.restarts >= MAX_CHAIN_RESTARTS {
            return Err(Error::invalid(format!(
                "fetch redirection for '{uri}' exceeded {MAX_CHAIN_RESTARTS} hops"
            )));
        }
        FetchChain {
            handlers: self.handlers,
            position: 0,
            restarts: self.restarts + 1,
        }
        .next(uri)
    }
}

/// Priority-ordered handler list with an optional terminal handler.
///
/// `register` appends (runs after earlier registrations), `register_filter`
/// prepends (runs first). The terminal handler, when set, always runs last.
pub struct FetchRegistry {
    handlers: Mutex<Vec<Arc<dyn FetchHandler>>>,
    terminal: Option<Arc<dyn FetchHandler>>,
}

impl FetchRegistry {
    /// A registry with no handlers at all; every fetch is NotFound until
    /// something is registered.
    pub fn empty() -> Self {
        FetchRegistry {
            handlers: Mutex::new(Vec::new()),
            terminal: None,
        }
    }

    /// The stock chain: GitHub release resolution, `file://` access, and a
    /// terminal HTTP handler.
    pub fn with_defaults(config: FetchConfig) -> Self {
        let registry = FetchRegistry {
            handlers: Mutex::new(Vec::new()),
            terminal: Some(Arc::new(HttpFetch::new(config.clone()))),
        };
        registry.register(Arc::new(GithubReleases::new(config)));
        registry.register(Arc::new(LocalFile));
        registry
    }

    pub fn register(&self, handler: Arc<dyn FetchHandler>) {
        self.handlers.lock().unwrap().push(handler);
    }

    pub fn register_filter(&self, handler: Arc<dyn FetchHandler>) {
        self.handlers.lock().unwrap().insert(0, handler);
    }

    /// Run the chain for `uri`.
    pub fn fetch(&self, uri: &Url) -> Result<Vec<u8>> {
        let mut snapshot = self.handlers.lock().unwrap().clone();
        if let Some(terminal) = &self.terminal {
            snapshot.push(terminal.clone());
        }
        debug!(%uri, handlers = snapshot.len(), "dispatching fetch");
        FetchChain {
            handlers: &snapshot,
            position: 0,
            restarts: 0,
        }
        .next(uri)
    }
}

impl Default for FetchRegistry {
    fn default() -> Self {
        Self::with_defaults(FetchConfig::default())
    }
}

fn blocking_client(config: &FetchConfig) -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .user_agent(&config.user_agent)
        .timeout(config.timeout)
        .build()
        .map_err(|e| Error::invalid(format!("failed to build HTTP client: {e}")))
}

/// Terminal handler: plain HTTP(S) GET.
pub struct HttpFetch {
    config: FetchConfig,
}

impl HttpFetch {
    pub fn new(config: FetchConfig) -> Self {
        HttpFetch { config }
    }
}

impl FetchHandler for HttpFetch {
    fn fetch(&self, uri: &Url, chain: &FetchChain<'_>) -> Result<Vec<u8>> {
        if !matches!(uri.scheme(), "http" | "https") {
            return chain.next(uri);
        }
        debug!(%uri, "HTTP GET");
        let client = blocking_client(&self.config)?;
        let response = client
            .get(uri.as_str())
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::not_found(format!("content at '{uri}': {e}")))?;
        let bytes = response
            .bytes()
            .map_err(|e| Error::not_found(format!("content at '{uri}': {e}")))?;
        Ok(bytes.to_vec())
    }
}

/// `file://` URIs read straight from disk.
pub struct LocalFile;

impl FetchHandler for LocalFile {
    fn fetch(&self, uri: &Url, chain: &FetchChain<'_>) -> Result<Vec<u8>> {
        if uri.scheme() != "file" {
            return chain.next(uri);
        }
        let path = uri
            .to_file_path()
            .map_err(|_| Error::invalid(format!("'{uri}' is not a usable file path")))?;
        debug!(path = %path.display(), "reading local file");
        std::fs::read(&path)
            .map_err(|e| Error::not_found(format!("local file '{}': {e}", path.display())))
    }
}

#[derive(Debug, Deserialize)]
struct Release {
    #[serde(default)]
    assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Deserialize)]
struct ReleaseAsset {
    name: String,
    browser_download_url: String,
}

/// Resolves GitHub release URIs to a concrete asset download.
///
/// Recognizes `github.com/{owner}/{repo}/release` and
/// `api.github.com/repos/{owner}/{repo}/releases`; the URI query, when
/// present, filters assets by name substring. The chosen asset's download URL
/// re-enters the chain.
pub struct GithubReleases {
    config: FetchConfig,
}

impl GithubReleases {
    pub fn new(config: FetchConfig) -> Self {
        GithubReleases { config }
    }

    fn listing_url(uri: &Url) -> Option<Url> {
        if !matches!(uri.scheme(), "http" | "https") {
            return None;
        }
        let host = uri.host_str()?;
        let segments: Vec<&str> = uri.path_segments()?.filter(|s| !s.is_empty()).collect();
        let (owner, repo) = if host.eq_ignore_ascii_case("github.com") {
            match segments.as_slice() {
                [owner, repo, tail] if tail.eq_ignore_ascii_case("release") => (*owner, *repo),
                _ => return None,
            }
        } else if host.eq_ignore_ascii_case("api.github.com") {
            match segments.as_slice() {
                ["repos", owner, repo, "releases"] => (*owner, *repo),
                _ => return None,
            }
        } else {
            return None;
        };
        Url::parse(&format!(
            "https://api.github.com/repos/{owner}/{repo}/releases"
        ))
        .ok()
    }
}

impl FetchHandler for GithubReleases {
    fn fetch(&self, uri: &Url, chain: &FetchChain<'_>) -> Result<Vec<u8>> {
        let Some(listing) = Self::listing_url(uri) else {
            return chain.next(uri);
        };
        debug!(%uri, %listing, "resolving github release listing");
        let client = blocking_client(&self.config)?;
        let releases: Vec<Release> = client
            .get(listing.as_str())
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.json())
            .map_err(|e| Error::not_found(format!("github release listing for '{uri}': {e}")))?;

        let filter = uri.query().unwrap_or("");
        for release in &releases {
            for asset in &release.assets {
                if !filter.is_empty() && !asset.name.contains(filter) {
                    continue;
                }
                let target = Url::parse(&asset.browser_download_url).map_err(|e| {
                    Error::invalid(format!(
                        "github asset url '{}' did not parse: {e}",
                        asset.browser_download_url
                    ))
                })?;
                debug!(asset = %asset.name, %target, "github release asset selected");
                return chain.restart(&target);
            }
        }
        warn!(%uri, "github release listing had no matching asset");
        chain.next(uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Static(&'static str, &'static [u8]);

    impl FetchHandler for Static {
        fn fetch(&self, uri: &Url, chain: &FetchChain<'_>) -> Result<Vec<u8>> {
            if uri.as_str() == self.0 {
                Ok(self.1.to_vec())
            } else {
                chain.next(uri)
            }
        }
    }

    struct Rewrite {
        from_scheme: &'static str,
        to: &'static str,
    }

    impl FetchHandler for Rewrite {
        fn fetch(&self, uri: &Url, chain: &FetchChain<'_>) -> Result<Vec<u8>> {
            if uri.scheme() == self.from_scheme {
                chain.restart(&Url::parse(self.to).unwrap())
            } else {
                chain.next(uri)
            }
        }
    }

    #[test]
    fn empty_registry_is_not_found() {
        let registry = FetchRegistry::empty();
        let err = registry.fetch(&Url::parse("test://x").unwrap()).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let registry = FetchRegistry::empty();
        registry.register(Arc::new(Static("test://x", b"first")));
        registry.register(Arc::new(Static("test://x", b"second")));
        let bytes = registry.fetch(&Url::parse("test://x").unwrap()).unwrap();
        assert_eq!(bytes, b"first");
    }

    #[test]
    fn filters_run_before_earlier_registrations() {
        let registry = FetchRegistry::empty();
        registry.register(Arc::new(Static("test://x", b"normal")));
        registry.register_filter(Arc::new(Static("test://x", b"filtered")));
        let bytes = registry.fetch(&Url::parse("test://x").unwrap()).unwrap();
        assert_eq!(bytes, b"filtered");
    }

    #[test]
    fn restart_reenters_the_whole_chain() {
        let registry = FetchRegistry::empty();
        registry.register(Arc::new(Static("test://real", b"payload")));
        registry.register(Arc::new(Rewrite {
            from_scheme: "alias",
            to: "test://real",
        }));
        let bytes = registry.fetch(&Url::parse("alias://x").unwrap()).unwrap();
        assert_eq!(bytes, b"payload");
    }

    #[test]
    fn restart_loops_are_cut_off() {
        let registry = FetchRegistry::empty();
        registry.register(Arc::new(Rewrite {
            from_scheme: "alias",
            to: "alias://again",
        }));
        let err = registry
            .fetch(&Url::parse("alias://x").unwrap())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn github_listing_url_recognition() {
        let listing = |s: &str| GithubReleases::listing_url(&Url::parse(s).unwrap());

        let api = listing("https://github.com/owner/repo/release").unwrap();
        assert_eq!(
            api.as_str(),
            "https://api.github.com/repos/owner/repo/releases"
        );
        assert!(listing("https://github.com/owner/repo/release/").is_some());
        assert!(listing("https://api.github.com/repos/owner/repo/releases").is_some());
        assert!(listing("https://github.com/owner/repo").is_none());
        assert!(listing("https://example.com/owner/repo/release").is_none());
        assert!(listing("ftp://github.com/owner/repo/release").is_none());
    }
}
