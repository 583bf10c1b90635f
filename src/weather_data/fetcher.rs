use crate::weather_data::error::FetchError;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use log::{info, warn};
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::Client;

const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
const ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const ACCEPT_LANGUAGE: &str = "es-CR,es;q=0.9,en;q=0.5";

/// Where the raw station page comes from.
///
/// The cache only ever talks to this trait, so tests can swap in a fake.
pub trait PageSource: Send + Sync {
    /// Fetches the page body once. No retries.
    fn fetch(&self) -> BoxFuture<'_, Result<String, FetchError>>;

    /// Used in log lines and timeout errors.
    fn describe(&self) -> &str;
}

/// Fetches the institute's status page over HTTP.
#[derive(Debug, Clone)]
pub struct ImnFetcher {
    url: String,
    client: Client,
}

impl ImnFetcher {
    pub fn new(url: &str) -> Result<ImnFetcher, reqwest::Error> {
        let client = Client::builder()
            .default_headers(Self::headers(url))
            .gzip(true)
            .build()?;
        Ok(ImnFetcher {
            url: url.to_string(),
            client,
        })
    }

    /// The fixed header set; a bare client gets turned away as a bot.
    fn headers(url: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
        headers.insert(header::ACCEPT, HeaderValue::from_static(ACCEPT));
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static(ACCEPT_LANGUAGE),
        );
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        if let Ok(referer) = HeaderValue::from_str(&referer_for(url)) {
            headers.insert(header::REFERER, referer);
        }
        headers
    }

    async fn download(&self) -> Result<String, FetchError> {
        info!("Downloading station page from {}", self.url);

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| FetchError::NetworkRequest(self.url.clone(), e))?;

        let response = match response.error_for_status() {
            Ok(resp) => resp,
            Err(e) => {
                warn!("HTTP error for {}: {:?}", self.url, e);
                return Err(match e.status() {
                    Some(status) => FetchError::HttpStatus {
                        url: self.url.clone(),
                        status,
                        source: e,
                    },
                    None => FetchError::NetworkRequest(self.url.clone(), e),
                });
            }
        };

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Body(self.url.clone(), e))?;
        info!("Downloaded {} bytes from {}", body.len(), self.url);
        Ok(body)
    }
}

impl PageSource for ImnFetcher {
    fn fetch(&self) -> BoxFuture<'_, Result<String, FetchError>> {
        self.download().boxed()
    }

    fn describe(&self) -> &str {
        &self.url
    }
}

/// Scheme and host of `url`, which is what a browser sends when following
/// a link from the site's own front page.
fn referer_for(url: &str) -> String {
    match url.split_once("://") {
        Some((scheme, rest)) => {
            let host = rest.split('/').next().unwrap_or(rest);
            format!("{scheme}://{host}/")
        }
        None => url.to_string(),
    }
}
