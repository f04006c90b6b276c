//! GeoNet API client.
//!
//! Talks to the public `api.geonet.org.nz` service: the `quake` endpoint
//! for the quake list and the `intensity` endpoint (reported type) for felt
//! reports.

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::ACCEPT;
use reqwest::Client;
use tracing::{debug, info, warn};
use url::Url;

use super::{parse_felt_reports, parse_quakes, QuakeSource};
use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::report::{FeltReport, Quake};

/// Media type GeoNet expects for GeoJSON answers.
const GEOJSON_ACCEPT: &str = "application/vnd.geo+json;version=2";

/// Base delay between retries; doubled on every attempt.
const RETRY_BASE_DELAY_MS: u64 = 100;

/// Shape of a GeoNet public ID.
const PUBLIC_ID_PATTERN: &str = r"^[A-Za-z0-9]+$";

/// HTTP client for the GeoNet API.
#[derive(Debug, Clone)]
pub struct GeoNetClient {
    client: Client,
    base_url: Url,
    max_retries: u32,
    public_id_pattern: Regex,
}

impl GeoNetClient {
    /// Create a client from API configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL does not parse or the HTTP client
    /// cannot be built.
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let mut base_url = Url::parse(&config.base_url).map_err(|e| Error::ConfigValidation {
            message: format!("invalid api.base_url {:?}: {e}", config.base_url),
        })?;
        // Url::join replaces the last segment unless the path ends in '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("feltmap/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| Error::Http {
                url: base_url.to_string(),
                source,
            })?;

        let public_id_pattern =
            Regex::new(PUBLIC_ID_PATTERN).map_err(|e| Error::internal(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            max_retries: config.max_retries,
            public_id_pattern,
        })
    }

    /// The base URL requests are resolved against.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// URL of the quake list for a minimum intensity.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint cannot be joined onto the base URL.
    pub fn quakes_url(&self, min_mmi: i32) -> Result<Url> {
        let mut url = self.endpoint("quake")?;
        url.query_pairs_mut()
            .append_pair("MMI", &min_mmi.to_string());
        Ok(url)
    }

    /// URL of the reported intensities for one quake.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPublicId`] if the ID is not alphanumeric.
    pub fn intensity_url(&self, public_id: &str) -> Result<Url> {
        if !self.public_id_pattern.is_match(public_id) {
            return Err(Error::InvalidPublicId(public_id.to_string()));
        }
        let mut url = self.endpoint("intensity")?;
        url.query_pairs_mut()
            .append_pair("type", "reported")
            .append_pair("publicID", public_id);
        Ok(url)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::internal(format!("cannot build {path} URL: {e}")))
    }

    /// GET a URL, retrying transient failures with exponential backoff.
    async fn fetch(&self, url: &Url) -> Result<String> {
        let mut attempt = 0;
        loop {
            match self.fetch_once(url).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = retry_delay(attempt);
                    warn!(
                        "GeoNet request failed (attempt {}/{}), retrying in {:?}: {}",
                        attempt,
                        self.max_retries + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_once(&self, url: &Url) -> Result<String> {
        debug!("GET {}", url);
        let http_error = |source| Error::Http {
            url: url.to_string(),
            source,
        };

        let response = self
            .client
            .get(url.clone())
            .header(ACCEPT, GEOJSON_ACCEPT)
            .send()
            .await
            .map_err(http_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::ApiStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(http_error)
    }
}

/// Delay before retry number `attempt` (1-based).
fn retry_delay(attempt: u32) -> Duration {
    Duration::from_millis(RETRY_BASE_DELAY_MS << attempt.min(10))
}

#[async_trait]
impl QuakeSource for GeoNetClient {
    fn name(&self) -> &'static str {
        "geonet"
    }

    async fn quakes(&self, min_mmi: i32) -> Result<Vec<Quake>> {
        let url = self.quakes_url(min_mmi)?;
        let body = self.fetch(&url).await?;
        let quakes = parse_quakes(&body)?;
        info!("GeoNet listed {} quake(s) at MMI {} or above", quakes.len(), min_mmi);
        Ok(quakes)
    }

    async fn felt_reports(&self, public_id: &str) -> Result<Vec<FeltReport>> {
        let url = self.intensity_url(public_id)?;
        let body = self.fetch(&url).await?;
        let reports = parse_felt_reports(&body)?;
        debug!("Quake {} has {} felt report point(s)", public_id, reports.len());
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    const ONE_QUAKE: &str = r#"{"type": "FeatureCollection", "features": [{
        "type": "Feature",
        "geometry": {"type": "Point", "coordinates": [173.02, -42.69]},
        "properties": {"publicID": "2016p858000", "mmi": 8}
    }]}"#;

    fn client_for(base_url: &str) -> GeoNetClient {
        client_with_retries(base_url, 0)
    }

    fn client_with_retries(base_url: &str, max_retries: u32) -> GeoNetClient {
        let config = ApiConfig {
            base_url: base_url.to_string(),
            max_retries,
            timeout_secs: 5,
            ..ApiConfig::default()
        };
        GeoNetClient::new(&config).unwrap()
    }

    /// Answer one connection per canned response, in order. Returns the
    /// base URL and a counter of requests received.
    async fn serve(responses: Vec<(u16, &'static str)>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        tokio::spawn(async move {
            for (status, body) in responses {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);

                let mut request = vec![0u8; 4096];
                let _ = socket.read(&mut request).await;

                let reply = format!(
                    "HTTP/1.1 {status} Test\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(reply.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{addr}"), hits)
    }

    #[test]
    fn test_quakes_url() {
        let client = client_for("https://api.geonet.org.nz");
        let url = client.quakes_url(5).unwrap();
        assert_eq!(url.as_str(), "https://api.geonet.org.nz/quake?MMI=5");
    }

    #[test]
    fn test_quakes_url_negative_mmi() {
        let client = client_for("https://api.geonet.org.nz");
        let url = client.quakes_url(-1).unwrap();
        assert_eq!(url.as_str(), "https://api.geonet.org.nz/quake?MMI=-1");
    }

    #[test]
    fn test_intensity_url() {
        let client = client_for("https://api.geonet.org.nz/");
        let url = client.intensity_url("2016p858000").unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.geonet.org.nz/intensity?type=reported&publicID=2016p858000"
        );
    }

    #[test]
    fn test_base_url_with_path_is_kept() {
        let client = client_for("http://localhost:8080/geonet");
        let url = client.quakes_url(4).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/geonet/quake?MMI=4");
    }

    #[test]
    fn test_intensity_url_rejects_unsafe_ids() {
        let client = client_for("https://api.geonet.org.nz");
        for id in ["", "2016p858000&type=measured", "../quake", "2016p 858000"] {
            let err = client.intensity_url(id).unwrap_err();
            assert!(matches!(err, Error::InvalidPublicId(_)), "accepted {id:?}");
        }
    }

    #[test]
    fn test_invalid_base_url() {
        let config = ApiConfig {
            base_url: "not a url".to_string(),
            ..ApiConfig::default()
        };
        let err = GeoNetClient::new(&config).unwrap_err();
        assert!(err.to_string().contains("api.base_url"));
    }

    #[test]
    fn test_retry_delay_doubles() {
        assert_eq!(retry_delay(1), Duration::from_millis(200));
        assert_eq!(retry_delay(2), Duration::from_millis(400));
        assert_eq!(retry_delay(3), Duration::from_millis(800));
        assert_eq!(retry_delay(50), retry_delay(10));
    }

    #[test]
    fn test_source_name() {
        assert_eq!(client_for("https://api.geonet.org.nz").name(), "geonet");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_http_error() {
        // Nothing listens on port 1; the connection is refused immediately.
        let client = client_for("http://127.0.0.1:1");
        let err = client.quakes(5).await.unwrap_err();
        assert!(matches!(err, Error::Http { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let (base_url, hits) = serve(vec![(503, ""), (200, ONE_QUAKE)]).await;
        let client = client_with_retries(&base_url, 2);

        let quakes = client.quakes(5).await.unwrap();

        assert_eq!(quakes.len(), 1);
        assert_eq!(quakes[0].public_id, "2016p858000");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rate_limit_is_retried() {
        let (base_url, hits) = serve(vec![(429, ""), (200, ONE_QUAKE)]).await;
        let client = client_with_retries(&base_url, 1);

        assert_eq!(client.quakes(5).await.unwrap().len(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retries_run_out() {
        let (base_url, hits) = serve(vec![(502, ""), (503, ""), (200, ONE_QUAKE)]).await;
        let client = client_with_retries(&base_url, 1);

        let err = client.quakes(5).await.unwrap_err();

        assert!(matches!(err, Error::ApiStatus { status: 503, .. }), "got {err:?}");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let (base_url, hits) = serve(vec![(404, ""), (200, ONE_QUAKE)]).await;
        let client = client_with_retries(&base_url, 3);

        let err = client.felt_reports("2016p858000").await.unwrap_err();

        assert!(matches!(err, Error::ApiStatus { status: 404, .. }), "got {err:?}");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
