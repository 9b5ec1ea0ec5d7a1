use std::sync::Arc;
use std::time::Duration;

use hyper::body::to_bytes;
use hyper::client::HttpConnector;
use hyper::header::CONTENT_TYPE;
use hyper::{Body, Client, Request, StatusCode};
use hyper_rustls::HttpsConnector;
use rustls::{ClientConfig, OwnedTrustAnchor, RootCertStore};
use tokio::time::timeout;
use webpki_roots::TLS_SERVER_ROOTS;

use crate::{FallbackError, FallbackResult};

/// JSON poster accepting both `http://` and `https://` peers.
#[derive(Clone)]
pub(crate) struct JsonPoster {
    client: Client<HttpsConnector<HttpConnector>, Body>,
    timeout: Duration,
}

impl std::fmt::Debug for JsonPoster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonPoster")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl JsonPoster {
    pub(crate) fn new(request_timeout: Duration) -> Self {
        let mut roots = RootCertStore::empty();
        roots.add_trust_anchors(TLS_SERVER_ROOTS.iter().map(|anchor| {
            OwnedTrustAnchor::from_subject_spki_name_constraints(
                anchor.subject,
                anchor.spki,
                anchor.name_constraints,
            )
        }));
        let tls = ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(roots)
            .with_no_client_auth();

        let mut http = HttpConnector::new();
        http.enforce_http(false);
        let connector = HttpsConnector::from((http, Arc::new(tls)));

        Self {
            client: Client::builder().build::<_, Body>(connector),
            timeout: request_timeout,
        }
    }

    /// POSTs `body` and returns the status with the response bytes.
    pub(crate) async fn post(&self, url: &str, body: Vec<u8>) -> FallbackResult<(StatusCode, Vec<u8>)> {
        let request = Request::post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .map_err(|err| FallbackError::http(format!("invalid request to {url}: {err}")))?;

        let response = timeout(self.timeout, self.client.request(request))
            .await
            .map_err(|_| FallbackError::http(format!("request to {url} timed out")))?
            .map_err(|err| FallbackError::http(format!("request to {url} failed: {err}")))?;

        let status = response.status();
        let bytes = to_bytes(response.into_body())
            .await
            .map_err(|err| FallbackError::http(format!("failed to read response: {err}")))?;
        Ok((status, bytes.to_vec()))
    }
}
