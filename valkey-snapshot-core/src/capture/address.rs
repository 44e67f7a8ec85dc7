/*!
Endpoint addresses.

Both capture strategies resolve the configured `endpoint` string through
[`endpoint_url`], so a bare `host:port` and a full `redis://` URL name the
same server whichever strategy reads them.
*/

use url::Url;

use crate::config::EndpointConfig;
use crate::{Result, SnapshotError};

/// Port assumed when the endpoint does not name one
pub const DEFAULT_PORT: u16 = 6379;

const PLAIN_SCHEME: &str = "redis";
const TLS_SCHEME: &str = "rediss";

/// Parsed client URL for an endpoint.
///
/// A bare `host:port` is read as `redis://host:port`. The configured password
/// fills the userinfo unless the URL already carries one, and the configured
/// database becomes the path unless the URL already selects one.
pub fn endpoint_url(endpoint: &EndpointConfig) -> Result<Url> {
    let raw = endpoint.endpoint.trim();
    let invalid = |reason: String| {
        SnapshotError::config(format!(
            "entry '{}' has an invalid endpoint '{}': {}",
            endpoint.name, raw, reason
        ))
    };

    let mut url = if raw.contains("://") {
        Url::parse(raw)
    } else {
        Url::parse(&format!("redis://{raw}"))
    }
    .map_err(|e| invalid(e.to_string()))?;

    if !matches!(url.scheme(), PLAIN_SCHEME | TLS_SCHEME) {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }

    if url.password().is_none() {
        if let Some(password) = endpoint.password() {
            url.set_password(Some(password))
                .map_err(|_| invalid("password cannot be set on this URL".to_string()))?;
        }
    }
    if matches!(url.path(), "" | "/") {
        url.set_path(&format!("/{}", endpoint.database));
    }

    Ok(url)
}

/// Whether the endpoint requires a TLS session
pub fn uses_tls(url: &Url) -> bool {
    url.scheme() == TLS_SCHEME
}

/// `host:port` of the endpoint for a raw replication connection.
///
/// Physical capture speaks plain TCP only, so TLS endpoints are rejected.
pub fn replication_address(endpoint: &EndpointConfig) -> Result<String> {
    let url = endpoint_url(endpoint)?;
    if uses_tls(&url) {
        return Err(SnapshotError::config(format!(
            "entry '{}' uses TLS ({}://), which physical capture does not support",
            endpoint.name,
            url.scheme()
        )));
    }

    let host = url.host_str().unwrap_or_default();
    let port = url.port().unwrap_or(DEFAULT_PORT);
    Ok(format!("{host}:{port}"))
}
