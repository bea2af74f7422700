use reqwest::Client;
use tracing::debug;

use crate::ProbeConfig;
use crate::error::ProbeError;
use crate::proxy::build_proxy_from_config;

/// Create a reqwest Client for probing a single address.
///
/// Every address gets its own client so pooled connections and redirect state
/// never leak between unrelated streams. User agent and referer are set per
/// request because they may change while rotating agents.
pub fn create_client(config: &ProbeConfig) -> Result<Client, ProbeError> {
    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(2)
        .default_headers(config.headers.clone())
        .danger_accept_invalid_certs(config.danger_accept_invalid_certs)
        .redirect(if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    if let Some(proxy_config) = &config.proxy {
        // Explicit proxy configuration takes precedence
        client_builder = client_builder.proxy(build_proxy_from_config(proxy_config)?);
        debug!(proxy_url = %proxy_config.url, "Using explicitly configured proxy");
    } else if !config.use_system_proxy {
        client_builder = client_builder.no_proxy();
    }

    client_builder
        .build()
        .map_err(|e| ProbeError::Client(e.to_string()))
}
