use std::time::Duration;

use bilifetch_core::models::settings::{AppSettings, ProxySettings};

use crate::error::{Error, Result};

pub fn proxy_url(proxy: &ProxySettings) -> Option<String> {
    if !proxy.enabled || proxy.host.is_empty() {
        return None;
    }
    let scheme = match proxy.proxy_type.as_str() {
        "socks5" => "socks5",
        "https" => "https",
        _ => "http",
    };
    if !proxy.username.is_empty() {
        Some(format!(
            "{}://{}:{}@{}:{}",
            scheme, proxy.username, proxy.password, proxy.host, proxy.port
        ))
    } else {
        Some(format!("{}://{}:{}", scheme, proxy.host, proxy.port))
    }
}

pub fn apply_proxy(
    builder: reqwest::ClientBuilder,
    proxy: &ProxySettings,
) -> reqwest::ClientBuilder {
    let Some(url) = proxy_url(proxy) else {
        return builder;
    };
    match reqwest::Proxy::all(&url) {
        Ok(p) => builder.proxy(p),
        Err(e) => {
            tracing::warn!("Invalid proxy URL: {}", e);
            builder
        }
    }
}

/// Client used for byte transfers. No overall timeout: transfers are bounded
/// by the caller and by the stall timer instead.
pub fn transfer_client(settings: &AppSettings) -> Result<reqwest::Client> {
    let builder = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .user_agent(settings.download.user_agent.clone());
    apply_proxy(builder, &settings.proxy)
        .build()
        .map_err(|e| Error::Config(format!("http client: {}", e)))
}

/// Client used for platform API calls.
pub fn api_client_builder(settings: &AppSettings) -> reqwest::ClientBuilder {
    let builder = reqwest::Client::builder()
        .timeout(Duration::from_secs(settings.api.request_timeout_secs))
        .user_agent(settings.download.user_agent.clone());
    apply_proxy(builder, &settings.proxy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_url_disabled() {
        assert!(proxy_url(&ProxySettings::default()).is_none());
    }

    #[test]
    fn proxy_url_with_auth() {
        let proxy = ProxySettings {
            enabled: true,
            proxy_type: "socks5".into(),
            host: "127.0.0.1".into(),
            port: 1080,
            username: "u".into(),
            password: "p".into(),
        };
        assert_eq!(
            proxy_url(&proxy).as_deref(),
            Some("socks5://u:p@127.0.0.1:1080")
        );
    }

    #[test]
    fn proxy_url_unknown_scheme_is_http() {
        let proxy = ProxySettings {
            enabled: true,
            proxy_type: "weird".into(),
            host: "proxy.local".into(),
            port: 8080,
            ..ProxySettings::default()
        };
        assert_eq!(proxy_url(&proxy).as_deref(), Some("http://proxy.local:8080"));
    }
}
