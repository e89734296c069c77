use axum::{
    body::Body,
    extract::{Request, State},
    http::{
        HeaderName, HeaderValue, Response, StatusCode,
        header::{CONTENT_LENGTH, COOKIE, USER_AGENT},
    },
};
use tracing::{debug, warn};
use wire::{HEADER_ENGINE_PLATFORM, HEADER_ENGINE_VERSION, HEADER_UI_VERSION};

use crate::{
    config::{HttpClientParams, certificate_verification_disabled},
    logging::category_proxy,
    runtime::{SharedState, text_response},
};

/// The one remote path answered with extra identification headers, so the UI can tell
/// it is being served by a local bridge.
pub const CONFIG_PATH: &str = "/config";

pub fn build_client(params: &HttpClientParams) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(params.timeout)
        .timeout(params.timeout)
        .redirect(reqwest::redirect::Policy::none());

    if let Some(proxy_url) = params.proxy_url() {
        let mut proxy = reqwest::Proxy::all(proxy_url.as_str())?;
        if let Some(username) = params.http_proxy_username.as_deref() {
            proxy = proxy.basic_auth(
                username,
                params.http_proxy_password.as_deref().unwrap_or(""),
            );
        }
        builder = builder.proxy(proxy);
    }

    if certificate_verification_disabled() {
        warn!(
            "{} server certificate verification disabled",
            category_proxy()
        );
        builder = builder.danger_accept_invalid_certs(true);
    }

    builder.build()
}

pub fn user_agent(engine_version: &str, ui_version: &str, platform: &str) -> String {
    format!("duckdb-ui/{engine_version}-{ui_version}({platform})")
}

/// Forwards any GET without a dedicated route to the remote UI origin.
pub async fn proxy_handler(State(state): State<SharedState>, request: Request) -> Response<Body> {
    let binding = state.binding();
    let path = request.uri().path().to_string();
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|value| value.as_str())
        .unwrap_or("/");
    let remote_url = format!("{}{}", state.remote_url.trim_end_matches('/'), path_and_query);

    let mut outbound = state.client.get(&remote_url).header(
        USER_AGENT,
        user_agent(&binding.engine_version, &state.ui_version, &binding.platform),
    );
    if let Some(cookie) = request.headers().get(COOKIE) {
        outbound = outbound.header(COOKIE, cookie.clone());
    }

    let fetched = match outbound.send().await {
        Ok(response) => {
            let status = response.status();
            let headers = response.headers().clone();
            response.bytes().await.map(|body| (status, headers, body))
        }
        Err(err) => Err(err),
    };
    let (status, upstream_headers, body) = match fetched {
        Ok(parts) => parts,
        Err(err) => {
            warn!(
                "{} fetch failed path={path} remote={}: {err}",
                category_proxy(),
                state.remote_url
            );
            return text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!(
                    "Could not fetch: '{path}' from '{}': {err}",
                    state.remote_url
                ),
            );
        }
    };
    debug!(
        "{} {path} -> {} ({} bytes)",
        category_proxy(),
        status.as_u16(),
        body.len()
    );

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    for (name, value) in &upstream_headers {
        if name != CONTENT_LENGTH && !is_hop_by_hop(name) {
            response.headers_mut().append(name, value.clone());
        }
    }

    if path == CONFIG_PATH {
        let identification = [
            (HEADER_ENGINE_VERSION, binding.engine_version.as_str()),
            (HEADER_ENGINE_PLATFORM, binding.platform.as_str()),
            (HEADER_UI_VERSION, state.ui_version.as_str()),
        ];
        for (name, value) in identification {
            if let Ok(value) = HeaderValue::from_str(value) {
                response
                    .headers_mut()
                    .insert(HeaderName::from_static(name), value);
            }
        }
    }

    response
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str().to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_names_engine_ui_and_platform() {
        assert_eq!(
            user_agent("v1.2.0", "0.1.0", "osx_arm64"),
            "duckdb-ui/v1.2.0-0.1.0(osx_arm64)"
        );
    }

    #[test]
    fn hop_by_hop_headers_are_not_relayed() {
        assert!(is_hop_by_hop(&HeaderName::from_static("transfer-encoding")));
        assert!(is_hop_by_hop(&HeaderName::from_static("connection")));
        assert!(!is_hop_by_hop(&HeaderName::from_static("set-cookie")));
    }

    #[test]
    fn client_builds_with_proxy_credentials() {
        let params = HttpClientParams {
            http_proxy: Some("127.0.0.1".to_string()),
            http_proxy_port: Some(3128),
            http_proxy_username: Some("user".to_string()),
            http_proxy_password: Some("secret".to_string()),
            ..HttpClientParams::default()
        };
        assert!(build_client(&params).is_ok());
    }
}
