//! Text exposition endpoint, basic-auth gate and the optional dedicated
//! listener.

use axum::{
    Router,
    extract::{Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use base64::Engine;
use prometheus::{Encoder, TextEncoder};
use tracing::{error, info};

use crate::{Accounts, Prometheus};

/// Build the exposition routes: the metrics path, gated by basic auth when
/// accounts are configured.
pub(crate) fn routes(prom: &Prometheus) -> Router {
    let mut router = Router::new().route(prom.metrics_path(), get(serve_metrics));
    if prom.inner.accounts.is_some() {
        router = router.route_layer(middleware::from_fn_with_state(prom.clone(), basic_auth));
    }
    router.with_state(prom.clone())
}

/// Bind `addr` and serve the exposition routes from a dedicated listener.
pub(crate) async fn serve(prom: &Prometheus, addr: &str) -> std::io::Result<std::net::SocketAddr> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    let router = routes(prom);
    info!(addr = %local, "metrics exposition listening");
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, router).await {
            error!(%err, "metrics exposition server exited");
        }
    });
    Ok(local)
}

/// Spawn the dedicated exposition listener, logging instead of propagating
/// bind failures. Used by [`Prometheus::instrument`].
pub(crate) fn spawn_exposition_server(prom: &Prometheus, addr: String) {
    let prom = prom.clone();
    tokio::spawn(async move {
        if let Err(err) = serve(&prom, &addr).await {
            error!(%err, %addr, "failed to bind metrics listener");
        }
    });
}

async fn serve_metrics(State(prom): State<Prometheus>) -> Response {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&prom.inner.registry.gather(), &mut buffer) {
        error!(%err, "failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    ([(header::CONTENT_TYPE, encoder.format_type())], buffer).into_response()
}

async fn basic_auth(State(prom): State<Prometheus>, req: Request, next: Next) -> Response {
    if authorized(prom.inner.accounts.as_ref(), req.headers().get(header::AUTHORIZATION)) {
        return next.run(req).await;
    }
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic realm=\"metrics\"")],
    )
        .into_response()
}

fn authorized(accounts: Option<&Accounts>, authorization: Option<&HeaderValue>) -> bool {
    let Some(accounts) = accounts else {
        return true;
    };
    let Some(value) = authorization.and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let Some(encoded) = value.strip_prefix("Basic ") else {
        return false;
    };
    let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded) else {
        return false;
    };
    let Ok(credentials) = String::from_utf8(decoded) else {
        return false;
    };
    let Some((user, password)) = credentials.split_once(':') else {
        return false;
    };
    accounts.get(user).is_some_and(|expected| expected == password)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accounts() -> Accounts {
        Accounts::from([("admin".to_owned(), "secret".to_owned())])
    }

    fn header_for(user: &str, password: &str) -> HeaderValue {
        let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{password}"));
        HeaderValue::from_str(&format!("Basic {encoded}")).unwrap()
    }

    #[test]
    fn valid_credentials_are_accepted() {
        let header = header_for("admin", "secret");
        assert!(authorized(Some(&accounts()), Some(&header)));
    }

    #[test]
    fn wrong_password_and_missing_header_are_rejected() {
        let header = header_for("admin", "nope");
        assert!(!authorized(Some(&accounts()), Some(&header)));
        assert!(!authorized(Some(&accounts()), None));
    }

    #[test]
    fn malformed_authorization_is_rejected() {
        let header = HeaderValue::from_static("Basic not-base64!");
        assert!(!authorized(Some(&accounts()), Some(&header)));
        let header = HeaderValue::from_static("Bearer abcdef");
        assert!(!authorized(Some(&accounts()), Some(&header)));
    }

    #[test]
    fn no_accounts_means_open_endpoint() {
        assert!(authorized(None, None));
    }
}
