//! HTTP server exposing a `LogEndpoint`

use crate::core_log::sync::endpoint::{Command, LogEndpoint};
use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Build the router serving every sync command under `/{prefix}/`
pub fn build_router(endpoint: LogEndpoint, prefix: &str) -> Router {
    let prefix = prefix.trim_matches('/');
    let path = if prefix.is_empty() {
        "/:command".to_string()
    } else {
        format!("/{}/:command", prefix)
    };

    Router::new()
        .route(&path, get(handle_command).post(handle_command))
        .with_state(endpoint)
}

/// GET/POST /{prefix}/{command}
async fn handle_command(
    State(endpoint): State<LogEndpoint>,
    Path(command): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    method: axum::http::Method,
    body: String,
) -> Response {
    let command = match command.parse::<Command>() {
        Ok(command) => command,
        Err(e) => return (StatusCode::NOT_FOUND, e.to_string()).into_response(),
    };
    if command.is_post() != (method == axum::http::Method::POST) {
        return (StatusCode::METHOD_NOT_ALLOWED, format!("{} does not accept {}", command, method))
            .into_response();
    }

    // Store access is blocking file I/O.
    let response =
        tokio::task::spawn_blocking(move || endpoint.dispatch(command, &params, &body)).await;

    match response {
        Ok(response) => {
            let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, response.body).into_response()
        }
        Err(e) => {
            error!(%command, error = %e, "sync request task failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
        }
    }
}

/// Sync endpoint bound to a local address
pub struct SyncServer {
    listener: TcpListener,
    router: Router,
}

impl SyncServer {
    /// Bind `addr`; port 0 picks a free port
    pub async fn bind(addr: &str, endpoint: LogEndpoint, prefix: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let router = build_router(endpoint, prefix);
        Ok(Self { listener, router })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `shutdown` completes
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!("Sync endpoint listening on {}", self.local_addr()?);

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Sync endpoint stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::fixtures::{events, store_in};
    use tempfile::tempdir;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_serves_over_http() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        store.put(&events("t", 1, &[1, 2, 3])).unwrap();

        let server = SyncServer::bind("127.0.0.1:0", LogEndpoint::new(store), "auditlog").await.unwrap();
        let addr = server.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.run(async {
            let _ = stopped.await;
        }));

        let client = reqwest::Client::new();
        let base = format!("http://{}/auditlog", addr);

        let query = client.get(format!("{}/query", base)).send().await.unwrap();
        assert_eq!(query.status().as_u16(), 200);
        assert_eq!(query.text().await.unwrap(), "t,1,1-3\n");

        let unknown = client.get(format!("{}/delete", base)).send().await.unwrap();
        assert_eq!(unknown.status().as_u16(), 404);

        let wrong_method = client.get(format!("{}/send", base)).send().await.unwrap();
        assert_eq!(wrong_method.status().as_u16(), 405);

        let bad = client.get(format!("{}/receive?tid=t", base)).send().await.unwrap();
        assert_eq!(bad.status().as_u16(), 400);

        stop.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }
}
