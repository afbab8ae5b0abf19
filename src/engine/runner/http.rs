//! Development HTTP server.
//!
//! Serves the configured base directory and injects the live reload client
//! into every HTML page on the way out. The server runs on its own thread with
//! a dedicated runtime; the leaf completes as soon as the listener accepts
//! connections.

use std::net::TcpListener;
use std::sync::Arc;
use std::thread;

use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use camino::Utf8PathBuf;
use console::style;
use tower_http::services::ServeDir;
use tracing::info;

use crate::core::Context;
use crate::engine::Done;
use crate::error::ServerError;
use crate::reload::client_script;

/// Body of the server leaf.
pub(crate) fn start(ctx: &Context, done: Done) -> anyhow::Result<()> {
    let config = &ctx.config.server;

    let ws = reserve_port(config.reload_port).map_err(ServerError::Bind)?;
    let ws_port = ws.local_addr().map_err(ServerError::from)?.port();
    // Both threads live for the rest of the process.
    let _ws_threads = ctx.reloader.serve_websocket(ws);

    let http = reserve_port(config.port).map_err(ServerError::Bind)?;
    let port = http.local_addr().map_err(ServerError::from)?.port();
    let base = ctx.config.path(&config.base);

    info!(url = %style(format!("http://localhost:{port}/")).yellow(), "starting a HTTP server");

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(ServerError::from)?;

    thread::spawn(move || rt.block_on(serve(http, base, ws_port, done)));

    Ok(())
}

/// Binds the preferred port on localhost, or any free port if it's taken.
fn reserve_port(preferred: u16) -> std::io::Result<TcpListener> {
    match TcpListener::bind(("127.0.0.1", preferred)) {
        Ok(sock) => Ok(sock),
        Err(e) => {
            tracing::warn!("port {preferred} unavailable ({e}), picking another one");
            TcpListener::bind("127.0.0.1:0")
        }
    }
}

async fn serve(listener: TcpListener, base: Utf8PathBuf, ws_port: u16, done: Done) {
    let listener = match listener
        .set_nonblocking(true)
        .and_then(|()| tokio::net::TcpListener::from_std(listener))
    {
        Ok(listener) => listener,
        Err(e) => return done.fail(ServerError::from(e)),
    };

    let script: Arc<str> = client_script(ws_port).into();

    let router = Router::new()
        // compiled site lives next to its sources
        .fallback_service(ServeDir::new(base))
        .layer(middleware::from_fn_with_state(script, inject_reload));

    done.finish();

    if let Err(e) = axum::serve(listener, router).await {
        tracing::error!("HTTP server stopped: {e}");
    }
}

async fn inject_reload(State(script): State<Arc<str>>, request: Request, next: Next) -> Response {
    let response = next.run(request).await;

    let is_html = response.status() == StatusCode::OK
        && response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("text/html"));

    if !is_html {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!("couldn't read response body: {e}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let html = inject_script(&String::from_utf8_lossy(&bytes), &script);
    parts.headers.remove(header::CONTENT_LENGTH);

    Response::from_parts(parts, Body::from(html))
}

/// Inserts `script` right before the closing body tag, or at the end of the
/// document when there is none.
pub(crate) fn inject_script(html: &str, script: &str) -> String {
    let tag = format!("<script>{script}</script>");

    match html.rfind("</body>") {
        Some(index) => {
            let mut out = String::with_capacity(html.len() + tag.len());
            out.push_str(&html[..index]);
            out.push_str(&tag);
            out.push_str(&html[index..]);
            out
        }
        None => format!("{html}{tag}"),
    }
}
