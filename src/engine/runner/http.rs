use std::net::SocketAddr;
use std::thread;

use axum::Router;
use camino::Utf8PathBuf;
use console::style;
use tower_http::services::ServeDir;

/// Serves the output root on `127.0.0.1:<port>` from a background thread.
/// A server which cannot start is logged, watching goes on without it.
pub fn start(port: u16, root: Utf8PathBuf) -> thread::JoinHandle<()> {
    let url = format!("http://localhost:{port}/");
    tracing::info!(url = %style(&url).yellow(), root = %root, "starting a HTTP server");

    thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::error!("couldn't start the HTTP runtime: {e}");
                return;
            }
        };

        if let Err(e) = runtime.block_on(serve(port, root)) {
            tracing::error!(%url, "HTTP server stopped: {e}");
        }
    })
}

async fn serve(port: u16, root: Utf8PathBuf) -> anyhow::Result<()> {
    let address = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(address).await?;
    let router = Router::new().fallback_service(ServeDir::new(root));

    axum::serve(listener, router).await?;
    Ok(())
}
