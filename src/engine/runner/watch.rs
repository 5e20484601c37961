//! Watch mode is implemented as a three-part system:
//!
//! 1. **File watcher**: Uses the `notify` crate to monitor the source root
//!    recursively. Events are debounced so an editor saving a file several
//!    times in a row triggers a single rebuild.
//! 2. **WebSocket server**: A dedicated thread using `tungstenite` keeps
//!    persistent connections with open browser tabs.
//! 3. **Client script**: The markup step injects the snippet from
//!    [`Environment::refresh_script`] into assembled pages. It listens for
//!    `"reload"` and `"css"` messages.
//!
//! ## The Loop
//!
//! When a file change is detected:
//! 1. Every step with a matching watch glob is marked dirty, together with
//!    all of its descendants in the plan.
//! 2. Only that subgraph is executed, reusing cached outputs of the rest.
//! 3. The strongest [`Reload`] of the re-run steps is broadcast to clients.
//!
//! A failed rebuild is logged and the loop keeps waiting for changes.

use std::collections::HashSet;
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use glob::{MatchOptions, Pattern};
use notify::RecursiveMode;
use notify_debouncer_full::new_debouncer;
use petgraph::graph::NodeIndex;
use tungstenite::WebSocket;

use crate::config::Config;
use crate::core::Environment;
use crate::engine::{Plan, Reload, run_once, run_steps};
use crate::error::{KilnError, WatchError};
use crate::utils::as_overhead;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Builds the plan once, then serves the output and rebuilds on changes.
/// Only returns when the watcher itself breaks down.
pub(crate) fn watch(plan: &Plan, config: &Config, mut env: Environment) -> Result<(), KilnError> {
    let (tcp, port) = reserve_port(config.reload_port).map_err(WatchError::from)?;
    env.reload = Some(port);

    tracing::info!("running initial build...");
    let (mut cache, diagnostics) = run_once(plan, &env)?;
    diagnostics.report(plan);

    let clients = Arc::new(Mutex::new(vec![]));
    let _thread_i = new_thread_ws_incoming(tcp, clients.clone());
    let (tx_reload, _thread_o) = new_thread_ws_reload(clients);

    let (tx, rx) = std::sync::mpsc::channel();
    let mut debouncer =
        new_debouncer(Duration::from_millis(250), None, tx).map_err(WatchError::from)?;

    let mut watched = HashSet::new();
    let mut filters = Vec::new();
    for index in plan.graph.node_indices() {
        for glob in &plan.graph[index].watched {
            let glob = env.src(glob);
            match resolve_watch_path(&glob) {
                Ok((path, pattern)) => {
                    watched.insert(path);
                    filters.push((index, pattern));
                }
                Err(e) => tracing::error!(path = %glob, "failed to resolve watched path: {e}"),
            }
        }
    }

    // The watcher is recursive, nested roots are redundant.
    for path in collapse_watch_paths(watched) {
        tracing::info!("watching {}", path);
        debouncer
            .watch(&path, RecursiveMode::Recursive)
            .map_err(WatchError::from)?;
    }

    #[cfg(feature = "server")]
    let _thread_http = super::http::start(config.port, env.output.clone());

    tracing::info!(port, "initial build completed, now watching for changes...");

    loop {
        let events = match rx.recv().map_err(WatchError::from)? {
            Ok(events) => events,
            Err(errors) => {
                for e in errors {
                    tracing::error!("watch error: {e}");
                }
                continue;
            }
        };

        let mut dirty = HashSet::new();
        for de in events {
            for path in &de.event.paths {
                for (index, pattern) in &filters {
                    if pattern.matches_path_with(path, MATCH_OPTIONS) {
                        dirty.insert(*index);
                    }
                }
            }
        }

        if dirty.is_empty() {
            continue;
        }

        let s = Instant::now();
        let to_rerun = affected_steps(plan, &dirty);
        tracing::info!("change detected, re-running {} steps...", to_rerun.len());

        match run_steps(plan, &env, &mut cache, &to_rerun) {
            Ok(diagnostics) => {
                diagnostics.report(plan);
                let reload = strongest_reload(plan, &to_rerun);
                if reload != Reload::None {
                    // The socket thread only stops together with the process.
                    let _ = tx_reload.send(reload);
                }
                tracing::info!("rebuild complete {}", as_overhead(s));
            }
            Err(e) => tracing::error!("rebuild failed: {e}"),
        }
    }
}

/// Dirty steps together with every step reachable from them.
fn affected_steps(plan: &Plan, dirty: &HashSet<NodeIndex>) -> HashSet<NodeIndex> {
    let mut to_rerun = HashSet::new();
    for start in dirty {
        let mut dfs = petgraph::visit::Dfs::new(&plan.graph, *start);
        while let Some(nx) = dfs.next(&plan.graph) {
            to_rerun.insert(nx);
        }
    }
    to_rerun
}

fn strongest_reload(plan: &Plan, steps: &HashSet<NodeIndex>) -> Reload {
    steps
        .iter()
        .map(|index| plan.graph[*index].reload)
        .max()
        .unwrap_or_default()
}

/// Binds the live-reload socket, falling back to any free port.
fn reserve_port(preferred: u16) -> std::io::Result<(TcpListener, u16)> {
    let listener = match TcpListener::bind(("127.0.0.1", preferred)) {
        Ok(sock) => sock,
        Err(_) => TcpListener::bind("127.0.0.1:0")?,
    };

    let addr = listener.local_addr()?;
    let port = addr.port();
    Ok((listener, port))
}

fn new_thread_ws_incoming(
    server: TcpListener,
    client: Arc<Mutex<Vec<WebSocket<TcpStream>>>>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for stream in server.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!("live-reload connection failed: {e}");
                    continue;
                }
            };

            let socket = match tungstenite::accept(stream) {
                Ok(socket) => socket,
                Err(e) => {
                    tracing::warn!("rejected live-reload client: {e}");
                    continue;
                }
            };

            let Ok(mut clients) = client.lock() else {
                break;
            };
            clients.push(socket);
        }
    })
}

fn new_thread_ws_reload(
    client: Arc<Mutex<Vec<WebSocket<TcpStream>>>>,
) -> (Sender<Reload>, JoinHandle<()>) {
    let (tx, rx) = std::sync::mpsc::channel();

    let thread = std::thread::spawn(move || {
        while let Ok(reload) = rx.recv() {
            let message = match reload {
                Reload::None => continue,
                Reload::Inject => "css",
                Reload::Page => "reload",
            };

            let Ok(mut clients) = client.lock() else {
                break;
            };
            let mut broken = vec![];

            for (i, socket) in clients.iter_mut().enumerate() {
                match socket.send(message.into()) {
                    Ok(_) => {}
                    Err(tungstenite::error::Error::Io(e)) => {
                        if e.kind() == std::io::ErrorKind::BrokenPipe {
                            broken.push(i);
                        }
                    }
                    Err(tungstenite::error::Error::ConnectionClosed)
                    | Err(tungstenite::error::Error::AlreadyClosed) => broken.push(i),
                    Err(e) => {
                        tracing::error!("live-reload error: {e:?}");
                    }
                }
            }

            for i in broken.into_iter().rev() {
                clients.remove(i);
            }

            // Close all but the last 10 connections
            let len = clients.len();
            if len > 10 {
                for mut socket in clients.drain(0..len - 10) {
                    socket.close(None).ok();
                }
            }
        }
    });

    (tx, thread)
}

/// Splits a glob string into a canonicalized static root path (for
/// watching) and a compiled absolute Pattern (for matching).
pub fn resolve_watch_path(glob_str: impl AsRef<str>) -> anyhow::Result<(Utf8PathBuf, Pattern)> {
    let path = Utf8Path::new(glob_str.as_ref());

    // Split path into static root and dynamic suffix (containing wildcards)
    let components: Vec<_> = path.components().collect();
    let split_idx = components
        .iter()
        .position(|c| c.as_str().contains(['*', '?', '[']))
        .unwrap_or(components.len());

    let root_part: Utf8PathBuf = components.iter().take(split_idx).collect();
    let suffix_part: Utf8PathBuf = components.iter().skip(split_idx).collect();

    let absolute_root = root_part.canonicalize_utf8()?;

    // A concrete file is watched through its parent, so atomic writes
    // (write to temp file, rename over) are still caught.
    let (watch_root, pattern_path) = if suffix_part.as_str().is_empty() && absolute_root.is_file()
    {
        let parent = absolute_root
            .parent()
            .unwrap_or(&absolute_root)
            .to_path_buf();
        (parent, absolute_root)
    } else {
        let pattern_path = absolute_root.join(&suffix_part);
        (absolute_root, pattern_path)
    };

    let pattern = Pattern::new(pattern_path.as_str())?;

    Ok((watch_root, pattern))
}

/// Reduces a set of paths to the minimal set of watch roots.
///
/// If we watch `/a` and `/a/b`, we only need to watch `/a` because
/// the watcher is recursive.
fn collapse_watch_paths(paths: HashSet<Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    let mut paths: Vec<_> = paths.into_iter().collect();
    paths.sort();

    let mut filtered = Vec::new();
    for path in paths {
        if let Some(last) = filtered.last()
            && path.starts_with(last)
        {
            continue;
        }
        filtered.push(path);
    }

    filtered
}
