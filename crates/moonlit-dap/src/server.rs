//! Multi-script debug server.
//!
//! Keeps the registry of attached scripts, picks the bridge each new
//! connection binds to, and optionally accepts connections over TCP with
//! one thread per connection.

use std::io::{Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use moonlit_config::{Config, DebuggerConfig, ServerConfig};

use crate::adapter::ScriptDebugSession;
use crate::bridge::{BridgeOptions, DebugBridge};
use crate::detached::DetachedSession;
use crate::error::DapError;
use crate::repl::ScriptDirectory;
use crate::session::Session;
use crate::source::SourceFinder;

#[derive(Default)]
struct Registry {
    bridges: Vec<Arc<DebugBridge>>,
    current: Option<usize>,
}

#[derive(Default)]
struct Scripts {
    registry: Mutex<Registry>,
}

impl Scripts {
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_bridge(&self) -> Option<Arc<DebugBridge>> {
        let registry = self.lock();
        let id = registry.current?;
        registry.bridges.iter().find(|b| b.id() == id).cloned()
    }
}

impl ScriptDirectory for Scripts {
    fn attached_debuggers(&self) -> Vec<(usize, String)> {
        let mut list: Vec<(usize, String)> = self
            .lock()
            .bridges
            .iter()
            .map(|b| (b.id(), b.name().to_string()))
            .collect();
        list.sort_by_key(|(id, _)| *id);
        list
    }

    fn current_id(&self) -> Option<usize> {
        self.lock().current
    }

    fn set_current_id(&self, id: Option<usize>) -> Result<(), DapError> {
        let mut registry = self.lock();
        if let Some(id) = id {
            if !registry.bridges.iter().any(|b| b.id() == id) {
                return Err(DapError::UnknownDebugger(id));
            }
        }
        registry.current = id;
        Ok(())
    }
}

struct Listening {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

/// Shared state handed to every connection.
#[derive(Clone)]
struct Serve {
    scripts: Arc<Scripts>,
    debugger: DebuggerConfig,
}

impl Serve {
    fn connection<R, W>(&self, input: R, output: W) -> Result<(), DapError>
    where
        R: Read,
        W: Write + Send + 'static,
    {
        let lines_at1 = self.debugger.lines_start_at1;
        let paths_uri = self.debugger.paths_are_uri;
        match self.scripts.current_bridge() {
            Some(bridge) => {
                tracing::info!(bridge = bridge.id(), name = %bridge.name(), "serving debug session");
                let directory: Arc<dyn ScriptDirectory> = self.scripts.clone();
                let handler = ScriptDebugSession::new(
                    bridge,
                    Some(directory),
                    self.debugger.notify_execution_end,
                );
                Session::new(handler, Box::new(output), lines_at1, paths_uri).run(input)
            }
            None => {
                tracing::info!("no script attached, serving detached session");
                let handler = DetachedSession::new(self.scripts.clone());
                Session::new(handler, Box::new(output), lines_at1, paths_uri).run(input)
            }
        }
    }
}

/// Registry of debuggable scripts plus the optional TCP listener.
pub struct DebugServer {
    server: ServerConfig,
    serve: Serve,
    stop: Arc<AtomicBool>,
    listening: Mutex<Option<Listening>>,
}

impl DebugServer {
    /// Create a server from the full configuration.
    pub fn new(config: &Config) -> Self {
        Self::with_configs(config.server.clone(), config.debugger.clone())
    }

    /// Create a server from its two configuration tables.
    pub fn with_configs(server: ServerConfig, debugger: DebuggerConfig) -> Self {
        Self {
            server,
            serve: Serve {
                scripts: Arc::new(Scripts::default()),
                debugger,
            },
            stop: Arc::new(AtomicBool::new(false)),
            listening: Mutex::new(None),
        }
    }

    /// Register a running script. The first attached script becomes the
    /// current one.
    pub fn attach_script(
        &self,
        name: impl Into<String>,
        finder: Option<SourceFinder>,
    ) -> Arc<DebugBridge> {
        let options = BridgeOptions::from_config(&self.serve.debugger);
        let bridge = Arc::new(DebugBridge::new(name, finder, options));
        let mut registry = self.serve.scripts.lock();
        registry.bridges.push(Arc::clone(&bridge));
        if registry.current.is_none() {
            registry.current = Some(bridge.id());
        }
        tracing::info!(bridge = bridge.id(), name = %bridge.name(), "script attached");
        bridge
    }

    /// Remove a script, closing its client session.
    pub fn detach(&self, id: usize) -> Result<(), DapError> {
        let bridge = {
            let mut registry = self.serve.scripts.lock();
            let index = registry
                .bridges
                .iter()
                .position(|b| b.id() == id)
                .ok_or(DapError::UnknownDebugger(id))?;
            let bridge = registry.bridges.remove(index);
            if registry.current == Some(id) {
                registry.current = registry.bridges.last().map(|b| b.id());
            }
            bridge
        };
        bridge.close_client();
        tracing::info!(bridge = id, "script detached");
        Ok(())
    }

    /// `(id, name)` of every attached script, ordered by id.
    pub fn attached_debuggers(&self) -> Vec<(usize, String)> {
        self.serve.scripts.attached_debuggers()
    }

    /// The script new connections attach to.
    pub fn current_id(&self) -> Option<usize> {
        self.serve.scripts.current_id()
    }

    /// Change the script new connections attach to.
    pub fn set_current_id(&self, id: Option<usize>) -> Result<(), DapError> {
        self.serve.scripts.set_current_id(id)
    }

    /// Serve one connection on the calling thread until it ends.
    pub fn run_session<R, W>(&self, input: R, output: W) -> Result<(), DapError>
    where
        R: Read,
        W: Write + Send + 'static,
    {
        self.serve.connection(input, output)
    }

    /// Start accepting TCP connections on the configured address.
    ///
    /// Returns the bound address (useful when the port is 0).
    pub fn start(&self) -> Result<SocketAddr, DapError> {
        let mut listening = self.listening.lock().unwrap_or_else(PoisonError::into_inner);
        if listening.is_some() {
            return Err(DapError::AlreadyStarted);
        }

        let listener = TcpListener::bind((self.server.bind_address.as_str(), self.server.port))?;
        let addr = listener.local_addr()?;
        self.stop.store(false, Ordering::SeqCst);

        let serve = self.serve.clone();
        let stop = Arc::clone(&self.stop);
        let handle = thread::Builder::new()
            .name(format!("moonlit-debug-server-{}", addr.port()))
            .spawn(move || accept_loop(listener, serve, stop))?;

        tracing::info!(%addr, "debug server listening");
        *listening = Some(Listening { addr, handle });
        Ok(addr)
    }

    /// Stop accepting connections. Sessions already running continue
    /// until their clients disconnect.
    pub fn stop(&self) {
        let Some(Listening { addr, handle }) = self
            .listening
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };
        self.stop.store(true, Ordering::SeqCst);

        let mut wake = addr;
        if wake.ip().is_unspecified() {
            wake.set_ip(Ipv4Addr::LOCALHOST.into());
        }
        if let Err(e) = TcpStream::connect(wake) {
            tracing::warn!(%addr, error = %e, "could not wake accept loop");
        }
        if handle.join().is_err() {
            tracing::error!(%addr, "debug server thread panicked");
        }
        tracing::info!(%addr, "debug server stopped");
    }

    /// The listening address, while started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listening
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|l| l.addr)
    }
}

impl Drop for DebugServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(listener: TcpListener, serve: Serve, stop: Arc<AtomicBool>) {
    static CONNECTIONS: AtomicUsize = AtomicUsize::new(0);

    for stream in listener.incoming() {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                continue;
            }
        };
        let peer = stream.peer_addr().ok();
        let input = match stream.try_clone() {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(?peer, error = %e, "cannot split connection");
                continue;
            }
        };

        let n = CONNECTIONS.fetch_add(1, Ordering::SeqCst) + 1;
        let serve = serve.clone();
        let spawned = thread::Builder::new()
            .name(format!("moonlit-debug-session-{n}"))
            .spawn(move || {
                tracing::info!(?peer, "debug client connected");
                if let Err(e) = serve.connection(input, stream) {
                    tracing::warn!(?peer, error = %e, "debug session ended with error");
                }
                tracing::info!(?peer, "debug client disconnected");
            });
        if let Err(e) = spawned {
            tracing::error!(?peer, error = %e, "cannot spawn session thread");
        }
    }
}
