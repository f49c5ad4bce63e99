//! TCP front end of the device server
//!
//! One listener thread accepts connections and hands each one to its own
//! worker thread. Workers read a request frame, run it through the
//! [`CommandHandler`] and write the response frame, repeating until the peer
//! hangs up or stays idle too long. Device access inside the handler is
//! serialized by the [`DeviceHandle`](crate::device::DeviceHandle) lock, so
//! workers never hold it while blocked on the socket.

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::ErrorKind as IoErrorKind;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::DaqError;
use crate::handler::CommandHandler;
use crate::protocol::{read_frame, write_frame, Response};

/// Socket-level limits of the server
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use daq_bridge::ServerConfig;
///
/// let config = ServerConfig {
///     max_connections: 2,
///     idle_timeout: Duration::from_secs(10),
///     ..ServerConfig::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Connections served at the same time; extra ones get `busy` and are closed
    pub max_connections: usize,
    /// A connection with no request for this long is closed
    pub idle_timeout: Duration,
    /// Timeout for writing a response to a slow peer
    pub write_timeout: Duration,
    /// Largest accepted request frame body
    pub max_frame_bytes: usize,
    /// How often the accept loop checks for shutdown
    pub accept_poll: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: 8,
            idle_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(5),
            max_frame_bytes: 64 * 1024,
            accept_poll: Duration::from_millis(50),
        }
    }
}

type Registry = Arc<Mutex<HashMap<u64, TcpStream>>>;

pub struct ConnectionServer {
    listener: TcpListener,
    handler: Arc<CommandHandler>,
    config: ServerConfig,
    shutdown: Arc<AtomicBool>,
}

impl ConnectionServer {
    pub fn bind<A: ToSocketAddrs>(
        addr: A,
        handler: CommandHandler,
        config: ServerConfig,
    ) -> Result<Self, DaqError> {
        let listener =
            TcpListener::bind(addr).map_err(|e| DaqError::io(e, "binding server socket"))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| DaqError::io(e, "configuring server socket"))?;
        Ok(Self {
            listener,
            handler: Arc::new(handler),
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, DaqError> {
        self.listener
            .local_addr()
            .map_err(|e| DaqError::io(e, "reading bound address"))
    }

    /// Flag that stops [`run`](Self::run) when set
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn handler(&self) -> &Arc<CommandHandler> {
        &self.handler
    }

    /// Accept and serve connections until the shutdown flag is set, then
    /// close open connections and wait for their workers.
    pub fn run(self) -> Result<(), DaqError> {
        let addr = self.local_addr()?;
        info!("Listening on {addr}");

        let registry: Registry = Arc::new(Mutex::new(HashMap::new()));
        let active = Arc::new(AtomicUsize::new(0));
        let mut workers: Vec<JoinHandle<()>> = Vec::new();
        let mut next_id = 1u64;

        while !self.shutdown.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let id = next_id;
                    next_id += 1;
                    match self.admit(id, stream, peer, &registry, &active) {
                        Ok(Some(worker)) => workers.push(worker),
                        Ok(None) => {}
                        Err(e) => warn!("Could not start connection {id} from {peer}: {e}"),
                    }
                }
                Err(e) if e.kind() == IoErrorKind::WouldBlock => {
                    workers.retain(|w| !w.is_finished());
                    thread::sleep(self.config.accept_poll);
                }
                Err(e) => {
                    error!("Failed to accept connection: {e}");
                    thread::sleep(self.config.accept_poll);
                }
            }
        }

        let open = registry.lock().len();
        info!("Shutting down, closing {open} open connection(s)");
        for stream in registry.lock().values() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        for worker in workers {
            if worker.join().is_err() {
                error!("A connection worker panicked");
            }
        }
        info!("Server on {addr} stopped");
        Ok(())
    }

    /// Run the accept loop on a background thread
    pub fn spawn(self) -> Result<ServerHandle, DaqError> {
        let addr = self.local_addr()?;
        let shutdown = self.shutdown_flag();
        let thread = thread::Builder::new()
            .name("daq-listener".into())
            .spawn(move || self.run())
            .map_err(|e| DaqError::io(e, "spawning listener thread"))?;
        Ok(ServerHandle {
            addr,
            shutdown,
            thread: Some(thread),
        })
    }

    fn admit(
        &self,
        id: u64,
        mut stream: TcpStream,
        peer: SocketAddr,
        registry: &Registry,
        active: &Arc<AtomicUsize>,
    ) -> Result<Option<JoinHandle<()>>, DaqError> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(self.config.idle_timeout))?;
        stream.set_write_timeout(Some(self.config.write_timeout))?;
        stream.set_nodelay(true)?;
        let tracked = stream.try_clone()?;

        let count = active.fetch_add(1, Ordering::SeqCst) + 1;
        if count > self.config.max_connections {
            active.fetch_sub(1, Ordering::SeqCst);
            warn!(
                "Refusing connection {id} from {peer}: {} connections already open",
                self.config.max_connections
            );
            let refusal = Response::error(&DaqError::Busy(format!(
                "connection limit of {} reached",
                self.config.max_connections
            )))
            .encode()?;
            // a stalled peer must not hold up the accept loop
            thread::Builder::new()
                .name(format!("daq-refuse-{id}"))
                .spawn(move || {
                    if let Err(e) = write_frame(&mut stream, &refusal) {
                        debug!("Refusal to connection {id} not delivered: {e}");
                    }
                    let _ = stream.shutdown(Shutdown::Both);
                })
                .map_err(|e| DaqError::io(e, "spawning refusal writer"))?;
            return Ok(None);
        }

        registry.lock().insert(id, tracked);
        info!("Connection {id} accepted from {peer} ({count} open)");

        let slot = ConnectionSlot {
            id,
            registry: registry.clone(),
            active: active.clone(),
        };
        let handler = self.handler.clone();
        let max_frame_bytes = self.config.max_frame_bytes;
        let worker = thread::Builder::new()
            .name(format!("daq-conn-{id}"))
            .spawn(move || {
                let _slot = slot;
                serve_connection(stream, peer, id, &handler, max_frame_bytes);
            });

        // on failure the closure is dropped and the slot unregisters itself
        worker
            .map(Some)
            .map_err(|e| DaqError::io(e, "spawning connection worker"))
    }
}

/// Unregisters a connection when its worker ends, even by panic
struct ConnectionSlot {
    id: u64,
    registry: Registry,
    active: Arc<AtomicUsize>,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.id);
        let left = self.active.fetch_sub(1, Ordering::SeqCst) - 1;
        debug!("Connection {} released ({left} open)", self.id);
    }
}

fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    id: u64,
    handler: &CommandHandler,
    max_frame_bytes: usize,
) {
    let mut served = 0usize;
    loop {
        let body = match read_frame(&mut stream, max_frame_bytes) {
            Ok(Some(body)) => body,
            Ok(None) => break,
            Err(e @ DaqError::Protocol(_)) => {
                // the stream cannot be resynchronized after a bad length prefix
                warn!("Connection {id}: {e}");
                if let Ok(reply) = Response::error(&e).encode() {
                    let _ = write_frame(&mut stream, &reply);
                }
                break;
            }
            Err(DaqError::Io { source, .. })
                if matches!(source.kind(), IoErrorKind::WouldBlock | IoErrorKind::TimedOut) =>
            {
                info!("Connection {id} idle, closing");
                break;
            }
            Err(DaqError::Io { source, .. })
                if served > 0 && source.kind() == IoErrorKind::ConnectionReset =>
            {
                // the last reply was accepted by the kernel but the peer was already gone
                warn!("Connection {id} from {peer} reset, last response discarded");
                break;
            }
            Err(e) => {
                debug!("Connection {id} read ended: {e}");
                break;
            }
        };

        let reply = handler.handle(&body);

        if let Err(e) = write_frame(&mut stream, &reply) {
            warn!("Connection {id} from {peer} went away, response discarded: {e}");
            break;
        }
        served += 1;
    }
    let _ = stream.shutdown(Shutdown::Both);
    info!("Connection {id} from {peer} closed after {served} request(s)");
}

/// Handle to a server running on a background thread
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<Result<(), DaqError>>>,
}

impl ServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting, close connections and wait for the listener to exit
    pub fn shutdown(mut self) -> Result<(), DaqError> {
        self.stop()
    }

    fn stop(&mut self) -> Result<(), DaqError> {
        self.shutdown.store(true, Ordering::SeqCst);
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| DaqError::Internal("listener thread panicked".into()))?,
            None => Ok(()),
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
