//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are readable, then we
//! drain them with non-blocking reads and run each connection's decoder over
//! whatever arrived. The tap never writes to its peers.
//!
//! Each worker owns its listener (SO_REUSEPORT), its poll instance and its
//! sessions, so a session is only ever touched by one thread.

use crate::config::Config;
use crate::runtime::session::{log_value, Session, SessionOptions};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use slab::Slab;
use std::io;
use std::net::SocketAddr;
use std::thread;
use tracing::{debug, error, info, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);

/// Events processed per poll.
const EVENT_BATCH: usize = 256;

/// Per-worker connection state.
struct TapConnection {
    stream: TcpStream,
    peer: SocketAddr,
    session: Session,
}

/// Run the tap on `config.workers` threads.
pub fn run(config: Config) -> io::Result<()> {
    let num_workers = if config.workers == 0 {
        num_cpus()
    } else {
        config.workers
    };

    let addr: SocketAddr = config
        .listen
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    info!(
        workers = num_workers,
        addr = %addr,
        bulk_capture_limit = config.bulk_capture_limit,
        "Starting mio runtime"
    );

    let mut handles = Vec::with_capacity(num_workers);

    for worker_id in 0..num_workers {
        let config = config.clone();

        let handle = thread::Builder::new()
            .name(format!("worker-{worker_id}"))
            .spawn(move || {
                if let Err(e) = worker_loop(worker_id, addr, &config) {
                    error!(worker = worker_id, error = %e, "Worker failed");
                }
            })?;

        handles.push(handle);
    }

    // Wait for all workers
    for handle in handles {
        let _ = handle.join();
    }

    Ok(())
}

fn worker_loop(worker_id: usize, addr: SocketAddr, config: &Config) -> io::Result<()> {
    let mut poll = Poll::new()?;
    let mut events = Events::with_capacity(EVENT_BATCH);

    // Create listener with SO_REUSEPORT for kernel load balancing
    let listener = create_listener_with_reuseport(addr)?;
    let mut listener = TcpListener::from_std(listener);
    poll.registry()
        .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

    let max_connections = config.max_connections;
    let options = config.session_options();
    let mut connections: Slab<TapConnection> = Slab::with_capacity(max_connections);

    info!(
        worker = worker_id,
        max_connections,
        read_buffer_size = options.read_buffer_size,
        "Worker started"
    );

    loop {
        if let Err(e) = poll.poll(&mut events, None) {
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(e);
        }

        for event in events.iter() {
            match event.token() {
                LISTENER_TOKEN => {
                    accept_connections(
                        &listener,
                        &mut poll,
                        &mut connections,
                        &options,
                        max_connections,
                        worker_id,
                    )?;
                }
                Token(conn_id) => {
                    if !event.is_readable() && !event.is_read_closed() {
                        continue;
                    }
                    match handle_readable(conn_id, &mut connections) {
                        Ok(true) => {}
                        Ok(false) => close_connection(&mut poll, &mut connections, conn_id),
                        Err(e) => {
                            debug!(conn_id, error = %e, "Connection error");
                            close_connection(&mut poll, &mut connections, conn_id);
                        }
                    }
                }
            }
        }
    }
}

fn accept_connections(
    listener: &TcpListener,
    poll: &mut Poll,
    connections: &mut Slab<TapConnection>,
    options: &SessionOptions,
    max_connections: usize,
    worker_id: usize,
) -> io::Result<()> {
    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                if connections.len() >= max_connections {
                    warn!(peer = %peer, "Connection limit reached");
                    continue;
                }

                let conn_id = connections.insert(TapConnection {
                    stream,
                    peer,
                    session: Session::new(options),
                });

                // Re-borrow after insert
                let conn = &mut connections[conn_id];
                poll.registry()
                    .register(&mut conn.stream, Token(conn_id), Interest::READABLE)?;

                debug!(
                    worker = worker_id,
                    conn_id,
                    peer = %peer,
                    "Accepted connection"
                );
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => {
                error!("Accept error: {}", e);
                break;
            }
        }
    }
    Ok(())
}

/// Read until the socket would block, decoding as bytes arrive.
///
/// Returns `Ok(false)` when the connection should be closed.
fn handle_readable(conn_id: usize, connections: &mut Slab<TapConnection>) -> io::Result<bool> {
    let conn = connections
        .get_mut(conn_id)
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "connection not found"))?;

    loop {
        match conn.session.fill_from(&mut conn.stream) {
            Ok(0) => {
                // EOF
                return Ok(false);
            }
            Ok(_) => {}
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(true),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }

        if let Err(e) = conn.session.drain(|value| log_value(conn_id, &value)) {
            warn!(conn_id, peer = %conn.peer, error = %e, "Undecodable stream, closing");
            return Ok(false);
        }
    }
}

fn close_connection(poll: &mut Poll, connections: &mut Slab<TapConnection>, conn_id: usize) {
    if let Some(mut conn) = connections.try_remove(conn_id) {
        let _ = poll.registry().deregister(&mut conn.stream);
        conn.session.log_summary(conn_id);
        debug!(conn_id, peer = %conn.peer, "Connection closed");
    }
}

/// Create a TCP listener with SO_REUSEPORT for kernel load balancing.
fn create_listener_with_reuseport(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_port(true)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    Ok(socket.into())
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
