//! The listening side of port knocking.
//!
//! Every step of the sequence gets its own socket and accept thread. Each TCP
//! connection is read for exactly the step's payload length on its own
//! thread, judged against the shared progress table, and closed. UDP
//! datagrams are judged on the step's own thread and answered with an empty
//! datagram once recorded. Sources completing the whole sequence are handed
//! to [`ListenerHandle`].

pub mod config;
pub mod matcher;
pub mod progress;

use std::collections::HashSet;
use std::io::{self, Read};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};
use crate::errors::KnockError;
use crate::knock::{Knock, Transport};

pub use config::ListenerConfig;
pub use matcher::Matcher;
pub use progress::{Outcome, ProgressTable};

/// A bound socket for one step, before its accept thread starts.
enum StepSocket {
    Tcp(TcpListener),
    Udp(UdpSocket),
}

impl StepSocket {
    fn bind(knock: &Knock, config: &ListenerConfig) -> Result<Self, KnockError> {
        let addr = SocketAddr::new(config.bind_addr, knock.port);
        let bind_err = |source| KnockError::Bind {
            transport: knock.transport,
            port: knock.port,
            source,
        };

        match knock.transport {
            Transport::Tcp => {
                let listener = TcpListener::bind(addr).map_err(bind_err)?;
                listener.set_nonblocking(true).map_err(bind_err)?;
                Ok(StepSocket::Tcp(listener))
            }
            Transport::Udp => {
                let socket = UdpSocket::bind(addr).map_err(bind_err)?;
                socket.set_read_timeout(Some(config.poll_interval())).map_err(bind_err)?;
                Ok(StepSocket::Udp(socket))
            }
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        match self {
            StepSocket::Tcp(listener) => listener.local_addr(),
            StepSocket::Udp(socket) => socket.local_addr(),
        }
    }
}

/// Start listening for `knocks` with the default configuration.
pub fn start(knocks: &[Knock]) -> Result<ListenerHandle, KnockError> {
    start_with(knocks, ListenerConfig::default())
}

/// Bind every step and start its accept thread.
///
/// Binding is all or nothing: if any step fails, the sockets bound so far
/// are closed before the error is returned.
pub fn start_with(knocks: &[Knock], config: ListenerConfig) -> Result<ListenerHandle, KnockError> {
    validate(knocks)?;

    let sockets = knocks
        .iter()
        .map(|knock| StepSocket::bind(knock, &config))
        .collect::<Result<Vec<_>, _>>()?;
    let local_addrs = sockets
        .iter()
        .map(StepSocket::local_addr)
        .collect::<Result<Vec<_>, _>>()?;

    let (matcher, successes) = Matcher::new(knocks.to_vec(), config.success_capacity);
    let handle = ListenerHandle {
        matcher: Arc::new(matcher),
        successes: Mutex::new(successes),
        workers: Mutex::new(Vec::with_capacity(sockets.len())),
        local_addrs,
    };

    let in_flight = Arc::new(AtomicUsize::new(0));
    for (step, socket) in sockets.into_iter().enumerate() {
        let matcher = Arc::clone(&handle.matcher);
        let config = config.clone();
        let name = format!("knock-{}-{}", knocks[step].transport, knocks[step].port);

        let worker = match socket {
            StepSocket::Tcp(listener) => {
                let in_flight = Arc::clone(&in_flight);
                thread::Builder::new()
                    .name(name)
                    .spawn(move || accept_loop(listener, step, matcher, config, in_flight))
            }
            StepSocket::Udp(socket) => thread::Builder::new()
                .name(name)
                .spawn(move || datagram_loop(socket, step, matcher, config)),
        };

        // On failure the handle drops here and stops the threads already running
        let worker = worker?;
        handle.lock_workers().push(worker);
    }

    info!(steps = knocks.len(), addrs = ?handle.local_addrs, "listening for knocks");
    Ok(handle)
}

fn validate(knocks: &[Knock]) -> Result<(), KnockError> {
    if knocks.is_empty() {
        return Err(KnockError::EmptySequence);
    }

    let mut seen = HashSet::new();
    for knock in knocks {
        // Port 0 asks the OS for a fresh port each time, so it never collides
        if knock.port != 0 && !seen.insert((knock.transport, knock.port)) {
            return Err(KnockError::DuplicateStep {
                transport: knock.transport,
                port: knock.port,
            });
        }
    }
    Ok(())
}

fn accept_loop(
    listener: TcpListener,
    step: usize,
    matcher: Arc<Matcher>,
    config: ListenerConfig,
    in_flight: Arc<AtomicUsize>,
) {
    while !matcher.is_stopped() {
        match listener.accept() {
            Ok((stream, peer)) => {
                let Some(permit) = InFlight::acquire(&in_flight, config.max_in_flight) else {
                    warn!(%peer, step, "too many knocks in flight, closing connection");
                    continue;
                };

                let matcher = Arc::clone(&matcher);
                let read_timeout = config.read_timeout;
                let spawned = thread::Builder::new()
                    .name(format!("knock-conn-{}", peer))
                    .spawn(move || {
                        let _permit = permit;
                        handle_connection(stream, peer, step, &matcher, read_timeout);
                    });
                if let Err(e) = spawned {
                    warn!(%peer, step, error = %e, "failed to spawn connection handler");
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(config.poll_interval());
            }
            Err(e) => {
                warn!(step, error = %e, "accept failed");
                thread::sleep(config.poll_interval());
            }
        }
    }
    debug!(step, "accept loop stopped");
}

fn datagram_loop(socket: UdpSocket, step: usize, matcher: Arc<Matcher>, config: ListenerConfig) {
    // One spare byte so an oversized datagram shows up as a mismatch instead of being truncated to fit
    let Some(expected) = matcher.expected(step) else {
        warn!(step, "no such step, datagram loop not started");
        return;
    };
    let mut buf = vec![0u8; expected.len() + 1];

    while !matcher.is_stopped() {
        match socket.recv_from(&mut buf) {
            Ok((n, peer)) => {
                matcher.observe(peer.ip().to_canonical(), step, Some(&buf[..n]));

                // The empty reply tells the sender this attempt is recorded
                if let Err(e) = socket.send_to(&[], peer) {
                    debug!(%peer, step, error = %e, "failed to acknowledge datagram");
                }
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
            Err(e) => {
                warn!(step, error = %e, "recv failed");
                thread::sleep(config.poll_interval());
            }
        }
    }
    debug!(step, "datagram loop stopped");
}

/// Judge one TCP connection and close it.
fn handle_connection(mut stream: TcpStream, peer: SocketAddr, step: usize, matcher: &Matcher, read_timeout: Duration) {
    let expected_len = matcher.expected(step).map_or(0, <[u8]>::len);
    let received = read_payload(&mut stream, expected_len, read_timeout);
    if received.is_none() {
        debug!(%peer, step, expected_len, "short or failed payload read");
    }

    matcher.observe(peer.ip().to_canonical(), step, received.as_deref());

    let _ = stream.shutdown(Shutdown::Both);
}

/// Read exactly `len` bytes. `None` on short read, timeout or error.
fn read_payload(stream: &mut TcpStream, len: usize, read_timeout: Duration) -> Option<Vec<u8>> {
    if len == 0 {
        return Some(Vec::new());
    }

    // Accepted sockets may inherit the listener's non-blocking mode
    stream.set_nonblocking(false).ok()?;
    stream.set_read_timeout(Some(read_timeout.max(Duration::from_millis(1)))).ok()?;

    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).ok()?;
    Some(buf)
}

/// Counts a running connection handler, released on drop.
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn acquire(count: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        if count.fetch_add(1, Ordering::SeqCst) >= max {
            count.fetch_sub(1, Ordering::SeqCst);
            return None;
        }
        Some(InFlight(Arc::clone(count)))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A running knock listener.
///
/// The handle can be shared between threads: one may block in
/// [`wait_for_success`](Self::wait_for_success) while another calls
/// [`stop`](Self::stop), which wakes it with `None`. Dropping the handle stops it.
#[derive(Debug)]
pub struct ListenerHandle {
    matcher: Arc<Matcher>,
    successes: Mutex<Receiver<IpAddr>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    local_addrs: Vec<SocketAddr>,
}

impl ListenerHandle {
    /// Block until a source completes the sequence. `None` once stopped.
    pub fn wait_for_success(&self) -> Option<IpAddr> {
        if self.matcher.is_stopped() {
            return None;
        }
        self.lock_successes().recv().ok()
    }

    /// Like [`wait_for_success`](Self::wait_for_success), giving up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<IpAddr> {
        if self.matcher.is_stopped() {
            return None;
        }
        match self.lock_successes().recv_timeout(timeout) {
            Ok(source) => Some(source),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// The address each step is bound to, in sequence order.
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }

    /// Stop every accept loop and wait for them to release their sockets.
    ///
    /// Handlers already reading a payload finish on their own, but nothing
    /// they complete is reported.
    pub fn stop(&self) {
        let mut workers = self.lock_workers();
        if workers.is_empty() && self.matcher.is_stopped() {
            return;
        }

        // Also closes the success queue, waking anyone blocked on it
        self.matcher.stop();
        for worker in workers.drain(..) {
            if worker.join().is_err() {
                warn!("knock accept thread panicked");
            }
        }
        info!("stopped listening for knocks");
    }

    fn lock_successes(&self) -> MutexGuard<'_, Receiver<IpAddr>> {
        self.successes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_workers(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

// -- Unit tests --
