//! Request/response channel over the UDP transport.
//!
//! A background thread reads reply lines and hands each one to every
//! registered listener. `rpc()` layers a blocking call on top: it registers a
//! throwaway listener, sends the request and waits for a given number of
//! lines. Replies are attributed to a request purely by timing and count, so
//! only one RPC may be in flight at a time; the channel enforces that with a
//! lock around `rpc()`.

use crate::constants::*;
use crate::error::{LoadError, Result};
use crate::transport::Transport;
use log::{debug, error, warn};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use uuid::Uuid;

/// Callback invoked with each inbound line
pub type Listener = Arc<dyn Fn(&str) + Send + Sync>;

/// Command channel to an SCPI instrument
pub trait ScpiChannel {
    /// Send a command without waiting for anything
    fn send(&self, message: &str) -> Result<()>;

    /// Send `request` and collect `expected_responses` reply lines in arrival order
    fn rpc(&self, request: &str, expected_responses: usize) -> Result<Vec<String>>;

    /// Stop receiving. Further RPCs will fail.
    fn stop(&self) {}

    /// Send a query and return its single reply line
    fn query(&self, request: &str) -> Result<String> {
        let mut responses = self.rpc(request, 1)?;
        match responses.len() {
            1 => Ok(responses.remove(0)),
            _ => Err(LoadError::InvalidResponse {
                expected: format!("one reply to {}", request),
                actual: format!("{:?}", responses),
            }),
        }
    }
}

impl<C: ScpiChannel + ?Sized> ScpiChannel for &C {
    fn send(&self, message: &str) -> Result<()> {
        (**self).send(message)
    }

    fn rpc(&self, request: &str, expected_responses: usize) -> Result<Vec<String>> {
        (**self).rpc(request, expected_responses)
    }

    fn stop(&self) {
        (**self).stop()
    }
}

impl<C: ScpiChannel + ?Sized> ScpiChannel for Arc<C> {
    fn send(&self, message: &str) -> Result<()> {
        (**self).send(message)
    }

    fn rpc(&self, request: &str, expected_responses: usize) -> Result<Vec<String>> {
        (**self).rpc(request, expected_responses)
    }

    fn stop(&self) {
        (**self).stop()
    }
}

/// Listener table shared by the receive loop and RPC callers
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Mutex<HashMap<String, Listener>>,
}

impl ListenerRegistry {
    pub fn insert(&self, id: String, listener: Listener) {
        self.lock().insert(id, listener);
    }

    pub fn remove(&self, id: &str) -> bool {
        self.lock().remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `line` to every listener registered at the time of the call.
    ///
    /// Callbacks run outside the table lock, so a listener may be removed
    /// (or remove itself) while the broadcast is under way.
    pub fn broadcast(&self, line: &str) {
        let snapshot: Vec<Listener> = self.lock().values().cloned().collect();
        for listener in snapshot {
            listener(line);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Listener>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Replies collected for one RPC attempt
#[derive(Default)]
struct PendingRpc {
    responses: Mutex<Vec<String>>,
    arrived: Condvar,
}

impl PendingRpc {
    fn push(&self, line: &str) {
        let mut responses = self.responses.lock().unwrap_or_else(PoisonError::into_inner);
        responses.push(line.to_string());
        self.arrived.notify_all();
    }

    /// Block until `expected` replies arrived or `timeout` passed.
    /// On timeout returns the number of replies that did arrive.
    fn wait(&self, expected: usize, timeout: Duration) -> std::result::Result<Vec<String>, usize> {
        let responses = self.responses.lock().unwrap_or_else(PoisonError::into_inner);
        let (responses, _) = self
            .arrived
            .wait_timeout_while(responses, timeout, |r| r.len() < expected)
            .unwrap_or_else(PoisonError::into_inner);

        if responses.len() < expected {
            Err(responses.len())
        } else {
            Ok(responses.clone())
        }
    }
}

/// SCPI channel to an instrument speaking UDP
pub struct UdpScpiChannel {
    transport: Transport,
    listeners: Arc<ListenerRegistry>,
    running: Arc<AtomicBool>,
    receive_thread: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
    rpc_lock: Mutex<()>,
    rpc_timeout: Duration,
    retry_count: u32,
}

impl UdpScpiChannel {
    /// Create a channel to `remote`, receiving replies on `local_port`
    pub fn new(remote: SocketAddr, local_port: u16) -> Self {
        Self {
            transport: Transport::new(remote, local_port),
            listeners: Arc::new(ListenerRegistry::default()),
            running: Arc::new(AtomicBool::new(false)),
            receive_thread: None,
            local_addr: None,
            rpc_lock: Mutex::new(()),
            rpc_timeout: Duration::from_millis(RPC_TIMEOUT_MS),
            retry_count: RPC_RETRY_COUNT,
        }
    }

    /// Override how long one RPC attempt waits for its replies
    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    /// Override how many attempts an RPC gets before the link is declared lost
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count.max(1);
        self
    }

    /// Bind the receive port and start the receive loop.
    ///
    /// Calling this on a running channel does nothing. A stopped channel can
    /// be started again; the previous receive loop is joined first so its
    /// socket has been released.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        if let Some(previous) = self.receive_thread.take() {
            if previous.join().is_err() {
                warn!("Previous receive loop panicked");
            }
        }

        let mut receiver = self.transport.bind_receiver()?;
        self.local_addr = Some(receiver.local_addr()?);

        let listeners = Arc::clone(&self.listeners);
        let running = Arc::clone(&self.running);
        running.store(true, Ordering::Release);

        let spawned = thread::Builder::new()
            .name("scpi-receive".to_string())
            .spawn(move || {
                while running.load(Ordering::Acquire) {
                    match receiver.recv_line() {
                        Ok(Some(line)) => listeners.broadcast(&line),
                        Ok(None) => {}
                        Err(e) => {
                            error!("Receive failed: {}", e);
                            thread::sleep(Duration::from_millis(RECV_POLL_TIMEOUT_MS));
                        }
                    }
                }
                debug!("Receive loop stopped");
            });

        match spawned {
            Ok(handle) => {
                self.receive_thread = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                Err(e.into())
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Address the receive loop is bound to, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.transport.remote()
    }

    pub fn add_listener<F>(&self, id: impl Into<String>, on_line: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.listeners.insert(id.into(), Arc::new(on_line));
    }

    pub fn remove_listener(&self, id: &str) {
        self.listeners.remove(id);
    }

    /// Number of listeners currently registered
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn rpc_once(&self, request: &str, expected_responses: usize) -> Result<Vec<String>> {
        let id = Uuid::new_v4().to_string();
        let pending = Arc::new(PendingRpc::default());
        let sink = Arc::clone(&pending);
        self.add_listener(id.as_str(), move |line| sink.push(line));

        let outcome = self.transport.send(request).and_then(|()| {
            pending
                .wait(expected_responses, self.rpc_timeout)
                .map_err(|received| LoadError::Timeout {
                    request: request.to_string(),
                    expected: expected_responses,
                    received,
                })
        });

        self.remove_listener(&id);
        outcome
    }
}

impl ScpiChannel for UdpScpiChannel {
    fn send(&self, message: &str) -> Result<()> {
        self.transport.send(message)
    }

    fn rpc(&self, request: &str, expected_responses: usize) -> Result<Vec<String>> {
        if !self.is_running() {
            return Err(LoadError::ChannelNotStarted);
        }
        let _in_flight = self.rpc_lock.lock().unwrap_or_else(PoisonError::into_inner);

        for attempt in 1..=self.retry_count {
            match self.rpc_once(request, expected_responses) {
                Ok(responses) => return Ok(responses),
                Err(e) => warn!(
                    "RPC {:?} failed (attempt {}/{}): {}",
                    request, attempt, self.retry_count, e
                ),
            }
        }

        Err(LoadError::LinkLost {
            request: request.to_string(),
            attempts: self.retry_count,
        })
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

impl Drop for UdpScpiChannel {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    #[test]
    fn broadcast_reaches_every_listener() {
        let registry = ListenerRegistry::default();
        let hits = Arc::new(AtomicUsize::new(0));
        for id in ["a", "b", "c"] {
            let hits = Arc::clone(&hits);
            registry.insert(
                id.to_string(),
                Arc::new(move |_: &str| {
                    hits.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }

        registry.broadcast("ON");
        assert_eq!(hits.load(Ordering::SeqCst), 3);

        assert!(registry.remove("b"));
        assert!(!registry.remove("b"));
        registry.broadcast("OFF");
        assert_eq!(hits.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn listener_may_unregister_during_broadcast() {
        let registry = Arc::new(ListenerRegistry::default());
        let inner = Arc::clone(&registry);
        registry.insert(
            "once".to_string(),
            Arc::new(move |_: &str| {
                inner.remove("once");
            }),
        );

        registry.broadcast("1.0000A");
        assert!(registry.is_empty());
    }

    #[test]
    fn pending_rpc_returns_in_arrival_order() {
        let pending = Arc::new(PendingRpc::default());
        let producer = Arc::clone(&pending);
        let handle = thread::spawn(move || {
            for line in ["first", "second"] {
                thread::sleep(Duration::from_millis(10));
                producer.push(line);
            }
        });

        let responses = pending.wait(2, Duration::from_secs(2)).unwrap();
        handle.join().unwrap();
        assert_eq!(responses, vec!["first", "second"]);
    }

    #[test]
    fn pending_rpc_times_out_with_partial_count() {
        let pending = PendingRpc::default();
        pending.push("only one");

        let started = Instant::now();
        assert_eq!(pending.wait(2, Duration::from_millis(50)), Err(1));
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn zero_expected_responses_returns_immediately() {
        let pending = PendingRpc::default();
        assert_eq!(pending.wait(0, Duration::from_secs(5)), Ok(Vec::new()));
    }

    #[test]
    fn stopped_channel_restarts_on_the_same_port() {
        let port = std::net::UdpSocket::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let mut channel = UdpScpiChannel::new("127.0.0.1:9".parse().unwrap(), port);

        channel.start().unwrap();
        channel.stop();
        channel.start().unwrap();

        assert!(channel.is_running());
        assert_eq!(channel.local_addr().unwrap().port(), port);
        channel.stop();
    }

    #[test]
    fn rpc_before_start_is_rejected() {
        let channel = UdpScpiChannel::new("127.0.0.1:9".parse().unwrap(), 0);
        assert!(matches!(
            channel.rpc(":INPut?", 1),
            Err(LoadError::ChannelNotStarted)
        ));
    }
}
