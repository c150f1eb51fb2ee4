//! Tokio driver for pool clients
//!
//! All clients live in a [`ClientRegistry`] owned by a single task. Socket
//! work runs in spawned tasks that report back over one event channel; the
//! owning task is the only place client state is touched. Other tasks talk
//! to the loop through a cloneable [`LoopHandle`].

use crate::client::{Client, ClientOptions, Epoch, NetEvent, Transport};
use crate::listener::ClientListener;
use crate::types::{JobResult, RequestId, SessionState};
use crate::url::PoolUrl;
use crate::{Error, Result};
use bytes::{Bytes, BytesMut};
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// Default interval between client ticks
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(1000);

/// Default bound on resolving and connecting
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Bytes requested from the socket per read
pub const DEFAULT_READ_CHUNK: usize = 1024;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Stable handle to a client in a registry
///
/// The generation changes whenever a slot is reused, so a key to a removed
/// client never reaches its successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientKey {
    index: usize,
    generation: u64,
}

struct Slot<T> {
    generation: u64,
    entry: Option<Entry<T>>,
}

struct Entry<T> {
    client: Client<T>,
    doomed: bool,
}

/// Generational arena of clients
pub struct ClientRegistry<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    len: usize,
}

impl<T: Transport> ClientRegistry<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Insert a client built for the key it will live under
    pub fn insert_with<F>(&mut self, build: F) -> ClientKey
    where
        F: FnOnce(ClientKey) -> Client<T>,
    {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: None,
                });
                self.slots.len() - 1
            }
        };

        let key = ClientKey {
            index,
            generation: self.slots[index].generation,
        };
        self.slots[index].entry = Some(Entry {
            client: build(key),
            doomed: false,
        });
        self.len += 1;
        key
    }

    fn entry(&self, key: ClientKey) -> Option<&Entry<T>> {
        self.slots
            .get(key.index)
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    fn entry_mut(&mut self, key: ClientKey) -> Option<&mut Entry<T>> {
        self.slots
            .get_mut(key.index)
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.entry.as_mut())
    }

    /// Client under `key`, including one pending removal
    pub fn get(&self, key: ClientKey) -> Option<&Client<T>> {
        self.entry(key).map(|e| &e.client)
    }

    /// Mutable client under `key`, including one pending removal
    pub fn get_mut(&mut self, key: ClientKey) -> Option<&mut Client<T>> {
        self.entry_mut(key).map(|e| &mut e.client)
    }

    /// Client under `key` unless it is pending removal
    pub fn live_mut(&mut self, key: ClientKey) -> Option<&mut Client<T>> {
        self.entry_mut(key).filter(|e| !e.doomed).map(|e| &mut e.client)
    }

    pub fn is_doomed(&self, key: ClientKey) -> bool {
        self.entry(key).is_some_and(|e| e.doomed)
    }

    /// Silence and disconnect a client, removing it at the next safe sweep
    pub fn delete_later(&mut self, key: ClientKey, now: Instant) -> bool {
        let Some(entry) = self.entry_mut(key) else {
            return false;
        };
        entry.doomed = true;
        entry.client.silence();
        entry.client.disconnect(now);
        true
    }

    /// Remove doomed clients that have finished closing
    pub fn sweep(&mut self) -> usize {
        let mut removed = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let done = slot
                .entry
                .as_ref()
                .is_some_and(|e| e.doomed && e.client.state() == SessionState::Unconnected);
            if done {
                slot.entry = None;
                slot.generation += 1;
                self.free.push(index);
                removed += 1;
            }
        }
        self.len -= removed;
        removed
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn keys(&self) -> Vec<ClientKey> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.entry.is_some())
            .map(|(index, slot)| ClientKey {
                index,
                generation: slot.generation,
            })
            .collect()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Client<T>> {
        self.slots
            .iter_mut()
            .filter_map(|slot| slot.entry.as_mut())
            .map(|e| &mut e.client)
    }
}

impl<T: Transport> Default for ClientRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Transport outcome addressed to one client
#[derive(Debug)]
pub struct LoopEvent {
    pub key: ClientKey,
    pub epoch: Epoch,
    pub event: NetEvent,
}

#[derive(Clone)]
struct EventSink {
    key: ClientKey,
    tx: mpsc::UnboundedSender<LoopEvent>,
}

impl EventSink {
    fn emit(&self, epoch: Epoch, event: NetEvent) {
        let event = LoopEvent {
            key: self.key,
            epoch,
            event,
        };
        if self.tx.send(event).is_err() {
            trace!("Event loop gone, dropping transport event");
        }
    }
}

struct ActiveConnection {
    epoch: Epoch,
    token: CancellationToken,
    writer: Option<mpsc::UnboundedSender<Bytes>>,
}

/// TCP transport backed by spawned tokio tasks
pub struct TokioTransport {
    sink: EventSink,
    connect_timeout: Duration,
    read_chunk: usize,
    active: Option<ActiveConnection>,
}

impl TokioTransport {
    pub fn new(
        key: ClientKey,
        events: mpsc::UnboundedSender<LoopEvent>,
        connect_timeout: Duration,
        read_chunk: usize,
    ) -> Self {
        Self {
            sink: EventSink { key, tx: events },
            connect_timeout,
            read_chunk: read_chunk.max(1),
            active: None,
        }
    }

    fn token_for(&mut self, epoch: Epoch) -> CancellationToken {
        match &self.active {
            Some(active) if active.epoch == epoch => active.token.clone(),
            _ => {
                if let Some(old) = self.active.take() {
                    old.token.cancel();
                }
                let token = CancellationToken::new();
                self.active = Some(ActiveConnection {
                    epoch,
                    token: token.clone(),
                    writer: None,
                });
                token
            }
        }
    }
}

impl Transport for TokioTransport {
    fn resolve(&mut self, epoch: Epoch, host: &str, port: u16) {
        let token = self.token_for(epoch);
        let sink = self.sink.clone();
        let limit = self.connect_timeout;
        let host = host.to_string();

        tokio::spawn(async move {
            let lookup = time::timeout(limit, tokio::net::lookup_host((host.as_str(), port)));
            tokio::select! {
                _ = token.cancelled() => {}
                result = lookup => {
                    let result = match result {
                        Ok(Ok(addrs)) => Ok(addrs.collect::<Vec<SocketAddr>>()),
                        Ok(Err(e)) => Err(e),
                        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "resolve timed out")),
                    };
                    sink.emit(epoch, NetEvent::Resolved(result));
                }
            }
        });
    }

    fn connect(&mut self, epoch: Epoch, addr: SocketAddr) {
        let token = self.token_for(epoch);
        let (writer, outgoing) = mpsc::unbounded_channel();
        if let Some(active) = &mut self.active {
            active.writer = Some(writer);
        }

        let sink = self.sink.clone();
        let limit = self.connect_timeout;
        let read_chunk = self.read_chunk;

        tokio::spawn(async move {
            let connect = time::timeout(limit, TcpStream::connect(addr));
            let stream = tokio::select! {
                _ = token.cancelled() => return,
                result = connect => match result {
                    Ok(Ok(stream)) => stream,
                    Ok(Err(e)) => {
                        sink.emit(epoch, NetEvent::Connected(Err(e)));
                        return;
                    }
                    Err(_) => {
                        let e = io::Error::new(io::ErrorKind::TimedOut, "connect timed out");
                        sink.emit(epoch, NetEvent::Connected(Err(e)));
                        return;
                    }
                },
            };

            if let Err(e) = stream.set_nodelay(true) {
                debug!("Failed to set TCP_NODELAY on {}: {}", addr, e);
            }

            sink.emit(epoch, NetEvent::Connected(Ok(())));
            pump(stream, outgoing, &token, read_chunk, |event| sink.emit(epoch, event)).await;
            sink.emit(epoch, NetEvent::Closed);
        });
    }

    fn write(&mut self, epoch: Epoch, data: Bytes) -> Result<()> {
        let writer = self
            .active
            .as_ref()
            .filter(|active| active.epoch == epoch)
            .and_then(|active| active.writer.as_ref())
            .ok_or_else(|| Error::network("no open connection"))?;

        writer
            .send(data)
            .map_err(|_| Error::network("connection task has exited"))
    }

    fn close(&mut self, epoch: Epoch) {
        if self.active.as_ref().is_some_and(|active| active.epoch == epoch) {
            if let Some(active) = self.active.take() {
                active.token.cancel();
            }
        }
    }
}

impl Drop for TokioTransport {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.token.cancel();
        }
    }
}

/// Move bytes between the socket and the client until cancelled
///
/// Read and write failures are reported but do not end the pump; the client
/// answers them with `close`, which cancels the token.
async fn pump<F>(
    mut stream: TcpStream,
    mut outgoing: mpsc::UnboundedReceiver<Bytes>,
    token: &CancellationToken,
    read_chunk: usize,
    emit: F,
) where
    F: Fn(NetEvent),
{
    let (mut reader, mut writer) = stream.split();
    let mut buf = BytesMut::with_capacity(read_chunk);
    let mut reading = true;
    let mut writing = true;

    loop {
        buf.reserve(read_chunk);

        tokio::select! {
            _ = token.cancelled() => break,
            data = outgoing.recv(), if writing => match data {
                Some(data) => {
                    if let Err(e) = writer.write_all(&data).await {
                        emit(NetEvent::WriteError(e));
                        writing = false;
                    }
                }
                None => writing = false,
            },
            read = reader.read_buf(&mut buf), if reading => match read {
                Ok(0) => {
                    emit(NetEvent::Eof);
                    reading = false;
                }
                Ok(_) => emit(NetEvent::Read(buf.split().freeze())),
                Err(e) => {
                    emit(NetEvent::ReadError(e));
                    reading = false;
                }
            },
        }
    }

    if let Err(e) = writer.shutdown().await {
        trace!("Socket shutdown failed: {}", e);
    }
}

/// Timing knobs of the driver
#[derive(Debug, Clone, Copy)]
pub struct LoopSettings {
    pub tick_interval: Duration,
    pub connect_timeout: Duration,
    pub read_chunk: usize,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_chunk: DEFAULT_READ_CHUNK,
        }
    }
}

enum Command {
    AddClient {
        id: i32,
        options: ClientOptions,
        listener: Box<dyn ClientListener>,
        reply: oneshot::Sender<ClientKey>,
    },
    Connect {
        key: ClientKey,
        url: PoolUrl,
    },
    Disconnect {
        key: ClientKey,
    },
    Submit {
        key: ClientKey,
        result: JobResult,
        reply: oneshot::Sender<Result<RequestId>>,
    },
    SetDormancy {
        key: ClientKey,
        dormant: bool,
    },
    SetRetryPause {
        key: ClientKey,
        pause: Duration,
    },
    SetQuiet {
        key: ClientKey,
        quiet: bool,
    },
    DeleteLater {
        key: ClientKey,
    },
    Shutdown,
}

/// Cloneable handle for talking to a running [`EventLoop`]
#[derive(Clone)]
pub struct LoopHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl LoopHandle {
    fn send(&self, command: Command) -> Result<()> {
        self.tx.send(command).map_err(|_| Error::LoopClosed)
    }

    /// Register a new client
    pub async fn add_client(
        &self,
        id: i32,
        options: ClientOptions,
        listener: Box<dyn ClientListener>,
    ) -> Result<ClientKey> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::AddClient {
            id,
            options,
            listener,
            reply,
        })?;
        rx.await.map_err(|_| Error::LoopClosed)
    }

    pub fn connect(&self, key: ClientKey, url: PoolUrl) -> Result<()> {
        self.send(Command::Connect { key, url })
    }

    pub fn disconnect(&self, key: ClientKey) -> Result<()> {
        self.send(Command::Disconnect { key })
    }

    /// Submit a share, returning the request id it was sent under
    pub async fn submit(&self, key: ClientKey, result: JobResult) -> Result<RequestId> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Submit { key, result, reply })?;
        rx.await.map_err(|_| Error::LoopClosed)?
    }

    pub fn set_dormancy(&self, key: ClientKey, dormant: bool) -> Result<()> {
        self.send(Command::SetDormancy { key, dormant })
    }

    pub fn set_retry_pause(&self, key: ClientKey, pause: Duration) -> Result<()> {
        self.send(Command::SetRetryPause { key, pause })
    }

    pub fn set_quiet(&self, key: ClientKey, quiet: bool) -> Result<()> {
        self.send(Command::SetQuiet { key, quiet })
    }

    pub fn delete_later(&self, key: ClientKey) -> Result<()> {
        self.send(Command::DeleteLater { key })
    }

    /// Ask the loop to close every client and return
    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }
}

/// Single-task owner of all clients
pub struct EventLoop {
    registry: ClientRegistry<TokioTransport>,
    settings: LoopSettings,
    events_tx: mpsc::UnboundedSender<LoopEvent>,
    events_rx: mpsc::UnboundedReceiver<LoopEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl EventLoop {
    pub fn new(settings: LoopSettings) -> (Self, LoopHandle) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (tx, commands) = mpsc::unbounded_channel();

        let event_loop = Self {
            registry: ClientRegistry::new(),
            settings,
            events_tx,
            events_rx,
            commands,
        };
        (event_loop, LoopHandle { tx })
    }

    /// Register a client before the loop starts
    pub fn add_client(&mut self, id: i32, options: ClientOptions, listener: Box<dyn ClientListener>) -> ClientKey {
        let events = self.events_tx.clone();
        let settings = self.settings;
        self.registry.insert_with(|key| {
            let transport = TokioTransport::new(key, events, settings.connect_timeout, settings.read_chunk);
            Client::new(id, options, transport, listener)
        })
    }

    pub fn registry(&self) -> &ClientRegistry<TokioTransport> {
        &self.registry
    }

    /// Run until [`LoopHandle::shutdown`] or every handle is dropped
    pub async fn run(mut self) {
        let mut ticker = time::interval(self.settings.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Event loop started, tick every {}",
            humantime::format_duration(self.settings.tick_interval)
        );

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.on_command(command),
                },
                Some(event) = self.events_rx.recv() => self.dispatch(event),
                _ = ticker.tick() => self.tick(Instant::now()),
            }
        }

        self.shutdown().await;
    }

    fn on_command(&mut self, command: Command) {
        let now = Instant::now();

        match command {
            Command::AddClient {
                id,
                options,
                listener,
                reply,
            } => {
                let key = self.add_client(id, options, listener);
                if reply.send(key).is_err() {
                    debug!("Client {} added but requester went away", id);
                }
            }
            Command::Connect { key, url } => {
                if let Some(client) = self.registry.live_mut(key) {
                    client.connect(url);
                }
            }
            Command::Disconnect { key } => {
                if let Some(client) = self.registry.live_mut(key) {
                    client.disconnect(now);
                }
            }
            Command::Submit { key, result, reply } => {
                let outcome = match self.registry.live_mut(key) {
                    Some(client) => client.submit(&result, now),
                    None => Err(Error::not_ready("unknown client")),
                };
                if reply.send(outcome).is_err() {
                    trace!("Submit requester went away");
                }
            }
            Command::SetDormancy { key, dormant } => {
                if let Some(client) = self.registry.live_mut(key) {
                    client.set_dormancy(dormant, now);
                }
            }
            Command::SetRetryPause { key, pause } => {
                if let Some(client) = self.registry.live_mut(key) {
                    client.set_retry_pause(pause);
                }
            }
            Command::SetQuiet { key, quiet } => {
                if let Some(client) = self.registry.live_mut(key) {
                    client.set_quiet(quiet);
                }
            }
            Command::DeleteLater { key } => {
                if self.registry.delete_later(key, now) {
                    self.registry.sweep();
                }
            }
            Command::Shutdown => {}
        }
    }

    fn dispatch(&mut self, event: LoopEvent) {
        let Some(client) = self.registry.get_mut(event.key) else {
            trace!("Dropping event for removed client");
            return;
        };
        client.handle_event(event.epoch, event.event, Instant::now());

        if self.registry.is_doomed(event.key) {
            self.registry.sweep();
        }
    }

    fn tick(&mut self, now: Instant) {
        for client in self.registry.iter_mut() {
            client.tick(now);
        }
        self.registry.sweep();
    }

    async fn shutdown(&mut self) {
        let now = Instant::now();
        for key in self.registry.keys() {
            self.registry.delete_later(key, now);
        }
        self.registry.sweep();

        let deadline = now + SHUTDOWN_GRACE;
        while !self.registry.is_empty() {
            match time::timeout_at(deadline, self.events_rx.recv()).await {
                Ok(Some(event)) => self.dispatch(event),
                _ => break,
            }
        }

        info!("Event loop stopped, {} clients left", self.registry.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::{ChannelListener, SilentListener};
    use assert_matches::assert_matches;
    use tokio::net::TcpListener;

    #[derive(Debug, Default)]
    struct NullTransport {
        closes: usize,
    }

    impl Transport for NullTransport {
        fn resolve(&mut self, _epoch: Epoch, _host: &str, _port: u16) {}
        fn connect(&mut self, _epoch: Epoch, _addr: SocketAddr) {}
        fn write(&mut self, _epoch: Epoch, _data: Bytes) -> Result<()> {
            Ok(())
        }
        fn close(&mut self, _epoch: Epoch) {
            self.closes += 1;
        }
    }

    fn null_client(id: i32) -> Client<NullTransport> {
        Client::new(id, ClientOptions::default(), NullTransport::default(), Box::new(SilentListener))
    }

    fn url() -> PoolUrl {
        PoolUrl::new("127.0.0.1", 3333, "wallet", "x").unwrap()
    }

    #[test]
    fn test_registry_reuses_slots_with_new_generation() {
        let mut registry = ClientRegistry::new();
        let first = registry.insert_with(|_| null_client(1));
        assert_eq!(registry.len(), 1);

        assert!(registry.delete_later(first, Instant::now()));
        assert_eq!(registry.sweep(), 1);
        assert!(registry.is_empty());
        assert!(registry.get(first).is_none());

        let second = registry.insert_with(|_| null_client(2));
        assert_ne!(first, second);
        assert!(registry.get(first).is_none());
        assert_eq!(registry.get(second).map(|c| c.id()), Some(2));
    }

    #[test]
    fn test_delete_later_waits_for_close() {
        let now = Instant::now();
        let mut registry = ClientRegistry::new();
        let key = registry.insert_with(|_| null_client(1));

        let client = registry.get_mut(key).unwrap();
        client.connect(url());
        let epoch = client.epoch();
        client.handle_event(epoch, NetEvent::Resolved(Ok(vec!["127.0.0.1:3333".parse().unwrap()])), now);
        client.handle_event(epoch, NetEvent::Connected(Ok(())), now);
        assert_eq!(client.state(), SessionState::Connected);

        registry.delete_later(key, now);
        assert!(registry.is_doomed(key));
        assert!(registry.live_mut(key).is_none());
        assert_eq!(registry.get(key).map(|c| c.state()), Some(SessionState::Closing));
        assert_eq!(registry.get(key).map(|c| c.transport().closes), Some(1));
        assert_eq!(registry.sweep(), 0);

        registry.get_mut(key).unwrap().handle_event(epoch, NetEvent::Closed, now);
        assert_eq!(registry.sweep(), 1);
        assert!(registry.get(key).is_none());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let mut registry: ClientRegistry<NullTransport> = ClientRegistry::new();
        let key = registry.insert_with(|_| null_client(1));
        registry.delete_later(key, Instant::now());
        registry.sweep();

        assert!(!registry.delete_later(key, Instant::now()));
        assert!(registry.get_mut(key).is_none());
    }

    #[tokio::test]
    async fn test_transport_reports_refused_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let key = ClientKey {
            index: 0,
            generation: 0,
        };
        let mut transport = TokioTransport::new(key, tx, Duration::from_secs(5), DEFAULT_READ_CHUNK);
        transport.connect(1, addr);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.key, key);
        assert_eq!(event.epoch, 1);
        assert_matches!(event.event, NetEvent::Connected(Err(_)));
    }

    #[tokio::test]
    async fn test_transport_round_trip_and_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let key = ClientKey {
            index: 0,
            generation: 0,
        };
        let mut transport = TokioTransport::new(key, tx, Duration::from_secs(5), DEFAULT_READ_CHUNK);

        transport.resolve(3, "127.0.0.1", addr.port());
        assert_matches!(rx.recv().await.unwrap().event, NetEvent::Resolved(Ok(addrs)) => {
            assert!(addrs.contains(&addr));
        });

        transport.connect(3, addr);
        let (mut peer, _) = listener.accept().await.unwrap();
        assert_matches!(rx.recv().await.unwrap().event, NetEvent::Connected(Ok(())));

        transport.write(3, Bytes::from_static(b"ping\n")).unwrap();
        let mut buf = [0u8; 5];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping\n");

        peer.write_all(b"pong\n").await.unwrap();
        assert_matches!(rx.recv().await.unwrap().event, NetEvent::Read(data) => {
            assert_eq!(&data[..], b"pong\n");
        });

        assert!(transport.write(2, Bytes::from_static(b"x")).is_err());

        transport.close(3);
        assert_matches!(rx.recv().await.unwrap().event, NetEvent::Closed);
        assert!(transport.write(3, Bytes::from_static(b"x")).is_err());
    }

    #[tokio::test]
    async fn test_loop_handle_reports_closed_loop() {
        let (event_loop, handle) = EventLoop::new(LoopSettings::default());
        drop(event_loop);

        let (listener, _rx) = ChannelListener::channel();
        assert_matches!(
            handle.add_client(0, ClientOptions::default(), Box::new(listener)).await,
            Err(Error::LoopClosed)
        );
    }

    #[tokio::test]
    async fn test_submit_to_unconnected_client() {
        let (event_loop, handle) = EventLoop::new(LoopSettings::default());
        let task = tokio::spawn(event_loop.run());

        let (listener, mut events) = ChannelListener::channel();
        let key = handle
            .add_client(0, ClientOptions::default(), Box::new(listener))
            .await
            .unwrap();

        let result = JobResult::new("A", 1, [0u8; 32], 1);
        assert_matches!(handle.submit(key, result).await, Err(Error::NotReady { .. }));

        handle.shutdown().unwrap();
        task.await.unwrap();
        assert_matches!(events.try_recv(), Err(_));
    }
}
