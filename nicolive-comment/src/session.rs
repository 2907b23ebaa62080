//! Session orchestrator
//!
//! `NiconicoProvider` is a handle to an actor task that owns every piece of
//! session state: connection state, the running components, de-duplication
//! sets and the retry counter. Components report back over one channel,
//! tagged with the id they were spawned under; reports from ids that are no
//! longer current are dropped, so nothing surfaces after a component is
//! retired.

use chrono::Utc;
use nicolive_proto::Payload;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::backlog::{BacklogChain, BacklogEvent};
use crate::config::ProviderConfig;
use crate::control::{ControlChannel, ControlEvent};
use crate::entry::{Cursor, EntryEvent, EntryStream};
use crate::error::{ClientError, Result};
use crate::events::{BroadcastMetadata, ConnectionState, ErrorEvent, ErrorSource, ProviderEvent};
use crate::http::{HttpFetcher, ReqwestFetcher};
use crate::segment::{SegmentEvent, SegmentStream};
use crate::signaling::{SignalingConnector, SignalingLink, WsConnector};
use crate::sink::EventSink;
use crate::watch_page::{WatchPageClient, WatchPageResolver};

/// External services a session talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub fetcher: Arc<dyn HttpFetcher>,
    pub signaling: Arc<dyn SignalingConnector>,
    pub resolver: Arc<dyn WatchPageResolver>,
}

impl Collaborators {
    /// reqwest, tokio-tungstenite and the live.nicovideo.jp watch page.
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        Ok(Self {
            fetcher: Arc::new(ReqwestFetcher::new(config.cookies.clone())?),
            signaling: Arc::new(WsConnector::new(config.stream.connect_timeout())),
            resolver: Arc::new(WatchPageClient::new(&config.watch_page, config.cookies.clone())?),
        })
    }
}

enum Command {
    Connect(oneshot::Sender<Result<BroadcastMetadata>>),
    Disconnect(oneshot::Sender<()>),
}

enum Input {
    Handshake {
        id: u64,
        result: Result<(SignalingLink, BroadcastMetadata)>,
    },
    ReconnectDue {
        id: u64,
    },
    EntryRestartDue {
        id: u64,
    },
    Control {
        id: u64,
        event: ControlEvent,
    },
    Entry {
        id: u64,
        event: EntryEvent,
    },
    Segment {
        id: u64,
        event: SegmentEvent,
    },
    Backlog {
        id: u64,
        event: BacklogEvent,
    },
}

/// Comment client for one broadcast.
///
/// Must be created inside a tokio runtime. Dropping the provider tears the
/// session down.
pub struct NiconicoProvider {
    live_id: String,
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<ProviderEvent>,
    state: watch::Receiver<ConnectionState>,
    metadata: watch::Receiver<Option<BroadcastMetadata>>,
}

impl NiconicoProvider {
    /// Provider using the default network collaborators.
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let collaborators = Collaborators::from_config(&config)?;
        Self::with_collaborators(config, collaborators)
    }

    pub fn with_collaborators(config: ProviderConfig, collaborators: Collaborators) -> Result<Self> {
        if config.live_id.trim().is_empty() {
            return Err(ClientError::InvalidConfig("live_id must not be empty".to_string()));
        }
        if config.events.channel_capacity == 0 {
            return Err(ClientError::InvalidConfig(
                "events.channel_capacity must be greater than 0".to_string(),
            ));
        }

        let (command_tx, command_rx) = mpsc::channel(16);
        let (events, _) = broadcast::channel(config.events.channel_capacity);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (metadata_tx, metadata_rx) = watch::channel(None);
        let (input_tx, input_rx) = mpsc::unbounded_channel();

        let live_id = config.live_id.clone();
        let session = Session {
            config,
            collaborators,
            events: events.clone(),
            state_tx,
            metadata_tx,
            input_tx,
            next_id: 0,
            lifetime: CancellationToken::new(),
            pending_connect: None,
            handshake: None,
            reconnect_timer: None,
            control: None,
            view_uri: None,
            entry: None,
            entry_restart: None,
            segments: HashMap::new(),
            backlog: None,
            seen_segments: HashSet::new(),
            seen_chats: HashSet::new(),
            backlog_fetched: false,
            retry_count: 0,
        };
        tokio::spawn(session.run(command_rx, input_rx));

        Ok(Self {
            live_id,
            commands: command_tx,
            events,
            state: state_rx,
            metadata: metadata_rx,
        })
    }

    #[must_use]
    pub fn live_id(&self) -> &str {
        &self.live_id
    }

    /// Receive every event emitted from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch connection state changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Metadata of the latest successful connection.
    #[must_use]
    pub fn metadata(&self) -> Option<BroadcastMetadata> {
        self.metadata.borrow().clone()
    }

    /// Connect to the broadcast.
    ///
    /// Resolves once the control channel is open. Rejected while a session
    /// is connecting or connected.
    pub async fn connect(&self) -> Result<BroadcastMetadata> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Connect(tx))
            .await
            .map_err(|_| ClientError::SessionClosed)?;
        rx.await.map_err(|_| ClientError::SessionClosed)?
    }

    /// Tear the session down. Idempotent.
    pub async fn disconnect(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Disconnect(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }
}

struct Session {
    config: ProviderConfig,
    collaborators: Collaborators,
    events: broadcast::Sender<ProviderEvent>,
    state_tx: watch::Sender<ConnectionState>,
    metadata_tx: watch::Sender<Option<BroadcastMetadata>>,
    input_tx: mpsc::UnboundedSender<Input>,
    next_id: u64,

    /// Parent of every component token; replaced on each `connect()`
    lifetime: CancellationToken,
    pending_connect: Option<oneshot::Sender<Result<BroadcastMetadata>>>,
    handshake: Option<(u64, JoinHandle<()>)>,
    reconnect_timer: Option<(u64, JoinHandle<()>)>,

    control: Option<(u64, ControlChannel)>,
    view_uri: Option<String>,
    entry: Option<(u64, EntryStream)>,
    entry_restart: Option<(u64, JoinHandle<()>)>,
    segments: HashMap<u64, (String, SegmentStream)>,
    backlog: Option<(u64, String, BacklogChain)>,

    seen_segments: HashSet<String>,
    seen_chats: HashSet<i32>,
    backlog_fetched: bool,
    retry_count: u32,
}

impl Session {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut inputs: mpsc::UnboundedReceiver<Input>,
    ) {
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Connect(reply)) => self.on_connect(reply),
                    Some(Command::Disconnect(reply)) => {
                        self.teardown();
                        self.set_state(ConnectionState::Disconnected);
                        let _ = reply.send(());
                    }
                    None => break,
                },
                Some(input) = inputs.recv() => self.on_input(input),
            }
        }

        self.teardown();
        debug!(live_id = %self.config.live_id, "Session actor stopped");
    }

    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn emit(&self, event: ProviderEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn emit_error(&self, source: ErrorSource, message: impl Into<String>) {
        self.emit(ProviderEvent::Error(ErrorEvent::new(source, message)));
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            info!(live_id = %self.config.live_id, from = %previous, to = %state, "Connection state changed");
            self.emit(ProviderEvent::StateChanged(state));
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn on_connect(&mut self, reply: oneshot::Sender<Result<BroadcastMetadata>>) {
        if matches!(
            self.state(),
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            let _ = reply.send(Err(ClientError::InvalidState(format!(
                "cannot connect while {}",
                self.state()
            ))));
            return;
        }

        self.teardown();
        self.lifetime = CancellationToken::new();
        self.set_state(ConnectionState::Connecting);
        self.pending_connect = Some(reply);
        self.start_handshake();
    }

    /// Resolve the watch page and open the control channel in the background.
    fn start_handshake(&mut self) {
        let id = self.allocate_id();
        let live_id = self.config.live_id.clone();
        let resolver = Arc::clone(&self.collaborators.resolver);
        let signaling = Arc::clone(&self.collaborators.signaling);
        let input_tx = self.input_tx.clone();
        let cancel = self.lifetime.child_token();

        let handle = tokio::spawn(async move {
            let attempt = async {
                let page = resolver.resolve(&live_id).await?;
                let link = ControlChannel::handshake(signaling.as_ref(), &page.web_socket_url).await?;
                Ok::<_, ClientError>((link, page.metadata))
            };
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                r = attempt => r,
            };
            let _ = input_tx.send(Input::Handshake { id, result });
        });

        if let Some((_, old)) = self.handshake.replace((id, handle)) {
            old.abort();
        }
    }

    fn on_input(&mut self, input: Input) {
        match input {
            Input::Handshake { id, result } => {
                if self.handshake.as_ref().is_some_and(|(current, _)| *current == id) {
                    self.handshake = None;
                    self.on_handshake(id, result);
                }
            }
            Input::ReconnectDue { id } => {
                if self.reconnect_timer.as_ref().is_some_and(|(current, _)| *current == id) {
                    self.reconnect_timer = None;
                    info!(live_id = %self.config.live_id, attempt = self.retry_count, "Reconnecting");
                    self.start_handshake();
                }
            }
            Input::EntryRestartDue { id } => {
                if self.entry_restart.as_ref().is_some_and(|(current, _)| *current == id) {
                    self.entry_restart = None;
                    self.start_entry(Cursor::Now);
                }
            }
            Input::Control { id, event } => {
                if self.control.as_ref().is_some_and(|(current, _)| *current == id) {
                    self.on_control(event);
                }
            }
            Input::Entry { id, event } => {
                if self.entry.as_ref().is_some_and(|(current, _)| *current == id) {
                    self.on_entry(event);
                }
            }
            Input::Segment { id, event } => {
                if self.segments.contains_key(&id) {
                    self.on_segment(id, event);
                }
            }
            Input::Backlog { id, event } => {
                if self.backlog.as_ref().is_some_and(|(current, _, _)| *current == id) {
                    self.on_backlog(event);
                }
            }
        }
    }

    fn on_handshake(&mut self, id: u64, result: Result<(SignalingLink, BroadcastMetadata)>) {
        match result {
            Ok((link, metadata)) => {
                let input_tx = self.input_tx.clone();
                let sink: EventSink<ControlEvent> = Arc::new(move |event| {
                    let _ = input_tx.send(Input::Control { id, event });
                });
                let channel = ControlChannel::start(link, self.config.control.clone(), sink, &self.lifetime);
                self.control = Some((id, channel));

                self.retry_count = 0;
                self.metadata_tx.send_replace(Some(metadata.clone()));
                self.set_state(ConnectionState::Connected);
                self.emit(ProviderEvent::Metadata(metadata.clone()));

                if let Some(reply) = self.pending_connect.take() {
                    let _ = reply.send(Ok(metadata));
                }
            }
            Err(e) => {
                if let Some(reply) = self.pending_connect.take() {
                    warn!(live_id = %self.config.live_id, error = %e, "Connect failed");
                    self.teardown();
                    self.set_state(ConnectionState::Error);
                    let _ = reply.send(Err(e));
                } else {
                    warn!(live_id = %self.config.live_id, error = %e, "Reconnect attempt failed");
                    self.schedule_reconnect();
                }
            }
        }
    }

    fn on_control(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::MessageServer(uri) => {
                self.view_uri = Some(uri);
                self.start_entry(Cursor::Now);
            }
            ControlEvent::Disconnect(reason) => {
                self.emit_error(ErrorSource::Control, ClientError::Disconnected(reason).to_string());
                self.teardown();
                self.set_state(ConnectionState::Disconnected);
            }
            ControlEvent::Error(message) => self.emit_error(ErrorSource::Control, message),
            ControlEvent::Closed => {
                warn!(
                    live_id = %self.config.live_id,
                    segments = self.segments.len(),
                    "Control channel lost"
                );
                // Entry, segment and backlog streams keep running; the next
                // messageServer replaces the entry stream
                self.close_control();
                self.schedule_reconnect();
            }
        }
    }

    fn schedule_reconnect(&mut self) {
        let max = self.config.retry.max_retries;
        if self.retry_count >= max {
            self.emit_error(
                ErrorSource::Session,
                ClientError::ReconnectExhausted {
                    attempts: self.retry_count,
                }
                .to_string(),
            );
            self.teardown();
            self.set_state(ConnectionState::Disconnected);
            return;
        }

        self.retry_count += 1;
        self.set_state(ConnectionState::Connecting);

        let id = self.allocate_id();
        let delay = self.config.retry_interval();
        let input_tx = self.input_tx.clone();
        info!(
            live_id = %self.config.live_id,
            attempt = self.retry_count,
            max_retries = max,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = input_tx.send(Input::ReconnectDue { id });
        });
        if let Some((_, old)) = self.reconnect_timer.replace((id, handle)) {
            old.abort();
        }
    }

    fn start_entry(&mut self, cursor: Cursor) {
        let Some(view_uri) = self.view_uri.clone() else {
            return;
        };
        if let Some((_, old)) = self.entry.take() {
            old.stop();
        }

        let id = self.allocate_id();
        let input_tx = self.input_tx.clone();
        let sink: EventSink<EntryEvent> = Arc::new(move |event| {
            let _ = input_tx.send(Input::Entry { id, event });
        });
        debug!(cursor = %cursor, "Opening entry stream");
        let stream = EntryStream::spawn(
            Arc::clone(&self.collaborators.fetcher),
            view_uri,
            cursor,
            self.config.stream.clone(),
            sink,
            &self.lifetime,
        );
        self.entry = Some((id, stream));
    }

    fn on_entry(&mut self, event: EntryEvent) {
        match event {
            EntryEvent::Segment(uri) => self.start_segment(uri),
            EntryEvent::Backward(uri) => self.start_backlog(uri),
            EntryEvent::NextAt(at) => self.start_entry(Cursor::At(at)),
            EntryEvent::End => self.start_entry(Cursor::Now),
            EntryEvent::Error(message) => {
                self.emit_error(ErrorSource::Entry, message);
                if let Some((_, stream)) = self.entry.take() {
                    info!(
                        cursor = %stream.cursor(),
                        delay_ms = self.config.retry.retry_interval_ms,
                        "Entry stream will reopen at now"
                    );
                    stream.stop();
                }

                let id = self.allocate_id();
                let delay = self.config.retry_interval();
                let input_tx = self.input_tx.clone();
                let handle = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = input_tx.send(Input::EntryRestartDue { id });
                });
                if let Some((_, old)) = self.entry_restart.replace((id, handle)) {
                    old.abort();
                }
            }
        }
    }

    fn start_segment(&mut self, uri: String) {
        if !self.seen_segments.insert(uri.clone()) {
            return;
        }

        let id = self.allocate_id();
        let input_tx = self.input_tx.clone();
        let sink: EventSink<SegmentEvent> = Arc::new(move |event| {
            let _ = input_tx.send(Input::Segment { id, event });
        });
        debug!(uri = %uri, active = self.segments.len() + 1, "Starting segment stream");
        let stream = SegmentStream::spawn(
            Arc::clone(&self.collaborators.fetcher),
            uri.clone(),
            self.config.stream.clone(),
            sink,
            &self.lifetime,
        );
        self.segments.insert(id, (uri, stream));
    }

    fn on_segment(&mut self, id: u64, event: SegmentEvent) {
        match event {
            SegmentEvent::Payload(payload) => self.surface(payload, false),
            SegmentEvent::End => {
                if let Some((uri, _)) = self.segments.remove(&id) {
                    self.emit(ProviderEvent::StreamEnded { uri });
                }
            }
            SegmentEvent::Error(message) => {
                self.segments.remove(&id);
                self.emit_error(ErrorSource::Segment, message);
            }
        }
    }

    fn start_backlog(&mut self, uri: String) {
        if !self.config.backlog.enabled || self.backlog_fetched {
            return;
        }
        self.backlog_fetched = true;

        let id = self.allocate_id();
        let input_tx = self.input_tx.clone();
        let sink: EventSink<BacklogEvent> = Arc::new(move |event| {
            let _ = input_tx.send(Input::Backlog { id, event });
        });
        info!(uri = %uri, "Fetching backlog");
        let chain = BacklogChain::spawn(
            Arc::clone(&self.collaborators.fetcher),
            uri.clone(),
            self.config.backlog.clone(),
            sink,
            &self.lifetime,
        );
        self.backlog = Some((id, uri, chain));
    }

    fn on_backlog(&mut self, event: BacklogEvent) {
        match event {
            BacklogEvent::Payload(payload) => self.surface(payload, true),
            BacklogEvent::Error(message) => self.emit_error(ErrorSource::Backlog, message),
            BacklogEvent::Complete => {
                if let Some((_, uri, _)) = self.backlog.take() {
                    self.emit(ProviderEvent::StreamEnded { uri });
                }
            }
        }
    }

    /// Deliver a decoded payload, dropping chats already delivered.
    fn surface(&mut self, payload: Payload, is_history: bool) {
        if let Payload::Chat(chat) = &payload {
            if chat.no > 0 && !self.seen_chats.insert(chat.no) {
                return;
            }
        }
        if let Some(event) = ProviderEvent::from_payload(payload, is_history, Utc::now()) {
            trace!(kind = ?event.kind(), is_history, "Surfacing event");
            self.emit(event);
        }
    }

    /// Close the control channel and drop pending handshake and reconnect
    /// timers. Streams are left alone.
    fn close_control(&mut self) {
        if let Some((_, handle)) = self.handshake.take() {
            handle.abort();
        }
        if let Some((_, handle)) = self.reconnect_timer.take() {
            handle.abort();
        }
        if let Some((_, control)) = self.control.take() {
            control.close();
        }
    }

    /// Close the control channel and stop every stream.
    fn stop_connection(&mut self) {
        self.close_control();
        if let Some((_, handle)) = self.entry_restart.take() {
            handle.abort();
        }
        if let Some((_, entry)) = self.entry.take() {
            entry.stop();
        }
        for (_, (_, segment)) in self.segments.drain() {
            segment.stop();
        }
        if let Some((_, _, chain)) = self.backlog.take() {
            chain.stop();
        }
        self.view_uri = None;
    }

    /// End the connection lifetime: stop everything and forget all
    /// per-lifetime state.
    fn teardown(&mut self) {
        self.stop_connection();
        self.lifetime.cancel();
        self.seen_segments.clear();
        self.seen_chats.clear();
        self.backlog_fetched = false;
        self.retry_count = 0;
        if let Some(reply) = self.pending_connect.take() {
            let _ = reply.send(Err(ClientError::SessionClosed));
        }
    }
}
