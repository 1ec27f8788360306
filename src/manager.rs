//! `DeltaManager` — the orchestrator that owns the three queues, the
//! content cache, and the active connection, and implements the
//! ordering, reassembly, reconnect and ack-throttle protocols. This is
//! the largest module in the crate; every other module exists to be
//! composed here.
//!
//! The connection state machine follows an accept-then-react event loop
//! shape, generalized from a server accept loop into a client reconnect
//! loop, and `trigger_fetch_missing_deltas` uses a single-flight
//! background-fetch pattern to avoid duplicate in-flight backfills.

use crate::cache::ContentCache;
use crate::connection::{ConnectionDetails, DeltaConnection, DeltaConnectionEvent};
use crate::core::config::DeltaManagerConfig;
use crate::core::error::Error;
use crate::core::types::{ClientId, DocumentMessage, MessageType, Opaque, SequencedMessage, Signal, Trace};
use crate::core::Result;
use crate::events::EventBus;
use crate::handler::HandlerStrategy;
use crate::queue::{DeltaQueue, QueueEvent};
use crate::storage::{DeltaStorageClient, DocumentServiceClient};
use crate::telemetry::{NoopTelemetrySink, TelemetryEvent, TelemetrySink};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, OnceCell};

/// The non-null marker used for the immediate `NoOp` acking a `Propose`.
/// Any non-null payload satisfies the server contract; this crate uses
/// the empty string.
pub const IMMEDIATE_NO_OP_RESPONSE: &str = "";

/// A client's reconnect-eligibility category. Only [`ClientType::Browser`] clients reconnect automatically
/// after a NACK or disconnect; everything else is treated as a
/// short-lived or batch session that should surface the failure instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientType {
    /// Long-lived interactive session; reconnects on failure.
    Browser,
    /// Any other category, named for logging/trace purposes.
    Other(String),
}

impl ClientType {
    /// Whether this category reconnects automatically on NACK/disconnect.
    pub fn reconnects_on_failure(&self) -> bool {
        matches!(self, ClientType::Browser)
    }

    fn label(&self) -> &str {
        match self {
            ClientType::Browser => "browser",
            ClientType::Other(name) => name,
        }
    }
}

impl Default for ClientType {
    fn default() -> Self {
        ClientType::Browser
    }
}

/// Events the manager publishes about its own lifecycle.
#[derive(Debug, Clone)]
pub enum ManagerEvent {
    /// A connection was established (first connect only resolves
    /// [`DeltaManager::connect`]'s return value, but this fires on every
    /// generation).
    Connect(ConnectionDetails),
    /// The connection was lost; `true` if due to a server NACK.
    Disconnect(bool),
    /// A non-fatal error surfaced from a queue or the connection.
    Error(String),
    /// Round-trip latency observed on a `pong`.
    Pong(u64),
    /// Milliseconds spent in one `handler.process` call.
    ProcessTime(u64),
}

struct ManagerState {
    base_sequence_number: u64,
    min_sequence_number: u64,
    last_queued_sequence_number: u64,
    largest_sequence_number: u64,
    client_sequence_number: u64,
    readonly: bool,
    pending: Vec<SequencedMessage>,
    fetching: bool,
    closed: bool,
    ack_generation: u64,
    ack_timer_set: bool,
    ack_update_requested: bool,
}

impl Default for ManagerState {
    fn default() -> Self {
        Self {
            base_sequence_number: 0,
            min_sequence_number: 0,
            last_queued_sequence_number: 0,
            largest_sequence_number: 0,
            client_sequence_number: 0,
            readonly: true,
            pending: Vec::new(),
            fetching: false,
            closed: false,
            ack_generation: 0,
            ack_timer_set: false,
            ack_update_requested: false,
        }
    }
}

enum EnqueueAction {
    Admit(SequencedMessage),
    Duplicate(u64),
    Gap(SequencedMessage, u64, u64),
}

/// The client-side delta manager: three queues, a content cache, and one
/// active connection, orchestrated into gap-free ordered delivery.
pub struct DeltaManager {
    config: DeltaManagerConfig,
    client_type: ClientType,
    document_service: Arc<dyn DocumentServiceClient>,
    connection: Arc<dyn DeltaConnection>,
    state: Mutex<ManagerState>,
    events: EventBus<ManagerEvent>,
    inbound: Arc<DeltaQueue<SequencedMessage>>,
    inbound_signal: Arc<DeltaQueue<Signal>>,
    outbound: Arc<DeltaQueue<DocumentMessage>>,
    content_cache: Arc<ContentCache>,
    handler: Mutex<Option<Arc<dyn HandlerStrategy>>>,
    storage: Mutex<Option<Arc<dyn DeltaStorageClient>>>,
    connection_details: Mutex<Option<ConnectionDetails>>,
    connected_once: OnceCell<ConnectionDetails>,
    telemetry: Arc<dyn TelemetrySink>,
    weak_self: Weak<DeltaManager>,
}

impl DeltaManager {
    /// Construct a manager with all three queues paused,
    /// discarding telemetry events. Use [`DeltaManager::new_with_telemetry`] to inject a
    /// sink for the duplicate-message/gap-fill events spec.md calls out.
    pub fn new(
        config: DeltaManagerConfig,
        client_type: ClientType,
        document_service: Arc<dyn DocumentServiceClient>,
        connection: Arc<dyn DeltaConnection>,
    ) -> Arc<Self> {
        Self::new_with_telemetry(config, client_type, document_service, connection, Arc::new(NoopTelemetrySink))
    }

    /// Construct a manager with a caller-supplied telemetry sink.
    pub fn new_with_telemetry(
        config: DeltaManagerConfig,
        client_type: ClientType,
        document_service: Arc<dyn DocumentServiceClient>,
        connection: Arc<dyn DeltaConnection>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| {
            let content_cache = Arc::new(ContentCache::new(config.sizing.content_buffer_size));

            let inbound_weak = weak.clone();
            let inbound = Arc::new(DeltaQueue::new(move |message: SequencedMessage| {
                let weak = inbound_weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(manager) => manager.process_inbound(message).await,
                        None => Ok(()),
                    }
                }
            }));

            let inbound_signal_weak = weak.clone();
            let inbound_signal = Arc::new(DeltaQueue::new(move |signal: Signal| {
                let weak = inbound_signal_weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(manager) => manager.process_signal(signal).await,
                        None => Ok(()),
                    }
                }
            }));

            let outbound_weak = weak.clone();
            let outbound = Arc::new(DeltaQueue::new(move |envelope: DocumentMessage| {
                let weak = outbound_weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(manager) => manager.process_outbound(envelope).await,
                        None => Ok(()),
                    }
                }
            }));

            // The manager owns these three queues outright and gates them
            // purely through system_pause/system_resume around connection
            // churn; clear the generic queue's default user-level pause
            // once here so a caller's own pause()/resume() stays reserved
            // for deliberate, churn-surviving application-level pauses.
            inbound.resume_sync();
            inbound_signal.resume_sync();
            outbound.resume_sync();

            Self::spawn_queue_error_relay(weak.clone(), inbound.subscribe());
            Self::spawn_queue_error_relay(weak.clone(), inbound_signal.subscribe());
            Self::spawn_queue_error_relay(weak.clone(), outbound.subscribe());

            Self {
                config,
                client_type,
                document_service,
                connection,
                state: Mutex::new(ManagerState::default()),
                events: EventBus::default(),
                inbound,
                inbound_signal,
                outbound,
                content_cache,
                handler: Mutex::new(None),
                storage: Mutex::new(None),
                connection_details: Mutex::new(None),
                connected_once: OnceCell::new(),
                telemetry,
                weak_self: weak.clone(),
            }
        })
    }

    fn arc(&self) -> Arc<Self> {
        self.weak_self
            .upgrade()
            .expect("DeltaManager outlives its own background tasks")
    }

    // ---- external interfaces --------------------------------

    /// The inbound op queue handle, for pause/resume/clear and event
    /// subscription.
    pub fn inbound(&self) -> &Arc<DeltaQueue<SequencedMessage>> {
        &self.inbound
    }

    /// The inbound signal queue handle.
    pub fn inbound_signal(&self) -> &Arc<DeltaQueue<Signal>> {
        &self.inbound_signal
    }

    /// The outbound op queue handle.
    pub fn outbound(&self) -> &Arc<DeltaQueue<DocumentMessage>> {
        &self.outbound
    }

    /// Subscribe to manager lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.events.subscribe()
    }

    /// `baseSequenceNumber`: sequence number of the last handler-processed
    /// message.
    pub async fn reference_sequence_number(&self) -> u64 {
        self.state.lock().await.base_sequence_number
    }

    /// The server MSN as of the last handler-processed message.
    pub async fn minimum_sequence_number(&self) -> u64 {
        self.state.lock().await.min_sequence_number
    }

    /// The negotiated max message size, or the configured default chunk
    /// size if the connection didn't advertise one.
    pub async fn max_message_size(&self) -> usize {
        self.connection_details
            .lock()
            .await
            .as_ref()
            .and_then(|d| d.max_message_size)
            .unwrap_or(self.config.sizing.default_chunk_size)
    }

    /// The configured split threshold for outbound content.
    pub fn max_content_size(&self) -> usize {
        self.config.sizing.max_content_size
    }

    /// This manager's reconnect-eligibility category.
    pub fn client_type(&self) -> &ClientType {
        &self.client_type
    }

    /// Arm inbound processing at `sequence_number`.
    pub async fn attach_op_handler(&self, sequence_number: u64, handler: Arc<dyn HandlerStrategy>, resume: bool) {
        {
            let mut state = self.state.lock().await;
            state.base_sequence_number = sequence_number;
            state.min_sequence_number = sequence_number;
            state.last_queued_sequence_number = sequence_number;
            state.largest_sequence_number = sequence_number;
        }
        *self.handler.lock().await = Some(handler);

        if resume {
            self.inbound.system_resume().await;
            self.inbound_signal.system_resume().await;
            self.trigger_fetch_missing_deltas("DocumentOpen", sequence_number, None).await;
        }
    }

    /// Establish the first connection, or return the same pending result
    /// if one is already in flight.
    pub async fn connect(&self, reason: &'static str) -> Result<ConnectionDetails> {
        if self.state.lock().await.closed {
            return Err(Error::Closed);
        }
        let details = self
            .connected_once
            .get_or_try_init(|| async {
                self.resolve_storage().await?;
                self.connect_core(reason, self.config.reconnect.initial_reconnect_delay).await
            })
            .await?;
        Ok(details.clone())
    }

    /// Submit a new outbound message, returning its assigned client
    /// sequence number.
    pub async fn submit(&self, message_type: MessageType, contents: Option<Opaque>) -> Result<u64> {
        if self.state.lock().await.closed {
            return Err(Error::Closed);
        }

        let trace = Trace::start(self.client_type.label());
        let (client_sequence_number, reference_sequence_number) = {
            let mut state = self.state.lock().await;
            state.client_sequence_number += 1;
            state.readonly = false;
            (state.client_sequence_number, state.base_sequence_number)
        };

        let mut envelope = DocumentMessage::new(client_sequence_number, reference_sequence_number, message_type, contents);
        envelope.traces.push(trace);

        self.stop_sequence_number_update().await;
        self.outbound.push(envelope).await;
        Ok(client_sequence_number)
    }

    /// Submit a signal, bypassing ordering and queues entirely.
    pub async fn submit_signal(&self, content: Opaque) -> Result<()> {
        if self.state.lock().await.closed {
            return Err(Error::Closed);
        }
        self.connection.submit_signal(Signal { content }).await
    }

    /// Fetch a historical op range directly. Short-circuits to
    /// an empty result once the manager is closed.
    pub async fn get_deltas(&self, reason: &'static str, from: u64, to: Option<u64>) -> Result<Vec<SequencedMessage>> {
        if self.state.lock().await.closed {
            tracing::debug!(reason, "get_deltas short-circuiting: manager closed");
            return Ok(Vec::new());
        }

        let storage = self.storage_arc().await?;
        let mut collected = Vec::new();
        let mut cursor = from;
        let mut delay = self.config.fetch.missing_fetch_delay;

        loop {
            if self.state.lock().await.closed {
                return Ok(collected);
            }

            let page_to = match to {
                Some(t) => cursor.saturating_add(self.config.fetch.max_batch_deltas - 1).min(t),
                None => cursor.saturating_add(self.config.fetch.max_batch_deltas - 1),
            };
            let requested_window = page_to - cursor + 1;

            match storage.get(cursor, page_to).await {
                Ok(batch) if !batch.is_empty() => {
                    let last_fetched = batch.last().expect("checked non-empty").sequence_number;
                    let reached_tail = (batch.len() as u64) < requested_window;
                    collected.extend(batch);
                    delay = self.config.fetch.missing_fetch_delay;

                    let done = match to {
                        None => reached_tail,
                        Some(t) => last_fetched + 1 == t || last_fetched >= t,
                    };
                    if done {
                        break;
                    }
                    cursor = last_fetched + 1;
                }
                Ok(_empty) => {
                    tracing::warn!(reason, ?delay, "empty delta fetch, retrying");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(self.config.fetch.max_fetch_delay);
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!(reason, error = %e, ?delay, "delta fetch failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(self.config.fetch.max_fetch_delay);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(collected)
    }

    /// Enter readonly mode: cancels any pending ack and future `Operation`
    /// processing will not schedule acks until disabled.
    pub async fn enable_readonly_mode(&self) {
        self.state.lock().await.readonly = true;
        self.stop_sequence_number_update().await;
    }

    /// Leave readonly mode.
    pub async fn disable_readonly_mode(&self) {
        self.state.lock().await.readonly = false;
    }

    /// Terminal shutdown: closes the connection, clears and pauses all
    /// three queues, and cancels the ack timer.
    pub async fn close(&self) {
        {
            let mut state = self.state.lock().await;
            if state.closed {
                return;
            }
            state.closed = true;
        }
        self.stop_sequence_number_update().await;
        self.connection.close().await;
        self.inbound.close().await;
        self.inbound_signal.close().await;
        self.outbound.close().await;
    }

    // ---- connection state machine -------------------------

    async fn resolve_storage(&self) -> Result<()> {
        let mut guard = self.storage.lock().await;
        if guard.is_none() {
            *guard = Some(self.document_service.connect_to_delta_storage().await?);
        }
        Ok(())
    }

    async fn storage_arc(&self) -> Result<Arc<dyn DeltaStorageClient>> {
        self.storage
            .lock()
            .await
            .clone()
            .ok_or_else(|| Error::config("delta storage not resolved; call connect() first"))
    }

    async fn connect_core(&self, reason: &'static str, mut delay: Duration) -> Result<ConnectionDetails> {
        loop {
            match self.connection.connect().await {
                Ok((details, events_rx)) => {
                    self.outbound.system_resume().await;
                    self.state.lock().await.client_sequence_number = 0;
                    *self.connection_details.lock().await = Some(details.clone());

                    self.spawn_connection_event_loop(events_rx);
                    self.deliver_initial_backlog(details.clone()).await;
                    self.events.publish(ManagerEvent::Connect(details.clone()));

                    return Ok(details);
                }
                Err(e) => {
                    tracing::warn!(reason, error = %e, ?delay, "connect failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(self.config.reconnect.max_reconnect_delay);
                }
            }
        }
    }

    /// Re-emit a queue's `"error"` events as the manager's own `"error"`
    /// event, so a handler failure that halts a queue is observable from
    /// [`DeltaManager::subscribe`] even though nothing else subscribes to
    /// the queue directly.
    fn spawn_queue_error_relay(weak: Weak<Self>, mut queue_events: broadcast::Receiver<QueueEvent>) {
        tokio::spawn(async move {
            loop {
                match queue_events.recv().await {
                    Ok(QueueEvent::Error(message)) => match weak.upgrade() {
                        Some(manager) => manager.events.publish(ManagerEvent::Error(Error::queue(message).to_string())),
                        None => return,
                    },
                    Ok(QueueEvent::Resume) => {}
                    Err(broadcast::error::RecvError::Closed) => return,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                }
            }
        });
    }

    fn spawn_connection_event_loop(&self, mut events_rx: broadcast::Receiver<DeltaConnectionEvent>) {
        let manager = self.arc();
        tokio::spawn(async move {
            loop {
                match events_rx.recv().await {
                    Ok(DeltaConnectionEvent::Op(message)) => manager.enqueue_message(message).await,
                    Ok(DeltaConnectionEvent::OpContent(content)) => manager.content_cache.set(content).await,
                    Ok(DeltaConnectionEvent::Signal(signal)) => manager.inbound_signal.push(signal).await,
                    Ok(DeltaConnectionEvent::Nack(reason)) => manager.handle_disconnect(true, reason).await,
                    Ok(DeltaConnectionEvent::Disconnect(reason)) => manager.handle_disconnect(false, reason).await,
                    Ok(DeltaConnectionEvent::Pong) => manager.events.publish(ManagerEvent::Pong(0)),
                    Ok(DeltaConnectionEvent::Error(err)) => manager.events.publish(ManagerEvent::Error(err)),
                    Err(broadcast::error::RecvError::Closed) => return,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                }
            }
        });
    }

    async fn deliver_initial_backlog(&self, details: ConnectionDetails) {
        for content in details.initial_contents {
            self.content_cache.set(content).await;
        }

        if self.inbound.is_draining().await {
            self.enqueue_messages(details.initial_messages).await;
            for signal in details.initial_signals {
                self.inbound_signal.push(signal).await;
            }
            return;
        }

        let manager = self.arc();
        let initial_messages = details.initial_messages;
        let initial_signals = details.initial_signals;
        tokio::spawn(async move {
            let mut resumed = manager.inbound.subscribe();
            while let Ok(event) = resumed.recv().await {
                if matches!(event, QueueEvent::Resume) {
                    manager.enqueue_messages(initial_messages).await;
                    for signal in initial_signals {
                        manager.inbound_signal.push(signal).await;
                    }
                    break;
                }
            }
        });
    }

    async fn handle_disconnect(&self, was_nack: bool, _reason: String) {
        self.outbound.system_pause().await;
        self.outbound.clear().await;
        self.events.publish(ManagerEvent::Disconnect(was_nack));

        if self.client_type.reconnects_on_failure() {
            let manager = self.arc();
            let delay = self.config.reconnect.initial_reconnect_delay;
            tokio::spawn(async move {
                let _ = manager.connect_core("reconnect", delay).await;
            });
        } else {
            self.inbound.system_pause().await;
            self.inbound.clear().await;
            self.inbound_signal.system_pause().await;
            self.inbound_signal.clear().await;
        }
    }

    // ---- ordering / gap-fill ---------------------

    async fn enqueue_message(&self, message: SequencedMessage) {
        let action = {
            let mut state = self.state.lock().await;
            state.largest_sequence_number = state.largest_sequence_number.max(message.sequence_number);

            if message.sequence_number == state.last_queued_sequence_number + 1 {
                state.last_queued_sequence_number = message.sequence_number;
                EnqueueAction::Admit(message)
            } else if message.sequence_number <= state.last_queued_sequence_number {
                EnqueueAction::Duplicate(message.sequence_number)
            } else {
                let from = state.last_queued_sequence_number;
                let to = message.sequence_number;
                EnqueueAction::Gap(message, from, to)
            }
        };

        match action {
            EnqueueAction::Admit(message) => self.inbound.push(message).await,
            EnqueueAction::Duplicate(seq) => {
                tracing::debug!(seq, "dropping duplicate inbound message");
                self.telemetry.record(TelemetryEvent::DuplicateMessage { sequence_number: seq });
            }
            EnqueueAction::Gap(message, from, to) => {
                self.state.lock().await.pending.push(message);
                self.trigger_fetch_missing_deltas("GapDetected", from, Some(to)).await;
            }
        }
    }

    async fn enqueue_messages(&self, messages: Vec<SequencedMessage>) {
        for message in messages {
            self.enqueue_message(message).await;
        }
    }

    async fn trigger_fetch_missing_deltas(&self, reason: &'static str, from: u64, to: Option<u64>) {
        {
            let mut state = self.state.lock().await;
            if state.fetching {
                tracing::debug!(reason, "gap-fill fetch already in flight, ignoring");
                self.telemetry.record(TelemetryEvent::GapFillAlreadyInFlight { reason });
                return;
            }
            state.fetching = true;
        }

        let manager = self.arc();
        tokio::spawn(async move {
            match manager.get_deltas(reason, from, to).await {
                Ok(messages) => manager.catch_up(messages).await,
                Err(e) => {
                    tracing::error!(error = %e, "gap-fill fetch failed");
                    manager.events.publish(ManagerEvent::Error(e.to_string()));
                    manager.state.lock().await.fetching = false;
                }
            }
        });
    }

    async fn catch_up(&self, messages: Vec<SequencedMessage>) {
        self.enqueue_messages(messages).await;

        let sorted_pending = {
            let mut state = self.state.lock().await;
            let mut pending = std::mem::take(&mut state.pending);
            pending.sort_by_key(|m| m.sequence_number);
            pending
        };
        self.enqueue_messages(sorted_pending).await;

        self.state.lock().await.fetching = false;
    }

    // ---- inbound worker / content reassembly ----

    async fn process_inbound(&self, mut message: SequencedMessage) -> Result<()> {
        if self.state.lock().await.closed {
            return Err(Error::Closed);
        }

        if message.contents.is_none() {
            self.reassemble_content(&mut message).await?;
        }

        let base = self.state.lock().await.base_sequence_number;
        assert_eq!(
            message.sequence_number,
            base + 1,
            "order violation: expected sequence {}, got {} — the admission layer should have prevented this",
            base + 1,
            message.sequence_number,
        );

        if message.message_type.decodes_string_contents() {
            if let Some(Opaque::String(raw)) = &message.contents {
                if let Ok(decoded) = serde_json::from_str::<Opaque>(raw) {
                    message.contents = Some(decoded);
                }
            }
        }

        let handler = self.handler_arc().await;
        let prepared = handler.prepare(&message).await?;

        if !message.traces.is_empty() {
            message.traces.push(Trace::end(self.client_type.label()));
        }

        {
            let mut state = self.state.lock().await;
            state.min_sequence_number = message.minimum_sequence_number;
            state.base_sequence_number = message.sequence_number;
        }

        let started = std::time::Instant::now();
        handler.process(&message, prepared.clone()).await?;

        if message.message_type.requires_ack() {
            self.schedule_ack(&message.message_type).await?;
        }

        self.events
            .publish(ManagerEvent::ProcessTime(started.elapsed().as_millis() as u64));

        handler.post_process(&message, prepared).await
    }

    async fn process_signal(&self, signal: Signal) -> Result<()> {
        self.handler_arc().await.process_signal(&signal).await
    }

    async fn process_outbound(&self, mut envelope: DocumentMessage) -> Result<()> {
        let oversized = matches!(
            &envelope.contents,
            Some(Opaque::String(s)) if s.len() > self.config.sizing.max_content_size
        );

        if !oversized {
            return self.connection.submit(envelope).await;
        }

        self.connection.submit_async(envelope.clone()).await?;

        let contents = envelope.contents.clone().expect("checked oversized string contents above");
        self.content_cache
            .set(crate::core::types::ContentMessage {
                client_id: self.current_client_id().await,
                client_sequence_number: envelope.client_sequence_number,
                contents,
            })
            .await;

        envelope.contents = None;
        self.connection.submit(envelope).await
    }

    async fn current_client_id(&self) -> ClientId {
        self.connection_details
            .lock()
            .await
            .as_ref()
            .map(|d| d.client_id.clone())
            .unwrap_or_default()
    }

    async fn handler_arc(&self) -> Arc<dyn HandlerStrategy> {
        self.handler
            .lock()
            .await
            .clone()
            .expect("inbound processing requires attach_op_handler to have been called first")
    }

    async fn reassemble_content(&self, message: &mut SequencedMessage) -> Result<()> {
        if self.state.lock().await.closed {
            return Err(Error::Closed);
        }

        let client_id = message.client_id.clone();
        let wanted = message.client_sequence_number;
        let peeked = self.content_cache.peek(&client_id).await;

        match peeked {
            None => self.wait_for_content(message, &client_id, wanted).await,
            Some(cached) if cached.client_sequence_number > wanted => {
                let fetched = self.get_deltas("ContentReassembly", message.sequence_number, Some(message.sequence_number)).await?;
                let found = fetched
                    .into_iter()
                    .find(|m| m.client_id == client_id && m.client_sequence_number == wanted)
                    .expect("content fetch miss: server returned no message matching the envelope's (clientId, clientSequenceNumber)");
                message.contents = found.contents;
                Ok(())
            }
            Some(cached) if cached.client_sequence_number < wanted => {
                loop {
                    let popped = self
                        .content_cache
                        .get(&client_id)
                        .await
                        .expect("content cache drained without finding the envelope's matching entry");
                    if popped.client_sequence_number == wanted {
                        message.contents = Some(popped.contents);
                        return Ok(());
                    }
                }
            }
            Some(_) => {
                let popped = self
                    .content_cache
                    .get(&client_id)
                    .await
                    .expect("peek just confirmed an entry exists");
                message.contents = Some(popped.contents);
                Ok(())
            }
        }
    }

    async fn wait_for_content(&self, message: &mut SequencedMessage, client_id: &str, wanted: u64) -> Result<()> {
        let mut content_arrived = self.content_cache.subscribe();
        let fetch = self.get_deltas("ContentReassembly", message.sequence_number, Some(message.sequence_number));
        tokio::pin!(fetch);

        loop {
            tokio::select! {
                arrived = content_arrived.recv() => {
                    if matches!(arrived, Ok(ref cid) if cid == client_id) {
                        if let Some(peeked) = self.content_cache.peek(client_id).await {
                            if peeked.client_sequence_number == wanted {
                                let popped = self.content_cache.get(client_id).await.expect("peek just confirmed an entry exists");
                                message.contents = Some(popped.contents);
                                return Ok(());
                            }
                        }
                    }
                }
                fetched = &mut fetch => {
                    let fetched = fetched?;
                    let found = fetched
                        .into_iter()
                        .find(|m| m.client_id == client_id && m.client_sequence_number == wanted)
                        .expect("content fetch miss: server returned no message matching the envelope's (clientId, clientSequenceNumber)");
                    message.contents = found.contents;
                    return Ok(());
                }
            }
        }
    }

    // ---- ack throttle ------------------------------------

    async fn stop_sequence_number_update(&self) {
        let mut state = self.state.lock().await;
        state.ack_timer_set = false;
        state.ack_update_requested = false;
        state.ack_generation = state.ack_generation.wrapping_add(1);
    }

    async fn schedule_ack(&self, message_type: &MessageType) -> Result<()> {
        if self.state.lock().await.readonly {
            return Ok(());
        }

        if matches!(message_type, MessageType::Propose) {
            self.submit(MessageType::NoOp, Some(Opaque::String(IMMEDIATE_NO_OP_RESPONSE.to_string())))
                .await?;
            return Ok(());
        }

        let (should_arm, generation) = {
            let mut state = self.state.lock().await;
            if state.ack_timer_set {
                state.ack_update_requested = true;
                (false, state.ack_generation)
            } else {
                state.ack_timer_set = true;
                (true, state.ack_generation)
            }
        };

        if should_arm {
            let manager = self.arc();
            tokio::spawn(async move {
                Self::run_ack_timer(manager, generation).await;
            });
        }
        Ok(())
    }

    async fn run_ack_timer(manager: Arc<Self>, generation: u64) {
        loop {
            tokio::time::sleep(manager.config.ack.ack_timer).await;

            let rearm = {
                let mut state = manager.state.lock().await;
                if state.ack_generation != generation || state.closed {
                    return;
                }
                state.ack_timer_set = false;
                if state.ack_update_requested {
                    state.ack_update_requested = false;
                    state.ack_timer_set = true;
                    true
                } else {
                    false
                }
            };

            if !rearm {
                let _ = manager.submit(MessageType::NoOp, None).await;
                return;
            }
        }
    }
}
