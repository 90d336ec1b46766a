//! The driver: the single logical scheduler owning the transport, the send
//! queue, the node arena, and the ValueDB.
//!
//! Everything runs on one task. Applications talk to it through
//! [`DriverApi`] messages and the event stream; nothing outside this task
//! mutates driver state. Every suspension point is bounded by a timer.

use std::collections::{HashMap, HashSet, VecDeque};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{mpsc, oneshot};

use zwave_cc::cc::{
    AssociationCC, BasicCC, BinarySwitchCC, DatagramReassembler, ManufacturerSpecificCC,
    MultiChannelCC, MultilevelSwitchCC, ReassemblyOutcome, SecurityS0CC, SecurityS2CC,
    SupervisionCC, SupervisionStatus, TransportServiceCC, VersionCC, WakeUpCC, CC,
};
use zwave_cc::encapsulation::{
    decode_stack, encode_stack, CCAddress, DecodeSecurity, DecodedCC, EncapsulationKind,
    EncodeOptions, SecurityParams, SupervisionRequest,
};
use zwave_cc::security::{KeyStore, S0NonceStore, S2Engine, SecurityClass};
use zwave_cc::{CCError, CommandClasses, Duration as CCDuration};
use zwave_serial::message::payloads::{
    SendDataRequest, UpdateType, TRANSMIT_OPTIONS_DEFAULT,
};
use zwave_serial::{
    DataFrame, Frame, FrameAccumulator, FrameEvent, FunctionType, Message, MessageCodec,
    MessagePayload, MessageType,
};

use crate::cc_values;
use crate::config::DriverConfig;
use crate::error::{DriverError, TransactionFailure};
use crate::events::DriverEvent;
use crate::fsm::{MachineConfig, TimerKind, TransactionMachine, TxAction, TxEvent};
use crate::interview::{interview_retry_delay, InterviewStage, InterviewStep, NodeInterview};
use crate::node::Node;
use crate::queue::SendQueue;
use crate::storage::{CacheStore, CachedNode, CachedValue, NetworkCache};
use crate::transaction::{CompletionSender, MessageMatcher, Priority, Transaction};
use crate::transport::{SerialTransport, TransportEvent};
use crate::value_db::{Value, ValueDB, ValueId};

/// Commands applications send to the driver task.
enum DriverCommand {
    SendMessage {
        message: Message,
        priority: Priority,
        done: CompletionSender,
    },
    SendCC {
        node_id: u8,
        endpoint: u8,
        cc: CC,
        supervised: bool,
        done: CompletionSender,
    },
    Subscribe {
        reply: oneshot::Sender<mpsc::Receiver<DriverEvent>>,
    },
    NodeIds {
        reply: oneshot::Sender<Vec<u8>>,
    },
    NodeSummary {
        node_id: u8,
        reply: oneshot::Sender<Option<NodeSummary>>,
    },
    GetValue {
        id: ValueId,
        reply: oneshot::Sender<Option<Value>>,
    },
    SetNetworkKey {
        class: SecurityClass,
        key: [u8; 16],
    },
    SetNodeSecurityClass {
        node_id: u8,
        class: SecurityClass,
    },
    ReInterview {
        node_id: u8,
    },
    Shutdown,
}

/// A read-only snapshot of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSummary {
    pub node_id: u8,
    pub interview_stage: InterviewStage,
    pub listening: Option<bool>,
    pub awake: bool,
    pub dead: bool,
    pub supported_ccs: Vec<u8>,
    pub security_class: Option<SecurityClass>,
}

/// Cloneable handle for talking to a running driver.
#[derive(Debug, Clone)]
pub struct DriverApi {
    cmd_tx: mpsc::Sender<DriverCommand>,
}

impl DriverApi {
    async fn send(&self, cmd: DriverCommand) -> Result<(), DriverError> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| DriverError::ShuttingDown)
    }

    /// Enqueue a raw host->controller message and await its completion.
    pub async fn send_message(
        &self,
        message: Message,
        priority: Priority,
    ) -> Result<Option<Message>, DriverError> {
        let (done, rx) = oneshot::channel();
        self.send(DriverCommand::SendMessage {
            message,
            priority,
            done,
        })
        .await?;
        let result = rx.await.map_err(|_| DriverError::ShuttingDown)?;
        Ok(result?)
    }

    /// Send a CC to a node (endpoint 0 = root) and await completion.
    pub async fn send_cc(
        &self,
        node_id: u8,
        endpoint: u8,
        cc: CC,
        supervised: bool,
    ) -> Result<Option<Message>, DriverError> {
        let (done, rx) = oneshot::channel();
        self.send(DriverCommand::SendCC {
            node_id,
            endpoint,
            cc,
            supervised,
            done,
        })
        .await?;
        let result = rx.await.map_err(|_| DriverError::ShuttingDown)?;
        Ok(result?)
    }

    /// Subscribe to the driver event stream.
    pub async fn subscribe(&self) -> Result<mpsc::Receiver<DriverEvent>, DriverError> {
        let (reply, rx) = oneshot::channel();
        self.send(DriverCommand::Subscribe { reply }).await?;
        rx.await.map_err(|_| DriverError::ShuttingDown)
    }

    pub async fn node_ids(&self) -> Result<Vec<u8>, DriverError> {
        let (reply, rx) = oneshot::channel();
        self.send(DriverCommand::NodeIds { reply }).await?;
        rx.await.map_err(|_| DriverError::ShuttingDown)
    }

    pub async fn node_summary(&self, node_id: u8) -> Result<Option<NodeSummary>, DriverError> {
        let (reply, rx) = oneshot::channel();
        self.send(DriverCommand::NodeSummary { node_id, reply })
            .await?;
        rx.await.map_err(|_| DriverError::ShuttingDown)
    }

    pub async fn get_value(&self, id: ValueId) -> Result<Option<Value>, DriverError> {
        let (reply, rx) = oneshot::channel();
        self.send(DriverCommand::GetValue { id, reply }).await?;
        rx.await.map_err(|_| DriverError::ShuttingDown)
    }

    /// Load a network key for a security class.
    pub async fn set_network_key(
        &self,
        class: SecurityClass,
        key: [u8; 16],
    ) -> Result<(), DriverError> {
        self.send(DriverCommand::SetNetworkKey { class, key }).await
    }

    /// Record the security class a node was granted at inclusion.
    pub async fn set_node_security_class(
        &self,
        node_id: u8,
        class: SecurityClass,
    ) -> Result<(), DriverError> {
        self.send(DriverCommand::SetNodeSecurityClass { node_id, class })
            .await
    }

    /// Deliberately restart a node's interview from scratch.
    pub async fn re_interview(&self, node_id: u8) -> Result<(), DriverError> {
        self.send(DriverCommand::ReInterview { node_id }).await
    }

    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(DriverCommand::Shutdown).await;
    }
}

/// Controller identification progress during startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdentifyStep {
    Version,
    HomeId,
    InitData,
}

/// Context attached to an in-flight CC send.
#[derive(Debug, Clone)]
struct CCSendMeta {
    node_id: u8,
    endpoint: u8,
    cc: CC,
    /// Supervision session id, if the send was wrapped.
    supervised: Option<u8>,
}

/// Why a transaction exists; consulted when it finishes.
#[derive(Debug, Clone)]
enum TxPurpose {
    /// Application message; completion resolves the caller directly.
    Message,
    Identify(IdentifyStep),
    Interview {
        node_id: u8,
        /// `(cc, command, endpoint)` of the report that finishes the
        /// exchange, if the probe was a CC query.
        expected_report: Option<(u8, u8, u8)>,
    },
    CCSend(CCSendMeta),
    WakeUpDrain {
        node_id: u8,
    },
    /// Fire-and-forget plumbing (nonce reports, segment requests).
    Internal,
}

#[derive(Debug)]
struct InFlight {
    transaction: Transaction,
    machine: TransactionMachine,
    frame: Vec<u8>,
    purpose: TxPurpose,
}

#[derive(Debug, Default)]
struct InterviewRuntime {
    planner: NodeInterview,
    /// A probe is outstanding (queued, in flight, or awaiting its report).
    busy: bool,
}

/// An interview CC exchange waiting for its report.
#[derive(Debug)]
struct PendingReport {
    expected: (u8, u8, u8),
    deadline: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SecureScheme {
    S0,
    S2,
}

/// A CC send waiting for its nonce exchange.
struct PendingSecureSend {
    scheme: SecureScheme,
    endpoint: u8,
    cc: CC,
    supervised: Option<u8>,
    priority: Priority,
    purpose: TxPurpose,
    done: Option<CompletionSender>,
    deadline: Instant,
}

/// A supervised send waiting for its Supervision Report.
struct PendingSupervision {
    meta: CCSendMeta,
    done: Option<CompletionSender>,
    deadline: Instant,
}

/// A scheduled verification poll after an optimistic update.
#[derive(Debug, Clone, PartialEq, Eq)]
struct VerificationPoll {
    due: Instant,
    node_id: u8,
    endpoint: u8,
    cc: u8,
}

/// The Z-Wave driver core.
pub struct Driver<T: SerialTransport> {
    config: DriverConfig,
    transport: T,
    codec: MessageCodec,
    accumulator: FrameAccumulator,

    queue: SendQueue,
    current: Option<InFlight>,
    purposes: HashMap<u64, TxPurpose>,
    next_tx_id: u64,
    next_callback_id: u8,
    next_supervision_session: u8,
    next_ts_session: u8,

    nodes: BTreeMap<u8, Node>,
    value_db: ValueDB,
    interviews: HashMap<u8, InterviewRuntime>,
    pending_reports: HashMap<u8, PendingReport>,

    key_store: KeyStore,
    s0_store: S0NonceStore,
    s2: Option<S2Engine>,
    pending_secure: HashMap<u8, VecDeque<PendingSecureSend>>,
    pending_supervision: HashMap<(u8, u8), PendingSupervision>,
    reassemblers: HashMap<u8, DatagramReassembler>,
    verification_polls: Vec<VerificationPoll>,
    draining: HashSet<u8>,

    cache_store: Option<CacheStore>,
    cache: NetworkCache,
    home_id: u32,
    own_node_id: u8,

    cmd_tx: mpsc::Sender<DriverCommand>,
    cmd_rx: Option<mpsc::Receiver<DriverCommand>>,
    event_subscribers: Vec<mpsc::Sender<DriverEvent>>,

    // Transaction timers; only meaningful while `current` is set.
    ack_deadline: Option<Instant>,
    response_deadline: Option<Instant>,
    callback_deadline: Option<Instant>,
    backoff_deadline: Option<Instant>,
    frame_deadline: Option<Instant>,

    rng: StdRng,
}

impl<T: SerialTransport> Driver<T> {
    pub fn new(transport: T, config: DriverConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let cache_store = if config.storage.enabled {
            let result = match &config.storage.cache_dir {
                Some(dir) => CacheStore::new(dir.into()),
                None => CacheStore::default_path(),
            };
            match result {
                Ok(store) => Some(store),
                Err(e) => {
                    tracing::warn!("failed to initialize cache store: {e}");
                    None
                }
            }
        } else {
            None
        };

        Self {
            config,
            transport,
            codec: MessageCodec::with_defaults(),
            accumulator: FrameAccumulator::new(),
            queue: SendQueue::new(),
            current: None,
            purposes: HashMap::new(),
            next_tx_id: 1,
            next_callback_id: 0,
            next_supervision_session: 0,
            next_ts_session: 0,
            nodes: BTreeMap::new(),
            value_db: ValueDB::new(),
            interviews: HashMap::new(),
            pending_reports: HashMap::new(),
            key_store: KeyStore::new(),
            s0_store: S0NonceStore::new(),
            s2: None,
            pending_secure: HashMap::new(),
            pending_supervision: HashMap::new(),
            reassemblers: HashMap::new(),
            verification_polls: Vec::new(),
            draining: HashSet::new(),
            cache_store,
            cache: NetworkCache::default(),
            home_id: 0,
            own_node_id: 0,
            cmd_tx,
            cmd_rx: Some(cmd_rx),
            event_subscribers: Vec::new(),
            ack_deadline: None,
            response_deadline: None,
            callback_deadline: None,
            backoff_deadline: None,
            frame_deadline: None,
            rng: StdRng::from_entropy(),
        }
    }

    /// A handle for applications. May be cloned freely.
    pub fn api(&self) -> DriverApi {
        DriverApi {
            cmd_tx: self.cmd_tx.clone(),
        }
    }

    /// Run the driver until shutdown or a fatal error.
    pub async fn run(mut self) -> Result<(), DriverError> {
        let mut transport_rx = self.transport.open()?;
        let mut cmd_rx = self.cmd_rx.take().expect("run called once");

        tracing::info!("driver starting; identifying controller");
        self.begin_identify().await?;

        loop {
            let deadline = tokio::time::Instant::from_std(self.next_deadline());
            tokio::select! {
                event = transport_rx.recv() => match event {
                    Some(TransportEvent::Data(bytes)) => self.on_bytes(&bytes).await?,
                    Some(TransportEvent::Error(e)) => {
                        tracing::warn!("transport error: {e}");
                    }
                    Some(TransportEvent::Closed) | None => {
                        return self.fatal_transport_closed().await;
                    }
                },
                cmd = cmd_rx.recv() => match cmd {
                    Some(DriverCommand::Shutdown) | None => {
                        self.shutdown().await?;
                        return Ok(());
                    }
                    Some(cmd) => self.on_command(cmd).await?,
                },
                _ = tokio::time::sleep_until(deadline) => {
                    self.on_tick().await?;
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Startup, shutdown, fatal paths
    // ------------------------------------------------------------------

    async fn begin_identify(&mut self) -> Result<(), DriverError> {
        let message = Message::request(
            FunctionType::GetControllerVersion,
            MessagePayload::GetControllerVersionRequest,
        );
        self.enqueue_message(
            message,
            Priority::Controller,
            TxPurpose::Identify(IdentifyStep::Version),
            None,
        );
        self.pump_queue().await
    }

    async fn shutdown(&mut self) -> Result<(), DriverError> {
        tracing::info!("driver shutting down");
        if let Some(mut inflight) = self.current.take() {
            inflight
                .transaction
                .complete(Err(TransactionFailure::Cancelled));
        }
        self.clear_tx_timers();
        for mut tx in self.queue.drain_all() {
            tx.complete(Err(TransactionFailure::Cancelled));
        }
        self.accumulator.on_timeout();
        self.persist_all().await;
        self.transport.close().await;
        Ok(())
    }

    async fn fatal_transport_closed(&mut self) -> Result<(), DriverError> {
        tracing::error!("transport closed; stopping driver");
        if let Some(mut inflight) = self.current.take() {
            inflight
                .transaction
                .complete(Err(TransactionFailure::Cancelled));
        }
        for mut tx in self.queue.drain_all() {
            tx.complete(Err(TransactionFailure::Cancelled));
        }
        self.emit(DriverEvent::Error("transport closed".into()));
        self.persist_all().await;
        Err(DriverError::TransportClosed)
    }

    // ------------------------------------------------------------------
    // Inbound bytes and frames
    // ------------------------------------------------------------------

    async fn on_bytes(&mut self, bytes: &[u8]) -> Result<(), DriverError> {
        tracing::trace!(len = bytes.len(), "rx bytes");
        let events = self.accumulator.push(bytes);
        for event in events {
            self.on_frame_event(event).await?;
        }
        self.frame_deadline = self
            .accumulator
            .has_partial_frame()
            .then(|| Instant::now() + self.config.timeouts.frame_timeout());
        Ok(())
    }

    async fn on_frame_event(&mut self, event: FrameEvent) -> Result<(), DriverError> {
        match event {
            FrameEvent::Ack => self.on_tx_frame(TxEvent::Ack).await,
            FrameEvent::Nak => {
                tracing::warn!("received NAK");
                self.on_tx_frame(TxEvent::Nak).await
            }
            FrameEvent::Can => {
                tracing::warn!("received CAN");
                self.on_tx_frame(TxEvent::Can).await
            }
            FrameEvent::Data(frame) => self.on_data_frame(frame).await,
            FrameEvent::Discarded(byte) => {
                tracing::debug!(byte = format_args!("0x{byte:02x}"), "discarded stray byte");
                Ok(())
            }
            FrameEvent::ChecksumMismatch | FrameEvent::InvalidFrame => {
                tracing::warn!("corrupt data frame; answering NAK");
                self.write_control(Frame::Nak).await
            }
        }
    }

    async fn on_data_frame(&mut self, frame: DataFrame) -> Result<(), DriverError> {
        match self.codec.parse(&frame) {
            Ok(message) => {
                // The frame is only ACKed once the message layer accepted it.
                self.write_control(Frame::Ack).await?;
                tracing::debug!(function = ?message.function, msg_type = ?message.msg_type, "rx message");
                self.route_message(message).await
            }
            Err(e) => {
                tracing::warn!(function = format_args!("0x{:02x}", frame.function), "dropping message: {e}");
                self.write_control(Frame::Nak).await
            }
        }
    }

    async fn route_message(&mut self, message: Message) -> Result<(), DriverError> {
        let wanted = self
            .current
            .as_ref()
            .is_some_and(|inflight| inflight.machine.wants(&message));
        if wanted {
            let actions = self
                .current
                .as_mut()
                .expect("checked above")
                .machine
                .handle(TxEvent::Message(&message));
            self.process_tx_actions(actions).await
        } else {
            self.on_unsolicited(message).await
        }
    }

    async fn on_tx_frame(&mut self, event: TxEvent<'_>) -> Result<(), DriverError> {
        let Some(inflight) = self.current.as_mut() else {
            return Ok(());
        };
        let actions = inflight.machine.handle(event);
        self.process_tx_actions(actions).await
    }

    // ------------------------------------------------------------------
    // Transaction engine
    // ------------------------------------------------------------------

    fn enqueue_message(
        &mut self,
        message: Message,
        priority: Priority,
        purpose: TxPurpose,
        done: Option<CompletionSender>,
    ) -> u64 {
        let expected_response = default_response_matcher(&message);
        let (mut transaction, rx) = Transaction::new(message, priority);
        match done {
            Some(done) => {
                // Forward the transaction outcome to the caller.
                tokio::spawn(async move {
                    if let Ok(result) = rx.await {
                        let _ = done.send(result);
                    }
                });
            }
            None => drop(rx),
        }
        if let Some(matcher) = expected_response {
            transaction = transaction.with_expected_response(matcher);
        }
        transaction = transaction.with_max_attempts(self.config.attempts.controller);
        self.enqueue_transaction(transaction, purpose)
    }

    fn enqueue_transaction(&mut self, mut transaction: Transaction, purpose: TxPurpose) -> u64 {
        let id = self.next_tx_id;
        self.next_tx_id += 1;
        transaction.id = id;

        let park = transaction
            .target_node
            .and_then(|n| self.nodes.get(&n))
            .is_some_and(Node::should_park_sends);

        self.purposes.insert(id, purpose);
        self.queue.push(transaction, park);
        id
    }

    async fn pump_queue(&mut self) -> Result<(), DriverError> {
        while self.current.is_none() {
            let Some(transaction) = self.queue.pop_ready() else {
                return Ok(());
            };
            let purpose = self
                .purposes
                .remove(&transaction.id)
                .unwrap_or(TxPurpose::Internal);

            let frame = transaction.message.to_frame();
            let bytes = match frame.serialize() {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::error!("cannot serialize frame: {e}");
                    let mut transaction = transaction;
                    transaction.complete(Err(TransactionFailure::ControllerFailure));
                    continue;
                }
            };

            let machine = TransactionMachine::new(
                transaction.expected_response.clone(),
                transaction.expected_callback.clone(),
                self.machine_config(&transaction),
            );
            let mut inflight = InFlight {
                transaction,
                machine,
                frame: bytes,
                purpose,
            };
            let actions = inflight.machine.start();
            self.current = Some(inflight);
            self.process_tx_actions(actions).await?;
        }
        Ok(())
    }

    fn machine_config(&self, transaction: &Transaction) -> MachineConfig {
        let send_data = transaction.message.function == FunctionType::SendData;
        let target_listening = transaction
            .target_node
            .and_then(|n| self.nodes.get(&n))
            .map_or(true, Node::is_listening);
        MachineConfig {
            ack_timeout: self.config.timeouts.ack_timeout(),
            response_timeout: self.config.timeouts.response_timeout(),
            callback_timeout: transaction
                .callback_timeout
                .unwrap_or_else(|| self.config.timeouts.send_data_callback_timeout()),
            max_attempts: transaction.max_attempts,
            send_data,
            target_listening,
        }
    }

    async fn process_tx_actions(&mut self, actions: Vec<TxAction>) -> Result<(), DriverError> {
        for action in actions {
            match action {
                TxAction::Transmit => {
                    let Some(inflight) = self.current.as_ref() else {
                        continue;
                    };
                    let bytes = inflight.frame.clone();
                    tracing::trace!(len = bytes.len(), "tx frame");
                    self.transport.write(bytes).await?;
                }
                TxAction::StartTimer(kind, duration) => {
                    self.set_tx_timer(kind, duration);
                }
                TxAction::RetryAfter(base) => {
                    self.clear_tx_timers();
                    let jitter = Duration::from_millis(self.rng.gen_range(0..100));
                    self.backoff_deadline = Some(Instant::now() + base + jitter);
                    let attempt = self
                        .current
                        .as_ref()
                        .map(|i| i.machine.attempts_used())
                        .unwrap_or(0);
                    tracing::debug!(attempt, backoff_ms = (base + jitter).as_millis() as u64, "retrying transaction");
                }
                TxAction::Park => {
                    self.clear_tx_timers();
                    if let Some(inflight) = self.current.take() {
                        let node_id = inflight.transaction.target_node.unwrap_or(0);
                        tracing::debug!(node_id, "parking transaction until wake-up");
                        self.purposes
                            .insert(inflight.transaction.id, inflight.purpose);
                        self.queue.park_front(node_id, inflight.transaction);
                        if let Some(node) = self.nodes.get_mut(&node_id) {
                            node.awake = false;
                        }
                    }
                    self.pump_queue_boxed().await?;
                }
                TxAction::Complete(last) => {
                    self.clear_tx_timers();
                    if let Some(inflight) = self.current.take() {
                        self.finalize_success(inflight, last.clone()).await?;
                    }
                    self.pump_queue_boxed().await?;
                }
                TxAction::Fail(kind) => {
                    self.clear_tx_timers();
                    if let Some(inflight) = self.current.take() {
                        self.finalize_failure(inflight, kind).await?;
                    }
                    self.pump_queue_boxed().await?;
                }
            }
        }
        Ok(())
    }

    /// `pump_queue` recursion trampoline (pump -> start -> actions -> pump).
    fn pump_queue_boxed(
        &mut self,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), DriverError>> + Send + '_>>
    {
        Box::pin(self.pump_queue())
    }

    async fn finalize_success(
        &mut self,
        mut inflight: InFlight,
        last: Option<Message>,
    ) -> Result<(), DriverError> {
        let purpose = inflight.purpose.clone();
        match purpose {
            TxPurpose::Message | TxPurpose::Internal => {
                inflight.transaction.complete(Ok(last));
            }
            TxPurpose::Identify(step) => {
                inflight.transaction.complete(Ok(last.clone()));
                self.on_identify_response(step, last).await?;
            }
            TxPurpose::Interview {
                node_id,
                expected_report,
            } => {
                inflight.transaction.complete(Ok(last.clone()));
                self.on_interview_tx_success(node_id, expected_report, last)
                    .await?;
            }
            TxPurpose::CCSend(meta) => {
                if meta.supervised.is_none() {
                    inflight.transaction.complete(Ok(last));
                    self.after_unsupervised_send(&meta);
                } else {
                    // Resolution comes from the Supervision Report.
                    inflight.transaction.complete(Ok(None));
                }
                self.maybe_drain_wakeup(meta.node_id).await?;
            }
            TxPurpose::WakeUpDrain { node_id } => {
                inflight.transaction.complete(Ok(last));
                self.draining.remove(&node_id);
                if let Some(node) = self.nodes.get_mut(&node_id) {
                    node.awake = false;
                    tracing::debug!(node_id, "node sent back to sleep");
                }
            }
        }
        Ok(())
    }

    async fn finalize_failure(
        &mut self,
        mut inflight: InFlight,
        kind: TransactionFailure,
    ) -> Result<(), DriverError> {
        tracing::warn!(failure = %kind, "transaction failed");
        let purpose = inflight.purpose.clone();
        inflight.transaction.complete(Err(kind));
        match purpose {
            TxPurpose::Message | TxPurpose::Internal => {}
            TxPurpose::Identify(_) => {
                self.emit(DriverEvent::Error(format!(
                    "controller identification failed: {kind}"
                )));
            }
            TxPurpose::Interview { node_id, .. } => {
                self.on_interview_failure(node_id).await?;
            }
            TxPurpose::CCSend(meta) => {
                if let Some(session) = meta.supervised {
                    if let Some(mut pending) =
                        self.pending_supervision.remove(&(meta.node_id, session))
                    {
                        if let Some(done) = pending.done.take() {
                            let _ = done.send(Err(kind));
                        }
                    }
                }
            }
            TxPurpose::WakeUpDrain { node_id } => {
                self.draining.remove(&node_id);
                if let Some(node) = self.nodes.get_mut(&node_id) {
                    node.awake = false;
                }
            }
        }
        Ok(())
    }

    /// Optimistic value update plus verification poll for a plain Set.
    fn after_unsupervised_send(&mut self, meta: &CCSendMeta) {
        let is_set = matches!(
            meta.cc,
            CC::Basic(BasicCC::Set { .. })
                | CC::BinarySwitch(BinarySwitchCC::Set { .. })
                | CC::MultilevelSwitch(MultilevelSwitchCC::Set { .. })
        );
        if !is_set {
            return;
        }
        if !self.config.disable_optimistic_value_update {
            let events =
                cc_values::apply_confirmed_set(&mut self.value_db, meta.node_id, meta.endpoint, &meta.cc);
            for event in events {
                self.emit(DriverEvent::Value(event));
            }
        }
        let duration = match &meta.cc {
            CC::BinarySwitch(BinarySwitchCC::Set { duration, .. })
            | CC::MultilevelSwitch(MultilevelSwitchCC::Set { duration, .. }) => {
                duration.and_then(CCDuration::as_secs).unwrap_or(0)
            }
            _ => 0,
        };
        self.verification_polls.push(VerificationPoll {
            due: Instant::now() + Duration::from_secs(duration as u64 + 1),
            node_id: meta.node_id,
            endpoint: meta.endpoint,
            cc: meta.cc.cc_id().as_u8(),
        });
    }

    // ------------------------------------------------------------------
    // Controller identification
    // ------------------------------------------------------------------

    async fn on_identify_response(
        &mut self,
        step: IdentifyStep,
        last: Option<Message>,
    ) -> Result<(), DriverError> {
        match (step, last.map(|m| m.payload)) {
            (IdentifyStep::Version, Some(MessagePayload::GetControllerVersionResponse(v))) => {
                tracing::info!(version = %v.version, library = v.library_type, "controller firmware");
                let message = Message::request(
                    FunctionType::GetControllerId,
                    MessagePayload::GetControllerIdRequest,
                );
                self.enqueue_message(
                    message,
                    Priority::Controller,
                    TxPurpose::Identify(IdentifyStep::HomeId),
                    None,
                );
            }
            (
                IdentifyStep::HomeId,
                Some(MessagePayload::GetControllerIdResponse {
                    home_id,
                    own_node_id,
                }),
            ) => {
                tracing::info!(home_id = format_args!("0x{home_id:08x}"), own_node_id, "controller identity");
                self.home_id = home_id;
                self.own_node_id = own_node_id;
                self.load_cache().await;
                let message = Message::request(
                    FunctionType::GetSerialApiInitData,
                    MessagePayload::GetSerialApiInitDataRequest,
                );
                self.enqueue_message(
                    message,
                    Priority::Controller,
                    TxPurpose::Identify(IdentifyStep::InitData),
                    None,
                );
            }
            (IdentifyStep::InitData, Some(MessagePayload::GetSerialApiInitDataResponse(data))) => {
                for node_id in data.node_ids {
                    if node_id == self.own_node_id {
                        continue;
                    }
                    self.add_node(node_id);
                }
                self.emit(DriverEvent::Ready {
                    home_id: self.home_id,
                    own_node_id: self.own_node_id,
                });
                tracing::info!(nodes = self.nodes.len(), "driver ready");
                let node_ids: Vec<u8> = self.nodes.keys().copied().collect();
                for node_id in node_ids {
                    self.pump_interview(node_id).await?;
                }
            }
            (step, payload) => {
                tracing::warn!(?step, ?payload, "unexpected identify response");
            }
        }
        self.pump_queue_boxed().await
    }

    async fn load_cache(&mut self) {
        self.cache = NetworkCache {
            home_id: self.home_id,
            own_node_id: self.own_node_id,
            nodes: BTreeMap::new(),
        };
        if let Some(store) = &self.cache_store {
            match store.load(self.home_id).await {
                Ok(Some(cache)) => {
                    tracing::info!(nodes = cache.nodes.len(), "network cache loaded");
                    self.cache = cache;
                    self.cache.own_node_id = self.own_node_id;
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("failed to load network cache: {e}"),
            }
        }
    }

    /// Apply a received NIF and, unless configured otherwise, drop cached
    /// values whose CC the node no longer advertises.
    fn apply_node_nif(&mut self, node_id: u8, nif: &zwave_serial::message::NodeInformationFrame) {
        let supported = {
            let Some(node) = self.nodes.get_mut(&node_id) else {
                return;
            };
            node.apply_nif(nif);
            node.supported_ccs.clone()
        };
        if self.config.preserve_unknown_values {
            return;
        }
        let stale: Vec<ValueId> = self
            .value_db
            .values_for_node(node_id)
            .into_iter()
            .filter(|(id, _)| id.endpoint == 0 && !supported.contains(&id.cc))
            .map(|(id, _)| id.clone())
            .collect();
        for id in stale {
            if let Some(event) = self.value_db.remove(&id) {
                self.emit(DriverEvent::Value(event));
            }
        }
    }

    /// Forget a node the controller excluded from the network.
    async fn remove_node(&mut self, node_id: u8) {
        if self.nodes.remove(&node_id).is_none() {
            return;
        }
        tracing::info!(node_id, "node removed");
        self.interviews.remove(&node_id);
        self.pending_reports.remove(&node_id);
        self.fail_pending_secure(node_id, TransactionFailure::Cancelled);
        self.reassemblers.remove(&node_id);
        self.draining.remove(&node_id);
        self.verification_polls.retain(|p| p.node_id != node_id);
        for event in self.value_db.remove_node(node_id) {
            self.emit(DriverEvent::Value(event));
        }
        self.cache.nodes.remove(&node_id);
        self.flush_cache().await;
        self.emit(DriverEvent::NodeRemoved { node_id });
    }

    fn add_node(&mut self, node_id: u8) {
        let node = match self.cache.nodes.get(&node_id) {
            Some(cached) => {
                let node = cached.restore(node_id);
                for value in &cached.values {
                    let _ = self.value_db.set(value.id.clone(), value.value.clone());
                }
                node
            }
            None => Node::new(node_id),
        };
        tracing::info!(node_id, stage = ?node.interview_stage, "node added");
        self.nodes.insert(node_id, node);
        self.interviews.insert(node_id, InterviewRuntime::default());
        self.emit(DriverEvent::NodeAdded { node_id });
    }

    // ------------------------------------------------------------------
    // Interview driving
    // ------------------------------------------------------------------

    async fn pump_interview(&mut self, node_id: u8) -> Result<(), DriverError> {
        loop {
            let step = {
                let Some(node) = self.nodes.get(&node_id) else {
                    return Ok(());
                };
                if node.dead || node.interview_retry_at.is_some() {
                    return Ok(());
                }
                let runtime = self.interviews.entry(node_id).or_default();
                if runtime.busy {
                    return Ok(());
                }
                runtime.planner.next_step(node)
            };

            match step {
                InterviewStep::GetProtocolInfo => {
                    let message = Message::request(
                        FunctionType::GetNodeProtocolInfo,
                        MessagePayload::GetNodeProtocolInfoRequest { node_id },
                    );
                    self.mark_interview_busy(node_id, true);
                    self.enqueue_message(
                        message,
                        Priority::NodeQuery,
                        TxPurpose::Interview {
                            node_id,
                            expected_report: None,
                        },
                        None,
                    );
                    return self.pump_queue_boxed().await;
                }
                InterviewStep::RequestNodeInfo => {
                    let message = Message::request(
                        FunctionType::RequestNodeInfo,
                        MessagePayload::RequestNodeInfoRequest { node_id },
                    );
                    let (mut transaction, rx) = Transaction::new(message, Priority::NodeQuery);
                    drop(rx);
                    transaction = transaction
                        .with_target_node(node_id)
                        .with_expected_response(MessageMatcher::ResponseFor(
                            FunctionType::RequestNodeInfo,
                        ))
                        .with_expected_callback(MessageMatcher::NodeUpdateFrom { node_id })
                        .with_callback_timeout(self.config.timeouts.exchange_timeout())
                        .with_max_attempts(self.config.attempts.controller);
                    self.mark_interview_busy(node_id, true);
                    self.enqueue_transaction(
                        transaction,
                        TxPurpose::Interview {
                            node_id,
                            expected_report: None,
                        },
                    );
                    return self.pump_queue_boxed().await;
                }
                InterviewStep::Query { cc, endpoint } => {
                    let expected = cc
                        .expected_response()
                        .map(|(cc_id, command)| (cc_id, command, endpoint));
                    self.mark_interview_busy(node_id, true);
                    self.start_cc_send(
                        node_id,
                        endpoint,
                        cc,
                        false,
                        Priority::NodeQuery,
                        TxPurpose::Interview {
                            node_id,
                            expected_report: expected,
                        },
                        None,
                    )
                    .await?;
                    return Ok(());
                }
                InterviewStep::RestoreCache => {
                    self.restore_cached_values(node_id);
                    self.advance_interview_stage(node_id).await?;
                }
                InterviewStep::AdvanceStage => {
                    self.advance_interview_stage(node_id).await?;
                }
                InterviewStep::Finished => {
                    return Ok(());
                }
            }
        }
    }

    fn mark_interview_busy(&mut self, node_id: u8, busy: bool) {
        self.interviews.entry(node_id).or_default().busy = busy;
    }

    async fn advance_interview_stage(&mut self, node_id: u8) -> Result<(), DriverError> {
        let next = {
            let Some(node) = self.nodes.get_mut(&node_id) else {
                return Ok(());
            };
            let Some(next) = node.interview_stage.next() else {
                return Ok(());
            };
            node.advance_stage(next);
            next
        };
        tracing::info!(node_id, stage = ?next, "interview stage reached");
        self.emit(DriverEvent::InterviewStageChanged {
            node_id,
            stage: next,
        });
        if next.is_persisted() || next == InterviewStage::Complete {
            self.persist_node(node_id).await;
        }
        Ok(())
    }

    fn restore_cached_values(&mut self, node_id: u8) {
        let Some(cached) = self.cache.nodes.get(&node_id) else {
            return;
        };
        let mut events = Vec::new();
        for value in &cached.values {
            if let Some(event) = self.value_db.set(value.id.clone(), value.value.clone()) {
                events.push(event);
            }
        }
        tracing::debug!(node_id, restored = cached.values.len(), "cached values restored");
        for event in events {
            self.emit(DriverEvent::Value(event));
        }
    }

    async fn on_interview_tx_success(
        &mut self,
        node_id: u8,
        expected_report: Option<(u8, u8, u8)>,
        last: Option<Message>,
    ) -> Result<(), DriverError> {
        match last.as_ref().map(|m| &m.payload) {
            Some(MessagePayload::GetNodeProtocolInfoResponse(info)) => {
                if let Some(node) = self.nodes.get_mut(&node_id) {
                    node.protocol_info = Some(*info);
                    // Fresh battery nodes are assumed awake until proven
                    // otherwise; they just talked to us during inclusion.
                }
                self.mark_interview_busy(node_id, false);
                return self.pump_interview_boxed(node_id).await;
            }
            Some(MessagePayload::ApplicationUpdate(update)) => {
                match update.update_type {
                    UpdateType::NodeInfoReceived => {
                        if let Some(nif) = &update.nif {
                            self.apply_node_nif(node_id, nif);
                        }
                        self.mark_interview_busy(node_id, false);
                        return self.pump_interview_boxed(node_id).await;
                    }
                    _ => {
                        return self.on_interview_failure(node_id).await;
                    }
                }
            }
            _ => {}
        }

        // A CC query was delivered; now wait for the node's report.
        if let Some(expected) = expected_report {
            self.pending_reports.insert(
                node_id,
                PendingReport {
                    expected,
                    deadline: Instant::now() + self.config.timeouts.exchange_timeout(),
                },
            );
        } else {
            self.mark_interview_busy(node_id, false);
            return self.pump_interview_boxed(node_id).await;
        }
        Ok(())
    }

    async fn on_interview_failure(&mut self, node_id: u8) -> Result<(), DriverError> {
        self.mark_interview_busy(node_id, false);
        self.pending_reports.remove(&node_id);
        let dead = {
            let Some(node) = self.nodes.get_mut(&node_id) else {
                return Ok(());
            };
            let dead = node.record_interview_failure();
            if !dead {
                let delay = interview_retry_delay(node.interview_attempts);
                node.interview_retry_at = Some(Instant::now() + delay);
                tracing::info!(
                    node_id,
                    attempt = node.interview_attempts,
                    retry_in_s = delay.as_secs(),
                    "interview attempt failed; backing off"
                );
            }
            dead
        };
        if dead {
            tracing::warn!(node_id, "node marked dead after repeated interview failures");
            self.emit(DriverEvent::NodeDead { node_id });
        }
        self.persist_node(node_id).await;
        Ok(())
    }

    fn pump_interview_boxed(
        &mut self,
        node_id: u8,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), DriverError>> + Send + '_>>
    {
        Box::pin(self.pump_interview(node_id))
    }

    // ------------------------------------------------------------------
    // CC sending (encapsulation + security orchestration)
    // ------------------------------------------------------------------

    // Wraps over 1..=255; 0 means "no callback".
    fn alloc_callback_id(&mut self) -> u8 {
        self.next_callback_id = match self.next_callback_id {
            255 => 1,
            n => n + 1,
        };
        self.next_callback_id
    }

    fn alloc_supervision_session(&mut self) -> u8 {
        self.next_supervision_session = (self.next_supervision_session + 1) & 0x3F;
        self.next_supervision_session
    }

    fn cc_address(&self, node_id: u8) -> CCAddress {
        CCAddress {
            home_id: self.home_id,
            source_node: self.own_node_id,
            dest_node: node_id,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn start_cc_send(
        &mut self,
        node_id: u8,
        endpoint: u8,
        cc: CC,
        supervised: bool,
        priority: Priority,
        purpose: TxPurpose,
        done: Option<CompletionSender>,
    ) -> Result<(), DriverError> {
        let supervised_session = if supervised {
            Some(self.alloc_supervision_session())
        } else {
            None
        };

        let scheme = match self.nodes.get(&node_id).and_then(|n| n.security_class) {
            Some(SecurityClass::S0) => Some(SecureScheme::S0),
            Some(_) => Some(SecureScheme::S2),
            None => None,
        };

        match scheme {
            None => {
                self.encode_and_send(
                    node_id,
                    endpoint,
                    cc,
                    supervised_session,
                    priority,
                    purpose,
                    done,
                    SecureScheme::S0, // unused for the plain path
                    None,
                )
                .await
            }
            Some(SecureScheme::S2) if self.s2.as_ref().is_some_and(|s2| s2.has_span(node_id)) => {
                self.encode_and_send(
                    node_id,
                    endpoint,
                    cc,
                    supervised_session,
                    priority,
                    purpose,
                    done,
                    SecureScheme::S2,
                    Some(SecureContext::Synced),
                )
                .await
            }
            Some(scheme) => {
                // The nonce exchange has to complete first.
                self.pending_secure.entry(node_id).or_default().push_back(
                    PendingSecureSend {
                        scheme,
                        endpoint,
                        cc,
                        supervised: supervised_session,
                        priority,
                        purpose,
                        done,
                        deadline: Instant::now() + self.config.timeouts.nonce_timeout(),
                    },
                );
                self.send_nonce_get(node_id, scheme).await
            }
        }
    }

    async fn send_nonce_get(&mut self, node_id: u8, scheme: SecureScheme) -> Result<(), DriverError> {
        let cc = match scheme {
            SecureScheme::S0 => CC::SecurityS0(SecurityS0CC::NonceGet),
            SecureScheme::S2 => {
                let seq = self.s2.as_mut().map(S2Engine::next_seq).unwrap_or(0);
                CC::SecurityS2(SecurityS2CC::NonceGet { seq })
            }
        };
        let frame = cc.serialize();
        self.send_data_frames(
            node_id,
            vec![frame],
            Priority::NodeQuery,
            TxPurpose::Internal,
            None,
        )
        .await
    }

    /// Apply the encapsulation order and enqueue the resulting frame(s).
    #[allow(clippy::too_many_arguments)]
    async fn encode_and_send(
        &mut self,
        node_id: u8,
        endpoint: u8,
        cc: CC,
        supervised: Option<u8>,
        priority: Priority,
        purpose: TxPurpose,
        mut done: Option<CompletionSender>,
        scheme: SecureScheme,
        secure: Option<SecureContext>,
    ) -> Result<(), DriverError> {
        let opts = EncodeOptions {
            endpoint,
            crc16: false,
            supervision: supervised.map(|session_id| SupervisionRequest {
                session_id,
                status_updates: false,
            }),
            transport_session_id: {
                self.next_ts_session = (self.next_ts_session + 1) & 0x0F;
                self.next_ts_session
            },
        };
        let addr = self.cc_address(node_id);

        let frames = match (secure, scheme) {
            (None, _) => encode_stack(&cc, &addr, &opts, SecurityParams::None),
            (Some(SecureContext::S0Nonce(receiver_nonce)), _) => {
                let Some(keys) = self.key_store.get(SecurityClass::S0).copied() else {
                    if let Some(done) = done.take() {
                        let _ = done.send(Err(TransactionFailure::SecurityNonceMissing));
                    }
                    return Ok(());
                };
                let mut sender_nonce = [0u8; 8];
                self.rng.fill(&mut sender_nonce[..]);
                encode_stack(
                    &cc,
                    &addr,
                    &opts,
                    SecurityParams::S0 {
                        keys: &keys,
                        sender_nonce,
                        receiver_nonce,
                    },
                )
            }
            (Some(SecureContext::Synced), _) | (Some(SecureContext::S2Fresh(_)), _) => {
                let span_extension = match secure {
                    Some(SecureContext::S2Fresh(sender_ei)) => Some(sender_ei),
                    _ => None,
                };
                let Some(engine) = self.s2.as_mut() else {
                    if let Some(done) = done.take() {
                        let _ = done.send(Err(TransactionFailure::SecurityNonceMissing));
                    }
                    return Ok(());
                };
                encode_stack(
                    &cc,
                    &addr,
                    &opts,
                    SecurityParams::S2 {
                        engine,
                        span_extension,
                    },
                )
            }
        };

        let frames = match frames {
            Ok(frames) => frames,
            Err(e) => {
                tracing::error!(node_id, "cannot encode command: {e}");
                if let Some(done) = done.take() {
                    let _ = done.send(Err(TransactionFailure::ControllerFailure));
                }
                return Ok(());
            }
        };

        // Supervised sends resolve through the Supervision Report, not the
        // SendData completion.
        if let Some(session) = supervised {
            let meta = CCSendMeta {
                node_id,
                endpoint,
                cc: cc.clone(),
                supervised: Some(session),
            };
            self.pending_supervision.insert(
                (node_id, session),
                PendingSupervision {
                    meta,
                    done: done.take(),
                    deadline: Instant::now() + self.config.timeouts.exchange_timeout(),
                },
            );
        }

        let purpose = match purpose {
            TxPurpose::Internal => TxPurpose::CCSend(CCSendMeta {
                node_id,
                endpoint,
                cc,
                supervised,
            }),
            other => other,
        };
        self.send_data_frames(node_id, frames, priority, purpose, done)
            .await
    }

    /// Wrap serialized CC frame(s) into SendData transactions. Only the
    /// last frame carries the purpose and completion.
    async fn send_data_frames(
        &mut self,
        node_id: u8,
        frames: Vec<Vec<u8>>,
        priority: Priority,
        purpose: TxPurpose,
        done: Option<CompletionSender>,
    ) -> Result<(), DriverError> {
        let count = frames.len();
        let mut done = done;
        debug_assert!(count > 0, "send_data_frames requires at least one frame");
        for (index, frame) in frames.into_iter().enumerate() {
            let callback_id = self.alloc_callback_id();
            let message = Message::request(
                FunctionType::SendData,
                MessagePayload::SendDataRequest(SendDataRequest {
                    node_id,
                    payload: frame,
                    tx_options: TRANSMIT_OPTIONS_DEFAULT,
                    callback_id,
                }),
            );
            let last = index + 1 == count;
            let (mut transaction, rx) = Transaction::new(message, priority);
            match (last, done.take()) {
                (true, Some(done)) => {
                    // Forward the final frame's outcome to the caller.
                    tokio::spawn(async move {
                        if let Ok(result) = rx.await {
                            let _ = done.send(result);
                        }
                    });
                }
                (_, stash) => {
                    done = stash;
                    drop(rx);
                }
            }
            transaction = transaction
                .with_target_node(node_id)
                .with_expected_response(MessageMatcher::ResponseFor(FunctionType::SendData))
                .with_expected_callback(MessageMatcher::CallbackFor {
                    function: FunctionType::SendData,
                    callback_id,
                })
                .with_callback_timeout(self.config.timeouts.send_data_callback_timeout())
                .with_max_attempts(self.config.attempts.send_data);
            let tx_purpose = if last {
                purpose.clone()
            } else {
                TxPurpose::Internal
            };
            self.enqueue_transaction(transaction, tx_purpose);
        }
        self.pump_queue_boxed().await
    }

    // ------------------------------------------------------------------
    // Unsolicited handling
    // ------------------------------------------------------------------

    async fn on_unsolicited(&mut self, message: Message) -> Result<(), DriverError> {
        match message.payload {
            MessagePayload::ApplicationCommand(cmd) => {
                self.handle_cc_bytes(cmd.source_node, cmd.cc_payload).await
            }
            MessagePayload::ApplicationUpdate(update) => {
                match update.update_type {
                    UpdateType::NodeInfoReceived => {
                        if let Some(nif) = &update.nif {
                            self.apply_node_nif(update.node_id, nif);
                        }
                    }
                    UpdateType::DeleteDone => {
                        self.remove_node(update.node_id).await;
                    }
                    _ => {}
                }
                Ok(())
            }
            other => {
                tracing::debug!(?other, "ignoring unsolicited message");
                Ok(())
            }
        }
    }

    async fn handle_cc_bytes(&mut self, source: u8, bytes: Vec<u8>) -> Result<(), DriverError> {
        let mut bytes = bytes;
        loop {
            let addr = CCAddress {
                home_id: self.home_id,
                source_node: source,
                dest_node: self.own_node_id,
            };
            let s0_keys = self.key_store.get(SecurityClass::S0).copied();
            let decoded = {
                let mut security = DecodeSecurity {
                    s0: s0_keys.as_ref().map(|k| (k, &mut self.s0_store)),
                    s2: self.s2.as_mut(),
                };
                decode_stack(&bytes, &addr, &mut security)
            };

            let decoded = match decoded {
                Ok(decoded) => decoded,
                Err(CCError::MacFailed) => {
                    return self.on_inbound_mac_failure(source).await;
                }
                Err(e) => {
                    tracing::warn!(source, "dropping command: {e}");
                    return Ok(());
                }
            };

            // Transport Service segments reassemble into a new CC frame
            // that goes around the loop again.
            if let CC::TransportService(segment) = &decoded.inner {
                match self.on_transport_segment(source, segment.clone()).await? {
                    Some(datagram) => {
                        bytes = datagram;
                        continue;
                    }
                    None => return Ok(()),
                }
            }

            return self.dispatch_cc(source, decoded).await;
        }
    }

    async fn on_inbound_mac_failure(&mut self, source: u8) -> Result<(), DriverError> {
        let Some(engine) = self.s2.as_mut() else {
            tracing::warn!(source, "S0 MAC failure on inbound frame; dropping");
            return Ok(());
        };
        match engine.on_mac_failure(source) {
            zwave_cc::security::ResyncDecision::Resync => {
                tracing::warn!(source, "MAC failure; requesting SPAN resync");
                self.send_nonce_get(source, SecureScheme::S2).await
            }
            zwave_cc::security::ResyncDecision::Abort => {
                tracing::warn!(source, "repeated MAC failures; aborting secure exchanges");
                if self.fail_pending_secure(source, TransactionFailure::SecurityMacFailed) {
                    self.on_interview_failure(source).await?;
                }
                Ok(())
            }
        }
    }

    /// Drop every pending secure send for a node. Returns whether one of
    /// them belonged to the node's interview.
    fn fail_pending_secure(&mut self, node_id: u8, kind: TransactionFailure) -> bool {
        let mut had_interview = false;
        if let Some(pending) = self.pending_secure.remove(&node_id) {
            for mut entry in pending {
                if matches!(entry.purpose, TxPurpose::Interview { .. }) {
                    had_interview = true;
                }
                if let Some(done) = entry.done.take() {
                    let _ = done.send(Err(kind));
                }
            }
        }
        had_interview
    }

    async fn on_transport_segment(
        &mut self,
        source: u8,
        segment: TransportServiceCC,
    ) -> Result<Option<Vec<u8>>, DriverError> {
        let outcome = self
            .reassemblers
            .entry(source)
            .or_default()
            .handle(&segment);
        match outcome {
            ReassemblyOutcome::Complete {
                session_id,
                datagram,
            } => {
                let complete = CC::TransportService(TransportServiceCC::SegmentComplete {
                    session_id,
                })
                .serialize();
                self.send_data_frames(
                    source,
                    vec![complete],
                    Priority::NodeQuery,
                    TxPurpose::Internal,
                    None,
                )
                .await?;
                Ok(Some(datagram))
            }
            ReassemblyOutcome::OutOfSync {
                session_id,
                expected_offset,
            } => {
                let request = CC::TransportService(TransportServiceCC::SegmentRequest {
                    session_id,
                    offset: expected_offset,
                })
                .serialize();
                self.send_data_frames(
                    source,
                    vec![request],
                    Priority::NodeQuery,
                    TxPurpose::Internal,
                    None,
                )
                .await?;
                Ok(None)
            }
            ReassemblyOutcome::InProgress | ReassemblyOutcome::Ignored => Ok(None),
        }
    }

    async fn dispatch_cc(&mut self, source: u8, decoded: DecodedCC) -> Result<(), DriverError> {
        let endpoint = decoded.source_endpoint();
        let supervision_session = decoded.stack.iter().find_map(|kind| match kind {
            EncapsulationKind::Supervision { session_id, .. } => Some(*session_id),
            _ => None,
        });

        match &decoded.inner {
            CC::WakeUp(WakeUpCC::Notification) => {
                return self.on_wake_up(source).await;
            }
            CC::SecurityS0(SecurityS0CC::NonceGet) => {
                let nonce = self.s0_store.generate(source, &mut self.rng);
                let frame = CC::SecurityS0(SecurityS0CC::NonceReport { nonce }).serialize();
                return self
                    .send_data_frames(source, vec![frame], Priority::NodeQuery, TxPurpose::Internal, None)
                    .await;
            }
            CC::SecurityS0(SecurityS0CC::NonceReport { nonce }) => {
                return self.on_s0_nonce_report(source, *nonce).await;
            }
            CC::SecurityS2(SecurityS2CC::NonceGet { .. }) => {
                let mut receiver_ei = [0u8; 16];
                self.rng.fill(&mut receiver_ei[..]);
                if let Some(engine) = self.s2.as_mut() {
                    engine.note_issued_receiver_ei(source, receiver_ei);
                }
                let seq = self.s2.as_mut().map(S2Engine::next_seq).unwrap_or(0);
                let frame = CC::SecurityS2(SecurityS2CC::NonceReport {
                    seq,
                    sos: true,
                    mos: false,
                    receiver_ei: Some(receiver_ei),
                })
                .serialize();
                return self
                    .send_data_frames(source, vec![frame], Priority::NodeQuery, TxPurpose::Internal, None)
                    .await;
            }
            CC::SecurityS2(SecurityS2CC::NonceReport {
                sos: true,
                receiver_ei: Some(receiver_ei),
                ..
            }) => {
                return self.on_s2_nonce_report(source, *receiver_ei).await;
            }
            CC::SecurityS2(_) => return Ok(()),
            CC::Supervision(SupervisionCC::Report {
                session_id,
                status,
                ..
            }) => {
                return self.on_supervision_report(source, *session_id, *status).await;
            }
            _ => {}
        }

        // Ordinary application command: record its state and values.
        self.apply_cc_state(source, endpoint, &decoded.inner);
        let events = cc_values::apply_report(&mut self.value_db, source, endpoint, &decoded.inner);
        for event in events {
            self.emit(DriverEvent::Value(event));
        }

        // A report cancels a scheduled verification poll for its value.
        let cc_id = decoded.inner.cc_id().as_u8();
        self.verification_polls
            .retain(|p| !(p.node_id == source && p.endpoint == endpoint && p.cc == cc_id));

        // Answer an inbound supervised command.
        if let Some(session_id) = supervision_session {
            let report = CC::Supervision(SupervisionCC::Report {
                session_id,
                more_updates: false,
                status: SupervisionStatus::Success,
                duration: CCDuration::Instant,
            })
            .serialize();
            self.send_data_frames(source, vec![report], Priority::NodeQuery, TxPurpose::Internal, None)
                .await?;
        }

        // Does this report finish an interview exchange?
        let finishes_interview = self.pending_reports.get(&source).is_some_and(|pending| {
            pending.expected == (cc_id, decoded.inner.cc_command(), endpoint)
        });
        if finishes_interview {
            self.pending_reports.remove(&source);
            self.mark_interview_busy(source, false);
            self.pump_interview_boxed(source).await?;
        }
        self.maybe_drain_wakeup(source).await
    }

    /// Interview-relevant side state carried by reports.
    fn apply_cc_state(&mut self, source: u8, _endpoint: u8, cc: &CC) {
        let Some(node) = self.nodes.get_mut(&source) else {
            return;
        };
        match cc {
            CC::Version(VersionCC::CommandClassReport { cc, version }) => {
                node.cc_versions.insert(*cc, *version);
            }
            CC::ManufacturerSpecific(ManufacturerSpecificCC::Report {
                manufacturer_id,
                product_type,
                product_id,
            }) => {
                node.manufacturer_id = Some(*manufacturer_id);
                node.product_type = Some(*product_type);
                node.product_id = Some(*product_id);
            }
            CC::WakeUp(WakeUpCC::IntervalReport { seconds, .. }) => {
                node.wake_up_interval = Some(*seconds);
            }
            CC::MultiChannel(MultiChannelCC::EndPointReport { endpoint_count, .. }) => {
                for index in 1..=*endpoint_count {
                    node.endpoints
                        .entry(index)
                        .or_insert_with(|| crate::node::Endpoint {
                            index,
                            ..Default::default()
                        });
                }
            }
            CC::MultiChannel(MultiChannelCC::CapabilityReport {
                endpoint,
                generic_class,
                specific_class,
                supported_ccs,
            }) => {
                let entry = node
                    .endpoints
                    .entry(*endpoint)
                    .or_insert_with(|| crate::node::Endpoint {
                        index: *endpoint,
                        ..Default::default()
                    });
                entry.generic_class = *generic_class;
                entry.specific_class = *specific_class;
                entry.supported_ccs = supported_ccs.clone();
            }
            CC::Association(AssociationCC::GroupingsReport { group_count }) => {
                node.association_group_count = Some(*group_count);
            }
            CC::Association(AssociationCC::Report {
                group_id, node_ids, ..
            }) => {
                node.association_groups.insert(*group_id, node_ids.clone());
            }
            _ => {}
        }
    }

    async fn on_wake_up(&mut self, node_id: u8) -> Result<(), DriverError> {
        tracing::info!(node_id, "wake-up notification");
        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.awake = true;
        }
        self.emit(DriverEvent::NodeAwake { node_id });
        let released = self.queue.wake_node(node_id);
        tracing::debug!(node_id, released, "released parked transactions");
        self.pump_queue_boxed().await?;
        self.pump_interview_boxed(node_id).await?;
        self.maybe_drain_wakeup(node_id).await
    }

    /// Send the node back to sleep once nothing is left for it.
    async fn maybe_drain_wakeup(&mut self, node_id: u8) -> Result<(), DriverError> {
        let ready = {
            let Some(node) = self.nodes.get(&node_id) else {
                return Ok(());
            };
            node.is_sleeping_capable()
                && node.awake
                && node.supports_cc(CommandClasses::WakeUp)
                && !self.draining.contains(&node_id)
                && !self.queue.has_ready_for(node_id)
                && !self.queue.has_parked(node_id)
                && !self.pending_reports.contains_key(&node_id)
                && !self.pending_secure.contains_key(&node_id)
                && self
                    .current
                    .as_ref()
                    .map_or(true, |i| i.transaction.target_node != Some(node_id))
        };
        if !ready {
            return Ok(());
        }
        tracing::debug!(node_id, "queue drained; sending NoMoreInformation");
        self.draining.insert(node_id);
        let frame = CC::WakeUp(WakeUpCC::NoMoreInformation).serialize();
        self.send_data_frames(
            node_id,
            vec![frame],
            Priority::WakeUp,
            TxPurpose::WakeUpDrain { node_id },
            None,
        )
        .await
    }

    async fn on_s0_nonce_report(&mut self, node_id: u8, nonce: [u8; 8]) -> Result<(), DriverError> {
        let Some(entry) = self
            .pending_secure
            .get_mut(&node_id)
            .and_then(VecDeque::pop_front)
        else {
            tracing::debug!(node_id, "unsolicited S0 nonce report");
            return Ok(());
        };
        if self.pending_secure.get(&node_id).is_some_and(VecDeque::is_empty) {
            self.pending_secure.remove(&node_id);
        }
        if entry.scheme != SecureScheme::S0 {
            tracing::warn!(node_id, "S0 nonce while an S2 exchange was pending");
        }
        self.encode_and_send(
            node_id,
            entry.endpoint,
            entry.cc,
            entry.supervised,
            entry.priority,
            entry.purpose,
            entry.done,
            SecureScheme::S0,
            Some(SecureContext::S0Nonce(nonce)),
        )
        .await
    }

    async fn on_s2_nonce_report(
        &mut self,
        node_id: u8,
        receiver_ei: [u8; 16],
    ) -> Result<(), DriverError> {
        let Some(entry) = self
            .pending_secure
            .get_mut(&node_id)
            .and_then(VecDeque::pop_front)
        else {
            tracing::debug!(node_id, "unsolicited S2 nonce report");
            return Ok(());
        };
        if self.pending_secure.get(&node_id).is_some_and(VecDeque::is_empty) {
            self.pending_secure.remove(&node_id);
        }
        let mut sender_ei = [0u8; 16];
        self.rng.fill(&mut sender_ei[..]);
        if let Some(engine) = self.s2.as_mut() {
            engine.establish_span(node_id, &sender_ei, &receiver_ei);
        }
        self.encode_and_send(
            node_id,
            entry.endpoint,
            entry.cc,
            entry.supervised,
            entry.priority,
            entry.purpose,
            entry.done,
            SecureScheme::S2,
            Some(SecureContext::S2Fresh(sender_ei)),
        )
        .await
    }

    async fn on_supervision_report(
        &mut self,
        node_id: u8,
        session_id: u8,
        status: SupervisionStatus,
    ) -> Result<(), DriverError> {
        if !status.is_final() {
            tracing::debug!(node_id, session_id, "interim supervision update");
            return Ok(());
        }
        let Some(mut pending) = self.pending_supervision.remove(&(node_id, session_id)) else {
            tracing::debug!(node_id, session_id, "supervision report for unknown session");
            return Ok(());
        };
        match status {
            SupervisionStatus::Success => {
                // Confirmed: apply the target exactly once, no poll.
                let events = cc_values::apply_confirmed_set(
                    &mut self.value_db,
                    pending.meta.node_id,
                    pending.meta.endpoint,
                    &pending.meta.cc,
                );
                for event in events {
                    self.emit(DriverEvent::Value(event));
                }
                if let Some(done) = pending.done.take() {
                    let _ = done.send(Ok(None));
                }
            }
            _ => {
                tracing::warn!(node_id, session_id, ?status, "supervised command failed");
                if let Some(done) = pending.done.take() {
                    let _ = done.send(Err(TransactionFailure::SupervisionFailed));
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    async fn on_command(&mut self, cmd: DriverCommand) -> Result<(), DriverError> {
        match cmd {
            DriverCommand::SendMessage {
                message,
                priority,
                done,
            } => {
                self.enqueue_message(message, priority, TxPurpose::Message, Some(done));
                self.pump_queue_boxed().await
            }
            DriverCommand::SendCC {
                node_id,
                endpoint,
                cc,
                supervised,
                done,
            } => {
                if !self.nodes.contains_key(&node_id) {
                    let _ = done.send(Err(TransactionFailure::Cancelled));
                    return Ok(());
                }
                self.start_cc_send(
                    node_id,
                    endpoint,
                    cc,
                    supervised,
                    Priority::Normal,
                    TxPurpose::Internal,
                    Some(done),
                )
                .await
            }
            DriverCommand::Subscribe { reply } => {
                let (tx, rx) = mpsc::channel(256);
                self.event_subscribers.push(tx);
                let _ = reply.send(rx);
                Ok(())
            }
            DriverCommand::NodeIds { reply } => {
                let _ = reply.send(self.nodes.keys().copied().collect());
                Ok(())
            }
            DriverCommand::NodeSummary { node_id, reply } => {
                let summary = self.nodes.get(&node_id).map(|node| NodeSummary {
                    node_id,
                    interview_stage: node.interview_stage,
                    listening: node.protocol_info.as_ref().map(|i| i.listening),
                    awake: node.awake,
                    dead: node.dead,
                    supported_ccs: node.supported_ccs.clone(),
                    security_class: node.security_class,
                });
                let _ = reply.send(summary);
                Ok(())
            }
            DriverCommand::GetValue { id, reply } => {
                let _ = reply.send(self.value_db.get(&id).cloned());
                Ok(())
            }
            DriverCommand::SetNetworkKey { class, key } => {
                self.key_store.insert(class, &key);
                if class.is_s2() && self.s2.is_none() {
                    let keys = *self
                        .key_store
                        .get(class)
                        .expect("just inserted");
                    self.s2 = Some(S2Engine::new(keys));
                }
                tracing::info!(?class, "network key loaded");
                Ok(())
            }
            DriverCommand::SetNodeSecurityClass { node_id, class } => {
                if let Some(node) = self.nodes.get_mut(&node_id) {
                    node.security_class = Some(class);
                    self.persist_node(node_id).await;
                }
                Ok(())
            }
            DriverCommand::ReInterview { node_id } => {
                if self.nodes.contains_key(&node_id) {
                    if let Some(node) = self.nodes.get_mut(&node_id) {
                        node.reset_interview();
                    }
                    self.interviews.insert(node_id, InterviewRuntime::default());
                    self.pending_reports.remove(&node_id);
                    self.pump_interview_boxed(node_id).await?;
                }
                Ok(())
            }
            DriverCommand::Shutdown => unreachable!("handled by the main loop"),
        }
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    fn set_tx_timer(&mut self, kind: TimerKind, duration: Duration) {
        let deadline = Instant::now() + duration;
        match kind {
            TimerKind::Ack => self.ack_deadline = Some(deadline),
            TimerKind::Response => {
                self.ack_deadline = None;
                self.response_deadline = Some(deadline);
            }
            TimerKind::Callback => {
                self.ack_deadline = None;
                self.response_deadline = None;
                self.callback_deadline = Some(deadline);
            }
        }
    }

    fn clear_tx_timers(&mut self) {
        self.ack_deadline = None;
        self.response_deadline = None;
        self.callback_deadline = None;
        self.backoff_deadline = None;
    }

    fn next_deadline(&self) -> Instant {
        let fallback = Instant::now() + Duration::from_secs(60);
        let mut next = fallback;
        let mut consider = |candidate: Option<Instant>| {
            if let Some(c) = candidate {
                if c < next {
                    next = c;
                }
            }
        };
        consider(self.ack_deadline);
        consider(self.response_deadline);
        consider(self.callback_deadline);
        consider(self.backoff_deadline);
        consider(self.frame_deadline);
        for pending in self.pending_reports.values() {
            consider(Some(pending.deadline));
        }
        for entries in self.pending_secure.values() {
            for entry in entries {
                consider(Some(entry.deadline));
            }
        }
        for pending in self.pending_supervision.values() {
            consider(Some(pending.deadline));
        }
        for poll in &self.verification_polls {
            consider(Some(poll.due));
        }
        for node in self.nodes.values() {
            consider(node.interview_retry_at);
        }
        next
    }

    async fn on_tick(&mut self) -> Result<(), DriverError> {
        let now = Instant::now();

        if self.frame_deadline.is_some_and(|d| d <= now) {
            self.frame_deadline = None;
            if self.accumulator.on_timeout() {
                tracing::warn!("partial frame timed out; discarded");
            }
        }

        if self.ack_deadline.is_some_and(|d| d <= now) {
            self.ack_deadline = None;
            self.on_tx_frame(TxEvent::Timer(TimerKind::Ack)).await?;
        }
        if self.response_deadline.is_some_and(|d| d <= now) {
            self.response_deadline = None;
            self.on_tx_frame(TxEvent::Timer(TimerKind::Response)).await?;
        }
        if self.callback_deadline.is_some_and(|d| d <= now) {
            self.callback_deadline = None;
            self.on_tx_frame(TxEvent::Timer(TimerKind::Callback)).await?;
        }
        if self.backoff_deadline.is_some_and(|d| d <= now) {
            self.backoff_deadline = None;
            if let Some(inflight) = self.current.as_mut() {
                let actions = inflight.machine.start();
                self.process_tx_actions(actions).await?;
            }
        }

        // Interview exchanges that timed out.
        let timed_out: Vec<u8> = self
            .pending_reports
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(&node, _)| node)
            .collect();
        for node_id in timed_out {
            tracing::warn!(node_id, "interview exchange timed out");
            self.pending_reports.remove(&node_id);
            self.on_interview_failure(node_id).await?;
        }

        // Nonce exchanges that timed out.
        let nodes: Vec<u8> = self.pending_secure.keys().copied().collect();
        for node_id in nodes {
            let mut expired = Vec::new();
            if let Some(entries) = self.pending_secure.get_mut(&node_id) {
                while entries.front().is_some_and(|e| e.deadline <= now) {
                    expired.push(entries.pop_front().expect("checked front"));
                }
                if entries.is_empty() {
                    self.pending_secure.remove(&node_id);
                }
            }
            for mut entry in expired {
                tracing::warn!(node_id, "nonce exchange timed out");
                if let Some(done) = entry.done.take() {
                    let _ = done.send(Err(TransactionFailure::SecurityNonceMissing));
                }
                if matches!(entry.purpose, TxPurpose::Interview { .. }) {
                    self.on_interview_failure(node_id).await?;
                }
            }
        }

        // Supervision sessions that timed out.
        let sessions: Vec<(u8, u8)> = self
            .pending_supervision
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(&k, _)| k)
            .collect();
        for key in sessions {
            if let Some(mut pending) = self.pending_supervision.remove(&key) {
                tracing::warn!(node_id = key.0, session = key.1, "supervision report timed out");
                if let Some(done) = pending.done.take() {
                    let _ = done.send(Err(TransactionFailure::CallbackTimeout));
                }
            }
        }

        // Due verification polls.
        let due: Vec<VerificationPoll> = self
            .verification_polls
            .iter()
            .filter(|p| p.due <= now)
            .cloned()
            .collect();
        self.verification_polls.retain(|p| p.due > now);
        for poll in due {
            let cc = match CommandClasses::from_u8(poll.cc) {
                CommandClasses::BinarySwitch => CC::BinarySwitch(BinarySwitchCC::Get),
                CommandClasses::MultilevelSwitch => CC::MultilevelSwitch(MultilevelSwitchCC::Get),
                CommandClasses::Basic => CC::Basic(BasicCC::Get),
                _ => continue,
            };
            tracing::debug!(node_id = poll.node_id, "verification poll");
            self.start_cc_send(
                poll.node_id,
                poll.endpoint,
                cc,
                false,
                Priority::Poll,
                TxPurpose::Internal,
                None,
            )
            .await?;
        }

        // Interview retries that became due.
        let retry_nodes: Vec<u8> = self
            .nodes
            .values()
            .filter(|n| n.interview_retry_at.is_some_and(|t| t <= now))
            .map(|n| n.id)
            .collect();
        for node_id in retry_nodes {
            if let Some(node) = self.nodes.get_mut(&node_id) {
                node.interview_retry_at = None;
            }
            tracing::info!(node_id, "retrying interview");
            self.pump_interview_boxed(node_id).await?;
        }

        self.s0_store.purge_expired(now);
        self.pump_queue_boxed().await
    }

    // ------------------------------------------------------------------
    // Persistence and events
    // ------------------------------------------------------------------

    async fn persist_node(&mut self, node_id: u8) {
        let Some(node) = self.nodes.get(&node_id) else {
            return;
        };
        let mut cached = CachedNode::from_node(node);
        cached.values = self
            .value_db
            .values_for_node(node_id)
            .into_iter()
            .filter(|(id, _)| self.value_db.is_stateful(id))
            .map(|(id, value)| CachedValue {
                id: id.clone(),
                value: value.clone(),
            })
            .collect();
        self.cache.nodes.insert(node_id, cached);
        self.flush_cache().await;
    }

    async fn persist_all(&mut self) {
        let node_ids: Vec<u8> = self.nodes.keys().copied().collect();
        for node_id in node_ids {
            let Some(node) = self.nodes.get(&node_id) else {
                continue;
            };
            let mut cached = CachedNode::from_node(node);
            cached.values = self
                .value_db
                .values_for_node(node_id)
                .into_iter()
                .filter(|(id, _)| self.value_db.is_stateful(id))
                .map(|(id, value)| CachedValue {
                    id: id.clone(),
                    value: value.clone(),
                })
                .collect();
            self.cache.nodes.insert(node_id, cached);
        }
        self.flush_cache().await;
    }

    async fn flush_cache(&mut self) {
        if self.home_id == 0 {
            return;
        }
        self.cache.home_id = self.home_id;
        if let Some(store) = &self.cache_store {
            if let Err(e) = store.flush(&self.cache).await {
                tracing::warn!("failed to flush network cache: {e}");
            }
        }
    }

    fn emit(&mut self, event: DriverEvent) {
        self.event_subscribers.retain(|sub| {
            match sub.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!("event subscriber lagging; dropping event");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }

    async fn write_control(&mut self, frame: Frame) -> Result<(), DriverError> {
        let bytes = frame
            .serialize()
            .expect("control frames always serialize");
        self.transport.write(bytes).await?;
        Ok(())
    }
}

/// Inputs to the secure encode path.
#[derive(Debug, Clone, Copy)]
enum SecureContext {
    /// S0: the receiver nonce obtained from the node.
    S0Nonce([u8; 8]),
    /// S2 with an established SPAN.
    Synced,
    /// S2 immediately after SPAN establishment; carries our entropy input
    /// for the SPAN extension.
    S2Fresh([u8; 16]),
}

/// The functions whose requests pair with a controller response.
fn default_response_matcher(message: &Message) -> Option<MessageMatcher> {
    use FunctionType as F;
    if message.msg_type != MessageType::Request {
        return None;
    }
    match message.function {
        F::GetSerialApiInitData
        | F::GetControllerCapabilities
        | F::SetSerialApiTimeouts
        | F::GetSerialApiCapabilities
        | F::SendData
        | F::GetControllerVersion
        | F::GetControllerId
        | F::GetNodeProtocolInfo
        | F::GetSucNodeId
        | F::RequestNodeInfo => Some(MessageMatcher::ResponseFor(message.function)),
        _ => None,
    }
}
