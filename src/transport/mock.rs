//! In-memory transport for tests and local development.
//!
//! [`MockBroker`] models just enough of an Artemis broker to exercise the
//! recovery machinery end to end without a network: addresses and queues
//! with routing types, FIFO queue storage, per-link credit accounting,
//! redelivery of unacknowledged messages on detach, an
//! `activemq.management`-shaped management endpoint, and scriptable
//! failures (offline periods, refused connects, peer-initiated close).
//!
//! The broker hands out connectors via [`MockBroker::connector`]; inject one
//! into `ClientBuilder::with_connector` to run the full client against it.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::config::RoutingType;
use crate::endpoint::Endpoint;
use crate::message::Message;

use super::{
    ClosedInfo, DispositionWaiter, InboundDelivery, ManagementLink, ManagementReply, ReceiverLink,
    ReceiverOptions, SendDisposition, SenderLink, SenderOptions, TransportConnector,
    TransportError, TransportSession,
};

type DispositionSlot = tokio::sync::oneshot::Sender<Result<SendDisposition, TransportError>>;

#[derive(Debug, Clone)]
struct SessionCtl {
    open: Arc<AtomicBool>,
    closed: CancellationToken,
    info: Arc<Mutex<Option<ClosedInfo>>>,
}

impl SessionCtl {
    fn new() -> Self {
        Self {
            open: Arc::new(AtomicBool::new(true)),
            closed: CancellationToken::new(),
            info: Arc::new(Mutex::new(None)),
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.closed.is_cancelled()
    }

    fn shut(&self, info: ClosedInfo) {
        self.open.store(false, Ordering::Release);
        let mut slot = self.info.lock().unwrap();
        if slot.is_none() {
            *slot = Some(info);
        }
        drop(slot);
        self.closed.cancel();
    }

    fn close_reason(&self) -> String {
        self.info
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|i| i.error.clone())
            .unwrap_or_else(|| "connection closed".to_string())
    }
}

struct QueueRecord {
    address: String,
    #[allow(dead_code)]
    routing: RoutingType,
    pending: VecDeque<Message>,
    // Delivered but unsettled, keyed by (link id, delivery tag). Requeued
    // at the front when the owning link goes away.
    in_flight: BTreeMap<(u64, u64), Message>,
}

struct SessionRecord {
    ctl: SessionCtl,
    link_ids: Vec<u64>,
}

#[derive(Default)]
struct BrokerState {
    online: bool,
    fail_connects: u32,
    connects: u64,
    connect_hosts: Vec<String>,
    hold_dispositions: bool,
    held_dispositions: Vec<DispositionSlot>,
    addresses: HashMap<String, HashSet<RoutingType>>,
    queues: HashMap<String, QueueRecord>,
    sessions: HashMap<u64, SessionRecord>,
}

impl BrokerState {
    fn requeue_links(&mut self, link_ids: &[u64]) {
        for queue in self.queues.values_mut() {
            let stale: Vec<(u64, u64)> = queue
                .in_flight
                .keys()
                .filter(|(link, _)| link_ids.contains(link))
                .copied()
                .collect();
            // Reverse tag order so push_front restores the original order.
            for key in stale.iter().rev() {
                if let Some(msg) = queue.in_flight.remove(key) {
                    queue.pending.push_front(msg);
                }
            }
        }
    }

    fn ensure_queue(&mut self, address: &str, queue: &str, routing: RoutingType) {
        self.addresses
            .entry(address.to_string())
            .or_default()
            .insert(routing);
        self.queues
            .entry(queue.to_string())
            .or_insert_with(|| QueueRecord {
                address: address.to_string(),
                routing,
                pending: VecDeque::new(),
                in_flight: BTreeMap::new(),
            });
    }

    /// Queues a send lands in, resolved the way the broker would.
    fn route(&mut self, address: &str, queue: Option<&str>) -> Vec<String> {
        if let Some(queue) = queue {
            self.ensure_queue(address, queue, RoutingType::Anycast);
            return vec![queue.to_string()];
        }
        match self.addresses.get(address) {
            Some(routing) if routing.contains(&RoutingType::Multicast) => {
                let mut targets: Vec<String> = self
                    .queues
                    .iter()
                    .filter(|(_, q)| q.address == address)
                    .map(|(name, _)| name.clone())
                    .collect();
                targets.sort();
                targets
            }
            _ => {
                // Anycast with auto-created default queue: lowest-named
                // bound queue wins, for determinism.
                let bound = self
                    .queues
                    .iter()
                    .filter(|(_, q)| q.address == address)
                    .map(|(name, _)| name.clone())
                    .min();
                match bound {
                    Some(name) => vec![name],
                    None => {
                        self.ensure_queue(address, address, RoutingType::Anycast);
                        vec![address.to_string()]
                    }
                }
            }
        }
    }
}

struct BrokerShared {
    state: Mutex<BrokerState>,
    notify: Notify,
    next_link_id: AtomicU64,
    next_session_id: AtomicU64,
}

/// A scriptable in-memory broker.
#[derive(Clone)]
pub struct MockBroker {
    shared: Arc<BrokerShared>,
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBroker {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(BrokerShared {
                state: Mutex::new(BrokerState {
                    online: true,
                    ..BrokerState::default()
                }),
                notify: Notify::new(),
                next_link_id: AtomicU64::new(0),
                next_session_id: AtomicU64::new(0),
            }),
        }
    }

    /// A connector clients can use to reach this broker.
    pub fn connector(&self) -> Arc<dyn TransportConnector> {
        Arc::new(MockConnector {
            shared: self.shared.clone(),
        })
    }

    /// Brings the broker up or down. While down, connects fail.
    pub fn set_online(&self, online: bool) {
        self.shared.state.lock().unwrap().online = online;
    }

    /// Refuses the next `n` connection attempts even while online.
    pub fn fail_next_connects(&self, n: u32) {
        self.shared.state.lock().unwrap().fail_connects = n;
    }

    /// Total connection attempts observed (successful or not).
    pub fn connect_count(&self) -> u64 {
        self.shared.state.lock().unwrap().connects
    }

    /// Hosts of every connection attempt, in order.
    pub fn connect_hosts(&self) -> Vec<String> {
        self.shared.state.lock().unwrap().connect_hosts.clone()
    }

    /// Closes every live session as if the broker dropped them, requeueing
    /// unacknowledged deliveries.
    pub fn drop_connections(&self) {
        let mut state = self.shared.state.lock().unwrap();
        let sessions: Vec<SessionRecord> = state.sessions.drain().map(|(_, s)| s).collect();
        for session in &sessions {
            state.requeue_links(&session.link_ids);
        }
        drop(state);
        for session in sessions {
            session.ctl.shut(ClosedInfo {
                closed_by_peer: true,
                error: Some("connection reset by broker".to_string()),
            });
        }
        self.shared.notify.notify_waiters();
    }

    /// Makes subsequent sends park their settlement until
    /// [`release_dispositions`](MockBroker::release_dispositions). The
    /// message still lands in the queue at dispatch time, like a broker
    /// that is slow to settle.
    pub fn hold_dispositions(&self, hold: bool) {
        self.shared.state.lock().unwrap().hold_dispositions = hold;
    }

    /// Settles every held delivery as accepted.
    pub fn release_dispositions(&self) {
        let held: Vec<DispositionSlot> = {
            let mut state = self.shared.state.lock().unwrap();
            state.held_dispositions.drain(..).collect()
        };
        for slot in held {
            let _ = slot.send(Ok(SendDisposition::Accepted));
        }
    }

    /// Deliveries dispatched but not yet settled because of
    /// [`hold_dispositions`](MockBroker::hold_dispositions).
    pub fn held_disposition_count(&self) -> usize {
        self.shared.state.lock().unwrap().held_dispositions.len()
    }

    /// Declares an address/queue pair without going through management.
    pub fn install_queue(&self, address: &str, queue: &str, routing: RoutingType) {
        self.shared
            .state
            .lock()
            .unwrap()
            .ensure_queue(address, queue, routing);
    }

    /// Places a message directly into a queue.
    pub fn seed(&self, queue: &str, message: Message) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.ensure_queue(queue, queue, RoutingType::Anycast);
            state
                .queues
                .get_mut(queue)
                .expect("queue just ensured")
                .pending
                .push_back(message);
        }
        self.shared.notify.notify_waiters();
    }

    /// Messages waiting in a queue (excluding unsettled deliveries).
    pub fn queue_depth(&self, queue: &str) -> usize {
        self.shared
            .state
            .lock()
            .unwrap()
            .queues
            .get(queue)
            .map(|q| q.pending.len())
            .unwrap_or(0)
    }

    /// Deliveries handed out but not yet settled, across all links.
    pub fn in_flight_count(&self, queue: &str) -> usize {
        self.shared
            .state
            .lock()
            .unwrap()
            .queues
            .get(queue)
            .map(|q| q.in_flight.len())
            .unwrap_or(0)
    }
}

struct MockConnector {
    shared: Arc<BrokerShared>,
}

#[async_trait]
impl TransportConnector for MockConnector {
    async fn open(&self, endpoint: &Endpoint) -> Result<Box<dyn TransportSession>, TransportError> {
        let mut state = self.shared.state.lock().unwrap();
        state.connects += 1;
        state.connect_hosts.push(endpoint.host().to_string());
        if !state.online {
            return Err(TransportError::connect_failed(format!(
                "{endpoint}: broker is offline"
            )));
        }
        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            return Err(TransportError::connect_failed(format!(
                "{endpoint}: connection refused"
            )));
        }
        let id = self.shared.next_session_id.fetch_add(1, Ordering::Relaxed);
        let ctl = SessionCtl::new();
        state.sessions.insert(
            id,
            SessionRecord {
                ctl: ctl.clone(),
                link_ids: Vec::new(),
            },
        );
        drop(state);
        Ok(Box::new(MockSession {
            shared: self.shared.clone(),
            id,
            ctl,
        }))
    }
}

struct MockSession {
    shared: Arc<BrokerShared>,
    id: u64,
    ctl: SessionCtl,
}

impl MockSession {
    fn check_open(&self) -> Result<(), TransportError> {
        if self.ctl.is_open() {
            Ok(())
        } else {
            Err(TransportError::connection_lost(self.ctl.close_reason()))
        }
    }

    fn register_link(&self) -> u64 {
        let link_id = self.shared.next_link_id.fetch_add(1, Ordering::Relaxed);
        let mut state = self.shared.state.lock().unwrap();
        if let Some(session) = state.sessions.get_mut(&self.id) {
            session.link_ids.push(link_id);
        }
        link_id
    }
}

#[async_trait]
impl TransportSession for MockSession {
    async fn open_sender(
        &self,
        options: SenderOptions,
    ) -> Result<Box<dyn SenderLink>, TransportError> {
        self.check_open()?;
        self.register_link();
        Ok(Box::new(MockSenderLink {
            shared: self.shared.clone(),
            ctl: self.ctl.clone(),
            options,
        }))
    }

    async fn open_receiver(
        &self,
        options: ReceiverOptions,
    ) -> Result<Box<dyn ReceiverLink>, TransportError> {
        self.check_open()?;
        let link_id = self.register_link();
        let queue_name = match &options.queue {
            Some(queue) => {
                self.shared.state.lock().unwrap().ensure_queue(
                    &options.address,
                    queue,
                    RoutingType::Anycast,
                );
                queue.clone()
            }
            None if options.capabilities.contains(&"topic") => {
                // Multicast subscription queue, one per link.
                let name = format!("{}.{}", options.address, options.link_name);
                self.shared.state.lock().unwrap().ensure_queue(
                    &options.address,
                    &name,
                    RoutingType::Multicast,
                );
                name
            }
            None => {
                // Anycast: attach to the lowest-named bound queue, creating
                // the default one when the address is fresh.
                let mut state = self.shared.state.lock().unwrap();
                let bound = state
                    .queues
                    .iter()
                    .filter(|(_, q)| q.address == options.address)
                    .map(|(name, _)| name.clone())
                    .min();
                match bound {
                    Some(name) => name,
                    None => {
                        state.ensure_queue(
                            &options.address,
                            &options.address,
                            RoutingType::Anycast,
                        );
                        options.address.clone()
                    }
                }
            }
        };
        Ok(Box::new(MockReceiverLink {
            shared: self.shared.clone(),
            ctl: self.ctl.clone(),
            queue_name,
            link_id,
            credit: Mutex::new(options.initial_credit),
            next_tag: AtomicU64::new(0),
        }))
    }

    async fn open_management(&self) -> Result<Box<dyn ManagementLink>, TransportError> {
        self.check_open()?;
        Ok(Box::new(MockManagementLink {
            shared: self.shared.clone(),
            ctl: self.ctl.clone(),
        }))
    }

    fn is_open(&self) -> bool {
        self.ctl.is_open()
    }

    fn closed(&self) -> CancellationToken {
        self.ctl.closed.clone()
    }

    fn closed_info(&self) -> Option<ClosedInfo> {
        self.ctl.info.lock().unwrap().clone()
    }

    async fn close(&self) -> Result<(), TransportError> {
        {
            let mut state = self.shared.state.lock().unwrap();
            if let Some(session) = state.sessions.remove(&self.id) {
                let link_ids = session.link_ids.clone();
                state.requeue_links(&link_ids);
            }
        }
        self.ctl.shut(ClosedInfo {
            closed_by_peer: false,
            error: None,
        });
        self.shared.notify.notify_waiters();
        Ok(())
    }
}

struct MockSenderLink {
    shared: Arc<BrokerShared>,
    ctl: SessionCtl,
    options: SenderOptions,
}

#[async_trait]
impl SenderLink for MockSenderLink {
    async fn send(&self, _tag: u64, message: Message) -> Result<DispositionWaiter, TransportError> {
        if !self.ctl.is_open() {
            return Err(TransportError::link_detached(self.ctl.close_reason()));
        }
        let waiter = {
            let mut state = self.shared.state.lock().unwrap();
            let targets = state.route(&self.options.address, self.options.queue.as_deref());
            for target in targets {
                if let Some(queue) = state.queues.get_mut(&target) {
                    queue.pending.push_back(message.clone());
                }
            }
            // Pre-settled links never wait for a disposition frame.
            if state.hold_dispositions && !self.options.presettled {
                let (slot, waiter) = DispositionWaiter::channel();
                state.held_dispositions.push(slot);
                waiter
            } else {
                DispositionWaiter::resolved(Ok(SendDisposition::Accepted))
            }
        };
        self.shared.notify.notify_waiters();
        Ok(waiter)
    }

    async fn close(&self) {}
}

struct MockReceiverLink {
    shared: Arc<BrokerShared>,
    ctl: SessionCtl,
    queue_name: String,
    link_id: u64,
    credit: Mutex<u32>,
    next_tag: AtomicU64,
}

impl MockReceiverLink {
    fn try_take(&self) -> Result<Option<InboundDelivery>, TransportError> {
        if !self.ctl.is_open() {
            return Err(TransportError::link_detached(self.ctl.close_reason()));
        }
        let mut credit = self.credit.lock().unwrap();
        if *credit == 0 {
            return Ok(None);
        }
        let mut state = self.shared.state.lock().unwrap();
        let Some(queue) = state.queues.get_mut(&self.queue_name) else {
            return Ok(None);
        };
        let Some(message) = queue.pending.pop_front() else {
            return Ok(None);
        };
        let tag = self.next_tag.fetch_add(1, Ordering::Relaxed) + 1;
        queue.in_flight.insert((self.link_id, tag), message.clone());
        *credit -= 1;
        Ok(Some(InboundDelivery { tag, message }))
    }
}

#[async_trait]
impl ReceiverLink for MockReceiverLink {
    async fn receive(&self) -> Result<InboundDelivery, TransportError> {
        loop {
            if let Some(delivery) = self.try_take()? {
                return Ok(delivery);
            }
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            // Re-check after registering interest so a send racing with us
            // cannot be missed.
            if let Some(delivery) = self.try_take()? {
                return Ok(delivery);
            }
            tokio::select! {
                _ = notified => {}
                _ = self.ctl.closed.cancelled() => {}
            }
        }
    }

    async fn accept(&self, tag: u64) -> Result<(), TransportError> {
        if !self.ctl.is_open() {
            return Err(TransportError::link_detached(self.ctl.close_reason()));
        }
        let mut state = self.shared.state.lock().unwrap();
        if let Some(queue) = state.queues.get_mut(&self.queue_name) {
            queue.in_flight.remove(&(self.link_id, tag));
        }
        Ok(())
    }

    async fn reject(&self, tag: u64) -> Result<(), TransportError> {
        if !self.ctl.is_open() {
            return Err(TransportError::link_detached(self.ctl.close_reason()));
        }
        let mut state = self.shared.state.lock().unwrap();
        if let Some(queue) = state.queues.get_mut(&self.queue_name) {
            queue.in_flight.remove(&(self.link_id, tag));
        }
        Ok(())
    }

    async fn add_credit(&self, n: u32) -> Result<(), TransportError> {
        if !self.ctl.is_open() {
            return Err(TransportError::link_detached(self.ctl.close_reason()));
        }
        {
            let mut credit = self.credit.lock().unwrap();
            *credit = credit.saturating_add(n);
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn close(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.requeue_links(&[self.link_id]);
        }
        self.shared.notify.notify_waiters();
    }
}

struct MockManagementLink {
    shared: Arc<BrokerShared>,
    ctl: SessionCtl,
}

impl MockManagementLink {
    fn failure(message: String) -> ManagementReply {
        ManagementReply {
            success: false,
            body: message,
        }
    }

    fn success(body: serde_json::Value) -> ManagementReply {
        ManagementReply {
            success: true,
            body: body.to_string(),
        }
    }
}

#[async_trait]
impl ManagementLink for MockManagementLink {
    async fn request(
        &self,
        operation: &str,
        params: serde_json::Value,
    ) -> Result<ManagementReply, TransportError> {
        if !self.ctl.is_open() {
            return Err(TransportError::connection_lost(self.ctl.close_reason()));
        }
        let mut state = self.shared.state.lock().unwrap();
        let reply = match operation {
            "createAddress" => {
                let name = params[0].as_str().unwrap_or_default().to_string();
                let routing: HashSet<RoutingType> = params[1]
                    .as_str()
                    .unwrap_or_default()
                    .split(',')
                    .filter_map(|r| match r {
                        "ANYCAST" => Some(RoutingType::Anycast),
                        "MULTICAST" => Some(RoutingType::Multicast),
                        _ => None,
                    })
                    .collect();
                if state.addresses.contains_key(&name) {
                    Self::failure(format!("Address already exists: {name}"))
                } else {
                    state.addresses.insert(name.clone(), routing);
                    Self::success(json!([name]))
                }
            }
            "createQueue" => {
                let spec: serde_json::Value = params[0]
                    .as_str()
                    .and_then(|raw| serde_json::from_str(raw).ok())
                    .unwrap_or_else(|| params[0].clone());
                let name = spec["name"].as_str().unwrap_or_default().to_string();
                let address = spec["address"].as_str().unwrap_or(&name).to_string();
                let auto_create = spec["autoCreateAddress"].as_bool().unwrap_or(false);
                let routing = match spec["routingType"].as_str() {
                    Some("MULTICAST") => RoutingType::Multicast,
                    _ => RoutingType::Anycast,
                };
                if state.queues.contains_key(&name) {
                    Self::failure(format!("Queue already exists: {name}"))
                } else if !state.addresses.contains_key(&address) && !auto_create {
                    Self::failure(format!("AddressDoesNotExist: {address}"))
                } else {
                    state.ensure_queue(&address, &name, routing);
                    Self::success(json!([name]))
                }
            }
            "getAddressNames" => {
                let mut names: Vec<String> = state.addresses.keys().cloned().collect();
                names.sort();
                Self::success(json!([names]))
            }
            "getQueueNames" => {
                let mut names: Vec<String> = state.queues.keys().cloned().collect();
                names.sort();
                Self::success(json!([names]))
            }
            other => Self::failure(format!("Operation {other} is not supported")),
        };
        Ok(reply)
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::super::TransportErrorKind;
    use super::*;

    fn sender_options(address: &str) -> SenderOptions {
        SenderOptions {
            link_name: "test-sender".into(),
            address: address.into(),
            queue: None,
            capabilities: vec!["queue"],
            presettled: false,
        }
    }

    fn receiver_options(address: &str, credit: u32) -> ReceiverOptions {
        ReceiverOptions {
            link_name: "test-receiver".into(),
            address: address.into(),
            queue: None,
            capabilities: vec!["queue"],
            initial_credit: credit,
        }
    }

    async fn open_session(broker: &MockBroker) -> Box<dyn TransportSession> {
        let endpoint = Endpoint::parse("amqp://localhost:5672").unwrap();
        broker.connector().open(&endpoint).await.unwrap()
    }

    #[tokio::test]
    async fn send_and_receive_fifo() {
        let broker = MockBroker::new();
        let session = open_session(&broker).await;
        let sender = session.open_sender(sender_options("orders")).await.unwrap();
        let receiver = session
            .open_receiver(receiver_options("orders", 10))
            .await
            .unwrap();

        for i in 0..3i32 {
            sender.send(i as u64 + 1, Message::new(i)).await.unwrap();
        }
        for i in 0..3i32 {
            let delivery = receiver.receive().await.unwrap();
            assert_eq!(delivery.message.body_as::<i32>(), i);
            receiver.accept(delivery.tag).await.unwrap();
        }
        assert_eq!(broker.queue_depth("orders"), 0);
        assert_eq!(broker.in_flight_count("orders"), 0);
    }

    #[tokio::test]
    async fn credit_limits_deliveries() {
        let broker = MockBroker::new();
        broker.seed("orders", Message::new(1i32));
        broker.seed("orders", Message::new(2i32));

        let session = open_session(&broker).await;
        let receiver = session
            .open_receiver(receiver_options("orders", 1))
            .await
            .unwrap();

        let first = receiver.receive().await.unwrap();
        assert_eq!(first.message.body_as::<i32>(), 1);
        // Credit exhausted; the second message stays queued.
        assert_eq!(broker.queue_depth("orders"), 1);

        receiver.accept(first.tag).await.unwrap();
        receiver.add_credit(1).await.unwrap();
        let second = receiver.receive().await.unwrap();
        assert_eq!(second.message.body_as::<i32>(), 2);
    }

    #[tokio::test]
    async fn unacked_deliveries_requeue_on_drop() {
        let broker = MockBroker::new();
        broker.seed("orders", Message::new("a"));
        broker.seed("orders", Message::new("b"));

        let session = open_session(&broker).await;
        let receiver = session
            .open_receiver(receiver_options("orders", 10))
            .await
            .unwrap();
        let first = receiver.receive().await.unwrap();
        let _second = receiver.receive().await.unwrap();
        receiver.accept(first.tag).await.unwrap();

        broker.drop_connections();
        assert!(receiver.receive().await.is_err());
        // Only the unacked message goes back, at the front.
        assert_eq!(broker.queue_depth("orders"), 1);

        let session = open_session(&broker).await;
        let receiver = session
            .open_receiver(receiver_options("orders", 10))
            .await
            .unwrap();
        let redelivered = receiver.receive().await.unwrap();
        assert_eq!(redelivered.message.body_as::<String>(), "b");
    }

    #[tokio::test]
    async fn offline_broker_refuses_connects() {
        let broker = MockBroker::new();
        broker.set_online(false);
        let endpoint = Endpoint::parse("amqp://localhost:5672").unwrap();
        let err = match broker.connector().open(&endpoint).await {
            Err(e) => e,
            Ok(_) => panic!("expected connect to fail while broker is offline"),
        };
        assert_eq!(err.kind, TransportErrorKind::ConnectFailed);
        assert_eq!(broker.connect_count(), 1);
    }

    #[tokio::test]
    async fn management_create_address_twice_conflicts() {
        let broker = MockBroker::new();
        let session = open_session(&broker).await;
        let mgmt = session.open_management().await.unwrap();

        let first = mgmt
            .request("createAddress", json!(["a", "ANYCAST"]))
            .await
            .unwrap();
        assert!(first.success);

        let second = mgmt
            .request("createAddress", json!(["a", "MULTICAST"]))
            .await
            .unwrap();
        assert!(!second.success);
        assert!(second.body.contains("Address already exists"));
    }

    #[tokio::test]
    async fn multicast_copies_to_all_bound_queues() {
        let broker = MockBroker::new();
        broker.install_queue("events", "audit", RoutingType::Multicast);
        broker.install_queue("events", "billing", RoutingType::Multicast);

        let session = open_session(&broker).await;
        let sender = session.open_sender(sender_options("events")).await.unwrap();
        sender.send(1, Message::new("hello")).await.unwrap();

        assert_eq!(broker.queue_depth("audit"), 1);
        assert_eq!(broker.queue_depth("billing"), 1);
    }
}
