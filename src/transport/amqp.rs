//! Production transport binding over `fe2o3-amqp`.
//!
//! One [`AmqpConnector`] opens one AMQP connection plus one session per
//! [`TransportConnector::open`] call. Links advertise the Artemis
//! routing-type capability (`queue` / `topic`) on their source or target,
//! and fully-qualified queue names use the `address::queue` node address
//! form.
//!
//! Receivers run in manual credit mode so the consumer's prefetch window is
//! enforced by the core, not by the protocol library. Each receiver is
//! driven by a worker task that owns the protocol-level link and serves
//! disposition commands over a channel, so the object-safe [`ReceiverLink`]
//! surface stays `&self`.
//!
//! Connection loss is observed, not subscribed: any operation that hits a
//! connection-level failure marks the shared session control block failed,
//! which cancels the session's closed token and lets the supervisor rebuild.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use fe2o3_amqp::connection::ConnectionHandle;
use fe2o3_amqp::link::receiver::CreditMode;
use fe2o3_amqp::session::SessionHandle;
use fe2o3_amqp::types::definitions::SenderSettleMode;
use fe2o3_amqp::types::messaging::{
    AmqpValue, ApplicationProperties, Body, Header, Message as AmqpMessage, Outcome, Properties,
    Source, Target,
};
use fe2o3_amqp::types::primitives::{
    Array, Binary, SimpleValue, Symbol, Timestamp as AmqpTimestamp, Uuid as AmqpUuid, Value,
};
use ordered_float::OrderedFloat;
use fe2o3_amqp::{Connection, Delivery, Receiver, Sender, Session};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::endpoint::Endpoint;
use crate::message::{Message, MessageBody, Timestamp};

use super::{
    ClosedInfo, DispositionWaiter, InboundDelivery, ManagementLink, ManagementReply, ReceiverLink,
    ReceiverOptions, SendDisposition, SenderLink, SenderOptions, TransportConnector,
    TransportError, TransportSession,
};

/// Artemis management request address.
const MANAGEMENT_ADDRESS: &str = "activemq.management";

/// Upper bound on a single management round trip.
const MANAGEMENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared open/closed control block for a session and its links.
struct FailCtl {
    open: AtomicBool,
    closed: CancellationToken,
    info: StdMutex<Option<ClosedInfo>>,
}

impl FailCtl {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            open: AtomicBool::new(true),
            closed: CancellationToken::new(),
            info: StdMutex::new(None),
        })
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.closed.is_cancelled()
    }

    fn fail(&self, closed_by_peer: bool, error: impl Into<String>) {
        self.open.store(false, Ordering::Release);
        {
            let mut slot = self.info.lock().unwrap();
            if slot.is_none() {
                *slot = Some(ClosedInfo {
                    closed_by_peer,
                    error: Some(error.into()),
                });
            }
        }
        self.closed.cancel();
    }

    fn local_close(&self) {
        self.open.store(false, Ordering::Release);
        {
            let mut slot = self.info.lock().unwrap();
            if slot.is_none() {
                *slot = Some(ClosedInfo {
                    closed_by_peer: false,
                    error: None,
                });
            }
        }
        self.closed.cancel();
    }

    fn reason(&self) -> String {
        self.info
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|i| i.error.clone())
            .unwrap_or_else(|| "connection closed".to_string())
    }
}

fn capability_array(capabilities: &[&'static str]) -> Array<Symbol> {
    Array::from(
        capabilities
            .iter()
            .map(|c| Symbol::from(*c))
            .collect::<Vec<_>>(),
    )
}

fn body_to_value(body: &MessageBody) -> Value {
    match body {
        MessageBody::String(v) => Value::String(v.clone()),
        MessageBody::Char(v) => Value::Char(*v),
        MessageBody::Byte(v) => Value::Byte(*v),
        MessageBody::Short(v) => Value::Short(*v),
        MessageBody::Int(v) => Value::Int(*v),
        MessageBody::Long(v) => Value::Long(*v),
        MessageBody::UByte(v) => Value::Ubyte(*v),
        MessageBody::UShort(v) => Value::Ushort(*v),
        MessageBody::UInt(v) => Value::Uint(*v),
        MessageBody::ULong(v) => Value::Ulong(*v),
        MessageBody::Float(v) => Value::Float(OrderedFloat::from(*v)),
        MessageBody::Double(v) => Value::Double(OrderedFloat::from(*v)),
        MessageBody::Bool(v) => Value::Bool(*v),
        MessageBody::Uuid(v) => Value::Uuid(AmqpUuid::from(*v.as_bytes())),
        MessageBody::Timestamp(v) => {
            Value::Timestamp(AmqpTimestamp::from_milliseconds(v.millis()))
        }
        MessageBody::Binary(v) => Value::Binary(Binary::from(v.clone())),
        MessageBody::List(items) => Value::List(items.iter().map(body_to_value).collect()),
    }
}

fn value_to_body(value: Value) -> Result<MessageBody, TransportError> {
    match value {
        Value::String(v) => Ok(MessageBody::String(v)),
        Value::Char(v) => Ok(MessageBody::Char(v)),
        Value::Byte(v) => Ok(MessageBody::Byte(v)),
        Value::Short(v) => Ok(MessageBody::Short(v)),
        Value::Int(v) => Ok(MessageBody::Int(v)),
        Value::Long(v) => Ok(MessageBody::Long(v)),
        Value::Ubyte(v) => Ok(MessageBody::UByte(v)),
        Value::Ushort(v) => Ok(MessageBody::UShort(v)),
        Value::Uint(v) => Ok(MessageBody::UInt(v)),
        Value::Ulong(v) => Ok(MessageBody::ULong(v)),
        Value::Float(v) => Ok(MessageBody::Float(v.into_inner())),
        Value::Double(v) => Ok(MessageBody::Double(v.into_inner())),
        Value::Bool(v) => Ok(MessageBody::Bool(v)),
        Value::Uuid(v) => Ok(MessageBody::Uuid(Uuid::from_bytes(v.into_inner()))),
        Value::Timestamp(v) => Ok(MessageBody::Timestamp(Timestamp::from_millis(
            v.milliseconds(),
        ))),
        Value::Binary(v) => Ok(MessageBody::Binary(v.into_vec())),
        Value::List(items) => items
            .into_iter()
            .map(value_to_body)
            .collect::<Result<Vec<_>, _>>()
            .map(MessageBody::List),
        other => Err(TransportError::decode(format!(
            "unsupported inbound body type: {other:?}"
        ))),
    }
}

fn decode_delivery_body(body: &Body<Value>) -> Result<MessageBody, TransportError> {
    match body {
        Body::Value(value) => value_to_body(value.0.clone()),
        _ => Err(TransportError::decode(
            "unsupported message body section (expected an amqp-value)",
        )),
    }
}

fn encode_message(message: Message) -> AmqpMessage<AmqpValue<Value>> {
    let mut header = Header::default();
    header.durable = message.durable().unwrap_or(false);
    if let Some(priority) = message.priority() {
        header.priority = priority.into();
    }
    if let Some(ttl) = message.ttl() {
        header.ttl = Some(ttl.as_millis() as u32);
    }
    AmqpMessage::builder()
        .header(header)
        .value(body_to_value(message.body()))
        .build()
}

/// Connector for real brokers.
#[derive(Debug, Clone, Default)]
pub struct AmqpConnector {
    container_id: Option<String>,
}

impl AmqpConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the container id advertised on every connection opened by this
    /// connector (endpoints may still override it).
    pub fn with_container_id(mut self, container_id: impl Into<String>) -> Self {
        self.container_id = Some(container_id.into());
        self
    }
}

#[async_trait]
impl TransportConnector for AmqpConnector {
    async fn open(&self, endpoint: &Endpoint) -> Result<Box<dyn TransportSession>, TransportError> {
        let container_id = endpoint
            .container_id()
            .map(str::to_owned)
            .or_else(|| self.container_id.clone())
            .unwrap_or_else(|| format!("artemis-client-{}", Uuid::new_v4()));

        let url = endpoint.url();
        let mut connection = Connection::open(container_id, url.as_str())
            .await
            .map_err(|e| TransportError::connect_failed(format!("{endpoint}: {e}")))?;

        let session = match Session::begin(&mut connection).await {
            Ok(session) => session,
            Err(e) => {
                let _ = connection.close().await;
                return Err(TransportError::connect_failed(format!("{endpoint}: {e}")));
            }
        };

        debug!(endpoint = %endpoint, "transport session established");
        Ok(Box::new(AmqpSession {
            connection: Mutex::new(Some(connection)),
            session: Mutex::new(Some(session)),
            ctl: FailCtl::new(),
        }))
    }
}

struct AmqpSession {
    connection: Mutex<Option<ConnectionHandle<()>>>,
    session: Mutex<Option<SessionHandle<()>>>,
    ctl: Arc<FailCtl>,
}

impl AmqpSession {
    fn closed_error(&self) -> TransportError {
        TransportError::connection_lost(self.ctl.reason())
    }
}

#[async_trait]
impl TransportSession for AmqpSession {
    async fn open_sender(
        &self,
        options: SenderOptions,
    ) -> Result<Box<dyn SenderLink>, TransportError> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or_else(|| self.closed_error())?;

        let mut target = Target::builder().address(options.node_address()).build();
        target.capabilities = Some(capability_array(&options.capabilities));

        let mut builder = Sender::builder()
            .name(options.link_name.clone())
            .target(target);
        if options.presettled {
            builder = builder.sender_settle_mode(SenderSettleMode::Settled);
        }
        let sender = builder
            .attach(session)
            .await
            .map_err(|e| TransportError::link_detached(format!("sender attach failed: {e}")))?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        tokio::spawn(sender_worker(sender, command_rx, self.ctl.clone()));

        Ok(Box::new(AmqpSenderLink {
            commands: command_tx,
            ctl: self.ctl.clone(),
        }))
    }

    async fn open_receiver(
        &self,
        options: ReceiverOptions,
    ) -> Result<Box<dyn ReceiverLink>, TransportError> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or_else(|| self.closed_error())?;

        let mut source = Source::builder().address(options.node_address()).build();
        source.capabilities = Some(capability_array(&options.capabilities));

        let mut receiver = Receiver::builder()
            .name(options.link_name.clone())
            .source(source)
            .credit_mode(CreditMode::Manual)
            .attach(session)
            .await
            .map_err(|e| TransportError::link_detached(format!("receiver attach failed: {e}")))?;

        if options.initial_credit > 0 {
            receiver
                .set_credit(options.initial_credit)
                .await
                .map_err(|e| TransportError::link_detached(format!("credit grant failed: {e}")))?;
        }

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (delivery_tx, delivery_rx) =
            mpsc::channel(options.initial_credit.max(1) as usize);
        tokio::spawn(receiver_worker(
            receiver,
            command_rx,
            delivery_tx,
            self.ctl.clone(),
            options.initial_credit,
        ));

        Ok(Box::new(AmqpReceiverLink {
            deliveries: Mutex::new(delivery_rx),
            commands: command_tx,
            ctl: self.ctl.clone(),
        }))
    }

    async fn open_management(&self) -> Result<Box<dyn ManagementLink>, TransportError> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or_else(|| self.closed_error())?;

        let sender = Sender::attach(
            session,
            format!("mgmt-sender-{}", Uuid::new_v4()),
            MANAGEMENT_ADDRESS,
        )
        .await
        .map_err(|e| TransportError::management(format!("management attach failed: {e}")))?;

        let reply_address = format!("{MANAGEMENT_ADDRESS}.{}", Uuid::new_v4());
        let receiver = Receiver::builder()
            .name(format!("mgmt-receiver-{}", Uuid::new_v4()))
            .source(Source::builder().address(reply_address.clone()).build())
            .credit_mode(CreditMode::Manual)
            .attach(session)
            .await
            .map_err(|e| TransportError::management(format!("management attach failed: {e}")))?;

        Ok(Box::new(AmqpManagementLink {
            sender: Mutex::new(Some(sender)),
            receiver: Mutex::new(Some(receiver)),
            reply_address,
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
        self.ctl.local_close();
        if let Some(mut session) = self.session.lock().await.take() {
            if let Err(e) = session.end().await {
                debug!("session end reported: {e}");
            }
        }
        if let Some(mut connection) = self.connection.lock().await.take() {
            if let Err(e) = connection.close().await {
                debug!("connection close reported: {e}");
            }
        }
        Ok(())
    }
}

enum SenderCommand {
    Send(
        AmqpMessage<AmqpValue<Value>>,
        oneshot::Sender<Result<SendDisposition, TransportError>>,
    ),
    Close(oneshot::Sender<()>),
}

/// Owns the protocol-level sender: one worker per link, so wire order is
/// command order and the [`SenderLink`] surface never holds link state
/// across a settlement wait.
async fn sender_worker(
    mut sender: Sender,
    mut commands: mpsc::UnboundedReceiver<SenderCommand>,
    ctl: Arc<FailCtl>,
) {
    let mut close_reply: Option<oneshot::Sender<()>> = None;
    while let Some(command) = commands.recv().await {
        match command {
            SenderCommand::Send(message, reply) => {
                let result = match sender.send(message).await {
                    Ok(Outcome::Accepted(_)) => Ok(SendDisposition::Accepted),
                    Ok(Outcome::Rejected(rejected)) => {
                        let reason = rejected
                            .error
                            .map(|e| format!("{e:?}"))
                            .unwrap_or_else(|| "rejected".to_string());
                        Ok(SendDisposition::Rejected(reason))
                    }
                    Ok(_) => Ok(SendDisposition::Released),
                    Err(e) => {
                        let reason = format!("send failed: {e}");
                        ctl.fail(true, reason.clone());
                        Err(TransportError::link_detached(reason))
                    }
                };
                let _ = reply.send(result);
            }
            SenderCommand::Close(reply) => {
                close_reply = Some(reply);
                break;
            }
        }
    }
    if let Err(e) = sender.close().await {
        debug!("sender detach reported: {e}");
    }
    if let Some(reply) = close_reply {
        let _ = reply.send(());
    }
}

struct AmqpSenderLink {
    commands: mpsc::UnboundedSender<SenderCommand>,
    ctl: Arc<FailCtl>,
}

#[async_trait]
impl SenderLink for AmqpSenderLink {
    async fn send(&self, _tag: u64, message: Message) -> Result<DispositionWaiter, TransportError> {
        if !self.ctl.is_open() {
            return Err(TransportError::link_detached(self.ctl.reason()));
        }
        let (reply_tx, waiter) = DispositionWaiter::channel();
        self.commands
            .send(SenderCommand::Send(encode_message(message), reply_tx))
            .map_err(|_| TransportError::link_detached(self.ctl.reason()))?;
        Ok(waiter)
    }

    async fn close(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.commands.send(SenderCommand::Close(reply_tx)).is_ok() {
            let _ = reply_rx.await;
        }
    }
}

enum ReceiverCommand {
    Accept(u64, oneshot::Sender<Result<(), TransportError>>),
    Reject(u64, oneshot::Sender<Result<(), TransportError>>),
    AddCredit(u32, oneshot::Sender<Result<(), TransportError>>),
    Close(oneshot::Sender<()>),
}

/// Owns the protocol-level receiver: pumps deliveries out and serves
/// disposition commands in, on one task.
async fn receiver_worker(
    mut receiver: Receiver,
    mut commands: mpsc::UnboundedReceiver<ReceiverCommand>,
    deliveries: mpsc::Sender<InboundDelivery>,
    ctl: Arc<FailCtl>,
    initial_credit: u32,
) {
    let mut pending: HashMap<u64, Delivery<Body<Value>>> = HashMap::new();
    // Credit the broker still holds; kept in sync so add_credit can re-issue
    // an absolute flow.
    let mut outstanding_credit = initial_credit;
    let mut next_tag: u64 = 0;
    let mut close_reply: Option<oneshot::Sender<()>> = None;

    loop {
        tokio::select! {
            delivery = receiver.recv::<Body<Value>>() => {
                match delivery {
                    Ok(delivery) => {
                        outstanding_credit = outstanding_credit.saturating_sub(1);
                        match decode_delivery_body(delivery.body()) {
                            Ok(body) => {
                                next_tag += 1;
                                let inbound = InboundDelivery {
                                    tag: next_tag,
                                    message: Message::new(body),
                                };
                                pending.insert(next_tag, delivery);
                                if deliveries.send(inbound).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!("discarding undecodable delivery: {e}");
                                if let Err(e) = receiver.reject(&delivery, None).await {
                                    debug!("reject of undecodable delivery failed: {e}");
                                }
                            }
                        }
                    }
                    Err(e) => {
                        ctl.fail(true, format!("receive failed: {e}"));
                        break;
                    }
                }
            }
            command = commands.recv() => {
                match command {
                    Some(ReceiverCommand::Accept(tag, reply)) => {
                        let result = match pending.remove(&tag) {
                            Some(delivery) => receiver.accept(&delivery).await.map_err(|e| {
                                TransportError::link_detached(format!("accept failed: {e}"))
                            }),
                            None => Ok(()),
                        };
                        let _ = reply.send(result);
                    }
                    Some(ReceiverCommand::Reject(tag, reply)) => {
                        let result = match pending.remove(&tag) {
                            Some(delivery) => {
                                receiver.reject(&delivery, None).await.map_err(|e| {
                                    TransportError::link_detached(format!("reject failed: {e}"))
                                })
                            }
                            None => Ok(()),
                        };
                        let _ = reply.send(result);
                    }
                    Some(ReceiverCommand::AddCredit(n, reply)) => {
                        outstanding_credit = outstanding_credit.saturating_add(n);
                        let result = receiver.set_credit(outstanding_credit).await.map_err(|e| {
                            TransportError::link_detached(format!("credit grant failed: {e}"))
                        });
                        let _ = reply.send(result);
                    }
                    Some(ReceiverCommand::Close(reply)) => {
                        close_reply = Some(reply);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    if let Err(e) = receiver.close().await {
        debug!("receiver detach reported: {e}");
    }
    if let Some(reply) = close_reply {
        let _ = reply.send(());
    }
}

struct AmqpReceiverLink {
    deliveries: Mutex<mpsc::Receiver<InboundDelivery>>,
    commands: mpsc::UnboundedSender<ReceiverCommand>,
    ctl: Arc<FailCtl>,
}

impl AmqpReceiverLink {
    async fn command(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<(), TransportError>>) -> ReceiverCommand,
    ) -> Result<(), TransportError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(make(reply_tx))
            .map_err(|_| TransportError::link_detached(self.ctl.reason()))?;
        reply_rx
            .await
            .map_err(|_| TransportError::link_detached(self.ctl.reason()))?
    }
}

#[async_trait]
impl ReceiverLink for AmqpReceiverLink {
    async fn receive(&self) -> Result<InboundDelivery, TransportError> {
        let mut deliveries = self.deliveries.lock().await;
        deliveries
            .recv()
            .await
            .ok_or_else(|| TransportError::link_detached(self.ctl.reason()))
    }

    async fn accept(&self, tag: u64) -> Result<(), TransportError> {
        self.command(|reply| ReceiverCommand::Accept(tag, reply)).await
    }

    async fn reject(&self, tag: u64) -> Result<(), TransportError> {
        self.command(|reply| ReceiverCommand::Reject(tag, reply)).await
    }

    async fn add_credit(&self, n: u32) -> Result<(), TransportError> {
        self.command(|reply| ReceiverCommand::AddCredit(n, reply))
            .await
    }

    async fn close(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.commands.send(ReceiverCommand::Close(reply_tx)).is_ok() {
            let _ = reply_rx.await;
        }
    }
}

struct AmqpManagementLink {
    sender: Mutex<Option<Sender>>,
    receiver: Mutex<Option<Receiver>>,
    reply_address: String,
    ctl: Arc<FailCtl>,
}

#[async_trait]
impl ManagementLink for AmqpManagementLink {
    async fn request(
        &self,
        operation: &str,
        params: serde_json::Value,
    ) -> Result<ManagementReply, TransportError> {
        // One request at a time: both link guards are held for the round
        // trip, which also serializes concurrent topology calls.
        let mut sender_guard = self.sender.lock().await;
        let mut receiver_guard = self.receiver.lock().await;
        let sender = sender_guard
            .as_mut()
            .ok_or_else(|| TransportError::management("management link is closed"))?;
        let receiver = receiver_guard
            .as_mut()
            .ok_or_else(|| TransportError::management("management link is closed"))?;

        let request = AmqpMessage::builder()
            .properties(
                Properties::builder()
                    .reply_to(self.reply_address.clone())
                    .build(),
            )
            .application_properties(
                ApplicationProperties::builder()
                    .insert(
                        "_AMQ_ResourceName",
                        SimpleValue::String("broker".to_string()),
                    )
                    .insert(
                        "_AMQ_OperationName",
                        SimpleValue::String(operation.to_string()),
                    )
                    .build(),
            )
            .value(Value::String(params.to_string()))
            .build();

        receiver
            .set_credit(1)
            .await
            .map_err(|e| TransportError::management(format!("credit grant failed: {e}")))?;

        sender.send(request).await.map_err(|e| {
            let reason = format!("management send failed: {e}");
            self.ctl.fail(true, reason.clone());
            TransportError::management(reason)
        })?;

        let delivery = tokio::time::timeout(MANAGEMENT_TIMEOUT, receiver.recv::<Body<Value>>())
            .await
            .map_err(|_| TransportError::management("management reply timed out"))?
            .map_err(|e| {
                let reason = format!("management receive failed: {e}");
                self.ctl.fail(true, reason.clone());
                TransportError::management(reason)
            })?;

        let body = match decode_delivery_body(delivery.body()) {
            Ok(MessageBody::String(text)) => text,
            Ok(other) => format!("{other:?}"),
            Err(e) => return Err(TransportError::management(e.to_string())),
        };
        if let Err(e) = receiver.accept(&delivery).await {
            debug!("management reply accept failed: {e}");
        }

        // Success replies carry a JSON array body; failures carry the raw
        // broker error text.
        let success = serde_json::from_str::<serde_json::Value>(&body)
            .map(|v| v.is_array())
            .unwrap_or(false);
        Ok(ManagementReply { success, body })
    }

    async fn close(&self) {
        if let Some(sender) = self.sender.lock().await.take() {
            if let Err(e) = sender.close().await {
                debug!("management sender detach reported: {e}");
            }
        }
        if let Some(receiver) = self.receiver.lock().await.take() {
            if let Err(e) = receiver.close().await {
                debug!("management receiver detach reported: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_conversion_round_trips() {
        let bodies = vec![
            MessageBody::String("s".into()),
            MessageBody::Char('c'),
            MessageBody::Byte(-1),
            MessageBody::Short(-2),
            MessageBody::Int(-3),
            MessageBody::Long(-4),
            MessageBody::UByte(1),
            MessageBody::UShort(2),
            MessageBody::UInt(3),
            MessageBody::ULong(4),
            MessageBody::Float(1.25),
            MessageBody::Double(2.5),
            MessageBody::Bool(true),
            MessageBody::Uuid(Uuid::new_v4()),
            MessageBody::Timestamp(Timestamp::from_millis(1_700_000_000_000)),
            MessageBody::Binary(vec![1, 2, 3]),
            MessageBody::List(vec![MessageBody::Int(7), MessageBody::String("x".into())]),
        ];
        for body in bodies {
            let value = body_to_value(&body);
            let back = value_to_body(value).unwrap();
            assert_eq!(back, body);
        }
    }

    #[test]
    fn unsupported_inbound_value_is_a_decode_error() {
        let err = value_to_body(Value::Null).unwrap_err();
        assert_eq!(err.kind, super::super::TransportErrorKind::Decode);
    }

    #[test]
    fn encode_applies_header_attributes() {
        let message = Message::new("x")
            .with_durable(true)
            .with_priority(7)
            .with_ttl(Duration::from_secs(5));
        let encoded = encode_message(message);
        assert!(encoded.header.as_ref().is_some_and(|h| h.durable));
        assert_eq!(
            encoded.header.as_ref().and_then(|h| h.ttl),
            Some(5_000)
        );
    }
}
