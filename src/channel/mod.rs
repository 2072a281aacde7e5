//! Per-connection channel orchestration.
//!
//! A [`Channel`] owns one duplex byte stream to a peer and everything that
//! hangs off it: the framer that reads validated wire frames, a dispatch
//! table that decodes known commands, one subscriber queue per message
//! variant, three liveness deadlines, and the one-shot shutdown protocol
//! that fans a terminal code out to every outstanding subscriber.
//!
//! Inbound bytes flow framer → per-command parser → typed subscriber →
//! application handler. Any transport or framing failure, and any
//! expiration or inactivity deadline fire, stops the channel; there is no
//! recovery at this layer.

mod configuration;
mod tcp;

pub use configuration::{
    ChannelTimeouts, DEFAULT_EXPIRATION, DEFAULT_INACTIVITY, DEFAULT_REVIVAL,
};
pub use tcp::TcpChannel;

use crate::deadline::{Deadline, DeadlineEvent};
use crate::error::ChannelError;
use crate::framer::{Frame, Framer};
use crate::loader::{LoadResult, PayloadParser, StreamLoader};
use crate::message::{MessageHeader, HEADER_SIZE};
use crate::subscriber::Subscriber;
use bitcoin::consensus::{self, Decodable};
use bitcoin::p2p::address::Address;
use bitcoin::p2p::message::{NetworkMessage, RawNetworkMessage};
use bitcoin::p2p::message_blockdata::{GetBlocksMessage, Inventory};
use bitcoin::p2p::message_network::VersionMessage;
use bitcoin::p2p::Magic;
use bitcoin::{Block, Transaction};
use log::{debug, info, warn};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, Notify};

type RevivalHandler = Arc<dyn Fn() + Send + Sync>;

/// One subscriber queue per supported message variant, plus the raw frame
/// and stop queues.
struct MessageSubscribers {
    version: Arc<Subscriber<VersionMessage>>,
    verack: Arc<Subscriber<()>>,
    address: Arc<Subscriber<Vec<(u32, Address)>>>,
    get_address: Arc<Subscriber<()>>,
    inventory: Arc<Subscriber<Vec<Inventory>>>,
    get_data: Arc<Subscriber<Vec<Inventory>>>,
    get_blocks: Arc<Subscriber<GetBlocksMessage>>,
    transaction: Arc<Subscriber<Transaction>>,
    block: Arc<Subscriber<Block>>,
    ping: Arc<Subscriber<u64>>,
    pong: Arc<Subscriber<u64>>,
    raw: Arc<Subscriber<(MessageHeader, Vec<u8>)>>,
    stop: Arc<Subscriber<ChannelError>>,
}

impl MessageSubscribers {
    fn new() -> Self {
        Self {
            version: Arc::new(Subscriber::new()),
            verack: Arc::new(Subscriber::new()),
            address: Arc::new(Subscriber::new()),
            get_address: Arc::new(Subscriber::new()),
            inventory: Arc::new(Subscriber::new()),
            get_data: Arc::new(Subscriber::new()),
            get_blocks: Arc::new(Subscriber::new()),
            transaction: Arc::new(Subscriber::new()),
            block: Arc::new(Subscriber::new()),
            ping: Arc::new(Subscriber::new()),
            pong: Arc::new(Subscriber::new()),
            raw: Arc::new(Subscriber::new()),
            stop: Arc::new(Subscriber::new()),
        }
    }
}

/// Build a parser that decodes a consensus-encoded payload and relays the
/// outcome on its bound subscriber.
fn decode_relay<T>(subscriber: Arc<Subscriber<T>>) -> PayloadParser
where
    T: Decodable + Clone + Send + 'static,
{
    Box::new(move |payload| match consensus::deserialize_partial::<T>(payload) {
        Ok((message, consumed)) => {
            subscriber.relay(Ok(message));
            Some(consumed)
        }
        Err(_) => {
            subscriber.relay(Err(ChannelError::BadStream));
            None
        }
    })
}

/// Build a parser for commands whose payload carries no data.
fn empty_relay(subscriber: Arc<Subscriber<()>>) -> PayloadParser {
    Box::new(move |_payload| {
        subscriber.relay(Ok(()));
        Some(0)
    })
}

fn establish_relays(subscribers: &MessageSubscribers) -> StreamLoader {
    let mut loader = StreamLoader::new();
    loader.add("version", decode_relay(subscribers.version.clone()));
    loader.add("verack", empty_relay(subscribers.verack.clone()));
    loader.add("addr", decode_relay(subscribers.address.clone()));
    loader.add("getaddr", empty_relay(subscribers.get_address.clone()));
    loader.add("inv", decode_relay(subscribers.inventory.clone()));
    loader.add("getdata", decode_relay(subscribers.get_data.clone()));
    loader.add("getblocks", decode_relay(subscribers.get_blocks.clone()));
    loader.add("tx", decode_relay(subscribers.transaction.clone()));
    loader.add("block", decode_relay(subscribers.block.clone()));
    loader.add("ping", decode_relay(subscribers.ping.clone()));
    loader.add("pong", decode_relay(subscribers.pong.clone()));
    loader
}

/// A channel to one peer over a duplex byte stream.
///
/// The channel is created around the two halves of a connected stream and
/// handed out as an [`Arc`]; the read task and the timer tasks share it.
/// [`Channel::start`] spawns the read task and arms the three deadlines:
///
/// * **expiration**: total channel lifetime, drawn from ±40% around the
///   configured duration;
/// * **inactivity**: rearmed on every completed inbound read step, so it
///   measures inbound silence only;
/// * **revival**: rearmed only by [`Channel::reset_revival`]; its fire
///   invokes the installed revival handler, letting the layer above drive
///   periodic requests.
///
/// Consumers observe the channel exclusively through subscriptions. Each
/// subscription is one-shot: a handler sees the next occurrence of its
/// variant and must resubscribe to keep listening. When the channel stops,
/// every typed subscriber is drained with [`ChannelError::Stopped`] while
/// the raw and stop subscribers receive the actual cause.
pub struct Channel<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    magic: Magic,
    timeouts: ChannelTimeouts,
    /// Remote endpoint, cleared once the socket is shut down.
    address: StdMutex<Option<SocketAddr>>,
    /// The single once-only stop latch. May be read off-task; everything
    /// else is reached through its own lock.
    stopped: AtomicBool,
    /// Wakes the read task out of a pending read during shutdown.
    stop_notify: Notify,
    /// Reader half, taken by the first `start`.
    reader: StdMutex<Option<R>>,
    /// Writer half. The lock serializes outbound frames.
    writer: Mutex<W>,
    expiration: Deadline,
    inactivity: Deadline,
    revival: Deadline,
    revival_handler: StdMutex<Option<RevivalHandler>>,
    subscribers: MessageSubscribers,
    loader: StreamLoader,
}

impl<R, W> Channel<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Create a channel around the halves of a connected stream.
    ///
    /// `address` is the remote endpoint if the transport knows one; it is
    /// used for logging and [`Channel::address`]. The channel does nothing
    /// until [`Channel::start`] is called.
    pub fn new(
        magic: Magic,
        timeouts: ChannelTimeouts,
        address: Option<SocketAddr>,
        reader: R,
        writer: W,
    ) -> Arc<Self> {
        let subscribers = MessageSubscribers::new();
        let loader = establish_relays(&subscribers);

        Arc::new(Self {
            magic,
            timeouts,
            address: StdMutex::new(address),
            stopped: AtomicBool::new(false),
            stop_notify: Notify::new(),
            reader: StdMutex::new(Some(reader)),
            writer: Mutex::new(writer),
            expiration: Deadline::new(timeouts.expiration),
            inactivity: Deadline::new(timeouts.inactivity),
            revival: Deadline::new(timeouts.revival),
            revival_handler: StdMutex::new(None),
            subscribers,
            loader,
        })
    }

    /// Begin reading frames and arm the deadlines.
    ///
    /// Idempotent; only the first call has an effect. Must be called from
    /// within a tokio runtime.
    pub fn start(self: &Arc<Self>) {
        let reader = {
            self.reader
                .lock()
                .expect("reader slot poisoned")
                .take()
        };
        let reader = match reader {
            Some(reader) => reader,
            None => return,
        };

        self.start_timers();
        let channel = Arc::clone(self);
        tokio::spawn(async move { channel.read_loop(reader).await });
    }

    /// True once the channel has begun shutting down.
    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// The remote endpoint, or `None` once the socket is gone.
    pub fn address(&self) -> Option<SocketAddr> {
        *self.address.lock().expect("address poisoned")
    }

    /// Stop the channel with `reason`.
    ///
    /// Exactly one call runs the shutdown sequence; later calls are no-ops
    /// and their reason is discarded. The deadlines are canceled, the
    /// socket is shut down (errors swallowed), typed subscribers are
    /// drained with [`ChannelError::Stopped`], and the raw and stop
    /// subscribers receive `reason`.
    pub async fn stop(&self, reason: ChannelError) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        self.clear_timers();
        self.stop_notify.notify_waiters();

        {
            let mut writer = self.writer.lock().await;
            let _ = writer.shutdown().await;
        }
        *self.address.lock().expect("address poisoned") = None;

        self.clear_subscriptions(reason);
    }

    /// Send a typed message, framed with this channel's magic.
    pub async fn send(&self, message: NetworkMessage) -> Result<(), ChannelError> {
        if self.stopped() {
            return Err(ChannelError::Stopped);
        }

        let command = message.command();
        let bytes = consensus::serialize(&RawNetworkMessage::new(self.magic, message));
        debug!(
            "Send {} [{}] ({} bytes)",
            command,
            self.describe_address(),
            bytes.len()
        );
        self.write(&bytes).await
    }

    /// Send a caller-built header followed by its payload.
    ///
    /// The two are serialized into one buffer and written under the writer
    /// lock, so concurrent sends never interleave on the wire. The caller
    /// is responsible for a header that actually describes `payload`.
    pub async fn send_raw(
        &self,
        header: &MessageHeader,
        payload: &[u8],
    ) -> Result<(), ChannelError> {
        if self.stopped() {
            return Err(ChannelError::Stopped);
        }

        let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
        bytes.extend_from_slice(&header.to_bytes());
        bytes.extend_from_slice(payload);
        debug!(
            "Send {} [{}] ({} bytes)",
            header.command,
            self.describe_address(),
            payload.len()
        );
        self.write(&bytes).await
    }

    /// Rearm the revival deadline from now. No-op after stop.
    pub fn reset_revival(self: &Arc<Self>) {
        if self.stopped() {
            return;
        }
        self.start_revival();
    }

    /// Install or replace the handler invoked when the revival deadline
    /// fires. No-op after stop.
    pub fn set_revival_handler(&self, handler: impl Fn() + Send + Sync + 'static) {
        if self.stopped() {
            return;
        }
        *self.revival_handler.lock().expect("revival handler poisoned") = Some(Arc::new(handler));
    }

    pub fn subscribe_version(
        &self,
        handler: impl FnOnce(Result<VersionMessage, ChannelError>) + Send + 'static,
    ) {
        self.subscribers.version.subscribe(handler);
    }

    pub fn subscribe_verack(
        &self,
        handler: impl FnOnce(Result<(), ChannelError>) + Send + 'static,
    ) {
        self.subscribers.verack.subscribe(handler);
    }

    pub fn subscribe_address(
        &self,
        handler: impl FnOnce(Result<Vec<(u32, Address)>, ChannelError>) + Send + 'static,
    ) {
        self.subscribers.address.subscribe(handler);
    }

    pub fn subscribe_get_address(
        &self,
        handler: impl FnOnce(Result<(), ChannelError>) + Send + 'static,
    ) {
        self.subscribers.get_address.subscribe(handler);
    }

    pub fn subscribe_inventory(
        &self,
        handler: impl FnOnce(Result<Vec<Inventory>, ChannelError>) + Send + 'static,
    ) {
        self.subscribers.inventory.subscribe(handler);
    }

    pub fn subscribe_get_data(
        &self,
        handler: impl FnOnce(Result<Vec<Inventory>, ChannelError>) + Send + 'static,
    ) {
        self.subscribers.get_data.subscribe(handler);
    }

    pub fn subscribe_get_blocks(
        &self,
        handler: impl FnOnce(Result<GetBlocksMessage, ChannelError>) + Send + 'static,
    ) {
        self.subscribers.get_blocks.subscribe(handler);
    }

    pub fn subscribe_transaction(
        &self,
        handler: impl FnOnce(Result<Transaction, ChannelError>) + Send + 'static,
    ) {
        self.subscribers.transaction.subscribe(handler);
    }

    pub fn subscribe_block(
        &self,
        handler: impl FnOnce(Result<Block, ChannelError>) + Send + 'static,
    ) {
        self.subscribers.block.subscribe(handler);
    }

    pub fn subscribe_ping(
        &self,
        handler: impl FnOnce(Result<u64, ChannelError>) + Send + 'static,
    ) {
        self.subscribers.ping.subscribe(handler);
    }

    pub fn subscribe_pong(
        &self,
        handler: impl FnOnce(Result<u64, ChannelError>) + Send + 'static,
    ) {
        self.subscribers.pong.subscribe(handler);
    }

    /// Subscribe to the next validated frame, before typed dispatch.
    pub fn subscribe_raw(
        &self,
        handler: impl FnOnce(Result<(MessageHeader, Vec<u8>), ChannelError>) + Send + 'static,
    ) {
        self.subscribers.raw.subscribe(handler);
    }

    /// Subscribe to the terminal stop notification.
    ///
    /// Fires exactly once if the channel ever stops, with the cause. On an
    /// already-stopped channel the handler runs synchronously with
    /// [`ChannelError::Stopped`].
    pub fn subscribe_stop(&self, handler: impl FnOnce(ChannelError) + Send + 'static) {
        self.subscribers.stop.subscribe(move |result| match result {
            Ok(reason) | Err(reason) => handler(reason),
        });
    }

    async fn read_loop(self: Arc<Self>, reader: R) {
        let mut framer = Framer::new(self.magic, reader);
        while !self.stopped() {
            let channel = &self;
            let result = tokio::select! {
                _ = self.stop_notify.notified() => break,
                result = framer.read_frame(|| channel.start_inactivity()) => result,
            };

            match result {
                Ok(frame) => self.handle_frame(frame),
                Err(ChannelError::BadStream) => {
                    warn!("Invalid data on stream [{}]", self.describe_address());
                    self.stop(ChannelError::BadStream).await;
                    break;
                }
                Err(reason) => {
                    debug!("Channel failure [{}]: {}", self.describe_address(), reason);
                    self.stop(reason).await;
                    break;
                }
            }
        }
    }

    fn handle_frame(self: &Arc<Self>, frame: Frame) {
        debug!(
            "Receive {} [{}] ({} bytes)",
            frame.header.command,
            self.describe_address(),
            frame.header.payload_length
        );

        // The raw relay carries the frame before any typed dispatch, so a
        // raw subscriber observes every message the channel accepts.
        self.subscribers
            .raw
            .relay(Ok((frame.header.clone(), frame.payload.clone())));
        self.start_inactivity();

        match self.loader.load(&frame.header.command, &frame.payload) {
            LoadResult::Loaded { unused } if unused > 0 => {
                warn!(
                    "Valid message [{}] handled, unused bytes remain in payload",
                    frame.header.command
                );
            }
            LoadResult::Loaded { .. } => {}
            LoadResult::Unloaded => {
                debug!(
                    "Unknown command [{}] from [{}]",
                    frame.header.command,
                    self.describe_address()
                );
            }
        }
    }

    fn start_timers(self: &Arc<Self>) {
        if self.stopped() {
            return;
        }
        self.start_expiration();
        self.start_revival();
        self.start_inactivity();
    }

    fn start_expiration(self: &Arc<Self>) {
        if self.stopped() {
            return;
        }
        let duration = self.timeouts.randomized_expiration();
        let channel = Arc::downgrade(self);
        self.expiration.start_with(duration, move |event| {
            if let Some(channel) = channel.upgrade() {
                channel.handle_expiration(event);
            }
        });
    }

    fn start_inactivity(self: &Arc<Self>) {
        if self.stopped() {
            return;
        }
        let channel = Arc::downgrade(self);
        self.inactivity.start(move |event| {
            if let Some(channel) = channel.upgrade() {
                channel.handle_inactivity(event);
            }
        });
    }

    fn start_revival(self: &Arc<Self>) {
        if self.stopped() {
            return;
        }
        let channel = Arc::downgrade(self);
        self.revival.start(move |event| {
            if let Some(channel) = channel.upgrade() {
                channel.handle_revival(event);
            }
        });
    }

    fn handle_expiration(self: Arc<Self>, event: DeadlineEvent) {
        if self.stopped() || event.is_canceled() {
            return;
        }
        info!("Channel lifetime expired [{}]", self.describe_address());
        tokio::spawn(async move { self.stop(ChannelError::Timeout).await });
    }

    fn handle_inactivity(self: Arc<Self>, event: DeadlineEvent) {
        if self.stopped() || event.is_canceled() {
            return;
        }
        info!("Channel inactivity timeout [{}]", self.describe_address());
        tokio::spawn(async move { self.stop(ChannelError::Timeout).await });
    }

    fn handle_revival(self: Arc<Self>, event: DeadlineEvent) {
        if self.stopped() || event.is_canceled() {
            return;
        }
        let handler = self
            .revival_handler
            .lock()
            .expect("revival handler poisoned")
            .clone();
        if let Some(handler) = handler {
            handler();
        }
    }

    fn clear_timers(&self) {
        self.expiration.cancel();
        self.inactivity.cancel();
        self.revival.cancel();
        *self.revival_handler.lock().expect("revival handler poisoned") = None;
    }

    fn clear_subscriptions(&self, reason: ChannelError) {
        self.subscribers.version.stop(ChannelError::Stopped);
        self.subscribers.verack.stop(ChannelError::Stopped);
        self.subscribers.address.stop(ChannelError::Stopped);
        self.subscribers.get_address.stop(ChannelError::Stopped);
        self.subscribers.inventory.stop(ChannelError::Stopped);
        self.subscribers.get_data.stop(ChannelError::Stopped);
        self.subscribers.get_blocks.stop(ChannelError::Stopped);
        self.subscribers.transaction.stop(ChannelError::Stopped);
        self.subscribers.block.stop(ChannelError::Stopped);
        self.subscribers.ping.stop(ChannelError::Stopped);
        self.subscribers.pong.stop(ChannelError::Stopped);

        // Pending raw and stop subscribers learn the actual cause; anyone
        // subscribing from now on is told the channel is stopped.
        self.subscribers.raw.relay(Err(reason));
        self.subscribers.raw.stop(ChannelError::Stopped);
        self.subscribers.stop.relay(Ok(reason));
        self.subscribers.stop.stop(ChannelError::Stopped);
    }

    async fn write(&self, bytes: &[u8]) -> Result<(), ChannelError> {
        let mut writer = self.writer.lock().await;
        if self.stopped() {
            return Err(ChannelError::Stopped);
        }
        writer.write_all(bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    fn describe_address(&self) -> String {
        match self.address() {
            Some(address) => address.to_string(),
            None => String::from("unknown"),
        }
    }
}

impl<R, W> fmt::Display for Channel<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel [{}]", self.describe_address())
    }
}
