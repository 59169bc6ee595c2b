//! # Peer Connection
//!
//! One live connection: its priority queues, claimed role and state, plus
//! the two tasks that move bytes.
//!
//! ```text
//!  send() ──push──→ [lane 0][lane 1]..[lane 7] ──writer task──→ transport
//!                                                               │
//!  engine.handle_packet() ←──reader task── frames ←─────────────┘
//! ```
//!
//! The writer bounds every write call by the detection window. A frame may
//! take longer in total as long as bytes keep moving; a write that makes no
//! progress for a whole window closes the peer as not available.

use parking_lot::{Mutex, RwLock};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Notify};
use tracing::{debug, trace, warn};

use super::p2p::PeerToPeer;
use crate::domain::{
    CloseReason, ConnectionDirection, ConnectionType, ErrorWindow, NetAddress, OverlayConfig,
    Packet, PacketHeader, PeerId, PeerInfo, PeerRole, PeerState, PriorityQueue,
    HEADER_LEN,
};
use crate::events::OverlayError;
use crate::ports::{BoxedReader, BoxedWriter};

/// Outstanding `ConnectionRequest` sent to this peer.
#[derive(Clone, Copy, Debug)]
pub struct PendingRequest {
    pub requested: ConnectionType,
    pub sent_at: Instant,
}

pub struct Peer {
    id: PeerId,
    net_address: NetAddress,
    direction: ConnectionDirection,
    connected_at: Instant,
    role: RwLock<Option<PeerRole>>,
    state: RwLock<PeerState>,
    queue: Mutex<PriorityQueue<Packet>>,
    wake_writer: Notify,
    close_tx: watch::Sender<Option<CloseReason>>,
    pending: Mutex<Option<PendingRequest>>,
    refused_at: Mutex<Option<Instant>>,
    errors: Mutex<ErrorWindow>,
}

impl Peer {
    pub fn new(
        id: PeerId,
        net_address: NetAddress,
        direction: ConnectionDirection,
        config: &OverlayConfig,
    ) -> Self {
        let (close_tx, _) = watch::channel(None);
        Self {
            id,
            net_address,
            direction,
            connected_at: Instant::now(),
            role: RwLock::new(None),
            state: RwLock::new(PeerState::Connecting),
            queue: Mutex::new(PriorityQueue::new(
                config.queue_capacity,
                config.priority_queue_capacity.clone(),
            )),
            wake_writer: Notify::new(),
            close_tx,
            pending: Mutex::new(None),
            refused_at: Mutex::new(None),
            errors: Mutex::new(ErrorWindow::new(
                config.error_window(),
                config.error_threshold,
            )),
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn net_address(&self) -> &NetAddress {
        &self.net_address
    }

    pub fn direction(&self) -> ConnectionDirection {
        self.direction
    }

    /// Node that opened this connection.
    pub fn dialer(&self, local: PeerId) -> PeerId {
        match self.direction {
            ConnectionDirection::Outbound => local,
            ConnectionDirection::Inbound => self.id,
        }
    }

    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Role claimed by the peer, once announced.
    pub fn role(&self) -> Option<PeerRole> {
        *self.role.read()
    }

    pub fn set_role(&self, role: PeerRole) -> Option<PeerRole> {
        self.role.write().replace(role)
    }

    pub fn state(&self) -> PeerState {
        *self.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == PeerState::Connected
    }

    pub(crate) fn mark_connected(&self) {
        let mut state = self.state.write();
        if *state == PeerState::Connecting {
            *state = PeerState::Connected;
        }
    }

    pub fn pending_request(&self) -> Option<PendingRequest> {
        *self.pending.lock()
    }

    pub fn set_pending_request(&self, requested: ConnectionType) {
        *self.pending.lock() = Some(PendingRequest {
            requested,
            sent_at: Instant::now(),
        });
    }

    pub fn take_pending_request(&self) -> Option<PendingRequest> {
        self.pending.lock().take()
    }

    /// Whether the peer refused a parent request within the last `within`.
    pub fn was_refused(&self, within: Duration) -> bool {
        self.refused_at
            .lock()
            .is_some_and(|at| at.elapsed() < within)
    }

    pub fn set_refused(&self) {
        *self.refused_at.lock() = Some(Instant::now());
    }

    /// Counts one handler/decode failure. Returns `true` once the error
    /// rate crosses the threshold.
    pub fn record_error(&self) -> bool {
        self.errors.lock().record()
    }

    /// Enqueues a packet on the lane for `priority`.
    pub fn send(&self, priority: u8, packet: Packet) -> Result<(), OverlayError> {
        if !matches!(self.state(), PeerState::Connecting | PeerState::Connected) {
            return Err(OverlayError::NotAvailable(self.id));
        }
        self.queue
            .lock()
            .push(priority, packet)
            .map_err(|_| OverlayError::QueueOverflow(self.id))?;
        self.wake_writer.notify_one();
        Ok(())
    }

    /// Removes every queued packet.
    pub fn drain_queue(&self) -> Vec<Packet> {
        self.queue.lock().drain()
    }

    /// Starts closing. Returns `false` if the peer was already closing.
    pub fn close(&self, reason: CloseReason) -> bool {
        {
            let mut state = self.state.write();
            if matches!(*state, PeerState::Closing | PeerState::Closed) {
                return false;
            }
            *state = PeerState::Closing;
        }
        self.close_tx.send_replace(Some(reason));
        true
    }

    pub(crate) fn mark_closed(&self) {
        *self.state.write() = PeerState::Closed;
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.close_tx.borrow()
    }

    fn closed_signal(&self) -> watch::Receiver<Option<CloseReason>> {
        self.close_tx.subscribe()
    }

    pub fn info(&self, connection_type: Option<ConnectionType>) -> PeerInfo {
        PeerInfo {
            peer_id: self.id,
            net_address: self.net_address.clone(),
            role: self.role().unwrap_or_default(),
            connection_type,
            direction: self.direction,
            state: self.state(),
        }
    }
}

/// Drains the peer's queues onto the transport.
pub(crate) async fn run_writer(
    peer: Arc<Peer>,
    mut writer: BoxedWriter,
    engine: Arc<PeerToPeer>,
    detection_window: Duration,
) {
    let mut closed = peer.closed_signal();
    loop {
        if closed.borrow().is_some() {
            break;
        }
        let next = peer.queue.lock().pop();
        let packet = match next {
            Some(packet) => packet,
            None => {
                tokio::select! {
                    biased;
                    _ = closed.changed() => break,
                    _ = peer.wake_writer.notified() => {}
                }
                continue;
            }
        };

        let frame = packet.encode();
        tokio::select! {
            biased;
            _ = closed.changed() => {
                engine.report_undelivered(&peer, &packet);
                break;
            }
            result = write_frame(&mut writer, &frame, detection_window) => match result {
                Ok(()) => {
                    trace!(peer = %peer.id, protocol = %packet.protocol, bytes = frame.len(), "Frame written");
                }
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    warn!(
                        peer = %peer.id,
                        window_ms = detection_window.as_millis() as u64,
                        "Drain stalled past detection window"
                    );
                    engine.report_undelivered(&peer, &packet);
                    engine.close_peer(&peer, CloseReason::NotAvailable);
                    break;
                }
                Err(e) => {
                    debug!(peer = %peer.id, error = %e, "Write failed");
                    engine.report_undelivered(&peer, &packet);
                    engine.close_peer(&peer, CloseReason::ConnectionLost);
                    break;
                }
            }
        }
    }
}

/// Writes and flushes `frame`. Fails with `TimedOut` once a single write
/// or the flush moves no bytes for `window`; a slow stream that keeps
/// accepting data is never cut off.
async fn write_frame<W>(writer: &mut W, frame: &[u8], window: Duration) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let stalled = || io::Error::new(io::ErrorKind::TimedOut, "no write progress");
    let mut written = 0;
    while written < frame.len() {
        match tokio::time::timeout(window, writer.write(&frame[written..])).await {
            Ok(Ok(0)) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(Ok(n)) => written += n,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(stalled()),
        }
    }
    tokio::time::timeout(window, writer.flush())
        .await
        .map_err(|_| stalled())?
}

/// Reads frames and hands them to the engine.
pub(crate) async fn run_reader(peer: Arc<Peer>, mut reader: BoxedReader, engine: Arc<PeerToPeer>) {
    let mut closed = peer.closed_signal();
    let max_payload = engine.config().max_payload_bytes;
    loop {
        if closed.borrow().is_some() {
            break;
        }

        let mut header = [0u8; HEADER_LEN];
        tokio::select! {
            biased;
            _ = closed.changed() => break,
            result = reader.read_exact(&mut header) => if let Err(e) = result {
                debug!(peer = %peer.id, error = %e, "Read failed");
                engine.close_peer(&peer, CloseReason::ConnectionLost);
                break;
            }
        }

        // The length field must be trusted to stay in sync with the stream.
        let length = PacketHeader::payload_len(&header);
        if length > max_payload {
            warn!(peer = %peer.id, length, max_payload, "Oversized frame");
            engine.close_peer(&peer, CloseReason::Protocol);
            break;
        }

        let mut payload = vec![0u8; length];
        tokio::select! {
            biased;
            _ = closed.changed() => break,
            result = reader.read_exact(&mut payload) => if let Err(e) = result {
                debug!(peer = %peer.id, error = %e, "Read failed");
                engine.close_peer(&peer, CloseReason::ConnectionLost);
                break;
            }
        }

        match PacketHeader::decode(&header, max_payload) {
            Ok(header) => engine.handle_packet(&peer, header.into_packet(payload)),
            Err(e) => engine.handle_malformed(&peer, &header, e, &payload),
        }
    }
}
