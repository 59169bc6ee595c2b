//! TCP transport.
//!
//! Each connection opens with a symmetric hello that binds the stream to a
//! peer identity and the address the remote node listens on:
//!
//! ```text
//! [magic: u32 BE][peer id: 32 bytes][addr len: u16 BE][addr: UTF-8]
//! ```
//!
//! The peer id in a hello is taken as claimed. Nothing proves the remote
//! holds the key behind it, so any node can present any identity,
//! including one already in use or one on an allow-list. Do not use this
//! transport where identity matters; role admission over it is only as
//! strong as the network it runs on. Traffic is also unencrypted.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::{ConnectionDirection, NetAddress, PeerId};
use crate::events::TransportError;
use crate::ports::{Connection, Transport};

/// Hello magic ("QCOV").
pub const HELLO_MAGIC: u32 = 0x5143_4f56;

/// Longest advertised address accepted in a hello.
const MAX_ADDRESS_LEN: usize = 256;

/// Handshaken connections waiting for `accept`.
const ACCEPT_BACKLOG: usize = 64;

pub struct TcpTransport {
    peer_id: PeerId,
    advertised: NetAddress,
    local_addr: SocketAddr,
    handshake_timeout: Duration,
    incoming: tokio::sync::Mutex<mpsc::Receiver<Connection>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl TcpTransport {
    /// Binds `listen` and starts accepting.
    ///
    /// `advertised` is the address other nodes should dial; it defaults to
    /// the bound socket address.
    ///
    /// # Errors
    ///
    /// Returns error if the socket cannot be bound.
    pub async fn bind(
        listen: &str,
        advertised: Option<NetAddress>,
        peer_id: PeerId,
        handshake_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(listen).await?;
        let local_addr = listener.local_addr()?;
        let advertised = match advertised {
            Some(address) => address,
            None => NetAddress::parse(&local_addr.to_string())
                .map_err(|e| TransportError::Io(e.to_string()))?,
        };
        info!(%local_addr, %advertised, "TCP transport listening");

        let (tx, rx) = mpsc::channel(ACCEPT_BACKLOG);
        let accept_task = tokio::spawn(accept_loop(
            listener,
            tx,
            peer_id,
            advertised.clone(),
            handshake_timeout,
        ));

        Ok(Self {
            peer_id,
            advertised,
            local_addr,
            handshake_timeout,
            incoming: tokio::sync::Mutex::new(rx),
            accept_task: Mutex::new(Some(accept_task)),
        })
    }

    /// Bound socket address (useful with port 0).
    pub fn local_socket_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

async fn accept_loop(
    listener: TcpListener,
    tx: mpsc::Sender<Connection>,
    local_id: PeerId,
    advertised: NetAddress,
    handshake_timeout: Duration,
) {
    loop {
        let (stream, remote) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "TCP accept failed");
                continue;
            }
        };
        let tx = tx.clone();
        let advertised = advertised.clone();
        tokio::spawn(async move {
            let result = tokio::time::timeout(
                handshake_timeout,
                handshake(stream, local_id, &advertised, ConnectionDirection::Inbound),
            )
            .await;
            match result {
                Ok(Ok(conn)) => {
                    if tx.send(conn).await.is_err() {
                        debug!(%remote, "Transport closed during handshake");
                    }
                }
                Ok(Err(e)) => debug!(%remote, error = %e, "Inbound handshake failed"),
                Err(_) => debug!(%remote, "Inbound handshake timed out"),
            }
        });
    }
}

fn encode_hello(peer_id: PeerId, advertised: &NetAddress) -> Vec<u8> {
    let address = advertised.as_str().as_bytes();
    let mut hello = Vec::with_capacity(4 + 32 + 2 + address.len());
    hello.extend_from_slice(&HELLO_MAGIC.to_be_bytes());
    hello.extend_from_slice(peer_id.as_bytes());
    hello.extend_from_slice(&(address.len() as u16).to_be_bytes());
    hello.extend_from_slice(address);
    hello
}

async fn read_hello(stream: &mut TcpStream) -> Result<(PeerId, NetAddress), TransportError> {
    let magic = stream.read_u32().await?;
    if magic != HELLO_MAGIC {
        return Err(TransportError::Handshake(format!("bad magic {magic:#010x}")));
    }
    let mut id = [0u8; 32];
    stream.read_exact(&mut id).await?;
    let len = stream.read_u16().await? as usize;
    if len > MAX_ADDRESS_LEN {
        return Err(TransportError::Handshake(format!("address too long ({len})")));
    }
    let mut address = vec![0u8; len];
    stream.read_exact(&mut address).await?;
    let address = String::from_utf8(address)
        .map_err(|_| TransportError::Handshake("address is not UTF-8".into()))?;
    let address =
        NetAddress::parse(&address).map_err(|e| TransportError::Handshake(e.to_string()))?;
    Ok((PeerId::new(id), address))
}

async fn handshake(
    mut stream: TcpStream,
    local_id: PeerId,
    advertised: &NetAddress,
    direction: ConnectionDirection,
) -> Result<Connection, TransportError> {
    stream.set_nodelay(true)?;
    stream.write_all(&encode_hello(local_id, advertised)).await?;
    stream.flush().await?;
    let (peer_id, net_address) = read_hello(&mut stream).await?;

    let (reader, writer) = stream.into_split();
    Ok(Connection {
        peer_id,
        net_address,
        direction,
        reader: Box::new(reader),
        writer: Box::new(writer),
    })
}

#[async_trait]
impl Transport for TcpTransport {
    fn local_peer_id(&self) -> PeerId {
        self.peer_id
    }

    fn local_address(&self) -> NetAddress {
        self.advertised.clone()
    }

    async fn dial(&self, address: &NetAddress) -> Result<Connection, TransportError> {
        let connect = async {
            let stream = TcpStream::connect(address.as_str()).await?;
            let mut conn = handshake(
                stream,
                self.peer_id,
                &self.advertised,
                ConnectionDirection::Outbound,
            )
            .await?;
            // Known under the address we dialed.
            conn.net_address = address.clone();
            Ok::<_, TransportError>(conn)
        };
        tokio::time::timeout(self.handshake_timeout, connect)
            .await
            .map_err(|_| TransportError::Unreachable(address.clone()))?
    }

    async fn accept(&self) -> Result<Connection, TransportError> {
        self.incoming
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::Closed)
    }

    async fn shutdown(&self) {
        if let Some(task) = self.accept_task.lock().take() {
            task.abort();
            info!(address = %self.advertised, "TCP transport stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hello_exchange_over_loopback() {
        let timeout = Duration::from_secs(5);
        let a = TcpTransport::bind("127.0.0.1:0", None, PeerId::new([1; 32]), timeout)
            .await
            .unwrap();
        let b = TcpTransport::bind("127.0.0.1:0", None, PeerId::new([2; 32]), timeout)
            .await
            .unwrap();

        let b_addr = b.local_address();
        let mut outbound = a.dial(&b_addr).await.unwrap();
        let mut inbound = b.accept().await.unwrap();

        assert_eq!(outbound.peer_id, PeerId::new([2; 32]));
        assert_eq!(outbound.net_address, b_addr);
        assert_eq!(inbound.peer_id, PeerId::new([1; 32]));
        assert_eq!(inbound.net_address, a.local_address());
        assert_eq!(inbound.direction, ConnectionDirection::Inbound);

        outbound.writer.write_all(b"frame").await.unwrap();
        let mut buf = [0u8; 5];
        inbound.reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"frame");

        a.shutdown().await;
        b.shutdown().await;
    }

    #[tokio::test]
    async fn test_claimed_identity_adopted_verbatim() {
        let b = TcpTransport::bind("127.0.0.1:0", None, PeerId::new([2; 32]), Duration::from_secs(5))
            .await
            .unwrap();

        // A bare socket claims someone else's identity without any key
        let claimed = PeerId::new([0xEE; 32]);
        let claimed_address = NetAddress::parse("10.9.9.9:7000").unwrap();
        let mut stream = TcpStream::connect(b.local_address().as_str()).await.unwrap();
        stream
            .write_all(&encode_hello(claimed, &claimed_address))
            .await
            .unwrap();

        let inbound = b.accept().await.unwrap();
        assert_eq!(inbound.peer_id, claimed);
        assert_eq!(inbound.net_address, claimed_address);

        b.shutdown().await;
    }

    #[test]
    fn test_hello_layout() {
        let address = NetAddress::parse("10.0.0.1:7000").unwrap();
        let hello = encode_hello(PeerId::new([9; 32]), &address);
        assert_eq!(&hello[..4], &HELLO_MAGIC.to_be_bytes());
        assert_eq!(&hello[36..38], &(13u16).to_be_bytes());
        assert_eq!(&hello[38..], b"10.0.0.1:7000");
    }
}
