//! TCP transport
//!
//! Frames are `MAGIC (4) | length (u32 BE) | JSON message`. A link opens
//! with a handshake:
//!
//! ```text
//! dialer                     listener
//!   | ---- Hello ------------> |   public key, addresses, nonce
//!   | <--- Hello ------------- |
//!   | <--- Auth -------------- |   signature over the dialer's nonce
//!   | ---- Auth -------------> |   signature over the listener's nonce
//!   | <--- Welcome | Reject -- |   after the owner's admission verdict
//! ```
//!
//! A side that cannot sign the other's nonce with the key it announced is
//! dropped before its link is reported. After that both sides exchange
//! numbered `Request`/`Response` frames.

use crate::crypto::{public_key_from_hex, verify_signature, KeyPair};
use crate::network::addr::{advertised_addrs, AddrInfo, PeerAddr};
use crate::network::error::TransportError;
use crate::network::message::{
    challenge, new_nonce, Handshake, Message, RejectReason, Response, MAGIC, PROTOCOL_VERSION,
};
use crate::network::peer_id::PeerId;
use crate::network::slots::Direction;
use crate::network::transport::{
    signalled, Link, LinkDriver, LinkId, Transport, TransportEvent, Verdict, EVENT_CHANNEL_SIZE,
};
use async_trait::async_trait;
use bytes::{Buf, BufMut, BytesMut};
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use secp256k1::PublicKey;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::codec::{Decoder, Encoder, Framed};

/// Upper bound on a single frame's payload
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

/// Time allowed for the whole handshake
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Message codec for length-prefixed framing
pub struct MessageCodec;

impl Encoder<Message> for MessageCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let data = item
            .to_bytes()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;

        // Magic (4) + Length (4) + Data
        dst.reserve(8 + data.len());
        dst.put_slice(&MAGIC);
        dst.put_u32(data.len() as u32);
        dst.put_slice(&data);

        Ok(())
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 8 {
            return Ok(None);
        }

        if src[..4] != MAGIC {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "Invalid magic bytes",
            ));
        }

        let len = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;
        if len > MAX_FRAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Frame of {} bytes exceeds limit", len),
            ));
        }

        if src.len() < 8 + len {
            src.reserve(8 + len - src.len());
            return Ok(None);
        }

        src.advance(8);
        let data = src.split_to(len);

        let msg = Message::from_bytes(&data)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;

        Ok(Some(msg))
    }
}

type Links = Arc<Mutex<HashMap<LinkId, Link>>>;

/// Transport over plain TCP sockets
pub struct TcpTransport {
    keypair: KeyPair,
    local_id: PeerId,
    advertised: Vec<PeerAddr>,
    events: mpsc::Sender<TransportEvent>,
    links: Links,
    shutdown: watch::Sender<bool>,
}

impl TcpTransport {
    /// Bind a listener and start accepting links
    pub async fn bind(
        keypair: KeyPair,
        listen: SocketAddr,
        nat: Option<IpAddr>,
    ) -> Result<(Arc<Self>, mpsc::Receiver<TransportEvent>), TransportError> {
        let listener = TcpListener::bind(listen).await?;
        let bound = listener.local_addr()?;
        log::info!("Server listening on {}", bound);

        let listen_addrs = reachable_addrs(bound);
        let (events, events_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let (shutdown, _) = watch::channel(false);

        let transport = Arc::new(Self {
            local_id: keypair.peer_id(),
            keypair,
            advertised: advertised_addrs(&listen_addrs, nat),
            events,
            links: Arc::new(Mutex::new(HashMap::new())),
            shutdown,
        });

        let accept = Arc::clone(&transport);
        tokio::spawn(async move { accept.accept_loop(listener).await });

        Ok((transport, events_rx))
    }

    fn hello(&self, nonce: &str) -> Message {
        Message::Hello(Handshake::new(
            self.keypair.public_key_hex(),
            self.advertised.iter().map(|a| a.to_string()).collect(),
            nonce.to_string(),
        ))
    }

    /// Prove ownership of our key by signing the remote's nonce
    fn auth(&self, remote_nonce: &str, direction: Direction) -> Result<Message, TransportError> {
        let signature = self
            .keypair
            .sign(&challenge(remote_nonce, direction))
            .map_err(|e| TransportError::Codec(e.to_string()))?;
        Ok(Message::Auth {
            signature: hex::encode(signature),
        })
    }

    fn links(&self) -> std::sync::MutexGuard<'_, HashMap<LinkId, Link>> {
        self.links
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = signalled(&mut shutdown) => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        log::debug!("Incoming connection from {}", addr);
                        let transport = Arc::clone(&self);
                        tokio::spawn(async move {
                            if let Err(e) = transport.handle_inbound(stream, addr).await {
                                log::debug!("Inbound handshake with {} failed: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => log::warn!("Accept error: {}", e),
                },
            }
        }
        log::debug!("Listener stopped");
    }

    async fn handle_inbound(&self, stream: TcpStream, addr: SocketAddr) -> Result<(), TransportError> {
        let mut framed = Framed::new(stream, MessageCodec);
        let nonce = new_nonce();

        let handshake = async {
            let remote = read_hello(&mut framed).await?;
            framed.send(self.hello(&nonce)).await?;
            framed.send(self.auth(&remote.nonce, Direction::Inbound)?).await?;
            read_auth(&mut framed, &remote, &nonce, Direction::Outbound).await?;
            Ok::<_, TransportError>(remote)
        };
        let remote = tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake)
            .await
            .map_err(|_| TransportError::Timeout)??;

        let remote = AddrInfo::new(remote.info.id, observed_addrs(&remote.info.addrs, addr));
        if remote.id == self.local_id {
            framed.send(Message::Reject(RejectReason::SelfConnection)).await?;
            return Err(TransportError::Rejected(RejectReason::SelfConnection));
        }

        let (link, driver) = Link::new(remote.clone(), Direction::Inbound, remote.id);
        let (verdict_tx, verdict_rx) = oneshot::channel();
        self.events
            .send(TransportEvent::Inbound {
                link: link.clone(),
                verdict: verdict_tx,
            })
            .await
            .map_err(|_| TransportError::Closed)?;

        match verdict_rx.await.unwrap_or(Verdict::Reject(RejectReason::ShuttingDown)) {
            Verdict::Accept => {
                if let Err(e) = framed.send(Message::Welcome).await {
                    link.close();
                    let _ = self
                        .events
                        .send(TransportEvent::Closed {
                            peer: remote.id,
                            link: link.id(),
                        })
                        .await;
                    return Err(e.into());
                }
                self.links().insert(link.id(), link.clone());
                drive(framed, link, driver, self.events.clone(), Arc::clone(&self.links)).await;
                Ok(())
            }
            Verdict::Reject(reason) => {
                link.close();
                let _ = framed.send(Message::Reject(reason)).await;
                Err(TransportError::Rejected(reason))
            }
        }
    }

    async fn dial_addr(&self, target: &AddrInfo, addr: PeerAddr) -> Result<Link, TransportError> {
        let stream = TcpStream::connect(addr.socket_addr())
            .await
            .map_err(|e| TransportError::DialFailed(format!("{}: {}", addr, e)))?;
        let mut framed = Framed::new(stream, MessageCodec);

        let nonce = new_nonce();

        framed.send(self.hello(&nonce)).await?;
        let remote = read_hello(&mut framed).await?;
        if remote.info.id != target.id {
            return Err(TransportError::IdentityMismatch {
                expected: target.id,
                actual: remote.info.id,
            });
        }
        read_auth(&mut framed, &remote, &nonce, Direction::Inbound).await?;
        framed.send(self.auth(&remote.nonce, Direction::Outbound)?).await?;

        match read_message(&mut framed).await? {
            Message::Welcome => {}
            Message::Reject(reason) => return Err(TransportError::Rejected(reason)),
            other => {
                return Err(TransportError::Codec(format!(
                    "unexpected {} during handshake",
                    other.type_name()
                )))
            }
        }

        let (link, driver) = Link::new(target.clone(), Direction::Outbound, self.local_id);
        self.links().insert(link.id(), link.clone());
        tokio::spawn(drive(
            framed,
            link.clone(),
            driver,
            self.events.clone(),
            Arc::clone(&self.links),
        ));
        Ok(link)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn local_id(&self) -> PeerId {
        self.local_id
    }

    fn listen_addrs(&self) -> Vec<PeerAddr> {
        self.advertised.clone()
    }

    async fn dial(&self, target: &AddrInfo) -> Result<Link, TransportError> {
        let first = target
            .dial_addr()
            .ok_or(TransportError::NoDialableAddress(target.id))?;
        let rest = target.addrs.iter().copied().filter(|a| *a != first);

        let mut last_err = TransportError::NoDialableAddress(target.id);
        for addr in std::iter::once(first).chain(rest) {
            let attempt = tokio::time::timeout(HANDSHAKE_TIMEOUT, self.dial_addr(target, addr));
            match attempt.await {
                Ok(Ok(link)) => return Ok(link),
                // A definitive answer from the right host ends the attempt
                Ok(Err(e @ TransportError::Rejected(_))) => return Err(e),
                Ok(Err(e)) => last_err = e,
                Err(_) => last_err = TransportError::Timeout,
            }
        }
        Err(last_err)
    }

    fn connected_peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.links().values().map(|l| l.remote_id()).collect();
        peers.sort();
        peers.dedup();
        peers
    }

    async fn close(&self) {
        self.shutdown.send_replace(true);
        let links: Vec<Link> = self.links().values().cloned().collect();
        for link in links {
            link.close();
        }
    }
}

/// Addresses a listener bound at `bound` can be dialed at. An unspecified
/// bind is reachable through the host's routed interface (when it has one)
/// and through loopback.
pub fn reachable_addrs(bound: SocketAddr) -> Vec<PeerAddr> {
    if !bound.ip().is_unspecified() {
        return vec![PeerAddr::from(bound)];
    }
    let mut addrs = Vec::new();
    if let Some(ip) = routed_ip(bound.is_ipv6()) {
        addrs.push(PeerAddr::new(ip, bound.port()));
    }
    addrs.push(PeerAddr::from(dialable(bound)));
    addrs
}

/// IP of the interface the default route leaves through. Connecting a UDP
/// socket only selects the route; nothing is sent.
fn routed_ip(ipv6: bool) -> Option<IpAddr> {
    let (local, remote) = if ipv6 {
        ("[::]:0", "[2001:4860:4860::8888]:53")
    } else {
        ("0.0.0.0:0", "8.8.8.8:53")
    };
    let socket = std::net::UdpSocket::bind(local).ok()?;
    socket.connect(remote).ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_loopback() && !ip.is_unspecified()).then_some(ip)
}

/// The addresses a remote announced, with loopback or unspecified IPs
/// replaced by the IP its connection came from. Ports are kept.
fn observed_addrs(announced: &[PeerAddr], observed: SocketAddr) -> Vec<PeerAddr> {
    if announced.is_empty() {
        return vec![PeerAddr::from(observed)];
    }
    if observed.ip().is_loopback() {
        return announced.to_vec();
    }
    let mut addrs: Vec<PeerAddr> = Vec::with_capacity(announced.len());
    for addr in announced {
        let addr = if addr.is_loopback() || addr.ip.is_unspecified() {
            PeerAddr::new(observed.ip(), addr.port)
        } else {
            *addr
        };
        if !addrs.contains(&addr) {
            addrs.push(addr);
        }
    }
    addrs
}

/// Replace an unspecified bind address with loopback so it can be dialed
fn dialable(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => SocketAddr::new(Ipv4Addr::LOCALHOST.into(), addr.port()),
        IpAddr::V6(ip) if ip.is_unspecified() => SocketAddr::new(Ipv6Addr::LOCALHOST.into(), addr.port()),
        _ => addr,
    }
}

async fn read_message(framed: &mut Framed<TcpStream, MessageCodec>) -> Result<Message, TransportError> {
    match framed.next().await {
        Some(Ok(msg)) => Ok(msg),
        Some(Err(e)) => Err(TransportError::Codec(e.to_string())),
        None => Err(TransportError::Closed),
    }
}

/// What a remote announced in its Hello
struct RemoteHello {
    info: AddrInfo,
    public_key: PublicKey,
    nonce: String,
}

/// Read the remote's Hello and derive its identity from the announced key
async fn read_hello(framed: &mut Framed<TcpStream, MessageCodec>) -> Result<RemoteHello, TransportError> {
    let handshake = match read_message(framed).await? {
        Message::Hello(h) => h,
        Message::Reject(reason) => return Err(TransportError::Rejected(reason)),
        other => {
            return Err(TransportError::Codec(format!(
                "expected Hello, got {}",
                other.type_name()
            )))
        }
    };
    if handshake.version != PROTOCOL_VERSION {
        return Err(TransportError::Rejected(RejectReason::Version));
    }

    let public_key = public_key_from_hex(&handshake.public_key)
        .map_err(|e| TransportError::Codec(e.to_string()))?;
    let id = PeerId::from_public_key(&public_key);
    let addrs = handshake
        .listen_addrs
        .iter()
        .filter_map(|s| s.parse::<PeerAddr>().ok())
        .collect();

    log::debug!("Handshake from {} ({})", id, handshake.user_agent);
    Ok(RemoteHello {
        info: AddrInfo::new(id, addrs),
        public_key,
        nonce: handshake.nonce,
    })
}

/// Read the remote's Auth and check it signs `nonce` with the key its Hello
/// announced. `signer` is the remote's side of the link.
async fn read_auth(
    framed: &mut Framed<TcpStream, MessageCodec>,
    remote: &RemoteHello,
    nonce: &str,
    signer: Direction,
) -> Result<(), TransportError> {
    let signature = match read_message(framed).await? {
        Message::Auth { signature } => signature,
        Message::Reject(reason) => return Err(TransportError::Rejected(reason)),
        other => {
            return Err(TransportError::Codec(format!(
                "expected Auth, got {}",
                other.type_name()
            )))
        }
    };
    let signature = hex::decode(&signature)
        .map_err(|_| TransportError::Unauthenticated(remote.info.id))?;
    match verify_signature(&remote.public_key, &challenge(nonce, signer), &signature) {
        Ok(true) => Ok(()),
        _ => Err(TransportError::Unauthenticated(remote.info.id)),
    }
}

/// Run an established link until either side closes it
async fn drive(
    framed: Framed<TcpStream, MessageCodec>,
    link: Link,
    mut driver: LinkDriver,
    events: mpsc::Sender<TransportEvent>,
    links: Links,
) {
    let peer = link.remote_id();
    let (mut writer, mut reader) = framed.split();

    let (out_tx, mut out_rx) = mpsc::channel::<Message>(100);
    let write_handle = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if writer.send(msg).await.is_err() {
                break;
            }
        }
    });

    let mut pending: HashMap<u64, oneshot::Sender<Result<Response, TransportError>>> =
        HashMap::new();
    let mut next_id: u64 = 0;

    loop {
        tokio::select! {
            _ = signalled(&mut driver.closed) => break,
            Some(req) = driver.requests.recv() => {
                // Forget requests whose caller stopped waiting
                pending.retain(|_, reply| !reply.is_closed());
                next_id += 1;
                pending.insert(next_id, req.reply);
                let msg = Message::Request { id: next_id, body: req.request };
                if out_tx.send(msg).await.is_err() {
                    break;
                }
            }
            frame = reader.next() => match frame {
                Some(Ok(Message::Request { id, body })) => {
                    let (reply_tx, reply_rx) = oneshot::channel();
                    let event = TransportEvent::Request {
                        link: link.id(),
                        from: peer,
                        request: body,
                        reply: reply_tx,
                    };
                    if events.send(event).await.is_err() {
                        break;
                    }
                    let out = out_tx.clone();
                    tokio::spawn(async move {
                        let body = reply_rx
                            .await
                            .unwrap_or_else(|_| Response::Error("request dropped".to_string()));
                        let _ = out.send(Message::Response { id, body }).await;
                    });
                }
                Some(Ok(Message::Response { id, body })) => {
                    if let Some(reply) = pending.remove(&id) {
                        let _ = reply.send(Ok(body));
                    }
                }
                Some(Ok(other)) => {
                    log::warn!("Unexpected {} from {}", other.type_name(), peer);
                }
                Some(Err(e)) => {
                    log::warn!("Error reading from {}: {}", peer, e);
                    break;
                }
                None => break,
            },
        }
    }

    // Cleanup
    link.close();
    write_handle.abort();
    links
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .remove(&link.id());
    log::debug!("Link {} to {} closed", link.id(), peer);
    let _ = events
        .send(TransportEvent::Closed {
            peer,
            link: link.id(),
        })
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::message::Request;

    #[test]
    fn test_message_codec() {
        let mut codec = MessageCodec;
        let msg = Message::Request {
            id: 3,
            body: Request::Ping(12345),
        };

        let mut buf = BytesMut::new();
        codec.encode(msg, &mut buf).unwrap();

        match codec.decode(&mut buf).unwrap().unwrap() {
            Message::Request { id, body } => {
                assert_eq!(id, 3);
                assert_eq!(body, Request::Ping(12345));
            }
            other => panic!("Wrong message type: {}", other.type_name()),
        }
    }

    #[test]
    fn test_codec_waits_for_full_frame() {
        let mut codec = MessageCodec;
        let mut full = BytesMut::new();
        codec.encode(Message::Welcome, &mut full).unwrap();

        let mut partial = BytesMut::from(&full[..full.len() - 1]);
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn test_codec_rejects_bad_magic_and_oversize() {
        let mut codec = MessageCodec;
        let mut bad = BytesMut::from(&b"XXXX\0\0\0\x01{"[..]);
        assert!(codec.decode(&mut bad).is_err());

        let mut huge = BytesMut::new();
        huge.put_slice(&MAGIC);
        huge.put_u32(u32::MAX);
        assert!(codec.decode(&mut huge).is_err());
    }

    async fn spawn_answering(
        keypair: KeyPair,
        verdict: Verdict,
    ) -> (Arc<TcpTransport>, AddrInfo) {
        let local: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let (transport, mut events) = TcpTransport::bind(keypair, local, None).await.unwrap();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    TransportEvent::Inbound { verdict: tx, .. } => {
                        let _ = tx.send(verdict);
                    }
                    TransportEvent::Request { request, reply, .. } => {
                        if let Request::Ping(n) = request {
                            let _ = reply.send(Response::Pong(n));
                        }
                    }
                    TransportEvent::Closed { .. } => {}
                }
            }
        });
        let info = AddrInfo::new(transport.local_id(), transport.listen_addrs());
        (transport, info)
    }

    #[tokio::test]
    async fn test_dial_and_request_over_loopback() {
        let (_server, server_info) = spawn_answering(KeyPair::generate(), Verdict::Accept).await;
        let (client, _) = spawn_answering(KeyPair::generate(), Verdict::Accept).await;

        let link = client.dial(&server_info).await.unwrap();
        assert_eq!(link.remote_id(), server_info.id);
        assert_eq!(link.direction(), Direction::Outbound);
        assert_eq!(link.initiator(), client.local_id());
        assert_eq!(client.connected_peers(), vec![server_info.id]);

        let response = link.request(Request::Ping(42)).await.unwrap();
        assert_eq!(response, Response::Pong(42));

        link.close();
        link.closed().await;
    }

    #[tokio::test]
    async fn test_dial_detects_identity_mismatch() {
        let (_server, server_info) = spawn_answering(KeyPair::generate(), Verdict::Accept).await;
        let (client, _) = spawn_answering(KeyPair::generate(), Verdict::Accept).await;

        let wrong = AddrInfo::new(PeerId::random(), server_info.addrs.clone());
        assert!(matches!(
            client.dial(&wrong).await,
            Err(TransportError::IdentityMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_rejection_reaches_dialer() {
        let (_server, server_info) =
            spawn_answering(KeyPair::generate(), Verdict::Reject(RejectReason::NoSlots)).await;
        let (client, _) = spawn_answering(KeyPair::generate(), Verdict::Accept).await;

        assert!(matches!(
            client.dial(&server_info).await,
            Err(TransportError::Rejected(RejectReason::NoSlots))
        ));
    }

    #[tokio::test]
    async fn test_nat_address_is_advertised() {
        let nat: IpAddr = "192.0.2.7".parse().unwrap();
        let local: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let (transport, _events) = TcpTransport::bind(KeyPair::generate(), local, Some(nat))
            .await
            .unwrap();

        let addrs = transport.listen_addrs();
        assert_eq!(addrs.len(), 1);
        assert_eq!(addrs[0].ip, nat);
    }

    #[tokio::test]
    async fn test_key_without_matching_signature_is_refused() {
        let local: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let (listener, mut events) = TcpTransport::bind(KeyPair::generate(), local, None)
            .await
            .unwrap();
        let claimed = KeyPair::generate();
        let actual = KeyPair::generate();

        let stream = TcpStream::connect(listener.listen_addrs()[0].socket_addr())
            .await
            .unwrap();
        let mut framed = Framed::new(stream, MessageCodec);
        let hello = Handshake::new(claimed.public_key_hex(), vec![], new_nonce());
        framed.send(Message::Hello(hello)).await.unwrap();

        let remote = read_hello(&mut framed).await.unwrap();
        assert_eq!(remote.info.id, listener.local_id());
        assert!(matches!(read_message(&mut framed).await.unwrap(), Message::Auth { .. }));

        let forged = actual
            .sign(&challenge(&remote.nonce, Direction::Outbound))
            .unwrap();
        framed
            .send(Message::Auth {
                signature: hex::encode(forged),
            })
            .await
            .unwrap();

        assert!(read_message(&mut framed).await.is_err());
        let reported = tokio::time::timeout(Duration::from_millis(300), events.recv()).await;
        assert!(reported.is_err(), "no link may be reported for a forged identity");
        assert!(listener.connected_peers().is_empty());
    }

    #[tokio::test]
    async fn test_listener_proves_its_key() {
        let (_server, server_info) = spawn_answering(KeyPair::generate(), Verdict::Accept).await;
        let keypair = KeyPair::generate();
        let nonce = new_nonce();

        let stream = TcpStream::connect(server_info.addrs[0].socket_addr()).await.unwrap();
        let mut framed = Framed::new(stream, MessageCodec);
        let hello = Handshake::new(keypair.public_key_hex(), vec![], nonce.clone());
        framed.send(Message::Hello(hello)).await.unwrap();

        let remote = read_hello(&mut framed).await.unwrap();
        read_auth(&mut framed, &remote, &nonce, Direction::Inbound)
            .await
            .unwrap();
    }

    #[test]
    fn test_unspecified_bind_is_advertised_as_loopback() {
        let addr: SocketAddr = "0.0.0.0:1478".parse().unwrap();
        assert_eq!(dialable(addr), "127.0.0.1:1478".parse().unwrap());
    }

    #[test]
    fn test_reachable_addrs() {
        let bound: SocketAddr = "192.0.2.3:1478".parse().unwrap();
        assert_eq!(reachable_addrs(bound), vec![PeerAddr::from(bound)]);

        let any: SocketAddr = "0.0.0.0:1478".parse().unwrap();
        let addrs = reachable_addrs(any);
        assert!(addrs.iter().all(|a| a.port == 1478 && !a.ip.is_unspecified()));
        assert_eq!(addrs.last(), Some(&PeerAddr::new(Ipv4Addr::LOCALHOST, 1478)));
        if addrs.len() > 1 {
            assert!(!addrs[0].is_loopback());
        }
    }

    #[tokio::test]
    async fn test_unspecified_bind_advertises_no_unspecified_address() {
        let any: SocketAddr = "0.0.0.0:0".parse().unwrap();
        let (transport, _events) = TcpTransport::bind(KeyPair::generate(), any, None)
            .await
            .unwrap();
        let addrs = transport.listen_addrs();
        assert!(!addrs.is_empty());
        assert!(addrs.iter().all(|a| !a.ip.is_unspecified() && a.port != 0));
    }

    #[test]
    fn test_observed_ip_replaces_loopback() {
        let observed: SocketAddr = "203.0.113.9:51234".parse().unwrap();
        let announced = vec![
            PeerAddr::new(Ipv4Addr::new(192, 168, 1, 5), 1478),
            PeerAddr::new(Ipv4Addr::LOCALHOST, 1478),
        ];
        assert_eq!(
            observed_addrs(&announced, observed),
            vec![
                PeerAddr::new(Ipv4Addr::new(192, 168, 1, 5), 1478),
                PeerAddr::new(Ipv4Addr::new(203, 0, 113, 9), 1478),
            ]
        );

        // Loopback only, seen from the outside: the observed IP with the
        // announced port
        let only_loopback = vec![PeerAddr::new(Ipv4Addr::LOCALHOST, 1478)];
        assert_eq!(
            observed_addrs(&only_loopback, observed),
            vec![PeerAddr::new(Ipv4Addr::new(203, 0, 113, 9), 1478)]
        );

        // Nothing announced: fall back to the connection's address
        assert_eq!(observed_addrs(&[], observed), vec![PeerAddr::from(observed)]);

        // Local connections keep what was announced
        let local: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        assert_eq!(observed_addrs(&only_loopback, local), only_loopback);
    }
}
