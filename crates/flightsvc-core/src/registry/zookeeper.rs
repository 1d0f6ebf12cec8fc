//! Minimal ZooKeeper client: session handshake, node creation and pings.
//!
//! Speaks the jute-encoded client protocol. Every packet is a 4-byte
//! big-endian length followed by the record:
//!
//! ```text
//! connect   -> [proto i32][last_zxid i64][timeout_ms i32][session i64][passwd buf][read_only u8]
//! connect   <- [proto i32][timeout_ms i32][session i64][passwd buf]
//! request   -> [xid i32][op i32][body...]
//! reply     <- [xid i32][zxid i64][err i32][body...]
//! ```
//!
//! Strings and buffers are an `i32` length followed by the bytes.

use crate::config::RegistryConfig;
use crate::error::{FlightError, Result};
use crate::flight::protocol::write_frame;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const PROTOCOL_VERSION: i32 = 0;
const PING_XID: i32 = -2;
const PASSWORD_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpCode {
    Create = 1,
    Ping = 11,
    CloseSession = -11,
}

/// Reply error codes the client acts on.
pub mod error_code {
    pub const OK: i32 = 0;
    pub const NO_NODE: i32 = -101;
    pub const NODE_EXISTS: i32 = -110;
}

/// Node lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    Persistent,
    /// Deleted by the server when the creating session ends.
    Ephemeral,
}

impl CreateMode {
    fn flags(self) -> i32 {
        match self {
            CreateMode::Persistent => 0,
            CreateMode::Ephemeral => 1,
        }
    }
}

fn malformed(what: &str) -> FlightError {
    FlightError::transport(format!("malformed {} from registry", what))
}

fn put_buffer(buf: &mut BytesMut, data: &[u8]) {
    buf.put_i32(data.len() as i32);
    buf.put_slice(data);
}

fn put_string(buf: &mut BytesMut, s: &str) {
    put_buffer(buf, s.as_bytes());
}

fn get_i32(buf: &mut Bytes, what: &str) -> Result<i32> {
    if buf.remaining() < 4 {
        return Err(malformed(what));
    }
    Ok(buf.get_i32())
}

fn get_i64(buf: &mut Bytes, what: &str) -> Result<i64> {
    if buf.remaining() < 8 {
        return Err(malformed(what));
    }
    Ok(buf.get_i64())
}

fn get_buffer(buf: &mut Bytes, what: &str) -> Result<Vec<u8>> {
    let len = get_i32(buf, what)?;
    // -1 encodes a null buffer
    if len < 0 {
        return Ok(Vec::new());
    }
    let len = len as usize;
    if buf.remaining() < len {
        return Err(malformed(what));
    }
    Ok(buf.split_to(len).to_vec())
}

/// Session establishment request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub last_zxid_seen: i64,
    pub timeout: Duration,
    pub session_id: i64,
    pub passwd: Vec<u8>,
    pub read_only: bool,
}

impl ConnectRequest {
    /// A request for a brand-new session.
    pub fn new(timeout: Duration) -> Self {
        Self {
            last_zxid_seen: 0,
            timeout,
            session_id: 0,
            passwd: vec![0; PASSWORD_LEN],
            read_only: false,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        let timeout_ms = i32::try_from(self.timeout.as_millis()).unwrap_or(i32::MAX);
        buf.put_i32(PROTOCOL_VERSION);
        buf.put_i64(self.last_zxid_seen);
        buf.put_i32(timeout_ms);
        buf.put_i64(self.session_id);
        put_buffer(buf, &self.passwd);
        buf.put_u8(u8::from(self.read_only));
    }
}

/// Server answer to a [`ConnectRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectResponse {
    pub protocol_version: i32,
    /// Negotiated session timeout; zero when the server refused the session.
    pub timeout: Duration,
    pub session_id: i64,
    pub passwd: Vec<u8>,
}

impl ConnectResponse {
    pub fn decode(mut body: Bytes) -> Result<Self> {
        let protocol_version = get_i32(&mut body, "connect response")?;
        let timeout_ms = get_i32(&mut body, "connect response")?;
        let session_id = get_i64(&mut body, "connect response")?;
        let passwd = get_buffer(&mut body, "connect response")?;
        // A trailing read-only flag may follow; it is ignored
        Ok(Self {
            protocol_version,
            timeout: Duration::from_millis(timeout_ms.max(0) as u64),
            session_id,
            passwd,
        })
    }

    pub fn is_established(&self) -> bool {
        !self.timeout.is_zero()
    }
}

/// Header preceding every reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyHeader {
    pub xid: i32,
    pub zxid: i64,
    pub err: i32,
}

impl ReplyHeader {
    pub fn decode(body: &mut Bytes) -> Result<Self> {
        Ok(Self {
            xid: get_i32(body, "reply header")?,
            zxid: get_i64(body, "reply header")?,
            err: get_i32(body, "reply header")?,
        })
    }
}

/// Access control entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acl {
    pub perms: i32,
    pub scheme: String,
    pub id: String,
}

impl Acl {
    /// All permissions for everyone (`world:anyone`).
    pub fn open_unsafe() -> Self {
        Self {
            perms: 31,
            scheme: "world".to_string(),
            id: "anyone".to_string(),
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32(self.perms);
        put_string(buf, &self.scheme);
        put_string(buf, &self.id);
    }
}

/// Body of a create request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest<'a> {
    pub path: &'a str,
    pub data: &'a [u8],
    pub acl: Vec<Acl>,
    pub mode: CreateMode,
}

impl<'a> CreateRequest<'a> {
    pub fn new(path: &'a str, data: &'a [u8], mode: CreateMode) -> Self {
        Self {
            path,
            data,
            acl: vec![Acl::open_unsafe()],
            mode,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        put_string(buf, self.path);
        put_buffer(buf, self.data);
        buf.put_i32(self.acl.len() as i32);
        for acl in &self.acl {
            acl.encode(buf);
        }
        buf.put_i32(self.mode.flags());
    }
}

/// Every strict ancestor of `path`, shallowest first.
///
/// `/a/b/c` yields `/a`, `/a/b`.
pub fn ancestors(path: &str) -> Vec<String> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    (1..segments.len())
        .map(|depth| format!("/{}", segments[..depth].join("/")))
        .collect()
}

async fn read_packet(stream: &mut TcpStream) -> Result<Bytes> {
    let len = match stream.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(FlightError::transport("registry closed the connection"));
        }
        Err(e) => return Err(e.into()),
    };
    if len > RegistryConfig::MAX_PACKET_SIZE {
        return Err(FlightError::transport(format!(
            "registry packet size {} exceeds maximum {}",
            len,
            RegistryConfig::MAX_PACKET_SIZE
        )));
    }

    let mut body = BytesMut::zeroed(len);
    stream.read_exact(&mut body).await?;
    Ok(body.freeze())
}

/// The TCP connection plus the request counter, used under one lock.
#[derive(Debug)]
struct Wire {
    stream: TcpStream,
    next_xid: i32,
}

impl Wire {
    async fn exchange(&mut self, op: OpCode, payload: &[u8]) -> Result<(ReplyHeader, Bytes)> {
        let xid = if op == OpCode::Ping {
            PING_XID
        } else {
            self.next_xid = self.next_xid.wrapping_add(1).max(1);
            self.next_xid
        };

        let mut buf = BytesMut::with_capacity(8 + payload.len());
        buf.put_i32(xid);
        buf.put_i32(op as i32);
        buf.put_slice(payload);
        write_frame(&mut self.stream, &buf).await?;

        loop {
            let mut reply = read_packet(&mut self.stream).await?;
            let header = ReplyHeader::decode(&mut reply)?;
            if header.xid == xid {
                return Ok((header, reply));
            }
            // Watch notifications (xid -1) are not requested, skip anything else
            debug!("Skipping registry reply for xid {}", header.xid);
        }
    }
}

/// A live ZooKeeper session kept alive by a background ping task.
#[derive(Debug)]
pub struct ZkSession {
    wire: Arc<Mutex<Wire>>,
    host: String,
    session_id: i64,
    timeout: Duration,
    heartbeat: JoinHandle<()>,
}

impl ZkSession {
    /// Open a TCP connection to `host` and establish a new session.
    pub async fn connect(host: &str, session_timeout: Duration) -> Result<Self> {
        let mut stream = TcpStream::connect(host).await.map_err(|e| FlightError::RegistryUnavailable {
            hosts: host.to_string(),
            message: e.to_string(),
        })?;

        let mut buf = BytesMut::new();
        ConnectRequest::new(session_timeout).encode(&mut buf);
        write_frame(&mut stream, &buf).await?;

        let response = ConnectResponse::decode(read_packet(&mut stream).await?)?;
        if !response.is_established() {
            return Err(FlightError::RegistryUnavailable {
                hosts: host.to_string(),
                message: "session rejected".to_string(),
            });
        }

        info!(
            "Registry session 0x{:x} established with {} (timeout {:?})",
            response.session_id, host, response.timeout
        );

        let wire = Arc::new(Mutex::new(Wire {
            stream,
            next_xid: 0,
        }));
        let heartbeat = Self::spawn_heartbeat(wire.clone(), host.to_string(), response.timeout);

        Ok(Self {
            wire,
            host: host.to_string(),
            session_id: response.session_id,
            timeout: response.timeout,
            heartbeat,
        })
    }

    fn spawn_heartbeat(wire: Arc<Mutex<Wire>>, host: String, timeout: Duration) -> JoinHandle<()> {
        let period = (timeout / 3).max(Duration::from_millis(100));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let result = wire.lock().await.exchange(OpCode::Ping, &[]).await;
                if let Err(e) = result {
                    warn!("Registry heartbeat to {} failed: {}", host, e);
                    break;
                }
            }
        })
    }

    pub fn session_id(&self) -> i64 {
        self.session_id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Session timeout negotiated with the server.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Create a node. Returns `false` if it already existed.
    pub async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> Result<bool> {
        let mut body = BytesMut::new();
        CreateRequest::new(path, data, mode).encode(&mut body);

        let (header, _) = self.wire.lock().await.exchange(OpCode::Create, &body).await?;
        match header.err {
            error_code::OK => {
                debug!("Created registry node {}", path);
                Ok(true)
            }
            error_code::NODE_EXISTS => Ok(false),
            code => Err(FlightError::RegistryUnavailable {
                hosts: self.host.clone(),
                message: format!("create {} failed with error code {}", path, code),
            }),
        }
    }

    /// Create `path` as an ephemeral node holding `data`, creating missing
    /// ancestors as persistent nodes.
    pub async fn create_ephemeral(&self, path: &str, data: &[u8]) -> Result<()> {
        for parent in ancestors(path) {
            self.create(&parent, &[], CreateMode::Persistent).await?;
        }
        if !self.create(path, data, CreateMode::Ephemeral).await? {
            warn!("Registry node {} already exists", path);
        }
        Ok(())
    }

    /// Close the session; its ephemeral nodes are removed by the server.
    pub async fn close(&self) -> Result<()> {
        self.heartbeat.abort();
        let mut wire = self.wire.lock().await;
        wire.exchange(OpCode::CloseSession, &[]).await?;
        // The server may already have dropped the connection
        let _ = wire.stream.shutdown().await;
        info!("Registry session 0x{:x} closed", self.session_id);
        Ok(())
    }
}

impl Drop for ZkSession {
    fn drop(&mut self) {
        self.heartbeat.abort();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// A scripted single-connection server: accepts the handshake, then
    /// answers every request with `reply_err`, returning the create paths seen.
    pub(crate) async fn fake_server(reply_err: i32) -> (String, JoinHandle<Vec<(String, i32)>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let task = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let _connect = read_packet(&mut stream).await.unwrap();

            let mut resp = BytesMut::new();
            resp.put_i32(PROTOCOL_VERSION);
            resp.put_i32(6000);
            resp.put_i64(0x1234);
            put_buffer(&mut resp, &[7; PASSWORD_LEN]);
            write_frame(&mut stream, &resp).await.unwrap();

            let mut created = Vec::new();
            while let Ok(mut packet) = read_packet(&mut stream).await {
                let xid = packet.get_i32();
                let op = packet.get_i32();
                if op == OpCode::Create as i32 {
                    let path = String::from_utf8(get_buffer(&mut packet, "path").unwrap()).unwrap();
                    let _data = get_buffer(&mut packet, "data").unwrap();
                    let _acl_count = packet.get_i32();
                    let _acl = (packet.get_i32(), get_buffer(&mut packet, "s"), get_buffer(&mut packet, "i"));
                    let flags = packet.get_i32();
                    created.push((path, flags));
                }

                let mut reply = BytesMut::new();
                reply.put_i32(xid);
                reply.put_i64(1);
                reply.put_i32(if op == OpCode::Create as i32 { reply_err } else { 0 });
                write_frame(&mut stream, &reply).await.unwrap();

                if op == OpCode::CloseSession as i32 {
                    break;
                }
            }
            created
        });

        (addr, task)
    }

    #[test]
    fn test_connect_request_layout() {
        let mut buf = BytesMut::new();
        ConnectRequest::new(Duration::from_secs(10)).encode(&mut buf);

        // 4 + 8 + 4 + 8 + (4 + 16) + 1
        assert_eq!(buf.len(), 45);
        let mut bytes = buf.freeze();
        assert_eq!(bytes.get_i32(), 0);
        assert_eq!(bytes.get_i64(), 0);
        assert_eq!(bytes.get_i32(), 10_000);
        assert_eq!(bytes.get_i64(), 0);
        assert_eq!(bytes.get_i32(), 16);
    }

    #[test]
    fn test_connect_response_decode() {
        let mut buf = BytesMut::new();
        buf.put_i32(0);
        buf.put_i32(4000);
        buf.put_i64(99);
        put_buffer(&mut buf, &[1; 16]);
        buf.put_u8(0);

        let resp = ConnectResponse::decode(buf.freeze()).unwrap();
        assert_eq!(resp.timeout, Duration::from_secs(4));
        assert_eq!(resp.session_id, 99);
        assert!(resp.is_established());
    }

    #[test]
    fn test_truncated_reply_is_rejected() {
        let mut body = Bytes::from_static(&[0, 0, 0, 1, 0, 0]);
        assert!(ReplyHeader::decode(&mut body).is_err());
        assert!(ConnectResponse::decode(Bytes::from_static(&[0, 0])).is_err());
    }

    #[test]
    fn test_create_request_layout() {
        let mut buf = BytesMut::new();
        CreateRequest::new("/a", b"xy", CreateMode::Ephemeral).encode(&mut buf);

        let mut bytes = buf.freeze();
        assert_eq!(get_buffer(&mut bytes, "path").unwrap(), b"/a");
        assert_eq!(get_buffer(&mut bytes, "data").unwrap(), b"xy");
        assert_eq!(bytes.get_i32(), 1);
        assert_eq!(bytes.get_i32(), 31);
        assert_eq!(get_buffer(&mut bytes, "scheme").unwrap(), b"world");
        assert_eq!(get_buffer(&mut bytes, "id").unwrap(), b"anyone");
        assert_eq!(bytes.get_i32(), 1);
        assert!(!bytes.has_remaining());
    }

    #[test]
    fn test_ancestors() {
        assert_eq!(
            ancestors("/flightsvc/brokers/localhost:5005"),
            vec!["/flightsvc", "/flightsvc/brokers"]
        );
        assert!(ancestors("/top").is_empty());
    }

    #[tokio::test]
    async fn test_session_registers_ephemeral_node() {
        let (addr, server) = fake_server(error_code::OK).await;

        let session = ZkSession::connect(&addr, Duration::from_secs(6)).await.unwrap();
        assert_eq!(session.session_id(), 0x1234);
        assert_eq!(session.timeout(), Duration::from_secs(6));

        session
            .create_ephemeral("/flightsvc/brokers/h:1", b"grpc+tcp://h:1")
            .await
            .unwrap();
        session.close().await.unwrap();

        let created = server.await.unwrap();
        assert_eq!(
            created,
            vec![
                ("/flightsvc".to_string(), 0),
                ("/flightsvc/brokers".to_string(), 0),
                ("/flightsvc/brokers/h:1".to_string(), 1),
            ]
        );
    }

    #[tokio::test]
    async fn test_existing_nodes_are_tolerated() {
        let (addr, _server) = fake_server(error_code::NODE_EXISTS).await;
        let session = ZkSession::connect(&addr, Duration::from_secs(6)).await.unwrap();
        assert!(!session.create("/x", &[], CreateMode::Persistent).await.unwrap());
        session.create_ephemeral("/x/y", b"").await.unwrap();
    }

    #[tokio::test]
    async fn test_create_failure_surfaces_code() {
        let (addr, _server) = fake_server(error_code::NO_NODE).await;
        let session = ZkSession::connect(&addr, Duration::from_secs(6)).await.unwrap();
        let err = session.create("/x", &[], CreateMode::Persistent).await.unwrap_err();
        assert!(err.to_string().contains("-101"));
    }
}
