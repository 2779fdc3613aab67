//! Integration tests for the roster server
//!
//! These tests drive a real server over real TCP sockets, speaking the wire
//! protocol the way a client would: text command lines, and raw
//! length-prefixed payloads for the relay command.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time;

use roster_server::config::ServerConfig;
use roster_server::server::Server;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

async fn start_server(idle_timeout_secs: u64) -> (SocketAddr, Arc<Server>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = ServerConfig {
        idle_timeout_secs,
        ..ServerConfig::default()
    };
    let server = Arc::new(Server::new(config));
    let serving = Arc::clone(&server);
    tokio::spawn(async move {
        let _ = serving.serve(listener).await;
    });
    (addr, server)
}

struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    local_addr: SocketAddr,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Client {
        let stream = TcpStream::connect(addr).await.unwrap();
        let local_addr = stream.local_addr().unwrap();
        let (read, writer) = stream.into_split();
        Client {
            reader: BufReader::new(read),
            writer,
            local_addr,
        }
    }

    /// Connect and register under `id`.
    async fn register(addr: SocketAddr, id: &str) -> Client {
        let mut client = Client::connect(addr).await;
        client.send_line(&format!("CONNECT {}", id)).await;
        let reply = client.recv_line().await;
        assert_eq!(
            reply,
            format!("OK CONNECT {} {}", id, client.local_addr),
            "registration handshake"
        );
        client
    }

    async fn send_line(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
    }

    async fn recv_line(&mut self) -> String {
        let mut line = String::new();
        let n = time::timeout(RECV_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for a line")
            .unwrap();
        assert!(n > 0, "server closed the connection");
        line.trim_end_matches('\n').to_string()
    }

    async fn recv_exact(&mut self, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        time::timeout(RECV_TIMEOUT, self.reader.read_exact(&mut buf))
            .await
            .expect("timed out waiting for bytes")
            .unwrap();
        buf
    }

    /// Wait for the server to close our socket.
    async fn recv_eof(&mut self) {
        let mut buf = [0u8; 1];
        let n = time::timeout(RECV_TIMEOUT, self.reader.read(&mut buf))
            .await
            .expect("timed out waiting for close")
            .unwrap();
        assert_eq!(n, 0, "expected the server to close the connection");
    }
}

#[tokio::test]
async fn test_presence_and_status_round_trip() {
    let (addr, _server) = start_server(120).await;

    let mut alice = Client::register(addr, "alice").await;
    alice.send_line("STATUS ready").await;
    assert_eq!(alice.recv_line().await, "OK STATUS ready");

    let mut bob = Client::register(addr, "bob").await;
    bob.send_line("INFO alice").await;

    let reply = bob.recv_line().await;
    let expected_prefix = format!("OK INFO alice {} 0.0.0.0:0 ", alice.local_addr);
    assert!(
        reply.starts_with(&expected_prefix),
        "unexpected INFO reply: {}",
        reply
    );
    assert!(reply.ends_with(" ready"), "status must trail: {}", reply);

    // The timestamp token is RFC 3339 in UTC.
    let fields: Vec<&str> = reply.split(' ').collect();
    assert_eq!(fields.len(), 7);
    assert!(fields[5].ends_with('Z') && fields[5].contains('T'));

    // The lookup probed alice's socket on the way.
    assert_eq!(alice.recv_line().await, "PING bob");
}

#[tokio::test]
async fn test_info_unknown_target() {
    let (addr, _server) = start_server(120).await;
    let mut alice = Client::register(addr, "alice").await;

    alice.send_line("INFO bob").await;
    assert_eq!(alice.recv_line().await, "ERROR INFO bob not found");
}

#[tokio::test]
async fn test_unknown_command_is_silent() {
    let (addr, _server) = start_server(120).await;
    let mut alice = Client::register(addr, "alice").await;

    alice.send_line("FOO bar").await;
    alice.send_line("PONG 7").await;
    alice.send_line("PING x").await;
    assert_eq!(alice.recv_line().await, "OK PING x");
}

#[tokio::test]
async fn test_oversized_line_is_dropped_silently() {
    let (addr, _server) = start_server(120).await;
    let mut alice = Client::register(addr, "alice").await;

    let mut big = vec![b'z'; 300];
    big.push(b'\n');
    alice.send_raw(&big).await;
    alice.send_line("PING 1").await;
    assert_eq!(alice.recv_line().await, "OK PING 1");
}

#[tokio::test]
async fn test_line_at_cap_is_processed() {
    let (addr, _server) = start_server(120).await;
    let mut alice = Client::register(addr, "alice").await;

    // "PING " plus padding: 255 bytes of content, LF makes 256.
    let mut line = b"PING ".to_vec();
    line.resize(255, b'p');
    line.push(b'\n');
    alice.send_raw(&line).await;
    let reply = alice.recv_line().await;
    assert!(reply.starts_with("OK PING p"));
}

#[tokio::test]
async fn test_relay_success() {
    let (addr, _server) = start_server(120).await;
    let mut alice = Client::register(addr, "alice").await;
    let mut bob = Client::register(addr, "bob").await;

    alice.send_line("TO bob").await;
    alice.send_raw(&[8, 0, 0, 0]).await;
    alice.send_raw(b"DEAD").await;
    assert_eq!(alice.recv_line().await, "OK TO bob");

    assert_eq!(bob.recv_line().await, "FROM alice");
    assert_eq!(bob.recv_exact(4).await, vec![8, 0, 0, 0]);
    assert_eq!(bob.recv_exact(4).await, b"DEAD".to_vec());

    // Both sessions keep working afterwards.
    alice.send_line("PING a").await;
    assert_eq!(alice.recv_line().await, "OK PING a");
    bob.send_line("PING b").await;
    assert_eq!(bob.recv_line().await, "OK PING b");
}

#[tokio::test]
async fn test_relay_empty_frame() {
    let (addr, _server) = start_server(120).await;
    let mut alice = Client::register(addr, "alice").await;
    let mut bob = Client::register(addr, "bob").await;

    alice.send_line("TO bob").await;
    alice.send_raw(&[4, 0, 0, 0]).await;
    assert_eq!(alice.recv_line().await, "OK TO bob");

    assert_eq!(bob.recv_line().await, "FROM alice");
    assert_eq!(bob.recv_exact(4).await, vec![4, 0, 0, 0]);
}

#[tokio::test]
async fn test_relay_to_absent_target() {
    let (addr, _server) = start_server(120).await;
    let mut alice = Client::register(addr, "alice").await;

    // No payload was sent, so the next line must parse normally.
    alice.send_line("TO nobody").await;
    assert_eq!(alice.recv_line().await, "ERROR TO nobody not connected");

    alice.send_line("PING 1").await;
    assert_eq!(alice.recv_line().await, "OK PING 1");
}

#[tokio::test]
async fn test_relay_empty_target() {
    let (addr, _server) = start_server(120).await;
    let mut alice = Client::register(addr, "alice").await;

    alice.send_line("TO").await;
    assert_eq!(alice.recv_line().await, "ERROR TO empty TO");
}

#[tokio::test]
async fn test_relay_rejects_bad_length() {
    let (addr, _server) = start_server(120).await;
    let mut alice = Client::register(addr, "alice").await;
    let _bob = Client::register(addr, "bob").await;

    alice.send_line("TO bob").await;
    alice.send_raw(&2i32.to_le_bytes()).await;
    let reply = alice.recv_line().await;
    assert!(reply.starts_with("ERROR TO "), "got: {}", reply);
    assert!(reply.contains("invalid payload length"));

    alice.send_line("PING 1").await;
    assert_eq!(alice.recv_line().await, "OK PING 1");
}

#[tokio::test]
async fn test_duplicate_connect_displaces_predecessor() {
    let (addr, _server) = start_server(120).await;

    let mut first = Client::register(addr, "alice").await;
    let second = Client::register(addr, "alice").await;

    // The first session's socket is closed by the server.
    first.recv_eof().await;

    // A third party sees the successor's addresses.
    let mut carol = Client::register(addr, "carol").await;
    carol.send_line("INFO alice").await;
    let reply = carol.recv_line().await;
    assert!(
        reply.starts_with(&format!("OK INFO alice {} ", second.local_addr)),
        "got: {}",
        reply
    );
}

#[tokio::test]
async fn test_connect_on_same_session_twice() {
    let (addr, _server) = start_server(120).await;
    let mut alice = Client::register(addr, "alice").await;

    alice.send_line("CONNECT alice").await;
    assert_eq!(alice.recv_line().await, "ERROR CONNECT already connected");
}

#[tokio::test]
async fn test_disconnect_closes_session() {
    let (addr, server) = start_server(120).await;
    let mut alice = Client::register(addr, "alice").await;

    alice.send_line("DISCONNECT").await;
    assert_eq!(alice.recv_line().await, "OK DISCONNECT");
    alice.recv_eof().await;

    time::sleep(Duration::from_millis(50)).await;
    assert!(server.registry().lookup("alice").is_none());
}

#[tokio::test]
async fn test_idle_timeout_expires_presence() {
    let (addr, _server) = start_server(1).await;

    let mut alice = Client::register(addr, "alice").await;
    // Stay silent past the idle window; the server hangs up.
    alice.recv_eof().await;

    let mut bob = Client::register(addr, "bob").await;
    bob.send_line("INFO alice").await;
    assert_eq!(bob.recv_line().await, "ERROR INFO alice not found");
}

#[tokio::test]
async fn test_reported_addr_round_trip() {
    let (addr, _server) = start_server(120).await;

    let mut alice = Client::connect(addr).await;
    alice.send_line("CONNECT alice 10.0.0.5:4242").await;
    assert_eq!(
        alice.recv_line().await,
        format!("OK CONNECT alice {}", alice.local_addr)
    );

    let mut bob = Client::register(addr, "bob").await;
    bob.send_line("INFO alice").await;
    let reply = bob.recv_line().await;
    assert!(
        reply.starts_with(&format!("OK INFO alice {} 10.0.0.5:4242 ", alice.local_addr)),
        "got: {}",
        reply
    );
}

mod tls {
    use super::*;

    use rustls::client::danger::{
        HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
    };
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
    use tokio_rustls::{TlsAcceptor, TlsConnector};

    /// Certificate verifier that accepts any certificate. Test use only.
    #[derive(Debug)]
    struct NoVerifier;

    impl ServerCertVerifier for NoVerifier {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            vec![
                SignatureScheme::RSA_PKCS1_SHA256,
                SignatureScheme::RSA_PKCS1_SHA384,
                SignatureScheme::RSA_PKCS1_SHA512,
                SignatureScheme::ECDSA_NISTP256_SHA256,
                SignatureScheme::ECDSA_NISTP384_SHA384,
                SignatureScheme::ECDSA_NISTP521_SHA512,
                SignatureScheme::RSA_PSS_SHA256,
                SignatureScheme::RSA_PSS_SHA384,
                SignatureScheme::RSA_PSS_SHA512,
                SignatureScheme::ED25519,
            ]
        }
    }

    #[tokio::test]
    async fn test_commands_over_tls() {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let server_tls = roster_common::tls::create_server_config(
            &cert.cert.pem(),
            &cert.key_pair.serialize_pem(),
        )
        .unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(Server::new(ServerConfig::default()));
        let serving = Arc::clone(&server);
        tokio::spawn(async move {
            let _ = serving
                .serve_tls(listener, TlsAcceptor::from(server_tls))
                .await;
        });

        let client_config = ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier))
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(client_config));

        let tcp = TcpStream::connect(addr).await.unwrap();
        let server_name = ServerName::try_from("localhost").unwrap();
        let mut stream = connector.connect(server_name, tcp).await.unwrap();

        stream.write_all(b"CONNECT alice\nPING tls\n").await.unwrap();

        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert!(line.starts_with("OK CONNECT alice "), "got: {}", line);

        line.clear();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "OK PING tls\n");
    }
}
