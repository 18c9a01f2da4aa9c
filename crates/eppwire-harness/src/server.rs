//! One-shot loopback EPP servers.
//!
//! Each server accepts a single client, sends a greeting frame, then answers
//! every request frame with the next scripted response. It returns the
//! request bodies it received when joined.

use std::{
    io::{self, Read, Write},
    net::{SocketAddr, TcpListener},
    path::Path,
    sync::Arc,
    thread::{self, JoinHandle},
};

use eppwire_proto::{DEFAULT_MAX_FRAME_LEN, FrameHeader};
use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};
use rustls::{
    ServerConfig, ServerConnection, StreamOwned,
    crypto::ring,
    pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer},
};

/// Throwaway CA plus a server certificate it signed for `localhost`.
pub struct TestIdentity {
    ca_pem: String,
    cert_der: CertificateDer<'static>,
    key_der: Vec<u8>,
}

impl TestIdentity {
    /// Generate a fresh CA and a leaf valid for `localhost` and `127.0.0.1`.
    pub fn localhost() -> Result<Self, rcgen::Error> {
        let mut ca_params = CertificateParams::new(Vec::<String>::new())?;
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params.distinguished_name.push(DnType::CommonName, "eppwire test CA");
        let ca_key = KeyPair::generate()?;
        let ca_cert = ca_params.self_signed(&ca_key)?;

        let mut leaf_params =
            CertificateParams::new(vec!["localhost".to_string(), "127.0.0.1".to_string()])?;
        leaf_params.distinguished_name.push(DnType::CommonName, "localhost");
        let leaf_key = KeyPair::generate()?;
        let leaf = leaf_params.signed_by(&leaf_key, &ca_cert, &ca_key)?;

        Ok(Self {
            ca_pem: ca_cert.pem(),
            cert_der: leaf.der().clone(),
            key_der: leaf_key.serialize_der(),
        })
    }

    /// CA certificate in PEM form.
    pub fn ca_pem(&self) -> &str {
        &self.ca_pem
    }

    /// Write the CA certificate PEM to `path`.
    pub fn write_ca_file(&self, path: &Path) -> io::Result<()> {
        std::fs::write(path, self.ca_pem.as_bytes())
    }

    fn server_config(&self) -> io::Result<ServerConfig> {
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.key_der.clone()));

        ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(io::Error::other)?
            .with_no_client_auth()
            .with_single_cert(vec![self.cert_der.clone()], key)
            .map_err(io::Error::other)
    }
}

/// Background server bound to an ephemeral loopback port.
pub struct LoopbackServer {
    addr: SocketAddr,
    handle: JoinHandle<io::Result<Vec<Vec<u8>>>>,
}

impl LoopbackServer {
    /// Plain TCP server.
    pub fn tcp(greeting: &[u8], responses: Vec<Vec<u8>>) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        let greeting = greeting.to_vec();

        let handle = thread::spawn(move || {
            let (tcp, _) = listener.accept()?;
            serve(tcp, &greeting, responses)
        });

        Ok(Self { addr, handle })
    }

    /// TLS server presenting `identity`.
    pub fn tls(
        identity: &TestIdentity,
        greeting: &[u8],
        responses: Vec<Vec<u8>>,
    ) -> io::Result<Self> {
        let config = Arc::new(identity.server_config()?);
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        let greeting = greeting.to_vec();

        let handle = thread::spawn(move || {
            let (tcp, _) = listener.accept()?;
            let conn = ServerConnection::new(config).map_err(io::Error::other)?;
            serve(StreamOwned::new(conn, tcp), &greeting, responses)
        });

        Ok(Self { addr, handle })
    }

    /// Bound address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `scheme://127.0.0.1:port` for this server.
    pub fn uri(&self, scheme: &str) -> String {
        format!("{scheme}://{}", self.addr)
    }

    /// Wait for the session to end and return the request bodies received.
    pub fn join(self) -> io::Result<Vec<Vec<u8>>> {
        self.handle.join().map_err(|_| io::Error::other("loopback server panicked"))?
    }
}

fn serve<S: Read + Write>(
    mut stream: S,
    greeting: &[u8],
    responses: Vec<Vec<u8>>,
) -> io::Result<Vec<Vec<u8>>> {
    stream.write_all(&crate::frame(greeting))?;
    stream.flush()?;

    let mut requests = Vec::new();
    for response in responses {
        requests.push(read_frame(&mut stream)?);
        stream.write_all(&crate::frame(&response))?;
        stream.flush()?;
    }

    tracing::debug!(requests = requests.len(), "loopback session complete");
    Ok(requests)
}

fn read_frame<S: Read>(stream: &mut S) -> io::Result<Vec<u8>> {
    let mut raw = [0u8; FrameHeader::SIZE];
    stream.read_exact(&mut raw)?;

    let header = FrameHeader::from_bytes(&raw)
        .and_then(|h| h.check_limit(DEFAULT_MAX_FRAME_LEN).map(|()| h))
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let mut body = vec![0u8; header.body_len()];
    stream.read_exact(&mut body)?;
    Ok(body)
}
