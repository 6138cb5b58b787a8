//! Shared bootstrap helpers for the integration tests: a self-signed
//! TLS identity for loopback connections, and a small builder for a
//! ready-to-listen [`sigtree::Host`].

use std::net::SocketAddr;
use std::sync::Once;

use rustls::{Certificate, ClientConfig, NoClientAuth, PrivateKey, ServerConfig};

use sigtree::{schnorr, Host, HostConfig, IdentityKeyPair, PeerIdentity, RouterConfig};

static INIT: Once = Once::new();

/// Initializes the global async runtime and wire-type registry exactly
/// once per test binary. The returned guard is intentionally leaked:
/// tests run concurrently in the same process, and tearing the runtime
/// down when the first test finishes would break the rest.
pub fn ensure_init() {
    INIT.call_once(|| {
        let guard = unsafe { sigtree::init(sigtree::InitConfig { async_threads: 2 }) }
            .expect("runtime init")
            .expect("first caller always gets the guard");
        std::mem::forget(guard);
    });
}

/// A self-signed certificate and its matching rustls configs. All test
/// hosts share one certificate so every client trusts every server.
pub struct TestTls {
    pub server_config: ServerConfig,
    pub client_config: ClientConfig,
}

pub fn test_tls() -> TestTls {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).expect("self-signed cert");
    let cert_der = cert.serialize_der().expect("serialize cert");
    let key_der = cert.serialize_private_key_der();

    let mut server_config = ServerConfig::new(NoClientAuth::new());
    server_config
        .set_single_cert(vec![Certificate(cert_der.clone())], PrivateKey(key_der))
        .expect("install server cert");

    let mut client_config = ClientConfig::new();
    client_config.root_store.add(&Certificate(cert_der)).expect("trust self-signed cert");

    TestTls { server_config, client_config }
}

/// Spins up a `Host` bound to `addr`, listening and ready to dispatch.
///
/// Callers must have already called [`ensure_init`] *before* entering
/// `sigtree::block_on` — the runtime has to exist before anything can
/// be scheduled on it.
pub async fn spawn_host(addr: SocketAddr) -> (std::sync::Arc<Host>, PeerIdentity, schnorr::KeyPair) {
    let tls = test_tls();
    let identity_key = IdentityKeyPair::random();
    let host = Host::new(HostConfig {
        router: RouterConfig {
            identity_key,
            listen_addr: addr,
            client_config: tls.client_config,
            server_config: tls.server_config,
        },
    })
    .expect("host construction");

    let host = std::sync::Arc::new(host);
    host.listen().await.expect("listen");
    host.start_process_messages();

    let identity = host.router().identity();
    let cosi_key = schnorr::KeyPair::random();
    (host, identity, cosi_key)
}

/// Picks a free loopback port by binding to port 0 and reading it back.
pub fn free_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    listener.local_addr().expect("local addr")
}
