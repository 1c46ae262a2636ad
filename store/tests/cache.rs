//! Cache behavior against a live (local) HKP endpoint.

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use sequoia_openpgp::cert::CertBuilder;
use sequoia_openpgp::serialize::Serialize;
use sequoia_openpgp::Cert;
use vouch_net::{ClientConfig, KeyServerClient, RetryStrategy};
use vouch_pgp::KeyId;
use vouch_store::{CacheConfig, CacheError, KeysCache};

/// Responds the same status/body to every request, counting hits.
struct MockServer {
    addr: SocketAddr,
    hits: Arc<AtomicUsize>,
}

impl MockServer {
    fn spawn(status: u16, body: Vec<u8>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));

        let thread_hits = Arc::clone(&hits);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                thread_hits.fetch_add(1, Ordering::SeqCst);
                respond(stream, status, &body);
            }
        });

        MockServer { addr, hits }
    }

    fn uri(&self) -> String {
        format!("hkp://127.0.0.1:{}", self.addr.port())
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

fn respond(mut stream: TcpStream, status: u16, body: &[u8]) {
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut line = String::new();
    if reader.read_line(&mut line).is_err() {
        return;
    }
    loop {
        let mut header = String::new();
        match reader.read_line(&mut header) {
            Ok(0) => break,
            Ok(_) if header == "\r\n" || header == "\n" => break,
            Ok(_) => continue,
            Err(_) => return,
        }
    }
    let reason = if status == 200 { "OK" } else { "Not Found" };
    let _ = write!(
        stream,
        "HTTP/1.1 {} {}\r\nContent-Type: application/pgp-keys\r\n\
         Content-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        reason,
        body.len()
    );
    let _ = stream.write_all(body);
}

fn test_cert() -> Cert {
    let (cert, _rev) = CertBuilder::new()
        .add_userid("Cache Test <cache@example.org>")
        .add_signing_subkey()
        .generate()
        .unwrap();
    cert
}

fn armored(cert: &Cert) -> Vec<u8> {
    let mut bytes = Vec::new();
    cert.armored().serialize(&mut bytes).unwrap();
    bytes
}

fn primary_id(cert: &Cert) -> KeyId {
    KeyId::from_bytes(cert.fingerprint().as_bytes()).unwrap()
}

fn client(uri: String) -> KeyServerClient {
    let config = ClientConfig {
        servers: vec![uri],
        ..ClientConfig::default()
    };
    KeyServerClient::new(config).unwrap().with_retry(RetryStrategy {
        max_retries: 2,
        base_delay: Duration::from_millis(1),
        max_total_backoff: Duration::from_secs(1),
    })
}

fn cache_at(root: &std::path::Path, uri: String) -> KeysCache {
    KeysCache::new(CacheConfig::new(root), Some(client(uri))).unwrap()
}

#[test]
fn fetch_installs_and_second_lookup_is_local() {
    let cert = test_cert();
    let server = MockServer::spawn(200, armored(&cert));
    let dir = tempfile::tempdir().unwrap();
    let cache = cache_at(dir.path(), server.uri());
    let id = primary_id(&cert);

    let ring = cache.get_key_ring(&id).unwrap();
    assert_eq!(
        ring.primary_fingerprint().as_hex(),
        cert.fingerprint().to_hex()
    );
    assert!(cache.ring_path(&id).exists());

    // Served from disk: no further network traffic.
    cache.get_key_ring(&id).unwrap();
    assert_eq!(server.hits(), 1);
}

#[test]
fn not_found_writes_one_marker_and_is_remembered() {
    let server = MockServer::spawn(404, Vec::new());
    let dir = tempfile::tempdir().unwrap();
    let cache = cache_at(dir.path(), server.uri());
    let id = KeyId::LongId(0x0102_0304_0506_0708);

    assert!(matches!(
        cache.get_key_ring(&id),
        Err(CacheError::KeyNotFound(_))
    ));
    let marker = dir.path().join("01/02/0102030405060708.asc.404");
    assert!(marker.exists());

    // Within the TTL the negative answer is local.
    assert!(matches!(
        cache.get_key_ring(&id),
        Err(CacheError::KeyNotFound(_))
    ));
    assert_eq!(server.hits(), 1);
}

#[test]
fn expired_marker_triggers_refetch() {
    let server = MockServer::spawn(404, Vec::new());
    let dir = tempfile::tempdir().unwrap();
    let mut config = CacheConfig::new(dir.path());
    config.not_found_ttl = Duration::ZERO;
    let cache = KeysCache::new(config, Some(client(server.uri()))).unwrap();
    let id = KeyId::LongId(0x0102_0304_0506_0708);

    let _ = cache.get_key_ring(&id);
    let _ = cache.get_key_ring(&id);
    // Zero TTL: each call refreshes the marker from the network.
    assert_eq!(server.hits(), 2);
}

#[test]
fn offline_mode_never_touches_the_network() {
    let cert = test_cert();
    let server = MockServer::spawn(200, armored(&cert));
    let dir = tempfile::tempdir().unwrap();
    let mut config = CacheConfig::new(dir.path());
    config.offline = true;
    let cache = KeysCache::new(config, Some(client(server.uri()))).unwrap();

    assert!(matches!(
        cache.get_key_ring(&primary_id(&cert)),
        Err(CacheError::Offline(_))
    ));
    assert_eq!(server.hits(), 0);
}

#[test]
fn garbage_response_is_not_installed() {
    let server = MockServer::spawn(200, b"this is not a key ring".to_vec());
    let dir = tempfile::tempdir().unwrap();
    let cache = cache_at(dir.path(), server.uri());
    let id = KeyId::LongId(0xAABB_CCDD_EEFF_0011);

    assert!(matches!(
        cache.get_key_ring(&id),
        Err(CacheError::Ring { .. })
    ));
    assert!(!cache.ring_path(&id).exists());
}

#[test]
fn concurrent_lookups_fetch_once() {
    let cert = test_cert();
    let server = MockServer::spawn(200, armored(&cert));
    let dir = tempfile::tempdir().unwrap();
    let cache = cache_at(dir.path(), server.uri());
    let id = primary_id(&cert);

    thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = &cache;
                let id = id.clone();
                scope.spawn(move || {
                    cache.get_key_ring(&id).unwrap().primary_fingerprint()
                })
            })
            .collect();
        let fingerprints: Vec<_> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        for fp in &fingerprints {
            assert_eq!(fp.as_hex(), cert.fingerprint().to_hex());
        }
    });

    assert_eq!(server.hits(), 1);

    // No temp droppings either.
    let leftovers: Vec<_> = walk(dir.path())
        .into_iter()
        .filter(|p| {
            let name = p.file_name().unwrap().to_string_lossy().into_owned();
            !name.ends_with(".asc")
        })
        .collect();
    assert!(leftovers.is_empty(), "unexpected files: {leftovers:?}");
}

fn walk(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(next) = stack.pop() {
        for entry in std::fs::read_dir(next).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files
}
