//! Shared utilities for integration testing.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tcp_balancer::config::{BackendConfig, BalancerConfig, ListenerConfig, ReactorConfig};
use tcp_balancer::lifecycle::{Balancer, RunSummary, Shutdown};
use tcp_balancer::load_balancer::PolicyKind;
use tcp_balancer::reactor::ReactorError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// A mock backend listening on an ephemeral port.
#[allow(dead_code)]
pub struct MockBackend {
    pub addr: SocketAddr,
    pub connections: Arc<AtomicUsize>,
    pub requests: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl MockBackend {
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

/// Start a backend that answers every read with `respond(request)`.
pub async fn start_programmable_backend<F>(respond: F) -> MockBackend
where
    F: Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let requests = Arc::new(AtomicUsize::new(0));
    let respond = Arc::new(respond);

    let (conns, reqs) = (connections.clone(), requests.clone());
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            conns.fetch_add(1, Ordering::SeqCst);
            let respond = respond.clone();
            let reqs = reqs.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                loop {
                    let n = match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => n,
                    };
                    reqs.fetch_add(1, Ordering::SeqCst);
                    if socket.write_all(&respond(&buf[..n])).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    MockBackend {
        addr,
        connections,
        requests,
    }
}

/// Start a backend that replies with its own name.
#[allow(dead_code)]
pub async fn start_named_backend(name: &'static str) -> MockBackend {
    start_programmable_backend(move |_| name.as_bytes().to_vec()).await
}

/// Balancer config on an ephemeral port with a short poll timeout.
pub fn balancer_config(backends: &[SocketAddr], policy: PolicyKind) -> BalancerConfig {
    BalancerConfig {
        listener: ListenerConfig {
            bind_address: "127.0.0.1:0".into(),
            ..ListenerConfig::default()
        },
        backends: backends
            .iter()
            .map(|addr| BackendConfig::new(addr.to_string()))
            .collect(),
        policy,
        reactor: ReactorConfig {
            poll_timeout_ms: 50,
            ..ReactorConfig::default()
        },
        ..BalancerConfig::default()
    }
}

/// A balancer running on its own thread.
#[allow(dead_code)]
pub struct RunningBalancer {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<Result<RunSummary, ReactorError>>,
}

pub fn spawn_balancer(config: BalancerConfig) -> RunningBalancer {
    let balancer = Balancer::bind(config).unwrap();
    let addr = balancer.local_addr().unwrap();
    let shutdown = balancer.shutdown_handle();
    let handle = std::thread::spawn(move || balancer.run());

    RunningBalancer {
        addr,
        shutdown,
        handle,
    }
}

/// Send one request on `stream` and wait for the reply.
#[allow(dead_code)]
pub async fn exchange(stream: &mut TcpStream, request: &[u8]) -> Vec<u8> {
    stream.write_all(request).await.unwrap();
    let mut buf = [0u8; 1024];
    let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .expect("no reply within 5s")
        .unwrap();
    buf[..n].to_vec()
}
