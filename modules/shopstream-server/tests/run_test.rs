//! Process lifecycle: serve, stop on shutdown, and tear down in order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use shopstream_aggregates::{CacheError, MemoryAggregateStore, MemoryCache, ResponseCache};
use shopstream_common::{Config, Role, PRODUCT_UPDATES};
use shopstream_events::{
    Dispatcher, DispatcherConfig, HandlerBindings, LogConsumer, LogMessage, MemoryLog,
    PublishError, TopicPartition, TransportError,
};
use shopstream_server::roles::{assemble, run, Assembled, Backends, LogBackend};
use shopstream_server::shutdown::Shutdown;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Idles on poll and fails to close. Optionally fails to subscribe.
struct StubbornConsumer {
    fail_subscribe: bool,
    close_attempted: Arc<AtomicBool>,
}

#[async_trait]
impl LogConsumer for StubbornConsumer {
    async fn subscribe(&mut self, _topics: &[String]) -> Result<(), TransportError> {
        if self.fail_subscribe {
            return Err(TransportError::Subscribe("broker unreachable".into()));
        }
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Option<LogMessage>, TransportError> {
        tokio::time::sleep(timeout).await;
        Ok(None)
    }

    async fn store_offset(&mut self, _position: &TopicPartition) -> Result<(), TransportError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.close_attempted.store(true, Ordering::Release);
        Err(TransportError::Closed)
    }
}

fn stubborn(fail_subscribe: bool) -> (Dispatcher, Arc<AtomicBool>) {
    let close_attempted = Arc::new(AtomicBool::new(false));
    let consumer = StubbornConsumer {
        fail_subscribe,
        close_attempted: close_attempted.clone(),
    };
    let dispatcher = Dispatcher::new(
        Box::new(consumer),
        "stubborn",
        vec![PRODUCT_UPDATES.to_string()],
        HandlerBindings::new(),
        DispatcherConfig {
            poll_timeout: Duration::from_millis(10),
            ..DispatcherConfig::default()
        },
    );
    (dispatcher, close_attempted)
}

fn config() -> Config {
    Config::from_lookup(|key| match key {
        "CONSUMER_POLL_TIMEOUT_MS" => Some("20".to_string()),
        _ => None,
    })
    .unwrap()
}

fn assembled(cache: Arc<MemoryCache>) -> Assembled {
    let store = Arc::new(MemoryAggregateStore::new());
    let backends = Backends {
        log: LogBackend::Memory(MemoryLog::new()),
        statistics: store.clone(),
        recommendations: store,
        cache,
    };
    let roles = [Role::Products, Role::Analytics, Role::Recommendations];
    assemble(&roles, &backends, &config(), None)
}

async fn get_health(addr: std::net::SocketAddr) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

#[tokio::test]
async fn shutdown_closes_publishers_readers_and_consumers() {
    let cache = Arc::new(MemoryCache::new());
    let mut assembled = assembled(cache.clone());
    let (broken, close_attempted) = stubborn(false);
    assembled.dispatchers.push(broken);
    let publisher = assembled.publishers[0].clone();
    assert_eq!(assembled.readers.len(), 1);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let server = tokio::spawn(run(assembled, listener, shutdown.clone()));

    let response = get_health(addr).await;
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");

    shutdown.trigger();
    let outcome = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("run did not return after shutdown")
        .unwrap();
    // A consumer that fails to close does not fail the process.
    assert!(outcome.is_ok(), "{outcome:?}");
    assert!(close_attempted.load(Ordering::Acquire));

    assert!(matches!(
        publisher.publish(b"late").await,
        Err(PublishError::Send(TransportError::Closed))
    ));
    assert!(matches!(cache.get("k").await, Err(CacheError::Closed)));
}

#[tokio::test]
async fn subscribe_failure_aborts_startup() {
    let cache = Arc::new(MemoryCache::new());
    let mut assembled = assembled(cache);
    let (broken, _) = stubborn(true);
    assembled.dispatchers.push(broken);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let err = run(assembled, listener, Shutdown::new()).await.unwrap_err();
    assert!(err.to_string().contains("stubborn"), "{err:#}");
}
