/// Serves over a real socket and checks that records reach SQLite before
/// `run` returns.
use api_monitor::{
    config::Config,
    metrics::detached_handle,
    models::LogQuery,
    server,
    store::{LogStore, SqliteStore},
};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

async fn http_get(addr: std::net::SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: localhost\r\nUser-Agent: server-test\r\nConnection: close\r\n\r\n",
        path
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

#[tokio::test]
async fn test_run_serves_and_flushes_logs_on_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("monitor.db");

    let mut config = Config::default();
    config.database.path = db_path.to_string_lossy().to_string();
    config.rate_limit.capacity = 2;
    config.rate_limit.rpm = 1;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let server = tokio::spawn(server::run(
        config,
        listener,
        Arc::new(detached_handle()),
        async move {
            let _ = stop_rx.await;
        },
    ));

    let first = http_get(addr, "/").await;
    let second = http_get(addr, "/error").await;
    let third = http_get(addr, "/").await;

    assert!(first.starts_with("HTTP/1.1 200"), "{}", first);
    assert!(first.contains("System Operational"));
    assert!(second.starts_with("HTTP/1.1 500"), "{}", second);
    assert!(second.contains("Internal Server Error"));
    assert!(third.starts_with("HTTP/1.1 429"), "{}", third);

    stop_tx.send(()).unwrap();
    server.await.unwrap().unwrap();

    let store = SqliteStore::open(&db_path).await.unwrap();
    let logs = store.query_logs(&LogQuery::default()).await.unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].endpoint, "/error");
    assert_eq!(logs[0].status_code, 500);
    assert_eq!(logs[1].endpoint, "/");
    assert_eq!(logs[1].user_agent.as_deref(), Some("server-test"));
}
