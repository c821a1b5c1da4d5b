//! Start/stop semantics of the server against real sockets.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use switchyard::database::Database;
use switchyard::http::SHUTDOWN_TIMEOUT;
use switchyard::{Context, Server, ServerError, State};

mod common;

fn recorder() -> Arc<Mutex<Vec<String>>> {
    Arc::new(Mutex::new(Vec::new()))
}

fn entries(log: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
    log.lock().unwrap().clone()
}

struct MemoryDatabase {
    log: Arc<Mutex<Vec<String>>>,
}

impl Database for MemoryDatabase {
    fn driver(&self) -> &str {
        "memory"
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.log.lock().unwrap().push("database closed".into());
        })
    }
}

#[tokio::test]
async fn stop_before_start_is_a_noop() {
    let server = Arc::new(Server::new(common::test_config()).unwrap());
    server.stop().await;
    assert_eq!(server.state(), State::Created);

    let running = common::start(Arc::try_unwrap(server).unwrap()).await;
    assert!(running.server.is_ready());
    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn concurrent_start_has_a_single_winner() {
    let server = Arc::new(Server::new(common::test_config()).unwrap());

    let mut first = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.start().await })
    };
    let mut second = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.start().await })
    };
    common::wait_ready(&server).await;

    // The loser returns immediately; the winner only after stop.
    let (loser, first_won) = tokio::select! {
        result = &mut first => (result.unwrap(), false),
        result = &mut second => (result.unwrap(), true),
    };
    assert!(matches!(loser, Err(ServerError::AlreadyRunning)));
    let winner = if first_won { first } else { second };

    server.stop().await;
    winner.await.unwrap().unwrap();
    assert_eq!(server.state(), State::Stopped);
}

#[tokio::test]
async fn start_after_stop_reports_already_stopped() {
    let running = common::start(Server::new(common::test_config()).unwrap()).await;
    let server = Arc::clone(&running.server);
    running.shutdown().await.unwrap();

    assert!(matches!(server.start().await, Err(ServerError::AlreadyStopped)));
    // A second stop returns at once.
    tokio::time::timeout(Duration::from_secs(1), server.stop())
        .await
        .unwrap();
}

#[tokio::test]
async fn serves_requests_over_tcp() {
    let mut server = Server::new(common::test_config()).unwrap();
    server
        .router()
        .get("/hello/{name}", |ctx: Context| async move {
            format!("hello {}", ctx.param("name").unwrap_or_default())
        });
    let running = common::start(server).await;

    let response = common::client()
        .get(running.url("/hello/world"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(response.text().await.unwrap(), "hello world");

    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn hooks_run_in_registration_order() {
    let log = recorder();
    let mut config = common::test_config();
    config.database.connection = "memory".into();
    let mut server = Server::new(config).unwrap();

    for name in ["startup 1", "startup 2"] {
        let log = Arc::clone(&log);
        server.on_startup(move |server| {
            let log = Arc::clone(&log);
            async move {
                assert!(server.is_ready());
                log.lock().unwrap().push(name.to_string());
            }
        });
    }
    for name in ["shutdown 1", "shutdown 2"] {
        let log = Arc::clone(&log);
        server.on_shutdown(move |_server| {
            let log = Arc::clone(&log);
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                log.lock().unwrap().push(name.to_string());
            }
        });
    }
    server.set_database(Arc::new(MemoryDatabase {
        log: Arc::clone(&log),
    }));

    let running = common::start(server).await;
    tokio::time::timeout(Duration::from_secs(2), async {
        while entries(&log).len() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    // Stop returns only after the shutdown hooks completed.
    running.server.stop().await;
    assert_eq!(
        entries(&log),
        ["startup 1", "startup 2", "shutdown 1", "shutdown 2", "database closed"]
    );
    running.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn in_flight_requests_finish_during_stop() {
    let mut server = Server::new(common::test_config()).unwrap();
    server.router().get("/slow", |_ctx: Context| async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        "done"
    });
    let running = common::start(server).await;

    let request = tokio::spawn(common::client().get(running.url("/slow")).send());
    tokio::time::sleep(Duration::from_millis(50)).await;

    running.shutdown().await.unwrap();
    let response = request.await.unwrap().unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "done");
}

#[tokio::test]
async fn stuck_request_does_not_hold_stop_past_the_drain_bound() {
    let mut config = common::test_config();
    config.server.request_timeout_secs = 60;
    let mut server = Server::new(config).unwrap();
    server.router().get("/stuck", |_ctx: Context| async {
        tokio::time::sleep(Duration::from_secs(30)).await;
        "late"
    });
    let log = recorder();
    {
        let log = Arc::clone(&log);
        server.on_shutdown(move |_server| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push("shutdown hook".into());
            }
        });
    }
    let running = common::start(server).await;

    let request = tokio::spawn(common::client().get(running.url("/stuck")).send());
    tokio::time::sleep(Duration::from_millis(100)).await;

    let began = Instant::now();
    running.server.stop().await;
    let elapsed = began.elapsed();
    assert!(elapsed >= SHUTDOWN_TIMEOUT, "stop returned after {elapsed:?}");
    assert!(elapsed < SHUTDOWN_TIMEOUT + Duration::from_secs(2), "stop took {elapsed:?}");
    assert_eq!(entries(&log), ["shutdown hook"]);
    assert_eq!(running.server.state(), State::Stopped);

    request.abort();
    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn bind_failure_is_returned_from_start() {
    let occupied = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut config = common::test_config();
    config.server.port = occupied.local_addr().unwrap().port();

    let server = Arc::new(Server::new(config).unwrap());
    let err = server.start().await.unwrap_err();
    assert!(matches!(err, ServerError::Listener(_)));
    assert_eq!(server.state(), State::Stopped);
    assert!(server.local_addr().is_none());

    // Stop after a failed start does not hang.
    tokio::time::timeout(Duration::from_secs(1), server.stop())
        .await
        .unwrap();
}

#[tokio::test]
async fn base_url_reports_the_bound_port() {
    let running = common::start(Server::new(common::test_config()).unwrap()).await;
    let port = running.server.local_addr().unwrap().port();
    assert_eq!(running.server.base_url(), format!("http://127.0.0.1:{port}"));
    running.shutdown().await.unwrap();
}
