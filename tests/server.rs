//! End-to-end: a real server on a loopback port, driven with raw HTTP/1.1.

use std::net::SocketAddr;
use std::time::Duration;

use si::middleware;
use si::{Context, Router, Server, ShutdownHandle};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

async fn start(router: Router) -> (SocketAddr, ShutdownHandle, JoinHandle<Result<(), si::Error>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::from_listener(listener).shutdown_timeout(Duration::from_secs(2));
    let handle = server.handle();
    let task = tokio::spawn(server.serve(router));
    (addr, handle, task)
}

/// Sends one request with `Connection: close` and returns everything the
/// server wrote back.
async fn roundtrip(addr: SocketAddr, head: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let req = format!("{head}\r\nHost: test\r\nConnection: close\r\n\r\n");
    stream.write_all(req.as_bytes()).await.unwrap();

    let mut out = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut out))
        .await
        .unwrap()
        .unwrap();
    String::from_utf8(out).unwrap()
}

async fn hello(mut ctx: Context) {
    let name = ctx.param_string("name").to_owned();
    let _ = ctx.ss(&format!("hello {name}")).await;
}

fn app() -> Router {
    Router::new()
        .middleware(middleware::request_id())
        .get("/hello/{name}", hello)
        .get("/ticks", |mut ctx: Context| async move {
            let _ = ctx
                .sse(|mut sse| async move {
                    sse.event("tick", "one").await?;
                    sse.event("tick", "two\nthree").await
                })
                .await;
        })
        .post("/echo", |mut ctx: Context| async move {
            let body = ctx.raw_content().await.unwrap_or_default();
            let _ = ctx.sb(&body).await;
        })
}

#[tokio::test]
async fn serves_a_route() {
    let (addr, handle, task) = start(app()).await;

    let res = roundtrip(addr, "GET /hello/ada HTTP/1.1").await;
    assert!(res.starts_with("HTTP/1.1 200 OK\r\n"), "{res}");
    assert!(res.to_ascii_lowercase().contains("x-request-id: "), "{res}");
    assert!(res.contains("hello ada"), "{res}");

    handle.stop().await;
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn unknown_route_and_wrong_method() {
    let (addr, handle, task) = start(app()).await;

    let res = roundtrip(addr, "GET /nope HTTP/1.1").await;
    assert!(res.starts_with("HTTP/1.1 404 Not Found\r\n"), "{res}");
    assert!(res.contains("404 page not found"), "{res}");

    let res = roundtrip(addr, "DELETE /hello/ada HTTP/1.1").await;
    assert!(res.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"), "{res}");
    assert!(res.to_ascii_lowercase().contains("allow: get"), "{res}");

    handle.stop().await;
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn request_body_reaches_handler() {
    let (addr, handle, task) = start(app()).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"POST /echo HTTP/1.1\r\nHost: test\r\nConnection: close\r\nContent-Length: 5\r\n\r\nhello")
        .await
        .unwrap();
    let mut out = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut out))
        .await
        .unwrap()
        .unwrap();
    let res = String::from_utf8(out).unwrap();
    assert!(res.starts_with("HTTP/1.1 200 OK\r\n"), "{res}");
    assert!(res.contains("hello"), "{res}");

    handle.stop().await;
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn streams_events() {
    let (addr, handle, task) = start(app()).await;

    let res = roundtrip(addr, "GET /ticks HTTP/1.1").await;
    assert!(res.starts_with("HTTP/1.1 200 OK\r\n"), "{res}");
    assert!(res.to_ascii_lowercase().contains("content-type: text/event-stream"), "{res}");
    assert!(res.contains("event: tick\ndata: one\n\n"), "{res}");
    assert!(res.contains("event: tick\ndata: two\ndata: three\n\n"), "{res}");

    handle.stop().await;
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn stop_is_idempotent() {
    let (_, handle, task) = start(app()).await;

    handle.stop().await;
    handle.stop().await;
    assert!(handle.is_stopped());
    task.await.unwrap().unwrap();
}
