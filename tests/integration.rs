//! Black-box loopback tests driving the compiled server binary over real
//! TCP sockets, covering the end-to-end scenarios of spec.md §8.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::time::sleep;

struct Server {
    child: Child,
    port: u16,
}

impl Server {
    async fn start(extra_args: &[&str]) -> Self {
        let port = pick_port().await;
        let mut args = vec!["-p".to_string(), port.to_string()];
        args.extend(extra_args.iter().map(|s| s.to_string()));

        let child = Command::new(env!("CARGO_BIN_EXE_redis-lite-server"))
            .args(&args)
            .kill_on_drop(true)
            .spawn()
            .expect("spawn server binary");

        wait_for_port(port).await;
        Server { child, port }
    }

    async fn connect(&self) -> TcpStream {
        TcpStream::connect(("127.0.0.1", self.port)).await.unwrap()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.child.start_kill();
    }
}

async fn pick_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_port(port: u16) {
    let addr: SocketAddr = ([127, 0, 0, 1], port).into();
    for _ in 0..100 {
        if TcpStream::connect(addr).await.is_ok() {
            return;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("server never started listening on port {port}");
}

async fn read_n(stream: &mut TcpStream, n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    stream.read_exact(&mut buf).await.unwrap();
    buf
}

#[tokio::test]
async fn ping_and_echo() {
    let server = Server::start(&[]).await;
    let mut conn = server.connect().await;

    conn.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
    assert_eq!(read_n(&mut conn, 7).await, b"+PONG\r\n");

    conn.write_all(b"*2\r\n$4\r\nECHO\r\n$3\r\nhey\r\n").await.unwrap();
    assert_eq!(read_n(&mut conn, 9).await, b"$3\r\nhey\r\n");
}

#[tokio::test]
async fn set_with_px_expires() {
    let server = Server::start(&[]).await;
    let mut conn = server.connect().await;

    conn.write_all(b"*5\r\n$3\r\nSET\r\n$3\r\nkey\r\n$3\r\nval\r\n$2\r\nPX\r\n$3\r\n100\r\n")
        .await
        .unwrap();
    assert_eq!(read_n(&mut conn, 5).await, b"+OK\r\n");

    conn.write_all(b"*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n").await.unwrap();
    assert_eq!(read_n(&mut conn, 9).await, b"$3\r\nval\r\n");

    sleep(Duration::from_millis(150)).await;

    conn.write_all(b"*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n").await.unwrap();
    assert_eq!(read_n(&mut conn, 5).await, b"$-1\r\n");
}

async fn read_line(stream: &mut TcpStream) -> Vec<u8> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        stream.read_exact(&mut byte).await.unwrap();
        line.push(byte[0]);
        if line.ends_with(b"\r\n") {
            return line;
        }
    }
}

#[tokio::test]
async fn info_on_primary_reports_role_and_replid() {
    let server = Server::start(&[]).await;
    let mut conn = server.connect().await;

    conn.write_all(b"*2\r\n$4\r\nINFO\r\n$11\r\nreplication\r\n")
        .await
        .unwrap();

    let header = read_line(&mut conn).await; // "$<len>\r\n"
    let declared_len: usize = std::str::from_utf8(&header[1..header.len() - 2])
        .unwrap()
        .parse()
        .unwrap();
    let body = read_n(&mut conn, declared_len + 2).await;

    let text = String::from_utf8_lossy(&body);
    assert!(text.contains("role:master"));
    assert!(text.contains("master_replid:"));
    assert!(text.contains("master_repl_offset:0"));
}

#[tokio::test]
async fn unknown_config_key_gets_an_error_reply() {
    let server = Server::start(&[]).await;
    let mut conn = server.connect().await;

    conn.write_all(b"*3\r\n$6\r\nCONFIG\r\n$3\r\nGET\r\n$9\r\nmaxmemory\r\n")
        .await
        .unwrap();

    let mut buf = vec![0u8; 64];
    let n = conn.read(&mut buf).await.unwrap();
    assert_eq!(buf[0], b'-');
    assert!(String::from_utf8_lossy(&buf[..n]).contains("unknown CONFIG parameter"));
}

#[tokio::test]
async fn wait_with_no_replicas_returns_zero_immediately() {
    let server = Server::start(&[]).await;
    let mut conn = server.connect().await;

    conn.write_all(b"*3\r\n$4\r\nWAIT\r\n$1\r\n0\r\n$3\r\n100\r\n").await.unwrap();
    assert_eq!(read_n(&mut conn, 4).await, b":0\r\n");
}

#[tokio::test]
async fn replica_handshake_and_propagation() {
    let primary = Server::start(&[]).await;
    let replica = Server::start(&["--replicaof", &format!("127.0.0.1 {}", primary.port)]).await;

    // Give the replica's outbound handshake time to complete.
    sleep(Duration::from_millis(300)).await;

    let mut primary_conn = primary.connect().await;
    primary_conn
        .write_all(b"*3\r\n$3\r\nSET\r\n$1\r\nx\r\n$1\r\n1\r\n")
        .await
        .unwrap();
    assert_eq!(read_n(&mut primary_conn, 5).await, b"+OK\r\n");

    sleep(Duration::from_millis(200)).await;

    let mut replica_conn = replica.connect().await;
    replica_conn.write_all(b"*2\r\n$3\r\nGET\r\n$1\r\nx\r\n").await.unwrap();
    assert_eq!(read_n(&mut replica_conn, 9).await, b"$1\r\n1\r\n");

    // The replica answers the primary's REPLCONF GETACK on its own link,
    // so WAIT should see it catch up well within the timeout.
    primary_conn
        .write_all(b"*3\r\n$4\r\nWAIT\r\n$1\r\n1\r\n$4\r\n2000\r\n")
        .await
        .unwrap();
    assert_eq!(read_n(&mut primary_conn, 4).await, b":1\r\n");
}
