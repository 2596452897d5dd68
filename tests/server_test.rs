use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::Duration;

use tempfile::TempDir;

use tabula::server::protocol::{read_message, write_message, END};
use tabula::server::{Server, ServerConfig};

const MAX: usize = 1 << 20;

fn start(dir: &TempDir, timeout: Duration) -> SocketAddr {
    let config = ServerConfig::new()
        .listen("127.0.0.1:0")
        .data(dir.path())
        .user("admin", "secret")
        .auth_timeout(timeout);
    let server = Server::bind(config).unwrap();
    let addr = server.local_addr().unwrap();
    thread::spawn(move || server.run());
    addr
}

/// Sends one message and gathers the reply messages before `END`.
fn request(conn: &mut TcpStream, msg: &str) -> Vec<String> {
    write_message(conn, msg.as_bytes()).unwrap();
    let mut out = Vec::new();
    loop {
        let reply = read_message(conn, MAX).unwrap().expect("connection closed");
        if reply == END {
            return out;
        }
        out.push(String::from_utf8(reply).unwrap());
    }
}

#[test]
fn test_session_round_trip() {
    let dir = TempDir::new().unwrap();
    let addr = start(&dir, Duration::from_secs(5));
    let mut conn = TcpStream::connect(addr).unwrap();

    assert_eq!(request(&mut conn, "admin:secret"), vec!["Auth succeed"]);
    assert!(request(
        &mut conn,
        "CREATE TABLE t (id UInt32 AUTO INCREMENT, name VARCHAR(8)) PRIMARY KEY(id) pk"
    )
    .is_empty());
    assert_eq!(
        request(&mut conn, r#"INSERT INTO t (name) VALUES ("alice"),("bob")"#),
        vec!["[2]"]
    );
    assert_eq!(
        request(&mut conn, "SELECT id, name FROM t WHERE_INDEX pk id >= 1 AND id <= 2"),
        vec![r#"[1,"alice"]"#, r#"[2,"bob"]"#]
    );

    let err = request(&mut conn, "SELECT nope FROM t");
    assert_eq!(err.len(), 1);
    assert!(err[0].starts_with("Error: "), "{}", err[0]);

    let err = request(&mut conn, "SELEKT");
    assert!(err[0].starts_with("Error: "));

    // The session survives errors.
    assert_eq!(request(&mut conn, "SHOW TABLES"), vec![r#"["t"]"#]);
}

#[test]
fn test_bad_credentials_close_connection() {
    let dir = TempDir::new().unwrap();
    let addr = start(&dir, Duration::from_secs(5));
    let mut conn = TcpStream::connect(addr).unwrap();

    let reply = request(&mut conn, "admin:wrong");
    assert_eq!(reply, vec!["Error: Authentication failed"]);
    assert!(read_message(&mut conn, MAX).unwrap().is_none());
}

#[test]
fn test_auth_timeout() {
    let dir = TempDir::new().unwrap();
    let addr = start(&dir, Duration::from_millis(100));
    let mut conn = TcpStream::connect(addr).unwrap();
    conn.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

    let first = read_message(&mut conn, MAX).unwrap().unwrap();
    assert_eq!(first, b"Error: Authentication failed");
    assert_eq!(read_message(&mut conn, MAX).unwrap().unwrap(), END);
    assert!(read_message(&mut conn, MAX).unwrap().is_none());
}
