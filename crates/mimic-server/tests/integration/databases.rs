//! Integration tests for SELECT, MOVE, COPY ... DB, SWAPDB and the
//! flush commands.

use std::time::Duration;

use mimic_protocol::Frame;

use crate::helpers::{ServerOptions, TestServer};

#[tokio::test]
async fn databases_are_isolated() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.ok(&["SET", "k", "zero"]).await;
    c.ok(&["SELECT", "1"]).await;
    assert!(matches!(c.cmd(&["GET", "k"]).await, Frame::Null));
    c.ok(&["SET", "k", "one"]).await;
    c.ok(&["SELECT", "0"]).await;
    assert_eq!(c.get_bulk(&["GET", "k"]).await, Some("zero".into()));

    // selection is per connection
    let mut other = server.connect().await;
    assert_eq!(other.get_bulk(&["GET", "k"]).await, Some("zero".into()));
}

#[tokio::test]
async fn select_out_of_range() {
    let server = TestServer::start_with(ServerOptions {
        databases: Some(2),
        ..Default::default()
    });
    let mut c = server.connect().await;

    c.ok(&["SELECT", "1"]).await;
    let err = c.err(&["SELECT", "2"]).await;
    assert_eq!(err, "ERR DB index is out of range");
    let err = c.err(&["SELECT", "-1"]).await;
    assert_eq!(err, "ERR DB index is out of range");
}

#[tokio::test]
async fn move_key_between_databases() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.ok(&["SET", "k", "v", "EX", "100"]).await;
    assert_eq!(c.get_int(&["MOVE", "k", "1"]).await, 1);
    assert_eq!(c.get_int(&["EXISTS", "k"]).await, 0);
    assert_eq!(c.get_int(&["MOVE", "k", "1"]).await, 0);

    c.ok(&["SELECT", "1"]).await;
    assert_eq!(c.get_bulk(&["GET", "k"]).await, Some("v".into()));
    // the ttl travels with the key
    assert!(c.get_int(&["TTL", "k"]).await > 0);

    // destination already has the key
    c.ok(&["SELECT", "0"]).await;
    c.ok(&["SET", "k", "again"]).await;
    assert_eq!(c.get_int(&["MOVE", "k", "1"]).await, 0);

    let err = c.err(&["MOVE", "k", "0"]).await;
    assert!(err.contains("same"), "{err}");
}

#[tokio::test]
async fn copy_to_other_database() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.get_int(&["RPUSH", "l", "a", "b"]).await;
    assert_eq!(c.get_int(&["COPY", "l", "l2", "DB", "5"]).await, 1);
    c.get_int(&["RPUSH", "l", "c"]).await;

    c.ok(&["SELECT", "5"]).await;
    assert_eq!(c.get_strings(&["LRANGE", "l2", "0", "-1"]).await, vec!["a", "b"]);
}

#[tokio::test]
async fn swapdb_exchanges_contents() {
    let server = TestServer::start();
    let mut c0 = server.connect().await;
    let mut c1 = server.connect().await;
    c1.ok(&["SELECT", "1"]).await;

    c0.ok(&["SET", "k", "from-0"]).await;
    c1.ok(&["SET", "k", "from-1"]).await;
    c0.ok(&["SWAPDB", "0", "1"]).await;

    assert_eq!(c0.get_bulk(&["GET", "k"]).await, Some("from-1".into()));
    assert_eq!(c1.get_bulk(&["GET", "k"]).await, Some("from-0".into()));

    let err = c0.err(&["SWAPDB", "0", "99"]).await;
    assert!(err.contains("out of range"), "{err}");
}

#[tokio::test]
async fn swapdb_wakes_clients_blocked_on_new_data() {
    let server = TestServer::start();
    let mut waiter = server.connect().await;
    let mut admin = server.connect().await;

    admin.ok(&["SELECT", "1"]).await;
    admin.get_int(&["RPUSH", "q", "x"]).await;

    waiter.send(&["BLPOP", "q", "0"]).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    admin.ok(&["SWAPDB", "0", "1"]).await;

    let Frame::Array(items) = waiter.read_frame().await else {
        panic!("expected array");
    };
    assert_eq!(items.len(), 2);
}

#[tokio::test]
async fn swapdb_invalidates_watches() {
    let server = TestServer::start();
    let mut c = server.connect().await;
    let mut admin = server.connect().await;

    c.ok(&["SET", "k", "v"]).await;
    admin.ok(&["SELECT", "1"]).await;
    admin.ok(&["SET", "k", "v"]).await;

    c.ok(&["WATCH", "k"]).await;
    admin.ok(&["SWAPDB", "0", "1"]).await;
    c.ok(&["MULTI"]).await;
    c.cmd(&["GET", "k"]).await;
    assert!(matches!(c.cmd(&["EXEC"]).await, Frame::NullArray));
}

#[tokio::test]
async fn flushdb_and_flushall() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.ok(&["SET", "a", "1"]).await;
    c.ok(&["SELECT", "1"]).await;
    c.ok(&["SET", "b", "2"]).await;

    c.ok(&["FLUSHDB"]).await;
    assert_eq!(c.get_int(&["DBSIZE"]).await, 0);
    c.ok(&["SELECT", "0"]).await;
    assert_eq!(c.get_int(&["DBSIZE"]).await, 1);

    c.ok(&["FLUSHALL"]).await;
    assert_eq!(c.get_int(&["DBSIZE"]).await, 0);
}
