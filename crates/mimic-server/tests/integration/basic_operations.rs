//! Integration tests for connection basics, strings and keys.

use std::time::Duration;

use mimic_protocol::Frame;

use crate::helpers::TestServer;

#[tokio::test]
async fn ping_and_echo() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    let resp = c.cmd(&["PING"]).await;
    assert!(matches!(resp, Frame::Simple(ref s) if s == "PONG"));
    assert_eq!(c.get_bulk(&["PING", "hello"]).await, Some("hello".into()));
    assert_eq!(c.get_bulk(&["ECHO", "test"]).await, Some("test".into()));
}

#[tokio::test]
async fn set_get_roundtrip() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.ok(&["SET", "foo", "bar"]).await;
    assert_eq!(c.get_bulk(&["GET", "foo"]).await, Some("bar".into()));
    assert!(matches!(c.cmd(&["GET", "missing"]).await, Frame::Null));
}

#[tokio::test]
async fn set_conditions_and_get() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    assert!(matches!(c.cmd(&["SET", "k", "v", "XX"]).await, Frame::Null));
    c.ok(&["SET", "k", "first", "NX"]).await;
    assert!(matches!(c.cmd(&["SET", "k", "second", "NX"]).await, Frame::Null));
    assert_eq!(
        c.get_bulk(&["SET", "k", "third", "GET"]).await,
        Some("first".into())
    );
    assert_eq!(c.get_bulk(&["GETSET", "k", "fourth"]).await, Some("third".into()));
    assert_eq!(c.get_bulk(&["GETDEL", "k"]).await, Some("fourth".into()));
    assert_eq!(c.get_int(&["EXISTS", "k"]).await, 0);
}

#[tokio::test]
async fn counters() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    assert_eq!(c.get_int(&["INCR", "n"]).await, 1);
    assert_eq!(c.get_int(&["INCRBY", "n", "10"]).await, 11);
    assert_eq!(c.get_int(&["DECRBY", "n", "3"]).await, 8);
    assert_eq!(
        c.get_bulk(&["INCRBYFLOAT", "n", "0.5"]).await,
        Some("8.5".into())
    );

    c.ok(&["SET", "s", "abc"]).await;
    let err = c.err(&["INCR", "s"]).await;
    assert!(err.contains("not an integer"), "{err}");

    c.ok(&["SET", "max", &i64::MAX.to_string()]).await;
    let err = c.err(&["INCR", "max"]).await;
    assert!(err.contains("overflow"), "{err}");
}

#[tokio::test]
async fn mset_mget_append() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.ok(&["MSET", "a", "1", "b", "2"]).await;
    let resp = c.cmd(&["MGET", "a", "nope", "b"]).await;
    let Frame::Array(items) = resp else {
        panic!("expected array");
    };
    assert_eq!(items.len(), 3);
    assert!(matches!(items[1], Frame::Null));

    assert_eq!(c.get_int(&["APPEND", "a", "23"]).await, 3);
    assert_eq!(c.get_int(&["STRLEN", "a"]).await, 3);
}

#[tokio::test]
async fn del_exists_type() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.ok(&["SET", "s", "v"]).await;
    c.get_int(&["RPUSH", "l", "x"]).await;
    assert_eq!(c.get_int(&["EXISTS", "s", "l", "s", "nope"]).await, 3);

    let resp = c.cmd(&["TYPE", "l"]).await;
    assert!(matches!(resp, Frame::Simple(ref s) if s == "list"));
    let resp = c.cmd(&["TYPE", "nope"]).await;
    assert!(matches!(resp, Frame::Simple(ref s) if s == "none"));

    assert_eq!(c.get_int(&["DEL", "s", "l", "nope"]).await, 2);
    assert_eq!(c.get_int(&["DBSIZE"]).await, 0);
}

#[tokio::test]
async fn expiry_lifecycle() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.ok(&["SET", "k", "v", "PX", "100"]).await;
    let pttl = c.get_int(&["PTTL", "k"]).await;
    assert!(pttl > 0 && pttl <= 100, "pttl {pttl}");

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(matches!(c.cmd(&["GET", "k"]).await, Frame::Null));
    assert_eq!(c.get_int(&["TTL", "k"]).await, -2);

    c.ok(&["SET", "k", "v"]).await;
    assert_eq!(c.get_int(&["EXPIRE", "k", "100"]).await, 1);
    assert_eq!(c.get_int(&["PERSIST", "k"]).await, 1);
    assert_eq!(c.get_int(&["TTL", "k"]).await, -1);

    let err = c.err(&["SET", "k", "v", "EX", "0"]).await;
    assert!(err.starts_with("ERR"), "{err}");
}

#[tokio::test]
async fn active_expiry_reclaims_untouched_keys() {
    let server = TestServer::start_with(crate::helpers::ServerOptions {
        hz: Some(50),
        ..Default::default()
    });
    let mut c = server.connect().await;

    for i in 0..20 {
        c.ok(&["SET", &format!("tmp:{i}"), "v", "PX", "50"]).await;
    }
    c.ok(&["SET", "keep", "v"]).await;

    // DBSIZE counts stored keys, so only the background cycle can
    // bring it down
    let mut size = c.get_int(&["DBSIZE"]).await;
    for _ in 0..50 {
        if size == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        size = c.get_int(&["DBSIZE"]).await;
    }
    assert_eq!(size, 1);
}

#[tokio::test]
async fn rename_and_copy() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.ok(&["SET", "a", "1"]).await;
    c.ok(&["RENAME", "a", "b"]).await;
    assert!(matches!(c.cmd(&["GET", "a"]).await, Frame::Null));
    let err = c.err(&["RENAME", "a", "c"]).await;
    assert!(err.contains("no such key"), "{err}");

    c.ok(&["SET", "c", "3"]).await;
    assert_eq!(c.get_int(&["RENAMENX", "b", "c"]).await, 0);
    assert_eq!(c.get_int(&["COPY", "b", "c"]).await, 0);
    assert_eq!(c.get_int(&["COPY", "b", "c", "REPLACE"]).await, 1);
    assert_eq!(c.get_bulk(&["GET", "c"]).await, Some("1".into()));
}

#[tokio::test]
async fn keys_scan_randomkey() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    assert!(matches!(c.cmd(&["RANDOMKEY"]).await, Frame::Null));
    for i in 0..25 {
        c.ok(&["SET", &format!("user:{i}"), "v"]).await;
    }
    c.ok(&["SET", "other", "v"]).await;

    let mut keys = c.get_strings(&["KEYS", "user:*"]).await;
    keys.sort();
    assert_eq!(keys.len(), 25);

    let mut seen = std::collections::HashSet::new();
    let mut cursor = "0".to_string();
    loop {
        let Frame::Array(parts) = c
            .cmd(&["SCAN", &cursor, "MATCH", "user:*", "COUNT", "5"])
            .await
        else {
            panic!("expected array");
        };
        let mut parts = parts.into_iter();
        cursor = crate::helpers::bulk_string(parts.next().unwrap());
        let Some(Frame::Array(batch)) = parts.next() else {
            panic!("expected key batch");
        };
        seen.extend(batch.into_iter().map(crate::helpers::bulk_string));
        if cursor == "0" {
            break;
        }
    }
    assert_eq!(seen.len(), 25);
    assert!(c.get_bulk(&["RANDOMKEY"]).await.is_some());
}

#[tokio::test]
async fn pipelined_commands_reply_in_order() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.send_raw(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n*2\r\n$3\r\nGET\r\n$1\r\nk\r\n*1\r\n$4\r\nPING\r\n")
        .await;
    assert!(matches!(c.read_frame().await, Frame::Simple(ref s) if s == "OK"));
    assert_eq!(
        crate::helpers::bulk_string(c.read_frame().await),
        "v".to_string()
    );
    assert!(matches!(c.read_frame().await, Frame::Simple(ref s) if s == "PONG"));
}

#[tokio::test]
async fn errors_keep_connection_open() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    let err = c.err(&["NOTACOMMAND", "x"]).await;
    assert!(err.starts_with("ERR unknown command"), "{err}");
    let err = c.err(&["GET"]).await;
    assert!(err.contains("wrong number of arguments"), "{err}");

    c.get_int(&["RPUSH", "l", "x"]).await;
    let err = c.err(&["GET", "l"]).await;
    assert!(err.starts_with("WRONGTYPE"), "{err}");

    c.ok(&["SET", "still", "here"]).await;
}

#[tokio::test]
async fn malformed_input_closes_connection() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.send_raw(b"?garbage\r\n").await;
    let Some(Frame::Error(msg)) = c.try_read_frame().await else {
        panic!("expected protocol error");
    };
    assert!(msg.contains("Protocol error"), "{msg}");
    assert!(c.try_read_frame().await.is_none());
}

#[tokio::test]
async fn quit_replies_then_closes() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.ok(&["QUIT"]).await;
    assert!(c.try_read_frame().await.is_none());
}
