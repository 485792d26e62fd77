//! Integration tests for lists, hashes and sets.

use mimic_protocol::Frame;

use crate::helpers::TestServer;

// --- lists ---

#[tokio::test]
async fn list_push_pop() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    assert_eq!(c.get_int(&["LPUSH", "list", "a"]).await, 1);
    assert_eq!(c.get_int(&["RPUSH", "list", "b"]).await, 2);
    assert_eq!(c.get_int(&["LPUSH", "list", "c"]).await, 3);

    // order is: c, a, b
    assert_eq!(c.get_bulk(&["LPOP", "list"]).await, Some("c".into()));
    assert_eq!(c.get_bulk(&["RPOP", "list"]).await, Some("b".into()));
    assert_eq!(c.get_bulk(&["LPOP", "list"]).await, Some("a".into()));
    assert!(matches!(c.cmd(&["LPOP", "list"]).await, Frame::Null));
    // an emptied list is gone
    assert_eq!(c.get_int(&["EXISTS", "list"]).await, 0);
}

#[tokio::test]
async fn list_ranges_and_edits() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.get_int(&["RPUSH", "l", "a", "b", "c", "b", "d"]).await;
    assert_eq!(
        c.get_strings(&["LRANGE", "l", "0", "-1"]).await,
        vec!["a", "b", "c", "b", "d"]
    );
    assert_eq!(c.get_strings(&["LRANGE", "l", "-2", "100"]).await, vec!["b", "d"]);
    assert_eq!(c.get_bulk(&["LINDEX", "l", "-1"]).await, Some("d".into()));

    c.ok(&["LSET", "l", "0", "z"]).await;
    let err = c.err(&["LSET", "l", "10", "z"]).await;
    assert!(err.contains("out of range"), "{err}");

    assert_eq!(c.get_int(&["LREM", "l", "0", "b"]).await, 2);
    assert_eq!(c.get_int(&["LINSERT", "l", "BEFORE", "c", "y"]).await, 4);
    assert_eq!(c.get_int(&["LINSERT", "l", "AFTER", "nope", "y"]).await, -1);
    c.ok(&["LTRIM", "l", "1", "2"]).await;
    assert_eq!(c.get_strings(&["LRANGE", "l", "0", "-1"]).await, vec!["y", "c"]);
    assert_eq!(c.get_int(&["LLEN", "l"]).await, 2);
}

#[tokio::test]
async fn list_move() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.get_int(&["RPUSH", "src", "1", "2", "3"]).await;
    assert_eq!(
        c.get_bulk(&["LMOVE", "src", "dst", "LEFT", "RIGHT"]).await,
        Some("1".into())
    );
    assert_eq!(c.get_bulk(&["RPOPLPUSH", "src", "dst"]).await, Some("3".into()));
    assert_eq!(c.get_strings(&["LRANGE", "dst", "0", "-1"]).await, vec!["3", "1"]);
    assert!(matches!(
        c.cmd(&["LMOVE", "empty", "dst", "LEFT", "LEFT"]).await,
        Frame::Null
    ));
}

#[tokio::test]
async fn pop_with_count() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.get_int(&["RPUSH", "l", "a", "b", "c"]).await;
    assert_eq!(c.get_strings(&["LPOP", "l", "2"]).await, vec!["a", "b"]);
    assert_eq!(c.get_strings(&["RPOP", "l", "5"]).await, vec!["c"]);
    assert!(matches!(c.cmd(&["LPOP", "l", "1"]).await, Frame::NullArray));
}

// --- hashes ---

#[tokio::test]
async fn hash_basics() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    assert_eq!(c.get_int(&["HSET", "h", "a", "1", "b", "2"]).await, 2);
    assert_eq!(c.get_int(&["HSET", "h", "a", "10"]).await, 0);
    c.ok(&["HMSET", "h", "c", "3"]).await;
    assert_eq!(c.get_bulk(&["HGET", "h", "a"]).await, Some("10".into()));
    assert_eq!(c.get_int(&["HSETNX", "h", "a", "x"]).await, 0);
    assert_eq!(c.get_int(&["HEXISTS", "h", "c"]).await, 1);
    assert_eq!(c.get_int(&["HSTRLEN", "h", "a"]).await, 2);
    assert_eq!(c.get_int(&["HLEN", "h"]).await, 3);

    let mut keys = c.get_strings(&["HKEYS", "h"]).await;
    keys.sort();
    assert_eq!(keys, vec!["a", "b", "c"]);
    assert_eq!(c.get_strings(&["HGETALL", "h"]).await.len(), 6);

    let resp = c.cmd(&["HMGET", "h", "b", "zz"]).await;
    let Frame::Array(items) = resp else {
        panic!("expected array");
    };
    assert!(matches!(items[1], Frame::Null));

    assert_eq!(c.get_int(&["HDEL", "h", "a", "b", "c"]).await, 3);
    assert_eq!(c.get_int(&["EXISTS", "h"]).await, 0);
}

#[tokio::test]
async fn hash_increments() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    assert_eq!(c.get_int(&["HINCRBY", "h", "n", "5"]).await, 5);
    assert_eq!(
        c.get_bulk(&["HINCRBYFLOAT", "h", "n", "1.5"]).await,
        Some("6.5".into())
    );
    let err = c.err(&["HINCRBY", "h", "n", "1"]).await;
    assert!(err.contains("not an integer"), "{err}");
}

#[tokio::test]
async fn hash_scan_and_random() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    for i in 0..20 {
        c.get_int(&["HSET", "h", &format!("f{i}"), "v"]).await;
    }
    let mut fields = std::collections::HashSet::new();
    let mut cursor = "0".to_string();
    loop {
        let Frame::Array(parts) = c.cmd(&["HSCAN", "h", &cursor, "COUNT", "3"]).await else {
            panic!("expected array");
        };
        let mut parts = parts.into_iter();
        cursor = crate::helpers::bulk_string(parts.next().unwrap());
        let Some(Frame::Array(flat)) = parts.next() else {
            panic!("expected pairs");
        };
        for pair in flat.chunks(2) {
            fields.insert(crate::helpers::bulk_string(pair[0].clone()));
        }
        if cursor == "0" {
            break;
        }
    }
    assert_eq!(fields.len(), 20);

    assert_eq!(c.get_strings(&["HRANDFIELD", "h", "5"]).await.len(), 5);
    assert_eq!(
        c.get_strings(&["HRANDFIELD", "h", "3", "WITHVALUES"]).await.len(),
        6
    );
    assert_eq!(c.get_strings(&["HRANDFIELD", "h", "-30"]).await.len(), 30);
}

// --- sets ---

#[tokio::test]
async fn set_basics() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    assert_eq!(c.get_int(&["SADD", "s", "a", "b", "c", "a"]).await, 3);
    assert_eq!(c.get_int(&["SCARD", "s"]).await, 3);
    assert_eq!(c.get_int(&["SISMEMBER", "s", "a"]).await, 1);
    assert_eq!(c.get_int(&["SREM", "s", "a", "zz"]).await, 1);

    let mut members = c.get_strings(&["SMEMBERS", "s"]).await;
    members.sort();
    assert_eq!(members, vec!["b", "c"]);

    assert_eq!(c.get_int(&["SMOVE", "s", "t", "b"]).await, 1);
    assert_eq!(c.get_int(&["SMOVE", "s", "t", "b"]).await, 0);
    assert_eq!(c.get_int(&["SCARD", "t"]).await, 1);

    assert!(c.get_bulk(&["SPOP", "s"]).await.is_some());
    assert_eq!(c.get_int(&["EXISTS", "s"]).await, 0);
}

#[tokio::test]
async fn set_algebra() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.get_int(&["SADD", "a", "1", "2", "3"]).await;
    c.get_int(&["SADD", "b", "2", "3", "4"]).await;

    let mut inter = c.get_strings(&["SINTER", "a", "b"]).await;
    inter.sort();
    assert_eq!(inter, vec!["2", "3"]);
    assert_eq!(c.get_strings(&["SUNION", "a", "b"]).await.len(), 4);
    assert_eq!(c.get_strings(&["SDIFF", "a", "b"]).await, vec!["1"]);
    assert!(c.get_strings(&["SINTER", "a", "missing"]).await.is_empty());
}

#[tokio::test]
async fn set_random_members() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.get_int(&["SADD", "s", "a", "b", "c"]).await;
    assert_eq!(c.get_strings(&["SRANDMEMBER", "s", "10"]).await.len(), 3);
    assert_eq!(c.get_strings(&["SRANDMEMBER", "s", "-10"]).await.len(), 10);
    assert_eq!(c.get_int(&["SCARD", "s"]).await, 3);
    assert_eq!(c.get_strings(&["SPOP", "s", "2"]).await.len(), 2);
    assert_eq!(c.get_int(&["SCARD", "s"]).await, 1);
}

#[tokio::test]
async fn wrong_type_across_families() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.ok(&["SET", "str", "v"]).await;
    for args in [
        &["LPUSH", "str", "x"][..],
        &["HSET", "str", "f", "v"][..],
        &["SADD", "str", "m"][..],
    ] {
        let err = c.err(args).await;
        assert!(err.starts_with("WRONGTYPE"), "{err}");
    }
}
