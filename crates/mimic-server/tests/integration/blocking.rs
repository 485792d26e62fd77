//! Integration tests for BLPOP/BRPOP/BLMOVE and the CLIENT commands that
//! interrupt them.

use std::time::{Duration, Instant};

use mimic_protocol::Frame;

use crate::helpers::{bulk_string, TestClient, TestServer};

/// Gives a just-sent blocking command time to park.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

fn popped(frame: Frame) -> (String, String) {
    match frame {
        Frame::Array(items) if items.len() == 2 => {
            let mut items = items.into_iter();
            let key = bulk_string(items.next().unwrap());
            let value = bulk_string(items.next().unwrap());
            (key, value)
        }
        other => panic!("expected [key, value], got {other:?}"),
    }
}

/// Retries CLIENT UNBLOCK until the target is actually parked.
async fn unblock(c: &mut TestClient, id: i64, mode: &str) {
    let id = id.to_string();
    for _ in 0..100 {
        if c.get_int(&["CLIENT", "UNBLOCK", &id, mode]).await == 1 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("client {id} never blocked");
}

#[tokio::test]
async fn blpop_returns_immediately_when_data_exists() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.get_int(&["RPUSH", "b", "1", "2"]).await;
    assert_eq!(
        popped(c.cmd(&["BLPOP", "a", "b", "0"]).await),
        ("b".into(), "1".into())
    );
    assert_eq!(
        popped(c.cmd(&["BRPOP", "a", "b", "0"]).await),
        ("b".into(), "2".into())
    );
}

#[tokio::test]
async fn blpop_wakes_on_push() {
    let server = TestServer::start();
    let mut waiter = server.connect().await;
    let mut pusher = server.connect().await;

    waiter.send(&["BLPOP", "q", "0"]).await;
    settle().await;
    assert_eq!(pusher.get_int(&["RPUSH", "q", "x"]).await, 1);

    assert_eq!(popped(waiter.read_frame().await), ("q".into(), "x".into()));
    assert_eq!(pusher.get_int(&["EXISTS", "q"]).await, 0);
}

#[tokio::test]
async fn blpop_times_out() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    let start = Instant::now();
    assert_eq!(c.cmd(&["BLPOP", "q", "0.1"]).await, Frame::NullArray);
    assert!(start.elapsed() >= Duration::from_millis(100));

    let err = c.err(&["BLPOP", "q", "-1"]).await;
    assert!(err.contains("negative"), "{err}");
}

#[tokio::test]
async fn waiters_are_served_in_arrival_order() {
    let server = TestServer::start();
    let mut first = server.connect().await;
    let mut second = server.connect().await;
    let mut pusher = server.connect().await;

    first.send(&["BLPOP", "q", "0"]).await;
    settle().await;
    second.send(&["BLPOP", "q", "0"]).await;
    settle().await;

    pusher.get_int(&["RPUSH", "q", "a"]).await;
    assert_eq!(popped(first.read_frame().await), ("q".into(), "a".into()));

    pusher.get_int(&["RPUSH", "q", "b"]).await;
    assert_eq!(popped(second.read_frame().await), ("q".into(), "b".into()));
}

#[tokio::test]
async fn one_push_of_many_wakes_many() {
    let server = TestServer::start();
    let mut first = server.connect().await;
    let mut second = server.connect().await;
    let mut pusher = server.connect().await;

    first.send(&["BLPOP", "q", "0"]).await;
    second.send(&["BLPOP", "q", "0"]).await;
    settle().await;

    pusher.get_int(&["RPUSH", "q", "a", "b"]).await;
    let mut got = vec![
        popped(first.read_frame().await).1,
        popped(second.read_frame().await).1,
    ];
    got.sort();
    assert_eq!(got, vec!["a", "b"]);
}

#[tokio::test]
async fn consumed_wakeup_keeps_waiting() {
    let server = TestServer::start();
    let mut waiter = server.connect().await;
    let mut other = server.connect().await;

    waiter.send(&["BLPOP", "q", "0"]).await;
    settle().await;

    // the push wakes the waiter but the element is gone by the time it
    // gets the lock
    other.ok(&["MULTI"]).await;
    other.cmd(&["RPUSH", "q", "stolen"]).await;
    other.cmd(&["LPOP", "q"]).await;
    assert!(matches!(other.cmd(&["EXEC"]).await, Frame::Array(_)));
    settle().await;

    other.get_int(&["RPUSH", "q", "mine"]).await;
    assert_eq!(popped(waiter.read_frame().await), ("q".into(), "mine".into()));
}

#[tokio::test]
async fn blmove_waits_then_moves() {
    let server = TestServer::start();
    let mut waiter = server.connect().await;
    let mut pusher = server.connect().await;

    waiter
        .send(&["BLMOVE", "src", "dst", "RIGHT", "LEFT", "0"])
        .await;
    settle().await;
    pusher.get_int(&["LPUSH", "src", "v"]).await;

    assert_eq!(bulk_string(waiter.read_frame().await), "v");
    assert_eq!(pusher.get_strings(&["LRANGE", "dst", "0", "-1"]).await, vec!["v"]);

    assert_eq!(
        waiter.cmd(&["BRPOPLPUSH", "src", "dst", "0.05"]).await,
        Frame::NullArray
    );
}

#[tokio::test]
async fn blocking_on_wrong_type_fails_fast() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.ok(&["SET", "s", "v"]).await;
    let err = c.err(&["BLPOP", "s", "0"]).await;
    assert!(err.starts_with("WRONGTYPE"), "{err}");
}

#[tokio::test]
async fn client_unblock_timeout_and_error() {
    let server = TestServer::start();
    let mut waiter = server.connect().await;
    let mut admin = server.connect().await;
    let id = waiter.id().await;

    assert_eq!(
        admin
            .get_int(&["CLIENT", "UNBLOCK", &id.to_string()])
            .await,
        0
    );

    waiter.send(&["BLPOP", "q", "0"]).await;
    unblock(&mut admin, id, "TIMEOUT").await;
    assert_eq!(waiter.read_frame().await, Frame::NullArray);

    waiter.send(&["BLPOP", "q", "0"]).await;
    unblock(&mut admin, id, "ERROR").await;
    let Frame::Error(msg) = waiter.read_frame().await else {
        panic!("expected error");
    };
    assert!(msg.starts_with("UNBLOCKED"), "{msg}");

    // the connection is still usable
    waiter.ok(&["SET", "k", "v"]).await;
}

#[tokio::test]
async fn client_kill_closes_blocked_and_idle_clients() {
    let server = TestServer::start();
    let mut blocked = server.connect().await;
    let mut idle = server.connect().await;
    let mut admin = server.connect().await;
    let blocked_id = blocked.id().await;
    let idle_id = idle.id().await;

    blocked.send(&["BLPOP", "q", "0"]).await;
    settle().await;
    assert_eq!(
        admin
            .get_int(&["CLIENT", "KILL", "ID", &blocked_id.to_string()])
            .await,
        1
    );
    assert!(blocked.try_read_frame().await.is_none());

    assert_eq!(
        admin
            .get_int(&["CLIENT", "KILL", "ID", &idle_id.to_string()])
            .await,
        1
    );
    assert!(idle.try_read_frame().await.is_none());

    assert_eq!(admin.get_int(&["CLIENT", "KILL", "ID", "99999"]).await, 0);
}

#[tokio::test]
async fn disconnected_waiter_does_not_swallow_data() {
    let server = TestServer::start();
    let mut gone = server.connect().await;
    let mut pusher = server.connect().await;

    gone.send(&["BLPOP", "q", "0"]).await;
    settle().await;
    drop(gone);
    settle().await;

    pusher.get_int(&["RPUSH", "q", "x"]).await;
    assert_eq!(pusher.get_int(&["LLEN", "q"]).await, 1);
}

#[tokio::test]
async fn replies_pipelined_before_a_block_arrive_first() {
    let server = TestServer::start();
    let mut waiter = server.connect().await;
    let mut pusher = server.connect().await;

    waiter
        .send_raw(b"*1\r\n$4\r\nPING\r\n*3\r\n$5\r\nBLPOP\r\n$1\r\nq\r\n$1\r\n0\r\n")
        .await;
    assert!(matches!(waiter.read_frame().await, Frame::Simple(ref s) if s == "PONG"));

    pusher.get_int(&["RPUSH", "q", "x"]).await;
    assert_eq!(popped(waiter.read_frame().await), ("q".into(), "x".into()));
}
