//! Integration tests for MULTI/EXEC/DISCARD and WATCH.

use mimic_protocol::Frame;

use crate::helpers::{TestClient, TestServer};

fn queued(frame: Frame) {
    assert!(
        matches!(frame, Frame::Simple(ref s) if s == "QUEUED"),
        "expected QUEUED, got {frame:?}"
    );
}

async fn exec(c: &mut TestClient) -> Frame {
    c.cmd(&["EXEC"]).await
}

#[tokio::test]
async fn multi_exec_runs_queue_in_order() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.ok(&["MULTI"]).await;
    queued(c.cmd(&["SET", "n", "10"]).await);
    queued(c.cmd(&["INCR", "n"]).await);
    queued(c.cmd(&["GET", "n"]).await);

    let Frame::Array(results) = exec(&mut c).await else {
        panic!("expected array");
    };
    assert_eq!(results.len(), 3);
    assert!(matches!(results[0], Frame::Simple(ref s) if s == "OK"));
    assert_eq!(results[1], Frame::Integer(11));
    assert_eq!(crate::helpers::bulk_string(results[2].clone()), "11");
}

#[tokio::test]
async fn discard_drops_queue() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.ok(&["MULTI"]).await;
    queued(c.cmd(&["SET", "k", "v"]).await);
    c.ok(&["DISCARD"]).await;
    assert!(matches!(c.cmd(&["GET", "k"]).await, Frame::Null));

    let err = c.err(&["EXEC"]).await;
    assert_eq!(err, "ERR EXEC without MULTI");
    let err = c.err(&["DISCARD"]).await;
    assert_eq!(err, "ERR DISCARD without MULTI");
}

#[tokio::test]
async fn nested_multi_and_watch_inside_multi() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.ok(&["MULTI"]).await;
    let err = c.err(&["MULTI"]).await;
    assert!(err.contains("can not be nested"), "{err}");
    let err = c.err(&["WATCH", "k"]).await;
    assert!(err.contains("WATCH inside MULTI"), "{err}");
    queued(c.cmd(&["SET", "k", "v"]).await);

    // neither error poisons the transaction
    assert!(matches!(exec(&mut c).await, Frame::Array(ref r) if r.len() == 1));
}

#[tokio::test]
async fn queue_error_aborts_exec() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.ok(&["MULTI"]).await;
    queued(c.cmd(&["SET", "k", "v"]).await);
    c.err(&["GET"]).await;
    c.err(&["NOSUCHCOMMAND"]).await;

    let err = c.err(&["EXEC"]).await;
    assert!(err.starts_with("EXECABORT"), "{err}");
    assert!(matches!(c.cmd(&["GET", "k"]).await, Frame::Null));
}

#[tokio::test]
async fn runtime_errors_do_not_abort() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.ok(&["MULTI"]).await;
    queued(c.cmd(&["SET", "s", "v"]).await);
    queued(c.cmd(&["LPUSH", "s", "x"]).await);
    queued(c.cmd(&["GET", "s"]).await);

    let Frame::Array(results) = exec(&mut c).await else {
        panic!("expected array");
    };
    assert!(matches!(results[1], Frame::Error(ref e) if e.starts_with("WRONGTYPE")));
    assert_eq!(crate::helpers::bulk_string(results[2].clone()), "v");
}

#[tokio::test]
async fn watch_detects_foreign_write() {
    let server = TestServer::start();
    let mut c1 = server.connect().await;
    let mut c2 = server.connect().await;

    c1.ok(&["SET", "k", "orig"]).await;
    c1.ok(&["WATCH", "k"]).await;
    c2.ok(&["SET", "k", "theirs"]).await;

    c1.ok(&["MULTI"]).await;
    queued(c1.cmd(&["SET", "k", "mine"]).await);
    assert!(matches!(exec(&mut c1).await, Frame::NullArray));
    assert_eq!(c1.get_bulk(&["GET", "k"]).await, Some("theirs".into()));

    // EXEC clears the watch set
    c1.ok(&["MULTI"]).await;
    queued(c1.cmd(&["SET", "k", "mine"]).await);
    assert!(matches!(exec(&mut c1).await, Frame::Array(_)));
}

#[tokio::test]
async fn watch_detects_own_write_and_rewrite_of_same_value() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.ok(&["SET", "k", "v"]).await;
    c.ok(&["WATCH", "k"]).await;
    c.ok(&["SET", "k", "v"]).await;
    c.ok(&["MULTI"]).await;
    queued(c.cmd(&["GET", "k"]).await);
    assert!(matches!(exec(&mut c).await, Frame::NullArray));
}

#[tokio::test]
async fn watch_missing_key() {
    let server = TestServer::start();
    let mut c1 = server.connect().await;
    let mut c2 = server.connect().await;

    // still missing at EXEC: proceeds
    c1.ok(&["WATCH", "ghost"]).await;
    c1.ok(&["MULTI"]).await;
    queued(c1.cmd(&["PING"]).await);
    assert!(matches!(exec(&mut c1).await, Frame::Array(_)));

    // created in between: aborts
    c1.ok(&["WATCH", "ghost"]).await;
    c2.ok(&["SET", "ghost", "boo"]).await;
    c1.ok(&["MULTI"]).await;
    queued(c1.cmd(&["PING"]).await);
    assert!(matches!(exec(&mut c1).await, Frame::NullArray));
}

#[tokio::test]
async fn unwatch_forgets_keys() {
    let server = TestServer::start();
    let mut c1 = server.connect().await;
    let mut c2 = server.connect().await;

    c1.ok(&["WATCH", "k"]).await;
    c1.ok(&["UNWATCH"]).await;
    c2.ok(&["SET", "k", "v"]).await;
    c1.ok(&["MULTI"]).await;
    queued(c1.cmd(&["PING"]).await);
    assert!(matches!(exec(&mut c1).await, Frame::Array(_)));
}

#[tokio::test]
async fn watch_in_another_database() {
    let server = TestServer::start();
    let mut c1 = server.connect().await;
    let mut c2 = server.connect().await;

    c1.ok(&["WATCH", "k"]).await;
    c1.ok(&["SELECT", "1"]).await;
    c2.ok(&["SET", "k", "changed"]).await;

    c1.ok(&["MULTI"]).await;
    queued(c1.cmd(&["SET", "x", "1"]).await);
    assert!(matches!(exec(&mut c1).await, Frame::NullArray));
    assert!(matches!(c1.cmd(&["GET", "x"]).await, Frame::Null));
}

#[tokio::test]
async fn select_inside_transaction_sticks() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.ok(&["MULTI"]).await;
    queued(c.cmd(&["SET", "k", "db0"]).await);
    queued(c.cmd(&["SELECT", "2"]).await);
    queued(c.cmd(&["SET", "k", "db2"]).await);
    queued(c.cmd(&["SWAPDB", "0", "3"]).await);
    assert!(matches!(exec(&mut c).await, Frame::Array(ref r) if r.len() == 4));

    assert_eq!(c.get_bulk(&["GET", "k"]).await, Some("db2".into()));
    c.ok(&["SELECT", "3"]).await;
    assert_eq!(c.get_bulk(&["GET", "k"]).await, Some("db0".into()));
}

#[tokio::test]
async fn blocking_pop_inside_transaction_does_not_block() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.ok(&["MULTI"]).await;
    queued(c.cmd(&["BLPOP", "empty", "0"]).await);
    queued(c.cmd(&["BLMOVE", "empty", "dst", "LEFT", "LEFT", "0"]).await);
    queued(c.cmd(&["RPUSH", "empty", "x"]).await);
    queued(c.cmd(&["BRPOP", "empty", "0"]).await);

    let Frame::Array(results) = exec(&mut c).await else {
        panic!("expected array");
    };
    assert_eq!(results[0], Frame::NullArray);
    assert_eq!(results[1], Frame::Null);
    assert_eq!(results[2], Frame::Integer(1));
    assert!(matches!(results[3], Frame::Array(ref kv) if kv.len() == 2));
}

#[tokio::test]
async fn optimistic_increments_are_not_lost() {
    let server = TestServer::start();
    let mut setup = server.connect().await;
    setup.ok(&["SET", "counter", "0"]).await;

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let mut c = server.connect().await;
        tasks.push(tokio::spawn(async move {
            let mut done = 0;
            while done < 25 {
                c.ok(&["WATCH", "counter"]).await;
                let current: i64 = c
                    .get_bulk(&["GET", "counter"])
                    .await
                    .unwrap()
                    .parse()
                    .unwrap();
                c.ok(&["MULTI"]).await;
                c.cmd(&["SET", "counter", &(current + 1).to_string()]).await;
                if let Frame::Array(_) = c.cmd(&["EXEC"]).await {
                    done += 1;
                }
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(setup.get_bulk(&["GET", "counter"]).await, Some("100".into()));
}
