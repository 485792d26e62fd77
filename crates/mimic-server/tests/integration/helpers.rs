//! Test helpers for spawning a mimic-server and sending commands.

use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use mimic_protocol::{parse_frame, Frame};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// A mimic-server subprocess managed by the test harness.
pub struct TestServer {
    child: Child,
    pub port: u16,
    _dir: Option<tempfile::TempDir>,
}

/// Options for starting a test server.
#[derive(Default)]
pub struct ServerOptions {
    /// Snapshot directory owned by the caller.
    pub dir: Option<PathBuf>,
    pub databases: Option<usize>,
    /// Active expiry frequency.
    pub hz: Option<u32>,
    pub max_connections: Option<usize>,
}

impl TestServer {
    /// Starts a server on a random port and waits until it accepts
    /// connections.
    pub fn start() -> Self {
        Self::start_with(ServerOptions::default())
    }

    pub fn start_with(opts: ServerOptions) -> Self {
        let port = find_free_port();

        let mut cmd = Command::new(server_binary());
        cmd.arg("--port").arg(port.to_string());
        cmd.arg("--bind").arg("127.0.0.1");
        // suppress tracing output in tests
        cmd.env("RUST_LOG", "error");

        if let Some(ref dir) = opts.dir {
            cmd.arg("--dir").arg(dir);
        }
        if let Some(databases) = opts.databases {
            cmd.arg("--databases").arg(databases.to_string());
        }
        if let Some(hz) = opts.hz {
            cmd.arg("--hz").arg(hz.to_string());
        }
        if let Some(max) = opts.max_connections {
            cmd.arg("--max-connections").arg(max.to_string());
        }

        let child = cmd
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .unwrap_or_else(|e| panic!("failed to spawn mimic-server: {e}"));

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if Instant::now() > deadline {
                panic!("mimic-server failed to start within 5 seconds on port {port}");
            }
            if std::net::TcpStream::connect(format!("127.0.0.1:{port}")).is_ok() {
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }

        Self {
            child,
            port,
            _dir: None,
        }
    }

    /// Starts a server with persistence in a fresh temp directory that
    /// lives as long as the server.
    pub fn start_persistent() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut server = Self::start_with(ServerOptions {
            dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        });
        server._dir = Some(dir);
        server
    }

    pub async fn connect(&self) -> TestClient {
        TestClient::connect(self.port).await
    }

    /// Sends SIGINT and waits for a clean exit.
    pub fn shutdown(mut self) {
        let status = Command::new("kill")
            .arg("-INT")
            .arg(self.child.id().to_string())
            .status()
            .expect("failed to run kill");
        assert!(status.success());

        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            if let Some(status) = self.child.try_wait().unwrap() {
                assert!(status.success(), "server exited with {status}");
                return;
            }
            if Instant::now() > deadline {
                panic!("mimic-server did not shut down within 10 seconds");
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// A minimal RESP2 client for integration testing.
pub struct TestClient {
    stream: TcpStream,
    buf: BytesMut,
}

impl TestClient {
    async fn connect(port: u16) -> Self {
        let stream = TcpStream::connect(format!("127.0.0.1:{port}"))
            .await
            .unwrap_or_else(|e| panic!("failed to connect to 127.0.0.1:{port}: {e}"));
        Self {
            stream,
            buf: BytesMut::with_capacity(4096),
        }
    }

    /// Sends a command without waiting for the reply.
    pub async fn send(&mut self, args: &[&str]) {
        let frame = Frame::Array(
            args.iter()
                .map(|a| Frame::Bulk(Bytes::copy_from_slice(a.as_bytes())))
                .collect(),
        );
        let mut out = BytesMut::new();
        frame.serialize(&mut out);
        self.stream.write_all(&out).await.unwrap();
    }

    /// Sends raw bytes, for pipelining and malformed-input tests.
    pub async fn send_raw(&mut self, data: &[u8]) {
        self.stream.write_all(data).await.unwrap();
    }

    /// Sends a command and returns the parsed reply.
    pub async fn cmd(&mut self, args: &[&str]) -> Frame {
        self.send(args).await;
        self.read_frame().await
    }

    pub async fn get_bulk(&mut self, args: &[&str]) -> Option<String> {
        match self.cmd(args).await {
            Frame::Bulk(data) => Some(String::from_utf8_lossy(&data).to_string()),
            Frame::Null => None,
            other => panic!("expected Bulk or Null, got {other:?}"),
        }
    }

    pub async fn get_int(&mut self, args: &[&str]) -> i64 {
        match self.cmd(args).await {
            Frame::Integer(n) => n,
            other => panic!("expected Integer, got {other:?}"),
        }
    }

    /// Sends a command and returns an array of bulk strings.
    pub async fn get_strings(&mut self, args: &[&str]) -> Vec<String> {
        match self.cmd(args).await {
            Frame::Array(items) => items.into_iter().map(bulk_string).collect(),
            other => panic!("expected Array, got {other:?}"),
        }
    }

    pub async fn ok(&mut self, args: &[&str]) {
        match self.cmd(args).await {
            Frame::Simple(s) if s == "OK" => {}
            other => panic!("expected OK, got {other:?}"),
        }
    }

    /// Sends a command and expects an error. Returns the message.
    pub async fn err(&mut self, args: &[&str]) -> String {
        match self.cmd(args).await {
            Frame::Error(msg) => msg,
            other => panic!("expected Error, got {other:?}"),
        }
    }

    /// Reads the next reply without sending anything.
    pub async fn read_frame(&mut self) -> Frame {
        match self.try_read_frame().await {
            Some(frame) => frame,
            None => panic!("server closed connection while waiting for a reply"),
        }
    }

    /// Like [`read_frame`](Self::read_frame), but `None` when the server
    /// closes the connection.
    pub async fn try_read_frame(&mut self) -> Option<Frame> {
        loop {
            match parse_frame(&self.buf) {
                Ok(Some((frame, consumed))) => {
                    let _ = self.buf.split_to(consumed);
                    return Some(frame);
                }
                Ok(None) => {
                    let n = self.stream.read_buf(&mut self.buf).await.ok()?;
                    if n == 0 {
                        return None;
                    }
                }
                Err(e) => panic!("protocol error: {e}"),
            }
        }
    }

    /// CLIENT ID of this connection.
    pub async fn id(&mut self) -> i64 {
        self.get_int(&["CLIENT", "ID"]).await
    }
}

pub fn bulk_string(frame: Frame) -> String {
    match frame {
        Frame::Bulk(data) => String::from_utf8_lossy(&data).to_string(),
        other => panic!("expected Bulk, got {other:?}"),
    }
}

/// Runs the server binary with `args` to completion.
pub fn run_server(args: &[&str]) -> Output {
    Command::new(server_binary())
        .args(args)
        .env("RUST_LOG", "error")
        .output()
        .expect("failed to run mimic-server")
}

/// Number of snapshot files in `dir`.
pub fn snapshot_files(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| entries.filter_map(Result::ok).count())
        .unwrap_or(0)
}

fn find_free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn server_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_mimic-server"))
}
