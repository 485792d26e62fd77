//! Per-client connection handling.
//!
//! Reads RESP2 frames into a buffer, parses as many complete frames as
//! are available, and executes them in order, batching the replies into
//! one write. While a client is idle the loop also listens on its
//! interrupt channel so CLIENT KILL can close it.

use std::sync::Arc;

use bytes::BytesMut;
use mimic_core::{Interrupt, InterruptReceiver, Session};
use mimic_protocol::{parse_frame_bytes, Command, Frame};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::clients::ClientHandle;
use crate::server::ServerContext;

/// Initial read and write buffer capacity.
const BUF_CAPACITY: usize = 4096;

/// Largest amount of unparsed input a client may leave buffered. Room
/// for one maximum-size bulk string plus its framing.
const MAX_BUF_SIZE: usize = 512 * 1024 * 1024 + 64 * 1024;

const EXECABORT: &str = "EXECABORT Transaction discarded because of previous errors.";

/// MULTI/EXEC state of a connection.
enum TransactionState {
    None,
    /// Commands accumulate until EXEC or DISCARD.
    Queuing {
        queue: Vec<Command>,
        /// A queued command failed to parse; EXEC will abort.
        error: bool,
    },
}

pub(crate) struct Connection {
    pub(crate) session: Session,
    pub(crate) interrupts: InterruptReceiver,
    pub(crate) client: ClientHandle,
    pub(crate) ctx: Arc<ServerContext>,
    tx: TransactionState,
    /// QUIT: reply, then close.
    quit: bool,
    /// Killed, or the peer hung up while blocked: close without replying.
    pub(crate) closed: bool,
}

pub async fn handle(stream: TcpStream, ctx: Arc<ServerContext>) -> std::io::Result<()> {
    serve(stream, ctx, MAX_BUF_SIZE).await
}

async fn serve(
    mut stream: TcpStream,
    ctx: Arc<ServerContext>,
    max_buf: usize,
) -> std::io::Result<()> {
    let mut conn = Connection::new(ctx);
    debug!(client = conn.client.id(), "client connected");

    let mut buf = BytesMut::with_capacity(BUF_CAPACITY);
    let mut out = BytesMut::with_capacity(BUF_CAPACITY);

    loop {
        if buf.len() > max_buf {
            out.clear();
            Frame::Error("ERR max buffer size exceeded, closing connection".into())
                .serialize(&mut out);
            if let Err(e) = stream.write_all(&out).await {
                debug!(client = conn.client.id(), "failed to send overflow error: {e}");
            }
            return Ok(());
        }

        tokio::select! {
            read = stream.read_buf(&mut buf) => {
                if read? == 0 {
                    debug!(client = conn.client.id(), "client disconnected");
                    return Ok(());
                }
            }
            interrupt = conn.interrupts.recv() => match interrupt {
                Some(Interrupt::Kill) | None => {
                    debug!(client = conn.client.id(), "client killed");
                    return Ok(());
                }
                // an unblock for a client that isn't blocked
                Some(_) => continue,
            }
        }

        out.clear();
        let frozen = buf.split().freeze();
        let mut offset = 0;
        while offset < frozen.len() {
            let remaining = frozen.slice(offset..);
            match parse_frame_bytes(&remaining) {
                Ok(Some((frame, consumed))) => {
                    offset += consumed;
                    conn.process(frame, &mut stream, &mut out).await?;
                    if conn.closed {
                        return Ok(());
                    }
                    if conn.quit {
                        stream.write_all(&out).await?;
                        return Ok(());
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    Frame::Error(format!("ERR Protocol error: {e}")).serialize(&mut out);
                    stream.write_all(&out).await?;
                    return Ok(());
                }
            }
        }
        if offset < frozen.len() {
            buf.extend_from_slice(&frozen[offset..]);
        }

        if !out.is_empty() {
            stream.write_all(&out).await?;
        }
    }
}

impl Connection {
    /// Opens a session and registers the client.
    pub(crate) fn new(ctx: Arc<ServerContext>) -> Self {
        let session = ctx.spaces.session();
        let (client, interrupts) = ctx.clients.register(session.id());
        Self {
            session,
            interrupts,
            client,
            ctx,
            tx: TransactionState::None,
            quit: false,
            closed: false,
        }
    }

    /// Handles one frame, appending its reply (if any) to `out`.
    async fn process(
        &mut self,
        frame: Frame,
        stream: &mut TcpStream,
        out: &mut BytesMut,
    ) -> std::io::Result<()> {
        let reply = match Command::from_frame(frame) {
            Err(e) => {
                self.flag_transaction_error();
                Frame::Error(format!("ERR {e}"))
            }
            Ok(cmd) if self.is_queuing() => self.queue_or_run(cmd).await,
            Ok(cmd) if cmd.is_blocking() => {
                // earlier pipelined replies go out before we park
                if !out.is_empty() {
                    stream.write_all(out).await?;
                    out.clear();
                }
                tokio::select! {
                    reply = self.execute(cmd) => reply,
                    _ = peer_closed(stream) => {
                        debug!(client = self.client.id(), "client disconnected while blocked");
                        self.closed = true;
                        return Ok(());
                    }
                }
            }
            Ok(cmd) => self.dispatch(cmd).await,
        };
        if !self.closed {
            reply.serialize(out);
        }
        Ok(())
    }

    fn is_queuing(&self) -> bool {
        matches!(self.tx, TransactionState::Queuing { .. })
    }

    fn flag_transaction_error(&mut self) {
        if let TransactionState::Queuing { error, .. } = &mut self.tx {
            *error = true;
        }
    }

    /// Outside a transaction: connection-level commands here, the rest
    /// go to the executor.
    async fn dispatch(&mut self, cmd: Command) -> Frame {
        match cmd {
            Command::Multi => {
                self.tx = TransactionState::Queuing {
                    queue: Vec::new(),
                    error: false,
                };
                Frame::ok()
            }
            Command::Exec => Frame::Error("ERR EXEC without MULTI".into()),
            Command::Discard => Frame::Error("ERR DISCARD without MULTI".into()),
            Command::Watch { keys } => {
                self.session.watch(&keys);
                Frame::ok()
            }
            Command::Quit => {
                self.quit = true;
                Frame::ok()
            }
            cmd => self.execute(cmd).await,
        }
    }

    /// Inside MULTI: most commands are queued and answered QUEUED.
    async fn queue_or_run(&mut self, cmd: Command) -> Frame {
        match cmd {
            Command::Exec => self.exec().await,
            Command::Discard => {
                self.tx = TransactionState::None;
                self.session.unwatch();
                Frame::ok()
            }
            Command::Multi => Frame::Error("ERR MULTI calls can not be nested".into()),
            Command::Watch { .. } => Frame::Error("ERR WATCH inside MULTI is not allowed".into()),
            Command::Quit => {
                self.quit = true;
                Frame::ok()
            }
            Command::Unknown(name) => {
                self.flag_transaction_error();
                unknown_command(&name)
            }
            cmd => {
                if let TransactionState::Queuing { queue, .. } = &mut self.tx {
                    queue.push(cmd);
                }
                Frame::Simple("QUEUED".into())
            }
        }
    }

    /// EXEC: runs the queue while holding the selected database
    /// exclusively, unless a watched key changed.
    async fn exec(&mut self) -> Frame {
        let TransactionState::Queuing { queue, error } =
            std::mem::replace(&mut self.tx, TransactionState::None)
        else {
            return Frame::Error("ERR EXEC without MULTI".into());
        };
        if error {
            self.session.unwatch();
            return Frame::Error(EXECABORT.into());
        }

        let hold_cross = self.session.watches_other_db()
            || queue
                .iter()
                .any(|cmd| cmd.crosses_databases() || matches!(cmd, Command::Save));
        self.session.acquire_exclusive(hold_cross);

        let reply = if self.session.watches_intact() {
            let mut results = Vec::with_capacity(queue.len());
            for cmd in queue {
                results.push(self.execute(cmd).await);
            }
            Frame::Array(results)
        } else {
            debug!(client = self.client.id(), "watched key changed, EXEC aborted");
            Frame::NullArray
        };

        self.session.release_exclusive();
        self.session.unwatch();
        reply
    }
}

/// Resolves once the peer has closed its end. Pipelined input waiting
/// behind a blocking command never resolves it.
async fn peer_closed(stream: &TcpStream) {
    let mut byte = [0u8; 1];
    match stream.peek(&mut byte).await {
        Ok(0) | Err(_) => {}
        Ok(_) => std::future::pending().await,
    }
}

pub(crate) fn unknown_command(name: &str) -> Frame {
    Frame::Error(format!("ERR unknown command '{name}'"))
}
