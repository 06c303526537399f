use std::{future::Future, net::SocketAddr, panic::AssertUnwindSafe, sync::Arc};

use anyhow::Result;
use futures_util::FutureExt;
use tokio::{
    io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    select,
    sync::Semaphore,
};
use tracing::{debug, info, warn};

use crate::{
    protocol::{Command, Response, read_request, write_response},
    store::{RecordStore, StoreError},
};

pub const DEFAULT_WORKERS: usize = 5;

/// Accepts TCP clients and serves them from a shared [`RecordStore`].
///
/// Every accepted connection gets its own task straight away, so accepting
/// never waits. Each task then waits for one of `workers` permits before it
/// starts reading, which caps how many clients are served at once; the rest
/// queue on the semaphore.
pub struct Server {
    listener: TcpListener,
    store: Arc<RecordStore>,
    workers: Arc<Semaphore>,
}

impl Server {
    pub fn new(listener: TcpListener, store: Arc<RecordStore>, workers: usize) -> Self {
        Self {
            listener,
            store,
            workers: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener,
            store,
            workers,
        } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("registry shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &store, &workers);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    store: &Arc<RecordStore>,
    workers: &Arc<Semaphore>,
) {
    match result {
        Ok((stream, peer)) => spawn_connection_handler(stream, peer, store, workers),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_connection_handler(
    stream: TcpStream,
    peer: SocketAddr,
    store: &Arc<RecordStore>,
    workers: &Arc<Semaphore>,
) {
    let store = Arc::clone(store);
    let workers = Arc::clone(workers);
    tokio::spawn(async move {
        if workers.available_permits() == 0 {
            debug!(peer = %peer, "all workers busy, connection queued");
        }
        let Ok(_permit) = workers.acquire_owned().await else {
            return;
        };

        info!(peer = %peer, "client connected");
        match handle_connection(stream, &store).await {
            Ok(()) => info!(peer = %peer, "client disconnected"),
            Err(err) => warn!(peer = %peer, error = ?err, "client connection closed with error"),
        }
    });
}

async fn handle_connection(stream: TcpStream, store: &RecordStore) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    serve_client(&mut reader, &mut writer, store).await?;
    writer.shutdown().await
}

/// Runs the request/response loop for one client until it sends `EXIT` or
/// closes its side of the stream.
///
/// Every non-blank request line except `EXIT` gets exactly one response.
/// Failures inside a command become `500 Server error` and the loop carries
/// on; only I/O errors on the stream itself end the session early.
pub async fn serve_client<R, W>(
    reader: &mut R,
    writer: &mut W,
    store: &RecordStore,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    while let Some(request) = read_request(reader).await? {
        let response = match request {
            Ok(command) => {
                debug!(?command, "dispatching command");
                match AssertUnwindSafe(dispatch(command, store)).catch_unwind().await {
                    Ok(Some(response)) => response,
                    Ok(None) => break,
                    Err(_) => {
                        warn!("command handler panicked");
                        Response::ServerError
                    }
                }
            }
            Err(err) => {
                debug!(error = %err, "malformed command");
                Response::BadRequest
            }
        };

        write_response(writer, &response).await?;
    }

    writer.flush().await
}

/// Applies one command to the store. `None` means the client asked to leave.
async fn dispatch(command: Command, store: &RecordStore) -> Option<Response> {
    let response = match command {
        Command::Exit => return None,
        Command::Lookup {
            record_type,
            domain,
        } => {
            let records = store.lookup(&record_type, &domain).await;
            if records.is_empty() {
                Response::NotFound
            } else {
                Response::Found(records)
            }
        }
        Command::List => Response::Listing(store.list().await),
        Command::Register {
            domain,
            record_type,
            value,
        } => match store.register(&domain, &record_type, &value).await {
            Ok(record) => {
                info!(%record, "record registered");
                Response::Added
            }
            Err(StoreError::Invalid(err)) => {
                debug!(error = %err, "register rejected");
                Response::BadRequest
            }
            Err(StoreError::Io(err)) => {
                warn!(error = ?err, "failed to persist record");
                Response::ServerError
            }
        },
    };

    Some(response)
}
