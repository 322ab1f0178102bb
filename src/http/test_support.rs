use std::io::{Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use crate::error::{ErrorCode, TransferError};
use crate::http::{
    EventLoop, EventLoopConfig, ProgressCallback, Request, Response, Timing, TransferFuture,
    Transport, TransportFactory,
};

/// In-process transport: every transfer succeeds with `200 abc` after
/// `delay`, or fails to start when `fail_start` is set.
#[derive(Default)]
pub(crate) struct Script {
    pub delay: Duration,
    pub fail_start: bool,
    pub in_flight: AtomicUsize,
    pub peak: AtomicUsize,
    pub started: AtomicU64,
}

impl Script {
    pub(crate) fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }
}

pub(crate) struct ScriptedTransport {
    script: Arc<Script>,
}

impl Transport for ScriptedTransport {
    fn start(
        &mut self,
        id: u64,
        _request: &Request,
        progress: Option<ProgressCallback>,
    ) -> Result<TransferFuture, TransferError> {
        if self.script.fail_start {
            return Err(TransferError::new(ErrorCode::ConnectionFailed, "no route"));
        }
        let script = Arc::clone(&self.script);
        script.started.fetch_add(1, Ordering::SeqCst);
        let now = script.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        script.peak.fetch_max(now, Ordering::SeqCst);
        Ok(Box::pin(async move {
            tokio::time::sleep(script.delay).await;
            if let Some(progress) = progress {
                progress(id, 3, 3);
            }
            script.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(Response {
                status_code: 200,
                status_text: "OK".to_owned(),
                body: b"abc".to_vec(),
                body_size: 3,
                timing: Timing {
                    total_ms: script.delay.as_secs_f64() * 1000.0,
                    ..Timing::default()
                },
                ..Response::default()
            })
        }))
    }
}

pub(crate) struct ScriptedFactory {
    script: Arc<Script>,
}

impl TransportFactory for ScriptedFactory {
    fn create(&self, _worker_index: usize) -> Result<Box<dyn Transport>, TransferError> {
        Ok(Box::new(ScriptedTransport {
            script: Arc::clone(&self.script),
        }))
    }
}

pub(crate) fn scripted_loop(config: EventLoopConfig, script: &Arc<Script>) -> EventLoop {
    EventLoop::with_transport(
        config,
        Arc::new(ScriptedFactory {
            script: Arc::clone(script),
        }),
    )
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ServerBehavior {
    pub status_line: &'static str,
    pub body: &'static str,
    pub delay: Duration,
}

impl Default for ServerBehavior {
    fn default() -> Self {
        Self {
            status_line: "200 OK",
            body: "OK",
            delay: Duration::ZERO,
        }
    }
}

pub(crate) struct ServerHandle {
    shutdown: mpsc::Sender<()>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        drop(self.shutdown.send(()));
        if let Some(handle) = self.thread.take() {
            drop(handle.join());
        }
    }
}

/// Spawns a one-response-per-connection HTTP server on localhost.
pub(crate) fn spawn_http_server(
    behavior: ServerBehavior,
) -> Result<(String, ServerHandle), String> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .map_err(|err| format!("bind test server failed: {}", err))?;
    let addr = listener
        .local_addr()
        .map_err(|err| format!("server addr failed: {}", err))?;
    listener
        .set_nonblocking(true)
        .map_err(|err| format!("set_nonblocking failed: {}", err))?;

    let (shutdown_tx, shutdown_rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }
            match listener.accept() {
                Ok((stream, _)) => {
                    thread::spawn(move || handle_client(stream, behavior));
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(2));
                }
                Err(_) => break,
            }
        }
    });

    Ok((
        format!("http://{}", addr),
        ServerHandle {
            shutdown: shutdown_tx,
            thread: Some(handle),
        },
    ))
}

/// Returns `None` when the sandbox forbids binding a local socket.
pub(crate) fn spawn_http_server_or_skip(
    behavior: ServerBehavior,
) -> Result<Option<(String, ServerHandle)>, String> {
    match spawn_http_server(behavior) {
        Ok(server) => Ok(Some(server)),
        Err(err) if err.contains("Operation not permitted") => Ok(None),
        Err(err) => Err(err),
    }
}

/// Address that refuses connections: bound, then released.
pub(crate) fn closed_port_url() -> Result<String, String> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .map_err(|err| format!("bind probe failed: {}", err))?;
    let addr = listener
        .local_addr()
        .map_err(|err| format!("probe addr failed: {}", err))?;
    drop(listener);
    Ok(format!("http://{}/", addr))
}

fn handle_client(mut stream: TcpStream, behavior: ServerBehavior) {
    drop(stream.set_nonblocking(false));
    let mut buffer = [0u8; 4096];
    if stream.read(&mut buffer).is_err() {
        return;
    }
    if !behavior.delay.is_zero() {
        thread::sleep(behavior.delay);
    }
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        behavior.status_line,
        behavior.body.len(),
        behavior.body
    );
    if stream.write_all(response.as_bytes()).is_err() {
        return;
    }
    if stream.flush().is_err() {
        return;
    }
    drop(stream.shutdown(Shutdown::Both));
}
