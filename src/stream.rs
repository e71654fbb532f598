//! Process-backed stream proxy.
//!
//! Each `/stream` request spawns its own helper process and relays the
//! helper's stdout to the HTTP response in fixed-size chunks. The helper
//! must never outlive the response that owns it: every exit path (upstream
//! EOF, client disconnect, read error) converges on [`shutdown_helper`],
//! which terminates the process, waits a bounded grace period, and
//! force-kills if it is still alive.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::web::state::SessionRegistry;

/// Fixed relay read size.
const CHUNK_SIZE: usize = 4096;

/// Grace period between the terminate signal and the unconditional kill.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Spawn the streaming helper for continuous live playback of a resolved
/// URL, with stdout captured as the byte source.
pub fn spawn_helper(program: &str, resolved_url: &str) -> std::io::Result<Child> {
    Command::new(program)
        .arg(resolved_url)
        .arg("best")
        .arg("--hls-live-restart")
        .arg("--stdout")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // Backstop only; the relay task runs the explicit cleanup contract.
        .kill_on_drop(true)
        .spawn()
}

/// Start relaying a helper's stdout and return the chunk stream to serve as
/// the response body.
///
/// The returned stream buffers at most one chunk ahead of the transport.
/// Dropping it (the HTTP layer's disconnect signal) closes the channel,
/// which the relay loop observes between chunk reads.
pub fn relay(
    mut child: Child,
    session_id: u64,
    registry: Arc<SessionRegistry>,
) -> ReceiverStream<Result<Bytes, std::io::Error>> {
    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(1);

    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("[Session {}] helper: {}", session_id, line);
            }
        });
    }

    tokio::spawn(async move {
        relay_loop(child, tx, session_id, &registry).await;
        registry.unregister(session_id).await;
    });

    ReceiverStream::new(rx)
}

enum RelayExit {
    Eof,
    Disconnected,
    ReadError,
}

async fn relay_loop(
    mut child: Child,
    tx: mpsc::Sender<Result<Bytes, std::io::Error>>,
    session_id: u64,
    registry: &SessionRegistry,
) {
    let mut stdout = match child.stdout.take() {
        Some(stdout) => stdout,
        None => {
            warn!("[Session {}] helper spawned without captured stdout", session_id);
            shutdown_helper(&mut child, session_id).await;
            return;
        }
    };

    let mut buf = [0u8; CHUNK_SIZE];
    let exit = loop {
        tokio::select! {
            // Client went away; stop producing without waiting for the next
            // chunk to arrive.
            _ = tx.closed() => break RelayExit::Disconnected,

            read = stdout.read(&mut buf) => match read {
                Ok(0) => break RelayExit::Eof,
                Ok(n) => {
                    registry.add_bytes(session_id, n as u64).await;
                    if tx.send(Ok(Bytes::copy_from_slice(&buf[..n]))).await.is_err() {
                        break RelayExit::Disconnected;
                    }
                }
                Err(e) => {
                    warn!("[Session {}] error reading helper output: {}", session_id, e);
                    let _ = tx.try_send(Err(e));
                    break RelayExit::ReadError;
                }
            }
        }
    };

    match exit {
        RelayExit::Eof => info!("[Session {}] helper output ended", session_id),
        RelayExit::Disconnected => info!("[Session {}] client disconnected", session_id),
        RelayExit::ReadError => {}
    }

    drop(stdout);
    shutdown_helper(&mut child, session_id).await;
}

/// Cleanup contract shared by every relay exit path: terminate, wait up to
/// the grace period, force-kill if still alive. Failures are logged, never
/// propagated; the contract is best-effort kill.
pub async fn shutdown_helper(child: &mut Child, session_id: u64) {
    match child.try_wait() {
        Ok(Some(status)) => {
            debug!("[Session {}] helper already exited: {}", session_id, status);
            return;
        }
        Ok(None) => {}
        Err(e) => warn!("[Session {}] could not poll helper: {}", session_id, e),
    }

    terminate(child, session_id);

    match tokio::time::timeout(KILL_GRACE, child.wait()).await {
        Ok(Ok(status)) => {
            debug!("[Session {}] helper terminated: {}", session_id, status)
        }
        Ok(Err(e)) => warn!("[Session {}] wait for helper failed: {}", session_id, e),
        Err(_) => {
            warn!(
                "[Session {}] helper still running after {}s, killing",
                session_id,
                KILL_GRACE.as_secs()
            );
            if let Err(e) = child.kill().await {
                warn!("[Session {}] failed to kill helper: {}", session_id, e);
            }
        }
    }
}

/// Ask the helper to stop gracefully.
#[cfg(unix)]
fn terminate(child: &Child, session_id: u64) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else { return };
    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        warn!("[Session {}] SIGTERM failed: {}", session_id, e);
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child, session_id: u64) {
    if let Err(e) = child.start_kill() {
        warn!("[Session {}] failed to signal helper: {}", session_id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    fn spawn_shell(script: &str) -> Child {
        Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .unwrap()
    }

    #[tokio::test]
    async fn relays_output_until_eof() {
        let registry = Arc::new(SessionRegistry::new());
        let id = registry.register(None, "src", "src").await;
        let child = spawn_shell("printf hello");

        let mut stream = relay(child, id, registry.clone());
        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(collected, b"hello");

        // The relay task unregisters after cleanup.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(registry.active_count().await, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn client_disconnect_stops_the_helper() {
        let registry = Arc::new(SessionRegistry::new());
        let id = registry.register(None, "src", "src").await;
        // Long-running helper writing forever.
        let child = spawn_shell("trap 'exit 0' TERM; while :; do echo data; sleep 0.05; done");
        let pid = child.id().unwrap() as i32;

        let mut stream = relay(child, id, registry.clone());
        // Read one chunk, then hang up.
        let first = stream.next().await.unwrap().unwrap();
        assert!(!first.is_empty());
        drop(stream);

        // The process must be gone well within grace period + epsilon.
        let mut alive = true;
        for _ in 0..60 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if !helper_alive(pid) {
                alive = false;
                break;
            }
        }
        assert!(!alive, "helper process survived client disconnect");
        assert_eq!(registry.active_count().await, 0);
    }

    /// Probe with signal 0: existence check without affecting the process.
    #[cfg(unix)]
    fn helper_alive(pid: i32) -> bool {
        nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
    }

    #[tokio::test]
    async fn chunks_are_bounded_by_read_size() {
        let registry = Arc::new(SessionRegistry::new());
        let id = registry.register(None, "src", "src").await;
        // 16 KiB of zeroes arrives as multiple reads, none above CHUNK_SIZE.
        let child = spawn_shell("head -c 16384 /dev/zero");

        let mut stream = relay(child, id, registry);
        let mut total = 0usize;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.unwrap();
            assert!(chunk.len() <= CHUNK_SIZE);
            total += chunk.len();
        }
        assert_eq!(total, 16384);
    }

    #[tokio::test]
    async fn shutdown_is_quiet_for_exited_helper() {
        let mut child = spawn_shell("true");
        // Give the process time to exit on its own.
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_helper(&mut child, 0).await;
    }
}
