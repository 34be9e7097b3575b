//! Spawning and non-blocking supervision of job processes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::job::Job;
use crate::Error;

/// The table resolving a job's command name to an executable path.
///
/// Built once at startup and threaded into the spawner's constructor; workers
/// never consult the environment at dequeue time.
#[derive(Debug, Clone, Default)]
pub struct CommandMap {
    commands: HashMap<String, PathBuf>,
}

impl CommandMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, name: impl Into<String>, executable: impl Into<PathBuf>) -> Self {
        self.commands.insert(name.into(), executable.into());
        self
    }

    pub fn resolve(&self, name: &str) -> Option<&Path> {
        self.commands.get(name).map(PathBuf::as_path)
    }
}

impl<N, P> FromIterator<(N, P)> for CommandMap
where
    N: Into<String>,
    P: Into<PathBuf>,
{
    fn from_iter<T: IntoIterator<Item = (N, P)>>(iter: T) -> Self {
        Self {
            commands: iter
                .into_iter()
                .map(|(name, path)| (name.into(), path.into()))
                .collect(),
        }
    }
}

/// Produces a supervised process for a dequeued job.
pub trait Spawner: Send + Sync {
    fn spawn(&self, job: &Job) -> Result<ProcessHandle, Error>;
}

/// Spawns jobs as OS processes via [`tokio::process::Command`].
pub struct SystemSpawner {
    commands: CommandMap,
}

impl SystemSpawner {
    pub fn new(commands: CommandMap) -> Self {
        Self { commands }
    }
}

impl Spawner for SystemSpawner {
    fn spawn(&self, job: &Job) -> Result<ProcessHandle, Error> {
        let program = self
            .commands
            .resolve(job.name())
            .ok_or_else(|| Error::CommandNotFound(job.name().to_owned()))?;
        let child = Command::new(program)
            .args(job.arguments())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| Error::Spawn {
                command: job.name().to_owned(),
                source,
            })?;
        Ok(ProcessHandle::supervise(child))
    }
}

/// A running job process with incrementally-drainable output.
///
/// Two pump tasks copy the child's stdout and stderr into shared buffers as
/// bytes arrive, so [`ProcessHandle::drain_output`] never blocks on the
/// child.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    pid: u32,
    stdout: OutputBuffer,
    stderr: OutputBuffer,
    pumps: Vec<JoinHandle<()>>,
}

type OutputBuffer = Arc<Mutex<String>>;

fn lock(buffer: &OutputBuffer) -> MutexGuard<'_, String> {
    match buffer.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl ProcessHandle {
    fn supervise(mut child: Child) -> Self {
        let pid = child.id().unwrap_or(0);
        let mut pumps = Vec::with_capacity(2);
        let stdout = pump(child.stdout.take(), &mut pumps);
        let stderr = pump(child.stderr.take(), &mut pumps);
        Self {
            child,
            pid,
            stdout,
            stderr,
            pumps,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Takes whatever output has accumulated since the last drain, without
    /// waiting for more.
    pub fn drain_output(&self) -> (String, String) {
        (
            std::mem::take(&mut *lock(&self.stdout)),
            std::mem::take(&mut *lock(&self.stderr)),
        )
    }

    /// Polls for termination. `None` while the process is still running; the
    /// exit code once it has terminated (-1 when killed by a signal).
    pub fn try_exit_code(&mut self) -> std::io::Result<Option<i32>> {
        Ok(self
            .child
            .try_wait()?
            .map(|status| status.code().unwrap_or(-1)))
    }

    /// Waits for the output pumps to reach end-of-stream, so that a final
    /// [`ProcessHandle::drain_output`] after termination observes everything
    /// the process wrote. Only meaningful once the process has terminated.
    pub async fn wait_output(&mut self) {
        for pump in self.pumps.drain(..) {
            let _ = pump.await;
        }
    }
}

fn pump<R>(reader: Option<R>, pumps: &mut Vec<JoinHandle<()>>) -> OutputBuffer
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let buffer: OutputBuffer = Arc::new(Mutex::new(String::new()));
    if let Some(mut reader) = reader {
        pumps.push(tokio::spawn({
            let buffer = buffer.clone();
            async move {
                let mut chunk = [0u8; 4096];
                let mut pending = Vec::new();
                loop {
                    match reader.read(&mut chunk).await {
                        Ok(0) => break,
                        Ok(n) => {
                            pending.extend_from_slice(&chunk[..n]);
                            append_complete_utf8(&buffer, &mut pending);
                        }
                        Err(err) => {
                            tracing::debug!(?err, "output pump stopped: {err}");
                            break;
                        }
                    }
                }
                if !pending.is_empty() {
                    lock(&buffer).push_str(&String::from_utf8_lossy(&pending));
                }
            }
        }));
    }
    buffer
}

/// Appends the decodable prefix of `pending` to the buffer, holding back a
/// trailing incomplete UTF-8 sequence so a character split across two reads
/// is decoded whole once its remaining bytes arrive.
fn append_complete_utf8(buffer: &OutputBuffer, pending: &mut Vec<u8>) {
    loop {
        match std::str::from_utf8(pending) {
            Ok(text) => {
                lock(buffer).push_str(text);
                pending.clear();
                return;
            }
            Err(err) if err.error_len().is_none() => {
                let valid = err.valid_up_to();
                lock(buffer).push_str(&String::from_utf8_lossy(&pending[..valid]));
                pending.drain(..valid);
                return;
            }
            Err(err) => {
                // Genuinely invalid bytes; replace them and keep decoding.
                let invalid_end = err.valid_up_to() + err.error_len().unwrap_or(1);
                lock(buffer).push_str(&String::from_utf8_lossy(&pending[..invalid_end]));
                pending.drain(..invalid_end);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;

    use super::*;

    fn spawner() -> SystemSpawner {
        SystemSpawner::new(CommandMap::new().register("echo", "echo").register("sh", "sh"))
    }

    #[tokio::test]
    async fn captures_output_and_exit_code() {
        let job = Job::new("echo", vec!["hello".to_owned()], 0);
        let mut handle = spawner().spawn(&job).unwrap();
        assert!(handle.pid() > 0);

        let code = loop {
            if let Some(code) = handle.try_exit_code().unwrap() {
                break code;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        };
        handle.wait_output().await;

        let (stdout, stderr) = handle.drain_output();
        assert_eq!(code, 0);
        assert_eq!(stdout, "hello\n");
        assert_eq!(stderr, "");
    }

    #[tokio::test]
    async fn drain_is_incremental() {
        let job = Job::new("echo", vec!["hello".to_owned()], 0);
        let mut handle = spawner().spawn(&job).unwrap();

        while handle.try_exit_code().unwrap().is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.wait_output().await;

        let (first, _) = handle.drain_output();
        let (second, _) = handle.drain_output();
        assert_eq!(first, "hello\n");
        assert_eq!(second, "");
    }

    #[tokio::test]
    async fn captures_stderr_and_nonzero_exit() {
        let job = Job::new(
            "sh",
            vec!["-c".to_owned(), "echo oops >&2; exit 3".to_owned()],
            0,
        );
        let mut handle = spawner().spawn(&job).unwrap();

        let code = loop {
            if let Some(code) = handle.try_exit_code().unwrap() {
                break code;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        };
        handle.wait_output().await;

        let (stdout, stderr) = handle.drain_output();
        assert_eq!(code, 3);
        assert_eq!(stdout, "");
        assert_eq!(stderr, "oops\n");
    }

    #[test]
    fn output_decoding_holds_back_a_split_character() {
        let buffer: OutputBuffer = Arc::new(Mutex::new(String::new()));
        let euro = "€".as_bytes();

        let mut pending = b"abc".to_vec();
        pending.extend_from_slice(&euro[..1]);
        append_complete_utf8(&buffer, &mut pending);
        assert_eq!(&*lock(&buffer), "abc");
        assert_eq!(pending, &euro[..1]);

        pending.extend_from_slice(&euro[1..]);
        append_complete_utf8(&buffer, &mut pending);
        assert_eq!(&*lock(&buffer), "abc€");
        assert!(pending.is_empty());
    }

    #[test]
    fn output_decoding_replaces_only_invalid_bytes() {
        let buffer: OutputBuffer = Arc::new(Mutex::new(String::new()));

        let mut pending = vec![b'a', 0xFF, b'b'];
        append_complete_utf8(&buffer, &mut pending);
        assert_eq!(&*lock(&buffer), "a\u{FFFD}b");
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn multibyte_output_crossing_a_read_boundary_stays_intact() {
        // 4095 filler bytes push the 3-byte euro sign across the pump's
        // 4096-byte read chunk whenever the pipe delivers both writes at
        // once.
        let script = "head -c 4095 /dev/zero | tr '\\0' a; printf '\\342\\202\\254'";
        let job = Job::new("sh", vec!["-c".to_owned(), script.to_owned()], 0);
        let mut handle = spawner().spawn(&job).unwrap();

        while handle.try_exit_code().unwrap().is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.wait_output().await;

        let (stdout, _) = handle.drain_output();
        assert_eq!(stdout, format!("{}€", "a".repeat(4095)));
    }

    #[tokio::test]
    async fn unregistered_command_is_not_found() {
        let job = Job::new("missing", vec![], 0);
        assert_matches!(
            spawner().spawn(&job),
            Err(Error::CommandNotFound(name)) if name == "missing"
        );
    }

    #[tokio::test]
    async fn unspawnable_executable_is_a_spawn_error() {
        let spawner =
            SystemSpawner::new(CommandMap::new().register("ghost", "/nonexistent/ghost-bin"));
        let job = Job::new("ghost", vec![], 0);
        assert_matches!(spawner.spawn(&job), Err(Error::Spawn { .. }));
    }
}
