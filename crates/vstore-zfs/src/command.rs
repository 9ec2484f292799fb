//! Spawns the real `zfs` and `zpool` binaries with a deadline, optional
//! elevation, and an optional stdin stream.

use log::debug;
use std::ffi::OsString;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::thread;
use std::time::{Duration, Instant};
use vstore_core::error::{StoreError, StoreResult};
use vstore_core::executor::Output;

const STREAM_CHUNK: usize = 128 * 1024;
const STREAM_QUEUE: usize = 4;
const POLL: Duration = Duration::from_millis(10);
/// How long a finished or killed child's stdin writer may take to wind down.
const FEED_GRACE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
/// Binary path, deadlines, and elevation mode for one store tool.
pub struct CommandRunner {
    path: PathBuf,
    timeout: Duration,
    stream_timeout: Option<Duration>,
    elevate: Option<PathBuf>,
}

/// Why feeding the child's stdin stopped early.
enum FeedError {
    Read(io::Error),
    Write(io::Error),
}

/// Detached thread that owns the child's stdin and writes queued chunks.
///
/// Only the pipe lives on it, so a child that stops reading can never hold
/// the caller past its deadline.
struct StdinWriter {
    chunks: SyncSender<Vec<u8>>,
    handle: thread::JoinHandle<io::Result<()>>,
}

impl StdinWriter {
    fn spawn(mut stdin: ChildStdin) -> Self {
        let (chunks, queued) = mpsc::sync_channel::<Vec<u8>>(STREAM_QUEUE);
        let handle = thread::spawn(move || -> io::Result<()> {
            for chunk in queued {
                stdin.write_all(&chunk)?;
            }
            stdin.flush()
        });
        Self { chunks, handle }
    }

    fn send(&self, mut chunk: Vec<u8>, stop: &AtomicBool) -> Result<(), FeedError> {
        loop {
            match self.chunks.try_send(chunk) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(back)) => {
                    if stop.load(Ordering::Acquire) {
                        return Err(FeedError::Write(child_gone()));
                    }
                    chunk = back;
                    thread::sleep(POLL);
                }
                Err(TrySendError::Disconnected(_)) => {
                    return Err(FeedError::Write(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "child closed its input",
                    )));
                }
            }
        }
    }

    /// Close the queue and collect the writer's result.
    fn finish(self, stop: &AtomicBool) -> Result<(), FeedError> {
        let Self { chunks, handle } = self;
        drop(chunks);
        let mut stopped_at = None;
        loop {
            if handle.is_finished() {
                return match handle.join() {
                    Ok(result) => result.map_err(FeedError::Write),
                    Err(_) => Err(FeedError::Write(io::Error::new(
                        io::ErrorKind::Other,
                        "stdin writer panicked",
                    ))),
                };
            }
            if stop.load(Ordering::Acquire) {
                let since = *stopped_at.get_or_insert_with(Instant::now);
                if since.elapsed() >= FEED_GRACE {
                    return Err(FeedError::Write(child_gone()));
                }
            }
            thread::sleep(POLL);
        }
    }
}

fn child_gone() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "child exited before the stream ended")
}

impl CommandRunner {
    /// Runner for the binary at `path`; plain invocations are killed after `timeout`.
    pub fn new(path: PathBuf, timeout: Duration) -> Self {
        Self {
            path,
            timeout,
            stream_timeout: None,
            elevate: None,
        }
    }

    /// Deadline for invocations fed a stdin stream; `None` lets them run to completion.
    pub fn with_stream_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stream_timeout = timeout;
        self
    }

    /// Run every invocation as `<helper> <binary> args...`.
    pub fn elevated(mut self, helper: PathBuf) -> Self {
        self.elevate = Some(helper);
        self
    }

    /// Path of the store binary this runner invokes.
    pub fn binary(&self) -> &Path {
        &self.path
    }

    /// Human-readable command line used in logs and errors.
    pub fn describe(&self, args: &[&str]) -> String {
        let mut parts = Vec::with_capacity(args.len() + 2);
        if let Some(helper) = &self.elevate {
            parts.push(helper.display().to_string());
        }
        parts.push(self.path.display().to_string());
        parts.extend(args.iter().map(|a| a.to_string()));
        parts.join(" ")
    }

    /// Execute with arguments and an optional stdin stream, capturing the result.
    ///
    /// A nonzero exit is not an error here; callers classify `Output::status`.
    /// A failure reading `input` is reported as `PartialStream`. Streamed
    /// invocations use the stream deadline; once a deadline passes the call
    /// returns after at most one in-flight read of `input`.
    pub fn run(
        &self,
        args: &[&str],
        input: Option<&mut (dyn Read + Send)>,
    ) -> StoreResult<Output> {
        let deadline = if input.is_some() {
            self.stream_timeout
        } else {
            Some(self.timeout)
        };
        let mut command = self.command(args);
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command.stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        debug!("exec: {}", self.describe(args));
        let mut child = command.spawn()?;
        let writer = child.stdin.take().map(StdinWriter::spawn);
        let stdout_handle = Self::spawn_output_reader(child.stdout.take());
        let stderr_handle = Self::spawn_output_reader(child.stderr.take());

        let stop = AtomicBool::new(false);
        let stop = &stop;
        let (waited, fed) = thread::scope(|scope| {
            let feeder = match (input, writer) {
                (Some(reader), Some(writer)) => {
                    Some(scope.spawn(move || Self::feed(reader, writer, stop)))
                }
                _ => None,
            };
            let waited = Self::wait_until(&mut child, deadline);
            stop.store(true, Ordering::Release);
            let fed = feeder.map(|handle| {
                handle.join().unwrap_or_else(|_| {
                    Err(FeedError::Read(io::Error::new(
                        io::ErrorKind::Other,
                        "stdin feeder panicked",
                    )))
                })
            });
            (waited, fed)
        });

        let Some(status) = waited? else {
            return Err(StoreError::Timeout {
                command: self.describe(args),
                timeout: deadline.unwrap_or_default(),
            });
        };

        let stdout = stdout_handle
            .join()
            .map_err(|_| reader_panicked("stdout"))??;
        let stderr = stderr_handle
            .join()
            .map_err(|_| reader_panicked("stderr"))??;
        let output = Output {
            stdout,
            stderr,
            status: status.code().unwrap_or(-1),
        };

        match fed {
            Some(Err(FeedError::Read(err))) => Err(StoreError::PartialStream {
                dataset: self.describe(args),
                reason: err.to_string(),
            }),
            // The child stopped reading; a failing exit explains why.
            Some(Err(FeedError::Write(err))) if output.status == 0 => {
                Err(StoreError::PartialStream {
                    dataset: self.describe(args),
                    reason: format!("stream not fully consumed: {err}"),
                })
            }
            _ => Ok(output),
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut command = match &self.elevate {
            Some(helper) => {
                let mut c = Command::new(helper);
                c.arg(&self.path);
                c
            }
            None => Command::new(&self.path),
        };
        command.args(args.iter().map(OsString::from));
        command
    }

    /// Wait for the child, killing it once `deadline` passes; `None` means killed.
    fn wait_until(
        child: &mut Child,
        deadline: Option<Duration>,
    ) -> StoreResult<Option<ExitStatus>> {
        let Some(deadline) = deadline else {
            return Ok(Some(child.wait()?));
        };
        let start = Instant::now();
        while start.elapsed() <= deadline {
            if let Some(status) = child.try_wait()? {
                return Ok(Some(status));
            }
            thread::sleep(Duration::from_millis(25));
        }
        let _ = child.kill();
        let _ = child.wait();
        Ok(None)
    }

    /// Copy the caller's stream to the stdin writer until EOF or `stop`.
    fn feed(
        reader: &mut (dyn Read + Send),
        writer: StdinWriter,
        stop: &AtomicBool,
    ) -> Result<u64, FeedError> {
        let mut total = 0u64;
        loop {
            if stop.load(Ordering::Acquire) {
                return Err(FeedError::Write(child_gone()));
            }
            let mut buf = vec![0u8; STREAM_CHUNK];
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(FeedError::Read(err)),
            };
            buf.truncate(n);
            writer.send(buf, stop)?;
            total += n as u64;
        }
        writer.finish(stop)?;
        Ok(total)
    }

    /// Drain a pipe on a helper thread and return the collected text.
    fn spawn_output_reader<R>(pipe: Option<R>) -> thread::JoinHandle<StoreResult<String>>
    where
        R: Read + Send + 'static,
    {
        thread::spawn(move || -> StoreResult<String> {
            if let Some(mut reader) = pipe {
                let mut buf = Vec::new();
                reader.read_to_end(&mut buf)?;
                Ok(String::from_utf8_lossy(&buf).to_string())
            } else {
                Ok(String::new())
            }
        })
    }
}

fn reader_panicked(stream: &str) -> StoreError {
    StoreError::Io(io::Error::new(
        io::ErrorKind::Other,
        format!("{stream} reader thread panicked"),
    ))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::{tempdir, TempDir};

    fn script(body: &str) -> (TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tool.sh");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
        (dir, path)
    }

    struct FailingReader {
        sent: bool,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if !self.sent {
                self.sent = true;
                buf[..4].copy_from_slice(b"abcd");
                return Ok(4);
            }
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer went away"))
        }
    }

    /// Yields one byte per `delay`, forever.
    struct TrickleReader {
        delay: Duration,
    }

    impl Read for TrickleReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            thread::sleep(self.delay);
            buf[0] = b'x';
            Ok(1)
        }
    }

    #[test]
    fn captures_stdout_stderr_and_status() {
        let (_dir, path) = script("echo \"args:$*\"; echo oops >&2; exit 3");
        let runner = CommandRunner::new(path, Duration::from_secs(5));
        let out = runner.run(&["list", "-H", "a b"], None).unwrap();
        assert_eq!(out.stdout.trim(), "args:list -H a b");
        assert_eq!(out.stderr.trim(), "oops");
        assert_eq!(out.status, 3);
    }

    #[test]
    fn arguments_are_not_shell_interpreted() {
        let (_dir, path) = script("printf '%s\\n' \"$1\"");
        let runner = CommandRunner::new(path, Duration::from_secs(5));
        let out = runner.run(&["$(echo pwned); true"], None).unwrap();
        assert_eq!(out.stdout.trim(), "$(echo pwned); true");
    }

    #[test]
    fn streams_stdin_to_child() {
        let (_dir, path) = script("wc -c");
        let runner = CommandRunner::new(path, Duration::from_secs(5));
        let data = vec![7u8; 300_000];
        let mut payload = data.as_slice();
        let out = runner.run(&["receive"], Some(&mut payload)).unwrap();
        assert_eq!(out.status, 0);
        assert_eq!(out.stdout.trim(), "300000");
    }

    #[test]
    fn read_failure_is_partial_stream() {
        let (_dir, path) = script("cat >/dev/null");
        let runner = CommandRunner::new(path, Duration::from_secs(5));
        let mut reader = FailingReader { sent: false };
        let err = runner.run(&["receive", "tank/a"], Some(&mut reader)).unwrap_err();
        assert!(matches!(err, StoreError::PartialStream { .. }), "{err:?}");
    }

    #[test]
    fn times_out_and_kills() {
        let (_dir, path) = script("sleep 5");
        let runner = CommandRunner::new(path, Duration::from_millis(200));
        let start = Instant::now();
        let err = runner.run(&[], None).unwrap_err();
        assert!(matches!(err, StoreError::Timeout { .. }), "{err:?}");
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn streams_ignore_the_command_deadline() {
        let (_dir, path) = script("sleep 1; wc -c");
        let runner = CommandRunner::new(path, Duration::from_millis(200));
        let mut payload: &[u8] = b"slow but healthy stream";
        let out = runner.run(&["receive"], Some(&mut payload)).unwrap();
        assert_eq!(out.status, 0);
        assert_eq!(out.stdout.trim(), "23");
    }

    #[test]
    fn stream_deadline_holds_while_input_trickles() {
        let (_dir, path) = script("cat >/dev/null");
        let runner = CommandRunner::new(path, Duration::from_secs(5))
            .with_stream_timeout(Some(Duration::from_millis(300)));
        let mut reader = TrickleReader {
            delay: Duration::from_millis(200),
        };
        let start = Instant::now();
        let err = runner.run(&["receive", "tank/a"], Some(&mut reader)).unwrap_err();
        let elapsed = start.elapsed();
        assert!(
            matches!(err, StoreError::Timeout { timeout, .. } if timeout.as_millis() == 300),
            "{err:?}"
        );
        assert!(elapsed < Duration::from_millis(1500), "took {elapsed:?}");
    }

    #[test]
    fn stream_deadline_holds_when_child_stops_reading() {
        // sleep inherits stdin and never reads it, so the pipe fills up
        let (_dir, path) = script("sleep 5");
        let runner = CommandRunner::new(path, Duration::from_secs(5))
            .with_stream_timeout(Some(Duration::from_millis(300)));
        let mut zeros = io::repeat(0);
        let start = Instant::now();
        let err = runner.run(&["receive", "tank/a"], Some(&mut zeros)).unwrap_err();
        let elapsed = start.elapsed();
        assert!(matches!(err, StoreError::Timeout { .. }), "{err:?}");
        assert!(elapsed < Duration::from_millis(1500), "took {elapsed:?}");
    }

    #[test]
    fn elevation_prefixes_helper() {
        let (_dir, helper) = script("echo \"helper:$*\"");
        let runner =
            CommandRunner::new(PathBuf::from("/sbin/zfs"), Duration::from_secs(5)).elevated(helper);
        let out = runner.run(&["list"], None).unwrap();
        assert_eq!(out.stdout.trim(), "helper:/sbin/zfs list");
        assert!(runner.describe(&["list"]).ends_with("/sbin/zfs list"));
    }
}
