//! The `LineSource` contract and the real transports behind it.
//!
//! Sources are polled, never blocked on: `poll_chunk` returns whatever bytes
//! are available right now, and the collector task sleeps on its poll
//! interval when there are none. Blocking reads stay on a source's own
//! reader thread.

use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError};
use std::thread;

use crate::common::config::{SourceConfig, TransportConfig};

use super::simulated::SimulatedSource;

/// Read size for file and pipe transports (8KB).
const READ_CHUNK_SIZE: usize = 8 * 1024;
/// Chunks a process reader may queue before it stops reading. The child then
/// blocks on its full stdout pipe, so at most 32 x 8KB is held per process.
pub const PIPE_QUEUE_CHUNKS: usize = 32;

/// Why a connect attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    Spawn(String),
    Open(String),
    /// Scripted failure of a simulated source.
    Simulated(String),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Spawn(msg) => write!(f, "failed to spawn process: {}", msg),
            SourceError::Open(msg) => write!(f, "failed to open file: {}", msg),
            SourceError::Simulated(msg) => write!(f, "simulated failure: {}", msg),
        }
    }
}

impl std::error::Error for SourceError {}

/// Result of one non-blocking read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Data(Vec<u8>),
    /// Connected, nothing new yet.
    Idle,
    /// The source ended normally (process exited with success, simulated run complete).
    Finished,
    /// The source disappeared; the collector should reconnect.
    Lost(String),
}

/// A raw byte stream the collector can (re)connect to and poll.
pub trait LineSource: Send {
    /// Establish or re-establish the connection.
    fn connect(&mut self) -> Result<(), SourceError>;

    /// Return available bytes without blocking.
    fn poll_chunk(&mut self) -> ReadOutcome;

    /// Release the connection. Called after `Finished`, `Lost` or a stop.
    fn disconnect(&mut self);

    /// Short transport description for logs.
    fn describe(&self) -> String;
}

impl<S: LineSource + ?Sized> LineSource for Box<S> {
    fn connect(&mut self) -> Result<(), SourceError> {
        (**self).connect()
    }

    fn poll_chunk(&mut self) -> ReadOutcome {
        (**self).poll_chunk()
    }

    fn disconnect(&mut self) {
        (**self).disconnect()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Build the transport configured for a source.
pub fn build_source(config: &SourceConfig) -> Box<dyn LineSource> {
    match &config.transport {
        TransportConfig::Process { command, args } => Box::new(ProcessSource::new(command.clone(), args.clone())),
        TransportConfig::File { path, from_start } => Box::new(FileTailSource::new(path.clone(), *from_start)),
        TransportConfig::Simulated(sim) => Box::new(SimulatedSource::new(&config.kind, sim)),
    }
}

/// What the reader thread hands to the collector.
enum PipeEvent {
    Data(Vec<u8>),
    Eof,
    Error(String),
}

/// Runs a process and collects its standard output.
///
/// A reader thread moves stdout into a queue of [`PIPE_QUEUE_CHUNKS`]
/// chunks and blocks while it is full.
pub struct ProcessSource {
    command: String,
    args: Vec<String>,
    child: Option<Child>,
    pipe: Option<Receiver<PipeEvent>>,
    eof: bool,
}

impl ProcessSource {
    pub fn new(command: String, args: Vec<String>) -> Self {
        Self {
            command,
            args,
            child: None,
            pipe: None,
            eof: false,
        }
    }
}

fn pump_stdout(mut stdout: impl Read, pipe: SyncSender<PipeEvent>) {
    loop {
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        let event = match stdout.read(&mut buf) {
            Ok(0) => PipeEvent::Eof,
            Ok(n) => {
                buf.truncate(n);
                PipeEvent::Data(buf)
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => PipeEvent::Error(e.to_string()),
        };
        let last = !matches!(event, PipeEvent::Data(_));
        // A send error means the collector disconnected.
        if pipe.send(event).is_err() || last {
            break;
        }
    }
}

impl LineSource for ProcessSource {
    fn connect(&mut self) -> Result<(), SourceError> {
        self.disconnect();

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| SourceError::Spawn(format!("{}: {}", self.command, e)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SourceError::Spawn(format!("{}: no stdout pipe", self.command)))?;

        // Each run gets its own queue; a reader of a previous run exits once its receiver is gone.
        let (pipe_tx, pipe_rx) = mpsc::sync_channel(PIPE_QUEUE_CHUNKS);
        if let Err(e) = thread::Builder::new()
            .name(format!("reader-{}", self.command))
            .spawn(move || pump_stdout(stdout, pipe_tx))
        {
            let _ = child.kill();
            let _ = child.wait();
            return Err(SourceError::Spawn(format!("reader thread: {}", e)));
        }

        self.child = Some(child);
        self.pipe = Some(pipe_rx);
        self.eof = false;
        Ok(())
    }

    fn poll_chunk(&mut self) -> ReadOutcome {
        if !self.eof {
            let Some(pipe) = self.pipe.as_ref() else {
                return ReadOutcome::Lost("process not running".to_string());
            };
            match pipe.try_recv() {
                Ok(PipeEvent::Data(bytes)) => return ReadOutcome::Data(bytes),
                Ok(PipeEvent::Error(error)) => return ReadOutcome::Lost(format!("read error: {}", error)),
                Ok(PipeEvent::Eof) | Err(TryRecvError::Disconnected) => self.eof = true,
                Err(TryRecvError::Empty) => return ReadOutcome::Idle,
            }
        }

        let Some(child) = self.child.as_mut() else {
            return ReadOutcome::Lost("process not running".to_string());
        };
        match child.try_wait() {
            Ok(Some(status)) if status.success() => ReadOutcome::Finished,
            Ok(Some(status)) => ReadOutcome::Lost(format!("process exited: {}", status)),
            // Output closed but the process lingers; wait for it to exit.
            Ok(None) => ReadOutcome::Idle,
            Err(e) => ReadOutcome::Lost(format!("wait failed: {}", e)),
        }
    }

    fn disconnect(&mut self) {
        self.pipe = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }

    fn describe(&self) -> String {
        format!("process '{} {}'", self.command, self.args.join(" "))
    }
}

impl Drop for ProcessSource {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Follows a log file.
///
/// With `from_start == false` the first connection starts at the end of the
/// file and only new lines are read. After a reconnect the previous read
/// position is kept unless the file shrank (rotation or truncation), in
/// which case reading restarts at the beginning.
pub struct FileTailSource {
    path: PathBuf,
    from_start: bool,
    file: Option<File>,
    position: Option<u64>,
}

impl FileTailSource {
    pub fn new(path: PathBuf, from_start: bool) -> Self {
        Self {
            path,
            from_start,
            file: None,
            position: None,
        }
    }
}

impl LineSource for FileTailSource {
    fn connect(&mut self) -> Result<(), SourceError> {
        let mut file = File::open(&self.path).map_err(|e| SourceError::Open(format!("{}: {}", self.path.display(), e)))?;
        let len = file
            .metadata()
            .map_err(|e| SourceError::Open(format!("{}: {}", self.path.display(), e)))?
            .len();

        let start = match self.position {
            Some(position) if position <= len => position,
            Some(_) => 0,
            None if self.from_start => 0,
            None => len,
        };
        file.seek(SeekFrom::Start(start))
            .map_err(|e| SourceError::Open(format!("{}: {}", self.path.display(), e)))?;

        self.position = Some(start);
        self.file = Some(file);
        Ok(())
    }

    fn poll_chunk(&mut self) -> ReadOutcome {
        let Some(file) = self.file.as_mut() else {
            return ReadOutcome::Lost("file not open".to_string());
        };

        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        match file.read(&mut buf) {
            Ok(0) => {
                let position = self.position.unwrap_or(0);
                match std::fs::metadata(&self.path) {
                    Err(e) => ReadOutcome::Lost(format!("{}: {}", self.path.display(), e)),
                    Ok(meta) if meta.len() < position => ReadOutcome::Lost("file truncated".to_string()),
                    Ok(_) => ReadOutcome::Idle,
                }
            }
            Ok(n) => {
                buf.truncate(n);
                self.position = Some(self.position.unwrap_or(0) + n as u64);
                ReadOutcome::Data(buf)
            }
            Err(e) => ReadOutcome::Lost(format!("read error: {}", e)),
        }
    }

    fn disconnect(&mut self) {
        self.file = None;
    }

    fn describe(&self) -> String {
        format!("file '{}'", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("ran-log-engine-{}-{}", std::process::id(), name))
    }

    fn read_all(source: &mut dyn LineSource) -> Vec<u8> {
        let mut bytes = Vec::new();
        while let ReadOutcome::Data(chunk) = source.poll_chunk() {
            bytes.extend(chunk);
        }
        bytes
    }

    #[test]
    fn test_file_tail_reads_only_new_lines() {
        let path = temp_path("tail.log");
        std::fs::write(&path, "old line\n").unwrap();

        let mut source = FileTailSource::new(path.clone(), false);
        source.connect().unwrap();
        assert_eq!(source.poll_chunk(), ReadOutcome::Idle);

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"new line\n").unwrap();
        assert_eq!(read_all(&mut source), b"new line\n");

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_file_from_start_and_truncation() {
        let path = temp_path("replay.log");
        std::fs::write(&path, "first\nsecond\n").unwrap();

        let mut source = FileTailSource::new(path.clone(), true);
        source.connect().unwrap();
        assert_eq!(read_all(&mut source), b"first\nsecond\n");

        std::fs::write(&path, "x\n").unwrap();
        assert_eq!(source.poll_chunk(), ReadOutcome::Lost("file truncated".to_string()));
        source.disconnect();
        source.connect().unwrap();
        assert_eq!(read_all(&mut source), b"x\n");

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_missing_file_fails_to_connect() {
        let mut source = FileTailSource::new(temp_path("missing.log"), true);
        assert!(matches!(source.connect(), Err(SourceError::Open(_))));
    }

    #[test]
    fn test_missing_binary_fails_to_connect() {
        let mut source = ProcessSource::new("/nonexistent/ran-stack".to_string(), Vec::new());
        assert!(matches!(source.connect(), Err(SourceError::Spawn(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_process_output_and_exit() {
        let mut source = ProcessSource::new("sh".to_string(), vec!["-c".to_string(), "echo one; echo two".to_string()]);
        source.connect().unwrap();

        let mut bytes = Vec::new();
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        let outcome = loop {
            match source.poll_chunk() {
                ReadOutcome::Data(chunk) => bytes.extend(chunk),
                ReadOutcome::Idle if std::time::Instant::now() < deadline => {
                    std::thread::sleep(std::time::Duration::from_millis(5))
                }
                other => break other,
            }
        };
        assert_eq!(bytes, b"one\ntwo\n");
        assert_eq!(outcome, ReadOutcome::Finished);
    }

    #[cfg(unix)]
    #[test]
    fn test_process_failure_is_lost() {
        let mut source = ProcessSource::new("sh".to_string(), vec!["-c".to_string(), "exit 3".to_string()]);
        source.connect().unwrap();
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        let outcome = loop {
            match source.poll_chunk() {
                ReadOutcome::Idle if std::time::Instant::now() < deadline => {
                    std::thread::sleep(std::time::Duration::from_millis(5))
                }
                other => break other,
            }
        };
        assert!(matches!(outcome, ReadOutcome::Lost(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_fast_process_is_held_back_by_the_pipe_queue() {
        let line = "[PHY] [I] [1.0] PDSCH: rnti=0x4601 tbs=309";
        let mut source = ProcessSource::new("yes".to_string(), vec![line.to_string()]);
        source.connect().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(300));

        // Nothing was polled while `yes` ran; only the queued chunks are waiting.
        let mut polls = 0;
        let mut bytes = Vec::new();
        while polls < PIPE_QUEUE_CHUNKS * 4 {
            match source.poll_chunk() {
                ReadOutcome::Data(chunk) => {
                    assert!(chunk.len() <= READ_CHUNK_SIZE);
                    bytes.extend(chunk);
                }
                ReadOutcome::Idle => std::thread::sleep(std::time::Duration::from_millis(1)),
                other => panic!("unexpected outcome {:?}", other),
            }
            polls += 1;
        }
        assert!(bytes.len() <= PIPE_QUEUE_CHUNKS * 4 * READ_CHUNK_SIZE);
        assert!(String::from_utf8_lossy(&bytes).contains(line));

        source.disconnect();
        assert_eq!(source.poll_chunk(), ReadOutcome::Lost("process not running".to_string()));
    }
}
