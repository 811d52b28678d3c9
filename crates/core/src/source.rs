//! Input side of the pipeline.
//!
//! The packetizer needs two things from its input: a blocking
//! [`Read`](std::io::Read), and an estimate of how many bytes the encoder has
//! already written but nobody has read yet. The second one drives the
//! adaptive pacing in [`crate::pacing`].
//!
//! Plain OS pipes and files cannot answer "how much is buffered" portably,
//! so [`PipeSource`] drains any reader on a helper thread into a bounded
//! in-memory queue. That also makes reads time out, which bounds how long a
//! stop request can be held up by an encoder that went quiet without
//! closing its output.

use std::collections::VecDeque;
use std::io::{self, Cursor, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::{Result, StreamError};

/// Default capacity of the [`PipeSource`] queue.
pub const DEFAULT_PIPE_CAPACITY: usize = 1 << 20;

const PUMP_CHUNK: usize = 8192;

/// A blocking byte source that can report its upstream backlog.
pub trait ByteSource: Read {
    /// Number of bytes that can be read right now without blocking.
    fn available(&self) -> usize;
}

impl<T: AsRef<[u8]>> ByteSource for Cursor<T> {
    fn available(&self) -> usize {
        let len = self.get_ref().as_ref().len() as u64;
        len.saturating_sub(self.position()) as usize
    }
}

impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    fn available(&self) -> usize {
        (**self).available()
    }
}

/// Pause between polls of a non-blocking reader that has no data yet.
const WOULD_BLOCK_BACKOFF: Duration = Duration::from_millis(1);

/// One blocking read that survives read timeouts.
///
/// Timeouts and `EINTR` are retried until data arrives, the input ends
/// (`Ok(0)`), it fails, or `stop` is raised. A non-blocking reader is
/// polled every [`WOULD_BLOCK_BACKOFF`].
pub(crate) fn read_some<R: Read + ?Sized>(
    reader: &mut R,
    buf: &mut [u8],
    stop: &AtomicBool,
) -> Result<usize> {
    loop {
        match reader.read(buf) {
            Ok(n) => return Ok(n),
            Err(e) => match e.kind() {
                io::ErrorKind::TimedOut | io::ErrorKind::Interrupted => {}
                io::ErrorKind::WouldBlock => thread::sleep(WOULD_BLOCK_BACKOFF),
                _ => return Err(StreamError::Io(e)),
            },
        }
        if stop.load(Ordering::SeqCst) {
            return Err(StreamError::Interrupted);
        }
    }
}

#[derive(Default)]
struct PipeState {
    queue: VecDeque<u8>,
    closed: bool,
    error: Option<io::Error>,
    dropped: bool,
}

struct Shared {
    state: Mutex<PipeState>,
    readable: Condvar,
    writable: Condvar,
    capacity: usize,
}

/// A [`ByteSource`] fed by a helper thread that drains another reader.
///
/// Reads block until data arrives, the upstream reader reaches EOF or
/// fails, or the optional read timeout expires. A timeout is reported as
/// [`io::ErrorKind::TimedOut`] and leaves the source usable.
pub struct PipeSource {
    shared: Arc<Shared>,
    read_timeout: Option<Duration>,
}

impl PipeSource {
    /// Start draining `reader` with the default queue capacity.
    pub fn spawn<R>(reader: R) -> io::Result<Self>
    where
        R: Read + Send + 'static,
    {
        Self::with_capacity(reader, DEFAULT_PIPE_CAPACITY)
    }

    /// Start draining `reader`, buffering at most `capacity` bytes.
    pub fn with_capacity<R>(reader: R, capacity: usize) -> io::Result<Self>
    where
        R: Read + Send + 'static,
    {
        let shared = Arc::new(Shared {
            state: Mutex::new(PipeState::default()),
            readable: Condvar::new(),
            writable: Condvar::new(),
            capacity: capacity.max(1),
        });

        let pump = shared.clone();
        thread::Builder::new()
            .name("pipe-source".into())
            .spawn(move || pump_loop(reader, &pump))?;

        Ok(Self {
            shared,
            read_timeout: None,
        })
    }

    /// Bound how long a single [`read`](Read::read) may wait for data.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout;
    }
}

fn pump_loop<R: Read>(mut reader: R, shared: &Shared) {
    let mut chunk = [0u8; PUMP_CHUNK];
    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => {
                shared.state.lock().closed = true;
                shared.readable.notify_all();
                tracing::debug!("pipe source reached end of input");
                return;
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!(error = %e, "pipe source read failed");
                shared.state.lock().error = Some(e);
                shared.readable.notify_all();
                return;
            }
        };

        let mut state = shared.state.lock();
        while state.queue.len() >= shared.capacity && !state.dropped {
            shared.writable.wait(&mut state);
        }
        if state.dropped {
            return;
        }
        state.queue.extend(&chunk[..n]);
        drop(state);
        shared.readable.notify_all();
    }
}

impl Read for PipeSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut state = self.shared.state.lock();
        while state.queue.is_empty() && !state.closed && state.error.is_none() {
            match self.read_timeout {
                Some(timeout) => {
                    let result = self.shared.readable.wait_for(&mut state, timeout);
                    if result.timed_out() && state.queue.is_empty() {
                        return Err(io::ErrorKind::TimedOut.into());
                    }
                }
                None => self.shared.readable.wait(&mut state),
            }
        }

        if !state.queue.is_empty() {
            let n = state.queue.read(buf)?;
            drop(state);
            self.shared.writable.notify_all();
            return Ok(n);
        }

        match state.error.take() {
            Some(e) => Err(e),
            None => Ok(0),
        }
    }
}

impl ByteSource for PipeSource {
    fn available(&self) -> usize {
        self.shared.state.lock().queue.len()
    }
}

impl Drop for PipeSource {
    fn drop(&mut self) {
        self.shared.state.lock().dropped = true;
        self.shared.writable.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Instant;

    /// Reader fed chunk by chunk from a channel; EOF when the sender drops.
    struct ChannelReader(mpsc::Receiver<Vec<u8>>, Vec<u8>);

    impl Read for ChannelReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.1.is_empty() {
                match self.0.recv() {
                    Ok(chunk) => self.1 = chunk,
                    Err(_) => return Ok(0),
                }
            }
            let n = buf.len().min(self.1.len());
            buf[..n].copy_from_slice(&self.1[..n]);
            self.1.drain(..n);
            Ok(n)
        }
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "encoder died"))
        }
    }

    /// Non-blocking reader with nothing to say for the first `ready_after`
    /// polls.
    struct NonBlocking {
        polls: usize,
        ready_after: usize,
    }

    impl Read for NonBlocking {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.polls < self.ready_after {
                self.polls += 1;
                return Err(io::ErrorKind::WouldBlock.into());
            }
            buf[0] = 9;
            Ok(1)
        }
    }

    fn wait_for_available(source: &PipeSource, n: usize) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while source.available() < n {
            assert!(Instant::now() < deadline, "pump never delivered {n} bytes");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn cursor_reports_remaining() {
        let mut c = Cursor::new(vec![1u8, 2, 3, 4]);
        assert_eq!(c.available(), 4);
        let mut b = [0u8; 3];
        c.read_exact(&mut b).unwrap();
        assert_eq!(c.available(), 1);
    }

    #[test]
    fn pipe_delivers_everything_then_eof() {
        let data: Vec<u8> = (0..50_000u32).map(|i| i as u8).collect();
        let mut source = PipeSource::spawn(Cursor::new(data.clone())).unwrap();
        let mut out = Vec::new();
        source.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
        assert_eq!(source.available(), 0);
    }

    #[test]
    fn pipe_reports_backlog() {
        let (tx, rx) = mpsc::channel();
        let mut source = PipeSource::spawn(ChannelReader(rx, Vec::new())).unwrap();
        tx.send(vec![7u8; 100]).unwrap();
        wait_for_available(&source, 100);
        assert_eq!(source.available(), 100);

        let mut b = [0u8; 40];
        source.read_exact(&mut b).unwrap();
        assert_eq!(source.available(), 60);
    }

    #[test]
    fn pipe_read_times_out_without_data() {
        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        let mut source = PipeSource::spawn(ChannelReader(rx, Vec::new())).unwrap();
        source.set_read_timeout(Some(Duration::from_millis(20)));

        let mut b = [0u8; 4];
        let err = source.read(&mut b).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);

        // still usable afterwards
        tx.send(vec![1, 2, 3, 4]).unwrap();
        source.set_read_timeout(None);
        source.read_exact(&mut b).unwrap();
        assert_eq!(b, [1, 2, 3, 4]);
    }

    #[test]
    fn pipe_surfaces_reader_error() {
        let mut source = PipeSource::spawn(FailingReader).unwrap();
        let mut b = [0u8; 4];
        let err = source.read(&mut b).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn pipe_capacity_applies_backpressure() {
        let data = vec![0u8; 64 * 1024];
        let source = PipeSource::with_capacity(Cursor::new(data), 10_000).unwrap();
        wait_for_available(&source, 10_000);
        thread::sleep(Duration::from_millis(20));
        assert!(source.available() < 10_000 + PUMP_CHUNK);
    }

    #[test]
    fn would_block_is_polled_with_backoff() {
        let mut reader = NonBlocking {
            polls: 0,
            ready_after: 5,
        };
        let stop = AtomicBool::new(false);
        let started = Instant::now();
        let mut b = [0u8; 1];
        assert_eq!(read_some(&mut reader, &mut b, &stop).unwrap(), 1);
        assert_eq!(b, [9]);
        assert_eq!(reader.polls, 5);
        assert!(started.elapsed() >= WOULD_BLOCK_BACKOFF * 5);
    }

    #[test]
    fn stop_ends_would_block_polling() {
        let mut reader = NonBlocking {
            polls: 0,
            ready_after: usize::MAX,
        };
        let stop = AtomicBool::new(true);
        let mut b = [0u8; 1];
        assert!(matches!(
            read_some(&mut reader, &mut b, &stop),
            Err(StreamError::Interrupted)
        ));
        assert_eq!(reader.polls, 1);
    }

    #[test]
    fn read_some_propagates_hard_errors() {
        let stop = AtomicBool::new(false);
        let mut b = [0u8; 1];
        let err = read_some(&mut FailingReader, &mut b, &stop).unwrap_err();
        assert!(matches!(err, StreamError::Io(e) if e.kind() == io::ErrorKind::BrokenPipe));
    }
}
