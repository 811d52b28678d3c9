use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use parking_lot::RwLock;

use crate::error::{Result, StreamError};
use crate::media::container::SyncReport;
use crate::media::h264::{
    H264Packetizer, PacketizerConfig, ParameterSets, StatsSnapshot, StreamStats,
};
use crate::source::ByteSource;
use crate::transport::RtpSink;

/// Lifecycle of a [`Streamer`].
///
/// ```text
/// Idle ──start──▶ Synchronizing ──mdat found──▶ Streaming ──▶ Stopped
///                       │                                        ▲
///                       └──────── sync failed / stop ────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Synchronizing,
    Streaming,
    Stopped,
}

/// Why a session ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The encoder closed its output.
    EndOfStream,
    /// [`Streamer::stop`] was called.
    Stopped,
}

/// Outcome of a session that ended cleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSummary {
    /// `None` when the session was stopped before the media data was found.
    pub sync: Option<SyncReport>,
    pub stats: StatsSnapshot,
    pub ended_by: EndReason,
}

/// Owns one packetizer and drives it on a dedicated thread.
///
/// The thread first skips the container header, then packetizes NAL units
/// until the input ends, [`stop`](Self::stop) is called, or an error occurs.
/// The outcome is collected with [`join`](Self::join).
pub struct Streamer<S, T> {
    packetizer: Option<H264Packetizer<S, T>>,
    stop: Arc<AtomicBool>,
    state: Arc<RwLock<StreamState>>,
    parameter_sets: Arc<RwLock<ParameterSets>>,
    stats: Arc<StreamStats>,
    worker: Option<JoinHandle<Result<StreamSummary>>>,
}

impl<S, T> Streamer<S, T>
where
    S: ByteSource + Send + 'static,
    T: RtpSink + Send + 'static,
{
    pub fn new(source: S, sink: T, config: PacketizerConfig) -> Result<Self> {
        let packetizer = H264Packetizer::new(source, sink, config)?;
        Ok(Self {
            parameter_sets: packetizer.parameter_sets(),
            stats: packetizer.stats(),
            packetizer: Some(packetizer),
            stop: Arc::new(AtomicBool::new(false)),
            state: Arc::new(RwLock::new(StreamState::Idle)),
            worker: None,
        })
    }

    pub fn start(&mut self) -> Result<()> {
        let mut packetizer = self.packetizer.take().ok_or(StreamError::AlreadyStarted)?;

        let stop = self.stop.clone();
        let state = self.state.clone();
        let stats = self.stats.clone();
        *state.write() = StreamState::Synchronizing;

        tracing::info!(
            mtu = packetizer.config().mtu,
            max_payload = packetizer.config().max_payload(),
            "streamer starting"
        );

        let worker = thread::Builder::new()
            .name("h264-packetizer".into())
            .spawn(move || {
                let sync = match packetizer.synchronize(&stop) {
                    Ok(report) => report,
                    Err(e) => {
                        *state.write() = StreamState::Stopped;
                        return finish(e, None, &stats);
                    }
                };
                *state.write() = StreamState::Streaming;
                tracing::info!(skipped = sync.consumed, "synchronized, streaming");

                let result = packetizer.run(&stop);
                *state.write() = StreamState::Stopped;
                match result {
                    Ok(()) => finish(StreamError::Interrupted, Some(sync), &stats),
                    Err(e) => finish(e, Some(sync), &stats),
                }
            });

        match worker {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                *self.state.write() = StreamState::Stopped;
                Err(StreamError::Io(e))
            }
        }
    }

    /// Ask the packetizer thread to finish. Returns immediately.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        tracing::info!("streamer stopping");
    }

    pub fn is_running(&self) -> bool {
        matches!(
            self.state(),
            StreamState::Synchronizing | StreamState::Streaming
        )
    }

    pub fn state(&self) -> StreamState {
        *self.state.read()
    }

    /// SPS/PPS captured so far, for session descriptions.
    pub fn parameter_sets(&self) -> ParameterSets {
        self.parameter_sets.read().clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Wait for the packetizer thread and return how the session ended.
    ///
    /// End of input and [`stop`](Self::stop) are reported as `Ok`; any
    /// other cause is returned as the error that ended the session.
    pub fn join(&mut self) -> Result<StreamSummary> {
        let worker = self.worker.take().ok_or(StreamError::NotStarted)?;
        worker.join().unwrap_or_else(|_| {
            Err(StreamError::Io(io::Error::other(
                "packetizer thread panicked",
            )))
        })
    }
}

impl<S, T> Drop for Streamer<S, T> {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

fn finish(
    cause: StreamError,
    sync: Option<SyncReport>,
    stats: &StreamStats,
) -> Result<StreamSummary> {
    let stats = stats.snapshot();
    if !cause.is_clean_stop() {
        tracing::error!(error = %cause, packets = stats.packets, "streaming session failed");
        return Err(cause);
    }
    let ended_by = match cause {
        StreamError::EndOfStream => EndReason::EndOfStream,
        _ => EndReason::Stopped,
    };
    tracing::info!(
        ?ended_by,
        nal_units = stats.nal_units,
        packets = stats.packets,
        "streaming session ended"
    );
    Ok(StreamSummary {
        sync,
        stats,
        ended_by,
    })
}
