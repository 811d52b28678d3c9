pub mod error;
pub mod media;
pub mod pacing;
pub mod sdp;
pub mod source;
pub mod streamer;
pub mod transport;

pub use error::{Result, StreamError, SyncFailure};
pub use media::h264::{H264Packetizer, PacketizerConfig, ParameterSets, StatsSnapshot};
pub use sdp::{SdpConfig, generate_sdp};
pub use source::{ByteSource, PipeSource};
pub use streamer::{EndReason, StreamState, StreamSummary, Streamer};
pub use transport::{RtpSink, UdpSender};
