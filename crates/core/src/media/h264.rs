use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use base64::prelude::{BASE64_STANDARD, Engine as _};
use parking_lot::RwLock;

use super::container::{self, SyncReport};
use super::nal::{
    FU_HEADER_LEN, NAL_PREFIX_LEN, NAL_TYPE_PPS, NAL_TYPE_SPS, NalHeader, nal_length,
};
use super::rtp::RTP_HEADER_LEN;
use crate::error::{Result, StreamError};
use crate::pacing::Pacer;
use crate::source::{ByteSource, read_some};
use crate::transport::RtpSink;

/// Default packet size budget, RTP header included.
pub const DEFAULT_MTU: usize = 1400;
/// Capacity of the packet buffer when the MTU is smaller.
pub const BUFFER_CAPACITY: usize = 4096;
/// Largest UDP payload over IPv4.
pub const MAX_MTU: usize = 65_507;
/// RTP clock rate for video (RFC 6184 §8.1).
pub const VIDEO_CLOCK_RATE: u32 = 90_000;
/// Backlog, in bytes, separating "slow down" from "speed up".
pub const DEFAULT_BUFFERING_THRESHOLD: usize = 20_000;

/// Tuning knobs for one packetizer.
#[derive(Debug, Clone)]
pub struct PacketizerConfig {
    /// Maximum packet size, RTP header included.
    pub mtu: usize,
    /// RTP timestamp clock rate in Hz.
    pub clock_rate: u32,
    /// Inter-packet delay at startup.
    pub initial_delay: Duration,
    /// Lower bound of the adaptive delay.
    pub min_delay: Duration,
    /// Upper bound of the adaptive delay.
    pub max_delay: Duration,
    /// Upstream backlog the pacer steers towards.
    pub buffering_threshold: usize,
}

impl Default for PacketizerConfig {
    fn default() -> Self {
        Self {
            mtu: DEFAULT_MTU,
            clock_rate: VIDEO_CLOCK_RATE,
            initial_delay: Duration::from_millis(20),
            min_delay: Duration::ZERO,
            max_delay: Duration::from_secs(1),
            buffering_threshold: DEFAULT_BUFFERING_THRESHOLD,
        }
    }
}

impl PacketizerConfig {
    /// Largest NAL unit sent as a Single NAL Unit packet, which is also the
    /// largest fragment carried by one FU-A packet.
    ///
    /// Both paths keep room for the two FU bytes, so a single NAL packet is
    /// never more than `mtu - 2` bytes long and an FU-A packet never more
    /// than `mtu`.
    pub fn max_payload(&self) -> usize {
        self.mtu.saturating_sub(RTP_HEADER_LEN + FU_HEADER_LEN)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_payload() == 0 {
            return Err(StreamError::InvalidConfig(format!(
                "MTU {} leaves no room for payload after {} header bytes",
                self.mtu,
                RTP_HEADER_LEN + FU_HEADER_LEN
            )));
        }
        if self.mtu > MAX_MTU {
            return Err(StreamError::InvalidConfig(format!(
                "MTU {} exceeds the largest UDP payload ({MAX_MTU})",
                self.mtu
            )));
        }
        if self.clock_rate == 0 {
            return Err(StreamError::InvalidConfig("clock rate must be positive".into()));
        }
        if self.min_delay > self.max_delay {
            return Err(StreamError::InvalidConfig(format!(
                "min delay {:?} above max delay {:?}",
                self.min_delay, self.max_delay
            )));
        }
        Ok(())
    }
}

/// Latest SPS and PPS seen in the stream.
///
/// Receivers need them out of band (SDP `sprop-parameter-sets`) to decode a
/// stream joined mid-way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterSets {
    pub sps: Option<Vec<u8>>,
    pub pps: Option<Vec<u8>>,
}

impl ParameterSets {
    pub fn is_complete(&self) -> bool {
        self.sps.is_some() && self.pps.is_some()
    }

    /// Derive profile-level-id from the SPS (RFC 6184 §8.1): bytes 1–3 are
    /// profile_idc, the constraint flags and level_idc.
    pub fn profile_level_id(&self) -> Option<String> {
        let sps = self.sps.as_deref()?;
        if sps.len() < 4 {
            return None;
        }
        Some(format!("{:02x}{:02x}{:02x}", sps[1], sps[2], sps[3]))
    }

    pub fn sprop_parameter_sets(&self) -> Option<String> {
        let sps = self.sps.as_deref()?;
        let pps = self.pps.as_deref()?;
        Some(format!(
            "{},{}",
            BASE64_STANDARD.encode(sps),
            BASE64_STANDARD.encode(pps)
        ))
    }

    /// Store `nal` if it is a parameter set that differs from the current one.
    /// Returns whether anything changed.
    fn update(&mut self, nal: &[u8]) -> bool {
        let slot = match nal.first().map(|&b| NalHeader(b).nal_type()) {
            Some(NAL_TYPE_SPS) => &mut self.sps,
            Some(NAL_TYPE_PPS) => &mut self.pps,
            _ => return false,
        };
        if slot.as_deref() == Some(nal) {
            return false;
        }
        *slot = Some(nal.to_vec());
        true
    }
}

/// Counters updated by the packetizer thread.
#[derive(Debug, Default)]
pub struct StreamStats {
    nal_units: AtomicU64,
    fragmented_units: AtomicU64,
    packets: AtomicU64,
    payload_bytes: AtomicU64,
}

/// Point-in-time copy of [`StreamStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub nal_units: u64,
    pub fragmented_units: u64,
    pub packets: u64,
    pub payload_bytes: u64,
}

impl StreamStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            nal_units: self.nal_units.load(Ordering::Relaxed),
            fragmented_units: self.fragmented_units.load(Ordering::Relaxed),
            packets: self.packets.load(Ordering::Relaxed),
            payload_bytes: self.payload_bytes.load(Ordering::Relaxed),
        }
    }
}

/// How one NAL unit went out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packetization {
    /// RFC 6184 §5.6.
    SingleNalUnit,
    /// RFC 6184 §5.8, with the number of fragments.
    FuA { fragments: usize },
}

impl Packetization {
    pub fn packets(self) -> usize {
        match self {
            Self::SingleNalUnit => 1,
            Self::FuA { fragments } => fragments,
        }
    }
}

/// H.264 RTP packetizer for a live, length-prefixed NAL unit stream
/// (RFC 6184, packetization-mode=1).
///
/// Reads NAL units one at a time from a [`ByteSource`] positioned by
/// [`synchronize`](Self::synchronize) and emits them through an
/// [`RtpSink`]:
///
/// - **Single NAL Unit** (§5.6): NALs of at most
///   [`max_payload`](PacketizerConfig::max_payload) bytes go out as-is.
///   The 4-byte length prefix is dropped.
///
/// - **FU-A Fragmentation** (§5.8): larger NALs are split. The NAL header
///   byte is not sent; its NRI and type are folded into the 2-byte FU
///   header carried by every fragment:
///
///   ```text
///   FU indicator:  [F|NRI|Type=28]     (1 byte)
///   FU header:     [S|E|R|NAL_Type]    (1 byte)
///   Fragment data: [...]               (up to max_payload bytes)
///   ```
///
/// The marker bit is set on the last packet of every NAL unit, and all
/// packets of a NAL unit share one 90 kHz timestamp taken from the
/// monotonic clock when its length prefix was read.
///
/// ## Buffer
///
/// Every packet is assembled in one buffer allocated at construction:
/// [`RTP_HEADER_LEN`] bytes reserved for the sink, then the payload. NAL
/// data is read straight into place, so nothing is allocated or copied per
/// packet. The sink must be done with the slice when `send` returns.
///
/// ## Pacing
///
/// Each read first reports the source backlog to the [`Pacer`], and each
/// send first waits for the pacer.
pub struct H264Packetizer<S, T> {
    source: S,
    sink: T,
    config: PacketizerConfig,
    buffer: Box<[u8]>,
    pacer: Pacer,
    epoch: Instant,
    parameter_sets: Arc<RwLock<ParameterSets>>,
    stats: Arc<StreamStats>,
}

impl<S: ByteSource, T: RtpSink> H264Packetizer<S, T> {
    pub fn new(source: S, sink: T, config: PacketizerConfig) -> Result<Self> {
        config.validate()?;
        let capacity = BUFFER_CAPACITY.max(config.mtu);
        tracing::debug!(
            mtu = config.mtu,
            max_payload = config.max_payload(),
            initial_delay_ms = config.initial_delay.as_millis() as u64,
            "H.264 packetizer created"
        );
        Ok(Self {
            source,
            sink,
            pacer: Pacer::new(&config),
            config,
            buffer: vec![0u8; capacity].into_boxed_slice(),
            epoch: Instant::now(),
            parameter_sets: Arc::new(RwLock::new(ParameterSets::default())),
            stats: Arc::new(StreamStats::default()),
        })
    }

    pub fn config(&self) -> &PacketizerConfig {
        &self.config
    }

    /// Current adaptive inter-packet delay.
    pub fn delay(&self) -> Duration {
        self.pacer.delay()
    }

    pub fn parameter_sets(&self) -> Arc<RwLock<ParameterSets>> {
        self.parameter_sets.clone()
    }

    pub fn stats(&self) -> Arc<StreamStats> {
        self.stats.clone()
    }

    /// Skip the container header up to the first NAL length prefix.
    pub fn synchronize(&mut self, stop: &AtomicBool) -> Result<SyncReport> {
        container::synchronize(&mut self.source, stop)
    }

    /// Packetize NAL units until `stop` is raised or an error occurs.
    ///
    /// `stop` is checked before every NAL unit, and while waiting on a
    /// source that times out its reads.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<()> {
        while !stop.load(Ordering::SeqCst) {
            self.packetize_next(stop)?;
        }
        Ok(())
    }

    /// Read one NAL unit and send it as one or more packets.
    pub fn packetize_next(&mut self, stop: &AtomicBool) -> Result<Packetization> {
        let base = RTP_HEADER_LEN;

        // length prefix + NAL header byte
        self.fill(base, NAL_PREFIX_LEN, stop)?;
        let prefix = [
            self.buffer[base],
            self.buffer[base + 1],
            self.buffer[base + 2],
            self.buffer[base + 3],
        ];
        let nal_len = nal_length(prefix);
        let header = NalHeader(self.buffer[base + 4]);

        if nal_len < 2 {
            tracing::warn!(nal_len, "NAL unit too short, dropping session");
            return Err(StreamError::InvalidNalLength(nal_len));
        }
        if header.forbidden() {
            tracing::trace!(nal_header = header.0, "forbidden bit set, forwarding anyway");
        }

        self.sink.set_timestamp(self.rtp_timestamp());

        let packetization = if nal_len <= self.config.max_payload() {
            self.send_single(header, nal_len, stop)?;
            Packetization::SingleNalUnit
        } else {
            let fragments = self.send_fragmented(header, nal_len, stop)?;
            self.stats.fragmented_units.fetch_add(1, Ordering::Relaxed);
            Packetization::FuA { fragments }
        };

        self.stats.nal_units.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(
            nal_type = header.nal_type(),
            nal_size = nal_len,
            packets = packetization.packets(),
            delay_ms = self.pacer.delay().as_millis() as u64,
            "NAL unit packetized"
        );

        Ok(packetization)
    }

    fn send_single(&mut self, header: NalHeader, nal_len: usize, stop: &AtomicBool) -> Result<()> {
        let base = RTP_HEADER_LEN;
        self.buffer[base] = header.0;
        self.fill(base + 1, nal_len - 1, stop)?;

        if matches!(header.nal_type(), NAL_TYPE_SPS | NAL_TYPE_PPS) {
            let nal = &self.buffer[base..base + nal_len];
            if self.parameter_sets.write().update(nal) {
                tracing::debug!(
                    nal_type = header.nal_type(),
                    size = nal_len,
                    "parameter set captured"
                );
            }
        }

        self.sink.mark_next_packet();
        self.transmit(base + nal_len)
    }

    fn send_fragmented(
        &mut self,
        header: NalHeader,
        nal_len: usize,
        stop: &AtomicBool,
    ) -> Result<usize> {
        let base = RTP_HEADER_LEN;
        let data_start = base + FU_HEADER_LEN;
        let max_fragment = self.config.max_payload();
        let (indicator, mut fu_header) = header.fu_a();

        // the NAL header byte already went into the FU header
        let total = nal_len - 1;
        let mut sent = 0;
        let mut fragments = 0;

        while sent < total {
            let len = (total - sent).min(max_fragment);
            self.fill(data_start, len, stop)?;
            sent += len;

            if sent == total {
                fu_header = fu_header.last();
                self.sink.mark_next_packet();
            }
            self.buffer[base] = indicator;
            self.buffer[base + 1] = fu_header.0;

            self.transmit(data_start + len)?;
            fu_header = fu_header.continuation();
            fragments += 1;
        }

        Ok(fragments)
    }

    /// Read exactly `len` bytes into `buffer[offset..]`.
    fn fill(&mut self, offset: usize, len: usize, stop: &AtomicBool) -> Result<()> {
        let end = offset + len;
        let mut pos = offset;
        while pos < end {
            self.pacer.observe(self.source.available());
            match read_some(&mut self.source, &mut self.buffer[pos..end], stop)? {
                0 => return Err(StreamError::EndOfStream),
                n => pos += n,
            }
        }
        Ok(())
    }

    fn transmit(&mut self, len: usize) -> Result<()> {
        self.pacer.wait();
        self.sink.send(&mut self.buffer[..len])?;
        self.stats.packets.fetch_add(1, Ordering::Relaxed);
        self.stats
            .payload_bytes
            .fetch_add((len - RTP_HEADER_LEN) as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Monotonic clock in RTP ticks, truncated to 32 bits.
    fn rtp_timestamp(&self) -> u32 {
        let millis = self.epoch.elapsed().as_millis() as u64;
        (millis * u64::from(self.config.clock_rate) / 1000) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::nal::{FU_A_TYPE, FuHeader, TYPE_MASK, fragment_count};
    use crate::transport::testing::{FailingSink, Recorded, RecordingSink};
    use std::cell::Cell;
    use std::io::{self, Cursor, Read};

    static NO_STOP: AtomicBool = AtomicBool::new(false);

    fn fast_config() -> PacketizerConfig {
        PacketizerConfig {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            ..PacketizerConfig::default()
        }
    }

    /// A NAL unit of `len` bytes with the given header and a counting payload.
    fn nal(header: u8, len: usize) -> Vec<u8> {
        let mut v = vec![header];
        v.extend((1..len).map(|i| (i % 251) as u8));
        v
    }

    fn framed(nals: &[Vec<u8>]) -> Vec<u8> {
        let mut out = Vec::new();
        for n in nals {
            out.extend_from_slice(&(n.len() as u32).to_be_bytes());
            out.extend_from_slice(n);
        }
        out
    }

    type TestPacketizer = H264Packetizer<Cursor<Vec<u8>>, RecordingSink>;

    fn packetizer(data: Vec<u8>, config: PacketizerConfig) -> (TestPacketizer, RecordingSink) {
        let sink = RecordingSink::default();
        let p = H264Packetizer::new(Cursor::new(data), sink.clone(), config).unwrap();
        (p, sink)
    }

    fn send_all(nals: &[Vec<u8>]) -> (Vec<Recorded>, Result<()>) {
        let (mut p, sink) = packetizer(framed(nals), fast_config());
        let result = p.run(&NO_STOP);
        (sink.take(), result)
    }

    fn reassemble(fragments: &[Recorded]) -> Vec<u8> {
        let indicator = fragments[0].payload[0];
        let fu = FuHeader(fragments[0].payload[1]);
        let mut nal = vec![(indicator & !TYPE_MASK) | fu.nal_type()];
        for f in fragments {
            nal.extend_from_slice(&f.payload[FU_HEADER_LEN..]);
        }
        nal
    }

    #[test]
    fn small_nal_single_packet() {
        let unit = nal(0x67, 50);
        let (packets, result) = send_all(&[unit.clone()]);
        assert!(matches!(result, Err(StreamError::EndOfStream)));
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].payload, unit, "length prefix must be stripped");
        assert!(packets[0].marker);
    }

    #[test]
    fn boundary_length_is_single() {
        let max = fast_config().max_payload();
        assert_eq!(max, DEFAULT_MTU - 14);

        let (packets, _) = send_all(&[nal(0x65, max)]);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].payload.len(), max);
        assert_eq!(packets[0].payload[0], 0x65);
    }

    #[test]
    fn one_past_boundary_is_fragmented() {
        let max = fast_config().max_payload();
        let unit = nal(0x65, max + 1);
        let (packets, _) = send_all(&[unit.clone()]);

        // max bytes after the header fit in a single fragment carrying S and E
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].payload[0] & TYPE_MASK, FU_A_TYPE);
        let fu = FuHeader(packets[0].payload[1]);
        assert!(fu.is_start() && fu.is_end());
        assert!(packets[0].marker);
        assert_eq!(packets[0].payload.len(), max + 2);
        assert_eq!(reassemble(&packets), unit);
    }

    #[test]
    fn large_nal_fragmented() {
        let unit = nal(0x41, 3000);
        let (packets, _) = send_all(&[unit.clone()]);
        assert_eq!(packets.len(), 3);

        let sizes: Vec<usize> = packets.iter().map(|p| p.payload.len()).collect();
        assert_eq!(sizes, vec![1388, 1388, 229]);
        assert_eq!(sizes.iter().sum::<usize>(), 3000 - 1 + 2 * 3);

        for p in &packets {
            assert_eq!(p.payload[0], FU_A_TYPE | 0x40, "FU indicator keeps NRI");
            assert_eq!(p.payload[1] & TYPE_MASK, 1);
        }
        assert!(FuHeader(packets[0].payload[1]).is_start());
        assert!(!FuHeader(packets[0].payload[1]).is_end());
        assert!(!packets[0].marker);
        assert!(!FuHeader(packets[1].payload[1]).is_start());
        assert!(!FuHeader(packets[1].payload[1]).is_end());
        assert!(!packets[1].marker);
        assert!(FuHeader(packets[2].payload[1]).is_end());
        assert!(!FuHeader(packets[2].payload[1]).is_start());
        assert!(packets[2].marker);

        assert_eq!(reassemble(&packets), unit);
        assert!(packets.iter().all(|p| p.timestamp == packets[0].timestamp));
    }

    #[test]
    fn fragment_count_and_reassembly_hold_across_sizes() {
        let max = fast_config().max_payload();
        for len in [max + 2, 2 * max, 2 * max + 1, 2 * max + 2, 10_000, 65_000] {
            let unit = nal(0x25, len);
            let (packets, _) = send_all(&[unit.clone()]);
            assert_eq!(packets.len(), fragment_count(len, max), "len {len}");
            assert_eq!(packets.iter().filter(|p| p.marker).count(), 1);
            assert!(packets.last().unwrap().marker);
            assert!(packets.iter().all(|p| p.payload.len() <= max + FU_HEADER_LEN));
            assert_eq!(reassemble(&packets), unit, "len {len}");
        }
    }

    #[test]
    fn small_mtu_still_fragments() {
        let config = PacketizerConfig {
            mtu: 100,
            ..fast_config()
        };
        let unit = nal(0x65, 500);
        let (mut p, sink) = packetizer(framed(&[unit.clone()]), config);
        assert_eq!(p.packetize_next(&NO_STOP).unwrap(), Packetization::FuA { fragments: 6 });
        let packets = sink.take();
        assert!(packets.iter().all(|p| p.payload.len() + RTP_HEADER_LEN <= 100));
        assert_eq!(reassemble(&packets), unit);
    }

    #[test]
    fn mixed_sequence_keeps_order() {
        let units = vec![nal(0x67, 50), nal(0x41, 3000), nal(0x68, 4)];
        let (packets, result) = send_all(&units);
        assert!(matches!(result, Err(StreamError::EndOfStream)));
        assert_eq!(packets.len(), 5);
        assert_eq!(packets[0].payload, units[0]);
        assert_eq!(reassemble(&packets[1..4]), units[1]);
        assert_eq!(packets[4].payload, units[2]);
        assert_eq!(packets.iter().filter(|p| p.marker).count(), 3);
    }

    #[test]
    fn zero_and_one_byte_lengths_are_rejected() {
        for bad in [0u32, 1] {
            let mut data = bad.to_be_bytes().to_vec();
            data.extend_from_slice(&[0x65, 0, 0, 0, 0]);
            let (mut p, sink) = packetizer(data, fast_config());
            let err = p.packetize_next(&NO_STOP).unwrap_err();
            assert!(matches!(err, StreamError::InvalidNalLength(n) if n == bad as usize));
            assert!(sink.take().is_empty());
        }
    }

    #[test]
    fn top_prefix_byte_is_ignored() {
        let unit = nal(0x65, 60);
        let mut data = vec![0xFF, 0, 0, 60];
        data.extend_from_slice(&unit);
        let (mut p, sink) = packetizer(data, fast_config());
        assert_eq!(p.packetize_next(&NO_STOP).unwrap(), Packetization::SingleNalUnit);
        assert_eq!(sink.take()[0].payload, unit);
    }

    #[test]
    fn truncated_nal_sends_nothing() {
        let mut data = framed(&[nal(0x65, 100)]);
        data.truncate(60);
        let (mut p, sink) = packetizer(data, fast_config());
        assert!(matches!(p.packetize_next(&NO_STOP), Err(StreamError::EndOfStream)));
        assert!(sink.take().is_empty());

        // fragments already sent stay sent, the rest is dropped
        let mut data = framed(&[nal(0x65, 3000)]);
        data.truncate(2000);
        let (mut p, sink) = packetizer(data, fast_config());
        assert!(matches!(p.packetize_next(&NO_STOP), Err(StreamError::EndOfStream)));
        let packets = sink.take();
        assert_eq!(packets.len(), 1);
        assert!(!packets[0].marker);
    }

    #[test]
    fn read_error_ends_session() {
        struct Failing;
        impl Read for Failing {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "encoder gone"))
            }
        }
        impl ByteSource for Failing {
            fn available(&self) -> usize {
                0
            }
        }

        let mut p = H264Packetizer::new(Failing, RecordingSink::default(), fast_config()).unwrap();
        assert!(matches!(p.run(&NO_STOP), Err(StreamError::Io(_))));
    }

    #[test]
    fn sink_failure_ends_session() {
        let data = framed(&[nal(0x67, 20), nal(0x41, 3000), nal(0x65, 20)]);
        let mut p = H264Packetizer::new(Cursor::new(data), FailingSink::accepting(2), fast_config())
            .unwrap();
        let stats = p.stats();

        let err = p.run(&NO_STOP).unwrap_err();
        assert!(matches!(err, StreamError::Transport(_)));
        // SPS and the first fragment went out, the second fragment failed
        assert_eq!(stats.snapshot().packets, 2);
        assert_eq!(stats.snapshot().nal_units, 1);
    }

    #[test]
    fn packets_are_spaced_by_delay() {
        let delay = Duration::from_millis(15);
        let config = PacketizerConfig {
            initial_delay: delay,
            min_delay: delay,
            max_delay: delay,
            ..PacketizerConfig::default()
        };
        let (mut p, sink) = packetizer(framed(&[nal(0x41, 3000)]), config);

        let started = Instant::now();
        assert_eq!(
            p.packetize_next(&NO_STOP).unwrap(),
            Packetization::FuA { fragments: 3 }
        );
        // the first packet leaves at once, each later one waits a full delay
        assert!(started.elapsed() >= 2 * delay, "elapsed {:?}", started.elapsed());
        assert_eq!(p.delay(), delay);
        assert_eq!(sink.take().len(), 3);
    }

    #[test]
    fn stop_flag_checked_before_each_nal() {
        let (mut p, sink) = packetizer(framed(&[nal(0x65, 10)]), fast_config());
        let stop = AtomicBool::new(true);
        p.run(&stop).unwrap();
        assert!(sink.take().is_empty());
    }

    #[test]
    fn parameter_sets_captured() {
        let sps = vec![0x67, 0x42, 0x00, 0x1e, 0xab];
        let pps = vec![0x68, 0xce, 0x38, 0x80];
        let (mut p, _sink) = packetizer(
            framed(&[sps.clone(), pps.clone(), nal(0x65, 20)]),
            fast_config(),
        );
        let sets = p.parameter_sets();
        let _ = p.run(&NO_STOP);

        let sets = sets.read();
        assert!(sets.is_complete());
        assert_eq!(sets.sps.as_deref(), Some(&sps[..]));
        assert_eq!(sets.pps.as_deref(), Some(&pps[..]));
        assert_eq!(sets.profile_level_id().as_deref(), Some("42001e"));
        assert_eq!(
            sets.sprop_parameter_sets().as_deref(),
            Some(
                format!(
                    "{},{}",
                    BASE64_STANDARD.encode(&sps),
                    BASE64_STANDARD.encode(&pps)
                )
                .as_str()
            )
        );
    }

    #[test]
    fn stats_follow_packets() {
        let (mut p, _sink) = packetizer(
            framed(&[nal(0x67, 50), nal(0x41, 3000)]),
            fast_config(),
        );
        let stats = p.stats();
        let _ = p.run(&NO_STOP);
        assert_eq!(
            stats.snapshot(),
            StatsSnapshot {
                nal_units: 2,
                fragmented_units: 1,
                packets: 4,
                payload_bytes: 50 + 2999 + 6,
            }
        );
    }

    /// Cursor whose reported backlog grows on every query.
    struct GrowingBacklog {
        inner: Cursor<Vec<u8>>,
        backlog: Cell<usize>,
    }

    impl Read for GrowingBacklog {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.inner.read(buf)
        }
    }

    impl ByteSource for GrowingBacklog {
        fn available(&self) -> usize {
            self.backlog.set(self.backlog.get() + 100);
            self.backlog.get()
        }
    }

    #[test]
    fn reads_feed_the_pacer() {
        let source = GrowingBacklog {
            inner: Cursor::new(framed(&[nal(0x65, 50)])),
            backlog: Cell::new(0),
        };
        let config = PacketizerConfig {
            initial_delay: Duration::ZERO,
            max_delay: Duration::from_millis(5),
            ..PacketizerConfig::default()
        };
        let mut p = H264Packetizer::new(source, RecordingSink::default(), config).unwrap();
        p.packetize_next(&NO_STOP).unwrap();
        // one observation for the prefix, one for the body
        assert_eq!(p.delay(), Duration::from_millis(2));
    }

    #[test]
    fn invalid_configs_rejected() {
        for config in [
            PacketizerConfig {
                mtu: 14,
                ..PacketizerConfig::default()
            },
            PacketizerConfig {
                mtu: MAX_MTU + 1,
                ..PacketizerConfig::default()
            },
            PacketizerConfig {
                clock_rate: 0,
                ..PacketizerConfig::default()
            },
            PacketizerConfig {
                min_delay: Duration::from_millis(50),
                max_delay: Duration::from_millis(10),
                ..PacketizerConfig::default()
            },
        ] {
            let source = Cursor::new(Vec::new());
            let result = H264Packetizer::new(source, RecordingSink::default(), config);
            assert!(matches!(result, Err(StreamError::InvalidConfig(_))));
        }
    }

    #[test]
    fn synchronize_then_stream() {
        let mut data = 16u32.to_be_bytes().to_vec();
        data.extend_from_slice(b"free");
        data.extend_from_slice(&[0; 8]);
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(b"mdat");
        let unit = nal(0x65, 30);
        data.extend(framed(&[unit.clone()]));

        let (mut p, sink) = packetizer(data, fast_config());
        assert_eq!(p.synchronize(&NO_STOP).unwrap().consumed, 24);
        p.packetize_next(&NO_STOP).unwrap();
        assert_eq!(sink.take()[0].payload, unit);
    }
}
