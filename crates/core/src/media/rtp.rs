/// Length of the RTP fixed header without CSRCs or extensions.
pub const RTP_HEADER_LEN: usize = 12;

/// RTP fixed header writer (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// The packetizer leaves [`RTP_HEADER_LEN`] bytes free at the start of its
/// buffer; the sender fills them in place with [`write_into`](Self::write_into)
/// right before the datagram goes out.
///
/// - **Sequence number**: 16-bit, wrapping, incremented on every packet.
/// - **Timestamp**: set per access unit by the packetizer (90 kHz for video).
/// - **SSRC**: random per RFC 3550 §8.1 unless given explicitly.
///
/// Version is always 2. Padding, extension, and CSRC count are always 0.
#[derive(Debug)]
pub struct RtpHeader {
    /// RTP payload type (7-bit, RFC 3551).
    pub pt: u8,
    /// Synchronization source identifier (RFC 3550 §8.1).
    pub ssrc: u32,
    sequence: u16,
    timestamp: u32,
}

impl RtpHeader {
    /// Create a new RTP header state with explicit SSRC.
    pub fn new(pt: u8, ssrc: u32) -> Self {
        tracing::debug!(
            pt,
            ssrc = format_args!("{:#010X}", ssrc),
            "RTP header state created"
        );
        Self {
            pt: pt & 0x7f,
            ssrc,
            sequence: 0,
            timestamp: 0,
        }
    }

    /// Create with a random SSRC and a random initial sequence number.
    ///
    /// RFC 3550 §5.1 recommends both be unpredictable.
    pub fn with_random_ssrc(pt: u8) -> Self {
        let mut header = Self::new(pt, rand::random::<u32>());
        header.sequence = rand::random::<u16>();
        header
    }

    /// Sequence number the next [`write_into`](Self::write_into) will use.
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Set the timestamp carried by subsequent packets.
    pub fn set_timestamp(&mut self, timestamp: u32) {
        self.timestamp = timestamp;
    }

    /// Serialize the fixed header into `buf[..12]` and advance the sequence.
    ///
    /// The `marker` bit signals the last packet of an access unit
    /// (RFC 6184 §5.1).
    pub fn write_into(&mut self, buf: &mut [u8; RTP_HEADER_LEN], marker: bool) {
        buf[0] = 2 << 6;
        buf[1] = ((marker as u8) << 7) | self.pt;
        buf[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        buf[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[8..12].copy_from_slice(&self.ssrc.to_be_bytes());

        self.sequence = self.sequence.wrapping_add(1);
    }
}

/// Whether the marker bit is set in a serialized RTP packet.
pub fn marker(packet: &[u8]) -> bool {
    packet.get(1).is_some_and(|b| b & 0x80 != 0)
}
