//! H.264 NAL unit header fields and FU-A header construction (RFC 6184).
//!
//! ```text
//! NAL header:    +---------------+
//!                |0|1|2|3|4|5|6|7|
//!                +-+-+-+-+-+-+-+-+
//!                |F|NRI|  Type   |
//!                +---------------+
//!
//! FU indicator:  [F|NRI|Type=28]
//! FU header:     [S|E|R|NAL_Type]
//! ```

/// Forbidden-zero bit.
pub const FORBIDDEN_BIT: u8 = 0x80;
/// NRI (nal_ref_idc) mask, bits 5–6.
pub const NRI_MASK: u8 = 0x60;
/// NAL unit type mask, bits 0–4.
pub const TYPE_MASK: u8 = 0x1f;

/// NAL unit type used by FU-A fragmentation units (RFC 6184 §5.8).
pub const FU_A_TYPE: u8 = 28;
/// FU header start bit, set on the first fragment only.
pub const FU_START: u8 = 0x80;
/// FU header end bit, set on the last fragment only.
pub const FU_END: u8 = 0x40;
/// FU indicator + FU header.
pub const FU_HEADER_LEN: usize = 2;

/// Length prefix (4 bytes) plus the NAL header byte.
pub const NAL_PREFIX_LEN: usize = 5;

/// Coded slice of an IDR picture.
pub const NAL_TYPE_IDR: u8 = 5;
/// Sequence parameter set.
pub const NAL_TYPE_SPS: u8 = 7;
/// Picture parameter set.
pub const NAL_TYPE_PPS: u8 = 8;

/// One-byte H.264 NAL unit header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalHeader(pub u8);

impl NalHeader {
    pub fn nal_type(self) -> u8 {
        self.0 & TYPE_MASK
    }

    /// NRI bits, left in place (already shifted into bits 5–6).
    pub fn nri(self) -> u8 {
        self.0 & NRI_MASK
    }

    pub fn forbidden(self) -> bool {
        self.0 & FORBIDDEN_BIT != 0
    }

    /// Build the FU indicator and the FU header of the *first* fragment.
    ///
    /// The start bit is set; callers clear it with [`FuHeader::continuation`]
    /// and set the end bit with [`FuHeader::last`].
    pub fn fu_a(self) -> (u8, FuHeader) {
        let indicator = self.nri() | FU_A_TYPE;
        (indicator, FuHeader(FU_START | self.nal_type()))
    }
}

/// The second byte of an FU-A payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuHeader(pub u8);

impl FuHeader {
    pub fn is_start(self) -> bool {
        self.0 & FU_START != 0
    }

    pub fn is_end(self) -> bool {
        self.0 & FU_END != 0
    }

    pub fn nal_type(self) -> u8 {
        self.0 & TYPE_MASK
    }

    /// Same header with the start bit cleared.
    pub fn continuation(self) -> Self {
        Self(self.0 & !FU_START)
    }

    /// Same header with the end bit set.
    pub fn last(self) -> Self {
        Self(self.0 | FU_END)
    }
}

/// Decode the NAL length prefix written by the encoder.
///
/// Only the low three bytes are significant: `b[3] + b[2]*256 + b[1]*65536`.
/// The top byte is ignored.
pub fn nal_length(prefix: [u8; 4]) -> usize {
    usize::from(prefix[3]) | usize::from(prefix[2]) << 8 | usize::from(prefix[1]) << 16
}

/// Number of FU-A fragments needed to carry a NAL unit of `nal_len` bytes
/// when each fragment holds at most `max_fragment` bytes of payload.
///
/// The NAL header byte is not carried in the fragments, hence `nal_len - 1`.
pub fn fragment_count(nal_len: usize, max_fragment: usize) -> usize {
    nal_len.saturating_sub(1).div_ceil(max_fragment)
}
