//! H.264 bitstream handling and RTP packetization.
//!
//! The input is what a live encoder writes to a pipe: an MPEG-4 container
//! whose `mdat` atom carries H.264 NAL units, each preceded by a 4-byte
//! big-endian length instead of an Annex B start code.
//!
//! | Step | Module | Reference |
//! |------|--------|-----------|
//! | Skip the container header | [`container`] | ISO/IEC 14496-12 |
//! | Parse NAL and FU headers | [`nal`] | [RFC 6184 §5.3, §5.8](https://tools.ietf.org/html/rfc6184) |
//! | Split NAL units into packets | [`h264`] | [RFC 6184](https://tools.ietf.org/html/rfc6184) |
//! | Fill the 12-byte RTP header | [`rtp`] | [RFC 3550 §5.1](https://tools.ietf.org/html/rfc3550) |
//!
//! ## RTP overview (RFC 3550)
//!
//! Every RTP packet carries a 12-byte fixed header ([`rtp::RtpHeader`])
//! containing:
//!
//! - **Sequence number** (16-bit, wrapping) for reordering and loss detection.
//! - **Timestamp** (32-bit), a 90 kHz media clock for video.
//! - **SSRC** (32-bit), randomly chosen to identify the sender.
//! - **Marker bit**, set on the last packet of a NAL unit.

pub mod container;
pub mod h264;
pub mod nal;
pub mod rtp;
