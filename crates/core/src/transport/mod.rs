//! Outbound side of the pipeline.
//!
//! The packetizer never serializes RTP headers or touches sockets. It
//! reserves [`RTP_HEADER_LEN`](crate::media::rtp::RTP_HEADER_LEN) bytes at
//! the front of its buffer and hands the whole packet to an [`RtpSink`]:
//!
//! 1. [`set_timestamp`](RtpSink::set_timestamp) once per access unit.
//! 2. [`mark_next_packet`](RtpSink::mark_next_packet) before the last packet
//!    of the access unit.
//! 3. [`send`](RtpSink::send) for every packet. The slice starts with the
//!    reserved header region; the sink fills it and transmits synchronously,
//!    because the packetizer overwrites the buffer as soon as `send` returns.
//!
//! [`UdpSender`] is the stock implementation.

pub mod udp;

pub use udp::UdpSender;

use crate::error::Result;

/// Consumer of packets built by the packetizer.
pub trait RtpSink {
    /// RTP timestamp for every packet sent from now on.
    fn set_timestamp(&mut self, timestamp: u32);

    /// Set the marker bit on the next packet only.
    fn mark_next_packet(&mut self);

    /// Fill the RTP header region of `packet` and transmit it.
    fn send(&mut self, packet: &mut [u8]) -> Result<()>;
}

impl<T: RtpSink + ?Sized> RtpSink for Box<T> {
    fn set_timestamp(&mut self, timestamp: u32) {
        (**self).set_timestamp(timestamp)
    }

    fn mark_next_packet(&mut self) {
        (**self).mark_next_packet()
    }

    fn send(&mut self, packet: &mut [u8]) -> Result<()> {
        (**self).send(packet)
    }
}
