use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};

use crate::error::{Result, StreamError};
use crate::media::rtp::{RTP_HEADER_LEN, RtpHeader};
use crate::transport::RtpSink;

/// Default dynamic payload type for H.264 (RFC 3551 §6).
pub const DEFAULT_PAYLOAD_TYPE: u8 = 96;

/// Unicast RTP sender over UDP.
///
/// Binds one ephemeral socket and sends every packet to a fixed
/// destination. Owns the [`RtpHeader`] state, so sequence numbers and SSRC
/// are per sender; each streaming session gets its own.
pub struct UdpSender {
    socket: UdpSocket,
    dest: SocketAddr,
    header: RtpHeader,
    marker: bool,
}

impl UdpSender {
    /// Bind an ephemeral socket of the destination's address family.
    pub fn bind(dest: SocketAddr) -> Result<Self> {
        let local: SocketAddr = if dest.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local)?;
        let header = RtpHeader::with_random_ssrc(DEFAULT_PAYLOAD_TYPE);
        Ok(Self::with_socket(socket, dest, header))
    }

    /// Use an existing socket and header state.
    pub fn with_socket(socket: UdpSocket, dest: SocketAddr, header: RtpHeader) -> Self {
        tracing::debug!(
            %dest,
            ssrc = format_args!("{:#010X}", header.ssrc),
            "RTP sender ready"
        );
        Self {
            socket,
            dest,
            header,
            marker: false,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn ssrc(&self) -> u32 {
        self.header.ssrc
    }

    pub fn payload_type(&self) -> u8 {
        self.header.pt
    }
}

impl RtpSink for UdpSender {
    fn set_timestamp(&mut self, timestamp: u32) {
        self.header.set_timestamp(timestamp);
    }

    fn mark_next_packet(&mut self) {
        self.marker = true;
    }

    fn send(&mut self, packet: &mut [u8]) -> Result<()> {
        let marker = std::mem::take(&mut self.marker);
        let len = packet.len();
        let header = packet.first_chunk_mut::<RTP_HEADER_LEN>().ok_or_else(|| {
            StreamError::Transport(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("packet too short: {len} bytes"),
            ))
        })?;
        self.header.write_into(header, marker);

        let sent = self
            .socket
            .send_to(packet, self.dest)
            .map_err(StreamError::Transport)?;
        if sent != len {
            return Err(StreamError::Transport(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short datagram: {sent} of {len} bytes"),
            )));
        }

        tracing::trace!(
            seq = self.header.sequence().wrapping_sub(1),
            ts = self.header.timestamp(),
            marker,
            len,
            "RTP packet sent"
        );
        Ok(())
    }
}
