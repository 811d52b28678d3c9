//! SDP (Session Description Protocol) generation (RFC 4566 / RFC 8866).
//!
//! A receiver cannot play a bare RTP stream without being told what it is.
//! The description produced here is what `ffplay stream.sdp` or VLC need:
//!
//! ```text
//! v=0                                          ← protocol version
//! o=<user> <sess-id> <sess-ver> IN IP4 <addr>  ← origin
//! s=<session-name>                             ← session name
//! c=IN IP4 <addr>                              ← destination address
//! t=0 0                                        ← timing (live stream)
//! a=tool:rtp-streamer                          ← sender software (§6)
//! a=sendonly                                   ← direction (§6)
//! m=video <port> RTP/AVP 96                    ← media description
//! a=rtpmap:96 H264/90000                       ← codec/clock rate
//! a=fmtp:96 packetization-mode=1[;…]           ← codec parameters
//! ```
//!
//! `profile-level-id` and `sprop-parameter-sets` are only present once the
//! packetizer has seen an SPS and a PPS (RFC 6184 §8.1).

use std::net::SocketAddr;

use crate::media::h264::ParameterSets;

/// Session-level SDP fields.
#[derive(Debug, Clone)]
pub struct SdpConfig {
    /// SDP origin username field (`o=<username> ...`).
    pub username: String,
    /// SDP origin session id field (`o=... <session-id> ...`).
    pub session_id: String,
    /// SDP origin session version field (`o=... ... <session-version> ...`).
    pub session_version: String,
    /// SDP session name (`s=`).
    pub session_name: String,
}

impl Default for SdpConfig {
    fn default() -> Self {
        Self {
            username: "-".to_string(),
            session_id: "0".to_string(),
            session_version: "0".to_string(),
            session_name: "H.264 stream".to_string(),
        }
    }
}

/// Media-level attributes for an H.264 stream.
///
/// Order matters: `a=rtpmap` defines the payload type and must precede the
/// `a=fmtp` line that references it.
pub fn h264_attributes(payload_type: u8, clock_rate: u32, params: &ParameterSets) -> Vec<String> {
    let mut fmtp = format!("a=fmtp:{payload_type} packetization-mode=1");
    if let Some(pl) = params.profile_level_id() {
        fmtp.push_str(&format!(";profile-level-id={pl}"));
    }
    if let Some(sprop) = params.sprop_parameter_sets() {
        fmtp.push_str(&format!(";sprop-parameter-sets={sprop}"));
    }

    vec![format!("a=rtpmap:{payload_type} H264/{clock_rate}"), fmtp]
}

/// Generate an SDP session description for a stream sent to `dest`.
pub fn generate_sdp(
    config: &SdpConfig,
    dest: SocketAddr,
    payload_type: u8,
    clock_rate: u32,
    params: &ParameterSets,
) -> String {
    let family = if dest.is_ipv4() { "IP4" } else { "IP6" };
    let ip = dest.ip();

    let mut sdp: Vec<String> = Vec::new();
    sdp.push("v=0".to_string());
    sdp.push(format!(
        "o={} {} {} IN {family} {ip}",
        config.username, config.session_id, config.session_version
    ));
    sdp.push(format!("s={}", config.session_name));
    sdp.push(format!("c=IN {family} {ip}"));
    sdp.push("t=0 0".to_string());
    sdp.push("a=tool:rtp-streamer".to_string());
    sdp.push("a=sendonly".to_string());
    sdp.push(format!("m=video {} RTP/AVP {payload_type}", dest.port()));
    sdp.extend(h264_attributes(payload_type, clock_rate, params));

    tracing::debug!("SDP: {}", sdp.join("\r\n"));

    format!("{}\r\n", sdp.join("\r\n"))
}
