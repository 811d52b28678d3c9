use std::fs::{self, File};
use std::io::{self, Read};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use streamer::media::h264::{DEFAULT_MTU, VIDEO_CLOCK_RATE};
use streamer::{
    PacketizerConfig, PipeSource, SdpConfig, StreamState, Streamer, UdpSender, generate_sdp,
};

#[derive(Parser, Debug)]
#[command(
    name = "rtp-streamer",
    about = "Stream a live MP4/H.264 encoder output as RTP over UDP"
)]
struct Args {
    /// Destination address (host:port)
    #[arg(long, short)]
    dest: SocketAddr,

    /// Encoder output: file or FIFO path, `-` for stdin
    #[arg(long, short, default_value = "-")]
    input: String,

    /// Maximum packet size, RTP header included
    #[arg(long, default_value_t = DEFAULT_MTU)]
    mtu: usize,

    /// Initial inter-packet delay (ms)
    #[arg(long, default_value_t = 20)]
    delay: u64,

    /// Upper bound of the adaptive delay (ms)
    #[arg(long, default_value_t = 1000)]
    max_delay: u64,

    /// How long a read may wait for the encoder before checking for stop (ms)
    #[arg(long, default_value_t = 100)]
    read_timeout_ms: u64,

    /// Write a session description here once SPS and PPS have been seen
    #[arg(long)]
    sdp: Option<PathBuf>,
}

impl Args {
    fn packetizer_config(&self) -> PacketizerConfig {
        PacketizerConfig {
            mtu: self.mtu,
            initial_delay: Duration::from_millis(self.delay),
            max_delay: Duration::from_millis(self.max_delay),
            ..PacketizerConfig::default()
        }
    }

    fn reads_stdin(&self) -> bool {
        self.input == "-"
    }
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    if let Err(e) = run(&args) {
        eprintln!("Streaming failed: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> streamer::Result<()> {
    let reader: Box<dyn Read + Send> = if args.reads_stdin() {
        Box::new(io::stdin())
    } else {
        Box::new(File::open(&args.input)?)
    };
    let mut source = PipeSource::spawn(reader)?;
    source.set_read_timeout(Some(Duration::from_millis(args.read_timeout_ms)));

    let sender = UdpSender::bind(args.dest)?;
    let payload_type = sender.payload_type();
    tracing::info!(
        dest = %args.dest,
        local = %sender.local_addr()?,
        ssrc = format_args!("{:#010X}", sender.ssrc()),
        "sending RTP"
    );

    let mut streamer = Streamer::new(source, sender, args.packetizer_config())?;
    streamer.start()?;

    // stdin is the video when reading from it, so Enter only stops file input
    let (stop_tx, stop_rx) = mpsc::channel();
    if !args.reads_stdin() {
        println!("Streaming {} to {}, press Enter to stop", args.input, args.dest);
        thread::spawn(move || {
            let mut line = String::new();
            if io::stdin().read_line(&mut line).is_ok() {
                let _ = stop_tx.send(());
            }
        });
    }

    let mut sdp_written = false;
    while streamer.state() != StreamState::Stopped {
        if stop_rx.try_recv().is_ok() {
            streamer.stop();
        }

        if let Some(path) = args.sdp.as_ref().filter(|_| !sdp_written) {
            let params = streamer.parameter_sets();
            if params.is_complete() {
                let sdp = generate_sdp(
                    &SdpConfig::default(),
                    args.dest,
                    payload_type,
                    VIDEO_CLOCK_RATE,
                    &params,
                );
                fs::write(path, sdp)?;
                tracing::info!(path = %path.display(), "session description written");
                sdp_written = true;
            }
        }

        thread::sleep(Duration::from_millis(100));
    }

    let summary = streamer.join()?;
    tracing::info!(
        ended_by = ?summary.ended_by,
        nal_units = summary.stats.nal_units,
        fragmented = summary.stats.fragmented_units,
        packets = summary.stats.packets,
        bytes = summary.stats.payload_bytes,
        "done"
    );
    Ok(())
}
