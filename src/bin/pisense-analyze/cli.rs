use std::net::{IpAddr, Ipv4Addr};

use clap::{command, Parser};

const RESULTS_DIR: &str = "results";
const TETHER_HOST: std::net::IpAddr = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));

#[derive(Parser, Debug)]
#[command(version, about = "Count tracked objects crossing a line in a recorded video", long_about = None)]
pub struct Cli {
    /// Track file (JSON lines) produced by the tracker for one video
    pub tracks_path: String,

    /// Vertical counting line as a fraction of frame width (0.0=left, 1.0=right)
    #[arg(long = "vline")]
    pub vline: Option<f32>,

    /// Horizontal counting line as a fraction of frame height (0.0=top, 1.0=bottom)
    #[arg(long = "hline")]
    pub hline: Option<f32>,

    /// Detections below this confidence are ignored
    #[arg(long = "conf", default_value_t = 0.4)]
    pub confidence_threshold: f32,

    #[arg(long="resultsDir",default_value_t=String::from(RESULTS_DIR))]
    pub results_dir: String,

    /// Detection model identifier, recorded in the result
    #[arg(long="model",default_value_t=String::from("unknown"))]
    pub model: String,

    /// Video identifier for the result; defaults to the track file path
    #[arg(long = "videoId")]
    pub video_id: Option<String>,

    /// Flag to disable publishing the result over Tether
    #[arg(long = "tether.disable")]
    pub tether_disable: bool,

    /// The IP address of the MQTT broker (server)
    #[arg(long = "tether.host", default_value_t=TETHER_HOST)]
    pub tether_host: std::net::IpAddr,

    /// The Agent Role (type)
    #[arg(long="tether.role",default_value_t=String::from("pisenseAnalyzer"))]
    pub agent_role: String,

    /// The Agent Group (ID)
    #[arg(long="tether.group",default_value_t=String::from("any"))]
    pub agent_group: String,

    #[arg(long = "loglevel",default_value_t=String::from("info"))]
    pub log_level: String,
}
