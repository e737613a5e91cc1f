use std::net::{IpAddr, Ipv4Addr};

use clap::{command, Parser};

// Some defaults; some of which can be overriden via CLI args
const CONFIG_FILE_PATH: &str = "./monitor.json";
const TETHER_HOST: std::net::IpAddr = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));

#[derive(Parser, Debug)]
#[command(version, about = "Watch a GPIO input and record video when it fires", long_about = None)]
pub struct Cli {
    /// Where to load monitor config
    #[arg(long="monitorConfigPath",default_value_t=String::from(CONFIG_FILE_PATH))]
    pub config_path: String,

    /// Write the effective config (file plus overrides) back to the config path
    #[arg(long = "saveConfig")]
    pub save_config: bool,

    /// Override the input pin (BCM numbering)
    #[arg(long = "gpioPin")]
    pub gpio_pin: Option<u32>,

    /// Override the debounce window in milliseconds
    #[arg(long = "debounceMs")]
    pub debounce_ms: Option<u64>,

    /// Override the length of a session (and of each extension) in seconds
    #[arg(long = "baseDurationSecs")]
    pub base_duration_secs: Option<u64>,

    /// Override the maximum length of a session in seconds
    #[arg(long = "maxDurationSecs")]
    pub max_duration_secs: Option<u64>,

    /// Do not read control commands from stdin
    #[arg(long = "noStdin")]
    pub no_stdin: bool,

    /// Flag to disable Tether connection
    #[arg(long = "tether.disable")]
    pub tether_disable: bool,

    /// The IP address of the MQTT broker (server)
    #[arg(long = "tether.host", default_value_t=TETHER_HOST)]
    pub tether_host: std::net::IpAddr,

    /// The Agent Role (type)
    #[arg(long="tether.role",default_value_t=String::from("pisenseMonitor"))]
    pub agent_role: String,

    /// The Agent Group (ID)
    #[arg(long="tether.group",default_value_t=String::from("any"))]
    pub agent_group: String,

    #[arg(long = "loglevel",default_value_t=String::from("info"))]
    pub log_level: String,
}
