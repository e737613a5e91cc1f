mod cli;

use std::{io::BufRead, thread, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use cli::Cli;
use crossbeam_channel::{RecvTimeoutError, Sender, TrySendError};
use env_logger::Env;
use log::{debug, info, warn};

use pisense::{
    devices::{
        camera::{CommandRecorder, CommandStillCamera},
        gpio::SysfsGpioSensor,
    },
    monitor::{spawn_monitor, ControlCommand, MonitorEvent},
    monitor_config::load_config_from_file,
    systems::Systems,
    tether_interface::{connect, publish_monitor_event, MonitorOutputs},
};

const DEBOUNCE_STEP_MS: i64 = 10;
const COOLDOWN_STEP_SECS: f32 = 0.5;

fn parse_command(line: &str) -> Option<ControlCommand> {
    match line.trim() {
        "t" => Some(ControlCommand::ManualTrigger),
        "s" => Some(ControlCommand::ManualStop),
        "p" => Some(ControlCommand::ManualCapture),
        "+" => Some(ControlCommand::AdjustDebounce(DEBOUNCE_STEP_MS)),
        "-" => Some(ControlCommand::AdjustDebounce(-DEBOUNCE_STEP_MS)),
        "c+" => Some(ControlCommand::AdjustCooldown(COOLDOWN_STEP_SECS)),
        "c-" => Some(ControlCommand::AdjustCooldown(-COOLDOWN_STEP_SECS)),
        "q" => Some(ControlCommand::Shutdown),
        _ => None,
    }
}

/// Reads one command per line until stdin closes
fn spawn_stdin_commands(commands: Sender<ControlCommand>) {
    thread::spawn(move || {
        println!("Commands: t=trigger s=stop p=photo +/-=debounce c+/c-=cooldown q=quit");
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            match parse_command(&line) {
                Some(command) => {
                    if commands.send(command).is_err() {
                        break;
                    }
                }
                None => println!("Unknown command {:?}", line.trim()),
            }
        }
        debug!("stdin closed; no more commands");
    });
}

/// SIGINT / SIGTERM: close the session cleanly. If the monitor is already
/// gone there is nothing to wait for, so exit.
fn shutdown_signal_handler(commands: Sender<ControlCommand>) -> impl FnMut() + Send + 'static {
    move || match commands.try_send(ControlCommand::Shutdown) {
        Ok(()) => info!("Signal received; shutting down"),
        Err(TrySendError::Full(_)) => warn!("Signal received; shutdown already pending"),
        Err(TrySendError::Disconnected(_)) => std::process::exit(130),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(Env::default().default_filter_or(&cli.log_level))
        .filter_module("paho_mqtt", log::LevelFilter::Warn)
        .filter_module("tether_agent", log::LevelFilter::Warn)
        .init();

    debug!("Started; args: {:?}", cli);

    let mut config = load_config_from_file(&cli.config_path)?;
    if let Some(pin) = cli.gpio_pin {
        config.gpio_pin = pin;
    }
    if let Some(ms) = cli.debounce_ms {
        config.debounce_ms = ms;
    }
    if let Some(secs) = cli.base_duration_secs {
        config.base_duration_secs = secs;
    }
    if let Some(secs) = cli.max_duration_secs {
        config.max_duration_secs = secs;
    }
    if cli.save_config {
        config.write_config_to_file(&cli.config_path)?;
    }

    let tether = if cli.tether_disable {
        info!("Tether disabled");
        None
    } else {
        match connect(
            &cli.agent_role,
            &cli.agent_group,
            &cli.tether_host.to_string(),
        )
        .and_then(|mut agent| MonitorOutputs::new(&mut agent).map(|outputs| (agent, outputs)))
        {
            Ok(connected) => Some(connected),
            Err(e) => {
                warn!("Tether unavailable, continuing without it: {e:#}");
                None
            }
        }
    };

    let sensor = SysfsGpioSensor::open(&config.gpio_root, config.gpio_pin, config.active_low)?;
    let recorder = CommandRecorder::new(&config.recorder_program, &config.recorder_args);
    let still_camera = config
        .still_capture
        .as_ref()
        .map(|s| CommandStillCamera::new(&s.program, &s.args));

    let systems = Systems::new(&config, sensor, recorder, still_camera)?;
    let handle = spawn_monitor(&config, systems)?;

    ctrlc::set_handler(shutdown_signal_handler(handle.commands()))
        .context("failed to install signal handler")?;

    info!(
        "Monitoring GPIO pin {}; sessions of {}s, up to {}s",
        config.gpio_pin, config.base_duration_secs, config.max_duration_secs
    );

    if !cli.no_stdin {
        spawn_stdin_commands(handle.commands());
    }

    loop {
        match handle.events().recv_timeout(Duration::from_millis(100)) {
            Ok(event) => {
                if let MonitorEvent::Status(status) = &event {
                    debug!(
                        "Status: {:?}, {}s remaining, {} queued",
                        status.state, status.remaining_secs, status.queued_triggers
                    );
                }
                if let Some((agent, outputs)) = &tether {
                    publish_monitor_event(agent, outputs, config.gpio_pin, &event);
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if handle.is_finished() {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    handle.join()?;
    info!("Monitor stopped");
    Ok(())
}
