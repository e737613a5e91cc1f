//! Threaded live-monitoring runtime.
//!
//! The sampling thread polls the sensor and debounces it; accepted edges go
//! over a bounded channel to the lifecycle thread, which owns the recording
//! controller (and with it the recorder) plus the still capture cooldown.
//! The still camera itself runs on a third thread so a slow capture cannot
//! delay session timing. Nothing else touches the controller: display code reads the published
//! [`SessionStatus`] snapshot, and user actions arrive as [`ControlCommand`]s.

use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use log::{debug, error, info, warn};

use crate::{
    devices::{
        camera::{Recorder, StillCamera},
        gpio::Sensor,
    },
    monitor_config::MonitorConfig,
    systems::{
        debounce::{clamp_window, EdgeDirection, EdgeEvent},
        recording::{RecordingSessionController, SessionEvent, SessionStatus, Trigger},
        still_capture::{StillCapture, StillWorker},
        LifecycleSystem, SamplingSystem, StillSystem, Systems,
    },
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlCommand {
    ManualTrigger,
    ManualStop,
    /// Take a still now, whatever the cooldown says
    ManualCapture,
    /// Change the debounce window by this many milliseconds
    AdjustDebounce(i64),
    /// Change the still capture cooldown by this many seconds
    AdjustCooldown(f32),
    Shutdown,
}

/// Everything worth showing or publishing, in the order it happened
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    Edge(EdgeEvent),
    Session(SessionEvent),
    Status(SessionStatus),
    StillCaptured(PathBuf),
    DebounceChanged(Duration),
    CooldownChanged(Duration),
}

pub struct MonitorHandle {
    control: Sender<ControlCommand>,
    events: Receiver<MonitorEvent>,
    status: Arc<Mutex<SessionStatus>>,
    debounce_ms: Arc<AtomicU64>,
    sampling: JoinHandle<()>,
    lifecycle: JoinHandle<()>,
}

impl MonitorHandle {
    pub fn send(&self, command: ControlCommand) -> Result<()> {
        self.control
            .send(command)
            .map_err(|_| anyhow!("monitor is no longer running"))
    }

    /// Another sender for control commands, e.g. for an input thread
    pub fn commands(&self) -> Sender<ControlCommand> {
        self.control.clone()
    }

    pub fn events(&self) -> &Receiver<MonitorEvent> {
        &self.events
    }

    pub fn status(&self) -> SessionStatus {
        self.status
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms.load(Ordering::Relaxed))
    }

    pub fn is_finished(&self) -> bool {
        self.lifecycle.is_finished()
    }

    /// Ask both threads to stop (any active session is closed first) and
    /// wait for them
    pub fn shutdown(self) -> Result<()> {
        let _ = self.control.send(ControlCommand::Shutdown);
        self.join()
    }

    /// Wait for both threads without asking them to stop
    pub fn join(self) -> Result<()> {
        self.lifecycle
            .join()
            .map_err(|_| anyhow!("lifecycle thread panicked"))?;
        self.sampling
            .join()
            .map_err(|_| anyhow!("sampling thread panicked"))?;
        Ok(())
    }
}

pub fn spawn_monitor<S, R, C>(config: &MonitorConfig, systems: Systems<S, R, C>) -> Result<MonitorHandle>
where
    S: Sensor + Send + 'static,
    R: Recorder + Send + 'static,
    C: StillCamera + Send + 'static,
{
    let Systems {
        sampling,
        lifecycle: LifecycleSystem { controller, still },
    } = systems;

    let still = still
        .map(|StillSystem { capture, camera }| {
            StillWorker::spawn(camera).map(|worker| StillStage { capture, worker })
        })
        .transpose()?;

    let running = Arc::new(AtomicBool::new(true));
    let debounce_ms = Arc::new(AtomicU64::new(
        sampling.debouncer.window().as_millis() as u64,
    ));
    let status = Arc::new(Mutex::new(SessionStatus::default()));

    let (edge_tx, edge_rx) = bounded::<EdgeEvent>(config.max_queued_triggers.max(1));
    let (control_tx, control_rx) = bounded::<ControlCommand>(16);
    let (event_tx, event_rx) = bounded::<MonitorEvent>(EVENT_CHANNEL_CAPACITY);

    let sampling_thread = {
        let running = running.clone();
        let debounce_ms = debounce_ms.clone();
        let pin = config.gpio_pin;
        let poll_interval = config.poll_interval();
        thread::Builder::new()
            .name(String::from("sampling"))
            .spawn(move || {
                run_sampling(sampling, pin, poll_interval, running, debounce_ms, edge_tx)
            })?
    };

    let lifecycle_thread = {
        let status = status.clone();
        let debounce_ms = debounce_ms.clone();
        let tick = config.lifecycle_tick();
        thread::Builder::new()
            .name(String::from("lifecycle"))
            .spawn(move || {
                let mut runner = LifecycleRunner {
                    controller,
                    still,
                    events: event_tx,
                    status,
                    debounce_ms,
                    last_status: None,
                };
                runner.run(edge_rx, control_rx, tick);
                running.store(false, Ordering::Relaxed);
            })?
    };

    Ok(MonitorHandle {
        control: control_tx,
        events: event_rx,
        status,
        debounce_ms,
        sampling: sampling_thread,
        lifecycle: lifecycle_thread,
    })
}

fn run_sampling<S: Sensor>(
    mut system: SamplingSystem<S>,
    pin: u32,
    poll_interval: Duration,
    running: Arc<AtomicBool>,
    debounce_ms: Arc<AtomicU64>,
    edge_tx: Sender<EdgeEvent>,
) {
    let mut failing = false;

    while running.load(Ordering::Relaxed) {
        let wanted = Duration::from_millis(debounce_ms.load(Ordering::Relaxed));
        if wanted != system.debouncer.window() {
            system.debouncer.set_window(wanted);
        }

        match system.sensor.read() {
            Ok(level) => {
                if failing {
                    info!("GPIO pin {} readable again", pin);
                    failing = false;
                }
                if let Some(edge) = system.debouncer.observe(level, Instant::now()) {
                    info!(
                        "[{}] GPIO pin {} changed to {}",
                        chrono::Local::now().format("%H:%M:%S%.3f"),
                        pin,
                        edge.direction.level_name()
                    );
                    match edge_tx.try_send(edge) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            warn!("Edge queue full; dropping {:?} edge", edge.direction)
                        }
                        Err(TrySendError::Disconnected(_)) => break,
                    }
                }
            }
            Err(e) => {
                // Only the first failure of a streak is worth a line
                if !failing {
                    error!("Failed to read GPIO pin {}: {e:#}", pin);
                    failing = true;
                }
            }
        }

        thread::sleep(poll_interval);
    }

    debug!("Sampling thread exiting");
}

struct StillStage {
    capture: StillCapture,
    worker: StillWorker,
}

struct LifecycleRunner<R: Recorder> {
    controller: RecordingSessionController<R>,
    still: Option<StillStage>,
    events: Sender<MonitorEvent>,
    status: Arc<Mutex<SessionStatus>>,
    debounce_ms: Arc<AtomicU64>,
    last_status: Option<SessionStatus>,
}

impl<R: Recorder> LifecycleRunner<R> {
    fn run(
        &mut self,
        edge_rx: Receiver<EdgeEvent>,
        control_rx: Receiver<ControlCommand>,
        tick: Duration,
    ) {
        self.publish_status(Instant::now());

        loop {
            let mut shutdown = false;

            loop {
                match control_rx.try_recv() {
                    Ok(ControlCommand::Shutdown) => {
                        info!("Shutdown requested");
                        shutdown = true;
                        break;
                    }
                    Ok(command) => self.handle_command(command),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        // Nobody can send commands any more; keep monitoring
                        break;
                    }
                }
            }

            loop {
                match edge_rx.try_recv() {
                    Ok(edge) => self.handle_edge(edge),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        warn!("Sampling thread has stopped");
                        shutdown = true;
                        break;
                    }
                }
            }

            self.collect_stills();

            let now = Instant::now();
            if shutdown {
                if let Some(event) = self.controller.manual_stop() {
                    self.emit(MonitorEvent::Session(event));
                }
                self.publish_status(now);
                if let Some(stage) = self.still.take() {
                    stage.worker.shutdown();
                }
                break;
            }

            for event in self.controller.tick(now) {
                self.emit(MonitorEvent::Session(event));
            }
            self.publish_status(now);

            thread::sleep(tick);
        }

        debug!("Lifecycle thread exiting");
    }

    fn handle_edge(&mut self, edge: EdgeEvent) {
        self.emit(MonitorEvent::Edge(edge));
        if edge.direction != EdgeDirection::Rising {
            return;
        }

        self.controller.enqueue(Trigger::new(edge.timestamp));
        self.request_still(false);
    }

    /// Hand a capture to the still thread if the cooldown allows (or it was
    /// asked for by hand)
    fn request_still(&mut self, manual: bool) {
        let Some(stage) = self.still.as_mut() else {
            if manual {
                warn!("Still capture is not configured; ignoring capture request");
            }
            return;
        };
        let now = Instant::now();
        let path = if manual {
            stage.capture.request_manual()
        } else {
            stage.capture.request(now)
        };
        if let Some(path) = path {
            if !stage.worker.submit(path) {
                stage.capture.complete(false, now);
            }
        }
    }

    fn collect_stills(&mut self) {
        let Some(stage) = self.still.as_mut() else {
            return;
        };
        let finished: Vec<_> = stage.worker.results().try_iter().collect();
        let mut captured = Vec::new();
        for result in finished {
            stage.capture.complete(result.success, Instant::now());
            if result.success {
                captured.push(result.path);
            }
        }
        for path in captured {
            self.emit(MonitorEvent::StillCaptured(path));
        }
    }

    fn handle_command(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::ManualTrigger => {
                info!("Manual trigger");
                self.controller.enqueue(Trigger::new(Instant::now()));
            }
            ControlCommand::ManualStop => {
                info!("Manual stop");
                if let Some(event) = self.controller.manual_stop() {
                    self.emit(MonitorEvent::Session(event));
                }
            }
            ControlCommand::AdjustDebounce(delta_ms) => {
                let current = self.debounce_ms.load(Ordering::Relaxed) as i64;
                let next = clamp_window(Duration::from_millis((current + delta_ms).max(0) as u64));
                self.debounce_ms
                    .store(next.as_millis() as u64, Ordering::Relaxed);
                info!("Debounce time: {}ms", next.as_millis());
                self.emit(MonitorEvent::DebounceChanged(next));
            }
            ControlCommand::ManualCapture => {
                info!("Manual capture");
                self.request_still(true);
            }
            ControlCommand::AdjustCooldown(delta_secs) => match self.still.as_mut() {
                Some(stage) => {
                    let cooldown = stage.capture.gate_mut().adjust(delta_secs);
                    info!("Camera cooldown: {:.1}s", cooldown.as_secs_f32());
                    self.emit(MonitorEvent::CooldownChanged(cooldown));
                }
                None => warn!("Still capture is not configured; ignoring cooldown change"),
            },
            ControlCommand::Shutdown => {}
        }
    }

    fn publish_status(&mut self, now: Instant) {
        let snapshot = self.controller.status(now);
        if self.last_status.as_ref() == Some(&snapshot) {
            return;
        }
        *self.status.lock().unwrap_or_else(|e| e.into_inner()) = snapshot.clone();
        self.last_status = Some(snapshot.clone());
        self.emit(MonitorEvent::Status(snapshot));
    }

    fn emit(&self, event: MonitorEvent) {
        if let Err(TrySendError::Full(event)) = self.events.try_send(event) {
            debug!("Event channel full; dropping {:?}", event);
        }
    }
}
