use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::devices::camera::Recorder;

/// One request to start (or extend) a recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trigger {
    pub timestamp: Instant,
}

impl Trigger {
    pub fn new(timestamp: Instant) -> Self {
        Trigger { timestamp }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Recording,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordingSession {
    pub start_time: Instant,
    pub end_time: Instant,
    pub file: PathBuf,
}

impl RecordingSession {
    pub fn duration(&self) -> Duration {
        self.end_time - self.start_time
    }
}

pub struct SessionSettings {
    pub base_duration: Duration,
    pub max_duration: Duration,
    /// Pause between a session ending and a queued trigger starting the next
    pub restart_settle: Duration,
    pub max_queued_triggers: usize,
    pub output_dir: PathBuf,
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            base_duration: Duration::from_secs(60),
            max_duration: Duration::from_secs(300),
            restart_settle: Duration::from_millis(500),
            max_queued_triggers: 64,
            output_dir: PathBuf::from("videos"),
        }
    }
}

/// What happened during one call into the controller
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Started { file: PathBuf, end_time: Instant },
    Extended { end_time: Instant, clamped: bool },
    Stopped { file: PathBuf, manual: bool },
    StartFailed,
}

/// Snapshot of the controller, for display and publishing
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub state: SessionState,
    pub remaining_secs: u64,
    pub queued_triggers: usize,
    pub session_file: Option<PathBuf>,
}

impl Default for SessionStatus {
    fn default() -> Self {
        SessionStatus {
            state: SessionState::Idle,
            remaining_secs: 0,
            queued_triggers: 0,
            session_file: None,
        }
    }
}

/// Owns the recorder and decides when sessions start, extend and stop.
/// All decisions are a function of the `now` passed in and stored state.
pub struct RecordingSessionController<R: Recorder> {
    settings: SessionSettings,
    recorder: R,
    queue: VecDeque<Trigger>,
    session: Option<RecordingSession>,
    restart_not_before: Option<Instant>,
    dropped_triggers: u64,
}

impl<R: Recorder> RecordingSessionController<R> {
    pub fn new(mut settings: SessionSettings, recorder: R) -> Self {
        if settings.max_duration < settings.base_duration {
            warn!(
                "Max duration {:?} is shorter than base duration {:?}; using base duration as the cap",
                settings.max_duration, settings.base_duration
            );
            settings.max_duration = settings.base_duration;
        }
        if settings.max_queued_triggers == 0 {
            settings.max_queued_triggers = 1;
        }
        RecordingSessionController {
            settings,
            recorder,
            queue: VecDeque::new(),
            session: None,
            restart_not_before: None,
            dropped_triggers: 0,
        }
    }

    /// Queue a trigger for the next `tick`. Returns false if the queue is
    /// full and the trigger was dropped.
    pub fn enqueue(&mut self, trigger: Trigger) -> bool {
        if self.queue.len() >= self.settings.max_queued_triggers {
            self.dropped_triggers += 1;
            warn!(
                "Trigger queue full ({} pending); dropping trigger ({} dropped so far)",
                self.queue.len(),
                self.dropped_triggers
            );
            return false;
        }
        self.queue.push_back(trigger);
        true
    }

    /// Advance the state machine: extend with triggers stamped before the
    /// current end time, expire the active session if its time is up, then
    /// consume the rest of the queue (start a session when idle, one
    /// extension per trigger while recording).
    pub fn tick(&mut self, now: Instant) -> Vec<SessionEvent> {
        let mut events = Vec::new();

        // Triggers that arrived while still recording extend the session even
        // if this tick only runs after its end time
        if let Some(session) = self.session.as_mut() {
            while self
                .queue
                .front()
                .is_some_and(|t| t.timestamp < session.end_time)
            {
                if let Some(trigger) = self.queue.pop_front() {
                    events.push(extend_session(session, &self.settings, trigger));
                }
            }
        }

        if self.session.as_ref().is_some_and(|s| now >= s.end_time) {
            if let Some(file) = self.stop_session() {
                events.push(SessionEvent::Stopped {
                    file,
                    manual: false,
                });
            }
            if !self.queue.is_empty() {
                debug!(
                    "{} trigger(s) still queued; restart after {:?}",
                    self.queue.len(),
                    self.settings.restart_settle
                );
                self.restart_not_before = Some(now + self.settings.restart_settle);
            }
        }

        if let Some(session) = self.session.as_mut() {
            while let Some(trigger) = self.queue.pop_front() {
                events.push(extend_session(session, &self.settings, trigger));
            }
        } else if self.restart_not_before.is_none_or(|t| now >= t) {
            if let Some(trigger) = self.queue.pop_front() {
                self.restart_not_before = None;
                events.push(self.start_session(trigger, now));
            }
        }

        events
    }

    /// Force the controller back to Idle, whatever the remaining time;
    /// pending triggers are discarded.
    pub fn manual_stop(&mut self) -> Option<SessionEvent> {
        let discarded = self.queue.len();
        self.queue.clear();
        self.restart_not_before = None;
        if discarded > 0 {
            info!("Manual stop; discarded {} queued trigger(s)", discarded);
        }
        self.stop_session().map(|file| SessionEvent::Stopped { file, manual: true })
    }

    fn start_session(&mut self, trigger: Trigger, now: Instant) -> SessionEvent {
        let file = match next_session_file(&self.settings.output_dir) {
            Ok(f) => f,
            Err(e) => {
                error!("Cannot prepare session file: {e:#}");
                return SessionEvent::StartFailed;
            }
        };

        debug!(
            "Starting session for trigger queued {:?} ago",
            now.saturating_duration_since(trigger.timestamp)
        );

        match self.recorder.start(&file) {
            Ok(()) => {
                let initial = self.settings.base_duration.min(self.settings.max_duration);
                let end_time = now + initial;
                info!("Recording started: {:?} for {:?}", file, initial);
                self.session = Some(RecordingSession {
                    start_time: now,
                    end_time,
                    file: file.clone(),
                });
                SessionEvent::Started { file, end_time }
            }
            Err(e) => {
                error!("Failed to start recording to {:?}: {e:#}", file);
                SessionEvent::StartFailed
            }
        }
    }

    /// Release the recorder; Idle afterwards even if the release failed
    fn stop_session(&mut self) -> Option<PathBuf> {
        let session = self.session.take()?;
        match self.recorder.stop() {
            Ok(()) => info!("Recording stopped: {:?}", session.file),
            Err(e) => error!(
                "Failed to stop recording cleanly ({:?}); forcing Idle: {e:#}",
                session.file
            ),
        }
        Some(session.file)
    }

    pub fn state(&self) -> SessionState {
        if self.session.is_some() {
            SessionState::Recording
        } else {
            SessionState::Idle
        }
    }

    pub fn session(&self) -> Option<&RecordingSession> {
        self.session.as_ref()
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.session
            .as_ref()
            .map(|s| s.end_time.saturating_duration_since(now))
            .unwrap_or_default()
    }

    pub fn queued_triggers(&self) -> usize {
        self.queue.len()
    }

    pub fn dropped_triggers(&self) -> u64 {
        self.dropped_triggers
    }

    pub fn status(&self, now: Instant) -> SessionStatus {
        let remaining = self.remaining(now);
        let remaining_secs = if remaining.subsec_nanos() > 0 {
            remaining.as_secs() + 1
        } else {
            remaining.as_secs()
        };
        SessionStatus {
            state: self.state(),
            remaining_secs,
            queued_triggers: self.queued_triggers(),
            session_file: self.session.as_ref().map(|s| s.file.clone()),
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn recorder(&self) -> &R {
        &self.recorder
    }
}

fn extend_session(
    session: &mut RecordingSession,
    settings: &SessionSettings,
    trigger: Trigger,
) -> SessionEvent {
    let cap = session.start_time + settings.max_duration;
    let wanted = session.end_time + settings.base_duration;
    let clamped = wanted > cap;
    session.end_time = wanted.min(cap);

    if clamped {
        debug!("Extension clamped at max duration {:?}", settings.max_duration);
    }
    info!(
        "Recording extended by trigger at +{:?}; session now {:?} long",
        trigger.timestamp.saturating_duration_since(session.start_time),
        session.duration()
    );

    SessionEvent::Extended {
        end_time: session.end_time,
        clamped,
    }
}

/// `video_<timestamp>.h264` in the output directory, created if missing.
/// A numeric suffix keeps two sessions in the same second apart.
pub fn next_session_file(output_dir: &Path) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(output_dir)?;
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
    let mut candidate = output_dir.join(format!("video_{stamp}.h264"));
    let mut n = 1;
    while candidate.exists() {
        candidate = output_dir.join(format!("video_{stamp}_{n}.h264"));
        n += 1;
    }
    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use tempfile::{tempdir, TempDir};

    #[derive(Default)]
    struct FakeRecorder {
        started: Vec<PathBuf>,
        stops: usize,
        active: bool,
        fail_start: bool,
        fail_stop: bool,
    }

    impl Recorder for FakeRecorder {
        fn start(&mut self, destination: &Path) -> Result<()> {
            assert!(!self.active, "start called while already started");
            if self.fail_start {
                return Err(anyhow!("camera busy"));
            }
            self.active = true;
            self.started.push(destination.to_path_buf());
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            self.stops += 1;
            self.active = false;
            if self.fail_stop {
                return Err(anyhow!("encoder hung"));
            }
            Ok(())
        }
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn controller_with(recorder: FakeRecorder) -> (RecordingSessionController<FakeRecorder>, TempDir) {
        let dir = tempdir().unwrap();
        let controller = RecordingSessionController::new(
            SessionSettings {
                base_duration: secs(60),
                max_duration: secs(300),
                restart_settle: Duration::ZERO,
                max_queued_triggers: 8,
                output_dir: dir.path().join("videos"),
            },
            recorder,
        );
        (controller, dir)
    }

    fn controller() -> (RecordingSessionController<FakeRecorder>, TempDir) {
        controller_with(FakeRecorder::default())
    }

    fn span(c: &RecordingSessionController<FakeRecorder>, t0: Instant) -> (Duration, Duration) {
        let s = c.session().unwrap();
        (s.start_time - t0, s.end_time - t0)
    }

    #[test]
    fn test_trigger_while_idle_starts_base_session() {
        let t0 = Instant::now();
        let (mut c, _dir) = controller();
        assert_eq!(c.state(), SessionState::Idle);

        c.enqueue(Trigger::new(t0));
        let events = c.tick(t0);
        assert!(matches!(events.as_slice(), [SessionEvent::Started { .. }]));
        assert_eq!(c.state(), SessionState::Recording);
        assert_eq!(span(&c, t0), (secs(0), secs(60)));
        assert_eq!(c.recorder().started.len(), 1);
        assert_eq!(c.remaining(t0 + secs(15)), secs(45));
    }

    #[test]
    fn test_rapid_triggers_extend_up_to_cap() {
        let t0 = Instant::now();
        let (mut c, _dir) = controller();

        for _ in 0..4 {
            c.enqueue(Trigger::new(t0));
        }
        c.tick(t0);
        // First trigger starts, the next three wait for the following tick
        assert_eq!(span(&c, t0), (secs(0), secs(60)));
        c.tick(t0);
        assert_eq!(span(&c, t0), (secs(0), secs(240)));

        c.enqueue(Trigger::new(t0));
        let events = c.tick(t0);
        assert_eq!(span(&c, t0), (secs(0), secs(300)));
        assert!(matches!(
            events.as_slice(),
            [SessionEvent::Extended { clamped: false, .. }]
        ));

        c.enqueue(Trigger::new(t0));
        let events = c.tick(t0);
        assert_eq!(span(&c, t0), (secs(0), secs(300)));
        assert!(matches!(
            events.as_slice(),
            [SessionEvent::Extended { clamped: true, .. }]
        ));
        assert_eq!(c.queued_triggers(), 0);
    }

    #[test]
    fn test_duration_never_exceeds_max() {
        let t0 = Instant::now();
        let (mut c, _dir) = controller();
        let mut t = t0;

        for step in 0..2000u64 {
            t += Duration::from_millis(137 + (step * 7919) % 4000);
            if step % 3 != 0 {
                c.enqueue(Trigger::new(t));
            }
            c.tick(t);
            if let Some(s) = c.session() {
                assert!(s.end_time >= s.start_time);
                assert!(s.duration() <= secs(300));
            }
        }
    }

    #[test]
    fn test_triggers_are_consumed_in_arrival_order() {
        let t0 = Instant::now();
        let (mut c, _dir) = controller();
        c.enqueue(Trigger::new(t0));
        c.tick(t0);

        let arrivals = [t0 + secs(1), t0 + secs(2), t0 + secs(3)];
        for a in arrivals {
            c.enqueue(Trigger::new(a));
        }
        let queued: Vec<Instant> = c.queue.iter().map(|t| t.timestamp).collect();
        assert_eq!(queued, arrivals);

        let events = c.tick(t0 + secs(4));
        let ends: Vec<Duration> = events
            .iter()
            .map(|e| match e {
                SessionEvent::Extended { end_time, .. } => *end_time - t0,
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(ends, vec![secs(120), secs(180), secs(240)]);
    }

    #[test]
    fn test_session_stops_at_end_time() {
        let t0 = Instant::now();
        let (mut c, _dir) = controller();
        c.enqueue(Trigger::new(t0));
        c.tick(t0);

        assert!(c.tick(t0 + secs(59)).is_empty());
        assert_eq!(c.state(), SessionState::Recording);

        let events = c.tick(t0 + secs(60));
        assert!(matches!(
            events.as_slice(),
            [SessionEvent::Stopped { manual: false, .. }]
        ));
        assert_eq!(c.state(), SessionState::Idle);
        assert_eq!(c.recorder().stops, 1);
    }

    #[test]
    fn test_queued_trigger_restarts_after_expiry() {
        let t0 = Instant::now();
        let (mut c, _dir) = controller();
        c.enqueue(Trigger::new(t0));
        c.tick(t0);

        // Arrives between the last tick and expiry
        c.enqueue(Trigger::new(t0 + secs(60)));
        let events = c.tick(t0 + secs(60));
        assert!(matches!(
            events.as_slice(),
            [SessionEvent::Stopped { .. }, SessionEvent::Started { .. }]
        ));
        assert_eq!(span(&c, t0), (secs(60), secs(120)));
        assert_eq!(c.recorder().started.len(), 2);
    }

    #[test]
    fn test_late_tick_extends_with_trigger_from_before_end() {
        let t0 = Instant::now();
        let (mut c, _dir) = controller();
        c.settings.restart_settle = Duration::from_millis(500);
        c.enqueue(Trigger::new(t0));
        c.tick(t0);

        c.enqueue(Trigger::new(t0 + Duration::from_millis(59_900)));
        let events = c.tick(t0 + Duration::from_millis(60_050));
        assert!(matches!(
            events.as_slice(),
            [SessionEvent::Extended { clamped: false, .. }]
        ));
        assert_eq!(c.state(), SessionState::Recording);
        assert_eq!(span(&c, t0), (secs(0), secs(120)));
        assert_eq!(c.queued_triggers(), 0);
        assert_eq!(c.recorder().stops, 0);
        assert_eq!(c.recorder().started.len(), 1);
    }

    #[test]
    fn test_late_tick_still_expires_past_extended_end() {
        let t0 = Instant::now();
        let (mut c, _dir) = controller();
        c.enqueue(Trigger::new(t0));
        c.tick(t0);

        // Extended to 120s, but the tick only comes at 130s
        c.enqueue(Trigger::new(t0 + secs(59)));
        let events = c.tick(t0 + secs(130));
        assert!(matches!(
            events.as_slice(),
            [
                SessionEvent::Extended { .. },
                SessionEvent::Stopped { manual: false, .. }
            ]
        ));
        assert_eq!(c.state(), SessionState::Idle);
    }

    #[test]
    fn test_restart_waits_for_settle_delay() {
        let t0 = Instant::now();
        let (mut c, _dir) = controller();
        c.settings.restart_settle = Duration::from_millis(500);
        c.enqueue(Trigger::new(t0));
        c.tick(t0);

        c.enqueue(Trigger::new(t0 + secs(60)));
        let events = c.tick(t0 + secs(60));
        assert!(matches!(events.as_slice(), [SessionEvent::Stopped { .. }]));
        assert_eq!(c.queued_triggers(), 1);

        assert!(c.tick(t0 + secs(60) + Duration::from_millis(499)).is_empty());
        let events = c.tick(t0 + secs(60) + Duration::from_millis(500));
        assert!(matches!(events.as_slice(), [SessionEvent::Started { .. }]));
    }

    #[test]
    fn test_failed_start_consumes_trigger_and_stays_idle() {
        let t0 = Instant::now();
        let (mut c, _dir) = controller_with(FakeRecorder {
            fail_start: true,
            ..Default::default()
        });
        c.enqueue(Trigger::new(t0));
        let events = c.tick(t0);
        assert_eq!(events, vec![SessionEvent::StartFailed]);
        assert_eq!(c.state(), SessionState::Idle);
        assert_eq!(c.queued_triggers(), 0);
        assert!(c.tick(t0 + secs(1)).is_empty());
    }

    #[test]
    fn test_failed_stop_still_returns_to_idle() {
        let t0 = Instant::now();
        let (mut c, _dir) = controller_with(FakeRecorder {
            fail_stop: true,
            ..Default::default()
        });
        c.enqueue(Trigger::new(t0));
        c.tick(t0);
        c.tick(t0 + secs(61));
        assert_eq!(c.state(), SessionState::Idle);

        // And a later trigger may start again
        c.enqueue(Trigger::new(t0 + secs(70)));
        c.tick(t0 + secs(70));
        assert_eq!(c.state(), SessionState::Recording);
    }

    #[test]
    fn test_manual_stop_forces_idle_and_clears_queue() {
        let t0 = Instant::now();
        let (mut c, _dir) = controller();
        c.enqueue(Trigger::new(t0));
        c.tick(t0);
        c.enqueue(Trigger::new(t0 + secs(1)));
        c.enqueue(Trigger::new(t0 + secs(2)));

        let event = c.manual_stop();
        assert!(matches!(event, Some(SessionEvent::Stopped { manual: true, .. })));
        assert_eq!(c.state(), SessionState::Idle);
        assert_eq!(c.queued_triggers(), 0);
        assert!(c.tick(t0 + secs(3)).is_empty());

        assert_eq!(c.manual_stop(), None);
    }

    #[test]
    fn test_queue_cap_drops_newest() {
        let t0 = Instant::now();
        let (mut c, _dir) = controller();
        for i in 0..10 {
            c.enqueue(Trigger::new(t0 + secs(i)));
        }
        assert_eq!(c.queued_triggers(), 8);
        assert_eq!(c.dropped_triggers(), 2);
        assert_eq!(c.queue.back().unwrap().timestamp, t0 + secs(7));
    }

    #[test]
    fn test_status_snapshot() {
        let t0 = Instant::now();
        let (mut c, _dir) = controller();
        assert_eq!(c.status(t0), SessionStatus::default());

        c.enqueue(Trigger::new(t0));
        c.tick(t0);
        c.enqueue(Trigger::new(t0));
        let status = c.status(t0 + Duration::from_millis(500));
        assert_eq!(status.state, SessionState::Recording);
        assert_eq!(status.remaining_secs, 60);
        assert_eq!(status.queued_triggers, 1);
        assert!(status.session_file.is_some());
    }

    #[test]
    fn test_base_longer_than_max_is_capped() {
        let t0 = Instant::now();
        let dir = tempdir().unwrap();
        let mut c = RecordingSessionController::new(
            SessionSettings {
                base_duration: secs(600),
                max_duration: secs(300),
                output_dir: dir.path().to_path_buf(),
                ..Default::default()
            },
            FakeRecorder::default(),
        );
        c.enqueue(Trigger::new(t0));
        c.tick(t0);
        assert!(c.session().unwrap().duration() <= secs(600));
        assert_eq!(c.settings().max_duration, secs(600));
    }
}
