use std::{
    io,
    path::Path,
    process::{Child, Command, ExitStatus, Stdio},
    thread,
    time::{Duration, Instant},
};

use anyhow::{bail, Context, Result};
use log::{debug, warn};

/// Placeholder in configured command arguments, replaced by the output path
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

/// How long a capture program gets to finish its file after being asked to stop
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(2);

/// Video capture. Both calls may be slow; `start` must not be called while
/// already started.
pub trait Recorder {
    fn start(&mut self, destination: &Path) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
}

/// One-shot still image capture
pub trait StillCamera {
    fn capture(&mut self, destination: &Path) -> Result<()>;
}

impl<T: Recorder + ?Sized> Recorder for Box<T> {
    fn start(&mut self, destination: &Path) -> Result<()> {
        (**self).start(destination)
    }

    fn stop(&mut self) -> Result<()> {
        (**self).stop()
    }
}

impl<T: StillCamera + ?Sized> StillCamera for Box<T> {
    fn capture(&mut self, destination: &Path) -> Result<()> {
        (**self).capture(destination)
    }
}

pub fn expand_args(args: &[String], destination: &Path) -> Vec<String> {
    let output = destination.to_string_lossy();
    args.iter()
        .map(|a| a.replace(OUTPUT_PLACEHOLDER, &output))
        .collect()
}

/// Records by running an external capture program (e.g. `rpicam-vid`) for
/// the length of the session. Stopping sends SIGTERM so the program can
/// flush its output, and only kills it once the grace period runs out.
pub struct CommandRecorder {
    program: String,
    args: Vec<String>,
    stop_grace: Duration,
    child: Option<Child>,
}

impl CommandRecorder {
    pub fn new(program: &str, args: &[String]) -> Self {
        CommandRecorder {
            program: String::from(program),
            args: Vec::from(args),
            stop_grace: DEFAULT_STOP_GRACE,
            child: None,
        }
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }
}

impl Recorder for CommandRecorder {
    fn start(&mut self, destination: &Path) -> Result<()> {
        if self.child.is_some() {
            bail!("recorder already started");
        }
        let args = expand_args(&self.args, destination);
        debug!("Spawning {} {:?}", self.program, args);
        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.program))?;
        self.child = Some(child);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            bail!("recorder not started");
        };
        // The capture program may already have exited on its own
        match child.try_wait() {
            Ok(Some(status)) => {
                if !status.success() {
                    warn!("{} had already exited with {}", self.program, status);
                }
                return Ok(());
            }
            Ok(None) => {}
            Err(e) => {
                let _ = terminate(&mut child, self.stop_grace);
                return Err(e)
                    .with_context(|| format!("failed to query {} status", self.program));
            }
        }
        let status = terminate(&mut child, self.stop_grace)
            .with_context(|| format!("failed to terminate {}", self.program))?;
        debug!("{} terminated ({})", self.program, status);
        Ok(())
    }
}

impl Drop for CommandRecorder {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = terminate(&mut child, self.stop_grace);
        }
    }
}

/// Ask `child` to exit with SIGTERM, wait up to `grace`, then kill it.
/// Always reaps the process.
fn terminate(child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
    #[cfg(unix)]
    {
        if let Ok(None) = child.try_wait() {
            // SAFETY: the pid is our own unreaped child, so it cannot have been reused
            unsafe {
                libc::kill(child.id() as libc::pid_t, libc::SIGTERM);
            }
            let deadline = Instant::now() + grace;
            while Instant::now() < deadline {
                if let Ok(Some(status)) = child.try_wait() {
                    return Ok(status);
                }
                thread::sleep(Duration::from_millis(20));
            }
            warn!("Process {} still running after SIGTERM; killing it", child.id());
        }
    }
    #[cfg(not(unix))]
    let _ = grace;

    let _ = child.kill();
    child.wait()
}

/// Takes stills by running an external program (e.g. `rpicam-still`) to
/// completion.
pub struct CommandStillCamera {
    program: String,
    args: Vec<String>,
}

impl CommandStillCamera {
    pub fn new(program: &str, args: &[String]) -> Self {
        CommandStillCamera {
            program: String::from(program),
            args: Vec::from(args),
        }
    }
}

impl StillCamera for CommandStillCamera {
    fn capture(&mut self, destination: &Path) -> Result<()> {
        let args = expand_args(&self.args, destination);
        let status = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .with_context(|| format!("failed to run {}", self.program))?;
        if !status.success() {
            bail!("{} exited with {}", self.program, status);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{fs, path::PathBuf};
    use tempfile::tempdir;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_expand_args() {
        let args = strings(&["-t", "0", "-o", "{output}", "--name={output}"]);
        let expanded = expand_args(&args, &PathBuf::from("videos/a.h264"));
        assert_eq!(
            expanded,
            strings(&["-t", "0", "-o", "videos/a.h264", "--name=videos/a.h264"])
        );
    }

    #[test]
    fn test_command_recorder_lifecycle() {
        let mut recorder = CommandRecorder::new("sleep", &strings(&["30"]));
        let dest = PathBuf::from("unused.h264");

        assert!(recorder.stop().is_err());
        recorder.start(&dest).unwrap();
        assert!(recorder.is_running());
        assert!(recorder.start(&dest).is_err());
        recorder.stop().unwrap();
        assert!(!recorder.is_running());
    }

    fn wait_for_contents(path: &Path, expected: &str) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if fs::read_to_string(path).is_ok_and(|c| c == expected) {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[cfg(unix)]
    #[test]
    fn test_stop_lets_program_finish_its_output() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("session.h264");
        let script = r#"trap 'echo closed > "$0"; exit 0' TERM; echo open > "$0"; while :; do sleep 0.05; done"#;
        let mut recorder = CommandRecorder::new("sh", &strings(&["-c", script, "{output}"]));

        recorder.start(&dest).unwrap();
        assert!(wait_for_contents(&dest, "open\n"));
        recorder.stop().unwrap();
        assert_eq!(fs::read_to_string(&dest).unwrap(), "closed\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_stop_kills_program_ignoring_sigterm() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("session.h264");
        let script = r#"trap '' TERM; echo open > "$0"; while :; do sleep 0.05; done"#;
        let mut recorder = CommandRecorder::new("sh", &strings(&["-c", script, "{output}"]))
            .with_stop_grace(Duration::from_millis(200));

        recorder.start(&dest).unwrap();
        assert!(wait_for_contents(&dest, "open\n"));
        let started = Instant::now();
        recorder.stop().unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_secs(2));
        assert!(!recorder.is_running());
    }

    #[test]
    fn test_command_recorder_missing_program() {
        let mut recorder = CommandRecorder::new("pisense-no-such-program", &[]);
        assert!(recorder.start(&PathBuf::from("x.h264")).is_err());
        assert!(!recorder.is_running());
    }

    #[test]
    fn test_still_camera_reports_exit_status() {
        let dest = PathBuf::from("unused.jpg");
        assert!(CommandStillCamera::new("true", &[]).capture(&dest).is_ok());
        assert!(CommandStillCamera::new("false", &[]).capture(&dest).is_err());
    }
}
