use std::{
    fs::{self, File},
    io::{Read, Seek},
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use log::{debug, info};

/// A raw, un-debounced binary level that can be polled
pub trait Sensor {
    fn read(&mut self) -> Result<bool>;
}

/// GPIO input through the Linux sysfs interface (`/sys/class/gpio`).
/// The value file is kept open and re-read from the start on every poll.
pub struct SysfsGpioSensor {
    pin: u32,
    value_file: File,
    active_low: bool,
}

impl SysfsGpioSensor {
    pub fn open(gpio_root: &Path, pin: u32, active_low: bool) -> Result<Self> {
        let pin_dir = gpio_root.join(format!("gpio{pin}"));

        if !pin_dir.exists() {
            info!("Exporting GPIO pin {} via {:?}", pin, gpio_root);
            fs::write(gpio_root.join("export"), pin.to_string())
                .with_context(|| format!("failed to export GPIO pin {pin}"))?;
            // udev needs a moment to create the attribute files
            wait_for(&pin_dir.join("value"))?;
        }

        let direction = pin_dir.join("direction");
        if direction.exists() {
            fs::write(&direction, "in")
                .with_context(|| format!("failed to set GPIO pin {pin} as input"))?;
        }

        let value_path: PathBuf = pin_dir.join("value");
        let value_file = File::open(&value_path)
            .with_context(|| format!("failed to open {:?}", value_path))?;

        debug!("GPIO pin {} ready at {:?}", pin, value_path);

        Ok(SysfsGpioSensor {
            pin,
            value_file,
            active_low,
        })
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }
}

impl Sensor for SysfsGpioSensor {
    fn read(&mut self) -> Result<bool> {
        let mut buf = [0u8; 4];
        self.value_file.rewind()?;
        let n = self.value_file.read(&mut buf)?;
        let level = match buf[..n].first() {
            Some(b'1') => true,
            Some(b'0') => false,
            other => return Err(anyhow!("unexpected GPIO value {:?}", other)),
        };
        Ok(level != self.active_low)
    }
}

fn wait_for(path: &Path) -> Result<()> {
    for _ in 0..50 {
        if path.exists() {
            return Ok(());
        }
        thread::sleep(Duration::from_millis(10));
    }
    Err(anyhow!("{:?} did not appear after export", path))
}
