//! Hardware collaborators: the polled GPIO level and the camera.
//!
//! Both sit behind small traits so the monitoring runtime can be driven by
//! fakes in tests and by real devices on the Pi.
pub mod camera;
pub mod gpio;
