pub mod analysis;
pub mod devices;
pub mod geometry_utils;
pub mod monitor;
pub mod monitor_config;
pub mod systems;
pub mod tether_interface;
pub mod tracking;

pub type Point2D = (f32, f32);
