pub mod client;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod handler;
pub mod plotting;
pub mod protocol;
pub mod server;
pub mod types;

pub use client::{ConnectionConfig, DaqClient, DaqClientBuilder};
pub use crate::config::{load_config, load_config_or_default, AppConfig};
pub use device::{DeviceAdapter, DeviceGuard, DeviceHandle, SimulatedDevice, SimulatedDeviceBuilder};
pub use engine::SamplingEngine;
pub use error::{DaqError, ErrorKind, Phase};
pub use handler::CommandHandler;
pub use plotting::{plot_buffers, plot_channel};
pub use protocol::{Request, Response, Status};
pub use server::{ConnectionServer, ServerConfig, ServerHandle};
pub use types::{
    ChannelBuffer, ChannelId, DeviceInfo, DeviceLimits, InputRange, RawScan, SampleBuffers,
    SampleRequest, ScanConfig,
};
