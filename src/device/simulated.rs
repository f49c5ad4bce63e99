//! Software stand-in for an analog acquisition unit
//!
//! Produces a sine wave per channel (frequency grows with the channel index)
//! plus a little deterministic jitter, scaled to the channel's input range.
//! A running scan counter makes consecutive acquisitions continue the
//! waveform instead of repeating it.

use log::debug;
use std::f64::consts::TAU;
use std::thread;
use std::time::Duration;

use super::DeviceAdapter;
use crate::error::DaqError;
use crate::types::{DeviceInfo, InputRange, RawScan, ScanConfig};

/// Base waveform frequency of channel 0 in Hz
const BASE_FREQUENCY: f64 = 5.0;
const AMPLITUDE: f64 = 0.8;
const JITTER: f64 = 0.02;

pub struct SimulatedDevice {
    info: DeviceInfo,
    realtime: bool,
    acquire_timeout: Duration,
    config: Option<ScanConfig>,
    scans_taken: u64,
    noise_state: u64,
    open: bool,
}

/// Builder for [`SimulatedDevice`]
///
/// ```
/// use std::time::Duration;
/// use daq_bridge::device::SimulatedDevice;
///
/// let device = SimulatedDevice::builder()
///     .channel_count(4)
///     .max_rate(10_000.0)
///     .realtime(false)
///     .acquire_timeout(Duration::from_secs(2))
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct SimulatedDeviceBuilder {
    info: DeviceInfo,
    realtime: bool,
    acquire_timeout: Duration,
}

impl Default for SimulatedDeviceBuilder {
    fn default() -> Self {
        Self {
            info: DeviceInfo {
                name: "Simulated USB-1608FS".to_string(),
                serial: "SIM-0001".to_string(),
                channel_count: 8,
                max_rate: 50_000.0,
                max_samples: 100_000,
                ranges: vec![
                    InputRange::Bip10Volts,
                    InputRange::Bip5Volts,
                    InputRange::Bip2Volts,
                    InputRange::Bip1Volts,
                ],
            },
            realtime: true,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

impl SimulatedDeviceBuilder {
    pub fn name(mut self, name: &str) -> Self {
        self.info.name = name.to_string();
        self
    }

    pub fn serial(mut self, serial: &str) -> Self {
        self.info.serial = serial.to_string();
        self
    }

    pub fn channel_count(mut self, count: u16) -> Self {
        self.info.channel_count = count;
        self
    }

    pub fn max_rate(mut self, rate: f64) -> Self {
        self.info.max_rate = rate;
        self
    }

    pub fn max_samples(mut self, samples: usize) -> Self {
        self.info.max_samples = samples;
        self
    }

    pub fn ranges(mut self, ranges: Vec<InputRange>) -> Self {
        self.info.ranges = ranges;
        self
    }

    /// Sleep for the capture duration (`count / rate`) like real hardware
    pub fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    /// Longest capture the device will attempt before reporting `Timeout`
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn build(self) -> SimulatedDevice {
        let seed = self
            .info
            .serial
            .bytes()
            .fold(0x9E37_79B9_7F4A_7C15_u64, |acc, b| acc.rotate_left(5) ^ b as u64);
        SimulatedDevice {
            info: self.info,
            realtime: self.realtime,
            acquire_timeout: self.acquire_timeout,
            config: None,
            scans_taken: 0,
            noise_state: seed | 1,
            open: true,
        }
    }
}

impl SimulatedDevice {
    pub fn builder() -> SimulatedDeviceBuilder {
        SimulatedDeviceBuilder::default()
    }

    // xorshift64, mapped to [-1, 1)
    fn next_jitter(&mut self) -> f64 {
        let mut x = self.noise_state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.noise_state = x;
        (x >> 11) as f64 / (1u64 << 52) as f64 - 1.0
    }
}

impl DeviceAdapter for SimulatedDevice {
    fn info(&self) -> DeviceInfo {
        self.info.clone()
    }

    fn configure(&mut self, config: &ScanConfig) -> Result<(), DaqError> {
        if !self.open {
            return Err(DaqError::DeviceUnavailable("device is closed".into()));
        }
        if let Some(ch) = config
            .channels
            .iter()
            .find(|c| c.get() >= self.info.channel_count)
        {
            return Err(DaqError::InvalidParameter(format!(
                "channel {ch} not present on {}",
                self.info.name
            )));
        }
        if config.rate <= 0.0 || config.rate > self.info.max_rate {
            return Err(DaqError::InvalidParameter(format!(
                "rate {} not supported by {}",
                config.rate, self.info.name
            )));
        }
        debug!(
            "Simulated device configured: channels {:?} at {} S/s",
            config.channels, config.rate
        );
        self.config = Some(config.clone());
        Ok(())
    }

    fn acquire(&mut self, count: usize) -> Result<RawScan, DaqError> {
        if !self.open {
            return Err(DaqError::DeviceUnavailable("device is closed".into()));
        }
        let config = self
            .config
            .clone()
            .ok_or_else(|| DaqError::DeviceUnavailable("device has not been configured".into()))?;

        // compared as f64: a tiny rate gives a capture time no Duration can hold
        let seconds = count as f64 / config.rate;
        if seconds > self.acquire_timeout.as_secs_f64() {
            if self.realtime {
                thread::sleep(self.acquire_timeout);
            }
            return Err(DaqError::Timeout(format!(
                "capture of {count} scans at {} S/s takes {seconds:.3e} s, limit is {:?}",
                config.rate, self.acquire_timeout
            )));
        }
        if self.realtime {
            thread::sleep(Duration::from_secs_f64(seconds));
        }

        let mut data = Vec::with_capacity(count * config.channels.len());
        for scan in 0..count as u64 {
            let t = (self.scans_taken + scan) as f64 / config.rate;
            for (channel, range) in config.channels.iter().zip(&config.ranges) {
                let k = channel.get() as f64;
                let full_scale = range.volts();
                let wave = AMPLITUDE * (TAU * BASE_FREQUENCY * (k + 1.0) * t + k * 0.5).sin();
                let value = (wave + JITTER * self.next_jitter()) * full_scale;
                data.push(value.clamp(-full_scale, full_scale));
            }
        }
        self.scans_taken += count as u64;

        Ok(RawScan::new(data))
    }

    fn close(&mut self) -> Result<(), DaqError> {
        self.open = false;
        self.config = None;
        Ok(())
    }
}
