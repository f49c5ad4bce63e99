use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;

use crate::device::DeviceHandle;
use crate::error::{DaqError, Phase};
use crate::types::{ChannelBuffer, DeviceLimits, RawScan, SampleBuffers, SampleRequest};

/// Turns a [`SampleRequest`] into device calls and per-channel buffers.
///
/// The device lock is held only around `configure`/`acquire`; validation
/// happens before it is requested and partitioning after it is released.
pub struct SamplingEngine {
    device: Arc<DeviceHandle>,
    limits: DeviceLimits,
    lock_timeout: Duration,
}

impl SamplingEngine {
    /// `count_cap` bounds samples per channel below the device maximum
    pub fn new(device: Arc<DeviceHandle>, count_cap: usize, lock_timeout: Duration) -> Self {
        let limits = DeviceLimits::new(device.info(), count_cap);
        Self {
            device,
            limits,
            lock_timeout,
        }
    }

    pub fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    pub fn device(&self) -> &DeviceHandle {
        &self.device
    }

    pub fn sample(&self, req: &SampleRequest) -> Result<SampleBuffers, DaqError> {
        req.validate(&self.limits)?;

        let raw = {
            let mut guard = self.device.lock(self.lock_timeout)?;
            if guard.configured() != Some(req.scan_config()) {
                info!(
                    "Reconfiguring device: channels {:?} at {} S/s",
                    req.channels(),
                    req.rate()
                );
                guard
                    .configure(req.scan_config())
                    .map_err(|e| e.in_phase(Phase::Configure))?;
            }
            guard
                .acquire(req.count())
                .map_err(|e| e.in_phase(Phase::Acquire))?
        };

        let buffers = partition(raw, req)?;
        debug!(
            "Sampled {} channels x {} samples",
            buffers.len(),
            req.count()
        );
        Ok(buffers)
    }
}

/// Split a channel-interleaved stream into one buffer per requested channel
fn partition(raw: RawScan, req: &SampleRequest) -> Result<SampleBuffers, DaqError> {
    let channels = req.channels();
    let expected = req.count() * channels.len();
    if raw.data.len() != expected {
        return Err(DaqError::Internal(format!(
            "device returned {} readings, expected {} ({} channels x {} samples)",
            raw.data.len(),
            expected,
            channels.len(),
            req.count()
        ))
        .in_phase(Phase::Acquire));
    }

    let mut buffers: Vec<ChannelBuffer> = channels
        .iter()
        .map(|&channel| ChannelBuffer {
            channel,
            samples: Vec::with_capacity(req.count()),
        })
        .collect();
    for scan in raw.data.chunks_exact(channels.len()) {
        for (buffer, &value) in buffers.iter_mut().zip(scan) {
            buffer.samples.push(value);
        }
    }
    Ok(SampleBuffers::new(buffers))
}
