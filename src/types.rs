use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::error::DaqError;

/// Analog input line on the acquisition device (0-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(u16);

impl ChannelId {
    pub fn new(index: u16) -> Self {
        Self(index)
    }

    pub fn get(&self) -> u16 {
        self.0
    }
}

impl From<u16> for ChannelId {
    fn from(index: u16) -> Self {
        ChannelId(index)
    }
}

impl From<ChannelId> for usize {
    fn from(id: ChannelId) -> usize {
        id.0 as usize
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bipolar input voltage range of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InputRange {
    #[default]
    Bip10Volts,
    Bip5Volts,
    Bip2Volts,
    Bip1Volts,
}

impl InputRange {
    /// Full-scale magnitude in volts; readings lie in `[-volts, volts]`.
    pub fn volts(self) -> f64 {
        match self {
            InputRange::Bip10Volts => 10.0,
            InputRange::Bip5Volts => 5.0,
            InputRange::Bip2Volts => 2.0,
            InputRange::Bip1Volts => 1.0,
        }
    }
}

/// Static description of the acquisition unit, reported by `describe`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    pub serial: String,
    pub channel_count: u16,
    /// Maximum samples per second per channel
    pub max_rate: f64,
    /// Maximum samples per channel in a single acquisition
    pub max_samples: usize,
    pub ranges: Vec<InputRange>,
}

/// Bounds every `SampleRequest` is validated against.
///
/// `max_count` is the smaller of the device maximum and the server's
/// configured cap, which bounds per-request memory and capture time.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceLimits {
    pub channel_count: u16,
    pub max_rate: f64,
    pub max_count: usize,
    pub ranges: Vec<InputRange>,
}

impl DeviceLimits {
    pub fn new(info: &DeviceInfo, count_cap: usize) -> Self {
        Self {
            channel_count: info.channel_count,
            max_rate: info.max_rate,
            max_count: info.max_samples.min(count_cap),
            ranges: info.ranges.clone(),
        }
    }
}

/// Channel set, rate and ranges programmed into the device by `configure`
#[derive(Debug, Clone, PartialEq)]
pub struct ScanConfig {
    pub channels: Vec<ChannelId>,
    pub rate: f64,
    pub ranges: Vec<InputRange>,
}

/// A validated acquisition request. Fields are private so a value that
/// exists has passed validation against some set of limits.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRequest {
    scan: ScanConfig,
    count: usize,
}

impl SampleRequest {
    /// Build a request, checking it against `limits`.
    ///
    /// `ranges` defaults to the first range the device supports for every
    /// channel when omitted.
    pub fn new(
        channels: Vec<ChannelId>,
        rate: f64,
        count: usize,
        ranges: Option<Vec<InputRange>>,
        limits: &DeviceLimits,
    ) -> Result<Self, DaqError> {
        let default_range = limits.ranges.first().copied().unwrap_or_default();
        let ranges = ranges.unwrap_or_else(|| vec![default_range; channels.len()]);
        let request = Self {
            scan: ScanConfig {
                channels,
                rate,
                ranges,
            },
            count,
        };
        request.validate(limits)?;
        Ok(request)
    }

    pub fn validate(&self, limits: &DeviceLimits) -> Result<(), DaqError> {
        let scan = &self.scan;
        if scan.channels.is_empty() {
            return Err(DaqError::InvalidParameter(
                "at least one channel is required".into(),
            ));
        }

        let mut seen = HashSet::with_capacity(scan.channels.len());
        for channel in &scan.channels {
            if channel.get() >= limits.channel_count {
                return Err(DaqError::InvalidParameter(format!(
                    "channel {} out of range (device has {} channels)",
                    channel, limits.channel_count
                )));
            }
            if !seen.insert(*channel) {
                return Err(DaqError::InvalidParameter(format!(
                    "channel {} requested more than once",
                    channel
                )));
            }
        }

        if !scan.rate.is_finite() || scan.rate <= 0.0 {
            return Err(DaqError::InvalidParameter(format!(
                "rate must be a positive number, got {}",
                scan.rate
            )));
        }
        if scan.rate > limits.max_rate {
            return Err(DaqError::InvalidParameter(format!(
                "rate {} exceeds device maximum {}",
                scan.rate, limits.max_rate
            )));
        }

        if self.count == 0 {
            return Err(DaqError::InvalidParameter("count must be positive".into()));
        }
        if self.count > limits.max_count {
            return Err(DaqError::InvalidParameter(format!(
                "count {} exceeds maximum {}",
                self.count, limits.max_count
            )));
        }

        if scan.ranges.len() != scan.channels.len() {
            return Err(DaqError::InvalidParameter(format!(
                "{} ranges given for {} channels",
                scan.ranges.len(),
                scan.channels.len()
            )));
        }
        if let Some(range) = scan.ranges.iter().find(|r| !limits.ranges.contains(r)) {
            return Err(DaqError::InvalidParameter(format!(
                "input range {:?} not supported by device",
                range
            )));
        }

        Ok(())
    }

    pub fn channels(&self) -> &[ChannelId] {
        &self.scan.channels
    }

    pub fn rate(&self) -> f64 {
        self.scan.rate
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn ranges(&self) -> &[InputRange] {
        &self.scan.ranges
    }

    pub fn scan_config(&self) -> &ScanConfig {
        &self.scan
    }
}

/// Channel-interleaved readings as delivered by the hardware:
/// `[s0_ch_a, s0_ch_b, .., s1_ch_a, s1_ch_b, ..]`
#[derive(Debug, Clone, PartialEq)]
pub struct RawScan {
    pub data: Vec<f64>,
}

impl RawScan {
    pub fn new(data: Vec<f64>) -> Self {
        Self { data }
    }
}

/// Time-ordered readings of one channel from one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelBuffer {
    pub channel: ChannelId,
    pub samples: Vec<f64>,
}

/// One buffer per requested channel, in request order
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SampleBuffers(Vec<ChannelBuffer>);

impl SampleBuffers {
    pub fn new(buffers: Vec<ChannelBuffer>) -> Self {
        Self(buffers)
    }

    pub fn get(&self, channel: ChannelId) -> Option<&[f64]> {
        self.0
            .iter()
            .find(|b| b.channel == channel)
            .map(|b| b.samples.as_slice())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ChannelBuffer> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<ChannelBuffer> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> DeviceLimits {
        DeviceLimits {
            channel_count: 4,
            max_rate: 10_000.0,
            max_count: 1_000,
            ranges: vec![InputRange::Bip10Volts, InputRange::Bip5Volts],
        }
    }

    fn ch(ids: &[u16]) -> Vec<ChannelId> {
        ids.iter().copied().map(ChannelId::from).collect()
    }

    #[test]
    fn test_valid_request_defaults_ranges() {
        let req = SampleRequest::new(ch(&[2, 0]), 1000.0, 10, None, &limits()).unwrap();
        assert_eq!(req.channels(), ch(&[2, 0]).as_slice());
        assert_eq!(req.ranges(), &[InputRange::Bip10Volts, InputRange::Bip10Volts]);
        assert_eq!(req.count(), 10);
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        let l = limits();
        let cases = [
            SampleRequest::new(vec![], 1000.0, 10, None, &l),
            SampleRequest::new(ch(&[4]), 1000.0, 10, None, &l),
            SampleRequest::new(ch(&[1, 1]), 1000.0, 10, None, &l),
            SampleRequest::new(ch(&[0]), 0.0, 10, None, &l),
            SampleRequest::new(ch(&[0]), f64::NAN, 10, None, &l),
            SampleRequest::new(ch(&[0]), 20_000.0, 10, None, &l),
            SampleRequest::new(ch(&[0]), 1000.0, 0, None, &l),
            SampleRequest::new(ch(&[0]), 1000.0, 1_001, None, &l),
            SampleRequest::new(ch(&[0, 1]), 1000.0, 10, Some(vec![InputRange::Bip5Volts]), &l),
            SampleRequest::new(ch(&[0]), 1000.0, 10, Some(vec![InputRange::Bip1Volts]), &l),
        ];
        for result in cases {
            assert!(
                matches!(result, Err(DaqError::InvalidParameter(_))),
                "expected InvalidParameter, got {result:?}"
            );
        }
    }

    #[test]
    fn test_limits_apply_count_cap() {
        let info = DeviceInfo {
            name: "USB-1608FS".into(),
            serial: "01D8A1".into(),
            channel_count: 8,
            max_rate: 50_000.0,
            max_samples: 100_000,
            ranges: vec![InputRange::Bip10Volts],
        };
        assert_eq!(DeviceLimits::new(&info, 5_000).max_count, 5_000);
        assert_eq!(DeviceLimits::new(&info, 500_000).max_count, 100_000);
    }

    #[test]
    fn test_buffers_lookup_by_channel() {
        let buffers = SampleBuffers::new(vec![
            ChannelBuffer { channel: ChannelId::new(3), samples: vec![1.0] },
            ChannelBuffer { channel: ChannelId::new(1), samples: vec![2.0] },
        ]);
        assert_eq!(buffers.get(ChannelId::new(1)), Some(&[2.0][..]));
        assert_eq!(buffers.get(ChannelId::new(0)), None);
        assert_eq!(buffers.len(), 2);
    }
}
