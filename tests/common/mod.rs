//! Test double for the acquisition device and server helpers

use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use daq_bridge::{
    CommandHandler, ConnectionServer, DaqClient, DaqError, DeviceAdapter, DeviceHandle,
    DeviceInfo, InputRange, RawScan, SamplingEngine, ScanConfig, ServerConfig, ServerHandle,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Configure(Vec<u16>),
    AcquireStart(Vec<u16>),
    AcquireEnd(Vec<u16>),
    Close,
}

pub type CallLog = Arc<Mutex<Vec<Call>>>;

/// Stub device: channel `c` of an acquisition of `count` scans reads
/// `c * count + 1 ..= c * count + count`, so channel 0 gives 1, 2, 3, 4 and
/// channel 1 gives 5, 6, 7, 8 for four scans.
pub struct StubDevice {
    calls: CallLog,
    config: Option<ScanConfig>,
    acquire_delay: Duration,
    acquire_bound: Duration,
}

impl StubDevice {
    pub fn new(calls: CallLog) -> Self {
        Self {
            calls,
            config: None,
            acquire_delay: Duration::ZERO,
            acquire_bound: Duration::from_secs(5),
        }
    }

    /// Make every acquisition block for `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.acquire_delay = delay;
        self
    }

    /// Captures longer than `bound` (count / rate) fail with `Timeout`
    pub fn with_bound(mut self, bound: Duration) -> Self {
        self.acquire_bound = bound;
        self
    }

    fn channels(&self) -> Vec<u16> {
        self.config
            .as_ref()
            .map(|c| c.channels.iter().map(|ch| ch.get()).collect())
            .unwrap_or_default()
    }
}

impl DeviceAdapter for StubDevice {
    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            name: "stub".into(),
            serial: "STUB-1".into(),
            channel_count: 4,
            max_rate: 10_000.0,
            max_samples: 10_000,
            ranges: vec![InputRange::Bip10Volts, InputRange::Bip5Volts],
        }
    }

    fn configure(&mut self, config: &ScanConfig) -> Result<(), DaqError> {
        self.config = Some(config.clone());
        self.calls.lock().push(Call::Configure(self.channels()));
        Ok(())
    }

    fn acquire(&mut self, count: usize) -> Result<RawScan, DaqError> {
        let channels = self.channels();
        let rate = self.config.as_ref().map(|c| c.rate).unwrap_or(1.0);
        self.calls.lock().push(Call::AcquireStart(channels.clone()));

        let seconds = count as f64 / rate;
        if seconds > self.acquire_bound.as_secs_f64() {
            self.calls.lock().push(Call::AcquireEnd(channels));
            return Err(DaqError::Timeout(format!("capture would take {seconds:.3e} s")));
        }
        thread::sleep(self.acquire_delay);

        let mut data = Vec::with_capacity(count * channels.len());
        for i in 0..count {
            for &c in &channels {
                data.push((c as usize * count + i + 1) as f64);
            }
        }
        self.calls.lock().push(Call::AcquireEnd(channels));
        Ok(RawScan::new(data))
    }

    fn close(&mut self) -> Result<(), DaqError> {
        self.calls.lock().push(Call::Close);
        Ok(())
    }
}

pub struct TestServer {
    pub handle: ServerHandle,
    pub device: Arc<DeviceHandle>,
    pub calls: CallLog,
}

impl TestServer {
    pub fn client(&self) -> DaqClient {
        let addr = self.handle.addr();
        DaqClient::builder()
            .address(&addr.ip().to_string())
            .port(addr.port())
            .read_timeout(Duration::from_secs(10))
            .build()
            .unwrap()
    }
}

pub fn start(stub: impl FnOnce(CallLog) -> StubDevice, lock_timeout: Duration, config: ServerConfig) -> TestServer {
    let calls: CallLog = Arc::new(Mutex::new(Vec::new()));
    let device = Arc::new(DeviceHandle::open(stub(calls.clone())));
    let engine = SamplingEngine::new(device.clone(), 5_000, lock_timeout);
    let server = ConnectionServer::bind("127.0.0.1:0", CommandHandler::new(engine), config).unwrap();
    TestServer {
        handle: server.spawn().unwrap(),
        device,
        calls,
    }
}

pub fn start_default() -> TestServer {
    start(StubDevice::new, Duration::from_secs(5), ServerConfig::default())
}
