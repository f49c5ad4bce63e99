use log::{debug, error, warn};

use crate::engine::SamplingEngine;
use crate::error::DaqError;
use crate::protocol::{Request, Response};
use crate::types::{ChannelId, InputRange, SampleRequest};

const ENCODE_FAILURE: &[u8] =
    br#"{"status":"error","error":{"kind":"internal","message":"response encoding failed"}}"#;

/// Decodes request frames, dispatches them and encodes the reply.
///
/// Never retries: a failed request is answered with an error response and
/// the client decides whether to ask again.
pub struct CommandHandler {
    engine: SamplingEngine,
}

impl CommandHandler {
    pub fn new(engine: SamplingEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &SamplingEngine {
        &self.engine
    }

    /// Handle one raw request body and return the raw response body
    pub fn handle(&self, raw: &[u8]) -> Vec<u8> {
        let response = match Request::decode(raw) {
            Ok(request) => self.dispatch(request),
            Err(e) => {
                warn!("Rejected request: {}", e);
                Response::error(&e)
            }
        };
        response.encode().unwrap_or_else(|e| {
            error!("Failed to encode response: {}", e);
            ENCODE_FAILURE.to_vec()
        })
    }

    pub fn dispatch(&self, request: Request) -> Response {
        match request {
            Request::Describe => {
                debug!("Describe request");
                Response::device(self.engine.device().info().clone())
            }
            Request::Sample {
                channels,
                rate,
                count,
                ranges,
            } => {
                debug!("Sample request: channels {channels:?}, rate {rate}, count {count}");
                let result = self
                    .build_request(channels, rate, count, ranges)
                    .and_then(|req| self.engine.sample(&req).map(|buffers| (req, buffers)));
                match result {
                    Ok((req, buffers)) => Response::samples(&req, buffers),
                    Err(e) => {
                        warn!(
                            "Sample request failed ({}{}): {}",
                            e.kind(),
                            e.phase().map(|p| format!(" during {p}")).unwrap_or_default(),
                            e.detail()
                        );
                        Response::error(&e)
                    }
                }
            }
        }
    }

    fn build_request(
        &self,
        channels: Vec<i64>,
        rate: f64,
        count: i64,
        ranges: Option<Vec<InputRange>>,
    ) -> Result<SampleRequest, DaqError> {
        let channels = channels
            .into_iter()
            .map(|c| {
                u16::try_from(c)
                    .map(ChannelId::from)
                    .map_err(|_| DaqError::InvalidParameter(format!("channel {c} out of range")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if count <= 0 {
            return Err(DaqError::InvalidParameter(format!(
                "count must be positive, got {count}"
            )));
        }
        let count = usize::try_from(count)
            .map_err(|_| DaqError::InvalidParameter(format!("count {count} out of range")))?;

        SampleRequest::new(channels, rate, count, ranges, self.engine.limits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceHandle, SimulatedDevice};
    use crate::error::{ErrorKind, Phase};
    use crate::protocol::Status;
    use std::sync::Arc;
    use std::time::Duration;

    fn handler() -> CommandHandler {
        let device = SimulatedDevice::builder()
            .channel_count(4)
            .max_rate(10_000.0)
            .realtime(false)
            .acquire_timeout(Duration::from_millis(500))
            .build();
        let engine = SamplingEngine::new(
            Arc::new(DeviceHandle::open(device)),
            2_000,
            Duration::from_secs(1),
        );
        CommandHandler::new(engine)
    }

    fn reply(handler: &CommandHandler, raw: &str) -> Response {
        Response::decode(&handler.handle(raw.as_bytes())).unwrap()
    }

    #[test]
    fn test_sample_reply_has_one_buffer_per_channel() {
        let h = handler();
        let resp = reply(&h, r#"{"command":"sample","channels":[3,1],"rate":1000,"count":16}"#);
        assert_eq!(resp.status, Status::Ok);
        assert_eq!(resp.count, Some(16));
        let buffers = resp.buffers.unwrap();
        let channels: Vec<u16> = buffers.iter().map(|b| b.channel.get()).collect();
        assert_eq!(channels, vec![3, 1]);
        assert!(buffers.iter().all(|b| b.samples.len() == 16));
    }

    #[test]
    fn test_out_of_range_values_are_invalid_parameter() {
        let h = handler();
        for raw in [
            r#"{"command":"sample","channels":[-1],"rate":1000,"count":4}"#,
            r#"{"command":"sample","channels":[4],"rate":1000,"count":4}"#,
            r#"{"command":"sample","channels":[0],"rate":-5,"count":4}"#,
            r#"{"command":"sample","channels":[0],"rate":1000,"count":0}"#,
            r#"{"command":"sample","channels":[0],"rate":1000,"count":-3}"#,
            r#"{"command":"sample","channels":[0],"rate":1000,"count":2001}"#,
            r#"{"command":"sample","channels":[0],"rate":1000}"#,
        ] {
            let resp = reply(&h, raw);
            assert_eq!(resp.status, Status::Error, "{raw}");
            let error = resp.error.unwrap();
            assert_eq!(error.kind, ErrorKind::InvalidParameter, "{raw}");
            assert_eq!(error.phase, None);
            assert!(resp.buffers.is_none());
        }
    }

    #[test]
    fn test_acquisition_timeout_reported_as_timeout() {
        let h = handler();
        // 1000 samples at 100 S/s needs 10 s, the device bound is 500 ms
        let resp = reply(&h, r#"{"command":"sample","channels":[0],"rate":100,"count":1000}"#);
        let error = resp.error.unwrap();
        assert_eq!(error.kind, ErrorKind::Timeout);
        assert_eq!(error.phase, Some(Phase::Acquire));
    }

    #[test]
    fn test_vanishing_rate_gets_error_reply() {
        let h = handler();
        let resp = reply(&h, r#"{"command":"sample","channels":[0],"rate":1e-300,"count":1}"#);
        assert_eq!(resp.status, Status::Error);
        let error = resp.error.unwrap();
        assert_eq!(error.kind, ErrorKind::Timeout);
        assert_eq!(error.phase, Some(Phase::Acquire));
    }

    #[test]
    fn test_describe_reports_device() {
        let h = handler();
        let resp = reply(&h, r#"{"command":"describe"}"#);
        let device = resp.device.unwrap();
        assert_eq!(device.channel_count, 4);
        assert_eq!(device.max_rate, 10_000.0);
    }

    #[test]
    fn test_replayed_request_has_same_shape() {
        let h = handler();
        let raw = r#"{"command":"sample","channels":[0,2],"rate":500,"count":8}"#;
        let first = reply(&h, raw).buffers.unwrap();
        let second = reply(&h, raw).buffers.unwrap();
        let shape = |b: &crate::types::SampleBuffers| {
            b.iter()
                .map(|c| (c.channel, c.samples.len()))
                .collect::<Vec<_>>()
        };
        assert_eq!(shape(&first), shape(&second));
        assert_ne!(first, second);
    }
}
