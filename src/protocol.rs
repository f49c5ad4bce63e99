//! Wire format shared by the server and clients
//!
//! Every message is a frame: a little-endian `u32` body length followed by
//! that many bytes of UTF-8 JSON. One request frame is answered by exactly
//! one response frame.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind as IoErrorKind, Read, Write};

use crate::error::{DaqError, ErrorKind, Phase};
use crate::types::{DeviceInfo, InputRange, SampleBuffers, SampleRequest};

/// Upper bound for response frames read by clients
pub const MAX_RESPONSE_SIZE: usize = 100 * 1024 * 1024; // 100MB

/// Read one frame body. Returns `Ok(None)` when the peer closed the
/// connection cleanly before sending a length prefix.
pub fn read_frame(reader: &mut dyn Read, max_size: usize) -> Result<Option<Vec<u8>>, DaqError> {
    let size = match reader.read_u32::<LittleEndian>() {
        Ok(size) => size as usize,
        Err(e) if e.kind() == IoErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(DaqError::io(e, "reading frame length")),
    };

    if size > max_size {
        debug!("Frame size {} exceeds maximum {}", size, max_size);
        return Err(DaqError::Protocol(format!(
            "frame size {} exceeds maximum {}",
            size, max_size
        )));
    }

    let mut body = vec![0u8; size];
    reader
        .read_exact(&mut body)
        .map_err(|e| DaqError::io(e, format!("reading {size} byte frame body")))?;
    debug!(
        "Read frame of {} bytes: {:02x?}",
        size,
        if size <= 32 { &body[..] } else { &body[..32] }
    );
    Ok(Some(body))
}

pub fn write_frame(writer: &mut dyn Write, body: &[u8]) -> Result<(), DaqError> {
    let size = u32::try_from(body.len())
        .map_err(|_| DaqError::Protocol(format!("frame of {} bytes is too large", body.len())))?;
    writer
        .write_u32::<LittleEndian>(size)
        .map_err(|e| DaqError::io(e, "writing frame length"))?;
    writer
        .write_all(body)
        .map_err(|e| DaqError::io(e, "writing frame body"))?;
    writer.flush().map_err(|e| DaqError::io(e, "flushing frame"))?;
    Ok(())
}

/// Inbound command as it appears on the wire
///
/// Numeric fields are decoded as signed integers so that negative values
/// are reported as out of range instead of as decode failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Request {
    Sample {
        channels: Vec<i64>,
        rate: f64,
        count: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ranges: Option<Vec<InputRange>>,
    },
    Describe,
}

impl Request {
    pub fn sample(channels: &[u16], rate: f64, count: usize) -> Self {
        Request::Sample {
            channels: channels.iter().map(|&c| c as i64).collect(),
            rate,
            count: count as i64,
            ranges: None,
        }
    }

    pub fn with_ranges(self, ranges: Vec<InputRange>) -> Self {
        match self {
            Request::Sample {
                channels,
                rate,
                count,
                ..
            } => Request::Sample {
                channels,
                rate,
                count,
                ranges: Some(ranges),
            },
            other => other,
        }
    }

    pub fn decode(raw: &[u8]) -> Result<Self, DaqError> {
        serde_json::from_slice(raw)
            .map_err(|e| DaqError::InvalidParameter(format!("malformed request: {e}")))
    }

    pub fn encode(&self) -> Result<Vec<u8>, DaqError> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    pub message: String,
}

/// Outbound reply. Either `status == Ok` with a payload, or
/// `status == Error` with `error` set and no buffers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acquired_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffers: Option<SampleBuffers>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceInfo>,
}

impl Response {
    fn ok() -> Self {
        Self {
            status: Status::Ok,
            error: None,
            rate: None,
            count: None,
            acquired_at: None,
            buffers: None,
            device: None,
        }
    }

    pub fn samples(req: &SampleRequest, buffers: SampleBuffers) -> Self {
        Self {
            rate: Some(req.rate()),
            count: Some(req.count()),
            acquired_at: Some(Utc::now()),
            buffers: Some(buffers),
            ..Self::ok()
        }
    }

    pub fn device(info: DeviceInfo) -> Self {
        Self {
            device: Some(info),
            ..Self::ok()
        }
    }

    pub fn error(err: &DaqError) -> Self {
        Self {
            status: Status::Error,
            error: Some(ErrorBody {
                kind: err.kind(),
                phase: err.phase(),
                message: err.detail(),
            }),
            ..Self::ok()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    pub fn decode(raw: &[u8]) -> Result<Self, DaqError> {
        Ok(serde_json::from_slice(raw)?)
    }

    pub fn encode(&self) -> Result<Vec<u8>, DaqError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Turn an error reply into a [`DaqError::Remote`]
    pub fn into_result(self) -> Result<Self, DaqError> {
        if self.is_ok() {
            return Ok(self);
        }
        match self.error {
            Some(body) => Err(DaqError::Remote {
                kind: body.kind,
                phase: body.phase,
                message: body.message,
            }),
            None => Err(DaqError::Protocol(
                "error response without error details".into(),
            )),
        }
    }
}
