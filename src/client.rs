use log::{debug, warn};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::error::DaqError;
use crate::protocol::{read_frame, write_frame, Request, Response, MAX_RESPONSE_SIZE};
use crate::types::{DeviceInfo, SampleBuffers};

/// Connection configuration for [`DaqClient`].
///
/// The read timeout must cover the server-side lock wait plus the
/// acquisition itself, so it defaults well above both.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use daq_bridge::ConnectionConfig;
///
/// let config = ConnectionConfig {
///     read_timeout: Duration::from_secs(60),
///     ..ConnectionConfig::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Timeout for establishing the TCP connection
    pub connect_timeout: Duration,
    /// Timeout for waiting on a response
    pub read_timeout: Duration,
    /// Timeout for sending a request
    pub write_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(5),
        }
    }
}

/// Builder for [`DaqClient`]
///
/// ```no_run
/// use std::time::Duration;
/// use daq_bridge::DaqClient;
///
/// let mut client = DaqClient::builder()
///     .address("127.0.0.1")
///     .port(65432)
///     .read_timeout(Duration::from_secs(10))
///     .build()?;
/// let buffers = client.sample(&[0, 1], 1000.0, 500)?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Default)]
pub struct DaqClientBuilder {
    address: Option<String>,
    port: Option<u16>,
    config: ConnectionConfig,
}

impl DaqClientBuilder {
    pub fn address(mut self, addr: &str) -> Self {
        self.address = Some(addr.to_string());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.config.write_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<DaqClient, DaqError> {
        let address = self
            .address
            .ok_or_else(|| DaqError::InvalidParameter("address must be specified".to_string()))?;
        let port = self
            .port
            .ok_or_else(|| DaqError::InvalidParameter("port must be specified".to_string()))?;

        let socket_addr: SocketAddr = (address.as_str(), port)
            .to_socket_addrs()
            .map_err(|e| DaqError::io(e, format!("resolving {address}")))?
            .next()
            .ok_or_else(|| DaqError::InvalidParameter(format!("no address for {address}")))?;

        debug!("Connecting to DAQ server at {socket_addr}");
        let stream = TcpStream::connect_timeout(&socket_addr, self.config.connect_timeout)
            .map_err(|e| {
                warn!("Failed to connect to {socket_addr}: {e}");
                if e.kind() == std::io::ErrorKind::TimedOut {
                    DaqError::Timeout(format!("connecting to {socket_addr}"))
                } else {
                    DaqError::io(e, format!("connecting to {socket_addr}"))
                }
            })?;
        stream.set_read_timeout(Some(self.config.read_timeout))?;
        stream.set_write_timeout(Some(self.config.write_timeout))?;
        stream.set_nodelay(true)?;

        Ok(DaqClient {
            stream,
            config: self.config,
        })
    }
}

/// Client for the device server
///
/// Holds a connection but no session: every call sends a complete request,
/// so a client can be dropped and recreated at any time.
pub struct DaqClient {
    stream: TcpStream,
    config: ConnectionConfig,
}

impl DaqClient {
    pub fn new(addr: &str, port: u16) -> Result<Self, DaqError> {
        Self::builder().address(addr).port(port).build()
    }

    pub fn builder() -> DaqClientBuilder {
        DaqClientBuilder::default()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Send one request and wait for its response, error replies included
    pub fn request(&mut self, request: &Request) -> Result<Response, DaqError> {
        write_frame(&mut self.stream, &request.encode()?)?;
        let body = read_frame(&mut self.stream, MAX_RESPONSE_SIZE)?.ok_or_else(|| {
            DaqError::io(
                std::io::ErrorKind::UnexpectedEof.into(),
                "server closed the connection",
            )
        })?;
        Response::decode(&body)
    }

    /// Acquire `count` samples per channel at `rate` S/s
    pub fn sample(
        &mut self,
        channels: &[u16],
        rate: f64,
        count: usize,
    ) -> Result<SampleBuffers, DaqError> {
        let response = self
            .request(&Request::sample(channels, rate, count))?
            .into_result()?;
        response
            .buffers
            .ok_or_else(|| DaqError::Protocol("sample response without buffers".into()))
    }

    pub fn describe(&mut self) -> Result<DeviceInfo, DaqError> {
        let response = self.request(&Request::Describe)?.into_result()?;
        response
            .device
            .ok_or_else(|| DaqError::Protocol("describe response without device".into()))
    }
}
