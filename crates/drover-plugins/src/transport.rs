//! Request/response transports used by the bridge.
//!
//! [`Transport`] is the seam between the bridge's dispatch thread and the
//! wire. [`TcpTransport`] speaks the line protocol over a persistent TCP
//! connection; tests substitute instrumented implementations.

use std::io::{self, BufRead, BufReader, Write};
use std::net::TcpStream;

use tracing::trace;

use crate::error::{DriverError, DriverResult};
use crate::protocol::{RpcRequest, RpcResponse, decode_line, encode_line};

const TRANSPORT_TARGET: &str = "drover_plugins::transport";

/// Performs one synchronous request/response exchange at a time.
pub trait Transport: Send {
    /// Sends `request` and waits for its reply.
    ///
    /// # Errors
    ///
    /// Returns a transport-level [`DriverError`] when the exchange fails.
    fn round_trip(&mut self, request: &RpcRequest) -> DriverResult<RpcResponse>;
}

/// Line protocol over TCP.
#[derive(Debug)]
pub struct TcpTransport {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl TcpTransport {
    /// Dials a plugin at `address` (`host:port`).
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Io`] if the connection cannot be opened.
    pub fn connect(address: &str) -> DriverResult<Self> {
        let stream = TcpStream::connect(address)
            .map_err(|err| DriverError::io(format!("connecting to plugin at {address}"), err))?;
        stream
            .set_nodelay(true)
            .map_err(|err| DriverError::io("configuring plugin connection", err))?;
        Self::from_stream(stream)
    }

    /// Wraps an already connected stream.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Io`] if the stream cannot be cloned.
    pub fn from_stream(stream: TcpStream) -> DriverResult<Self> {
        let reader = stream
            .try_clone()
            .map_err(|err| DriverError::io("cloning plugin connection", err))?;
        Ok(Self {
            reader: BufReader::new(reader),
            writer: stream,
        })
    }
}

impl Transport for TcpTransport {
    fn round_trip(&mut self, request: &RpcRequest) -> DriverResult<RpcResponse> {
        let line = encode_line(request)?;
        self.writer
            .write_all(line.as_bytes())
            .and_then(|()| self.writer.flush())
            .map_err(|err| DriverError::io(format!("sending {}", request.method_name()), err))?;

        let mut reply = String::new();
        let read = self
            .reader
            .read_line(&mut reply)
            .map_err(|err| DriverError::io(format!("awaiting {}", request.method_name()), err))?;
        if read == 0 {
            return Err(DriverError::io(
                format!("awaiting {}", request.method_name()),
                io::Error::from(io::ErrorKind::UnexpectedEof),
            ));
        }

        let response: RpcResponse = decode_line(&reply)?;
        trace!(
            target: TRANSPORT_TARGET,
            id = request.id(),
            method = request.method_name(),
            failed = response.error().is_some(),
            "plugin call completed"
        );
        if response.id() != request.id() {
            return Err(DriverError::protocol(format!(
                "reply id {} does not match request id {}",
                response.id(),
                request.id()
            )));
        }
        Ok(response)
    }
}
