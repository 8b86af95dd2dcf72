//! Wire protocol spoken between a bridge and a plugin process.
//!
//! The exchange is newline-delimited JSON over one persistent TCP
//! connection. Each [`RpcRequest`] line is answered by exactly one
//! [`RpcResponse`] line carrying the same `id`. Method names are qualified
//! with the service name, for example `Driver.GetState`.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DriverError, DriverResult};

/// Protocol revision spoken by this build. There is no negotiation.
pub const PROTOCOL_VERSION: u32 = 1;

/// Service prefix of every method name.
pub const SERVICE_NAME: &str = "Driver";

/// Remote operations understood by a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Ends the session; the plugin exits afterwards.
    Close,
    /// Returns [`PROTOCOL_VERSION`].
    GetVersion,
    /// Returns the backend's flag descriptors.
    GetCreateFlags,
    /// Replaces the backend state from a document.
    SetConfigRaw,
    /// Returns the backend state document.
    GetConfigRaw,
    /// Returns the backend name.
    DriverName,
    /// Applies user-supplied flag values.
    SetConfigFromFlags,
    /// Returns the engine URL.
    GetUrl,
    /// Returns the machine name.
    GetMachineName,
    /// Returns the machine address.
    GetIp,
    /// Returns the SSH hostname.
    GetSshHostname,
    /// Returns the SSH key path.
    GetSshKeyPath,
    /// Returns the SSH port.
    GetSshPort,
    /// Returns the SSH username.
    GetSshUsername,
    /// Returns the machine state.
    GetState,
    /// Runs pre-creation validation.
    PreCreateCheck,
    /// Creates the machine.
    Create,
    /// Removes the machine.
    Remove,
    /// Starts the machine.
    Start,
    /// Stops the machine.
    Stop,
    /// Restarts the machine.
    Restart,
    /// Kills the machine.
    Kill,
    /// Returns a per-machine artefact path.
    LocalArtifactPath,
    /// Returns the shared artefact path.
    GlobalArtifactPath,
    /// Upgrades the machine.
    Upgrade,
}

impl Method {
    /// Every method, in declaration order.
    pub const ALL: [Self; 25] = [
        Self::Close,
        Self::GetVersion,
        Self::GetCreateFlags,
        Self::SetConfigRaw,
        Self::GetConfigRaw,
        Self::DriverName,
        Self::SetConfigFromFlags,
        Self::GetUrl,
        Self::GetMachineName,
        Self::GetIp,
        Self::GetSshHostname,
        Self::GetSshKeyPath,
        Self::GetSshPort,
        Self::GetSshUsername,
        Self::GetState,
        Self::PreCreateCheck,
        Self::Create,
        Self::Remove,
        Self::Start,
        Self::Stop,
        Self::Restart,
        Self::Kill,
        Self::LocalArtifactPath,
        Self::GlobalArtifactPath,
        Self::Upgrade,
    ];

    /// Unqualified method name as it appears on the wire.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Close => "Close",
            Self::GetVersion => "GetVersion",
            Self::GetCreateFlags => "GetCreateFlags",
            Self::SetConfigRaw => "SetConfigRaw",
            Self::GetConfigRaw => "GetConfigRaw",
            Self::DriverName => "DriverName",
            Self::SetConfigFromFlags => "SetConfigFromFlags",
            Self::GetUrl => "GetURL",
            Self::GetMachineName => "GetMachineName",
            Self::GetIp => "GetIP",
            Self::GetSshHostname => "GetSSHHostname",
            Self::GetSshKeyPath => "GetSSHKeyPath",
            Self::GetSshPort => "GetSSHPort",
            Self::GetSshUsername => "GetSSHUsername",
            Self::GetState => "GetState",
            Self::PreCreateCheck => "PreCreateCheck",
            Self::Create => "Create",
            Self::Remove => "Remove",
            Self::Start => "Start",
            Self::Stop => "Stop",
            Self::Restart => "Restart",
            Self::Kill => "Kill",
            Self::LocalArtifactPath => "LocalArtifactPath",
            Self::GlobalArtifactPath => "GlobalArtifactPath",
            Self::Upgrade => "Upgrade",
        }
    }

    /// Method name qualified with [`SERVICE_NAME`].
    #[must_use]
    pub fn qualified(self) -> String {
        format!("{SERVICE_NAME}.{}", self.name())
    }

    /// Parses a qualified method name.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Protocol`] for an unknown service or method.
    pub fn parse(qualified: &str) -> DriverResult<Self> {
        let unknown = || DriverError::protocol(format!("unknown method '{qualified}'"));
        let (service, name) = qualified.split_once('.').ok_or_else(unknown)?;
        if service != SERVICE_NAME {
            return Err(unknown());
        }
        Self::ALL
            .into_iter()
            .find(|method| method.name() == name)
            .ok_or_else(unknown)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SERVICE_NAME}.{}", self.name())
    }
}

/// One call sent to a plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    id: u64,
    method: String,
    #[serde(default)]
    params: Value,
}

impl RpcRequest {
    /// Creates a request for `method`.
    #[must_use]
    pub fn new(id: u64, method: Method, params: Value) -> Self {
        Self {
            id,
            method: method.qualified(),
            params,
        }
    }

    /// Correlation identifier.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Qualified method name exactly as received.
    #[must_use]
    pub const fn method_name(&self) -> &str {
        self.method.as_str()
    }

    /// Resolves the method name.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Protocol`] for an unknown method.
    pub fn method(&self) -> DriverResult<Method> {
        Method::parse(&self.method)
    }

    /// Argument payload.
    #[must_use]
    pub const fn params(&self) -> &Value {
        &self.params
    }

    /// Consumes the request, returning the argument payload.
    #[must_use]
    pub fn into_params(self) -> Value {
        self.params
    }
}

/// Reply to one [`RpcRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    id: u64,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

impl RpcResponse {
    /// Creates a successful reply.
    #[must_use]
    pub const fn success(id: u64, result: Value) -> Self {
        Self {
            id,
            result,
            error: None,
        }
    }

    /// Creates a failed reply carrying `message`.
    #[must_use]
    pub fn failure(id: u64, message: impl Into<String>) -> Self {
        Self {
            id,
            result: Value::Null,
            error: Some(message.into()),
        }
    }

    /// Correlation identifier.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Error text, if the call failed.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Converts the reply into the call's outcome.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Remote`] when the plugin reported a failure.
    pub fn into_result(self, method: Method) -> DriverResult<Value> {
        match self.error {
            Some(message) => Err(DriverError::Remote {
                method: method.qualified(),
                message,
            }),
            None => Ok(self.result),
        }
    }
}

/// Serialises a message as one newline-terminated line.
///
/// # Errors
///
/// Returns [`DriverError::Protocol`] if serialisation fails.
pub fn encode_line<T: Serialize>(message: &T) -> DriverResult<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Parses one line into a message.
///
/// # Errors
///
/// Returns [`DriverError::Protocol`] if the line is not a valid message.
pub fn decode_line<T: DeserializeOwned>(line: &str) -> DriverResult<T> {
    serde_json::from_str(line.trim_end()).map_err(DriverError::from)
}

/// Converts a call payload into the type a method expects.
///
/// # Errors
///
/// Returns [`DriverError::Protocol`] if the payload has the wrong shape.
pub fn decode_value<T: DeserializeOwned>(value: Value) -> DriverResult<T> {
    serde_json::from_value(value).map_err(DriverError::from)
}

/// Converts a value into a call payload.
///
/// # Errors
///
/// Returns [`DriverError::Protocol`] if serialisation fails.
pub fn encode_value<T: Serialize>(value: &T) -> DriverResult<Value> {
    serde_json::to_value(value).map_err(DriverError::from)
}
