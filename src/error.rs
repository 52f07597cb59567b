//! Error types for the voice engine

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Signaling error: {0}")]
    Signaling(#[from] SignalingError),

    #[error("Peer error: {0}")]
    Peer(#[from] PeerError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
///
/// Capture failures are fatal to the whole session; playback failures only
/// disable local output.
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Couldn't connect to your microphone: {0}")]
    CaptureUnavailable(String),

    #[error("cpal error: {0}")]
    CpalError(String),
}

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Encoder initialization failed: {0}")]
    EncoderInit(String),

    #[error("Decoder initialization failed: {0}")]
    DecoderInit(String),

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Decoding failed: {0}")]
    DecodingFailed(String),

    #[error("Invalid frame size: {0}")]
    InvalidFrameSize(usize),
}

/// Signaling relay errors
///
/// These never tear down peer links by themselves.
#[derive(Error, Debug)]
pub enum SignalingError {
    #[error("Invalid relay URL: {0}")]
    InvalidUrl(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Relay reported: {0}")]
    Relay(String),

    #[error("Signaling channel closed")]
    Closed,
}

/// Classification of a peer-link failure
///
/// Mirrors the error codes browser peers report, so both ends agree on
/// which failures are worth an automatic reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PeerErrorCode {
    WebrtcSupport,
    CreateOffer,
    CreateAnswer,
    SetLocalDescription,
    SetRemoteDescription,
    AddIceCandidate,
    IceConnectionFailure,
    Signaling,
    DataChannel,
    ConnectionFailure,
}

impl PeerErrorCode {
    /// Whether a link closed with this code may be re-negotiated automatically
    pub fn is_recoverable(self) -> bool {
        matches!(self, PeerErrorCode::DataChannel | PeerErrorCode::ConnectionFailure)
    }

    /// Wire name (`ERR_*`)
    pub fn as_str(self) -> &'static str {
        match self {
            PeerErrorCode::WebrtcSupport => "ERR_WEBRTC_SUPPORT",
            PeerErrorCode::CreateOffer => "ERR_CREATE_OFFER",
            PeerErrorCode::CreateAnswer => "ERR_CREATE_ANSWER",
            PeerErrorCode::SetLocalDescription => "ERR_SET_LOCAL_DESCRIPTION",
            PeerErrorCode::SetRemoteDescription => "ERR_SET_REMOTE_DESCRIPTION",
            PeerErrorCode::AddIceCandidate => "ERR_ADD_ICE_CANDIDATE",
            PeerErrorCode::IceConnectionFailure => "ERR_ICE_CONNECTION_FAILURE",
            PeerErrorCode::Signaling => "ERR_SIGNALING",
            PeerErrorCode::DataChannel => "ERR_DATA_CHANNEL",
            PeerErrorCode::ConnectionFailure => "ERR_CONNECTION_FAILURE",
        }
    }
}

impl std::fmt::Display for PeerErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Peer link errors
#[derive(Error, Debug)]
pub enum PeerError {
    #[error("{code}: {message}")]
    Link {
        code: PeerErrorCode,
        message: String,
    },

    #[error("Unknown peer: {0}")]
    UnknownPeer(String),

    #[error("Link is not connected")]
    NotConnected,
}

impl PeerError {
    pub fn link(code: PeerErrorCode, message: impl Into<String>) -> Self {
        PeerError::Link {
            code,
            message: message.into(),
        }
    }

    /// Error class used by the reconnect policy
    pub fn code(&self) -> PeerErrorCode {
        match self {
            PeerError::Link { code, .. } => *code,
            PeerError::UnknownPeer(_) => PeerErrorCode::Signaling,
            PeerError::NotConnected => PeerErrorCode::DataChannel,
        }
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No configuration directory available on this platform")]
    NoConfigDir,

    #[error("Failed to parse {path}: {message}")]
    Parse {
        path: String,
        message: String,
    },

    #[error("Failed to serialize configuration: {0}")]
    Serialize(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
