use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    BadAddress(String),
    BadUrl(String),
    NotInRange(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::BadAddress(e) => write!(f, "Address formatting error: {}", e),
            ConfigError::BadUrl(e) => write!(f, "Collector URL error: {}", e),
            ConfigError::NotInRange(e) => write!(f, "Value out of range: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

#[derive(Debug)]
pub enum StorageError {
    ConnectionFailed,
    WriteFailed,
    ReadFailed,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ConnectionFailed => write!(f, "Storage connection failed"),
            StorageError::WriteFailed => write!(f, "Storage write failed"),
            StorageError::ReadFailed => write!(f, "Storage read failed"),
        }
    }
}

impl std::error::Error for StorageError {}

#[derive(Debug)]
pub enum DecoyError {
    NoPages,
    NoBanners,
    InvalidBanner(String),
}

impl fmt::Display for DecoyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecoyError::NoPages => write!(f, "Decoy page collection is empty"),
            DecoyError::NoBanners => write!(f, "Decoy banner pool is empty"),
            DecoyError::InvalidBanner(b) => write!(f, "Banner {:?} is not a valid header value", b),
        }
    }
}

impl std::error::Error for DecoyError {}

#[derive(Debug)]
pub enum RecordError {
    Serialization(String),
    Storage(StorageError),
    Timeout,
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordError::Serialization(e) => write!(f, "Event serialization failed: {}", e),
            RecordError::Storage(e) => write!(f, "Event append failed: {}", e),
            RecordError::Timeout => write!(f, "Event append timed out"),
        }
    }
}

impl std::error::Error for RecordError {}

impl From<StorageError> for RecordError {
    fn from(err: StorageError) -> Self {
        RecordError::Storage(err)
    }
}

#[derive(Debug)]
pub enum ExportError {
    Network(String),
    Timeout,
    Rejected(u16),
    /// Collector answered before the closing bracket was sent
    Incomplete { rows_sent: u64 },
    Storage(StorageError),
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportError::Network(e) => write!(f, "Collector unreachable: {}", e),
            ExportError::Timeout => write!(f, "Collector request timed out"),
            ExportError::Rejected(code) => write!(f, "Collector rejected export: {}", code),
            ExportError::Incomplete { rows_sent } => write!(
                f,
                "Collector answered after {} rows, before the export ended",
                rows_sent
            ),
            ExportError::Storage(e) => write!(f, "Export storage error: {}", e),
        }
    }
}

impl std::error::Error for ExportError {}

impl From<StorageError> for ExportError {
    fn from(err: StorageError) -> Self {
        ExportError::Storage(err)
    }
}

#[derive(Debug)]
pub enum NetworkError {
    BindError(std::io::Error),
    SockError(std::io::Error),
    HostKey(String),
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::BindError(e) => write!(f, "Network bind error: {}", e),
            NetworkError::SockError(e) => write!(f, "Socket error: {}", e),
            NetworkError::HostKey(e) => write!(f, "SSH host key error: {}", e),
        }
    }
}

impl std::error::Error for NetworkError {}

#[derive(Debug)]
pub enum ControllerError {
    ConfigurationError(ConfigError),
    NetworkError(NetworkError),
    StorageError(StorageError),
    DecoyError(DecoyError),
    InitializationFailed(String),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::ConfigurationError(e) => write!(f, "Configuration error: {}", e),
            ControllerError::NetworkError(e) => write!(f, "Network error: {}", e),
            ControllerError::StorageError(e) => write!(f, "Storage error: {}", e),
            ControllerError::DecoyError(e) => write!(f, "Decoy error: {}", e),
            ControllerError::InitializationFailed(e) => write!(f, "Initialization failed: {}", e),
        }
    }
}

impl std::error::Error for ControllerError {}

impl From<ConfigError> for ControllerError {
    fn from(err: ConfigError) -> Self {
        ControllerError::ConfigurationError(err)
    }
}

impl From<NetworkError> for ControllerError {
    fn from(err: NetworkError) -> Self {
        ControllerError::NetworkError(err)
    }
}

impl From<StorageError> for ControllerError {
    fn from(err: StorageError) -> Self {
        ControllerError::StorageError(err)
    }
}

impl From<DecoyError> for ControllerError {
    fn from(err: DecoyError) -> Self {
        ControllerError::DecoyError(err)
    }
}
