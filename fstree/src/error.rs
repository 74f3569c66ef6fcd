use thiserror::Error;

/// Every failure the file store reports to a caller. Each variant maps to the
/// numeric code carried by the `ERROR <code>: <message>` replies.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("Path not found!")]
    NotFound,
    #[error("Parent Directory Missing!")]
    ParentMissing,
    #[error("Invalid Command: {0}")]
    Malformed(String),
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
    #[error("Destination Path is not a directory!")]
    NotADirectory,
    #[error("No files or directories found!")]
    NoEntries,
    #[error("Storage Server not active!")]
    ServerInactive,
    #[error("Permission Denied!")]
    PermissionDenied,
    #[error("Not a File!")]
    NotAFile,
    #[error("{0}")]
    Busy(String),
    #[error("Unable to create node!")]
    CreateFailed,
    #[error("Node already exists: {0}")]
    AlreadyExists(String),
    #[error("Unable to delete node!")]
    DeleteFailed,
    #[error("Root directory can not be deleted!")]
    RootDeletion,
    #[error("Copy failed: {0}")]
    CopyFailed(String),
    #[error("Invalid file size format!")]
    InvalidHeader,
    #[error("Peer unreachable: {0}")]
    PeerUnreachable(String),
    #[error("Protocol desync: {0}")]
    ProtocolDesync(String),
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

impl FsError {
    /// Code of a refusal that can be retried once the lock holder is done.
    pub const BUSY_CODE: u16 = 52;

    pub fn code(&self) -> u16 {
        match self {
            FsError::NotFound => 404,
            FsError::ParentMissing => 100,
            FsError::Malformed(_) | FsError::UnknownCommand(_) => 101,
            FsError::NotADirectory => 400,
            FsError::NoEntries => 401,
            FsError::ServerInactive => 402,
            FsError::PermissionDenied => 50,
            FsError::NotAFile => 51,
            FsError::Busy(_) => Self::BUSY_CODE,
            FsError::CreateFailed | FsError::AlreadyExists(_) => 32,
            FsError::DeleteFailed | FsError::RootDeletion => 33,
            FsError::CopyFailed(_) => 45,
            FsError::InvalidHeader => 46,
            FsError::PeerUnreachable(_) => 48,
            FsError::ProtocolDesync(_) => 49,
            FsError::Io(_) => 57,
        }
    }

    pub fn busy_writing() -> Self {
        FsError::Busy("File is being written to".to_string())
    }

    pub fn busy_reading() -> Self {
        FsError::Busy("File is being read".to_string())
    }
}
