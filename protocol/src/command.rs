//! Commands a client sends to the naming server and the structural commands
//! the naming server forwards to a storage server.

use std::{fmt, str::FromStr};

use fstree::{FsError, NodeKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
    Meta,
    Stream,
}

impl AccessKind {
    pub fn verb(&self) -> &'static str {
        match self {
            AccessKind::Read => "READ",
            AccessKind::Write => "WRITE",
            AccessKind::Meta => "META",
            AccessKind::Stream => "STREAM",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// Ask which storage server serves `path`.
    Locate { access: AccessKind, path: String },
    List { path: Option<String> },
    Create { kind: NodeKind, server_id: u32, path: String },
    Delete { path: String },
    Copy { source: String, destination: String },
    Exit,
}

fn required<'a>(parts: &mut impl Iterator<Item = &'a str>, what: &str) -> Result<String, FsError> {
    parts
        .next()
        .map(str::to_owned)
        .ok_or_else(|| FsError::Malformed(format!("{what} is required!")))
}

fn server_id(raw: &str) -> Result<u32, FsError> {
    raw.parse()
        .map_err(|_| FsError::Malformed(format!("invalid storage server id {raw}")))
}

impl FromStr for ClientCommand {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let verb = parts
            .next()
            .ok_or_else(|| FsError::Malformed("Empty Command!".to_string()))?;
        let access = match verb.to_ascii_uppercase().as_str() {
            "READ" => AccessKind::Read,
            "WRITE" => AccessKind::Write,
            "META" => AccessKind::Meta,
            "STREAM" => AccessKind::Stream,
            "LIST" => {
                return Ok(ClientCommand::List {
                    path: parts.next().map(str::to_owned),
                });
            }
            "CREATE" => {
                let kind = required(&mut parts, "Type")?.parse()?;
                let server_id = server_id(&required(&mut parts, "Storage server id")?)?;
                let path = required(&mut parts, "Path")?;
                return Ok(ClientCommand::Create {
                    kind,
                    server_id,
                    path,
                });
            }
            "DELETE" => {
                return Ok(ClientCommand::Delete {
                    path: required(&mut parts, "Path")?,
                });
            }
            "COPY" => {
                let source = required(&mut parts, "Source path")?;
                let destination = required(&mut parts, "Destination path")?;
                return Ok(ClientCommand::Copy {
                    source,
                    destination,
                });
            }
            "EXIT" => return Ok(ClientCommand::Exit),
            _ => return Err(FsError::UnknownCommand(verb.to_owned())),
        };
        Ok(ClientCommand::Locate {
            access,
            path: required(&mut parts, "Path")?,
        })
    }
}

impl fmt::Display for ClientCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientCommand::Locate { access, path } => write!(f, "{} {path}", access.verb()),
            ClientCommand::List { path: Some(path) } => write!(f, "LIST {path}"),
            ClientCommand::List { path: None } => f.write_str("LIST"),
            ClientCommand::Create {
                kind,
                server_id,
                path,
            } => write!(f, "CREATE {} {server_id} {path}", kind.keyword()),
            ClientCommand::Delete { path } => write!(f, "DELETE {path}"),
            ClientCommand::Copy {
                source,
                destination,
            } => write!(f, "COPY {source} {destination}"),
            ClientCommand::Exit => f.write_str("EXIT"),
        }
    }
}

/// Structural commands on the naming server's channel to a storage server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageCommand {
    Create { kind: NodeKind, server_id: u32, path: String },
    Delete { path: String },
    /// Copy `source` into the directory `dest_dir` as `name` on the peer named
    /// by the following [`ServerInfo`].
    Copy { source: String, dest_dir: String, name: String },
    Exit,
}

impl FromStr for StorageCommand {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let verb = parts
            .next()
            .ok_or_else(|| FsError::Malformed("It is empty!".to_string()))?;
        match verb.to_ascii_uppercase().as_str() {
            "CREATE" => {
                let kind = required(&mut parts, "Type")?.parse()?;
                let server_id = server_id(&required(&mut parts, "Storage server id")?)?;
                let path = required(&mut parts, "Path")?;
                Ok(StorageCommand::Create {
                    kind,
                    server_id,
                    path,
                })
            }
            "DELETE" => Ok(StorageCommand::Delete {
                path: required(&mut parts, "Path")?,
            }),
            "COPY" => {
                let source = required(&mut parts, "Source path")?;
                let dest_dir = required(&mut parts, "Destination path")?;
                let name = required(&mut parts, "Destination name")?;
                Ok(StorageCommand::Copy {
                    source,
                    dest_dir,
                    name,
                })
            }
            "EXIT" => Ok(StorageCommand::Exit),
            _ => Err(FsError::UnknownCommand(verb.to_owned())),
        }
    }
}

impl fmt::Display for StorageCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageCommand::Create {
                kind,
                server_id,
                path,
            } => write!(f, "CREATE {} {server_id} {path}", kind.keyword()),
            StorageCommand::Delete { path } => write!(f, "DELETE {path}"),
            StorageCommand::Copy {
                source,
                dest_dir,
                name,
            } => write!(f, "COPY {source} {dest_dir} {name}"),
            StorageCommand::Exit => f.write_str("EXIT"),
        }
    }
}

/// Address of the peer a COPY streams into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub ip: String,
    pub port: u16,
}

impl ServerInfo {
    pub fn addrs(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

impl FromStr for ServerInfo {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix("SOURCE SERVER_INFO")
            .ok_or_else(|| FsError::Malformed(format!("expected server info, got {s}")))?;
        let mut parts = rest.split_whitespace();
        let ip = required(&mut parts, "Peer ip")?;
        let raw_port = required(&mut parts, "Peer port")?;
        let port = raw_port
            .parse()
            .map_err(|_| FsError::Malformed(format!("invalid peer port {raw_port}")))?;
        Ok(ServerInfo { ip, port })
    }
}

impl fmt::Display for ServerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SOURCE SERVER_INFO {} {}", self.ip, self.port)
    }
}
