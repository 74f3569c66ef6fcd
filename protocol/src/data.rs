//! Requests accepted on a storage server's client port: the data phase of a
//! client and the peer side of a COPY.

use std::{fmt, str::FromStr};

use fstree::{FsError, Permissions};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataRequest {
    Read { path: String },
    Write { path: String, sync: bool },
    Meta { path: String },
    Stream { path: String },
    /// Create `name` in `dest_dir` and receive its bytes.
    FileMeta { dest_dir: String, name: String, permissions: Permissions },
    CreateDir { dest_dir: String, name: String, permissions: Permissions },
    Exit,
}

fn next_arg<'a>(parts: &mut impl Iterator<Item = &'a str>) -> Result<String, FsError> {
    parts
        .next()
        .map(str::to_owned)
        .ok_or_else(|| FsError::Malformed("Path is needed!".to_string()))
}

fn permissions(raw: Option<&str>) -> Result<Permissions, FsError> {
    let bits = raw
        .and_then(|raw| raw.parse::<u32>().ok())
        .ok_or_else(|| FsError::Malformed("permission bits are required".to_string()))?;
    Ok(Permissions::from_bits_truncate(bits))
}

impl FromStr for DataRequest {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let verb = parts
            .next()
            .ok_or_else(|| FsError::Malformed("Empty Command!".to_string()))?;
        let request = match verb.to_ascii_uppercase().as_str() {
            "READ" => DataRequest::Read {
                path: next_arg(&mut parts)?,
            },
            "WRITE" => {
                let path = next_arg(&mut parts)?;
                let sync = parts.any(|flag| flag == "--SYNC");
                DataRequest::Write { path, sync }
            }
            "META" => DataRequest::Meta {
                path: next_arg(&mut parts)?,
            },
            "STREAM" => DataRequest::Stream {
                path: next_arg(&mut parts)?,
            },
            "FILE_META" => DataRequest::FileMeta {
                dest_dir: next_arg(&mut parts)?,
                name: next_arg(&mut parts)?,
                permissions: permissions(parts.next())?,
            },
            "CREATE_DIR" => DataRequest::CreateDir {
                dest_dir: next_arg(&mut parts)?,
                name: next_arg(&mut parts)?,
                permissions: permissions(parts.next())?,
            },
            "EXIT" => DataRequest::Exit,
            _ => return Err(FsError::UnknownCommand(verb.to_owned())),
        };
        Ok(request)
    }
}

impl fmt::Display for DataRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataRequest::Read { path } => write!(f, "READ {path}"),
            DataRequest::Write { path, sync: true } => write!(f, "WRITE {path} --SYNC"),
            DataRequest::Write { path, sync: false } => write!(f, "WRITE {path}"),
            DataRequest::Meta { path } => write!(f, "META {path}"),
            DataRequest::Stream { path } => write!(f, "STREAM {path}"),
            DataRequest::FileMeta {
                dest_dir,
                name,
                permissions,
            } => write!(f, "FILE_META {dest_dir} {name} {}", permissions.bits()),
            DataRequest::CreateDir {
                dest_dir,
                name,
                permissions,
            } => write!(f, "CREATE_DIR {dest_dir} {name} {}", permissions.bits()),
            DataRequest::Exit => f.write_str("EXIT"),
        }
    }
}

/// Header a client sends after WRITE: `FILE_SIZE:<n>|ACK_PORT:<p>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteHeader {
    pub file_size: u64,
    pub ack_port: u16,
}

impl FromStr for WriteHeader {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (size, port) = s.trim().split_once('|').ok_or(FsError::InvalidHeader)?;
        let file_size = size
            .strip_prefix("FILE_SIZE:")
            .and_then(|raw| raw.parse().ok())
            .ok_or(FsError::InvalidHeader)?;
        let ack_port = port
            .strip_prefix("ACK_PORT:")
            .and_then(|raw| raw.parse().ok())
            .ok_or(FsError::InvalidHeader)?;
        Ok(WriteHeader {
            file_size,
            ack_port,
        })
    }
}

impl fmt::Display for WriteHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FILE_SIZE:{}|ACK_PORT:{}", self.file_size, self.ack_port)
    }
}

/// `FILE_SIZE:<n>` sent before the bytes of a READ.
pub fn file_size_reply(size: u64) -> String {
    format!("FILE_SIZE:{size}\n")
}

pub fn parse_file_size_reply(reply: &str) -> Option<u64> {
    reply.trim().strip_prefix("FILE_SIZE:")?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_requests_carry_permissions() {
        let request: DataRequest = "FILE_META /backup_1/home notes.txt 3".parse().unwrap();
        assert_eq!(
            request,
            DataRequest::FileMeta {
                dest_dir: "/backup_1/home".to_string(),
                name: "notes.txt".to_string(),
                permissions: Permissions::READ | Permissions::WRITE,
            }
        );
        assert_eq!(request.to_string(), "FILE_META /backup_1/home notes.txt 3");
        assert!("CREATE_DIR /dst docs".parse::<DataRequest>().is_err());
    }

    #[test]
    fn write_sync_flag_is_optional() {
        assert_eq!(
            "WRITE /a.txt --SYNC".parse::<DataRequest>().unwrap(),
            DataRequest::Write {
                path: "/a.txt".to_string(),
                sync: true
            }
        );
        assert_eq!(
            "write /a.txt".parse::<DataRequest>().unwrap(),
            DataRequest::Write {
                path: "/a.txt".to_string(),
                sync: false
            }
        );
    }

    #[test]
    fn write_header_parsing() {
        let header: WriteHeader = "FILE_SIZE:2048|ACK_PORT:9100".parse().unwrap();
        assert_eq!(header.file_size, 2048);
        assert_eq!(header.ack_port, 9100);
        assert_eq!(header.to_string(), "FILE_SIZE:2048|ACK_PORT:9100");
        assert!(matches!(
            "FILE_SIZE:abc|ACK_PORT:1".parse::<WriteHeader>(),
            Err(FsError::InvalidHeader)
        ));
        assert!("FILE_SIZE:10".parse::<WriteHeader>().is_err());
    }

    #[test]
    fn file_size_reply_round_trip() {
        assert_eq!(parse_file_size_reply(&file_size_reply(42)), Some(42));
        assert_eq!(parse_file_size_reply("END_OF_FILE\n"), None);
    }
}
