//! Lifecycle acks of asynchronous writes, sent by a storage server to the
//! naming server's ack port, and the notices relayed to clients.

use std::{fmt, str::FromStr};

use fstree::FsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    Start,
    End,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteAck {
    pub status: AckStatus,
    pub client_id: u64,
    pub client_ip: String,
    pub client_port: u16,
    pub file: String,
    pub message: String,
}

impl fmt::Display for WriteAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self.status {
            AckStatus::Start => "Start",
            AckStatus::End => "End",
        };
        write!(
            f,
            "{status} Message from Storage Server:\nClient ID: {}\nClient IP: {}\nClient Port: {}\nFile: {}\nMessage: {}\n",
            self.client_id, self.client_ip, self.client_port, self.file, self.message
        )
    }
}

fn field<'a>(line: Option<&'a str>, label: &str) -> Result<&'a str, FsError> {
    line.and_then(|line| line.strip_prefix(label))
        .map(str::trim)
        .ok_or_else(|| FsError::Malformed(format!("ack is missing {label}")))
}

impl FromStr for WriteAck {
    type Err = FsError;

    /// Fields are read by position, each line must carry its label.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut lines = s.lines();
        let status = match lines.next() {
            Some(line) if line.starts_with("Start Message") => AckStatus::Start,
            Some(line) if line.starts_with("End Message") => AckStatus::End,
            _ => return Err(FsError::Malformed("unknown ack status".to_string())),
        };
        let client_id = field(lines.next(), "Client ID:")?
            .parse()
            .map_err(|_| FsError::Malformed("invalid client id".to_string()))?;
        let client_ip = field(lines.next(), "Client IP:")?.to_owned();
        let client_port = field(lines.next(), "Client Port:")?
            .parse()
            .map_err(|_| FsError::Malformed("invalid client port".to_string()))?;
        let file = field(lines.next(), "File:")?.to_owned();
        let message = field(lines.next(), "Message:")?.to_owned();
        Ok(WriteAck {
            status,
            client_id,
            client_ip,
            client_port,
            file,
            message,
        })
    }
}

pub fn started_notice(file: &str) -> String {
    format!("ACK: Write STARTED for file: {file}")
}

pub fn completed_notice(file: &str) -> String {
    format!("ACK: Write COMPLETED for file: {file}")
}

pub fn abandoned_notice(file: &str) -> String {
    format!("WARNING: Write operation for file '{file}' is aborted since ss goes offline.")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_text_is_parsed_positionally() {
        let ack = WriteAck {
            status: AckStatus::End,
            client_id: 12,
            client_ip: "192.168.1.4".to_string(),
            client_port: 9200,
            file: "song.mp3".to_string(),
            message: "Write operation completed successfully for file".to_string(),
        };
        let text = ack.to_string();
        assert!(text.starts_with("End Message from Storage Server:\nClient ID: 12\n"));
        assert_eq!(text.parse::<WriteAck>().unwrap(), ack);
    }

    #[test]
    fn out_of_order_fields_are_rejected() {
        let text = "Start Message from Storage Server:\nClient IP: 1.1.1.1\nClient ID: 1\n";
        assert!(text.parse::<WriteAck>().is_err());
        assert!("Hello".parse::<WriteAck>().is_err());
    }
}
