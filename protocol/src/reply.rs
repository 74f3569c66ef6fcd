//! Literal replies shared by the naming server, the storage servers and their
//! clients.

use fstree::{FsError, NodeKind};

pub const CREATE_DONE: &str = "CREATE DONE";
pub const DELETE_DONE: &str = "DELETE DONE";
pub const COPY_ACK: &str = "COPY ACK";
pub const COPY_DONE: &str = "COPY DONE";
pub const FILE_DONE: &str = "FILE DONE";
pub const CHUNK_ACK: &str = "ok";
pub const END_OF_FILE: &str = "END_OF_FILE\n";
pub const START_STREAM: &str = "START_STREAM\n";
pub const END_STREAM: &str = "END_STREAM\n";
pub const READY_TO_WRITE: &str = "READY_TO_WRITE\n";
pub const READY_TO_RECEIVE: &str = "READY_TO_RECEIVE\n";
pub const WRITE_ACCEPTED: &str = "ACK: WRITE REQUEST ACCEPTED\n";
pub const EXITING: &str = "Exiting...\n";
pub const FILE_COPIED: &str = "File copied successfully";
pub const DIRECTORY_COPIED: &str = "Directory copied successfully";

const RED: &str = "\x1b[1;31m";
const ORANGE: &str = "\x1b[38;5;214m";
const RESET: &str = "\x1b[0m";

/// ` ERROR <code>: <message>` with terminal colors.
pub fn error_reply(err: &FsError) -> String {
    format!(" {RED}ERROR {}:{RESET} {ORANGE}{err}{RESET}\n", err.code())
}

fn strip_colors(text: &str) -> String {
    let mut plain = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            for skipped in chars.by_ref() {
                if skipped == 'm' {
                    break;
                }
            }
            continue;
        }
        plain.push(c);
    }
    plain
}

/// Code and message of an error reply, `None` for any other reply.
pub fn parse_error_reply(reply: &str) -> Option<(u16, String)> {
    let plain = strip_colors(reply);
    let rest = plain.trim().strip_prefix("ERROR")?;
    let (code, message) = rest.split_once(':')?;
    let code = code.trim().parse().ok()?;
    Some((code, message.trim().to_owned()))
}

pub fn is_error_reply(reply: &str) -> bool {
    parse_error_reply(reply).is_some()
}

pub fn is_busy_reply(reply: &str) -> bool {
    parse_error_reply(reply).is_some_and(|(code, _)| code == FsError::BUSY_CODE)
}

pub fn locate_reply(ip: &str, client_port: u16) -> String {
    format!("StorageServer: {ip} : {client_port}")
}

pub fn parse_locate_reply(reply: &str) -> Option<(String, u16)> {
    let rest = reply.trim().strip_prefix("StorageServer:")?;
    let (ip, port) = rest.split_once(" : ")?;
    Some((ip.trim().to_owned(), port.trim().parse().ok()?))
}

pub fn list_line(path: &str, kind: NodeKind) -> String {
    format!("Path: {path}, Type: {kind}\n")
}

pub fn wrote_reply(bytes: u64) -> String {
    format!("Successfully wrote {bytes} bytes\n")
}
