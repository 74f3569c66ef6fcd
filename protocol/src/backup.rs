//! Naming of the backup directories replication keeps on each storage
//! server's root. A copy of a root leaves these behind.

pub const BACKUP_PREFIX: &str = "backup_";

pub fn backup_dir_name(server_id: u32) -> String {
    format!("{BACKUP_PREFIX}{server_id}")
}

pub fn is_backup_dir(name: &str) -> bool {
    name.strip_prefix(BACKUP_PREFIX)
        .is_some_and(|id| !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()))
}
