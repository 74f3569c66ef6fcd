use crate::FsError;

/// Advisory read/write gate of a file node.
///
/// The check and the state change happen in the same call, so two callers
/// holding the tree mutably one after another can never both obtain a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileLock {
    #[default]
    Unlocked,
    ReadHeld(u32),
    WriteHeld,
}

impl FileLock {
    pub fn try_acquire_read(&mut self) -> Result<(), FsError> {
        match *self {
            FileLock::Unlocked => *self = FileLock::ReadHeld(1),
            FileLock::ReadHeld(readers) => *self = FileLock::ReadHeld(readers + 1),
            FileLock::WriteHeld => return Err(FsError::busy_writing()),
        }
        Ok(())
    }

    pub fn try_acquire_write(&mut self) -> Result<(), FsError> {
        match *self {
            FileLock::Unlocked => {
                *self = FileLock::WriteHeld;
                Ok(())
            }
            FileLock::ReadHeld(_) => Err(FsError::busy_reading()),
            FileLock::WriteHeld => Err(FsError::busy_writing()),
        }
    }

    pub fn release_read(&mut self) {
        *self = match *self {
            FileLock::ReadHeld(readers) if readers > 1 => FileLock::ReadHeld(readers - 1),
            FileLock::ReadHeld(_) => FileLock::Unlocked,
            other => other,
        };
    }

    pub fn release_write(&mut self) {
        if *self == FileLock::WriteHeld {
            *self = FileLock::Unlocked;
        }
    }

    pub fn is_locked(&self) -> bool {
        *self != FileLock::Unlocked
    }

    /// 0 none, 1 read, 2 write.
    pub fn wire_code(&self) -> i32 {
        match self {
            FileLock::Unlocked => 0,
            FileLock::ReadHeld(_) => 1,
            FileLock::WriteHeld => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readers_share_and_block_writer() {
        let mut lock = FileLock::default();
        lock.try_acquire_read().unwrap();
        lock.try_acquire_read().unwrap();
        assert_eq!(lock, FileLock::ReadHeld(2));
        assert!(matches!(lock.try_acquire_write(), Err(FsError::Busy(_))));
        lock.release_read();
        assert_eq!(lock, FileLock::ReadHeld(1));
        lock.release_read();
        assert_eq!(lock, FileLock::Unlocked);
        lock.try_acquire_write().unwrap();
        assert_eq!(lock.wire_code(), 2);
    }

    #[test]
    fn writer_excludes_everyone() {
        let mut lock = FileLock::default();
        lock.try_acquire_write().unwrap();
        assert!(lock.try_acquire_read().is_err());
        assert!(lock.try_acquire_write().is_err());
        lock.release_read();
        assert_eq!(lock, FileLock::WriteHeld);
        lock.release_write();
        assert!(!lock.is_locked());
    }
}
