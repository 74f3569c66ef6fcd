use std::fmt;

use bitflags::bitflags;

bitflags! {
    /// Access bits of a node. The flags are independent of each other, a file
    /// may be appendable without being writable.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Permissions: u32 {
        const READ = 1;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;
        const APPEND = 1 << 3;
    }
}

impl Permissions {
    /// Bits given to nodes created through the naming server.
    pub fn created() -> Self {
        Permissions::READ | Permissions::WRITE
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter_names().map(|(name, _)| name).collect();
        if names.is_empty() {
            return f.write_str("NONE");
        }
        f.write_str(&names.join(" "))
    }
}
