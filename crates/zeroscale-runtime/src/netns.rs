//! Network-namespace lookup for containers.

use std::io;

/// Inode of the network namespace owned by `pid`, read from
/// `/proc/<pid>/ns/net`. This is the key the concurrent-request probe uses
/// when keying per namespace.
pub fn netns_inode(pid: u32) -> io::Result<u32> {
    use std::os::unix::fs::MetadataExt;
    let metadata = std::fs::metadata(format!("/proc/{pid}/ns/net"))?;
    Ok(metadata.ino() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_namespace_resolves() {
        // Every process can stat its own namespace.
        let inode = netns_inode(std::process::id()).unwrap();
        assert_ne!(inode, 0);
    }

    #[test]
    fn missing_pid_errors() {
        assert!(netns_inode(u32::MAX).is_err());
    }
}
