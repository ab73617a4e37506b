//! Socket path derivation.
//!
//! A *domain* names one launcher instance and doubles as the socket path
//! prefix. The default domain derives from the process owner identity plus
//! the `VSOC_INSTANCE` environment variable, the runtime's only env input.

use std::path::PathBuf;

/// Environment variable selecting the launcher instance identifier.
pub const INSTANCE_ENV: &str = "VSOC_INSTANCE";

const SOCKET_FILE: &str = "endpoint.sock";

/// Default domain for this process: `/tmp/vsoc-<uid>-<instance>`.
pub fn default_domain() -> PathBuf {
    let instance = std::env::var(INSTANCE_ENV).unwrap_or_else(|_| "1".to_owned());
    // SAFETY: getuid takes no pointers and cannot fail.
    let uid = unsafe { libc::getuid() };
    PathBuf::from(format!("/tmp/vsoc-{}-{}", uid, instance))
}

/// Endpoint-server socket path inside a domain.
pub fn socket_path(domain: &std::path::Path) -> PathBuf {
    domain.join(SOCKET_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_path_is_inside_the_domain() {
        let p = socket_path(std::path::Path::new("/tmp/vsoc-1000-1"));
        assert_eq!(p, PathBuf::from("/tmp/vsoc-1000-1/endpoint.sock"));
    }
}
