//! Version information for hostbridge.

/// hostbridge version from Cargo.toml
pub const HOSTBRIDGE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// User agent sent on the one-shot channel.
pub fn user_agent() -> String {
    format!("hostbridge/{}", HOSTBRIDGE_VERSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_carries_crate_version() {
        assert_eq!(user_agent(), format!("hostbridge/{}", HOSTBRIDGE_VERSION));
        assert!(!HOSTBRIDGE_VERSION.is_empty());
    }
}
