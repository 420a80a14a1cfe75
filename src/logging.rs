//! Optional log output for applications without their own subscriber
//!
//! The library only emits `tracing` events. Nothing is printed unless the
//! application installs a subscriber, either its own or this one.

use tracing_subscriber::EnvFilter;

/// Environment variable read when no directive is passed.
pub const LOG_ENV: &str = "POLAR_BLE_LOG";

const DEFAULT_DIRECTIVE: &str = "info";

/// Install a formatted subscriber.
///
/// The filter comes from `directive`, else [`LOG_ENV`], else `info`. Returns
/// false when a global subscriber was already installed.
pub fn init(directive: Option<&str>) -> bool {
    tracing_subscriber::fmt().with_env_filter(filter(directive)).try_init().is_ok()
}

fn filter(directive: Option<&str>) -> EnvFilter {
    match directive {
        Some(directive) => EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE)),
        None => EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let _ = init(Some("polar_ble=debug"));
        assert!(!init(None));
    }

    #[test]
    fn explicit_directive_wins() {
        assert_eq!(filter(Some("polar_ble=trace")).to_string(), "polar_ble=trace");
        assert_eq!(filter(Some("polar_ble=loudest")).to_string(), "info");
    }
}
