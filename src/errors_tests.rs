// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for error types.

#[cfg(test)]
mod tests {
    use crate::errors::*;
    use crate::types::{LoadBalancerScope, Protocol};

    fn failed(stderr: &str) -> NbctlError {
        NbctlError::CommandFailed {
            args: "set load_balancer lb vips".to_string(),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn test_not_found_error_message() {
        let error = LoadBalancerError::NotFound {
            protocol: Protocol::Tcp,
            scope: LoadBalancerScope::Cluster,
        };

        assert_eq!(
            error.to_string(),
            "No TCP load balancer found in the database for scope cluster"
        );
    }

    #[test]
    fn test_empty_vips_error_message() {
        let error = LoadBalancerError::EmptyVips {
            handle: "1a3dfc82".to_string(),
        };

        assert_eq!(
            error.to_string(),
            "Load balancer vips in OVN DB for 1a3dfc82 is an empty string"
        );
    }

    #[test]
    fn test_command_failed_includes_stdout_and_stderr() {
        let message = failed("ovn-nbctl: no row \"lb\" in table load_balancer").to_string();
        assert!(message.contains("set load_balancer lb vips"));
        assert!(message.contains("no row"));
    }

    #[test]
    fn test_conflict_detection() {
        assert!(failed("transaction error: try again").is_conflict());
        assert!(failed("Transaction aborted by server").is_conflict());
        assert!(!failed("syntax error").is_conflict());

        let timeout = NbctlError::Timeout {
            args: "get".to_string(),
            timeout: std::time::Duration::from_secs(20),
        };
        assert!(!timeout.is_conflict(), "timeouts are transient, not conflicts");
    }

    #[test]
    fn test_conflict_propagates_through_sync_error() {
        let error = SyncError::from(LoadBalancerError::Command {
            operation: "set vip 10.96.0.1:443".to_string(),
            target: "1a3dfc82".to_string(),
            source: failed("try again"),
        });
        assert!(error.is_conflict());
        assert_eq!(error.error_type(), "conflict");
    }

    #[test]
    fn test_sync_error_types() {
        let not_found = SyncError::from(LoadBalancerError::NotFound {
            protocol: Protocol::Udp,
            scope: LoadBalancerScope::Cluster,
        });
        assert_eq!(not_found.error_type(), "not_found");
        assert!(!not_found.is_conflict());

        let parse = SyncError::from(LoadBalancerError::Parse {
            handle: "lb".to_string(),
            source: VipParseError {
                offset: 0,
                reason: "expected '{'".to_string(),
            },
        });
        assert_eq!(parse.error_type(), "parse_error");

        let command = SyncError::from(LoadBalancerError::Command {
            operation: "get vips".to_string(),
            target: "lb".to_string(),
            source: failed("no row"),
        });
        assert_eq!(command.error_type(), "command_error");

        let key = SyncError::InvalidKey {
            key: "bad".to_string(),
            reason: "missing namespace".to_string(),
        };
        assert_eq!(key.error_type(), "invalid_key");

        let running = SyncError::AlreadyRunning {
            name: "ovnlb-services".to_string(),
        };
        assert_eq!(running.error_type(), "already_running");
        assert!(running.to_string().contains("already running"));
    }
}
