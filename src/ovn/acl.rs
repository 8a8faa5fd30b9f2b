// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Deterministic names of the reject ACLs installed for VIPs without backends.
//!
//! An ACL name is `<load balancer uuid>-<ip>:<port>` with the address never
//! bracketed, IPv6 included. OVN caps names at 63 characters, so long names
//! give up characters of the load balancer prefix and never of the address.

use crate::constants::ACL_NAME_MAX_LEN;
use crate::types::VirtualIp;
use tracing::debug;

/// Name of the reject ACL tied to `vip` on load balancer `handle`.
///
/// ```
/// use ovnlb::ovn::acl::acl_name;
/// use ovnlb::types::VirtualIp;
///
/// let name = acl_name("1a3dfc82-2749-4931-9190-c30e7c0ecea3", &VirtualIp::new("10.96.0.10", 53));
/// assert_eq!(name, "1a3dfc82-2749-4931-9190-c30e7c0ecea3-10.96.0.10:53");
/// ```
#[must_use]
pub fn acl_name(handle: &str, vip: &VirtualIp) -> String {
    let target = match vip.port() {
        Some(port) => format!("{}:{port}", vip.host()),
        None => vip.to_string(),
    };
    let name = format!("{handle}-{target}");
    if name.len() <= ACL_NAME_MAX_LEN {
        return name;
    }

    // Room left for the handle once "-<ip>:<port>" is accounted for
    let keep = ACL_NAME_MAX_LEN.saturating_sub(target.len() + 1);
    let mut cut = keep.min(handle.len());
    while !handle.is_char_boundary(cut) {
        cut -= 1;
    }
    let truncated = format!("{}-{target}", &handle[..cut]);
    debug!(
        original = %name,
        truncated = %truncated,
        "Limiting ACL name to {ACL_NAME_MAX_LEN} characters"
    );
    truncated
}

/// [`acl_name`] with `:` escaped, for `ovn-nbctl` arguments where a bare colon
/// would be read as a separator. The database stores the unescaped form.
#[must_use]
pub fn acl_name_for_command(handle: &str, vip: &VirtualIp) -> String {
    acl_name(handle, vip).replace(':', "\\:")
}

#[cfg(test)]
#[path = "acl_tests.rs"]
mod acl_tests;
