// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Test data generators for attack simulation.

use std::net::{IpAddr, Ipv4Addr};

/// Generate a pool of IP addresses for testing.
pub fn generate_ips(count: usize) -> Vec<IpAddr> {
    (0..count)
        .map(|i| {
            // Use 10.x.x.x private range
            let a = ((i >> 16) & 0xFF) as u8;
            let b = ((i >> 8) & 0xFF) as u8;
            let c = (i & 0xFF) as u8;
            IpAddr::V4(Ipv4Addr::new(10, a, b, c))
        })
        .collect()
}

/// Generate a pool of account emails, with mixed case and padding the
/// guard must normalise.
pub fn generate_accounts(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| match i % 3 {
            0 => format!("user{}@example.com", i),
            1 => format!("User{}@Example.COM", i),
            _ => format!("  user{}@example.com ", i),
        })
        .collect()
}

/// Forged `X-Forwarded-For` chains, one per request.
pub fn generate_forwarded_chains(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("203.0.113.{}, 10.0.0.1", i % 250 + 1))
        .collect()
}

/// Header values that must never be accepted as a client address.
pub fn malformed_forwarded_headers() -> Vec<&'static str> {
    vec![
        "",
        "   ",
        "not-an-ip",
        "unknown, 1.2.3.4",
        "1.2.3.4.5",
        "999.1.1.1",
        "<script>",
        "1.2.3.4:8080",
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_ips() {
        let ips = generate_ips(256);
        assert_eq!(ips.len(), 256);
        // All should be unique
        let unique: std::collections::HashSet<_> = ips.iter().collect();
        assert_eq!(unique.len(), 256);
    }

    #[test]
    fn test_generate_accounts_normalise_to_unique_keys() {
        let accounts = generate_accounts(30);
        let normalised: std::collections::HashSet<_> = accounts
            .iter()
            .map(|a| a.trim().to_lowercase())
            .collect();
        assert_eq!(normalised.len(), 30);
    }
}
