//! Ordered protocol resolution rules.
//!
//! Capture tools disagree on how they report the protocol. tshark's
//! `ip.proto` gives a number, its protocol column gives a name, and
//! fragmented or tunnelled packets often only mention the inner protocol in
//! the info text. The table below is evaluated top to bottom and the first
//! matching rule wins.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    Other,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Icmp => "ICMP",
            Protocol::Other => "Other",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolRule {
    /// IP protocol number in the protocol indicator.
    Code(u8, Protocol),
    /// Protocol name in the protocol indicator, ignoring case.
    Name(&'static str, Protocol),
    /// Substring of the lower-cased info text.
    InfoContains(&'static str, Protocol),
}

pub const PROTOCOL_RULES: &[ProtocolRule] = &[
    ProtocolRule::Code(1, Protocol::Icmp),
    ProtocolRule::Code(6, Protocol::Tcp),
    ProtocolRule::Code(17, Protocol::Udp),
    ProtocolRule::Name("icmp", Protocol::Icmp),
    ProtocolRule::Name("tcp", Protocol::Tcp),
    ProtocolRule::Name("udp", Protocol::Udp),
    ProtocolRule::InfoContains("[syn]", Protocol::Tcp),
    ProtocolRule::InfoContains("proto=udp", Protocol::Udp),
    ProtocolRule::InfoContains("proto=icmp", Protocol::Icmp),
    ProtocolRule::InfoContains("proto=tcp", Protocol::Tcp),
];

impl ProtocolRule {
    fn matches(&self, code: Option<u8>, indicator: &str, info_lower: &str) -> bool {
        match *self {
            ProtocolRule::Code(n, _) => code == Some(n),
            ProtocolRule::Name(name, _) => indicator.eq_ignore_ascii_case(name),
            ProtocolRule::InfoContains(needle, _) => info_lower.contains(needle),
        }
    }

    fn protocol(&self) -> Protocol {
        match *self {
            ProtocolRule::Code(_, p) | ProtocolRule::Name(_, p) | ProtocolRule::InfoContains(_, p) => p,
        }
    }
}

/// Resolves a record's protocol from its raw indicator and info text.
pub fn classify_protocol(indicator: &str, info: &str) -> Protocol {
    classify_with_rules(PROTOCOL_RULES, indicator, info)
}

pub fn classify_with_rules(rules: &[ProtocolRule], indicator: &str, info: &str) -> Protocol {
    let indicator = indicator.trim();
    // `17,1` style lists: the outer protocol comes first
    let code = indicator
        .split(',')
        .next()
        .and_then(|first| first.trim().parse::<u8>().ok());
    let info_lower = info.to_ascii_lowercase();

    rules
        .iter()
        .find(|rule| rule.matches(code, indicator, &info_lower))
        .map(|rule| rule.protocol())
        .unwrap_or(Protocol::Other)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_codes() {
        assert_eq!(classify_protocol("1", ""), Protocol::Icmp);
        assert_eq!(classify_protocol("6", ""), Protocol::Tcp);
        assert_eq!(classify_protocol(" 17 ", ""), Protocol::Udp);
        assert_eq!(classify_protocol("17,1", ""), Protocol::Udp);
        assert_eq!(classify_protocol("47", ""), Protocol::Other);
    }

    #[test]
    fn test_code_wins_over_info_heuristic() {
        // A UDP packet whose payload text happens to mention SYN
        assert_eq!(classify_protocol("17", "[SYN] lookalike"), Protocol::Udp);
    }

    #[test]
    fn test_names_ignore_case() {
        assert_eq!(classify_protocol("TCP", ""), Protocol::Tcp);
        assert_eq!(classify_protocol("Udp", ""), Protocol::Udp);
        assert_eq!(classify_protocol("icmp", ""), Protocol::Icmp);
    }

    #[test]
    fn test_info_fallbacks() {
        assert_eq!(classify_protocol("N/A", "80 > 1234 [SYN] Seq=0"), Protocol::Tcp);
        assert_eq!(
            classify_protocol("", "Fragmented IP protocol (proto=UDP 17, off=1480)"),
            Protocol::Udp
        );
        assert_eq!(
            classify_protocol("", "Fragmented IP protocol (proto=ICMP 1, off=0)"),
            Protocol::Icmp
        );
    }

    #[test]
    fn test_default_is_other() {
        assert_eq!(classify_protocol("ARP", "Who has 10.0.0.1?"), Protocol::Other);
        assert_eq!(classify_protocol("", ""), Protocol::Other);
    }

    #[test]
    fn test_custom_rule_table() {
        let rules = [ProtocolRule::InfoContains("ping", Protocol::Icmp)];
        assert_eq!(classify_with_rules(&rules, "6", "echo ping"), Protocol::Icmp);
        assert_eq!(classify_with_rules(&rules, "6", "data"), Protocol::Other);
    }
}
