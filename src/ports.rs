use anyhow::{bail, Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

/// Parse a port list into a deduplicated list of TCP ports (1..=65535).
///
/// Supported formats per line:
/// - single port number: `80`
/// - inclusive range: `8000-8010`
/// - comments: everything after `#` is ignored
/// - whitespace and blank lines are ignored
pub fn parse_ports_str(s: &str) -> Result<Vec<u16>> {
    let mut out: Vec<u16> = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for (idx, raw_line) in s.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.split('#').next().map(str::trim).unwrap_or("");
        if line.is_empty() {
            continue;
        }

        let (start, end) = parse_port_range(line).with_context(|| format!("line {line_no}"))?;
        for p in start..=end {
            if seen.insert(p) {
                out.push(p);
            }
        }
    }

    Ok(out)
}

/// Parse `a-b` or a single `a` into an inclusive `(start, end)` pair.
pub fn parse_port_range(s: &str) -> Result<(u16, u16)> {
    let s = s.trim();
    if let Some((a, b)) = s.split_once('-') {
        let start = parse_port_str(a.trim())
            .with_context(|| format!("invalid start in range: {a}"))?;
        let end =
            parse_port_str(b.trim()).with_context(|| format!("invalid end in range: {b}"))?;
        if start > end {
            bail!("invalid range {start}-{end} (start > end)");
        }
        return Ok((start, end));
    }
    let p = parse_port_str(s).with_context(|| format!("invalid port value: {s}"))?;
    Ok((p, p))
}

/// Load a ports list from a file path. Errors if the file cannot be read or parsed.
pub fn load_ports_from_path(path: impl AsRef<Path>) -> Result<Vec<u16>> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("failed to read ports file: {}", path.as_ref().display()))?;
    parse_ports_str(&content)
}

/// Ports refused by browsers' fetch "bad port" rule. Probing them from a
/// constrained context is disallowed, so they are reported `BLOCKED`.
const UNSAFE_PORTS: &[u16] = &[
    1, 7, 9, 11, 13, 15, 17, 19, 20, 21, 22, 23, 25, 37, 42, 43, 53, 69, 77, 79, 87, 95, 101, 102,
    103, 104, 109, 110, 111, 113, 115, 117, 119, 123, 135, 137, 139, 143, 161, 179, 389, 427, 465,
    512, 513, 514, 515, 526, 530, 531, 532, 540, 548, 554, 556, 563, 587, 601, 636, 989, 990, 993,
    995, 1719, 1720, 1723, 2049, 3659, 4045, 4190, 5060, 5061, 6000, 6566, 6665, 6666, 6667, 6668,
    6669, 6679, 6697, 10080,
];

/// Fixed set of ports that must never be probed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortPolicy {
    blocked: BTreeSet<u16>,
}

impl PortPolicy {
    pub fn from_ports(ports: impl IntoIterator<Item = u16>) -> Self {
        Self {
            blocked: ports.into_iter().collect(),
        }
    }

    /// Policy that blocks nothing.
    pub fn permissive() -> Self {
        Self {
            blocked: BTreeSet::new(),
        }
    }

    /// Load a custom disallowed list from a ports file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::from_ports(load_ports_from_path(path)?))
    }

    pub fn is_blocked(&self, port: u16) -> bool {
        self.blocked.contains(&port)
    }

    pub fn len(&self) -> usize {
        self.blocked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocked.is_empty()
    }
}

impl Default for PortPolicy {
    fn default() -> Self {
        Self::from_ports(UNSAFE_PORTS.iter().copied())
    }
}

fn parse_port_str(s: &str) -> Result<u16> {
    let val: u32 = s.parse::<u32>().map_err(|e| anyhow::anyhow!(e))?;
    if val == 0 || val > 65535 {
        bail!("port out of range: {val}");
    }
    Ok(val as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_list_expands_ranges_in_first_seen_order() {
        let input = "6665-6669 # irc\n25\n6667\n";
        let ports = parse_ports_str(input).unwrap();
        assert_eq!(ports, vec![6665, 6666, 6667, 6668, 6669, 25]);
        let policy = PortPolicy::from_ports(ports);
        assert!(policy.is_blocked(6668) && policy.is_blocked(25));
        assert!(!policy.is_blocked(6670));
    }

    #[test]
    fn default_policy_round_trips_through_list_format() {
        let text: String = UNSAFE_PORTS.iter().map(|p| format!("{p}\n")).collect();
        let parsed = PortPolicy::from_ports(parse_ports_str(&text).unwrap());
        assert_eq!(parsed, PortPolicy::default());
        assert_eq!(parsed.len(), UNSAFE_PORTS.len());
    }

    #[test]
    fn range_spec_forms() {
        assert_eq!(parse_port_range("78-82").unwrap(), (78, 82));
        assert_eq!(parse_port_range(" 443 ").unwrap(), (443, 443));
        assert_eq!(parse_port_range("65535-65535").unwrap(), (65535, 65535));
        assert!(parse_port_range("90-80").is_err());
        assert!(parse_port_range("0-10").is_err());
        assert!(parse_port_range("1-70000").is_err());
    }

    #[test]
    fn default_policy_blocks_unsafe_ports() {
        let p = PortPolicy::default();
        assert!(p.is_blocked(22) && p.is_blocked(25) && p.is_blocked(6667));
        assert!(!p.is_blocked(80) && !p.is_blocked(443) && !p.is_blocked(8080));
    }

    #[test]
    fn permissive_policy_blocks_nothing() {
        let p = PortPolicy::permissive();
        assert!(p.is_empty());
        assert!(!p.is_blocked(22));
    }
}
