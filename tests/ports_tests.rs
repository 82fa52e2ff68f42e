use mini_port_scan::ports::{parse_port_range, parse_ports_str, PortPolicy};
use std::io::Write;

#[test]
fn cli_range_forms() {
    assert_eq!(parse_port_range("1-1024").unwrap(), (1, 1024));
    assert_eq!(parse_port_range("78 - 82").unwrap(), (78, 82));
    assert_eq!(parse_port_range("8080").unwrap(), (8080, 8080));
    assert_eq!(parse_port_range("1-65535").unwrap(), (1, 65535));
    assert!(parse_port_range("82-78").is_err());
    assert!(parse_port_range("-80").is_err());
}

#[test]
fn lab_policy_with_comments() {
    let input = r#"
        # lab hosts: keep mail and remote shells untouched
        22   # ssh
        25
        5900-5902  # vnc
        5901  # listed twice
    "#;

    let ports = parse_ports_str(input).expect("parse ok");
    assert_eq!(ports, vec![22, 25, 5900, 5901, 5902]);
    let policy = PortPolicy::from_ports(ports);
    assert!(policy.is_blocked(5902));
    assert!(!policy.is_blocked(80));
}

#[test]
fn invalid_port_rejected() {
    assert!(parse_ports_str("0\n").is_err());
    assert!(parse_port_range("abc").is_err());
}

#[test]
fn policy_loaded_from_file() {
    let path = std::env::temp_dir()
        .join(format!("mini-port-scan-policy-{}.txt", std::process::id()));
    {
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "# lab policy\n8080\n9000-9001").unwrap();
    }
    let policy = PortPolicy::from_path(&path).expect("load policy");
    std::fs::remove_file(&path).ok();

    assert_eq!(policy.len(), 3);
    assert!(policy.is_blocked(8080) && policy.is_blocked(9001));
    assert!(!policy.is_blocked(22));
}

#[test]
fn missing_policy_file_is_an_error() {
    assert!(PortPolicy::from_path("/nonexistent/mini-port-scan/ports.txt").is_err());
}
