//! VISA resource string parsing.
//!
//! # Grammar
//!
//! The subset of the VISA resource grammar this crate understands:
//!
//! - `TCPIP[board]::<host>::<port>::SOCKET` - raw TCP socket, typically the
//!   instrument's SCPI port (5025 on Keysight and Rohde & Schwarz gear).
//! - `TCPIP[board]::<host>[::<lan device>]::INSTR` - LAN instrument resource.
//!   The LAN device name defaults to `inst0` when omitted.
//! - `ASRL<device path>::INSTR` - serial port, e.g. `ASRL/dev/ttyUSB0::INSTR`.
//! - `<host>[:<port>]` - shorthand accepted on the command line and in config
//!   files; equivalent to the `SOCKET` form. The port defaults to 5025.
//!
//! Board numbers are accepted and ignored. Parsing is case-insensitive in the
//! interface and resource-class fields; hostnames and device paths keep their
//! original case.

use std::fmt;
use std::str::FromStr;

use crate::error::BenchError;

/// Default port for raw SCPI-over-TCP, used when an `INSTR` resource is
/// reached without a VISA runtime.
pub const RAW_SCPI_PORT: u16 = 5025;

/// A parsed instrument address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceAddr {
    /// Raw TCP socket (`::SOCKET` resources and `host[:port]` shorthand).
    TcpSocket {
        /// Hostname or IP address.
        host: String,
        /// TCP port number.
        port: u16,
    },
    /// LAN instrument resource (`::INSTR`).
    TcpInstr {
        /// Hostname or IP address.
        host: String,
        /// LAN device name, usually `inst0`.
        lan_device: String,
    },
    /// Serial port resource (`ASRL`).
    Serial {
        /// Operating-system device path, e.g. `/dev/ttyUSB0`.
        path: String,
    },
}

impl ResourceAddr {
    /// Parses a resource string. See the module docs for the accepted forms.
    pub fn parse(s: &str) -> Result<Self, BenchError> {
        s.parse()
    }

    /// The host this resource points at, if it is a network resource.
    pub fn host(&self) -> Option<&str> {
        match self {
            ResourceAddr::TcpSocket { host, .. } | ResourceAddr::TcpInstr { host, .. } => {
                Some(host)
            }
            ResourceAddr::Serial { .. } => None,
        }
    }
}

fn invalid(s: &str, reason: &str) -> BenchError {
    BenchError::Resource(format!("{s:?}: {reason}"))
}

fn parse_port(s: &str, raw: &str) -> Result<u16, BenchError> {
    raw.parse::<u16>()
        .map_err(|_| invalid(s, &format!("invalid port number {raw:?}")))
}

/// Checks that the first segment is `TCPIP` followed by an optional board
/// number, e.g. `TCPIP` or `TCPIP0`.
fn is_tcpip_interface(segment: &str) -> bool {
    let upper = segment.to_ascii_uppercase();
    match upper.strip_prefix("TCPIP") {
        Some(rest) => rest.is_empty() || rest.chars().all(|c| c.is_ascii_digit()),
        None => false,
    }
}

impl FromStr for ResourceAddr {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(invalid(s, "empty resource string"));
        }

        if trimmed.to_ascii_uppercase().starts_with("ASRL") {
            let body = &trimmed[4..];
            let path = match body.to_ascii_uppercase().strip_suffix("::INSTR") {
                Some(_) => &body[..body.len() - "::INSTR".len()],
                None => body,
            };
            if path.is_empty() {
                return Err(invalid(s, "missing serial device path"));
            }
            if path.chars().all(|c| c.is_ascii_digit()) {
                return Err(invalid(
                    s,
                    "numeric ASRL indices are not supported; use a device path \
                     such as ASRL/dev/ttyUSB0::INSTR",
                ));
            }
            return Ok(ResourceAddr::Serial {
                path: path.to_string(),
            });
        }

        if trimmed.contains("::") {
            let segments: Vec<&str> = trimmed.split("::").collect();
            if !is_tcpip_interface(segments[0]) {
                return Err(invalid(s, "unsupported interface (expected TCPIP or ASRL)"));
            }
            if segments[1].is_empty() {
                return Err(invalid(s, "missing host"));
            }
            let class = segments
                .last()
                .map(|c| c.to_ascii_uppercase())
                .unwrap_or_default();
            return match (segments.len(), class.as_str()) {
                (4, "SOCKET") => Ok(ResourceAddr::TcpSocket {
                    host: segments[1].to_string(),
                    port: parse_port(s, segments[2])?,
                }),
                (4, "INSTR") => Ok(ResourceAddr::TcpInstr {
                    host: segments[1].to_string(),
                    lan_device: segments[2].to_string(),
                }),
                (3, "INSTR") => Ok(ResourceAddr::TcpInstr {
                    host: segments[1].to_string(),
                    lan_device: "inst0".to_string(),
                }),
                (2, _) => Ok(ResourceAddr::TcpInstr {
                    host: segments[1].to_string(),
                    lan_device: "inst0".to_string(),
                }),
                _ => Err(invalid(s, "unrecognized TCPIP resource form")),
            };
        }

        // Bare host[:port] shorthand. rsplit_once keeps IPv4 and hostnames
        // intact; bracketed IPv6 is not supported here.
        let (host, port) = match trimmed.rsplit_once(':') {
            Some((host, port)) => (host, parse_port(s, port)?),
            None => (trimmed, RAW_SCPI_PORT),
        };
        if host.is_empty() {
            return Err(invalid(s, "missing host"));
        }
        if !host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        {
            return Err(invalid(
                s,
                "unrecognized resource (expected TCPIP/ASRL resource or host[:port])",
            ));
        }
        Ok(ResourceAddr::TcpSocket {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for ResourceAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceAddr::TcpSocket { host, port } => {
                write!(f, "TCPIP0::{host}::{port}::SOCKET")
            }
            ResourceAddr::TcpInstr { host, lan_device } => {
                write!(f, "TCPIP0::{host}::{lan_device}::INSTR")
            }
            ResourceAddr::Serial { path } => write!(f, "ASRL{path}::INSTR"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_socket_resource() {
        let addr = ResourceAddr::parse("TCPIP0::192.168.1.40::5025::SOCKET").unwrap();
        assert_eq!(
            addr,
            ResourceAddr::TcpSocket {
                host: "192.168.1.40".into(),
                port: 5025,
            }
        );
    }

    #[test]
    fn parses_instr_resource_with_default_lan_device() {
        let addr = ResourceAddr::parse("TCPIP0::pna-x.local::INSTR").unwrap();
        assert_eq!(
            addr,
            ResourceAddr::TcpInstr {
                host: "pna-x.local".into(),
                lan_device: "inst0".into(),
            }
        );
    }

    #[test]
    fn parses_instr_resource_with_explicit_lan_device() {
        let addr = ResourceAddr::parse("TCPIP::10.0.0.7::hislip0::INSTR").unwrap();
        assert_eq!(
            addr,
            ResourceAddr::TcpInstr {
                host: "10.0.0.7".into(),
                lan_device: "hislip0".into(),
            }
        );
    }

    #[test]
    fn parses_bare_host_resource_as_instr() {
        let addr = ResourceAddr::parse("TCPIP0::192.168.1.40").unwrap();
        assert!(matches!(addr, ResourceAddr::TcpInstr { .. }));
    }

    #[test]
    fn parses_host_port_shorthand() {
        let addr = ResourceAddr::parse("sig-gen.lab:5026").unwrap();
        assert_eq!(
            addr,
            ResourceAddr::TcpSocket {
                host: "sig-gen.lab".into(),
                port: 5026,
            }
        );
    }

    #[test]
    fn bare_host_shorthand_defaults_to_scpi_port() {
        let addr = ResourceAddr::parse("sig-gen.lab").unwrap();
        assert_eq!(
            addr,
            ResourceAddr::TcpSocket {
                host: "sig-gen.lab".into(),
                port: 5025,
            }
        );
        assert!(ResourceAddr::parse("not a hostname").is_err());
    }

    #[test]
    fn parses_serial_resource() {
        let addr = ResourceAddr::parse("ASRL/dev/ttyUSB0::INSTR").unwrap();
        assert_eq!(
            addr,
            ResourceAddr::Serial {
                path: "/dev/ttyUSB0".into(),
            }
        );
    }

    #[test]
    fn accepts_lowercase_interface_and_class() {
        let addr = ResourceAddr::parse("tcpip0::host::5025::socket").unwrap();
        assert!(matches!(addr, ResourceAddr::TcpSocket { port: 5025, .. }));
    }

    #[test]
    fn rejects_numeric_serial_index() {
        let err = ResourceAddr::parse("ASRL1::INSTR").unwrap_err();
        assert!(err.to_string().contains("device path"));
    }

    #[test]
    fn rejects_bad_port() {
        assert!(ResourceAddr::parse("TCPIP0::host::99999::SOCKET").is_err());
        assert!(ResourceAddr::parse("host:notaport").is_err());
    }

    #[test]
    fn rejects_unknown_interface() {
        assert!(ResourceAddr::parse("GPIB0::16::INSTR").is_err());
        assert!(ResourceAddr::parse("USB0::0x2A8D::0x2B18::MY123::INSTR").is_err());
    }

    #[test]
    fn rejects_missing_host() {
        assert!(ResourceAddr::parse("").is_err());
        assert!(ResourceAddr::parse("   ").is_err());
        assert!(ResourceAddr::parse(":5025").is_err());
        assert!(ResourceAddr::parse("TCPIP0::").is_err());
    }

    #[test]
    fn display_round_trips() {
        for text in [
            "TCPIP0::192.168.1.40::5025::SOCKET",
            "TCPIP0::pna-x.local::inst0::INSTR",
            "ASRL/dev/ttyUSB0::INSTR",
        ] {
            let addr = ResourceAddr::parse(text).unwrap();
            assert_eq!(addr.to_string(), text);
            assert_eq!(ResourceAddr::parse(&addr.to_string()).unwrap(), addr);
        }
    }
}
