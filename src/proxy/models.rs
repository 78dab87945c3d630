use std::{borrow::Cow, fmt::Display, net::Ipv4Addr, str::FromStr};

use serde::{Serialize, Serializer};

/// An `address:port` pair that has not yet proven it forwards traffic.
///
/// Only dotted IPv4 addresses with a two to five digit port are accepted,
/// which matches what the upstream lists publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProxyCandidate {
    /// IP address of the proxy.
    pub ip: Ipv4Addr,
    /// Port number of the proxy.
    pub port: u16,
}

impl ProxyCandidate {
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self { ip, port }
    }

    /// Returns the proxy in `<ip>:<port>` format.
    pub fn as_text(&self) -> Cow<'static, str> {
        Cow::Owned(format!("{}:{}", self.ip, self.port))
    }
}

impl FromStr for ProxyCandidate {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ip, port) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("missing port in {:?}", s))?;

        // u16 parsing alone would accept "+80" and "8".
        if !(2..=5).contains(&port.len()) || !port.bytes().all(|b| b.is_ascii_digit()) {
            anyhow::bail!("invalid port in {:?}", s);
        }
        let ip = ip.parse::<Ipv4Addr>()?;
        let port = port.parse::<u16>()?;
        if port == 0 {
            anyhow::bail!("port 0 is not routable");
        }
        Ok(Self { ip, port })
    }
}

impl Display for ProxyCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl Serialize for ProxyCandidate {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_address_and_port() {
        let candidate: ProxyCandidate = "10.0.0.1:8080".parse().unwrap();
        assert_eq!(candidate.ip, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(candidate.port, 8080);
        assert_eq!(candidate.to_string(), "10.0.0.1:8080");
        assert_eq!(candidate.as_text(), "10.0.0.1:8080");
    }

    #[test]
    fn tolerates_surrounding_whitespace() {
        let candidate: ProxyCandidate = "  1.2.3.4:3128\r".parse().unwrap();
        assert_eq!(candidate.port, 3128);
    }

    #[test]
    fn rejects_malformed_entries() {
        for entry in [
            "1.2.3.4",
            "1.2.3.4:",
            "1.2.3.4:8",
            "1.2.3.4:123456",
            "1.2.3.4:+80",
            "1.2.3:80",
            "256.1.1.1:80",
            "example.com:80",
            "1.2.3.4:99999",
            "1.2.3.4:00",
        ] {
            assert!(entry.parse::<ProxyCandidate>().is_err(), "{entry}");
        }
    }

    #[test]
    fn serializes_as_plain_string() {
        let candidate = ProxyCandidate::new(Ipv4Addr::new(8, 8, 4, 4), 80);
        assert_eq!(serde_json::to_string(&candidate).unwrap(), "\"8.8.4.4:80\"");
    }
}
