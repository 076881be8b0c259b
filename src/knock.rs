use std::fmt;
use std::str::FromStr;
use crate::errors::KnockError;

/// The transport a knock travels over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Tcp,
    Udp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tcp => write!(f, "tcp"),
            Transport::Udp => write!(f, "udp"),
        }
    }
}

impl FromStr for Transport {
    type Err = KnockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Transport::Tcp),
            "udp" => Ok(Transport::Udp),
            other => Err(KnockError::InvalidKnock(format!("unknown transport '{}'", other))),
        }
    }
}

/// A single knock to either listen for or send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Knock {
    pub transport: Transport,
    pub port: u16,
    pub payload: Vec<u8>, // Must arrive verbatim, empty means nothing is read
}

impl Knock {
    /// A TCP knock with no payload.
    pub fn port(port: u16) -> Self {
        Knock {
            transport: Transport::Tcp,
            port,
            payload: Vec::new(),
        }
    }

    /// A TCP knock carrying `payload`.
    pub fn payload(port: u16, payload: impl Into<Vec<u8>>) -> Self {
        Knock {
            transport: Transport::Tcp,
            port,
            payload: payload.into(),
        }
    }

    /// A UDP knock carrying `payload`.
    pub fn udp(port: u16, payload: impl Into<Vec<u8>>) -> Self {
        Knock {
            transport: Transport::Udp,
            port,
            payload: payload.into(),
        }
    }
}

/// Formats as `transport:port[:hexpayload]`.
impl fmt::Display for Knock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.transport, self.port)?;
        if !self.payload.is_empty() {
            write!(f, ":{}", hex::encode(&self.payload))?;
        }
        Ok(())
    }
}

impl FromStr for Knock {
    type Err = KnockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().splitn(3, ':');

        let transport = parts
            .next()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| KnockError::InvalidKnock(format!("missing transport in '{}'", s)))?
            .parse::<Transport>()?;

        let port = parts
            .next()
            .ok_or_else(|| KnockError::InvalidKnock(format!("missing port in '{}'", s)))?
            .parse::<u16>()
            .map_err(|e| KnockError::InvalidKnock(format!("bad port in '{}': {}", s, e)))?;

        let payload = match parts.next() {
            Some(encoded) => hex::decode(encoded)
                .map_err(|e| KnockError::InvalidKnock(format!("bad payload in '{}': {}", s, e)))?,
            None => Vec::new(),
        };

        Ok(Knock { transport, port, payload })
    }
}

/// The sequence the command line tool uses when none is given.
pub fn demo_sequence() -> Vec<Knock> {
    vec![
        Knock::port(8081),
        Knock::port(8082),
        Knock::payload(8080, ":)"),
        Knock::port(8083),
        Knock::port(8084),
    ]
}

// -- Unit tests --

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_port_only() {
        let knock: Knock = "tcp:8081".parse().unwrap();
        assert_eq!(knock, Knock::port(8081));
    }

    #[test]
    fn test_parse_with_payload() {
        let knock: Knock = "TCP:8080:3a29".parse().unwrap();
        assert_eq!(knock.transport, Transport::Tcp);
        assert_eq!(knock.port, 8080);
        assert_eq!(knock.payload, b":)");

        let knock: Knock = "udp:9000:deadbeef".parse().unwrap();
        assert_eq!(knock, Knock::udp(9000, hex::decode("deadbeef").unwrap()));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<Knock>().is_err());
        assert!("sctp:80".parse::<Knock>().is_err());
        assert!("tcp".parse::<Knock>().is_err());
        assert!("tcp:70000".parse::<Knock>().is_err());
        assert!("tcp:80:xyz".parse::<Knock>().is_err());
        assert!(matches!("tcp:80:abc".parse::<Knock>(), Err(KnockError::InvalidKnock(_))));
    }

    #[test]
    fn test_display() {
        assert_eq!(Knock::port(8081).to_string(), "tcp:8081");
        assert_eq!(Knock::payload(8080, ":)").to_string(), "tcp:8080:3a29");
        assert_eq!(Knock::udp(53, vec![0xff]).to_string(), "udp:53:ff");

        for knock in demo_sequence() {
            assert_eq!(knock.to_string().parse::<Knock>().unwrap(), knock);
        }
    }

    #[test]
    fn test_demo_sequence() {
        let knocks = demo_sequence();
        let ports: Vec<u16> = knocks.iter().map(|k| k.port).collect();
        assert_eq!(ports, vec![8081, 8082, 8080, 8083, 8084]);
        assert_eq!(knocks[2].payload, b":)");
        assert!(knocks.iter().all(|k| k.transport == Transport::Tcp));
    }
}
