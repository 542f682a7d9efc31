use std::time::Duration;

use libp2p::Multiaddr;
use serde::{Deserialize, Serialize};

/// Tunables of the application protocol itself.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Deadline for the identify handshake. Message-relay streams carry no
    /// timeout; their lifecycle belongs to the caller.
    pub identify_timeout_ms: u64,
}

impl ProtocolConfig {
    pub fn identify_timeout(&self) -> Duration {
        Duration::from_millis(self.identify_timeout_ms)
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            identify_timeout_ms: 5_000,
        }
    }
}

/// Substrate (swarm) configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(with = "multiaddr_serde")]
    pub listen_addr: Multiaddr,
    #[serde(with = "multiaddr_serde::vec")]
    pub bootstrap_peers: Vec<Multiaddr>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: "/ip4/0.0.0.0/tcp/9000".parse().expect("default listen addr"),
            bootstrap_peers: Vec::new(),
        }
    }
}

mod multiaddr_serde {
    use std::str::FromStr;

    use libp2p::Multiaddr;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Multiaddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Multiaddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Multiaddr::from_str(&s)
            .map_err(|e| D::Error::custom(format!("invalid multiaddr '{s}': {e}")))
    }

    pub mod vec {
        use std::str::FromStr;

        use libp2p::Multiaddr;
        use serde::de::Error as _;
        use serde::{Deserialize, Deserializer, Serialize, Serializer};

        pub fn serialize<S>(value: &[Multiaddr], serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            let out: Vec<String> = value.iter().map(|m| m.to_string()).collect();
            out.serialize(serializer)
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Multiaddr>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let raw = Vec::<String>::deserialize(deserializer)?;
            raw.into_iter()
                .map(|s| {
                    Multiaddr::from_str(&s)
                        .map_err(|e| D::Error::custom(format!("invalid multiaddr '{s}': {e}")))
                })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_config_roundtrips_as_strings() {
        let config = NetworkConfig {
            listen_addr: "/ip4/127.0.0.1/tcp/9001".parse().unwrap(),
            bootstrap_peers: vec!["/ip4/10.0.0.1/tcp/9000".parse().unwrap()],
        };
        let raw = serde_json::to_string(&config).unwrap();
        assert!(raw.contains("/ip4/127.0.0.1/tcp/9001"));
        let back: NetworkConfig = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.listen_addr, config.listen_addr);
        assert_eq!(back.bootstrap_peers, config.bootstrap_peers);
    }

    #[test]
    fn default_identify_timeout_is_five_seconds() {
        assert_eq!(
            ProtocolConfig::default().identify_timeout(),
            Duration::from_secs(5)
        );
    }
}
