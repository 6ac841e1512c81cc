// src/geolocation.rs
use ipnetwork::IpNetwork;
use log::{debug, info};
use parking_lot::RwLock;
use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;

/// Maps a host address to a country code.
pub trait Geolocator: Send + Sync {
    /// `None` when the host is not an address or no range covers it.
    fn country_code(&self, host: &str) -> Option<String>;
}

/// Country lookup over a table of `<cidr>,<country>` ranges.
#[derive(Debug, Default)]
pub struct RangeGeolocator {
    ipv4: RwLock<Vec<(IpNetwork, String)>>,
    ipv6: RwLock<Vec<(IpNetwork, String)>>,
}

impl RangeGeolocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let geolocator = Self::from_ranges(&text);
        info!(
            "Loaded {} IPv4 and {} IPv6 ranges from {}",
            geolocator.ipv4.read().len(),
            geolocator.ipv6.read().len(),
            path.as_ref().display()
        );
        Ok(geolocator)
    }

    /// Parses range lines. Blank lines, `#` comments and malformed lines are skipped.
    pub fn from_ranges(text: &str) -> Self {
        let geolocator = Self::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match parse_range(line) {
                Some(range) => geolocator.insert(range.0, range.1),
                None => debug!("Skipping malformed range line: {}", line),
            }
        }
        geolocator
    }

    pub fn insert(&self, network: IpNetwork, country: String) {
        match network {
            IpNetwork::V4(_) => self.ipv4.write().push((network, country)),
            IpNetwork::V6(_) => self.ipv6.write().push((network, country)),
        }
    }

    pub fn lookup(&self, ip: IpAddr) -> Option<String> {
        let ranges = match ip {
            IpAddr::V4(_) => self.ipv4.read(),
            IpAddr::V6(_) => self.ipv6.read(),
        };
        // most specific range wins
        ranges
            .iter()
            .filter(|(network, _)| network.contains(ip))
            .max_by_key(|(network, _)| network.prefix())
            .map(|(_, country)| country.clone())
    }
}

fn parse_range(line: &str) -> Option<(IpNetwork, String)> {
    let (cidr, country) = line.split_once(',')?;
    let network = IpNetwork::from_str(cidr.trim()).ok()?;
    let country = country.trim().trim_matches('"').to_lowercase();
    if country.is_empty() {
        return None;
    }
    Some((network, country))
}

impl Geolocator for RangeGeolocator {
    fn country_code(&self, host: &str) -> Option<String> {
        let ip = host.trim().parse::<IpAddr>().ok()?;
        self.lookup(ip)
    }
}
