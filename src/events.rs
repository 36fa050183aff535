//! Attack event data model shared by the generator, the live store and the dashboard

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where an address is, as far as we can tell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub country: String,
    pub city: String,
    pub region: String,
}

impl Location {
    /// Placeholder used for city/region when nothing better is known
    pub const UNKNOWN: &'static str = "unknown";

    pub fn has_valid_coordinates(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intensity {
    Low,
    Medium,
    High,
    Critical,
}

impl Intensity {
    pub const ALL: [Intensity; 4] = [
        Intensity::Low,
        Intensity::Medium,
        Intensity::High,
        Intensity::Critical,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AttackType {
    #[serde(rename = "HTTP Flood")]
    HttpFlood,
    #[serde(rename = "UDP Flood")]
    UdpFlood,
    #[serde(rename = "SYN Flood")]
    SynFlood,
    #[serde(rename = "DNS Amplification")]
    DnsAmplification,
    #[serde(rename = "NTP Amplification")]
    NtpAmplification,
    #[serde(rename = "ICMP Flood")]
    IcmpFlood,
}

impl AttackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttackType::HttpFlood => "HTTP Flood",
            AttackType::UdpFlood => "UDP Flood",
            AttackType::SynFlood => "SYN Flood",
            AttackType::DnsAmplification => "DNS Amplification",
            AttackType::NtpAmplification => "NTP Amplification",
            AttackType::IcmpFlood => "ICMP Flood",
        }
    }
}

impl fmt::Display for AttackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single synthetic attack. Never mutated once built.
///
/// Field names on the wire follow the dashboard's expectations
/// (`sourceIP`, `timestamp`, `bandwidth`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttackEvent {
    pub id: String,
    #[serde(rename = "sourceIP")]
    pub source_address: String,
    #[serde(rename = "targetIP")]
    pub target_address: String,
    pub source_location: Location,
    pub target_location: Location,
    pub attack_type: AttackType,
    pub intensity: Intensity,
    #[serde(rename = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "duration")]
    pub duration_seconds: u32,
    pub packet_count: u32,
    #[serde(rename = "bandwidth")]
    pub bandwidth_mbps: u32,
}

impl AttackEvent {
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_dashboard_field_names() {
        let event = fixtures::event("attack_1_0_0", "US", Utc::now());
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["sourceIP"], "45.95.169.7");
        assert_eq!(json["targetIP"], "8.8.8.8");
        assert_eq!(json["attackType"], "HTTP Flood");
        assert_eq!(json["intensity"], "high");
        assert_eq!(json["packetCount"], 20_000);
        assert_eq!(json["bandwidth"], 500);
        assert_eq!(json["duration"], 60);
        assert_eq!(json["targetLocation"]["country"], "US");
        assert!(json.get("timestamp").is_some());
    }

    #[test]
    fn coordinate_bounds() {
        let mut loc = fixtures::location("US");
        assert!(loc.has_valid_coordinates());
        loc.latitude = 90.5;
        assert!(!loc.has_valid_coordinates());
    }
}
