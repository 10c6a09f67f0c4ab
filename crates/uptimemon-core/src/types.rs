//! Shared types for the uptime accounting pipeline.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::UptimeError;

// ─── MessageId ───────────────────────────────────────────────────────────────

/// Composite key of a cross-chain message: `"<chainId>/<emitterAddress>/<sequence>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parses the emitter chain from the first `/`-separated segment.
    pub fn chain_id(&self) -> Result<u16, UptimeError> {
        let parts: Vec<&str> = self.0.split('/').collect();
        if parts.len() != 3 {
            return Err(UptimeError::InvalidMessageId {
                raw: self.0.clone(),
                reason: "expected <chainId>/<emitterAddress>/<sequence>".into(),
            });
        }
        parts[0].parse::<u16>().map_err(|e| UptimeError::InvalidMessageId {
            raw: self.0.clone(),
            reason: format!("bad chain id segment: {e}"),
        })
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Resolves a chain id to its canonical chain name for metric labels.
///
/// Unregistered ids render as `unknown(<id>)` so a misconfigured emitter
/// never collides with a real chain's series.
pub fn chain_name(chain_id: u16) -> String {
    match chain_id {
        1 => "solana".into(),
        2 => "ethereum".into(),
        3 => "terra".into(),
        4 => "bsc".into(),
        5 => "polygon".into(),
        6 => "avalanche".into(),
        7 => "oasis".into(),
        8 => "algorand".into(),
        9 => "aurora".into(),
        10 => "fantom".into(),
        11 => "karura".into(),
        12 => "acala".into(),
        13 => "klaytn".into(),
        14 => "celo".into(),
        15 => "near".into(),
        16 => "moonbeam".into(),
        17 => "neon".into(),
        18 => "terra2".into(),
        19 => "injective".into(),
        20 => "osmosis".into(),
        21 => "sui".into(),
        22 => "aptos".into(),
        23 => "arbitrum".into(),
        24 => "optimism".into(),
        25 => "gnosis".into(),
        26 => "pythnet".into(),
        28 => "xpla".into(),
        29 => "btc".into(),
        30 => "base".into(),
        32 => "sei".into(),
        33 => "rootstock".into(),
        34 => "scroll".into(),
        35 => "mantle".into(),
        other => format!("unknown({other})"),
    }
}

// ─── Message ─────────────────────────────────────────────────────────────────

/// Most recent known-good observation state of a cross-chain message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    /// Advanced only by on-time observations.
    pub last_observed_at: DateTime<Utc>,
    /// Set once the sweeper has finalized missing-observation accounting.
    pub metrics_checked: bool,
}

impl Message {
    /// A freshly observed message: unchecked, baseline at the first observation.
    pub fn new(id: MessageId, observed_at: DateTime<Utc>) -> Self {
        Self {
            id,
            last_observed_at: observed_at,
            metrics_checked: false,
        }
    }
}

// ─── Observation ─────────────────────────────────────────────────────────────

/// Whether an observation arrived within the expiry window of its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationStatus {
    OnTime,
    Late,
}

impl ObservationStatus {
    pub fn as_i16(self) -> i16 {
        match self {
            Self::OnTime => 0,
            Self::Late => 1,
        }
    }

    pub fn from_i16(v: i16) -> Option<Self> {
        match v {
            0 => Some(Self::OnTime),
            1 => Some(Self::Late),
            _ => None,
        }
    }
}

impl fmt::Display for ObservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OnTime => write!(f, "on-time"),
            Self::Late => write!(f, "late"),
        }
    }
}

// Persisted as a small integer, matching the stored `status` column.
impl Serialize for ObservationStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i16(self.as_i16())
    }
}

impl<'de> Deserialize<'de> for ObservationStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = i16::deserialize(deserializer)?;
        Self::from_i16(v)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid observation status {v}")))
    }
}

/// A guardian's timestamped attestation of one message.
///
/// Immutable once written: at most one row exists per
/// (message, guardian) pair, first write wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub message_id: MessageId,
    /// Lowercased `0x`-prefixed 20-byte address.
    pub guardian_addr: String,
    /// Hex-encoded signature bytes.
    pub signature: String,
    pub observed_at: DateTime<Utc>,
    pub status: ObservationStatus,
}

impl Observation {
    /// Storage row key: `<MessageID>_<guardianAddr>`.
    pub fn row_key(&self) -> String {
        format!("{}_{}", self.message_id.as_str(), self.guardian_addr)
    }
}

// ─── Input events (boundary with the gossip transport) ───────────────────────

/// A verified observation event delivered by the external transport.
#[derive(Debug, Clone)]
pub struct ObservationEvent {
    pub message_id: String,
    /// 20-byte guardian address, `0x`-prefixed hex.
    pub guardian_addr: String,
    pub signature: Vec<u8>,
    pub observed_at: DateTime<Utc>,
}

/// Per-chain status reported inside a heartbeat.
#[derive(Debug, Clone)]
pub struct HeartbeatNetwork {
    pub chain_id: u16,
    pub height: i64,
    pub contract_address: String,
    pub error_count: u64,
}

/// A periodic guardian status report.
#[derive(Debug, Clone)]
pub struct HeartbeatEvent {
    pub guardian_addr: String,
    pub counter: i64,
    pub networks: Vec<HeartbeatNetwork>,
    pub version: String,
}

/// Latest reported block height per chain, per guardian name.
pub type GuardianChainHeights = HashMap<u16, HashMap<String, u64>>;

// ─── Tests ───────────────────────────────────────────────────────────────────
