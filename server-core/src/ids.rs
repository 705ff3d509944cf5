//! Branded identifiers. Every id is validated once at construction and opaque
//! afterwards; equality and hashing are plain byte equality.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a candidate string is not a valid identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    #[error("eos id must be 32 lower-case hex characters, got `{0}`")]
    Eos(String),
    #[error("platform id must be 17 decimal digits, got `{0}`")]
    Platform(String),
    #[error("session id must be in 0..=100, got {0}")]
    Session(i64),
    #[error("team id must be 1 or 2, got {0}")]
    Team(i64),
    #[error("squad id must be a positive integer, got {0}")]
    Squad(i64),
    #[error("controller id must be BP_PlayerController_C_<digits>, got `{0}`")]
    Controller(String),
}

/// The Epic Online Services id, the primary key for players. 32 lower-case
/// hex characters, never mutated once observed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EosId(String);

impl EosId {
    pub fn parse(raw: &str) -> Result<Self, IdError> {
        let ok = raw.len() == 32
            && raw
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if ok {
            Ok(Self(raw.to_owned()))
        } else {
            Err(IdError::Eos(raw.to_owned()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EosId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The platform (Steam) id: 17 decimal digits. Absent for console players.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlatformId(String);

impl PlatformId {
    pub fn parse(raw: &str) -> Result<Self, IdError> {
        if raw.len() == 17 && raw.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(raw.to_owned()))
        } else {
            Err(IdError::Platform(raw.to_owned()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlatformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The per-connection player slot the server hands out, 0..=100. Not stable
/// across reconnects and therefore never used as an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(u8);

impl SessionId {
    pub fn new(value: i64) -> Result<Self, IdError> {
        if (0..=100).contains(&value) {
            Ok(Self(value as u8))
        } else {
            Err(IdError::Session(value))
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Team 1 or team 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TeamId(u8);

impl TeamId {
    pub const ONE: TeamId = TeamId(1);
    pub const TWO: TeamId = TeamId(2);

    pub fn new(value: i64) -> Result<Self, IdError> {
        match value {
            1 | 2 => Ok(Self(value as u8)),
            other => Err(IdError::Team(other)),
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// The opposing team.
    pub fn other(self) -> TeamId {
        if self.0 == 1 { TeamId(2) } else { TeamId(1) }
    }
}

impl fmt::Display for TeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A squad number, positive and unique only within its team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SquadId(u32);

impl SquadId {
    pub fn new(value: i64) -> Result<Self, IdError> {
        if value > 0 && value <= u32::MAX as i64 {
            Ok(Self(value as u32))
        } else {
            Err(IdError::Squad(value))
        }
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SquadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The numeric tag every log line carries; ties together the records caused
/// by one in-game action (damage, wound, death, revive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(u64);

impl ChainId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The engine-side player controller name, `BP_PlayerController_C_` followed
/// by digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ControllerId(String);

const CONTROLLER_PREFIX: &str = "BP_PlayerController_C_";

impl ControllerId {
    pub fn parse(raw: &str) -> Result<Self, IdError> {
        let digits = raw.strip_prefix(CONTROLLER_PREFIX);
        match digits {
            Some(rest) if !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()) => {
                Ok(Self(raw.to_owned()))
            }
            _ => Err(IdError::Controller(raw.to_owned())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
