//! The package coordinate model shared by every interceptor and the malware
//! oracle: `{ecosystem, name, version}`.

use std::fmt;
use std::str::FromStr as _;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ecosystem {
    Npm,
    Pip,
}

impl fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Npm => "npm",
            Self::Pip => "pip",
        })
    }
}

/// A package version as it appears on the wire: resolvable semver, a
/// wildcard match-anything, an opaque string that didn't parse as semver
/// (npm and PyPI both allow non-semver legacy version strings), or absent
/// (a metadata request names no specific version).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageVersion {
    None,
    Any,
    Semver(semver::Version),
    Unknown(String),
}

impl PackageVersion {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() {
            return Self::None;
        }
        if raw == "*" {
            return Self::Any;
        }
        match semver::Version::from_str(raw) {
            Ok(v) => Self::Semver(v),
            Err(_) => Self::Unknown(raw.to_owned()),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

impl fmt::Display for PackageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str(""),
            Self::Any => f.write_str("*"),
            Self::Semver(v) => write!(f, "{v}"),
            Self::Unknown(v) => f.write_str(v),
        }
    }
}

/// Identifies a package at a resolved registry coordinate: the unit the
/// malware oracle is queried about and interceptors block on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageCoordinate {
    pub ecosystem: Ecosystem,
    pub name: String,
    pub version: PackageVersion,
}

impl PackageCoordinate {
    pub fn new(ecosystem: Ecosystem, name: impl Into<String>, version: PackageVersion) -> Self {
        Self {
            ecosystem,
            name: name.into(),
            version,
        }
    }

    /// A stable cache/query key: `{ecosystem}:{name}@{version}`.
    pub fn cache_key(&self) -> String {
        format!("{}:{}@{}", self.ecosystem, self.name, self.version)
    }
}

impl fmt::Display for PackageCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.ecosystem, self.name, self.version)
    }
}
