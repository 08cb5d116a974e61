//! Observability events: every blocked install is turned into a
//! `BlockedEvent` and handed to the [`super::notifier::EventNotifier`].

use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use rama::utils::str::arcstr::ArcStr;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::coordinate::PackageVersion;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockedArtifact {
    /// "npm" or "pip".
    pub product: ArcStr,
    pub identifier: ArcStr,
    pub version: Option<PackageVersion>,
}

#[derive(Debug, Clone)]
pub struct BlockedEventInfo {
    pub artifact: BlockedArtifact,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockedEvent {
    pub ts_ms: u64,
    pub artifact: BlockedArtifact,
}

impl BlockedEvent {
    pub fn from_info(info: BlockedEventInfo) -> Self {
        Self {
            ts_ms: now_unix_ms(),
            artifact: info.artifact,
        }
    }
}

fn now_unix_ms() -> u64 {
    static START: OnceLock<(Instant, u64)> = OnceLock::new();

    let (start_instant, start_unix_ms) = START.get_or_init(|| {
        let unix_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        (Instant::now(), unix_ms)
    });

    start_unix_ms + start_instant.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_info_stamps_time() {
        let info = BlockedEventInfo {
            artifact: BlockedArtifact {
                product: "npm".into(),
                identifier: "left-pad".into(),
                version: Some(PackageVersion::parse("1.3.0")),
            },
        };
        let event = BlockedEvent::from_info(info);
        assert!(event.ts_ms > 0);
        assert_eq!(event.artifact.identifier.as_str(), "left-pad");
    }
}
