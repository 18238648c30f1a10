//! Shared data structures for the connection manager.

use std::collections::HashSet;

use serde::Serialize;
use uuid::Uuid;

/// The single process-wide connection lifecycle state.
///
/// Only the coordination task transitions this; observers read it
/// through a `watch` snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    Idle,
    Scanning,
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
    /// The adapter reported powered-off. Overrides any other state.
    RadioOff,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
            Self::Disconnected => "disconnected",
            Self::RadioOff => "radioOff",
        };
        f.write_str(s)
    }
}

/// Which services and characteristics discovery should care about.
///
/// Supplied via `configure` before scanning and treated as a snapshot
/// for the rest of the scan/connect cycle. An absent service list or an
/// empty uuid set means "accept all" for that category.
#[derive(Debug, Clone, Default)]
pub struct TargetFilter {
    pub service_uuids: Option<Vec<Uuid>>,
    pub notify_uuids: HashSet<Uuid>,
    pub write_uuids: HashSet<Uuid>,
}

impl TargetFilter {
    /// Services to walk during characteristic discovery.
    pub fn accepts_service(&self, uuid: Uuid) -> bool {
        match &self.service_uuids {
            Some(list) if !list.is_empty() => list.contains(&uuid),
            _ => true,
        }
    }

    pub fn accepts_notify(&self, uuid: Uuid) -> bool {
        self.notify_uuids.is_empty() || self.notify_uuids.contains(&uuid)
    }

    pub fn accepts_write(&self, uuid: Uuid) -> bool {
        self.write_uuids.is_empty() || self.write_uuids.contains(&uuid)
    }

    /// The explicit service filter, if one is configured and non-empty.
    pub fn service_filter(&self) -> Option<&[Uuid]> {
        match &self.service_uuids {
            Some(list) if !list.is_empty() => Some(list),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_accepts_everything() {
        let filter = TargetFilter::default();
        let uuid = Uuid::from_u128(0x1234);
        assert!(filter.accepts_service(uuid));
        assert!(filter.accepts_notify(uuid));
        assert!(filter.accepts_write(uuid));
        assert!(filter.service_filter().is_none());
    }

    #[test]
    fn configured_filter_is_selective() {
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        let filter = TargetFilter {
            service_uuids: Some(vec![a]),
            notify_uuids: HashSet::from([a]),
            write_uuids: HashSet::from([b]),
        };
        assert!(filter.accepts_service(a));
        assert!(!filter.accepts_service(b));
        assert!(filter.accepts_notify(a));
        assert!(!filter.accepts_notify(b));
        assert!(filter.accepts_write(b));
        assert!(!filter.accepts_write(a));
        assert_eq!(filter.service_filter(), Some(&[a][..]));
    }

    #[test]
    fn empty_service_list_means_accept_all() {
        let filter = TargetFilter {
            service_uuids: Some(Vec::new()),
            ..TargetFilter::default()
        };
        assert!(filter.accepts_service(Uuid::from_u128(7)));
        assert!(filter.service_filter().is_none());
    }
}
