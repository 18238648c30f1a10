//! GATT topology resolution.
//!
//! Walks the services and characteristics the radio reports after a
//! connection and turns them into two routing tables: characteristics
//! we subscribe to for notifications, and characteristics we may
//! address for outbound writes. Tables are rebuilt from empty on every
//! connection and never survive a disconnect.

use log::debug;
use uuid::Uuid;

use crate::constants::{UUID_DEVICE_NAME, UUID_GENERIC_ACCESS_SERVICE};
use crate::eventlog::EventLog;
use crate::radio::{
    CharacteristicInfo, CharacteristicProps, PeripheralId, RadioActionSink, RadioCommand,
    ServiceInfo,
};
use crate::types::TargetFilter;

/// One resolved characteristic: the opaque handles needed to address it.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct RouteEntry {
    pub peripheral: PeripheralId,
    pub characteristic: Uuid,
    pub properties: CharacteristicProps,
}

/// Insertion-ordered characteristic table with guarded insert.
/// First writer wins; repeated discovery callbacks are idempotent.
#[derive(Default)]
pub struct RoutingTable {
    entries: Vec<RouteEntry>,
}

impl RoutingTable {
    pub fn contains(&self, characteristic: Uuid) -> bool {
        self.entries.iter().any(|e| e.characteristic == characteristic)
    }

    /// Insert unless an entry for the characteristic already exists.
    /// Returns whether the entry was inserted.
    fn insert_if_absent(&mut self, entry: RouteEntry) -> bool {
        if self.contains(entry.characteristic) {
            return false;
        }
        self.entries.push(entry);
        true
    }

    pub fn get(&self, characteristic: Uuid) -> Option<&RouteEntry> {
        self.entries.iter().find(|e| e.characteristic == characteristic)
    }

    pub fn first(&self) -> Option<&RouteEntry> {
        self.entries.first()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clone of the table contents, in insertion order.
    pub fn snapshot(&self) -> Vec<RouteEntry> {
        self.entries.clone()
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

pub struct CharacteristicResolver {
    notify_targets: RoutingTable,
    write_targets: RoutingTable,
    retried_empty_discovery: bool,
}

impl CharacteristicResolver {
    pub fn new() -> Self {
        Self {
            notify_targets: RoutingTable::default(),
            write_targets: RoutingTable::default(),
            retried_empty_discovery: false,
        }
    }

    pub fn notify_targets(&self) -> &RoutingTable {
        &self.notify_targets
    }

    pub fn write_targets(&self) -> &RoutingTable {
        &self.write_targets
    }

    /// Drop all routing state. Called when a connection is established
    /// or torn down; stale entries must never leak across connections.
    pub fn reset(&mut self) {
        self.notify_targets.clear();
        self.write_targets.clear();
        self.retried_empty_discovery = false;
    }

    /// React to a completed service discovery on the connected
    /// peripheral: kick off characteristic discovery for the Generic
    /// Access service (device-name resolution) and for every service
    /// the filter accepts.
    pub async fn on_services_discovered<S: RadioActionSink>(
        &mut self,
        sink: &S,
        log: &mut EventLog,
        filter: &TargetFilter,
        peripheral: PeripheralId,
        services: &[ServiceInfo],
    ) {
        if services.is_empty() {
            // A transient adapter hiccup on some stacks; retry without
            // a filter exactly once, then leave the connection
            // unresolved rather than loop against a bad peripheral.
            if self.retried_empty_discovery {
                log.append("Services still empty, leaving connection unresolved");
                return;
            }
            self.retried_empty_discovery = true;
            log.append("Services empty -> retry discover all");
            issue(
                sink,
                log,
                RadioCommand::DiscoverServices {
                    peripheral,
                    services: None,
                },
            )
            .await;
            return;
        }

        if services
            .iter()
            .any(|s| s.uuid == UUID_GENERIC_ACCESS_SERVICE)
        {
            issue(
                sink,
                log,
                RadioCommand::DiscoverCharacteristics {
                    peripheral,
                    service: UUID_GENERIC_ACCESS_SERVICE,
                    characteristics: Some(vec![UUID_DEVICE_NAME]),
                },
            )
            .await;
        }

        for service in services {
            if service.uuid == UUID_GENERIC_ACCESS_SERVICE {
                continue;
            }
            if !filter.accepts_service(service.uuid) {
                debug!("skipping service {} (filtered)", service.uuid);
                continue;
            }
            issue(
                sink,
                log,
                RadioCommand::DiscoverCharacteristics {
                    peripheral,
                    service: service.uuid,
                    characteristics: None,
                },
            )
            .await;
        }
    }

    /// React to a completed characteristic discovery for one service:
    /// read the device name from Generic Access, otherwise populate the
    /// routing tables. Notify targets are subscribed as they are
    /// inserted; write targets are passive routing entries.
    pub async fn on_characteristics_discovered<S: RadioActionSink>(
        &mut self,
        sink: &S,
        log: &mut EventLog,
        filter: &TargetFilter,
        peripheral: PeripheralId,
        service: Uuid,
        characteristics: &[CharacteristicInfo],
    ) {
        if service == UUID_GENERIC_ACCESS_SERVICE {
            if characteristics.iter().any(|c| c.uuid == UUID_DEVICE_NAME) {
                issue(
                    sink,
                    log,
                    RadioCommand::Read {
                        peripheral,
                        characteristic: UUID_DEVICE_NAME,
                    },
                )
                .await;
            }
            return;
        }

        for info in characteristics {
            if info.properties.notify && filter.accepts_notify(info.uuid) {
                let inserted = self.notify_targets.insert_if_absent(RouteEntry {
                    peripheral,
                    characteristic: info.uuid,
                    properties: info.properties,
                });
                if inserted {
                    log.append(format!("Subscribe notify -> {}/{}", service, info.uuid));
                    issue(
                        sink,
                        log,
                        RadioCommand::SetNotify {
                            peripheral,
                            characteristic: info.uuid,
                            enabled: true,
                        },
                    )
                    .await;
                }
            }
            if info.properties.writable() && filter.accepts_write(info.uuid) {
                let inserted = self.write_targets.insert_if_absent(RouteEntry {
                    peripheral,
                    characteristic: info.uuid,
                    properties: info.properties,
                });
                if inserted {
                    log.append(format!("Write target -> {}/{}", service, info.uuid));
                }
            }
        }
    }

    /// Pick the write target for an outbound send: the explicit
    /// characteristic if given and known, else the first write target
    /// in insertion order.
    pub fn resolve_write(&self, characteristic: Option<Uuid>) -> Option<&RouteEntry> {
        match characteristic {
            Some(uuid) => self.write_targets.get(uuid),
            None => self.write_targets.first(),
        }
    }
}

/// Hand one command to the radio, degrading failures to a log entry.
pub(crate) async fn issue<S: RadioActionSink>(
    sink: &S,
    log: &mut EventLog,
    command: RadioCommand,
) {
    if let Err(err) = sink.send(command).await {
        log.append(format!("Radio command failed: {err}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::ChannelActionSink;
    use tokio::sync::mpsc;

    fn notify_char(id: u128) -> CharacteristicInfo {
        CharacteristicInfo {
            uuid: Uuid::from_u128(id),
            properties: CharacteristicProps {
                notify: true,
                ..CharacteristicProps::default()
            },
        }
    }

    fn write_char(id: u128) -> CharacteristicInfo {
        CharacteristicInfo {
            uuid: Uuid::from_u128(id),
            properties: CharacteristicProps {
                write: true,
                ..CharacteristicProps::default()
            },
        }
    }

    fn harness() -> (
        CharacteristicResolver,
        EventLog,
        ChannelActionSink,
        mpsc::UnboundedReceiver<RadioCommand>,
    ) {
        let (log, _log_rx) = EventLog::new();
        let (tx, rx) = mpsc::unbounded_channel();
        (CharacteristicResolver::new(), log, ChannelActionSink::new(tx), rx)
    }

    #[tokio::test]
    async fn notify_insert_is_idempotent_and_subscribes_once() {
        let (mut resolver, mut log, sink, mut commands) = harness();
        let filter = TargetFilter::default();
        let peripheral = PeripheralId(Uuid::from_u128(1));
        let service = Uuid::from_u128(0xc0de);

        for _ in 0..2 {
            resolver
                .on_characteristics_discovered(
                    &sink,
                    &mut log,
                    &filter,
                    peripheral,
                    service,
                    &[notify_char(0xa1)],
                )
                .await;
        }
        assert_eq!(resolver.notify_targets().len(), 1);
        assert!(matches!(
            commands.try_recv(),
            Ok(RadioCommand::SetNotify { enabled: true, .. })
        ));
        assert!(commands.try_recv().is_err());
    }

    #[tokio::test]
    async fn write_targets_are_passive() {
        let (mut resolver, mut log, sink, mut commands) = harness();
        let filter = TargetFilter::default();
        resolver
            .on_characteristics_discovered(
                &sink,
                &mut log,
                &filter,
                PeripheralId(Uuid::from_u128(1)),
                Uuid::from_u128(0xc0de),
                &[write_char(0x11)],
            )
            .await;
        assert_eq!(resolver.write_targets().len(), 1);
        // No subscribe, no read: nothing on the wire for write targets.
        assert!(commands.try_recv().is_err());
    }

    #[tokio::test]
    async fn filters_gate_routing_entries() {
        let (mut resolver, mut log, sink, _commands) = harness();
        let wanted = Uuid::from_u128(0xaa);
        let filter = TargetFilter {
            notify_uuids: [wanted].into_iter().collect(),
            write_uuids: [wanted].into_iter().collect(),
            ..TargetFilter::default()
        };
        resolver
            .on_characteristics_discovered(
                &sink,
                &mut log,
                &filter,
                PeripheralId(Uuid::from_u128(1)),
                Uuid::from_u128(0xc0de),
                &[notify_char(0xaa), notify_char(0xbb), write_char(0xcc)],
            )
            .await;
        assert_eq!(resolver.notify_targets().len(), 1);
        assert!(resolver.notify_targets().contains(wanted));
        assert!(resolver.write_targets().is_empty());
    }

    #[tokio::test]
    async fn empty_services_retries_exactly_once() {
        let (mut resolver, mut log, sink, mut commands) = harness();
        let filter = TargetFilter::default();
        let peripheral = PeripheralId(Uuid::from_u128(1));

        resolver
            .on_services_discovered(&sink, &mut log, &filter, peripheral, &[])
            .await;
        assert!(matches!(
            commands.try_recv(),
            Ok(RadioCommand::DiscoverServices { services: None, .. })
        ));

        resolver
            .on_services_discovered(&sink, &mut log, &filter, peripheral, &[])
            .await;
        assert!(commands.try_recv().is_err());
    }

    #[tokio::test]
    async fn generic_access_triggers_name_read_only() {
        let (mut resolver, mut log, sink, mut commands) = harness();
        let filter = TargetFilter::default();
        let peripheral = PeripheralId(Uuid::from_u128(1));
        resolver
            .on_characteristics_discovered(
                &sink,
                &mut log,
                &filter,
                peripheral,
                UUID_GENERIC_ACCESS_SERVICE,
                &[CharacteristicInfo {
                    uuid: UUID_DEVICE_NAME,
                    properties: CharacteristicProps {
                        read: true,
                        notify: true,
                        ..CharacteristicProps::default()
                    },
                }],
            )
            .await;
        assert!(matches!(
            commands.try_recv(),
            Ok(RadioCommand::Read { characteristic, .. }) if characteristic == UUID_DEVICE_NAME
        ));
        assert!(resolver.notify_targets().is_empty());
        assert!(resolver.write_targets().is_empty());
    }

    #[tokio::test]
    async fn resolve_write_prefers_explicit_then_first() {
        let (mut resolver, mut log, sink, _commands) = harness();
        let filter = TargetFilter::default();
        resolver
            .on_characteristics_discovered(
                &sink,
                &mut log,
                &filter,
                PeripheralId(Uuid::from_u128(1)),
                Uuid::from_u128(0xc0de),
                &[write_char(0x11), write_char(0x22)],
            )
            .await;
        assert_eq!(
            resolver.resolve_write(None).unwrap().characteristic,
            Uuid::from_u128(0x11)
        );
        assert_eq!(
            resolver
                .resolve_write(Some(Uuid::from_u128(0x22)))
                .unwrap()
                .characteristic,
            Uuid::from_u128(0x22)
        );
        assert!(resolver.resolve_write(Some(Uuid::from_u128(0x33))).is_none());
    }
}
