//! Deduplicated registry of discovered peripherals.
//!
//! One record per peripheral id, kept in first-seen order for stable
//! display. Updates merge in place: a field a later advertisement does
//! not carry never erases a value an earlier one did. The whole list is
//! re-published after every mutation so observers never see per-record
//! deltas or a half-updated list.
//!
//! Only the coordination task mutates the registry, which is what makes
//! `clear` atomic with respect to in-flight discovery events.

use std::collections::HashMap;

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

use crate::constants::UNKNOWN_DEVICE_NAME;
use crate::radio::{Advertisement, PeripheralId};

/// Everything known about one physically distinct peripheral.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceRecord {
    pub id: PeripheralId,
    /// Advertised name, falling back to a GATT-resolved device name.
    pub name: Option<String>,
    pub advertised_service_uuids: Option<Vec<Uuid>>,
    pub manufacturer_data: Option<Vec<u8>>,
    pub rssi: i16,
    pub is_connectable: bool,
    pub last_seen: DateTime<Local>,
}

impl DeviceRecord {
    /// Human-readable label for logs and display.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(UNKNOWN_DEVICE_NAME)
    }
}

pub struct DeviceRegistry {
    index_by_id: HashMap<PeripheralId, usize>,
    list: Vec<DeviceRecord>,
    tx: watch::Sender<Vec<DeviceRecord>>,
}

impl DeviceRegistry {
    pub fn new() -> (Self, watch::Receiver<Vec<DeviceRecord>>) {
        let (tx, rx) = watch::channel(Vec::new());
        (
            Self {
                index_by_id: HashMap::new(),
                list: Vec::new(),
                tx,
            },
            rx,
        )
    }

    /// Insert or update the record for one advertisement and publish
    /// the updated list. Returns the record as stored.
    pub fn upsert(&mut self, ad: &Advertisement) -> &DeviceRecord {
        let idx = match self.index_by_id.get(&ad.peripheral) {
            Some(&idx) => {
                let record = &mut self.list[idx];
                if let Some(name) = &ad.name {
                    record.name = Some(name.clone());
                }
                if let Some(uuids) = &ad.service_uuids {
                    record.advertised_service_uuids = Some(uuids.clone());
                }
                if let Some(data) = &ad.manufacturer_data {
                    record.manufacturer_data = Some(data.clone());
                }
                if let Some(connectable) = ad.is_connectable {
                    record.is_connectable = connectable;
                }
                record.rssi = ad.rssi;
                record.last_seen = ad.timestamp;
                idx
            }
            None => {
                let idx = self.list.len();
                self.index_by_id.insert(ad.peripheral, idx);
                self.list.push(DeviceRecord {
                    id: ad.peripheral,
                    name: ad.name.clone(),
                    advertised_service_uuids: ad.service_uuids.clone(),
                    manufacturer_data: ad.manufacturer_data.clone(),
                    rssi: ad.rssi,
                    is_connectable: ad.is_connectable.unwrap_or(false),
                    last_seen: ad.timestamp,
                });
                idx
            }
        };
        self.publish();
        &self.list[idx]
    }

    /// Record a peripheral that was never seen while scanning, e.g. a
    /// connect event that raced the scan. Returns the stored record.
    pub fn insert_provisional(
        &mut self,
        id: PeripheralId,
        name: Option<String>,
    ) -> &DeviceRecord {
        debug_assert!(!self.index_by_id.contains_key(&id));
        let idx = self.list.len();
        self.index_by_id.insert(id, idx);
        self.list.push(DeviceRecord {
            id,
            name,
            advertised_service_uuids: None,
            manufacturer_data: None,
            rssi: 0,
            is_connectable: true,
            last_seen: Local::now(),
        });
        self.publish();
        &self.list[idx]
    }

    /// Update a record's name from the GATT Device Name characteristic.
    pub fn set_name(&mut self, id: PeripheralId, name: String) {
        if let Some(&idx) = self.index_by_id.get(&id) {
            self.list[idx].name = Some(name);
            self.publish();
        }
    }

    pub fn find(&self, id: PeripheralId) -> Option<&DeviceRecord> {
        self.index_by_id.get(&id).map(|&idx| &self.list[idx])
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Drop every record and publish the empty list.
    pub fn clear(&mut self) {
        self.index_by_id.clear();
        self.list.clear();
        self.publish();
    }

    fn publish(&self) {
        self.tx.send_replace(self.list.clone());
    }
}
