//! The abstract radio boundary.
//!
//! The platform adapter (the code that talks to the OS Bluetooth stack)
//! lives outside this crate. It pushes [`RadioEvent`]s into the
//! coordination task over a channel and consumes [`RadioCommand`]s
//! through a [`RadioActionSink`]. Everything in here is plain data:
//! peripheral, service and characteristic identities are opaque lookup
//! keys borrowed from the adapter, never owned handles.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use log::debug;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Opaque identifier of a remote peripheral as assigned by the radio stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PeripheralId(pub Uuid);

impl std::fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// One advertisement report from a scan.
#[derive(Debug, Clone)]
pub struct Advertisement {
    pub peripheral: PeripheralId,
    /// Local name carried in the advertisement, if any.
    pub name: Option<String>,
    /// Service uuids carried in the advertisement, if any.
    pub service_uuids: Option<Vec<Uuid>>,
    pub manufacturer_data: Option<Vec<u8>>,
    pub rssi: i16,
    pub is_connectable: Option<bool>,
    pub timestamp: DateTime<Local>,
}

/// A service reported by service discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceInfo {
    pub uuid: Uuid,
}

/// Capabilities advertised by a characteristic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CharacteristicProps {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
}

impl CharacteristicProps {
    /// Whether the characteristic accepts writes in either mode.
    pub fn writable(&self) -> bool {
        self.write || self.write_without_response
    }
}

/// A characteristic reported by characteristic discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicInfo {
    pub uuid: Uuid,
    pub properties: CharacteristicProps,
}

/// Write acknowledgement mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    WithResponse,
    WithoutResponse,
}

/// Everything the radio adapter can tell us, delivered in arrival order.
#[derive(Debug, Clone)]
pub enum RadioEvent {
    /// The adapter's power state changed.
    PowerStateChanged { powered_on: bool },
    /// A peripheral was seen while scanning.
    DeviceDiscovered(Advertisement),
    /// A connection attempt completed.
    Connected {
        peripheral: PeripheralId,
        /// Name known to the radio stack at connect time, if any.
        name: Option<String>,
    },
    /// The link dropped, voluntarily or not.
    Disconnected {
        peripheral: PeripheralId,
        error: Option<String>,
    },
    /// Service discovery finished for a peripheral.
    ServicesDiscovered {
        peripheral: PeripheralId,
        services: Vec<ServiceInfo>,
    },
    /// Characteristic discovery finished for one service.
    CharacteristicsDiscovered {
        peripheral: PeripheralId,
        service: Uuid,
        characteristics: Vec<CharacteristicInfo>,
    },
    /// A read completed or a subscribed characteristic pushed a value.
    ValueUpdated {
        peripheral: PeripheralId,
        characteristic: Uuid,
        value: Option<Vec<u8>>,
    },
    /// An acknowledged write completed.
    WriteCompleted {
        peripheral: PeripheralId,
        characteristic: Uuid,
        error: Option<String>,
    },
}

/// Imperative commands issued to the radio adapter, fire-and-forget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioCommand {
    StartScan {
        /// Service uuid filter; `None` scans for everything.
        services: Option<Vec<Uuid>>,
        allow_duplicates: bool,
    },
    StopScan,
    Connect {
        peripheral: PeripheralId,
    },
    CancelConnection {
        peripheral: PeripheralId,
    },
    DiscoverServices {
        peripheral: PeripheralId,
        services: Option<Vec<Uuid>>,
    },
    DiscoverCharacteristics {
        peripheral: PeripheralId,
        service: Uuid,
        characteristics: Option<Vec<Uuid>>,
    },
    SetNotify {
        peripheral: PeripheralId,
        characteristic: Uuid,
        enabled: bool,
    },
    Read {
        peripheral: PeripheralId,
        characteristic: Uuid,
    },
    Write {
        peripheral: PeripheralId,
        characteristic: Uuid,
        value: Vec<u8>,
        mode: WriteMode,
    },
}

/// Outbound command port implemented by the radio adapter.
#[async_trait]
pub trait RadioActionSink: Send + Sync + 'static {
    /// Hand one command to the radio. Failures are reported to the
    /// caller but the coordinator treats them as log-and-continue.
    async fn send(&self, command: RadioCommand) -> Result<()>;
}

/// Sink that forwards commands over an in-process channel. Used by
/// channel-based adapters and by the test harness.
#[derive(Clone)]
pub struct ChannelActionSink {
    commands: mpsc::UnboundedSender<RadioCommand>,
}

impl ChannelActionSink {
    pub fn new(commands: mpsc::UnboundedSender<RadioCommand>) -> Self {
        Self { commands }
    }
}

#[async_trait]
impl RadioActionSink for ChannelActionSink {
    async fn send(&self, command: RadioCommand) -> Result<()> {
        debug!("radio command: {:?}", command);
        self.commands
            .send(command)
            .map_err(|_| anyhow::anyhow!("radio command channel closed"))
    }
}
