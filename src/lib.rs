//! bluekit — central-role BLE connection manager.
//!
//! This crate owns the connection orchestration between an abstract
//! radio adapter and application code: it tracks discovered devices,
//! drives the scan/connect/disconnect lifecycle, resolves the connected
//! peripheral's GATT topology into notify/write routing tables, and
//! exposes it all as observable snapshots plus non-blocking commands.
//!
//! The platform radio adapter is not part of this crate. An adapter
//! pushes [`RadioEvent`]s into [`BleManager::spawn`] over a channel and
//! implements [`RadioActionSink`] for the commands flowing back out.
//!
//! ```no_run
//! use bluekit::{BleManager, ChannelActionSink};
//! use tokio::sync::mpsc;
//!
//! # async fn demo() {
//! let (event_tx, event_rx) = mpsc::unbounded_channel();
//! let (command_tx, command_rx) = mpsc::unbounded_channel();
//! // event_tx and command_rx are handed to the platform adapter.
//! let ble = BleManager::spawn(event_rx, ChannelActionSink::new(command_tx));
//! ble.start_smart_scan(bluekit::constants::DEFAULT_SMART_SCAN_TIMEOUT, false)
//!     .unwrap();
//! # let _ = (event_tx, command_rx);
//! # }
//! ```

pub mod constants;
mod error;
mod eventlog;
mod manager;
mod radio;
mod registry;
mod resolver;
mod scanner;
mod types;

pub use error::{Error, Result};
pub use manager::{BleHandle, BleManager};
pub use radio::{
    Advertisement, ChannelActionSink, CharacteristicInfo, CharacteristicProps, PeripheralId,
    RadioActionSink, RadioCommand, RadioEvent, ServiceInfo, WriteMode,
};
pub use registry::DeviceRecord;
pub use resolver::RouteEntry;
pub use types::{ConnectionState, TargetFilter};
