//! The connection state machine and its public surface.
//!
//! [`BleManager::spawn`] starts one coordination task that owns every
//! piece of mutable state: the device registry, the routing tables, the
//! scan orchestrator, the event log and the connection state. Radio
//! events and caller requests arrive over channels and are processed
//! strictly one at a time, in arrival order, so nothing in here needs a
//! lock. Observers read immutable snapshots through `watch` channels
//! and callers issue non-blocking commands through [`BleHandle`].

use std::collections::HashSet;
use std::time::Duration;

use log::debug;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::constants::{UUID_DEVICE_NAME, UUID_GENERIC_ACCESS_SERVICE};
use crate::error::{Error, Result};
use crate::eventlog::EventLog;
use crate::radio::{PeripheralId, RadioActionSink, RadioCommand, RadioEvent, WriteMode};
use crate::registry::{DeviceRecord, DeviceRegistry};
use crate::resolver::{issue, CharacteristicResolver, RouteEntry};
use crate::scanner::ScanOrchestrator;
use crate::types::{ConnectionState, TargetFilter};

/// Requests delivered to the coordination task. Public [`BleHandle`]
/// methods map onto these; `FallbackElapsed` is posted internally by
/// the smart-scan timer.
#[derive(Debug)]
pub(crate) enum Request {
    Configure {
        service_uuids: Option<Vec<Uuid>>,
        notify_uuids: Vec<Uuid>,
        write_uuids: Vec<Uuid>,
    },
    StartScan {
        allow_duplicates: bool,
    },
    StartSmartScan {
        timeout: Duration,
        allow_duplicates: bool,
    },
    StopScan,
    Connect {
        peripheral: PeripheralId,
    },
    Disconnect,
    Send {
        data: Vec<u8>,
        characteristic: Option<Uuid>,
        mode: Option<WriteMode>,
    },
    ClearLog,
    FallbackElapsed {
        epoch: u64,
    },
}

/// Entry point: wires the coordination task to a radio adapter.
pub struct BleManager;

impl BleManager {
    /// Spawn the coordination task. `events` is the adapter's push
    /// stream; `actions` is its command port. Must be called from
    /// within a tokio runtime.
    pub fn spawn<S: RadioActionSink>(
        events: mpsc::UnboundedReceiver<RadioEvent>,
        actions: S,
    ) -> BleHandle {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let (powered_tx, powered_rx) = watch::channel(false);
        let (connected_tx, connected_rx) = watch::channel(None);
        let (notify_tx, notify_rx) = watch::channel(Vec::new());
        let (write_tx, write_rx) = watch::channel(Vec::new());
        let (registry, devices_rx) = DeviceRegistry::new();
        let (event_log, logs_rx) = EventLog::new();

        let coordinator = Coordinator {
            actions,
            registry,
            resolver: CharacteristicResolver::new(),
            scanner: ScanOrchestrator::new(requests_tx.clone()),
            event_log,
            filter: TargetFilter::default(),
            powered_on: false,
            active: None,
            state_tx,
            powered_tx,
            connected_tx,
            notify_tx,
            write_tx,
        };
        tokio::spawn(coordinator.run(events, requests_rx));

        BleHandle {
            requests: requests_tx,
            state: state_rx,
            powered: powered_rx,
            devices: devices_rx,
            connected: connected_rx,
            notify_targets: notify_rx,
            write_targets: write_rx,
            logs: logs_rx,
        }
    }
}

/// Cloneable, non-blocking handle to the coordination task.
#[derive(Clone)]
pub struct BleHandle {
    requests: mpsc::UnboundedSender<Request>,
    state: watch::Receiver<ConnectionState>,
    powered: watch::Receiver<bool>,
    devices: watch::Receiver<Vec<DeviceRecord>>,
    connected: watch::Receiver<Option<DeviceRecord>>,
    notify_targets: watch::Receiver<Vec<RouteEntry>>,
    write_targets: watch::Receiver<Vec<RouteEntry>>,
    logs: watch::Receiver<Vec<String>>,
}

impl BleHandle {
    /// Set the service/notify/write uuid filters applied by the next
    /// scan and discovery cycle. Empty sets accept everything.
    pub fn configure(
        &self,
        service_uuids: Option<Vec<Uuid>>,
        notify_uuids: Vec<Uuid>,
        write_uuids: Vec<Uuid>,
    ) -> Result<()> {
        self.request(Request::Configure {
            service_uuids,
            notify_uuids,
            write_uuids,
        })
    }

    /// Start scanning with the configured service filter.
    pub fn start_scan(&self, allow_duplicates: bool) -> Result<()> {
        self.request(Request::StartScan { allow_duplicates })
    }

    /// Start a filtered scan that falls back to unfiltered if nothing
    /// is discovered within `timeout`.
    pub fn start_smart_scan(&self, timeout: Duration, allow_duplicates: bool) -> Result<()> {
        self.request(Request::StartSmartScan {
            timeout,
            allow_duplicates,
        })
    }

    pub fn stop_scan(&self) -> Result<()> {
        self.request(Request::StopScan)
    }

    /// Connect to a previously discovered device. Unknown ids stop the
    /// scan and are otherwise ignored.
    pub fn connect(&self, peripheral: PeripheralId) -> Result<()> {
        self.request(Request::Connect { peripheral })
    }

    /// Disconnect the active connection, if any.
    pub fn disconnect(&self) -> Result<()> {
        self.request(Request::Disconnect)
    }

    /// Write `data` to a resolved write target: the given
    /// characteristic if known, else the first discovered one. An
    /// unresolvable write is logged and dropped. When `mode` is absent,
    /// acknowledged writes are preferred where supported.
    pub fn send(
        &self,
        data: Vec<u8>,
        characteristic: Option<Uuid>,
        mode: Option<WriteMode>,
    ) -> Result<()> {
        self.request(Request::Send {
            data,
            characteristic,
            mode,
        })
    }

    pub fn clear_log(&self) -> Result<()> {
        self.request(Request::ClearLog)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_powered_on(&self) -> bool {
        *self.powered.borrow()
    }

    /// Snapshot of the discovered device list, in first-seen order.
    pub fn devices(&self) -> Vec<DeviceRecord> {
        self.devices.borrow().clone()
    }

    pub fn connected_device(&self) -> Option<DeviceRecord> {
        self.connected.borrow().clone()
    }

    /// Snapshot of the subscribed notify targets, in discovery order.
    pub fn notify_targets(&self) -> Vec<RouteEntry> {
        self.notify_targets.borrow().clone()
    }

    /// Snapshot of the resolved write targets, in discovery order.
    pub fn write_targets(&self) -> Vec<RouteEntry> {
        self.write_targets.borrow().clone()
    }

    /// Snapshot of the append-only log lines.
    pub fn log_lines(&self) -> Vec<String> {
        self.logs.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn subscribe_powered(&self) -> watch::Receiver<bool> {
        self.powered.clone()
    }

    pub fn subscribe_devices(&self) -> watch::Receiver<Vec<DeviceRecord>> {
        self.devices.clone()
    }

    pub fn subscribe_connected_device(&self) -> watch::Receiver<Option<DeviceRecord>> {
        self.connected.clone()
    }

    pub fn subscribe_notify_targets(&self) -> watch::Receiver<Vec<RouteEntry>> {
        self.notify_targets.clone()
    }

    pub fn subscribe_write_targets(&self) -> watch::Receiver<Vec<RouteEntry>> {
        self.write_targets.clone()
    }

    pub fn subscribe_logs(&self) -> watch::Receiver<Vec<String>> {
        self.logs.clone()
    }

    fn request(&self, request: Request) -> Result<()> {
        self.requests.send(request).map_err(|_| Error::ChannelClosed)
    }
}

struct Coordinator<S: RadioActionSink> {
    actions: S,
    registry: DeviceRegistry,
    resolver: CharacteristicResolver,
    scanner: ScanOrchestrator,
    event_log: EventLog,
    filter: TargetFilter,
    powered_on: bool,
    /// The peripheral currently connected (or being torn down).
    active: Option<PeripheralId>,
    state_tx: watch::Sender<ConnectionState>,
    powered_tx: watch::Sender<bool>,
    connected_tx: watch::Sender<Option<DeviceRecord>>,
    notify_tx: watch::Sender<Vec<RouteEntry>>,
    write_tx: watch::Sender<Vec<RouteEntry>>,
}

impl<S: RadioActionSink> Coordinator<S> {
    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<RadioEvent>,
        mut requests: mpsc::UnboundedReceiver<Request>,
    ) {
        loop {
            tokio::select! {
                Some(event) = events.recv() => self.handle_event(event).await,
                Some(request) = requests.recv() => self.handle_request(request).await,
                else => break,
            }
        }
        debug!("coordination task stopped");
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    async fn handle_event(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::PowerStateChanged { powered_on } => {
                self.on_power_changed(powered_on);
            }
            RadioEvent::DeviceDiscovered(ad) => {
                self.registry.upsert(&ad);
            }
            RadioEvent::Connected { peripheral, name } => {
                self.on_connected(peripheral, name).await;
            }
            RadioEvent::Disconnected { peripheral, error } => {
                self.on_disconnected(peripheral, error);
            }
            RadioEvent::ServicesDiscovered {
                peripheral,
                services,
            } => {
                if self.active != Some(peripheral) {
                    return; // stale callback
                }
                self.resolver
                    .on_services_discovered(
                        &self.actions,
                        &mut self.event_log,
                        &self.filter,
                        peripheral,
                        &services,
                    )
                    .await;
            }
            RadioEvent::CharacteristicsDiscovered {
                peripheral,
                service,
                characteristics,
            } => {
                if self.active != Some(peripheral) {
                    return;
                }
                self.resolver
                    .on_characteristics_discovered(
                        &self.actions,
                        &mut self.event_log,
                        &self.filter,
                        peripheral,
                        service,
                        &characteristics,
                    )
                    .await;
                self.publish_routes();
            }
            RadioEvent::ValueUpdated {
                peripheral,
                characteristic,
                value,
            } => {
                self.on_value_updated(peripheral, characteristic, value);
            }
            RadioEvent::WriteCompleted {
                characteristic,
                error,
                ..
            } => match error {
                Some(err) => self
                    .event_log
                    .append(format!("Write error [{characteristic}]: {err}")),
                None => self.event_log.append(format!("Write ok [{characteristic}]")),
            },
        }
    }

    fn on_power_changed(&mut self, powered_on: bool) {
        self.powered_on = powered_on;
        self.powered_tx.send_replace(powered_on);
        self.event_log.append(format!(
            "Central state -> {}",
            if powered_on { "poweredOn" } else { "poweredOff" }
        ));
        let next = if powered_on {
            // Restore to idle only when power loss itself was the last
            // word; a state that legitimately survived stays put.
            match self.state() {
                ConnectionState::RadioOff => ConnectionState::Idle,
                other => other,
            }
        } else {
            ConnectionState::RadioOff
        };
        self.set_state(next);
    }

    async fn on_connected(&mut self, peripheral: PeripheralId, name: Option<String>) {
        let record = match self.registry.find(peripheral) {
            Some(record) => record.clone(),
            // Connect confirmation for a device the scan never
            // reported; synthesize a record so the rest of the
            // pipeline has something to reference.
            None => self.registry.insert_provisional(peripheral, name).clone(),
        };
        self.active = Some(peripheral);
        self.connected_tx.send_replace(Some(record.clone()));
        self.resolver.reset();
        self.publish_routes();
        self.event_log
            .append(format!("Connected {}", record.display_name()));
        self.set_state(ConnectionState::Connected);

        let services = self.filter.service_filter().map(|list| {
            let mut with_gap = list.to_vec();
            with_gap.push(UUID_GENERIC_ACCESS_SERVICE);
            with_gap
        });
        issue(
            &self.actions,
            &mut self.event_log,
            RadioCommand::DiscoverServices {
                peripheral,
                services,
            },
        )
        .await;
    }

    fn on_disconnected(&mut self, peripheral: PeripheralId, error: Option<String>) {
        if let Some(active) = self.active {
            if active != peripheral {
                return; // stale callback for a superseded connection
            }
        }
        self.event_log.append(format!(
            "Disconnected {}",
            error.as_deref().unwrap_or("normal")
        ));
        self.active = None;
        self.connected_tx.send_replace(None);
        self.resolver.reset();
        self.publish_routes();
        self.set_state(ConnectionState::Disconnected);
    }

    fn on_value_updated(
        &mut self,
        peripheral: PeripheralId,
        characteristic: Uuid,
        value: Option<Vec<u8>>,
    ) {
        if self.active != Some(peripheral) {
            return;
        }
        let Some(value) = value else { return };
        if self.resolver.notify_targets().contains(characteristic) {
            self.event_log.append(format!(
                "Notify [{}] {}B: {}",
                characteristic,
                value.len(),
                hex(&value)
            ));
        } else if characteristic == UUID_DEVICE_NAME {
            if let Ok(name) = String::from_utf8(value) {
                self.event_log.append(format!("Device name: {name}"));
                self.registry.set_name(peripheral, name);
            }
        }
    }

    async fn handle_request(&mut self, request: Request) {
        match request {
            Request::Configure {
                service_uuids,
                notify_uuids,
                write_uuids,
            } => self.on_configure(service_uuids, notify_uuids, write_uuids),
            Request::StartScan { allow_duplicates } => {
                if !self.check_powered("Scan") {
                    return;
                }
                self.registry.clear();
                self.set_state(ConnectionState::Scanning);
                self.scanner
                    .start(
                        &self.actions,
                        &mut self.event_log,
                        &self.filter,
                        allow_duplicates,
                    )
                    .await;
            }
            Request::StartSmartScan {
                timeout,
                allow_duplicates,
            } => {
                if !self.check_powered("Scan") {
                    return;
                }
                self.registry.clear();
                self.set_state(ConnectionState::Scanning);
                self.scanner
                    .start_smart(
                        &self.actions,
                        &mut self.event_log,
                        &self.filter,
                        timeout,
                        allow_duplicates,
                    )
                    .await;
            }
            Request::StopScan => {
                if !self.check_powered("Stop scan") {
                    return;
                }
                self.stop_scan().await;
            }
            Request::Connect { peripheral } => self.on_connect_request(peripheral).await,
            Request::Disconnect => self.on_disconnect_request().await,
            Request::Send {
                data,
                characteristic,
                mode,
            } => self.on_send(data, characteristic, mode).await,
            Request::ClearLog => self.event_log.clear(),
            Request::FallbackElapsed { epoch } => self.on_fallback_elapsed(epoch).await,
        }
    }

    fn on_configure(
        &mut self,
        service_uuids: Option<Vec<Uuid>>,
        notify_uuids: Vec<Uuid>,
        write_uuids: Vec<Uuid>,
    ) {
        self.filter = TargetFilter {
            service_uuids,
            notify_uuids: notify_uuids.into_iter().collect::<HashSet<_>>(),
            write_uuids: write_uuids.into_iter().collect::<HashSet<_>>(),
        };
        self.event_log.append(format!(
            "Configured services={}, notify={}, write={}",
            self.filter
                .service_uuids
                .as_ref()
                .map_or_else(|| "[All]".to_string(), |list| join(list)),
            join_set(&self.filter.notify_uuids),
            join_set(&self.filter.write_uuids),
        ));
    }

    async fn stop_scan(&mut self) {
        self.scanner.stop(&self.actions, &mut self.event_log).await;
        if self.state() == ConnectionState::Scanning {
            self.set_state(ConnectionState::Idle);
        }
        self.event_log.append("Stop scan");
    }

    async fn on_connect_request(&mut self, peripheral: PeripheralId) {
        if !self.check_powered("Connect") {
            return;
        }
        let Some(record) = self.registry.find(peripheral).cloned() else {
            // Unknown id: the scan still stops so the caller is not
            // left scanning forever, but no connect is attempted.
            self.event_log
                .append(format!("Connect ignored: unknown device {peripheral}"));
            self.stop_scan().await;
            return;
        };
        self.stop_scan().await;
        self.set_state(ConnectionState::Connecting);
        self.event_log
            .append(format!("Connect -> {}", record.display_name()));
        issue(
            &self.actions,
            &mut self.event_log,
            RadioCommand::Connect { peripheral },
        )
        .await;
    }

    async fn on_disconnect_request(&mut self) {
        if !self.check_powered("Disconnect") {
            return;
        }
        let Some(peripheral) = self.active else {
            return;
        };
        let name = self
            .registry
            .find(peripheral)
            .map_or_else(|| peripheral.to_string(), |r| r.display_name().to_string());
        self.set_state(ConnectionState::Disconnecting);
        self.event_log.append(format!("Disconnect -> {name}"));
        issue(
            &self.actions,
            &mut self.event_log,
            RadioCommand::CancelConnection { peripheral },
        )
        .await;
    }

    async fn on_send(
        &mut self,
        data: Vec<u8>,
        characteristic: Option<Uuid>,
        mode: Option<WriteMode>,
    ) {
        if !self.check_powered("Write") {
            return;
        }
        let Some(entry) = self.resolver.resolve_write(characteristic).copied() else {
            self.event_log.append(match characteristic {
                Some(uuid) => format!("Write skipped: no writable characteristic for {uuid}"),
                None => "Write skipped: no writable characteristic".to_string(),
            });
            return;
        };
        let mode = mode.unwrap_or(if entry.properties.write {
            WriteMode::WithResponse
        } else {
            WriteMode::WithoutResponse
        });
        let described = match mode {
            WriteMode::WithResponse => "withRsp",
            WriteMode::WithoutResponse => "woRsp",
        };
        self.event_log.append(format!(
            "Write({}) [{}]: {}",
            described,
            entry.characteristic,
            hex(&data)
        ));
        issue(
            &self.actions,
            &mut self.event_log,
            RadioCommand::Write {
                peripheral: entry.peripheral,
                characteristic: entry.characteristic,
                value: data,
                mode,
            },
        )
        .await;
    }

    async fn on_fallback_elapsed(&mut self, epoch: u64) {
        if !self.scanner.is_current_epoch(epoch) {
            return; // timer from a superseded scan
        }
        if self.registry.is_empty() && self.state() == ConnectionState::Scanning {
            self.event_log
                .append("No result with filter -> fallback to unfiltered scan");
            self.scanner
                .fall_back(&self.actions, &mut self.event_log)
                .await;
        }
    }

    /// Re-publish both routing tables as one consistent pair.
    fn publish_routes(&self) {
        self.notify_tx
            .send_replace(self.resolver.notify_targets().snapshot());
        self.write_tx
            .send_replace(self.resolver.write_targets().snapshot());
    }

    /// Commands against a powered-off radio degrade to a log line.
    fn check_powered(&mut self, what: &str) -> bool {
        if !self.powered_on {
            self.event_log
                .append(format!("{what} ignored: radio powered off"));
        }
        self.powered_on
    }
}

fn hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02x}")).collect()
}

fn join(uuids: &[Uuid]) -> String {
    uuids
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn join_set(uuids: &HashSet<Uuid>) -> String {
    if uuids.is_empty() {
        "[All]".to_string()
    } else {
        let mut list: Vec<String> = uuids.iter().map(ToString::to_string).collect();
        list.sort();
        list.join(",")
    }
}
