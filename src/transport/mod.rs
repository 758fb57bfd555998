/*
 * SPDX-FileCopyrightText: 2022 perillamint
 *
 * SPDX-License-Identifier: MPL-2.0
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::error::BridgeError;
use crate::session::Session;
use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, info, trace, warn};
use std::collections::VecDeque;
use std::fmt;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use uuid::Uuid;

#[cfg(feature = "ble")]
pub mod ble;

/// Opaque peripheral reference handed out by the adapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeripheralHandle(pub String);

impl fmt::Display for PeripheralHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceHandle {
    pub peripheral: PeripheralHandle,
    pub uuid: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CharacteristicHandle {
    pub service: ServiceHandle,
    pub uuid: Uuid,
}

/// Everything the session reacts to, delivered one at a time.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Host BLE stack powered on.
    AdapterReady,
    /// Advertisement seen while scanning. Service IDs keep advertised order.
    Discovered {
        peripheral: PeripheralHandle,
        advertised: Vec<Uuid>,
    },
    Connected(PeripheralHandle),
    ConnectFailed {
        peripheral: PeripheralHandle,
        error: String,
    },
    /// Services in discovery order.
    ServicesFound {
        peripheral: PeripheralHandle,
        services: Vec<ServiceHandle>,
    },
    /// Characteristics in discovery order.
    CharacteristicsFound {
        service: ServiceHandle,
        characteristics: Vec<CharacteristicHandle>,
    },
    /// Read response or notification.
    ValueUpdated {
        characteristic: CharacteristicHandle,
        value: Bytes,
        error: Option<String>,
    },
    Disconnected {
        peripheral: PeripheralHandle,
        error: Option<String>,
    },
    /// A command could not be carried out.
    Error(String),
    /// Host came back to the foreground.
    Resume,
}

/// Fire-and-forget requests to the adapter. Results come back as [`Event`]s.
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterCommand {
    StartScan,
    StopScan,
    Connect(PeripheralHandle),
    DiscoverServices {
        peripheral: PeripheralHandle,
        filter: Vec<Uuid>,
    },
    DiscoverCharacteristics {
        service: ServiceHandle,
        filter: Vec<Uuid>,
    },
    ReadValue(CharacteristicHandle),
    SetNotify {
        characteristic: CharacteristicHandle,
        enabled: bool,
    },
}

/// Central role capability set of the host BLE stack.
#[async_trait]
pub trait CentralAdapter: Send {
    async fn start_scan(&mut self) -> Result<(), BridgeError>;
    async fn stop_scan(&mut self) -> Result<(), BridgeError>;
    async fn connect(&mut self, peripheral: &PeripheralHandle) -> Result<(), BridgeError>;
    async fn discover_services(
        &mut self,
        peripheral: &PeripheralHandle,
        filter: &[Uuid],
    ) -> Result<(), BridgeError>;
    async fn discover_characteristics(
        &mut self,
        service: &ServiceHandle,
        filter: &[Uuid],
    ) -> Result<(), BridgeError>;
    async fn read_value(&mut self, characteristic: &CharacteristicHandle)
        -> Result<(), BridgeError>;
    async fn set_notify(
        &mut self,
        characteristic: &CharacteristicHandle,
        enabled: bool,
    ) -> Result<(), BridgeError>;
    /// Issue a single command.
    async fn execute(&mut self, command: AdapterCommand) -> Result<(), BridgeError> {
        match command {
            AdapterCommand::StartScan => self.start_scan().await,
            AdapterCommand::StopScan => self.stop_scan().await,
            AdapterCommand::Connect(peripheral) => self.connect(&peripheral).await,
            AdapterCommand::DiscoverServices { peripheral, filter } => {
                self.discover_services(&peripheral, &filter).await
            }
            AdapterCommand::DiscoverCharacteristics { service, filter } => {
                self.discover_characteristics(&service, &filter).await
            }
            AdapterCommand::ReadValue(characteristic) => self.read_value(&characteristic).await,
            AdapterCommand::SetNotify {
                characteristic,
                enabled,
            } => self.set_notify(&characteristic, enabled).await,
        }
    }
}

/// Producer of adapter events.
///
/// `next_event` is always polled to completion, so implementations may
/// await freely between taking an event off their source and returning it.
#[async_trait]
pub trait EventSource: Send + 'static {
    /// Next adapter event. `None` once the adapter is gone.
    async fn next_event(&mut self) -> Option<Event>;
}

#[async_trait]
impl EventSource for UnboundedReceiver<Event> {
    async fn next_event(&mut self) -> Option<Event> {
        self.recv().await
    }
}

/// Aborts the wrapped task when dropped.
struct TaskGuard(JoinHandle<()>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Drive `session` until `events` stops producing events.
///
/// Adapter events are pumped into a channel by their own task and merged
/// with host events, so neither side is lost when the other arrives first.
/// Commands are issued in the order the session returns them. The first
/// failing command drops the rest of its batch and is fed back to the
/// session as [`Event::Error`].
pub async fn run_session<A: CentralAdapter, E: EventSource>(
    session: &mut Session,
    adapter: &mut A,
    events: E,
    mut host: UnboundedReceiver<Event>,
) {
    let (adapter_tx, mut adapter_rx) = mpsc::unbounded_channel();
    let _pump = TaskGuard(tokio::spawn(async move {
        let mut events = events;
        while let Some(event) = events.next_event().await {
            if adapter_tx.send(event).is_err() {
                break;
            }
        }
    }));

    let mut host_open = true;
    loop {
        let event = tokio::select! {
            ev = adapter_rx.recv() => match ev {
                Some(x) => x,
                None => {
                    info!("Adapter event stream ended.");
                    return;
                }
            },
            ev = host.recv(), if host_open => match ev {
                Some(x) => x,
                None => {
                    debug!("Host event channel closed.");
                    host_open = false;
                    continue;
                }
            },
        };

        let mut pending = VecDeque::from([event]);
        while let Some(event) = pending.pop_front() {
            for command in session.handle(event) {
                trace!("Adapter command: {:?}", command);
                if let Err(e) = adapter.execute(command).await {
                    warn!("Adapter command failed: {}", e);
                    pending.push_back(Event::Error(e.to_string()));
                    break;
                }
            }
        }
    }
}
