/*
 * SPDX-FileCopyrightText: 2022 perillamint
 *
 * SPDX-License-Identifier: MPL-2.0
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use super::{CentralAdapter, CharacteristicHandle, Event, PeripheralHandle, ServiceHandle};
use crate::error::BridgeError;
use async_lock::Mutex;
use async_stream::stream;
use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, Service,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use log::{debug, info, trace};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use uuid::Uuid;

type PeripheralMap = Arc<Mutex<HashMap<PeripheralHandle, Peripheral>>>;

fn bt_failure(e: btleplug::Error) -> BridgeError {
    BridgeError::BTFailure(e.to_string())
}

fn adapter_failure(e: btleplug::Error) -> BridgeError {
    BridgeError::BTAdapterError(e.to_string())
}

/// Take the adapter at `idx` out of the host's list.
fn pick<T>(mut adapters: Vec<T>, idx: usize) -> Result<T, BridgeError> {
    if idx < adapters.len() {
        Ok(adapters.swap_remove(idx))
    } else {
        Err(BridgeError::OutOfBounds)
    }
}

/// Handles for the services in `filter`, in the order `services` yields them.
fn matching_services(
    handle: &PeripheralHandle,
    services: impl IntoIterator<Item = Service>,
    filter: &[Uuid],
) -> Vec<ServiceHandle> {
    services
        .into_iter()
        .filter(|s| filter.contains(&s.uuid))
        .map(|s| ServiceHandle {
            peripheral: handle.clone(),
            uuid: s.uuid,
        })
        .collect()
}

/// Host Bluetooth adapters available to the central.
pub struct PurchaseScanner {
    bt_adapters: Vec<Adapter>,
}

impl PurchaseScanner {
    pub async fn new() -> Result<Self, BridgeError> {
        let manager = Manager::new().await.map_err(bt_failure)?;
        let bt_adapters = manager.adapters().await.map_err(adapter_failure)?;
        if bt_adapters.is_empty() {
            return Err(BridgeError::BTAdapterError(
                "no Bluetooth adapter present".to_string(),
            ));
        }
        Ok(Self { bt_adapters })
    }

    /// Describe each adapter, in index order.
    pub async fn adapter_names(&self) -> Result<Vec<String>, BridgeError> {
        let mut names = Vec::with_capacity(self.bt_adapters.len());
        for adapter in &self.bt_adapters {
            names.push(adapter.adapter_info().await.map_err(adapter_failure)?);
        }
        Ok(names)
    }

    /// Open adapter `idx` as a session backend together with its event feed.
    pub async fn open(
        self,
        idx: usize,
    ) -> Result<(BTLEAdapter, UnboundedReceiver<Event>), BridgeError> {
        BTLEAdapter::new(pick(self.bt_adapters, idx)?).await
    }
}

/// Forward every item of `events` to `tx` until either side ends.
fn forward<S>(events: S, tx: UnboundedSender<Event>) -> JoinHandle<()>
where
    S: Stream<Item = Event> + Send + 'static,
{
    tokio::spawn(async move {
        let mut events = Box::pin(events);
        while let Some(event) = events.next().await {
            if tx.send(event).is_err() {
                break;
            }
        }
    })
}

async fn remember(
    adapter: &Adapter,
    peripherals: &PeripheralMap,
    id: &PeripheralId,
) -> Option<(PeripheralHandle, Peripheral)> {
    let peripheral = adapter.peripheral(id).await.ok()?;
    let handle = PeripheralHandle(id.to_string());
    peripherals
        .lock()
        .await
        .insert(handle.clone(), peripheral.clone());
    Some((handle, peripheral))
}

async fn translate(
    adapter: &Adapter,
    peripherals: &PeripheralMap,
    event: CentralEvent,
) -> Option<Event> {
    match event {
        CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
            let (handle, peripheral) = remember(adapter, peripherals, &id).await?;
            let props = peripheral.properties().await.ok()??;
            Some(Event::Discovered {
                peripheral: handle,
                advertised: props.services,
            })
        }
        CentralEvent::ServicesAdvertisement { id, services } => {
            let (handle, _) = remember(adapter, peripherals, &id).await?;
            Some(Event::Discovered {
                peripheral: handle,
                advertised: services,
            })
        }
        CentralEvent::DeviceDisconnected(id) => Some(Event::Disconnected {
            peripheral: PeripheralHandle(id.to_string()),
            error: None,
        }),
        other => {
            trace!("Unhandled central event: {:?}", other);
            None
        }
    }
}

/// btleplug backed central.
///
/// Stack events and command results share one channel, handed out by
/// [`BTLEAdapter::new`], so they reach the session in the order they
/// happened.
pub struct BTLEAdapter {
    adapter: Adapter,
    events_tx: UnboundedSender<Event>,
    peripherals: PeripheralMap,
    characteristics: HashMap<CharacteristicHandle, Characteristic>,
    central_task: JoinHandle<()>,
    notify_task: Option<JoinHandle<()>>,
}

impl BTLEAdapter {
    pub async fn new(adapter: Adapter) -> Result<(Self, UnboundedReceiver<Event>), BridgeError> {
        let mut central = adapter.events().await.map_err(bt_failure)?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        // Manager handed us a usable adapter.
        let _ = events_tx.send(Event::AdapterReady);

        let peripherals: PeripheralMap = Arc::new(Mutex::new(HashMap::new()));
        let translated = {
            let adapter = adapter.clone();
            let peripherals = Arc::clone(&peripherals);
            stream! {
                while let Some(event) = central.next().await {
                    if let Some(event) = translate(&adapter, &peripherals, event).await {
                        yield event;
                    }
                }
                debug!("Central event stream ended.");
            }
        };
        let central_task = forward(translated, events_tx.clone());

        Ok((
            Self {
                adapter,
                events_tx,
                peripherals,
                characteristics: HashMap::new(),
                central_task,
                notify_task: None,
            },
            events_rx,
        ))
    }

    fn emit(&self, event: Event) {
        if self.events_tx.send(event).is_err() {
            debug!("Event receiver dropped.");
        }
    }

    async fn peripheral(&self, handle: &PeripheralHandle) -> Result<Peripheral, BridgeError> {
        self.peripherals
            .lock()
            .await
            .get(handle)
            .cloned()
            .ok_or_else(|| BridgeError::BTUnknownPeripheral(handle.to_string()))
    }

    fn characteristic(&self, handle: &CharacteristicHandle) -> Result<Characteristic, BridgeError> {
        self.characteristics
            .get(handle)
            .cloned()
            .ok_or_else(|| BridgeError::BTUnknownHandle(handle.uuid.to_string()))
    }

    fn stop_notifications(&mut self) {
        if let Some(task) = self.notify_task.take() {
            task.abort();
        }
    }
}

impl Drop for BTLEAdapter {
    fn drop(&mut self) {
        self.central_task.abort();
        self.stop_notifications();
    }
}

#[async_trait]
impl CentralAdapter for BTLEAdapter {
    async fn start_scan(&mut self) -> Result<(), BridgeError> {
        debug!("Starting scan");
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(bt_failure)
    }

    async fn stop_scan(&mut self) -> Result<(), BridgeError> {
        debug!("Stopping scan");
        self.adapter.stop_scan().await.map_err(bt_failure)
    }

    async fn connect(&mut self, handle: &PeripheralHandle) -> Result<(), BridgeError> {
        let peripheral = self.peripheral(handle).await?;
        match peripheral.connect().await {
            Ok(()) => {
                info!("Connected to {}", handle);
                self.emit(Event::Connected(handle.clone()));
            }
            Err(e) => self.emit(Event::ConnectFailed {
                peripheral: handle.clone(),
                error: e.to_string(),
            }),
        }
        Ok(())
    }

    /// Discover services and report those in `filter`.
    ///
    /// btleplug keeps services in a `BTreeSet`, so the reported order is
    /// UUID order rather than the order the peripheral declared them.
    async fn discover_services(
        &mut self,
        handle: &PeripheralHandle,
        filter: &[Uuid],
    ) -> Result<(), BridgeError> {
        let peripheral = self.peripheral(handle).await?;
        peripheral.discover_services().await.map_err(bt_failure)?;

        let services = matching_services(handle, peripheral.services(), filter);
        self.emit(Event::ServicesFound {
            peripheral: handle.clone(),
            services,
        });
        Ok(())
    }

    /// Report the characteristics of `service` that are in `filter`.
    ///
    /// Like services, characteristics come out of a `BTreeSet` and are
    /// reported in `Characteristic` ordering, not declaration order.
    async fn discover_characteristics(
        &mut self,
        service: &ServiceHandle,
        filter: &[Uuid],
    ) -> Result<(), BridgeError> {
        let peripheral = self.peripheral(&service.peripheral).await?;
        let found = peripheral
            .services()
            .into_iter()
            .find(|s| s.uuid == service.uuid)
            .ok_or_else(|| BridgeError::BTUnknownHandle(service.uuid.to_string()))?;

        let mut characteristics = vec![];
        for c in found.characteristics {
            if !filter.contains(&c.uuid) {
                continue;
            }
            let handle = CharacteristicHandle {
                service: service.clone(),
                uuid: c.uuid,
            };
            self.characteristics.insert(handle.clone(), c);
            characteristics.push(handle);
        }
        self.emit(Event::CharacteristicsFound {
            service: service.clone(),
            characteristics,
        });
        Ok(())
    }

    async fn read_value(&mut self, handle: &CharacteristicHandle) -> Result<(), BridgeError> {
        let characteristic = self.characteristic(handle)?;
        let peripheral = self.peripheral(&handle.service.peripheral).await?;

        let event = match peripheral.read(&characteristic).await {
            Ok(value) => Event::ValueUpdated {
                characteristic: handle.clone(),
                value: Bytes::from(value),
                error: None,
            },
            Err(e) => Event::ValueUpdated {
                characteristic: handle.clone(),
                value: Bytes::new(),
                error: Some(e.to_string()),
            },
        };
        self.emit(event);
        Ok(())
    }

    async fn set_notify(
        &mut self,
        handle: &CharacteristicHandle,
        enabled: bool,
    ) -> Result<(), BridgeError> {
        let characteristic = self.characteristic(handle)?;
        let peripheral = self.peripheral(&handle.service.peripheral).await?;
        self.stop_notifications();

        if !enabled {
            return peripheral
                .unsubscribe(&characteristic)
                .await
                .map_err(bt_failure);
        }

        peripheral
            .subscribe(&characteristic)
            .await
            .map_err(bt_failure)?;
        let mut values = peripheral.notifications().await.map_err(bt_failure)?;
        let handle = handle.clone();
        let updates = stream! {
            while let Some(notif) = values.next().await {
                if notif.uuid != handle.uuid {
                    continue;
                }
                yield Event::ValueUpdated {
                    characteristic: handle.clone(),
                    value: Bytes::from(notif.value),
                    error: None,
                };
            }
        };
        self.notify_task = Some(forward(updates, self.events_tx.clone()));
        Ok(())
    }
}
