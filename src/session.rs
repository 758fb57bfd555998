/*
 * SPDX-FileCopyrightText: 2022 perillamint
 *
 * SPDX-License-Identifier: MPL-2.0
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Central role connection state machine.
//!
//! ```text
//!  Idle ──ready──▶ Scanning ──match──▶ Connecting ──connected──▶ DiscoveringService
//!                                          │                          │ services
//!                                       failed                        ▼
//!                                          ▼              DiscoveringCharacteristic
//!                                        Failed                       │ characteristics
//!                                                                     ▼
//!                                                                Subscribed ◀─┐
//!                                                                     └─value─┘
//! ```
//!
//! Disconnects and command errors move any state to `Failed`. Missing
//! services or characteristics park the session where it is.

use crate::codec::ReadResult;
use crate::config::SessionConfig;
use crate::consts::{
    BLE_READ_CHARACTERISTIC_UUID, BLE_SERVICE_UUID, STATUS_CONNECTED, STATUS_CONNECTING,
    STATUS_CONNECT_FAILED, STATUS_DISCONNECTED, STATUS_SCANNING,
};
use crate::dispatcher::{PurchaseOutcome, ResultDispatcher};
use crate::presenter::Presenter;
use crate::transport::{
    AdapterCommand, CharacteristicHandle, Event, PeripheralHandle, ServiceHandle,
};
use log::{debug, info, trace, warn};
use pretty_hex::*;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Scanning,
    Connecting,
    Connected,
    DiscoveringService,
    DiscoveringCharacteristic,
    Subscribed,
    Failed,
}

/// One central session against the purchase module.
///
/// Owns all mutable session state; the event loop hands it events one at a
/// time through [`Session::handle`].
pub struct Session {
    state: ConnectionState,
    peripheral: Option<PeripheralHandle>,
    service: Option<ServiceHandle>,
    characteristic: Option<CharacteristicHandle>,
    presenter: Arc<dyn Presenter>,
    dispatcher: ResultDispatcher,
    last_outcome: Option<PurchaseOutcome>,
}

impl Session {
    pub fn new(config: &SessionConfig, presenter: Arc<dyn Presenter>) -> Self {
        Self {
            state: ConnectionState::Idle,
            peripheral: None,
            service: None,
            characteristic: None,
            dispatcher: ResultDispatcher::new(Arc::clone(&presenter), config.revert_delay),
            presenter,
            last_outcome: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn peripheral(&self) -> Option<&PeripheralHandle> {
        self.peripheral.as_ref()
    }

    /// Outcome of the most recent value update.
    pub fn last_outcome(&self) -> Option<&PurchaseOutcome> {
        self.last_outcome.as_ref()
    }

    /// Forget the peripheral and start over from `Idle`.
    pub fn reset(&mut self) {
        self.peripheral = None;
        self.service = None;
        self.characteristic = None;
        self.set_state(ConnectionState::Idle);
    }

    /// Apply one event and return the commands to issue, in order.
    pub fn handle(&mut self, event: Event) -> Vec<AdapterCommand> {
        match event {
            Event::AdapterReady => self.on_adapter_ready(),
            Event::Discovered {
                peripheral,
                advertised,
            } => self.on_discovered(peripheral, &advertised),
            Event::Connected(peripheral) => self.on_connected(peripheral),
            Event::ConnectFailed { peripheral, error } => {
                self.on_connect_failed(&peripheral, &error);
                vec![]
            }
            Event::ServicesFound {
                peripheral,
                services,
            } => self.on_services_found(&peripheral, services),
            Event::CharacteristicsFound {
                service,
                characteristics,
            } => self.on_characteristics_found(&service, characteristics),
            Event::ValueUpdated {
                characteristic,
                value,
                error,
            } => {
                self.on_value_updated(&characteristic, &value, error);
                vec![]
            }
            Event::Disconnected { peripheral, error } => {
                self.on_disconnected(&peripheral, error);
                vec![]
            }
            Event::Error(error) => {
                warn!("Session error in {:?}: {}", self.state, error);
                self.presenter
                    .set_status(Some(&format!("Bluetooth error: {}", error)));
                self.set_state(ConnectionState::Failed);
                vec![]
            }
            Event::Resume => self.on_resume(),
        }
    }

    fn set_state(&mut self, next: ConnectionState) {
        if self.state != next {
            info!("Session state: {:?} -> {:?}", self.state, next);
        }
        self.state = next;
    }

    fn is_current(&self, peripheral: &PeripheralHandle) -> bool {
        self.peripheral.as_ref() == Some(peripheral)
    }

    fn ignore(&self, what: &str) -> Vec<AdapterCommand> {
        debug!("Ignoring {} in {:?}", what, self.state);
        vec![]
    }

    fn on_adapter_ready(&mut self) -> Vec<AdapterCommand> {
        if self.state != ConnectionState::Idle {
            return self.ignore("adapter ready");
        }
        self.presenter.set_status(Some(STATUS_SCANNING));
        self.set_state(ConnectionState::Scanning);
        vec![AdapterCommand::StartScan]
    }

    fn on_discovered(
        &mut self,
        peripheral: PeripheralHandle,
        advertised: &[uuid::Uuid],
    ) -> Vec<AdapterCommand> {
        if self.state != ConnectionState::Scanning {
            return self.ignore("discovery");
        }
        if !advertised.contains(&BLE_SERVICE_UUID) {
            trace!("{} does not advertise the purchase service", peripheral);
            return vec![];
        }

        info!("Found purchase module {}", peripheral);
        self.peripheral = Some(peripheral.clone());
        self.service = None;
        self.characteristic = None;
        self.presenter.set_status(Some(STATUS_CONNECTING));
        self.set_state(ConnectionState::Connecting);
        vec![
            AdapterCommand::StopScan,
            AdapterCommand::Connect(peripheral),
        ]
    }

    fn on_connected(&mut self, peripheral: PeripheralHandle) -> Vec<AdapterCommand> {
        if self.state != ConnectionState::Connecting || !self.is_current(&peripheral) {
            return self.ignore("connect");
        }
        self.set_state(ConnectionState::Connected);
        self.set_state(ConnectionState::DiscoveringService);
        vec![AdapterCommand::DiscoverServices {
            peripheral,
            filter: vec![BLE_SERVICE_UUID],
        }]
    }

    fn on_connect_failed(&mut self, peripheral: &PeripheralHandle, error: &str) {
        if self.state != ConnectionState::Connecting || !self.is_current(peripheral) {
            self.ignore("connect failure");
            return;
        }
        warn!("Failed to connect to {}: {}", peripheral, error);
        self.presenter.set_status(Some(STATUS_CONNECT_FAILED));
        self.set_state(ConnectionState::Failed);
    }

    fn on_services_found(
        &mut self,
        peripheral: &PeripheralHandle,
        services: Vec<ServiceHandle>,
    ) -> Vec<AdapterCommand> {
        if self.state != ConnectionState::DiscoveringService || !self.is_current(peripheral) {
            return self.ignore("services");
        }
        let service = match services.into_iter().find(|s| s.uuid == BLE_SERVICE_UUID) {
            Some(x) => x,
            None => {
                warn!("{} has no purchase service, waiting.", peripheral);
                return vec![];
            }
        };

        self.service = Some(service.clone());
        self.set_state(ConnectionState::DiscoveringCharacteristic);
        vec![AdapterCommand::DiscoverCharacteristics {
            service,
            filter: vec![BLE_READ_CHARACTERISTIC_UUID],
        }]
    }

    fn on_characteristics_found(
        &mut self,
        service: &ServiceHandle,
        characteristics: Vec<CharacteristicHandle>,
    ) -> Vec<AdapterCommand> {
        if self.state != ConnectionState::DiscoveringCharacteristic
            || self.service.as_ref() != Some(service)
        {
            return self.ignore("characteristics");
        }
        let characteristic = match characteristics
            .into_iter()
            .find(|c| c.uuid == BLE_READ_CHARACTERISTIC_UUID)
        {
            Some(x) => x,
            None => {
                warn!("Purchase service has no read characteristic, waiting.");
                return vec![];
            }
        };

        self.characteristic = Some(characteristic.clone());
        self.presenter.set_status(Some(STATUS_CONNECTED));
        self.set_state(ConnectionState::Subscribed);
        vec![
            AdapterCommand::ReadValue(characteristic.clone()),
            AdapterCommand::SetNotify {
                characteristic,
                enabled: true,
            },
        ]
    }

    fn on_value_updated(
        &mut self,
        characteristic: &CharacteristicHandle,
        value: &[u8],
        error: Option<String>,
    ) {
        if self.state != ConnectionState::Subscribed
            || self.characteristic.as_ref() != Some(characteristic)
        {
            self.ignore("value update");
            return;
        }
        if let Some(e) = error {
            warn!("Value update carried an error: {}", e);
            return;
        }

        trace!("BTLE RX: {:?}", value.hex_dump());
        let result = ReadResult::decode(value);
        let text = result.text();
        if text.is_none() {
            debug!("Undecodable purchase payload {}", result.hex());
        }
        self.last_outcome = Some(self.dispatcher.dispatch(text.as_deref()));
    }

    fn on_disconnected(&mut self, peripheral: &PeripheralHandle, error: Option<String>) {
        if !self.is_current(peripheral) {
            self.ignore("disconnect");
            return;
        }
        warn!(
            "{} disconnected: {}",
            peripheral,
            error.as_deref().unwrap_or("no reason given")
        );
        self.presenter.set_status(Some(STATUS_DISCONNECTED));
        self.set_state(ConnectionState::Failed);
    }

    fn on_resume(&mut self) -> Vec<AdapterCommand> {
        if self.peripheral.is_none() {
            return self.ignore("resume");
        }
        // Scans again even when subscribed. Only a finished session
        // goes back to Scanning.
        if matches!(self.state, ConnectionState::Idle | ConnectionState::Failed) {
            self.presenter.set_status(Some(STATUS_SCANNING));
            self.set_state(ConnectionState::Scanning);
        }
        vec![AdapterCommand::StartScan]
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::consts::{BLE_WRITE_CHARACTERISTIC_UUID, MESSAGE_SUCCESS};
    use crate::presenter::recording::RecordingPresenter;
    use bytes::Bytes;
    use uuid::Uuid;

    fn module() -> PeripheralHandle {
        PeripheralHandle("AA:BB:CC:DD:EE:FF".to_string())
    }

    fn service(uuid: Uuid) -> ServiceHandle {
        ServiceHandle {
            peripheral: module(),
            uuid,
        }
    }

    fn read_char() -> CharacteristicHandle {
        CharacteristicHandle {
            service: service(BLE_SERVICE_UUID),
            uuid: BLE_READ_CHARACTERISTIC_UUID,
        }
    }

    fn success_frame() -> Bytes {
        let mut frame = vec![0u8; 4];
        frame.extend_from_slice(b"success\0");
        frame.extend_from_slice(&[0x01, 0x02]);
        Bytes::from(frame)
    }

    fn new_session() -> (Arc<RecordingPresenter>, Session) {
        let presenter = Arc::new(RecordingPresenter::default());
        let session = Session::new(&SessionConfig::default(), presenter.clone());
        (presenter, session)
    }

    fn scanning_session() -> (Arc<RecordingPresenter>, Session) {
        let (presenter, mut session) = new_session();
        assert_eq!(
            session.handle(Event::AdapterReady),
            vec![AdapterCommand::StartScan]
        );
        (presenter, session)
    }

    fn subscribed_session() -> (Arc<RecordingPresenter>, Session) {
        let (presenter, mut session) = scanning_session();
        session.handle(Event::Discovered {
            peripheral: module(),
            advertised: vec![BLE_SERVICE_UUID],
        });
        session.handle(Event::Connected(module()));
        session.handle(Event::ServicesFound {
            peripheral: module(),
            services: vec![service(BLE_SERVICE_UUID)],
        });
        session.handle(Event::CharacteristicsFound {
            service: service(BLE_SERVICE_UUID),
            characteristics: vec![read_char()],
        });
        assert_eq!(session.state(), ConnectionState::Subscribed);
        (presenter, session)
    }

    #[test]
    fn adapter_ready_starts_scan() {
        let (presenter, session) = scanning_session();
        assert_eq!(session.state(), ConnectionState::Scanning);
        assert_eq!(presenter.current().as_deref(), Some(STATUS_SCANNING));
    }

    #[test]
    fn ignores_peripheral_without_service() {
        let (_, mut session) = scanning_session();
        let commands = session.handle(Event::Discovered {
            peripheral: module(),
            advertised: vec![BLE_WRITE_CHARACTERISTIC_UUID],
        });
        assert!(commands.is_empty());
        assert_eq!(session.state(), ConnectionState::Scanning);
        assert_eq!(session.peripheral(), None);
    }

    #[test]
    fn connects_to_matching_peripheral() {
        let (presenter, mut session) = scanning_session();
        let commands = session.handle(Event::Discovered {
            peripheral: module(),
            advertised: vec![Uuid::nil(), BLE_SERVICE_UUID],
        });
        assert_eq!(
            commands,
            vec![
                AdapterCommand::StopScan,
                AdapterCommand::Connect(module())
            ]
        );
        assert_eq!(session.state(), ConnectionState::Connecting);
        assert_eq!(session.peripheral(), Some(&module()));
        assert_eq!(presenter.current().as_deref(), Some(STATUS_CONNECTING));
    }

    #[test]
    fn connect_failure_is_terminal() {
        let (presenter, mut session) = scanning_session();
        session.handle(Event::Discovered {
            peripheral: module(),
            advertised: vec![BLE_SERVICE_UUID],
        });
        let commands = session.handle(Event::ConnectFailed {
            peripheral: module(),
            error: "timeout".to_string(),
        });
        assert!(commands.is_empty());
        assert_eq!(session.state(), ConnectionState::Failed);
        assert_eq!(presenter.current().as_deref(), Some(STATUS_CONNECT_FAILED));

        // No automatic retry.
        assert!(session.handle(Event::Connected(module())).is_empty());
        assert_eq!(session.state(), ConnectionState::Failed);
    }

    #[test]
    fn full_discovery_sequence() {
        let (presenter, mut session) = scanning_session();
        session.handle(Event::Discovered {
            peripheral: module(),
            advertised: vec![BLE_SERVICE_UUID],
        });

        assert_eq!(
            session.handle(Event::Connected(module())),
            vec![AdapterCommand::DiscoverServices {
                peripheral: module(),
                filter: vec![BLE_SERVICE_UUID],
            }]
        );
        assert_eq!(session.state(), ConnectionState::DiscoveringService);

        assert_eq!(
            session.handle(Event::ServicesFound {
                peripheral: module(),
                services: vec![service(Uuid::nil()), service(BLE_SERVICE_UUID)],
            }),
            vec![AdapterCommand::DiscoverCharacteristics {
                service: service(BLE_SERVICE_UUID),
                filter: vec![BLE_READ_CHARACTERISTIC_UUID],
            }]
        );
        assert_eq!(session.state(), ConnectionState::DiscoveringCharacteristic);

        assert_eq!(
            session.handle(Event::CharacteristicsFound {
                service: service(BLE_SERVICE_UUID),
                characteristics: vec![read_char()],
            }),
            vec![
                AdapterCommand::ReadValue(read_char()),
                AdapterCommand::SetNotify {
                    characteristic: read_char(),
                    enabled: true,
                },
            ]
        );
        assert_eq!(session.state(), ConnectionState::Subscribed);
        assert_eq!(presenter.current().as_deref(), Some(STATUS_CONNECTED));
    }

    #[test]
    fn missing_service_stalls() {
        let (_, mut session) = scanning_session();
        session.handle(Event::Discovered {
            peripheral: module(),
            advertised: vec![BLE_SERVICE_UUID],
        });
        session.handle(Event::Connected(module()));
        let commands = session.handle(Event::ServicesFound {
            peripheral: module(),
            services: vec![service(Uuid::nil())],
        });
        assert!(commands.is_empty());
        assert_eq!(session.state(), ConnectionState::DiscoveringService);
    }

    #[test]
    fn missing_characteristic_stalls() {
        let (_, mut session) = scanning_session();
        session.handle(Event::Discovered {
            peripheral: module(),
            advertised: vec![BLE_SERVICE_UUID],
        });
        session.handle(Event::Connected(module()));
        session.handle(Event::ServicesFound {
            peripheral: module(),
            services: vec![service(BLE_SERVICE_UUID)],
        });
        let commands = session.handle(Event::CharacteristicsFound {
            service: service(BLE_SERVICE_UUID),
            characteristics: vec![CharacteristicHandle {
                service: service(BLE_SERVICE_UUID),
                uuid: BLE_WRITE_CHARACTERISTIC_UUID,
            }],
        });
        assert!(commands.is_empty());
        assert_eq!(session.state(), ConnectionState::DiscoveringCharacteristic);
    }

    #[tokio::test]
    async fn notification_dispatches_outcome() {
        let (presenter, mut session) = subscribed_session();
        let commands = session.handle(Event::ValueUpdated {
            characteristic: read_char(),
            value: success_frame(),
            error: None,
        });
        assert!(commands.is_empty());
        assert_eq!(session.state(), ConnectionState::Subscribed);
        assert_eq!(session.last_outcome(), Some(&PurchaseOutcome::Success));
        assert_eq!(presenter.current().as_deref(), Some(MESSAGE_SUCCESS));
        assert_eq!(presenter.notification_count(), 1);
    }

    #[tokio::test]
    async fn malformed_notification_is_dropped() {
        let (presenter, mut session) = subscribed_session();
        session.handle(Event::ValueUpdated {
            characteristic: read_char(),
            value: Bytes::from_static(&[0x00, 0x00, 0x00, 0x00, 0xff, 0xff]),
            error: None,
        });
        assert_eq!(session.state(), ConnectionState::Subscribed);
        assert_eq!(session.last_outcome(), Some(&PurchaseOutcome::Unknown(None)));
        assert_eq!(presenter.notification_count(), 0);
        assert_eq!(presenter.current().as_deref(), Some(STATUS_CONNECTED));
    }

    #[tokio::test]
    async fn value_with_error_is_dropped() {
        let (presenter, mut session) = subscribed_session();
        session.handle(Event::ValueUpdated {
            characteristic: read_char(),
            value: success_frame(),
            error: Some("read not permitted".to_string()),
        });
        assert_eq!(session.last_outcome(), None);
        assert_eq!(presenter.notification_count(), 0);
    }

    #[test]
    fn disconnect_fails_session() {
        let (presenter, mut session) = subscribed_session();
        session.handle(Event::Disconnected {
            peripheral: module(),
            error: None,
        });
        assert_eq!(session.state(), ConnectionState::Failed);
        assert_eq!(presenter.current().as_deref(), Some(STATUS_DISCONNECTED));
    }

    #[test]
    fn disconnect_of_other_peripheral_is_ignored() {
        let (_, mut session) = subscribed_session();
        session.handle(Event::Disconnected {
            peripheral: PeripheralHandle("other".to_string()),
            error: None,
        });
        assert_eq!(session.state(), ConnectionState::Subscribed);
    }

    #[test]
    fn command_error_fails_session() {
        let (_, mut session) = scanning_session();
        assert!(session
            .handle(Event::Error("scan refused".to_string()))
            .is_empty());
        assert_eq!(session.state(), ConnectionState::Failed);
    }

    #[test]
    fn resume_without_peripheral_does_nothing() {
        let (_, mut session) = scanning_session();
        assert!(session.handle(Event::Resume).is_empty());
    }

    #[test]
    fn resume_rescans_after_failure() {
        let (_, mut session) = scanning_session();
        session.handle(Event::Discovered {
            peripheral: module(),
            advertised: vec![BLE_SERVICE_UUID],
        });
        session.handle(Event::ConnectFailed {
            peripheral: module(),
            error: "timeout".to_string(),
        });
        assert_eq!(
            session.handle(Event::Resume),
            vec![AdapterCommand::StartScan]
        );
        assert_eq!(session.state(), ConnectionState::Scanning);
    }

    #[test]
    fn resume_rescans_while_subscribed() {
        let (_, mut session) = subscribed_session();
        assert_eq!(
            session.handle(Event::Resume),
            vec![AdapterCommand::StartScan]
        );
        assert_eq!(session.state(), ConnectionState::Subscribed);
    }

    #[test]
    fn reset_returns_to_idle() {
        let (_, mut session) = subscribed_session();
        session.reset();
        assert_eq!(session.state(), ConnectionState::Idle);
        assert_eq!(session.peripheral(), None);
        assert_eq!(
            session.handle(Event::AdapterReady),
            vec![AdapterCommand::StartScan]
        );
    }
}
