/*
 * SPDX-FileCopyrightText: 2022 perillamint
 *
 * SPDX-License-Identifier: MPL-2.0
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! BLE central client for the purchase module.
//!
//! Scans for a peripheral advertising the purchase service, subscribes to
//! its read characteristic and turns notifications into purchase outcomes.

pub mod codec;
pub mod config;
pub mod consts;
pub mod dispatcher;
pub mod error;
pub mod presenter;
pub mod session;
pub mod transport;

pub use codec::ReadResult;
pub use config::SessionConfig;
pub use dispatcher::{PurchaseOutcome, ResultDispatcher};
pub use error::BridgeError;
pub use presenter::Presenter;
pub use session::{ConnectionState, Session};
pub use transport::{run_session, AdapterCommand, CentralAdapter, Event, EventSource};
