/*
 * SPDX-FileCopyrightText: 2022 perillamint
 *
 * SPDX-License-Identifier: MPL-2.0
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::time::Duration;
use uuid::Uuid;

/// UUID template shared by every role of the purchase module.
/// The `XXXX` group is replaced with the role code.
pub const UUID_TEMPLATE: &str = "ada99a7f-888b-4e9f-XXXX-07ddc240f3ce";

/// Roles exposed by the purchase module's GATT table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BleModule {
    Service,
    Read,
    /// Declared by the peripheral, never used by the central.
    Write,
}

impl BleModule {
    /// 4 hex digit role code substituted into [`UUID_TEMPLATE`].
    pub fn code(&self) -> &'static str {
        match self {
            BleModule::Service => "8080",
            BleModule::Read => "8081",
            BleModule::Write => "8082",
        }
    }

    pub fn uuid_string(&self) -> String {
        UUID_TEMPLATE.replace("XXXX", self.code())
    }

    pub fn uuid(&self) -> Uuid {
        match self {
            BleModule::Service => BLE_SERVICE_UUID,
            BleModule::Read => BLE_READ_CHARACTERISTIC_UUID,
            BleModule::Write => BLE_WRITE_CHARACTERISTIC_UUID,
        }
    }
}

pub const BLE_SERVICE_UUID: Uuid = Uuid::from_u128(0xada99a7f_888b_4e9f_8080_07ddc240f3ce);
pub const BLE_READ_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xada99a7f_888b_4e9f_8081_07ddc240f3ce);
pub const BLE_WRITE_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xada99a7f_888b_4e9f_8082_07ddc240f3ce);

/// Hex character offset where the text field starts.
pub const TEXT_START: usize = 8;
/// Inclusive hex character offset where the text field ends.
/// 17 characters wide; the odd trailing nibble is dropped while decoding.
pub const TEXT_END_INCLUSIVE: usize = 24;
/// Hex character offset where the suffix starts.
pub const SUFFIX_START: usize = 24;

/// How long a purchase result stays on the status line.
pub const DEFAULT_REVERT_DELAY: Duration = Duration::from_secs(10);

pub const STATUS_SCANNING: &str = "Searching...";
pub const STATUS_CONNECTING: &str = "Connecting...";
pub const STATUS_CONNECT_FAILED: &str = "Failed to connect...";
pub const STATUS_CONNECTED: &str = "Connected";
pub const STATUS_DISCONNECTED: &str = "Disconnected";

pub const NOTIFICATION_TITLE: &str = "Purchase result";
pub const MESSAGE_SUCCESS: &str = "Instant purchase completed!";
pub const MESSAGE_FAILURE: &str = "Instant purchase failed...";
