/*
 * SPDX-FileCopyrightText: 2022 perillamint
 *
 * SPDX-License-Identifier: MPL-2.0
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum BridgeError {
    #[error("Failed to fetch adapter list: {0}")]
    BTAdapterError(String),
    #[error("Generic BT error: {0}")]
    BTFailure(String),
    #[error("Unknown peripheral handle: {0}")]
    BTUnknownPeripheral(String),
    #[error("Unknown GATT handle: {0}")]
    BTUnknownHandle(String),
    #[error("Index out of bounds.")]
    OutOfBounds,
}
