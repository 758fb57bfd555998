/*
 * SPDX-FileCopyrightText: 2022 perillamint
 *
 * SPDX-License-Identifier: MPL-2.0
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::consts::DEFAULT_REVERT_DELAY;
use std::time::Duration;

/// Session tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Index into the host's adapter list.
    pub adapter_index: usize,
    /// How long a purchase result stays on the status line.
    pub revert_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            adapter_index: 0,
            revert_delay: DEFAULT_REVERT_DELAY,
        }
    }
}

impl SessionConfig {
    pub fn with_adapter(mut self, idx: usize) -> Self {
        self.adapter_index = idx;
        self
    }

    pub fn with_revert_delay(mut self, delay: Duration) -> Self {
        self.revert_delay = delay;
        self
    }
}
