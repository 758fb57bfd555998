/*
 * SPDX-FileCopyrightText: 2022 perillamint
 *
 * SPDX-License-Identifier: MPL-2.0
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::consts::{MESSAGE_FAILURE, MESSAGE_SUCCESS, NOTIFICATION_TITLE};
use crate::presenter::Presenter;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

/// Outcome of a purchase reported by the peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurchaseOutcome {
    Success,
    Failure,
    /// Missing or unrecognized text. Nothing is shown for these.
    Unknown(Option<String>),
}

impl PurchaseOutcome {
    pub fn from_text(text: Option<&str>) -> Self {
        match text {
            Some("success") => PurchaseOutcome::Success,
            Some("failure") => PurchaseOutcome::Failure,
            other => PurchaseOutcome::Unknown(other.map(str::to_string)),
        }
    }

    /// Human readable message, only for recognized outcomes.
    pub fn message(&self) -> Option<&'static str> {
        match self {
            PurchaseOutcome::Success => Some(MESSAGE_SUCCESS),
            PurchaseOutcome::Failure => Some(MESSAGE_FAILURE),
            PurchaseOutcome::Unknown(_) => None,
        }
    }
}

/// Forwards decoded purchase results to the presenter.
pub struct ResultDispatcher {
    presenter: Arc<dyn Presenter>,
    revert_delay: Duration,
}

impl ResultDispatcher {
    pub fn new(presenter: Arc<dyn Presenter>, revert_delay: Duration) -> Self {
        Self {
            presenter,
            revert_delay,
        }
    }

    /// Map decoded text to an outcome and present it.
    ///
    /// A recognized outcome sends a notification, replaces the status line
    /// and schedules a revert to the status captured here. Revert timers are
    /// never cancelled; overlapping results each restore their own capture.
    pub fn dispatch(&self, text: Option<&str>) -> PurchaseOutcome {
        let outcome = PurchaseOutcome::from_text(text);
        let message = match outcome.message() {
            Some(x) => x,
            None => {
                debug!("Ignoring purchase text {:?}", text);
                return outcome;
            }
        };

        info!("Purchase outcome: {:?}", outcome);
        let before = self.presenter.status();

        self.presenter.notify_user(NOTIFICATION_TITLE, message);
        self.presenter.set_status(Some(message));

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let presenter = Arc::clone(&self.presenter);
                let delay = self.revert_delay;
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    presenter.set_status(before.as_deref());
                });
            }
            Err(e) => warn!("No runtime for status revert: {}", e),
        }

        outcome
    }
}
