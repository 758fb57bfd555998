/*
 * SPDX-FileCopyrightText: 2022 perillamint
 *
 * SPDX-License-Identifier: MPL-2.0
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

/// Presentation interface definition.
///
/// Receives status changes and purchase results. Called from the session
/// loop and from deferred revert timers, so implementations are shared
/// and use interior mutability.
pub trait Presenter: Send + Sync {
    /// Replace the status line.
    fn set_status(&self, text: Option<&str>);
    /// Current status line, captured before a result overwrites it.
    fn status(&self) -> Option<String>;
    /// Fire-and-forget user notification.
    fn notify_user(&self, title: &str, body: &str);
}
