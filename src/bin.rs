/*
 * SPDX-FileCopyrightText: 2022 perillamint
 *
 * SPDX-License-Identifier: MPL-2.0
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use purchase_bridge::transport::ble::PurchaseScanner;
use purchase_bridge::{run_session, BridgeError, Event, Presenter, Session, SessionConfig};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use clap::Parser;

#[macro_use]
extern crate lazy_static;

#[derive(clap::Parser)]
#[clap(about, version, author)]
struct Args {
    /// Bluetooth adapter index
    #[clap(long, short = 'a', default_value_t = 0)]
    adapter: usize,
    /// Seconds a purchase result stays on the status line
    #[clap(long, short = 'r', value_name = "SECONDS", default_value_t = 10)]
    revert_delay: u64,
}

lazy_static! {
    static ref ARGS: Args = Args::parse();
}

/// Prints the status line and notifications to stdout.
#[derive(Default)]
struct ConsolePresenter {
    status: Mutex<Option<String>>,
}

impl Presenter for ConsolePresenter {
    fn set_status(&self, text: Option<&str>) {
        if let Ok(mut status) = self.status.lock() {
            *status = text.map(str::to_string);
        }
        println!("[status] {}", text.unwrap_or(""));
    }

    fn status(&self) -> Option<String> {
        self.status.lock().ok().and_then(|s| s.clone())
    }

    fn notify_user(&self, title: &str, body: &str) {
        println!("[{}] {}", title, body);
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();
    if let Err(e) = run().await {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), BridgeError> {
    let config = SessionConfig::default()
        .with_adapter(ARGS.adapter)
        .with_revert_delay(Duration::from_secs(ARGS.revert_delay));

    let scanner = PurchaseScanner::new().await?;
    let adapters = scanner.adapter_names().await?;
    println!("{:?}", adapters);
    let (mut adapter, events) = scanner.open(config.adapter_index).await?;

    let presenter: Arc<dyn Presenter> = Arc::new(ConsolePresenter::default());
    let mut session = Session::new(&config, presenter);

    // Enter on stdin plays the part of the app returning to the foreground.
    let (host_tx, host_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(_)) = lines.next_line().await {
            if host_tx.send(Event::Resume).is_err() {
                break;
            }
        }
    });

    tokio::select! {
        _ = run_session(&mut session, &mut adapter, events, host_rx) => {}
        _ = tokio::signal::ctrl_c() => {}
    }
    Ok(())
}
