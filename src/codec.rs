/*
 * SPDX-FileCopyrightText: 2022 perillamint
 *
 * SPDX-License-Identifier: MPL-2.0
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::consts::{SUFFIX_START, TEXT_END_INCLUSIVE, TEXT_START};

/// Purchase module notification payload.
///
/// The payload is kept as its lowercase hex representation and every field
/// is sliced from it by hex character offset:
///
/// ```text
/// chars  0..8    prefix (4 bytes)
/// chars  8..=24  text   (hex pairs -> ASCII, NUL padding removed)
/// chars 24..     suffix
/// ```
///
/// Fields are computed on access. None of them panic on short input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResult {
    hex: String,
}

impl ReadResult {
    /// Decode a raw notification buffer.
    pub fn decode(data: &[u8]) -> Self {
        Self {
            hex: hex::encode(data),
        }
    }

    /// Full hex representation of the payload.
    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// First 4 bytes as 8 hex characters. Absent when the payload is shorter.
    pub fn prefix(&self) -> Option<&str> {
        self.hex.get(..TEXT_START)
    }

    /// Text carried by bytes 4 to 11.
    ///
    /// Absent when the payload has no room for the text field at all, or
    /// when the bytes are not valid UTF-8. A payload that ends inside the
    /// text field yields whatever pairs are available.
    pub fn text(&self) -> Option<String> {
        if self.hex.len() < TEXT_START {
            return None;
        }
        let end = (TEXT_END_INCLUSIVE + 1).min(self.hex.len());
        hex_to_ascii(&self.hex[TEXT_START..end])
    }

    /// Everything after byte 12 as hex characters.
    ///
    /// Unlike [`ReadResult::prefix`], a payload ending exactly at the
    /// boundary gives an empty string rather than `None`; only a shorter
    /// payload is absent.
    pub fn suffix(&self) -> Option<&str> {
        self.hex.get(SUFFIX_START..)
    }
}

/// Convert a run of hex digit pairs to text.
///
/// Pairs are taken from the start; a trailing unpaired digit is ignored.
/// Returns `None` on a non-hex digit or when the bytes are not UTF-8.
/// Embedded NUL characters are removed.
pub fn hex_to_ascii(hex_str: &str) -> Option<String> {
    let digits = hex_str.as_bytes();
    let paired = &digits[..digits.len() - digits.len() % 2];
    let bytes = hex::decode(paired).ok()?;
    let text = String::from_utf8(bytes).ok()?;
    Some(text.replace('\0', ""))
}
