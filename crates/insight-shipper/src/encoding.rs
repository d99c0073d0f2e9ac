// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Decoding of captured line bytes into line text.
//!
//! The default decoder is single-byte ASCII: every byte above 0x7F becomes
//! U+FFFD. The transport encodes the text as UTF-8, so non-ASCII output is
//! mangled on the way to the ingestion endpoint. This is a known defect kept for
//! compatibility with existing consumers; `Utf8` is available as an opt-in.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use crate::error::ShipError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LineEncoding {
    #[default]
    Ascii,
    Utf8,
}

impl LineEncoding {
    /// Decodes the bytes of one line. Never fails; undecodable bytes are replaced.
    #[must_use]
    pub fn decode<'a>(&self, bytes: &'a [u8]) -> Cow<'a, str> {
        match self {
            Self::Ascii => {
                if bytes.is_ascii() {
                    // ASCII is valid UTF-8
                    String::from_utf8_lossy(bytes)
                } else {
                    Cow::Owned(
                        bytes
                            .iter()
                            .map(|&b| {
                                if b.is_ascii() {
                                    char::from(b)
                                } else {
                                    char::REPLACEMENT_CHARACTER
                                }
                            })
                            .collect(),
                    )
                }
            }
            Self::Utf8 => String::from_utf8_lossy(bytes),
        }
    }
}

impl FromStr for LineEncoding {
    type Err = ShipError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ascii" => Ok(Self::Ascii),
            "utf8" | "utf-8" => Ok(Self::Utf8),
            other => Err(ShipError::InvalidConfig(format!(
                "Unknown line encoding '{other}'. Must be one of: ascii, utf8"
            ))),
        }
    }
}

impl fmt::Display for LineEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ascii => write!(f, "ascii"),
            Self::Utf8 => write!(f, "utf8"),
        }
    }
}
