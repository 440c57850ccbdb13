// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Types shared between the IPA rule engine, the ioctl layer, and
//! administrative tooling.

#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

pub mod attrib;
pub mod client;
pub mod cmd;
pub mod eq;
pub mod hw;
pub mod mac;
pub mod rule;
pub mod stat;

pub use attrib::*;
pub use client::*;
pub use cmd::*;
pub use eq::*;
pub use hw::*;
pub use mac::*;
pub use rule::*;
pub use stat::*;

/// Name of the routing table the driver installs for each IP family.
pub const DFLT_RT_TBL_NAME: &str = "ipa_dflt_rt";

/// Maximum length of a resource name, including the trailing NUL.
pub const RESOURCE_NAME_MAX: usize = 32;

/// Address family of a rule table.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum IpType {
    V4 = 0,
    V6 = 1,
}

impl IpType {
    pub const fn to_raw(self) -> u32 {
        self as u32
    }

    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::V4),
            1 => Some(Self::V6),
            _ => None,
        }
    }
}

impl core::str::FromStr for IpType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "v4" | "ipv4" | "4" => Ok(IpType::V4),
            "v6" | "ipv6" | "6" => Ok(IpType::V6),
            _ => Err(format!("invalid ip type: {s}")),
        }
    }
}

impl Display for IpType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            IpType::V4 => "IPv4",
            IpType::V6 => "IPv6",
        };

        write!(f, "{s}")
    }
}

/// Which of the two rule subsystems a rule or table belongs to.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub enum RuleKind {
    Filter,
    Routing,
}

impl Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            RuleKind::Filter => "FLT",
            RuleKind::Routing => "RT",
        };

        write!(f, "{s}")
    }
}

/// Copy `name` into a fixed, NUL-terminated resource name buffer.
///
/// Returns `None` if the name (plus its terminator) does not fit or
/// contains an interior NUL.
pub fn resource_name(name: &str) -> Option<[u8; RESOURCE_NAME_MAX]> {
    let bytes = name.as_bytes();
    if bytes.len() >= RESOURCE_NAME_MAX || bytes.contains(&0) {
        return None;
    }

    let mut buf = [0u8; RESOURCE_NAME_MAX];
    buf[..bytes.len()].copy_from_slice(bytes);
    Some(buf)
}
