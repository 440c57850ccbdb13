// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use crate::eq::IPFLTR_NUM_IHL_MEQ_32_EQNS;
use crate::eq::IPFLTR_NUM_IHL_RANGE_16_EQNS;
use crate::eq::IPFLTR_NUM_MEQ_32_EQNS;
use crate::eq::IPFLTR_NUM_MEQ_128_EQNS;
use core::fmt;
use core::fmt::Display;
use core::str::FromStr;
use serde::Deserialize;
use serde::Serialize;

/// IPA hardware revision, as reported by `GET_HW_VERSION`.
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
#[repr(u32)]
pub enum HwType {
    None = 0,
    V1_0 = 1,
    V1_1 = 2,
    V2_0 = 3,
    V2_1 = 4,
    V2_5 = 5,
    V2_6L = 6,
    V3_0 = 10,
    V3_1 = 11,
    V3_5 = 12,
    V3_5_1 = 13,
    V4_0 = 14,
    V4_1 = 15,
    V4_2 = 16,
    V4_5 = 17,
    V4_7 = 18,
    V4_9 = 19,
    V4_11 = 20,
    V5_0 = 21,
    V5_1 = 22,
    V5_2 = 23,
}

impl HwType {
    /// v2.6 hardware reports the same number as v2.5.
    pub const V2_6: HwType = HwType::V2_5;

    const ALL: &'static [HwType] = &[
        HwType::None,
        HwType::V1_0,
        HwType::V1_1,
        HwType::V2_0,
        HwType::V2_1,
        HwType::V2_5,
        HwType::V2_6L,
        HwType::V3_0,
        HwType::V3_1,
        HwType::V3_5,
        HwType::V3_5_1,
        HwType::V4_0,
        HwType::V4_1,
        HwType::V4_2,
        HwType::V4_5,
        HwType::V4_7,
        HwType::V4_9,
        HwType::V4_11,
        HwType::V5_0,
        HwType::V5_1,
        HwType::V5_2,
    ];

    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|hw| *hw as u32 == raw)
    }

    fn label(self) -> &'static str {
        match self {
            HwType::None => "none",
            HwType::V1_0 => "1.0",
            HwType::V1_1 => "1.1",
            HwType::V2_0 => "2.0",
            HwType::V2_1 => "2.1",
            HwType::V2_5 => "2.5",
            HwType::V2_6L => "2.6L",
            HwType::V3_0 => "3.0",
            HwType::V3_1 => "3.1",
            HwType::V3_5 => "3.5",
            HwType::V3_5_1 => "3.5.1",
            HwType::V4_0 => "4.0",
            HwType::V4_1 => "4.1",
            HwType::V4_2 => "4.2",
            HwType::V4_5 => "4.5",
            HwType::V4_7 => "4.7",
            HwType::V4_9 => "4.9",
            HwType::V4_11 => "4.11",
            HwType::V5_0 => "5.0",
            HwType::V5_1 => "5.1",
            HwType::V5_2 => "5.2",
        }
    }
}

impl FromStr for HwType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim_start_matches(['v', 'V']).replace('_', ".");
        if s == "2.6" {
            return Ok(HwType::V2_6);
        }

        Self::ALL
            .iter()
            .copied()
            .find(|hw| hw.label().eq_ignore_ascii_case(&s))
            .ok_or_else(|| format!("unknown hw type: {s}"))
    }
}

impl Display for HwType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// What the target hardware can express in equation form.
///
/// The slot counts never exceed the ABI array sizes; [`HwCaps::clamp`]
/// enforces that for descriptors that come from configuration.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct HwCaps {
    pub ihl_range16: u8,
    pub meq32: u8,
    pub meq128: u8,
    pub ihl_meq32: u8,
    pub ihl_eq16: bool,
    pub ihl_eq32: bool,
    pub metadata: bool,
    pub frag: bool,
    /// The hardware keeps a hashable (cached) table per family.
    pub hashable: bool,
    /// Pure-ACK detection reuses the TOS-equal flag.
    pub pure_ack: bool,
    /// Rules may name a flow statistics counter.
    pub stats: bool,
}

impl HwCaps {
    /// Every slot the ABI can carry, and every feature.
    pub const FULL: HwCaps = HwCaps {
        ihl_range16: IPFLTR_NUM_IHL_RANGE_16_EQNS as u8,
        meq32: IPFLTR_NUM_MEQ_32_EQNS as u8,
        meq128: IPFLTR_NUM_MEQ_128_EQNS as u8,
        ihl_meq32: IPFLTR_NUM_IHL_MEQ_32_EQNS as u8,
        ihl_eq16: true,
        ihl_eq32: true,
        metadata: true,
        frag: true,
        hashable: true,
        pure_ack: true,
        stats: true,
    };

    pub fn for_hw(hw: HwType) -> Self {
        Self {
            hashable: hw >= HwType::V3_0,
            pure_ack: hw >= HwType::V4_5,
            stats: hw >= HwType::V4_5,
            ..Self::FULL
        }
    }

    pub fn clamp(self) -> Self {
        Self {
            ihl_range16: self.ihl_range16.min(Self::FULL.ihl_range16),
            meq32: self.meq32.min(Self::FULL.meq32),
            meq128: self.meq128.min(Self::FULL.meq128),
            ihl_meq32: self.ihl_meq32.min(Self::FULL.ihl_meq32),
            ..self
        }
    }
}

impl Default for HwCaps {
    fn default() -> Self {
        Self::FULL
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hw_type_parse() {
        assert_eq!("v4.5".parse::<HwType>().unwrap(), HwType::V4_5);
        assert_eq!("3_5_1".parse::<HwType>().unwrap(), HwType::V3_5_1);
        assert_eq!("2.6".parse::<HwType>().unwrap(), HwType::V2_5);
        assert_eq!("2.6l".parse::<HwType>().unwrap(), HwType::V2_6L);
        assert!("9.9".parse::<HwType>().is_err());
        assert_eq!(HwType::from_raw(17), Some(HwType::V4_5));
        assert_eq!(HwType::from_raw(7), None);
    }

    #[test]
    fn caps_track_generation() {
        let old = HwCaps::for_hw(HwType::V2_6L);
        assert!(!old.hashable && !old.pure_ack && !old.stats);

        let mid = HwCaps::for_hw(HwType::V4_2);
        assert!(mid.hashable && !mid.pure_ack && !mid.stats);

        let new = HwCaps::for_hw(HwType::V5_0);
        assert_eq!(new, HwCaps::FULL);
    }

    #[test]
    fn clamp_to_abi() {
        let caps = HwCaps { meq32: 9, ihl_range16: 1, ..HwCaps::FULL }.clamp();
        assert_eq!(caps.meq32, 2);
        assert_eq!(caps.ihl_range16, 1);
    }
}
