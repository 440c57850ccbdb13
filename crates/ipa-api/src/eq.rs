// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The equation form of a filter rule.
//!
//! The hardware matches a packet against a fixed set of comparator
//! slots rather than against named header fields. Offsets of the
//! plain slots are relative to the start of the L3 header (negative
//! offsets reach back into the L2 header); the `ihl_` slots are
//! relative to the end of the IP header, i.e. the start of L4.

use core::fmt;
use core::fmt::Display;
use heapless::Vec as SlotVec;
use serde::Deserialize;
use serde::Serialize;

pub const IPFLTR_NUM_MEQ_32_EQNS: usize = 2;
pub const IPFLTR_NUM_IHL_MEQ_32_EQNS: usize = 2;
pub const IPFLTR_NUM_MEQ_128_EQNS: usize = 2;
pub const IPFLTR_NUM_IHL_RANGE_16_EQNS: usize = 2;

/// Offset and 16-bit comparison.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Eq16 {
    pub offset: i8,
    pub value: u16,
}

/// Offset and 32-bit comparison.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Eq32 {
    pub offset: i8,
    pub value: u32,
}

/// Offset and 32-bit masked comparison.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct MaskEq32 {
    pub offset: i8,
    pub mask: u32,
    pub value: u32,
}

/// Offset and 128-bit masked comparison, in wire byte order.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct MaskEq128 {
    pub offset: i8,
    pub mask: [u8; 16],
    pub value: [u8; 16],
}

/// Offset and inclusive 16-bit range check.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RangeEq16 {
    pub offset: i8,
    pub low: u16,
    pub high: u16,
}

/// The kinds of comparator the equation form offers.
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
pub enum SlotKind {
    Tos,
    Protocol,
    Tc,
    FlowLabel,
    Metadata,
    Frag,
    Range16,
    Meq32,
    Meq128,
    IhlEq16,
    IhlEq32,
    IhlMeq32,
}

impl Display for SlotKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            SlotKind::Tos => "tos_eq",
            SlotKind::Protocol => "protocol_eq",
            SlotKind::Tc => "tc_eq",
            SlotKind::FlowLabel => "fl_eq",
            SlotKind::Metadata => "metadata_meq32",
            SlotKind::Frag => "ipv4_frag_eq",
            SlotKind::Range16 => "ihl_offset_range_16",
            SlotKind::Meq32 => "offset_meq_32",
            SlotKind::Meq128 => "offset_meq_128",
            SlotKind::IhlEq16 => "ihl_offset_eq_16",
            SlotKind::IhlEq32 => "ihl_offset_eq_32",
            SlotKind::IhlMeq32 => "ihl_offset_meq_32",
        };

        write!(f, "{s}")
    }
}

/// Bits of `rule_eq_bitmap`.
pub mod eq_bit {
    pub const TOS: u16 = 1 << 0;
    pub const PROTOCOL: u16 = 1 << 1;
    pub const TC: u16 = 1 << 2;
    pub const MEQ128_0: u16 = 1 << 3;
    pub const MEQ128_1: u16 = 1 << 4;
    pub const MEQ32_0: u16 = 1 << 5;
    pub const MEQ32_1: u16 = 1 << 6;
    pub const IHL_MEQ32_0: u16 = 1 << 7;
    pub const IHL_MEQ32_1: u16 = 1 << 8;
    pub const METADATA: u16 = 1 << 9;
    pub const IHL_RANGE16_0: u16 = 1 << 10;
    pub const IHL_RANGE16_1: u16 = 1 << 11;
    pub const IHL_EQ32: u16 = 1 << 12;
    pub const IHL_EQ16: u16 = 1 << 13;
    pub const FL: u16 = 1 << 14;
    pub const FRAG: u16 = 1 << 15;
}

/// A filter rule in equation form.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct EquationSet {
    pub tos: Option<u8>,
    pub protocol: Option<u8>,
    pub tc: Option<u8>,
    pub flow_label: Option<u32>,
    pub ihl_range16: SlotVec<RangeEq16, IPFLTR_NUM_IHL_RANGE_16_EQNS>,
    pub meq32: SlotVec<MaskEq32, IPFLTR_NUM_MEQ_32_EQNS>,
    pub ihl_eq16: Option<Eq16>,
    pub ihl_eq32: Option<Eq32>,
    pub ihl_meq32: SlotVec<MaskEq32, IPFLTR_NUM_IHL_MEQ_32_EQNS>,
    pub meq128: SlotVec<MaskEq128, IPFLTR_NUM_MEQ_128_EQNS>,
    pub metadata: Option<MaskEq32>,
    pub frag: bool,
}

impl EquationSet {
    /// The bitmap the hardware uses to find the valid equations.
    pub fn rule_eq_bitmap(&self) -> u16 {
        use eq_bit::*;

        fn nth(len: usize, bits: [u16; 2]) -> u16 {
            bits.iter().take(len).fold(0, |acc, b| acc | b)
        }

        let mut bm = 0;
        if self.tos.is_some() {
            bm |= TOS;
        }
        if self.protocol.is_some() {
            bm |= PROTOCOL;
        }
        if self.tc.is_some() {
            bm |= TC;
        }
        bm |= nth(self.meq128.len(), [MEQ128_0, MEQ128_1]);
        bm |= nth(self.meq32.len(), [MEQ32_0, MEQ32_1]);
        bm |= nth(self.ihl_meq32.len(), [IHL_MEQ32_0, IHL_MEQ32_1]);
        if self.metadata.is_some() {
            bm |= METADATA;
        }
        bm |= nth(self.ihl_range16.len(), [IHL_RANGE16_0, IHL_RANGE16_1]);
        if self.ihl_eq32.is_some() {
            bm |= IHL_EQ32;
        }
        if self.ihl_eq16.is_some() {
            bm |= IHL_EQ16;
        }
        if self.flow_label.is_some() {
            bm |= FL;
        }
        if self.frag {
            bm |= FRAG;
        }
        bm
    }

    /// Number of slots of `kind` in use.
    pub fn used(&self, kind: SlotKind) -> usize {
        match kind {
            SlotKind::Tos => self.tos.is_some() as usize,
            SlotKind::Protocol => self.protocol.is_some() as usize,
            SlotKind::Tc => self.tc.is_some() as usize,
            SlotKind::FlowLabel => self.flow_label.is_some() as usize,
            SlotKind::Metadata => self.metadata.is_some() as usize,
            SlotKind::Frag => self.frag as usize,
            SlotKind::Range16 => self.ihl_range16.len(),
            SlotKind::Meq32 => self.meq32.len(),
            SlotKind::Meq128 => self.meq128.len(),
            SlotKind::IhlEq16 => self.ihl_eq16.is_some() as usize,
            SlotKind::IhlEq32 => self.ihl_eq32.is_some() as usize,
            SlotKind::IhlMeq32 => self.ihl_meq32.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rule_eq_bitmap() == 0
    }
}
