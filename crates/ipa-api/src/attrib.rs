// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The attribute form of a rule's match criteria.

use crate::IpType;
use crate::mac::MacAddr;
use bitflags::bitflags;
use core::fmt;
use core::fmt::Display;
use ipnetwork::IpNetwork;
use serde::Deserialize;
use serde::Serialize;
use std::net::Ipv4Addr;
use std::net::Ipv6Addr;
use thiserror::Error;

bitflags! {
    /// Which fields of a [`RuleAttrib`] are present.
    ///
    /// The bit positions are those of the driver ABI.
    #[derive(
        Clone,
        Copy,
        Debug,
        Default,
        Deserialize,
        Eq,
        Hash,
        PartialEq,
        Serialize,
    )]
    pub struct AttribMask: u32 {
        const TOS = 1 << 0;
        const PROTOCOL = 1 << 1;
        const SRC_ADDR = 1 << 2;
        const DST_ADDR = 1 << 3;
        const SRC_PORT_RANGE = 1 << 4;
        const DST_PORT_RANGE = 1 << 5;
        const TYPE = 1 << 6;
        const CODE = 1 << 7;
        const SPI = 1 << 8;
        const SRC_PORT = 1 << 9;
        const DST_PORT = 1 << 10;
        const TC = 1 << 11;
        const FLOW_LABEL = 1 << 12;
        const NEXT_HDR = 1 << 13;
        const META_DATA = 1 << 14;
        const FRAGMENT = 1 << 15;
        const TOS_MASKED = 1 << 16;
        const MAC_SRC_ADDR_ETHER_II = 1 << 17;
        const MAC_DST_ADDR_ETHER_II = 1 << 18;
        const MAC_SRC_ADDR_802_3 = 1 << 19;
        const MAC_DST_ADDR_802_3 = 1 << 20;
        const MAC_ETHER_TYPE = 1 << 21;
        const MAC_DST_ADDR_L2TP = 1 << 22;
        const TCP_SYN = 1 << 23;
        const TCP_SYN_L2TP = 1 << 24;
        const L2TP_INNER_IP_TYPE = 1 << 25;
        const L2TP_INNER_IPV4_DST_ADDR = 1 << 26;
        const IS_PURE_ACK = 1 << 27;
        const VLAN_ID = 1 << 28;
        const MAC_SRC_ADDR_802_1Q = 1 << 29;
        const MAC_DST_ADDR_802_1Q = 1 << 30;
        const L2TP_UDP_INNER_MAC_DST_ADDR = 1 << 31;
    }
}

impl AttribMask {
    /// Fields that only exist in an IPv4 header.
    pub const V4_ONLY: Self = Self::TOS
        .union(Self::PROTOCOL)
        .union(Self::TOS_MASKED)
        .union(Self::FRAGMENT);

    /// Fields that only exist in an IPv6 header.
    pub const V6_ONLY: Self =
        Self::TC.union(Self::FLOW_LABEL).union(Self::NEXT_HDR);

    pub const L2TP: Self = Self::MAC_DST_ADDR_L2TP
        .union(Self::TCP_SYN_L2TP)
        .union(Self::L2TP_INNER_IP_TYPE)
        .union(Self::L2TP_INNER_IPV4_DST_ADDR)
        .union(Self::L2TP_UDP_INNER_MAC_DST_ADDR);

    pub const MAC_SRC: Self = Self::MAC_SRC_ADDR_ETHER_II
        .union(Self::MAC_SRC_ADDR_802_3)
        .union(Self::MAC_SRC_ADDR_802_1Q);

    pub const MAC_DST: Self = Self::MAC_DST_ADDR_ETHER_II
        .union(Self::MAC_DST_ADDR_802_3)
        .union(Self::MAC_DST_ADDR_802_1Q);
}

bitflags! {
    /// Extended match fields, independent of [`AttribMask`].
    #[derive(
        Clone,
        Copy,
        Debug,
        Default,
        Deserialize,
        Eq,
        Hash,
        PartialEq,
        Serialize,
    )]
    pub struct ExtAttribMask: u32 {
        const L2TP_UDP_TCP_SYN = 1 << 0;
        const L2TP_UDP_INNER_ETHER_TYPE = 1 << 1;
        const MTU = 1 << 2;
        const L2TP_UDP_INNER_NEXT_HDR = 1 << 3;
        const NEXT_HDR = 1 << 4;
        const MPLS_GRE_GENERAL = 1 << 5;
    }
}

/// The L2 header a rule is written against.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
#[repr(u32)]
pub enum HdrL2Type {
    #[default]
    None = 0,
    EthernetII = 1,
    Ieee802_3 = 2,
    Ieee802_1Q = 3,
    EthernetIIAst = 4,
    Ieee802_1QAst = 5,
}

impl HdrL2Type {
    fn ether_ii(self) -> bool {
        matches!(self, HdrL2Type::EthernetII | HdrL2Type::EthernetIIAst)
    }

    fn dot1q(self) -> bool {
        matches!(self, HdrL2Type::Ieee802_1Q | HdrL2Type::Ieee802_1QAst)
    }
}

/// The three MAC header layouts a MAC match can target.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum MacFlavor {
    EtherII,
    Ieee802_3,
    Ieee802_1Q,
}

impl MacFlavor {
    pub const fn src_bit(self) -> AttribMask {
        match self {
            MacFlavor::EtherII => AttribMask::MAC_SRC_ADDR_ETHER_II,
            MacFlavor::Ieee802_3 => AttribMask::MAC_SRC_ADDR_802_3,
            MacFlavor::Ieee802_1Q => AttribMask::MAC_SRC_ADDR_802_1Q,
        }
    }

    pub const fn dst_bit(self) -> AttribMask {
        match self {
            MacFlavor::EtherII => AttribMask::MAC_DST_ADDR_ETHER_II,
            MacFlavor::Ieee802_3 => AttribMask::MAC_DST_ADDR_802_3,
            MacFlavor::Ieee802_1Q => AttribMask::MAC_DST_ADDR_802_1Q,
        }
    }

    fn accepts(self, l2: HdrL2Type) -> bool {
        match self {
            MacFlavor::EtherII => l2.ether_ii(),
            MacFlavor::Ieee802_3 => l2 == HdrL2Type::Ieee802_3,
            MacFlavor::Ieee802_1Q => l2.dot1q(),
        }
    }

    const ALL: [MacFlavor; 3] =
        [MacFlavor::EtherII, MacFlavor::Ieee802_3, MacFlavor::Ieee802_1Q];
}

/// Packet direction a field-value equation applies to.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[repr(u32)]
pub enum DataFlow {
    Uplink = 0,
    Downlink = 1,
}

/// Header field a field-value equation compares.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[repr(u32)]
pub enum ExceptionField {
    IpProtocol = 0,
    TcpSrcPort = 1,
    TcpDstPort = 2,
    UdpSrcPort = 3,
    UdpDstPort = 4,
    EtherType = 5,
}

/// A generic "field equals value" match on tunneled traffic.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct FieldValEq {
    pub flow: DataFlow,
    pub inner_ip: IpType,
    pub field: ExceptionField,
    pub value: u32,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct V4Fields {
    pub tos: u8,
    pub protocol: u8,
    pub src_addr: Ipv4Addr,
    pub src_mask: Ipv4Addr,
    pub dst_addr: Ipv4Addr,
    pub dst_mask: Ipv4Addr,
}

impl Default for V4Fields {
    fn default() -> Self {
        Self {
            tos: 0,
            protocol: 0,
            src_addr: Ipv4Addr::UNSPECIFIED,
            src_mask: Ipv4Addr::UNSPECIFIED,
            dst_addr: Ipv4Addr::UNSPECIFIED,
            dst_mask: Ipv4Addr::UNSPECIFIED,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct V6Fields {
    pub tc: u8,
    pub flow_label: u32,
    pub next_hdr: u8,
    pub src_addr: Ipv6Addr,
    pub src_mask: Ipv6Addr,
    pub dst_addr: Ipv6Addr,
    pub dst_mask: Ipv6Addr,
}

impl Default for V6Fields {
    fn default() -> Self {
        Self {
            tc: 0,
            flow_label: 0,
            next_hdr: 0,
            src_addr: Ipv6Addr::UNSPECIFIED,
            src_mask: Ipv6Addr::UNSPECIFIED,
            dst_addr: Ipv6Addr::UNSPECIFIED,
            dst_mask: Ipv6Addr::UNSPECIFIED,
        }
    }
}

/// The L3 portion of an attribute, once validated.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum L3Match<'a> {
    Any,
    V4(&'a V4Fields),
    V6(&'a V6Fields),
}

/// An address and the bits of it that must match.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct MacMatch {
    pub addr: MacAddr,
    pub mask: MacAddr,
}

pub const MAX_VLAN_ID: u16 = 0x0FFF;
pub const MAX_FLOW_LABEL: u32 = 0x000F_FFFF;

/// Why [`RuleAttrib::validate`] rejected an attribute.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum AttribError {
    #[error("{field:?}: range low {lo} is above high {hi}")]
    PortRange { field: AttribMask, lo: u16, hi: u16 },

    #[error("both IPv4 and IPv6 fields are populated")]
    MixedFamily,

    #[error("{field:?} requires {family} fields")]
    MissingFamily { field: AttribMask, family: IpType },

    #[error("attribute is {have} but the table is {want}")]
    FamilyMismatch { want: IpType, have: IpType },

    #[error("{field:?} is not valid for L2 header type {l2:?}")]
    L2Mismatch { field: AttribMask, l2: HdrL2Type },

    #[error("VLAN id {0} is out of range")]
    VlanRange(u16),

    #[error("flow label {0:#x} is wider than 20 bits")]
    FlowLabelRange(u32),
}

/// The match criteria of one filter or routing rule.
///
/// Every setter stores one field and turns on its presence bit. A
/// field whose bit is clear is "don't care" and its stored value is
/// never consulted.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct RuleAttrib {
    mask: AttribMask,
    ext_mask: ExtAttribMask,
    l2: HdrL2Type,
    v4: Option<V4Fields>,
    v6: Option<V6Fields>,
    src_port_lo: u16,
    src_port_hi: u16,
    dst_port_lo: u16,
    dst_port_hi: u16,
    src_port: u16,
    dst_port: u16,
    icmp_type: u8,
    icmp_code: u8,
    tos_value: u8,
    tos_mask: u8,
    spi: u32,
    meta_data: u32,
    meta_data_mask: u32,
    src_mac: MacMatch,
    dst_mac: MacMatch,
    ether_type: u16,
    vlan_id: u16,
    payload_length: u16,
    fld_val_eq: Option<FieldValEq>,
}

impl RuleAttrib {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mask(&self) -> AttribMask {
        self.mask
    }

    pub fn ext_mask(&self) -> ExtAttribMask {
        self.ext_mask
    }

    pub fn l2(&self) -> HdrL2Type {
        self.l2
    }

    fn has(&self, bit: AttribMask) -> bool {
        self.mask.contains(bit)
    }

    fn v4_mut(&mut self) -> &mut V4Fields {
        self.v4.get_or_insert_with(V4Fields::default)
    }

    fn v6_mut(&mut self) -> &mut V6Fields {
        self.v6.get_or_insert_with(V6Fields::default)
    }

    pub fn set_l2(&mut self, l2: HdrL2Type) -> &mut Self {
        self.l2 = l2;
        self
    }

    pub fn set_tos(&mut self, tos: u8) -> &mut Self {
        self.v4_mut().tos = tos;
        self.mask |= AttribMask::TOS;
        self
    }

    pub fn set_protocol(&mut self, proto: u8) -> &mut Self {
        self.v4_mut().protocol = proto;
        self.mask |= AttribMask::PROTOCOL;
        self
    }

    pub fn set_src_v4(&mut self, addr: Ipv4Addr, mask: Ipv4Addr) -> &mut Self {
        let v4 = self.v4_mut();
        v4.src_addr = addr;
        v4.src_mask = mask;
        self.mask |= AttribMask::SRC_ADDR;
        self
    }

    pub fn set_dst_v4(&mut self, addr: Ipv4Addr, mask: Ipv4Addr) -> &mut Self {
        let v4 = self.v4_mut();
        v4.dst_addr = addr;
        v4.dst_mask = mask;
        self.mask |= AttribMask::DST_ADDR;
        self
    }

    pub fn set_tc(&mut self, tc: u8) -> &mut Self {
        self.v6_mut().tc = tc;
        self.mask |= AttribMask::TC;
        self
    }

    pub fn set_flow_label(&mut self, label: u32) -> &mut Self {
        self.v6_mut().flow_label = label;
        self.mask |= AttribMask::FLOW_LABEL;
        self
    }

    pub fn set_next_hdr(&mut self, next_hdr: u8) -> &mut Self {
        self.v6_mut().next_hdr = next_hdr;
        self.mask |= AttribMask::NEXT_HDR;
        self
    }

    pub fn set_src_v6(&mut self, addr: Ipv6Addr, mask: Ipv6Addr) -> &mut Self {
        let v6 = self.v6_mut();
        v6.src_addr = addr;
        v6.src_mask = mask;
        self.mask |= AttribMask::SRC_ADDR;
        self
    }

    pub fn set_dst_v6(&mut self, addr: Ipv6Addr, mask: Ipv6Addr) -> &mut Self {
        let v6 = self.v6_mut();
        v6.dst_addr = addr;
        v6.dst_mask = mask;
        self.mask |= AttribMask::DST_ADDR;
        self
    }

    pub fn set_src_net(&mut self, net: IpNetwork) -> &mut Self {
        match net {
            IpNetwork::V4(n) => self.set_src_v4(n.ip(), n.mask()),
            IpNetwork::V6(n) => self.set_src_v6(n.ip(), n.mask()),
        }
    }

    pub fn set_dst_net(&mut self, net: IpNetwork) -> &mut Self {
        match net {
            IpNetwork::V4(n) => self.set_dst_v4(n.ip(), n.mask()),
            IpNetwork::V6(n) => self.set_dst_v6(n.ip(), n.mask()),
        }
    }

    pub fn set_src_port_range(&mut self, lo: u16, hi: u16) -> &mut Self {
        self.src_port_lo = lo;
        self.src_port_hi = hi;
        self.mask |= AttribMask::SRC_PORT_RANGE;
        self
    }

    pub fn set_dst_port_range(&mut self, lo: u16, hi: u16) -> &mut Self {
        self.dst_port_lo = lo;
        self.dst_port_hi = hi;
        self.mask |= AttribMask::DST_PORT_RANGE;
        self
    }

    pub fn set_src_port(&mut self, port: u16) -> &mut Self {
        self.src_port = port;
        self.mask |= AttribMask::SRC_PORT;
        self
    }

    pub fn set_dst_port(&mut self, port: u16) -> &mut Self {
        self.dst_port = port;
        self.mask |= AttribMask::DST_PORT;
        self
    }

    pub fn set_icmp_type(&mut self, ty: u8) -> &mut Self {
        self.icmp_type = ty;
        self.mask |= AttribMask::TYPE;
        self
    }

    pub fn set_icmp_code(&mut self, code: u8) -> &mut Self {
        self.icmp_code = code;
        self.mask |= AttribMask::CODE;
        self
    }

    pub fn set_spi(&mut self, spi: u32) -> &mut Self {
        self.spi = spi;
        self.mask |= AttribMask::SPI;
        self
    }

    pub fn set_meta_data(&mut self, value: u32, mask: u32) -> &mut Self {
        self.meta_data = value;
        self.meta_data_mask = mask;
        self.mask |= AttribMask::META_DATA;
        self
    }

    pub fn set_fragment(&mut self) -> &mut Self {
        self.v4_mut();
        self.mask |= AttribMask::FRAGMENT;
        self
    }

    pub fn set_tos_masked(&mut self, value: u8, mask: u8) -> &mut Self {
        self.v4_mut();
        self.tos_value = value;
        self.tos_mask = mask;
        self.mask |= AttribMask::TOS_MASKED;
        self
    }

    /// Match the source MAC. The address storage is shared between
    /// the flavors, so this replaces any earlier source MAC match.
    pub fn set_src_mac(
        &mut self,
        flavor: MacFlavor,
        addr: MacAddr,
        mask: MacAddr,
    ) -> &mut Self {
        self.src_mac = MacMatch { addr, mask };
        self.mask.remove(AttribMask::MAC_SRC);
        self.mask |= flavor.src_bit();
        self
    }

    /// Match the destination MAC, replacing any earlier one.
    pub fn set_dst_mac(
        &mut self,
        flavor: MacFlavor,
        addr: MacAddr,
        mask: MacAddr,
    ) -> &mut Self {
        self.dst_mac = MacMatch { addr, mask };
        self.mask.remove(AttribMask::MAC_DST);
        self.mask |= flavor.dst_bit();
        self
    }

    pub fn set_ether_type(&mut self, ether_type: u16) -> &mut Self {
        self.ether_type = ether_type;
        self.mask |= AttribMask::MAC_ETHER_TYPE;
        self
    }

    pub fn set_vlan_id(&mut self, vlan: u16) -> &mut Self {
        self.vlan_id = vlan;
        self.mask |= AttribMask::VLAN_ID;
        self
    }

    pub fn set_tcp_syn(&mut self) -> &mut Self {
        self.mask |= AttribMask::TCP_SYN;
        self
    }

    pub fn set_pure_ack(&mut self) -> &mut Self {
        self.mask |= AttribMask::IS_PURE_ACK;
        self
    }

    pub fn set_tcp_syn_l2tp(&mut self) -> &mut Self {
        self.mask |= AttribMask::TCP_SYN_L2TP;
        self
    }

    pub fn set_mtu(&mut self, mtu: u16) -> &mut Self {
        self.payload_length = mtu;
        self.ext_mask |= ExtAttribMask::MTU;
        self
    }

    pub fn set_field_val_eq(&mut self, eq: FieldValEq) -> &mut Self {
        self.fld_val_eq = Some(eq);
        self.ext_mask |= ExtAttribMask::MPLS_GRE_GENERAL;
        self
    }

    /// The address family implied by the populated L3 fields.
    pub fn family(&self) -> Option<IpType> {
        match (&self.v4, &self.v6) {
            (Some(_), None) => Some(IpType::V4),
            (None, Some(_)) => Some(IpType::V6),
            _ => None,
        }
    }

    /// The L3 fields. Only meaningful after [`Self::validate`].
    pub fn l3(&self) -> L3Match<'_> {
        match (&self.v4, &self.v6) {
            (Some(v4), None) => L3Match::V4(v4),
            (None, Some(v6)) => L3Match::V6(v6),
            _ => L3Match::Any,
        }
    }

    pub fn src_port_range(&self) -> Option<(u16, u16)> {
        self.has(AttribMask::SRC_PORT_RANGE)
            .then_some((self.src_port_lo, self.src_port_hi))
    }

    pub fn dst_port_range(&self) -> Option<(u16, u16)> {
        self.has(AttribMask::DST_PORT_RANGE)
            .then_some((self.dst_port_lo, self.dst_port_hi))
    }

    pub fn src_port(&self) -> Option<u16> {
        self.has(AttribMask::SRC_PORT).then_some(self.src_port)
    }

    pub fn dst_port(&self) -> Option<u16> {
        self.has(AttribMask::DST_PORT).then_some(self.dst_port)
    }

    pub fn icmp_type(&self) -> Option<u8> {
        self.has(AttribMask::TYPE).then_some(self.icmp_type)
    }

    pub fn icmp_code(&self) -> Option<u8> {
        self.has(AttribMask::CODE).then_some(self.icmp_code)
    }

    pub fn spi(&self) -> Option<u32> {
        self.has(AttribMask::SPI).then_some(self.spi)
    }

    pub fn meta_data(&self) -> Option<(u32, u32)> {
        self.has(AttribMask::META_DATA)
            .then_some((self.meta_data, self.meta_data_mask))
    }

    pub fn tos_masked(&self) -> Option<(u8, u8)> {
        self.has(AttribMask::TOS_MASKED)
            .then_some((self.tos_value, self.tos_mask))
    }

    /// The source MAC match and the flavor it was written for.
    pub fn src_mac(&self) -> Option<(MacFlavor, MacMatch)> {
        MacFlavor::ALL
            .into_iter()
            .find(|f| self.has(f.src_bit()))
            .map(|f| (f, self.src_mac))
    }

    pub fn dst_mac(&self) -> Option<(MacFlavor, MacMatch)> {
        MacFlavor::ALL
            .into_iter()
            .find(|f| self.has(f.dst_bit()))
            .map(|f| (f, self.dst_mac))
    }

    pub fn ether_type(&self) -> Option<u16> {
        self.has(AttribMask::MAC_ETHER_TYPE).then_some(self.ether_type)
    }

    pub fn vlan_id(&self) -> Option<u16> {
        self.has(AttribMask::VLAN_ID).then_some(self.vlan_id)
    }

    pub fn mtu(&self) -> Option<u16> {
        self.ext_mask
            .contains(ExtAttribMask::MTU)
            .then_some(self.payload_length)
    }

    pub fn field_val_eq(&self) -> Option<FieldValEq> {
        self.fld_val_eq
    }

    /// Check the attribute is internally consistent.
    pub fn validate(&self) -> Result<(), AttribError> {
        if let Some((lo, hi)) = self.src_port_range() {
            if lo > hi {
                let field = AttribMask::SRC_PORT_RANGE;
                return Err(AttribError::PortRange { field, lo, hi });
            }
        }

        if let Some((lo, hi)) = self.dst_port_range() {
            if lo > hi {
                let field = AttribMask::DST_PORT_RANGE;
                return Err(AttribError::PortRange { field, lo, hi });
            }
        }

        if self.v4.is_some() && self.v6.is_some() {
            return Err(AttribError::MixedFamily);
        }

        let v4_only = self.mask & AttribMask::V4_ONLY;
        if !v4_only.is_empty() && self.v4.is_none() {
            return Err(AttribError::MissingFamily {
                field: v4_only,
                family: IpType::V4,
            });
        }

        let v6_only = self.mask & AttribMask::V6_ONLY;
        if !v6_only.is_empty() && self.v6.is_none() {
            return Err(AttribError::MissingFamily {
                field: v6_only,
                family: IpType::V6,
            });
        }

        if let Some((flavor, _)) = self.src_mac() {
            if !flavor.accepts(self.l2) {
                let field = flavor.src_bit();
                return Err(AttribError::L2Mismatch { field, l2: self.l2 });
            }
        }

        if let Some((flavor, _)) = self.dst_mac() {
            if !flavor.accepts(self.l2) {
                let field = flavor.dst_bit();
                return Err(AttribError::L2Mismatch { field, l2: self.l2 });
            }
        }

        if self.has(AttribMask::MAC_ETHER_TYPE) && self.l2 == HdrL2Type::None {
            let field = AttribMask::MAC_ETHER_TYPE;
            return Err(AttribError::L2Mismatch { field, l2: self.l2 });
        }

        if let Some(vlan) = self.vlan_id() {
            if !self.l2.dot1q() {
                let field = AttribMask::VLAN_ID;
                return Err(AttribError::L2Mismatch { field, l2: self.l2 });
            }

            if vlan > MAX_VLAN_ID {
                return Err(AttribError::VlanRange(vlan));
            }
        }

        if let Some(v6) = &self.v6 {
            if self.has(AttribMask::FLOW_LABEL)
                && v6.flow_label > MAX_FLOW_LABEL
            {
                return Err(AttribError::FlowLabelRange(v6.flow_label));
            }
        }

        Ok(())
    }

    /// Validate, and also check the attribute can live in a table of
    /// the `ip` family.
    pub fn validate_for(&self, ip: IpType) -> Result<(), AttribError> {
        self.validate()?;
        match self.family() {
            Some(have) if have != ip => {
                Err(AttribError::FamilyMismatch { want: ip, have })
            }
            _ => Ok(()),
        }
    }
}

impl Display for RuleAttrib {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut parts = Vec::new();

        match self.l3() {
            L3Match::V4(v4) => {
                if self.has(AttribMask::PROTOCOL) {
                    parts.push(format!("proto={}", v4.protocol));
                }
                if self.has(AttribMask::TOS) {
                    parts.push(format!("tos={}", v4.tos));
                }
                if self.has(AttribMask::SRC_ADDR) {
                    parts.push(format!("src={}/{}", v4.src_addr, v4.src_mask));
                }
                if self.has(AttribMask::DST_ADDR) {
                    parts.push(format!("dst={}/{}", v4.dst_addr, v4.dst_mask));
                }
            }

            L3Match::V6(v6) => {
                if self.has(AttribMask::NEXT_HDR) {
                    parts.push(format!("next_hdr={}", v6.next_hdr));
                }
                if self.has(AttribMask::TC) {
                    parts.push(format!("tc={}", v6.tc));
                }
                if self.has(AttribMask::FLOW_LABEL) {
                    parts.push(format!("fl={:#x}", v6.flow_label));
                }
                if self.has(AttribMask::SRC_ADDR) {
                    parts.push(format!("src={}/{}", v6.src_addr, v6.src_mask));
                }
                if self.has(AttribMask::DST_ADDR) {
                    parts.push(format!("dst={}/{}", v6.dst_addr, v6.dst_mask));
                }
            }

            L3Match::Any => (),
        }

        if let Some((lo, hi)) = self.src_port_range() {
            parts.push(format!("sport={lo}-{hi}"));
        }
        if let Some((lo, hi)) = self.dst_port_range() {
            parts.push(format!("dport={lo}-{hi}"));
        }
        if let Some(p) = self.src_port() {
            parts.push(format!("sport={p}"));
        }
        if let Some(p) = self.dst_port() {
            parts.push(format!("dport={p}"));
        }
        if let Some((_, m)) = self.src_mac() {
            parts.push(format!("smac={}", m.addr));
        }
        if let Some((_, m)) = self.dst_mac() {
            parts.push(format!("dmac={}", m.addr));
        }
        if let Some(vlan) = self.vlan_id() {
            parts.push(format!("vlan={vlan}"));
        }

        let rest = self.mask
            - (AttribMask::PROTOCOL
                | AttribMask::TOS
                | AttribMask::NEXT_HDR
                | AttribMask::TC
                | AttribMask::FLOW_LABEL
                | AttribMask::SRC_ADDR
                | AttribMask::DST_ADDR
                | AttribMask::SRC_PORT_RANGE
                | AttribMask::DST_PORT_RANGE
                | AttribMask::SRC_PORT
                | AttribMask::DST_PORT
                | AttribMask::MAC_SRC
                | AttribMask::MAC_DST
                | AttribMask::VLAN_ID);
        for (name, _) in rest.iter_names() {
            parts.push(name.to_ascii_lowercase());
        }

        if parts.is_empty() {
            write!(f, "*")
        } else {
            write!(f, "{}", parts.join(" "))
        }
    }
}
