// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Lowering of rule attributes into equation form.
//!
//! The packer is greedy and walks the attribute mask in bit order
//! three times: first for the fields with a dedicated scalar slot,
//! then for the port ranges, and finally for everything that needs a
//! general comparator. Each field in the last pass has a fixed list
//! of slot kinds it may use, tried in order. The walk order and the
//! preference lists fully determine the output, so equal inputs
//! always produce equal equation sets.

use crate::api::AttribError;
use crate::api::AttribMask;
use crate::api::Eq16;
use crate::api::Eq32;
use crate::api::EquationSet;
use crate::api::ExtAttribMask;
use crate::api::FltMatch;
use crate::api::FltRule;
use crate::api::HwCaps;
use crate::api::IpType;
use crate::api::L3Match;
use crate::api::MacFlavor;
use crate::api::MacMatch;
use crate::api::MaskEq32;
use crate::api::MaskEq128;
use crate::api::RangeEq16;
use crate::api::RuleAttrib;
use crate::api::SlotKind;
use std::net::Ipv4Addr;
use std::net::Ipv6Addr;
use thiserror::Error;

#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum CompileError {
    #[error("invalid attribute: {0}")]
    InvalidAttribute(#[from] AttribError),

    /// These fields have no equation form here; send the rule in
    /// attribute form instead.
    #[error("cannot lower {fields:?} / {ext:?} to equation form")]
    Unsupported { fields: AttribMask, ext: ExtAttribMask },

    #[error("no free {kind} slot for {field:?}")]
    SlotExhausted { kind: SlotKind, field: AttribMask },
}

/// One candidate placement for a field.
#[derive(Clone, Copy, Debug)]
enum Slot {
    Meq32(MaskEq32),
    Meq128(MaskEq128),
    IhlMeq32(MaskEq32),
    IhlEq16(Eq16),
    IhlEq32(Eq32),
    Range16(RangeEq16),
}

impl Slot {
    fn kind(&self) -> SlotKind {
        match self {
            Slot::Meq32(_) => SlotKind::Meq32,
            Slot::Meq128(_) => SlotKind::Meq128,
            Slot::IhlMeq32(_) => SlotKind::IhlMeq32,
            Slot::IhlEq16(_) => SlotKind::IhlEq16,
            Slot::IhlEq32(_) => SlotKind::IhlEq32,
            Slot::Range16(_) => SlotKind::Range16,
        }
    }
}

struct Packer {
    caps: HwCaps,
    eq: EquationSet,
}

impl Packer {
    fn new(caps: HwCaps) -> Self {
        Self { caps: caps.clamp(), eq: EquationSet::default() }
    }

    fn try_slot(&mut self, slot: Slot) -> bool {
        let eq = &mut self.eq;
        let caps = &self.caps;

        match slot {
            Slot::Meq32(m) if eq.meq32.len() < usize::from(caps.meq32) => {
                eq.meq32.push(m).is_ok()
            }

            Slot::Meq128(m) if eq.meq128.len() < usize::from(caps.meq128) => {
                eq.meq128.push(m).is_ok()
            }

            Slot::IhlMeq32(m)
                if eq.ihl_meq32.len() < usize::from(caps.ihl_meq32) =>
            {
                eq.ihl_meq32.push(m).is_ok()
            }

            Slot::IhlEq16(e) if caps.ihl_eq16 && eq.ihl_eq16.is_none() => {
                eq.ihl_eq16 = Some(e);
                true
            }

            Slot::IhlEq32(e) if caps.ihl_eq32 && eq.ihl_eq32.is_none() => {
                eq.ihl_eq32 = Some(e);
                true
            }

            Slot::Range16(r)
                if eq.ihl_range16.len() < usize::from(caps.ihl_range16) =>
            {
                eq.ihl_range16.push(r).is_ok()
            }

            _ => false,
        }
    }

    /// Place `field` in the first slot of `prefs` that is free.
    fn place(
        &mut self,
        field: AttribMask,
        prefs: &[Slot],
    ) -> Result<(), CompileError> {
        for slot in prefs {
            if self.try_slot(*slot) {
                return Ok(());
            }
        }

        // Every field has at least one preference.
        let kind = prefs.last().map(Slot::kind).unwrap_or(SlotKind::Meq32);
        Err(CompileError::SlotExhausted { kind, field })
    }
}

/// The three placements of an exact-match 16-bit L4 field.
fn l4_port(offset: i8, port: u16) -> [Slot; 3] {
    [
        Slot::IhlMeq32(MaskEq32 {
            offset,
            mask: 0xFFFF_0000,
            value: u32::from(port) << 16,
        }),
        Slot::IhlEq16(Eq16 { offset, value: port }),
        Slot::Range16(RangeEq16 { offset, low: port, high: port }),
    ]
}

/// A 128-bit window holding `bytes` under `mask` at its start.
fn meq128_prefix(offset: i8, mask: &[u8], value: &[u8]) -> MaskEq128 {
    let mut m = MaskEq128 { offset, mask: [0; 16], value: [0; 16] };
    m.mask[..mask.len()].copy_from_slice(mask);
    for (i, (v, k)) in value.iter().zip(mask).enumerate() {
        m.value[i] = v & k;
    }
    m
}

fn v4_addr(offset: i8, addr: Ipv4Addr, mask: Ipv4Addr) -> [Slot; 2] {
    let mask_bits = u32::from(mask);
    let value = u32::from(addr) & mask_bits;
    [
        Slot::Meq32(MaskEq32 { offset, mask: mask_bits, value }),
        Slot::Meq128(meq128_prefix(offset, &mask.octets(), &addr.octets())),
    ]
}

fn v6_addr(offset: i8, addr: Ipv6Addr, mask: Ipv6Addr) -> Slot {
    Slot::Meq128(meq128_prefix(offset, &mask.octets(), &addr.octets()))
}

/// Offsets of the (src, dst) MAC for each L2 layout, relative to the
/// start of the L3 header.
const fn mac_offsets(flavor: MacFlavor) -> (i8, i8) {
    match flavor {
        MacFlavor::EtherII => (-8, -14),
        MacFlavor::Ieee802_3 => (-16, -22),
        MacFlavor::Ieee802_1Q => (-12, -18),
    }
}

fn mac(offset: i8, m: &MacMatch) -> Slot {
    Slot::Meq128(meq128_prefix(offset, &m.mask.bytes(), &m.addr.bytes()))
}

/// Lower `attrib` for a table of the `ip` family on hardware with
/// `caps`.
pub fn compile(
    attrib: &RuleAttrib,
    ip: IpType,
    caps: &HwCaps,
) -> Result<EquationSet, CompileError> {
    attrib.validate_for(ip)?;

    let mask = attrib.mask();
    let mut unsupported = mask & AttribMask::L2TP;
    if mask.contains(AttribMask::IS_PURE_ACK) && !caps.pure_ack {
        unsupported |= AttribMask::IS_PURE_ACK;
    }
    let ext = attrib.ext_mask();
    if !unsupported.is_empty() || !ext.is_empty() {
        return Err(CompileError::Unsupported { fields: unsupported, ext });
    }

    let mut p = Packer::new(*caps);
    let l3 = attrib.l3();

    // Phase 1: dedicated scalar slots.
    let mut tos_displaced = None;
    if mask.contains(AttribMask::IS_PURE_ACK) {
        p.eq.tos = Some(0);
    }

    if let L3Match::V4(v4) = l3 {
        if mask.contains(AttribMask::TOS) {
            if p.eq.tos.is_some() {
                tos_displaced = Some(v4.tos);
            } else {
                p.eq.tos = Some(v4.tos);
            }
        }

        if mask.contains(AttribMask::PROTOCOL) {
            p.eq.protocol = Some(v4.protocol);
        }
    }

    if let L3Match::V6(v6) = l3 {
        if mask.contains(AttribMask::TC) {
            p.eq.tc = Some(v6.tc);
        }

        if mask.contains(AttribMask::FLOW_LABEL) {
            p.eq.flow_label = Some(v6.flow_label);
        }

        if mask.contains(AttribMask::NEXT_HDR) {
            p.eq.protocol = Some(v6.next_hdr);
        }
    }

    if let Some((value, md_mask)) = attrib.meta_data() {
        if !p.caps.metadata {
            return Err(CompileError::SlotExhausted {
                kind: SlotKind::Metadata,
                field: AttribMask::META_DATA,
            });
        }
        p.eq.metadata = Some(MaskEq32 { offset: 0, mask: md_mask, value });
    }

    if mask.contains(AttribMask::FRAGMENT) {
        if !p.caps.frag {
            return Err(CompileError::SlotExhausted {
                kind: SlotKind::Frag,
                field: AttribMask::FRAGMENT,
            });
        }
        p.eq.frag = true;
    }

    // Phase 2: port ranges.
    if let Some((low, high)) = attrib.src_port_range() {
        let r = RangeEq16 { offset: 0, low, high };
        p.place(AttribMask::SRC_PORT_RANGE, &[Slot::Range16(r)])?;
    }

    if let Some((low, high)) = attrib.dst_port_range() {
        let r = RangeEq16 { offset: 2, low, high };
        p.place(AttribMask::DST_PORT_RANGE, &[Slot::Range16(r)])?;
    }

    // Phase 3: general comparators.
    if let Some(tos) = tos_displaced {
        let m = MaskEq32 {
            offset: 0,
            mask: 0x00FF_0000,
            value: u32::from(tos) << 16,
        };
        p.place(AttribMask::TOS, &[Slot::Meq32(m)])?;
    }

    match l3 {
        L3Match::V4(v4) => {
            if mask.contains(AttribMask::SRC_ADDR) {
                let prefs = v4_addr(12, v4.src_addr, v4.src_mask);
                p.place(AttribMask::SRC_ADDR, &prefs)?;
            }

            if mask.contains(AttribMask::DST_ADDR) {
                let prefs = v4_addr(16, v4.dst_addr, v4.dst_mask);
                p.place(AttribMask::DST_ADDR, &prefs)?;
            }
        }

        L3Match::V6(v6) => {
            if mask.contains(AttribMask::SRC_ADDR) {
                let slot = v6_addr(8, v6.src_addr, v6.src_mask);
                p.place(AttribMask::SRC_ADDR, &[slot])?;
            }

            if mask.contains(AttribMask::DST_ADDR) {
                let slot = v6_addr(24, v6.dst_addr, v6.dst_mask);
                p.place(AttribMask::DST_ADDR, &[slot])?;
            }
        }

        L3Match::Any => (),
    }

    if let Some(ty) = attrib.icmp_type() {
        let m = MaskEq32 {
            offset: 0,
            mask: 0xFF00_0000,
            value: u32::from(ty) << 24,
        };
        p.place(AttribMask::TYPE, &[Slot::IhlMeq32(m)])?;
    }

    if let Some(code) = attrib.icmp_code() {
        let m = MaskEq32 {
            offset: 1,
            mask: 0xFF00_0000,
            value: u32::from(code) << 24,
        };
        p.place(AttribMask::CODE, &[Slot::IhlMeq32(m)])?;
    }

    if let Some(spi) = attrib.spi() {
        let prefs = [
            Slot::IhlEq32(Eq32 { offset: 0, value: spi }),
            Slot::IhlMeq32(MaskEq32 { offset: 0, mask: !0, value: spi }),
        ];
        p.place(AttribMask::SPI, &prefs)?;
    }

    if let Some(port) = attrib.src_port() {
        p.place(AttribMask::SRC_PORT, &l4_port(0, port))?;
    }

    if let Some(port) = attrib.dst_port() {
        p.place(AttribMask::DST_PORT, &l4_port(2, port))?;
    }

    if let Some((value, tos_mask)) = attrib.tos_masked() {
        let m = MaskEq32 {
            offset: 0,
            mask: u32::from(tos_mask) << 16,
            value: u32::from(value & tos_mask) << 16,
        };
        p.place(AttribMask::TOS_MASKED, &[Slot::Meq32(m)])?;
    }

    // The MAC bits interleave by flavor; both accessors report the one
    // flavor that is set, so walking the flavors in bit order keeps the
    // overall bit order.
    let src_mac = attrib.src_mac();
    let dst_mac = attrib.dst_mac();
    for flavor in [MacFlavor::EtherII, MacFlavor::Ieee802_3] {
        let (src_off, dst_off) = mac_offsets(flavor);
        if let Some((f, m)) = src_mac {
            if f == flavor {
                p.place(flavor.src_bit(), &[mac(src_off, &m)])?;
            }
        }
        if let Some((f, m)) = dst_mac {
            if f == flavor {
                p.place(flavor.dst_bit(), &[mac(dst_off, &m)])?;
            }
        }
    }

    if let Some(et) = attrib.ether_type() {
        let prefs = [
            Slot::Meq32(MaskEq32 {
                offset: -2,
                mask: 0xFFFF_0000,
                value: u32::from(et) << 16,
            }),
            Slot::Meq128(meq128_prefix(-2, &[0xFF, 0xFF], &et.to_be_bytes())),
        ];
        p.place(AttribMask::MAC_ETHER_TYPE, &prefs)?;
    }

    if mask.contains(AttribMask::TCP_SYN) {
        let m = MaskEq32 { offset: 12, mask: 0x0002_0000, value: 0x0002_0000 };
        p.place(AttribMask::TCP_SYN, &[Slot::IhlMeq32(m)])?;
    }

    if let Some(vlan) = attrib.vlan_id() {
        let prefs = [
            Slot::Meq32(MaskEq32 {
                offset: -4,
                mask: 0x0FFF_0000,
                value: u32::from(vlan) << 16,
            }),
            Slot::Meq128(meq128_prefix(-4, &[0x0F, 0xFF], &vlan.to_be_bytes())),
        ];
        p.place(AttribMask::VLAN_ID, &prefs)?;
    }

    let (src_off, dst_off) = mac_offsets(MacFlavor::Ieee802_1Q);
    if let Some((MacFlavor::Ieee802_1Q, m)) = src_mac {
        p.place(MacFlavor::Ieee802_1Q.src_bit(), &[mac(src_off, &m)])?;
    }
    if let Some((MacFlavor::Ieee802_1Q, m)) = dst_mac {
        p.place(MacFlavor::Ieee802_1Q.dst_bit(), &[mac(dst_off, &m)])?;
    }

    Ok(p.eq)
}

/// Check that a caller-supplied equation set fits in `caps`.
pub fn check_eq(eq: &EquationSet, caps: &HwCaps) -> Result<(), CompileError> {
    let caps = caps.clamp();
    let limits = [
        (SlotKind::Range16, usize::from(caps.ihl_range16)),
        (SlotKind::Meq32, usize::from(caps.meq32)),
        (SlotKind::Meq128, usize::from(caps.meq128)),
        (SlotKind::IhlMeq32, usize::from(caps.ihl_meq32)),
        (SlotKind::IhlEq16, usize::from(caps.ihl_eq16)),
        (SlotKind::IhlEq32, usize::from(caps.ihl_eq32)),
        (SlotKind::Metadata, usize::from(caps.metadata)),
        (SlotKind::Frag, usize::from(caps.frag)),
    ];

    for (kind, max) in limits {
        if eq.used(kind) > max {
            return Err(CompileError::SlotExhausted {
                kind,
                field: AttribMask::empty(),
            });
        }
    }

    Ok(())
}

/// Return a copy of `rule` whose match is in equation form.
///
/// A rule already in equation form is returned as is.
pub fn lower_flt(
    rule: &FltRule,
    ip: IpType,
    caps: &HwCaps,
) -> Result<FltRule, CompileError> {
    match &rule.matcher {
        FltMatch::Attrib(attrib) => {
            let eq = compile(attrib, ip, caps)?;
            Ok(FltRule { matcher: FltMatch::Eq(eq), ..rule.clone() })
        }

        FltMatch::Eq(_) => Ok(rule.clone()),
    }
}

/// A stable byte encoding of an equation set.
///
/// Two compilations can be compared by their fingerprints to detect a
/// no-op update.
pub fn fingerprint(eq: &EquationSet) -> Result<Vec<u8>, postcard::Error> {
    postcard::to_allocvec(eq)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::HdrL2Type;
    use crate::api::HwType;
    use crate::api::MacAddr;
    use crate::api::eq_bit;

    fn v4_tcp() -> RuleAttrib {
        let mut a = RuleAttrib::new();
        a.set_protocol(6);
        a
    }

    #[test]
    fn scalars_use_flags() {
        let mut a = v4_tcp();
        a.set_tos(0x10).set_fragment().set_meta_data(0xAB, 0xFF);
        let eq = compile(&a, IpType::V4, &HwCaps::FULL).unwrap();
        assert_eq!(eq.protocol, Some(6));
        assert_eq!(eq.tos, Some(0x10));
        assert!(eq.frag);
        assert_eq!(
            eq.metadata,
            Some(MaskEq32 { offset: 0, mask: 0xFF, value: 0xAB })
        );
        assert!(eq.meq32.is_empty());
        assert_eq!(
            eq.rule_eq_bitmap(),
            eq_bit::TOS | eq_bit::PROTOCOL | eq_bit::METADATA | eq_bit::FRAG
        );
    }

    #[test]
    fn v6_next_hdr_uses_protocol_flag() {
        let mut a = RuleAttrib::new();
        a.set_next_hdr(17).set_tc(3).set_flow_label(0xBEEF);
        let eq = compile(&a, IpType::V6, &HwCaps::FULL).unwrap();
        assert_eq!(eq.protocol, Some(17));
        assert_eq!(eq.tc, Some(3));
        assert_eq!(eq.flow_label, Some(0xBEEF));
    }

    #[test]
    fn v4_addrs_prefer_meq32() {
        let mut a = v4_tcp();
        a.set_src_net("10.1.2.0/24".parse().unwrap())
            .set_dst_net("192.168.1.7/32".parse().unwrap());
        let eq = compile(&a, IpType::V4, &HwCaps::FULL).unwrap();
        assert_eq!(
            eq.meq32.as_slice(),
            &[
                MaskEq32 { offset: 12, mask: 0xFFFF_FF00, value: 0x0A01_0200 },
                MaskEq32 { offset: 16, mask: !0, value: 0xC0A8_0107 },
            ]
        );
        assert!(eq.meq128.is_empty());
    }

    #[test]
    fn v4_addr_overflows_into_meq128() {
        let caps = HwCaps { meq32: 1, ..HwCaps::FULL };
        let mut a = v4_tcp();
        a.set_src_net("10.0.0.0/8".parse().unwrap())
            .set_dst_net("10.0.0.1/32".parse().unwrap());
        let eq = compile(&a, IpType::V4, &caps).unwrap();
        assert_eq!(eq.meq32.len(), 1);
        assert_eq!(eq.meq128.len(), 1);
        let m = eq.meq128[0];
        assert_eq!(m.offset, 16);
        assert_eq!(&m.mask[..4], &[0xFF; 4]);
        assert_eq!(&m.value[..4], &[10, 0, 0, 1]);
        assert_eq!(&m.mask[4..], &[0; 12]);
    }

    #[test]
    fn v6_addrs_use_meq128() {
        let mut a = RuleAttrib::new();
        a.set_src_net("fd00:1::/32".parse().unwrap())
            .set_dst_net("fd00:2::1/128".parse().unwrap());
        let eq = compile(&a, IpType::V6, &HwCaps::FULL).unwrap();
        assert_eq!(eq.meq128.len(), 2);
        assert_eq!(eq.meq128[0].offset, 8);
        assert_eq!(&eq.meq128[0].mask[..4], &[0xFF; 4]);
        assert_eq!(&eq.meq128[0].mask[4..], &[0; 12]);
        assert_eq!(eq.meq128[1].offset, 24);
        assert_eq!(eq.meq128[1].mask, [0xFF; 16]);
    }

    #[test]
    fn ports_and_ranges() {
        let mut a = v4_tcp();
        a.set_src_port_range(1024, 2048)
            .set_dst_port_range(80, 90)
            .set_src_port(5000)
            .set_dst_port(443);
        let eq = compile(&a, IpType::V4, &HwCaps::FULL).unwrap();
        assert_eq!(
            eq.ihl_range16.as_slice(),
            &[
                RangeEq16 { offset: 0, low: 1024, high: 2048 },
                RangeEq16 { offset: 2, low: 80, high: 90 },
            ]
        );
        assert_eq!(
            eq.ihl_meq32.as_slice(),
            &[
                MaskEq32 {
                    offset: 0,
                    mask: 0xFFFF_0000,
                    value: 5000 << 16
                },
                MaskEq32 { offset: 2, mask: 0xFFFF_0000, value: 443 << 16 },
            ]
        );
    }

    #[test]
    fn port_falls_back_to_eq16_then_range() {
        let caps = HwCaps { ihl_meq32: 0, ..HwCaps::FULL };
        let mut a = v4_tcp();
        a.set_src_port(53).set_dst_port(53);
        let eq = compile(&a, IpType::V4, &caps).unwrap();
        assert_eq!(eq.ihl_eq16, Some(Eq16 { offset: 0, value: 53 }));
        assert_eq!(
            eq.ihl_range16.as_slice(),
            &[RangeEq16 { offset: 2, low: 53, high: 53 }]
        );
    }

    #[test]
    fn range_exhaustion() {
        let caps = HwCaps { ihl_range16: 1, ..HwCaps::FULL };
        let mut a = v4_tcp();
        a.set_src_port_range(1, 2).set_dst_port_range(3, 4);
        assert_eq!(
            compile(&a, IpType::V4, &caps),
            Err(CompileError::SlotExhausted {
                kind: SlotKind::Range16,
                field: AttribMask::DST_PORT_RANGE,
            })
        );
    }

    #[test]
    fn exhaustion_names_last_kind() {
        let caps = HwCaps { ihl_meq32: 0, ihl_eq16: false, ..HwCaps::FULL };
        let mut a = v4_tcp();
        a.set_src_port_range(1, 2)
            .set_dst_port_range(3, 4)
            .set_dst_port(80);
        assert_eq!(
            compile(&a, IpType::V4, &caps),
            Err(CompileError::SlotExhausted {
                kind: SlotKind::Range16,
                field: AttribMask::DST_PORT,
            })
        );
    }

    #[test]
    fn icmp_and_spi() {
        let mut a = RuleAttrib::new();
        a.set_protocol(1).set_icmp_type(8).set_icmp_code(0);
        let eq = compile(&a, IpType::V4, &HwCaps::FULL).unwrap();
        assert_eq!(eq.ihl_meq32[0].value, 8 << 24);
        assert_eq!(eq.ihl_meq32[1].offset, 1);

        let mut a = RuleAttrib::new();
        a.set_protocol(50).set_spi(0xDEAD_BEEF);
        let eq = compile(&a, IpType::V4, &HwCaps::FULL).unwrap();
        assert_eq!(eq.ihl_eq32, Some(Eq32 { offset: 0, value: 0xDEAD_BEEF }));

        let caps = HwCaps { ihl_eq32: false, ..HwCaps::FULL };
        let eq = compile(&a, IpType::V4, &caps).unwrap();
        assert_eq!(
            eq.ihl_meq32.as_slice(),
            &[MaskEq32 { offset: 0, mask: !0, value: 0xDEAD_BEEF }]
        );
    }

    #[test]
    fn tcp_syn() {
        let mut a = v4_tcp();
        a.set_tcp_syn();
        let eq = compile(&a, IpType::V4, &HwCaps::FULL).unwrap();
        assert_eq!(
            eq.ihl_meq32.as_slice(),
            &[MaskEq32 { offset: 12, mask: 0x0002_0000, value: 0x0002_0000 }]
        );
    }

    #[test]
    fn pure_ack_displaces_tos() {
        let mut a = v4_tcp();
        a.set_tos(0x20).set_pure_ack();
        let eq = compile(&a, IpType::V4, &HwCaps::FULL).unwrap();
        assert_eq!(eq.tos, Some(0));
        assert_eq!(
            eq.meq32.as_slice(),
            &[MaskEq32 { offset: 0, mask: 0x00FF_0000, value: 0x20 << 16 }]
        );

        let old = HwCaps::for_hw(HwType::V4_2);
        assert_eq!(
            compile(&a, IpType::V4, &old),
            Err(CompileError::Unsupported {
                fields: AttribMask::IS_PURE_ACK,
                ext: ExtAttribMask::empty(),
            })
        );
    }

    #[test]
    fn tos_masked() {
        let mut a = RuleAttrib::new();
        a.set_tos_masked(0xB8, 0xFC);
        let eq = compile(&a, IpType::V4, &HwCaps::FULL).unwrap();
        assert_eq!(
            eq.meq32.as_slice(),
            &[MaskEq32 { offset: 0, mask: 0x00FC_0000, value: 0x00B8_0000 }]
        );
    }

    #[test]
    fn mac_offsets_by_flavor() {
        let mac_a: MacAddr = "00:11:22:33:44:55".parse().unwrap();
        let mask = MacAddr::BROADCAST;

        let mut a = RuleAttrib::new();
        a.set_l2(HdrL2Type::EthernetII)
            .set_dst_mac(MacFlavor::EtherII, mac_a, mask)
            .set_src_mac(MacFlavor::EtherII, mac_a, mask);
        let eq = compile(&a, IpType::V4, &HwCaps::FULL).unwrap();
        // Bit order: the source bit is lower.
        assert_eq!(eq.meq128[0].offset, -8);
        assert_eq!(eq.meq128[1].offset, -14);
        assert_eq!(&eq.meq128[1].value[..6], &mac_a.bytes());
        assert_eq!(&eq.meq128[1].mask[6..], &[0; 10]);

        let mut a = RuleAttrib::new();
        a.set_l2(HdrL2Type::Ieee802_3)
            .set_dst_mac(MacFlavor::Ieee802_3, mac_a, mask);
        let eq = compile(&a, IpType::V4, &HwCaps::FULL).unwrap();
        assert_eq!(eq.meq128[0].offset, -22);

        let mut a = RuleAttrib::new();
        a.set_l2(HdrL2Type::Ieee802_1Q)
            .set_src_mac(MacFlavor::Ieee802_1Q, mac_a, mask)
            .set_vlan_id(42);
        let eq = compile(&a, IpType::V4, &HwCaps::FULL).unwrap();
        assert_eq!(
            eq.meq32.as_slice(),
            &[MaskEq32 { offset: -4, mask: 0x0FFF_0000, value: 42 << 16 }]
        );
        assert_eq!(eq.meq128[0].offset, -12);
    }

    #[test]
    fn ether_type_overflow() {
        let caps = HwCaps { meq32: 0, ..HwCaps::FULL };
        let mut a = RuleAttrib::new();
        a.set_l2(HdrL2Type::EthernetII).set_ether_type(0x88E5);
        let eq = compile(&a, IpType::V4, &caps).unwrap();
        assert_eq!(eq.meq128[0].offset, -2);
        assert_eq!(&eq.meq128[0].value[..2], &[0x88, 0xE5]);
        assert_eq!(&eq.meq128[0].mask[..3], &[0xFF, 0xFF, 0x00]);
    }

    #[test]
    fn l2tp_and_ext_unsupported() {
        let mut a = v4_tcp();
        a.set_tcp_syn_l2tp();
        assert_eq!(
            compile(&a, IpType::V4, &HwCaps::FULL),
            Err(CompileError::Unsupported {
                fields: AttribMask::TCP_SYN_L2TP,
                ext: ExtAttribMask::empty(),
            })
        );

        let mut a = v4_tcp();
        a.set_mtu(1400);
        assert_eq!(
            compile(&a, IpType::V4, &HwCaps::FULL),
            Err(CompileError::Unsupported {
                fields: AttribMask::empty(),
                ext: ExtAttribMask::MTU,
            })
        );
    }

    #[test]
    fn invalid_attrib_is_reported() {
        let mut a = RuleAttrib::new();
        a.set_dst_port_range(10, 1);
        assert!(matches!(
            compile(&a, IpType::V4, &HwCaps::FULL),
            Err(CompileError::InvalidAttribute(AttribError::PortRange { .. }))
        ));

        let a = v4_tcp();
        assert!(matches!(
            compile(&a, IpType::V6, &HwCaps::FULL),
            Err(CompileError::InvalidAttribute(
                AttribError::FamilyMismatch { .. }
            ))
        ));
    }

    #[test]
    fn deterministic() {
        let mut a = v4_tcp();
        a.set_src_net("10.0.0.0/8".parse().unwrap())
            .set_dst_port_range(1000, 2000)
            .set_dst_port(22)
            .set_tcp_syn();
        let one = compile(&a, IpType::V4, &HwCaps::FULL).unwrap();
        let two = compile(&a.clone(), IpType::V4, &HwCaps::FULL).unwrap();
        assert_eq!(one, two);
        assert_eq!(fingerprint(&one).unwrap(), fingerprint(&two).unwrap());
    }

    #[test]
    fn empty_attrib_matches_all() {
        let eq = compile(&RuleAttrib::new(), IpType::V6, &HwCaps::FULL);
        assert!(eq.unwrap().is_empty());
    }

    #[test]
    fn check_eq_against_caps() {
        let mut a = v4_tcp();
        a.set_src_port_range(1, 2).set_dst_port_range(3, 4);
        let eq = compile(&a, IpType::V4, &HwCaps::FULL).unwrap();
        assert!(check_eq(&eq, &HwCaps::FULL).is_ok());

        let caps = HwCaps { ihl_range16: 1, ..HwCaps::FULL };
        assert_eq!(
            check_eq(&eq, &caps),
            Err(CompileError::SlotExhausted {
                kind: SlotKind::Range16,
                field: AttribMask::empty(),
            })
        );
    }

    #[test]
    fn lower_flt_keeps_options() {
        let mut rule = FltRule::new(
            crate::api::FltAction::Exception,
            crate::api::RtTblRef::Idx(3),
            v4_tcp(),
        );
        rule.opts.rule_id = 9;
        let low = lower_flt(&rule, IpType::V4, &HwCaps::FULL).unwrap();
        assert_eq!(low.opts.rule_id, 9);
        assert_eq!(low.rt_tbl, crate::api::RtTblRef::Idx(3));
        assert!(matches!(
            low.matcher,
            FltMatch::Eq(ref eq) if eq.protocol == Some(6)
        ));
        assert_eq!(lower_flt(&low, IpType::V4, &HwCaps::FULL).unwrap(), low);
    }
}
