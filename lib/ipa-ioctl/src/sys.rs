// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The IPA driver's ioctl structures.
//!
//! These mirror `linux/msm_ipa.h` field for field so that they may be
//! handed straight to ioctl(2). A C `enum` is a `u32` here. The v1
//! requests end in a flexible array member, written as a zero-length
//! array; see [`Trailing`].

#![allow(non_camel_case_types)]

use ipa::api::Eq16;
use ipa::api::Eq32;
use ipa::api::EquationSet;
use ipa::api::FltMatch;
use ipa::api::FltRule;
use ipa::api::HdrRef;
use ipa::api::L3Match;
use ipa::api::MaskEq32;
use ipa::api::MaskEq128;
use ipa::api::RESOURCE_NAME_MAX;
use ipa::api::RangeEq16;
use ipa::api::RtRule;
use ipa::api::RtTblRef;
use ipa::api::RuleAttrib;
use ipa::api::RuleOpts;
use std::net::Ipv6Addr;

pub const ETH_ALEN: usize = 6;

/// Every structure here is plain old data, so all zeroes is a valid
/// value and the natural "nothing requested" starting point.
macro_rules! zeroed_default {
    ($($t:ty),* $(,)?) => {
        $(
            impl Default for $t {
                fn default() -> Self {
                    // SAFETY: Integers, arrays of integers, and unions
                    // thereof. Zero is valid for every field.
                    unsafe { core::mem::zeroed() }
                }
            }
        )*
    };
}

// ======================================================================
// Attributes
// ======================================================================

#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct ipa_field_val_equation_gen {
    pub flow: u32,
    pub inner_iptype: u32,
    pub field: u32,
    pub value: u32,
}

#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct ipa_rule_attrib_v4 {
    pub tos: u8,
    pub protocol: u8,
    pub src_addr: u32,
    pub src_addr_mask: u32,
    pub dst_addr: u32,
    pub dst_addr_mask: u32,
}

#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct ipa_rule_attrib_v6 {
    pub tc: u8,
    pub flow_label: u32,
    pub next_hdr: u8,
    pub src_addr: [u32; 4],
    pub src_addr_mask: [u32; 4],
    pub dst_addr: [u32; 4],
    pub dst_addr_mask: [u32; 4],
}

#[derive(Clone, Copy)]
#[repr(C)]
pub union ipa_rule_attrib_u {
    pub v4: ipa_rule_attrib_v4,
    pub v6: ipa_rule_attrib_v6,
}

#[derive(Clone, Copy)]
#[repr(C)]
pub struct ipa_rule_attrib {
    pub attrib_mask: u32,
    pub src_port_lo: u16,
    pub src_port_hi: u16,
    pub dst_port_lo: u16,
    pub dst_port_hi: u16,
    pub type_: u8,
    pub code: u8,
    pub tos_value: u8,
    pub tos_mask: u8,
    pub spi: u32,
    pub src_port: u16,
    pub dst_port: u16,
    pub meta_data: u32,
    pub meta_data_mask: u32,
    pub src_mac_addr: [u8; ETH_ALEN],
    pub src_mac_addr_mask: [u8; ETH_ALEN],
    pub dst_mac_addr: [u8; ETH_ALEN],
    pub dst_mac_addr_mask: [u8; ETH_ALEN],
    pub ether_type: u16,
    pub u: ipa_rule_attrib_u,
    pub vlan_id: u16,
    pub payload_length: u16,
    pub ext_attrib_mask: u32,
    pub l2tp_udp_next_hdr: u8,
    pub p_exception: u8,
    pub fld_val_eq: ipa_field_val_equation_gen,
}

/// The driver keeps IPv6 addresses as four host-order words, most
/// significant first.
fn v6_words(addr: Ipv6Addr) -> [u32; 4] {
    let b = addr.octets();
    core::array::from_fn(|i| {
        u32::from_be_bytes([b[4 * i], b[4 * i + 1], b[4 * i + 2], b[4 * i + 3]])
    })
}

impl From<&RuleAttrib> for ipa_rule_attrib {
    fn from(a: &RuleAttrib) -> Self {
        let mut raw = Self {
            attrib_mask: a.mask().bits(),
            ext_attrib_mask: a.ext_mask().bits(),
            ..Default::default()
        };

        if let Some((lo, hi)) = a.src_port_range() {
            raw.src_port_lo = lo;
            raw.src_port_hi = hi;
        }
        if let Some((lo, hi)) = a.dst_port_range() {
            raw.dst_port_lo = lo;
            raw.dst_port_hi = hi;
        }
        raw.src_port = a.src_port().unwrap_or_default();
        raw.dst_port = a.dst_port().unwrap_or_default();
        raw.type_ = a.icmp_type().unwrap_or_default();
        raw.code = a.icmp_code().unwrap_or_default();
        if let Some((value, mask)) = a.tos_masked() {
            raw.tos_value = value;
            raw.tos_mask = mask;
        }
        raw.spi = a.spi().unwrap_or_default();
        if let Some((value, mask)) = a.meta_data() {
            raw.meta_data = value;
            raw.meta_data_mask = mask;
        }
        if let Some((_, m)) = a.src_mac() {
            raw.src_mac_addr = m.addr.bytes();
            raw.src_mac_addr_mask = m.mask.bytes();
        }
        if let Some((_, m)) = a.dst_mac() {
            raw.dst_mac_addr = m.addr.bytes();
            raw.dst_mac_addr_mask = m.mask.bytes();
        }
        raw.ether_type = a.ether_type().unwrap_or_default();
        raw.vlan_id = a.vlan_id().unwrap_or_default();
        raw.payload_length = a.mtu().unwrap_or_default();

        match a.l3() {
            L3Match::Any => (),
            L3Match::V4(v4) => {
                raw.u.v4 = ipa_rule_attrib_v4 {
                    tos: v4.tos,
                    protocol: v4.protocol,
                    src_addr: u32::from(v4.src_addr),
                    src_addr_mask: u32::from(v4.src_mask),
                    dst_addr: u32::from(v4.dst_addr),
                    dst_addr_mask: u32::from(v4.dst_mask),
                };
            }
            L3Match::V6(v6) => {
                raw.u.v6 = ipa_rule_attrib_v6 {
                    tc: v6.tc,
                    flow_label: v6.flow_label,
                    next_hdr: v6.next_hdr,
                    src_addr: v6_words(v6.src_addr),
                    src_addr_mask: v6_words(v6.src_mask),
                    dst_addr: v6_words(v6.dst_addr),
                    dst_addr_mask: v6_words(v6.dst_mask),
                };
            }
        }

        if let Some(fv) = a.field_val_eq() {
            raw.fld_val_eq = ipa_field_val_equation_gen {
                flow: fv.flow as u32,
                inner_iptype: fv.inner_ip.to_raw(),
                field: fv.field as u32,
                value: fv.value,
            };
        }

        raw
    }
}

// ======================================================================
// Equations
// ======================================================================

#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct ipa_ipfltr_eq_16 {
    pub offset: i8,
    pub value: u16,
}

#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct ipa_ipfltr_eq_32 {
    pub offset: i8,
    pub value: u32,
}

#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct ipa_ipfltr_mask_eq_128 {
    pub offset: i8,
    pub mask: [u8; 16],
    pub value: [u8; 16],
}

#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct ipa_ipfltr_mask_eq_32 {
    pub offset: i8,
    pub mask: u32,
    pub value: u32,
}

#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct ipa_ipfltr_range_eq_16 {
    pub offset: i8,
    pub range_low: u16,
    pub range_high: u16,
}

#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct ipa_ipfltri_rule_eq {
    pub rule_eq_bitmap: u16,
    pub tos_eq_present: u8,
    pub tos_eq: u8,
    pub protocol_eq_present: u8,
    pub protocol_eq: u8,
    pub num_ihl_offset_range_16: u8,
    pub ihl_offset_range_16: [ipa_ipfltr_range_eq_16; 2],
    pub num_offset_meq_32: u8,
    pub offset_meq_32: [ipa_ipfltr_mask_eq_32; 2],
    pub tc_eq_present: u8,
    pub tc_eq: u8,
    pub fl_eq_present: u8,
    pub fl_eq: u32,
    pub ihl_offset_eq_16_present: u8,
    pub ihl_offset_eq_16: ipa_ipfltr_eq_16,
    pub ihl_offset_eq_32_present: u8,
    pub ihl_offset_eq_32: ipa_ipfltr_eq_32,
    pub num_ihl_offset_meq_32: u8,
    pub ihl_offset_meq_32: [ipa_ipfltr_mask_eq_32; 2],
    pub num_offset_meq_128: u8,
    pub offset_meq_128: [ipa_ipfltr_mask_eq_128; 2],
    pub metadata_meq32_present: u8,
    pub metadata_meq32: ipa_ipfltr_mask_eq_32,
    pub ipv4_frag_eq_present: u8,
}

impl From<MaskEq32> for ipa_ipfltr_mask_eq_32 {
    fn from(m: MaskEq32) -> Self {
        Self { offset: m.offset, mask: m.mask, value: m.value }
    }
}

impl From<ipa_ipfltr_mask_eq_32> for MaskEq32 {
    fn from(m: ipa_ipfltr_mask_eq_32) -> Self {
        Self { offset: m.offset, mask: m.mask, value: m.value }
    }
}

/// Copy up to two slots into the fixed-size wire array.
fn slots<S: Copy, W: Copy + Default + From<S>>(src: &[S]) -> (u8, [W; 2]) {
    let mut out = [W::default(); 2];
    for (w, s) in out.iter_mut().zip(src) {
        *w = W::from(*s);
    }
    (src.len().min(2) as u8, out)
}

impl From<&EquationSet> for ipa_ipfltri_rule_eq {
    fn from(eq: &EquationSet) -> Self {
        let mut raw = Self {
            rule_eq_bitmap: eq.rule_eq_bitmap(),
            ..Default::default()
        };

        if let Some(v) = eq.tos {
            raw.tos_eq_present = 1;
            raw.tos_eq = v;
        }
        if let Some(v) = eq.protocol {
            raw.protocol_eq_present = 1;
            raw.protocol_eq = v;
        }
        if let Some(v) = eq.tc {
            raw.tc_eq_present = 1;
            raw.tc_eq = v;
        }
        if let Some(v) = eq.flow_label {
            raw.fl_eq_present = 1;
            raw.fl_eq = v;
        }

        (raw.num_ihl_offset_range_16, raw.ihl_offset_range_16) =
            slots::<_, ipa_ipfltr_range_eq_16>(&eq.ihl_range16);
        (raw.num_offset_meq_32, raw.offset_meq_32) = slots(&eq.meq32);
        (raw.num_ihl_offset_meq_32, raw.ihl_offset_meq_32) =
            slots(&eq.ihl_meq32);
        (raw.num_offset_meq_128, raw.offset_meq_128) =
            slots::<_, ipa_ipfltr_mask_eq_128>(&eq.meq128);

        if let Some(e) = eq.ihl_eq16 {
            raw.ihl_offset_eq_16_present = 1;
            raw.ihl_offset_eq_16 =
                ipa_ipfltr_eq_16 { offset: e.offset, value: e.value };
        }
        if let Some(e) = eq.ihl_eq32 {
            raw.ihl_offset_eq_32_present = 1;
            raw.ihl_offset_eq_32 =
                ipa_ipfltr_eq_32 { offset: e.offset, value: e.value };
        }
        if let Some(m) = eq.metadata {
            raw.metadata_meq32_present = 1;
            raw.metadata_meq32 = m.into();
        }
        raw.ipv4_frag_eq_present = eq.frag as u8;

        raw
    }
}

impl From<RangeEq16> for ipa_ipfltr_range_eq_16 {
    fn from(r: RangeEq16) -> Self {
        Self { offset: r.offset, range_low: r.low, range_high: r.high }
    }
}

impl From<MaskEq128> for ipa_ipfltr_mask_eq_128 {
    fn from(m: MaskEq128) -> Self {
        Self { offset: m.offset, mask: m.mask, value: m.value }
    }
}

impl ipa_ipfltri_rule_eq {
    /// Read back an equation set the driver generated.
    ///
    /// The driver's slot counts and presence flags are trusted over
    /// its bitmap, which is checked against them.
    pub fn to_eq(&self) -> Result<EquationSet, String> {
        fn count(n: u8, what: &str) -> Result<usize, String> {
            match n {
                0..=2 => Ok(usize::from(n)),
                _ => Err(format!("{what}: {n} slots")),
            }
        }

        let mut eq = EquationSet {
            tos: (self.tos_eq_present != 0).then_some(self.tos_eq),
            protocol: (self.protocol_eq_present != 0)
                .then_some(self.protocol_eq),
            tc: (self.tc_eq_present != 0).then_some(self.tc_eq),
            flow_label: (self.fl_eq_present != 0).then_some(self.fl_eq),
            frag: self.ipv4_frag_eq_present != 0,
            ..Default::default()
        };

        let n = count(self.num_ihl_offset_range_16, "ihl_offset_range_16")?;
        for r in &self.ihl_offset_range_16[..n] {
            let r = RangeEq16 {
                offset: r.offset,
                low: r.range_low,
                high: r.range_high,
            };
            // Counts are checked above; pushes cannot overflow.
            let _ = eq.ihl_range16.push(r);
        }

        let n = count(self.num_offset_meq_32, "offset_meq_32")?;
        for m in &self.offset_meq_32[..n] {
            let _ = eq.meq32.push((*m).into());
        }

        let n = count(self.num_ihl_offset_meq_32, "ihl_offset_meq_32")?;
        for m in &self.ihl_offset_meq_32[..n] {
            let _ = eq.ihl_meq32.push((*m).into());
        }

        let n = count(self.num_offset_meq_128, "offset_meq_128")?;
        for m in &self.offset_meq_128[..n] {
            let m =
                MaskEq128 { offset: m.offset, mask: m.mask, value: m.value };
            let _ = eq.meq128.push(m);
        }

        if self.ihl_offset_eq_16_present != 0 {
            let e = self.ihl_offset_eq_16;
            eq.ihl_eq16 = Some(Eq16 { offset: e.offset, value: e.value });
        }
        if self.ihl_offset_eq_32_present != 0 {
            let e = self.ihl_offset_eq_32;
            eq.ihl_eq32 = Some(Eq32 { offset: e.offset, value: e.value });
        }
        if self.metadata_meq32_present != 0 {
            eq.metadata = Some(self.metadata_meq32.into());
        }

        // Extra bits in the driver's bitmap are tolerated. A slot it
        // describes but leaves out of the bitmap is not.
        let have = eq.rule_eq_bitmap();
        if have & !self.rule_eq_bitmap != 0 {
            return Err(format!(
                "rule_eq_bitmap {:#06x} is missing {:#06x}",
                self.rule_eq_bitmap,
                have & !self.rule_eq_bitmap
            ));
        }

        Ok(eq)
    }
}

// ======================================================================
// Rules
// ======================================================================

#[derive(Clone, Copy)]
#[repr(C)]
pub struct ipa_flt_rule {
    pub retain_hdr: u8,
    pub to_uc: u8,
    pub action: u32,
    pub rt_tbl_hdl: u32,
    pub attrib: ipa_rule_attrib,
    pub eq_attrib: ipa_ipfltri_rule_eq,
    pub rt_tbl_idx: u32,
    pub eq_attrib_type: u8,
    pub max_prio: u8,
    pub hashable: u8,
    pub rule_id: u16,
    pub set_metadata: u8,
    pub pdn_idx: u8,
}

#[derive(Clone, Copy)]
#[repr(C)]
pub struct ipa_flt_rule_v2 {
    pub retain_hdr: u8,
    pub to_uc: u8,
    pub action: u32,
    pub rt_tbl_hdl: u32,
    pub attrib: ipa_rule_attrib,
    pub eq_attrib: ipa_ipfltri_rule_eq,
    pub rt_tbl_idx: u32,
    pub eq_attrib_type: u8,
    pub max_prio: u8,
    pub hashable: u8,
    pub rule_id: u16,
    pub set_metadata: u8,
    pub pdn_idx: u8,
    pub enable_stats: u8,
    pub cnt_idx: u8,
    pub close_aggr_irq_mod: u8,
}

#[derive(Clone, Copy)]
#[repr(C)]
pub struct ipa_rt_rule {
    pub dst: u32,
    pub hdr_hdl: u32,
    pub hdr_proc_ctx_hdl: u32,
    pub attrib: ipa_rule_attrib,
    pub max_prio: u8,
    pub hashable: u8,
    pub retain_hdr: u8,
    pub coalesce: u8,
}

#[derive(Clone, Copy)]
#[repr(C)]
pub struct ipa_rt_rule_v2 {
    pub dst: u32,
    pub hdr_hdl: u32,
    pub hdr_proc_ctx_hdl: u32,
    pub attrib: ipa_rule_attrib,
    pub max_prio: u8,
    pub hashable: u8,
    pub retain_hdr: u8,
    pub coalesce: u8,
    pub enable_stats: u8,
    pub cnt_idx: u8,
    pub close_aggr_irq_mod: u8,
}

impl From<&FltRule> for ipa_flt_rule {
    fn from(r: &FltRule) -> Self {
        let mut raw = Self {
            retain_hdr: r.retain_hdr as u8,
            to_uc: r.to_uc as u8,
            action: r.action as u32,
            max_prio: r.opts.max_prio as u8,
            hashable: r.opts.hashable as u8,
            rule_id: r.opts.rule_id,
            set_metadata: r.set_metadata as u8,
            pdn_idx: r.pdn_idx,
            ..Default::default()
        };

        match r.rt_tbl {
            RtTblRef::Hdl(h) => raw.rt_tbl_hdl = h,
            RtTblRef::Idx(i) => raw.rt_tbl_idx = i,
        }

        match &r.matcher {
            FltMatch::Attrib(a) => raw.attrib = a.into(),
            FltMatch::Eq(eq) => {
                raw.eq_attrib = eq.into();
                raw.eq_attrib_type = 1;
            }
        }

        raw
    }
}

/// `enable_stats`, `cnt_idx`, `close_aggr_irq_mod`.
fn v2_opts(opts: &RuleOpts) -> (u8, u8, u8) {
    (
        opts.cnt_idx.is_some() as u8,
        opts.cnt_idx.unwrap_or_default(),
        opts.close_aggr_irq_mod as u8,
    )
}

impl From<&FltRule> for ipa_flt_rule_v2 {
    fn from(r: &FltRule) -> Self {
        let v1 = ipa_flt_rule::from(r);
        let (enable_stats, cnt_idx, close_aggr_irq_mod) = v2_opts(&r.opts);
        Self {
            retain_hdr: v1.retain_hdr,
            to_uc: v1.to_uc,
            action: v1.action,
            rt_tbl_hdl: v1.rt_tbl_hdl,
            attrib: v1.attrib,
            eq_attrib: v1.eq_attrib,
            rt_tbl_idx: v1.rt_tbl_idx,
            eq_attrib_type: v1.eq_attrib_type,
            max_prio: v1.max_prio,
            hashable: v1.hashable,
            rule_id: v1.rule_id,
            set_metadata: v1.set_metadata,
            pdn_idx: v1.pdn_idx,
            enable_stats,
            cnt_idx,
            close_aggr_irq_mod,
        }
    }
}

impl From<&RtRule> for ipa_rt_rule {
    fn from(r: &RtRule) -> Self {
        let (hdr_hdl, hdr_proc_ctx_hdl) = match r.hdr {
            HdrRef::None => (0, 0),
            HdrRef::Hdr(h) => (h, 0),
            HdrRef::ProcCtx(h) => (0, h),
        };

        Self {
            dst: r.dst.to_raw(),
            hdr_hdl,
            hdr_proc_ctx_hdl,
            attrib: (&r.attrib).into(),
            max_prio: r.opts.max_prio as u8,
            hashable: r.opts.hashable as u8,
            retain_hdr: r.retain_hdr as u8,
            coalesce: r.coalesce as u8,
        }
    }
}

impl From<&RtRule> for ipa_rt_rule_v2 {
    fn from(r: &RtRule) -> Self {
        let v1 = ipa_rt_rule::from(r);
        let (enable_stats, cnt_idx, close_aggr_irq_mod) = v2_opts(&r.opts);
        Self {
            dst: v1.dst,
            hdr_hdl: v1.hdr_hdl,
            hdr_proc_ctx_hdl: v1.hdr_proc_ctx_hdl,
            attrib: v1.attrib,
            max_prio: v1.max_prio,
            hashable: v1.hashable,
            retain_hdr: v1.retain_hdr,
            coalesce: v1.coalesce,
            enable_stats,
            cnt_idx,
            close_aggr_irq_mod,
        }
    }
}

// ======================================================================
// Per-rule records
// ======================================================================

#[derive(Clone, Copy)]
#[repr(C)]
pub struct ipa_flt_rule_add {
    pub rule: ipa_flt_rule,
    pub at_rear: u8,
    pub flt_rule_hdl: u32,
    pub status: i32,
}

#[derive(Clone, Copy)]
#[repr(C)]
pub struct ipa_flt_rule_add_v2 {
    pub at_rear: u8,
    pub flt_rule_hdl: u32,
    pub status: i32,
    pub rule: ipa_flt_rule_v2,
}

#[derive(Clone, Copy)]
#[repr(C)]
pub struct ipa_rt_rule_add {
    pub rule: ipa_rt_rule,
    pub at_rear: u8,
    pub rt_rule_hdl: u32,
    pub status: i32,
}

#[derive(Clone, Copy)]
#[repr(C)]
pub struct ipa_rt_rule_add_v2 {
    pub at_rear: u8,
    pub rt_rule_hdl: u32,
    pub status: i32,
    pub rule: ipa_rt_rule_v2,
}

#[derive(Clone, Copy)]
#[repr(C)]
pub struct ipa_rt_rule_add_ext {
    pub rule: ipa_rt_rule,
    pub at_rear: u8,
    pub rt_rule_hdl: u32,
    pub status: i32,
    pub rule_id: u16,
}

#[derive(Clone, Copy)]
#[repr(C)]
pub struct ipa_rt_rule_add_ext_v2 {
    pub at_rear: u8,
    pub rt_rule_hdl: u32,
    pub status: i32,
    pub rule_id: u16,
    pub rule: ipa_rt_rule_v2,
}

#[derive(Clone, Copy)]
#[repr(C)]
pub struct ipa_flt_rule_mdfy {
    pub rule: ipa_flt_rule,
    pub rule_hdl: u32,
    pub status: i32,
}

#[derive(Clone, Copy)]
#[repr(C)]
pub struct ipa_flt_rule_mdfy_v2 {
    pub rule_hdl: u32,
    pub status: i32,
    pub rule: ipa_flt_rule_v2,
}

#[derive(Clone, Copy)]
#[repr(C)]
pub struct ipa_rt_rule_mdfy {
    pub rule: ipa_rt_rule,
    pub rt_rule_hdl: u32,
    pub status: i32,
}

#[derive(Clone, Copy)]
#[repr(C)]
pub struct ipa_rt_rule_mdfy_v2 {
    pub rt_rule_hdl: u32,
    pub status: i32,
    pub rule: ipa_rt_rule_v2,
}

/// Used for both filter and routing deletes.
#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct ipa_rule_del {
    pub hdl: u32,
    pub status: i32,
}

/// The handle and status of a per-rule record.
pub trait RuleRecord: Copy {
    fn hdl(&self) -> u32;
    fn status(&self) -> i32;
}

macro_rules! rule_record {
    ($($t:ty => $hdl:ident),* $(,)?) => {
        $(
            impl RuleRecord for $t {
                fn hdl(&self) -> u32 {
                    self.$hdl
                }

                fn status(&self) -> i32 {
                    self.status
                }
            }
        )*
    };
}

rule_record! {
    ipa_flt_rule_add => flt_rule_hdl,
    ipa_flt_rule_add_v2 => flt_rule_hdl,
    ipa_rt_rule_add => rt_rule_hdl,
    ipa_rt_rule_add_v2 => rt_rule_hdl,
    ipa_rt_rule_add_ext => rt_rule_hdl,
    ipa_rt_rule_add_ext_v2 => rt_rule_hdl,
    ipa_flt_rule_mdfy => rule_hdl,
    ipa_flt_rule_mdfy_v2 => rule_hdl,
    ipa_rt_rule_mdfy => rt_rule_hdl,
    ipa_rt_rule_mdfy_v2 => rt_rule_hdl,
    ipa_rule_del => hdl,
}

// ======================================================================
// Requests
// ======================================================================

#[derive(Clone, Copy)]
#[repr(C)]
pub struct ipa_ioc_add_flt_rule {
    pub commit: u8,
    pub ip: u32,
    pub ep: u32,
    pub global: u8,
    pub num_rules: u8,
    pub rules: [ipa_flt_rule_add; 0],
}

#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct ipa_ioc_add_flt_rule_v2 {
    pub commit: u8,
    pub ip: u32,
    pub ep: u32,
    pub global: u8,
    pub num_rules: u8,
    pub flt_rule_size: u32,
    pub reserved1: u32,
    pub reserved2: u16,
    pub reserved3: u8,
    pub rules: u64,
}

#[derive(Clone, Copy)]
#[repr(C)]
pub struct ipa_ioc_add_flt_rule_after {
    pub commit: u8,
    pub ip: u32,
    pub ep: u32,
    pub num_rules: u8,
    pub add_after_hdl: u32,
    pub rules: [ipa_flt_rule_add; 0],
}

#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct ipa_ioc_add_flt_rule_after_v2 {
    pub commit: u8,
    pub ip: u32,
    pub ep: u32,
    pub num_rules: u8,
    pub add_after_hdl: u32,
    pub flt_rule_size: u32,
    pub reserved: u32,
    pub rules: u64,
}

#[derive(Clone, Copy)]
#[repr(C)]
pub struct ipa_ioc_add_rt_rule_ext {
    pub commit: u8,
    pub ip: u32,
    pub rt_tbl_name: [u8; RESOURCE_NAME_MAX],
    pub num_rules: u8,
    pub rules: [ipa_rt_rule_add_ext; 0],
}

#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct ipa_ioc_add_rt_rule_ext_v2 {
    pub commit: u8,
    pub ip: u32,
    pub rt_tbl_name: [u8; RESOURCE_NAME_MAX],
    pub num_rules: u8,
    pub rule_add_ext_size: u32,
    pub reserved1: u32,
    pub reserved2: u8,
    pub rules: u64,
}

#[derive(Clone, Copy)]
#[repr(C)]
pub struct ipa_ioc_add_rt_rule_after {
    pub commit: u8,
    pub ip: u32,
    pub rt_tbl_name: [u8; RESOURCE_NAME_MAX],
    pub num_rules: u8,
    pub add_after_hdl: u32,
    pub rules: [ipa_rt_rule_add; 0],
}

#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct ipa_ioc_add_rt_rule_after_v2 {
    pub commit: u8,
    pub ip: u32,
    pub rt_tbl_name: [u8; RESOURCE_NAME_MAX],
    pub num_rules: u8,
    pub add_after_hdl: u32,
    pub rule_add_size: u32,
    pub reserved: u8,
    pub rules: u64,
}

#[derive(Clone, Copy)]
#[repr(C)]
pub struct ipa_ioc_mdfy_flt_rule {
    pub commit: u8,
    pub ip: u32,
    pub num_rules: u8,
    pub rules: [ipa_flt_rule_mdfy; 0],
}

#[derive(Clone, Copy)]
#[repr(C)]
pub struct ipa_ioc_mdfy_rt_rule {
    pub commit: u8,
    pub ip: u32,
    pub num_rules: u8,
    pub rules: [ipa_rt_rule_mdfy; 0],
}

/// `ipa_ioc_mdfy_flt_rule_v2` and `ipa_ioc_mdfy_rt_rule_v2` share
/// this layout.
#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct ipa_ioc_mdfy_rule_v2 {
    pub commit: u8,
    pub ip: u32,
    pub num_rules: u8,
    pub rule_mdfy_size: u32,
    pub reserved: u8,
    pub rules: u64,
}

/// `ipa_ioc_del_flt_rule` and `ipa_ioc_del_rt_rule` share this
/// layout.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct ipa_ioc_del_rule {
    pub commit: u8,
    pub ip: u32,
    pub num_hdls: u8,
    pub hdl: [ipa_rule_del; 0],
}

#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct ipa_ioc_get_rt_tbl {
    pub ip: u32,
    pub name: [u8; RESOURCE_NAME_MAX],
    pub hdl: u32,
}

#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct ipa_ioc_get_rt_tbl_indx {
    pub ip: u32,
    pub name: [u8; RESOURCE_NAME_MAX],
    pub idx: u32,
}

#[derive(Clone, Copy)]
#[repr(C)]
pub struct ipa_ioc_generate_flt_eq {
    pub ip: u32,
    pub attrib: ipa_rule_attrib,
    pub eq_attrib: ipa_ipfltri_rule_eq,
}

#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct ipa_flt_rt_counter_alloc {
    pub num_counters: u8,
    pub allow_less: u8,
    pub start_id: u8,
    pub end_id: u8,
}

#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct ipa_ioc_flt_rt_counter_alloc {
    pub hdl: i32,
    pub hw_counter: ipa_flt_rt_counter_alloc,
    pub sw_counter: ipa_flt_rt_counter_alloc,
}

#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct ipa_flt_rt_stats {
    pub num_pkts: u32,
    pub num_pkts_hash: u32,
    pub num_bytes: u64,
}

#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct ipa_ioc_flt_rt_query {
    pub start_id: u8,
    pub end_id: u8,
    pub reset: u8,
    pub stats_size: u32,
    pub reserved: u8,
    pub stats: u64,
}

zeroed_default!(
    ipa_field_val_equation_gen,
    ipa_rule_attrib,
    ipa_flt_rule,
    ipa_rt_rule,
    ipa_ioc_generate_flt_eq,
);

/// A v1 request header whose records follow it in the same buffer.
pub trait Trailing: Copy {
    type Rec: RuleRecord;

    /// Where the first record starts.
    const REC_OFF: usize;
}

macro_rules! trailing {
    ($($t:ty => $field:ident: $rec:ty),* $(,)?) => {
        $(
            impl Trailing for $t {
                type Rec = $rec;
                const REC_OFF: usize = core::mem::offset_of!($t, $field);
            }
        )*
    };
}

trailing! {
    ipa_ioc_add_flt_rule => rules: ipa_flt_rule_add,
    ipa_ioc_add_flt_rule_after => rules: ipa_flt_rule_add,
    ipa_ioc_add_rt_rule_ext => rules: ipa_rt_rule_add_ext,
    ipa_ioc_add_rt_rule_after => rules: ipa_rt_rule_add,
    ipa_ioc_mdfy_flt_rule => rules: ipa_flt_rule_mdfy,
    ipa_ioc_mdfy_rt_rule => rules: ipa_rt_rule_mdfy,
    ipa_ioc_del_rule => hdl: ipa_rule_del,
}

/// A header and its records laid out contiguously.
pub struct TrailingBuf<H: Trailing> {
    // u64 words keep the buffer aligned for every header and record.
    buf: Vec<u64>,
    len: usize,
    _hdr: core::marker::PhantomData<H>,
}

impl<H: Trailing> TrailingBuf<H> {
    pub fn new(hdr: H, recs: &[H::Rec]) -> Self {
        let rec_sz = size_of::<H::Rec>();
        let bytes =
            (H::REC_OFF + recs.len() * rec_sz).max(size_of::<H>());
        let mut buf = vec![0u64; bytes.div_ceil(size_of::<u64>())];
        let base = buf.as_mut_ptr().cast::<u8>();

        // SAFETY: `buf` is at least `bytes` long and 8-byte aligned.
        // `REC_OFF` is a multiple of the record alignment, as is the
        // record size.
        unsafe {
            base.cast::<H>().write(hdr);
            core::ptr::copy_nonoverlapping(
                recs.as_ptr(),
                base.add(H::REC_OFF).cast::<H::Rec>(),
                recs.len(),
            );
        }

        Self { buf, len: recs.len(), _hdr: core::marker::PhantomData }
    }

    pub fn as_mut_ptr(&mut self) -> *mut H {
        self.buf.as_mut_ptr().cast()
    }

    pub fn records(&self) -> Vec<H::Rec> {
        let base = self.buf.as_ptr().cast::<u8>();
        (0..self.len)
            .map(|i| {
                let off = H::REC_OFF + i * size_of::<H::Rec>();
                // SAFETY: Within the buffer and aligned, as in `new()`.
                unsafe { base.add(off).cast::<H::Rec>().read() }
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use core::mem::offset_of;
    use std::net::Ipv4Addr;

    #[test]
    fn eq_layout() {
        assert_eq!(size_of::<ipa_ipfltr_range_eq_16>(), 6);
        assert_eq!(size_of::<ipa_ipfltr_mask_eq_32>(), 12);
        assert_eq!(size_of::<ipa_ipfltr_mask_eq_128>(), 33);
        assert_eq!(offset_of!(ipa_ipfltri_rule_eq, ihl_offset_range_16), 8);
        assert_eq!(offset_of!(ipa_ipfltri_rule_eq, offset_meq_32), 24);
        assert_eq!(offset_of!(ipa_ipfltri_rule_eq, fl_eq), 52);
        assert_eq!(offset_of!(ipa_ipfltri_rule_eq, offset_meq_128), 101);
        assert_eq!(offset_of!(ipa_ipfltri_rule_eq, metadata_meq32), 168);
        assert_eq!(size_of::<ipa_ipfltri_rule_eq>(), 184);
    }

    #[test]
    fn attrib_layout() {
        assert_eq!(offset_of!(ipa_rule_attrib, ether_type), 56);
        assert_eq!(offset_of!(ipa_rule_attrib, u), 60);
        assert_eq!(size_of::<ipa_rule_attrib_u>(), 76);
        assert_eq!(offset_of!(ipa_rule_attrib, fld_val_eq), 148);
        assert_eq!(size_of::<ipa_rule_attrib>(), 164);
    }

    #[test]
    fn trailing_records_follow_header() {
        assert_eq!(<ipa_ioc_del_rule as Trailing>::REC_OFF, 12);

        let hdr =
            ipa_ioc_del_rule { commit: 1, ip: 1, num_hdls: 2, hdl: [] };
        let recs = [
            ipa_rule_del { hdl: 7, status: -1 },
            ipa_rule_del { hdl: 9, status: -1 },
        ];
        let buf = TrailingBuf::new(hdr, &recs);
        let back = buf.records();
        assert_eq!(back.len(), 2);
        assert_eq!(back[1].hdl, 9);
        assert_eq!(back[0].status(), -1);
    }

    #[test]
    fn attrib_fields() {
        let mut a = RuleAttrib::default();
        a.set_protocol(6).set_dst_port(443).set_dst_v4(
            Ipv4Addr::new(10, 0, 0, 0),
            Ipv4Addr::new(255, 0, 0, 0),
        );

        let raw = ipa_rule_attrib::from(&a);
        assert_eq!(raw.attrib_mask, a.mask().bits());
        assert_eq!(raw.dst_port, 443);
        assert_eq!(raw.src_port, 0);
        // SAFETY: An IPv4 attribute fills the v4 arm.
        let v4 = unsafe { raw.u.v4 };
        assert_eq!(v4.protocol, 6);
        assert_eq!(v4.dst_addr, 0x0a00_0000);
        assert_eq!(v4.dst_addr_mask, 0xff00_0000);
    }

    #[test]
    fn eq_round_trip_and_bad_counts() {
        let mut eq = EquationSet::default();
        eq.protocol = Some(17);
        eq.ihl_range16
            .push(RangeEq16 { offset: 2, low: 1000, high: 2000 })
            .unwrap();
        eq.frag = true;

        let mut raw = ipa_ipfltri_rule_eq::from(&eq);
        assert_eq!(raw.rule_eq_bitmap, eq.rule_eq_bitmap());
        assert_eq!(raw.to_eq().unwrap(), eq);

        raw.num_offset_meq_32 = 3;
        assert!(raw.to_eq().is_err());
    }

    #[test]
    fn v2_rule_carries_counter() {
        let mut r = FltRule::new(
            ipa::api::FltAction::Exception,
            RtTblRef::Idx(3),
            RuleAttrib::default(),
        );
        r.opts.cnt_idx = Some(9);

        let raw = ipa_flt_rule_v2::from(&r);
        assert_eq!((raw.enable_stats, raw.cnt_idx), (1, 9));
        assert_eq!(raw.rt_tbl_idx, 3);
        assert_eq!(raw.rt_tbl_hdl, 0);
        assert_eq!(raw.eq_attrib_type, 0);
    }
}
