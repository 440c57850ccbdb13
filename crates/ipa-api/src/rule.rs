// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Filter and routing rules.

use crate::RuleKind;
use crate::attrib::RuleAttrib;
use crate::client::Client;
use crate::eq::EquationSet;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// What the hardware does with a packet a filter rule matches.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
#[repr(u32)]
pub enum FltAction {
    /// Hand the packet to a routing table.
    #[default]
    Routing = 0,
    SrcNat = 1,
    DstNat = 2,
    /// Send the packet to the exception path.
    Exception = 3,
}

impl Display for FltAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            FltAction::Routing => "route",
            FltAction::SrcNat => "src-nat",
            FltAction::DstNat => "dst-nat",
            FltAction::Exception => "exception",
        };

        write!(f, "{s}")
    }
}

/// The routing table a filter rule hands matching packets to.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum RtTblRef {
    /// A handle from `GET_RT_TBL`.
    Hdl(u32),
    /// An index from `QUERY_RT_TBL_INDEX`.
    Idx(u32),
}

impl Default for RtTblRef {
    fn default() -> Self {
        RtTblRef::Hdl(0)
    }
}

/// The match half of a filter rule.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum FltMatch {
    Attrib(RuleAttrib),
    Eq(EquationSet),
}

impl Default for FltMatch {
    fn default() -> Self {
        FltMatch::Attrib(RuleAttrib::default())
    }
}

/// The header rewrite a routing rule applies.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub enum HdrRef {
    #[default]
    None,
    Hdr(u32),
    ProcCtx(u32),
}

/// Options common to both kinds of rule.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
#[serde(default)]
pub struct RuleOpts {
    /// Place the rule in the hashable (cached) table.
    pub hashable: bool,
    /// Stop the lookup at this rule when it matches.
    pub max_prio: bool,
    /// Unique within the owning table; zero asks for one to be chosen.
    pub rule_id: u16,
    /// The flow statistics counter to bump on a match.
    pub cnt_idx: Option<u8>,
    /// Close the aggregation frame and moderate the IRQ on a match.
    pub close_aggr_irq_mod: bool,
}

impl RuleOpts {
    /// Only the v2 ABI can carry these options.
    pub fn needs_v2(&self) -> bool {
        self.cnt_idx.is_some() || self.close_aggr_irq_mod
    }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct FltRule {
    pub action: FltAction,
    pub rt_tbl: RtTblRef,
    pub matcher: FltMatch,
    pub retain_hdr: bool,
    pub to_uc: bool,
    pub set_metadata: bool,
    pub pdn_idx: u8,
    pub opts: RuleOpts,
}

impl FltRule {
    pub fn new(
        action: FltAction,
        rt_tbl: RtTblRef,
        attrib: RuleAttrib,
    ) -> Self {
        Self {
            action,
            rt_tbl,
            matcher: FltMatch::Attrib(attrib),
            ..Default::default()
        }
    }

    pub fn attrib(&self) -> Option<&RuleAttrib> {
        match &self.matcher {
            FltMatch::Attrib(a) => Some(a),
            FltMatch::Eq(_) => None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RtRule {
    pub dst: Client,
    pub hdr: HdrRef,
    pub attrib: RuleAttrib,
    pub retain_hdr: bool,
    pub coalesce: bool,
    pub opts: RuleOpts,
}

impl RtRule {
    pub fn new(dst: Client, attrib: RuleAttrib) -> Self {
        Self {
            dst,
            hdr: HdrRef::None,
            attrib,
            retain_hdr: false,
            coalesce: false,
            opts: RuleOpts::default(),
        }
    }
}

/// A rule of either kind.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Rule {
    Flt(FltRule),
    Rt(RtRule),
}

impl Rule {
    pub fn kind(&self) -> RuleKind {
        match self {
            Rule::Flt(_) => RuleKind::Filter,
            Rule::Rt(_) => RuleKind::Routing,
        }
    }

    pub fn opts(&self) -> &RuleOpts {
        match self {
            Rule::Flt(r) => &r.opts,
            Rule::Rt(r) => &r.opts,
        }
    }

    pub fn opts_mut(&mut self) -> &mut RuleOpts {
        match self {
            Rule::Flt(r) => &mut r.opts,
            Rule::Rt(r) => &mut r.opts,
        }
    }

    pub fn hashable(&self) -> bool {
        self.opts().hashable
    }

    pub fn rule_id(&self) -> u16 {
        self.opts().rule_id
    }

    pub fn cnt_idx(&self) -> Option<u8> {
        self.opts().cnt_idx
    }

    pub fn needs_v2(&self) -> bool {
        self.opts().needs_v2()
    }

    /// The attribute form of the match, if the rule carries one.
    pub fn attrib(&self) -> Option<&RuleAttrib> {
        match self {
            Rule::Flt(r) => r.attrib(),
            Rule::Rt(r) => Some(&r.attrib),
        }
    }
}

impl From<FltRule> for Rule {
    fn from(r: FltRule) -> Self {
        Rule::Flt(r)
    }
}

impl From<RtRule> for Rule {
    fn from(r: RtRule) -> Self {
        Rule::Rt(r)
    }
}

/// A driver handle for a committed rule.
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
pub struct RuleHdl(pub u32);

impl Display for RuleHdl {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn v2_only_options() {
        let mut r: Rule =
            RtRule::new(Client::AppsLanCons, RuleAttrib::new()).into();
        assert_eq!(r.kind(), RuleKind::Routing);
        assert!(!r.needs_v2());

        r.opts_mut().cnt_idx = Some(3);
        assert!(r.needs_v2());

        let mut f = FltRule::default();
        f.opts.close_aggr_irq_mod = true;
        assert!(Rule::from(f).needs_v2());
    }
}
