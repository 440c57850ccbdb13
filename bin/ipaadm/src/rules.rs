// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The rule file read by `ipaadm`.
//!
//! ```toml
//! [session]
//! abi = "auto"
//! lower_locally = true
//!
//! [hw]
//! type = "4.5"
//!
//! [[route]]
//! table = "lan"
//! ip = "v4"
//! dst = "APPS_LAN_CONS"
//! match = { dst = "192.168.1.0/24" }
//!
//! [[filter]]
//! table = "USB_PROD"
//! ip = "v4"
//! rt_tbl = "lan"
//! match = { proto = 6, dst_port = 443 }
//! ```
//!
//! Routes are committed before filters are staged, so the routing
//! tables a filter names exist by the time it is sent. Positions are
//! `front`, `rear`, or `prev`, which chains an entry after the one
//! before it in the same section.

use anyhow::Context;
use anyhow::anyhow;
use anyhow::bail;
use ipa::api::Client;
use ipa::api::DFLT_RT_TBL_NAME;
use ipa::api::FltAction;
use ipa::api::FltRule;
use ipa::api::HdrL2Type;
use ipa::api::HdrRef;
use ipa::api::HwCaps;
use ipa::api::HwType;
use ipa::api::IpType;
use ipa::api::MacAddr;
use ipa::api::MacFlavor;
use ipa::api::RtRule;
use ipa::api::RtTblRef;
use ipa::api::Rule;
use ipa::api::RuleAttrib;
use ipa::api::RuleKind;
use ipa::api::RuleOpts;
use ipa::engine::SessionConfig;
use ipa::engine::TableManager;
use ipa::engine::Transport;
use ipa::engine::table::CommitReport;
use ipa::engine::table::Position;
use ipa::engine::table::StagedRule;
use ipa::engine::table::TableSet;
use ipa::engine::table::Ticket;
use ipnetwork::IpNetwork;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::Path;

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuleFile {
    pub session: SessionConfig,
    pub hw: HwSpec,
    #[serde(rename = "filter")]
    pub filters: Vec<FilterEntry>,
    #[serde(rename = "route")]
    pub routes: Vec<RouteEntry>,
}

/// The target hardware. Explicit `caps` win over those implied by
/// `type`; with neither, the device is asked.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HwSpec {
    #[serde(rename = "type")]
    pub hw_type: Option<String>,
    pub caps: Option<HwCaps>,
}

/// Match fields shared by filter and route entries. Every field is
/// optional; an empty match is a catch-all.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MatchSpec {
    pub l2: Option<String>,
    pub proto: Option<u8>,
    pub tos: Option<u8>,
    pub tos_masked: Option<[u8; 2]>,
    pub tc: Option<u8>,
    pub flow_label: Option<u32>,
    pub next_hdr: Option<u8>,
    pub src: Option<String>,
    pub dst: Option<String>,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
    pub src_ports: Option<[u16; 2]>,
    pub dst_ports: Option<[u16; 2]>,
    pub icmp_type: Option<u8>,
    pub icmp_code: Option<u8>,
    pub spi: Option<u32>,
    pub meta_data: Option<[u32; 2]>,
    pub frag: bool,
    pub tcp_syn: bool,
    pub pure_ack: bool,
    pub src_mac: Option<String>,
    pub src_mac_mask: Option<String>,
    pub dst_mac: Option<String>,
    pub dst_mac_mask: Option<String>,
    pub ether_type: Option<u16>,
    pub vlan_id: Option<u16>,
    pub mtu: Option<u16>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterEntry {
    /// `global`, or the name of the producer endpoint.
    pub table: String,
    pub ip: IpType,
    /// `front`, `rear` (the default), or `prev` to chain after the
    /// entry before it.
    #[serde(default)]
    pub pos: Option<String>,
    #[serde(default = "default_action")]
    pub action: String,
    /// A routing table by name, resolved through the driver.
    #[serde(default)]
    pub rt_tbl: Option<String>,
    #[serde(default)]
    pub rt_tbl_hdl: Option<u32>,
    #[serde(default)]
    pub rt_tbl_idx: Option<u32>,
    #[serde(default)]
    pub retain_hdr: bool,
    #[serde(default)]
    pub to_uc: bool,
    #[serde(default)]
    pub set_metadata: bool,
    #[serde(default)]
    pub pdn_idx: u8,
    #[serde(default)]
    pub hashable: bool,
    #[serde(default)]
    pub max_prio: bool,
    #[serde(default)]
    pub rule_id: u16,
    #[serde(default)]
    pub cnt_idx: Option<u8>,
    #[serde(default)]
    pub close_aggr_irq_mod: bool,
    #[serde(default, rename = "match")]
    pub matches: MatchSpec,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteEntry {
    #[serde(default = "default_rt_tbl")]
    pub table: String,
    pub ip: IpType,
    #[serde(default)]
    pub pos: Option<String>,
    /// The consumer endpoint matching packets are sent to.
    pub dst: String,
    #[serde(default)]
    pub hdr: Option<u32>,
    #[serde(default)]
    pub proc_ctx: Option<u32>,
    #[serde(default)]
    pub retain_hdr: bool,
    #[serde(default)]
    pub coalesce: bool,
    #[serde(default)]
    pub hashable: bool,
    #[serde(default)]
    pub max_prio: bool,
    #[serde(default)]
    pub rule_id: u16,
    #[serde(default)]
    pub cnt_idx: Option<u8>,
    #[serde(default)]
    pub close_aggr_irq_mod: bool,
    #[serde(default, rename = "match")]
    pub matches: MatchSpec,
}

fn default_action() -> String {
    "route".to_string()
}

fn default_rt_tbl() -> String {
    DFLT_RT_TBL_NAME.to_string()
}

impl RuleFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&text)
            .with_context(|| format!("in {}", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// The capabilities to compile against. `device` is asked only
    /// when the file names neither caps nor a hardware type.
    pub fn caps(
        &self,
        device: impl FnOnce() -> anyhow::Result<HwType>,
    ) -> anyhow::Result<HwCaps> {
        if let Some(caps) = self.hw.caps {
            return Ok(caps.clamp());
        }

        let hw = match &self.hw.hw_type {
            Some(s) => s.parse::<HwType>().map_err(|e| anyhow!(e))?,
            None => device()?,
        };
        Ok(HwCaps::for_hw(hw))
    }
}

fn parse_net(s: &str) -> anyhow::Result<IpNetwork> {
    s.parse().with_context(|| format!("bad network {s:?}"))
}

fn parse_mac(s: &str) -> anyhow::Result<MacAddr> {
    s.parse().map_err(|e: String| anyhow!("bad MAC {s:?}: {e}"))
}

fn parse_l2(s: &str) -> anyhow::Result<HdrL2Type> {
    let l2 = match s.to_ascii_lowercase().as_str() {
        "none" => HdrL2Type::None,
        "ether2" | "ethernet-ii" => HdrL2Type::EthernetII,
        "802.3" => HdrL2Type::Ieee802_3,
        "802.1q" => HdrL2Type::Ieee802_1Q,
        "ether2-ast" => HdrL2Type::EthernetIIAst,
        "802.1q-ast" => HdrL2Type::Ieee802_1QAst,
        _ => bail!("unknown L2 header type {s:?}"),
    };
    Ok(l2)
}

fn mac_flavor(l2: HdrL2Type) -> MacFlavor {
    match l2 {
        HdrL2Type::Ieee802_3 => MacFlavor::Ieee802_3,
        HdrL2Type::Ieee802_1Q | HdrL2Type::Ieee802_1QAst => {
            MacFlavor::Ieee802_1Q
        }
        _ => MacFlavor::EtherII,
    }
}

fn parse_action(s: &str) -> anyhow::Result<FltAction> {
    let action = match s {
        "route" => FltAction::Routing,
        "src-nat" => FltAction::SrcNat,
        "dst-nat" => FltAction::DstNat,
        "exception" => FltAction::Exception,
        _ => bail!("unknown filter action {s:?}"),
    };
    Ok(action)
}

fn parse_client(s: &str) -> anyhow::Result<Client> {
    s.parse().map_err(|e: String| anyhow!(e))
}

impl MatchSpec {
    pub fn to_attrib(&self) -> anyhow::Result<RuleAttrib> {
        let mut a = RuleAttrib::new();

        let l2 = match &self.l2 {
            Some(s) => parse_l2(s)?,
            None => HdrL2Type::None,
        };
        a.set_l2(l2);

        if let Some(v) = self.proto {
            a.set_protocol(v);
        }
        if let Some(v) = self.tos {
            a.set_tos(v);
        }
        if let Some([value, mask]) = self.tos_masked {
            a.set_tos_masked(value, mask);
        }
        if let Some(v) = self.tc {
            a.set_tc(v);
        }
        if let Some(v) = self.flow_label {
            a.set_flow_label(v);
        }
        if let Some(v) = self.next_hdr {
            a.set_next_hdr(v);
        }
        if let Some(s) = &self.src {
            a.set_src_net(parse_net(s)?);
        }
        if let Some(s) = &self.dst {
            a.set_dst_net(parse_net(s)?);
        }
        if let Some(v) = self.src_port {
            a.set_src_port(v);
        }
        if let Some(v) = self.dst_port {
            a.set_dst_port(v);
        }
        if let Some([lo, hi]) = self.src_ports {
            a.set_src_port_range(lo, hi);
        }
        if let Some([lo, hi]) = self.dst_ports {
            a.set_dst_port_range(lo, hi);
        }
        if let Some(v) = self.icmp_type {
            a.set_icmp_type(v);
        }
        if let Some(v) = self.icmp_code {
            a.set_icmp_code(v);
        }
        if let Some(v) = self.spi {
            a.set_spi(v);
        }
        if let Some([value, mask]) = self.meta_data {
            a.set_meta_data(value, mask);
        }
        if self.frag {
            a.set_fragment();
        }
        if self.tcp_syn {
            a.set_tcp_syn();
        }
        if self.pure_ack {
            a.set_pure_ack();
        }

        if let Some(s) = &self.src_mac {
            let mask = match &self.src_mac_mask {
                Some(m) => parse_mac(m)?,
                None => MacAddr::BROADCAST,
            };
            a.set_src_mac(mac_flavor(l2), parse_mac(s)?, mask);
        }
        if let Some(s) = &self.dst_mac {
            let mask = match &self.dst_mac_mask {
                Some(m) => parse_mac(m)?,
                None => MacAddr::BROADCAST,
            };
            a.set_dst_mac(mac_flavor(l2), parse_mac(s)?, mask);
        }
        if let Some(v) = self.ether_type {
            a.set_ether_type(v);
        }
        if let Some(v) = self.vlan_id {
            a.set_vlan_id(v);
        }
        if let Some(v) = self.mtu {
            a.set_mtu(v);
        }

        a.validate()?;
        Ok(a)
    }
}

fn position(
    pos: Option<&str>,
    prev: Option<Ticket>,
) -> anyhow::Result<Position> {
    match pos {
        None | Some("rear") => Ok(Position::Rear),
        Some("front") => Ok(Position::Front),
        Some("prev") => match prev {
            Some(t) => Ok(Position::AfterTicket(t)),
            None => bail!("pos = \"prev\" on the first entry"),
        },
        Some(p) => bail!("unknown position {p:?}"),
    }
}

impl FilterEntry {
    fn table_set(&self) -> anyhow::Result<TableSet> {
        if self.table.eq_ignore_ascii_case("global") {
            return Ok(TableSet::FilterGlobal);
        }

        let ep = parse_client(&self.table)?;
        if !ep.is_prod() {
            bail!("{ep} is not a producer endpoint");
        }
        Ok(TableSet::Filter(ep))
    }

    fn opts(&self) -> RuleOpts {
        RuleOpts {
            hashable: self.hashable,
            max_prio: self.max_prio,
            rule_id: self.rule_id,
            cnt_idx: self.cnt_idx,
            close_aggr_irq_mod: self.close_aggr_irq_mod,
        }
    }

    /// Build the rule. `rt_tbl_hdl` resolves a table name.
    pub fn to_rule(
        &self,
        rt_tbl_hdl: impl FnOnce(IpType, &str) -> anyhow::Result<u32>,
    ) -> anyhow::Result<FltRule> {
        let named = (&self.rt_tbl, self.rt_tbl_hdl, self.rt_tbl_idx);
        let rt_tbl = match named {
            (Some(name), None, None) => {
                RtTblRef::Hdl(rt_tbl_hdl(self.ip, name)?)
            }
            (None, Some(h), None) => RtTblRef::Hdl(h),
            (None, None, Some(i)) => RtTblRef::Idx(i),
            (None, None, None) => RtTblRef::default(),
            _ => bail!("rt_tbl, rt_tbl_hdl and rt_tbl_idx are exclusive"),
        };

        let mut rule = FltRule::new(
            parse_action(&self.action)?,
            rt_tbl,
            self.matches.to_attrib()?,
        );
        rule.retain_hdr = self.retain_hdr;
        rule.to_uc = self.to_uc;
        rule.set_metadata = self.set_metadata;
        rule.pdn_idx = self.pdn_idx;
        rule.opts = self.opts();
        Ok(rule)
    }
}

impl RouteEntry {
    pub fn to_rule(&self) -> anyhow::Result<RtRule> {
        let hdr = match (self.hdr, self.proc_ctx) {
            (None, None) => HdrRef::None,
            (Some(h), None) => HdrRef::Hdr(h),
            (None, Some(h)) => HdrRef::ProcCtx(h),
            (Some(_), Some(_)) => bail!("give either hdr or proc_ctx"),
        };

        let dst = parse_client(&self.dst)?;
        if !dst.is_cons() {
            bail!("{dst} is not a consumer endpoint");
        }

        let mut rule = RtRule::new(dst, self.matches.to_attrib()?);
        rule.hdr = hdr;
        rule.retain_hdr = self.retain_hdr;
        rule.coalesce = self.coalesce;
        rule.opts = RuleOpts {
            hashable: self.hashable,
            max_prio: self.max_prio,
            rule_id: self.rule_id,
            cnt_idx: self.cnt_idx,
            close_aggr_irq_mod: self.close_aggr_irq_mod,
        };
        Ok(rule)
    }
}

fn unstage_all<T: Transport>(mgr: &mut TableManager<T>, tickets: &[Ticket]) {
    for t in tickets {
        let _ = mgr.unstage(*t);
    }
}

/// Stage the `[[route]]` entries of `file`. Nothing stays staged on
/// error.
pub fn stage_routes<T: Transport>(
    mgr: &mut TableManager<T>,
    file: &RuleFile,
) -> anyhow::Result<Vec<Ticket>> {
    let mut tickets = Vec::new();

    for (i, r) in file.routes.iter().enumerate() {
        let ctx = || format!("route #{i}");
        let staged = r.to_rule().and_then(|rule| {
            let pos = position(r.pos.as_deref(), tickets.last().copied())?;
            let set = TableSet::Routing(r.table.clone());
            Ok(mgr.stage_add(set, r.ip, Rule::Rt(rule), pos)?)
        });

        match staged.with_context(ctx) {
            Ok(t) => tickets.push(t),
            Err(e) => {
                unstage_all(mgr, &tickets);
                return Err(e);
            }
        }
    }

    Ok(tickets)
}

/// Routing table handles, keyed by family and name.
pub type RtTbls = BTreeMap<(IpType, String), u32>;

/// Take one reference on every routing table a filter names. On error
/// the references already taken are released.
pub fn get_rt_tbls<T: Transport>(
    mgr: &TableManager<T>,
    file: &RuleFile,
) -> anyhow::Result<RtTbls> {
    let mut tbls = RtTbls::new();

    for f in &file.filters {
        let Some(name) = &f.rt_tbl else {
            continue;
        };
        let key = (f.ip, name.clone());
        if tbls.contains_key(&key) {
            continue;
        }

        match mgr.rt_tbl_hdl(f.ip, name) {
            Ok(hdl) => {
                tbls.insert(key, hdl);
            }
            Err(e) => {
                let _ = put_rt_tbls(mgr, &tbls);
                return Err(e).with_context(|| {
                    format!("looking up routing table {name:?} ({})", f.ip)
                });
            }
        }
    }

    Ok(tbls)
}

/// Release the references taken by [`get_rt_tbls`]. Every handle is
/// put; the first failure is returned.
pub fn put_rt_tbls<T: Transport>(
    mgr: &TableManager<T>,
    tbls: &RtTbls,
) -> anyhow::Result<()> {
    let mut res = Ok(());
    for ((ip, name), hdl) in tbls {
        if let Err(e) = mgr.put_rt_tbl(*hdl) {
            if res.is_ok() {
                let what = format!("releasing routing table {name:?} ({ip})");
                res = Err(anyhow::Error::new(e).context(what));
            }
        }
    }
    res
}

/// Stage the `[[filter]]` entries of `file`. Routing tables named by
/// `rt_tbl` are taken from `tbls`. Nothing stays staged on error.
pub fn stage_filters<T: Transport>(
    mgr: &mut TableManager<T>,
    file: &RuleFile,
    tbls: &RtTbls,
) -> anyhow::Result<Vec<Ticket>> {
    let mut tickets = Vec::new();

    for (i, f) in file.filters.iter().enumerate() {
        let ctx = || format!("filter #{i}");
        let lookup = |ip: IpType, name: &str| {
            tbls.get(&(ip, name.to_string()))
                .copied()
                .ok_or_else(|| anyhow!("routing table {name:?} not looked up"))
        };
        let staged = f.to_rule(lookup).and_then(|rule| {
            let pos = position(f.pos.as_deref(), tickets.last().copied())?;
            let set = f.table_set()?;
            Ok(mgr.stage_add(set, f.ip, Rule::Flt(rule), pos)?)
        });

        match staged.with_context(ctx) {
            Ok(t) => tickets.push(t),
            Err(e) => {
                unstage_all(mgr, &tickets);
                return Err(e);
            }
        }
    }

    Ok(tickets)
}

/// Install `file`.
///
/// Routes are committed first: a filter names its routing table by
/// handle, and the driver only hands out handles for tables that
/// exist. The table references taken for the filters are released once
/// they are committed, or on error. Unless the session commits every
/// batch, the driver is then asked to program the hardware for every
/// table family the file touched.
pub fn apply<T: Transport>(
    mgr: &mut TableManager<T>,
    file: &RuleFile,
    hw_commit: bool,
) -> anyhow::Result<CommitReport> {
    stage_routes(mgr, file)?;
    let mut report = mgr.commit().context("committing routes")?;

    let tbls = get_rt_tbls(mgr, file)?;
    let filters = stage_filters(mgr, file, &tbls)
        .and_then(|_| mgr.commit().context("committing filters"));
    let put = put_rt_tbls(mgr, &tbls);
    let filters = filters?;
    put?;

    report.bound.extend(filters.bound);
    report.failed.extend(filters.failed);

    if hw_commit && !file.session.commit {
        let touched: BTreeSet<(RuleKind, IpType)> = file
            .routes
            .iter()
            .map(|r| (RuleKind::Routing, r.ip))
            .chain(file.filters.iter().map(|f| (RuleKind::Filter, f.ip)))
            .collect();

        // Routing first: filters point into the routing tables.
        for (kind, ip) in touched.into_iter().rev() {
            mgr.commit_hw(kind, ip)?;
        }
    }

    Ok(report)
}

/// Stage `file` and return what would be sent, then unstage it again.
///
/// Nothing is committed, so the routing tables the filters name must
/// already exist. Their references are released before returning.
pub fn dry_run<T: Transport>(
    mgr: &mut TableManager<T>,
    file: &RuleFile,
) -> anyhow::Result<Vec<StagedRule>> {
    let routes = stage_routes(mgr, file)?;
    let tbls = match get_rt_tbls(mgr, file) {
        Ok(tbls) => tbls,
        Err(e) => {
            unstage_all(mgr, &routes);
            return Err(e);
        }
    };

    let filters = stage_filters(mgr, file, &tbls);
    let staged = mgr.staged().to_vec();
    unstage_all(mgr, &routes);
    if let Ok(tickets) = &filters {
        unstage_all(mgr, tickets);
    }

    let put = put_rt_tbls(mgr, &tbls);
    filters?;
    put?;
    Ok(staged)
}

#[cfg(test)]
mod test {
    use super::*;
    use ipa::api::IpaCmd;
    use ipa::api::RuleHdl;
    use ipa_test_utils::FakeDriver;
    use ipa_test_utils::FltScope;
    use ipa_test_utils::TransportError;
    use ipa_test_utils::manager;

    const FILE: &str = r#"
        [hw]
        type = "4.5"

        [[route]]
        table = "lan"
        ip = "v4"
        dst = "APPS_LAN_CONS"
        match = { dst = "192.168.1.0/24" }

        [[filter]]
        table = "USB_PROD"
        ip = "v4"
        rt_tbl = "lan"
        match = { proto = 6, dst_port = 443 }

        [[filter]]
        table = "USB_PROD"
        ip = "v4"
        pos = "prev"
        rt_tbl = "lan"
        rule_id = 7
        match = { proto = 17, dst_ports = [5000, 6000] }
    "#;

    #[test]
    fn parse_and_apply() {
        let file = RuleFile::parse(FILE).unwrap();
        assert_eq!(file.routes.len(), 1);
        assert_eq!(file.filters.len(), 2);
        let caps = file.caps(|| bail!("device not needed")).unwrap();
        assert_eq!(caps, HwCaps::for_hw(HwType::V4_5));

        let drv = FakeDriver::default();
        let mut mgr = manager(&drv);
        let report = apply(&mut mgr, &file, true).unwrap();
        assert_eq!(report.bound.len(), 3);
        assert!(report.failed.is_empty());

        let lan = drv.rt_order(IpType::V4, "lan", false);
        assert_eq!(lan.len(), 1);

        let usb = drv.flt_order(
            IpType::V4,
            FltScope::Ep(Client::UsbProd),
            false,
        );
        let want: Vec<RuleHdl> =
            report.bound[1..].iter().map(|(_, h)| *h).collect();
        assert_eq!(usb, want);

        let Some(Rule::Flt(r)) = mgr.entry(usb[1]).map(|e| e.rule.clone())
        else {
            panic!("second filter missing");
        };
        assert_eq!(r.opts.rule_id, 7);

        // One lookup for the table both filters name, sent after the
        // route that creates it, and released again.
        let cmds = drv.cmds();
        let rt_add = cmds
            .iter()
            .position(|c| {
                matches!(c, IpaCmd::AddRtRuleExt | IpaCmd::AddRtRuleExtV2)
            })
            .unwrap();
        let gets: Vec<usize> = cmds
            .iter()
            .enumerate()
            .filter(|(_, c)| **c == IpaCmd::GetRtTbl)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(gets.len(), 1);
        assert!(gets[0] > rt_add);
        assert_eq!(cmds.iter().filter(|c| **c == IpaCmd::PutRtTbl).count(), 1);
        assert_eq!(drv.rt_tbl_refs(IpType::V4, "lan"), Some(0));

        let lan_hdl = mgr.rt_tbl_hdl(IpType::V4, "lan").unwrap();
        mgr.put_rt_tbl(lan_hdl).unwrap();
        assert_eq!(r.rt_tbl, RtTblRef::Hdl(lan_hdl));
    }

    const LAN_ROUTE: &str = r#"
        [[route]]
        table = "lan"
        ip = "v4"
        dst = "APPS_LAN_CONS"

        [[filter]]
        table = "USB_PROD"
        ip = "v4"
        rt_tbl = "lan"
    "#;

    #[test]
    fn unknown_table_releases_references() {
        let text = format!(
            "{LAN_ROUTE}\n[[filter]]\ntable = \"USB_PROD\"\n\
             ip = \"v4\"\nrt_tbl = \"nowhere\"\n"
        );
        let file = RuleFile::parse(&text).unwrap();
        let drv = FakeDriver::default();
        let mut mgr = manager(&drv);

        let err = apply(&mut mgr, &file, true).unwrap_err();
        assert!(format!("{err:#}").contains("nowhere"));
        assert_eq!(drv.rt_tbl_refs(IpType::V4, "lan"), Some(0));
        assert!(mgr.staged().is_empty());
        assert!(
            drv.flt_order(IpType::V4, FltScope::Ep(Client::UsbProd), false)
                .is_empty()
        );
    }

    #[test]
    fn filter_errors_release_references() {
        let text = format!(
            "{LAN_ROUTE}\n[[filter]]\ntable = \"APPS_LAN_CONS\"\n\
             ip = \"v4\"\nrt_tbl = \"lan\"\n"
        );
        let file = RuleFile::parse(&text).unwrap();
        let drv = FakeDriver::default();
        let mut mgr = manager(&drv);

        let err = apply(&mut mgr, &file, true).unwrap_err();
        assert!(format!("{err:#}").contains("filter #1"));
        assert_eq!(drv.rt_tbl_refs(IpType::V4, "lan"), Some(0));
        assert!(mgr.staged().is_empty());
        // Only the route went in.
        assert_eq!(drv.rule_count(), 1);

        // A failed filter commit releases the reference too.
        let file = RuleFile::parse(LAN_ROUTE).unwrap();
        let drv = FakeDriver::default();
        apply(&mut manager(&drv), &file, false).unwrap();
        let flt_add = drv
            .cmds()
            .iter()
            .position(|c| {
                matches!(c, IpaCmd::AddFltRule | IpaCmd::AddFltRuleV2)
            })
            .unwrap();

        let drv = FakeDriver::default();
        let mut mgr = manager(&drv);
        let errno = TransportError::Ioctl {
            cmd: IpaCmd::AddFltRule,
            errno: libc::ENOMEM,
        };
        drv.fail_call(flt_add, errno);
        assert!(apply(&mut mgr, &file, true).is_err());
        assert_eq!(drv.rt_tbl_refs(IpType::V4, "lan"), Some(0));
    }

    #[test]
    fn dry_run_sends_nothing() {
        let text = format!(
            "{LAN_ROUTE}\n[[filter]]\ntable = \"USB_PROD\"\n\
             ip = \"v4\"\nrt_tbl = \"{DFLT_RT_TBL_NAME}\"\n"
        );
        let file = RuleFile::parse(&text).unwrap();
        let drv = FakeDriver::default();
        let mut mgr = manager(&drv);

        // The filter on "lan" needs the route to be committed first.
        let err = dry_run(&mut mgr, &file).unwrap_err();
        assert!(format!("{err:#}").contains("\"lan\""));
        assert!(mgr.staged().is_empty());

        let text = text.replacen("rt_tbl = \"lan\"", "", 1);
        let file = RuleFile::parse(&text).unwrap();
        let staged = dry_run(&mut mgr, &file).unwrap();
        assert_eq!(staged.len(), 3);
        assert_eq!(staged[0].table.set, TableSet::Routing("lan".into()));
        assert!(mgr.staged().is_empty());
        assert!(drv.add_calls().is_empty());
        assert_eq!(drv.rt_tbl_refs(IpType::V4, DFLT_RT_TBL_NAME), Some(0));
        assert_eq!(drv.rt_tbl_refs(IpType::V4, "lan"), None);
    }

    #[test]
    fn bad_entries_are_rejected() {
        let bad_pos = r#"
            [[filter]]
            table = "global"
            ip = "v4"
            pos = "prev"
        "#;
        let file = RuleFile::parse(bad_pos).unwrap();
        let drv = FakeDriver::default();
        let tbls = RtTbls::new();
        let err =
            stage_filters(&mut manager(&drv), &file, &tbls).unwrap_err();
        assert!(format!("{err:#}").contains("filter #0"));

        let cons_table = r#"
            [[filter]]
            table = "APPS_LAN_CONS"
            ip = "v4"
        "#;
        let file = RuleFile::parse(cons_table).unwrap();
        assert!(stage_filters(&mut manager(&drv), &file, &tbls).is_err());

        assert!(RuleFile::parse("[[filter]]\nip = \"v4\"\n").is_err());

        // Handles from another process's tables cannot be anchored on.
        let after =
            "[[filter]]\ntable = \"USB_PROD\"\nip = \"v4\"\nafter = 5\n";
        assert!(RuleFile::parse(after).is_err());

        let backwards =
            MatchSpec { dst_ports: Some([6000, 5000]), ..Default::default() };
        assert!(backwards.to_attrib().is_err());
    }

    #[test]
    fn explicit_caps_win() {
        let file = RuleFile::parse(
            "[hw]\ntype = \"4.5\"\ncaps = { meq32 = 9, stats = false }\n",
        )
        .unwrap();
        let caps = file.caps(|| bail!("device not needed")).unwrap();
        assert_eq!(caps.meq32, 2);
        assert!(!caps.stats);
    }
}
