// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! An in-memory stand-in for the IPA driver.
//!
//! The fake keeps each table's rule order the way the driver does:
//! head inserts go to index 0 one at a time; an after batch chains
//! behind each successful rule. It records every call and can be told
//! to reject rules or fail a whole call.

use ipa::api::CounterAlloc;
use ipa::api::CounterAllocReq;
use ipa::api::CounterHdl;
use ipa::api::CounterRange;
use ipa::api::DFLT_RT_TBL_NAME;
use ipa::api::EquationSet;
use ipa::api::FltRtStats;
use ipa::api::FltRule;
use ipa::api::HwCaps;
use ipa::api::HwType;
use ipa::api::IpType;
use ipa::api::IpaCmd;
use ipa::api::RtRule;
use ipa::api::RuleAttrib;
use ipa::api::RuleHdl;
use ipa::api::RuleKind;
use ipa::engine::compile::compile;
use ipa::engine::counter::CounterAllocator;
use ipa::engine::transport::AbiVersion;
use ipa::engine::transport::AddItem;
use ipa::engine::transport::DEFAULT_BATCH_LIMIT;
use ipa::engine::transport::FltAddReq;
use ipa::engine::transport::FltScope;
use ipa::engine::transport::ItemStatus;
use ipa::engine::transport::MdfyReq;
use ipa::engine::transport::RtAddReq;
use ipa::engine::transport::Transport;
use ipa::engine::transport::TransportError;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Mutex;
use std::sync::MutexGuard;

/// One call the fake received.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Call {
    pub cmd: IpaCmd,
    pub ip: Option<IpType>,
    pub items: usize,
    pub abi: Option<AbiVersion>,
    pub after: Option<RuleHdl>,
}

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
struct TableKey {
    kind: RuleKind,
    ip: IpType,
    name: String,
    hashable: bool,
}

impl TableKey {
    fn flt(ip: IpType, scope: FltScope, hashable: bool) -> Self {
        let name = match scope {
            FltScope::Global => "global".to_string(),
            FltScope::Ep(ep) => ep.to_string(),
        };
        Self { kind: RuleKind::Filter, ip, name, hashable }
    }

    fn rt(ip: IpType, name: &str, hashable: bool) -> Self {
        Self { kind: RuleKind::Routing, ip, name: name.to_string(), hashable }
    }
}

struct RtTbl {
    hdl: u32,
    idx: u32,
    refs: u32,
}

struct State {
    next_hdl: u32,
    tables: BTreeMap<TableKey, Vec<u32>>,
    rules: BTreeMap<u32, TableKey>,
    rt_tbls: BTreeMap<(IpType, String), RtTbl>,
    next_rt_idx: u32,
    reject_ids: BTreeSet<u16>,
    fail: Option<(usize, TransportError)>,
    calls: Vec<Call>,
    counters: CounterAllocator,
    stats: BTreeMap<u8, FltRtStats>,
}

pub struct FakeDriver {
    state: Mutex<State>,
    limit: usize,
    hw: HwType,
}

impl Default for FakeDriver {
    fn default() -> Self {
        Self::new(HwType::V4_5)
    }
}

impl FakeDriver {
    pub fn new(hw: HwType) -> Self {
        let state = State {
            next_hdl: 1,
            tables: BTreeMap::new(),
            rules: BTreeMap::new(),
            rt_tbls: BTreeMap::new(),
            next_rt_idx: 0,
            reject_ids: BTreeSet::new(),
            fail: None,
            calls: Vec::new(),
            counters: CounterAllocator::new(),
            stats: BTreeMap::new(),
        };
        let drv = Self {
            state: Mutex::new(state),
            limit: DEFAULT_BATCH_LIMIT,
            hw,
        };

        // The driver creates the default routing table of each family
        // at probe time.
        for ip in [IpType::V4, IpType::V6] {
            drv.lock().ensure_rt_tbl(ip, DFLT_RT_TBL_NAME);
        }
        drv
    }

    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn hw(&self) -> HwType {
        self.hw
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Give every rule with this id a failed status.
    pub fn reject_rule_id(&self, rule_id: u16) {
        self.lock().reject_ids.insert(rule_id);
    }

    /// Fail the call `n` calls from now (0 is the next one) with `err`.
    pub fn fail_call(&self, n: usize, err: TransportError) {
        self.lock().fail = Some((n, err));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// The calls that added rules, as (command, item count) pairs.
    pub fn add_calls(&self) -> Vec<(IpaCmd, usize)> {
        self.calls()
            .into_iter()
            .filter(|c| {
                matches!(
                    c.cmd,
                    IpaCmd::AddFltRule
                        | IpaCmd::AddFltRuleV2
                        | IpaCmd::AddFltRuleAfter
                        | IpaCmd::AddFltRuleAfterV2
                        | IpaCmd::AddRtRuleExt
                        | IpaCmd::AddRtRuleExtV2
                        | IpaCmd::AddRtRuleAfter
                        | IpaCmd::AddRtRuleAfterV2
                )
            })
            .map(|c| (c.cmd, c.items))
            .collect()
    }

    pub fn rule_count(&self) -> usize {
        self.lock().rules.len()
    }

    pub fn has_rule(&self, hdl: RuleHdl) -> bool {
        self.lock().rules.contains_key(&hdl.0)
    }

    /// The handles of a filter table, in evaluation order.
    pub fn flt_order(
        &self,
        ip: IpType,
        scope: FltScope,
        hashable: bool,
    ) -> Vec<RuleHdl> {
        self.order(&TableKey::flt(ip, scope, hashable))
    }

    /// The handles of a routing table, in evaluation order.
    pub fn rt_order(
        &self,
        ip: IpType,
        name: &str,
        hashable: bool,
    ) -> Vec<RuleHdl> {
        self.order(&TableKey::rt(ip, name, hashable))
    }

    fn order(&self, key: &TableKey) -> Vec<RuleHdl> {
        self.lock()
            .tables
            .get(key)
            .map(|v| v.iter().copied().map(RuleHdl).collect())
            .unwrap_or_default()
    }

    /// The references held on a routing table, if it exists.
    pub fn rt_tbl_refs(&self, ip: IpType, name: &str) -> Option<u32> {
        self.lock().rt_tbls.get(&(ip, name.to_string())).map(|t| t.refs)
    }

    /// The commands received, in order.
    pub fn cmds(&self) -> Vec<IpaCmd> {
        self.lock().calls.iter().map(|c| c.cmd).collect()
    }

    /// Set what `query_counters` reports for `idx`.
    pub fn set_stats(&self, idx: u8, stats: FltRtStats) {
        self.lock().stats.insert(idx, stats);
    }

    /// Record the call and apply any pending failure.
    fn begin(
        &self,
        st: &mut State,
        call: Call,
    ) -> Result<(), TransportError> {
        let cmd = call.cmd;
        st.calls.push(call);

        if let Some((n, err)) = st.fail.take() {
            if n == 0 {
                return Err(err);
            }
            st.fail = Some((n - 1, err));
        }

        let items = st.calls.last().map_or(0, |c| c.items);
        if items > self.limit {
            return Err(TransportError::Malformed(format!(
                "{cmd:?}: {items} items over limit {}",
                self.limit
            )));
        }

        Ok(())
    }

    fn add<R>(
        &self,
        call: Call,
        key: TableKey,
        after: Option<RuleHdl>,
        items: &[AddItem<R>],
        rule_id: impl Fn(&R) -> u16,
    ) -> Result<Vec<ItemStatus>, TransportError> {
        let cmd = call.cmd;
        let mut st = self.lock();
        self.begin(&mut st, call)?;

        // The driver checks the anchor before touching anything.
        let mut anchor = match after {
            Some(hdl) => match st.rules.get(&hdl.0) {
                Some(k) if *k == key => Some(hdl.0),
                _ => {
                    return Err(TransportError::Ioctl {
                        cmd,
                        errno: libc::EINVAL,
                    });
                }
            },
            None => None,
        };

        let mut out = Vec::with_capacity(items.len());
        for item in items {
            if st.reject_ids.contains(&rule_id(&item.rule)) {
                out.push(ItemStatus::failed());
                continue;
            }

            let hdl = st.next_hdl;
            st.next_hdl += 1;
            let tbl = st.tables.entry(key.clone()).or_default();

            match anchor {
                Some(a) => {
                    let at = tbl
                        .iter()
                        .position(|h| *h == a)
                        .map_or(tbl.len(), |i| i + 1);
                    tbl.insert(at, hdl);
                    anchor = Some(hdl);
                }
                None if item.at_rear => tbl.push(hdl),
                None => tbl.insert(0, hdl),
            }

            st.rules.insert(hdl, key.clone());
            out.push(ItemStatus::ok(hdl));
        }

        Ok(out)
    }

    fn mdfy<R>(
        &self,
        call: Call,
        items: &[(RuleHdl, R)],
        rule_id: impl Fn(&R) -> u16,
    ) -> Result<Vec<ItemStatus>, TransportError> {
        let mut st = self.lock();
        self.begin(&mut st, call)?;

        Ok(items
            .iter()
            .map(|(hdl, r)| {
                if st.rules.contains_key(&hdl.0)
                    && !st.reject_ids.contains(&rule_id(r))
                {
                    ItemStatus::ok(hdl.0)
                } else {
                    ItemStatus { hdl: hdl.0, status: -1 }
                }
            })
            .collect())
    }
}

impl State {
    /// Take a reference on an existing routing table.
    fn rt_tbl(&mut self, ip: IpType, name: &str) -> Option<u32> {
        let t = self.rt_tbls.get_mut(&(ip, name.to_string()))?;
        t.refs += 1;
        Some(t.hdl)
    }

    fn ensure_rt_tbl(&mut self, ip: IpType, name: &str) -> u32 {
        let key = (ip, name.to_string());
        if let Some(t) = self.rt_tbls.get(&key) {
            return t.hdl;
        }

        let hdl = self.next_hdl;
        self.next_hdl += 1;
        let idx = self.next_rt_idx;
        self.next_rt_idx += 1;
        self.rt_tbls.insert(key, RtTbl { hdl, idx, refs: 0 });
        hdl
    }
}

fn flt_cmd(abi: AbiVersion, after: bool) -> IpaCmd {
    match (abi, after) {
        (AbiVersion::V1, false) => IpaCmd::AddFltRule,
        (AbiVersion::V2, false) => IpaCmd::AddFltRuleV2,
        (AbiVersion::V1, true) => IpaCmd::AddFltRuleAfter,
        (AbiVersion::V2, true) => IpaCmd::AddFltRuleAfterV2,
    }
}

fn rt_cmd(abi: AbiVersion, after: bool) -> IpaCmd {
    match (abi, after) {
        (AbiVersion::V1, false) => IpaCmd::AddRtRuleExt,
        (AbiVersion::V2, false) => IpaCmd::AddRtRuleExtV2,
        (AbiVersion::V1, true) => IpaCmd::AddRtRuleAfter,
        (AbiVersion::V2, true) => IpaCmd::AddRtRuleAfterV2,
    }
}

fn simple(cmd: IpaCmd, ip: Option<IpType>) -> Call {
    Call { cmd, ip, items: 0, abi: None, after: None }
}

impl Transport for FakeDriver {
    fn batch_limit(&self) -> usize {
        self.limit
    }

    fn add_flt_rules(
        &self,
        req: &FltAddReq,
    ) -> Result<Vec<ItemStatus>, TransportError> {
        let call = Call {
            cmd: flt_cmd(req.abi, req.after.is_some()),
            ip: Some(req.ip),
            items: req.items.len(),
            abi: Some(req.abi),
            after: req.after,
        };
        if req.after.is_some() && req.scope == FltScope::Global {
            let mut st = self.lock();
            self.begin(&mut st, call)?;
            return Err(TransportError::Malformed(
                "after-inserts need an endpoint table".to_string(),
            ));
        }

        let hashable = req.items.first().is_some_and(|i| i.rule.opts.hashable);
        let key = TableKey::flt(req.ip, req.scope, hashable);
        self.add(call, key, req.after, req.items, |r: &FltRule| r.opts.rule_id)
    }

    fn add_rt_rules(
        &self,
        req: &RtAddReq,
    ) -> Result<Vec<ItemStatus>, TransportError> {
        let call = Call {
            cmd: rt_cmd(req.abi, req.after.is_some()),
            ip: Some(req.ip),
            items: req.items.len(),
            abi: Some(req.abi),
            after: req.after,
        };
        // Adding to a table the driver has not seen creates it.
        self.lock().ensure_rt_tbl(req.ip, req.tbl_name);
        let hashable = req.items.first().is_some_and(|i| i.rule.opts.hashable);
        let key = TableKey::rt(req.ip, req.tbl_name, hashable);
        self.add(call, key, req.after, req.items, |r: &RtRule| r.opts.rule_id)
    }

    fn mdfy_flt_rules(
        &self,
        req: &MdfyReq<FltRule>,
    ) -> Result<Vec<ItemStatus>, TransportError> {
        let cmd = match req.abi {
            AbiVersion::V1 => IpaCmd::MdfyFltRule,
            AbiVersion::V2 => IpaCmd::MdfyFltRuleV2,
        };
        let call = Call {
            cmd,
            ip: Some(req.ip),
            items: req.items.len(),
            abi: Some(req.abi),
            after: None,
        };
        self.mdfy(call, req.items, |r: &FltRule| r.opts.rule_id)
    }

    fn mdfy_rt_rules(
        &self,
        req: &MdfyReq<RtRule>,
    ) -> Result<Vec<ItemStatus>, TransportError> {
        let cmd = match req.abi {
            AbiVersion::V1 => IpaCmd::MdfyRtRule,
            AbiVersion::V2 => IpaCmd::MdfyRtRuleV2,
        };
        let call = Call {
            cmd,
            ip: Some(req.ip),
            items: req.items.len(),
            abi: Some(req.abi),
            after: None,
        };
        self.mdfy(call, req.items, |r: &RtRule| r.opts.rule_id)
    }

    fn del_rules(
        &self,
        kind: RuleKind,
        ip: IpType,
        hdls: &[RuleHdl],
        _commit: bool,
    ) -> Result<Vec<ItemStatus>, TransportError> {
        let cmd = match kind {
            RuleKind::Filter => IpaCmd::DelFltRule,
            RuleKind::Routing => IpaCmd::DelRtRule,
        };
        let mut st = self.lock();
        let call = Call { items: hdls.len(), ..simple(cmd, Some(ip)) };
        self.begin(&mut st, call)?;

        let mut out = Vec::with_capacity(hdls.len());
        for hdl in hdls {
            let Some(key) = st.rules.get(&hdl.0).cloned() else {
                out.push(ItemStatus { hdl: hdl.0, status: -1 });
                continue;
            };

            if key.kind != kind || key.ip != ip {
                out.push(ItemStatus { hdl: hdl.0, status: -1 });
                continue;
            }

            st.rules.remove(&hdl.0);
            if let Some(tbl) = st.tables.get_mut(&key) {
                tbl.retain(|h| *h != hdl.0);
            }
            out.push(ItemStatus::ok(hdl.0));
        }

        Ok(out)
    }

    fn commit(&self, kind: RuleKind, ip: IpType) -> Result<(), TransportError> {
        let cmd = match kind {
            RuleKind::Filter => IpaCmd::CommitFlt,
            RuleKind::Routing => IpaCmd::CommitRt,
        };
        let mut st = self.lock();
        self.begin(&mut st, simple(cmd, Some(ip)))
    }

    fn reset(&self, kind: RuleKind, ip: IpType) -> Result<(), TransportError> {
        let cmd = match kind {
            RuleKind::Filter => IpaCmd::ResetFlt,
            RuleKind::Routing => IpaCmd::ResetRt,
        };
        let mut st = self.lock();
        self.begin(&mut st, simple(cmd, Some(ip)))?;

        st.rules.retain(|_, k| k.kind != kind || k.ip != ip);
        st.tables.retain(|k, _| k.kind != kind || k.ip != ip);
        Ok(())
    }

    fn generate_eq(
        &self,
        ip: IpType,
        attrib: &RuleAttrib,
    ) -> Result<EquationSet, TransportError> {
        let cmd = IpaCmd::GenerateFltEq;
        let mut st = self.lock();
        self.begin(&mut st, simple(cmd, Some(ip)))?;

        compile(attrib, ip, &HwCaps::for_hw(self.hw))
            .map_err(|_| TransportError::Ioctl { cmd, errno: libc::EINVAL })
    }

    fn get_rt_tbl(
        &self,
        ip: IpType,
        name: &str,
    ) -> Result<u32, TransportError> {
        let cmd = IpaCmd::GetRtTbl;
        let mut st = self.lock();
        self.begin(&mut st, simple(cmd, Some(ip)))?;
        st.rt_tbl(ip, name)
            .ok_or(TransportError::Ioctl { cmd, errno: libc::EINVAL })
    }

    fn put_rt_tbl(&self, hdl: u32) -> Result<(), TransportError> {
        let cmd = IpaCmd::PutRtTbl;
        let mut st = self.lock();
        self.begin(&mut st, simple(cmd, None))?;

        let tbl = st
            .rt_tbls
            .values_mut()
            .find(|t| t.hdl == hdl)
            .ok_or(TransportError::Ioctl { cmd, errno: libc::EINVAL })?;
        tbl.refs = tbl.refs.saturating_sub(1);
        Ok(())
    }

    fn query_rt_tbl_index(
        &self,
        ip: IpType,
        name: &str,
    ) -> Result<u32, TransportError> {
        let cmd = IpaCmd::QueryRtTblIndex;
        let mut st = self.lock();
        self.begin(&mut st, simple(cmd, Some(ip)))?;

        st.rt_tbls
            .get(&(ip, name.to_string()))
            .map(|t| t.idx)
            .ok_or(TransportError::Ioctl { cmd, errno: libc::EINVAL })
    }

    fn get_hw_version(&self) -> Result<HwType, TransportError> {
        let mut st = self.lock();
        self.begin(&mut st, simple(IpaCmd::GetHwVersion, None))?;
        Ok(self.hw)
    }

    fn alloc_counters(
        &self,
        req: &CounterAllocReq,
    ) -> Result<CounterAlloc, TransportError> {
        let cmd = IpaCmd::FnrCounterAlloc;
        let mut st = self.lock();
        self.begin(&mut st, simple(cmd, None))?;

        st.counters
            .alloc_pair(*req)
            .map_err(|_| TransportError::Ioctl { cmd, errno: libc::ENOSPC })
    }

    fn dealloc_counters(&self, hdl: CounterHdl) -> Result<(), TransportError> {
        let cmd = IpaCmd::FnrCounterDealloc;
        let mut st = self.lock();
        self.begin(&mut st, simple(cmd, None))?;

        st.counters
            .dealloc(hdl)
            .map(|_| ())
            .map_err(|_| TransportError::Ioctl { cmd, errno: libc::EINVAL })
    }

    fn query_counters(
        &self,
        range: CounterRange,
        reset: bool,
    ) -> Result<Vec<FltRtStats>, TransportError> {
        let mut st = self.lock();
        self.begin(&mut st, simple(IpaCmd::FnrCounterQuery, None))?;

        let out = range
            .iter()
            .map(|i| st.stats.get(&i).copied().unwrap_or_default())
            .collect();
        if reset {
            for i in range.iter() {
                st.stats.remove(&i);
            }
        }
        Ok(out)
    }
}
