// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The rule tables of one session.
//!
//! The manager mirrors the order in which the driver will evaluate
//! the rules it added. It never reads that order back, so another
//! writer touching the same tables makes the mirror stale.
//!
//! Adding a rule is two steps. [`TableManager::stage_add`] checks the
//! rule and hands back a [`Ticket`]; [`TableManager::commit`] sends
//! everything staged and binds each ticket that succeeds to a driver
//! handle. Checks that fail never change the manager.

use super::compile::CompileError;
use super::compile::check_eq;
use super::compile::compile;
use super::counter::CounterAllocator;
use super::counter::CounterError;
use super::session::AbiChoice;
use super::session::BatchError;
use super::session::Session;
use super::session::SessionConfig;
use super::transport::AddItem;
use super::transport::FltScope;
use super::transport::ItemStatus;
use super::transport::Transport;
use super::transport::TransportError;
use crate::api::Client;
use crate::api::CounterAlloc;
use crate::api::CounterAllocReq;
use crate::api::CounterHdl;
use crate::api::CounterRange;
use crate::api::DFLT_RT_TBL_NAME;
use crate::api::EquationSet;
use crate::api::FltMatch;
use crate::api::FltRtStats;
use crate::api::FltRule;
use crate::api::HwCaps;
use crate::api::HwType;
use crate::api::IpType;
use crate::api::RtRule;
use crate::api::Rule;
use crate::api::RuleAttrib;
use crate::api::RuleHdl;
use crate::api::RuleKind;
use crate::api::resource_name;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;
use slog::Logger;
use slog::debug;
use slog::info;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Mutex;
use thiserror::Error;

/// The tables a rule can be added to.
#[derive(
    Clone,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub enum TableSet {
    /// The global filter table.
    FilterGlobal,
    /// The filter table of one producer endpoint.
    Filter(Client),
    /// A named routing table.
    Routing(String),
}

impl TableSet {
    pub fn kind(&self) -> RuleKind {
        match self {
            TableSet::FilterGlobal | TableSet::Filter(_) => RuleKind::Filter,
            TableSet::Routing(_) => RuleKind::Routing,
        }
    }

    /// The routing table the driver creates for each family.
    pub fn is_default(&self) -> bool {
        matches!(self, TableSet::Routing(name) if name == DFLT_RT_TBL_NAME)
    }

    pub fn default_rt() -> Self {
        TableSet::Routing(DFLT_RT_TBL_NAME.to_string())
    }
}

impl Display for TableSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TableSet::FilterGlobal => write!(f, "flt:global"),
            TableSet::Filter(ep) => write!(f, "flt:{ep}"),
            TableSet::Routing(name) => write!(f, "rt:{name}"),
        }
    }
}

/// One ordered rule table.
#[derive(
    Clone,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct TableId {
    pub set: TableSet,
    pub ip: IpType,
    pub hashable: bool,
}

impl Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let hash = if self.hashable { "hash" } else { "nhash" };
        write!(f, "{}/{}/{hash}", self.set, self.ip)
    }
}

/// Names a staged rule until it is committed.
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
pub struct Ticket(u64);

impl Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where to put a new rule.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Position {
    Front,
    Rear,
    After(RuleHdl),
    /// After a rule that is staged but not yet committed.
    AfterTicket(Ticket),
}

impl Position {
    fn is_plain(&self) -> bool {
        matches!(self, Position::Front | Position::Rear)
    }
}

/// A committed rule.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Entry {
    pub hdl: RuleHdl,
    /// The rule as it was sent to the driver.
    pub rule: Rule,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StagedRule {
    pub ticket: Ticket,
    pub table: TableId,
    pub rule: Rule,
    pub pos: Position,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ItemFailure {
    /// The driver rejected the item.
    Status(i32),
    /// The rule this item was to follow is gone or never committed;
    /// the item was not sent.
    AnchorFailed,
}

/// The per-ticket outcome of [`TableManager::commit`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CommitReport {
    pub bound: Vec<(Ticket, RuleHdl)>,
    pub failed: Vec<(Ticket, ItemFailure)>,
}

/// The per-handle outcome of a modify or delete batch.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ItemReport {
    pub ok: Vec<RuleHdl>,
    pub failed: Vec<(RuleHdl, i32)>,
}

#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum TableError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("the default routing table does not take rear inserts")]
    RearInsertOnDefaultTable,

    /// The driver's after-insert request names an endpoint, so the
    /// global filter table only takes front and rear inserts.
    #[error("the global filter table does not take after inserts")]
    AfterInsertOnGlobalTable,

    #[error("a {kind} rule cannot go in {set}")]
    KindMismatch { set: TableSet, kind: RuleKind },

    #[error("unknown rule handle {0}")]
    UnknownHandle(RuleHdl),

    #[error("unknown ticket {0}")]
    UnknownTicket(Ticket),

    #[error("rule id {rule_id} already used in {table}")]
    DuplicateRuleId { table: TableId, rule_id: u16 },

    #[error("no free rule id in {0}")]
    RuleIdsExhausted(TableId),

    #[error("hardware has no hashable tables")]
    HashableUnsupported,

    #[error("the hashable flag of rule {0} cannot change")]
    HashableChange(RuleHdl),

    #[error("rule {hdl} has id {have}; it cannot become {want}")]
    RuleIdChange { hdl: RuleHdl, have: u16, want: u16 },

    #[error("hardware has no flow statistics")]
    StatsUnsupported,

    #[error("counter {0} is not allocated")]
    CounterNotAllocated(u8),

    #[error("rule needs the v2 ABI but the session forces v1")]
    AbiMismatch,

    #[error("invalid routing table name {0:?}")]
    InvalidTableName(String),

    #[error("driver rejected rule {hdl}: status {status}")]
    ItemFailed { hdl: RuleHdl, status: i32 },

    #[error(transparent)]
    Counter(#[from] CounterError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A commit stopped on a whole-call failure. `partial` covers the
    /// items handled before it; everything else is still staged.
    #[error("commit interrupted: {err}")]
    CommitInterrupted { err: TransportError, partial: CommitReport },

    /// A modify or delete batch stopped on a whole-call failure.
    #[error("batch interrupted: {err}")]
    BatchInterrupted { err: TransportError, partial: ItemReport },
}

/// Where the run starting at `staged[start]` ends.
fn run_end(staged: &[StagedRule], start: usize) -> usize {
    let first = &staged[start];
    let mut end = start + 1;

    while let Some(next) = staged.get(end) {
        if next.table != first.table {
            break;
        }

        let joins = if first.pos.is_plain() {
            next.pos.is_plain()
        } else {
            next.pos == Position::AfterTicket(staged[end - 1].ticket)
        };

        if !joins {
            break;
        }
        end += 1;
    }

    end
}

/// Tracks the tables, handles, and counters of one session.
pub struct TableManager<T> {
    session: Session<T>,
    caps: HwCaps,
    tables: BTreeMap<TableId, Vec<Entry>>,
    index: BTreeMap<RuleHdl, TableId>,
    staged: Vec<StagedRule>,
    bound: BTreeMap<Ticket, RuleHdl>,
    next_ticket: u64,
    counters: CounterAllocator,
    log: Logger,
}

impl<T: Transport> TableManager<T> {
    pub fn new(
        xport: T,
        cfg: SessionConfig,
        caps: HwCaps,
        log: Logger,
    ) -> Self {
        let session = Session::new(xport, cfg, log.clone());
        Self {
            session,
            caps: caps.clamp(),
            tables: BTreeMap::new(),
            index: BTreeMap::new(),
            staged: Vec::new(),
            bound: BTreeMap::new(),
            next_ticket: 1,
            counters: CounterAllocator::new(),
            log,
        }
    }

    pub fn caps(&self) -> &HwCaps {
        &self.caps
    }

    pub fn session(&self) -> &Session<T> {
        &self.session
    }

    pub fn counters(&self) -> &CounterAllocator {
        &self.counters
    }

    pub fn staged(&self) -> &[StagedRule] {
        &self.staged
    }

    pub fn tables(&self) -> impl Iterator<Item = (&TableId, &[Entry])> {
        self.tables.iter().map(|(id, e)| (id, e.as_slice()))
    }

    pub fn entries(&self, table: &TableId) -> &[Entry] {
        self.tables.get(table).map(|e| e.as_slice()).unwrap_or(&[])
    }

    /// The handles of `table`, in evaluation order.
    pub fn sequence(&self, table: &TableId) -> Vec<RuleHdl> {
        self.entries(table).iter().map(|e| e.hdl).collect()
    }

    pub fn table_of(&self, hdl: RuleHdl) -> Option<&TableId> {
        self.index.get(&hdl)
    }

    pub fn entry(&self, hdl: RuleHdl) -> Option<&Entry> {
        let table = self.index.get(&hdl)?;
        self.entries(table).iter().find(|e| e.hdl == hdl)
    }

    /// The handle a committed ticket was bound to.
    pub fn handle_of(&self, ticket: Ticket) -> Option<RuleHdl> {
        self.bound.get(&ticket).copied()
    }

    /// Checks shared by staging and modifying.
    fn check_common(
        &self,
        ip: IpType,
        rule: &Rule,
    ) -> Result<Rule, TableError> {
        if rule.hashable() && !self.caps.hashable {
            return Err(TableError::HashableUnsupported);
        }

        if let Some(idx) = rule.cnt_idx() {
            if !self.caps.stats {
                return Err(TableError::StatsUnsupported);
            }
            if !self.counters.contains(idx) {
                return Err(TableError::CounterNotAllocated(idx));
            }
        }

        if self.session.config().abi == AbiChoice::V1 && rule.needs_v2() {
            return Err(TableError::AbiMismatch);
        }

        self.prepare(ip, rule)
    }

    /// Compile-check `rule` and put it in the form it is sent in.
    ///
    /// Fields with no equation form are left to the driver, so
    /// `Unsupported` is not an error here.
    fn prepare(&self, ip: IpType, rule: &Rule) -> Result<Rule, TableError> {
        let lower = self.session.config().lower_locally;

        match rule {
            Rule::Flt(r) => match &r.matcher {
                FltMatch::Attrib(attrib) => {
                    match compile(attrib, ip, &self.caps) {
                        Ok(eq) if lower => Ok(Rule::Flt(FltRule {
                            matcher: FltMatch::Eq(eq),
                            ..r.clone()
                        })),
                        Ok(_) | Err(CompileError::Unsupported { .. }) => {
                            Ok(rule.clone())
                        }
                        Err(e) => Err(e.into()),
                    }
                }

                FltMatch::Eq(eq) => {
                    check_eq(eq, &self.caps)?;
                    Ok(rule.clone())
                }
            },

            Rule::Rt(r) => match compile(&r.attrib, ip, &self.caps) {
                Ok(_) | Err(CompileError::Unsupported { .. }) => {
                    Ok(rule.clone())
                }
                Err(e) => Err(e.into()),
            },
        }
    }

    fn ids_in_use<'a>(
        &'a self,
        table: &'a TableId,
    ) -> impl Iterator<Item = u16> + 'a {
        let committed = self.entries(table).iter().map(|e| e.rule.rule_id());
        let staged = self
            .staged
            .iter()
            .filter(move |s| &s.table == table)
            .map(|s| s.rule.rule_id());
        committed.chain(staged)
    }

    fn free_rule_id(&self, table: &TableId) -> Result<u16, TableError> {
        let used: BTreeSet<u16> = self.ids_in_use(table).collect();
        (1..=u16::MAX)
            .find(|id| !used.contains(id))
            .ok_or_else(|| TableError::RuleIdsExhausted(table.clone()))
    }

    /// Stage `rule` for insertion into `set` at `pos`.
    ///
    /// A rule id of zero is replaced with the lowest id free in the
    /// target table.
    pub fn stage_add(
        &mut self,
        set: TableSet,
        ip: IpType,
        rule: Rule,
        pos: Position,
    ) -> Result<Ticket, TableError> {
        if set.kind() != rule.kind() {
            return Err(TableError::KindMismatch { set, kind: rule.kind() });
        }

        if let TableSet::Routing(name) = &set {
            if resource_name(name).is_none() {
                return Err(TableError::InvalidTableName(name.clone()));
            }
        }

        if pos == Position::Rear && set.is_default() {
            return Err(TableError::RearInsertOnDefaultTable);
        }

        if !pos.is_plain() && set == TableSet::FilterGlobal {
            return Err(TableError::AfterInsertOnGlobalTable);
        }

        let table = TableId { set, ip, hashable: rule.hashable() };

        let pos = match pos {
            Position::After(hdl) => {
                if self.index.get(&hdl) != Some(&table) {
                    return Err(TableError::UnknownHandle(hdl));
                }
                pos
            }

            Position::AfterTicket(t) => match self.bound.get(&t) {
                Some(&hdl) if self.index.get(&hdl) == Some(&table) => {
                    Position::After(hdl)
                }
                Some(_) => return Err(TableError::UnknownTicket(t)),
                None => {
                    if !self
                        .staged
                        .iter()
                        .any(|s| s.ticket == t && s.table == table)
                    {
                        return Err(TableError::UnknownTicket(t));
                    }
                    pos
                }
            },

            Position::Front | Position::Rear => pos,
        };

        let mut rule = self.check_common(ip, &rule)?;

        match rule.rule_id() {
            0 => rule.opts_mut().rule_id = self.free_rule_id(&table)?,
            id => {
                if self.ids_in_use(&table).any(|used| used == id) {
                    return Err(TableError::DuplicateRuleId {
                        table,
                        rule_id: id,
                    });
                }
            }
        }

        let ticket = Ticket(self.next_ticket);
        self.next_ticket += 1;

        debug!(self.log, "staged rule";
            "ticket" => %ticket,
            "table" => %table,
            "rule_id" => rule.rule_id(),
            "pos" => ?pos);

        self.staged.push(StagedRule { ticket, table, rule, pos });
        Ok(ticket)
    }

    /// Drop a staged rule without sending it.
    pub fn unstage(
        &mut self,
        ticket: Ticket,
    ) -> Result<StagedRule, TableError> {
        let i = self
            .staged
            .iter()
            .position(|s| s.ticket == ticket)
            .ok_or(TableError::UnknownTicket(ticket))?;
        Ok(self.staged.remove(i))
    }

    /// Send one run. Returns the statuses of the items that went
    /// through, and the error that stopped the rest, if any.
    fn send_run(
        &self,
        run: &[StagedRule],
        after: Option<RuleHdl>,
    ) -> (Vec<ItemStatus>, Option<TransportError>) {
        let table = &run[0].table;

        let res = match &table.set {
            TableSet::FilterGlobal | TableSet::Filter(_) => {
                let scope = match &table.set {
                    TableSet::Filter(ep) => FltScope::Ep(*ep),
                    _ => FltScope::Global,
                };
                let items: Vec<AddItem<FltRule>> = run
                    .iter()
                    .filter_map(|s| match &s.rule {
                        Rule::Flt(r) => Some(AddItem {
                            at_rear: s.pos == Position::Rear,
                            rule: r.clone(),
                        }),
                        Rule::Rt(_) => None,
                    })
                    .collect();
                self.session.add_flt(table.ip, scope, after, &items)
            }

            TableSet::Routing(name) => {
                let items: Vec<AddItem<RtRule>> = run
                    .iter()
                    .filter_map(|s| match &s.rule {
                        Rule::Rt(r) => Some(AddItem {
                            at_rear: s.pos == Position::Rear,
                            rule: r.clone(),
                        }),
                        Rule::Flt(_) => None,
                    })
                    .collect();
                self.session.add_rt(table.ip, name, after, &items)
            }
        };

        match res {
            Ok(st) => (st, None),
            Err(BatchError { done, err }) => (done, Some(err)),
        }
    }

    /// Record the outcome of the first `st.len()` items of a run.
    /// Returns the anchor for whatever follows in the run.
    fn apply_run(
        &mut self,
        run: &[StagedRule],
        mut after: Option<RuleHdl>,
        st: &[ItemStatus],
        report: &mut CommitReport,
    ) -> Option<RuleHdl> {
        for (s, st) in run.iter().zip(st) {
            if !st.is_ok() {
                report.failed.push((s.ticket, ItemFailure::Status(st.status)));
                continue;
            }

            let hdl = RuleHdl(st.hdl);
            let tbl = self.tables.entry(s.table.clone()).or_default();
            let entry = Entry { hdl, rule: s.rule.clone() };

            match after {
                Some(anchor) => {
                    let at = tbl
                        .iter()
                        .position(|e| e.hdl == anchor)
                        .map_or(tbl.len(), |i| i + 1);
                    tbl.insert(at, entry);
                    after = Some(hdl);
                }

                None if s.pos == Position::Rear => tbl.push(entry),
                None => tbl.insert(0, entry),
            }

            self.index.insert(hdl, s.table.clone());
            self.bound.insert(s.ticket, hdl);
            report.bound.push((s.ticket, hdl));
        }

        after
    }

    /// Send every staged rule to the driver.
    ///
    /// Items are grouped into runs: consecutive plain inserts into
    /// one table, or a chain of inserts each following the one staged
    /// before it. Each run is one (possibly split) batch. Per-item
    /// failures are reported and leave the tables as they were for
    /// that item. A whole-call failure stops the commit; items not
    /// yet sent stay staged.
    pub fn commit(&mut self) -> Result<CommitReport, TableError> {
        let staged = std::mem::take(&mut self.staged);
        let mut report = CommitReport::default();
        let mut start = 0;

        while start < staged.len() {
            let end = run_end(&staged, start);
            let run = &staged[start..end];
            let table = &run[0].table;

            let after = match run[0].pos {
                Position::Front | Position::Rear => None,
                Position::After(hdl) => Some(hdl),
                Position::AfterTicket(t) => self.bound.get(&t).copied(),
            };

            let anchor_ok = match (run[0].pos.is_plain(), after) {
                (true, _) => true,
                (false, Some(hdl)) => self.index.get(&hdl) == Some(table),
                (false, None) => false,
            };

            if !anchor_ok {
                // Every later item in the run follows the one before
                // it, so the whole run goes.
                for s in run {
                    report.failed.push((s.ticket, ItemFailure::AnchorFailed));
                }
                start = end;
                continue;
            }

            debug!(self.log, "committing run";
                "table" => %table, "items" => run.len(), "after" => ?after);

            let (st, err) = self.send_run(run, after);
            let sent = st.len();
            let next_anchor = self.apply_run(run, after, &st, &mut report);

            if let Some(err) = err {
                let mut rest: Vec<StagedRule> = staged[start + sent..].to_vec();
                // The first unsent item of a chain now follows the last
                // rule of the chain that made it in.
                if let (Some(first), Some(anchor)) =
                    (rest.first_mut(), next_anchor)
                {
                    if sent > 0 && start + sent < end {
                        first.pos = Position::After(anchor);
                    }
                }
                self.staged = rest;

                info!(self.log, "commit interrupted";
                    "bound" => report.bound.len(),
                    "failed" => report.failed.len(),
                    "still_staged" => self.staged.len(),
                    "err" => %err);
                return Err(TableError::CommitInterrupted {
                    err,
                    partial: report,
                });
            }

            start = end;
        }

        info!(self.log, "commit";
            "bound" => report.bound.len(), "failed" => report.failed.len());
        Ok(report)
    }

    /// Replace the rule behind each handle.
    ///
    /// All items are checked before anything is sent. A rule id of
    /// zero keeps the current id.
    pub fn modify_batch(
        &mut self,
        items: Vec<(RuleHdl, Rule)>,
    ) -> Result<ItemReport, TableError> {
        let mut prepared = Vec::with_capacity(items.len());

        for (hdl, rule) in items {
            let table = self
                .index
                .get(&hdl)
                .ok_or(TableError::UnknownHandle(hdl))?;
            let cur = self.entry(hdl).ok_or(TableError::UnknownHandle(hdl))?;

            if rule.kind() != cur.rule.kind() {
                return Err(TableError::KindMismatch {
                    set: table.set.clone(),
                    kind: rule.kind(),
                });
            }

            if rule.hashable() != cur.rule.hashable() {
                return Err(TableError::HashableChange(hdl));
            }

            let have = cur.rule.rule_id();
            let mut rule = match rule.rule_id() {
                0 => {
                    let mut r = rule;
                    r.opts_mut().rule_id = have;
                    r
                }
                want if want != have => {
                    return Err(TableError::RuleIdChange { hdl, have, want });
                }
                _ => rule,
            };

            let ip = table.ip;
            rule = self.check_common(ip, &rule)?;
            prepared.push((hdl, ip, rule));
        }

        let mut report = ItemReport::default();
        let mut start = 0;

        while start < prepared.len() {
            let (_, ip, ref rule) = prepared[start];
            let kind = rule.kind();
            let end = start
                + prepared[start..]
                    .iter()
                    .take_while(|(_, i, r)| *i == ip && r.kind() == kind)
                    .count();
            let group = &prepared[start..end];

            let res = match kind {
                RuleKind::Filter => {
                    let items: Vec<(RuleHdl, FltRule)> = group
                        .iter()
                        .filter_map(|(h, _, r)| match r {
                            Rule::Flt(f) => Some((*h, f.clone())),
                            Rule::Rt(_) => None,
                        })
                        .collect();
                    self.session.mdfy_flt(ip, &items)
                }

                RuleKind::Routing => {
                    let items: Vec<(RuleHdl, RtRule)> = group
                        .iter()
                        .filter_map(|(h, _, r)| match r {
                            Rule::Rt(rt) => Some((*h, rt.clone())),
                            Rule::Flt(_) => None,
                        })
                        .collect();
                    self.session.mdfy_rt(ip, &items)
                }
            };

            let (st, err) = match res {
                Ok(st) => (st, None),
                Err(BatchError { done, err }) => (done, Some(err)),
            };

            for ((hdl, _, rule), st) in group.iter().zip(&st) {
                if !st.is_ok() {
                    report.failed.push((*hdl, st.status));
                    continue;
                }

                if let Some(table) = self.index.get(hdl) {
                    if let Some(tbl) = self.tables.get_mut(table) {
                        let found = tbl.iter_mut().find(|e| e.hdl == *hdl);
                        if let Some(e) = found {
                            e.rule = rule.clone();
                        }
                    }
                }
                report.ok.push(*hdl);
            }

            if let Some(err) = err {
                return Err(TableError::BatchInterrupted {
                    err,
                    partial: report,
                });
            }

            start = end;
        }

        Ok(report)
    }

    pub fn modify(
        &mut self,
        hdl: RuleHdl,
        rule: Rule,
    ) -> Result<(), TableError> {
        let report = self.modify_batch(vec![(hdl, rule)])?;
        match report.failed.first() {
            Some(&(hdl, status)) => Err(TableError::ItemFailed { hdl, status }),
            None => Ok(()),
        }
    }

    fn forget(&mut self, hdl: RuleHdl) {
        if let Some(table) = self.index.remove(&hdl) {
            if let Some(tbl) = self.tables.get_mut(&table) {
                tbl.retain(|e| e.hdl != hdl);
                if tbl.is_empty() {
                    self.tables.remove(&table);
                }
            }
        }
        self.bound.retain(|_, h| *h != hdl);
    }

    /// Delete the rules behind `hdls`. Every handle must be tracked.
    pub fn delete_batch(
        &mut self,
        hdls: &[RuleHdl],
    ) -> Result<ItemReport, TableError> {
        let mut keyed = Vec::with_capacity(hdls.len());
        for hdl in hdls {
            let table =
                self.index.get(hdl).ok_or(TableError::UnknownHandle(*hdl))?;
            keyed.push((*hdl, table.set.kind(), table.ip));
        }

        let mut report = ItemReport::default();
        let mut start = 0;

        while start < keyed.len() {
            let (_, kind, ip) = keyed[start];
            let end = start
                + keyed[start..]
                    .iter()
                    .take_while(|(_, k, i)| *k == kind && *i == ip)
                    .count();
            let group: Vec<RuleHdl> =
                keyed[start..end].iter().map(|(h, _, _)| *h).collect();

            let (st, err) = match self.session.del(kind, ip, &group) {
                Ok(st) => (st, None),
                Err(BatchError { done, err }) => (done, Some(err)),
            };

            for (hdl, st) in group.iter().zip(&st) {
                if st.is_ok() {
                    self.forget(*hdl);
                    report.ok.push(*hdl);
                } else {
                    report.failed.push((*hdl, st.status));
                }
            }

            if let Some(err) = err {
                return Err(TableError::BatchInterrupted {
                    err,
                    partial: report,
                });
            }

            start = end;
        }

        Ok(report)
    }

    pub fn delete(&mut self, hdl: RuleHdl) -> Result<(), TableError> {
        let report = self.delete_batch(&[hdl])?;
        match report.failed.first() {
            Some(&(hdl, status)) => Err(TableError::ItemFailed { hdl, status }),
            None => Ok(()),
        }
    }

    /// Delete every tracked rule in the tables of family `ip` with the
    /// given hashable flag. There is no undo.
    pub fn reset_table(
        &mut self,
        ip: IpType,
        hashable: bool,
    ) -> Result<ItemReport, TableError> {
        let hdls: Vec<RuleHdl> = self
            .tables
            .iter()
            .filter(|(id, _)| id.ip == ip && id.hashable == hashable)
            .flat_map(|(_, entries)| entries.iter().map(|e| e.hdl))
            .collect();

        info!(self.log, "reset table";
            "ip" => %ip, "hashable" => hashable, "rules" => hdls.len());
        self.delete_batch(&hdls)
    }

    /// Have the driver drop every rule of `kind` for `ip`, including
    /// those added by other sessions.
    pub fn reset_all(
        &mut self,
        kind: RuleKind,
        ip: IpType,
    ) -> Result<(), TableError> {
        self.session.reset(kind, ip)?;

        let gone: Vec<RuleHdl> = self
            .index
            .iter()
            .filter(|(_, id)| id.set.kind() == kind && id.ip == ip)
            .map(|(h, _)| *h)
            .collect();
        for hdl in gone {
            self.forget(hdl);
        }

        Ok(())
    }

    /// Have the driver program the hardware with its tables.
    pub fn commit_hw(
        &mut self,
        kind: RuleKind,
        ip: IpType,
    ) -> Result<(), TableError> {
        Ok(self.session.commit(kind, ip)?)
    }

    /// Allocate counters in the driver and track them locally.
    pub fn alloc_counters(
        &mut self,
        req: CounterAllocReq,
    ) -> Result<CounterAlloc, TableError> {
        let alloc = self.session.alloc_counters(&req)?;
        if let Err(e) = self.counters.adopt(alloc) {
            // Hand back what the driver gave us but we cannot track.
            if let Err(de) = self.session.dealloc_counters(alloc.hdl) {
                info!(self.log, "failed to release untracked counters";
                    "hdl" => %alloc.hdl, "err" => %de);
            }
            return Err(e.into());
        }
        debug!(self.log, "counters allocated";
            "hdl" => %alloc.hdl, "hw" => ?alloc.hw, "sw" => ?alloc.sw);
        Ok(alloc)
    }

    pub fn dealloc_counters(
        &mut self,
        hdl: CounterHdl,
    ) -> Result<(), TableError> {
        if self.counters.get(hdl).is_none() {
            return Err(CounterError::UnknownAllocation(hdl).into());
        }

        self.session.dealloc_counters(hdl)?;
        self.counters.dealloc(hdl)?;
        Ok(())
    }

    pub fn query_counters(
        &self,
        range: CounterRange,
        reset: bool,
    ) -> Result<Vec<FltRtStats>, TableError> {
        Ok(self.session.query_counters(range, reset)?)
    }

    pub fn driver_eq(
        &self,
        ip: IpType,
        attrib: &RuleAttrib,
    ) -> Result<EquationSet, TableError> {
        Ok(self.session.generate_eq(ip, attrib)?)
    }

    pub fn rt_tbl_hdl(
        &self,
        ip: IpType,
        name: &str,
    ) -> Result<u32, TableError> {
        Ok(self.session.get_rt_tbl(ip, name)?)
    }

    pub fn put_rt_tbl(&self, hdl: u32) -> Result<(), TableError> {
        Ok(self.session.put_rt_tbl(hdl)?)
    }

    pub fn rt_tbl_index(
        &self,
        ip: IpType,
        name: &str,
    ) -> Result<u32, TableError> {
        Ok(self.session.query_rt_tbl_index(ip, name)?)
    }

    pub fn hw_version(&self) -> Result<HwType, TableError> {
        Ok(self.session.get_hw_version()?)
    }
}

/// A [`TableManager`] that can be shared between threads.
pub struct SharedManager<T> {
    inner: Mutex<TableManager<T>>,
}

impl<T: Transport> SharedManager<T> {
    pub fn new(mgr: TableManager<T>) -> Self {
        Self { inner: Mutex::new(mgr) }
    }

    /// Run `f` with the manager locked.
    pub fn with<R>(&self, f: impl FnOnce(&mut TableManager<T>) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    pub fn into_inner(self) -> TableManager<T> {
        self.inner.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::FltAction;
    use crate::api::RtTblRef;

    fn staged(ticket: u64, set: TableSet, pos: Position) -> StagedRule {
        let attrib = RuleAttrib::default();
        let rule = match set.kind() {
            RuleKind::Filter => Rule::Flt(FltRule::new(
                FltAction::Routing,
                RtTblRef::Hdl(1),
                attrib,
            )),
            RuleKind::Routing => {
                Rule::Rt(RtRule::new(Client::AppsLanCons, attrib))
            }
        };

        StagedRule {
            ticket: Ticket(ticket),
            table: TableId { set, ip: IpType::V4, hashable: false },
            rule,
            pos,
        }
    }

    #[test]
    fn table_set_kind() {
        assert_eq!(TableSet::FilterGlobal.kind(), RuleKind::Filter);
        assert_eq!(
            TableSet::Filter(Client::UsbProd).kind(),
            RuleKind::Filter
        );
        assert!(TableSet::default_rt().is_default());
        assert!(!TableSet::Routing("wan".into()).is_default());
        assert_eq!(TableSet::default_rt().to_string(), "rt:ipa_dflt_rt");
    }

    #[test]
    fn runs_split_on_table_and_chain() {
        let wan = TableSet::Routing("wan".into());
        let list = vec![
            staged(1, TableSet::FilterGlobal, Position::Front),
            staged(2, TableSet::FilterGlobal, Position::Rear),
            staged(3, wan.clone(), Position::Rear),
            staged(4, wan.clone(), Position::After(RuleHdl(9))),
            staged(5, wan.clone(), Position::AfterTicket(Ticket(4))),
            // Same anchor as ticket 4; starts its own run.
            staged(6, wan.clone(), Position::After(RuleHdl(9))),
            staged(7, wan, Position::Front),
        ];

        let mut ends = vec![];
        let mut start = 0;
        while start < list.len() {
            let end = run_end(&list, start);
            ends.push(end);
            start = end;
        }

        assert_eq!(ends, vec![2, 3, 5, 6, 7]);
    }
}
