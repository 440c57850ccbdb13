// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Batch splitting on top of a [`Transport`].

use super::transport::AbiVersion;
use super::transport::AddItem;
use super::transport::FltAddReq;
use super::transport::FltScope;
use super::transport::ItemStatus;
use super::transport::MdfyReq;
use super::transport::RtAddReq;
use super::transport::Transport;
use super::transport::TransportError;
use crate::api::CounterAlloc;
use crate::api::CounterAllocReq;
use crate::api::CounterHdl;
use crate::api::CounterRange;
use crate::api::EquationSet;
use crate::api::FltRtStats;
use crate::api::FltRule;
use crate::api::HwType;
use crate::api::IpType;
use crate::api::RtRule;
use crate::api::RuleAttrib;
use crate::api::RuleHdl;
use crate::api::RuleKind;
use crate::api::RuleOpts;
use serde::Deserialize;
use serde::Serialize;
use slog::Logger;
use slog::debug;
use slog::warn;
use thiserror::Error;

/// How to pick the wire layout of a batch.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AbiChoice {
    /// v1, unless a rule in the chunk needs a v2-only option.
    #[default]
    Auto,
    V1,
    V2,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    pub abi: AbiChoice,
    /// Send filter rules in equation form, lowered by this crate,
    /// rather than letting the driver lower them.
    pub lower_locally: bool,
    /// Ask the driver to commit with every batch.
    pub commit: bool,
    /// Cap batches below what the transport allows.
    pub batch_limit: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            abi: AbiChoice::Auto,
            lower_locally: true,
            commit: false,
            batch_limit: None,
        }
    }
}

/// A whole-call failure partway through a split request.
///
/// `done` holds the statuses of the chunks that went through; the
/// failed chunk and everything after it were not applied.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[error("transport failed after {} items: {err}", done.len())]
pub struct BatchError {
    pub done: Vec<ItemStatus>,
    #[source]
    pub err: TransportError,
}

impl BatchError {
    fn at(done: Vec<ItemStatus>, err: TransportError) -> Self {
        Self { done, err }
    }
}

/// Talks to the driver on behalf of a [`TableManager`].
///
/// Every call blocks until the transport returns.
///
/// [`TableManager`]: super::table::TableManager
pub struct Session<T> {
    xport: T,
    cfg: SessionConfig,
    log: Logger,
}

impl<T: Transport> Session<T> {
    pub fn new(xport: T, cfg: SessionConfig, log: Logger) -> Self {
        Self { xport, cfg, log }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.cfg
    }

    pub fn transport(&self) -> &T {
        &self.xport
    }

    pub fn batch_limit(&self) -> usize {
        let lim = self.xport.batch_limit();
        self.cfg.batch_limit.map_or(lim, |cap| cap.min(lim)).max(1)
    }

    /// Pick the ABI for one chunk.
    fn abi<'a>(
        &self,
        mut opts: impl Iterator<Item = &'a RuleOpts>,
    ) -> Result<AbiVersion, TransportError> {
        match self.cfg.abi {
            AbiChoice::V2 => Ok(AbiVersion::V2),
            AbiChoice::Auto => match opts.any(RuleOpts::needs_v2) {
                true => Ok(AbiVersion::V2),
                false => Ok(AbiVersion::V1),
            },
            AbiChoice::V1 => match opts.any(RuleOpts::needs_v2) {
                true => Err(TransportError::Malformed(
                    "rule needs the v2 ABI but v1 is forced".to_string(),
                )),
                false => Ok(AbiVersion::V1),
            },
        }
    }

    fn check_len(
        &self,
        what: &str,
        sent: usize,
        got: &[ItemStatus],
    ) -> Result<(), TransportError> {
        if sent == got.len() {
            return Ok(());
        }

        Err(TransportError::Malformed(format!(
            "{what}: sent {sent} items, got {} statuses",
            got.len()
        )))
    }

    fn log_failures(&self, what: &str, base: usize, st: &[ItemStatus]) {
        for (i, s) in st.iter().enumerate().filter(|(_, s)| !s.is_ok()) {
            warn!(self.log, "batch item failed";
                "op" => what, "index" => base + i, "status" => s.status);
        }
    }

    /// Run `call` over `items` in chunks, threading an after-anchor
    /// from each chunk into the next.
    fn split<I, F>(
        &self,
        what: &str,
        items: &[I],
        mut after: Option<RuleHdl>,
        mut call: F,
    ) -> Result<Vec<ItemStatus>, BatchError>
    where
        F: FnMut(
            &[I],
            Option<RuleHdl>,
        ) -> Result<Vec<ItemStatus>, TransportError>,
    {
        let limit = self.batch_limit();
        let mut done = Vec::with_capacity(items.len());

        if items.len() > limit {
            debug!(self.log, "splitting batch";
                "op" => what, "items" => items.len(), "limit" => limit);
        }

        for chunk in items.chunks(limit) {
            let st = match call(chunk, after) {
                Ok(st) => st,
                Err(e) => return Err(BatchError::at(done, e)),
            };

            if let Err(e) = self.check_len(what, chunk.len(), &st) {
                return Err(BatchError::at(done, e));
            }

            self.log_failures(what, done.len(), &st);

            if after.is_some() {
                if let Some(last) = st.iter().rev().find(|s| s.is_ok()) {
                    after = Some(RuleHdl(last.hdl));
                }
            }

            done.extend(st);
        }

        Ok(done)
    }

    pub fn add_flt(
        &self,
        ip: IpType,
        scope: FltScope,
        after: Option<RuleHdl>,
        items: &[AddItem<FltRule>],
    ) -> Result<Vec<ItemStatus>, BatchError> {
        self.split("add_flt", items, after, |chunk, after| {
            let abi = self.abi(chunk.iter().map(|i| &i.rule.opts))?;
            self.xport.add_flt_rules(&FltAddReq {
                ip,
                scope,
                abi,
                commit: self.cfg.commit,
                after,
                items: chunk,
            })
        })
    }

    pub fn add_rt(
        &self,
        ip: IpType,
        tbl_name: &str,
        after: Option<RuleHdl>,
        items: &[AddItem<RtRule>],
    ) -> Result<Vec<ItemStatus>, BatchError> {
        self.split("add_rt", items, after, |chunk, after| {
            let abi = self.abi(chunk.iter().map(|i| &i.rule.opts))?;
            self.xport.add_rt_rules(&RtAddReq {
                ip,
                tbl_name,
                abi,
                commit: self.cfg.commit,
                after,
                items: chunk,
            })
        })
    }

    pub fn mdfy_flt(
        &self,
        ip: IpType,
        items: &[(RuleHdl, FltRule)],
    ) -> Result<Vec<ItemStatus>, BatchError> {
        self.split("mdfy_flt", items, None, |chunk, _| {
            let abi = self.abi(chunk.iter().map(|(_, r)| &r.opts))?;
            self.xport.mdfy_flt_rules(&MdfyReq {
                ip,
                abi,
                commit: self.cfg.commit,
                items: chunk,
            })
        })
    }

    pub fn mdfy_rt(
        &self,
        ip: IpType,
        items: &[(RuleHdl, RtRule)],
    ) -> Result<Vec<ItemStatus>, BatchError> {
        self.split("mdfy_rt", items, None, |chunk, _| {
            let abi = self.abi(chunk.iter().map(|(_, r)| &r.opts))?;
            self.xport.mdfy_rt_rules(&MdfyReq {
                ip,
                abi,
                commit: self.cfg.commit,
                items: chunk,
            })
        })
    }

    pub fn del(
        &self,
        kind: RuleKind,
        ip: IpType,
        hdls: &[RuleHdl],
    ) -> Result<Vec<ItemStatus>, BatchError> {
        self.split("del", hdls, None, |chunk, _| {
            self.xport.del_rules(kind, ip, chunk, self.cfg.commit)
        })
    }

    pub fn commit(
        &self,
        kind: RuleKind,
        ip: IpType,
    ) -> Result<(), TransportError> {
        debug!(self.log, "hw commit"; "kind" => %kind, "ip" => %ip);
        self.xport.commit(kind, ip)
    }

    pub fn reset(
        &self,
        kind: RuleKind,
        ip: IpType,
    ) -> Result<(), TransportError> {
        debug!(self.log, "reset"; "kind" => %kind, "ip" => %ip);
        self.xport.reset(kind, ip)
    }

    pub fn generate_eq(
        &self,
        ip: IpType,
        attrib: &RuleAttrib,
    ) -> Result<EquationSet, TransportError> {
        self.xport.generate_eq(ip, attrib)
    }

    pub fn get_rt_tbl(
        &self,
        ip: IpType,
        name: &str,
    ) -> Result<u32, TransportError> {
        self.xport.get_rt_tbl(ip, name)
    }

    pub fn put_rt_tbl(&self, hdl: u32) -> Result<(), TransportError> {
        self.xport.put_rt_tbl(hdl)
    }

    pub fn query_rt_tbl_index(
        &self,
        ip: IpType,
        name: &str,
    ) -> Result<u32, TransportError> {
        self.xport.query_rt_tbl_index(ip, name)
    }

    pub fn get_hw_version(&self) -> Result<HwType, TransportError> {
        self.xport.get_hw_version()
    }

    pub fn alloc_counters(
        &self,
        req: &CounterAllocReq,
    ) -> Result<CounterAlloc, TransportError> {
        self.xport.alloc_counters(req)
    }

    pub fn dealloc_counters(
        &self,
        hdl: CounterHdl,
    ) -> Result<(), TransportError> {
        self.xport.dealloc_counters(hdl)
    }

    pub fn query_counters(
        &self,
        range: CounterRange,
        reset: bool,
    ) -> Result<Vec<FltRtStats>, TransportError> {
        self.xport.query_counters(range, reset)
    }
}
