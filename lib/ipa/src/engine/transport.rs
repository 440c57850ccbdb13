// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The boundary between the rule engine and the IPA driver.

use crate::api::Client;
use crate::api::CounterAlloc;
use crate::api::CounterAllocReq;
use crate::api::CounterHdl;
use crate::api::CounterRange;
use crate::api::EquationSet;
use crate::api::FltRtStats;
use crate::api::FltRule;
use crate::api::HwType;
use crate::api::IpType;
use crate::api::IpaCmd;
use crate::api::RtRule;
use crate::api::RuleAttrib;
use crate::api::RuleHdl;
use crate::api::RuleKind;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// The largest batch the v1 ABI can describe: its count is a `u8`.
pub const DEFAULT_BATCH_LIMIT: usize = u8::MAX as usize;

#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum TransportError {
    #[error("IPA driver not attached")]
    DriverNotAttached,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("{cmd:?} failed: errno {errno}")]
    Ioctl { cmd: IpaCmd, errno: i32 },

    #[error("malformed request or response: {0}")]
    Malformed(String),
}

/// Which layout of the rule structures to put on the wire.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AbiVersion {
    /// Rules follow the request header as a trailing array.
    V1,
    /// The request carries a count, an element size, and a pointer.
    V2,
}

/// The result the driver reported for one item of a batch.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct ItemStatus {
    pub hdl: u32,
    pub status: i32,
}

impl ItemStatus {
    pub fn is_ok(&self) -> bool {
        self.status == 0
    }

    pub fn ok(hdl: u32) -> Self {
        Self { hdl, status: 0 }
    }

    pub fn failed() -> Self {
        Self { hdl: 0, status: -1 }
    }
}

/// One rule of an add batch.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AddItem<R> {
    /// Append to the table rather than insert at its head. Ignored by
    /// an `after` batch.
    pub at_rear: bool,
    pub rule: R,
}

/// Where a filter rule lives.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FltScope {
    Global,
    Ep(Client),
}

/// A batch of new filter rules.
///
/// Head inserts happen one rule at a time, so a batch of them ends up
/// reversed. With `after` set the batch chains: every rule that
/// succeeds becomes the anchor for the next one.
pub struct FltAddReq<'a> {
    pub ip: IpType,
    pub scope: FltScope,
    pub abi: AbiVersion,
    pub commit: bool,
    pub after: Option<RuleHdl>,
    pub items: &'a [AddItem<FltRule>],
}

/// A batch of new routing rules for the table `tbl_name`.
pub struct RtAddReq<'a> {
    pub ip: IpType,
    pub tbl_name: &'a str,
    pub abi: AbiVersion,
    pub commit: bool,
    pub after: Option<RuleHdl>,
    pub items: &'a [AddItem<RtRule>],
}

pub struct MdfyReq<'a, R> {
    pub ip: IpType,
    pub abi: AbiVersion,
    pub commit: bool,
    pub items: &'a [(RuleHdl, R)],
}

/// Issue rule and counter requests to the IPA driver.
///
/// Batch operations return one [`ItemStatus`] per item, in order. An
/// `Err` means nothing in the call was applied.
pub trait Transport {
    /// The largest number of items one batch call may carry.
    fn batch_limit(&self) -> usize {
        DEFAULT_BATCH_LIMIT
    }

    fn add_flt_rules(
        &self,
        req: &FltAddReq,
    ) -> Result<Vec<ItemStatus>, TransportError>;

    fn add_rt_rules(
        &self,
        req: &RtAddReq,
    ) -> Result<Vec<ItemStatus>, TransportError>;

    fn mdfy_flt_rules(
        &self,
        req: &MdfyReq<FltRule>,
    ) -> Result<Vec<ItemStatus>, TransportError>;

    fn mdfy_rt_rules(
        &self,
        req: &MdfyReq<RtRule>,
    ) -> Result<Vec<ItemStatus>, TransportError>;

    fn del_rules(
        &self,
        kind: RuleKind,
        ip: IpType,
        hdls: &[RuleHdl],
        commit: bool,
    ) -> Result<Vec<ItemStatus>, TransportError>;

    /// Push the software tables of `kind` to the hardware.
    fn commit(&self, kind: RuleKind, ip: IpType) -> Result<(), TransportError>;

    /// Remove every rule of `kind`, including those this session did
    /// not add.
    fn reset(&self, kind: RuleKind, ip: IpType) -> Result<(), TransportError>;

    /// Ask the driver to lower an attribute to equation form.
    fn generate_eq(
        &self,
        ip: IpType,
        attrib: &RuleAttrib,
    ) -> Result<EquationSet, TransportError>;

    /// Take a reference on an existing routing table and return its
    /// handle. Every successful call must be paired with `put_rt_tbl`.
    fn get_rt_tbl(&self, ip: IpType, name: &str) -> Result<u32, TransportError>;

    fn put_rt_tbl(&self, hdl: u32) -> Result<(), TransportError>;

    fn query_rt_tbl_index(
        &self,
        ip: IpType,
        name: &str,
    ) -> Result<u32, TransportError>;

    fn get_hw_version(&self) -> Result<HwType, TransportError>;

    fn alloc_counters(
        &self,
        req: &CounterAllocReq,
    ) -> Result<CounterAlloc, TransportError>;

    fn dealloc_counters(&self, hdl: CounterHdl) -> Result<(), TransportError>;

    fn query_counters(
        &self,
        range: CounterRange,
        reset: bool,
    ) -> Result<Vec<FltRtStats>, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn batch_limit(&self) -> usize {
        (**self).batch_limit()
    }

    fn add_flt_rules(
        &self,
        req: &FltAddReq,
    ) -> Result<Vec<ItemStatus>, TransportError> {
        (**self).add_flt_rules(req)
    }

    fn add_rt_rules(
        &self,
        req: &RtAddReq,
    ) -> Result<Vec<ItemStatus>, TransportError> {
        (**self).add_rt_rules(req)
    }

    fn mdfy_flt_rules(
        &self,
        req: &MdfyReq<FltRule>,
    ) -> Result<Vec<ItemStatus>, TransportError> {
        (**self).mdfy_flt_rules(req)
    }

    fn mdfy_rt_rules(
        &self,
        req: &MdfyReq<RtRule>,
    ) -> Result<Vec<ItemStatus>, TransportError> {
        (**self).mdfy_rt_rules(req)
    }

    fn del_rules(
        &self,
        kind: RuleKind,
        ip: IpType,
        hdls: &[RuleHdl],
        commit: bool,
    ) -> Result<Vec<ItemStatus>, TransportError> {
        (**self).del_rules(kind, ip, hdls, commit)
    }

    fn commit(&self, kind: RuleKind, ip: IpType) -> Result<(), TransportError> {
        (**self).commit(kind, ip)
    }

    fn reset(&self, kind: RuleKind, ip: IpType) -> Result<(), TransportError> {
        (**self).reset(kind, ip)
    }

    fn generate_eq(
        &self,
        ip: IpType,
        attrib: &RuleAttrib,
    ) -> Result<EquationSet, TransportError> {
        (**self).generate_eq(ip, attrib)
    }

    fn get_rt_tbl(
        &self,
        ip: IpType,
        name: &str,
    ) -> Result<u32, TransportError> {
        (**self).get_rt_tbl(ip, name)
    }

    fn put_rt_tbl(&self, hdl: u32) -> Result<(), TransportError> {
        (**self).put_rt_tbl(hdl)
    }

    fn query_rt_tbl_index(
        &self,
        ip: IpType,
        name: &str,
    ) -> Result<u32, TransportError> {
        (**self).query_rt_tbl_index(ip, name)
    }

    fn get_hw_version(&self) -> Result<HwType, TransportError> {
        (**self).get_hw_version()
    }

    fn alloc_counters(
        &self,
        req: &CounterAllocReq,
    ) -> Result<CounterAlloc, TransportError> {
        (**self).alloc_counters(req)
    }

    fn dealloc_counters(&self, hdl: CounterHdl) -> Result<(), TransportError> {
        (**self).dealloc_counters(hdl)
    }

    fn query_counters(
        &self,
        range: CounterRange,
        reset: bool,
    ) -> Result<Vec<FltRtStats>, TransportError> {
        (**self).query_counters(range, reset)
    }
}
