// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! A [`Transport`] that talks to the IPA driver through its control
//! node.

pub mod sys;

use ipa::api::CounterAlloc;
use ipa::api::CounterAllocReq;
use ipa::api::CounterHdl;
use ipa::api::CounterRange;
use ipa::api::CounterReq;
use ipa::api::EquationSet;
use ipa::api::FltRtStats;
use ipa::api::FltRule;
use ipa::api::HwType;
use ipa::api::IPA_DEV;
use ipa::api::IpType;
use ipa::api::IpaCmd;
use ipa::api::RtRule;
use ipa::api::RuleAttrib;
use ipa::api::RuleHdl;
use ipa::api::RuleKind;
use ipa::api::resource_name;
use ipa::engine::transport::AbiVersion;
use ipa::engine::transport::AddItem;
use ipa::engine::transport::FltAddReq;
use ipa::engine::transport::FltScope;
use ipa::engine::transport::ItemStatus;
use ipa::engine::transport::MdfyReq;
use ipa::engine::transport::RtAddReq;
use ipa::engine::transport::Transport;
use ipa::engine::transport::TransportError;
use std::fs::File;
use std::fs::OpenOptions;
use std::os::unix::io::AsRawFd;
use sys::RuleRecord;
use sys::Trailing;
use sys::TrailingBuf;
use thiserror::Error;

/// Errors related to administering the IPA driver.
#[derive(Debug, Error)]
pub enum Error {
    #[error("IPA driver is not attached")]
    DriverNotAttached,

    #[error("error interacting with device: {0}")]
    Io(std::io::Error),

    /// The driver's ioctl(2) handler returned an error.
    #[error("ioctl {:?} failed: {}", .0, errno_msg(.1))]
    IoctlFailed(IpaCmd, i32),

    #[error("invalid argument {0}")]
    InvalidArgument(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => Error::DriverNotAttached,
            _ => Error::Io(e),
        }
    }
}

impl From<Error> for TransportError {
    fn from(e: Error) -> Self {
        match e {
            Error::DriverNotAttached => TransportError::DriverNotAttached,
            Error::Io(e) => TransportError::Io(e.to_string()),
            Error::IoctlFailed(cmd, errno) => {
                TransportError::Ioctl { cmd, errno }
            }
            Error::InvalidArgument(msg) => TransportError::Malformed(msg),
        }
    }
}

fn errno_msg(errno: &i32) -> String {
    match *errno {
        libc::EPERM => "permission denied".to_string(),
        libc::EFAULT => "failed to copy request or response".to_string(),
        libc::EINVAL => "invalid request".to_string(),
        libc::ENOMEM => "driver out of memory".to_string(),
        libc::ENOSPC => "no space left in table or pool".to_string(),
        libc::ENOTTY => "command not supported by this driver".to_string(),
        errno => format!("unexpected errno: {errno}"),
    }
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::InvalidArgument(msg.into())
}

fn num_rules(n: usize) -> Result<u8, Error> {
    u8::try_from(n).map_err(|_| invalid(format!("{n} rules in one batch")))
}

fn tbl_name(name: &str) -> Result<[u8; ipa::api::RESOURCE_NAME_MAX], Error> {
    resource_name(name).ok_or_else(|| invalid(format!("table name {name:?}")))
}

fn statuses<R: RuleRecord>(recs: &[R]) -> Vec<ItemStatus> {
    recs.iter()
        .map(|r| ItemStatus { hdl: r.hdl(), status: r.status() })
        .collect()
}

/// Rules that carry v2-only options cannot go out in a v1 batch.
fn check_v1<R>(
    abi: AbiVersion,
    items: impl IntoIterator<Item = R>,
    needs_v2: impl Fn(R) -> bool,
) -> Result<(), Error> {
    if abi == AbiVersion::V1 && items.into_iter().any(needs_v2) {
        return Err(invalid("rule options need the v2 ABI"));
    }
    Ok(())
}

/// The handle used to send rule and counter commands to the IPA
/// driver.
#[derive(Debug)]
pub struct IpaHdl {
    device: File,
}

impl IpaHdl {
    /// Open the default IPA control node.
    pub fn open() -> Result<Self, Error> {
        Self::open_on(IPA_DEV)
    }

    /// Open the IPA control node at `what`.
    pub fn open_on(what: &str) -> Result<Self, Error> {
        let device = OpenOptions::new().read(true).write(true).open(what)?;
        Ok(IpaHdl { device })
    }

    /// Issue `cmd` with a raw argument, for commands this crate does
    /// not model.
    ///
    /// # Safety
    ///
    /// `arg` must be what the driver expects for `cmd`: a pointer to
    /// a structure of the right layout which lives for the call, or a
    /// value cast to a pointer for by-value commands.
    pub unsafe fn raw_ioctl<T>(
        &self,
        cmd: IpaCmd,
        arg: *mut T,
    ) -> Result<libc::c_int, Error> {
        let req = cmd.request_sized(size_of::<T>());
        // SAFETY: Upheld by the caller.
        let ret = unsafe { ioctl(self.device.as_raw_fd(), req, arg) };
        check(cmd, ret)
    }

    fn struct_ioctl<T>(&self, cmd: IpaCmd, arg: &mut T) -> Result<(), Error> {
        // SAFETY: Every caller passes the structure `cmd` is declared
        // with, and `arg` outlives the call.
        unsafe { self.raw_ioctl(cmd, arg as *mut T) }.map(|_| ())
    }

    /// The v1 forms pass a header with the records trailing it.
    fn trailing_ioctl<H: Trailing>(
        &self,
        cmd: IpaCmd,
        hdr: H,
        recs: &[H::Rec],
    ) -> Result<Vec<ItemStatus>, Error> {
        let mut buf = TrailingBuf::new(hdr, recs);
        let req = cmd.request_sized(size_of::<H>());
        // SAFETY: `buf` holds the header and `recs.len()` records, which
        // is what the header's count tells the driver to read.
        let ret =
            unsafe { ioctl(self.device.as_raw_fd(), req, buf.as_mut_ptr()) };
        check(cmd, ret)?;
        Ok(statuses(&buf.records()))
    }

    /// The v2 forms pass a header holding a pointer to the records.
    /// `fill` sets that pointer and the record size.
    fn pointer_ioctl<H, R: RuleRecord>(
        &self,
        cmd: IpaCmd,
        mut hdr: H,
        mut recs: Vec<R>,
        fill: impl FnOnce(&mut H, u32, u64),
    ) -> Result<Vec<ItemStatus>, Error> {
        fill(&mut hdr, size_of::<R>() as u32, recs.as_mut_ptr() as u64);
        self.struct_ioctl(cmd, &mut hdr)?;
        Ok(statuses(&recs))
    }

    /// Issue a command whose argument is its value.
    fn value_ioctl(&self, cmd: IpaCmd, val: u32) -> Result<(), Error> {
        let arg = val as usize as *mut libc::c_void;
        // SAFETY: By-value commands never dereference the argument.
        unsafe { self.raw_ioctl(cmd, arg) }.map(|_| ())
    }

    fn add_flt(&self, req: &FltAddReq) -> Result<Vec<ItemStatus>, Error> {
        check_v1(req.abi, req.items, |i| i.rule.opts.needs_v2())?;
        let n = num_rules(req.items.len())?;
        let commit = req.commit as u8;
        let ip = req.ip.to_raw();
        let (ep, global) = match req.scope {
            FltScope::Global => (0, 1),
            FltScope::Ep(c) => (c.to_raw(), 0),
        };

        match (req.abi, req.after) {
            (_, Some(_)) if global == 1 => {
                Err(invalid("after-inserts need an endpoint table"))
            }

            (AbiVersion::V1, None) => {
                let hdr = sys::ipa_ioc_add_flt_rule {
                    commit,
                    ip,
                    ep,
                    global,
                    num_rules: n,
                    rules: [],
                };
                let recs: Vec<_> = req.items.iter().map(flt_add).collect();
                self.trailing_ioctl(IpaCmd::AddFltRule, hdr, &recs)
            }

            (AbiVersion::V1, Some(after)) => {
                let hdr = sys::ipa_ioc_add_flt_rule_after {
                    commit,
                    ip,
                    ep,
                    num_rules: n,
                    add_after_hdl: after.0,
                    rules: [],
                };
                let recs: Vec<_> = req.items.iter().map(flt_add).collect();
                self.trailing_ioctl(IpaCmd::AddFltRuleAfter, hdr, &recs)
            }

            (AbiVersion::V2, None) => {
                let hdr = sys::ipa_ioc_add_flt_rule_v2 {
                    commit,
                    ip,
                    ep,
                    global,
                    num_rules: n,
                    ..Default::default()
                };
                let recs = req.items.iter().map(flt_add_v2).collect();
                let cmd = IpaCmd::AddFltRuleV2;
                self.pointer_ioctl(cmd, hdr, recs, |h, sz, p| {
                    h.flt_rule_size = sz;
                    h.rules = p;
                })
            }

            (AbiVersion::V2, Some(after)) => {
                let hdr = sys::ipa_ioc_add_flt_rule_after_v2 {
                    commit,
                    ip,
                    ep,
                    num_rules: n,
                    add_after_hdl: after.0,
                    ..Default::default()
                };
                let recs = req.items.iter().map(flt_add_v2).collect();
                let cmd = IpaCmd::AddFltRuleAfterV2;
                self.pointer_ioctl(cmd, hdr, recs, |h, sz, p| {
                    h.flt_rule_size = sz;
                    h.rules = p;
                })
            }
        }
    }

    fn add_rt(&self, req: &RtAddReq) -> Result<Vec<ItemStatus>, Error> {
        check_v1(req.abi, req.items, |i| i.rule.opts.needs_v2())?;
        let n = num_rules(req.items.len())?;
        let commit = req.commit as u8;
        let ip = req.ip.to_raw();
        let rt_tbl_name = tbl_name(req.tbl_name)?;

        match (req.abi, req.after) {
            (AbiVersion::V1, None) => {
                let hdr = sys::ipa_ioc_add_rt_rule_ext {
                    commit,
                    ip,
                    rt_tbl_name,
                    num_rules: n,
                    rules: [],
                };
                let recs: Vec<_> = req.items.iter().map(rt_add_ext).collect();
                self.trailing_ioctl(IpaCmd::AddRtRuleExt, hdr, &recs)
            }

            // The after form has no rule id; the driver picks one.
            (AbiVersion::V1, Some(after)) => {
                let hdr = sys::ipa_ioc_add_rt_rule_after {
                    commit,
                    ip,
                    rt_tbl_name,
                    num_rules: n,
                    add_after_hdl: after.0,
                    rules: [],
                };
                let recs: Vec<_> = req
                    .items
                    .iter()
                    .map(|i| sys::ipa_rt_rule_add {
                        rule: (&i.rule).into(),
                        at_rear: i.at_rear as u8,
                        rt_rule_hdl: 0,
                        status: -1,
                    })
                    .collect();
                self.trailing_ioctl(IpaCmd::AddRtRuleAfter, hdr, &recs)
            }

            (AbiVersion::V2, None) => {
                let hdr = sys::ipa_ioc_add_rt_rule_ext_v2 {
                    commit,
                    ip,
                    rt_tbl_name,
                    num_rules: n,
                    ..Default::default()
                };
                let recs = req
                    .items
                    .iter()
                    .map(|i| sys::ipa_rt_rule_add_ext_v2 {
                        at_rear: i.at_rear as u8,
                        rt_rule_hdl: 0,
                        status: -1,
                        rule_id: i.rule.opts.rule_id,
                        rule: (&i.rule).into(),
                    })
                    .collect();
                let cmd = IpaCmd::AddRtRuleExtV2;
                self.pointer_ioctl(cmd, hdr, recs, |h, sz, p| {
                    h.rule_add_ext_size = sz;
                    h.rules = p;
                })
            }

            (AbiVersion::V2, Some(after)) => {
                let hdr = sys::ipa_ioc_add_rt_rule_after_v2 {
                    commit,
                    ip,
                    rt_tbl_name,
                    num_rules: n,
                    add_after_hdl: after.0,
                    ..Default::default()
                };
                let recs = req
                    .items
                    .iter()
                    .map(|i| sys::ipa_rt_rule_add_v2 {
                        at_rear: i.at_rear as u8,
                        rt_rule_hdl: 0,
                        status: -1,
                        rule: (&i.rule).into(),
                    })
                    .collect();
                let cmd = IpaCmd::AddRtRuleAfterV2;
                self.pointer_ioctl(cmd, hdr, recs, |h, sz, p| {
                    h.rule_add_size = sz;
                    h.rules = p;
                })
            }
        }
    }

    fn mdfy_flt(
        &self,
        req: &MdfyReq<FltRule>,
    ) -> Result<Vec<ItemStatus>, Error> {
        check_v1(req.abi, req.items, |(_, r)| r.opts.needs_v2())?;
        let n = num_rules(req.items.len())?;
        let commit = req.commit as u8;
        let ip = req.ip.to_raw();

        match req.abi {
            AbiVersion::V1 => {
                let hdr = sys::ipa_ioc_mdfy_flt_rule {
                    commit,
                    ip,
                    num_rules: n,
                    rules: [],
                };
                let recs: Vec<_> = req
                    .items
                    .iter()
                    .map(|(hdl, r)| sys::ipa_flt_rule_mdfy {
                        rule: r.into(),
                        rule_hdl: hdl.0,
                        status: -1,
                    })
                    .collect();
                self.trailing_ioctl(IpaCmd::MdfyFltRule, hdr, &recs)
            }

            AbiVersion::V2 => {
                let hdr = sys::ipa_ioc_mdfy_rule_v2 {
                    commit,
                    ip,
                    num_rules: n,
                    ..Default::default()
                };
                let recs = req
                    .items
                    .iter()
                    .map(|(hdl, r)| sys::ipa_flt_rule_mdfy_v2 {
                        rule_hdl: hdl.0,
                        status: -1,
                        rule: r.into(),
                    })
                    .collect();
                let cmd = IpaCmd::MdfyFltRuleV2;
                self.pointer_ioctl(cmd, hdr, recs, mdfy_fill)
            }
        }
    }

    fn mdfy_rt(&self, req: &MdfyReq<RtRule>) -> Result<Vec<ItemStatus>, Error> {
        check_v1(req.abi, req.items, |(_, r)| r.opts.needs_v2())?;
        let n = num_rules(req.items.len())?;
        let commit = req.commit as u8;
        let ip = req.ip.to_raw();

        match req.abi {
            AbiVersion::V1 => {
                let hdr = sys::ipa_ioc_mdfy_rt_rule {
                    commit,
                    ip,
                    num_rules: n,
                    rules: [],
                };
                let recs: Vec<_> = req
                    .items
                    .iter()
                    .map(|(hdl, r)| sys::ipa_rt_rule_mdfy {
                        rule: r.into(),
                        rt_rule_hdl: hdl.0,
                        status: -1,
                    })
                    .collect();
                self.trailing_ioctl(IpaCmd::MdfyRtRule, hdr, &recs)
            }

            AbiVersion::V2 => {
                let hdr = sys::ipa_ioc_mdfy_rule_v2 {
                    commit,
                    ip,
                    num_rules: n,
                    ..Default::default()
                };
                let recs = req
                    .items
                    .iter()
                    .map(|(hdl, r)| sys::ipa_rt_rule_mdfy_v2 {
                        rt_rule_hdl: hdl.0,
                        status: -1,
                        rule: r.into(),
                    })
                    .collect();
                let cmd = IpaCmd::MdfyRtRuleV2;
                self.pointer_ioctl(cmd, hdr, recs, mdfy_fill)
            }
        }
    }

    fn del(
        &self,
        kind: RuleKind,
        ip: IpType,
        hdls: &[RuleHdl],
        commit: bool,
    ) -> Result<Vec<ItemStatus>, Error> {
        let cmd = match kind {
            RuleKind::Filter => IpaCmd::DelFltRule,
            RuleKind::Routing => IpaCmd::DelRtRule,
        };
        let hdr = sys::ipa_ioc_del_rule {
            commit: commit as u8,
            ip: ip.to_raw(),
            num_hdls: num_rules(hdls.len())?,
            hdl: [],
        };
        let recs: Vec<_> = hdls
            .iter()
            .map(|h| sys::ipa_rule_del { hdl: h.0, status: -1 })
            .collect();
        self.trailing_ioctl(cmd, hdr, &recs)
    }

    fn counter_alloc(
        &self,
        req: &CounterAllocReq,
    ) -> Result<CounterAlloc, Error> {
        fn part(r: &CounterReq) -> sys::ipa_flt_rt_counter_alloc {
            sys::ipa_flt_rt_counter_alloc {
                num_counters: r.num,
                allow_less: r.allow_less as u8,
                ..Default::default()
            }
        }

        fn range(r: &sys::ipa_flt_rt_counter_alloc) -> Option<CounterRange> {
            (r.num_counters > 0)
                .then_some(CounterRange { start: r.start_id, end: r.end_id })
        }

        let mut arg = sys::ipa_ioc_flt_rt_counter_alloc {
            hdl: 0,
            hw_counter: part(&req.hw),
            sw_counter: part(&req.sw),
        };
        self.struct_ioctl(IpaCmd::FnrCounterAlloc, &mut arg)?;

        Ok(CounterAlloc {
            hdl: CounterHdl(arg.hdl),
            hw: range(&arg.hw_counter),
            sw: range(&arg.sw_counter),
        })
    }

    fn counter_query(
        &self,
        range: CounterRange,
        reset: bool,
    ) -> Result<Vec<FltRtStats>, Error> {
        let mut stats = vec![sys::ipa_flt_rt_stats::default(); range.len()];
        let mut arg = sys::ipa_ioc_flt_rt_query {
            start_id: range.start,
            end_id: range.end,
            reset: reset as u8,
            stats_size: size_of::<sys::ipa_flt_rt_stats>() as u32,
            reserved: 0,
            stats: stats.as_mut_ptr() as u64,
        };
        self.struct_ioctl(IpaCmd::FnrCounterQuery, &mut arg)?;

        Ok(stats
            .iter()
            .map(|s| FltRtStats {
                num_pkts: s.num_pkts,
                num_pkts_hash: s.num_pkts_hash,
                num_bytes: s.num_bytes,
            })
            .collect())
    }
}

fn flt_add(i: &AddItem<FltRule>) -> sys::ipa_flt_rule_add {
    sys::ipa_flt_rule_add {
        rule: (&i.rule).into(),
        at_rear: i.at_rear as u8,
        flt_rule_hdl: 0,
        status: -1,
    }
}

fn flt_add_v2(i: &AddItem<FltRule>) -> sys::ipa_flt_rule_add_v2 {
    sys::ipa_flt_rule_add_v2 {
        at_rear: i.at_rear as u8,
        flt_rule_hdl: 0,
        status: -1,
        rule: (&i.rule).into(),
    }
}

fn rt_add_ext(i: &AddItem<RtRule>) -> sys::ipa_rt_rule_add_ext {
    sys::ipa_rt_rule_add_ext {
        rule: (&i.rule).into(),
        at_rear: i.at_rear as u8,
        rt_rule_hdl: 0,
        status: -1,
        rule_id: i.rule.opts.rule_id,
    }
}

fn mdfy_fill(h: &mut sys::ipa_ioc_mdfy_rule_v2, sz: u32, p: u64) {
    h.rule_mdfy_size = sz;
    h.rules = p;
}

impl Transport for IpaHdl {
    fn add_flt_rules(
        &self,
        req: &FltAddReq,
    ) -> Result<Vec<ItemStatus>, TransportError> {
        Ok(self.add_flt(req)?)
    }

    fn add_rt_rules(
        &self,
        req: &RtAddReq,
    ) -> Result<Vec<ItemStatus>, TransportError> {
        Ok(self.add_rt(req)?)
    }

    fn mdfy_flt_rules(
        &self,
        req: &MdfyReq<FltRule>,
    ) -> Result<Vec<ItemStatus>, TransportError> {
        Ok(self.mdfy_flt(req)?)
    }

    fn mdfy_rt_rules(
        &self,
        req: &MdfyReq<RtRule>,
    ) -> Result<Vec<ItemStatus>, TransportError> {
        Ok(self.mdfy_rt(req)?)
    }

    fn del_rules(
        &self,
        kind: RuleKind,
        ip: IpType,
        hdls: &[RuleHdl],
        commit: bool,
    ) -> Result<Vec<ItemStatus>, TransportError> {
        Ok(self.del(kind, ip, hdls, commit)?)
    }

    fn commit(&self, kind: RuleKind, ip: IpType) -> Result<(), TransportError> {
        let cmd = match kind {
            RuleKind::Filter => IpaCmd::CommitFlt,
            RuleKind::Routing => IpaCmd::CommitRt,
        };
        Ok(self.value_ioctl(cmd, ip.to_raw())?)
    }

    fn reset(&self, kind: RuleKind, ip: IpType) -> Result<(), TransportError> {
        let cmd = match kind {
            RuleKind::Filter => IpaCmd::ResetFlt,
            RuleKind::Routing => IpaCmd::ResetRt,
        };
        Ok(self.value_ioctl(cmd, ip.to_raw())?)
    }

    fn generate_eq(
        &self,
        ip: IpType,
        attrib: &RuleAttrib,
    ) -> Result<EquationSet, TransportError> {
        let mut arg = sys::ipa_ioc_generate_flt_eq {
            ip: ip.to_raw(),
            attrib: attrib.into(),
            ..Default::default()
        };
        self.struct_ioctl(IpaCmd::GenerateFltEq, &mut arg)?;
        arg.eq_attrib.to_eq().map_err(TransportError::Malformed)
    }

    fn get_rt_tbl(
        &self,
        ip: IpType,
        name: &str,
    ) -> Result<u32, TransportError> {
        let mut arg = sys::ipa_ioc_get_rt_tbl {
            ip: ip.to_raw(),
            name: tbl_name(name)?,
            hdl: 0,
        };
        self.struct_ioctl(IpaCmd::GetRtTbl, &mut arg)?;
        Ok(arg.hdl)
    }

    fn put_rt_tbl(&self, hdl: u32) -> Result<(), TransportError> {
        Ok(self.value_ioctl(IpaCmd::PutRtTbl, hdl)?)
    }

    fn query_rt_tbl_index(
        &self,
        ip: IpType,
        name: &str,
    ) -> Result<u32, TransportError> {
        let mut arg = sys::ipa_ioc_get_rt_tbl_indx {
            ip: ip.to_raw(),
            name: tbl_name(name)?,
            idx: 0,
        };
        self.struct_ioctl(IpaCmd::QueryRtTblIndex, &mut arg)?;
        Ok(arg.idx)
    }

    fn get_hw_version(&self) -> Result<HwType, TransportError> {
        let mut raw: u32 = 0;
        self.struct_ioctl(IpaCmd::GetHwVersion, &mut raw)?;
        HwType::from_raw(raw).ok_or_else(|| {
            TransportError::Malformed(format!("unknown hw type {raw}"))
        })
    }

    fn alloc_counters(
        &self,
        req: &CounterAllocReq,
    ) -> Result<CounterAlloc, TransportError> {
        Ok(self.counter_alloc(req)?)
    }

    fn dealloc_counters(&self, hdl: CounterHdl) -> Result<(), TransportError> {
        Ok(self.value_ioctl(IpaCmd::FnrCounterDealloc, hdl.0 as u32)?)
    }

    fn query_counters(
        &self,
        range: CounterRange,
        reset: bool,
    ) -> Result<Vec<FltRtStats>, TransportError> {
        Ok(self.counter_query(range, reset)?)
    }
}

fn check(cmd: IpaCmd, ret: libc::c_int) -> Result<libc::c_int, Error> {
    if ret == -1 {
        let err = std::io::Error::last_os_error();
        return match err.raw_os_error() {
            Some(errno) => Err(Error::IoctlFailed(cmd, errno)),
            None => Err(Error::Io(err)),
        };
    }
    Ok(ret)
}

unsafe fn ioctl<T>(fd: libc::c_int, req: u32, arg: *mut T) -> libc::c_int {
    // glibc takes the request as an unsigned long, musl and bionic as
    // an int.
    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    let req = req as libc::c_ulong;
    #[cfg(not(all(target_os = "linux", target_env = "gnu")))]
    let req = req as libc::c_int;

    unsafe { libc::ioctl(fd, req, arg) }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn missing_node_is_not_attached() {
        let err = IpaHdl::open_on("/nonexistent/ipa").unwrap_err();
        assert!(matches!(err, Error::DriverNotAttached));
        assert_eq!(
            TransportError::from(err),
            TransportError::DriverNotAttached
        );
    }

    #[test]
    fn errors_map_to_transport() {
        let e = Error::IoctlFailed(IpaCmd::AddFltRule, libc::EINVAL);
        let msg = e.to_string();
        assert!(msg.starts_with("ioctl AddFltRule failed"), "{msg}");
        assert!(msg.contains("invalid request"), "{msg}");
        assert_eq!(
            TransportError::from(e),
            TransportError::Ioctl {
                cmd: IpaCmd::AddFltRule,
                errno: libc::EINVAL
            }
        );
        assert!(num_rules(256).is_err());
        assert!(tbl_name(&"x".repeat(40)).is_err());
    }
}
