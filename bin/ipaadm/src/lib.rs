// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! IPA driver administration library

pub mod rules;

use anyhow::Context;
use ipa::api::IpType;
use ipa::api::RuleHdl;
use ipa::api::RuleKind;
use ipa::engine::SessionConfig;
use ipa::engine::Transport;
use ipa::engine::session::BatchError;
use ipa::engine::session::Session;
use ipa_ioctl::Error;
use ipa_ioctl::IpaHdl;
use slog::Logger;
use slog::info;
use std::ops::Deref;

/// The handle used to send administration commands to the IPA
/// control node.
#[derive(Debug)]
pub struct IpaAdm(IpaHdl);

impl Deref for IpaAdm {
    type Target = IpaHdl;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl IpaAdm {
    /// Create a new handle to the IPA control node.
    pub fn open() -> Result<Self, Error> {
        IpaHdl::open().map(Self)
    }

    /// Create a new handle to the control node at `path`.
    pub fn open_on(path: &str) -> Result<Self, Error> {
        IpaHdl::open_on(path).map(Self)
    }
}

/// Delete rules by handle, in batches the driver accepts. Returns the
/// handles the driver refused to delete.
pub fn delete<T: Transport>(
    xport: T,
    kind: RuleKind,
    ip: IpType,
    hdls: &[RuleHdl],
    commit: bool,
    log: Logger,
) -> anyhow::Result<Vec<RuleHdl>> {
    let cfg = SessionConfig { commit, ..Default::default() };
    let session = Session::new(xport, cfg, log.clone());

    let (st, err) = match session.del(kind, ip, hdls) {
        Ok(st) => (st, None),
        Err(BatchError { done, err }) => (done, Some(err)),
    };
    let refused: Vec<RuleHdl> = hdls
        .iter()
        .zip(&st)
        .filter(|(_, s)| !s.is_ok())
        .map(|(h, _)| *h)
        .collect();

    if let Some(err) = err {
        return Err(err).with_context(|| {
            format!(
                "deleted {} of {} rule(s) before the driver failed",
                st.len() - refused.len(),
                hdls.len()
            )
        });
    }

    info!(log, "rules deleted";
        "kind" => ?kind, "ip" => %ip, "n" => hdls.len() - refused.len());
    Ok(refused)
}

#[cfg(test)]
mod test {
    use super::*;
    use ipa::api::IpaCmd;
    use ipa_test_utils::FakeDriver;
    use ipa_test_utils::Position;
    use ipa_test_utils::TableSet;
    use ipa_test_utils::TransportError;
    use ipa_test_utils::discard_log;
    use ipa_test_utils::flt;
    use ipa_test_utils::manager;
    use ipa_test_utils::tcp_dport;

    fn install(drv: &FakeDriver, n: u16) -> Vec<RuleHdl> {
        let mut mgr = manager(drv);
        for port in 0..n {
            let rule = flt(tcp_dport(port));
            let set = TableSet::FilterGlobal;
            mgr.stage_add(set, IpType::V4, rule, Position::Rear).unwrap();
        }
        let report = mgr.commit().unwrap();
        report.bound.into_iter().map(|(_, h)| h).collect()
    }

    fn del_sizes(drv: &FakeDriver) -> Vec<usize> {
        drv.calls()
            .into_iter()
            .filter(|c| c.cmd == IpaCmd::DelFltRule)
            .map(|c| c.items)
            .collect()
    }

    #[test]
    fn delete_splits_batches() {
        let drv = FakeDriver::default().with_batch_limit(2);
        let mut hdls = install(&drv, 4);
        hdls.push(RuleHdl(999));

        let refused = delete(
            &drv,
            RuleKind::Filter,
            IpType::V4,
            &hdls,
            false,
            discard_log(),
        )
        .unwrap();
        assert_eq!(refused, vec![RuleHdl(999)]);
        assert_eq!(del_sizes(&drv), vec![2, 2, 1]);
        assert_eq!(drv.rule_count(), 0);
    }

    #[test]
    fn delete_reports_partial_progress() {
        let drv = FakeDriver::default().with_batch_limit(2);
        let hdls = install(&drv, 4);
        let err = TransportError::Ioctl {
            cmd: IpaCmd::DelFltRule,
            errno: libc::EINVAL,
        };
        drv.fail_call(1, err);

        let err = delete(
            &drv,
            RuleKind::Filter,
            IpType::V4,
            &hdls,
            false,
            discard_log(),
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("deleted 2 of 4"));
        assert_eq!(drv.rule_count(), 2);
    }
}
