// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Common routines for integration tests.

// This type of pedantry is more trouble than it's worth here.
#![allow(dead_code)]

pub mod fake;

pub use fake::Call;
pub use fake::FakeDriver;
pub use ipa::api::*;
pub use ipa::engine::session::AbiChoice;
pub use ipa::engine::session::SessionConfig;
pub use ipa::engine::table::CommitReport;
pub use ipa::engine::table::ItemFailure;
pub use ipa::engine::table::Position;
pub use ipa::engine::table::TableError;
pub use ipa::engine::table::TableId;
pub use ipa::engine::table::TableManager;
pub use ipa::engine::table::TableSet;
pub use ipa::engine::table::Ticket;
pub use ipa::engine::transport::AbiVersion;
pub use ipa::engine::transport::FltScope;
pub use ipa::engine::transport::Transport;
pub use ipa::engine::transport::TransportError;
use slog::Logger;
use slog::o;
use std::net::Ipv4Addr;

/// A logger that drops everything.
pub fn discard_log() -> Logger {
    Logger::root(slog::Discard, o!())
}

/// A manager on top of `drv` with the default session config and the
/// capabilities of `drv`'s hardware.
pub fn manager(drv: &FakeDriver) -> TableManager<&FakeDriver> {
    manager_with(drv, SessionConfig::default())
}

pub fn manager_with(
    drv: &FakeDriver,
    cfg: SessionConfig,
) -> TableManager<&FakeDriver> {
    TableManager::new(drv, cfg, HwCaps::for_hw(drv.hw()), discard_log())
}

/// An IPv4 TCP match on destination port `port`.
pub fn tcp_dport(port: u16) -> RuleAttrib {
    let mut a = RuleAttrib::default();
    a.set_protocol(6).set_dst_port(port);
    a
}

/// An IPv4 match on the destination network `addr/prefix`.
pub fn dst4(addr: Ipv4Addr, prefix: u8) -> RuleAttrib {
    let mask = match prefix {
        0 => 0,
        p => u32::MAX << (32 - u32::from(p.min(32))),
    };
    let mut a = RuleAttrib::default();
    a.set_dst_v4(addr, Ipv4Addr::from(mask));
    a
}

pub fn flt(attrib: RuleAttrib) -> Rule {
    Rule::Flt(FltRule::new(FltAction::Routing, RtTblRef::Hdl(1), attrib))
}

pub fn flt_id(attrib: RuleAttrib, rule_id: u16) -> Rule {
    let mut r = flt(attrib);
    r.opts_mut().rule_id = rule_id;
    r
}

pub fn rt(dst: Client, attrib: RuleAttrib) -> Rule {
    Rule::Rt(RtRule::new(dst, attrib))
}

pub fn v4_global() -> TableId {
    TableId { set: TableSet::FilterGlobal, ip: IpType::V4, hashable: false }
}

pub fn v4_ep(ep: Client) -> TableId {
    TableId { set: TableSet::Filter(ep), ip: IpType::V4, hashable: false }
}
