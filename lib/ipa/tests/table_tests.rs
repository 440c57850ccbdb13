// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use ipa::engine::table::SharedManager;
use ipa::engine::transport::FltAddReq;
use ipa_test_utils as common;

use common::*;

fn hdls(report: &CommitReport) -> Vec<RuleHdl> {
    report.bound.iter().map(|(_, h)| *h).collect()
}

#[test]
fn front_then_after_keeps_order() {
    let drv = FakeDriver::default();
    let mut mgr = manager(&drv);
    let g = v4_ep(Client::UsbProd);

    let t1 = mgr
        .stage_add(
            g.set.clone(),
            IpType::V4,
            flt(tcp_dport(80)),
            Position::Front,
        )
        .unwrap();
    let t2 = mgr
        .stage_add(
            g.set.clone(),
            IpType::V4,
            flt(tcp_dport(443)),
            Position::AfterTicket(t1),
        )
        .unwrap();

    let report = mgr.commit().unwrap();
    assert!(report.failed.is_empty());

    let r1 = mgr.handle_of(t1).unwrap();
    let r2 = mgr.handle_of(t2).unwrap();
    assert_eq!(mgr.sequence(&g), vec![r1, r2]);
    assert_eq!(
        drv.flt_order(IpType::V4, FltScope::Ep(Client::UsbProd), false),
        vec![r1, r2]
    );
    assert!(mgr.staged().is_empty());

    // The same holds across commits, anchoring on a bound handle.
    let t3 = mgr
        .stage_add(
            g.set.clone(),
            IpType::V4,
            flt(tcp_dport(22)),
            Position::After(r1),
        )
        .unwrap();
    mgr.commit().unwrap();
    let r3 = mgr.handle_of(t3).unwrap();
    assert_eq!(mgr.sequence(&g), vec![r1, r3, r2]);
    assert_eq!(
        drv.flt_order(IpType::V4, FltScope::Ep(Client::UsbProd), false),
        vec![r1, r3, r2]
    );
}

#[test]
fn front_inserts_land_at_head() {
    let drv = FakeDriver::default();
    let mut mgr = manager(&drv);
    let g = v4_global();

    for port in [1, 2, 3] {
        mgr.stage_add(
            g.set.clone(),
            IpType::V4,
            flt(tcp_dport(port)),
            Position::Front,
        )
        .unwrap();
    }

    let report = mgr.commit().unwrap();
    let mut want = hdls(&report);
    want.reverse();

    assert_eq!(drv.add_calls().len(), 1);
    assert_eq!(mgr.sequence(&g), want);
    assert_eq!(drv.flt_order(IpType::V4, FltScope::Global, false), want);
}

#[test]
fn rear_insert_on_default_table_fails() {
    let drv = FakeDriver::default();
    let mut mgr = manager(&drv);

    for attrib in [RuleAttrib::default(), tcp_dport(53)] {
        for ip in [IpType::V4, IpType::V6] {
            let attrib = match ip {
                IpType::V4 => attrib.clone(),
                IpType::V6 => RuleAttrib::default(),
            };
            let err = mgr
                .stage_add(
                    TableSet::default_rt(),
                    ip,
                    rt(Client::AppsLanCons, attrib),
                    Position::Rear,
                )
                .unwrap_err();
            assert_eq!(err, TableError::RearInsertOnDefaultTable);
        }
    }

    assert!(mgr.staged().is_empty());

    // Front is fine.
    mgr.stage_add(
        TableSet::default_rt(),
        IpType::V4,
        rt(Client::AppsLanCons, tcp_dport(53)),
        Position::Front,
    )
    .unwrap();
}

#[test]
fn partial_batch_keeps_good_items() {
    let drv = FakeDriver::default();
    let mut mgr = manager(&drv);
    let g = v4_global();
    drv.reject_rule_id(2);

    let tickets: Vec<Ticket> = (1..=3)
        .map(|id| {
            mgr.stage_add(
                g.set.clone(),
                IpType::V4,
                flt_id(tcp_dport(8000 + id), id),
                Position::Rear,
            )
            .unwrap()
        })
        .collect();

    let report = mgr.commit().unwrap();
    assert_eq!(drv.add_calls(), vec![(IpaCmd::AddFltRule, 3)]);

    let bound: Vec<Ticket> = report.bound.iter().map(|(t, _)| *t).collect();
    assert_eq!(bound, vec![tickets[0], tickets[2]]);
    assert_eq!(report.failed, vec![(tickets[1], ItemFailure::Status(-1))]);

    let h1 = mgr.handle_of(tickets[0]).unwrap();
    let h3 = mgr.handle_of(tickets[2]).unwrap();
    assert_eq!(mgr.handle_of(tickets[1]), None);
    assert_eq!(mgr.sequence(&g), vec![h1, h3]);
    assert_eq!(
        drv.flt_order(IpType::V4, FltScope::Global, false),
        vec![h1, h3]
    );
}

#[test]
fn failed_anchor_is_not_sent() {
    let drv = FakeDriver::default();
    let mut mgr = manager(&drv);
    let g = v4_ep(Client::UsbProd);
    drv.reject_rule_id(9);

    let t1 = mgr
        .stage_add(
            g.set.clone(),
            IpType::V4,
            flt_id(tcp_dport(1), 9),
            Position::Rear,
        )
        .unwrap();
    let t2 = mgr
        .stage_add(
            g.set.clone(),
            IpType::V4,
            flt(tcp_dport(2)),
            Position::AfterTicket(t1),
        )
        .unwrap();

    let report = mgr.commit().unwrap();
    assert!(report.bound.is_empty());
    assert_eq!(
        report.failed,
        vec![
            (t1, ItemFailure::Status(-1)),
            (t2, ItemFailure::AnchorFailed),
        ]
    );
    assert_eq!(drv.add_calls().len(), 1);
    assert_eq!(drv.rule_count(), 0);
}

#[test]
fn global_after_insert_does_not_block_commits() {
    let drv = FakeDriver::default();
    let mut mgr = manager(&drv);
    let g = v4_global();
    let usb = v4_ep(Client::UsbProd);

    let t1 = mgr
        .stage_add(
            g.set.clone(),
            IpType::V4,
            flt(tcp_dport(1)),
            Position::Rear,
        )
        .unwrap();
    mgr.commit().unwrap();
    let h1 = mgr.handle_of(t1).unwrap();

    let err = mgr
        .stage_add(
            g.set.clone(),
            IpType::V4,
            flt(tcp_dport(2)),
            Position::After(h1),
        )
        .unwrap_err();
    assert_eq!(err, TableError::AfterInsertOnGlobalTable);
    assert!(mgr.staged().is_empty());

    // Endpoint rules staged afterwards still go out.
    let t2 = mgr
        .stage_add(
            usb.set.clone(),
            IpType::V4,
            flt(tcp_dport(3)),
            Position::Rear,
        )
        .unwrap();
    let report = mgr.commit().unwrap();
    let h2 = mgr.handle_of(t2).unwrap();
    assert_eq!(hdls(&report), vec![h2]);
    assert!(mgr.staged().is_empty());
    assert_eq!(mgr.sequence(&g), vec![h1]);

    // The driver refuses the request outright.
    let err = drv
        .add_flt_rules(&FltAddReq {
            ip: IpType::V4,
            scope: FltScope::Global,
            abi: AbiVersion::V1,
            commit: false,
            after: Some(h1),
            items: &[],
        })
        .unwrap_err();
    assert!(matches!(err, TransportError::Malformed(_)));
}

#[test]
fn staging_errors_leave_state_unchanged() {
    let drv = FakeDriver::new(HwType::V2_5);
    let mut mgr = manager(&drv);
    let g = v4_global();
    let wan = TableSet::Routing("wan".to_string());

    mgr
        .stage_add(
            g.set.clone(),
            IpType::V4,
            flt_id(tcp_dport(1), 4),
            Position::Rear,
        )
        .unwrap();
    let before = mgr.staged().to_vec();

    let err = mgr
        .stage_add(wan.clone(), IpType::V4, flt(tcp_dport(1)), Position::Front)
        .unwrap_err();
    assert!(matches!(err, TableError::KindMismatch { .. }));

    let err = mgr
        .stage_add(
            TableSet::Filter(Client::UsbProd),
            IpType::V4,
            flt(tcp_dport(1)),
            Position::After(RuleHdl(0xdead)),
        )
        .unwrap_err();
    assert_eq!(err, TableError::UnknownHandle(RuleHdl(0xdead)));

    let err = mgr
        .stage_add(
            g.set.clone(),
            IpType::V4,
            flt(tcp_dport(1)),
            Position::AfterTicket(before[0].ticket),
        )
        .unwrap_err();
    assert_eq!(err, TableError::AfterInsertOnGlobalTable);

    let err = mgr
        .stage_add(
            wan.clone(),
            IpType::V4,
            rt(Client::UsbCons, tcp_dport(1)),
            Position::AfterTicket(before[0].ticket),
        )
        .unwrap_err();
    assert_eq!(err, TableError::UnknownTicket(before[0].ticket));

    let err = mgr
        .stage_add(
            g.set.clone(),
            IpType::V4,
            flt_id(tcp_dport(2), 4),
            Position::Rear,
        )
        .unwrap_err();
    assert!(matches!(err, TableError::DuplicateRuleId { rule_id: 4, .. }));

    // v2.5 has neither hashable tables nor statistics.
    let mut hashed = flt(tcp_dport(3));
    hashed.opts_mut().hashable = true;
    let err = mgr
        .stage_add(g.set.clone(), IpType::V4, hashed, Position::Rear)
        .unwrap_err();
    assert_eq!(err, TableError::HashableUnsupported);

    let mut counted = flt(tcp_dport(3));
    counted.opts_mut().cnt_idx = Some(3);
    let err = mgr
        .stage_add(g.set.clone(), IpType::V4, counted, Position::Rear)
        .unwrap_err();
    assert_eq!(err, TableError::StatsUnsupported);

    let long = TableSet::Routing("x".repeat(RESOURCE_NAME_MAX));
    let err = mgr
        .stage_add(
            long,
            IpType::V4,
            rt(Client::UsbCons, tcp_dport(1)),
            Position::Front,
        )
        .unwrap_err();
    assert!(matches!(err, TableError::InvalidTableName(_)));

    // A v4-only field in a v6 table.
    let err = mgr
        .stage_add(g.set.clone(), IpType::V6, flt(tcp_dport(1)), Position::Rear)
        .unwrap_err();
    assert!(matches!(err, TableError::Compile(_)));

    assert_eq!(mgr.staged(), before.as_slice());
    assert!(drv.calls().is_empty());
    assert_eq!(mgr.tables().count(), 0);
}

#[test]
fn counter_and_abi_checks() {
    let drv = FakeDriver::default();
    let cfg = SessionConfig { abi: AbiChoice::V1, ..Default::default() };
    let mut mgr = manager_with(&drv, cfg);
    let g = v4_global();

    let mut counted = flt(tcp_dport(3));
    counted.opts_mut().cnt_idx = Some(1);
    let err = mgr
        .stage_add(g.set.clone(), IpType::V4, counted.clone(), Position::Rear)
        .unwrap_err();
    assert_eq!(err, TableError::CounterNotAllocated(1));

    let req = CounterAllocReq {
        hw: CounterReq { num: 2, allow_less: false },
        ..Default::default()
    };
    let alloc = mgr.alloc_counters(req).unwrap();
    assert_eq!(alloc.hw, Some(CounterRange { start: 1, end: 2 }));
    assert!(mgr.counters().contains(1));

    // Statistics need v2 and the session forces v1.
    let err = mgr
        .stage_add(g.set.clone(), IpType::V4, counted, Position::Rear)
        .unwrap_err();
    assert_eq!(err, TableError::AbiMismatch);
    assert!(mgr.staged().is_empty());
}

#[test]
fn rule_ids_fill_lowest_gap() {
    let drv = FakeDriver::default();
    let mut mgr = manager(&drv);
    let g = v4_global();

    mgr
        .stage_add(
            g.set.clone(),
            IpType::V4,
            flt_id(tcp_dport(1), 2),
            Position::Rear,
        )
        .unwrap();
    for port in [2, 3] {
        mgr
            .stage_add(
                g.set.clone(),
                IpType::V4,
                flt(tcp_dport(port)),
                Position::Rear,
            )
            .unwrap();
    }

    let ids: Vec<u16> = mgr.staged().iter().map(|s| s.rule.rule_id()).collect();
    assert_eq!(ids, vec![2, 1, 3]);

    // Ids are per table.
    let other = TableSet::Filter(Client::UsbProd);
    mgr.stage_add(other, IpType::V4, flt(tcp_dport(4)), Position::Rear)
        .unwrap();
    assert_eq!(mgr.staged()[3].rule.rule_id(), 1);

    mgr.commit().unwrap();
    mgr.stage_add(g.set.clone(), IpType::V4, flt(tcp_dport(5)), Position::Rear)
        .unwrap();
    assert_eq!(mgr.staged()[0].rule.rule_id(), 4);
}

#[test]
fn commit_interrupted_keeps_rest_staged() {
    let drv = FakeDriver::default();
    let mut mgr = manager(&drv);
    let g = v4_global();
    let ep = TableSet::Filter(Client::UsbProd);

    let t1 = mgr
        .stage_add(g.set.clone(), IpType::V4, flt(tcp_dport(1)), Position::Rear)
        .unwrap();
    let t2 = mgr
        .stage_add(ep.clone(), IpType::V4, flt(tcp_dport(2)), Position::Rear)
        .unwrap();

    // The second run's call fails as a whole.
    drv.fail_call(1, TransportError::DriverNotAttached);
    let err = mgr.commit().unwrap_err();
    let TableError::CommitInterrupted { err, partial } = err else {
        panic!("unexpected error: {err:?}");
    };
    assert_eq!(err, TransportError::DriverNotAttached);
    assert_eq!(partial.bound.len(), 1);
    assert_eq!(partial.bound[0].0, t1);

    assert_eq!(mgr.staged().len(), 1);
    assert_eq!(mgr.staged()[0].ticket, t2);

    let report = mgr.commit().unwrap();
    assert_eq!(report.bound.len(), 1);
    assert_eq!(report.bound[0].0, t2);
    assert_eq!(drv.rule_count(), 2);
}

#[test]
fn modify_rules() {
    let drv = FakeDriver::default();
    let mut mgr = manager(&drv);
    let g = v4_global();

    let t = mgr
        .stage_add(
            g.set.clone(),
            IpType::V4,
            flt_id(tcp_dport(1), 7),
            Position::Rear,
        )
        .unwrap();
    mgr.commit().unwrap();
    let h = mgr.handle_of(t).unwrap();

    mgr.modify(h, flt(tcp_dport(2))).unwrap();
    let e = mgr.entry(h).unwrap();
    assert_eq!(e.rule.rule_id(), 7);
    assert_eq!(drv.calls().last().unwrap().cmd, IpaCmd::MdfyFltRule);

    let err = mgr.modify(h, flt_id(tcp_dport(2), 8)).unwrap_err();
    assert_eq!(err, TableError::RuleIdChange { hdl: h, have: 7, want: 8 });

    let mut hashed = flt(tcp_dport(2));
    hashed.opts_mut().hashable = true;
    assert_eq!(
        mgr.modify(h, hashed).unwrap_err(),
        TableError::HashableChange(h)
    );

    let err = mgr.modify(h, rt(Client::UsbCons, tcp_dport(2))).unwrap_err();
    assert!(matches!(err, TableError::KindMismatch { .. }));

    drv.reject_rule_id(7);
    let err = mgr.modify(h, flt(tcp_dport(3))).unwrap_err();
    assert_eq!(err, TableError::ItemFailed { hdl: h, status: -1 });
}

#[test]
fn delete_and_reset() {
    let drv = FakeDriver::default();
    let mut mgr = manager(&drv);
    let g = v4_global();

    for port in 1..=4 {
        mgr
            .stage_add(
                g.set.clone(),
                IpType::V4,
                flt(tcp_dport(port)),
                Position::Rear,
            )
            .unwrap();
    }
    let wan = TableSet::Routing("wan".to_string());
    mgr
        .stage_add(
            wan,
            IpType::V4,
            rt(Client::UsbCons, tcp_dport(9)),
            Position::Rear,
        )
        .unwrap();
    let all = hdls(&mgr.commit().unwrap());

    let err = mgr.delete_batch(&[all[0], RuleHdl(0xbeef)]).unwrap_err();
    assert_eq!(err, TableError::UnknownHandle(RuleHdl(0xbeef)));
    assert_eq!(mgr.sequence(&g).len(), 4);

    mgr.delete(all[0]).unwrap();
    assert!(!drv.has_rule(all[0]));
    assert_eq!(mgr.sequence(&g), all[1..4].to_vec());
    assert_eq!(
        mgr.delete(all[0]).unwrap_err(),
        TableError::UnknownHandle(all[0])
    );

    // Filter and routing rules in one batch go out as two calls.
    let report = mgr.delete_batch(&[all[1], all[4]]).unwrap();
    assert_eq!(report.ok, vec![all[1], all[4]]);

    let report = mgr.reset_table(IpType::V4, false).unwrap();
    assert_eq!(report.ok, all[2..4].to_vec());
    assert_eq!(mgr.tables().count(), 0);
    assert_eq!(drv.rule_count(), 0);
}

#[test]
fn reset_all_drops_tracked_tables() {
    let drv = FakeDriver::default();
    let mut mgr = manager(&drv);
    let g = v4_global();

    mgr.stage_add(g.set.clone(), IpType::V4, flt(tcp_dport(1)), Position::Rear)
        .unwrap();
    mgr.stage_add(
        TableSet::default_rt(),
        IpType::V4,
        rt(Client::AppsLanCons, tcp_dport(1)),
        Position::Front,
    )
    .unwrap();
    mgr.commit().unwrap();

    mgr.reset_all(RuleKind::Filter, IpType::V4).unwrap();
    assert!(mgr.sequence(&g).is_empty());
    assert_eq!(mgr.tables().count(), 1);
    assert_eq!(drv.rule_count(), 1);

    mgr.commit_hw(RuleKind::Routing, IpType::V4).unwrap();
    assert_eq!(drv.calls().last().unwrap().cmd, IpaCmd::CommitRt);
}

#[test]
fn shared_manager_across_threads() {
    let drv = FakeDriver::default();
    let shared = SharedManager::new(manager(&drv));
    let g = v4_global();

    std::thread::scope(|s| {
        for base in [100, 200] {
            let shared = &shared;
            let set = g.set.clone();
            s.spawn(move || {
                for port in base..base + 10 {
                    shared
                        .with(|m| {
                            m.stage_add(
                                set.clone(),
                                IpType::V4,
                                flt(tcp_dport(port)),
                                Position::Rear,
                            )
                        })
                        .unwrap();
                }
            });
        }
    });

    let report = shared.with(|m| m.commit()).unwrap();
    assert_eq!(report.bound.len(), 20);

    let mgr = shared.into_inner();
    let ids: std::collections::BTreeSet<u16> = mgr
        .entries(&g)
        .iter()
        .map(|e| e.rule.rule_id())
        .collect();
    assert_eq!(ids.len(), 20);
}
