// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use ipa::engine::counter::CounterAllocator;
use ipa::engine::counter::CounterError;
use ipa_test_utils as common;

use common::*;

#[test]
fn short_pool_needs_allow_less() {
    let mut ca = CounterAllocator::new();
    ca.alloc(CounterPool::Hw, FLT_RT_HW_COUNTER - 5, false).unwrap();
    assert_eq!(ca.free(CounterPool::Hw), 5);

    let err = ca.alloc(CounterPool::Hw, 10, false).unwrap_err();
    assert_eq!(
        err,
        CounterError::Exhausted { pool: CounterPool::Hw, want: 10, free: 5 }
    );

    let got = ca.alloc(CounterPool::Hw, 10, true).unwrap();
    let r = got.hw.unwrap();
    assert_eq!(r.len(), 5);
    assert_eq!(r, CounterRange { start: 116, end: 120 });
}

#[test]
fn double_free_through_manager() {
    let drv = FakeDriver::default();
    let mut mgr = manager(&drv);

    let req = CounterAllocReq {
        hw: CounterReq { num: 4, allow_less: false },
        sw: CounterReq { num: 2, allow_less: false },
    };
    let alloc = mgr.alloc_counters(req).unwrap();
    assert_eq!(alloc.hw, Some(CounterRange { start: 1, end: 4 }));
    assert_eq!(alloc.sw, Some(CounterRange { start: 121, end: 122 }));

    mgr.dealloc_counters(alloc.hdl).unwrap();
    assert_eq!(
        mgr.dealloc_counters(alloc.hdl).unwrap_err(),
        TableError::Counter(CounterError::UnknownAllocation(alloc.hdl))
    );
    assert!(!mgr.counters().contains(1));
}

#[test]
fn untracked_allocation_is_released() {
    let drv = FakeDriver::default();
    let mut mgr = manager(&drv);
    let req = CounterAllocReq {
        hw: CounterReq { num: 4, allow_less: false },
        ..Default::default()
    };
    let first = mgr.alloc_counters(req).unwrap();

    // Released behind the manager's back, so the driver hands out the
    // same counters again.
    drv.dealloc_counters(first.hdl).unwrap();
    let err = mgr.alloc_counters(req).unwrap_err();
    assert!(matches!(
        err,
        TableError::Counter(
            CounterError::Overlap(_) | CounterError::DuplicateHandle(_)
        )
    ));
    assert_eq!(drv.cmds().last(), Some(&IpaCmd::FnrCounterDealloc));
    assert_eq!(mgr.counters().get(first.hdl), Some(&first));

    let again = drv.alloc_counters(&req).unwrap();
    assert_eq!(again.hw, Some(CounterRange { start: 1, end: 4 }));
}

#[test]
fn counted_rule_and_stats() {
    let drv = FakeDriver::default();
    let mut mgr = manager(&drv);

    let req = CounterAllocReq {
        hw: CounterReq { num: 1, allow_less: false },
        ..Default::default()
    };
    let alloc = mgr.alloc_counters(req).unwrap();
    let idx = alloc.hw.unwrap().start;

    let mut rule = flt(tcp_dport(80));
    rule.opts_mut().cnt_idx = Some(idx);
    mgr.stage_add(TableSet::FilterGlobal, IpType::V4, rule, Position::Rear)
        .unwrap();
    mgr.commit().unwrap();

    // A counted rule goes out in the v2 layout.
    assert_eq!(drv.add_calls(), vec![(IpaCmd::AddFltRuleV2, 1)]);

    let st = FltRtStats { num_pkts: 10, num_pkts_hash: 4, num_bytes: 1500 };
    drv.set_stats(idx, st);

    let range = CounterRange { start: idx, end: idx + 1 };
    let got = mgr.query_counters(range, true).unwrap();
    assert_eq!(got, vec![st, FltRtStats::default()]);

    let got = mgr.query_counters(range, false).unwrap();
    assert_eq!(got[0], FltRtStats::default());
}
