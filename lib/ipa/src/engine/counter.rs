// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Flow statistics counter allocation.
//!
//! Indices `1..=128` are tracked in a single bitmap; bit `i - 1` is set
//! when index `i` is in use. Each partition is searched first-fit for
//! a contiguous run.

use crate::api::CounterAlloc;
use crate::api::CounterAllocReq;
use crate::api::CounterHdl;
use crate::api::CounterPool;
use crate::api::CounterRange;
use crate::api::CounterReq;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum CounterError {
    #[error("{pool} counters exhausted: want {want}, {free} free")]
    Exhausted { pool: CounterPool, want: u8, free: usize },

    #[error("unknown counter allocation {0}")]
    UnknownAllocation(CounterHdl),

    #[error("counter allocation {0} already tracked")]
    DuplicateHandle(CounterHdl),

    #[error("counter range {0} overlaps an existing allocation")]
    Overlap(CounterRange),

    #[error("counter range {0} is outside its partition")]
    OutOfPartition(CounterRange),

    #[error("a counter allocation must ask for at least one counter")]
    ZeroRequest,
}

#[derive(Clone, Debug)]
pub struct CounterAllocator {
    used: u128,
    allocs: BTreeMap<CounterHdl, CounterAlloc>,
    next_hdl: i32,
}

impl Default for CounterAllocator {
    fn default() -> Self {
        Self::new()
    }
}

const fn bit(idx: u8) -> u128 {
    1 << (idx - 1)
}

fn range_bits(r: CounterRange) -> u128 {
    r.iter().fold(0, |acc, i| acc | bit(i))
}

impl CounterAllocator {
    pub fn new() -> Self {
        Self { used: 0, allocs: BTreeMap::new(), next_hdl: 1 }
    }

    pub fn contains(&self, idx: u8) -> bool {
        CounterPool::of(idx).is_some() && self.used & bit(idx) != 0
    }

    pub fn free(&self, pool: CounterPool) -> usize {
        pool.indices().filter(|i| !self.contains(*i)).count()
    }

    pub fn get(&self, hdl: CounterHdl) -> Option<&CounterAlloc> {
        self.allocs.get(&hdl)
    }

    pub fn allocations(&self) -> impl Iterator<Item = &CounterAlloc> {
        self.allocs.values()
    }

    /// The free runs of `pool`, lowest first.
    fn runs(&self, pool: CounterPool) -> Vec<CounterRange> {
        let mut runs = Vec::new();
        let mut cur: Option<CounterRange> = None;

        for idx in pool.indices() {
            if self.contains(idx) {
                runs.extend(cur.take());
                continue;
            }

            cur = match cur {
                Some(r) => Some(CounterRange { start: r.start, end: idx }),
                None => Some(CounterRange { start: idx, end: idx }),
            };
        }

        runs.extend(cur);
        runs
    }

    /// Find, but do not reserve, a range for `req`.
    fn find(
        &self,
        pool: CounterPool,
        req: CounterReq,
    ) -> Result<CounterRange, CounterError> {
        let want = req.num;
        let runs = self.runs(pool);

        if let Some(r) = runs.iter().find(|r| r.len() >= usize::from(want)) {
            return Ok(CounterRange { start: r.start, end: r.start + want - 1 });
        }

        let exhausted = CounterError::Exhausted {
            pool,
            want,
            free: self.free(pool),
        };

        if !req.allow_less {
            return Err(exhausted);
        }

        // max_by_key keeps the last maximum; we want the first.
        let mut best: Option<CounterRange> = None;
        for r in runs {
            if best.is_none_or(|b| r.len() > b.len()) {
                best = Some(r);
            }
        }

        best.ok_or(exhausted)
    }

    fn next_hdl(&mut self) -> CounterHdl {
        while self.allocs.contains_key(&CounterHdl(self.next_hdl)) {
            self.next_hdl = self.next_hdl.wrapping_add(1).max(1);
        }
        let hdl = CounterHdl(self.next_hdl);
        self.next_hdl = self.next_hdl.wrapping_add(1).max(1);
        hdl
    }

    fn record(&mut self, alloc: CounterAlloc) {
        for r in alloc.ranges() {
            self.used |= range_bits(r);
        }
        self.allocs.insert(alloc.hdl, alloc);
    }

    /// Allocate `want` contiguous counters from `pool`.
    ///
    /// With `allow_less` the largest free run up to `want` is taken
    /// instead; that only fails when the pool is full.
    pub fn alloc(
        &mut self,
        pool: CounterPool,
        want: u8,
        allow_less: bool,
    ) -> Result<CounterAlloc, CounterError> {
        let req = CounterReq { num: want, allow_less };
        match pool {
            CounterPool::Hw => self.alloc_pair(CounterAllocReq {
                hw: req,
                ..Default::default()
            }),
            CounterPool::Sw => self.alloc_pair(CounterAllocReq {
                sw: req,
                ..Default::default()
            }),
        }
    }

    /// Allocate from both partitions under one handle. Either both
    /// halves succeed or nothing is allocated. A half asking for zero
    /// counters is skipped.
    pub fn alloc_pair(
        &mut self,
        req: CounterAllocReq,
    ) -> Result<CounterAlloc, CounterError> {
        if req.hw.num == 0 && req.sw.num == 0 {
            return Err(CounterError::ZeroRequest);
        }

        let hw = match req.hw.num {
            0 => None,
            _ => Some(self.find(CounterPool::Hw, req.hw)?),
        };
        let sw = match req.sw.num {
            0 => None,
            _ => Some(self.find(CounterPool::Sw, req.sw)?),
        };

        let alloc = CounterAlloc { hdl: self.next_hdl(), hw, sw };
        self.record(alloc);
        Ok(alloc)
    }

    /// Track an allocation that was made elsewhere, e.g. by the driver.
    pub fn adopt(&mut self, alloc: CounterAlloc) -> Result<(), CounterError> {
        if self.allocs.contains_key(&alloc.hdl) {
            return Err(CounterError::DuplicateHandle(alloc.hdl));
        }

        let parts = [(CounterPool::Hw, alloc.hw), (CounterPool::Sw, alloc.sw)];
        for (pool, range) in parts {
            let Some(r) = range else {
                continue;
            };

            let inside = pool.indices();
            if r.start > r.end
                || !inside.contains(&r.start)
                || !inside.contains(&r.end)
            {
                return Err(CounterError::OutOfPartition(r));
            }

            if self.used & range_bits(r) != 0 {
                return Err(CounterError::Overlap(r));
            }
        }

        self.record(alloc);
        Ok(())
    }

    /// Release an allocation. Releasing it a second time fails.
    pub fn dealloc(
        &mut self,
        hdl: CounterHdl,
    ) -> Result<CounterAlloc, CounterError> {
        let alloc = self
            .allocs
            .remove(&hdl)
            .ok_or(CounterError::UnknownAllocation(hdl))?;

        for r in alloc.ranges() {
            self.used &= !range_bits(r);
        }

        Ok(alloc)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::FLT_RT_HW_COUNTER;

    #[test]
    fn first_fit_contiguous() {
        let mut ca = CounterAllocator::new();
        let a = ca.alloc(CounterPool::Hw, 4, false).unwrap();
        assert_eq!(a.hw, Some(CounterRange { start: 1, end: 4 }));
        assert_eq!(a.sw, None);

        let b = ca.alloc(CounterPool::Hw, 2, false).unwrap();
        assert_eq!(b.hw, Some(CounterRange { start: 5, end: 6 }));

        ca.dealloc(a.hdl).unwrap();
        // The hole left by `a` fits.
        let c = ca.alloc(CounterPool::Hw, 3, false).unwrap();
        assert_eq!(c.hw, Some(CounterRange { start: 1, end: 3 }));
        // This one doesn't.
        let d = ca.alloc(CounterPool::Hw, 2, false).unwrap();
        assert_eq!(d.hw, Some(CounterRange { start: 7, end: 8 }));
        assert!(ca.contains(2) && !ca.contains(4) && ca.contains(8));
    }

    #[test]
    fn short_allocation_needs_opt_in() {
        let mut ca = CounterAllocator::new();
        ca.alloc(CounterPool::Sw, 3, false).unwrap();
        assert_eq!(ca.free(CounterPool::Sw), 5);

        assert_eq!(
            ca.alloc(CounterPool::Sw, 10, false),
            Err(CounterError::Exhausted {
                pool: CounterPool::Sw,
                want: 10,
                free: 5,
            })
        );

        let got = ca.alloc(CounterPool::Sw, 10, true).unwrap();
        assert_eq!(got.sw.unwrap().len(), 5);
        assert_eq!(ca.free(CounterPool::Sw), 0);

        assert!(matches!(
            ca.alloc(CounterPool::Sw, 1, true),
            Err(CounterError::Exhausted { free: 0, .. })
        ));
        // The hardware partition is unaffected.
        assert_eq!(ca.free(CounterPool::Hw), usize::from(FLT_RT_HW_COUNTER));
    }

    #[test]
    fn allow_less_takes_largest_run() {
        let mut ca = CounterAllocator::new();
        ca.adopt(CounterAlloc {
            hdl: CounterHdl(100),
            hw: Some(CounterRange { start: 3, end: 3 }),
            sw: None,
        })
        .unwrap();
        ca.adopt(CounterAlloc {
            hdl: CounterHdl(101),
            hw: Some(CounterRange { start: 10, end: 120 }),
            sw: None,
        })
        .unwrap();
        // Free runs are 1-2 and 4-9.
        let got = ca.alloc(CounterPool::Hw, 8, true).unwrap();
        assert_eq!(got.hw, Some(CounterRange { start: 4, end: 9 }));
    }

    #[test]
    fn pair_rolls_back() {
        let mut ca = CounterAllocator::new();
        let req = CounterAllocReq {
            hw: CounterReq { num: 2, allow_less: false },
            sw: CounterReq { num: 9, allow_less: false },
        };
        assert!(matches!(
            ca.alloc_pair(req),
            Err(CounterError::Exhausted { pool: CounterPool::Sw, .. })
        ));
        assert_eq!(ca.free(CounterPool::Hw), 120);
        assert_eq!(ca.allocations().count(), 0);

        let req = CounterAllocReq {
            sw: CounterReq { num: 8, allow_less: false },
            ..req
        };
        let got = ca.alloc_pair(req).unwrap();
        assert_eq!(got.hw, Some(CounterRange { start: 1, end: 2 }));
        assert_eq!(got.sw, Some(CounterRange { start: 121, end: 128 }));
        assert_eq!(
            ca.alloc_pair(CounterAllocReq::default()),
            Err(CounterError::ZeroRequest)
        );
    }

    #[test]
    fn double_free() {
        let mut ca = CounterAllocator::new();
        let a = ca.alloc(CounterPool::Hw, 1, false).unwrap();
        assert!(ca.dealloc(a.hdl).is_ok());
        assert_eq!(
            ca.dealloc(a.hdl),
            Err(CounterError::UnknownAllocation(a.hdl))
        );
        assert!(!ca.contains(1));
    }

    #[test]
    fn adopt_checks() {
        let mut ca = CounterAllocator::new();
        let a = ca.alloc(CounterPool::Hw, 5, false).unwrap();

        let overlap = CounterAlloc {
            hdl: CounterHdl(50),
            hw: Some(CounterRange { start: 5, end: 6 }),
            sw: None,
        };
        assert_eq!(
            ca.adopt(overlap),
            Err(CounterError::Overlap(CounterRange { start: 5, end: 6 }))
        );

        let dup = CounterAlloc { hdl: a.hdl, hw: None, sw: None };
        assert_eq!(ca.adopt(dup), Err(CounterError::DuplicateHandle(a.hdl)));

        let wrong = CounterAlloc {
            hdl: CounterHdl(51),
            hw: Some(CounterRange { start: 119, end: 122 }),
            sw: None,
        };
        assert!(matches!(
            ca.adopt(wrong),
            Err(CounterError::OutOfPartition(_))
        ));

        // Handles chosen locally skip adopted ones.
        ca.adopt(CounterAlloc {
            hdl: CounterHdl(a.hdl.0 + 1),
            hw: None,
            sw: Some(CounterRange { start: 121, end: 121 }),
        })
        .unwrap();
        let b = ca.alloc(CounterPool::Sw, 1, false).unwrap();
        assert_eq!(b.hdl, CounterHdl(a.hdl.0 + 2));
        assert_eq!(b.sw, Some(CounterRange { start: 122, end: 122 }));
    }
}
