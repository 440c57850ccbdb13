// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Flow statistics counters.

use core::fmt;
use core::fmt::Display;
use core::ops::RangeInclusive;
use serde::Deserialize;
use serde::Serialize;

/// The highest counter index. Index zero means "no counter".
pub const MAX_FLT_RT_CNT_INDEX: u8 = 128;

/// Counters `1..=FLT_RT_HW_COUNTER` are updated by the hardware.
pub const FLT_RT_HW_COUNTER: u8 = 120;

/// The remainder are maintained by software.
pub const FLT_RT_SW_COUNTER: u8 = MAX_FLT_RT_CNT_INDEX - FLT_RT_HW_COUNTER;

/// One of the two counter partitions.
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
#[serde(rename_all = "lowercase")]
pub enum CounterPool {
    Hw,
    Sw,
}

impl CounterPool {
    /// Every index the partition owns.
    pub const fn indices(self) -> RangeInclusive<u8> {
        match self {
            CounterPool::Hw => 1..=FLT_RT_HW_COUNTER,
            CounterPool::Sw => (FLT_RT_HW_COUNTER + 1)..=MAX_FLT_RT_CNT_INDEX,
        }
    }

    pub fn of(idx: u8) -> Option<Self> {
        if CounterPool::Hw.indices().contains(&idx) {
            Some(CounterPool::Hw)
        } else if CounterPool::Sw.indices().contains(&idx) {
            Some(CounterPool::Sw)
        } else {
            None
        }
    }
}

impl Display for CounterPool {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            CounterPool::Hw => "HW",
            CounterPool::Sw => "SW",
        };

        write!(f, "{s}")
    }
}

/// An inclusive, contiguous range of counter indices.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CounterRange {
    pub start: u8,
    pub end: u8,
}

impl CounterRange {
    pub fn len(&self) -> usize {
        usize::from(self.end - self.start) + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, idx: u8) -> bool {
        (self.start..=self.end).contains(&idx)
    }

    pub fn iter(&self) -> RangeInclusive<u8> {
        self.start..=self.end
    }
}

impl Display for CounterRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// The handle naming one counter allocation.
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
pub struct CounterHdl(pub i32);

impl Display for CounterHdl {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How many counters to ask for from one partition.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct CounterReq {
    pub num: u8,
    pub allow_less: bool,
}

/// A request covering both partitions.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct CounterAllocReq {
    pub hw: CounterReq,
    pub sw: CounterReq,
}

/// What one allocation handed out.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CounterAlloc {
    pub hdl: CounterHdl,
    pub hw: Option<CounterRange>,
    pub sw: Option<CounterRange>,
}

impl CounterAlloc {
    pub fn ranges(&self) -> impl Iterator<Item = CounterRange> + '_ {
        self.hw.iter().chain(self.sw.iter()).copied()
    }
}

/// The statistics of one counter.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct FltRtStats {
    pub num_pkts: u32,
    pub num_pkts_hash: u32,
    pub num_bytes: u64,
}
