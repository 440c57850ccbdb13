// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Print tables, counters, and equations in a human-friendly manner.
//!
//! Shared by ipaadm and the integration tests.

use crate::api::CounterAlloc;
use crate::api::CounterRange;
use crate::api::EquationSet;
use crate::api::FltMatch;
use crate::api::FltRtStats;
use crate::api::HdrRef;
use crate::api::Rule;
use crate::api::RtTblRef;
use crate::engine::table::CommitReport;
use crate::engine::table::Entry;
use crate::engine::table::ItemFailure;
use crate::engine::table::StagedRule;
use crate::engine::table::TableId;
use itertools::Itertools;
use std::io::Write;
use tabwriter::TabWriter;

/// Print every table, one rule per line, in evaluation order.
pub fn print_tables<'a>(
    tables: impl IntoIterator<Item = (&'a TableId, &'a [Entry])>,
) -> std::io::Result<()> {
    print_tables_into(&mut std::io::stdout(), tables)
}

/// Print every table into a given writer.
pub fn print_tables_into<'a>(
    writer: &mut impl Write,
    tables: impl IntoIterator<Item = (&'a TableId, &'a [Entry])>,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);

    for (id, entries) in tables {
        writeln!(t, "Table {id}")?;
        write_hr(&mut t)?;
        print_rule_header(&mut t)?;
        for (pos, e) in entries.iter().enumerate() {
            print_rule(&mut t, &pos.to_string(), &e.hdl.to_string(), &e.rule)?;
        }
        t.flush()?;
        writeln!(t)?;
    }

    t.flush()
}

/// Print the rules waiting for a commit.
pub fn print_staged_into(
    writer: &mut impl Write,
    staged: &[StagedRule],
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "TICKET\tTABLE\tPOS\tID\tCNT\tMATCH\tTARGET")?;

    for s in staged {
        writeln!(
            t,
            "{}\t{}\t{:?}\t{}\t{}\t{}\t{}",
            s.ticket,
            s.table,
            s.pos,
            s.rule.rule_id(),
            cnt_str(&s.rule),
            match_str(&s.rule),
            target_str(&s.rule),
        )?;
    }
    t.flush()
}

pub fn print_commit_report_into(
    writer: &mut impl Write,
    report: &CommitReport,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "TICKET\tRESULT")?;

    for (ticket, hdl) in &report.bound {
        writeln!(t, "{ticket}\t{hdl}")?;
    }

    for (ticket, why) in &report.failed {
        match why {
            ItemFailure::Status(st) => writeln!(t, "{ticket}\tstatus {st}")?,
            ItemFailure::AnchorFailed => writeln!(t, "{ticket}\tno anchor")?,
        }
    }
    t.flush()
}

/// Print the header for the [`print_rule()`] output.
pub fn print_rule_header(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "POS\tHDL\tID\tCNT\tMATCH\tTARGET")
}

/// Print one rule. An attribute match with several fields takes one
/// line per field.
pub fn print_rule(
    t: &mut impl Write,
    pos: &str,
    hdl: &str,
    rule: &Rule,
) -> std::io::Result<()> {
    let matches = match_str(rule);
    let mut parts = matches.split(' ');
    let first = parts.next().unwrap_or("*");

    writeln!(
        t,
        "{pos}\t{hdl}\t{}\t{}\t{first}\t{}",
        rule.rule_id(),
        cnt_str(rule),
        target_str(rule),
    )?;

    for part in parts {
        writeln!(t, "\t\t\t\t{part}\t")?;
    }

    Ok(())
}

fn cnt_str(rule: &Rule) -> String {
    rule.cnt_idx().map_or("--".to_string(), |idx| idx.to_string())
}

fn match_str(rule: &Rule) -> String {
    match rule {
        Rule::Flt(r) => match &r.matcher {
            FltMatch::Attrib(a) => a.to_string(),
            FltMatch::Eq(eq) => format!("eq={:#06x}", eq.rule_eq_bitmap()),
        },
        Rule::Rt(r) => r.attrib.to_string(),
    }
}

fn target_str(rule: &Rule) -> String {
    match rule {
        Rule::Flt(r) => match r.rt_tbl {
            RtTblRef::Hdl(h) => format!("{} tbl_hdl={h}", r.action),
            RtTblRef::Idx(i) => format!("{} tbl_idx={i}", r.action),
        },
        Rule::Rt(r) => match r.hdr {
            HdrRef::None => format!("{}", r.dst),
            HdrRef::Hdr(h) => format!("{} hdr={h}", r.dst),
            HdrRef::ProcCtx(h) => format!("{} proc_ctx={h}", r.dst),
        },
    }
}

/// Print the counter allocations.
pub fn print_counters<'a>(
    allocs: impl IntoIterator<Item = &'a CounterAlloc>,
) -> std::io::Result<()> {
    print_counters_into(&mut std::io::stdout(), allocs)
}

/// Print the counter allocations into a given writer.
pub fn print_counters_into<'a>(
    writer: &mut impl Write,
    allocs: impl IntoIterator<Item = &'a CounterAlloc>,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "HDL\tHW\tSW")?;

    for a in allocs {
        let hw = a.hw.map_or("--".to_string(), |r| r.to_string());
        let sw = a.sw.map_or("--".to_string(), |r| r.to_string());
        writeln!(t, "{}\t{hw}\t{sw}", a.hdl)?;
    }
    t.flush()
}

/// Print the statistics of the counters in `range`.
pub fn print_stats_into(
    writer: &mut impl Write,
    range: CounterRange,
    stats: &[FltRtStats],
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "IDX\tPKTS\tPKTS HASH\tBYTES")?;

    for (idx, st) in range.iter().zip(stats) {
        writeln!(
            t,
            "{idx}\t{}\t{}\t{}",
            st.num_pkts, st.num_pkts_hash, st.num_bytes
        )?;
    }
    t.flush()
}

pub fn print_eq(eq: &EquationSet) -> std::io::Result<()> {
    print_eq_into(&mut std::io::stdout(), eq)
}

/// Print each slot of an equation set on its own line.
pub fn print_eq_into(
    writer: &mut impl Write,
    eq: &EquationSet,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "rule_eq_bitmap\t{:#06x}", eq.rule_eq_bitmap())?;
    write_hr(&mut t)?;

    if let Some(v) = eq.tos {
        writeln!(t, "tos_eq\t{v}")?;
    }
    if let Some(v) = eq.protocol {
        writeln!(t, "protocol_eq\t{v}")?;
    }
    if let Some(v) = eq.tc {
        writeln!(t, "tc_eq\t{v}")?;
    }
    if let Some(v) = eq.flow_label {
        writeln!(t, "fl_eq\t{v:#07x}")?;
    }
    for r in &eq.ihl_range16 {
        writeln!(
            t,
            "ihl_offset_range_16\t@{} {}..={}",
            r.offset, r.low, r.high
        )?;
    }
    for m in &eq.meq32 {
        writeln!(
            t,
            "offset_meq_32\t@{} {:#010x}/{:#010x}",
            m.offset, m.value, m.mask
        )?;
    }
    if let Some(e) = eq.ihl_eq16 {
        writeln!(t, "ihl_offset_eq_16\t@{} {:#06x}", e.offset, e.value)?;
    }
    if let Some(e) = eq.ihl_eq32 {
        writeln!(t, "ihl_offset_eq_32\t@{} {:#010x}", e.offset, e.value)?;
    }
    for m in &eq.ihl_meq32 {
        writeln!(
            t,
            "ihl_offset_meq_32\t@{} {:#010x}/{:#010x}",
            m.offset, m.value, m.mask
        )?;
    }
    for m in &eq.meq128 {
        writeln!(
            t,
            "offset_meq_128\t@{} {}/{}",
            m.offset,
            hex(&m.value),
            hex(&m.mask)
        )?;
    }
    if let Some(m) = eq.metadata {
        writeln!(t, "metadata_meq32\t{:#010x}/{:#010x}", m.value, m.mask)?;
    }
    if eq.frag {
        writeln!(t, "ipv4_frag_eq\t1")?;
    }

    t.flush()
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).join("")
}

/// Print a horizontal rule.
fn write_hr(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "{:-<70}", "-")
}
