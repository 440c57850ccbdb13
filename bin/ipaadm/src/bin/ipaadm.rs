// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use std::io;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::bail;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use slog::Drain;
use slog::Logger;
use slog::info;
use slog::o;

use ipa::api::CounterAllocReq;
use ipa::api::CounterHdl;
use ipa::api::CounterRange;
use ipa::api::CounterReq;
use ipa::api::IpType;
use ipa::api::RuleHdl;
use ipa::api::RuleKind;
use ipa::engine::TableManager;
use ipa::engine::Transport;
use ipa::engine::compile::compile;
use ipa::print::print_commit_report_into;
use ipa::print::print_counters;
use ipa::print::print_eq;
use ipa::print::print_staged_into;
use ipa::print::print_stats_into;
use ipa::print::print_tables;
use ipaadm::IpaAdm;
use ipaadm::delete;
use ipaadm::rules::RuleFile;
use ipaadm::rules::apply;
use ipaadm::rules::dry_run;

/// Administer the filter and routing tables of the IP Accelerator
#[derive(Debug, Parser)]
#[command(version)]
struct Cli {
    /// The driver's device node.
    #[arg(long, global = true)]
    device: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the hardware version reported by the driver.
    HwVersion,

    /// Lower every match in a rule file to equation form and print it.
    Compile {
        file: PathBuf,

        /// Also print the driver's lowering of each match.
        #[arg(long)]
        driver: bool,
    },

    /// Install the rules of a rule file.
    Apply {
        file: PathBuf,

        /// Leave the hardware tables as they were.
        #[arg(long)]
        no_hw_commit: bool,

        /// Print what would be sent without sending it. Filters may
        /// only name routing tables that already exist.
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete rules by handle.
    Del {
        #[arg(short)]
        kind: Kind,
        #[arg(short)]
        ip: IpType,
        #[arg(required = true)]
        hdls: Vec<u32>,
        #[arg(long)]
        commit: bool,
    },

    /// Push the software tables to the hardware.
    Commit {
        #[arg(short)]
        kind: Kind,
        #[arg(short)]
        ip: IpType,
    },

    /// Remove every rule of a kind and family.
    Reset {
        #[arg(short)]
        kind: Kind,
        #[arg(short)]
        ip: IpType,
    },

    /// Print the handle and index of a routing table.
    RtTbl {
        name: String,
        #[arg(short)]
        ip: IpType,
        /// Drop the reference taken by the lookup.
        #[arg(long)]
        put: bool,
    },

    /// Flow statistics counters.
    #[command(subcommand)]
    Counters(CounterCmd),
}

#[derive(Debug, Subcommand)]
enum CounterCmd {
    /// Allocate counters from the hardware and software partitions.
    Alloc {
        #[arg(long, default_value_t = 0)]
        hw: u8,
        #[arg(long, default_value_t = 0)]
        sw: u8,
        /// Accept fewer counters than asked for.
        #[arg(long)]
        allow_less: bool,
    },

    /// Release an allocation.
    Dealloc { hdl: i32 },

    /// Print the statistics of the counters `start` through `end`.
    Query {
        start: u8,
        end: u8,
        /// Zero the counters after reading them.
        #[arg(long)]
        reset: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Kind {
    Flt,
    Rt,
}

impl From<Kind> for RuleKind {
    fn from(k: Kind) -> Self {
        match k {
            Kind::Flt => RuleKind::Filter,
            Kind::Rt => RuleKind::Routing,
        }
    }
}

fn open(device: Option<&str>) -> anyhow::Result<IpaAdm> {
    let adm = match device {
        Some(path) => IpaAdm::open_on(path),
        None => IpaAdm::open(),
    };
    Ok(adm?)
}

fn logger() -> Logger {
    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_envlogger::new(drain);
    let drain = slog_async::Async::new(drain).build().fuse();
    Logger::root(drain, o!("component" => "ipaadm"))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let log = logger();
    let device = cli.device.as_deref();

    match cli.cmd {
        Command::HwVersion => {
            let hdl = open(device)?;
            println!("{}", hdl.get_hw_version()?);
        }

        Command::Compile { file, driver } => {
            let rules = RuleFile::load(&file)?;
            let caps =
                rules.caps(|| Ok(open(device)?.get_hw_version()?))?;
            let hdl = if driver { Some(open(device)?) } else { None };

            let matches = rules
                .routes
                .iter()
                .map(|r| ("route", r.ip, &r.matches))
                .chain(
                    rules.filters.iter().map(|f| ("filter", f.ip, &f.matches)),
                );

            for (i, (what, ip, m)) in matches.enumerate() {
                let attrib = m.to_attrib().with_context(|| format!("#{i}"))?;
                println!("{what} #{i} ({ip}): {attrib}");
                match compile(&attrib, ip, &caps) {
                    Ok(eq) => print_eq(&eq)?,
                    Err(e) => println!("  not lowered: {e}"),
                }

                if let Some(hdl) = &hdl {
                    println!("  driver:");
                    print_eq(&hdl.generate_eq(ip, &attrib)?)?;
                }
            }
        }

        Command::Apply { file, no_hw_commit, dry_run: dry } => {
            let rules = RuleFile::load(&file)?;
            let hdl = open(device)?;
            let caps = rules.caps(|| Ok(hdl.get_hw_version()?))?;
            let mut mgr = TableManager::new(
                &*hdl,
                rules.session,
                caps,
                log.new(o!("file" => file.display().to_string())),
            );

            if dry {
                let staged = dry_run(&mut mgr, &rules)?;
                print_staged_into(&mut io::stdout(), &staged)?;
                return Ok(());
            }

            let report = apply(&mut mgr, &rules, !no_hw_commit)?;
            print_commit_report_into(&mut io::stdout(), &report)?;
            print_tables(mgr.tables())?;

            if !report.failed.is_empty() {
                bail!("{} rule(s) were not installed", report.failed.len());
            }
        }

        Command::Del { kind, ip, hdls, commit } => {
            let hdl = open(device)?;
            let hdls: Vec<RuleHdl> = hdls.into_iter().map(RuleHdl).collect();
            let refused =
                delete(&*hdl, kind.into(), ip, &hdls, commit, log.clone())?;

            for h in &refused {
                eprintln!("failed to delete {h}");
            }
            if !refused.is_empty() {
                bail!("{} rule(s) were not deleted", refused.len());
            }
        }

        Command::Commit { kind, ip } => {
            open(device)?.commit(kind.into(), ip)?;
        }

        Command::Reset { kind, ip } => {
            open(device)?.reset(kind.into(), ip)?;
            info!(log, "tables reset"; "kind" => ?kind, "ip" => %ip);
        }

        Command::RtTbl { name, ip, put } => {
            let hdl = open(device)?;
            let tbl = hdl.get_rt_tbl(ip, &name)?;
            let idx = hdl.query_rt_tbl_index(ip, &name)?;
            println!("{name}: hdl {tbl} idx {idx}");
            if put {
                hdl.put_rt_tbl(tbl)?;
            }
        }

        Command::Counters(cmd) => {
            let hdl = open(device)?;
            match cmd {
                CounterCmd::Alloc { hw, sw, allow_less } => {
                    if hw == 0 && sw == 0 {
                        bail!("ask for at least one counter");
                    }
                    let req = CounterAllocReq {
                        hw: CounterReq { num: hw, allow_less },
                        sw: CounterReq { num: sw, allow_less },
                    };
                    let alloc = hdl.alloc_counters(&req)?;
                    print_counters([&alloc])?;
                }

                CounterCmd::Dealloc { hdl: id } => {
                    hdl.dealloc_counters(CounterHdl(id))?;
                }

                CounterCmd::Query { start, end, reset } => {
                    if start > end {
                        bail!("counter range {start}-{end} is empty");
                    }
                    let range = CounterRange { start, end };
                    let stats = hdl.query_counters(range, reset)?;
                    print_stats_into(&mut io::stdout(), range, &stats)?;
                }
            }
        }
    }

    Ok(())
}
