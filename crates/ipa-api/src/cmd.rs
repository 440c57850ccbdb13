// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! IPA ioctl command numbers.
//!
//! The numbers are part of the driver ABI. A new command always takes
//! [`IpaCmd::NEXT_UNUSED`]; a retired number is never handed out
//! again.

use core::ffi::c_int;
use serde::Deserialize;
use serde::Serialize;

/// The ioctl "type" byte for the IPA control node.
pub const IPA_IOC_MAGIC: u8 = 0xCF;

/// Path of the IPA control node.
pub const IPA_DEV: &str = "/dev/ipa";

const IOC_NRBITS: u32 = 8;
const IOC_TYPEBITS: u32 = 8;
const IOC_SIZEBITS: u32 = 14;
const IOC_NRSHIFT: u32 = 0;
const IOC_TYPESHIFT: u32 = IOC_NRSHIFT + IOC_NRBITS;
const IOC_SIZESHIFT: u32 = IOC_TYPESHIFT + IOC_TYPEBITS;
const IOC_DIRSHIFT: u32 = IOC_SIZESHIFT + IOC_SIZEBITS;

/// Data direction of an ioctl, from the caller's point of view.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IocDir {
    NoData = 0,
    Write = 1,
    Read = 2,
    ReadWrite = 3,
}

/// The shape of an ioctl's argument, as encoded in its request number.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IocArg {
    /// `_IO`: no argument.
    NoArg,
    /// The argument type is a pointer; the size field is pointer-sized.
    Ptr(IocDir),
    /// A fixed-size scalar type (an `enum`, `uint32_t`, `int`, ...).
    Value(IocDir, usize),
    /// A structure passed by address whose size is the size field.
    Struct(IocDir),
}

/// Compute a Linux `_IOC` request number.
pub const fn ioc(dir: IocDir, nr: u8, size: usize) -> u32 {
    ((dir as u32) << IOC_DIRSHIFT)
        | ((size as u32 & ((1 << IOC_SIZEBITS) - 1)) << IOC_SIZESHIFT)
        | ((IPA_IOC_MAGIC as u32) << IOC_TYPESHIFT)
        | ((nr as u32) << IOC_NRSHIFT)
}

macro_rules! ipa_cmds {
    ($($variant:ident = $nr:literal, $arg:expr;)*) => {
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
        #[repr(C)]
        pub enum IpaCmd {
            $($variant = $nr,)*
        }

        impl IpaCmd {
            pub const ALL: &'static [IpaCmd] = &[$(IpaCmd::$variant,)*];

            /// The argument form this command was declared with.
            pub const fn arg(self) -> IocArg {
                match self {
                    $(IpaCmd::$variant => $arg,)*
                }
            }
        }

        impl TryFrom<c_int> for IpaCmd {
            type Error = ();

            fn try_from(num: c_int) -> Result<Self, Self::Error> {
                match num {
                    $($nr => Ok(IpaCmd::$variant),)*
                    _ => Err(()),
                }
            }
        }
    };
}

use IocArg::*;
use IocDir::*;

const PTR_RW: IocArg = Ptr(ReadWrite);
const IP_TYPE: IocArg = Value(Write, 4);
const U32_W: IocArg = Value(Write, 4);

ipa_cmds! {
    AddHdr = 0, PTR_RW;
    DelHdr = 1, PTR_RW;
    AddRtRule = 2, PTR_RW;
    DelRtRule = 3, PTR_RW;
    AddFltRule = 4, PTR_RW;
    DelFltRule = 5, PTR_RW;
    CommitHdr = 6, NoArg;
    ResetHdr = 7, NoArg;
    CommitRt = 8, IP_TYPE;
    ResetRt = 9, IP_TYPE;
    CommitFlt = 10, IP_TYPE;
    ResetFlt = 11, IP_TYPE;
    Dump = 12, NoArg;
    GetRtTbl = 13, PTR_RW;
    PutRtTbl = 14, U32_W;
    CopyHdr = 15, PTR_RW;
    QueryIntf = 16, PTR_RW;
    QueryIntfTxProps = 17, PTR_RW;
    QueryIntfRxProps = 18, PTR_RW;
    GetHdr = 19, PTR_RW;
    PutHdr = 20, U32_W;
    SetFlt = 21, U32_W;
    AllocNatMem = 22, PTR_RW;
    V4InitNat = 23, PTR_RW;
    TableDmaCmd = 24, PTR_RW;
    InitIpv6ctTable = 25, PTR_RW;
    V4DelNat = 26, PTR_RW;
    PullMsg = 27, PTR_RW;
    GetNatOffset = 28, PTR_RW;
    RmAddDependency = 29, PTR_RW;
    RmDelDependency = 30, PTR_RW;
    GenerateFltEq = 31, PTR_RW;
    QueryIntfExtProps = 32, PTR_RW;
    QueryEpMapping = 33, Value(Read, 4);
    QueryRtTblIndex = 34, PTR_RW;
    WriteQmapid = 35, PTR_RW;
    MdfyFltRule = 36, PTR_RW;
    NotifyWanUpstreamRouteAdd = 37, PTR_RW;
    NotifyWanUpstreamRouteDel = 38, PTR_RW;
    NotifyWanEmbmsConnected = 39, PTR_RW;
    AddHdrProcCtx = 40, PTR_RW;
    DelHdrProcCtx = 41, PTR_RW;
    MdfyRtRule = 42, PTR_RW;
    AddRtRuleAfter = 43, PTR_RW;
    AddFltRuleAfter = 44, PTR_RW;
    GetHwVersion = 45, PTR_RW;
    AddRtRuleExt = 46, PTR_RW;
    AddVlanIface = 47, PTR_RW;
    DelVlanIface = 48, PTR_RW;
    AddL2tpVlanMapping = 49, PTR_RW;
    DelL2tpVlanMapping = 50, PTR_RW;
    NatModifyPdn = 51, PTR_RW;
    AllocNatTable = 52, PTR_RW;
    AllocIpv6ctTable = 53, PTR_RW;
    DelNatTable = 54, PTR_RW;
    DelIpv6ctTable = 55, PTR_RW;
    Cleanup = 56, NoArg;
    QueryWlanClient = 57, NoArg;
    GetVlanMode = 58, PTR_RW;
    AddBridgeVlanMapping = 59, Struct(ReadWrite);
    DelBridgeVlanMapping = 60, Struct(ReadWrite);
    OdlQueryAdaplEpInfo = 61, Struct(ReadWrite);
    OdlGetAggByteLimit = 62, Struct(ReadWrite);
    OdlQueryModemConfig = 63, Struct(ReadWrite);
    GsbConnect = 64, Struct(ReadWrite);
    GsbDisconnect = 65, Struct(ReadWrite);
    WigigFstSwitch = 66, Struct(ReadWrite);
    AddRtRuleV2 = 67, PTR_RW;
    AddRtRuleExtV2 = 68, PTR_RW;
    AddRtRuleAfterV2 = 69, PTR_RW;
    MdfyRtRuleV2 = 70, PTR_RW;
    AddFltRuleV2 = 71, PTR_RW;
    AddFltRuleAfterV2 = 72, PTR_RW;
    MdfyFltRuleV2 = 73, PTR_RW;
    FnrCounterAlloc = 74, Struct(ReadWrite);
    FnrCounterDealloc = 75, Value(ReadWrite, 4);
    FnrCounterQuery = 76, Struct(ReadWrite);
    SetFnrCounterInfo = 77, Struct(ReadWrite);
    GetNatInSramInfo = 78, Struct(ReadWrite);
    AppClockVote = 79, Value(ReadWrite, 4);
    PdnConfig = 80, Struct(ReadWrite);
    SetMacFlt = 81, Struct(ReadWrite);
    GetPeripheralEpInfo = 82, Struct(ReadWrite);
    AddUcActEntry = 83, Struct(ReadWrite);
    DelUcActEntry = 84, Value(ReadWrite, 2);
    SetSwFlt = 85, Struct(ReadWrite);
    GetHwFeatureSupport = 86, Value(ReadWrite, 4);
    SetPktThreshold = 87, Struct(ReadWrite);
    AddEogreMapping = 88, Struct(ReadWrite);
    DelEogreMapping = 89, Struct(ReadWrite);
    SetIpptSwFlt = 90, Struct(ReadWrite);
    FltMemPeripheralSetPrioHigh = 91, Value(ReadWrite, 4);
    AddMacsecMapping = 92, Struct(ReadWrite);
    DelMacsecMapping = 93, Struct(ReadWrite);
    QueryCachedDriverMsg = 94, NoArg;
    SetExtRouterMode = 95, Struct(ReadWrite);
    AddDelDscpPcpMapping = 96, Struct(ReadWrite);
    SendVlanMuxidMapping = 97, Struct(ReadWrite);
    SendTunnelTemplateInfo = 98, Struct(Write);
    QueryTunnelFeature = 99, Value(Write, 1);
}

impl IpaCmd {
    /// `NAT_DMA` is the older name of `TABLE_DMA_CMD`.
    pub const NAT_DMA: IpaCmd = IpaCmd::TableDmaCmd;

    /// The number the next command added to the ABI must use.
    pub const NEXT_UNUSED: u8 = 100;

    pub const fn nr(self) -> u8 {
        self as u8
    }

    /// The request number for this command, if it is fully determined
    /// by the declaration. Commands that take a structure by address
    /// need the structure size, see [`IpaCmd::request_sized`].
    pub const fn request(self) -> Option<u32> {
        match self.arg() {
            NoArg => Some(ioc(NoData, self.nr(), 0)),
            Ptr(dir) => Some(ioc(dir, self.nr(), size_of::<usize>())),
            Value(dir, size) => Some(ioc(dir, self.nr(), size)),
            Struct(_) => None,
        }
    }

    /// The request number for a command declared with a structure
    /// argument of `size` bytes. For every other form `size` is
    /// ignored.
    pub const fn request_sized(self, size: usize) -> u32 {
        match self.arg() {
            Struct(dir) => ioc(dir, self.nr(), size),
            _ => match self.request() {
                Some(req) => req,
                None => 0,
            },
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn codes_are_stable_and_dense() {
        assert_eq!(IpaCmd::ALL.len(), IpaCmd::NEXT_UNUSED as usize);
        for (i, cmd) in IpaCmd::ALL.iter().enumerate() {
            assert_eq!(cmd.nr() as usize, i);
            assert_eq!(IpaCmd::try_from(i as c_int), Ok(*cmd));
        }
        assert!(IpaCmd::try_from(IpaCmd::NEXT_UNUSED as c_int).is_err());
        assert_eq!(IpaCmd::NAT_DMA.nr(), 24);
    }

    #[test]
    fn request_numbers() {
        // _IOW(0xCF, 8, enum ipa_ip_type)
        assert_eq!(IpaCmd::CommitRt.request(), Some(0x4004_CF08));
        // _IO(0xCF, 6)
        assert_eq!(IpaCmd::CommitHdr.request(), Some(0x0000_CF06));
        // _IOR(0xCF, 33, uint32_t)
        assert_eq!(IpaCmd::QueryEpMapping.request(), Some(0x8004_CF21));
        // _IOWR(0xCF, 4, struct ipa_ioc_add_flt_rule *)
        let ptr = size_of::<usize>() as u32;
        assert_eq!(
            IpaCmd::AddFltRule.request(),
            Some(0xC000_CF04 | (ptr << 16))
        );
        assert_eq!(IpaCmd::FnrCounterAlloc.request(), None);
        assert_eq!(IpaCmd::FnrCounterAlloc.request_sized(12), 0xC00C_CF4A);
    }
}
