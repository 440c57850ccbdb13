// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! IPA client endpoints.
//!
//! Every endpoint is either a producer (it feeds packets into the
//! IPA) or a consumer (the IPA delivers packets to it). The ABI
//! encodes this as the parity of the discriminant: producers are
//! even, consumers are odd. Beyond direction, each endpoint belongs
//! to one owning subsystem and carries a small set of capability
//! tags. The classification predicates below are all derived from
//! those three attributes.

use bitflags::bitflags;
use core::fmt;
use core::fmt::Display;
use core::str::FromStr;
use serde::Deserialize;
use serde::Serialize;

/// Direction of packet flow relative to the IPA.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum ClientDir {
    /// Feeds packets into the IPA.
    Prod,
    /// Receives packets from the IPA.
    Cons,
}

/// The peripheral or processor that owns an endpoint.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Subsystem {
    Hsic,
    Wlan,
    Usb,
    A2,
    Apps,
    Odu,
    Odl,
    Mhi,
    MhiPrime,
    MemcpyDma,
    Ethernet,
    Aqc,
    Rtk,
    Q6,
    Test,
    Dummy,
    Wigig,
    Qdss,
    Tput,
}

bitflags! {
    /// Capability tags carried by an endpoint.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct ClientTags: u8 {
        /// An application-processor data path (not a command pipe).
        const APPS_DATA = 1 << 0;
        /// The default WAN data path into the application processor.
        const WAN = 1 << 1;
        /// The low-latency WAN path.
        const LOW_LAT = 1 << 2;
        /// A modem decompression ("zip") pipe.
        const ZIP = 1 << 3;
        /// The modem's NLO ethernet downlink.
        const NLO_ETH = 1 << 4;
    }
}

macro_rules! clients {
    ($(
        $variant:ident = $raw:literal, $name:literal, $sub:ident
        $(, $tag:ident)*;
    )*) => {
        /// An IPA client endpoint, as numbered by the driver ABI.
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
        #[repr(u32)]
        pub enum Client {
            $($variant = $raw,)*
        }

        impl Client {
            /// Every endpoint, in discriminant order.
            pub const ALL: &'static [Client] = &[$(Client::$variant,)*];

            pub fn from_raw(raw: u32) -> Option<Self> {
                match raw {
                    $($raw => Some(Client::$variant),)*
                    _ => None,
                }
            }

            /// The ABI name, without the `IPA_CLIENT_` prefix.
            pub const fn name(self) -> &'static str {
                match self {
                    $(Client::$variant => $name,)*
                }
            }

            pub const fn subsystem(self) -> Subsystem {
                match self {
                    $(Client::$variant => Subsystem::$sub,)*
                }
            }

            pub const fn tags(self) -> ClientTags {
                match self {
                    $(Client::$variant => {
                        ClientTags::empty()$(.union(ClientTags::$tag))*
                    })*
                }
            }
        }
    };
}

clients! {
    Hsic1Prod = 0, "HSIC1_PROD", Hsic;
    Hsic1Cons = 1, "HSIC1_CONS", Hsic;
    Hsic2Prod = 2, "HSIC2_PROD", Hsic;
    Hsic2Cons = 3, "HSIC2_CONS", Hsic;
    Hsic3Prod = 4, "HSIC3_PROD", Hsic;
    Hsic3Cons = 5, "HSIC3_CONS", Hsic;
    Hsic4Prod = 6, "HSIC4_PROD", Hsic;
    Hsic4Cons = 7, "HSIC4_CONS", Hsic;
    Hsic5Prod = 8, "HSIC5_PROD", Hsic;
    Hsic5Cons = 9, "HSIC5_CONS", Hsic;
    Wlan1Prod = 10, "WLAN1_PROD", Wlan;
    Wlan1Cons = 11, "WLAN1_CONS", Wlan;
    A5WlanAmpduProd = 12, "A5_WLAN_AMPDU_PROD", Wlan;
    Wlan2Cons = 13, "WLAN2_CONS", Wlan;
    Wlan3Prod = 14, "WLAN3_PROD", Wlan;
    Wlan3Cons = 15, "WLAN3_CONS", Wlan;
    Wlan2Prod1 = 16, "WLAN2_PROD1", Wlan;
    Wlan4Cons = 17, "WLAN4_CONS", Wlan;
    UsbProd = 18, "USB_PROD", Usb;
    UsbCons = 19, "USB_CONS", Usb;
    Usb2Prod = 20, "USB2_PROD", Usb;
    Usb2Cons = 21, "USB2_CONS", Usb;
    Usb3Prod = 22, "USB3_PROD", Usb;
    Usb3Cons = 23, "USB3_CONS", Usb;
    Usb4Prod = 24, "USB4_PROD", Usb;
    Usb4Cons = 25, "USB4_CONS", Usb;
    UcUsbProd = 26, "UC_USB_PROD", Usb;
    UsbDplCons = 27, "USB_DPL_CONS", Usb;
    A2EmbeddedProd = 28, "A2_EMBEDDED_PROD", A2;
    A2EmbeddedCons = 29, "A2_EMBEDDED_CONS", A2;
    A2TetheredProd = 30, "A2_TETHERED_PROD", A2;
    A2TetheredCons = 31, "A2_TETHERED_CONS", A2;
    AppsLanProd = 32, "APPS_LAN_PROD", Apps, APPS_DATA;
    AppsLanCons = 33, "APPS_LAN_CONS", Apps, APPS_DATA;
    AppsWanProd = 34, "APPS_WAN_PROD", Apps, APPS_DATA;
    AppsWanCons = 35, "APPS_WAN_CONS", Apps, APPS_DATA, WAN;
    AppsCmdProd = 36, "APPS_CMD_PROD", Apps;
    A5LanWanCons = 37, "A5_LAN_WAN_CONS", Apps;
    OduProd = 38, "ODU_PROD", Odu;
    OduEmbCons = 39, "ODU_EMB_CONS", Odu;
    Wlan3Prod1 = 40, "WLAN3_PROD1", Wlan;
    OduTethCons = 41, "ODU_TETH_CONS", Odu;
    MhiProd = 42, "MHI_PROD", Mhi;
    MhiCons = 43, "MHI_CONS", Mhi;
    MemcpyDmaSyncProd = 44, "MEMCPY_DMA_SYNC_PROD", MemcpyDma;
    MemcpyDmaSyncCons = 45, "MEMCPY_DMA_SYNC_CONS", MemcpyDma;
    MemcpyDmaAsyncProd = 46, "MEMCPY_DMA_ASYNC_PROD", MemcpyDma;
    MemcpyDmaAsyncCons = 47, "MEMCPY_DMA_ASYNC_CONS", MemcpyDma;
    EthernetProd = 48, "ETHERNET_PROD", Ethernet;
    EthernetCons = 49, "ETHERNET_CONS", Ethernet;
    Q6LanProd = 50, "Q6_LAN_PROD", Q6;
    Q6LanCons = 51, "Q6_LAN_CONS", Q6;
    Q6WanProd = 52, "Q6_WAN_PROD", Q6;
    Q6WanCons = 53, "Q6_WAN_CONS", Q6;
    Q6CmdProd = 54, "Q6_CMD_PROD", Q6;
    Q6DunCons = 55, "Q6_DUN_CONS", Q6;
    Q6DecompProd = 56, "Q6_DECOMP_PROD", Q6, ZIP;
    Q6DecompCons = 57, "Q6_DECOMP_CONS", Q6, ZIP;
    Q6Decomp2Prod = 58, "Q6_DECOMP2_PROD", Q6, ZIP;
    Q6Decomp2Cons = 59, "Q6_DECOMP2_CONS", Q6, ZIP;
    Q6LteWifiAggrCons = 61, "Q6_LTE_WIFI_AGGR_CONS", Q6;
    TestProd = 62, "TEST_PROD", Test;
    TestCons = 63, "TEST_CONS", Test;
    Test1Prod = 64, "TEST1_PROD", Test;
    Test1Cons = 65, "TEST1_CONS", Test;
    Test2Prod = 66, "TEST2_PROD", Test;
    Test2Cons = 67, "TEST2_CONS", Test;
    Test3Prod = 68, "TEST3_PROD", Test;
    Test3Cons = 69, "TEST3_CONS", Test;
    Test4Prod = 70, "TEST4_PROD", Test;
    Test4Cons = 71, "TEST4_CONS", Test;
    DummyCons = 73, "DUMMY_CONS", Dummy;
    Q6DlNloDataProd = 74, "Q6_DL_NLO_DATA_PROD", Q6;
    Q6UlNloDataCons = 75, "Q6_UL_NLO_DATA_CONS", Q6;
    Q6UlNloAckCons = 77, "Q6_UL_NLO_ACK_CONS", Q6;
    Q6QbapStatusCons = 79, "Q6_QBAP_STATUS_CONS", Q6;
    MhiDplCons = 81, "MHI_DPL_CONS", Mhi;
    OdlDplCons = 83, "ODL_DPL_CONS", Odl;
    Q6AudioDmaMhiProd = 84, "Q6_AUDIO_DMA_MHI_PROD", Q6;
    Q6AudioDmaMhiCons = 85, "Q6_AUDIO_DMA_MHI_CONS", Q6;
    WigigProd = 86, "WIGIG_PROD", Wigig;
    Wigig1Cons = 87, "WIGIG1_CONS", Wigig;
    Wigig2Cons = 89, "WIGIG2_CONS", Wigig;
    Wigig3Cons = 91, "WIGIG3_CONS", Wigig;
    Wigig4Cons = 93, "WIGIG4_CONS", Wigig;
    AppsWanCoalCons = 95, "APPS_WAN_COAL_CONS", Apps, APPS_DATA, WAN;
    MhiPrimeTethProd = 96, "MHI_PRIME_TETH_PROD", MhiPrime;
    MhiPrimeTethCons = 97, "MHI_PRIME_TETH_CONS", MhiPrime;
    MhiPrimeRmnetProd = 98, "MHI_PRIME_RMNET_PROD", MhiPrime;
    MhiPrimeRmnetCons = 99, "MHI_PRIME_RMNET_CONS", MhiPrime;
    MhiPrimeDplProd = 100, "MHI_PRIME_DPL_PROD", MhiPrime;
    MhiCoalCons = 101, "MHI_COAL_CONS", Mhi;
    AqcEthernetProd = 102, "AQC_ETHERNET_PROD", Aqc;
    AqcEthernetCons = 103, "AQC_ETHERNET_CONS", Aqc;
    AppsWanLowLatProd = 104, "APPS_WAN_LOW_LAT_PROD", Apps, APPS_DATA;
    AppsWanLowLatCons = 105, "APPS_WAN_LOW_LAT_CONS", Apps, APPS_DATA, LOW_LAT;
    QdssProd = 106, "QDSS_PROD", Qdss;
    MhiQdssCons = 107, "MHI_QDSS_CONS", Mhi;
    RtkEthernetProd = 108, "RTK_ETHERNET_PROD", Rtk;
    RtkEthernetCons = 109, "RTK_ETHERNET_CONS", Rtk;
    MhiLowLatProd = 110, "MHI_LOW_LAT_PROD", Mhi;
    MhiLowLatCons = 111, "MHI_LOW_LAT_CONS", Mhi;
    Mhi2Prod = 112, "MHI2_PROD", Mhi;
    Mhi2Cons = 113, "MHI2_CONS", Mhi;
    Q6Cv2xProd = 114, "Q6_CV2X_PROD", Q6;
    Q6Cv2xCons = 115, "Q6_CV2X_CONS", Q6;
    Ethernet2Prod = 116, "ETHERNET2_PROD", Ethernet;
    Ethernet2Cons = 117, "ETHERNET2_CONS", Ethernet;
    Wlan2Cons1 = 119, "WLAN2_CONS1", Wlan;
    AppsWanLowLatDataProd = 120, "APPS_WAN_LOW_LAT_DATA_PROD", Apps, APPS_DATA;
    AppsWanLowLatDataCons = 121, "APPS_WAN_LOW_LAT_DATA_CONS", Apps, APPS_DATA;
    Q6DlNloLlDataProd = 122, "Q6_DL_NLO_LL_DATA_PROD", Q6;
    TputCons = 125, "TPUT_CONS", Tput;
    Q6DlNloEthDataProd = 126, "Q6_DL_NLO_ETH_DATA_PROD", Q6, NLO_ETH;
    AppsWanEthProd = 128, "APPS_WAN_ETH_PROD", Apps, APPS_DATA;
}

impl Client {
    /// `APPS_LAN_WAN_PROD` shares its number with `APPS_WAN_PROD`.
    pub const APPS_LAN_WAN_PROD: Client = Client::AppsWanProd;
    /// `WLAN2_PROD` shares its number with `A5_WLAN_AMPDU_PROD`.
    pub const WLAN2_PROD: Client = Client::A5WlanAmpduProd;

    /// One past the largest client number.
    pub const MAX: u32 = Client::AppsWanEthProd as u32 + 1;

    pub const fn to_raw(self) -> u32 {
        self as u32
    }

    pub const fn dir(self) -> ClientDir {
        if self.to_raw() % 2 == 0 { ClientDir::Prod } else { ClientDir::Cons }
    }

    pub const fn is_prod(self) -> bool {
        matches!(self.dir(), ClientDir::Prod)
    }

    pub const fn is_cons(self) -> bool {
        matches!(self.dir(), ClientDir::Cons)
    }

    fn is(self, sub: Subsystem, dir: ClientDir) -> bool {
        self.subsystem() == sub && self.dir() == dir
    }

    fn tagged(self, tag: ClientTags, dir: ClientDir) -> bool {
        self.tags().contains(tag) && self.dir() == dir
    }

    pub fn is_apps_cons(self) -> bool {
        self.tagged(ClientTags::APPS_DATA, ClientDir::Cons)
    }

    pub fn is_apps_prod(self) -> bool {
        self.tagged(ClientTags::APPS_DATA, ClientDir::Prod)
    }

    pub fn is_usb_cons(self) -> bool {
        self.is(Subsystem::Usb, ClientDir::Cons)
    }

    pub fn is_wan_cons(self) -> bool {
        self.tagged(ClientTags::WAN, ClientDir::Cons)
    }

    pub fn is_low_lat_cons(self) -> bool {
        self.tagged(ClientTags::LOW_LAT, ClientDir::Cons)
    }

    pub fn is_wlan_cons(self) -> bool {
        self.is(Subsystem::Wlan, ClientDir::Cons)
    }

    pub fn is_odu_cons(self) -> bool {
        self.is(Subsystem::Odu, ClientDir::Cons)
    }

    pub fn is_q6_cons(self) -> bool {
        self.is(Subsystem::Q6, ClientDir::Cons)
    }

    pub fn is_q6_prod(self) -> bool {
        self.is(Subsystem::Q6, ClientDir::Prod)
    }

    pub fn is_q6_zip_cons(self) -> bool {
        self.is_q6_cons() && self.tags().contains(ClientTags::ZIP)
    }

    pub fn is_q6_zip_prod(self) -> bool {
        self.is_q6_prod() && self.tags().contains(ClientTags::ZIP)
    }

    pub fn is_q6_non_zip_cons(self) -> bool {
        self.is_q6_cons() && !self.tags().contains(ClientTags::ZIP)
    }

    /// The NLO ethernet downlink is neither zip nor non-zip.
    pub fn is_q6_non_zip_prod(self) -> bool {
        self.is_q6_prod()
            && !self.tags().intersects(ClientTags::ZIP | ClientTags::NLO_ETH)
    }

    pub fn is_memcpy_dma_cons(self) -> bool {
        self.is(Subsystem::MemcpyDma, ClientDir::Cons)
    }

    pub fn is_memcpy_dma_prod(self) -> bool {
        self.is(Subsystem::MemcpyDma, ClientDir::Prod)
    }

    /// MHI endpoints, excluding the separate MHI-prime set.
    pub fn is_mhi(self) -> bool {
        self.subsystem() == Subsystem::Mhi
    }

    pub fn is_test_prod(self) -> bool {
        self.is(Subsystem::Test, ClientDir::Prod)
    }

    pub fn is_test_cons(self) -> bool {
        self.is(Subsystem::Test, ClientDir::Cons)
    }

    pub fn is_test(self) -> bool {
        self.subsystem() == Subsystem::Test
    }
}

impl FromStr for Client {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let up = s.to_ascii_uppercase();
        let name = up.strip_prefix("IPA_CLIENT_").unwrap_or(&up);

        match name {
            "APPS_LAN_WAN_PROD" => return Ok(Client::APPS_LAN_WAN_PROD),
            "WLAN2_PROD" => return Ok(Client::WLAN2_PROD),
            _ => (),
        }

        Client::ALL
            .iter()
            .copied()
            .find(|c| c.name() == name)
            .ok_or_else(|| format!("unknown client: {s}"))
    }
}

impl Display for Client {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use Client::*;

    fn members(pred: fn(Client) -> bool) -> Vec<Client> {
        Client::ALL.iter().copied().filter(|c| pred(*c)).collect()
    }

    #[test]
    fn discriminants_are_unique_and_ordered() {
        for pair in Client::ALL.windows(2) {
            assert!(pair[0].to_raw() < pair[1].to_raw());
        }
        for c in Client::ALL {
            assert_eq!(Client::from_raw(c.to_raw()), Some(*c));
        }
        assert_eq!(Client::from_raw(60), None);
        assert_eq!(Client::from_raw(Client::MAX), None);
        assert_eq!(Client::MAX, 129);
    }

    #[test]
    fn parity_is_direction() {
        assert!(AppsLanProd.is_prod());
        assert!(AppsLanCons.is_cons());
        assert!(Wlan3Prod1.is_prod());
        assert!(TputCons.is_cons());
        assert!(AppsWanEthProd.is_prod());
    }

    #[test]
    fn aliases() {
        assert_eq!(Client::APPS_LAN_WAN_PROD.to_raw(), 34);
        assert_eq!(Client::WLAN2_PROD.to_raw(), 12);
        assert_eq!("apps_lan_wan_prod".parse::<Client>().unwrap(), AppsWanProd);
        assert_eq!(
            "IPA_CLIENT_WLAN2_PROD".parse::<Client>().unwrap(),
            A5WlanAmpduProd
        );
        assert_eq!("q6_lan_cons".parse::<Client>().unwrap(), Q6LanCons);
        assert!("nope".parse::<Client>().is_err());
    }

    #[test]
    fn apps_membership() {
        assert_eq!(
            members(Client::is_apps_cons),
            vec![
                AppsLanCons,
                AppsWanCons,
                AppsWanCoalCons,
                AppsWanLowLatCons,
                AppsWanLowLatDataCons,
            ]
        );
        assert_eq!(
            members(Client::is_apps_prod),
            vec![
                AppsLanProd,
                AppsWanProd,
                AppsWanLowLatProd,
                AppsWanLowLatDataProd,
                AppsWanEthProd,
            ]
        );
        assert_eq!(
            members(Client::is_wan_cons),
            vec![AppsWanCons, AppsWanCoalCons]
        );
        assert_eq!(members(Client::is_low_lat_cons), vec![AppsWanLowLatCons]);
    }

    #[test]
    fn peripheral_membership() {
        assert_eq!(
            members(Client::is_usb_cons),
            vec![UsbCons, Usb2Cons, Usb3Cons, Usb4Cons, UsbDplCons]
        );
        assert_eq!(
            members(Client::is_wlan_cons),
            vec![Wlan1Cons, Wlan2Cons, Wlan3Cons, Wlan4Cons, Wlan2Cons1]
        );
        assert_eq!(members(Client::is_odu_cons), vec![OduEmbCons, OduTethCons]);
        assert_eq!(
            members(Client::is_memcpy_dma_cons),
            vec![MemcpyDmaSyncCons, MemcpyDmaAsyncCons]
        );
        assert_eq!(
            members(Client::is_memcpy_dma_prod),
            vec![MemcpyDmaSyncProd, MemcpyDmaAsyncProd]
        );
        assert_eq!(
            members(Client::is_mhi),
            vec![
                MhiProd,
                MhiCons,
                MhiDplCons,
                MhiCoalCons,
                MhiQdssCons,
                MhiLowLatProd,
                MhiLowLatCons,
                Mhi2Prod,
                Mhi2Cons,
            ]
        );
        assert_eq!(members(Client::is_test).len(), 10);
        assert_eq!(
            members(Client::is_test_prod),
            vec![TestProd, Test1Prod, Test2Prod, Test3Prod, Test4Prod]
        );
    }

    #[test]
    fn q6_membership() {
        assert_eq!(
            members(Client::is_q6_cons),
            vec![
                Q6LanCons,
                Q6WanCons,
                Q6DunCons,
                Q6DecompCons,
                Q6Decomp2Cons,
                Q6LteWifiAggrCons,
                Q6UlNloDataCons,
                Q6UlNloAckCons,
                Q6QbapStatusCons,
                Q6AudioDmaMhiCons,
                Q6Cv2xCons,
            ]
        );
        assert_eq!(
            members(Client::is_q6_prod),
            vec![
                Q6LanProd,
                Q6WanProd,
                Q6CmdProd,
                Q6DecompProd,
                Q6Decomp2Prod,
                Q6DlNloDataProd,
                Q6AudioDmaMhiProd,
                Q6Cv2xProd,
                Q6DlNloLlDataProd,
                Q6DlNloEthDataProd,
            ]
        );
        assert_eq!(
            members(Client::is_q6_non_zip_cons),
            vec![
                Q6LanCons,
                Q6WanCons,
                Q6DunCons,
                Q6LteWifiAggrCons,
                Q6UlNloDataCons,
                Q6UlNloAckCons,
                Q6QbapStatusCons,
                Q6AudioDmaMhiCons,
                Q6Cv2xCons,
            ]
        );
        assert_eq!(
            members(Client::is_q6_non_zip_prod),
            vec![
                Q6LanProd,
                Q6WanProd,
                Q6CmdProd,
                Q6DlNloDataProd,
                Q6AudioDmaMhiProd,
                Q6Cv2xProd,
                Q6DlNloLlDataProd,
            ]
        );
        assert_eq!(
            members(Client::is_q6_zip_cons),
            vec![Q6DecompCons, Q6Decomp2Cons]
        );
        assert_eq!(
            members(Client::is_q6_zip_prod),
            vec![Q6DecompProd, Q6Decomp2Prod]
        );
    }
}
