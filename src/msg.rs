// SPDX-License-Identifier: Apache-2.0

use std::net::Ipv6Addr;

const MSG_TYPE_SOLICIT: u8 = 1;
const MSG_TYPE_ADVERTISE: u8 = 2;
const MSG_TYPE_REQUEST: u8 = 3;
const MSG_TYPE_CONFIRM: u8 = 4;
const MSG_TYPE_RENEW: u8 = 5;
const MSG_TYPE_REBIND: u8 = 6;
const MSG_TYPE_REPLY: u8 = 7;
const MSG_TYPE_RELEASE: u8 = 8;
const MSG_TYPE_DECLINE: u8 = 9;
const MSG_TYPE_RECONFIGURE: u8 = 10;
const MSG_TYPE_INFO_REQUEST: u8 = 11;

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[non_exhaustive]
pub enum DhcpV6MessageType {
    Solicit,
    Advertise,
    Request,
    Confirm,
    Renew,
    Rebind,
    Reply,
    Release,
    Decline,
    Reconfigure,
    InformationRequest,
    Unknown(u8),
}

impl DhcpV6MessageType {
    /// Whether a DHCPv6 server is allowed to send this message type to
    /// a client. Everything else inbound is dropped by the dispatcher.
    pub fn is_server_to_client(&self) -> bool {
        matches!(self, Self::Advertise | Self::Reply | Self::Reconfigure)
    }
}

impl From<u8> for DhcpV6MessageType {
    fn from(d: u8) -> Self {
        match d {
            MSG_TYPE_SOLICIT => Self::Solicit,
            MSG_TYPE_ADVERTISE => Self::Advertise,
            MSG_TYPE_REQUEST => Self::Request,
            MSG_TYPE_CONFIRM => Self::Confirm,
            MSG_TYPE_RENEW => Self::Renew,
            MSG_TYPE_REBIND => Self::Rebind,
            MSG_TYPE_REPLY => Self::Reply,
            MSG_TYPE_RELEASE => Self::Release,
            MSG_TYPE_DECLINE => Self::Decline,
            MSG_TYPE_RECONFIGURE => Self::Reconfigure,
            MSG_TYPE_INFO_REQUEST => Self::InformationRequest,
            _ => Self::Unknown(d),
        }
    }
}

impl From<DhcpV6MessageType> for u8 {
    fn from(v: DhcpV6MessageType) -> u8 {
        match v {
            DhcpV6MessageType::Solicit => MSG_TYPE_SOLICIT,
            DhcpV6MessageType::Advertise => MSG_TYPE_ADVERTISE,
            DhcpV6MessageType::Request => MSG_TYPE_REQUEST,
            DhcpV6MessageType::Confirm => MSG_TYPE_CONFIRM,
            DhcpV6MessageType::Renew => MSG_TYPE_RENEW,
            DhcpV6MessageType::Rebind => MSG_TYPE_REBIND,
            DhcpV6MessageType::Reply => MSG_TYPE_REPLY,
            DhcpV6MessageType::Release => MSG_TYPE_RELEASE,
            DhcpV6MessageType::Decline => MSG_TYPE_DECLINE,
            DhcpV6MessageType::Reconfigure => MSG_TYPE_RECONFIGURE,
            DhcpV6MessageType::InformationRequest => MSG_TYPE_INFO_REQUEST,
            DhcpV6MessageType::Unknown(d) => d,
        }
    }
}

impl std::fmt::Display for DhcpV6MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Solicit => write!(f, "solicit"),
            Self::Advertise => write!(f, "advertise"),
            Self::Request => write!(f, "request"),
            Self::Confirm => write!(f, "confirm"),
            Self::Renew => write!(f, "renew"),
            Self::Rebind => write!(f, "rebind"),
            Self::Reply => write!(f, "reply"),
            Self::Release => write!(f, "release"),
            Self::Decline => write!(f, "decline"),
            Self::Reconfigure => write!(f, "reconfigure"),
            Self::InformationRequest => write!(f, "information_request"),
            Self::Unknown(d) => write!(f, "unknown({d})"),
        }
    }
}

const STATUS_CODE_SUCCESS: u16 = 0;
const STATUS_CODE_UNSPEC_FAIL: u16 = 1;
const STATUS_CODE_NO_ADDRS_AVAIL: u16 = 2;
const STATUS_CODE_NO_BINDING: u16 = 3;
const STATUS_CODE_NOT_ON_LINK: u16 = 4;
const STATUS_CODE_USE_MULTICAST: u16 = 5;

#[derive(Debug, PartialEq, Eq, Clone, Copy, PartialOrd, Ord, Hash)]
pub enum DhcpV6StatusCode {
    Success,
    UnspecFail,
    NoAddrsAvail,
    NoBinding,
    NotOnLink,
    UseMulticast,
    Other(u16),
}

impl std::fmt::Display for DhcpV6StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::UnspecFail => write!(f, "unspec_fail"),
            Self::NoAddrsAvail => write!(f, "no_addrs_avail"),
            Self::NoBinding => write!(f, "no_binding"),
            Self::NotOnLink => write!(f, "not_on_link"),
            Self::UseMulticast => write!(f, "use_multicast"),
            Self::Other(d) => write!(f, "other({d})"),
        }
    }
}

impl From<u16> for DhcpV6StatusCode {
    fn from(d: u16) -> Self {
        match d {
            STATUS_CODE_SUCCESS => Self::Success,
            STATUS_CODE_UNSPEC_FAIL => Self::UnspecFail,
            STATUS_CODE_NO_ADDRS_AVAIL => Self::NoAddrsAvail,
            STATUS_CODE_NO_BINDING => Self::NoBinding,
            STATUS_CODE_NOT_ON_LINK => Self::NotOnLink,
            STATUS_CODE_USE_MULTICAST => Self::UseMulticast,
            _ => Self::Other(d),
        }
    }
}

impl From<DhcpV6StatusCode> for u16 {
    fn from(v: DhcpV6StatusCode) -> u16 {
        match v {
            DhcpV6StatusCode::Success => STATUS_CODE_SUCCESS,
            DhcpV6StatusCode::UnspecFail => STATUS_CODE_UNSPEC_FAIL,
            DhcpV6StatusCode::NoAddrsAvail => STATUS_CODE_NO_ADDRS_AVAIL,
            DhcpV6StatusCode::NoBinding => STATUS_CODE_NO_BINDING,
            DhcpV6StatusCode::NotOnLink => STATUS_CODE_NOT_ON_LINK,
            DhcpV6StatusCode::UseMulticast => STATUS_CODE_USE_MULTICAST,
            DhcpV6StatusCode::Other(d) => d,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct DhcpV6StatusOption {
    pub code: DhcpV6StatusCode,
    pub message: String,
}

impl DhcpV6StatusOption {
    pub fn is_success(&self) -> bool {
        self.code == DhcpV6StatusCode::Success
    }
}

const OPT_CODE_SIP_SERVERS: u16 = 22;
const OPT_CODE_DNS_SERVERS: u16 = 23;
const OPT_CODE_DOMAIN_LIST: u16 = 24;
const OPT_CODE_INFO_REFRESH_TIME: u16 = 32;
const OPT_CODE_FQDN: u16 = 39;
const OPT_CODE_NTP_SERVER: u16 = 56;

#[derive(Debug, PartialEq, Eq, Clone, Copy, PartialOrd, Ord, Hash)]
#[non_exhaustive]
pub enum DhcpV6OptionCode {
    SipServers,
    DnsServers,
    DomainList,
    InformationRefreshTime,
    Fqdn,
    NtpServer,
    Other(u16),
}

impl From<u16> for DhcpV6OptionCode {
    fn from(d: u16) -> Self {
        match d {
            OPT_CODE_SIP_SERVERS => Self::SipServers,
            OPT_CODE_DNS_SERVERS => Self::DnsServers,
            OPT_CODE_DOMAIN_LIST => Self::DomainList,
            OPT_CODE_INFO_REFRESH_TIME => Self::InformationRefreshTime,
            OPT_CODE_FQDN => Self::Fqdn,
            OPT_CODE_NTP_SERVER => Self::NtpServer,
            _ => Self::Other(d),
        }
    }
}

impl From<DhcpV6OptionCode> for u16 {
    fn from(v: DhcpV6OptionCode) -> u16 {
        match v {
            DhcpV6OptionCode::SipServers => OPT_CODE_SIP_SERVERS,
            DhcpV6OptionCode::DnsServers => OPT_CODE_DNS_SERVERS,
            DhcpV6OptionCode::DomainList => OPT_CODE_DOMAIN_LIST,
            DhcpV6OptionCode::InformationRefreshTime => {
                OPT_CODE_INFO_REFRESH_TIME
            }
            DhcpV6OptionCode::Fqdn => OPT_CODE_FQDN,
            DhcpV6OptionCode::NtpServer => OPT_CODE_NTP_SERVER,
            DhcpV6OptionCode::Other(d) => d,
        }
    }
}

impl std::fmt::Display for DhcpV6OptionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SipServers => write!(f, "sip_servers"),
            Self::DnsServers => write!(f, "dns_servers"),
            Self::DomainList => write!(f, "domain_list"),
            Self::InformationRefreshTime => {
                write!(f, "information_refresh_time")
            }
            Self::Fqdn => write!(f, "fqdn"),
            Self::NtpServer => write!(f, "ntp_server"),
            Self::Other(d) => write!(f, "other({d})"),
        }
    }
}

/// One leased address inside an IA_NA, with its lifetimes in seconds.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct DhcpV6IaAddress {
    pub addr: Ipv6Addr,
    pub preferred_life: u32,
    pub valid_life: u32,
}

/// Parsed IA_NA view of an inbound message.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct DhcpV6MessageIaNa {
    pub iaid: u32,
    pub t1: u32,
    pub t2: u32,
    pub addrs: Vec<DhcpV6IaAddress>,
    pub status: Option<DhcpV6StatusOption>,
}

/// Inbound server message after the codec has done the TLV work.
/// The FSM never touches wire bytes; this is the view it dispatches
/// on.
#[derive(Debug, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub struct DhcpV6Message {
    pub msg_type: DhcpV6MessageType,
    pub xid: [u8; 3],
    pub src: Ipv6Addr,
    pub client_duid: Option<Vec<u8>>,
    pub server_duid: Option<Vec<u8>>,
    /// Server preference 0..255; absent means 0 per RFC 8415.
    pub preference: Option<u8>,
    pub rapid_commit: bool,
    /// Top-level status code option.
    pub status: Option<DhcpV6StatusOption>,
    pub ia_na: Option<DhcpV6MessageIaNa>,
    pub server_unicast: Option<Ipv6Addr>,
    pub dns_servers: Vec<Ipv6Addr>,
    pub dns_search: Vec<String>,
    pub ntp_servers: Vec<Ipv6Addr>,
    pub sip_servers: Vec<Ipv6Addr>,
    pub info_refresh_time: Option<u32>,
}

impl DhcpV6Message {
    pub fn new(
        msg_type: DhcpV6MessageType,
        xid: [u8; 3],
        src: Ipv6Addr,
    ) -> Self {
        Self {
            msg_type,
            xid,
            src,
            client_duid: None,
            server_duid: None,
            preference: None,
            rapid_commit: false,
            status: None,
            ia_na: None,
            server_unicast: None,
            dns_servers: Vec::new(),
            dns_search: Vec::new(),
            ntp_servers: Vec::new(),
            sip_servers: Vec::new(),
            info_refresh_time: None,
        }
    }

    /// Effective preference for server selection.
    pub fn preference(&self) -> u8 {
        self.preference.unwrap_or(0)
    }

    /// The message-level or IA-level status, whichever signals a
    /// failure first. Missing status options mean success.
    pub fn effective_status(&self) -> DhcpV6StatusCode {
        if let Some(status) = self.status.as_ref() {
            if !status.is_success() {
                return status.code;
            }
        }
        if let Some(status) =
            self.ia_na.as_ref().and_then(|ia| ia.status.as_ref())
        {
            if !status.is_success() {
                return status.code;
            }
        }
        DhcpV6StatusCode::Success
    }

    /// Whether the message advertises at least one address the client
    /// could commit.
    pub fn has_usable_ia_na(&self) -> bool {
        self.ia_na
            .as_ref()
            .map(|ia| ia.addrs.iter().any(|a| a.valid_life > 0))
            .unwrap_or(false)
    }
}

/// Outbound message request handed to the codec. The codec appends
/// Elapsed Time, Client Identifier, Server Identifier, IA_NA, ORO and
/// User/Vendor Class options from these fields.
#[derive(Debug, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub struct DhcpV6OutboundMessage {
    pub msg_type: DhcpV6MessageType,
    pub xid: [u8; 3],
    /// Hundredths of a second since the first transmission of this
    /// transaction, clamped to 0xFFFF. Zero on the first send.
    pub elapsed_time: u16,
    pub client_duid: Vec<u8>,
    pub server_duid: Option<Vec<u8>>,
    /// IA_NA content; `None` for Information-request.
    pub ia_na: Option<DhcpV6MessageIaNa>,
    pub oro: Vec<DhcpV6OptionCode>,
    pub rapid_commit: bool,
    pub user_class: Option<Vec<u8>>,
    pub vendor_class: Option<Vec<u8>>,
    pub fqdn: Option<String>,
}
