// SPDX-License-Identifier: Apache-2.0

use crate::{DhcpV6Duid, DhcpV6OptionCode};

/// What the client asks the server for.
#[derive(Debug, PartialEq, Eq, Clone, Copy, PartialOrd, Ord, Hash, Default)]
#[non_exhaustive]
pub enum DhcpV6Mode {
    /// Stateful address configuration via a single IA_NA.
    #[default]
    Managed,
    /// RFC 3736 stateless mode: only other configuration data via
    /// Information-request. The node got its addresses elsewhere
    /// (e.g. SLAAC).
    InfoOnly,
}

impl std::fmt::Display for DhcpV6Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Managed => write!(f, "managed"),
            Self::InfoOnly => write!(f, "info-only"),
        }
    }
}

/// Per-interface DHCPv6 profile. Built by the supervisor, then handed
/// to the device at construction; the FSM never mutates it.
#[derive(Debug, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub struct DhcpV6Config {
    pub iface_name: String,
    pub iface_index: u32,
    pub mode: DhcpV6Mode,
    pub duid: DhcpV6Duid,
    pub ia_id: u32,
    /// Offer OPTION_RAPID_COMMIT in Solicit and accept a direct Reply.
    pub rapid_commit: bool,
    pub user_class: Option<Vec<u8>>,
    pub vendor_class: Option<Vec<u8>>,
    /// Client FQDN handed to the server when set.
    pub hostname: Option<String>,
    pub request_opts: Vec<DhcpV6OptionCode>,
}

impl Default for DhcpV6Config {
    fn default() -> Self {
        Self {
            iface_name: String::new(),
            iface_index: 0,
            mode: DhcpV6Mode::default(),
            duid: DhcpV6Duid::Raw(Vec::new()),
            ia_id: 0,
            rapid_commit: false,
            user_class: None,
            vendor_class: None,
            hostname: None,
            request_opts: vec![
                DhcpV6OptionCode::DnsServers,
                DhcpV6OptionCode::DomainList,
                DhcpV6OptionCode::NtpServer,
                DhcpV6OptionCode::SipServers,
            ],
        }
    }
}

impl DhcpV6Config {
    pub fn new(iface_name: &str, iface_index: u32, mode: DhcpV6Mode) -> Self {
        Self {
            iface_name: iface_name.to_string(),
            iface_index,
            mode,
            ..Default::default()
        }
    }

    /// Set arbitrary DUID
    pub fn set_duid(&mut self, duid: DhcpV6Duid) -> &mut Self {
        self.duid = duid;
        self
    }

    /// IA identifier for the one IA_NA this profile manages.
    pub fn set_ia_id(&mut self, ia_id: u32) -> &mut Self {
        self.ia_id = ia_id;
        self
    }

    pub fn set_rapid_commit(&mut self, enabled: bool) -> &mut Self {
        self.rapid_commit = enabled;
        self
    }

    pub fn set_user_class(&mut self, user_class: &[u8]) -> &mut Self {
        self.user_class = Some(user_class.to_vec());
        self
    }

    pub fn set_vendor_class(&mut self, vendor_class: &[u8]) -> &mut Self {
        self.vendor_class = Some(vendor_class.to_vec());
        self
    }

    pub fn set_host_name(&mut self, hostname: &str) -> &mut Self {
        self.hostname = Some(hostname.to_string());
        self
    }

    pub fn request_extra_dhcp_opts(&mut self, opts: &[u16]) -> &mut Self {
        for opt in opts {
            self.request_opts.push((*opt).into());
        }
        self.request_opts.sort_unstable();
        self.request_opts.dedup();
        self
    }

    /// Specify arbitrary DHCP options to request.
    pub fn override_request_dhcp_opts(&mut self, opts: &[u16]) -> &mut Self {
        self.request_opts =
            opts.iter().map(|c| DhcpV6OptionCode::from(*c)).collect();
        self.request_opts.sort_unstable();
        self.request_opts.dedup();
        self
    }
}
