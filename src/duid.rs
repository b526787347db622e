// SPDX-License-Identifier: Apache-2.0

use std::path::Path;
use std::time::{Duration, SystemTime};

use crate::{DhcpError, ErrorContext, ErrorKind};

const DUID_TYPE_LLT: u16 = 1;
const DUID_TYPE_EN: u16 = 2;
const DUID_TYPE_LL: u16 = 3;
const DUID_TYPE_UUID: u16 = 4;

// RFC 8415 11.2.  DUID Based on Link-Layer Address Plus Time (DUID-LLT)
// Indicate the base time is midnight (UTC), January 1, 2000
const BASE_TIME: Duration = Duration::new(946684800, 0);

/// Client DHCP Unique Identifier.
///
/// RFC 8415, 11. DHCP Unique Identifier (DUID)
///   Clients and servers MUST treat DUIDs as opaque values and MUST
///   only compare DUIDs for equality.
///
/// Hence inbound DUIDs stay raw byte strings; the typed variants only
/// exist for generating our own identifier.
#[derive(Debug, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub enum DhcpV6Duid {
    /// DUID Based on Link-Layer Address Plus Time
    LinkLayerAddressPlusTime(DhcpV6DuidLinkLayerAddrPlusTime),
    /// DUID Assigned by Vendor Based on Enterprise Number
    EnterpriseNumber(DhcpV6DuidEnterpriseNumber),
    /// DUID Based on Link-Layer Address
    LinkLayerAddress(DhcpV6DuidLinkLayerAddr),
    /// DUID Based on Universally Unique Identifier
    Uuid(u128),
    /// Opaque byte array
    Raw(Vec<u8>),
}

impl Default for DhcpV6Duid {
    fn default() -> Self {
        let mut rand_data = [0u8; 16];
        rand::fill(&mut rand_data);
        rand_data[0] = 0;
        rand_data[1] = 255;
        Self::Raw(rand_data.to_vec())
    }
}

impl DhcpV6Duid {
    pub fn to_vec(&self) -> Vec<u8> {
        match self {
            Self::LinkLayerAddressPlusTime(v) => v.to_vec(),
            Self::EnterpriseNumber(v) => v.to_vec(),
            Self::LinkLayerAddress(v) => v.to_vec(),
            Self::Uuid(uuid) => {
                let mut ret = DUID_TYPE_UUID.to_be_bytes().to_vec();
                ret.extend_from_slice(&uuid.to_be_bytes());
                ret
            }
            Self::Raw(v) => v.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::Raw(Vec::new())
    }

    /// Read a previously stored DUID. `Ok(None)` when the file does
    /// not exist yet.
    pub fn load(path: &Path) -> Result<Option<Self>, DhcpError> {
        match std::fs::read(path) {
            Ok(raw) if raw.is_empty() => Ok(None),
            Ok(raw) => Ok(Some(Self::Raw(raw))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DhcpError::new(
                ErrorKind::Fatal,
                format!("Failed to read DUID file {}: {e}", path.display()),
            )),
        }
    }

    /// Persist the DUID atomically: write a sibling temp file, then
    /// rename over the target.
    pub fn store(&self, path: &Path) -> Result<(), DhcpError> {
        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, self.to_vec()).context(&format!(
            "Failed to write DUID file {}",
            tmp_path.display()
        ))?;
        std::fs::rename(&tmp_path, path).context(&format!(
            "Failed to rename DUID file {} to {}",
            tmp_path.display(),
            path.display()
        ))
    }

    /// Startup path: reuse the stored DUID when present, otherwise
    /// generate one (DUID-LLT when `use_llt`, DUID-LL when a MAC is
    /// known, random raw as last resort) and store it.
    ///
    /// An unwritable DUID location is fatal; the device must not be
    /// started without a stable identity.
    pub fn load_or_generate(
        path: &Path,
        hardware_type: u16,
        mac: Option<&[u8]>,
        use_llt: bool,
    ) -> Result<Self, DhcpError> {
        if let Some(duid) = Self::load(path)? {
            log::debug!("Loaded DUID from {}", path.display());
            return Ok(duid);
        }
        let duid = match (mac, use_llt) {
            (Some(mac), true) => Self::LinkLayerAddressPlusTime(
                DhcpV6DuidLinkLayerAddrPlusTime::new(hardware_type, mac),
            ),
            (Some(mac), false) => Self::LinkLayerAddress(
                DhcpV6DuidLinkLayerAddr::new(hardware_type, mac),
            ),
            (None, _) => Self::default(),
        };
        duid.store(path)?;
        log::info!("Generated new DUID, stored at {}", path.display());
        Ok(duid)
    }
}

// Type 1
#[derive(Debug, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub struct DhcpV6DuidLinkLayerAddrPlusTime {
    pub hardware_type: u16,
    pub time: u32,
    pub link_layer_address: Vec<u8>,
}

impl DhcpV6DuidLinkLayerAddrPlusTime {
    pub fn new(hardware_type: u16, link_layer_address: &[u8]) -> Self {
        let time: u32 = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .ok()
            .and_then(|s| s.checked_sub(BASE_TIME))
            .map(|t| t.as_secs())
            .map(|t| t as u32)
            .unwrap_or_default();

        Self {
            hardware_type,
            time,
            link_layer_address: link_layer_address.to_vec(),
        }
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut ret = DUID_TYPE_LLT.to_be_bytes().to_vec();
        ret.extend_from_slice(&self.hardware_type.to_be_bytes());
        ret.extend_from_slice(&self.time.to_be_bytes());
        ret.extend_from_slice(self.link_layer_address.as_slice());
        ret
    }
}

// Type 2
#[derive(Debug, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub struct DhcpV6DuidEnterpriseNumber {
    pub enterprise_number: u32,
    pub identifier: Vec<u8>,
}

impl DhcpV6DuidEnterpriseNumber {
    pub fn new(enterprise_number: u32, identifier: &[u8]) -> Self {
        Self {
            enterprise_number,
            identifier: identifier.to_vec(),
        }
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut ret = DUID_TYPE_EN.to_be_bytes().to_vec();
        ret.extend_from_slice(&self.enterprise_number.to_be_bytes());
        ret.extend_from_slice(self.identifier.as_slice());
        ret
    }
}

// Type 3
#[derive(Debug, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub struct DhcpV6DuidLinkLayerAddr {
    pub hardware_type: u16,
    pub link_layer_address: Vec<u8>,
}

impl DhcpV6DuidLinkLayerAddr {
    pub fn new(hardware_type: u16, link_layer_address: &[u8]) -> Self {
        Self {
            hardware_type,
            link_layer_address: link_layer_address.to_vec(),
        }
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut ret = DUID_TYPE_LL.to_be_bytes().to_vec();
        ret.extend_from_slice(&self.hardware_type.to_be_bytes());
        ret.extend_from_slice(self.link_layer_address.as_slice());
        ret
    }
}
