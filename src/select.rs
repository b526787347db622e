// SPDX-License-Identifier: Apache-2.0

use crate::DhcpV6Lease;

/// Advertises collected while SELECTING, at most one per server.
///
/// A newer Advertise from a server already in the buffer replaces the
/// stored candidate but keeps its arrival slot, so the
/// earliest-arrival tie-break is decided by when the server first
/// answered. Servers that NAKed or were declined stay excluded for
/// the rest of the discovery round.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct DhcpV6AdvertiseBuffer {
    entries: Vec<DhcpV6Lease>,
    excluded: Vec<Vec<u8>>,
}

impl DhcpV6AdvertiseBuffer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn insert(&mut self, candidate: DhcpV6Lease) {
        if self.is_excluded(&candidate.server_duid) {
            log::debug!(
                "Ignoring Advertise from excluded server {:?}",
                candidate.server_duid
            );
            return;
        }
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.server_duid == candidate.server_duid)
        {
            *entry = candidate;
        } else {
            self.entries.push(candidate);
        }
    }

    /// Bar a server from this discovery round and drop its entry.
    pub(crate) fn exclude(&mut self, server_duid: &[u8]) {
        self.entries.retain(|e| e.server_duid != server_duid);
        if !self.is_excluded(server_duid) {
            self.excluded.push(server_duid.to_vec());
        }
    }

    pub(crate) fn is_excluded(&self, server_duid: &[u8]) -> bool {
        self.excluded.iter().any(|d| d == server_duid)
    }

    /// Remove and return the best candidate: highest preference,
    /// ties broken by earliest arrival.
    pub(crate) fn pick_best(&mut self) -> Option<DhcpV6Lease> {
        let best_index = self
            .entries
            .iter()
            .enumerate()
            .max_by(|(ai, a), (bi, b)| {
                a.preference
                    .cmp(&b.preference)
                    // max_by keeps the later element on ties, so an
                    // earlier arrival must compare greater.
                    .then(bi.cmp(ai))
            })
            .map(|(i, _)| i)?;
        Some(self.entries.remove(best_index))
    }
}
