// SPDX-License-Identifier: Apache-2.0

use std::net::Ipv6Addr;

use crate::{
    msg::{DhcpV6Message, DhcpV6OutboundMessage},
    DhcpError,
};

/// The wire codec boundary. The FSM only ever sees parsed views; the
/// codec owns option TLV layout, DUID wire format and the
/// hundredths-of-a-second scaling of Elapsed Time.
///
/// Decode failures are reported as `ErrorKind::Malformed`; the
/// dispatcher drops such packets silently and counts them.
pub trait DhcpV6Codec: Send {
    fn decode(
        &self,
        payload: &[u8],
        src: Ipv6Addr,
    ) -> Result<DhcpV6Message, DhcpError>;

    fn encode(
        &self,
        msg: &DhcpV6OutboundMessage,
    ) -> Result<Vec<u8>, DhcpError>;
}
