// SPDX-License-Identifier: Apache-2.0

mod applier;
mod client;
mod client_async;
mod codec;
mod config;
mod dispatch;
mod duid;
mod error;
mod event;
mod fsm;
mod lease;
mod msg;
mod retrans;
mod select;
mod state;
mod time;
mod transport;

#[cfg(test)]
mod fsm_tests;

pub use crate::applier::{DhcpV6ApplyOutcome, DhcpV6LeaseApplier};
pub use crate::client::DhcpV6Client;
pub use crate::client_async::DhcpV6ClientAsync;
pub use crate::codec::DhcpV6Codec;
pub use crate::config::{DhcpV6Config, DhcpV6Mode};
pub use crate::dispatch::{DhcpV6PacketDisposition, DhcpV6Stats};
pub use crate::duid::{
    DhcpV6Duid, DhcpV6DuidEnterpriseNumber, DhcpV6DuidLinkLayerAddr,
    DhcpV6DuidLinkLayerAddrPlusTime,
};
pub use crate::error::{DhcpError, ErrorKind};
pub(crate) use crate::error::ErrorContext;
pub use crate::event::{
    DhcpV6Event, DhcpV6IoEvent, DhcpV6LeaseEvent, DhcpV6LeaseLostReason,
};
pub use crate::fsm::DhcpV6Device;
pub use crate::lease::{DhcpV6Lease, DhcpV6LeaseState};
pub use crate::msg::{
    DhcpV6IaAddress, DhcpV6Message, DhcpV6MessageIaNa, DhcpV6MessageType,
    DhcpV6OptionCode, DhcpV6OutboundMessage, DhcpV6StatusCode,
    DhcpV6StatusOption,
};
pub use crate::retrans::{
    DhcpV6RetransParams, DhcpV6Transaction, DhcpV6TransactionKind,
};
pub use crate::select::DhcpV6AdvertiseBuffer;
pub use crate::state::DhcpV6State;
pub use crate::transport::DhcpV6Transport;
