// SPDX-License-Identifier: Apache-2.0

//! Mock codec, transport and applier used to drive a [DhcpV6Device]
//! without sockets or a running network. The codec serializes both
//! directions through one toy wire format so every byte the FSM sends
//! can be decoded back and inspected.

use std::collections::{HashMap, VecDeque};
use std::net::Ipv6Addr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::{
    msg::{DhcpV6MessageIaNa, DhcpV6StatusOption},
    DhcpError, DhcpV6ApplyOutcome, DhcpV6Codec, DhcpV6Config, DhcpV6Device,
    DhcpV6Duid, DhcpV6IaAddress, DhcpV6Lease, DhcpV6LeaseApplier,
    DhcpV6LeaseEvent, DhcpV6Message, DhcpV6MessageType, DhcpV6Mode,
    DhcpV6OutboundMessage, DhcpV6PacketDisposition, DhcpV6StatusCode,
    DhcpV6Transport, ErrorKind,
};

pub(crate) const IFACE: &str = "dhcp6cli";
pub(crate) const IFINDEX: u32 = 7;
pub(crate) const IA_ID: u32 = 0x0c0c_0c0c;
pub(crate) const CLIENT_DUID: &[u8] =
    &[0x00, 0x03, 0x00, 0x01, 0x02, 0x42, 0xac, 0x11, 0x00, 0x02];
pub(crate) const SRV1_DUID: &[u8] = b"test-server-one";
pub(crate) const SRV2_DUID: &[u8] = b"test-server-two";
pub(crate) const SRV_LINK_LOCAL: &str = "fe80::53";
pub(crate) const MULTICAST: &str = "ff02::1:2";

const WIRE_MAGIC: u8 = 0x6d;

/// The decoded shape of a packet the device transmitted.
#[derive(Debug, PartialEq, Eq, Clone)]
pub(crate) struct WireMsg {
    pub(crate) msg_type: DhcpV6MessageType,
    pub(crate) xid: [u8; 3],
    pub(crate) elapsed: u16,
    pub(crate) client_duid: Option<Vec<u8>>,
    pub(crate) server_duid: Option<Vec<u8>>,
    pub(crate) preference: Option<u8>,
    pub(crate) rapid_commit: bool,
    pub(crate) status: Option<(u16, String)>,
    pub(crate) ia_na: Option<WireIaNa>,
    pub(crate) server_unicast: Option<Ipv6Addr>,
    pub(crate) dns_servers: Vec<Ipv6Addr>,
    pub(crate) info_refresh_time: Option<u32>,
}

#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub(crate) struct WireIaNa {
    pub(crate) iaid: u32,
    pub(crate) t1: u32,
    pub(crate) t2: u32,
    pub(crate) addrs: Vec<(Ipv6Addr, u32, u32)>,
    pub(crate) status: Option<(u16, String)>,
}

struct Writer(Vec<u8>);

impl Writer {
    fn new() -> Self {
        Self(vec![WIRE_MAGIC])
    }

    fn u8(&mut self, v: u8) {
        self.0.push(v);
    }

    fn u16(&mut self, v: u16) {
        self.0.extend_from_slice(&v.to_be_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.0.extend_from_slice(&v.to_be_bytes());
    }

    fn bytes(&mut self, v: &[u8]) {
        self.u16(v.len() as u16);
        self.0.extend_from_slice(v);
    }

    fn opt_bytes(&mut self, v: Option<&[u8]>) {
        match v {
            Some(v) => {
                self.u8(1);
                self.bytes(v);
            }
            None => self.u8(0),
        }
    }

    fn addr(&mut self, v: &Ipv6Addr) {
        self.0.extend_from_slice(&v.octets());
    }

    fn status(&mut self, v: Option<&(u16, String)>) {
        match v {
            Some((code, text)) => {
                self.u8(1);
                self.u16(*code);
                self.bytes(text.as_bytes());
            }
            None => self.u8(0),
        }
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Result<Self, DhcpError> {
        if data.first() != Some(&WIRE_MAGIC) {
            return Err(DhcpError::new(
                ErrorKind::Malformed,
                "bad magic".to_string(),
            ));
        }
        Ok(Self { data, pos: 1 })
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DhcpError> {
        if self.pos + n > self.data.len() {
            return Err(DhcpError::new(
                ErrorKind::Malformed,
                "short packet".to_string(),
            ));
        }
        let ret = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(ret)
    }

    fn u8(&mut self) -> Result<u8, DhcpError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, DhcpError> {
        Ok(u16::from_be_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32, DhcpError> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn bytes(&mut self) -> Result<Vec<u8>, DhcpError> {
        let len = self.u16()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn opt_bytes(&mut self) -> Result<Option<Vec<u8>>, DhcpError> {
        if self.u8()? == 0 {
            Ok(None)
        } else {
            Ok(Some(self.bytes()?))
        }
    }

    fn addr(&mut self) -> Result<Ipv6Addr, DhcpError> {
        let octets: [u8; 16] = self.take(16)?.try_into().unwrap();
        Ok(Ipv6Addr::from(octets))
    }

    fn status(&mut self) -> Result<Option<(u16, String)>, DhcpError> {
        if self.u8()? == 0 {
            return Ok(None);
        }
        let code = self.u16()?;
        let text = String::from_utf8_lossy(&self.bytes()?).to_string();
        Ok(Some((code, text)))
    }
}

impl WireMsg {
    pub(crate) fn emit(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.u8(self.msg_type.into());
        w.0.extend_from_slice(&self.xid);
        w.u16(self.elapsed);
        w.opt_bytes(self.client_duid.as_deref());
        w.opt_bytes(self.server_duid.as_deref());
        match self.preference {
            Some(p) => {
                w.u8(1);
                w.u8(p);
            }
            None => w.u8(0),
        }
        w.u8(self.rapid_commit as u8);
        w.status(self.status.as_ref());
        match self.ia_na.as_ref() {
            Some(ia) => {
                w.u8(1);
                w.u32(ia.iaid);
                w.u32(ia.t1);
                w.u32(ia.t2);
                w.u8(ia.addrs.len() as u8);
                for (addr, preferred, valid) in &ia.addrs {
                    w.addr(addr);
                    w.u32(*preferred);
                    w.u32(*valid);
                }
                w.status(ia.status.as_ref());
            }
            None => w.u8(0),
        }
        match self.server_unicast.as_ref() {
            Some(addr) => {
                w.u8(1);
                w.addr(addr);
            }
            None => w.u8(0),
        }
        w.u8(self.dns_servers.len() as u8);
        for addr in &self.dns_servers {
            w.addr(addr);
        }
        match self.info_refresh_time {
            Some(v) => {
                w.u8(1);
                w.u32(v);
            }
            None => w.u8(0),
        }
        w.0
    }

    pub(crate) fn parse(payload: &[u8]) -> Result<Self, DhcpError> {
        let mut r = Reader::new(payload)?;
        let msg_type = DhcpV6MessageType::from(r.u8()?);
        let xid: [u8; 3] = r.take(3)?.try_into().unwrap();
        let elapsed = r.u16()?;
        let client_duid = r.opt_bytes()?;
        let server_duid = r.opt_bytes()?;
        let preference = if r.u8()? == 1 { Some(r.u8()?) } else { None };
        let rapid_commit = r.u8()? == 1;
        let status = r.status()?;
        let ia_na = if r.u8()? == 1 {
            let iaid = r.u32()?;
            let t1 = r.u32()?;
            let t2 = r.u32()?;
            let count = r.u8()? as usize;
            let mut addrs = Vec::new();
            for _ in 0..count {
                addrs.push((r.addr()?, r.u32()?, r.u32()?));
            }
            Some(WireIaNa {
                iaid,
                t1,
                t2,
                addrs,
                status: r.status()?,
            })
        } else {
            None
        };
        let server_unicast =
            if r.u8()? == 1 { Some(r.addr()?) } else { None };
        let mut dns_servers = Vec::new();
        for _ in 0..r.u8()? {
            dns_servers.push(r.addr()?);
        }
        let info_refresh_time =
            if r.u8()? == 1 { Some(r.u32()?) } else { None };
        Ok(Self {
            msg_type,
            xid,
            elapsed,
            client_duid,
            server_duid,
            preference,
            rapid_commit,
            status,
            ia_na,
            server_unicast,
            dns_servers,
            info_refresh_time,
        })
    }

    pub(crate) fn from_message(msg: &DhcpV6Message) -> Self {
        Self {
            msg_type: msg.msg_type,
            xid: msg.xid,
            elapsed: 0,
            client_duid: msg.client_duid.clone(),
            server_duid: msg.server_duid.clone(),
            preference: msg.preference,
            rapid_commit: msg.rapid_commit,
            status: msg
                .status
                .as_ref()
                .map(|s| (u16::from(s.code), s.message.clone())),
            ia_na: msg.ia_na.as_ref().map(|ia| WireIaNa {
                iaid: ia.iaid,
                t1: ia.t1,
                t2: ia.t2,
                addrs: ia
                    .addrs
                    .iter()
                    .map(|a| (a.addr, a.preferred_life, a.valid_life))
                    .collect(),
                status: ia
                    .status
                    .as_ref()
                    .map(|s| (u16::from(s.code), s.message.clone())),
            }),
            server_unicast: msg.server_unicast,
            dns_servers: msg.dns_servers.clone(),
            info_refresh_time: msg.info_refresh_time,
        }
    }

    fn into_message(self, src: Ipv6Addr) -> DhcpV6Message {
        let mut msg = DhcpV6Message::new(self.msg_type, self.xid, src);
        msg.client_duid = self.client_duid;
        msg.server_duid = self.server_duid;
        msg.preference = self.preference;
        msg.rapid_commit = self.rapid_commit;
        msg.status = self.status.map(|(code, message)| DhcpV6StatusOption {
            code: DhcpV6StatusCode::from(code),
            message,
        });
        msg.ia_na = self.ia_na.map(|ia| DhcpV6MessageIaNa {
            iaid: ia.iaid,
            t1: ia.t1,
            t2: ia.t2,
            addrs: ia
                .addrs
                .into_iter()
                .map(|(addr, preferred_life, valid_life)| DhcpV6IaAddress {
                    addr,
                    preferred_life,
                    valid_life,
                })
                .collect(),
            status: ia.status.map(|(code, message)| DhcpV6StatusOption {
                code: DhcpV6StatusCode::from(code),
                message,
            }),
        });
        msg.server_unicast = self.server_unicast;
        msg.dns_servers = self.dns_servers;
        msg.info_refresh_time = self.info_refresh_time;
        msg
    }
}

pub(crate) struct TestCodec;

impl DhcpV6Codec for TestCodec {
    fn decode(
        &self,
        payload: &[u8],
        src: Ipv6Addr,
    ) -> Result<DhcpV6Message, DhcpError> {
        Ok(WireMsg::parse(payload)?.into_message(src))
    }

    fn encode(
        &self,
        msg: &DhcpV6OutboundMessage,
    ) -> Result<Vec<u8>, DhcpError> {
        let wire = WireMsg {
            msg_type: msg.msg_type,
            xid: msg.xid,
            elapsed: msg.elapsed_time,
            client_duid: Some(msg.client_duid.clone()),
            server_duid: msg.server_duid.clone(),
            preference: None,
            rapid_commit: msg.rapid_commit,
            status: None,
            ia_na: msg.ia_na.as_ref().map(|ia| WireIaNa {
                iaid: ia.iaid,
                t1: ia.t1,
                t2: ia.t2,
                addrs: ia
                    .addrs
                    .iter()
                    .map(|a| (a.addr, a.preferred_life, a.valid_life))
                    .collect(),
                status: None,
            }),
            server_unicast: None,
            dns_servers: Vec::new(),
            info_refresh_time: None,
        };
        Ok(wire.emit())
    }
}

#[derive(Debug, Default)]
pub(crate) struct MockTransport {
    pub(crate) sent: Mutex<Vec<(Ipv6Addr, Vec<u8>)>>,
}

impl DhcpV6Transport for MockTransport {
    fn send(
        &self,
        _iface_index: u32,
        dst: Ipv6Addr,
        payload: &[u8],
    ) -> Result<(), DhcpError> {
        self.sent.lock().unwrap().push((dst, payload.to_vec()));
        Ok(())
    }

    fn recv(&self) -> Result<Option<(Vec<u8>, Ipv6Addr)>, DhcpError> {
        Ok(None)
    }
}

#[derive(Debug, Default)]
pub(crate) struct MockApplierState {
    /// Scripted outcomes for the next apply() calls; `Applied` once
    /// exhausted.
    pub(crate) outcomes: VecDeque<DhcpV6ApplyOutcome>,
    pub(crate) applied: Vec<DhcpV6Lease>,
    pub(crate) withdrawn: Vec<DhcpV6Lease>,
    pub(crate) cache: HashMap<u32, DhcpV6Lease>,
}

pub(crate) struct MockApplier(pub(crate) Arc<Mutex<MockApplierState>>);

impl DhcpV6LeaseApplier for MockApplier {
    fn apply(
        &mut self,
        _iface_index: u32,
        lease: &DhcpV6Lease,
    ) -> DhcpV6ApplyOutcome {
        let mut state = self.0.lock().unwrap();
        state.applied.push(lease.clone());
        state
            .outcomes
            .pop_front()
            .unwrap_or(DhcpV6ApplyOutcome::Applied)
    }

    fn withdraw(&mut self, _iface_index: u32, lease: &DhcpV6Lease) {
        self.0.lock().unwrap().withdrawn.push(lease.clone());
    }

    fn cache_get(&mut self, iface_index: u32) -> Option<DhcpV6Lease> {
        self.0.lock().unwrap().cache.get(&iface_index).cloned()
    }

    fn cache_put(
        &mut self,
        iface_index: u32,
        lease: &DhcpV6Lease,
    ) -> Result<(), DhcpError> {
        self.0
            .lock()
            .unwrap()
            .cache
            .insert(iface_index, lease.clone());
        Ok(())
    }
}

/// One device wired to the mocks, with a fixed origin instant so
/// scenario timings can be written as offsets.
pub(crate) struct TestRig {
    pub(crate) device: DhcpV6Device,
    pub(crate) transport: Arc<MockTransport>,
    pub(crate) applier: Arc<Mutex<MockApplierState>>,
    pub(crate) t0: Instant,
}

impl TestRig {
    pub(crate) fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub(crate) fn with_config(
        tweak: impl FnOnce(&mut DhcpV6Config),
    ) -> Self {
        let mut config =
            DhcpV6Config::new(IFACE, IFINDEX, DhcpV6Mode::Managed);
        config.set_duid(DhcpV6Duid::Raw(CLIENT_DUID.to_vec()));
        config.set_ia_id(IA_ID);
        tweak(&mut config);
        let transport = Arc::new(MockTransport::default());
        let applier = Arc::new(Mutex::new(MockApplierState::default()));
        let device = DhcpV6Device::new(
            config,
            Box::new(TestCodec),
            transport.clone(),
            Box::new(MockApplier(applier.clone())),
        )
        .unwrap();
        Self {
            device,
            transport,
            applier,
            t0: Instant::now(),
        }
    }

    pub(crate) fn at(&self, ms: u64) -> Instant {
        self.t0 + Duration::from_millis(ms)
    }

    pub(crate) fn sent_count(&self) -> usize {
        self.transport.sent.lock().unwrap().len()
    }

    pub(crate) fn sent_wire(&self, index: usize) -> (Ipv6Addr, WireMsg) {
        let sent = self.transport.sent.lock().unwrap();
        let (dst, payload) = &sent[index];
        (*dst, WireMsg::parse(payload).unwrap())
    }

    pub(crate) fn last_wire(&self) -> (Ipv6Addr, WireMsg) {
        self.sent_wire(self.sent_count() - 1)
    }

    /// Feed a server message through decode + dispatcher, as bytes
    /// from the link manager would arrive.
    pub(crate) fn rx(
        &mut self,
        msg: &DhcpV6Message,
        at_ms: u64,
    ) -> (DhcpV6PacketDisposition, Vec<DhcpV6LeaseEvent>) {
        let payload = WireMsg::from_message(msg).emit();
        let now = self.at(at_ms);
        self.device
            .process_client_packet(&payload, msg.src, now)
            .unwrap()
    }

    /// Fire the armed deadline exactly when it is due, as the runner
    /// timerfd would. Returns the fire instant and the emitted lease
    /// events.
    pub(crate) fn fire_deadline(
        &mut self,
    ) -> (Instant, Vec<DhcpV6LeaseEvent>) {
        let deadline = self
            .device
            .deadline()
            .expect("no deadline armed to fire");
        let events = self
            .device
            .process(crate::DhcpV6Event::TimerFired, deadline)
            .unwrap();
        (deadline, events)
    }

    pub(crate) fn current_xid(&self) -> [u8; 3] {
        self.device.state().current_xid().expect("no xid in state")
    }
}

/// Server message builders.
pub(crate) fn advertise(
    xid: [u8; 3],
    server_duid: &[u8],
    preference: Option<u8>,
    addrs: &[(&str, u32, u32)],
    t1: u32,
    t2: u32,
) -> DhcpV6Message {
    let mut msg = DhcpV6Message::new(
        DhcpV6MessageType::Advertise,
        xid,
        SRV_LINK_LOCAL.parse().unwrap(),
    );
    msg.client_duid = Some(CLIENT_DUID.to_vec());
    msg.server_duid = Some(server_duid.to_vec());
    msg.preference = preference;
    msg.ia_na = Some(ia_na(addrs, t1, t2));
    msg
}

pub(crate) fn reply(
    xid: [u8; 3],
    server_duid: &[u8],
    addrs: &[(&str, u32, u32)],
    t1: u32,
    t2: u32,
) -> DhcpV6Message {
    let mut msg = DhcpV6Message::new(
        DhcpV6MessageType::Reply,
        xid,
        SRV_LINK_LOCAL.parse().unwrap(),
    );
    msg.client_duid = Some(CLIENT_DUID.to_vec());
    msg.server_duid = Some(server_duid.to_vec());
    msg.ia_na = Some(ia_na(addrs, t1, t2));
    msg
}

pub(crate) fn reply_status(
    xid: [u8; 3],
    server_duid: &[u8],
    code: DhcpV6StatusCode,
) -> DhcpV6Message {
    let mut msg = DhcpV6Message::new(
        DhcpV6MessageType::Reply,
        xid,
        SRV_LINK_LOCAL.parse().unwrap(),
    );
    msg.client_duid = Some(CLIENT_DUID.to_vec());
    msg.server_duid = Some(server_duid.to_vec());
    msg.status = Some(DhcpV6StatusOption {
        code,
        message: code.to_string(),
    });
    msg
}

pub(crate) fn ia_na(
    addrs: &[(&str, u32, u32)],
    t1: u32,
    t2: u32,
) -> DhcpV6MessageIaNa {
    DhcpV6MessageIaNa {
        iaid: IA_ID,
        t1,
        t2,
        addrs: addrs
            .iter()
            .map(|(addr, preferred, valid)| DhcpV6IaAddress {
                addr: addr.parse().unwrap(),
                preferred_life: *preferred,
                valid_life: *valid,
            })
            .collect(),
        status: None,
    }
}

/// Drive a fresh rig to BOUND: Solicit, one Advertise, first-RT
/// server pick, Request, Reply. Returns the rig bound at
/// `bound_at_ms` with the given lifetimes.
pub(crate) fn bound_rig(
    t1: u32,
    t2: u32,
    preferred: u32,
    valid: u32,
) -> (TestRig, u64) {
    let mut rig = TestRig::new();
    rig.device
        .process(crate::DhcpV6Event::Start(DhcpV6Mode::Managed), rig.t0)
        .unwrap();
    let sol_xid = rig.current_xid();
    rig.rx(
        &advertise(
            sol_xid,
            SRV1_DUID,
            Some(0),
            &[("2001:db8::1", preferred, valid)],
            t1,
            t2,
        ),
        500,
    );
    let (fired, _) = rig.fire_deadline();
    let fired_ms =
        fired.duration_since(rig.t0).as_millis() as u64;
    let req_xid = rig.current_xid();
    let bound_at_ms = fired_ms + 100;
    let (_, events) = rig.rx(
        &reply(
            req_xid,
            SRV1_DUID,
            &[("2001:db8::1", preferred, valid)],
            t1,
            t2,
        ),
        bound_at_ms,
    );
    assert!(matches!(
        events.as_slice(),
        [DhcpV6LeaseEvent::LeaseAcquired(_)]
    ));
    assert_eq!(rig.device.state_name(), "BOUND");
    (rig, bound_at_ms)
}
