//! Fakes and fixtures shared by the scenario tests

#![allow(dead_code)]

use async_trait::async_trait;
use cipdip_capture::PcapWriter;
use cipdip_core::{Error, MacAddr, Result};
use cipdip_packet::enip::{Command, EncapsulationHeader};
use cipdip_packet::{EtherType, PacketBuilder, LINKTYPE_ETHERNET};
use cipdip_replay::{LinkProbe, ReplayComponents, ReportAggregator, ResponseTap, RunEvent};
use parking_lot::Mutex;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const CLIENT_MAC: MacAddr = MacAddr::new([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
pub const SERVER_MAC: MacAddr = MacAddr::new([0x02, 0x00, 0x00, 0x00, 0x00, 0x02]);
pub const CLIENT: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 10);
pub const SERVER: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 20);
pub const LIVE: Ipv4Addr = Ipv4Addr::new(10, 10, 0, 50);
pub const LIVE_MAC: MacAddr = MacAddr::new([0x00, 0x1d, 0x9c, 0x00, 0x00, 0x01]);
pub const FAILOVER_MAC: MacAddr = MacAddr::new([0x00, 0x1d, 0x9c, 0x00, 0x00, 0x02]);

pub fn enip_payload(session: u32) -> Vec<u8> {
    let mut payload = EncapsulationHeader::new(Command::SendRRData, 16, session).to_bytes();
    payload.extend_from_slice(&[0u8; 16]);
    payload
}

/// Client-to-server ENIP frame over TCP
pub fn enip_request(seq: u32) -> Vec<u8> {
    PacketBuilder::new()
        .ethernet(CLIENT_MAC, SERVER_MAC, EtherType::IPv4)
        .ipv4(CLIENT, SERVER)
        .tcp(51000, 44818, 1000 + seq * 40, 1, 0x18)
        .payload(enip_payload(0x1000 + seq))
        .build()
        .unwrap()
}

/// Client-to-server traffic that is not ENIP
pub fn http_request() -> Vec<u8> {
    PacketBuilder::new()
        .ethernet(CLIENT_MAC, SERVER_MAC, EtherType::IPv4)
        .ipv4(CLIENT, SERVER)
        .tcp(51001, 44818, 7, 1, 0x18)
        .payload(b"GET /index.html HTTP/1.1\r\nHost: plc\r\n\r\n".to_vec())
        .build()
        .unwrap()
}

/// Write `frames` as a classic pcap under `dir`
pub fn write_capture(dir: &Path, frames: &[(Duration, Vec<u8>)]) -> PathBuf {
    let path = dir.join("fixture.pcap");
    let mut writer = PcapWriter::create(&path, LINKTYPE_ETHERNET).unwrap();
    for (ts, data) in frames {
        writer.write_frame(*ts, data, data.len() as u32).unwrap();
    }
    writer.into_inner().unwrap();
    path
}

/// `count` ENIP requests spaced `gap` apart
pub fn evenly_spaced(count: u32, gap: Duration) -> Vec<(Duration, Vec<u8>)> {
    (0..count)
        .map(|i| (Duration::from_secs(1_700_000_000) + gap * i, enip_request(i)))
        .collect()
}

/// Sink that keeps every frame it is given
#[derive(Clone, Default)]
pub struct RecordingSink {
    pub sent: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl RecordingSink {
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl cipdip_replay::FrameSink for RecordingSink {
    async fn send(&mut self, frame: &[u8]) -> Result<()> {
        self.sent.lock().push(frame.to_vec());
        Ok(())
    }
}

/// Answers each probe with the next scripted MAC, repeating the last one;
/// `None` entries stay silent
pub struct ScriptedProbe {
    script: Mutex<Vec<Option<MacAddr>>>,
    pub calls: Mutex<u32>,
}

impl ScriptedProbe {
    pub fn new(script: Vec<Option<MacAddr>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            calls: Mutex::new(0),
        })
    }

    pub fn silent() -> Arc<Self> {
        Self::new(vec![None])
    }
}

#[async_trait]
impl LinkProbe for ScriptedProbe {
    async fn probe(&self, _target: Ipv4Addr, timeout: Duration) -> Result<Option<MacAddr>> {
        *self.calls.lock() += 1;
        let answer = {
            let mut script = self.script.lock();
            if script.len() > 1 {
                script.remove(0)
            } else {
                script.first().copied().flatten()
            }
        };
        match answer {
            Some(mac) => Ok(Some(mac)),
            None => {
                tokio::time::sleep(timeout * 4).await;
                Ok(None)
            }
        }
    }

    fn interface_name(&self) -> &str {
        "fake0"
    }
}

/// Response tap that reports a fixed number of replies on start
pub struct FakeTap {
    pub replies: usize,
    pub fail: bool,
    pub stopped: Arc<Mutex<bool>>,
}

impl ResponseTap for FakeTap {
    fn start(&mut self, aggregator: Arc<ReportAggregator>) -> Result<()> {
        if self.fail {
            return Err(Error::Capture("permission denied".into()));
        }
        for _ in 0..self.replies {
            aggregator.record(RunEvent::ResponseCaptured { bytes: 64 });
        }
        Ok(())
    }

    fn stop(&mut self) {
        *self.stopped.lock() = true;
    }
}

pub fn components(probe: Option<Arc<ScriptedProbe>>, sink: &RecordingSink) -> ReplayComponents {
    ReplayComponents {
        probe: probe.map(|p| p as Arc<dyn LinkProbe>),
        sink: Box::new(sink.clone()),
        tap: None,
    }
}
