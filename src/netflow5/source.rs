//! A `Base` owns one or more listening UDP sockets and the reader thread(s)
//! that drain them; a `Source` is the per-peer view of the flow records a
//! `Base` has collected, with its own [`EngineState`] table and statistics.

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::JoinHandle;
use std::time::Duration;

use super::circbuf::CircularBuffer;
use super::engine::EngineState;
use super::pdu::Pdu;
use crate::config::NetflowSourceConfig;

#[derive(Debug)]
pub enum FlowSourceError {
    Bind { addr: SocketAddr, cause: std::io::Error },
    AlreadyRunning,
    NotRunning,
}

impl fmt::Display for FlowSourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowSourceError::Bind { addr, cause } => write!(f, "could not bind {addr}: {cause}"),
            FlowSourceError::AlreadyRunning => write!(f, "source is already running"),
            FlowSourceError::NotRunning => write!(f, "source is not running"),
        }
    }
}

impl std::error::Error for FlowSourceError {}

/// Per-peer packet and record counters, modeled on the collector's
/// `pkts_bad`/`pkts_good`/`recs_bad`/`recs_good`/`recs_missing` tallies.
#[derive(Debug, Default)]
pub struct SourceStats {
    pub packets_seen: AtomicU64,
    pub packets_good: AtomicU64,
    pub packets_bad: AtomicU64,
    pub records_good: AtomicU64,
    pub records_missing: AtomicU64,
}

impl SourceStats {
    pub fn snapshot(&self) -> SourceStatsSnapshot {
        SourceStatsSnapshot {
            packets_seen: self.packets_seen.load(Ordering::Relaxed),
            packets_good: self.packets_good.load(Ordering::Relaxed),
            packets_bad: self.packets_bad.load(Ordering::Relaxed),
            records_good: self.records_good.load(Ordering::Relaxed),
            records_missing: self.records_missing.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceStatsSnapshot {
    pub packets_seen: u64,
    pub packets_good: u64,
    pub packets_bad: u64,
    pub records_good: u64,
    pub records_missing: u64,
}

impl SourceStatsSnapshot {
    /// Property checked by the collection's testable-properties suite:
    /// every packet this source has seen is accounted for as either good
    /// or bad, exactly once (`processed = good + bad`).
    pub fn records_balance(&self) -> bool {
        self.packets_seen == self.packets_good + self.packets_bad
    }
}

/// Per-peer state: one [`EngineState`] per `(engine_type, engine_id)` this
/// peer has exported, plus its statistics.
pub struct Source {
    pub peer: IpAddr,
    engines: Mutex<HashMap<(u8, u8), EngineState>>,
    pub stats: SourceStats,
}

impl Source {
    fn new(peer: IpAddr) -> Self {
        Self { peer, engines: Mutex::new(HashMap::new()), stats: SourceStats::default() }
    }

    /// Parses one UDP datagram as a NetFlow v5 PDU, updating this peer's
    /// per-engine sequence/timestamp bookkeeping and statistics.
    pub fn ingest(&self, datagram: &[u8]) -> Result<Pdu, ()> {
        use nom_derive::Parse;
        self.stats.packets_seen.fetch_add(1, Ordering::Relaxed);
        let (_, pdu) = match Pdu::parse_be(datagram) {
            Ok(parsed) => parsed,
            Err(_) => {
                self.stats.packets_bad.fetch_add(1, Ordering::Relaxed);
                return Err(());
            }
        };
        if pdu.validate(datagram.len()).is_err() {
            self.stats.packets_bad.fetch_add(1, Ordering::Relaxed);
            return Err(());
        }
        self.stats.packets_good.fetch_add(1, Ordering::Relaxed);
        let mut engines = self.engines.lock().expect("engine table mutex poisoned");
        let engine = engines
            .entry((pdu.header.engine_type, pdu.header.engine_id))
            .or_insert_with(|| EngineState::new(pdu.header.engine_type, pdu.header.engine_id));
        engine.observe_pdu(pdu.header.unix_secs, pdu.header.unix_nsecs, pdu.header.sys_uptime_ms);
        engine.observe_sequence(pdu.header.flow_sequence, pdu.records.len() as u32);
        let total_missing: u64 = engines.values().map(|e| e.missing_recs()).sum();
        self.stats.records_missing.store(total_missing, Ordering::Relaxed);
        self.stats.records_good.fetch_add(pdu.records.len() as u64, Ordering::Relaxed);
        Ok(pdu)
    }
}

/// Identifies the set of addresses a `Base` listens on, used as the
/// process-wide registry key so two collectors bound to the same address
/// set share one `Base` rather than double-binding the socket.
pub type SocketKey = Vec<SocketAddr>;

static BASE_REGISTRY: OnceLock<Mutex<HashMap<SocketKey, Arc<Base>>>> = OnceLock::new();

fn registry() -> &'static Mutex<HashMap<SocketKey, Arc<Base>>> {
    BASE_REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// One or more listening UDP sockets, a reader thread per socket, and the
/// peer dispatch table shared across them.
pub struct Base {
    sockets: Vec<SocketAddr>,
    sources: Mutex<HashMap<IpAddr, Arc<Source>>>,
    buffer: Arc<CircularBuffer>,
    config: NetflowSourceConfig,
    stop_flag: Arc<std::sync::atomic::AtomicBool>,
    readers: Mutex<Vec<JoinHandle<()>>>,
    /// Peer and running drop count for the current streak of "unknown
    /// peer" drops, so a flood from one unconfigured exporter collapses
    /// into a start log line and a trailing count instead of one line per
    /// packet.
    unknown_peer_run: Mutex<Option<(IpAddr, u64)>>,
}

impl Base {
    /// Returns the shared `Base` for `addrs`, binding and spawning reader
    /// threads the first time this address set is requested.
    pub fn get_or_bind(addrs: &[SocketAddr], config: NetflowSourceConfig) -> Result<Arc<Base>, FlowSourceError> {
        let mut key = addrs.to_vec();
        key.sort_by_key(|a| (a.ip(), a.port()));
        let mut reg = registry().lock().expect("base registry mutex poisoned");
        if let Some(existing) = reg.get(&key) {
            return Ok(Arc::clone(existing));
        }
        let mut sockets = Vec::with_capacity(addrs.len());
        for addr in addrs {
            let socket = UdpSocket::bind(addr).map_err(|cause| FlowSourceError::Bind { addr: *addr, cause })?;
            socket
                .set_read_timeout(Some(Duration::from_millis(config.poll_interval_ms)))
                .map_err(|cause| FlowSourceError::Bind { addr: *addr, cause })?;
            sockets.push(socket);
        }
        let base = Arc::new(Base {
            sockets: addrs.to_vec(),
            sources: Mutex::new(HashMap::new()),
            buffer: Arc::new(CircularBuffer::new(config.circular_buffer_slots)),
            config,
            stop_flag: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            readers: Mutex::new(Vec::new()),
            unknown_peer_run: Mutex::new(None),
        });
        let mut handles = Vec::with_capacity(sockets.len());
        for socket in sockets {
            let buffer = Arc::clone(&base.buffer);
            let stop_flag = Arc::clone(&base.stop_flag);
            handles.push(std::thread::spawn(move || reader_loop(socket, buffer, stop_flag)));
        }
        *base.readers.lock().expect("reader handle mutex poisoned") = handles;
        reg.insert(key, Arc::clone(&base));
        Ok(base)
    }

    pub fn listening_addrs(&self) -> &[SocketAddr] {
        &self.sockets
    }

    /// Pre-registers `peer` as an accepted exporter, so it is dispatched to
    /// even when `accept_any_peer` is false. Returns the (possibly
    /// already-existing) `Source` for that peer.
    pub fn register_source(&self, peer: IpAddr) -> Arc<Source> {
        let mut sources = self.sources.lock().expect("source table mutex poisoned");
        Arc::clone(sources.entry(peer).or_insert_with(|| Arc::new(Source::new(peer))))
    }

    /// Pulls the next raw datagram off the circular buffer and dispatches
    /// it to the [`Source`] for its peer address. A peer already known
    /// (registered, or previously seen under `accept_any_peer`) is always
    /// dispatched to. An unknown peer is auto-registered when
    /// `accept_any_peer` is set; otherwise the datagram is dropped and the
    /// drop is logged once per transition onto a new offending peer, so a
    /// sustained flood from one unconfigured exporter doesn't spam the log.
    /// Returns `None` once the base has been stopped and drained.
    pub fn next_record(&self) -> Option<(Arc<Source>, Result<Pdu, ()>)> {
        loop {
            let raw = self.buffer.pop()?;
            if raw.len() < 8 {
                continue;
            }
            let peer = peer_addr_from_envelope(&raw);
            let datagram = &raw[8..];

            let existing = {
                let sources = self.sources.lock().expect("source table mutex poisoned");
                sources.get(&peer).cloned()
            };
            let source = match existing {
                Some(source) => source,
                None if self.config.accept_any_peer => {
                    let mut sources = self.sources.lock().expect("source table mutex poisoned");
                    Arc::clone(sources.entry(peer).or_insert_with(|| Arc::new(Source::new(peer))))
                }
                None => {
                    self.note_unknown_peer(peer);
                    continue;
                }
            };
            self.end_unknown_peer_run();
            let result = source.ingest(datagram);
            return Some((source, result));
        }
    }

    /// Logs the start of a new streak of drops from an unconfigured peer,
    /// and otherwise just tallies the streak silently.
    fn note_unknown_peer(&self, peer: IpAddr) {
        let mut run = self.unknown_peer_run.lock().expect("unknown-peer-run mutex poisoned");
        match &mut *run {
            Some((current, count)) if *current == peer => *count += 1,
            Some((current, count)) => {
                log::info!("dropped {count} datagram(s) from unconfigured peer {current}");
                log::info!("dropping datagrams from unconfigured peer {peer}");
                *run = Some((peer, 1));
            }
            None => {
                log::info!("dropping datagrams from unconfigured peer {peer}");
                *run = Some((peer, 1));
            }
        }
    }

    /// Closes out any in-progress unknown-peer drop streak once a
    /// dispatchable datagram arrives, logging its final tally.
    fn end_unknown_peer_run(&self) {
        let mut run = self.unknown_peer_run.lock().expect("unknown-peer-run mutex poisoned");
        if let Some((peer, count)) = run.take() {
            log::info!("dropped {count} datagram(s) from unconfigured peer {peer}");
        }
    }

    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        self.buffer.close();
    }

    pub fn sources(&self) -> Vec<Arc<Source>> {
        self.sources.lock().expect("source table mutex poisoned").values().cloned().collect()
    }
}

/// Datagrams are queued with an 8-byte envelope (peer IP as 4 or 16 bytes
/// right-padded to 8, msb-tagged by a leading length byte) ahead of the
/// raw PDU bytes, cheaper than threading a `SocketAddr` through the
/// circular buffer's `Vec<u8>` slots.
fn peer_addr_from_envelope(raw: &[u8]) -> IpAddr {
    if raw[0] == 4 {
        IpAddr::from([raw[1], raw[2], raw[3], raw[4]])
    } else {
        IpAddr::from([0, 0, 0, 0])
    }
}

fn encode_envelope(peer: IpAddr, datagram: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + datagram.len());
    match peer {
        IpAddr::V4(v4) => {
            out.push(4);
            out.extend_from_slice(&v4.octets());
            out.extend_from_slice(&[0, 0, 0]);
        }
        IpAddr::V6(_) => {
            out.push(6);
            out.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0]);
        }
    }
    out.extend_from_slice(datagram);
    out
}

fn reader_loop(socket: UdpSocket, buffer: Arc<CircularBuffer>, stop_flag: Arc<std::sync::atomic::AtomicBool>) {
    let mut scratch = [0u8; 1514];
    while !stop_flag.load(Ordering::SeqCst) {
        match socket.recv_from(&mut scratch) {
            Ok((len, SocketAddr::V4(addr))) => {
                let envelope = encode_envelope(IpAddr::V4(*addr.ip()), &scratch[..len]);
                if !buffer.push(envelope) {
                    break;
                }
            }
            Ok((len, SocketAddr::V6(addr))) => {
                let envelope = encode_envelope(IpAddr::V6(*addr.ip()), &scratch[..len]);
                if !buffer.push(envelope) {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {
                continue;
            }
            Err(_) => continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_stats_start_at_zero() {
        let source = Source::new(IpAddr::from([127, 0, 0, 1]));
        let snap = source.stats.snapshot();
        assert_eq!(snap.packets_good, 0);
        assert_eq!(snap.packets_bad, 0);
        assert!(snap.records_balance());
    }

    #[test]
    fn ingest_rejects_truncated_datagram() {
        let source = Source::new(IpAddr::from([127, 0, 0, 1]));
        assert!(source.ingest(&[0u8; 4]).is_err());
        let snap = source.stats.snapshot();
        assert_eq!(snap.packets_bad, 1);
        assert!(snap.records_balance());
    }

    #[test]
    fn packets_seen_always_balances_against_good_plus_bad() {
        let source = Source::new(IpAddr::from([127, 0, 0, 1]));
        let _ = source.ingest(&[0u8; 4]);
        let _ = source.ingest(&[]);
        let snap = source.stats.snapshot();
        assert_eq!(snap.packets_seen, 2);
        assert_eq!(snap.packets_good, 0);
        assert_eq!(snap.packets_bad, 2);
        assert!(snap.records_balance());
    }
}
