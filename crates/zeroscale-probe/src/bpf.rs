//! eBPF-backed probe backends (enabled with the `bpf` feature).
//!
//! Loads the two compiled probe objects, attaches them (TC ingress for the
//! port watch, a `tcp_recvmsg` kprobe for connection accounting), and pumps
//! their perf rings into the façade channels. Map names and layouts are the
//! fixed kernel contract:
//!
//! - port-wake: `ports_map: HashMap<u32, u32>`, `events: PerfEventArray`
//! - conc-req: `conn_count_map`, `scaling_map`, `constants_map`
//!   (`{0: lower, 1: upper, 2: buffer_length}`, written once here),
//!   `buffer_map`, all `HashMap<u32, u32>`, plus `events: PerfEventArray`

use std::sync::Arc;

use aya::maps::perf::AsyncPerfEventArray;
use aya::maps::HashMap as KernelMap;
use aya::programs::{tc, KProbe, SchedClassifier, TcAttachType};
use aya::Ebpf;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::backend::{ConcReqBackend, PortWakeBackend, ThresholdSignal, Thresholds};
use crate::error::{ProbeError, ProbeResult};

/// Default install locations of the compiled probe objects.
pub const PORT_WAKE_OBJECT: &str = "/usr/lib/zeroscale/port_wake.bpf.o";
pub const CONC_REQ_OBJECT: &str = "/usr/lib/zeroscale/conc_req.bpf.o";

const RING_CAPACITY: usize = 64;

/// Port-wake backend over the TC ingress classifier.
pub struct BpfPortWake {
    ebpf: Mutex<Ebpf>,
}

impl BpfPortWake {
    /// Load the object, attach to `iface` ingress, and start the perf
    /// readers. Returns the backend and the wake-event channel.
    pub fn load(object_path: &str, iface: &str) -> ProbeResult<(Arc<Self>, mpsc::Receiver<u32>)> {
        let mut ebpf =
            Ebpf::load_file(object_path).map_err(|e| ProbeError::Load(e.to_string()))?;

        // clsact may already exist from a previous run.
        let _ = tc::qdisc_add_clsact(iface);

        let program: &mut SchedClassifier = ebpf
            .program_mut("port_classifier")
            .ok_or_else(|| ProbeError::Load("program port_classifier missing".to_string()))?
            .try_into()
            .map_err(|e: aya::programs::ProgramError| ProbeError::Load(e.to_string()))?;
        program
            .load()
            .map_err(|e| ProbeError::Load(e.to_string()))?;
        program
            .attach(iface, TcAttachType::Ingress)
            .map_err(|e| ProbeError::Attach(e.to_string()))?;
        debug!(iface, "port-wake classifier attached");

        let (tx, rx) = mpsc::channel(RING_CAPACITY);
        spawn_ring_readers(&mut ebpf, move |sample| {
            if sample.len() >= 4 {
                let port = u32::from_le_bytes([sample[0], sample[1], sample[2], sample[3]]);
                Some(port)
            } else {
                warn!(len = sample.len(), "malformed wake event");
                None
            }
        }, tx)?;

        Ok((Arc::new(Self { ebpf: Mutex::new(ebpf) }), rx))
    }

    fn ports_map(&self, op: impl FnOnce(&mut KernelMap<&mut aya::maps::MapData, u32, u32>) -> ProbeResult<()>) -> ProbeResult<()> {
        let mut ebpf = self.ebpf.lock();
        let map = ebpf
            .map_mut("ports_map")
            .ok_or_else(|| ProbeError::MapUpdate("ports_map missing".to_string()))?;
        let mut map: KernelMap<_, u32, u32> =
            KernelMap::try_from(map).map_err(|e| ProbeError::MapUpdate(e.to_string()))?;
        op(&mut map)
    }
}

impl PortWakeBackend for BpfPortWake {
    fn arm(&self, port: u32) -> ProbeResult<()> {
        self.ports_map(|map| {
            map.insert(port, 1, 0)
                .map_err(|e| ProbeError::MapUpdate(e.to_string()))
        })
    }

    fn disarm(&self, port: u32) -> ProbeResult<()> {
        self.ports_map(|map| {
            // Absent is success: disarm must be broadcast-idempotent.
            match map.remove(&port) {
                Ok(()) => Ok(()),
                Err(aya::maps::MapError::KeyNotFound) => Ok(()),
                Err(e) => Err(ProbeError::MapUpdate(e.to_string())),
            }
        })
    }
}

/// Concurrent-request backend over the `tcp_recvmsg` kprobe.
pub struct BpfConcReq {
    ebpf: Mutex<Ebpf>,
}

impl BpfConcReq {
    /// Load the object, attach the kprobe, write the threshold constants
    /// (once, never again), and start the perf readers.
    pub fn load(
        object_path: &str,
        thresholds: Thresholds,
    ) -> ProbeResult<(Arc<Self>, mpsc::Receiver<ThresholdSignal>)> {
        let mut ebpf =
            Ebpf::load_file(object_path).map_err(|e| ProbeError::Load(e.to_string()))?;

        let program: &mut KProbe = ebpf
            .program_mut("kprobe_tcp_recvmsg")
            .ok_or_else(|| ProbeError::Load("program kprobe_tcp_recvmsg missing".to_string()))?
            .try_into()
            .map_err(|e: aya::programs::ProgramError| ProbeError::Load(e.to_string()))?;
        program
            .load()
            .map_err(|e| ProbeError::Load(e.to_string()))?;
        program
            .attach("tcp_recvmsg", 0)
            .map_err(|e| ProbeError::Attach(e.to_string()))?;
        debug!("concurrent-request kprobe attached");

        let (tx, rx) = mpsc::channel(RING_CAPACITY);
        spawn_ring_readers(&mut ebpf, |sample| {
            if sample.len() < 10 {
                warn!(len = sample.len(), "malformed threshold event");
                return None;
            }
            let key = u32::from_le_bytes([sample[0], sample[1], sample[2], sample[3]]);
            let message = &sample[4..10];
            let end = message.iter().position(|b| *b == 0).unwrap_or(message.len());
            let direction = String::from_utf8_lossy(&message[..end]).into_owned();
            Some(ThresholdSignal { key, direction })
        }, tx)?;

        let backend = Self { ebpf: Mutex::new(ebpf) };
        backend.write_map("constants_map", 0, thresholds.lower)?;
        backend.write_map("constants_map", 1, thresholds.upper)?;
        backend.write_map("constants_map", 2, thresholds.buffer_length)?;

        Ok((Arc::new(backend), rx))
    }

    fn write_map(&self, name: &str, key: u32, value: u32) -> ProbeResult<()> {
        let mut ebpf = self.ebpf.lock();
        let map = ebpf
            .map_mut(name)
            .ok_or_else(|| ProbeError::MapUpdate(format!("{name} missing")))?;
        let mut map: KernelMap<_, u32, u32> =
            KernelMap::try_from(map).map_err(|e| ProbeError::MapUpdate(e.to_string()))?;
        map.insert(key, value, 0)
            .map_err(|e| ProbeError::MapUpdate(e.to_string()))
    }

    fn delete_key(&self, name: &str, key: u32) -> ProbeResult<()> {
        let mut ebpf = self.ebpf.lock();
        let map = ebpf
            .map_mut(name)
            .ok_or_else(|| ProbeError::MapUpdate(format!("{name} missing")))?;
        let mut map: KernelMap<_, u32, u32> =
            KernelMap::try_from(map).map_err(|e| ProbeError::MapUpdate(e.to_string()))?;
        match map.remove(&key) {
            Ok(()) | Err(aya::maps::MapError::KeyNotFound) => Ok(()),
            Err(e) => Err(ProbeError::MapUpdate(e.to_string())),
        }
    }
}

impl ConcReqBackend for BpfConcReq {
    fn add_key(&self, key: u32) -> ProbeResult<()> {
        self.write_map("conn_count_map", key, 0)?;
        self.write_map("buffer_map", key, 0)?;
        self.write_map("scaling_map", key, 1)
    }

    fn remove_key(&self, key: u32) -> ProbeResult<()> {
        self.delete_key("conn_count_map", key)?;
        self.delete_key("buffer_map", key)?;
        self.delete_key("scaling_map", key)
    }

    fn rearm(&self, key: u32) -> ProbeResult<()> {
        self.write_map("scaling_map", key, 1)
    }
}

/// Open the `events` perf array and forward parsed samples from every
/// online CPU into `tx`. Readers exit when the channel closes or the map is
/// dropped.
fn spawn_ring_readers<T, F>(
    ebpf: &mut Ebpf,
    parse: F,
    tx: mpsc::Sender<T>,
) -> ProbeResult<()>
where
    T: Send + 'static,
    F: Fn(&[u8]) -> Option<T> + Send + Sync + Clone + 'static,
{
    let mut perf = AsyncPerfEventArray::try_from(
        ebpf.take_map("events")
            .ok_or_else(|| ProbeError::Load("events map missing".to_string()))?,
    )
    .map_err(|e| ProbeError::Load(e.to_string()))?;

    let cpus = aya::util::online_cpus().map_err(|e| ProbeError::Load(format!("{e:?}")))?;
    for cpu_id in cpus {
        let mut ring = perf
            .open(cpu_id, None)
            .map_err(|e| ProbeError::Load(e.to_string()))?;
        let tx = tx.clone();
        let parse = parse.clone();
        tokio::spawn(async move {
            let mut buffers: Vec<bytes::BytesMut> = (0..16)
                .map(|_| bytes::BytesMut::with_capacity(64))
                .collect();
            loop {
                let batch = match ring.read_events(&mut buffers).await {
                    Ok(batch) => batch,
                    Err(e) => {
                        warn!(cpu_id, error = %e, "perf ring read failed");
                        return;
                    }
                };
                if batch.lost > 0 {
                    warn!(cpu_id, lost = batch.lost, "perf samples lost");
                }
                for buffer in buffers.iter().take(batch.read) {
                    if let Some(event) = parse(buffer) {
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });
    }
    Ok(())
}
