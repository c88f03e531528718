//! Test doubles: a scripted command runner and fake host collaborators.
//! Tests build their own engines around these instead of touching lvm.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::LvmConfig;
use crate::engine::LvmCache;
use crate::host::{BlockSizes, DeviceEnumerator, DeviceMapper, ProcessInfo, ProcessInspector};
use crate::runner::{CommandRunner, RunOutput};

pub(crate) fn ok_output(out: &[&str]) -> RunOutput {
    RunOutput {
        rc: 0,
        out: out.iter().map(|s| s.to_string()).collect(),
        err: Vec::new(),
    }
}

pub(crate) fn fail_output(rc: i32) -> RunOutput {
    RunOutput {
        rc,
        out: Vec::new(),
        err: vec!["fake failure".to_string()],
    }
}

/// Scripted [`CommandRunner`]. Responses come from a FIFO script first,
/// then from per-subcommand canned responses, then default to success with
/// no output. Every invocation is recorded.
#[derive(Default)]
pub(crate) struct FakeRunner {
    script: Mutex<VecDeque<RunOutput>>,
    canned: Mutex<HashMap<String, RunOutput>>,
    calls: Mutex<Vec<Vec<String>>>,
    delay: Mutex<Option<Duration>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl FakeRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeRunner::default())
    }

    pub fn enqueue(&self, output: RunOutput) {
        self.script.lock().push_back(output);
    }

    pub fn respond(&self, subcmd: &str, output: RunOutput) {
        self.canned.lock().insert(subcmd.to_string(), output);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().clone()
    }

    pub fn calls_of(&self, subcmd: &str) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .iter()
            .filter(|argv| argv[0] == subcmd)
            .cloned()
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

impl CommandRunner for Arc<FakeRunner> {
    async fn run(&self, args: &[String]) -> io::Result<RunOutput> {
        self.calls.lock().push(args.to_vec());
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);
        if let Some(output) = self.script.lock().pop_front() {
            return Ok(output);
        }
        let canned = self.canned.lock().get(&args[0]).cloned();
        Ok(canned.unwrap_or_else(|| ok_output(&[])))
    }
}

#[derive(Debug)]
pub(crate) struct FakeDevices {
    devices: Mutex<Vec<String>>,
    sizes: Mutex<BlockSizes>,
}

impl FakeDevices {
    pub fn new(devices: &[&str]) -> Arc<Self> {
        Arc::new(FakeDevices {
            devices: Mutex::new(devices.iter().map(|d| d.to_string()).collect()),
            sizes: Mutex::new(BlockSizes {
                logical: 512,
                physical: 512,
            }),
        })
    }

    pub fn set_devices(&self, devices: &[&str]) {
        *self.devices.lock() = devices.iter().map(|d| d.to_string()).collect();
    }

    pub fn set_sizes(&self, logical: u64, physical: u64) {
        *self.sizes.lock() = BlockSizes { logical, physical };
    }
}

impl DeviceEnumerator for FakeDevices {
    fn multipath_devices(&self) -> io::Result<Vec<String>> {
        Ok(self.devices.lock().clone())
    }

    fn block_sizes(&self, _guid: &str) -> io::Result<BlockSizes> {
        Ok(*self.sizes.lock())
    }
}

#[derive(Debug, Default)]
pub(crate) struct FakeMapper {
    removed: Mutex<Vec<String>>,
}

impl FakeMapper {
    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().clone()
    }
}

impl DeviceMapper for FakeMapper {
    fn remove_mappings_holding_device(&self, guid: &str) -> io::Result<()> {
        self.removed.lock().push(guid.to_string());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub(crate) struct FakeInspector {
    pub holders: Vec<ProcessInfo>,
}

impl ProcessInspector for FakeInspector {
    fn holders(&self, _path: &Path) -> Vec<ProcessInfo> {
        self.holders.clone()
    }
}

pub(crate) struct TestEnv {
    pub runner: Arc<FakeRunner>,
    pub devices: Arc<FakeDevices>,
    pub mapper: Arc<FakeMapper>,
    pub lvm: LvmCache<Arc<FakeRunner>>,
}

pub(crate) fn engine_with(config: LvmConfig) -> TestEnv {
    let runner = FakeRunner::new();
    let devices = FakeDevices::new(&["/dev/mapper/pv0", "/dev/mapper/pv1"]);
    let mapper = Arc::new(FakeMapper::default());
    let lvm = LvmCache::with_collaborators(
        Arc::clone(&runner),
        config,
        Arc::clone(&devices) as Arc<dyn DeviceEnumerator>,
        Arc::clone(&mapper) as Arc<dyn DeviceMapper>,
        Arc::new(FakeInspector::default()),
    );
    TestEnv {
        runner,
        devices,
        mapper,
        lvm,
    }
}

pub(crate) fn engine() -> TestEnv {
    engine_with(LvmConfig::default())
}

// Canned report lines.

pub(crate) fn pv_line(uuid: &str, name: &str, vg_name: &str, pe_alloc: u64, mda_used: u64) -> String {
    format!("{uuid}|{name}|107374182400|{vg_name}|vg-uuid-1|1048576|800|{pe_alloc}|2|107374182400|{mda_used}")
}

pub(crate) fn vg_line(uuid: &str, name: &str, free_count: u64, pv_name: &str) -> String {
    format!(
        "{uuid}|{name}|wz--n-|107374182400|53687091200|134217728|800|{free_count}|tag1,tag2|134217728|67108864|3|1|{pv_name}"
    )
}

pub(crate) fn lv_line(name: &str, vg_name: &str, attr: &str, size: u64) -> String {
    format!("lv-uuid-{name}|{name}|{vg_name}|{attr}|{size}|0|/dev/mapper/pv0(0)|")
}
