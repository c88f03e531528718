use std::io;
use std::process::Stdio;

use lazy_static::lazy_static;
use log::warn;
use regex::Regex;
use tokio::process::Command;

use crate::config::LvmConfig;

/// Result of one lvm invocation, streams decoded and split into lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    pub rc: i32,
    pub out: Vec<String>,
    pub err: Vec<String>,
}

/// Executes lvm subcommands. The engine is generic over this seam; tests
/// substitute a scripted fake.
pub trait CommandRunner: Send + Sync {
    /// Run lvm with `args` (starting at the subcommand) and return the exit
    /// code and both output streams.
    fn run(&self, args: &[String]) -> impl Future<Output = io::Result<RunOutput>> + Send;
}

lazy_static! {
    // Benign warnings lvm emits while peer hosts rewrite metadata; they are
    // dropped before anyone can mistake them for failures.
    static ref SUPPRESS_WARNINGS: Regex = Regex::new(
        "(?i)this metadata update is not backed up\
         |ignoring metadata seqno \\d+ on /dev/mapper/\
         |inconsistent metadata found for vg "
    )
    .unwrap();
}

pub(crate) fn decode_output(rc: i32, stdout: &[u8], stderr: &[u8]) -> RunOutput {
    let out = String::from_utf8_lossy(stdout)
        .lines()
        .map(str::to_string)
        .collect();
    let err: Vec<String> = String::from_utf8_lossy(stderr)
        .lines()
        .filter(|line| !SUPPRESS_WARNINGS.is_match(line))
        .map(str::to_string)
        .collect();
    if rc == 0 && !err.is_empty() {
        warn!("Command succeeded with warnings: {err:?}");
    }
    RunOutput { rc, out, err }
}

/// Production runner: `sudo -n <lvm> <args...>` with both streams captured.
#[derive(Debug, Clone)]
pub struct SudoRunner {
    lvm_path: String,
    sudo_path: String,
}

impl SudoRunner {
    pub fn new(config: &LvmConfig) -> Self {
        SudoRunner {
            lvm_path: config.lvm_path.clone(),
            sudo_path: config.sudo_path.clone(),
        }
    }
}

impl CommandRunner for SudoRunner {
    async fn run(&self, args: &[String]) -> io::Result<RunOutput> {
        let output = Command::new(&self.sudo_path)
            .arg("-n")
            .arg(&self.lvm_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;
        // Killed by signal leaves no exit code.
        let rc = output.status.code().unwrap_or(-1);
        Ok(decode_output(rc, &output.stdout, &output.stderr))
    }
}
