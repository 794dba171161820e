//! eBPF object loading and program attachment on top of aya

use super::maps::EbpfRingBuf;
use super::{AttachError, Module, RingBufReader};
use crate::config::{Config, ProgramConfig};
use crate::{Result, SinkError};
use aya::maps::RingBuf;
use aya::programs::{KProbe, TracePoint};
use aya::Ebpf;
use aya_log::EbpfLogger;
use std::path::Path;
use tracing::{debug, info, warn};

/// A loaded eBPF object with its programs attached
pub struct EbpfModule {
    bpf: Ebpf,
    _logger: Option<EbpfLogger>,
}

impl EbpfModule {
    /// Load the configured object and attach every configured program
    pub fn load(config: &Config) -> Result<Self> {
        let object = config
            .object
            .as_deref()
            .ok_or_else(|| SinkError::Config("`object` is required to run".to_string()))?;

        run_preflight_checks()?;
        bump_memlock_rlimit();

        info!("Loading eBPF object {}", object.display());
        let mut bpf = Ebpf::load_file(object)
            .map_err(|e| SinkError::ModuleLoad(format!("{}: {}", object.display(), e)))?;

        let logger = match EbpfLogger::init(&mut bpf) {
            Ok(logger) => Some(logger),
            Err(e) => {
                debug!("eBPF logger not initialized: {}", e);
                None
            }
        };

        for program in &config.programs {
            attach_program(&mut bpf, program)?;
        }

        Ok(Self {
            bpf,
            _logger: logger,
        })
    }

    pub fn map_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.bpf.maps().map(|(name, _)| name.to_string()).collect();
        names.sort();
        names
    }
}

impl Module for EbpfModule {
    fn ring_buf(&mut self, name: &str) -> std::result::Result<Box<dyn RingBufReader>, AttachError> {
        // Collect map names first so the error can list them
        let available = self.map_names();
        let map = self
            .bpf
            .take_map(name)
            .ok_or(AttachError::NotFound { available })?;

        let ring_buf =
            RingBuf::try_from(map).map_err(|e| AttachError::Incompatible(e.to_string()))?;

        Ok(Box::new(EbpfRingBuf::new(ring_buf)))
    }
}

fn attach_program(bpf: &mut Ebpf, program: &ProgramConfig) -> Result<()> {
    let attach_err = |cause: String| SinkError::ProgramAttach {
        program: program.name.clone(),
        cause,
    };

    let prog = bpf
        .program_mut(&program.name)
        .ok_or_else(|| attach_err("program not found in eBPF object".to_string()))?;

    match (&program.tracepoint, &program.kprobe) {
        (Some(tracepoint), _) => {
            let (category, name) = tracepoint
                .split_once('/')
                .ok_or_else(|| attach_err(format!("invalid tracepoint {:?}", tracepoint)))?;
            let tp: &mut TracePoint = prog.try_into().map_err(|e| attach_err(format!("{}", e)))?;
            tp.load().map_err(|e| attach_err(e.to_string()))?;
            tp.attach(category, name)
                .map_err(|e| attach_err(e.to_string()))?;
            info!("Attached {} to tracepoint {}", program.name, tracepoint);
        }
        (None, Some(symbol)) => {
            let probe: &mut KProbe = prog.try_into().map_err(|e| attach_err(format!("{}", e)))?;
            probe.load().map_err(|e| attach_err(e.to_string()))?;
            probe
                .attach(symbol.as_str(), 0)
                .map_err(|e| attach_err(e.to_string()))?;
            info!("Attached {} to kprobe {}", program.name, symbol);
        }
        (None, None) => return Err(attach_err("no attach point configured".to_string())),
    }

    Ok(())
}

/// Older kernels account eBPF maps against RLIMIT_MEMLOCK
fn bump_memlock_rlimit() {
    let rlim = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) };
    if ret != 0 {
        warn!("Failed to remove limit on locked memory, ret is: {}", ret);
    }
}

/// Run pre-flight checks to validate the system can run eBPF programs
fn run_preflight_checks() -> Result<()> {
    info!("Running pre-flight checks...");

    check_kernel_version()?;
    check_btf();
    check_capabilities();

    info!("Pre-flight checks passed");
    Ok(())
}

/// BPF ring buffers need kernel 5.8+
fn check_kernel_version() -> Result<()> {
    let release = std::fs::read_to_string("/proc/sys/kernel/osrelease")?;
    let release = release.trim();

    let (major, minor) = parse_kernel_release(release).ok_or_else(|| {
        SinkError::UnsupportedPlatform(format!("could not parse kernel version {:?}", release))
    })?;

    if (major, minor) < (5, 8) {
        return Err(SinkError::UnsupportedPlatform(format!(
            "kernel {} is too old, BPF ring buffers require 5.8+",
            release
        )));
    }

    info!("Kernel version: {} (supported)", release);
    Ok(())
}

fn parse_kernel_release(release: &str) -> Option<(u32, u32)> {
    let mut parts = release.split('.');
    let major = parts.next()?.trim().parse().ok()?;
    let minor_str = parts.next()?;
    let minor = minor_str
        .split(|c: char| !c.is_ascii_digit())
        .next()?
        .parse()
        .ok()?;
    Some((major, minor))
}

fn check_btf() {
    if !Path::new("/sys/kernel/btf/vmlinux").exists() {
        warn!("BTF not found at /sys/kernel/btf/vmlinux; CO-RE relocations may fail");
        return;
    }
    info!("BTF available");
}

fn check_capabilities() {
    let euid = unsafe { libc::geteuid() };

    if euid != 0 {
        warn!(
            "Not running as root (euid={}). Ensure CAP_BPF and CAP_PERFMON are granted.",
            euid
        );
    } else {
        info!("Running with root privileges");
    }
}
