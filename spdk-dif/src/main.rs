//! Write, read back and verify protected blocks on every NVMe namespace.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use env_logger::Env;

use spdk_dif::sim::SimDiscovery;
use spdk_dif::{DifApp, DifAppBuilder, Result, RunSummary};

/// End-to-end data protection demo.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Process name used for hugepage files.
    #[arg(long, default_value = "spdk_dif_demo")]
    name: String,

    /// Shared memory ID; -1 disables multi-process mode.
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    shm_id: i32,

    /// Memory to reserve in MB; SPDK picks a default when unset.
    #[arg(long)]
    mem_size_mb: Option<i32>,

    /// Run without hugepages.
    #[arg(long)]
    no_huge: bool,

    /// Only attach the controller at this transport address.
    #[arg(long)]
    traddr: Option<String>,

    /// Blocks per write and read.
    #[arg(long, default_value_t = 1)]
    blocks: u32,

    /// Starting LBA; also seeds the reference tag.
    #[arg(long, default_value_t = 0)]
    lba: u64,

    /// Application tag (decimal or 0x-prefixed hex).
    #[arg(long, default_value = "0", value_parser = parse_u16)]
    app_tag: u16,

    /// Application tag mask (decimal or 0x-prefixed hex).
    #[arg(long, default_value = "0xffff", value_parser = parse_u16)]
    app_tag_mask: u16,

    /// Give up on a completion after this many queue polls.
    #[arg(long)]
    poll_limit: Option<u64>,

    /// Give up on a completion after this many milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Use in-memory controllers instead of real devices.
    #[arg(long)]
    simulate: bool,
}

fn parse_u16(s: &str) -> std::result::Result<u16, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid 16-bit value '{}': {}", s, e))
}

impl Cli {
    fn builder(&self) -> DifAppBuilder {
        let mut builder = DifApp::builder()
            .name(&self.name)
            .shm_id(self.shm_id)
            .no_huge(self.no_huge)
            .io_blocks(self.blocks)
            .lba(self.lba)
            .app_tag(self.app_tag, self.app_tag_mask);
        if let Some(mb) = self.mem_size_mb {
            builder = builder.mem_size_mb(mb);
        }
        if let Some(traddr) = &self.traddr {
            builder = builder.traddr(traddr);
        }
        if let Some(polls) = self.poll_limit {
            builder = builder.poll_limit(polls);
        }
        if let Some(ms) = self.timeout_ms {
            builder = builder.timeout(Duration::from_millis(ms));
        }
        builder
    }

    fn run(&self) -> Result<RunSummary> {
        let builder = self.builder();
        if self.simulate {
            return builder.run(SimDiscovery::demo());
        }
        run_devices(builder)
    }
}

#[cfg(feature = "spdk")]
fn run_devices(builder: DifAppBuilder) -> Result<RunSummary> {
    builder.run_spdk()
}

#[cfg(not(feature = "spdk"))]
fn run_devices(_builder: DifAppBuilder) -> Result<RunSummary> {
    Err(spdk_dif::Error::EnvInit(
        "built without SPDK support; rebuild with --features spdk or pass --simulate".to_string(),
    ))
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.run() {
        Ok(summary) => ExitCode::from(summary.exit_code() as u8),
        Err(err) => {
            log::error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_u16() {
        assert_eq!(parse_u16("0x1234"), Ok(0x1234));
        assert_eq!(parse_u16("65535"), Ok(0xffff));
        assert!(parse_u16("0x10000").is_err());
        assert!(parse_u16("tag").is_err());
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["spdk_dif_demo", "--simulate"]);
        assert_eq!(cli.blocks, 1);
        assert_eq!(cli.app_tag_mask, 0xffff);
        assert!(cli.simulate);
        assert_eq!(cli.run().unwrap().exit_code(), 0);
    }

    #[test]
    fn test_cli_negative_shm_id() {
        let cli = Cli::parse_from(["spdk_dif_demo", "--shm-id", "-1", "--app-tag", "0xbeef"]);
        assert_eq!(cli.shm_id, -1);
        assert_eq!(cli.app_tag, 0xbeef);
    }
}
