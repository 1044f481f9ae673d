//! Verify command: round-trip, same-fill and discard self-checks.

use clap::Args;
use rand::{Rng, SeedableRng};
use zblk_core::{Device, DeviceConfig, PAGE_SIZE};

use crate::output::parse_size;

const PAGE: u64 = PAGE_SIZE as u64;

/// Arguments for verify command.
#[derive(Args)]
pub struct VerifyArgs {
    /// Device size (accepts K/M/G suffixes).
    #[arg(short, long, default_value = "16M")]
    pub size: String,

    /// Compression algorithm.
    #[arg(short, long, default_value = "lz4")]
    pub algorithm: String,
}

/// Run the self-checks, printing one line per check.
pub fn verify(args: &VerifyArgs) -> Result<(), Box<dyn std::error::Error>> {
    let disksize = parse_size(&args.size)?;
    let device = Device::new(0);
    device.configure(&DeviceConfig {
        disksize,
        algorithm: args.algorithm.clone(),
        ..DeviceConfig::default()
    })?;

    let mut rng = rand::rngs::StdRng::seed_from_u64(0xB10C);
    let pages = device.disksize() / PAGE;
    tracing::info!(algorithm = %args.algorithm, pages, "running self-checks");

    check("round-trip", || {
        let mut page = [0u8; PAGE_SIZE];
        for i in 0..pages.min(256) {
            rng.fill(&mut page[..]);
            device.write(i * PAGE, &page)?;
            let mut out = [0u8; PAGE_SIZE];
            device.read(i * PAGE, &mut out)?;
            if out != page {
                return Err(format!("page {i} mismatch").into());
            }
        }
        Ok(())
    })?;

    check("same-fill", || {
        let before = device.mm_stats().same_pages;
        device.write(0, &[0xEEu8; PAGE_SIZE])?;
        if device.mm_stats().same_pages != before + 1 {
            return Err("same-page counter did not advance".into());
        }
        let mut out = [0u8; PAGE_SIZE];
        device.read(0, &mut out)?;
        if out != [0xEEu8; PAGE_SIZE] {
            return Err("same-fill read-back mismatch".into());
        }
        Ok(())
    })?;

    check("partial write", || {
        device.write(0, &[0x11u8; PAGE_SIZE])?;
        device.write(512, &[0x22u8; 512])?;
        let mut out = [0u8; PAGE_SIZE];
        device.read(0, &mut out)?;
        let ok = out[..512].iter().all(|&b| b == 0x11)
            && out[512..1024].iter().all(|&b| b == 0x22)
            && out[1024..].iter().all(|&b| b == 0x11);
        if !ok {
            return Err("merged page mismatch".into());
        }
        Ok(())
    })?;

    check("discard", || {
        device.write(PAGE, &[0x33u8; PAGE_SIZE])?;
        device.discard(PAGE, PAGE)?;
        let mut out = [0xFFu8; PAGE_SIZE];
        device.read(PAGE, &mut out)?;
        if out.iter().any(|&b| b != 0) {
            return Err("discarded page not zero".into());
        }
        Ok(())
    })?;

    check("compaction", || {
        device.compact()?;
        Ok(())
    })?;

    println!("all checks passed ({})", args.algorithm);
    Ok(())
}

fn check(
    name: &str,
    f: impl FnOnce() -> Result<(), Box<dyn std::error::Error>>,
) -> Result<(), Box<dyn std::error::Error>> {
    match f() {
        Ok(()) => {
            tracing::debug!(name, "check passed");
            println!("{name:<16} ok");
            Ok(())
        }
        Err(e) => {
            println!("{name:<16} FAILED: {e}");
            Err(e)
        }
    }
}
