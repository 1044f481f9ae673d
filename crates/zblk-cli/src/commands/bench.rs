//! Bench command: run a mixed workload against a fresh device.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::Args;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use zblk_core::{Device, DeviceConfig, DeviceRegistry, PAGE_SIZE};

use crate::output::{format_size, parse_size, OutputFormat};

/// Arguments for bench command.
#[derive(Args)]
pub struct BenchArgs {
    /// Device size (accepts K/M/G suffixes).
    #[arg(short, long, default_value = "64M")]
    pub size: String,

    /// Compression algorithm.
    #[arg(short, long, default_value = "lz4")]
    pub algorithm: String,

    /// Number of compression streams (0 = one per core).
    #[arg(long, default_value_t = 0)]
    pub streams: u32,

    /// Memory ceiling (accepts K/M/G suffixes, 0 = unlimited).
    #[arg(long, default_value = "0")]
    pub mem_limit: String,

    /// Concurrent worker threads.
    #[arg(short, long, default_value_t = 4)]
    pub threads: u32,

    /// Percentage of zero pages in the workload (0-100).
    #[arg(long, default_value_t = 30)]
    pub zero_percent: u8,
}

#[derive(Serialize)]
struct BenchReport {
    algorithm: String,
    disksize: u64,
    pages_written: u64,
    write_mib_s: f64,
    read_mib_s: f64,
    compression_ratio: f64,
    mem_used: u64,
    same_pages: u64,
    writestall: u64,
}

/// Run the workload and report throughput plus device statistics.
pub fn bench(args: &BenchArgs, format: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let disksize = parse_size(&args.size)?;
    let mem_limit = parse_size(&args.mem_limit)?;

    let registry = DeviceRegistry::new();
    let device = registry.add(None)?;
    device
        .configure(&DeviceConfig {
            disksize,
            algorithm: args.algorithm.clone(),
            streams: args.streams,
            mem_limit,
        })
        .context("device configuration failed")?;

    let total_pages = device.disksize() / PAGE_SIZE as u64;
    let threads = u64::from(args.threads.max(1)).min(total_pages);
    let pages_per_thread = total_pages / threads;
    tracing::info!(
        disksize,
        algorithm = %args.algorithm,
        threads,
        "bench device configured"
    );

    let start = Instant::now();
    run_phase(&device, threads, pages_per_thread, args.zero_percent, Phase::Write);
    let write_secs = start.elapsed().as_secs_f64();
    tracing::info!(write_secs, "write phase done");

    let start = Instant::now();
    run_phase(&device, threads, pages_per_thread, args.zero_percent, Phase::Read);
    let read_secs = start.elapsed().as_secs_f64();
    tracing::info!(read_secs, "read phase done");

    let pages_written = threads * pages_per_thread;
    #[allow(clippy::cast_precision_loss)]
    let mib = (pages_written * PAGE_SIZE as u64) as f64 / (1024.0 * 1024.0);
    let mm = device.mm_stats();
    let io = device.io_stats();

    let report = BenchReport {
        algorithm: args.algorithm.clone(),
        disksize,
        pages_written,
        write_mib_s: mib / write_secs,
        read_mib_s: mib / read_secs,
        compression_ratio: mm.compression_ratio(),
        mem_used: mm.mem_used_total,
        same_pages: mm.same_pages,
        writestall: io.writestall,
    };

    match format {
        OutputFormat::Table => {
            println!("algorithm:    {}", report.algorithm);
            println!("disksize:     {}", format_size(report.disksize));
            println!("pages:        {}", report.pages_written);
            println!("write:        {:.1} MiB/s", report.write_mib_s);
            println!("read:         {:.1} MiB/s", report.read_mib_s);
            println!("ratio:        {:.2}x", report.compression_ratio);
            println!("mem used:     {}", format_size(report.mem_used));
            println!("same pages:   {}", report.same_pages);
            println!("write stalls: {}", report.writestall);
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Raw => println!(
            "{} {} {:.1} {:.1} {:.2} {} {} {}",
            report.algorithm,
            report.pages_written,
            report.write_mib_s,
            report.read_mib_s,
            report.compression_ratio,
            report.mem_used,
            report.same_pages,
            report.writestall
        ),
    }
    Ok(())
}

#[derive(Clone, Copy)]
enum Phase {
    Write,
    Read,
}

fn run_phase(device: &Arc<Device>, threads: u64, pages_per_thread: u64, zero_percent: u8, phase: Phase) {
    std::thread::scope(|scope| {
        for t in 0..threads {
            let device = Arc::clone(device);
            scope.spawn(move || {
                let mut rng = rand::rngs::StdRng::seed_from_u64(t);
                let base = t * pages_per_thread;
                let mut page = [0u8; PAGE_SIZE];
                for p in 0..pages_per_thread {
                    let offset = (base + p) * PAGE_SIZE as u64;
                    match phase {
                        Phase::Write => {
                            if rng.gen_range(0..100) < u32::from(zero_percent) {
                                page.fill(0);
                            } else {
                                rng.fill(&mut page[..]);
                            }
                            device.write(offset, &page).expect("bench write");
                        }
                        Phase::Read => {
                            device.read(offset, &mut page).expect("bench read");
                        }
                    }
                }
            });
        }
    });
}
