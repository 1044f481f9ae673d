//! Info command: supported algorithms and device constants.

use serde::Serialize;
use zblk_core::{Algorithm, LOGICAL_BLOCK_SIZE, PAGE_SIZE};

use crate::output::OutputFormat;

#[derive(Serialize)]
struct InfoOutput {
    algorithms: Vec<&'static str>,
    page_size: usize,
    logical_block_size: usize,
}

/// Print supported algorithms and constants.
pub fn info(format: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let out = InfoOutput {
        algorithms: Algorithm::known().to_vec(),
        page_size: PAGE_SIZE,
        logical_block_size: LOGICAL_BLOCK_SIZE,
    };

    match format {
        OutputFormat::Table => {
            println!("algorithms:         {}", out.algorithms.join(", "));
            println!("page size:          {}", out.page_size);
            println!("logical block size: {}", out.logical_block_size);
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&out)?),
        OutputFormat::Raw => {
            println!(
                "{} {} {}",
                out.algorithms.join(","),
                out.page_size,
                out.logical_block_size
            );
        }
    }
    Ok(())
}
