use clap::Parser;
use pointdb_tsdb::engine::pd1::block::decode_block;
use pointdb_tsdb::engine::pd1::data_file::DataFile;
use pointdb_tsdb::engine::pd1::BLOCK_HEADER_SIZE;

/// Dumps the layout of a sealed pd1 data file: trailer, index and per-block
/// summaries.
#[derive(Debug, Parser)]
#[clap(about, version)]
struct Config {
    /// Path to a NNNNNNN.pd1 data file
    #[clap(long)]
    path: String,

    /// Also decode every block and print its value count
    #[clap(long)]
    blocks: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let config = Config::parse();

    let df = DataFile::open(&config.path)?;
    println!("file:         {}", config.path);
    println!("size:         {} bytes", df.size());
    println!("time range:   [{}, {})", df.min_time(), df.max_time());
    println!("series count: {}", df.series_count());
    println!();

    let mut index: Vec<(u64, u32)> = df.id_to_position().into_iter().collect();
    index.sort_unstable();

    for (id, start) in index {
        println!("series {:>20} @ {}", id, start);
        if !config.blocks {
            continue;
        }
        let mut pos = start;
        while let Some((block_id, first_time, block)) = df.block(pos) {
            if block_id != id {
                break;
            }
            match decode_block(block) {
                Ok(values) => println!(
                    "  block @ {:>10}  first time {:>20}  {} values  {} bytes",
                    pos,
                    first_time,
                    values.len(),
                    block.len()
                ),
                Err(e) => println!("  block @ {:>10}  decode error: {}", pos, e),
            }
            pos += BLOCK_HEADER_SIZE + block.len() as u32;
        }
    }
    Ok(())
}
