//! Audio device listing command.

use anyhow::Result;
use clap::Args;
use resona_io::CpalBackend;

#[derive(Args)]
pub struct DevicesArgs {}

pub fn run(_args: DevicesArgs) -> Result<()> {
    let devices = CpalBackend::list_devices()?;
    if devices.is_empty() {
        println!("No audio output devices found.");
        return Ok(());
    }
    println!("Available output devices:");
    for (idx, name) in devices.iter().enumerate() {
        println!("  [{idx}] {name}");
    }
    Ok(())
}
