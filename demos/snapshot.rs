//! Fetches the station page once and prints the classified snapshot.
//!
//! cargo run --example snapshot -- path/to/config.json

use std::env;
use std::path::PathBuf;
use tiempo::{Tiempo, TiempoConfig, TiempoError};

#[tokio::main]
async fn main() -> Result<(), TiempoError> {
    // RUST_LOG=info shows fetch and cache activity
    env_logger::init();

    let path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("tiempo.json"));
    let config = TiempoConfig::from_json_file(&path)?;
    let tiempo = Tiempo::new(config)?;

    let response = tiempo.get_snapshot().await?;
    let snapshot = &response.snapshot;

    println!("{} {}", snapshot.risk.emoji, snapshot.risk.label);
    if let Some(latest) = snapshot.latest_hourly() {
        println!(
            "{}: lluvia {:?} mm, {:?} °C, HR {:?}% ({})",
            latest.fecha, latest.lluvia_mm, latest.temp_c, latest.hr_pct, snapshot.rain.label
        );
    }
    for diag in &snapshot.diagnostics {
        println!("skipped: {}", diag);
    }
    println!("Cache-Control: {}", response.cache_control());

    Ok(())
}
