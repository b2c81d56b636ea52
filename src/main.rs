use std::sync::Arc;

use blescout::{
    AlwaysAllowed, BleSession, BtleplugRadio, ScanStopReason, SessionConfig, SessionEvent,
    SettingsService,
};
use tokio::sync::mpsc;
use tracing::info;

/// Demo CLI: run one scan session and print what was found.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings_service = SettingsService::new()?;
    let _logging_guard =
        blescout::infrastructure::logging::init_logger(&settings_service.get().log_settings)
            .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
            .ok();

    info!("Starting blescout");

    let adapter = Arc::new(BtleplugRadio::new().await?);
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let session = BleSession::new(
        adapter,
        Arc::new(AlwaysAllowed),
        SessionConfig::from(settings_service.get()),
        event_tx,
    );

    session.start_scan().await?;

    while let Some(event) = event_rx.recv().await {
        match event {
            SessionEvent::DeviceDiscovered(record) => {
                println!(
                    "{:<24} {:<20} {:>4} dBm",
                    record.display_name(),
                    record.id,
                    record.rssi.map(|r| r.to_string()).unwrap_or_default()
                );
            }
            SessionEvent::ScanStopped(reason) => {
                if let ScanStopReason::Failed(e) = reason {
                    eprintln!("scan failed: {e}");
                }
                break;
            }
            _ => {}
        }
    }

    let devices = session.discovered_devices();
    println!("{} device(s) discovered", devices.len());
    Ok(())
}
