//! Minimal discovery walk-through.
//!
//! Starts the tracker, waits for devices to become ready and prints their
//! materialized description tree.
//!
//! Usage:
//!   cargo run --example discover

use std::time::Duration;

use ariacontrol::{TrackerEvent, UpnpNetworkTracker};
use ariaupnp::DiscoveryConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = tracing_subscriber::fmt::try_init();

    let tracker = UpnpNetworkTracker::new(DiscoveryConfig::default())?;
    let events = tracker.subscribe();
    tracker.start().await?;
    println!("Listening for UPnP devices for 15 seconds...");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    while tokio::time::Instant::now() < deadline {
        let event = match events.try_recv() {
            Ok(event) => event,
            Err(_) => {
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };
        match event {
            TrackerEvent::DeviceAdded(descriptor) => {
                let description = descriptor.device_description();
                let name = description
                    .as_ref()
                    .and_then(|d| d.friendly_name.clone())
                    .unwrap_or_else(|| "<unnamed>".to_string());
                println!("+ {} ({})", name, descriptor.root_device_uuid);
                if let Some(description) = description {
                    for device in description.all_devices() {
                        for service in &device.services {
                            println!("    service {}", service.service_type_version_urn());
                        }
                    }
                }
            }
            TrackerEvent::DeviceRemoved(descriptor) => {
                println!("- {}", descriptor.root_device_uuid);
            }
            TrackerEvent::DeviceRebooted(descriptor) => {
                println!("~ {} rebooted", descriptor.root_device_uuid);
            }
        }
    }

    println!("\n{} device(s) ready:", tracker.ready_root_devices().len());
    for descriptor in tracker.ready_root_devices() {
        println!("  {} @ {}", descriptor.root_device_uuid, descriptor.description_location);
    }

    tracker.close();
    Ok(())
}
