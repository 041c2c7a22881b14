//! Scripted multi-device scenario.
//!
//! Devices join a full mesh, publish their participant anchors, the first
//! device taps effects, a second device resets tracking and the last device
//! leaves. The report captures what every remaining device ends up with.

use crate::config::SimConfig;
use crate::device::{settle, Result, SimDevice};
use crate::loopback::LoopbackNetwork;
use ar_sync_core::{Pose, SessionEvent};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Callback receiving every device's session events.
pub type Observer = Arc<dyn Fn(&str, &SessionEvent) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceReport {
    pub name: String,
    pub peer: String,
    pub session: Option<String>,
    pub known_sessions: usize,
    pub anchors: usize,
    pub visuals: usize,
    pub payloads_sent: u64,
    pub payloads_merged: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioReport {
    pub connections: usize,
    pub rejected: usize,
    pub taps: usize,
    pub devices: Vec<DeviceReport>,
}

pub async fn run(config: &SimConfig, observer: Option<Observer>) -> Result<ScenarioReport> {
    let network = LoopbackNetwork::new(config.loss_rate);
    let mut devices = Vec::with_capacity(config.devices);
    for i in 0..config.devices {
        let mut device = SimDevice::start(format!("device-{}", i), &network, config.sync.clone())?;
        if let Some(observer) = &observer {
            let observer = Arc::clone(observer);
            device.observe(move |name, event| observer(name, event));
        }
        devices.push(device);
    }

    // Full mesh, in join order
    let mut connections = 0;
    let mut rejected = 0;
    for i in 0..devices.len() {
        for j in (i + 1)..devices.len() {
            if network.connect(devices[i].peer(), devices[j].peer()).await? {
                connections += 1;
            } else {
                rejected += 1;
            }
            settle(&devices).await?;
        }
    }
    info!("Mesh formed: {} connection(s), {} rejected", connections, rejected);

    exchange(&mut devices).await?;

    // Effects from the first device
    let mut taps = 0;
    if let Some(first) = devices.first_mut() {
        for i in 0..config.taps {
            first.tap(Pose::at(0.1 * i as f32, 0.0, -1.0)).await?;
            taps += 1;
        }
    }
    for device in &devices {
        device.stream_features(256)?;
    }
    exchange(&mut devices).await?;

    // Let every effect expire, then propagate the removals
    tokio::time::sleep(config.sync.effect_lifetime() + Duration::from_millis(50)).await;
    settle(&devices).await?;
    exchange(&mut devices).await?;

    if let Some(second) = devices.get_mut(1) {
        second.reset_tracking()?;
        settle(&devices).await?;
        exchange(&mut devices).await?;
    }

    if devices.len() > 2 {
        if let Some(last) = devices.pop() {
            last.leave(&network).await;
            settle(&devices).await?;
        }
    }

    let mut reports = Vec::with_capacity(devices.len());
    for device in &devices {
        let status = device.status().await?;
        reports.push(DeviceReport {
            name: device.name().to_string(),
            peer: device.peer().to_string(),
            session: device.session().map(|s| s.to_string()),
            known_sessions: status.peer_sessions.len(),
            anchors: device.engine().anchors().len(),
            visuals: device.scene().len(),
            payloads_sent: status.relay.sent,
            payloads_merged: status.relay.merged,
        });
    }

    for device in devices {
        device.leave(&network).await;
    }

    Ok(ScenarioReport {
        connections,
        rejected,
        taps,
        devices: reports,
    })
}

/// Flush every device's local changes and merge what arrives.
async fn exchange(devices: &mut [SimDevice]) -> Result<()> {
    for device in devices.iter_mut() {
        device.flush()?;
    }
    settle(devices).await?;
    for device in devices.iter_mut() {
        device.pump()?;
    }
    settle(devices).await
}
