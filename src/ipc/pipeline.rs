use anyhow::Result;
use log::{debug, info, warn};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use evdev::Device;
use touchrec::GestureSession;

use crate::input::{self, SlotAssembler};

fn idle_until_stopped(stop: &AtomicBool) {
    while !stop.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(200));
    }
}

/// Reads every multitouch device and pushes assembled frames into `session`
/// until `stop` is raised.
pub fn run_pipeline(session: Arc<GestureSession>, stop: Arc<AtomicBool>) -> Result<()> {
    let devices = input::discover_multitouch();
    if devices.is_empty() {
        warn!("no multitouch devices detected; pipeline idle");
        idle_until_stopped(&stop);
        return Ok(());
    }

    let mut devs: Vec<(Device, SlotAssembler)> = vec![];
    for d in devices {
        match Device::open(&d.path) {
            Ok(mut dev) => {
                let _ = dev.set_nonblocking(true);
                info!("reading {} ({})", d.name, d.path);
                devs.push((dev, SlotAssembler::default()));
            }
            Err(e) => warn!("failed to open {}: {e}", d.path),
        }
    }
    if devs.is_empty() {
        warn!("failed to open all detected devices; pipeline idle");
        idle_until_stopped(&stop);
        return Ok(());
    }

    let mut last_hint = String::new();
    while !stop.load(Ordering::Relaxed) {
        let mut any_event = false;

        for (dev, assembler) in devs.iter_mut() {
            let Ok(events) = dev.fetch_events() else {
                continue;
            };
            for ev in events {
                any_event = true;
                let Some(frame) = assembler.on_event(&ev) else {
                    continue;
                };
                let hint = session.add_frame(frame);
                if hint != last_hint {
                    if !hint.is_empty() {
                        debug!("[gesture] {hint}");
                    }
                    last_hint = hint;
                }
            }
        }

        if !any_event {
            thread::sleep(Duration::from_millis(4));
        }
    }
    info!("pipeline stopped");
    Ok(())
}
