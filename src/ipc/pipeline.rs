use anyhow::Result;
use log::{debug, info, warn};
use std::{
    sync::{Arc, Mutex, mpsc::Sender},
    thread,
    time::Duration,
};

use evdev::{AbsoluteAxisCode, Device, EventType, SynchronizationCode};

use super::server::Inbox;
use crate::config::Display;
use crate::input;
use crate::tracker::Tracker;

/// Reads every multitouch device and forwards first-pointer touch-downs to
/// the daemon inbox. Returns when no device is usable or the daemon is gone.
pub fn run_pipeline(display: Arc<Mutex<Display>>, tx: Sender<Inbox>) -> Result<()> {
    let devices = input::discover_multitouch();
    if devices.is_empty() {
        warn!("no multitouch devices detected; touches only arrive over IPC");
        return Ok(());
    }

    let mut devs: Vec<Device> = vec![];
    for d in devices {
        match Device::open(&d.path) {
            Ok(mut dev) => {
                let _ = dev.set_nonblocking(true);
                info!("touch input: {} ({})", d.name, d.path);
                devs.push(dev);
            }
            Err(e) => warn!("failed to open {}: {e}", d.path),
        }
    }
    if devs.is_empty() {
        warn!("failed to open all detected devices; touches only arrive over IPC");
        return Ok(());
    }

    let mut tracker = Tracker::new();

    loop {
        if let Ok(d) = display.lock() {
            tracker.set_norm_ranges(0, d.raw_x_max, 0, d.raw_y_max);
        }

        let mut any_event = false;
        for dev in devs.iter_mut() {
            let Ok(events) = dev.fetch_events() else {
                continue;
            };
            for ev in events {
                any_event = true;

                if ev.event_type() == EventType::ABSOLUTE {
                    match ev.code() {
                        c if c == AbsoluteAxisCode::ABS_MT_SLOT.0 => tracker.on_slot(ev.value()),
                        c if c == AbsoluteAxisCode::ABS_MT_TRACKING_ID.0 => {
                            tracker.on_tracking_id(ev.value())
                        }
                        c if c == AbsoluteAxisCode::ABS_MT_POSITION_X.0 => {
                            tracker.on_pos_x(ev.value())
                        }
                        c if c == AbsoluteAxisCode::ABS_MT_POSITION_Y.0 => {
                            tracker.on_pos_y(ev.value())
                        }
                        _ => {}
                    }
                } else if ev.event_type() == EventType::SYNCHRONIZATION
                    && ev.code() == SynchronizationCode::SYN_REPORT.0
                {
                    if let Some(down) = tracker.on_syn_report() {
                        debug!("pointer down {down:?} ({} active)", tracker.active_count());
                        if tx.send(Inbox::Pointer(down)).is_err() {
                            return Ok(());
                        }
                    }
                }
            }
        }

        if !any_event {
            thread::sleep(Duration::from_millis(4));
        }
    }
}
