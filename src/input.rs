//! Input device discovery & multitouch slot assembly (evdev 0.13.2 compatible)

use std::time::Instant;

use evdev::{AbsoluteAxisCode, Device, EventType, InputEvent, SynchronizationCode};
use touchrec::{Frame, Touch};

#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
}

pub fn discover_multitouch() -> Vec<DeviceInfo> {
    let mut out = vec![];
    if let Ok(rd) = std::fs::read_dir("/dev/input") {
        for e in rd.flatten() {
            let p = e.path();
            if !p
                .file_name()
                .and_then(|s| s.to_str())
                .is_some_and(|s| s.starts_with("event"))
            {
                continue;
            }
            if let Ok(dev) = Device::open(&p) {
                let has_abs = dev.supported_events().contains(EventType::ABSOLUTE);
                let has_mt = dev.supported_absolute_axes().is_some_and(|a| {
                    a.contains(AbsoluteAxisCode::ABS_MT_SLOT)
                        && a.contains(AbsoluteAxisCode::ABS_MT_POSITION_X)
                        && a.contains(AbsoluteAxisCode::ABS_MT_POSITION_Y)
                });
                if has_abs && has_mt {
                    out.push(DeviceInfo {
                        path: p.display().to_string(),
                        name: dev.name().unwrap_or("unknown").to_string(),
                    });
                }
            }
        }
    }
    out
}

#[derive(Debug, Clone, Default)]
struct SlotState {
    tracking_id: i32, // -1 = inactive
    x: f32,
    y: f32,
    major: f32,
    minor: f32,
    pressure: f32,
    active: bool,
}

/// Turns the type-B multitouch protocol (slots + `SYN_REPORT`) into frames
/// of raw device coordinates.
#[derive(Debug)]
pub struct SlotAssembler {
    slots: Vec<SlotState>,
    // None while the device addresses a slot past our capacity
    cur_slot: Option<usize>,
    start_instant: Instant,
}

impl Default for SlotAssembler {
    fn default() -> Self {
        Self::new(touchrec::MAX_BLOBS)
    }
}

impl SlotAssembler {
    pub fn new(slot_count: usize) -> Self {
        Self {
            slots: vec![
                SlotState {
                    tracking_id: -1,
                    ..SlotState::default()
                };
                slot_count.max(1)
            ],
            cur_slot: Some(0),
            start_instant: Instant::now(),
        }
    }

    fn now_ms(&self) -> u64 {
        self.start_instant.elapsed().as_millis() as u64
    }

    fn slot(&mut self) -> Option<&mut SlotState> {
        self.cur_slot.and_then(|i| self.slots.get_mut(i))
    }

    /// Slots beyond capacity are ignored until the device selects a valid one.
    pub fn on_slot(&mut self, slot: i32) {
        self.cur_slot = usize::try_from(slot).ok().filter(|&i| i < self.slots.len());
    }

    pub fn on_tracking_id(&mut self, tracking_id: i32) {
        let Some(s) = self.slot() else {
            return;
        };
        if tracking_id < 0 {
            s.tracking_id = -1;
            s.active = false;
        } else {
            // new contact keeps the last position until the device reports one
            *s = SlotState {
                tracking_id,
                active: true,
                ..s.clone()
            };
        }
    }

    pub fn on_pos_x(&mut self, raw: i32) {
        if let Some(s) = self.slot() {
            s.x = raw as f32;
        }
    }

    pub fn on_pos_y(&mut self, raw: i32) {
        if let Some(s) = self.slot() {
            s.y = raw as f32;
        }
    }

    pub fn on_touch_major(&mut self, raw: i32) {
        if let Some(s) = self.slot() {
            s.major = raw as f32;
        }
    }

    pub fn on_touch_minor(&mut self, raw: i32) {
        if let Some(s) = self.slot() {
            s.minor = raw as f32;
        }
    }

    pub fn on_pressure(&mut self, raw: i32) {
        if let Some(s) = self.slot() {
            s.pressure = raw as f32;
        }
    }

    /// Feeds one event; returns a frame on `SYN_REPORT`.
    pub fn on_event(&mut self, ev: &InputEvent) -> Option<Frame> {
        if ev.event_type() == EventType::ABSOLUTE {
            match ev.code() {
                c if c == AbsoluteAxisCode::ABS_MT_SLOT.0 => self.on_slot(ev.value()),
                c if c == AbsoluteAxisCode::ABS_MT_TRACKING_ID.0 => self.on_tracking_id(ev.value()),
                c if c == AbsoluteAxisCode::ABS_MT_POSITION_X.0 => self.on_pos_x(ev.value()),
                c if c == AbsoluteAxisCode::ABS_MT_POSITION_Y.0 => self.on_pos_y(ev.value()),
                c if c == AbsoluteAxisCode::ABS_MT_TOUCH_MAJOR.0 => self.on_touch_major(ev.value()),
                c if c == AbsoluteAxisCode::ABS_MT_TOUCH_MINOR.0 => self.on_touch_minor(ev.value()),
                c if c == AbsoluteAxisCode::ABS_MT_PRESSURE.0 => self.on_pressure(ev.value()),
                _ => {}
            }
        } else if ev.event_type() == EventType::SYNCHRONIZATION
            && ev.code() == SynchronizationCode::SYN_REPORT.0
        {
            return Some(self.on_syn_report());
        }
        None
    }

    pub fn on_syn_report(&mut self) -> Frame {
        let touches = self
            .slots
            .iter()
            .filter(|s| s.active && s.tracking_id >= 0)
            .enumerate()
            .map(|(i, s)| Touch {
                id: i as u32,
                x: s.x,
                y: s.y,
                dim_x: s.major,
                dim_y: if s.minor > 0.0 { s.minor } else { s.major },
                intensity: s.pressure,
            })
            .collect();
        Frame::new(self.now_ms(), touches)
    }
}
