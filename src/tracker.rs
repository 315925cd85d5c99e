//! Per-slot touch tracking, collapsed to the first active pointer.

#[derive(Debug, Clone, Default)]
struct SlotState {
    tracking_id: i32, // -1 = inactive
    x_norm: f32,
    y_norm: f32,
    active: bool,
}

/// Touch-down of the primary pointer, in normalized [0, 1] coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerDown {
    pub x_norm: f32,
    pub y_norm: f32,
}

impl PointerDown {
    /// Scales to viewport pixels, keeping the point inside `[0, w) x [0, h)`.
    pub fn to_viewport(&self, viewport: (u32, u32)) -> (f32, f32) {
        let (w, h) = viewport;
        let clamp = |v: f32, max: u32| (v * max as f32).clamp(0.0, (max as f32 - 1.0).max(0.0));
        (clamp(self.x_norm, w), clamp(self.y_norm, h))
    }
}

#[derive(Debug)]
pub struct Tracker {
    slots: Vec<SlotState>,
    cur_slot: i32,
    // normalization
    x_min: i32,
    x_max: i32,
    y_min: i32,
    y_max: i32,
    // a pointer was down at the previous report
    was_down: bool,
    pending_down: bool,
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Tracker {
    pub fn new() -> Self {
        Self {
            slots: vec![SlotState::default(); 10],
            cur_slot: 0,
            x_min: 0,
            x_max: 4096,
            y_min: 0,
            y_max: 4096,
            was_down: false,
            pending_down: false,
        }
    }

    pub fn set_norm_ranges(&mut self, x_min: i32, x_max: i32, y_min: i32, y_max: i32) {
        self.x_min = x_min;
        self.x_max = x_max.max(x_min + 1);
        self.y_min = y_min;
        self.y_max = y_max.max(y_min + 1);
    }

    pub fn on_slot(&mut self, slot: i32) {
        self.cur_slot = slot.clamp(0, (self.slots.len() as i32) - 1);
    }

    pub fn on_tracking_id(&mut self, tracking_id: i32) {
        let s = &mut self.slots[self.cur_slot as usize];
        if tracking_id < 0 {
            s.tracking_id = -1;
            s.active = false;
        } else {
            // the kernel omits unchanged axes, so keep the last known position
            s.tracking_id = tracking_id;
            s.active = true;
            self.pending_down = true;
        }
    }

    pub fn on_pos_x(&mut self, raw: i32) {
        let nx = ((raw - self.x_min) as f32 / (self.x_max - self.x_min) as f32).clamp(0.0, 1.0);
        self.slots[self.cur_slot as usize].x_norm = nx;
    }

    pub fn on_pos_y(&mut self, raw: i32) {
        let ny = ((raw - self.y_min) as f32 / (self.y_max - self.y_min) as f32).clamp(0.0, 1.0);
        self.slots[self.cur_slot as usize].y_norm = ny;
    }

    pub fn active_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.active && s.tracking_id >= 0)
            .count()
    }

    /// Closes a frame. Returns a touch-down only when the first finger lands;
    /// fingers joining an ongoing touch are swallowed.
    pub fn on_syn_report(&mut self) -> Option<PointerDown> {
        let primary = self
            .slots
            .iter()
            .find(|s| s.active && s.tracking_id >= 0)
            .map(|s| PointerDown {
                x_norm: s.x_norm,
                y_norm: s.y_norm,
            });
        let began = primary.is_some() && !self.was_down && self.pending_down;
        self.was_down = primary.is_some();
        self.pending_down = false;
        if began { primary } else { None }
    }
}
