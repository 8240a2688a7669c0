//! Race session: the 3-2-1-GO countdown and the `has_started` gate.
//!
//! The simulation only ever reads this; the server loop owns and ticks it.

use log::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownEvent {
    Count(u32),
    Go,
}

#[derive(Debug, Clone)]
pub struct RaceSession {
    has_started: bool,
    remaining: f32,
    shown: Option<u32>,
}

impl RaceSession {
    pub fn new(countdown: f32) -> Self {
        Self {
            has_started: false,
            remaining: countdown.max(0.0),
            shown: None,
        }
    }

    /// Already racing (tests, headless tools).
    pub fn started() -> Self {
        Self {
            has_started: true,
            remaining: 0.0,
            shown: None,
        }
    }

    pub fn has_started(&self) -> bool {
        self.has_started
    }

    /// Whole seconds left, for the HUD. `None` once racing.
    pub fn countdown(&self) -> Option<u32> {
        if self.has_started {
            None
        } else {
            Some(self.remaining.ceil() as u32)
        }
    }

    pub fn tick(&mut self, dt: f32) -> Option<CountdownEvent> {
        if self.has_started {
            return None;
        }

        if self.remaining <= 0.0 {
            self.has_started = true;
            info!("🏁 GO!");
            return Some(CountdownEvent::Go);
        }

        let shown = self.remaining.ceil() as u32;
        self.remaining -= dt;

        if self.shown != Some(shown) {
            self.shown = Some(shown);
            info!("⏱️ {shown}...");
            return Some(CountdownEvent::Count(shown));
        }
        None
    }
}
