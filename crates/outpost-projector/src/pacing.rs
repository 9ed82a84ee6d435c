//! Pacing between polling passes.

use std::time::Duration;

/// Decides how long the projector sleeps after each pass: a short busy pause
/// while work keeps arriving, ramping toward a ceiling while the table stays
/// empty.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Pacer {
    sleep_busy: Duration,
    sleep_idle: Duration,
    sleep_idle_max: Duration,
    next_idle: Duration,
}

impl Pacer {
    pub(crate) fn new(
        sleep_busy: Duration,
        sleep_idle: Duration,
        sleep_idle_max: Duration,
    ) -> Self {
        Self {
            sleep_busy,
            sleep_idle,
            sleep_idle_max,
            next_idle: sleep_idle,
        }
    }

    /// The pause after a pass that claimed `claimed` rows. An empty pass
    /// doubles the following idle pause up to the ceiling; any claimed row
    /// resets the ramp.
    pub(crate) fn next_pause(&mut self, claimed: usize) -> Duration {
        if claimed == 0 {
            let pause = self.next_idle;
            self.next_idle = (self.next_idle * 2).min(self.sleep_idle_max);
            pause
        } else {
            self.next_idle = self.sleep_idle;
            self.sleep_busy
        }
    }
}
