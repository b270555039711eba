// This file is part of Nitrogen.
//
// Nitrogen is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// Nitrogen is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with Nitrogen.  If not, see <http://www.gnu.org/licenses/>.
use std::time::Duration;

/// Crossfade state for one quadrant of a tile. The frame clock and fade
/// length are passed in on every query so that fades are reproducible.
#[derive(Copy, Clone, Debug)]
pub struct BlendState {
    state: bool,
    target: bool,
    switched_at: Duration,
}

impl BlendState {
    pub fn new(initial: bool) -> Self {
        Self {
            state: initial,
            target: initial,
            switched_at: Duration::ZERO,
        }
    }

    /// The settled state, which catches up with the target once the fade
    /// has run its full duration.
    pub fn state(&mut self, now: Duration, fade: Duration) -> bool {
        if self.target != self.state && self.elapsed(now) > fade {
            self.state = self.target;
        }
        self.state
    }

    /// Jump straight to a state without fading.
    pub fn set_state(&mut self, state: bool) {
        self.state = state;
    }

    pub fn target(&self) -> bool {
        self.target
    }

    pub fn set_target(&mut self, target: bool, now: Duration) {
        if self.target != target {
            self.switched_at = now;
            self.target = target;
        }
    }

    /// Opacity ramps toward the target over the fade duration.
    pub fn opacity(&mut self, now: Duration, fade: Duration) -> f32 {
        if self.target != self.state {
            let elapsed = self.elapsed(now);
            if elapsed > fade {
                self.state = self.target;
            } else {
                let t = if fade.is_zero() {
                    1f32
                } else {
                    elapsed.as_secs_f32() / fade.as_secs_f32()
                };
                return if self.target { t } else { 1f32 - t };
            }
        }
        if self.state {
            1f32
        } else {
            0f32
        }
    }

    fn elapsed(&self, now: Duration) -> Duration {
        now.saturating_sub(self.switched_at)
    }
}
