// THEORY:
// The `TrackFilter` cleans up the assigner output over a short sliding window of
// `2W + 1` frames and reports the middle frame, trading `W` frames of latency for
// stability.
//
// For each slot, looking at the window around the middle entry:
// 1.  **Spike removal**: A track that is alive in the middle but dead in every
//     entry before it and every entry after it is a one-off false positive and is
//     killed.
// 2.  **Gap fill**: A track that is dead in the middle but alive both before and
//     after is a missed detection. The middle is interpolated from the nearest
//     live entries on either side, its age continues the earlier entry's age, and
//     the following entry is re-linked to the filled point. Ages of the live run
//     after it are renumbered so they keep counting up by one.
// 3.  **Smoothing**: A live middle entry is averaged with its neighbours over the
//     widest symmetric span in which every entry is alive.
//
// Corrections are written back into the window, so later windows see the cleaned
// history. While the window is still filling the newest entry is forwarded with
// every track marked inactive. `W = 0` disables filtering.

use super::region::{Point2, Size2};
use super::tracker::Track;
use std::collections::VecDeque;

#[derive(Debug, Clone, Default)]
pub struct TrackFilter {
    half_window: usize,
    window: VecDeque<Vec<Track>>,
}

impl TrackFilter {
    pub fn new(half_window: usize) -> Self {
        Self {
            half_window,
            window: VecDeque::with_capacity(2 * half_window + 1),
        }
    }

    pub fn half_window(&self) -> usize {
        self.half_window
    }

    /// Changes the window; the history is discarded.
    pub fn set_half_window(&mut self, half_window: usize) {
        self.half_window = half_window;
        self.clear();
    }

    pub fn clear(&mut self) {
        self.window.clear();
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// The newest entry in the window, including corrections made by gap fill.
    pub fn newest(&self) -> Option<&[Track]> {
        self.window.back().map(Vec::as_slice)
    }

    /// Pushes this cycle's tracks and returns the filtered output.
    pub fn push(&mut self, tracks: &[Track]) -> Vec<Track> {
        if self.half_window == 0 {
            return tracks.to_vec();
        }

        if self.window.back().is_some_and(|last| last.len() != tracks.len()) {
            self.clear();
        }
        self.window.push_back(tracks.to_vec());

        let full = 2 * self.half_window + 1;
        if self.window.len() < full {
            return tracks
                .iter()
                .map(|t| Track { age: 0, ..*t })
                .collect();
        }
        while self.window.len() > full {
            self.window.pop_front();
        }

        for slot in 0..tracks.len() {
            self.filter_slot(slot);
        }

        self.window[self.half_window].clone()
    }

    fn filter_slot(&mut self, slot: usize) {
        let w = self.half_window;
        let alive = |window: &VecDeque<Vec<Track>>, i: usize| window[i][slot].is_live();

        // --- 1. Spike Removal ---
        let any_before = (0..w).any(|i| alive(&self.window, i));
        let any_after = (w + 1..=2 * w).any(|i| alive(&self.window, i));
        if !any_before && !any_after {
            self.window[w][slot].age = 0;
        }

        // --- 2. Gap Fill ---
        if !alive(&self.window, w) {
            let prev = (0..w).rev().find(|&i| alive(&self.window, i));
            let next = (w + 1..=2 * w).find(|&i| alive(&self.window, i));
            if let (Some(p), Some(n)) = (prev, next) {
                let before = self.window[p][slot];
                let after = self.window[n][slot];
                let t = (w - p) as f64 / (n - p) as f64;

                let filled = Track {
                    age: before.age + (w - p) as u32,
                    point: before.point.lerp(&after.point, t),
                    prev_point: self.window[w - 1][slot].point,
                    real_point: before.real_point.lerp(&after.real_point, t),
                    prev_real_point: self.window[w - 1][slot].real_point,
                    size: before.size.lerp(&after.size, t),
                    real_size: before.real_size.lerp(&after.real_size, t),
                    length: before.length + (after.length - before.length) * t,
                    angle: before.angle + (after.angle - before.angle) * t,
                    consumed: false,
                };
                self.window[w][slot] = filled;

                let following = &mut self.window[w + 1][slot];
                if following.is_live() {
                    following.prev_point = filled.point;
                    following.prev_real_point = filled.real_point;
                }
                let mut age = filled.age;
                for i in w + 1..=2 * w {
                    let entry = &mut self.window[i][slot];
                    if !entry.is_live() {
                        break;
                    }
                    age += 1;
                    entry.age = age;
                }
            }
        }

        // --- 3. Smoothing ---
        if alive(&self.window, w) {
            let span = (1..=w)
                .take_while(|&k| alive(&self.window, w - k) && alive(&self.window, w + k))
                .last();
            if let Some(k) = span {
                let entries: Vec<Track> = (w - k..=w + k).map(|i| self.window[i][slot]).collect();
                let n = entries.len() as f64;
                let mean_point = |f: fn(&Track) -> Point2| {
                    let (x, y) = entries
                        .iter()
                        .map(f)
                        .fold((0.0, 0.0), |(x, y), p| (x + p.x, y + p.y));
                    Point2::new(x / n, y / n)
                };
                let mean_size = |f: fn(&Track) -> Size2| {
                    let (width, height) = entries
                        .iter()
                        .map(f)
                        .fold((0.0, 0.0), |(w, h), s| (w + s.width, h + s.height));
                    Size2::new(width / n, height / n)
                };

                let point = mean_point(|t| t.point);
                let real_point = mean_point(|t| t.real_point);
                let size = mean_size(|t| t.size);
                let real_size = mean_size(|t| t.real_size);

                let middle = &mut self.window[w][slot];
                middle.point = point;
                middle.real_point = real_point;
                middle.size = size;
                middle.real_size = real_size;
            }
        }
    }
}
