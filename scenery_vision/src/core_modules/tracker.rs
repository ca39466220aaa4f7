// THEORY:
// The `tracker` module gives the detector memory. It takes the stateless list of
// `Region`s from a single frame and associates them with a fixed set of track
// slots carried over from previous frames.
//
// Key architectural principles:
// 1.  **Fixed-width identity**: There are exactly `track_count` slots. A track's
//     identity is its slot index, which never changes for the lifetime of the
//     run. Consumers can therefore bind "slot 0" to a sprite, a sound voice, etc.
// 2.  **Greedy global matching**: Every live slot is compared with every region.
//     The globally smallest distance under the limit is assigned first, then the
//     next smallest among the unused rows and columns, and so on. Ties resolve to
//     the first minimum found scanning regions in the outer loop and slots in the
//     inner loop, which keeps results reproducible frame to frame.
// 3.  **Lifecycle Management**:
//     - **Birth**: An empty slot (age 0) immediately takes the first unused region
//       in scan order.
//     - **Tracking**: A matched slot grows one year older and records where it
//       came from, how far it moved and in which direction.
//     - **Death**: A live slot with no match this cycle drops to age 0 at once.

use super::region::{Point2, Region, Size2};
use serde::{Deserialize, Serialize};

/// Default number of track slots.
pub const DEFAULT_TRACK_COUNT: usize = 1;
/// Default maximum pixel distance for a match.
pub const DEFAULT_DISTANCE_LIMIT: f64 = 1000.0;

/// Represents one track slot. A slot with `age == 0` is inactive.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Track {
    /// Number of consecutive matched frames; 0 means the slot is empty.
    pub age: u32,
    /// Current center in pixels.
    pub point: Point2,
    /// Center in the previous frame, in pixels.
    pub prev_point: Point2,
    /// Current center on the real plane.
    pub real_point: Point2,
    /// Previous center on the real plane.
    pub prev_real_point: Point2,
    pub size: Size2,
    pub real_size: Size2,
    /// Distance moved since the previous frame, in pixels.
    pub length: f64,
    /// Direction of movement since the previous frame, in radians.
    pub angle: f64,
    /// Set by consumers that want to mark a track as handled this cycle.
    pub consumed: bool,
}

impl Track {
    pub fn is_live(&self) -> bool {
        self.age > 0
    }

    /// A freshly born track at `region`.
    fn born(region: &Region) -> Self {
        Self {
            age: 1,
            point: region.point,
            prev_point: region.point,
            real_point: region.real_point,
            prev_real_point: region.real_point,
            size: region.size,
            real_size: region.real_size,
            length: 0.0,
            angle: 0.0,
            consumed: false,
        }
    }

    /// This track moved to `region`, `length` pixels away.
    fn continued(&self, region: &Region, length: f64) -> Self {
        Self {
            age: self.age + 1,
            point: region.point,
            prev_point: self.point,
            real_point: region.real_point,
            prev_real_point: self.real_point,
            size: region.size,
            real_size: region.real_size,
            length,
            angle: self.point.direction_to(&region.point),
            consumed: false,
        }
    }
}

/// Tracking parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingParams {
    /// Number of track slots.
    pub track_count: usize,
    /// Matches must be strictly closer than this, in pixels.
    pub distance_limit: f64,
}

impl Default for TrackingParams {
    fn default() -> Self {
        Self {
            track_count: DEFAULT_TRACK_COUNT,
            distance_limit: DEFAULT_DISTANCE_LIMIT,
        }
    }
}

/// Greedy nearest-neighbour assignment of regions to track slots.
#[derive(Debug, Clone)]
pub struct TrackAssigner {
    tracks: Vec<Track>,
    params: TrackingParams,
}

impl TrackAssigner {
    pub fn new(params: TrackingParams) -> Self {
        Self {
            tracks: vec![Track::default(); params.track_count],
            params,
        }
    }

    pub fn params(&self) -> TrackingParams {
        self.params
    }

    /// Replaces the parameters; the slot vector follows the new count.
    pub fn set_params(&mut self, params: TrackingParams) {
        self.params = params;
        self.tracks.resize(params.track_count, Track::default());
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Overwrites the slot state, e.g. with corrections made downstream.
    pub fn restore(&mut self, tracks: &[Track]) {
        if tracks.len() == self.tracks.len() {
            self.tracks.copy_from_slice(tracks);
        }
    }

    /// Empties every slot.
    pub fn reset(&mut self) {
        self.tracks.fill(Track::default());
    }

    /// Matches this frame's regions against the slots and returns the new slot state.
    pub fn update(&mut self, regions: &[Region]) -> &[Track] {
        if self.tracks.len() != self.params.track_count {
            self.tracks.resize(self.params.track_count, Track::default());
        }
        let slot_count = self.tracks.len();
        let region_count = regions.len();

        // --- 1. Birth Marking ---
        let mut needs_birth: Vec<bool> = self.tracks.iter().map(|t| !t.is_live()).collect();
        let mut region_used = vec![false; region_count];
        let mut slot_assigned = vec![false; slot_count];

        // --- 2. Cost Matrix ---
        // Row-major: regions are rows, slots are columns.
        let mut cost = vec![f64::INFINITY; region_count * slot_count];
        for (j, track) in self.tracks.iter().enumerate() {
            if needs_birth[j] {
                continue;
            }
            for (i, region) in regions.iter().enumerate() {
                cost[i * slot_count + j] = region.point.distance(&track.point);
            }
        }

        // --- 3. Greedy Matching ---
        loop {
            let mut best: Option<(usize, usize, f64)> = None;
            for i in 0..region_count {
                if region_used[i] {
                    continue;
                }
                for j in 0..slot_count {
                    if needs_birth[j] || slot_assigned[j] {
                        continue;
                    }
                    let c = cost[i * slot_count + j];
                    if c < self.params.distance_limit && best.is_none_or(|(_, _, b)| c < b) {
                        best = Some((i, j, c));
                    }
                }
            }

            let Some((i, j, c)) = best else {
                break;
            };
            self.tracks[j] = self.tracks[j].continued(&regions[i], c);
            region_used[i] = true;
            slot_assigned[j] = true;
        }

        // --- 4. Births and Deaths ---
        for j in 0..slot_count {
            if needs_birth[j] {
                if let Some(i) = region_used.iter().position(|used| !used) {
                    self.tracks[j] = Track::born(&regions[i]);
                    region_used[i] = true;
                    slot_assigned[j] = true;
                    needs_birth[j] = false;
                }
            }
            if !slot_assigned[j] {
                self.tracks[j].age = 0;
            }
        }

        &self.tracks
    }
}
