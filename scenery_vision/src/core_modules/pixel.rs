// THEORY (Per-pixel classification):
// The `pixel` module holds the single-pixel heuristics used by the detector's scan
// loops. Nothing here looks at neighbours; clustering and filtering belong to the
// vision collaborator.
//
// Color classification works in HSV space using the 8-bit convention shared by
// common vision libraries:
// - H: hue in degrees halved, 0..180
// - S: 255 * (max - min) / max
// - V: max channel value
//
// Converting every pixel with floating-point math in the hot loop is too slow for
// real-time video, so the conversion is precomputed for all 256^3 packed RGB values
// into a process-wide table. The table is built once on first use behind a
// `OnceLock` and is read-only afterwards, so detector instances on different
// threads share it without synchronization. The hot path is one index computation
// and one load.
//
// Motion classification is the sum of absolute channel differences between the
// same pixel in two frames.

pub mod pixel {
    use std::sync::OnceLock;

    pub type Hue = u8;
    pub type Saturation = u8;
    pub type Value = u8;
    pub type Hsv = [u8; 3];

    const TABLE_SIZE: usize = 1 << 24;

    // Full RGB -> HSV table, indexed by `packed_index`.
    static HSV_TABLE: OnceLock<Box<[Hsv]>> = OnceLock::new();

    /// Packs an RGB triple into its table index (`r * 65536 + g * 256 + b`).
    #[inline]
    pub fn packed_index(r: u8, g: u8, b: u8) -> usize {
        ((r as usize) << 16) | ((g as usize) << 8) | b as usize
    }

    /// Computes the 8-bit HSV triple of an RGB color without the table.
    pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> Hsv {
        let (rf, gf, bf) = (r as f32, g as f32, b as f32);
        let max = rf.max(gf).max(bf);
        let min = rf.min(gf).min(bf);
        let diff = max - min;

        let value = max;
        let saturation = if max > 0.0 { 255.0 * diff / max } else { 0.0 };

        let mut hue = if diff == 0.0 {
            0.0
        } else if max == rf {
            60.0 * (gf - bf) / diff
        } else if max == gf {
            120.0 + 60.0 * (bf - rf) / diff
        } else {
            240.0 + 60.0 * (rf - gf) / diff
        };
        if hue < 0.0 {
            hue += 360.0;
        }
        let mut hue = (hue / 2.0).round();
        if hue >= 180.0 {
            hue -= 180.0;
        }

        [hue as u8, saturation.round() as u8, value as u8]
    }

    fn table() -> &'static [Hsv] {
        HSV_TABLE.get_or_init(|| {
            let mut table = vec![[0u8; 3]; TABLE_SIZE].into_boxed_slice();
            for r in 0..=255u8 {
                for g in 0..=255u8 {
                    for b in 0..=255u8 {
                        table[packed_index(r, g, b)] = rgb_to_hsv(r, g, b);
                    }
                }
            }
            table
        })
    }

    /// Forces the table to be built. Useful before the first real-time frame.
    pub fn warm_up() {
        let _ = table();
    }

    /// Table lookup of the HSV triple of a BGR pixel.
    #[inline]
    pub fn hsv_of_bgr(bgr: &[u8]) -> Hsv {
        table()[packed_index(bgr[2], bgr[1], bgr[0])]
    }

    /// Thresholds for color classification.
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct HsvRange {
        pub hue_min: Hue,
        pub hue_max: Hue,
        pub saturation_min: Saturation,
        pub value_min: Value,
        pub invert: bool,
    }

    impl HsvRange {
        /// A pixel is a hit when its hue is inside the range (or outside, when
        /// inverted) and it is saturated and bright enough.
        #[inline]
        pub fn contains(&self, hsv: Hsv) -> bool {
            let in_range = hsv[0] >= self.hue_min && hsv[0] <= self.hue_max;
            (in_range ^ self.invert) && hsv[1] >= self.saturation_min && hsv[2] >= self.value_min
        }
    }

    /// Sum of absolute channel differences between two pixels.
    #[inline]
    pub fn channel_difference(a: &[u8], b: &[u8]) -> u32 {
        a.iter()
            .zip(b)
            .map(|(&x, &y)| (x as i32 - y as i32).unsigned_abs())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::pixel::*;

    #[test]
    fn primary_colors_convert_to_expected_hsv() {
        assert_eq!(rgb_to_hsv(255, 0, 0), [0, 255, 255]);
        assert_eq!(rgb_to_hsv(0, 255, 0), [60, 255, 255]);
        assert_eq!(rgb_to_hsv(0, 0, 255), [120, 255, 255]);
        assert_eq!(rgb_to_hsv(0, 0, 0), [0, 0, 0]);
        assert_eq!(rgb_to_hsv(128, 128, 128), [0, 0, 128]);
    }

    #[test]
    fn hue_wraps_below_180() {
        // Hue just below 360 degrees rounds into the next wrap.
        let [h, _, _] = rgb_to_hsv(255, 0, 1);
        assert!(h < 180);
    }

    #[test]
    fn table_matches_direct_conversion() {
        for &(r, g, b) in &[(12u8, 200u8, 90u8), (255, 128, 0), (3, 3, 250)] {
            assert_eq!(hsv_of_bgr(&[b, g, r]), rgb_to_hsv(r, g, b));
        }
    }

    #[test]
    fn range_respects_invert() {
        let range = HsvRange {
            hue_min: 0,
            hue_max: 50,
            saturation_min: 50,
            value_min: 50,
            invert: false,
        };
        assert!(range.contains([10, 255, 255]));
        assert!(!range.contains([90, 255, 255]));
        assert!(!range.contains([10, 10, 255]));

        let inverted = HsvRange { invert: true, ..range };
        assert!(!inverted.contains([10, 255, 255]));
        assert!(inverted.contains([90, 255, 255]));
        assert!(!inverted.contains([90, 255, 10]));
    }

    #[test]
    fn channel_difference_sums_absolute_deltas() {
        assert_eq!(channel_difference(&[10, 20, 30], &[20, 10, 30]), 20);
        assert_eq!(channel_difference(&[0, 0, 0], &[255, 255, 255]), 765);
    }
}
