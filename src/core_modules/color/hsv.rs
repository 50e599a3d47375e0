// THEORY (single-pixel colour heuristics):
// This module converts one RGB sample into the 8-bit HSV space that every colour
// threshold in the configuration is written in. It never looks at neighbours;
// anything that needs a whole region (voting, averaging) lives in the strategy
// modules next to it.
//
// Scale (8-bit convention used by common imaging toolkits):
// - hue:        0..180, degrees halved so a full turn fits a byte
// - saturation: 0..255, chroma relative to the brightest channel
// - value:      0..255, the brightest channel

pub mod hsv {
    use image::Rgb;
    use serde::{Deserialize, Serialize};

    pub type Hue = u8;
    pub type Saturation = u8;
    pub type Value = u8;

    /// Upper bound (exclusive) of the 8-bit hue scale.
    pub const HUE_SCALE: u8 = 180;

    /// A single pixel in 8-bit HSV.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Hsv {
        pub hue: Hue,
        pub saturation: Saturation,
        pub value: Value,
    }

    impl Hsv {
        pub fn new(hue: Hue, saturation: Saturation, value: Value) -> Self {
            Self {
                hue,
                saturation,
                value,
            }
        }

        pub fn from_rgb(pixel: &Rgb<u8>) -> Self {
            let [red, green, blue] = pixel.0;
            let maximum_channel = red.max(green).max(blue);
            let minimum_channel = red.min(green).min(blue);
            let chroma = (maximum_channel - minimum_channel) as f32;

            let saturation = if maximum_channel == 0 {
                0
            } else {
                (chroma * 255.0 / maximum_channel as f32).round() as u8
            };

            if chroma <= 0.0 {
                return Self::new(0, saturation, maximum_channel);
            }

            let (red, green, blue) = (red as f32, green as f32, blue as f32);
            let mut hue_degrees = if maximum_channel as f32 == red {
                60.0 * (green - blue) / chroma
            } else if maximum_channel as f32 == green {
                120.0 + 60.0 * (blue - red) / chroma
            } else {
                240.0 + 60.0 * (red - green) / chroma
            };
            if hue_degrees < 0.0 {
                hue_degrees += 360.0;
            }

            let mut hue = (hue_degrees / 2.0).round() as u8;
            if hue >= HUE_SCALE {
                hue -= HUE_SCALE;
            }
            Self::new(hue, saturation, maximum_channel)
        }
    }

    /// An inclusive lower/upper HSV box.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct HsvRange {
        pub lower: [u8; 3],
        pub upper: [u8; 3],
    }

    impl HsvRange {
        pub const fn new(lower: [u8; 3], upper: [u8; 3]) -> Self {
            Self { lower, upper }
        }

        pub fn contains(&self, hsv: &Hsv) -> bool {
            let channels = [hsv.hue, hsv.saturation, hsv.value];
            channels
                .iter()
                .zip(self.lower.iter().zip(self.upper.iter()))
                .all(|(value, (low, high))| low <= value && value <= high)
        }

        pub fn is_ordered(&self) -> bool {
            self.lower.iter().zip(self.upper.iter()).all(|(low, high)| low <= high)
        }
    }
}
