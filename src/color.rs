//! Color primitives: the averaged tile color, its 24-bit bucket key, and the
//! fixed reference palette used for post-run classification.

use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// Averaged 8-bit color of one library image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Pack into the 24-bit bucket key (r high, b low).
    pub fn key(self) -> u32 {
        (self.r as u32) << 16 | (self.g as u32) << 8 | self.b as u32
    }

    pub fn from_key(key: u32) -> Self {
        Self {
            r: (key >> 16) as u8,
            g: (key >> 8) as u8,
            b: key as u8,
        }
    }

    /// Euclidean distance in channel space. Good enough for palette
    /// classification and nearest-bucket search; no perceptual weighting.
    pub fn distance(self, other: Rgb) -> f64 {
        let dr = self.r as f64 - other.r as f64;
        let dg = self.g as f64 - other.g as f64;
        let db = self.b as f64 - other.b as f64;
        (dr * dr + dg * dg + db * db).sqrt()
    }
}

impl std::fmt::Display for Rgb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "r {} g {} b {}", self.r, self.g, self.b)
    }
}

/// Average color over the largest centered square crop of `img`.
///
/// The crop (side = min(width, height), centered in the longer dimension)
/// normalizes aspect ratio before averaging, so a letterboxed or wide image
/// is represented by its central content rather than its borders. Channel
/// sums fit u64 comfortably: 255 * 2^32 pixels is still below 2^40.
pub fn average_color(img: &DynamicImage) -> Rgb {
    let rgb = img.to_rgb8();
    let (width, height) = rgb.dimensions();

    let side = width.min(height);
    let x0 = (width - side) / 2;
    let y0 = (height - side) / 2;

    let mut sum_r: u64 = 0;
    let mut sum_g: u64 = 0;
    let mut sum_b: u64 = 0;

    for y in y0..y0 + side {
        for x in x0..x0 + side {
            let px = rgb.get_pixel(x, y);
            sum_r += px.0[0] as u64;
            sum_g += px.0[1] as u64;
            sum_b += px.0[2] as u64;
        }
    }

    let count = (side as u64) * (side as u64);
    if count == 0 {
        return Rgb::new(0, 0, 0);
    }

    Rgb::new(
        (sum_r / count) as u8,
        (sum_g / count) as u8,
        (sum_b / count) as u8,
    )
}

/// One reference color with a human-readable name.
#[derive(Debug, Clone, Copy)]
pub struct PaletteColor {
    pub name: &'static str,
    pub color: Rgb,
}

/// The 16 HTML basic colors, used only for the post-run distribution report.
pub const PALETTE: &[PaletteColor] = &[
    PaletteColor { name: "Black", color: Rgb::new(0, 0, 0) },
    PaletteColor { name: "White", color: Rgb::new(255, 255, 255) },
    PaletteColor { name: "Red", color: Rgb::new(255, 0, 0) },
    PaletteColor { name: "Lime", color: Rgb::new(0, 255, 0) },
    PaletteColor { name: "Blue", color: Rgb::new(0, 0, 255) },
    PaletteColor { name: "Yellow", color: Rgb::new(255, 255, 0) },
    PaletteColor { name: "Cyan", color: Rgb::new(0, 255, 255) },
    PaletteColor { name: "Magenta", color: Rgb::new(255, 0, 255) },
    PaletteColor { name: "Silver", color: Rgb::new(192, 192, 192) },
    PaletteColor { name: "Gray", color: Rgb::new(128, 128, 128) },
    PaletteColor { name: "Maroon", color: Rgb::new(128, 0, 0) },
    PaletteColor { name: "Olive", color: Rgb::new(128, 128, 0) },
    PaletteColor { name: "Green", color: Rgb::new(0, 128, 0) },
    PaletteColor { name: "Purple", color: Rgb::new(128, 0, 128) },
    PaletteColor { name: "Teal", color: Rgb::new(0, 128, 128) },
    PaletteColor { name: "Navy", color: Rgb::new(0, 0, 128) },
];

/// Index into [`PALETTE`] of the nearest reference color.
pub fn nearest_palette_index(color: Rgb) -> usize {
    let mut best = 0;
    let mut best_distance = f64::MAX;
    for (i, pc) in PALETTE.iter().enumerate() {
        let d = color.distance(pc.color);
        if d < best_distance {
            best = i;
            best_distance = d;
        }
    }
    best
}
