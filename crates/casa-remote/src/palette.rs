//! Dominant / accent colour extraction from album artwork.

use std::collections::BTreeMap;

use image::imageops::FilterType;
use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

const SAMPLE_SIZE: u32 = 64;
/// Pixels more transparent than this are ignored.
const MIN_ALPHA: u8 = 128;
/// Pixels whose channels are this close together count as grey.
const MIN_CHROMA: u8 = 18;
const LIGHT_LUMINANCE: f64 = 150.0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Palette {
    pub dominant: String,
    pub accent: String,
    pub text: String,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            dominant: "#444".to_string(),
            accent: "#888".to_string(),
            text: "#fff".to_string(),
        }
    }
}

/// Decode `bytes` and derive a palette.  CPU bound; call from `spawn_blocking`.
pub fn extract(bytes: &[u8]) -> SyncResult<Palette> {
    let img = image::load_from_memory(bytes).map_err(|e| SyncError::Artwork(e.to_string()))?;
    let small = img
        .resize_exact(SAMPLE_SIZE, SAMPLE_SIZE, FilterType::Triangle)
        .to_rgba8();

    // bucket -> (count, channel sums)
    let mut buckets: BTreeMap<(u8, u8, u8), (u32, [u64; 3])> = BTreeMap::new();
    for px in small.pixels() {
        let [r, g, b, a] = px.0;
        if a < MIN_ALPHA {
            continue;
        }
        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        if max - min < MIN_CHROMA {
            continue;
        }
        let entry = buckets.entry((r >> 4, g >> 4, b >> 4)).or_insert((0, [0; 3]));
        entry.0 += 1;
        entry.1[0] += r as u64;
        entry.1[1] += g as u64;
        entry.1[2] += b as u64;
    }

    let mut ranked: Vec<_> = buckets.into_values().collect();
    // Stable: equal counts keep bucket order.
    ranked.sort_by(|a, b| b.0.cmp(&a.0));

    // Rounded, halves up.
    let mean = |(count, sums): &(u32, [u64; 3])| -> [u8; 3] {
        let n = (*count).max(1) as u64;
        sums.map(|sum| ((sum + n / 2) / n) as u8)
    };

    let Some(first) = ranked.first() else {
        return Ok(Palette::default());
    };
    let dominant = mean(first);
    let accent = ranked.get(1).map(mean).unwrap_or(dominant);

    Ok(Palette {
        dominant: hex(dominant),
        accent: hex(accent),
        text: text_colour(dominant).to_string(),
    })
}

fn hex([r, g, b]: [u8; 3]) -> String {
    format!("#{:02x}{:02x}{:02x}", r, g, b)
}

/// Rec. 709 relative luminance on 0..=255 channels.
fn luminance([r, g, b]: [u8; 3]) -> f64 {
    0.2126 * r as f64 + 0.7152 * g as f64 + 0.0722 * b as f64
}

fn text_colour(rgb: [u8; 3]) -> &'static str {
    if luminance(rgb) > LIGHT_LUMINANCE {
        "#111"
    } else {
        "#fff"
    }
}
