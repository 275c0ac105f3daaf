//! Marker styling: the AQI color ramp and per-category dot colors.

use streaming::Category;

pub type Rgba = [f32; 4];

const fn rgb(r: u8, g: u8, b: u8) -> Rgba {
    [r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0, 1.0]
}

pub const WHITE: Rgba = [1.0, 1.0, 1.0, 1.0];
pub const DARK_TEXT: Rgba = rgb(0x1f, 0x29, 0x37);

/// Severity band of an AQI display value.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AqiBand {
    Good,
    Moderate,
    SensitiveGroups,
    Unhealthy,
    Hazardous,
}

impl AqiBand {
    /// Upper bounds are inclusive: 50, 100, 150, 200; anything above is hazardous.
    pub fn for_value(value: f64) -> Self {
        if value <= 50.0 {
            AqiBand::Good
        } else if value <= 100.0 {
            AqiBand::Moderate
        } else if value <= 150.0 {
            AqiBand::SensitiveGroups
        } else if value <= 200.0 {
            AqiBand::Unhealthy
        } else {
            AqiBand::Hazardous
        }
    }

    pub fn fill(&self) -> Rgba {
        match self {
            AqiBand::Good => rgb(0x00, 0xe4, 0x00),
            AqiBand::Moderate => rgb(0xff, 0xff, 0x00),
            AqiBand::SensitiveGroups => rgb(0xff, 0x7e, 0x00),
            AqiBand::Unhealthy => rgb(0xff, 0x00, 0x00),
            AqiBand::Hazardous => rgb(0x8f, 0x3f, 0x97),
        }
    }

    /// Yellow badges need dark text to stay legible.
    pub fn text(&self) -> Rgba {
        match self {
            AqiBand::Moderate => DARK_TEXT,
            _ => WHITE,
        }
    }
}

pub fn category_color(category: Category) -> Rgba {
    match category {
        Category::Aqi => rgb(0x3b, 0x82, 0xf6),
        Category::Waste => rgb(0x8d, 0x6e, 0x63),
        Category::EWaste => rgb(0xf5, 0x9e, 0x0b),
        Category::Paper => rgb(0x25, 0x63, 0xeb),
        Category::Organic => rgb(0x16, 0xa3, 0x4a),
        Category::Metal => rgb(0x64, 0x74, 0x8b),
        Category::Plastic => rgb(0xea, 0xb3, 0x08),
        Category::Glass => rgb(0x06, 0xb6, 0xd4),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MarkerStyle {
    /// Numeric badge used for AQI readings.
    Badge { fill: Rgba, text: Rgba, label: String },
    /// Small colored dot for collection points and reports.
    Dot { color: Rgba, radius_px: f32 },
}

pub const DOT_RADIUS_PX: f32 = 6.0;

impl MarkerStyle {
    pub fn aqi_badge(value: f64) -> Self {
        let band = AqiBand::for_value(value);
        MarkerStyle::Badge {
            fill: band.fill(),
            text: band.text(),
            label: format!("{}", value.round() as i64),
        }
    }

    pub fn dot(category: Category) -> Self {
        MarkerStyle::Dot {
            color: category_color(category),
            radius_px: DOT_RADIUS_PX,
        }
    }
}
