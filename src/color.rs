use anyhow::{anyhow, Result};
use eframe::egui::Color32;

/// Parses `#RRGGBB`, `RRGGBB` or the `#RGB` shorthand.
pub fn parse_hex(value: &str) -> Result<Color32> {
    let value = value.trim();
    let hex = value.strip_prefix('#').unwrap_or(value);

    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(anyhow!("Invalid hex color: {value}"));
    }

    let expanded = match hex.len() {
        3 => hex.chars().flat_map(|c| [c, c]).collect::<String>(),
        6 => hex.to_string(),
        _ => return Err(anyhow!("Invalid hex color: {value}")),
    };

    let bytes =
        u32::from_str_radix(&expanded, 16).map_err(|_| anyhow!("Invalid hex color: {value}"))?;
    let r = ((bytes >> 16) & 0xFF) as u8;
    let g = ((bytes >> 8) & 0xFF) as u8;
    let b = (bytes & 0xFF) as u8;
    Ok(Color32::from_rgb(r, g, b))
}

pub fn with_opacity(color: Color32, opacity: f32) -> Color32 {
    let alpha = (opacity.clamp(0.0, 1.0) * 255.0).round() as u8;
    Color32::from_rgba_unmultiplied(color.r(), color.g(), color.b(), alpha)
}

/// Like [`parse_hex`] followed by [`with_opacity`], but never fails.
pub fn resolve(value: &str, opacity: f32, fallback: Color32) -> Color32 {
    let base = parse_hex(value).unwrap_or_else(|err| {
        log::warn!("{err}; using fallback color");
        fallback
    });
    with_opacity(base, opacity)
}
