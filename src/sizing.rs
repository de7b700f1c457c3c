//! Window sizing for the overlay.
//!
//! Width belongs to the user: it is whatever the window was last dragged to,
//! and it is written back to the config once the drag settles. Height belongs
//! to the content: it is recomputed from the rendered lyric block every time
//! and any attempt to resize it by hand is undone.

use std::time::{Duration, Instant};

use eframe::egui::Vec2;

use crate::{config::AppConfig, debounce::Debouncer};

/// Line height multiplier used by the lyric renderer.
pub const LINE_HEIGHT: f32 = 1.2;
/// Space above and below the lyric block.
pub const VERTICAL_PADDING: f32 = 30.0;
/// Size differences up to this many points are treated as equal.
pub const SIZE_TOLERANCE: f32 = 5.0;
pub const WIDTH_DEBOUNCE: Duration = Duration::from_millis(200);
pub const SETTINGS_WINDOW_SIZE: Vec2 = Vec2::new(400.0, 520.0);
pub const INITIAL_HEIGHT: f32 = 120.0;
pub const FALLBACK_WIDTH: f32 = 800.0;

/// Height of two lines of text at `font_size`, plus padding.
pub fn standard_height(font_size: f32) -> f32 {
    ceil_px(font_size.max(0.0) * LINE_HEIGHT * 2.0 + VERTICAL_PADDING)
}

/// Grows with the content but never shrinks below [`standard_height`].
pub fn target_height(content_height: f32, font_size: f32) -> f32 {
    let content = if content_height.is_finite() {
        content_height.max(0.0)
    } else {
        0.0
    };
    ceil_px((content + VERTICAL_PADDING).max(standard_height(font_size)))
}

/// Rounds up to whole points, ignoring float noise below a thousandth.
fn ceil_px(value: f32) -> f32 {
    ((value * 1000.0).round() / 1000.0).ceil()
}

fn height_for(content_height: Option<f32>, font_size: f32) -> f32 {
    match content_height {
        Some(content) => target_height(content, font_size),
        None => standard_height(font_size),
    }
}

/// Inputs whose change forces the window to be resized to fit.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutKey {
    pub settings_open: bool,
    pub main_text: String,
    pub sub_text: String,
    pub font_size: f32,
    pub window_width: f32,
}

#[derive(Debug)]
pub struct ResizeReconciler {
    settings_open: bool,
    last_observed: Option<Vec2>,
    last_layout: Option<LayoutKey>,
    width_commit: Debouncer<f32>,
}

impl Default for ResizeReconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResizeReconciler {
    pub fn new() -> Self {
        Self {
            settings_open: false,
            last_observed: None,
            last_layout: None,
            width_commit: Debouncer::new(WIDTH_DEBOUNCE),
        }
    }

    pub fn settings_open(&self) -> bool {
        self.settings_open
    }

    /// Records the window's inner size. Returns `true` when it changed.
    pub fn observe(&mut self, inner_size: Vec2) -> bool {
        let changed = self.last_observed != Some(inner_size);
        self.last_observed = Some(inner_size);
        changed
    }

    /// The first width we see becomes the configured width when none was saved.
    pub fn adopt_initial_width(&mut self, config: &mut AppConfig, width: f32) {
        if !config.has_window_width() && width.is_finite() && width > 0.0 {
            config.set_window_width(width);
            log::debug!("Adopted initial window width {width}");
        }
    }

    /// Handles a native resize. Schedules a width commit if the width moved
    /// and returns the size to snap back to if the height is off.
    pub fn on_resize(
        &mut self,
        config: &AppConfig,
        current: Vec2,
        content_height: Option<f32>,
        now: Instant,
    ) -> Option<Vec2> {
        if self.settings_open {
            return None;
        }

        let target = height_for(content_height, config.font_size);

        if (current.x - config.window_width).abs() > SIZE_TOLERANCE {
            self.width_commit.schedule(current.x, now);
        } else {
            // Dragged back to the saved width before the commit fired.
            self.width_commit.cancel();
        }

        if (current.y - target).abs() > SIZE_TOLERANCE {
            log::trace!("Height {} off target {target}; snapping back", current.y);
            return Some(Vec2::new(current.x.ceil(), target));
        }

        None
    }

    /// Resizes to fit whenever the text, font size, stored width or settings
    /// state changed since the last fit.
    pub fn on_layout(
        &mut self,
        key: LayoutKey,
        current_width: f32,
        content_height: Option<f32>,
    ) -> Option<Vec2> {
        if self.last_layout.as_ref() == Some(&key) {
            return None;
        }

        if key.settings_open {
            self.last_layout = Some(key);
            return Some(SETTINGS_WINDOW_SIZE);
        }

        let content = content_height?;
        let width = if key.window_width > 0.0 {
            key.window_width
        } else {
            current_width
        };
        let size = Vec2::new(width.ceil(), target_height(content, key.font_size));
        self.last_layout = Some(key);
        Some(size)
    }

    /// Applies the debounced width once it is due.
    pub fn poll(&mut self, config: &mut AppConfig, now: Instant) -> Option<f32> {
        let width = self.width_commit.poll(now)?;
        config.set_window_width(width);
        log::debug!("Committed window width {width}");
        Some(config.window_width)
    }

    pub fn pending_commit_deadline(&self) -> Option<Instant> {
        self.width_commit.deadline()
    }

    pub fn open_settings(&mut self, config: &mut AppConfig, current_width: f32) {
        if self.settings_open {
            return;
        }
        if current_width.is_finite() && current_width > 0.0 {
            config.set_window_width(current_width);
        }
        self.width_commit.cancel();
        self.settings_open = true;
    }

    pub fn close_settings(&mut self) {
        self.settings_open = false;
    }
}
