mod color;
mod config;
mod debounce;
mod logging;
mod lyrics;
mod player;
mod sizing;

use crate::{
    config::{AppConfig, ConfigStore, ConfigWatcher},
    lyrics::{file_stem, DisplayText, LyricSync, PositionClock},
    player::{poll_interval, IdlePlayer, NoLyrics, PlayerPoller, PlayerSnapshot},
    sizing::{LayoutKey, ResizeReconciler, FALLBACK_WIDTH, INITIAL_HEIGHT, LINE_HEIGHT},
};
use eframe::egui::{
    self,
    text::LayoutJob,
    Color32, CornerRadius, FontData, FontDefinitions, FontFamily, FontId, Galley, PointerButton,
    ResizeDirection, Stroke, StrokeKind, TextFormat, TextWrapMode, ViewportBuilder,
    ViewportCommand,
};
use std::{
    fs,
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

const LYRIC_FONT_FAMILY: &str = "lyrics";
const WINDOW_CORNER_RADIUS: u8 = 12;
const SETTINGS_BG_OPACITY: f32 = 0.95;
const LYRIC_MARGIN_X: f32 = 16.0;
const LYRIC_INNER_PADDING: f32 = 8.0;
const SUB_TEXT_GAP: f32 = 4.0;
const SUB_TEXT_MIN_SIZE: f32 = 16.0;
const SUB_TEXT_SCALE: f32 = 0.6;
const SUB_TEXT_OPACITY: f32 = 0.9;
const RESIZE_EDGE: f32 = 6.0;

fn lyric_family() -> FontFamily {
    FontFamily::Name(LYRIC_FONT_FAMILY.into())
}

/// Registers the lyric font family, led by the user's font file when one is
/// configured and readable.
fn install_fonts(ctx: &egui::Context, font_path: Option<&PathBuf>) {
    let mut fonts = FontDefinitions::default();
    let mut family = fonts
        .families
        .get(&FontFamily::Proportional)
        .cloned()
        .unwrap_or_default();

    if let Some(path) = font_path {
        match fs::read(path) {
            Ok(bytes) => {
                fonts
                    .font_data
                    .insert("lyrics-custom".into(), Arc::new(FontData::from_owned(bytes)));
                family.insert(0, "lyrics-custom".into());
                // Let the control bar render the same glyphs (file names are often CJK).
                fonts
                    .families
                    .entry(FontFamily::Proportional)
                    .or_default()
                    .push("lyrics-custom".into());
                log::info!("Loaded lyric font {}", path.display());
            }
            Err(err) => log::warn!("Failed to read font {}: {err}", path.display()),
        }
    }

    fonts.families.insert(lyric_family(), family);
    ctx.set_fonts(fonts);
}

struct LyricStyle {
    main_size: f32,
    sub_size: f32,
    fill: Color32,
    sub_fill: Color32,
    stroke: Color32,
    stroke_width: f32,
    shadow: Color32,
}

impl LyricStyle {
    fn from_config(config: &AppConfig) -> Self {
        let fill = color::resolve(&config.font_color, config.text_opacity, Color32::WHITE);
        let stroke = color::resolve(&config.stroke_color, config.text_opacity, Color32::BLACK);
        Self {
            main_size: config.font_size,
            sub_size: (config.font_size * SUB_TEXT_SCALE).max(SUB_TEXT_MIN_SIZE),
            fill,
            sub_fill: fill.gamma_multiply(SUB_TEXT_OPACITY),
            stroke,
            stroke_width: config.stroke_width,
            shadow: color::with_opacity(Color32::BLACK, config.text_opacity * 0.5),
        }
    }
}

fn lyric_job(text: &str, size: f32, color: Color32, wrap_width: f32) -> LayoutJob {
    let mut job = LayoutJob::default();
    job.wrap.max_width = wrap_width.max(1.0);
    job.halign = egui::Align::Center;
    job.append(
        text,
        0.0,
        TextFormat {
            font_id: FontId::new(size, lyric_family()),
            color,
            line_height: Some(size * LINE_HEIGHT),
            ..Default::default()
        },
    );
    job
}

/// Paints an outlined, shadowed galley centered horizontally on `pos.x`.
fn paint_outlined(
    painter: &egui::Painter,
    pos: egui::Pos2,
    galley: &Arc<Galley>,
    fill: Color32,
    stroke: Color32,
    stroke_width: f32,
    shadow: Color32,
) {
    if shadow.a() > 0 {
        painter.galley_with_override_text_color(pos + egui::vec2(0.0, 2.0), galley.clone(), shadow);
    }
    if stroke_width > 0.0 && stroke.a() > 0 {
        for step in 0..8 {
            let angle = step as f32 * std::f32::consts::FRAC_PI_4;
            let offset = egui::vec2(angle.cos(), angle.sin()) * stroke_width;
            painter.galley_with_override_text_color(pos + offset, galley.clone(), stroke);
        }
    }
    painter.galley_with_override_text_color(pos, galley.clone(), fill);
}

struct App {
    config: AppConfig,
    store: ConfigStore,
    watcher: Option<ConfigWatcher>,
    reconciler: ResizeReconciler,
    poller: PlayerPoller,
    snapshot: Option<PlayerSnapshot>,
    lyric_sync: LyricSync,
    clock: PositionClock,
    display: DisplayText,
    locked: bool,
    last_passthrough: Option<bool>,
    content_height: Option<f32>,
    control_bar_rect: Option<egui::Rect>,
    installed_font: Option<PathBuf>,
    save_error: Option<String>,
}

impl App {
    fn new(config: AppConfig, store: ConfigStore, poller: PlayerPoller) -> Self {
        let watcher = match store.watch() {
            Ok(watcher) => Some(watcher),
            Err(err) => {
                log::warn!("Config hot reload disabled: {err:#}");
                None
            }
        };

        Self {
            config,
            store,
            watcher,
            reconciler: ResizeReconciler::new(),
            poller,
            snapshot: None,
            lyric_sync: LyricSync::default(),
            clock: PositionClock::default(),
            display: DisplayText::default(),
            locked: false,
            last_passthrough: None,
            content_height: None,
            control_bar_rect: None,
            installed_font: None,
            save_error: None,
        }
    }

    fn player_active(&self) -> bool {
        self.snapshot
            .as_ref()
            .map(PlayerSnapshot::is_active)
            .unwrap_or(false)
    }

    fn apply_snapshot(&mut self, mut snapshot: PlayerSnapshot, now: Instant) {
        if let Some(lines) = snapshot.lyrics.take() {
            self.lyric_sync.set_lines(lines);
        }
        self.clock
            .sync(&snapshot.state, snapshot.info.duration_ms, now);

        // A click-through window cannot be clicked to unlock it.
        if self.locked && !snapshot.is_active() {
            log::info!("Player inactive; releasing lock");
            self.locked = false;
        }

        self.snapshot = Some(snapshot);
    }

    fn refresh_display(&mut self, now: Instant) {
        let Some(snapshot) = self.snapshot.as_ref() else {
            self.display = DisplayText::default();
            return;
        };
        let position = self.clock.position_at(now);
        self.display = DisplayText::resolve(&snapshot.info, &self.lyric_sync, position);
    }

    fn set_locked(&mut self, locked: bool) {
        if self.locked != locked {
            log::info!("{}", if locked { "Overlay locked" } else { "Overlay unlocked" });
        }
        self.locked = locked;
    }

    fn open_settings(&mut self, current_width: f32) {
        self.reconciler.open_settings(&mut self.config, current_width);
        log::debug!("Settings opened at width {}", self.config.window_width);
    }

    fn close_settings(&mut self) {
        self.save_config();
        self.reconciler.close_settings();
        log::debug!("Settings closed");
    }

    fn save_config(&mut self) {
        match self.store.save(&self.config) {
            Ok(()) => self.save_error = None,
            Err(err) => {
                log::error!("{err:#}");
                self.save_error = Some(format!("{err:#}"));
            }
        }
    }

    fn reload_config(&mut self) {
        match self.store.load() {
            Ok(config) => {
                if config != self.config {
                    log::info!("Reloaded config from {}", self.store.path().display());
                    self.config = config;
                }
            }
            Err(err) => log::warn!("Keeping current config: {err:#}"),
        }
    }

    fn poll_config_watcher(&mut self) {
        let changed = self
            .watcher
            .as_ref()
            .map(ConfigWatcher::poll_changed)
            .unwrap_or(false);
        if changed {
            self.reload_config();
        }
    }

    fn ensure_fonts(&mut self, ctx: &egui::Context) {
        if self.installed_font == self.config.font_path {
            return;
        }
        install_fonts(ctx, self.config.font_path.as_ref());
        self.installed_font = self.config.font_path.clone();
    }

    fn apply_passthrough(&mut self, ctx: &egui::Context) {
        if self.last_passthrough != Some(self.locked) {
            ctx.send_viewport_cmd(ViewportCommand::MousePassthrough(self.locked));
            self.last_passthrough = Some(self.locked);
        }
    }

    fn layout_key(&self) -> LayoutKey {
        LayoutKey {
            settings_open: self.reconciler.settings_open(),
            main_text: self.display.main.clone(),
            sub_text: self.display.sub.clone(),
            font_size: self.config.font_size,
            window_width: self.config.window_width,
        }
    }

    /// Reacts to native resizes, refits after content changes and persists
    /// the debounced width.
    fn reconcile_window_size(&mut self, ctx: &egui::Context, inner_size: egui::Vec2, now: Instant) {
        self.reconciler
            .adopt_initial_width(&mut self.config, inner_size.x);

        let mut request = None;
        if self.reconciler.observe(inner_size) {
            request = self
                .reconciler
                .on_resize(&self.config, inner_size, self.content_height, now);
        }

        let key = self.layout_key();
        if let Some(fit) = self
            .reconciler
            .on_layout(key, inner_size.x, self.content_height)
        {
            request = Some(fit);
        }

        if let Some(size) = request {
            ctx.send_viewport_cmd(ViewportCommand::InnerSize(size));
        }

        if self.reconciler.poll(&mut self.config, now).is_some() {
            self.save_config();
        }
    }

    fn desired_repaint_interval(&self, now: Instant) -> Duration {
        let base = if self.clock.is_playing() {
            Duration::from_millis(50)
        } else {
            Duration::from_millis(250)
        };
        match self.reconciler.pending_commit_deadline() {
            Some(deadline) => base.min(deadline.saturating_duration_since(now)),
            None => base,
        }
    }

    fn paint_background(&self, ctx: &egui::Context, rect: egui::Rect) {
        let opacity = if self.reconciler.settings_open() {
            SETTINGS_BG_OPACITY
        } else {
            self.config.bg_opacity
        };
        let painter = ctx.layer_painter(egui::LayerId::background());
        let rounding = CornerRadius::same(WINDOW_CORNER_RADIUS);
        painter.rect_filled(rect, rounding, color::with_opacity(Color32::BLACK, opacity));
        painter.rect_stroke(
            rect,
            rounding,
            Stroke::new(1.0, Color32::from_white_alpha(26)),
            StrokeKind::Inside,
        );
    }

    /// Lays out and paints the lyric block, returning its height.
    fn render_lyrics(&self, ui: &mut egui::Ui) -> f32 {
        let rect = ui.max_rect();
        let style = LyricStyle::from_config(&self.config);
        let wrap_width = rect.width() - 2.0 * (LYRIC_MARGIN_X + LYRIC_INNER_PADDING);

        let main = ui.fonts(|fonts| {
            fonts.layout_job(lyric_job(
                &self.display.main,
                style.main_size,
                style.fill,
                wrap_width,
            ))
        });
        let sub = (!self.display.sub.is_empty()).then(|| {
            ui.fonts(|fonts| {
                fonts.layout_job(lyric_job(
                    &self.display.sub,
                    style.sub_size,
                    style.sub_fill,
                    wrap_width,
                ))
            })
        });

        let mut content_height = 2.0 * LYRIC_INNER_PADDING + main.size().y;
        if let Some(sub) = &sub {
            content_height += SUB_TEXT_GAP + sub.size().y;
        }

        let painter = ui.painter_at(rect);
        let center_x = rect.center().x;
        let mut y = rect.center().y - content_height / 2.0 + LYRIC_INNER_PADDING;

        paint_outlined(
            &painter,
            egui::pos2(center_x, y),
            &main,
            style.fill,
            style.stroke,
            style.stroke_width,
            style.shadow,
        );
        y += main.size().y;

        if let Some(sub) = &sub {
            y += SUB_TEXT_GAP;
            paint_outlined(
                &painter,
                egui::pos2(center_x, y),
                sub,
                style.sub_fill,
                style.stroke,
                style.stroke_width * SUB_TEXT_SCALE,
                style.shadow,
            );
        }

        content_height
    }

    fn render_control_bar(&mut self, ctx: &egui::Context, inner_width: f32) {
        let file_label = self
            .snapshot
            .as_ref()
            .filter(|snapshot| snapshot.is_active())
            .map(|snapshot| file_stem(&snapshot.info.file_name).to_string())
            .unwrap_or_else(|| "No player running".to_string());
        let track_summary = self
            .snapshot
            .as_ref()
            .filter(|snapshot| snapshot.is_active())
            .map(|snapshot| snapshot.info.summary());
        let can_lock = self.player_active();

        let mut open_settings = false;
        let mut lock = false;
        let mut quit = false;

        let response = egui::Area::new(egui::Id::new("overlay-controls"))
            .anchor(egui::Align2::LEFT_TOP, egui::vec2(8.0, 6.0))
            .order(egui::Order::Foreground)
            .interactable(true)
            .movable(false)
            .show(ctx, |overlay| {
                overlay.set_max_width((inner_width - 16.0).max(0.0));
                overlay.horizontal(|row| {
                    row.spacing_mut().item_spacing.x = 6.0;

                    let overlay_icon_button = |ui: &mut egui::Ui, icon: &str, tooltip: &str| {
                        let icon_size = ui
                            .style()
                            .text_styles
                            .get(&egui::TextStyle::Body)
                            .map(|style| style.size)
                            .unwrap_or(14.0);
                        let (rect, response) = ui.allocate_exact_size(
                            egui::Vec2::splat(icon_size + 8.0),
                            egui::Sense::click(),
                        );
                        if response.hovered() {
                            ui.ctx().set_cursor_icon(egui::CursorIcon::PointingHand);
                        }
                        let fg_color = if response.hovered() {
                            Color32::WHITE
                        } else {
                            Color32::from_white_alpha(170)
                        };
                        ui.painter_at(rect).text(
                            rect.center(),
                            egui::Align2::CENTER_CENTER,
                            icon,
                            FontId::proportional(icon_size),
                            fg_color,
                        );
                        response.on_hover_text(tooltip)
                    };

                    if overlay_icon_button(row, "⚙", "Settings").clicked() {
                        open_settings = true;
                    }
                    if can_lock && overlay_icon_button(row, "🔒", "Lock (click-through)").clicked()
                    {
                        lock = true;
                    }
                    if overlay_icon_button(row, "×", "Quit").clicked() {
                        quit = true;
                    }

                    let label = row.add(
                        egui::Label::new(
                            egui::RichText::new(file_label)
                                .size(12.0)
                                .color(Color32::from_white_alpha(150)),
                        )
                        .wrap_mode(TextWrapMode::Truncate)
                        .selectable(false),
                    );
                    if let Some(summary) = track_summary {
                        label.on_hover_text(summary);
                    }
                });
            });
        self.control_bar_rect = Some(response.response.rect);

        if open_settings {
            self.open_settings(inner_width);
        }
        if lock {
            self.set_locked(true);
        }
        if quit {
            ctx.send_viewport_cmd(ViewportCommand::Close);
        }
    }

    fn render_settings(&mut self, ui: &mut egui::Ui) {
        let mut close = false;
        let mut reload = false;

        ui.add_space(12.0);
        ui.horizontal(|row| {
            row.label(egui::RichText::new("Settings").heading().color(Color32::WHITE));
            row.allocate_ui_with_layout(
                egui::vec2(row.available_width(), 0.0),
                egui::Layout::right_to_left(egui::Align::Center),
                |actions| {
                    if actions.button("Done").clicked() {
                        close = true;
                    }
                },
            );
        });
        ui.separator();

        ui.label(
            egui::RichText::new("Appearance is read from:").color(Color32::from_white_alpha(200)),
        );
        ui.label(
            egui::RichText::new(self.store.path().display().to_string())
                .monospace()
                .color(Color32::WHITE),
        );
        ui.label(
            egui::RichText::new("Edits to this file are applied as soon as it is saved.")
                .small()
                .color(Color32::from_white_alpha(160)),
        );
        if ui.button("Reload now").clicked() {
            reload = true;
        }

        if let Some(err) = &self.save_error {
            ui.add_space(8.0);
            ui.colored_label(Color32::from_rgb(255, 110, 110), err);
        }

        if reload {
            self.reload_config();
        }
        if close {
            self.close_settings();
        }
    }

    /// Horizontal edges resize the width; everything else drags the window.
    fn handle_borderless_window_interactions(&mut self, ctx: &egui::Context, root_rect: egui::Rect) {
        if self.locked || self.reconciler.settings_open() {
            return;
        }

        let (pointer_pos, primary_pressed) = ctx.input(|i| {
            (
                i.pointer.latest_pos(),
                i.pointer.button_pressed(PointerButton::Primary),
            )
        });
        let Some(pos) = pointer_pos else {
            return;
        };
        if !root_rect.expand(RESIZE_EDGE).contains(pos) {
            return;
        }

        let resize_dir = if pos.x <= root_rect.left() + RESIZE_EDGE {
            Some(ResizeDirection::West)
        } else if pos.x >= root_rect.right() - RESIZE_EDGE {
            Some(ResizeDirection::East)
        } else {
            None
        };

        if let Some(direction) = resize_dir {
            ctx.set_cursor_icon(egui::CursorIcon::ResizeHorizontal);
            if primary_pressed && !ctx.is_using_pointer() {
                ctx.send_viewport_cmd(ViewportCommand::BeginResize(direction));
            }
            return;
        }

        let over_controls = self
            .control_bar_rect
            .map(|rect| rect.contains(pos))
            .unwrap_or(false);
        if !over_controls && root_rect.contains(pos) && primary_pressed && !ctx.is_using_pointer()
        {
            ctx.send_viewport_cmd(ViewportCommand::StartDrag);
        }
    }
}

impl eframe::App for App {
    fn clear_color(&self, _visuals: &egui::Visuals) -> [f32; 4] {
        [0.0, 0.0, 0.0, 0.0]
    }

    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let now = Instant::now();

        self.poll_config_watcher();
        self.ensure_fonts(ctx);

        for snapshot in self.poller.drain() {
            self.apply_snapshot(snapshot, now);
        }
        self.refresh_display(now);
        self.apply_passthrough(ctx);

        let root_rect = ctx.screen_rect();
        let inner_size = ctx
            .input(|i| i.viewport().inner_rect.map(|rect| rect.size()))
            .unwrap_or(root_rect.size());

        self.paint_background(ctx, root_rect);

        if self.reconciler.settings_open() {
            self.control_bar_rect = None;
            egui::CentralPanel::default()
                .frame(egui::Frame::NONE.inner_margin(egui::Margin::symmetric(20, 8)))
                .show(ctx, |ui| self.render_settings(ui));
        } else {
            if self.locked {
                self.control_bar_rect = None;
            } else {
                self.render_control_bar(ctx, inner_size.x);
            }
            let content_height = egui::CentralPanel::default()
                .frame(egui::Frame::NONE)
                .show(ctx, |ui| self.render_lyrics(ui))
                .inner;
            self.content_height = Some(content_height);
        }

        self.reconcile_window_size(ctx, inner_size, now);
        self.handle_borderless_window_interactions(ctx, root_rect);

        self.poller
            .maybe_request(now, poll_interval(self.snapshot.as_ref()));
        ctx.request_repaint_after(self.desired_repaint_interval(now));
    }
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let store = ConfigStore::discover();
    let (config, load_error) = match store.load() {
        Ok(config) => (config, None),
        Err(err) => (AppConfig::default(), Some(err)),
    };

    logging::init(config.log_filter());
    if let Some(err) = load_error {
        log::warn!("{err:#}; using defaults");
    }
    log::info!("Using config file {}", store.path().display());

    let initial_width = if config.has_window_width() {
        config.window_width
    } else {
        FALLBACK_WIDTH
    };

    let native_options = eframe::NativeOptions {
        viewport: ViewportBuilder::default()
            .with_title("Lyric Overlay")
            .with_inner_size([initial_width, INITIAL_HEIGHT])
            .with_transparent(true)
            .with_decorations(false)
            .with_always_on_top()
            .with_resizable(true),
        ..Default::default()
    };

    let run_res = eframe::run_native(
        "Lyric Overlay",
        native_options,
        Box::new(
            move |cc| -> std::result::Result<
                Box<dyn eframe::App>,
                Box<dyn std::error::Error + Send + Sync>,
            > {
                install_fonts(&cc.egui_ctx, config.font_path.as_ref());
                let poller = PlayerPoller::spawn(IdlePlayer, NoLyrics);
                let mut app = App::new(config, store, poller);
                app.installed_font = app.config.font_path.clone();
                Ok(Box::new(app))
            },
        ),
    );
    if let Err(e) = run_res {
        return Err(Box::new(e));
    }

    Ok(())
}
