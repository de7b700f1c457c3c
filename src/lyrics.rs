use std::time::Instant;

use crate::player::{LyricLine, MusicInfo, PlaybackState, PlayerState};

/// Lines for the current track, ordered by start time.
#[derive(Debug, Default)]
pub struct LyricSync {
    lines: Vec<LyricLine>,
}

impl LyricSync {
    pub fn set_lines(&mut self, mut lines: Vec<LyricLine>) {
        lines.sort_by_key(|line| line.time_ms);
        self.lines = lines;
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Index of the last line that has started at `position_ms`.
    pub fn current_index(&self, position_ms: u64) -> Option<usize> {
        self.lines
            .partition_point(|line| line.time_ms <= position_ms)
            .checked_sub(1)
    }

    pub fn current(&self, position_ms: u64) -> (&str, &str) {
        match self.current_index(position_ms) {
            Some(idx) => {
                let line = &self.lines[idx];
                (line.main_text.as_str(), line.sub_text.as_str())
            }
            None => ("", ""),
        }
    }
}

/// Playback position extrapolated between polls.
#[derive(Debug, Clone)]
pub struct PositionClock {
    position_ms: u64,
    duration_ms: u64,
    playing: bool,
    updated_at: Instant,
}

impl Default for PositionClock {
    fn default() -> Self {
        Self {
            position_ms: 0,
            duration_ms: 0,
            playing: false,
            updated_at: Instant::now(),
        }
    }
}

impl PositionClock {
    pub fn sync(&mut self, state: &PlayerState, duration_ms: u64, now: Instant) {
        self.position_ms = state.position_ms;
        self.duration_ms = duration_ms;
        self.playing = state.state == PlaybackState::Playing;
        self.updated_at = now;
    }

    pub fn position_at(&self, now: Instant) -> u64 {
        if !self.playing {
            return self.position_ms;
        }
        let elapsed = now.saturating_duration_since(self.updated_at).as_millis() as u64;
        let position = self.position_ms.saturating_add(elapsed);
        if self.duration_ms > 0 {
            position.min(self.duration_ms)
        } else {
            position
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }
}

/// The two lines of text the overlay shows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayText {
    pub main: String,
    pub sub: String,
}

impl DisplayText {
    /// Inactive player: nothing. Track without lyrics: title and artist.
    pub fn resolve(info: &MusicInfo, sync: &LyricSync, position_ms: u64) -> Self {
        if !info.is_active {
            return Self::default();
        }
        if sync.is_empty() {
            let main = if info.title.is_empty() {
                file_stem(&info.file_name).to_string()
            } else {
                info.title.clone()
            };
            return Self {
                main,
                sub: info.artist.clone(),
            };
        }
        let (main, sub) = sync.current(position_ms);
        Self {
            main: main.to_string(),
            sub: sub.to_string(),
        }
    }
}

/// File name without directories or extension, for either separator style.
pub fn file_stem(path: &str) -> &str {
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn line(time_ms: u64, main: &str, sub: &str) -> LyricLine {
        LyricLine {
            time_ms,
            main_text: main.to_string(),
            sub_text: sub.to_string(),
        }
    }

    fn sync_with(lines: Vec<LyricLine>) -> LyricSync {
        let mut sync = LyricSync::default();
        sync.set_lines(lines);
        sync
    }

    #[test]
    fn current_line_tracks_position() {
        let sync = sync_with(vec![
            line(12_000, "third", ""),
            line(1_000, "first", "eins"),
            line(6_500, "second", ""),
        ]);

        assert_eq!(sync.current(0), ("", ""));
        assert_eq!(sync.current(999), ("", ""));
        assert_eq!(sync.current(1_000), ("first", "eins"));
        assert_eq!(sync.current(6_499), ("first", "eins"));
        assert_eq!(sync.current(6_500), ("second", ""));
        assert_eq!(sync.current(60_000), ("third", ""));
    }

    #[test]
    fn duplicate_timestamps_pick_the_later_line() {
        let sync = sync_with(vec![line(1_000, "a", ""), line(1_000, "b", "")]);
        assert_eq!(sync.current_index(1_000), Some(1));
    }

    #[test]
    fn clock_extrapolates_only_while_playing() {
        let start = Instant::now();
        let mut clock = PositionClock::default();
        clock.sync(
            &PlayerState {
                position_ms: 10_000,
                state: PlaybackState::Playing,
            },
            11_000,
            start,
        );
        assert_eq!(clock.position_at(start + Duration::from_millis(400)), 10_400);
        assert_eq!(clock.position_at(start + Duration::from_secs(5)), 11_000);

        clock.sync(
            &PlayerState {
                position_ms: 10_000,
                state: PlaybackState::Paused,
            },
            11_000,
            start,
        );
        assert_eq!(clock.position_at(start + Duration::from_secs(5)), 10_000);
    }

    #[test]
    fn display_falls_back_to_track_metadata() {
        let info = MusicInfo {
            title: String::new(),
            artist: "Someone".into(),
            file_name: r"D:\Music\Album\07 - Night Drive.flac".into(),
            is_active: true,
            ..MusicInfo::default()
        };
        let text = DisplayText::resolve(&info, &LyricSync::default(), 0);
        assert_eq!(text.main, "07 - Night Drive");
        assert_eq!(text.sub, "Someone");

        let inactive = MusicInfo::default();
        assert_eq!(
            DisplayText::resolve(&inactive, &LyricSync::default(), 0),
            DisplayText::default()
        );
    }

    #[test]
    fn file_stem_handles_both_separators() {
        assert_eq!(file_stem("/music/song.mp3"), "song");
        assert_eq!(file_stem(r"C:\music\song.name.flac"), "song.name");
        assert_eq!(file_stem(".hidden"), ".hidden");
        assert_eq!(file_stem(""), "");
    }
}
