use std::{
    sync::mpsc::{self, Receiver, Sender, TryRecvError},
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Paused,
    Playing,
}

/// The player's raw state code; unknown codes count as stopped.
impl From<i32> for PlaybackState {
    fn from(raw: i32) -> Self {
        match raw {
            1 => PlaybackState::Paused,
            2 => PlaybackState::Playing,
            _ => PlaybackState::Stopped,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MusicInfo {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub file_name: String,
    pub duration_ms: u64,
    pub track_number: u32,
    pub is_active: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlayerState {
    pub position_ms: u64,
    pub state: PlaybackState,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LyricLine {
    pub time_ms: u64,
    pub main_text: String,
    pub sub_text: String,
}

/// The running music player.
pub trait PlayerSource: Send + 'static {
    fn music_info(&mut self) -> Result<MusicInfo>;
    fn player_state(&mut self) -> Result<PlayerState>;
}

/// Timed lyrics for a track, looked up by the track's file name.
pub trait LyricSource: Send + 'static {
    fn load(&mut self, file_name: &str) -> Result<Vec<LyricLine>>;
}

/// Reports that no player is running.
#[derive(Debug, Default)]
pub struct IdlePlayer;

impl PlayerSource for IdlePlayer {
    fn music_info(&mut self) -> Result<MusicInfo> {
        Ok(MusicInfo::default())
    }

    fn player_state(&mut self) -> Result<PlayerState> {
        Ok(PlayerState::default())
    }
}

#[derive(Debug, Default)]
pub struct NoLyrics;

impl LyricSource for NoLyrics {
    fn load(&mut self, _file_name: &str) -> Result<Vec<LyricLine>> {
        Ok(Vec::new())
    }
}

#[derive(Clone, Debug, Default)]
pub struct PlayerSnapshot {
    pub info: MusicInfo,
    pub state: PlayerState,
    /// Set only when the track changed since the previous snapshot.
    pub lyrics: Option<Vec<LyricLine>>,
}

impl MusicInfo {
    /// One line per known field, for tooltips.
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        if !self.title.is_empty() {
            lines.push(self.title.clone());
        }
        if !self.artist.is_empty() {
            lines.push(self.artist.clone());
        }
        match (self.album.is_empty(), self.track_number) {
            (false, 0) => lines.push(self.album.clone()),
            (false, n) => lines.push(format!("{} #{n}", self.album)),
            (true, 0) => {}
            (true, n) => lines.push(format!("Track {n}")),
        }
        if lines.is_empty() {
            lines.push(self.file_name.clone());
        }
        lines.join("\n")
    }
}

impl PlayerSnapshot {
    pub fn is_active(&self) -> bool {
        self.info.is_active
    }
}

enum PollCommand {
    Fetch,
    Shutdown,
}

const INFLIGHT_TIMEOUT: Duration = Duration::from_secs(5);

pub fn poll_interval(snapshot: Option<&PlayerSnapshot>) -> Duration {
    match snapshot {
        Some(snapshot) if snapshot.is_active() => match snapshot.state.state {
            PlaybackState::Playing => Duration::from_millis(250),
            PlaybackState::Paused => Duration::from_secs(1),
            PlaybackState::Stopped => Duration::from_secs(2),
        },
        _ => Duration::from_secs(3),
    }
}

struct PollWorker<P, L> {
    player: P,
    lyrics: L,
    current_file: Option<String>,
    last_error: Option<String>,
}

impl<P: PlayerSource, L: LyricSource> PollWorker<P, L> {
    fn fetch(&mut self) -> PlayerSnapshot {
        match self.try_fetch() {
            Ok(snapshot) => {
                self.last_error = None;
                snapshot
            }
            Err(err) => {
                let message = format!("{err:#}");
                if self.last_error.as_deref() != Some(message.as_str()) {
                    log::warn!("Player poll failed: {message}");
                    self.last_error = Some(message);
                }
                self.current_file = None;
                PlayerSnapshot::default()
            }
        }
    }

    fn try_fetch(&mut self) -> Result<PlayerSnapshot> {
        let info = self
            .player
            .music_info()
            .context("Failed to read track info")?;
        let state = self
            .player
            .player_state()
            .context("Failed to read player state")?;

        let file = info.is_active.then(|| info.file_name.clone());
        let lyrics = if file != self.current_file {
            self.current_file = file;
            match self.current_file.as_deref() {
                Some(name) if !name.is_empty() => {
                    let mut lines = self.lyrics.load(name).unwrap_or_else(|err| {
                        log::warn!("Failed to load lyrics for {name}: {err:#}");
                        Vec::new()
                    });
                    lines.sort_by_key(|line| line.time_ms);
                    log::info!("Track changed to {name}: {} lyric lines", lines.len());
                    Some(lines)
                }
                _ => Some(Vec::new()),
            }
        } else {
            None
        };

        Ok(PlayerSnapshot {
            info,
            state,
            lyrics,
        })
    }
}

/// Polls a [`PlayerSource`] on a background thread.
pub struct PlayerPoller {
    request_tx: Option<Sender<PollCommand>>,
    snapshot_rx: Option<Receiver<PlayerSnapshot>>,
    inflight_since: Option<Instant>,
    last_pull: Option<Instant>,
}

impl PlayerPoller {
    pub fn spawn<P: PlayerSource, L: LyricSource>(player: P, lyrics: L) -> Self {
        let (snapshot_tx, snapshot_rx) = mpsc::channel();
        let (request_tx, request_rx) = mpsc::channel();

        let mut worker = PollWorker {
            player,
            lyrics,
            current_file: None,
            last_error: None,
        };

        let spawned = thread::Builder::new()
            .name("player-poller".into())
            .spawn(move || {
                while let Ok(command) = request_rx.recv() {
                    match command {
                        PollCommand::Fetch => {
                            if snapshot_tx.send(worker.fetch()).is_err() {
                                break;
                            }
                        }
                        PollCommand::Shutdown => break,
                    }
                }
                log::debug!("Player poller stopped");
            });

        if let Err(err) = spawned {
            log::error!("Failed to start player poller: {err}");
            return Self {
                request_tx: None,
                snapshot_rx: None,
                inflight_since: None,
                last_pull: None,
            };
        }

        Self {
            request_tx: Some(request_tx),
            snapshot_rx: Some(snapshot_rx),
            inflight_since: None,
            last_pull: None,
        }
    }

    /// Drains finished snapshots without blocking.
    pub fn drain(&mut self) -> Vec<PlayerSnapshot> {
        let mut snapshots = Vec::new();
        if let Some(rx) = self.snapshot_rx.as_ref() {
            loop {
                match rx.try_recv() {
                    Ok(snapshot) => snapshots.push(snapshot),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        self.snapshot_rx = None;
                        self.request_tx = None;
                        break;
                    }
                }
            }
        }
        if !snapshots.is_empty() {
            self.inflight_since = None;
            self.last_pull = Some(Instant::now());
        }
        snapshots
    }

    /// Sends a fetch request if none is in flight and `interval` has elapsed.
    pub fn maybe_request(&mut self, now: Instant, interval: Duration) {
        if let Some(sent_at) = self.inflight_since {
            if now.duration_since(sent_at) <= INFLIGHT_TIMEOUT {
                return;
            }
            log::debug!("Player poll timed out; requesting again");
            self.inflight_since = None;
        }

        if let Some(last) = self.last_pull {
            if now.duration_since(last) < interval {
                return;
            }
        }

        if let Some(tx) = self.request_tx.as_ref() {
            match tx.send(PollCommand::Fetch) {
                Ok(()) => self.inflight_since = Some(now),
                Err(_) => self.request_tx = None,
            }
        }
    }
}

impl Drop for PlayerPoller {
    fn drop(&mut self) {
        if let Some(tx) = self.request_tx.take() {
            let _ = tx.send(PollCommand::Shutdown);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct ScriptedPlayer {
        info: Arc<Mutex<MusicInfo>>,
        state: PlayerState,
    }

    impl PlayerSource for ScriptedPlayer {
        fn music_info(&mut self) -> Result<MusicInfo> {
            Ok(self.info.lock().unwrap().clone())
        }

        fn player_state(&mut self) -> Result<PlayerState> {
            Ok(self.state)
        }
    }

    struct FailingPlayer;

    impl PlayerSource for FailingPlayer {
        fn music_info(&mut self) -> Result<MusicInfo> {
            Err(anyhow::anyhow!("player window not found"))
        }

        fn player_state(&mut self) -> Result<PlayerState> {
            Ok(PlayerState::default())
        }
    }

    struct CountingLyrics {
        loads: Arc<Mutex<Vec<String>>>,
    }

    impl LyricSource for CountingLyrics {
        fn load(&mut self, file_name: &str) -> Result<Vec<LyricLine>> {
            self.loads.lock().unwrap().push(file_name.to_string());
            Ok(vec![
                LyricLine {
                    time_ms: 5_000,
                    main_text: "second".into(),
                    sub_text: String::new(),
                },
                LyricLine {
                    time_ms: 1_000,
                    main_text: "first".into(),
                    sub_text: String::new(),
                },
            ])
        }
    }

    fn track(file: &str) -> MusicInfo {
        MusicInfo {
            title: "Song".into(),
            artist: "Artist".into(),
            file_name: file.into(),
            is_active: true,
            ..MusicInfo::default()
        }
    }

    #[test]
    fn raw_state_codes_map_to_playback_state() {
        assert_eq!(PlaybackState::from(0), PlaybackState::Stopped);
        assert_eq!(PlaybackState::from(1), PlaybackState::Paused);
        assert_eq!(PlaybackState::from(2), PlaybackState::Playing);
        assert_eq!(PlaybackState::from(7), PlaybackState::Stopped);
    }

    #[test]
    fn worker_loads_lyrics_only_on_track_change() {
        let info = Arc::new(Mutex::new(track("C:/music/a.flac")));
        let loads = Arc::new(Mutex::new(Vec::new()));
        let mut worker = PollWorker {
            player: ScriptedPlayer {
                info: info.clone(),
                state: PlayerState {
                    position_ms: 1_500,
                    state: PlaybackState::Playing,
                },
            },
            lyrics: CountingLyrics {
                loads: loads.clone(),
            },
            current_file: None,
            last_error: None,
        };

        let first = worker.fetch();
        let lines = first.lyrics.expect("lyrics on first fetch");
        assert_eq!(lines[0].main_text, "first");

        assert!(worker.fetch().lyrics.is_none());

        *info.lock().unwrap() = track("C:/music/b.flac");
        assert!(worker.fetch().lyrics.is_some());
        assert_eq!(
            *loads.lock().unwrap(),
            vec!["C:/music/a.flac".to_string(), "C:/music/b.flac".to_string()]
        );
    }

    #[test]
    fn worker_reports_inactive_player_on_error() {
        let mut worker = PollWorker {
            player: FailingPlayer,
            lyrics: NoLyrics,
            current_file: Some("old.mp3".into()),
            last_error: None,
        };
        let snapshot = worker.fetch();
        assert!(!snapshot.is_active());
        assert!(worker.last_error.is_some());
        assert!(worker.current_file.is_none());
    }

    #[test]
    fn poll_interval_follows_playback_state() {
        let mut snapshot = PlayerSnapshot {
            info: track("a.mp3"),
            ..PlayerSnapshot::default()
        };
        snapshot.state.state = PlaybackState::Playing;
        assert_eq!(poll_interval(Some(&snapshot)), Duration::from_millis(250));
        snapshot.state.state = PlaybackState::Paused;
        assert_eq!(poll_interval(Some(&snapshot)), Duration::from_secs(1));
        snapshot.info.is_active = false;
        assert_eq!(poll_interval(Some(&snapshot)), Duration::from_secs(3));
        assert_eq!(poll_interval(None), Duration::from_secs(3));
    }

    #[test]
    fn summary_lists_known_fields() {
        let info = MusicInfo {
            title: "Night Drive".into(),
            artist: "Someone".into(),
            album: "Roads".into(),
            track_number: 7,
            ..track("C:/music/night.flac")
        };
        assert_eq!(info.summary(), "Night Drive\nSomeone\nRoads #7");

        let bare = MusicInfo {
            file_name: "C:/music/night.flac".into(),
            ..MusicInfo::default()
        };
        assert_eq!(bare.summary(), "C:/music/night.flac");
    }

    #[test]
    fn poller_delivers_snapshots_from_worker_thread() {
        let mut poller = PlayerPoller::spawn(IdlePlayer, NoLyrics);
        assert!(poller.request_tx.is_some());
        poller.maybe_request(Instant::now(), Duration::ZERO);

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut received = Vec::new();
        while received.is_empty() && Instant::now() < deadline {
            received = poller.drain();
            thread::sleep(Duration::from_millis(5));
        }

        assert_eq!(received.len(), 1);
        assert!(!received[0].is_active());
    }

    #[test]
    fn poller_does_not_stack_requests() {
        let mut poller = PlayerPoller::spawn(IdlePlayer, NoLyrics);
        let now = Instant::now();
        poller.maybe_request(now, Duration::ZERO);
        let first = poller.inflight_since;
        poller.maybe_request(now + Duration::from_millis(10), Duration::ZERO);
        assert_eq!(poller.inflight_since, first);
    }

    #[test]
    fn lost_request_is_sent_again_after_timeout() {
        let mut poller = PlayerPoller::spawn(IdlePlayer, NoLyrics);
        let now = Instant::now();
        poller.maybe_request(now, Duration::ZERO);
        assert_eq!(poller.inflight_since, Some(now));

        poller.maybe_request(now + INFLIGHT_TIMEOUT, Duration::ZERO);
        assert_eq!(poller.inflight_since, Some(now));

        let retry_at = now + INFLIGHT_TIMEOUT + Duration::from_millis(1);
        poller.maybe_request(retry_at, Duration::ZERO);
        assert_eq!(poller.inflight_since, Some(retry_at));
    }
}
