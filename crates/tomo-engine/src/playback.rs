//! Emulation of a client player's buffer.
//!
//! The emulator never decodes anything. It compares how much media time has
//! been received (the media timestamp) with how much media time a player
//! would have consumed by now (the playback cursor), and counts the stalls a
//! viewer would have seen.
//!
//! ```text
//! InitialBuffering --(buffered > initial)--> Playing
//! Playing --(ahead < min playout)--> Buffering     (interruption)
//! Buffering --(ahead > restart)--> Playing
//! ```

use std::fmt;

use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    InitialBuffering,
    Playing,
    Buffering,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackState::InitialBuffering => write!(f, "initial-buffering"),
            PlaybackState::Playing => write!(f, "playing"),
            PlaybackState::Buffering => write!(f, "buffering"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackThresholds {
    pub initial_buffer_seconds: f64,
    pub min_playout_buffer_seconds: f64,
    pub min_playout_restart_seconds: f64,
}

impl Default for PlaybackThresholds {
    fn default() -> Self {
        Self {
            initial_buffer_seconds: 2.0,
            min_playout_buffer_seconds: 0.1,
            min_playout_restart_seconds: 1.0,
        }
    }
}

/// What the session saw at the end of one block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockObservation {
    /// Wall time spent on this block.
    pub elapsed_seconds: f64,
    pub media_timestamp_seconds: f64,
    pub total_bytes: u64,
    /// Wall time since the session started.
    pub session_elapsed_seconds: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: PlaybackState,
    pub to: PlaybackState,
}

#[derive(Debug, Clone)]
pub struct PlaybackEmulator {
    thresholds: PlaybackThresholds,
    state: PlaybackState,
    start_playback_seconds: Option<f64>,
    accumulated_buffer_seconds: f64,
    accumulated_playback_seconds: f64,
    current_buffer_seconds: f64,
    interruptions: u32,
    initial_data_bytes: u64,
    initial_rate_kbps: f64,
}

impl PlaybackEmulator {
    pub fn new(thresholds: PlaybackThresholds) -> Self {
        Self {
            thresholds,
            state: PlaybackState::InitialBuffering,
            start_playback_seconds: None,
            accumulated_buffer_seconds: 0.0,
            accumulated_playback_seconds: 0.0,
            current_buffer_seconds: 0.0,
            interruptions: 0,
            initial_data_bytes: 0,
            initial_rate_kbps: 0.0,
        }
    }

    /// Feed the outcome of one block and report a state change, if any.
    pub fn advance(&mut self, observation: BlockObservation) -> Option<Transition> {
        let media_ts = observation.media_timestamp_seconds;
        let from = self.state;

        match self.state {
            PlaybackState::InitialBuffering => {
                self.current_buffer_seconds = media_ts;
                if media_ts > self.thresholds.initial_buffer_seconds {
                    let elapsed = observation.session_elapsed_seconds;
                    self.start_playback_seconds = Some(elapsed);
                    self.initial_data_bytes = observation.total_bytes;
                    self.initial_rate_kbps = if elapsed > 0.0 {
                        observation.total_bytes as f64 * 8.0 / elapsed / 1000.0
                    } else {
                        0.0
                    };
                    self.state = PlaybackState::Playing;
                }
            }
            PlaybackState::Playing => {
                self.accumulated_playback_seconds = media_ts;
                let ahead = media_ts - self.playback_cursor(observation.session_elapsed_seconds);
                self.current_buffer_seconds = ahead;
                if ahead < self.thresholds.min_playout_buffer_seconds {
                    self.interruptions += 1;
                    self.state = PlaybackState::Buffering;
                }
            }
            PlaybackState::Buffering => {
                self.accumulated_buffer_seconds += observation.elapsed_seconds;
                let ahead = media_ts - self.playback_cursor(observation.session_elapsed_seconds);
                self.current_buffer_seconds = ahead;
                if ahead > self.thresholds.min_playout_restart_seconds {
                    self.state = PlaybackState::Playing;
                }
            }
        }

        if self.state == from {
            return None;
        }
        debug!(
            from = %from,
            to = %self.state,
            media_ts,
            session_elapsed = observation.session_elapsed_seconds,
            interruptions = self.interruptions,
            "Playback state changed"
        );
        Some(Transition {
            from,
            to: self.state,
        })
    }

    /// Media time a player would have consumed by `session_elapsed`.
    fn playback_cursor(&self, session_elapsed: f64) -> f64 {
        let start = self.start_playback_seconds.unwrap_or(session_elapsed);
        session_elapsed - start - self.accumulated_buffer_seconds
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn interruptions(&self) -> u32 {
        self.interruptions
    }

    /// Session time at which playback first started.
    pub fn start_playback_seconds(&self) -> Option<f64> {
        self.start_playback_seconds
    }

    pub fn accumulated_buffer_seconds(&self) -> f64 {
        self.accumulated_buffer_seconds
    }

    pub fn accumulated_playback_seconds(&self) -> f64 {
        self.accumulated_playback_seconds
    }

    /// Media buffered ahead of the playback cursor.
    pub fn current_buffer_seconds(&self) -> f64 {
        self.current_buffer_seconds
    }

    pub fn initial_data_bytes(&self) -> u64 {
        self.initial_data_bytes
    }

    pub fn initial_rate_kbps(&self) -> f64 {
        self.initial_rate_kbps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Simulated feed at 1000 kbps. Block durations are powers of two so the
    /// accumulated times stay exact.
    struct Feed {
        emulator: PlaybackEmulator,
        block_seconds: f64,
        session_elapsed: f64,
        media_ts: f64,
        total_bytes: u64,
        transitions: Vec<Transition>,
    }

    impl Feed {
        fn new(block_seconds: f64) -> Self {
            Self {
                emulator: PlaybackEmulator::new(PlaybackThresholds::default()),
                block_seconds,
                session_elapsed: 0.0,
                media_ts: 0.0,
                total_bytes: 0,
                transitions: Vec::new(),
            }
        }

        /// One block that took `wall` seconds and carried `media` seconds.
        fn block(&mut self, wall: f64, media: f64, bytes: u64) {
            self.session_elapsed += wall;
            self.media_ts += media;
            self.total_bytes += bytes;
            let observation = BlockObservation {
                elapsed_seconds: wall,
                media_timestamp_seconds: self.media_ts,
                total_bytes: self.total_bytes,
                session_elapsed_seconds: self.session_elapsed,
            };
            if let Some(transition) = self.emulator.advance(observation) {
                self.transitions.push(transition);
            }
        }

        fn steady(&mut self, seconds: f64) {
            let blocks = (seconds / self.block_seconds).round() as usize;
            for _ in 0..blocks {
                let bytes = (self.block_seconds * 125_000.0) as u64;
                self.block(self.block_seconds, self.block_seconds, bytes);
            }
        }
    }

    #[test]
    fn test_steady_feed_never_stalls() {
        let mut feed = Feed::new(0.125);
        feed.steady(30.0);

        let emulator = &feed.emulator;
        assert_eq!(emulator.interruptions(), 0);
        assert_eq!(emulator.state(), PlaybackState::Playing);
        assert_eq!(feed.transitions.len(), 1);

        let start = emulator.start_playback_seconds().unwrap();
        assert_eq!(start, 2.125);
        assert_eq!(emulator.initial_data_bytes(), 17 * 15_625);
        assert_eq!(emulator.initial_rate_kbps(), 1000.0);
        assert_eq!(emulator.current_buffer_seconds(), start);
        assert_eq!(emulator.accumulated_buffer_seconds(), 0.0);
    }

    #[test]
    fn test_stall_then_recovery() {
        let mut feed = Feed::new(0.125);
        feed.steady(2.25);
        assert_eq!(feed.emulator.state(), PlaybackState::Playing);

        // Three seconds without data, then a block arrives.
        feed.block(3.125, 0.125, 15_625);
        assert_eq!(feed.emulator.state(), PlaybackState::Buffering);
        assert_eq!(feed.emulator.interruptions(), 1);

        feed.steady(5.0);

        use PlaybackState::*;
        let path: Vec<_> = feed.transitions.iter().map(|t| (t.from, t.to)).collect();
        assert_eq!(
            path,
            vec![
                (InitialBuffering, Playing),
                (Playing, Buffering),
                (Buffering, Playing)
            ]
        );
        assert_eq!(feed.emulator.interruptions(), 1);
        assert_eq!(feed.emulator.accumulated_buffer_seconds(), 2.0);
        assert_eq!(feed.emulator.current_buffer_seconds(), 1.125);
    }

    #[test]
    fn test_interruptions_follow_playing_to_buffering_edges() {
        let mut feed = Feed::new(0.125);
        feed.steady(2.5);
        for _ in 0..3 {
            feed.block(4.0, 0.0, 0);
            feed.steady(5.0);
        }

        let stalls = feed
            .transitions
            .iter()
            .filter(|t| t.from == PlaybackState::Playing && t.to == PlaybackState::Buffering)
            .count();
        assert_eq!(stalls, 3);
        assert_eq!(feed.emulator.interruptions() as usize, stalls);
    }

    #[test]
    fn test_initial_buffering_needs_strictly_more() {
        let mut emulator = PlaybackEmulator::new(PlaybackThresholds::default());
        let at_threshold = BlockObservation {
            elapsed_seconds: 0.5,
            media_timestamp_seconds: 2.0,
            total_bytes: 1000,
            session_elapsed_seconds: 0.5,
        };
        assert_eq!(emulator.advance(at_threshold), None);
        assert_eq!(emulator.state(), PlaybackState::InitialBuffering);
        assert_eq!(emulator.current_buffer_seconds(), 2.0);

        let transition = emulator.advance(BlockObservation {
            media_timestamp_seconds: 2.01,
            session_elapsed_seconds: 1.0,
            ..at_threshold
        });
        assert_eq!(
            transition,
            Some(Transition {
                from: PlaybackState::InitialBuffering,
                to: PlaybackState::Playing
            })
        );
        assert_eq!(emulator.initial_rate_kbps(), 8.0);
    }

    #[test]
    fn test_instant_start_reports_zero_rate() {
        let mut emulator = PlaybackEmulator::new(PlaybackThresholds::default());
        emulator.advance(BlockObservation {
            elapsed_seconds: 0.0,
            media_timestamp_seconds: 10.0,
            total_bytes: 4096,
            session_elapsed_seconds: 0.0,
        });
        assert_eq!(emulator.state(), PlaybackState::Playing);
        assert_eq!(emulator.initial_rate_kbps(), 0.0);
    }
}
