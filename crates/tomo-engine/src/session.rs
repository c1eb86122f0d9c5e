//! The measurement loop.
//!
//! A session reads the response body in blocks sized by the throughput
//! controller, rebuilds the media timeline from each block and advances the
//! playback emulator, until the time budget runs out or the stream ends.

use std::collections::BTreeMap;
use std::io;
use std::mem;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;
use tracing::{debug, info, instrument, trace, warn};
use url::Url;

use crate::config::EngineConfig;
use crate::connection::{Connection, ConnectionManager, OpenStream};
use crate::error::DownloadError;
use crate::media::{
    Acceptance, FlvTagSource, MediaClock, MediaTag, MediaTagSource, ScriptValue, TagPoll,
    TimestampStrategy,
};
use crate::playback::{BlockObservation, PlaybackEmulator};
use crate::probe::{ContainerProber, MetadataProber, ProbeOutcome, video_type_of};
use crate::result::{DownloadResult, SessionOutcome};
use crate::throughput::{
    ProgressSnapshot, ThroughputBlock, ThroughputTracker, format_bytes, next_block_size,
};

/// Creates a fresh tag source for every session.
pub type TagSourceFactory = Arc<dyn Fn() -> Box<dyn MediaTagSource> + Send + Sync>;

/// Leading bytes a tag source may ask for before the session gives up on it.
const MAX_UNDECIDED_BYTES: usize = 64 * 1024;

/// Result of one session of [`Downloader::run_many`].
#[derive(Debug)]
pub struct SessionReport {
    pub ip_override: Option<String>,
    pub outcome: Result<SessionOutcome, DownloadError>,
}

#[derive(Clone)]
pub struct Downloader {
    config: EngineConfig,
    connections: ConnectionManager,
    tag_sources: TagSourceFactory,
    prober: Arc<dyn MetadataProber>,
}

impl Downloader {
    /// A downloader demuxing FLV and probing FLV, MP4 and WebM metadata.
    pub fn new(config: EngineConfig) -> Result<Self, DownloadError> {
        Self::with_collaborators(
            config,
            Arc::new(|| Box::new(FlvTagSource::new()) as Box<dyn MediaTagSource>),
            Arc::new(ContainerProber::new()),
        )
    }

    pub fn with_collaborators(
        config: EngineConfig,
        tag_sources: TagSourceFactory,
        prober: Arc<dyn MetadataProber>,
    ) -> Result<Self, DownloadError> {
        let connections = ConnectionManager::new(config.clone())?;
        Ok(Self {
            config,
            connections,
            tag_sources,
            prober,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Measure `url` for `time_budget_seconds` (the configured maximum when
    /// non-positive), optionally against a specific server IP.
    #[instrument(skip(self), level = "debug")]
    pub async fn run(
        &self,
        url: &str,
        ip_override: Option<&str>,
        time_budget_seconds: f64,
    ) -> Result<SessionOutcome, DownloadError> {
        let parsed = Url::parse(url).map_err(|e| DownloadError::invalid_url(url, e.to_string()))?;
        let ip = ip_override
            .map(|ip| {
                ip.parse::<IpAddr>()
                    .map_err(|_| DownloadError::InvalidIpOverride {
                        input: ip.to_owned(),
                    })
            })
            .transpose()?;
        let budget = self.config.effective_budget(time_budget_seconds);

        info!(
            url = %parsed,
            ip = ?ip,
            budget_secs = budget.as_secs_f64(),
            "Starting measurement"
        );

        match self.connections.open(&parsed, ip).await? {
            Connection::Stream(stream) => {
                Ok(SessionOutcome::Completed(self.run_stream(stream, budget).await))
            }
            Connection::Redirect { status, location } => Ok(SessionOutcome::Redirected {
                status_code: status.as_u16(),
                redirect_url: location.map(String::from),
            }),
            Connection::Failed { status } => {
                warn!(status = ?status, "Server unreachable");
                Ok(SessionOutcome::Unreachable {
                    status_code: status.map(|s| s.as_u16()),
                })
            }
        }
    }

    /// One independent session per candidate server, in order. An empty
    /// list measures the URL as resolved by the system.
    pub async fn run_many(
        &self,
        url: &str,
        ip_overrides: &[String],
        time_budget_seconds: f64,
    ) -> Vec<SessionReport> {
        if ip_overrides.is_empty() {
            let outcome = self.run(url, None, time_budget_seconds).await;
            return vec![SessionReport {
                ip_override: None,
                outcome,
            }];
        }

        let mut reports = Vec::with_capacity(ip_overrides.len());
        for ip in ip_overrides {
            let outcome = self.run(url, Some(ip), time_budget_seconds).await;
            reports.push(SessionReport {
                ip_override: Some(ip.clone()),
                outcome,
            });
        }
        reports
    }

    /// Drive an already open stream until the budget runs out, the stream
    /// ends or it fails.
    pub async fn run_stream(&self, stream: OpenStream, budget: Duration) -> DownloadResult {
        let OpenStream {
            status,
            url,
            content_length,
            media_length,
            content_type,
            requested_at,
            body,
        } = stream;

        let mut session = DownloadSession::new(
            &self.config,
            (self.tag_sources)(),
            self.prober.as_ref(),
            media_length,
        );
        let mut body = BlockReader::new(body);
        let mut block_size = self.config.initial_block_size;
        let mut scratch = Vec::with_capacity(block_size);
        let mut stream_error = None;
        let mut download_duration = Duration::ZERO;
        let session_start = Instant::now();

        loop {
            let block_start = Instant::now();
            if block_start.duration_since(session_start) > budget {
                debug!(budget_secs = budget.as_secs_f64(), "Time budget exhausted");
                break;
            }

            // A failed read still hands back the bytes that arrived before it.
            if let Err(e) = body.read_block(block_size, &mut scratch).await {
                warn!(
                    error = %e,
                    total_bytes = session.total_bytes + scratch.len() as u64,
                    "Stream failed"
                );
                stream_error = Some(e.to_string());
            }
            let bytes_read = scratch.len();
            if bytes_read == 0 {
                if stream_error.is_none() {
                    debug!(total_bytes = session.total_bytes, "End of stream");
                }
                break;
            }
            if session.time_to_first_byte.is_none()
                && let Some(first_byte_at) = body.first_byte_at
            {
                let ttfb = first_byte_at.duration_since(requested_at);
                debug!(ttfb_ms = ttfb.as_millis() as u64, "First byte received");
                session.time_to_first_byte = Some(ttfb);
            }

            session.total_bytes += bytes_read as u64;
            session.ingest(&scratch);

            let block_end = Instant::now();
            let elapsed = block_end.duration_since(block_start).as_secs_f64();
            download_duration = block_end.duration_since(session_start);

            session.playback.advance(BlockObservation {
                elapsed_seconds: elapsed,
                media_timestamp_seconds: session.clock.seconds(),
                total_bytes: session.total_bytes,
                session_elapsed_seconds: download_duration.as_secs_f64(),
            });
            session.throughput.record(ThroughputBlock {
                bytes_read,
                elapsed_seconds: elapsed,
            });
            block_size = next_block_size(elapsed, bytes_read);

            let progress = ProgressSnapshot {
                downloaded_bytes: session.total_bytes,
                total_bytes: content_length,
                elapsed: download_duration,
            };
            debug!(
                downloaded = %format_bytes(session.total_bytes),
                percent = %progress.percent(),
                speed = %progress.speed(),
                eta = %progress.eta(),
                media_ts = session.clock.seconds(),
                state = %session.playback.state(),
                next_block = block_size,
                "Progress"
            );

            if stream_error.is_some() {
                break;
            }
        }

        // The header is the last resort for the type of unrecognized streams.
        if session.video_type.is_none()
            && let Some(mime) = content_type.as_deref()
            && (mime.starts_with("video/") || mime.starts_with("audio/"))
        {
            let mime = mime.split(';').next().unwrap_or(mime).trim();
            session.video_type = Some(video_type_of(mime).to_owned());
        }

        let result = session.finish(status.as_u16(), content_length, download_duration, stream_error);
        info!(
            url = %url,
            total_bytes = result.total_bytes_downloaded,
            interruptions = result.interruptions,
            encoding_rate_kbps = ?result.encoding_rate_kbps,
            ttfb_secs = ?result.time_to_first_byte_seconds,
            "Measurement finished"
        );
        result
    }
}

/// Response body read in blocks, remembering when the first byte arrived.
struct BlockReader<R> {
    inner: R,
    first_byte_at: Option<Instant>,
}

impl<R: AsyncRead + Unpin> BlockReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            first_byte_at: None,
        }
    }

    /// Fill `buf` with up to `size` bytes, stopping short only at end of
    /// stream or on an error. Bytes read before an error stay in `buf`.
    async fn read_block(&mut self, size: usize, buf: &mut Vec<u8>) -> io::Result<()> {
        buf.clear();
        buf.resize(size, 0);
        let mut filled = 0;
        let result = loop {
            if filled == size {
                break Ok(());
            }
            match self.inner.read(&mut buf[filled..]).await {
                Ok(0) => break Ok(()),
                Ok(n) => {
                    self.first_byte_at.get_or_insert_with(Instant::now);
                    filled += n;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => break Err(e),
            }
        };
        buf.truncate(filled);
        result
    }
}

/// How the media time is being reconstructed.
enum Timeline {
    /// The tag source has not seen enough bytes to decide.
    Undecided {
        source: Box<dyn MediaTagSource>,
        leading: Vec<u8>,
    },
    Tags {
        source: Box<dyn MediaTagSource>,
        /// Set when the source failed after acceptance; the clock stays put.
        /// The FLV source validates its header on acceptance and only fails
        /// there, so this is reached by other tag sources.
        failed: bool,
    },
    Estimate {
        /// Everything received so far, kept until the encoding rate is known
        /// or the probe attempts run out.
        probe_buffer: Option<Vec<u8>>,
        attempts: u32,
    },
}

impl Timeline {
    fn strategy(&self) -> Option<TimestampStrategy> {
        match self {
            Timeline::Undecided { .. } => None,
            Timeline::Tags { .. } => Some(TimestampStrategy::Tags),
            Timeline::Estimate { .. } => Some(TimestampStrategy::Estimate),
        }
    }
}

struct DownloadSession<'a> {
    config: &'a EngineConfig,
    prober: &'a dyn MetadataProber,
    /// Size of the whole media, when the server announced it.
    media_length: Option<u64>,
    timeline: Timeline,
    clock: MediaClock,
    playback: PlaybackEmulator,
    throughput: ThroughputTracker,
    total_bytes: u64,
    encoding_rate_kbps: Option<f64>,
    media_duration_seconds: Option<f64>,
    video_type: Option<String>,
    time_to_first_byte: Option<Duration>,
}

impl<'a> DownloadSession<'a> {
    fn new(
        config: &'a EngineConfig,
        source: Box<dyn MediaTagSource>,
        prober: &'a dyn MetadataProber,
        media_length: Option<u64>,
    ) -> Self {
        Self {
            config,
            prober,
            media_length,
            timeline: Timeline::Undecided {
                source,
                leading: Vec::new(),
            },
            clock: MediaClock::new(),
            playback: PlaybackEmulator::new(config.thresholds()),
            throughput: ThroughputTracker::new(),
            total_bytes: 0,
            encoding_rate_kbps: None,
            media_duration_seconds: None,
            video_type: None,
            time_to_first_byte: None,
        }
    }

    /// Update the media clock with a freshly read block.
    fn ingest(&mut self, block: &[u8]) {
        let timeline = mem::replace(
            &mut self.timeline,
            Timeline::Estimate {
                probe_buffer: None,
                attempts: 0,
            },
        );
        let mut timeline = self.append(timeline, block);
        match &mut timeline {
            Timeline::Undecided { .. } => {}
            Timeline::Tags { source, failed } => self.drain_tags(&mut **source, failed),
            Timeline::Estimate {
                probe_buffer,
                attempts,
            } => self.estimate(probe_buffer, attempts),
        }
        self.timeline = timeline;
    }

    /// Hand the block to the current strategy, settling the strategy first
    /// if it is still open.
    fn append(&mut self, timeline: Timeline, block: &[u8]) -> Timeline {
        match timeline {
            Timeline::Undecided {
                mut source,
                mut leading,
            } => {
                leading.extend_from_slice(block);
                match source.accepts(&leading) {
                    Ok(Acceptance::Accepted) => {
                        info!(
                            container = source.container_name(),
                            "Media time taken from container tags"
                        );
                        self.video_type = Some(video_type_of(source.mime_type()).to_owned());
                        source.feed(&leading);
                        Timeline::Tags {
                            source,
                            failed: false,
                        }
                    }
                    Ok(Acceptance::NeedMoreData) if leading.len() < MAX_UNDECIDED_BYTES => {
                        Timeline::Undecided { source, leading }
                    }
                    Ok(Acceptance::NeedMoreData) => {
                        info!(
                            container = source.container_name(),
                            bytes = leading.len(),
                            "Container still undecided, estimating media time"
                        );
                        Timeline::Estimate {
                            probe_buffer: Some(leading),
                            attempts: 0,
                        }
                    }
                    Err(e) => {
                        info!(error = %e, "Estimating media time from the encoding rate");
                        Timeline::Estimate {
                            probe_buffer: Some(leading),
                            attempts: 0,
                        }
                    }
                }
            }
            Timeline::Tags { mut source, failed } => {
                if !failed {
                    source.feed(block);
                }
                Timeline::Tags { source, failed }
            }
            Timeline::Estimate {
                mut probe_buffer,
                attempts,
            } => {
                if let Some(buffer) = probe_buffer.as_mut() {
                    buffer.extend_from_slice(block);
                }
                Timeline::Estimate {
                    probe_buffer,
                    attempts,
                }
            }
        }
    }

    fn drain_tags(&mut self, source: &mut dyn MediaTagSource, failed: &mut bool) {
        if *failed {
            return;
        }
        loop {
            match source.next_tag() {
                Ok(TagPoll::Tag(MediaTag::Audio { timestamp_ms }))
                | Ok(TagPoll::Tag(MediaTag::Video { timestamp_ms })) => {
                    self.clock.observe_tag(timestamp_ms);
                }
                Ok(TagPoll::Tag(MediaTag::Metadata { name, fields })) => {
                    self.on_metadata(&name, &fields);
                }
                Ok(TagPoll::Famished) => break,
                Err(e) => {
                    warn!(error = %e, media_ts = self.clock.seconds(), "Tag source failed");
                    *failed = true;
                    break;
                }
            }
        }
    }

    fn on_metadata(&mut self, name: &str, fields: &BTreeMap<String, ScriptValue>) {
        if name != "onMetaData" {
            trace!(name, "Ignoring script tag");
            return;
        }
        let number = |key: &str| fields.get(key).and_then(ScriptValue::as_number);

        if self.media_duration_seconds.is_none() {
            self.media_duration_seconds = number("duration").filter(|d| *d > 0.0);
        }
        if self.encoding_rate_kbps.is_none() {
            let rate = number("totaldatarate")
                .filter(|r| *r > 0.0)
                .or_else(|| Some(number("audiodatarate")? + number("videodatarate")?))
                .filter(|r| *r > 0.0);
            if let Some(rate) = rate {
                info!(rate_kbps = rate, "Encoding rate from stream metadata");
                self.encoding_rate_kbps = Some(rate);
            }
        }
    }

    fn estimate(&mut self, probe_buffer: &mut Option<Vec<u8>>, attempts: &mut u32) {
        let max_attempts = self.config.max_encoding_probe_attempts;

        if self.encoding_rate_kbps.is_none()
            && *attempts < max_attempts
            && let Some(buffer) = probe_buffer.as_deref()
        {
            *attempts += 1;
            match self.prober.probe(buffer) {
                ProbeOutcome::Found(info) => {
                    if self.video_type.is_none() {
                        self.video_type = Some(info.video_type().to_owned());
                    }
                    match info.duration_seconds {
                        Some(duration) if duration > 0.0 => {
                            self.media_duration_seconds.get_or_insert(duration);
                            let bytes = self.media_length.unwrap_or(self.total_bytes);
                            let rate = bytes as f64 * 8.0 / duration / 1000.0;
                            info!(
                                rate_kbps = rate,
                                duration_secs = duration,
                                media_bytes = bytes,
                                attempt = *attempts,
                                "Encoding rate estimated"
                            );
                            self.encoding_rate_kbps = Some(rate);
                        }
                        _ => debug!(attempt = *attempts, "Metadata without duration"),
                    }
                }
                ProbeOutcome::Incomplete => {
                    debug!(attempt = *attempts, bytes = buffer.len(), "Metadata incomplete");
                }
            }
        }

        if probe_buffer.is_some() && (self.encoding_rate_kbps.is_some() || *attempts >= max_attempts)
        {
            if self.encoding_rate_kbps.is_none() {
                warn!(attempts = *attempts, "Encoding rate unknown, media time stays at zero");
            }
            *probe_buffer = None;
        }

        if let Some(rate) = self.encoding_rate_kbps {
            self.clock.estimate(self.total_bytes, rate);
        }
    }

    fn finish(
        self,
        status_code: u16,
        content_length: Option<u64>,
        download_duration: Duration,
        stream_error: Option<String>,
    ) -> DownloadResult {
        let playback = &self.playback;
        DownloadResult {
            status_code: Some(status_code),
            video_type: self.video_type,
            media_duration_seconds: self.media_duration_seconds,
            media_length_bytes: content_length,
            encoding_rate_kbps: self.encoding_rate_kbps,
            total_bytes_downloaded: self.total_bytes,
            interruptions: playback.interruptions(),
            initial_data_bytes: playback.initial_data_bytes(),
            initial_rate_kbps: playback.initial_rate_kbps(),
            accumulated_buffer_seconds: playback.accumulated_buffer_seconds(),
            accumulated_playback_seconds: playback.accumulated_playback_seconds(),
            current_buffer_seconds: playback.current_buffer_seconds(),
            time_to_first_byte_seconds: self.time_to_first_byte.map(|d| d.as_secs_f64()),
            max_instant_throughput_kbps: self.throughput.max_instant_kbps(),
            redirect_url: None,
            download_duration_seconds: download_duration.as_secs_f64(),
            final_state: Some(playback.state()),
            timestamp_strategy: self.timeline.strategy(),
            stream_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ContainerError;
    use crate::playback::PlaybackState;
    use crate::probe::MediaInfo;
    use bytes::Bytes;
    use flv::{FlvHeader, FlvTag, FlvTagType, ScriptData};
    use futures::{StreamExt, stream};
    use mp4::test_support::make_progressive_prefix;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::sleep_until;
    use tokio_util::io::StreamReader;

    /// Reports a duration consistent with a fixed encoding rate.
    struct FixedRateProber {
        kbps: f64,
    }

    impl MetadataProber for FixedRateProber {
        fn probe(&self, buffered: &[u8]) -> ProbeOutcome {
            ProbeOutcome::Found(MediaInfo {
                mime_type: "video/mp4".into(),
                duration_seconds: Some(buffered.len() as f64 * 8.0 / (self.kbps * 1000.0)),
            })
        }
    }

    /// Always reports the same duration, as a parsed movie header does.
    struct FixedDurationProber {
        seconds: f64,
    }

    impl MetadataProber for FixedDurationProber {
        fn probe(&self, _buffered: &[u8]) -> ProbeOutcome {
            ProbeOutcome::Found(MediaInfo {
                mime_type: "video/mp4".into(),
                duration_seconds: Some(self.seconds),
            })
        }
    }

    /// Yields one video tag, then fails on every poll.
    struct BrokenTagSource {
        polls: Arc<AtomicU32>,
    }

    impl MediaTagSource for BrokenTagSource {
        fn container_name(&self) -> &'static str {
            "broken"
        }

        fn mime_type(&self) -> &'static str {
            "video/x-broken"
        }

        fn accepts(&mut self, _leading_bytes: &[u8]) -> Result<Acceptance, ContainerError> {
            Ok(Acceptance::Accepted)
        }

        fn feed(&mut self, _data: &[u8]) {}

        fn next_tag(&mut self) -> Result<TagPoll, ContainerError> {
            if self.polls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(TagPoll::Tag(MediaTag::Video { timestamp_ms: 5000 }))
            } else {
                Err(ContainerError::malformed("broken", "truncated tag header"))
            }
        }
    }

    #[derive(Default)]
    struct NeverReadyProber {
        calls: AtomicU32,
    }

    impl MetadataProber for NeverReadyProber {
        fn probe(&self, _buffered: &[u8]) -> ProbeOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ProbeOutcome::Incomplete
        }
    }

    fn downloader(prober: Arc<dyn MetadataProber>) -> Downloader {
        Downloader::with_collaborators(
            EngineConfig::default(),
            Arc::new(|| Box::new(FlvTagSource::new()) as Box<dyn MediaTagSource>),
            prober,
        )
        .unwrap()
    }

    fn test_url() -> Url {
        Url::parse("http://cache.test/videoplayback").unwrap()
    }

    /// Non-FLV bytes delivered as `(offset from now, size)` chunks.
    fn paced(chunks: Vec<(Duration, usize)>) -> impl AsyncRead + Send + 'static {
        paced_after(Vec::new(), chunks)
    }

    /// Like [`paced`], with `prefix` overwriting the start of the first chunk.
    fn paced_after(
        prefix: Vec<u8>,
        chunks: Vec<(Duration, usize)>,
    ) -> impl AsyncRead + Send + 'static {
        let origin = Instant::now();
        let chunks = chunks.into_iter().enumerate().map(move |(i, (at, len))| {
            let mut data = vec![0u8; len];
            if i == 0 {
                data[..prefix.len()].copy_from_slice(&prefix);
            }
            (at, data)
        });
        let chunks = stream::iter(chunks).then(move |(at, data)| async move {
            sleep_until(origin + at).await;
            Ok::<_, io::Error>(Bytes::from(data))
        });
        StreamReader::new(chunks)
    }

    fn one_per_second(seconds: std::ops::RangeInclusive<u64>) -> Vec<(Duration, usize)> {
        seconds
            .map(|s| (Duration::from_secs(s), 125_000))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_steady_feed_plays_without_stalls() {
        let downloader = downloader(Arc::new(FixedRateProber { kbps: 1000.0 }));
        let stream = OpenStream::from_reader(test_url(), paced(one_per_second(1..=40)));

        let result = downloader
            .run_stream(stream, Duration::from_secs(30))
            .await;

        assert_eq!(result.interruptions, 0);
        assert_eq!(result.final_state, Some(PlaybackState::Playing));
        assert_eq!(result.timestamp_strategy, Some(TimestampStrategy::Estimate));
        assert_eq!(result.video_type.as_deref(), Some("mp4"));
        let rate = result.encoding_rate_kbps.unwrap();
        assert!((rate - 1000.0).abs() < 1e-6, "rate = {rate}");
        let ttfb = result.time_to_first_byte_seconds.unwrap();
        assert!((ttfb - 1.0).abs() < 1e-3, "ttfb = {ttfb}");
        assert!(result.download_duration_seconds >= 30.0);
        assert!(result.current_buffer_seconds > 0.1);
        assert_eq!(result.accumulated_buffer_seconds, 0.0);
        assert!(result.stream_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_feed_gap_causes_one_stall() {
        let downloader = downloader(Arc::new(FixedRateProber { kbps: 1000.0 }));
        // Three seconds of data, a five second gap, then a steady feed again.
        let mut chunks = one_per_second(1..=3);
        chunks.extend(one_per_second(8..=30));
        let stream = OpenStream::from_reader(test_url(), paced(chunks));

        let result = downloader
            .run_stream(stream, Duration::from_secs(20))
            .await;

        assert_eq!(result.interruptions, 1);
        assert_eq!(result.final_state, Some(PlaybackState::Playing));
        assert!(result.accumulated_buffer_seconds >= 2.0);
        assert!(result.accumulated_buffer_seconds <= 4.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_announced_length_sets_the_encoding_rate() {
        // A 600 s movie of 75 MB whose header sits in the first block.
        let prefix = make_progressive_prefix(b"isom", 1000, 600_000, 74_999_000);
        let mut chunks = one_per_second(1..=3);
        chunks.extend(one_per_second(8..=30));
        let mut stream = OpenStream::from_reader(test_url(), paced_after(prefix, chunks));
        stream.content_length = Some(75_000_000);
        stream.media_length = Some(75_000_000);

        let result = downloader(Arc::new(ContainerProber::new()))
            .run_stream(stream, Duration::from_secs(20))
            .await;

        assert_eq!(result.media_duration_seconds, Some(600.0));
        assert_eq!(result.encoding_rate_kbps, Some(1000.0));
        assert_eq!(result.video_type.as_deref(), Some("mp4"));
        assert_eq!(result.interruptions, 1);
        assert!(result.accumulated_playback_seconds < 30.0);
        assert!(result.current_buffer_seconds < 30.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_duration_without_length_uses_bytes_so_far() {
        let downloader = downloader(Arc::new(FixedDurationProber { seconds: 8.192 }));
        let stream = OpenStream::from_reader(test_url(), paced(one_per_second(1..=2)));

        let result = downloader
            .run_stream(stream, Duration::from_secs(10))
            .await;

        // Probed on the first 1024 byte block.
        let rate = result.encoding_rate_kbps.unwrap();
        assert!((rate - 1.0).abs() < 1e-9, "rate = {rate}");
        assert_eq!(result.total_bytes_downloaded, 250_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_byte_time_ignores_block_size() {
        let downloader = downloader(Arc::new(NeverReadyProber::default()));
        let chunks = vec![(Duration::from_secs(1), 100), (Duration::from_secs(3), 5000)];
        let stream = OpenStream::from_reader(test_url(), paced(chunks));

        let result = downloader
            .run_stream(stream, Duration::from_secs(10))
            .await;

        let ttfb = result.time_to_first_byte_seconds.unwrap();
        assert!((ttfb - 1.0).abs() < 1e-3, "ttfb = {ttfb}");
        assert_eq!(result.total_bytes_downloaded, 5100);
    }

    #[tokio::test]
    async fn test_failed_tag_source_is_not_polled_again() {
        let polls = Arc::new(AtomicU32::new(0));
        let counter = polls.clone();
        let downloader = Downloader::with_collaborators(
            EngineConfig::default(),
            Arc::new(move || {
                Box::new(BrokenTagSource {
                    polls: counter.clone(),
                }) as Box<dyn MediaTagSource>
            }),
            Arc::new(NeverReadyProber::default()),
        )
        .unwrap();
        let stream = OpenStream::from_reader(test_url(), io::Cursor::new(vec![0u8; 10_000]));

        let result = downloader
            .run_stream(stream, Duration::from_secs(60))
            .await;

        assert_eq!(polls.load(Ordering::SeqCst), 2);
        assert_eq!(result.timestamp_strategy, Some(TimestampStrategy::Tags));
        assert_eq!(result.video_type.as_deref(), Some("x-broken"));
        assert_eq!(result.total_bytes_downloaded, 10_000);
        // The clock keeps the last tag seen before the failure.
        assert_eq!(result.final_state, Some(PlaybackState::Playing));
        assert!(result.stream_error.is_none());
    }

    #[tokio::test]
    async fn test_byte_counter_matches_stream() {
        let downloader = downloader(Arc::new(FixedRateProber { kbps: 500.0 }));
        let data = vec![0x47u8; 1_234_567];
        let stream = OpenStream::from_reader(test_url(), io::Cursor::new(data));

        let result = downloader
            .run_stream(stream, Duration::from_secs(60))
            .await;

        assert_eq!(result.total_bytes_downloaded, 1_234_567);
        assert_eq!(result.status_code, Some(200));
        assert!(result.stream_error.is_none());
        assert!(result.encoding_rate_kbps.is_some());
    }

    #[tokio::test]
    async fn test_probe_attempts_are_bounded() {
        let prober = Arc::new(NeverReadyProber::default());
        let downloader = downloader(prober.clone());
        let stream = OpenStream::from_reader(test_url(), io::Cursor::new(vec![0u8; 2 << 20]));

        let result = downloader
            .run_stream(stream, Duration::from_secs(60))
            .await;

        assert_eq!(prober.calls.load(Ordering::SeqCst), 9);
        assert_eq!(result.encoding_rate_kbps, None);
        assert_eq!(result.final_state, Some(PlaybackState::InitialBuffering));
        assert_eq!(result.current_buffer_seconds, 0.0);
    }

    #[tokio::test]
    async fn test_flv_tags_drive_the_clock() {
        let mut data = FlvHeader::new(true, true).to_bytes().to_vec();
        data.extend_from_slice(&0u32.to_be_bytes());
        let metadata = ScriptData {
            name: "onMetaData".into(),
            value: ScriptValue::EcmaArray(vec![
                ("duration".into(), ScriptValue::Number(60.0)),
                ("audiodatarate".into(), ScriptValue::Number(128.0)),
                ("videodatarate".into(), ScriptValue::Number(872.0)),
            ]),
        };
        let mut tags = vec![(FlvTagType::ScriptData, 0, metadata.encode())];
        for i in 0..250u32 {
            tags.push((FlvTagType::Video, i * 40, vec![0x27; 400]));
        }
        // A late tag from a misbehaving muxer.
        tags.push((FlvTagType::Audio, 100, vec![0xaf; 10]));
        for (tag_type, timestamp_ms, payload) in tags {
            let tag = FlvTag {
                timestamp_ms,
                stream_id: 0,
                tag_type,
                is_filtered: false,
                data: Bytes::from(payload),
            };
            data.extend_from_slice(&tag.to_bytes_with_trailer());
        }
        let len = data.len() as u64;

        let prober = Arc::new(NeverReadyProber::default());
        let downloader = downloader(prober.clone());
        let stream = OpenStream::from_reader(test_url(), io::Cursor::new(data));
        let result = downloader
            .run_stream(stream, Duration::from_secs(60))
            .await;

        assert_eq!(result.timestamp_strategy, Some(TimestampStrategy::Tags));
        assert_eq!(result.video_type.as_deref(), Some("x-flv"));
        assert_eq!(result.encoding_rate_kbps, Some(1000.0));
        assert_eq!(result.media_duration_seconds, Some(60.0));
        assert_eq!(result.total_bytes_downloaded, len);
        assert_eq!(result.final_state, Some(PlaybackState::Playing));
        assert_eq!(prober.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stream_error_ends_session() {
        let chunks = stream::iter(vec![
            Ok(Bytes::from(vec![0u8; 4096])),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer")),
        ]);
        let downloader = downloader(Arc::new(FixedRateProber { kbps: 1000.0 }));
        let stream = OpenStream::from_reader(test_url(), StreamReader::new(chunks));

        let result = downloader
            .run_stream(stream, Duration::from_secs(60))
            .await;

        assert!(result.stream_error.unwrap().contains("reset by peer"));
        // The block cut short by the reset still counts.
        assert_eq!(result.total_bytes_downloaded, 4096);
    }

    #[tokio::test]
    async fn test_content_type_names_unknown_streams() {
        let downloader = downloader(Arc::new(NeverReadyProber::default()));
        let mut stream = OpenStream::from_reader(test_url(), io::Cursor::new(vec![0u8; 10]));
        stream.content_type = Some("video/webm; codecs=vp9".into());

        let result = downloader
            .run_stream(stream, Duration::from_secs(5))
            .await;
        assert_eq!(result.video_type.as_deref(), Some("webm"));
        assert_eq!(result.total_bytes_downloaded, 10);
    }

    #[tokio::test]
    async fn test_invalid_inputs() {
        let downloader = downloader(Arc::new(ContainerProber::new()));
        assert!(matches!(
            downloader.run("not a url", None, 1.0).await,
            Err(DownloadError::InvalidUrl { .. })
        ));
        assert!(matches!(
            downloader
                .run("http://cache.test/v", Some("300.1.1.1"), 1.0)
                .await,
            Err(DownloadError::InvalidIpOverride { .. })
        ));
    }
}
