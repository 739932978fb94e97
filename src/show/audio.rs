//! Keeping the audio in step with the show timeline. The timeline is the
//! master: the audio is started, positioned and paused from the playhead,
//! never the other way round, so a show resumed halfway still has its music
//! catch up.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use common::AudioTrack;
use log::{debug, info, warn};
use tokio::time::Instant;

/// A loaded, paused sound that the scheduler drives
pub trait AudioOutput: Send {
    fn seek(&mut self, position: Duration) -> Result<()>;
    fn play(&mut self) -> Result<()>;
    fn pause(&mut self) -> Result<()>;
    fn position(&self) -> Duration;
}

/// Turns an audio track into something playable
#[async_trait]
pub trait AudioBackend: Send + Sync {
    async fn open(&self, track: &AudioTrack) -> Result<Box<dyn AudioOutput>>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AudioPhase {
    /// No audio for this pass
    NotLoaded,
    /// Loaded, waiting for the playhead to reach the track
    Armed,
    Playing,
    /// The playhead ran past the end of the track
    Ended,
}

pub struct AudioSync {
    phase: AudioPhase,
    start_ms: u64,
    end_ms: u64,
    output: Option<Box<dyn AudioOutput>>,
}

impl Default for AudioSync {
    fn default() -> Self {
        Self {
            phase: AudioPhase::NotLoaded,
            start_ms: 0,
            end_ms: 0,
            output: None,
        }
    }
}

impl AudioSync {
    pub fn phase(&self) -> AudioPhase {
        self.phase
    }

    pub fn position(&self) -> Option<Duration> {
        self.output.as_ref().map(|o| o.position())
    }

    pub fn arm(&mut self, track: &AudioTrack, output: Box<dyn AudioOutput>) {
        self.stop();
        self.start_ms = track.start_offset_ms;
        self.end_ms = track.end_ms();
        self.output = Some(output);
        self.phase = AudioPhase::Armed;
        debug!(
            "Audio '{}' armed for {}ms-{}ms",
            track.name, self.start_ms, self.end_ms
        );
    }

    /// Advance the state machine to the playhead at `offset_ms`
    pub fn update(&mut self, offset_ms: u64) {
        let Some(output) = self.output.as_mut() else {
            return;
        };

        match self.phase {
            AudioPhase::Armed if offset_ms >= self.end_ms => {
                self.phase = AudioPhase::Ended;
            }
            AudioPhase::Armed if offset_ms >= self.start_ms => {
                let position = Duration::from_millis(offset_ms - self.start_ms);
                match output.seek(position).and_then(|_| output.play()) {
                    Ok(()) => {
                        info!("Audio started {}ms into the track", position.as_millis());
                        self.phase = AudioPhase::Playing;
                    }
                    Err(e) => {
                        warn!("Could not start audio: {}", e);
                        self.phase = AudioPhase::Ended;
                    }
                }
            }
            AudioPhase::Playing if offset_ms >= self.end_ms => {
                if let Err(e) = output.pause() {
                    warn!("Could not pause audio at its end: {}", e);
                }
                debug!("Audio reached its end");
                self.phase = AudioPhase::Ended;
            }
            _ => {}
        }
    }

    /// Jump to a new playhead. The audio pauses and is re-armed; the next
    /// `update` starts it at the right place.
    pub fn reposition(&mut self, offset_ms: u64) {
        let Some(output) = self.output.as_mut() else {
            return;
        };

        if self.phase == AudioPhase::Playing {
            if let Err(e) = output.pause() {
                warn!("Could not pause audio for seek: {}", e);
            }
        }
        self.phase = AudioPhase::Armed;
        self.update(offset_ms);
    }

    /// Pause, rewind and let go of the sound
    pub fn stop(&mut self) {
        if let Some(mut output) = self.output.take() {
            if let Err(e) = output.pause().and_then(|_| output.seek(Duration::ZERO)) {
                warn!("Could not rewind audio: {}", e);
            }
        }
        self.phase = AudioPhase::NotLoaded;
    }
}

/// Backend for rigs without a sound card. It only keeps time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SilentAudio;

#[async_trait]
impl AudioBackend for SilentAudio {
    async fn open(&self, track: &AudioTrack) -> Result<Box<dyn AudioOutput>> {
        info!("No audio output, '{}' will run silently", track.name);
        Ok(Box::new(SilentOutput::default()))
    }
}

#[derive(Debug, Default)]
struct SilentOutput {
    position: Duration,
    playing_since: Option<Instant>,
}

impl AudioOutput for SilentOutput {
    fn seek(&mut self, position: Duration) -> Result<()> {
        self.position = position;
        if self.playing_since.is_some() {
            self.playing_since = Some(Instant::now());
        }
        Ok(())
    }

    fn play(&mut self) -> Result<()> {
        if self.playing_since.is_none() {
            self.playing_since = Some(Instant::now());
        }
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        if let Some(since) = self.playing_since.take() {
            self.position += since.elapsed();
        }
        Ok(())
    }

    fn position(&self) -> Duration {
        match self.playing_since {
            Some(since) => self.position + since.elapsed(),
            None => self.position,
        }
    }
}

#[cfg(feature = "audio")]
pub use kira_backend::KiraAudio;

#[cfg(feature = "audio")]
mod kira_backend {
    use std::{io::Cursor, time::Duration};

    use anyhow::{anyhow, bail, Result};
    use async_trait::async_trait;
    use common::{AudioSource, AudioTrack};
    use kira::{
        manager::{backend::cpal::CpalBackend, AudioManager, AudioManagerSettings},
        sound::static_sound::{StaticSoundData, StaticSoundHandle, StaticSoundSettings},
        tween::Tween,
    };
    use parking_lot::Mutex;

    use super::{AudioBackend, AudioOutput};

    /// Plays tracks on the default output device
    pub struct KiraAudio {
        manager: Mutex<AudioManager<CpalBackend>>,
        http: reqwest::Client,
    }

    impl KiraAudio {
        pub fn new() -> Result<Self> {
            let manager = AudioManager::<CpalBackend>::new(AudioManagerSettings::default())
                .map_err(|e| anyhow!("could not open audio output: {}", e))?;
            Ok(Self {
                manager: Mutex::new(manager),
                http: reqwest::Client::new(),
            })
        }

        async fn fetch(&self, track: &AudioTrack) -> Result<Vec<u8>> {
            match &track.source {
                AudioSource::File {
                    data: Some(data), ..
                } => Ok(data.as_bytes().to_vec()),
                AudioSource::File {
                    file_name,
                    data: None,
                } => bail!("audio file '{}' has not been restored", file_name),
                AudioSource::Url { url } => {
                    let bytes = self
                        .http
                        .get(url)
                        .send()
                        .await?
                        .error_for_status()?
                        .bytes()
                        .await?;
                    Ok(bytes.to_vec())
                }
            }
        }
    }

    #[async_trait]
    impl AudioBackend for KiraAudio {
        async fn open(&self, track: &AudioTrack) -> Result<Box<dyn AudioOutput>> {
            let bytes = self.fetch(track).await?;
            let sound =
                StaticSoundData::from_cursor(Cursor::new(bytes), StaticSoundSettings::default())?;

            let mut handle = self
                .manager
                .lock()
                .play(sound)
                .map_err(|e| anyhow!("could not play '{}': {:?}", track.name, e))?;
            handle
                .pause(Tween::default())
                .map_err(|e| anyhow!("{:?}", e))?;

            Ok(Box::new(KiraOutput { handle }))
        }
    }

    struct KiraOutput {
        handle: StaticSoundHandle,
    }

    impl AudioOutput for KiraOutput {
        fn seek(&mut self, position: Duration) -> Result<()> {
            self.handle
                .seek_to(position.as_secs_f64())
                .map_err(|e| anyhow!("{:?}", e))
        }

        fn play(&mut self) -> Result<()> {
            self.handle
                .resume(Tween::default())
                .map_err(|e| anyhow!("{:?}", e))
        }

        fn pause(&mut self) -> Result<()> {
            self.handle
                .pause(Tween::default())
                .map_err(|e| anyhow!("{:?}", e))
        }

        fn position(&self) -> Duration {
            Duration::from_secs_f64(self.handle.position().max(0.0))
        }
    }

    impl Drop for KiraOutput {
        fn drop(&mut self) {
            let _ = self.handle.stop(Tween::default());
        }
    }
}
