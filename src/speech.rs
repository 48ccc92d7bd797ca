//! Text-to-speech with a loudness envelope for jaw synchronisation.
//!
//! An utterance is rendered to a WAV file, reduced to one normalized
//! loudness value per 100 ms, then played back asynchronously. The envelope
//! is anchored to the playback start so a control loop can ask how loud the
//! voice is right now, or a little ahead of now.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use hound::{SampleFormat, WavReader};
use tracing::{debug, info};

use crate::config::SpeechConfig;

/// Envelope resolution: buckets per second of audio.
pub const BUCKETS_PER_SECOND: u32 = 10;

/// Renders text to a WAV file.
pub trait Synthesizer: Send {
    /// Writes the spoken form of `text` to `path`, returning once the file
    /// is complete.
    fn render(&self, text: &str, path: &Path) -> Result<()>;
}

/// Starts asynchronous playback of a WAV file.
pub trait Player: Send {
    fn play(&self, path: &Path) -> Result<Box<dyn Playback>>;
}

/// A playback in progress.
pub trait Playback: Send {
    /// Non-blocking completion check.
    fn is_finished(&mut self) -> Result<bool>;

    /// Blocks until playback has completed.
    fn wait(&mut self) -> Result<()>;
}

/// [`Synthesizer`] backed by the `espeak-ng` command.
pub struct EspeakSynthesizer {
    voice: String,
    speed: u32,
    pitch: u32,
}

impl EspeakSynthesizer {
    pub fn from_config(config: &SpeechConfig) -> Self {
        Self {
            voice: config.voice.clone(),
            speed: config.speed,
            pitch: config.pitch,
        }
    }
}

impl Synthesizer for EspeakSynthesizer {
    fn render(&self, text: &str, path: &Path) -> Result<()> {
        let status = Command::new("espeak-ng")
            .arg("-v")
            .arg(&self.voice)
            .arg("-s")
            .arg(self.speed.to_string())
            .arg("-p")
            .arg(self.pitch.to_string())
            .arg("-w")
            .arg(path)
            .arg(text)
            .stdout(Stdio::null())
            .status()
            .context("Failed to run espeak-ng")?;
        if !status.success() {
            anyhow::bail!("espeak-ng exited with {}", status);
        }
        Ok(())
    }
}

/// [`Player`] backed by SoX's `play` command, with a pitch shift.
pub struct SoxPlayer {
    pitch: i32,
}

impl SoxPlayer {
    pub fn from_config(config: &SpeechConfig) -> Self {
        Self {
            pitch: config.playback_pitch,
        }
    }
}

impl Player for SoxPlayer {
    fn play(&self, path: &Path) -> Result<Box<dyn Playback>> {
        let child = Command::new("play")
            .arg(path)
            .arg("pitch")
            .arg(self.pitch.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .context("Failed to spawn play")?;
        Ok(Box::new(ChildPlayback { child }))
    }
}

/// Playback running in a child process.
struct ChildPlayback {
    child: Child,
}

impl Playback for ChildPlayback {
    fn is_finished(&mut self) -> Result<bool> {
        Ok(self.child.try_wait()?.is_some())
    }

    fn wait(&mut self) -> Result<()> {
        self.child.wait().context("Failed to wait for playback")?;
        Ok(())
    }
}

/// Normalized loudness curve of one utterance.
///
/// # Details
/// One value per 100 ms bucket, each the Euclidean norm of the bucket's raw
/// samples divided by the loudest bucket. Values lie in `[0, 1]`; a silent
/// recording yields all zeros.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    volumes: Vec<f32>,
    duration: Duration,
}

impl Envelope {
    /// Builds an envelope from interleaved raw samples.
    ///
    /// # Arguments
    /// * `samples` - Interleaved samples in their native scale.
    /// * `sample_rate` - Frames per second.
    /// * `channels` - Samples per frame.
    ///
    /// # Returns
    /// * `Ok(Envelope)` - The normalized curve and the audio's duration.
    ///
    /// # Errors
    /// Returns an error if the sample rate or channel count is zero.
    pub fn from_samples(samples: &[f64], sample_rate: u32, channels: u16) -> Result<Self> {
        if sample_rate == 0 || channels == 0 {
            anyhow::bail!(
                "invalid audio format: {} Hz, {} channels",
                sample_rate,
                channels
            );
        }
        let channels = usize::from(channels);
        let bucket = ((sample_rate / BUCKETS_PER_SECOND) as usize).max(1) * channels;
        let magnitudes: Vec<f64> = samples
            .chunks(bucket)
            .map(|chunk| chunk.iter().map(|s| s * s).sum::<f64>().sqrt())
            .collect();
        let loudest = magnitudes.iter().copied().fold(0.0_f64, f64::max);
        let volumes = magnitudes
            .iter()
            .map(|&m| if loudest > 0.0 { (m / loudest) as f32 } else { 0.0 })
            .collect();
        let frames = samples.len() / channels;
        let duration = Duration::from_secs_f64(frames as f64 / f64::from(sample_rate));
        Ok(Self { volumes, duration })
    }

    /// Decodes a WAV file and builds its envelope.
    ///
    /// # Details
    /// Integer PCM of any width and 32-bit float PCM are accepted.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or decoded.
    pub fn from_wav(path: &Path) -> Result<Self> {
        let reader = WavReader::open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let spec = reader.spec();
        let samples: Vec<f64> = match spec.sample_format {
            SampleFormat::Int => reader
                .into_samples::<i32>()
                .map(|s| s.map(f64::from))
                .collect::<Result<Vec<f64>, hound::Error>>(),
            SampleFormat::Float => reader
                .into_samples::<f32>()
                .map(|s| s.map(f64::from))
                .collect::<Result<Vec<f64>, hound::Error>>(),
        }
        .with_context(|| format!("Failed to decode {}", path.display()))?;
        Self::from_samples(&samples, spec.sample_rate, spec.channels)
    }

    pub fn volumes(&self) -> &[f32] {
        &self.volumes
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

/// An envelope anchored to the moment its playback started.
#[derive(Clone, Debug)]
pub struct Utterance {
    envelope: Envelope,
    begin_time: Instant,
}

impl Utterance {
    pub fn new(envelope: Envelope, begin_time: Instant) -> Self {
        Self {
            envelope,
            begin_time,
        }
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// Playback time remaining at `now`, never negative.
    pub fn left_at(&self, now: Instant) -> Duration {
        (self.begin_time + self.envelope.duration).saturating_duration_since(now)
    }

    /// Normalized volume at `now + lookahead`.
    ///
    /// # Returns
    /// * `f32` - The bucket's value, or 0.0 before the start or after the end.
    pub fn volume_at(&self, now: Instant, lookahead: Duration) -> f32 {
        let elapsed = if now >= self.begin_time {
            (now - self.begin_time).as_secs_f64()
        } else {
            -(self.begin_time - now).as_secs_f64()
        };
        let position = elapsed + lookahead.as_secs_f64();
        if position < 0.0 || position >= self.envelope.duration.as_secs_f64() {
            return 0.0;
        }
        let index = (position * f64::from(BUCKETS_PER_SECOND)).floor() as usize;
        self.envelope.volumes.get(index).copied().unwrap_or(0.0)
    }
}

/// Speech front end: one utterance at a time.
pub struct Speech {
    synthesizer: Box<dyn Synthesizer>,
    player: Box<dyn Player>,
    wav_path: PathBuf,
    playback: Option<Box<dyn Playback>>,
    utterance: Option<Utterance>,
}

impl Speech {
    /// Creates a speech front end with explicit collaborators.
    pub fn new(
        synthesizer: Box<dyn Synthesizer>,
        player: Box<dyn Player>,
        wav_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            synthesizer,
            player,
            wav_path: wav_path.into(),
            playback: None,
            utterance: None,
        }
    }

    /// Uses `espeak-ng` and SoX `play` as configured.
    pub fn from_config(config: &SpeechConfig) -> Self {
        Self::new(
            Box::new(EspeakSynthesizer::from_config(config)),
            Box::new(SoxPlayer::from_config(config)),
            config.wav_path.clone(),
        )
    }

    /// Renders `text`, computes its envelope and starts playback.
    ///
    /// # Details
    /// Waits for any previous playback first. Returns as soon as playback has
    /// started; the envelope's clock starts at that moment.
    ///
    /// # Arguments
    /// * `text` - The utterance to synthesize.
    ///
    /// # Errors
    /// Returns an error for blank text, or if rendering, decoding or starting
    /// playback fails.
    pub fn say(&mut self, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            anyhow::bail!("Cannot speak empty text");
        }
        self.utterance = None;
        self.wait()?;
        self.synthesizer
            .render(text, &self.wav_path)
            .with_context(|| format!("Failed to synthesize {:?}", text))?;
        let envelope = Envelope::from_wav(&self.wav_path)?;
        debug!(
            buckets = envelope.volumes().len(),
            duration_ms = envelope.duration().as_millis() as u64,
            "envelope computed"
        );
        let begin_time = Instant::now();
        self.playback = Some(self.player.play(&self.wav_path)?);
        self.utterance = Some(Utterance::new(envelope, begin_time));
        info!(text, "speaking");
        Ok(())
    }

    /// Seconds of the current utterance still to play.
    pub fn left(&self) -> Duration {
        self.utterance
            .as_ref()
            .map_or(Duration::ZERO, |u| u.left_at(Instant::now()))
    }

    /// Normalized volume `lookahead` from now; 0.0 with no utterance.
    pub fn volume(&self, lookahead: Duration) -> f32 {
        self.utterance
            .as_ref()
            .map_or(0.0, |u| u.volume_at(Instant::now(), lookahead))
    }

    /// Whether playback has finished; `None` before the first utterance.
    pub fn finished(&mut self) -> Result<Option<bool>> {
        match self.playback.as_mut() {
            Some(playback) => Ok(Some(playback.is_finished()?)),
            None => Ok(None),
        }
    }

    /// Blocks until the current playback, if any, has finished.
    pub fn wait(&mut self) -> Result<()> {
        if let Some(playback) = self.playback.as_mut() {
            playback.wait()?;
        }
        Ok(())
    }
}

/// Fake collaborators shared by the speech and orchestrator tests.
#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use hound::{WavSpec, WavWriter};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    pub(crate) const RATE: u32 = 8000;

    /// Writes 16-bit mono PCM.
    pub(crate) fn write_wav(path: &Path, samples: &[i16]) {
        let spec = WavSpec {
            channels: 1,
            sample_rate: RATE,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for &sample in samples {
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();
    }

    /// One constant-amplitude 100 ms bucket per entry.
    pub(crate) fn stepped_samples(levels: &[i16]) -> Vec<i16> {
        let bucket = (RATE / BUCKETS_PER_SECOND) as usize;
        levels
            .iter()
            .flat_map(|&level| std::iter::repeat(level).take(bucket))
            .collect()
    }

    /// Writes a fixed waveform whatever the text.
    pub(crate) struct FixedSynthesizer {
        pub(crate) samples: Vec<i16>,
        pub(crate) renders: Arc<AtomicUsize>,
    }

    impl Synthesizer for FixedSynthesizer {
        fn render(&self, _text: &str, path: &Path) -> Result<()> {
            self.renders.fetch_add(1, Ordering::SeqCst);
            write_wav(path, &self.samples);
            Ok(())
        }
    }

    /// Writes `samples` for the first `successes` renders, then fails.
    pub(crate) struct FlakySynthesizer {
        pub(crate) samples: Vec<i16>,
        pub(crate) successes: AtomicUsize,
    }

    impl Synthesizer for FlakySynthesizer {
        fn render(&self, _text: &str, path: &Path) -> Result<()> {
            let left = self.successes.load(Ordering::SeqCst);
            if left == 0 {
                anyhow::bail!("espeak-ng exited with status 1");
            }
            self.successes.store(left - 1, Ordering::SeqCst);
            write_wav(path, &self.samples);
            Ok(())
        }
    }

    /// Playback that completes immediately, counting waits.
    pub(crate) struct InstantPlayer {
        pub(crate) waits: Arc<AtomicUsize>,
    }

    struct InstantPlayback {
        waits: Arc<AtomicUsize>,
    }

    impl Player for InstantPlayer {
        fn play(&self, _path: &Path) -> Result<Box<dyn Playback>> {
            Ok(Box::new(InstantPlayback {
                waits: self.waits.clone(),
            }))
        }
    }

    impl Playback for InstantPlayback {
        fn is_finished(&mut self) -> Result<bool> {
            Ok(true)
        }

        fn wait(&mut self) -> Result<()> {
            self.waits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Speech wired to the fakes, writing into `dir`.
    pub(crate) fn fake_speech(
        dir: &Path,
        samples: Vec<i16>,
    ) -> (Speech, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let renders = Arc::new(AtomicUsize::new(0));
        let waits = Arc::new(AtomicUsize::new(0));
        let speech = Speech::new(
            Box::new(FixedSynthesizer {
                samples,
                renders: renders.clone(),
            }),
            Box::new(InstantPlayer {
                waits: waits.clone(),
            }),
            dir.join("utterance.wav"),
        );
        (speech, renders, waits)
    }
}
