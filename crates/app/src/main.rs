use std::{
    fs::File,
    io::{self, BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use clap::{Parser, Subcommand};
use music_features_core::{
    AudioEngine, FeatureConfig, FrameInput, FrameScheduler, MusicFeatureExtractor,
    MusicFeaturesError, MusicFeaturesFrame, RawSample,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

/// Length of the loud burst marking each synthetic beat.
const BEAT_BURST_MS: f64 = 60.0;
const TONE_AMPLITUDE: f64 = 0.3;

fn main() -> music_features_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Simulate {
            notes,
            note_ms,
            gap_ms,
            bpm,
            fps,
            seed,
            every,
        } => {
            let melody = Melody::parse(&notes, note_ms, gap_ms, bpm)?;
            let mut config = config;
            if seed.is_some() {
                config.policy.seed = seed;
            }
            run_simulate(config, &melody, fps, every.max(1))
        }
        Commands::Replay { input, output, fps } => {
            run_replay(config, &input, output.as_deref(), fps)
        }
    }
}

fn load_config(path: Option<&Path>) -> music_features_core::Result<FeatureConfig> {
    let config = match path {
        Some(path) => FeatureConfig::load(path)?,
        None => FeatureConfig::default(),
    };
    if let Err(err) = config.validate() {
        tracing::warn!(%err, "configuration has degenerate values");
    }
    Ok(config)
}

fn run_simulate(
    config: FeatureConfig,
    melody: &Melody,
    fps: f64,
    every: u64,
) -> music_features_core::Result<()> {
    let sample_rate = f64::from(config.audio.sample_rate);
    let block_size = config.audio.block_size;
    let audio = AudioEngine::new(config.audio.clone());
    let handle = audio.handle();
    let _subscription = audio.subscribe(|event| {
        tracing::debug!(generation = event.generation(), ?event, "track event");
    })?;

    let mut extractor = MusicFeatureExtractor::new(config);
    let mut scheduler = FrameScheduler::new(fps);
    let total_seconds = melody.duration_seconds();
    tracing::info!(
        notes = melody.notes.len(),
        total_seconds,
        fps,
        "starting simulation"
    );

    audio.load_track("simulated melody")?;
    let mut out = BufWriter::new(io::stdout().lock());
    let mut block = vec![0.0_f32; block_size];
    let mut commits = 0_u64;

    loop {
        let tick = scheduler.tick();
        let now_seconds = tick.now_ms / 1000.0;
        if now_seconds > total_seconds {
            break;
        }

        // analysis window ending at the current frame
        let start = now_seconds - block_size as f64 / sample_rate;
        for (i, slot) in block.iter_mut().enumerate() {
            *slot = melody.sample_at(start + i as f64 / sample_rate) as f32;
        }
        audio.push_samples(&block)?;

        let snapshot = handle.snapshot()?;
        let frame = extractor.step_snapshot(tick.delta_seconds, tick.now_ms, &snapshot);
        if frame.pitch_changed {
            commits += 1;
        }
        if scheduler.frames() % every == 0 || frame.pitch_changed {
            write_frame(&mut out, &frame)?;
        }
    }

    audio.stop_track()?;
    out.flush()?;

    let summary = audio.summary()?;
    tracing::info!(
        frames = scheduler.frames(),
        commits,
        tempo_bpm = ?summary.tempo_bpm,
        "simulation finished"
    );
    Ok(())
}

fn run_replay(
    config: FeatureConfig,
    input: &Path,
    output: Option<&Path>,
    fps: f64,
) -> music_features_core::Result<()> {
    tracing::info!(?input, ?output, fps, "replaying raw samples");

    let reader = BufReader::new(File::open(input)?);
    let mut out: Box<dyn Write> = match output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };

    let mut extractor = MusicFeatureExtractor::new(config);
    let mut scheduler = FrameScheduler::new(fps);

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let sample: RawSample = serde_json::from_str(&line).map_err(|err| {
            MusicFeaturesError::msg(format!("{}:{}: {err}", input.display(), index + 1))
        })?;

        let tick = scheduler.tick();
        let frame = extractor.step(FrameInput {
            delta_seconds: tick.delta_seconds,
            now_ms: tick.now_ms,
            audio: &sample,
        });
        write_frame(&mut out, &frame)?;
    }

    out.flush()?;
    tracing::info!(frames = scheduler.frames(), "replay finished");
    Ok(())
}

#[derive(Serialize)]
struct FrameRecord<'a> {
    #[serde(flatten)]
    frame: &'a MusicFeaturesFrame,
    color_hex: String,
}

fn write_frame(
    out: &mut impl Write,
    frame: &MusicFeaturesFrame,
) -> music_features_core::Result<()> {
    let record = FrameRecord {
        frame,
        color_hex: frame.pitch_color.to_hex(),
    };
    serde_json::to_writer(&mut *out, &record)?;
    out.write_all(b"\n")?;
    Ok(())
}

/// Looping test melody: each note is followed by a gap of silence, with a
/// loud burst on every beat.
#[derive(Debug, Clone)]
struct Melody {
    notes: Vec<f64>,
    note_ms: f64,
    gap_ms: f64,
    beat_ms: f64,
}

impl Melody {
    fn parse(
        notes: &str,
        note_ms: f64,
        gap_ms: f64,
        bpm: f64,
    ) -> music_features_core::Result<Self> {
        let notes = notes
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(note_frequency)
            .collect::<music_features_core::Result<Vec<_>>>()?;
        if notes.is_empty() {
            return Err(MusicFeaturesError::msg("at least one note is required"));
        }
        if !(note_ms > 0.0) || gap_ms < 0.0 {
            return Err(MusicFeaturesError::msg(
                "note length must be positive and gap length non-negative",
            ));
        }
        let beat_ms = if bpm > 0.0 { 60_000.0 / bpm } else { f64::INFINITY };
        Ok(Self {
            notes,
            note_ms,
            gap_ms,
            beat_ms,
        })
    }

    fn duration_seconds(&self) -> f64 {
        self.notes.len() as f64 * (self.note_ms + self.gap_ms) / 1000.0
    }

    fn sample_at(&self, seconds: f64) -> f64 {
        if seconds < 0.0 {
            return 0.0;
        }
        let ms = seconds * 1000.0;
        let segment = self.note_ms + self.gap_ms;
        let index = (ms / segment) as usize % self.notes.len();
        if ms % segment >= self.note_ms {
            return 0.0;
        }

        let beat_phase = ms % self.beat_ms;
        let burst = if self.beat_ms.is_finite() && beat_phase < BEAT_BURST_MS {
            1.0 + 1.5 * (1.0 - beat_phase / BEAT_BURST_MS)
        } else {
            1.0
        };
        let tone = (std::f64::consts::TAU * self.notes[index] * seconds).sin();
        TONE_AMPLITUDE * burst * tone
    }
}

/// Parses scientific pitch notation such as `A4`, `C#5` or `Bb3`.
fn note_frequency(name: &str) -> music_features_core::Result<f64> {
    let invalid = || MusicFeaturesError::msg(format!("cannot parse note `{name}`"));
    let mut chars = name.chars();
    let letter = chars.next().ok_or_else(invalid)?;
    let base = match letter.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return Err(invalid()),
    };
    let rest = chars.as_str();
    let (accidental, octave) = if let Some(octave) = rest.strip_prefix('#') {
        (1, octave)
    } else if let Some(octave) = rest.strip_prefix('b') {
        (-1, octave)
    } else {
        (0, rest)
    };
    let octave: i32 = octave.parse().map_err(|_| invalid())?;
    let midi = 12 * (octave + 1) + base + accidental;
    Ok(440.0 * 2f64.powf(f64::from(midi - 69) / 12.0))
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Music feature extraction driver", long_about = None)]
struct Cli {
    /// JSON file overriding the default pipeline configuration.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Synthesise a melody and print the resulting feature frames.
    Simulate {
        /// Comma separated notes in scientific pitch notation.
        #[arg(short, long, default_value = "A4,C5,E5,G4")]
        notes: String,
        /// How long each note sounds.
        #[arg(long, default_value_t = 1500.0)]
        note_ms: f64,
        /// Silence after each note.
        #[arg(long, default_value_t = 300.0)]
        gap_ms: f64,
        /// Beat rate of the click track. Zero disables beats.
        #[arg(long, default_value_t = 120.0)]
        bpm: f64,
        #[arg(long, default_value_t = 60.0)]
        fps: f64,
        /// Seed for the silence fallback colors.
        #[arg(long)]
        seed: Option<u64>,
        /// Print every Nth frame (commits are always printed).
        #[arg(long, default_value_t = 1)]
        every: u64,
    },
    /// Feed JSON lines of raw samples through the pipeline, one per frame.
    Replay {
        /// File with one raw sample JSON object per line.
        input: PathBuf,
        /// Write frames here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long, default_value_t = 60.0)]
        fps: f64,
    },
}
