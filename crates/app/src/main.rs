use std::{path::PathBuf, thread, time::Duration};

use clap::{Parser, Subcommand};
use pianofall_core::{
    config::{COUNTDOWN_INTERVAL_MS, SPEED_OPTIONS},
    AppConfig, AudioEngine, AutoPlayer, Clock, EventKind, GameConfigPatch, GameEngine, GameMode,
    GameState, HitTier, InputEvent, InstrumentKind, KeyboardInput, ManualClock, PianofallError,
    ScoreData, Song, SystemClock,
};
use tracing_subscriber::EnvFilter;

const FRAME_MS: f64 = 1000.0 / 60.0;
/// Upper bound on simulated frames, a little over an hour of song time.
const MAX_FRAMES: u64 = 60 * 60 * 70;

fn main() -> pianofall_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Play {
            session,
            accuracy,
            realtime,
        } => run_play(&session, accuracy, realtime),
        Commands::Listen { session } => run_listen(&session),
        Commands::Freeplay { keys, instrument } => run_freeplay(&keys, instrument),
        Commands::Inspect { song } => run_inspect(&song),
    }
}

fn run_play(session: &SessionArgs, accuracy: u32, realtime: bool) -> pianofall_core::Result<()> {
    let (config, song) = session.resolve()?;
    tracing::info!(song = %song.title, accuracy, realtime, "starting play session");

    let mut audio = AudioEngine::new(config.instrument);
    audio.initialize();
    let mut player = SimulatedPlayer::new(&song, accuracy.min(100));

    let score = if realtime {
        let mut engine = GameEngine::with_clock(SystemClock::new());
        prepare(&mut engine, &session.patch(&config), song)?;
        drive(&mut engine, sleep_frame, |engine| {
            player.play(engine, &mut audio)
        })?
    } else {
        let clock = ManualClock::new();
        let mut engine = GameEngine::with_clock(clock.clone());
        prepare(&mut engine, &session.patch(&config), song)?;
        drive(&mut engine, |ms| clock.advance_ms(ms), |engine| {
            player.play(engine, &mut audio)
        })?
    };

    audio.dispose();
    print_results(&score, &player.tiers);
    Ok(())
}

fn run_listen(session: &SessionArgs) -> pianofall_core::Result<()> {
    let (config, song) = session.resolve()?;
    tracing::info!(song = %song.title, "listening");

    let mut audio = AudioEngine::new(config.instrument);
    audio.initialize();
    let mut auto = AutoPlayer::for_song(&song, 0.0);
    let mut tiers = TierCounts::default();

    let clock = ManualClock::new();
    let mut engine = GameEngine::with_clock(clock.clone());
    prepare(&mut engine, &session.patch(&config), song)?;
    let score = drive(&mut engine, |ms| clock.advance_ms(ms), |engine| {
        let now = engine.current_time();
        for event in auto.poll(now) {
            match event.kind {
                EventKind::NoteOn => {
                    audio.play_note(event.midi, event.velocity);
                    tiers.record(engine.note_on(event.midi));
                }
                EventKind::NoteOff => {
                    audio.stop_note(event.midi);
                    engine.note_off(event.midi);
                }
            }
        }
    })?;

    audio.dispose();
    print_results(&score, &tiers);
    Ok(())
}

fn run_freeplay(keys: &str, instrument: InstrumentKind) -> pianofall_core::Result<()> {
    let mut audio = AudioEngine::new(instrument);
    audio.initialize();
    let mut input = KeyboardInput::default();

    for midi in press_keys(&mut input, &mut audio, keys) {
        println!("{}", pianofall_core::song::midi_to_note_name(midi));
    }

    audio.dispose();
    Ok(())
}

/// Taps each key in turn through the input layer and returns the pitches
/// that sounded.
fn press_keys(input: &mut KeyboardInput, audio: &mut AudioEngine, keys: &str) -> Vec<u8> {
    let mut played = Vec::new();
    for key in keys.chars() {
        let Some(InputEvent::NoteOn(midi)) = input.key_down(key) else {
            tracing::warn!(%key, "key is not mapped to a note");
            continue;
        };
        audio.play_note(midi, 0.8);
        played.push(midi);
        if let Some(InputEvent::NoteOff(midi)) = input.key_up(key) {
            audio.stop_note(midi);
        }
    }
    played
}

fn run_inspect(path: &PathBuf) -> pianofall_core::Result<()> {
    let song = Song::load(path)?;
    let lowest = song.notes().iter().map(|note| note.midi).min();
    let highest = song.notes().iter().map(|note| note.midi).max();

    println!("id:       {}", song.id);
    println!("title:    {}", song.title);
    if let Some(artist) = &song.artist {
        println!("artist:   {artist}");
    }
    if let Some(bpm) = song.bpm {
        println!("bpm:      {bpm}");
    }
    println!("notes:    {}", song.len());
    println!("duration: {:.2}s", song.duration_seconds());
    if let (Some(lowest), Some(highest)) = (lowest, highest) {
        println!(
            "range:    {}-{}",
            pianofall_core::song::midi_to_note_name(lowest),
            pianofall_core::song::midi_to_note_name(highest)
        );
    }
    Ok(())
}

fn prepare<C: Clock>(
    engine: &mut GameEngine<C>,
    patch: &GameConfigPatch,
    song: Song,
) -> pianofall_core::Result<()> {
    engine.set_config(*patch)?;
    engine.set_listener(|snapshot| {
        if snapshot.state == GameState::Countdown {
            tracing::info!(countdown = snapshot.countdown, "get ready");
        }
    });
    engine.load_song(song);
    engine.start();
    if engine.state() != GameState::Countdown {
        return Err(PianofallError::msg(format!(
            "a {} session cannot be started",
            engine.config().mode
        )));
    }
    Ok(())
}

/// Host loop: fires the countdown interval and frame callbacks the engine
/// asks for, and lets `on_frame` feed input after every tick.
fn drive<C: Clock>(
    engine: &mut GameEngine<C>,
    mut wait: impl FnMut(f64),
    mut on_frame: impl FnMut(&mut GameEngine<C>),
) -> pianofall_core::Result<ScoreData> {
    let mut countdown_elapsed = 0.0;
    for _ in 0..MAX_FRAMES {
        wait(FRAME_MS);

        if engine.countdown_pending() {
            countdown_elapsed += FRAME_MS;
            if countdown_elapsed >= COUNTDOWN_INTERVAL_MS {
                countdown_elapsed -= COUNTDOWN_INTERVAL_MS;
                engine.on_countdown_interval();
            }
        }
        if engine.wants_frame() {
            engine.on_frame();
            on_frame(engine);
        }
        if engine.state() == GameState::Completed {
            let score = engine.score();
            engine.destroy();
            return Ok(score);
        }
    }

    engine.destroy();
    Err(PianofallError::msg("session did not complete"))
}

fn sleep_frame(ms: f64) {
    thread::sleep(Duration::from_secs_f64(ms / 1000.0));
}

#[derive(Debug, Default)]
struct TierCounts {
    perfect: u32,
    great: u32,
    good: u32,
    stray: u32,
}

impl TierCounts {
    fn record(&mut self, tier: Option<HitTier>) {
        match tier {
            Some(HitTier::Perfect) => self.perfect += 1,
            Some(HitTier::Great) => self.great += 1,
            Some(HitTier::Good) => self.good += 1,
            None => self.stray += 1,
        }
    }
}

/// Presses song notes with a fixed pseudo-random timing error and skips a
/// share of them according to `accuracy`.
struct SimulatedPlayer {
    presses: Vec<Press>,
    next: usize,
    tiers: TierCounts,
}

struct Press {
    time: f64,
    midi: u8,
    duration: f32,
    velocity: f32,
}

impl SimulatedPlayer {
    fn new(song: &Song, accuracy: u32) -> Self {
        let mut presses: Vec<Press> = song
            .notes()
            .iter()
            .enumerate()
            .filter(|(index, _)| (*index as u32 * 37 + 11) % 100 < accuracy)
            .map(|(index, note)| {
                let error_ms = ((index * 53) % 121) as f64 - 60.0;
                Press {
                    time: note.start_time + error_ms / 1000.0,
                    midi: note.midi,
                    duration: note.duration as f32,
                    velocity: note.velocity,
                }
            })
            .collect();
        presses.sort_by(|a, b| a.time.total_cmp(&b.time));

        Self {
            presses,
            next: 0,
            tiers: TierCounts::default(),
        }
    }

    fn play<C: Clock>(&mut self, engine: &mut GameEngine<C>, audio: &mut AudioEngine) {
        let now = engine.current_time();
        while let Some(press) = self.presses.get(self.next) {
            if press.time > now {
                break;
            }
            audio.play_note_for(press.midi, press.duration, press.velocity);
            self.tiers.record(engine.note_on(press.midi));
            engine.note_off(press.midi);
            self.next += 1;
        }

        // Practice mode holds the song until the right key goes down.
        if engine.is_practice_waiting() {
            if let Some(midi) = engine.next_expected_midi() {
                audio.play_note_for(midi, 0.25, 0.8);
                self.tiers.record(engine.note_on(midi));
                engine.note_off(midi);
            }
        }
    }
}

fn print_results(score: &ScoreData, tiers: &TierCounts) {
    println!("score:      {}", score.score);
    println!("accuracy:   {}%", score.accuracy);
    println!("grade:      {}", score.grade());
    println!(
        "hits:       {} (perfect {}, great {}, good {})",
        score.hit_notes, score.perfect, score.great, score.good
    );
    println!("missed:     {}", score.missed_notes);
    println!("max streak: {}", score.max_streak);
    if tiers.stray > 0 {
        println!("stray keys: {}", tiers.stray);
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Falling-notes piano trainer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug)]
struct SessionArgs {
    /// Song file in JSON format; the built-in demo song is used otherwise.
    #[arg(short, long)]
    song: Option<PathBuf>,
    /// Application configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// practice or performance.
    #[arg(short, long)]
    mode: Option<GameMode>,
    /// Playback speed multiplier.
    #[arg(long)]
    speed: Option<f64>,
    #[arg(long)]
    instrument: Option<InstrumentKind>,
}

impl SessionArgs {
    fn resolve(&self) -> pianofall_core::Result<(AppConfig, Song)> {
        let mut config = match &self.config {
            Some(path) => AppConfig::load(path)?,
            None => AppConfig::default(),
        };
        if let Some(speed) = self.speed {
            if !SPEED_OPTIONS.contains(&speed) {
                return Err(PianofallError::InvalidConfig(format!(
                    "speed must be one of {SPEED_OPTIONS:?}, got {speed}"
                )));
            }
        }
        if let Some(instrument) = self.instrument {
            config.instrument = instrument;
        }
        let song = match &self.song {
            Some(path) => Song::load(path)?,
            None => Song::demo(),
        };
        Ok((config, song))
    }

    /// File settings with command line overrides applied on top.
    fn patch(&self, config: &AppConfig) -> GameConfigPatch {
        let game = config.game;
        GameConfigPatch {
            mode: Some(self.mode.unwrap_or(game.mode)),
            speed: Some(self.speed.unwrap_or(game.speed)),
            fall_time_seconds: Some(game.fall_time_seconds),
            hit_window_ms: Some(game.hit_window_ms),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play a song headlessly with a simulated player and print the results.
    Play {
        #[command(flatten)]
        session: SessionArgs,
        /// Share of notes the simulated player attempts, in percent.
        #[arg(short, long, default_value_t = 90)]
        accuracy: u32,
        /// Run against the wall clock instead of simulated time.
        #[arg(long)]
        realtime: bool,
    },
    /// Auto-play a song through the engine.
    Listen {
        #[command(flatten)]
        session: SessionArgs,
    },
    /// Play mapped keyboard keys straight to the instrument.
    Freeplay {
        /// Keys to press in order, e.g. "zxcvbnm".
        keys: String,
        #[arg(long, default_value = "piano")]
        instrument: InstrumentKind,
    },
    /// Validate a song file and print its statistics.
    Inspect {
        #[arg(short, long)]
        song: PathBuf,
    },
}
