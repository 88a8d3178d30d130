//! Real-time audio engine: cpal output stream, shared state and the
//! control handle used by host applications
//!
//! One audio thread renders the sequencer and SFX mix inside the stream
//! callback; every other operation (load, transport, volume, SFX) comes
//! from a control thread through [`PlayerHandle`]. Shared scalars use
//! atomics (f32 values as bit patterns in `AtomicU32`); the sequencer and
//! the SFX bank sit behind locks that the callback takes once per buffer.

use cpal::traits::{DeviceTrait, StreamTrait};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::commands::{CommandQueue, ControlCommand};
use super::device::{get_default_output_device, get_supported_config, AudioConfig};
use super::sequencer::Sequencer;
use crate::mml;
use crate::sfx::{SfxBank, SFX_SLOTS};

/// Current transport state of the player
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerState {
    Stopped,
    Playing,
    Paused,
}

/// Helper to store f32 in AtomicU32
#[inline]
fn f32_to_u32(f: f32) -> u32 {
    f.to_bits()
}

/// Helper to load f32 from AtomicU32
#[inline]
fn u32_to_f32(u: u32) -> f32 {
    f32::from_bits(u)
}

/// Shared state between the control handle(s) and the audio thread
pub(crate) struct SharedState {
    sequencer: RwLock<Sequencer>,
    sfx: SfxBank,
    commands: CommandQueue,
    source_text: Mutex<String>,
    is_playing: AtomicBool,
    ever_started: AtomicBool,
    song_finished: AtomicBool,
    // master gain written by the control thread, applied by the callback
    master_gain: AtomicU32,
    // progress ratio mirrored out of the callback for lock-free reads
    progress: AtomicU32,
    // output levels for metering, smoothed peak per side
    output_level_left: AtomicU32,
    output_level_right: AtomicU32,
    // stream supervision
    stream_failed: AtomicBool,
    restart_attempted: AtomicBool,
    terminating: AtomicBool,
}

impl SharedState {
    fn new() -> Self {
        Self {
            sequencer: RwLock::new(Sequencer::new()),
            sfx: SfxBank::new(),
            commands: CommandQueue::new(64),
            source_text: Mutex::new(String::new()),
            is_playing: AtomicBool::new(false),
            ever_started: AtomicBool::new(false),
            song_finished: AtomicBool::new(false),
            master_gain: AtomicU32::new(f32_to_u32(0.7)),
            progress: AtomicU32::new(f32_to_u32(0.0)),
            output_level_left: AtomicU32::new(f32_to_u32(0.0)),
            output_level_right: AtomicU32::new(f32_to_u32(0.0)),
            stream_failed: AtomicBool::new(false),
            restart_attempted: AtomicBool::new(false),
            terminating: AtomicBool::new(false),
        }
    }
}

/// Render one output buffer. Called from the stream callback; also driven
/// directly by tests so the whole signal path runs without a device.
pub(crate) fn render_buffer(shared: &SharedState, data: &mut [f32], channels: usize) {
    while let Some(command) = shared.commands.pop() {
        match command {
            ControlCommand::Resume => {
                if !shared.song_finished.load(Ordering::Relaxed) {
                    shared.is_playing.store(true, Ordering::SeqCst);
                }
            }
            ControlCommand::Seek(frame) => {
                shared.sequencer.write().seek(frame);
            }
        }
    }

    let mut sequencer = shared.sequencer.write();
    let mut sfx = shared.sfx.lock();

    sequencer.set_master_gain(u32_to_f32(shared.master_gain.load(Ordering::Relaxed)));

    let mut peak_left = 0.0f32;
    let mut peak_right = 0.0f32;

    for chunk in data.chunks_mut(channels) {
        let playing = shared.is_playing.load(Ordering::Relaxed);
        let (left, right) = if playing {
            let frame = sequencer.render_frame(&mut sfx);
            if sequencer.is_song_finished() {
                shared.is_playing.store(false, Ordering::SeqCst);
            }
            frame
        } else {
            // music paused or stopped: sound effects keep playing
            (sfx.output(0), sfx.output(1))
        };

        chunk[0] = left;
        if channels > 1 {
            chunk[1] = right;
        }
        peak_left = peak_left.max(left.abs());
        peak_right = peak_right.max(right.abs());
    }

    shared
        .song_finished
        .store(sequencer.finished(), Ordering::Relaxed);
    shared
        .progress
        .store(f32_to_u32(sequencer.progress_ratio()), Ordering::Relaxed);

    // smoothed peak levels, lock-free for meter readers
    let smoothing = 0.1f32;
    let current = u32_to_f32(shared.output_level_left.load(Ordering::Relaxed));
    shared.output_level_left.store(
        f32_to_u32(current * (1.0 - smoothing) + peak_left * smoothing),
        Ordering::Relaxed,
    );
    let current = u32_to_f32(shared.output_level_right.load(Ordering::Relaxed));
    shared.output_level_right.store(
        f32_to_u32(current * (1.0 - smoothing) + peak_right * smoothing),
        Ordering::Relaxed,
    );
}

/// Handle to control the player from other threads
#[derive(Clone)]
pub struct PlayerHandle {
    shared: Arc<SharedState>,
}

impl PlayerHandle {
    // ----- music -----------------------------------------------------------

    /// Load and compile an MML file. On failure the previously loaded song
    /// stays in place and the error is also appended to the rolling log.
    pub fn load_music(&self, path: &str) -> Result<(), String> {
        let source = mml::source::load_file(path)?;
        self.load_string(&source);
        Ok(())
    }

    /// Compile an MML source string and install it.
    ///
    /// Playback is paused first; the new streams are swapped in atomically
    /// between callbacks.
    pub fn load_string(&self, source: &str) {
        self.shared.is_playing.store(false, Ordering::SeqCst);
        let song = mml::parse(source);
        self.shared
            .master_gain
            .store(f32_to_u32(song.settings.master_gain), Ordering::Relaxed);
        {
            let mut sequencer = self.shared.sequencer.write();
            sequencer.set_song(song);
        }
        *self.shared.source_text.lock() = source.to_string();
        self.shared.song_finished.store(false, Ordering::SeqCst);
        self.shared.ever_started.store(false, Ordering::SeqCst);
        log::info!("song loaded ({} bytes of source)", source.len());
    }

    /// The source text exactly as loaded
    pub fn get_source(&self) -> String {
        self.shared.source_text.lock().clone()
    }

    /// Write the loaded source back to disk
    pub fn save_music(&self, path: &str) -> Result<(), String> {
        mml::source::save_file(path, &self.get_source())
    }

    // ----- transport -------------------------------------------------------

    /// Start playing from the top
    pub fn start(&self) {
        {
            let mut sequencer = self.shared.sequencer.write();
            sequencer.go_to_beginning();
        }
        self.shared.song_finished.store(false, Ordering::SeqCst);
        self.shared.ever_started.store(true, Ordering::SeqCst);
        self.shared.is_playing.store(true, Ordering::SeqCst);
    }

    /// Stop producing music frames; takes effect on the next sample
    /// boundary. Sound effects keep playing.
    pub fn pause(&self) {
        self.shared.is_playing.store(false, Ordering::SeqCst);
    }

    /// Resume from the paused position (applied at the next buffer)
    pub fn resume(&self) {
        self.shared.commands.push(ControlCommand::Resume);
    }

    /// Seek to a fraction of the song (percent 0..100), applied by the
    /// audio thread at the next buffer boundary
    pub fn seek(&self, percent: f32) {
        let percent = percent.clamp(0.0, 100.0);
        let pure = self.shared.sequencer.read().song_last_frame_pure();
        let destination = (pure as f64 * percent as f64 / 100.0) as u64;
        self.shared.commands.push(ControlCommand::Seek(destination));
    }

    pub fn enable_looping(&self) {
        self.shared.sequencer.write().enable_looping();
    }

    pub fn disable_looping(&self) {
        self.shared.sequencer.write().disable_looping();
    }

    /// True once playback has reached the end of the song
    pub fn finished(&self) -> bool {
        self.shared.ever_started.load(Ordering::Relaxed)
            && self.shared.song_finished.load(Ordering::Relaxed)
    }

    pub fn is_playing(&self) -> bool {
        self.shared.is_playing.load(Ordering::SeqCst)
    }

    pub fn player_state(&self) -> PlayerState {
        if self.is_playing() {
            PlayerState::Playing
        } else if self.shared.ever_started.load(Ordering::Relaxed) {
            PlayerState::Paused
        } else {
            PlayerState::Stopped
        }
    }

    // ----- levels and progress ---------------------------------------------

    /// Master volume in percent
    pub fn set_master_volume(&self, percent: f32) {
        let gain = (percent / 100.0).clamp(0.0, 1.0);
        self.shared.master_gain.store(f32_to_u32(gain), Ordering::Relaxed);
    }

    /// Master volume as an integer percent
    pub fn get_master_volume(&self) -> u8 {
        (u32_to_f32(self.shared.master_gain.load(Ordering::Relaxed)) * 100.0) as u8
    }

    /// Fraction of the song played so far (0..1)
    pub fn get_progress_ratio(&self) -> f32 {
        u32_to_f32(self.shared.progress.load(Ordering::Relaxed))
    }

    /// Smoothed output peak levels (left, right)
    pub fn get_output_levels(&self) -> (f32, f32) {
        (
            u32_to_f32(self.shared.output_level_left.load(Ordering::Relaxed)),
            u32_to_f32(self.shared.output_level_right.load(Ordering::Relaxed)),
        )
    }

    /// Averaged recent level per channel (nine melodic, then drums)
    pub fn get_channel_levels(&self) -> [f32; mml::NUM_CHANNELS + 1] {
        self.shared.sequencer.read().channel_levels()
    }

    /// Bookmark frame recorded by the source's furthest `%%` marker
    pub fn get_bookmark(&self) -> u64 {
        self.shared.sequencer.read().bookmark()
    }

    // ----- channel control -------------------------------------------------

    pub fn enable_channel(&self, channel: usize) {
        self.shared.sequencer.write().enable_channel(channel);
    }

    pub fn disable_channel(&self, channel: usize) {
        self.shared.sequencer.write().disable_channel(channel);
    }

    pub fn silence_channel(&self, channel: usize) {
        self.shared.sequencer.write().silence_channel(channel);
    }

    pub fn activate_channel(&self, channel: usize) {
        self.shared.sequencer.write().activate_channel(channel);
    }

    pub fn set_channel_volume(&self, channel: usize, percent: f32) {
        let gain = (percent / 100.0).clamp(0.0, 1.0) * 0.5;
        self.shared.sequencer.write().set_channel_gain(channel, gain);
    }

    // ----- sound effects ---------------------------------------------------

    /// Load a PCM clip into an SFX slot; returns a human-readable error
    /// string on failure and leaves the slot unchanged
    pub fn load_sfx(&self, slot: usize, path: &str) -> Result<(), String> {
        self.shared.sfx.load(slot, path)
    }

    pub fn start_sfx(&self, slot: usize) {
        self.shared.sfx.start(slot);
    }

    pub fn stop_sfx(&self, slot: usize) {
        self.shared.sfx.stop(slot);
    }

    pub fn pause_sfx(&self, slot: usize) {
        self.shared.sfx.pause(slot);
    }

    pub fn resume_sfx(&self, slot: usize) {
        self.shared.sfx.resume(slot);
    }

    pub fn set_sfx_volume(&self, slot: usize, percent: f32) {
        self.shared.sfx.set_gain(slot, percent / 100.0);
    }

    pub fn get_sfx_volume(&self, slot: usize) -> u8 {
        (self.shared.sfx.gain(slot) * 100.0) as u8
    }

    pub fn set_sfx_panning(&self, slot: usize, percent: f32) {
        self.shared.sfx.set_panning(slot, percent / 100.0);
    }

    pub fn get_sfx_panning(&self, slot: usize) -> u8 {
        (self.shared.sfx.panning(slot) * 100.0) as u8
    }

    pub fn sfx_error_text(&self, slot: usize) -> String {
        self.shared.sfx.error_text(slot)
    }

    pub fn sfx_slot_count(&self) -> usize {
        SFX_SLOTS
    }

    /// Mark the engine as shutting down; the stream watchdog stops
    /// attempting restarts
    pub fn declare_termination(&self) {
        self.shared.terminating.store(true, Ordering::SeqCst);
    }
}

/// The audio engine: owns the output stream for its lifetime
pub struct AudioEngine {
    _stream: cpal::Stream,
    handle: PlayerHandle,
    config: AudioConfig,
}

impl AudioEngine {
    /// Create and start an engine on the default output device
    pub fn new(config: AudioConfig) -> Result<Self, String> {
        let shared = Arc::new(SharedState::new());
        Self::with_shared(shared, config)
    }

    fn with_shared(shared: Arc<SharedState>, config: AudioConfig) -> Result<Self, String> {
        let device = get_default_output_device()?;
        let stream_config = get_supported_config(&device, &config)?;
        let channels = stream_config.channels as usize;

        log::info!(
            "starting audio engine: {} Hz, {} channels, buffer {:?}",
            stream_config.sample_rate.0,
            channels,
            stream_config.buffer_size
        );

        let callback_shared = Arc::clone(&shared);
        let error_shared = Arc::clone(&shared);

        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    render_buffer(&callback_shared, data, channels);
                },
                move |err| {
                    log::error!("audio stream error: {}", err);
                    error_shared.stream_failed.store(true, Ordering::SeqCst);
                },
                None,
            )
            .map_err(|e| format!("Failed to build output stream: {}", e))?;

        stream
            .play()
            .map_err(|e| format!("Failed to start stream: {}", e))?;

        Ok(Self {
            _stream: stream,
            handle: PlayerHandle { shared },
            config,
        })
    }

    /// Get a handle to control the engine
    pub fn handle(&self) -> PlayerHandle {
        self.handle.clone()
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }
}

// Global engine handle (cpal::Stream isn't Send/Sync, so only the handle is
// stored; the stream itself is leaked for the process lifetime)
static ENGINE_HANDLE: once_cell::sync::OnceCell<RwLock<Option<PlayerHandle>>> =
    once_cell::sync::OnceCell::new();

/// Initialize the global audio engine and its stream watchdog
pub fn init_engine(config: AudioConfig) -> Result<(), String> {
    if let Some(cell) = ENGINE_HANDLE.get() {
        if cell.read().is_some() {
            log::debug!("audio engine already initialized, reusing existing instance");
            return Ok(());
        }
    }

    let engine = AudioEngine::new(config.clone())?;
    let handle = engine.handle();
    let shared = Arc::clone(&handle.shared);

    let cell = ENGINE_HANDLE.get_or_init(|| RwLock::new(None));
    *cell.write() = Some(handle);

    // The stream must stay alive for audio to work; it lives for the
    // process lifetime.
    std::mem::forget(engine);

    spawn_stream_watchdog(shared, config);

    log::info!("audio engine initialized");
    Ok(())
}

/// Watchdog thread: on a reported stream failure, attempts exactly one
/// stop-reopen-start cycle unless the host has declared termination.
fn spawn_stream_watchdog(shared: Arc<SharedState>, config: AudioConfig) {
    thread::spawn(move || {
        let tick = Duration::from_millis(100);
        loop {
            thread::sleep(tick);
            if shared.terminating.load(Ordering::SeqCst) {
                break;
            }
            if !shared.stream_failed.swap(false, Ordering::SeqCst) {
                continue;
            }
            if shared.restart_attempted.swap(true, Ordering::SeqCst) {
                log::error!("audio stream failed again after restart, giving up");
                continue;
            }
            log::warn!("audio stream dropped, attempting one restart");
            match AudioEngine::with_shared(Arc::clone(&shared), config.clone()) {
                Ok(engine) => {
                    // keep the replacement stream alive on this thread
                    std::mem::forget(engine);
                    log::info!("audio stream restarted");
                }
                Err(e) => log::error!("audio stream restart failed: {}", e),
            }
        }
    });
}

/// Get the global engine handle
pub fn get_engine_handle() -> Option<PlayerHandle> {
    ENGINE_HANDLE.get().and_then(|cell| cell.read().clone())
}

/// Shutdown the global engine; the leaked stream goes silent when the
/// handle is dropped
pub fn shutdown_engine() {
    if let Some(cell) = ENGINE_HANDLE.get() {
        if let Some(handle) = cell.read().clone() {
            handle.declare_termination();
            handle.pause();
        }
        *cell.write() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A handle over fresh shared state, no audio device involved
    fn test_handle() -> PlayerHandle {
        PlayerHandle {
            shared: Arc::new(SharedState::new()),
        }
    }

    /// Pump the render path the way the stream callback would
    fn pump(handle: &PlayerHandle, frames: usize) -> Vec<f32> {
        let mut buffer = vec![0.0f32; frames * 2];
        for chunk in buffer.chunks_mut(512) {
            render_buffer(&handle.shared, chunk, 2);
        }
        buffer
    }

    #[test]
    fn source_round_trips_byte_exact() {
        let handle = test_handle();
        let source = "@g TEMPO=120 // with a comment\n@1 L4 C\u{ff}";
        handle.load_string(source);
        assert_eq!(handle.get_source(), source);
    }

    #[test]
    fn empty_song_reports_finished_on_start() {
        let handle = test_handle();
        handle.load_string("");
        handle.start();
        pump(&handle, 512);
        assert!(handle.finished());
    }

    #[test]
    fn short_song_plays_to_completion() {
        let handle = test_handle();
        handle.load_string("@g TEMPO=400 LOOP=OFF DELAY=OFF @1 L32 C");
        handle.start();
        assert!(handle.is_playing());
        // the note is under a second, but the song end includes the delay
        // tail allowance and the safety pad
        let samples = pump(&handle, 90000);
        let peak = samples.iter().fold(0.0f32, |a, &s| a.max(s.abs()));
        assert!(peak > 0.01);
        assert!(handle.finished());
        assert!(!handle.is_playing());
    }

    #[test]
    fn pause_produces_silence_resume_continues() {
        let handle = test_handle();
        handle.load_string("@g LOOP=ON @1 L1 C");
        handle.start();
        pump(&handle, 2048);
        handle.pause();
        let silent = pump(&handle, 512);
        assert!(silent.iter().all(|&s| s == 0.0));
        handle.resume();
        pump(&handle, 2048);
        assert!(handle.is_playing());
    }

    #[test]
    fn master_volume_is_integer_percent() {
        let handle = test_handle();
        handle.set_master_volume(72.6);
        assert_eq!(handle.get_master_volume(), 72);
        handle.set_master_volume(250.0);
        assert_eq!(handle.get_master_volume(), 100);
    }

    #[test]
    fn seek_lands_on_fraction() {
        let handle = test_handle();
        handle.load_string("@g TEMPO=120 LOOP=OFF DELAY=OFF @1 L4 CDEF");
        handle.start();
        handle.seek(50.0);
        pump(&handle, 256);
        let frame_pos = handle.shared.sequencer.read().frame_pos();
        // 50% of 88200 plus the frames pumped since
        assert!(frame_pos >= 44100 && frame_pos < 44100 + 512);
    }

    #[test]
    fn load_missing_file_keeps_previous_song() {
        let handle = test_handle();
        handle.load_string("@g LOOP=OFF @1 L4 C");
        let before = handle.get_source();
        let result = handle.load_music("/nonexistent/path/song.mml");
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("Error loading file"));
        assert_eq!(handle.get_source(), before);
    }

    #[test]
    fn player_state_follows_transport() {
        let handle = test_handle();
        handle.load_string("@g LOOP=ON @1 L1 C");
        assert_eq!(handle.player_state(), PlayerState::Stopped);
        handle.start();
        assert_eq!(handle.player_state(), PlayerState::Playing);
        handle.pause();
        assert_eq!(handle.player_state(), PlayerState::Paused);
    }

    #[test]
    fn sfx_accessor_defaults_for_out_of_range_slots() {
        let handle = test_handle();
        assert_eq!(handle.get_sfx_volume(200), 0);
        assert_eq!(handle.get_sfx_panning(200), 50);
        assert_eq!(handle.sfx_error_text(200), "");
        assert!(handle.load_sfx(200, "x.wav").is_err());
    }

    #[test]
    fn output_levels_track_playback() {
        let handle = test_handle();
        handle.load_string("@g LOOP=ON @1 L1 V10 C");
        handle.start();
        pump(&handle, 8192);
        let (left, right) = handle.get_output_levels();
        assert!(left > 0.0);
        assert!(right > 0.0);
    }
}
