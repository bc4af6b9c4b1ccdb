//! Plan narration
//!
//! A model-written script is cleaned, cut into sentences and read aloud one
//! sentence at a time. `NarrationPlayer` holds the playback state and says
//! what the speech engine should do next; `play` drives it against a
//! `SpeechEngine`.

use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, error, info};

/// Shown when the script request fails
pub const SCRIPT_ERROR_MESSAGE: &str =
    "Hubo un error al generar el guion para el podcast. Por favor, intenta de nuevo.";

static SENTENCE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^.!?]+[.!?]+").expect("sentence pattern is valid"));

#[derive(Debug, Error)]
pub enum NarrationError {
    #[error("Speech engine failed: {0}")]
    Engine(String),

    #[error("El guion está vacío; no hay nada que reproducir.")]
    EmptyScript,

    #[error("Failed to write script: {0}")]
    Io(#[from] std::io::Error),
}

/// A cleaned narration script and its sentences
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NarrationScript {
    text: String,
    sentences: Vec<String>,
}

impl NarrationScript {
    /// Clean raw model output; every `*` goes, so emphasis is never read aloud
    pub fn new(raw: &str) -> Self {
        let text = raw.replace('*', "");
        let sentences = split_sentences(&text);
        debug!(chars = %text.len(), sentences = %sentences.len(), "NarrationScript::new: called");
        Self { text, sentences }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn sentences(&self) -> &[String] {
        &self.sentences
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// Write the script as UTF-8 text into `dir`
    pub fn save(&self, dir: &Path, filename: &str) -> Result<PathBuf, NarrationError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(filename);
        std::fs::write(&path, &self.text)?;
        info!(path = %path.display(), "Saved narration script");
        Ok(path)
    }
}

/// Cut text into sentences ending in `.`, `!` or `?`
///
/// Text after the last terminator is kept as a final sentence; text with no
/// terminator at all is one sentence.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences: Vec<String> = Vec::new();
    let mut end = 0;
    for m in SENTENCE.find_iter(text) {
        sentences.push(m.as_str().to_string());
        end = m.end();
    }
    if sentences.is_empty() {
        return vec![text.to_string()];
    }
    let tail = &text[end..];
    if !tail.trim().is_empty() {
        sentences.push(tail.to_string());
    }
    sentences
}

/// A voice the speech engine can use
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voice {
    pub name: String,
    pub lang: String,
    #[serde(default, rename = "default")]
    pub is_default: bool,
}

impl Voice {
    /// Preference order among Spanish voices; higher is better
    pub fn rank(&self) -> u8 {
        let name = self.name.to_lowercase();
        let google = name.contains("google");
        if self.lang == "es-US" && google {
            5
        } else if google {
            4
        } else if self.is_default {
            3
        } else if self.lang == "es-ES" {
            2
        } else if self.lang == "es-CO" {
            1
        } else {
            0
        }
    }
}

/// Best Spanish voice, earliest listed winning ties
pub fn select_best_voice(voices: &[Voice]) -> Option<&Voice> {
    voices
        .iter()
        .filter(|v| v.lang.starts_with("es-"))
        .fold(None, |best: Option<&Voice>, voice| match best {
            Some(b) if b.rank() >= voice.rank() => Some(b),
            _ => Some(voice),
        })
}

/// One sentence to speak
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    pub text: String,
    pub voice: Option<Voice>,
    /// Language to request; the voice's own when one was chosen
    pub lang: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Playing,
    Paused,
}

/// What the speech engine should do next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerAction {
    Speak(Utterance),
    Pause,
    Resume,
    Cancel,
    /// Every sentence was spoken; the player is back at the start
    Finished,
}

/// Playback state over a fixed list of sentences
#[derive(Debug, Clone)]
pub struct NarrationPlayer {
    sentences: Vec<String>,
    cursor: usize,
    state: PlayerState,
    voice: Option<Voice>,
    fallback_lang: String,
}

impl NarrationPlayer {
    pub fn new(script: &NarrationScript, voice: Option<Voice>, fallback_lang: impl Into<String>) -> Self {
        Self {
            sentences: script.sentences().to_vec(),
            cursor: 0,
            state: PlayerState::Idle,
            voice,
            fallback_lang: fallback_lang.into(),
        }
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.sentences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }

    /// Percentage of sentences already spoken
    pub fn progress(&self) -> f64 {
        if self.sentences.is_empty() {
            return 0.0;
        }
        self.cursor as f64 / self.sentences.len() as f64 * 100.0
    }

    /// The single play/pause button
    pub fn toggle(&mut self) -> PlayerAction {
        debug!(state = ?self.state, cursor = %self.cursor, "NarrationPlayer::toggle: called");
        match self.state {
            PlayerState::Paused => {
                self.state = PlayerState::Playing;
                PlayerAction::Resume
            }
            PlayerState::Playing => {
                self.state = PlayerState::Paused;
                PlayerAction::Pause
            }
            PlayerState::Idle => self.next_utterance(),
        }
    }

    /// Stop playback and rewind
    pub fn stop(&mut self) -> PlayerAction {
        debug!("NarrationPlayer::stop: called");
        self.reset();
        PlayerAction::Cancel
    }

    /// The current sentence was spoken; move on
    pub fn utterance_finished(&mut self) -> PlayerAction {
        self.cursor += 1;
        self.next_utterance()
    }

    /// The engine failed; rewind and cancel whatever is queued
    pub fn utterance_failed(&mut self) -> PlayerAction {
        self.reset();
        PlayerAction::Cancel
    }

    fn next_utterance(&mut self) -> PlayerAction {
        while let Some(sentence) = self.sentences.get(self.cursor) {
            let text = sentence.trim();
            if text.is_empty() {
                self.cursor += 1;
                continue;
            }
            self.state = PlayerState::Playing;
            return PlayerAction::Speak(Utterance {
                text: text.to_string(),
                lang: self
                    .voice
                    .as_ref()
                    .map_or_else(|| self.fallback_lang.clone(), |v| v.lang.clone()),
                voice: self.voice.clone(),
            });
        }
        self.reset();
        PlayerAction::Finished
    }

    fn reset(&mut self) {
        self.cursor = 0;
        self.state = PlayerState::Idle;
    }
}

/// Something that can say a sentence out loud
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    /// Speak one utterance and return once it is done
    async fn speak(&self, utterance: &Utterance) -> Result<(), NarrationError>;

    async fn pause(&self) -> Result<(), NarrationError> {
        Ok(())
    }

    async fn resume(&self) -> Result<(), NarrationError> {
        Ok(())
    }

    async fn cancel(&self) -> Result<(), NarrationError> {
        Ok(())
    }
}

/// Play from the player's current position to the end
///
/// `on_sentence` sees every sentence before it is spoken, with the progress
/// percentage at that point.
pub async fn play<F>(
    player: &mut NarrationPlayer,
    engine: &dyn SpeechEngine,
    pause: Duration,
    mut on_sentence: F,
) -> Result<(), NarrationError>
where
    F: FnMut(&str, f64),
{
    if player.is_empty() {
        return Err(NarrationError::EmptyScript);
    }
    let mut action = player.toggle();
    loop {
        match action {
            PlayerAction::Speak(utterance) => {
                on_sentence(&utterance.text, player.progress());
                if let Err(e) = engine.speak(&utterance).await {
                    error!(error = %e, "play: utterance failed");
                    player.utterance_failed();
                    engine.cancel().await?;
                    return Err(e);
                }
                action = player.utterance_finished();
                if matches!(action, PlayerAction::Speak(_)) {
                    tokio::time::sleep(pause).await;
                }
            }
            PlayerAction::Finished => {
                info!("Narration finished");
                return Ok(());
            }
            PlayerAction::Pause => return engine.pause().await,
            PlayerAction::Resume => return engine.resume().await,
            PlayerAction::Cancel => return engine.cancel().await,
        }
    }
}

/// Engine that "speaks" by printing, keeping what it said
#[derive(Debug, Default)]
pub struct TranscriptEngine {
    echo: bool,
    spoken: Mutex<Vec<String>>,
}

impl TranscriptEngine {
    /// `echo` prints each sentence to stdout as it is spoken
    pub fn new(echo: bool) -> Self {
        Self {
            echo,
            spoken: Mutex::new(Vec::new()),
        }
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SpeechEngine for TranscriptEngine {
    async fn speak(&self, utterance: &Utterance) -> Result<(), NarrationError> {
        if self.echo {
            println!("{}", utterance.text);
        }
        self.spoken
            .lock()
            .map_err(|e| NarrationError::Engine(e.to_string()))?
            .push(utterance.text.clone());
        Ok(())
    }
}

/// Engine that runs an external speech program once per sentence
///
/// `{lang}` in an argument is replaced by the utterance language; the
/// sentence itself is passed as the last argument.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
}

impl CommandEngine {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    fn command_args(&self, utterance: &Utterance) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.replace("{lang}", &utterance.lang))
            .chain(std::iter::once(utterance.text.clone()))
            .collect()
    }
}

#[async_trait]
impl SpeechEngine for CommandEngine {
    async fn speak(&self, utterance: &Utterance) -> Result<(), NarrationError> {
        debug!(program = %self.program, lang = %utterance.lang, "CommandEngine::speak: called");
        let status = Command::new(&self.program)
            .args(self.command_args(utterance))
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| NarrationError::Engine(format!("{}: {}", self.program, e)))?;
        if status.success() {
            Ok(())
        } else {
            Err(NarrationError::Engine(format!("{} exited with {}", self.program, status)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn voice(name: &str, lang: &str, is_default: bool) -> Voice {
        Voice {
            name: name.to_string(),
            lang: lang.to_string(),
            is_default,
        }
    }

    #[test]
    fn test_script_strips_asterisks() {
        let script = NarrationScript::new("Hola. *Crea* es la **fase** clave.");
        assert_eq!(script.text(), "Hola. Crea es la fase clave.");
        assert_eq!(script.sentences(), &["Hola.", " Crea es la fase clave."]);
    }

    #[test]
    fn test_split_sentences_keeps_trailing_text() {
        assert_eq!(
            split_sentences("¿Listos? ¡Vamos! Y al final"),
            vec!["¿Listos?", " ¡Vamos!", " Y al final"]
        );
    }

    #[test]
    fn test_split_sentences_without_terminator() {
        assert_eq!(split_sentences("sin puntuación"), vec!["sin puntuación"]);
    }

    #[test]
    fn test_split_sentences_groups_repeated_terminators() {
        assert_eq!(split_sentences("Espera... ¿qué?!"), vec!["Espera...", " ¿qué?!"]);
    }

    #[test]
    fn test_voice_rank() {
        assert_eq!(voice("Google español de Estados Unidos", "es-US", false).rank(), 5);
        assert_eq!(voice("Google español", "es-ES", false).rank(), 4);
        assert_eq!(voice("Mónica", "es-ES", true).rank(), 3);
        assert_eq!(voice("Jorge", "es-ES", false).rank(), 2);
        assert_eq!(voice("Salomé", "es-CO", false).rank(), 1);
        assert_eq!(voice("Paulina", "es-MX", false).rank(), 0);
    }

    #[test]
    fn test_select_best_voice() {
        let voices = vec![
            voice("Samantha", "en-US", true),
            voice("Salomé", "es-CO", false),
            voice("Google español", "es-ES", false),
            voice("Google Deutsch", "de-DE", false),
        ];
        assert_eq!(select_best_voice(&voices).unwrap().name, "Google español");
        assert!(select_best_voice(&voices[..1]).is_none());
    }

    #[test]
    fn test_select_best_voice_first_wins_ties() {
        let voices = vec![voice("Uno", "es-MX", false), voice("Dos", "es-AR", false)];
        assert_eq!(select_best_voice(&voices).unwrap().name, "Uno");
    }

    #[test]
    fn test_player_fallback_language() {
        let script = NarrationScript::new("Hola.");
        let mut player = NarrationPlayer::new(&script, None, "es-CO");
        match player.toggle() {
            PlayerAction::Speak(u) => {
                assert_eq!(u.text, "Hola.");
                assert_eq!(u.lang, "es-CO");
                assert!(u.voice.is_none());
            }
            other => panic!("expected Speak, got {:?}", other),
        }
    }

    #[test]
    fn test_player_toggle_cycle() {
        let script = NarrationScript::new("Uno. Dos. Tres.");
        let mut player = NarrationPlayer::new(&script, Some(voice("Google", "es-US", false)), "es-CO");
        assert!(matches!(player.toggle(), PlayerAction::Speak(u) if u.lang == "es-US"));
        assert_eq!(player.state(), PlayerState::Playing);
        assert_eq!(player.toggle(), PlayerAction::Pause);
        assert_eq!(player.state(), PlayerState::Paused);
        assert_eq!(player.toggle(), PlayerAction::Resume);
        assert_eq!(player.state(), PlayerState::Playing);
    }

    #[test]
    fn test_player_pause_keeps_position_and_stop_rewinds() {
        let script = NarrationScript::new("Uno. Dos. Tres.");
        let mut player = NarrationPlayer::new(&script, None, "es-CO");
        player.toggle();
        assert!(matches!(player.utterance_finished(), PlayerAction::Speak(u) if u.text == "Dos."));
        player.toggle();
        assert_eq!(player.cursor(), 1);
        assert_eq!(player.stop(), PlayerAction::Cancel);
        assert_eq!(player.cursor(), 0);
        assert_eq!(player.state(), PlayerState::Idle);
        assert!(matches!(player.toggle(), PlayerAction::Speak(u) if u.text == "Uno."));
    }

    #[test]
    fn test_player_progress_and_finish() {
        let script = NarrationScript::new("Uno. Dos.");
        let mut player = NarrationPlayer::new(&script, None, "es-CO");
        player.toggle();
        assert_eq!(player.progress(), 0.0);
        player.utterance_finished();
        assert_eq!(player.progress(), 50.0);
        assert_eq!(player.utterance_finished(), PlayerAction::Finished);
        assert_eq!(player.cursor(), 0);
        assert_eq!(player.state(), PlayerState::Idle);
    }

    #[test]
    fn test_player_skips_blank_sentences() {
        let script = NarrationScript::new("Uno. Dos.");
        let mut player = NarrationPlayer::new(&script, None, "es-CO");
        player.sentences.insert(1, "   ".to_string());
        player.toggle();
        assert!(matches!(player.utterance_finished(), PlayerAction::Speak(u) if u.text == "Dos."));
        assert_eq!(player.cursor(), 2);
    }

    #[test]
    fn test_player_error_resets() {
        let script = NarrationScript::new("Uno. Dos.");
        let mut player = NarrationPlayer::new(&script, None, "es-CO");
        player.toggle();
        player.utterance_finished();
        assert_eq!(player.utterance_failed(), PlayerAction::Cancel);
        assert_eq!(player.cursor(), 0);
        assert_eq!(player.state(), PlayerState::Idle);
    }

    #[tokio::test]
    async fn test_play_speaks_every_sentence() {
        let script = NarrationScript::new("Hola, docentes. Hoy exploramos el agua! ¿Listos?");
        let mut player = NarrationPlayer::new(&script, None, "es-CO");
        let engine = TranscriptEngine::new(false);
        let mut progress = Vec::new();

        play(&mut player, &engine, Duration::ZERO, |_, p| progress.push(p))
            .await
            .unwrap();

        assert_eq!(
            engine.spoken(),
            vec!["Hola, docentes.", "Hoy exploramos el agua!", "¿Listos?"]
        );
        assert_eq!(progress.len(), 3);
        assert_eq!(player.cursor(), 0);
    }

    struct FailingEngine;

    #[async_trait]
    impl SpeechEngine for FailingEngine {
        async fn speak(&self, _utterance: &Utterance) -> Result<(), NarrationError> {
            Err(NarrationError::Engine("sin audio".to_string()))
        }
    }

    #[tokio::test]
    async fn test_play_engine_failure_resets() {
        let script = NarrationScript::new("Uno. Dos.");
        let mut player = NarrationPlayer::new(&script, None, "es-CO");
        let result = play(&mut player, &FailingEngine, Duration::ZERO, |_, _| {}).await;
        assert!(matches!(result, Err(NarrationError::Engine(_))));
        assert_eq!(player.state(), PlayerState::Idle);
    }

    #[tokio::test]
    async fn test_play_empty_script() {
        let mut player = NarrationPlayer::new(&NarrationScript::new(""), None, "es-CO");
        player.sentences.clear();
        let result = play(&mut player, &TranscriptEngine::new(false), Duration::ZERO, |_, _| {}).await;
        assert!(matches!(result, Err(NarrationError::EmptyScript)));
    }

    #[test]
    fn test_command_engine_args() {
        let engine = CommandEngine::new("espeak-ng", vec!["-v".to_string(), "{lang}".to_string()]);
        let utterance = Utterance {
            text: "Hola.".to_string(),
            voice: None,
            lang: "es-CO".to_string(),
        };
        assert_eq!(engine.command_args(&utterance), vec!["-v", "es-CO", "Hola."]);
    }

    #[test]
    fn test_save_script() {
        let dir = TempDir::new().unwrap();
        let script = NarrationScript::new("Guion *final*.");
        let path = script.save(dir.path(), "guion-podcast.txt").unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "Guion final.");
    }
}
