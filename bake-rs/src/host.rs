//! Platform capabilities the engine reaches through traits.
//!
//! Conditions that touch the registry, disk images, the network or the user
//! never talk to the OS directly.  The host supplies implementations of the
//! traits below; [`Host::default`] gives inert ones that suit tests and
//! platforms without the capability.
//!
//! | Trait         | Used by                                   | Default              |
//! |---------------|-------------------------------------------|----------------------|
//! | [`Prompt`]    | `Question`                                | always answers No    |
//! | [`Registry`]  | `ExistRegSubKey`, `ExistRegValue`, ...    | unavailable          |
//! | [`ImageProbe`]| `WimExistIndex`, `WimExistFile`, ...      | unavailable          |
//! | [`NetProbe`]  | `Ping`, `Online`                          | system ping / socket |
//! | [`UiSink`]    | `Echo`, section progress                  | discarded            |

use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use tokio::sync::mpsc::UnboundedSender;

use crate::process::AbortHandle;

/// Longest the console prompt blocks before rechecking the abort signal.
const POLL_TICK: Duration = Duration::from_millis(250);

// ── Prompt ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answer {
    Yes,
    No,
    /// No answer before the timeout.
    TimedOut,
}

pub trait Prompt: Send {
    /// Ask a yes/no question.  `None` waits forever.
    fn ask(&mut self, message: &str, timeout: Option<Duration>) -> Answer;
}

/// Replays scripted answers, then falls back to a fixed one.
#[derive(Debug, Clone)]
pub struct FixedPrompt {
    answers: VecDeque<Answer>,
    fallback: Answer,
    pub asked: Vec<String>,
}

impl FixedPrompt {
    pub fn new(fallback: Answer) -> Self {
        FixedPrompt { answers: VecDeque::new(), fallback, asked: Vec::new() }
    }

    pub fn with_answers(answers: impl IntoIterator<Item = Answer>, fallback: Answer) -> Self {
        FixedPrompt { answers: answers.into_iter().collect(), fallback, asked: Vec::new() }
    }
}

impl Default for FixedPrompt {
    fn default() -> Self {
        Self::new(Answer::No)
    }
}

impl Prompt for FixedPrompt {
    fn ask(&mut self, message: &str, timeout: Option<Duration>) -> Answer {
        self.asked.push(message.to_string());
        let answer = self.answers.pop_front().unwrap_or(self.fallback);
        if answer == Answer::TimedOut && timeout.is_none() {
            // an untimed question cannot time out
            return Answer::No;
        }
        answer
    }
}

/// Reads `y`/`n` from the terminal in raw mode.
///
/// Raw mode turns Ctrl-C into an ordinary key press instead of SIGINT, so
/// the prompt raises the build's abort itself and answers `No`.
#[derive(Debug, Default)]
pub struct ConsolePrompt {
    abort: AbortHandle,
}

impl ConsolePrompt {
    pub fn new(abort: AbortHandle) -> Self {
        ConsolePrompt { abort }
    }
}

/// What one key event means to a waiting prompt; `None` keeps waiting.
fn key_answer(key: &KeyEvent, abort: &AbortHandle) -> Option<Answer> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            abort.abort();
            Some(Answer::No)
        }
        KeyCode::Char('y') | KeyCode::Char('Y') => Some(Answer::Yes),
        KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => Some(Answer::No),
        _ => None,
    }
}

impl Prompt for ConsolePrompt {
    fn ask(&mut self, message: &str, timeout: Option<Duration>) -> Answer {
        if self.abort.signal.is_raised() {
            return Answer::No;
        }
        let mut out = std::io::stdout();
        let _ = write!(out, "{message} [y/n] ");
        let _ = out.flush();
        if crossterm::terminal::enable_raw_mode().is_err() {
            return Answer::No;
        }
        let deadline = timeout.map(|t| Instant::now() + t);
        let answer = loop {
            // the host's own Ctrl-C handler may have fired meanwhile
            if self.abort.signal.is_raised() {
                break Answer::No;
            }
            let wait = match deadline {
                Some(d) => match d.checked_duration_since(Instant::now()) {
                    Some(left) => left.min(POLL_TICK),
                    None => break Answer::TimedOut,
                },
                None => POLL_TICK,
            };
            match event::poll(wait) {
                Ok(true) => match event::read() {
                    Ok(Event::Key(key)) => {
                        if let Some(answer) = key_answer(&key, &self.abort) {
                            break answer;
                        }
                    }
                    Ok(_) => {}
                    Err(_) => break Answer::No,
                },
                Ok(false) => {}
                Err(_) => break Answer::No,
            }
        };
        let _ = crossterm::terminal::disable_raw_mode();
        let _ = writeln!(out, "\r");
        answer
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegValue {
    String(String),
    ExpandString(String),
    MultiString(Vec<String>),
    Dword(u32),
    Qword(u64),
    Binary(Vec<u8>),
}

impl RegValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            RegValue::String(_) => "REG_SZ",
            RegValue::ExpandString(_) => "REG_EXPAND_SZ",
            RegValue::MultiString(_) => "REG_MULTI_SZ",
            RegValue::Dword(_) => "REG_DWORD",
            RegValue::Qword(_) => "REG_QWORD",
            RegValue::Binary(_) => "REG_BINARY",
        }
    }
}

/// Read-only registry access.  `root` is already validated and in its long
/// form (`HKEY_LOCAL_MACHINE`, ...).
pub trait Registry: Send {
    fn subkey_exists(&self, root: &str, key: &str) -> Result<bool, String>;
    /// `Ok(None)` when the subkey exists but the value does not, or when the
    /// subkey is missing.
    fn value(&self, root: &str, key: &str, name: &str) -> Result<Option<RegValue>, String>;
}

#[derive(Debug, Default)]
pub struct NoRegistry;

impl Registry for NoRegistry {
    fn subkey_exists(&self, _: &str, _: &str) -> Result<bool, String> {
        Err("Registry is not available on this platform".into())
    }

    fn value(&self, _: &str, _: &str, _: &str) -> Result<Option<RegValue>, String> {
        Err("Registry is not available on this platform".into())
    }
}

/// In-memory registry for tests and offline builds.  Keys compare
/// case-insensitively.
#[derive(Debug, Default, Clone)]
pub struct MemoryRegistry {
    keys: HashMap<String, HashMap<String, RegValue>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn key_id(root: &str, key: &str) -> String {
        format!("{}\\{}", root, key.trim_matches('\\')).to_ascii_lowercase()
    }

    pub fn add_key(&mut self, root: &str, key: &str) {
        self.keys.entry(Self::key_id(root, key)).or_default();
    }

    pub fn set_value(&mut self, root: &str, key: &str, name: &str, value: RegValue) {
        self.keys
            .entry(Self::key_id(root, key))
            .or_default()
            .insert(name.to_ascii_lowercase(), value);
    }
}

impl Registry for MemoryRegistry {
    fn subkey_exists(&self, root: &str, key: &str) -> Result<bool, String> {
        Ok(self.keys.contains_key(&Self::key_id(root, key)))
    }

    fn value(&self, root: &str, key: &str, name: &str) -> Result<Option<RegValue>, String> {
        Ok(self
            .keys
            .get(&Self::key_id(root, key))
            .and_then(|k| k.get(&name.to_ascii_lowercase()))
            .cloned())
    }
}

/// Expand a registry root alias to its long form.
pub fn parse_reg_root(root: &str) -> Option<&'static str> {
    let long = match root.to_ascii_uppercase().as_str() {
        "HKCR" | "HKEY_CLASSES_ROOT" => "HKEY_CLASSES_ROOT",
        "HKCU" | "HKEY_CURRENT_USER" => "HKEY_CURRENT_USER",
        "HKLM" | "HKEY_LOCAL_MACHINE" => "HKEY_LOCAL_MACHINE",
        "HKU" | "HKEY_USERS" => "HKEY_USERS",
        "HKCC" | "HKEY_CURRENT_CONFIG" => "HKEY_CURRENT_CONFIG",
        _ => return None,
    };
    Some(long)
}

// ── Disk images ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    /// The image has no such index.
    InvalidImage,
    /// The path does not exist inside the image.
    PathDoesNotExist,
    /// Any other failure, with the tool's error code.
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageEntry {
    File,
    Dir,
}

/// Inspection of multi-image archive files.
pub trait ImageProbe: Send {
    fn image_count(&self, image: &Path) -> Result<u32, ImageError>;
    /// Kind of the entry at `path` in image `index`.
    fn entry(&self, image: &Path, index: u32, path: &str) -> Result<ImageEntry, ImageError>;
    /// Metadata value `key` (upper case) of image `index`.
    fn property(&self, image: &Path, index: u32, key: &str) -> Result<Option<String>, ImageError>;
}

#[derive(Debug, Default)]
pub struct NoImageSupport;

impl ImageProbe for NoImageSupport {
    fn image_count(&self, _: &Path) -> Result<u32, ImageError> {
        Err(ImageError::Other("UNSUPPORTED".into()))
    }

    fn entry(&self, _: &Path, _: u32, _: &str) -> Result<ImageEntry, ImageError> {
        Err(ImageError::Other("UNSUPPORTED".into()))
    }

    fn property(&self, _: &Path, _: u32, _: &str) -> Result<Option<String>, ImageError> {
        Err(ImageError::Other("UNSUPPORTED".into()))
    }
}

/// Image contents held in memory, keyed by image file name.
#[derive(Debug, Default, Clone)]
pub struct MemoryImages {
    /// image file name (lower case) -> per-index (entries, properties)
    images: HashMap<String, Vec<(HashMap<String, ImageEntry>, HashMap<String, String>)>>,
}

impl MemoryImages {
    pub fn new() -> Self {
        Self::default()
    }

    fn id(image: &Path) -> String {
        image
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default()
    }

    /// Append an image index to `image` and return its 1-based number.
    pub fn add_index(&mut self, image: &Path) -> u32 {
        let v = self.images.entry(Self::id(image)).or_default();
        v.push(Default::default());
        v.len() as u32
    }

    pub fn add_entry(&mut self, image: &Path, index: u32, path: &str, kind: ImageEntry) {
        if let Some(slot) = self.slot_mut(image, index) {
            slot.0.insert(normalize_image_path(path), kind);
        }
    }

    pub fn set_property(&mut self, image: &Path, index: u32, key: &str, value: &str) {
        if let Some(slot) = self.slot_mut(image, index) {
            slot.1.insert(key.to_ascii_uppercase(), value.to_string());
        }
    }

    fn slot_mut(
        &mut self,
        image: &Path,
        index: u32,
    ) -> Option<&mut (HashMap<String, ImageEntry>, HashMap<String, String>)> {
        let idx = (index as usize).checked_sub(1)?;
        self.images.get_mut(&Self::id(image))?.get_mut(idx)
    }

    fn slot(
        &self,
        image: &Path,
        index: u32,
    ) -> Result<&(HashMap<String, ImageEntry>, HashMap<String, String>), ImageError> {
        let images = self.images.get(&Self::id(image)).ok_or(ImageError::Other("WIMLIB_ERR_OPEN".into()))?;
        let idx = (index as usize).checked_sub(1).ok_or(ImageError::InvalidImage)?;
        images.get(idx).ok_or(ImageError::InvalidImage)
    }
}

fn normalize_image_path(p: &str) -> String {
    p.replace('/', "\\").trim_matches('\\').to_ascii_lowercase()
}

impl ImageProbe for MemoryImages {
    fn image_count(&self, image: &Path) -> Result<u32, ImageError> {
        self.images
            .get(&Self::id(image))
            .map(|v| v.len() as u32)
            .ok_or(ImageError::Other("WIMLIB_ERR_OPEN".into()))
    }

    fn entry(&self, image: &Path, index: u32, path: &str) -> Result<ImageEntry, ImageError> {
        let (entries, _) = self.slot(image, index)?;
        entries
            .get(&normalize_image_path(path))
            .copied()
            .ok_or(ImageError::PathDoesNotExist)
    }

    fn property(&self, image: &Path, index: u32, key: &str) -> Result<Option<String>, ImageError> {
        let (_, props) = self.slot(image, index)?;
        Ok(props.get(&key.to_ascii_uppercase()).cloned())
    }
}

// ── Network ───────────────────────────────────────────────────────────────────

pub trait NetProbe: Send {
    /// `Ok(true)` when `host` answered.  `Err` carries the failure text.
    fn ping(&self, host: &str) -> Result<bool, String>;
    fn online(&self) -> bool;
}

/// Uses the system `ping` binary and a UDP socket route lookup.
#[derive(Debug, Default)]
pub struct SystemNet;

impl NetProbe for SystemNet {
    fn ping(&self, host: &str) -> Result<bool, String> {
        let mut cmd = std::process::Command::new("ping");
        if cfg!(windows) {
            cmd.args(["-n", "1", "-w", "2000", host]);
        } else {
            cmd.args(["-c", "1", "-W", "2", host]);
        }
        let status = cmd
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .map_err(|e| e.to_string())?;
        Ok(status.success())
    }

    fn online(&self) -> bool {
        // connect() on UDP sends nothing; it only needs a route
        std::net::UdpSocket::bind("0.0.0.0:0")
            .and_then(|s| s.connect("8.8.8.8:53"))
            .is_ok()
    }
}

/// Fixed answers for tests.
#[derive(Debug, Default, Clone)]
pub struct StaticNet {
    pub reachable: Vec<String>,
    pub online: bool,
}

impl NetProbe for StaticNet {
    fn ping(&self, host: &str) -> Result<bool, String> {
        Ok(self.reachable.iter().any(|h| h.eq_ignore_ascii_case(host)))
    }

    fn online(&self) -> bool {
        self.online
    }
}

// ── UI ────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    Echo(String),
    /// A section started running: `(script title, section name)`.
    Progress(String, String),
}

pub trait UiSink: Send {
    fn send(&self, event: UiEvent);
}

#[derive(Debug, Default)]
pub struct NullUi;

impl UiSink for NullUi {
    fn send(&self, _: UiEvent) {}
}

/// Forwards events to an async printer task.
#[derive(Debug)]
pub struct ChannelUi(pub UnboundedSender<UiEvent>);

impl UiSink for ChannelUi {
    fn send(&self, event: UiEvent) {
        // the receiver is gone only during shutdown
        let _ = self.0.send(event);
    }
}

// ── Host ──────────────────────────────────────────────────────────────────────

pub struct Host {
    pub prompt: Box<dyn Prompt>,
    pub registry: Box<dyn Registry>,
    pub images: Box<dyn ImageProbe>,
    pub net: Box<dyn NetProbe>,
    pub ui: Box<dyn UiSink>,
}

impl Default for Host {
    fn default() -> Self {
        Host {
            prompt: Box::new(FixedPrompt::default()),
            registry: Box::new(NoRegistry),
            images: Box::new(NoImageSupport),
            net: Box::new(SystemNet),
            ui: Box::new(NullUi),
        }
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host").finish_non_exhaustive()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
