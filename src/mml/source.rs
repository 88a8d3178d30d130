//! MML source handling: comment stripping, section demultiplexing, file I/O

use std::fs;
use std::path::Path;

use crate::logging;
use crate::mml::song::NUM_CHANNELS;

/// The raw source split into its channel sections.
///
/// `@1`..`@9` introduce melodic channels, `@d`/`@D` the drum channel and
/// `@g`/`@G` the global section. When a marker repeats, the last section
/// wins.
#[derive(Debug, Clone, Default)]
pub struct Sections {
    pub melodic: Vec<String>,
    pub drum: String,
    pub global: String,
}

/// Strip line comments (`//` to end of line), whitespace, stray `(` and the
/// legacy `0xFF` end-of-file sentinel.
pub fn strip(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '/' && chars.peek() == Some(&'/') {
            for next in chars.by_ref() {
                if next == '\n' {
                    break;
                }
            }
            continue;
        }
        if ch == ' ' || ch == '\n' || ch == '\r' || ch == '\t' || ch == '(' || ch == '\u{ff}' {
            continue;
        }
        out.push(ch);
    }
    out
}

/// Split a stripped source into its sections
pub fn split_sections(stripped: &str) -> Sections {
    let mut sections = Sections {
        melodic: vec![String::new(); NUM_CHANNELS],
        drum: String::new(),
        global: String::new(),
    };

    let bytes = stripped.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'@' && i + 1 < bytes.len() {
            let marker = bytes[i + 1];
            let body_start = i + 2;
            let body_end = stripped[body_start..]
                .find('@')
                .map(|off| body_start + off)
                .unwrap_or(bytes.len());
            let body = &stripped[body_start..body_end];

            match marker {
                b'1'..=b'9' => {
                    sections.melodic[(marker - b'1') as usize] = body.to_string();
                }
                b'd' | b'D' => sections.drum = body.to_string(),
                b'g' | b'G' => sections.global = body.to_string(),
                _ => {}
            }
        }
        i += 1;
    }

    sections
}

/// Load an MML source file as UTF-8 text.
///
/// On failure the error is appended to the rolling log and returned; the
/// caller keeps whatever song it had loaded before.
pub fn load_file<P: AsRef<Path>>(path: P) -> Result<String, String> {
    let path = path.as_ref();
    fs::read_to_string(path).map_err(|_| {
        let message = format!("Error loading file: {}", path.display());
        logging::append(&message);
        log::error!("{}", message);
        message
    })
}

/// Write an MML source back to disk, byte-exact
pub fn save_file<P: AsRef<Path>>(path: P, source: &str) -> Result<(), String> {
    let path = path.as_ref();
    fs::write(path, source).map_err(|e| format!("Error saving file: {}: {}", path.display(), e))
}
