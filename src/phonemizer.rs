use std::borrow::Cow;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::error::ZonosError;
use crate::model::Phonemizer;

/// Location of the espeak-ng binary and its data directory.
///
/// `None` falls back to `espeak-ng` on PATH and its built-in data path.
#[derive(Debug, Clone, Default)]
pub struct EspeakConfig {
    pub bin_path: Option<PathBuf>,
    pub data_path: Option<PathBuf>,
}

/// [`Phonemizer`] backed by the espeak-ng command line tool.
#[derive(Debug, Clone, Default)]
pub struct EspeakPhonemizer {
    config: EspeakConfig,
}

impl EspeakPhonemizer {
    pub fn new(config: EspeakConfig) -> Self {
        Self { config }
    }
}

impl Phonemizer for EspeakPhonemizer {
    /// Convert `text` to IPA, keeping sentence punctuation in place.
    fn phonemize(&self, text: &str, language: &str) -> Result<String, ZonosError> {
        let parts = split_text_parts(text);
        let segments: Vec<&str> = parts
            .iter()
            .filter_map(|part| match part {
                TextPart::Text(segment) => Some(segment.as_str()),
                TextPart::Punct(_) => None,
            })
            .collect();
        if segments.is_empty() {
            return Ok(parts
                .iter()
                .filter_map(|p| match p {
                    TextPart::Punct(ch) => Some(*ch),
                    TextPart::Text(_) => None,
                })
                .collect());
        }

        let phonemes = self.phonemize_segments(&segments, language)?;
        Ok(join_phonemes(&parts, &phonemes))
    }
}

/// Interleave per-segment IPA with the punctuation that separated the segments.
///
/// Each IPA run is preceded by a space unless it opens the output.
fn join_phonemes(parts: &[TextPart], phonemes: &[String]) -> String {
    let mut out = String::new();
    let mut ipa_runs = phonemes.iter();
    for part in parts {
        match part {
            TextPart::Text(_) => {
                if let Some(ipa) = ipa_runs.next() {
                    if !out.is_empty() && !out.ends_with(' ') {
                        out.push(' ');
                    }
                    out.push_str(ipa);
                }
            }
            TextPart::Punct(ch) => out.push(*ch),
        }
    }
    out
}

impl EspeakPhonemizer {
    fn phonemize_segments(
        &self,
        segments: &[&str],
        language: &str,
    ) -> Result<Vec<String>, ZonosError> {
        let output = self.run_espeak(&segments.join("\n"), language)?;
        let lines: Vec<&str> = output.lines().collect();

        // One output line per input line is expected; otherwise redo segment by segment.
        if lines.len() != segments.len() {
            return segments
                .iter()
                .map(|segment| -> Result<String, ZonosError> {
                    Ok(clean_ipa(&self.run_espeak(segment, language)?))
                })
                .collect();
        }
        Ok(lines.iter().map(|line| clean_ipa(line)).collect())
    }

    fn run_espeak(&self, input: &str, language: &str) -> Result<String, ZonosError> {
        let bin = self
            .config
            .bin_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("espeak-ng"));
        let mut command = Command::new(bin);
        command.args(["--ipa", "--stdin", "-q", "-v", language]);
        if let Some(data) = &self.config.data_path {
            command.arg("--path").arg(data);
        }

        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ZonosError::EspeakNotFound
                } else {
                    ZonosError::Io(e)
                }
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            // espeak-ng under-processes the last token of an unterminated line
            stdin.write_all(newline_terminated(input).as_bytes())?;
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ZonosError::PhonemizerFailed(format!(
                "espeak-ng exited with code {:?}: {stderr}",
                output.status.code()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TextPart {
    Text(String),
    Punct(char),
}

fn split_text_parts(text: &str) -> Vec<TextPart> {
    let mut parts = Vec::new();
    let mut current = String::new();

    for (idx, ch) in text.char_indices() {
        if let Some(punct) = boundary_punctuation(ch) {
            if !is_between_digits(text, idx, ch) {
                flush_text_part(&mut parts, &mut current);
                parts.push(TextPart::Punct(punct));
                continue;
            }
        }

        if ch.is_whitespace() {
            if !current.is_empty() && !current.ends_with(' ') {
                current.push(' ');
            }
            continue;
        }

        current.push(ch);
    }

    flush_text_part(&mut parts, &mut current);
    parts
}

fn flush_text_part(parts: &mut Vec<TextPart>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        parts.push(TextPart::Text(trimmed.to_string()));
    }
    current.clear();
}

fn boundary_punctuation(ch: char) -> Option<char> {
    match ch {
        '.' | '!' | '?' | ',' | ';' | ':' | '—' | '…' | '"' | '(' | ')' | '\u{201c}'
        | '\u{201d}' => Some(ch),
        '\n' | '\r' => Some('.'),
        _ => None,
    }
}

/// `1.5` and `1,000` keep their separator inside the text segment.
fn is_between_digits(text: &str, idx: usize, ch: char) -> bool {
    if !matches!(ch, '.' | ',') {
        return false;
    }

    let prev = text[..idx].chars().next_back();
    let next = text[idx + ch.len_utf8()..].chars().next();
    matches!(
        (prev, next),
        (Some(left), Some(right)) if left.is_ascii_digit() && right.is_ascii_digit()
    )
}

fn newline_terminated(input: &str) -> Cow<'_, str> {
    if input.ends_with('\n') {
        Cow::Borrowed(input)
    } else {
        Cow::Owned(format!("{input}\n"))
    }
}

/// Join espeak output lines and drop its `_` word-boundary markers.
fn clean_ipa(ipa: &str) -> String {
    ipa.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| line.replace('_', ""))
        .collect::<Vec<_>>()
        .join(" ")
}
