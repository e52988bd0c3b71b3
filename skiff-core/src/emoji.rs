// ABOUTME: Bidirectional emoji name conversion between platform-specific and standard forms
// ABOUTME: Builtin shortcode table with an optional per-platform overlay file

use std::collections::HashMap;
use std::path::Path;

/// Converts emoji identifiers between the platform's vocabulary, standard
/// shortcodes, and unicode.
///
/// The overlay file carries only the names that differ from the standard
/// table, one `platform_name,standard_name` pair per line. Unknown names
/// pass through unchanged in both directions.
pub struct EmojiConverter {
    platform_to_standard: HashMap<String, String>,
    standard_to_platform: HashMap<String, String>,
}

impl EmojiConverter {
    pub fn new(overlay_path: Option<&Path>) -> Self {
        let mut converter = Self {
            platform_to_standard: HashMap::new(),
            standard_to_platform: HashMap::new(),
        };
        if let Some(path) = overlay_path {
            converter.load_overlay(path);
        }
        converter
    }

    fn load_overlay(&mut self, path: &Path) {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Error loading emoji mappings");
                return;
            }
        };

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((platform_name, standard_name)) = line.split_once(',') else {
                tracing::warn!(line, "Skipping malformed emoji mapping line");
                continue;
            };
            self.platform_to_standard
                .insert(platform_name.trim().to_string(), standard_name.trim().to_string());
            self.standard_to_platform
                .insert(standard_name.trim().to_string(), platform_name.trim().to_string());
        }
    }

    /// Platform emoji name (or unicode) -> standard shortcode.
    pub fn to_standard(&self, emoji: &str) -> String {
        if let Some(found) = emojis::get(emoji) {
            if let Some(code) = found.shortcode() {
                return code.to_string();
            }
        }

        let name = normalize_name(emoji);
        self.platform_to_standard
            .get(&name)
            .cloned()
            .unwrap_or(name)
    }

    /// Standard shortcode -> platform emoji name.
    pub fn to_platform(&self, emoji: &str) -> String {
        let standard = self.to_standard(emoji);
        self.standard_to_platform
            .get(&standard)
            .cloned()
            .unwrap_or(standard)
    }

    /// Standard shortcode (or platform name) -> unicode, when known.
    pub fn to_unicode(&self, emoji: &str) -> String {
        if emojis::get(emoji).is_some() {
            return emoji.to_string();
        }
        let standard = self.to_standard(emoji);
        emojis::get_by_shortcode(&standard)
            .map(|e| e.as_str().to_string())
            .unwrap_or(standard)
    }
}

fn normalize_name(name: &str) -> String {
    name.trim_matches(':').to_lowercase().replace('-', "_")
}
