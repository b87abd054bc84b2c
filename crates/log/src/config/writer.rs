use serde::{Deserialize, Serialize};

/// Where log lines go
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriterConfig {
    /// Standard error
    #[default]
    Stderr,
    /// Standard output
    Stdout,
}

/// Display toggles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Show timestamps
    pub time: bool,
    /// Show file and line
    pub source: bool,
    /// Show the event target
    pub target: bool,
    /// Show thread ids
    pub thread_ids: bool,
    /// Show thread names
    pub thread_names: bool,
    /// ANSI colors (ignored for JSON)
    pub colors: bool,
    /// Include the span list in JSON output
    pub span_list: bool,
    /// Flatten event fields into the JSON object
    pub flatten: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            time: true,
            source: false,
            target: true,
            thread_ids: false,
            thread_names: false,
            colors: cfg!(feature = "ansi"),
            span_list: false,
            flatten: true,
        }
    }
}

impl DisplayConfig {
    /// Apply `TIDEPOOL_LOG_<TOGGLE>` overrides from the environment.
    pub fn parse_env(&mut self) {
        self.apply(|key| std::env::var(key).ok());
    }

    pub(crate) fn apply(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let toggles: [(&str, &mut bool); 6] = [
            ("TIDEPOOL_LOG_TIME", &mut self.time),
            ("TIDEPOOL_LOG_SOURCE", &mut self.source),
            ("TIDEPOOL_LOG_TARGET", &mut self.target),
            ("TIDEPOOL_LOG_THREAD_IDS", &mut self.thread_ids),
            ("TIDEPOOL_LOG_THREAD_NAMES", &mut self.thread_names),
            ("TIDEPOOL_LOG_COLORS", &mut self.colors),
        ];
        for (key, slot) in toggles {
            if let Some(value) = lookup(key).as_deref().and_then(parse_bool) {
                *slot = value;
            }
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
