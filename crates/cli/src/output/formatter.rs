//! Human-readable and JSON output

use serde::Serialize;

use super::OutputConfig;

/// Formatter for CLI output
///
/// In JSON mode every result is one pretty-printed JSON document on stdout
/// and errors are JSON objects on stderr; no colors, no progress.
#[derive(Debug, Clone, Default)]
pub struct Formatter {
    config: OutputConfig,
}

impl Formatter {
    pub fn new(config: OutputConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OutputConfig {
        &self.config
    }

    pub fn is_json(&self) -> bool {
        self.config.json
    }

    pub fn colors_enabled(&self) -> bool {
        !self.config.no_color && !self.config.json
    }

    /// Print a result: JSON in JSON mode, its `Display` form otherwise
    pub fn output<T: Serialize + std::fmt::Display>(&self, value: &T) {
        if self.config.quiet {
            return;
        }
        if self.config.json {
            self.json(value);
        } else {
            println!("{value}");
        }
    }

    /// Print a pre-built JSON document
    pub fn json<T: Serialize>(&self, value: &T) {
        match serde_json::to_string_pretty(value) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("Error serializing output: {e}"),
        }
    }

    pub fn success(&self, message: &str) {
        if self.config.quiet || self.config.json {
            return;
        }
        if self.colors_enabled() {
            println!("\x1b[32m✓\x1b[0m {message}");
        } else {
            println!("✓ {message}");
        }
    }

    /// Errors are printed even in quiet mode
    pub fn error(&self, message: &str) {
        if self.config.json {
            eprintln!("{}", serde_json::json!({ "error": message }));
        } else if self.colors_enabled() {
            eprintln!("\x1b[31m✗\x1b[0m {message}");
        } else {
            eprintln!("✗ {message}");
        }
    }

    pub fn warning(&self, message: &str) {
        if self.config.quiet || self.config.json {
            return;
        }
        if self.colors_enabled() {
            eprintln!("\x1b[33m⚠\x1b[0m {message}");
        } else {
            eprintln!("⚠ {message}");
        }
    }

    pub fn println(&self, message: &str) {
        if !self.config.quiet {
            println!("{message}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formatter_default() {
        let formatter = Formatter::default();
        assert!(!formatter.is_json());
        assert!(formatter.colors_enabled());
    }

    #[test]
    fn test_json_mode_disables_colors() {
        let formatter = Formatter::new(OutputConfig {
            json: true,
            ..Default::default()
        });
        assert!(formatter.is_json());
        assert!(!formatter.colors_enabled());
    }

    #[test]
    fn test_no_color() {
        let formatter = Formatter::new(OutputConfig {
            no_color: true,
            ..Default::default()
        });
        assert!(!formatter.colors_enabled());
    }
}
