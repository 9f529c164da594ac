//! Transfer progress
//!
//! One bar tracks the bytes of every transaction a command submitted. Clones
//! share the bar, so each listener can carry its own handle onto its worker
//! thread.

use super::OutputConfig;

const TEMPLATE: &str = "{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes}";

#[derive(Debug, Clone)]
pub struct ProgressBar {
    bar: Option<indicatif::ProgressBar>,
}

impl ProgressBar {
    /// A byte progress bar; hidden in quiet or JSON mode or with
    /// `--no-progress`
    pub fn new(config: &OutputConfig, total: u64) -> Self {
        if config.quiet || config.json || config.no_progress {
            return Self { bar: None };
        }

        let bar = indicatif::ProgressBar::new(total);
        if let Ok(style) = indicatif::ProgressStyle::default_bar().template(TEMPLATE) {
            bar.set_style(style.progress_chars("#>-"));
        }
        Self { bar: Some(bar) }
    }

    pub fn inc(&self, delta: u64) {
        if let Some(bar) = &self.bar {
            bar.inc(delta);
        }
    }

    /// Grow the total once a transfer learns its size
    pub fn inc_length(&self, delta: u64) {
        if let Some(bar) = &self.bar {
            bar.inc_length(delta);
        }
    }

    pub fn finish_and_clear(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }

    pub fn is_visible(&self) -> bool {
        self.bar.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_when_quiet_or_json() {
        for config in [
            OutputConfig {
                quiet: true,
                ..Default::default()
            },
            OutputConfig {
                json: true,
                ..Default::default()
            },
            OutputConfig {
                no_progress: true,
                ..Default::default()
            },
        ] {
            assert!(!ProgressBar::new(&config, 100).is_visible());
        }
    }

    #[test]
    fn test_visible_by_default() {
        let bar = ProgressBar::new(&OutputConfig::default(), 100);
        assert!(bar.is_visible());
        bar.inc(10);
        bar.inc_length(50);
        bar.finish_and_clear();
    }
}
