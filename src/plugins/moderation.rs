//! Moderation plugin - masks banned words before other processors see them

use async_trait::async_trait;
use regex_lite::Regex;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::application::errors::PluginError;
use crate::domain::entities::{Message, PluginHealth};
use crate::domain::traits::{Logger, MessageProcessor, Plugin, PluginConfig};

pub const NAME: &str = "moderation";

const DEFAULT_PRIORITY: i32 = 1;

pub struct ModerationPlugin {
    pattern: RwLock<Option<Regex>>,
    priority: RwLock<i32>,
    logger: RwLock<Option<Arc<dyn Logger>>>,
    filtered: AtomicU64,
}

impl ModerationPlugin {
    pub fn new() -> Self {
        Self {
            pattern: RwLock::new(None),
            priority: RwLock::new(DEFAULT_PRIORITY),
            logger: RwLock::new(None),
            filtered: AtomicU64::new(0),
        }
    }

    fn build_pattern(words: &[String]) -> Result<Option<Regex>, PluginError> {
        let alternatives: Vec<String> = words
            .iter()
            .map(|w| w.trim())
            .filter(|w| !w.is_empty())
            .map(regex_lite::escape)
            .collect();
        if alternatives.is_empty() {
            return Ok(None);
        }
        Regex::new(&format!(r"(?i)\b({})\b", alternatives.join("|")))
            .map(Some)
            .map_err(|e| PluginError::execution(NAME, format!("invalid banned word list: {}", e)))
    }

    fn mask(&self, text: &str) -> Option<String> {
        let pattern = self.pattern.read().ok()?;
        let pattern = pattern.as_ref()?;
        if !pattern.is_match(text) {
            return None;
        }
        let masked = pattern.replace_all(text, |caps: &regex_lite::Captures| "*".repeat(caps[0].chars().count()));
        Some(masked.into_owned())
    }
}

impl Default for ModerationPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for ModerationPlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    async fn initialize(&self, config: PluginConfig) -> Result<(), PluginError> {
        let words: Vec<String> = match config.settings.get("banned_words") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
            Some(_) => return Err(PluginError::execution(NAME, "banned_words must be a list")),
            None => Vec::new(),
        };
        let pattern = Self::build_pattern(&words)?;

        if let Some(priority) = config.settings.get("priority").and_then(Value::as_i64) {
            if let Ok(mut p) = self.priority.write() {
                *p = priority as i32;
            }
        }
        if let Ok(mut slot) = self.pattern.write() {
            *slot = pattern;
        }

        config
            .logger
            .info("Moderation ready", &[("banned_words", Value::from(words.len()))]);
        if let Ok(mut logger) = self.logger.write() {
            *logger = Some(config.logger);
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), PluginError> {
        if let Ok(mut slot) = self.pattern.write() {
            *slot = None;
        }
        Ok(())
    }

    fn health(&self) -> PluginHealth {
        PluginHealth::running().with_detail("filtered", self.filtered.load(Ordering::Relaxed))
    }

    fn as_message_processor(&self) -> Option<&dyn MessageProcessor> {
        Some(self)
    }
}

#[async_trait]
impl MessageProcessor for ModerationPlugin {
    fn priority(&self) -> i32 {
        self.priority.read().map(|p| *p).unwrap_or(DEFAULT_PRIORITY)
    }

    async fn process_message(&self, message: Message) -> Result<Message, PluginError> {
        let Some(masked) = self.mask(&message.content) else {
            return Ok(message);
        };
        self.filtered.fetch_add(1, Ordering::Relaxed);
        if let Some(logger) = self.logger.read().ok().and_then(|l| l.clone()) {
            logger.debug(
                "Masked banned words",
                &[("channel", Value::from(message.channel_id.as_str()))],
            );
        }
        Ok(message.with_content(masked))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_whole_words_case_insensitively() {
        let plugin = ModerationPlugin::new();
        *plugin.pattern.write().unwrap() =
            ModerationPlugin::build_pattern(&["darn".to_string(), "heck".to_string()]).unwrap();

        assert_eq!(plugin.mask("Darn it, what the HECK").as_deref(), Some("**** it, what the ****"));
        assert_eq!(plugin.mask("darnation is fine"), None);
    }

    #[test]
    fn empty_word_list_disables_filtering() {
        assert!(ModerationPlugin::build_pattern(&[" ".to_string()]).unwrap().is_none());
    }
}
