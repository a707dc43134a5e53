//! One-shot messages carried to the next page view

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashLevel {
    Success,
    Error,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Flash {
    pub level: FlashLevel,
    pub message: String,
}

impl Flash {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: FlashLevel::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: FlashLevel::Error,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: FlashLevel::Info,
            message: message.into(),
        }
    }
}

/// Messages queue in order and are gone once read.
#[derive(Debug, Default)]
pub struct FlashQueue(Vec<Flash>);

impl FlashQueue {
    pub fn push(&mut self, flash: Flash) {
        self.0.push(flash);
    }

    pub fn take(&mut self) -> Vec<Flash> {
        std::mem::take(&mut self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consumed_on_read() {
        let mut queue = FlashQueue::default();
        queue.push(Flash::success("Booking created"));
        queue.push(Flash::error("Slot unavailable"));

        let flashes = queue.take();
        assert_eq!(flashes.len(), 2);
        assert_eq!(flashes[1].level, FlashLevel::Error);
        assert!(queue.is_empty());
        assert!(queue.take().is_empty());
    }

    #[test]
    fn serializes_lowercase_level() {
        let json = serde_json::to_value(Flash::info("hello")).unwrap();
        assert_eq!(json, serde_json::json!({ "level": "info", "message": "hello" }));
    }
}
