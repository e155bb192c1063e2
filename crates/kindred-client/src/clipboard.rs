use std::sync::Mutex;

use crate::error::ClientError;

/// System clipboard collaborator.
pub trait Clipboard: Send + Sync {
    fn write_text(&self, text: &str) -> Result<(), ClientError>;
}

/// In-process clipboard for the demo and tests.
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    contents: Mutex<Option<String>>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Option<String> {
        self.contents.lock().ok()?.clone()
    }
}

impl Clipboard for MemoryClipboard {
    fn write_text(&self, text: &str) -> Result<(), ClientError> {
        let mut contents = self
            .contents
            .lock()
            .map_err(|e| ClientError::Clipboard(e.to_string()))?;
        *contents = Some(text.to_string());
        Ok(())
    }
}
