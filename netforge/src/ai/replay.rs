//! Scripted translator
//!
//! Replays canned replies in order and records every history it was sent.
//! Once the script runs out the last reply repeats, so a single bad reply
//! models a translator that never gets it right.

use async_trait::async_trait;
use std::sync::Mutex;

use crate::ai::provider::{ChatMessage, Translator};
use crate::ai::AIError;

pub struct ScriptedTranslator {
    replies: Vec<String>,
    histories: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedTranslator {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: replies.into_iter().map(Into::into).collect(),
            histories: Mutex::new(Vec::new()),
        }
    }

    /// Same reply on every call.
    pub fn repeating(reply: impl Into<String>) -> Self {
        Self::new([reply.into()])
    }

    pub fn calls(&self) -> usize {
        self.histories.lock().map(|h| h.len()).unwrap_or(0)
    }

    /// Every history received, oldest call first.
    pub fn histories(&self) -> Vec<Vec<ChatMessage>> {
        self.histories
            .lock()
            .map(|h| h.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Translator for ScriptedTranslator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn translate(&self, history: &[ChatMessage]) -> Result<String, AIError> {
        let call = {
            let mut histories = self
                .histories
                .lock()
                .map_err(|_| AIError::InvalidResponse("script state poisoned".to_string()))?;
            histories.push(history.to_vec());
            histories.len() - 1
        };

        self.replies
            .get(call)
            .or_else(|| self.replies.last())
            .cloned()
            .ok_or_else(|| AIError::InvalidResponse("empty script".to_string()))
    }
}
