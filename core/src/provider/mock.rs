//! Mock provider for tests: replays a scripted queue of turns, then answers
//! with a fixed text and no tool calls.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;

use super::CompletionRequest;
use super::ModelTurn;
use crate::error::CoreErr;
use crate::error::Result;

pub(super) fn complete(
    script: &Arc<Mutex<VecDeque<ModelTurn>>>,
    _request: &CompletionRequest,
) -> Result<ModelTurn> {
    let mut script = script
        .lock()
        .map_err(|_| CoreErr::ProviderFailure("mock script poisoned".to_string()))?;
    Ok(script.pop_front().unwrap_or_else(|| ModelTurn {
        assistant_text: Some("(mock) acknowledged".to_string()),
        tool_calls: Vec::new(),
        usage: None,
    }))
}
