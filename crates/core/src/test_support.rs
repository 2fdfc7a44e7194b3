use crate::generation::{GenerationOptions, LanguageModel, LanguageModelError};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Pops one scripted reply per call and records every prompt with its options.
/// `Err` entries become backend failures; an exhausted script fails too.
pub struct ScriptedModel {
    responses: Mutex<VecDeque<Result<String, String>>>,
    calls: Mutex<Vec<(String, GenerationOptions)>>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<Result<&str, &str>>) -> Self {
        Self {
            responses: Mutex::new(
                responses
                    .into_iter()
                    .map(|r| r.map(str::to_string).map_err(str::to_string))
                    .collect(),
            ),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, GenerationOptions)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl LanguageModel for ScriptedModel {
    fn invoke(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, LanguageModelError> {
        self.calls
            .lock()
            .unwrap()
            .push((prompt.to_string(), options.clone()));
        match self.responses.lock().unwrap().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(LanguageModelError::backend_message(message)),
            None => Err(LanguageModelError::backend_message("no more scripted responses")),
        }
    }
}
