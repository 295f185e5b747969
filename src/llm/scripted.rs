//! In-process provider that replays a fixed script, for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::stream;

use crate::llm::types::{CompletionChunk, CompletionRequest, CompletionResponse, Credential};
use crate::llm::{ChunkStream, CompletionProvider, ProviderError, ProviderFuture};

/// One scripted stream step.
#[derive(Clone, Debug)]
pub enum Step {
    /// Yield a text chunk.
    Text(String),
    /// Yield an upstream error and end.
    Fail(u16, String),
    /// Never yield again.
    Stall,
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Provider that answers from a script and records what it was asked.
#[derive(Default)]
pub struct ScriptedProvider {
    steps: Vec<Step>,
    open_error: Option<(u16, String)>,
    requests: Mutex<Vec<CompletionRequest>>,
    pulled: Arc<AtomicUsize>,
    dropped: Arc<AtomicBool>,
}

impl ScriptedProvider {
    /// Answer with these text chunks.
    pub fn replying(chunks: &[&str]) -> Self {
        Self::with_steps(
            chunks
                .iter()
                .map(|chunk| Step::Text((*chunk).to_string()))
                .collect(),
        )
    }

    /// Answer with an explicit script.
    pub fn with_steps(steps: Vec<Step>) -> Self {
        Self {
            steps,
            ..Self::default()
        }
    }

    /// Refuse every call before any chunk is produced.
    pub fn refusing(status: u16, message: &str) -> Self {
        Self {
            open_error: Some((status, message.to_string())),
            ..Self::default()
        }
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of text chunks handed out.
    pub fn pulled(&self) -> usize {
        self.pulled.load(Ordering::SeqCst)
    }

    /// Whether the last opened stream was dropped.
    pub fn stream_dropped(&self) -> bool {
        self.dropped.load(Ordering::SeqCst)
    }

    fn record(&self, request: CompletionRequest) -> Result<(), ProviderError> {
        self.requests.lock().unwrap().push(request);
        match &self.open_error {
            Some((status, message)) => Err(ProviderError::Api {
                status: *status,
                message: message.clone(),
                kind: None,
            }),
            None => Ok(()),
        }
    }
}

impl CompletionProvider for ScriptedProvider {
    fn complete(
        &self,
        request: CompletionRequest,
        _credential: Credential,
    ) -> ProviderFuture<'_, Result<CompletionResponse, ProviderError>> {
        Box::pin(async move {
            self.record(request)?;
            let mut text = String::new();
            for step in &self.steps {
                match step {
                    Step::Text(chunk) => text.push_str(chunk),
                    Step::Fail(status, message) => {
                        return Err(ProviderError::Api {
                            status: *status,
                            message: message.clone(),
                            kind: None,
                        });
                    }
                    Step::Stall => break,
                }
            }
            let mut response = CompletionResponse::from_text(text);
            response.id = "upstream-response".to_string();
            Ok(response)
        })
    }

    fn complete_stream(
        &self,
        request: CompletionRequest,
        _credential: Credential,
    ) -> ProviderFuture<'_, Result<ChunkStream, ProviderError>> {
        Box::pin(async move {
            self.record(request)?;
            self.dropped.store(false, Ordering::SeqCst);
            let state = (
                self.steps.iter().cloned().collect::<VecDeque<_>>(),
                Arc::clone(&self.pulled),
                DropFlag(Arc::clone(&self.dropped)),
            );
            let chunks: ChunkStream = Box::pin(stream::unfold(
                state,
                |(mut steps, pulled, flag)| async move {
                    match steps.pop_front()? {
                        Step::Text(text) => {
                            pulled.fetch_add(1, Ordering::SeqCst);
                            let mut chunk = CompletionChunk::from_text(text);
                            chunk.id = "upstream-chunk".to_string();
                            Some((Ok(chunk), (steps, pulled, flag)))
                        }
                        Step::Fail(status, message) => Some((
                            Err(ProviderError::Api {
                                status,
                                message,
                                kind: None,
                            }),
                            (VecDeque::new(), pulled, flag),
                        )),
                        Step::Stall => {
                            futures::future::pending::<()>().await;
                            None
                        }
                    }
                },
            ));
            Ok(chunks)
        })
    }
}
