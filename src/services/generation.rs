// src/services/generation.rs
use crate::errors::StudioError;
use crate::models::{
    GeneratedImage, GenerationInput, GenerationOutcome, GenerationRequestParams, RETRY_ATTEMPTS,
};
use crate::services::notifier::{Notification, Notifier};
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// External generation capability. May take a while, may fail; the workflow
/// owns retries and cancellation around it.
#[async_trait]
pub trait GenerateApi: Send + Sync {
    async fn generate(
        &self,
        params: &GenerationRequestParams,
    ) -> Result<GeneratedImage, StudioError>;
}

/// Simulated provider: 2-5s latency, 70% success rate.
pub struct MockGenerateApi;

impl MockGenerateApi {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl GenerateApi for MockGenerateApi {
    async fn generate(
        &self,
        _params: &GenerationRequestParams,
    ) -> Result<GeneratedImage, StudioError> {
        // Draw everything up front; the rng handle must not cross an await.
        let (delay_ms, succeeds, seed) = {
            let mut rng = rand::thread_rng();
            (
                rng.gen_range(2000..5000u64),
                rng.gen_bool(0.7),
                rng.gen_range(0..u32::MAX),
            )
        };

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;

        if succeeds {
            Ok(GeneratedImage {
                image_url: format!("https://picsum.photos/1024/1024?random={}", seed),
            })
        } else {
            Err(StudioError::Generation("Model overloaded".to_string()))
        }
    }
}

/// Real provider behind a configured HTTP endpoint. Expects a JSON body of
/// `{ "imageUrl": "..." }` on success.
pub struct HttpGenerateApi {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpGenerateApi {
    pub fn new(endpoint: String) -> Self {
        Self {
            endpoint,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl GenerateApi for HttpGenerateApi {
    async fn generate(
        &self,
        params: &GenerationRequestParams,
    ) -> Result<GeneratedImage, StudioError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({
                "prompt": params.prompt,
                "style": params.style,
                "image": params.image.data_url,
            }))
            .send()
            .await
            .map_err(|e| StudioError::Generation(format!("Generation request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(StudioError::Generation(format!(
                "Generation API returned {}: {}",
                status, error_text
            )));
        }

        response
            .json::<GeneratedImage>()
            .await
            .map_err(|e| StudioError::Generation(format!("Malformed generation response: {}", e)))
    }
}

/// Backoff before retrying `attempt` (1-based): 1s, 2s, 4s, ...
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis(1000 * 2u64.pow(attempt - 1))
}

/// Drives one generation request through precondition checks, the bounded
/// retry loop and cancellation, emitting a notification per transition.
pub struct GenerationWorkflow {
    api: Arc<dyn GenerateApi>,
    notifier: Arc<dyn Notifier>,
}

impl GenerationWorkflow {
    pub fn new(api: Arc<dyn GenerateApi>, notifier: Arc<dyn Notifier>) -> Self {
        Self { api, notifier }
    }

    /// Run one invocation to its terminal outcome.
    ///
    /// Precondition failures come back as `Err` without a single capability
    /// call; everything past that point resolves to `Ok(outcome)`. The
    /// cancellation token interrupts both in-flight attempts and backoff
    /// waits, and is re-checked before any attempt result is accepted so a
    /// late success can never override a cancellation already signalled to
    /// the user.
    pub async fn run(
        &self,
        input: GenerationInput,
        cancel: &CancellationToken,
    ) -> Result<GenerationOutcome, StudioError> {
        let Some(image) = input.image else {
            self.notifier
                .notify(Notification::destructive("Please upload an image first."));
            return Err(StudioError::MissingImage);
        };

        if input.prompt.trim().is_empty() {
            self.notifier
                .notify(Notification::destructive("Please enter a prompt."));
            return Err(StudioError::MissingPrompt);
        }

        let params = GenerationRequestParams {
            image,
            prompt: input.prompt,
            style: input.style,
        };

        let mut attempt = 1;
        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(self.cancelled()),
                result = self.api.generate(&params) => result,
            };

            // Cancellation is authoritative over a result that raced it.
            if cancel.is_cancelled() {
                return Ok(self.cancelled());
            }

            match result {
                Ok(generated) => {
                    self.notifier.notify(
                        Notification::normal("✨ Generation successful!")
                            .with_description("Your new image is ready."),
                    );
                    return Ok(GenerationOutcome::Success {
                        result_image_url: generated.image_url,
                    });
                }
                Err(e) if attempt == RETRY_ATTEMPTS => {
                    self.notifier.notify(
                        Notification::destructive("Generation Failed")
                            .with_description(e.to_string()),
                    );
                    return Ok(GenerationOutcome::Failed {
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    let delay = backoff_delay(attempt);
                    self.notifier.notify(
                        Notification::normal(format!(
                            "Attempt {} failed. Retrying in {}s...",
                            attempt,
                            delay.as_secs()
                        ))
                        .with_description(e.to_string()),
                    );

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Ok(self.cancelled()),
                        _ = tokio::time::sleep(delay) => {}
                    }

                    attempt += 1;
                }
            }
        }
    }

    fn cancelled(&self) -> GenerationOutcome {
        self.notifier
            .notify(Notification::normal("Generation cancelled"));
        GenerationOutcome::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NormalizedImage, Style};
    use crate::services::notifier::test_support::RecordingNotifier;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn test_image() -> NormalizedImage {
        NormalizedImage {
            width: 640,
            height: 480,
            data_url: "data:image/jpeg;base64,dGVzdA==".to_string(),
        }
    }

    fn input_with(prompt: &str) -> GenerationInput {
        GenerationInput {
            image: Some(test_image()),
            prompt: prompt.to_string(),
            style: Style::Cyberpunk,
        }
    }

    /// Fails every call instantly, recording when each call happened.
    #[derive(Default)]
    struct FailingApi {
        calls: AtomicU32,
        call_times: Mutex<Vec<Instant>>,
    }

    #[async_trait]
    impl GenerateApi for FailingApi {
        async fn generate(
            &self,
            _params: &GenerationRequestParams,
        ) -> Result<GeneratedImage, StudioError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.call_times.lock().unwrap().push(Instant::now());
            Err(StudioError::Generation("Model overloaded".to_string()))
        }
    }

    /// Counts calls, then stays in flight forever.
    #[derive(Default)]
    struct PendingApi {
        calls: AtomicU32,
    }

    #[async_trait]
    impl GenerateApi for PendingApi {
        async fn generate(
            &self,
            _params: &GenerationRequestParams,
        ) -> Result<GeneratedImage, StudioError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::future::pending::<()>().await;
            unreachable!()
        }
    }

    /// Succeeds, but only after a fixed delay.
    struct SlowSuccessApi {
        calls: AtomicU32,
        delay: Duration,
    }

    #[async_trait]
    impl GenerateApi for SlowSuccessApi {
        async fn generate(
            &self,
            _params: &GenerationRequestParams,
        ) -> Result<GeneratedImage, StudioError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(GeneratedImage {
                image_url: "https://example.com/late.png".to_string(),
            })
        }
    }

    struct InstantSuccessApi {
        calls: AtomicU32,
    }

    #[async_trait]
    impl GenerateApi for InstantSuccessApi {
        async fn generate(
            &self,
            _params: &GenerationRequestParams,
        ) -> Result<GeneratedImage, StudioError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(GeneratedImage {
                image_url: "https://example.com/result.png".to_string(),
            })
        }
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(2), Duration::from_secs(2));
        assert_eq!(backoff_delay(3), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn missing_image_short_circuits() {
        let api = Arc::new(PendingApi::default());
        let notifier = Arc::new(RecordingNotifier::new());
        let workflow = GenerationWorkflow::new(api.clone(), notifier.clone());

        let input = GenerationInput {
            image: None,
            prompt: "a prompt".to_string(),
            style: Style::Editorial,
        };
        let err = workflow
            .run(input, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, StudioError::MissingImage));
        assert_eq!(api.calls.load(Ordering::SeqCst), 0);
        assert_eq!(notifier.titles(), vec!["Please upload an image first."]);
    }

    #[tokio::test]
    async fn whitespace_prompt_short_circuits() {
        let api = Arc::new(PendingApi::default());
        let notifier = Arc::new(RecordingNotifier::new());
        let workflow = GenerationWorkflow::new(api.clone(), notifier.clone());

        let err = workflow
            .run(input_with("   \t"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, StudioError::MissingPrompt));
        assert_eq!(api.calls.load(Ordering::SeqCst), 0);
        assert_eq!(notifier.titles(), vec!["Please enter a prompt."]);
    }

    #[tokio::test]
    async fn first_attempt_success_makes_one_call() {
        let api = Arc::new(InstantSuccessApi {
            calls: AtomicU32::new(0),
        });
        let notifier = Arc::new(RecordingNotifier::new());
        let workflow = GenerationWorkflow::new(api.clone(), notifier.clone());

        let outcome = workflow
            .run(input_with("a castle"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            outcome,
            GenerationOutcome::Success {
                result_image_url: "https://example.com/result.png".to_string()
            }
        );
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
        assert_eq!(notifier.titles(), vec!["✨ Generation successful!"]);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_fail_with_exact_backoff() {
        let api = Arc::new(FailingApi::default());
        let notifier = Arc::new(RecordingNotifier::new());
        let workflow = GenerationWorkflow::new(api.clone(), notifier.clone());

        let outcome = workflow
            .run(input_with("a castle"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            outcome,
            GenerationOutcome::Failed {
                reason: "Generation error: Model overloaded".to_string()
            }
        );
        assert_eq!(api.calls.load(Ordering::SeqCst), RETRY_ATTEMPTS);

        // Attempts are spaced by the 1s then 2s backoff.
        let times = api.call_times.lock().unwrap().clone();
        assert_eq!(times.len(), 3);
        assert_eq!(times[1] - times[0], Duration::from_secs(1));
        assert_eq!(times[2] - times[1], Duration::from_secs(2));

        assert_eq!(
            notifier.titles(),
            vec![
                "Attempt 1 failed. Retrying in 1s...",
                "Attempt 2 failed. Retrying in 2s...",
                "Generation Failed",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_attempt_yields_cancelled() {
        let api = Arc::new(PendingApi::default());
        let notifier = Arc::new(RecordingNotifier::new());
        let workflow = Arc::new(GenerationWorkflow::new(api.clone(), notifier.clone()));
        let token = CancellationToken::new();

        let task = {
            let workflow = workflow.clone();
            let token = token.clone();
            tokio::spawn(async move { workflow.run(input_with("a castle"), &token).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();

        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome, GenerationOutcome::Cancelled);
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
        assert_eq!(notifier.titles(), vec!["Generation cancelled"]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_backoff_stops_further_attempts() {
        let api = Arc::new(FailingApi::default());
        let notifier = Arc::new(RecordingNotifier::new());
        let workflow = Arc::new(GenerationWorkflow::new(api.clone(), notifier.clone()));
        let token = CancellationToken::new();

        let task = {
            let workflow = workflow.clone();
            let token = token.clone();
            tokio::spawn(async move { workflow.run(input_with("a castle"), &token).await })
        };

        // First attempt fails instantly; cancel midway through the 1s backoff.
        tokio::time::sleep(Duration::from_millis(500)).await;
        token.cancel();

        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome, GenerationOutcome::Cancelled);
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_never_loses_to_a_late_success() {
        let api = Arc::new(SlowSuccessApi {
            calls: AtomicU32::new(0),
            delay: Duration::from_secs(3),
        });
        let notifier = Arc::new(RecordingNotifier::new());
        let workflow = Arc::new(GenerationWorkflow::new(api.clone(), notifier.clone()));
        let token = CancellationToken::new();

        let task = {
            let workflow = workflow.clone();
            let token = token.clone();
            tokio::spawn(async move { workflow.run(input_with("a castle"), &token).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel();

        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome, GenerationOutcome::Cancelled);
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn already_cancelled_token_makes_no_calls() {
        let api = Arc::new(PendingApi::default());
        let notifier = Arc::new(RecordingNotifier::new());
        let workflow = GenerationWorkflow::new(api.clone(), notifier.clone());

        let token = CancellationToken::new();
        token.cancel();

        let outcome = workflow.run(input_with("a castle"), &token).await.unwrap();
        assert_eq!(outcome, GenerationOutcome::Cancelled);
        assert_eq!(api.calls.load(Ordering::SeqCst), 0);
    }
}
