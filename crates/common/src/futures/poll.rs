use std::{
    ops::ControlFlow,
    time::{Duration, Instant},
};

use anyhow::{Context as _, Result, anyhow};

const EXPONENTIAL_BACKOFF_MAX_WAIT_DURATION: Duration = Duration::from_secs(16);

/// Polls a fallible future until it reports that the awaited post-condition holds, or until the
/// polling duration is exhausted.
///
/// The future is called at least once. Each call returns a [`Result<ControlFlow<O, String>>`]:
///
/// - [`ControlFlow::Break`] ends the polling and its value is returned.
/// - [`ControlFlow::Continue`] means the condition does not hold yet. The string describes why and
///   is carried into the timeout error if no later attempt succeeds.
/// - [`Err`] ends the polling immediately and the error is propagated.
pub async fn poll<F, O>(
    polling_duration: Duration,
    polling_wait_behavior: PollingWaitBehavior,
    mut future: impl FnMut() -> F,
) -> Result<O>
where
    F: Future<Output = Result<ControlFlow<O, String>>>,
{
    let started = Instant::now();
    let mut retries = 0u32;

    loop {
        let reason = match future()
            .await
            .context("Polled future returned an error during polling loop")?
        {
            ControlFlow::Break(output) => break Ok(output),
            ControlFlow::Continue(reason) => reason,
        };

        // The budget covers the time spent in the polled future as well as the waits.
        let elapsed = started.elapsed();
        if elapsed >= polling_duration {
            break Err(anyhow!(
                "Polling failed after {} retries and a total of {:?}, last reason: {}",
                retries,
                elapsed,
                reason
            ));
        }

        let next_wait_duration = polling_wait_behavior
            .wait_duration(retries)
            .min(polling_duration - elapsed);
        tracing::trace!(retries, ?next_wait_duration, %reason, "Condition not met yet");

        retries += 1;
        tokio::time::sleep(next_wait_duration).await;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum PollingWaitBehavior {
    Constant(Duration),
    #[default]
    ExponentialBackoff,
}

impl PollingWaitBehavior {
    fn wait_duration(&self, retries: u32) -> Duration {
        match self {
            Self::Constant(duration) => *duration,
            Self::ExponentialBackoff => Duration::from_millis(250)
                .saturating_mul(2u32.saturating_pow(retries))
                .min(EXPONENTIAL_BACKOFF_MAX_WAIT_DURATION),
        }
    }
}
