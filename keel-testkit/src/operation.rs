use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;

/// Operation that fails with scripted messages before succeeding.
///
/// ```ignore
/// let op = FlakyOperation::new(["ECONNRESET", "ECONNRESET"], "page");
/// executor.execute(|| op.call(), &policy, ctx).await;
/// ```
#[derive(Debug)]
pub struct FlakyOperation<T> {
    failures: Mutex<VecDeque<String>>,
    value: T,
    delay: Option<Duration>,
    calls: Mutex<u32>,
}

impl<T: Clone> FlakyOperation<T> {
    pub fn new<I, S>(failures: I, value: T) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            failures: Mutex::new(failures.into_iter().map(Into::into).collect()),
            value,
            delay: None,
            calls: Mutex::new(0),
        }
    }

    /// Never succeeds.
    pub fn always_failing(message: impl Into<String>, value: T) -> Self {
        Self::new(std::iter::repeat(message.into()).take(1024), value)
    }

    /// Sleep for `delay` before every answer.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub async fn call(&self) -> anyhow::Result<T> {
        *self.calls.lock() += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let failure = self.failures.lock().pop_front();
        match failure {
            Some(message) => Err(anyhow::anyhow!(message)),
            None => Ok(self.value.clone()),
        }
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock()
    }

    pub fn remaining_failures(&self) -> usize {
        self.failures.lock().len()
    }
}
