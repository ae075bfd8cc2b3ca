//! Timeout policy for runtime calls that must outlive their caller.
//!
//! Image pulls and console attaches run under their own deadline. When a
//! policy is `detached`, the work is spawned onto the runtime so dropping
//! the caller's future (a cancelled request) does not abort it mid-flight.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{OrchestratorError, OrchestratorResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutPolicy {
    #[serde(rename = "timeout_secs", with = "secs")]
    pub timeout: Duration,
    /// Run on a spawned task, independent of the caller's cancellation.
    pub detached: bool,
}

impl TimeoutPolicy {
    pub const fn detached(timeout: Duration) -> Self {
        Self {
            timeout,
            detached: true,
        }
    }

    pub const fn attached(timeout: Duration) -> Self {
        Self {
            timeout,
            detached: false,
        }
    }

    /// Default for image pulls: ten minutes, detached.
    pub const fn pull_default() -> Self {
        Self::detached(Duration::from_secs(600))
    }

    /// Default for console attaches: ten seconds, detached.
    pub const fn attach_default() -> Self {
        Self::detached(Duration::from_secs(10))
    }

    /// Run `work` under this policy.
    pub async fn run<F, T>(&self, operation: &'static str, work: F) -> OrchestratorResult<T>
    where
        F: Future<Output = OrchestratorResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let timeout = self.timeout;
        if !self.detached {
            return tokio::time::timeout(timeout, work)
                .await
                .map_err(|_| OrchestratorError::Timeout { operation, after: timeout })?;
        }

        let handle = tokio::spawn(async move { tokio::time::timeout(timeout, work).await });
        match handle.await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(OrchestratorError::Timeout { operation, after: timeout }),
            Err(e) => {
                warn!(operation, error = %e, "detached task failed");
                Err(OrchestratorError::Task(e.to_string()))
            }
        }
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn attached_policy_times_out() {
        let policy = TimeoutPolicy::attached(Duration::from_secs(1));
        let result: OrchestratorResult<()> = policy
            .run("pull", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(OrchestratorError::Timeout { operation: "pull", .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn detached_work_survives_caller_cancellation() {
        let policy = TimeoutPolicy::detached(Duration::from_secs(60));
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();

        let caller = policy.run("pull", async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });
        // The caller gives up after one second.
        let cancelled = tokio::time::timeout(Duration::from_secs(1), caller).await;
        assert!(cancelled.is_err());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[test]
    fn policy_reads_seconds_from_toml() {
        let policy: TimeoutPolicy = toml::from_str("timeout_secs = 42\ndetached = false").unwrap();
        assert_eq!(policy, TimeoutPolicy::attached(Duration::from_secs(42)));
    }
}
