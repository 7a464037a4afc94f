//! Memory reconciliation
//!
//! [`MemoryReconciler`] turns `(existing memory, new information)` into the
//! next full memory string by asking a [`CompletionService`] to do the merge
//! under the fixed instructions in [`crate::prompts`]. It never touches the
//! store. [`MemoryUpdater`] is the read-merge-write composition on top.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::llm::CompletionService;
use crate::prompts::format_update_prompt;
use crate::store::MemoryStore;
use crate::temporal::{scan_markers, MarkerScan};

/// Post-merge check that rejects outputs which shrink the memory too much
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergeGuard {
    /// Minimum `merged.len() / existing.len()`
    pub min_retained_ratio: f32,
}

impl MergeGuard {
    pub fn new(min_retained_ratio: f32) -> Self {
        Self {
            min_retained_ratio: min_retained_ratio.clamp(0.0, 1.0),
        }
    }

    fn check(&self, existing: &str, merged: &str) -> Result<()> {
        let existing_len = existing.trim().chars().count();
        if existing_len == 0 {
            return Ok(());
        }

        let ratio = merged.chars().count() as f32 / existing_len as f32;
        if ratio < self.min_retained_ratio {
            return Err(Error::reconciliation(format!(
                "merged memory kept {:.0}% of the previous length, below the {:.0}% floor",
                ratio * 100.0,
                self.min_retained_ratio * 100.0
            )));
        }
        Ok(())
    }
}

/// Merges new information into existing memory via a completion service
pub struct MemoryReconciler {
    completion: Arc<dyn CompletionService>,
    timeout: Duration,
    guard: Option<MergeGuard>,
}

impl MemoryReconciler {
    pub fn new(completion: Arc<dyn CompletionService>, timeout: Duration) -> Self {
        Self {
            completion,
            timeout,
            guard: None,
        }
    }

    /// Reconciler configured from `config` (timeout and optional guard)
    pub fn from_config(completion: Arc<dyn CompletionService>, config: &Config) -> Self {
        let reconciler = Self::new(completion, config.completion_timeout);
        match config.min_retained_ratio {
            Some(ratio) => reconciler.with_guard(MergeGuard::new(ratio)),
            None => reconciler,
        }
    }

    pub fn with_guard(mut self, guard: MergeGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Produce the updated memory text.
    ///
    /// Blank `new_information` returns `existing_memory` unchanged without
    /// calling the completion service. Any completion failure, timeout, empty
    /// reply or guard rejection is `ReconciliationFailed`.
    pub async fn merge(
        &self,
        existing_memory: &str,
        new_information: &str,
        now: DateTime<Utc>,
    ) -> Result<String> {
        if new_information.trim().is_empty() {
            debug!("no new information; memory unchanged");
            return Ok(existing_memory.to_string());
        }

        let prompt = format_update_prompt(existing_memory, new_information, now);

        let reply = match tokio::time::timeout(self.timeout, self.completion.complete(&prompt)).await
        {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                error!("completion call failed during merge: {}", e);
                return Err(Error::reconciliation(e.to_string()));
            }
            Err(_) => {
                error!(timeout_ms = self.timeout.as_millis() as u64, "completion call timed out");
                return Err(Error::reconciliation(format!(
                    "completion timed out after {:?}",
                    self.timeout
                )));
            }
        };

        let merged = reply.trim();
        if merged.is_empty() {
            error!("completion returned empty memory");
            return Err(Error::reconciliation("completion returned empty text"));
        }

        if let Some(guard) = &self.guard {
            if let Err(e) = guard.check(existing_memory, merged) {
                warn!("merge rejected: {}", e);
                return Err(e);
            }
        }

        for scan in scan_markers(merged) {
            if let MarkerScan::Malformed { raw, reason } = scan {
                warn!(marker = %raw, "malformed temporal marker in merged memory: {}", reason);
            }
        }

        info!(
            before = existing_memory.len(),
            after = merged.len(),
            "memory reconciled"
        );
        Ok(merged.to_string())
    }
}

/// Read-merge-write for one user, serialized per user within the process
pub struct MemoryUpdater {
    store: Arc<MemoryStore>,
    reconciler: MemoryReconciler,
}

impl MemoryUpdater {
    pub fn new(store: Arc<MemoryStore>, reconciler: MemoryReconciler) -> Self {
        Self { store, reconciler }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn reconciler(&self) -> &MemoryReconciler {
        &self.reconciler
    }

    /// Merge `new_information` into the user's memory and persist it.
    ///
    /// Returns the stored text. On failure nothing is written.
    pub async fn update(&self, user_id: &str, new_information: &str) -> Result<String> {
        self.update_at(user_id, new_information, Utc::now()).await
    }

    pub async fn update_at(
        &self,
        user_id: &str,
        new_information: &str,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let _guard = self.store.locks().lock(user_id).await?;

        let existing = self.store.read(user_id)?;
        let merged = self
            .reconciler
            .merge(&existing, new_information, now)
            .await?;

        if merged != existing {
            self.store.write(user_id, &merged)?;
        }
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;

    /// Deterministic stand-in for a model: appends the new information as a
    /// recorded first-person fact and remembers every prompt it saw.
    struct MergeStub {
        prompts: Mutex<Vec<String>>,
    }

    impl MergeStub {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    fn section<'a>(prompt: &'a str, tag: &str) -> &'a str {
        let open = format!("<{}>\n", tag);
        let close = format!("\n</{}>", tag);
        let start = prompt.find(&open).unwrap() + open.len();
        let end = prompt[start..].find(&close).unwrap() + start;
        &prompt[start..end]
    }

    #[async_trait]
    impl CompletionService for MergeStub {
        async fn complete(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let existing = section(prompt, "existing_memory");
            let new_info = section(prompt, "new_information");
            let merged = if existing == "(empty)" {
                format!("{} [recorded:2025-01-30]", new_info)
            } else {
                format!("{}\n{} [recorded:2025-01-30]", existing, new_info)
            };
            Ok(format!("\n  {}  \n", merged))
        }
    }

    struct FailingStub;

    #[async_trait]
    impl CompletionService for FailingStub {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            Err(Error::completion("API error (status 529): overloaded"))
        }
    }

    struct SlowStub;

    #[async_trait]
    impl CompletionService for SlowStub {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("too late".to_string())
        }
    }

    struct FixedStub(&'static str);

    #[async_trait]
    impl CompletionService for FixedStub {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 30, 9, 0, 0).unwrap()
    }

    fn reconciler(stub: Arc<dyn CompletionService>) -> MemoryReconciler {
        MemoryReconciler::new(stub, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn merge_keeps_old_and_new_facts() {
        let stub = MergeStub::new();
        let merged = reconciler(stub.clone())
            .merge(
                "I have a dog named Max [recorded:2024-01-01]",
                "I also have a cat named Luna",
                now(),
            )
            .await
            .unwrap();

        assert!(merged.contains("Max"));
        assert!(merged.contains("dog"));
        assert!(merged.contains("Luna"));
        assert!(merged.contains("cat"));
        assert_eq!(merged, merged.trim());
    }

    #[tokio::test]
    async fn merge_into_empty_memory() {
        let stub = MergeStub::new();
        let merged = reconciler(stub.clone())
            .merge("", "I like tea", now())
            .await
            .unwrap();

        assert!(!merged.is_empty());
        assert!(merged.contains("tea"));
        assert!(stub.prompts.lock().unwrap()[0].contains("<existing_memory>\n(empty)\n"));
    }

    #[tokio::test]
    async fn blank_information_is_a_noop() {
        let stub = MergeStub::new();
        let existing = "I have a dog named Max [recorded:2024-01-01]";
        let merged = reconciler(stub.clone())
            .merge(existing, "  \n", now())
            .await
            .unwrap();

        assert_eq!(merged, existing);
        assert_eq!(stub.calls(), 0);
    }

    #[tokio::test]
    async fn prompt_carries_current_time() {
        let stub = MergeStub::new();
        reconciler(stub.clone())
            .merge("", "I started a new job at Acme", now())
            .await
            .unwrap();

        let prompt = stub.prompts.lock().unwrap()[0].clone();
        assert!(section(&prompt, "current_datetime_utc").contains("January 30, 2025 09:00:00"));
    }

    #[tokio::test]
    async fn completion_failure_is_reconciliation_failure() {
        let err = reconciler(Arc::new(FailingStub))
            .merge("I like tea", "I like coffee now", now())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ReconciliationFailed(_)));
    }

    #[tokio::test]
    async fn timeout_is_reconciliation_failure() {
        let reconciler = MemoryReconciler::new(Arc::new(SlowStub), Duration::from_millis(20));
        let err = reconciler
            .merge("I like tea", "I like coffee now", now())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ReconciliationFailed(msg) if msg.contains("timed out")));
    }

    #[tokio::test]
    async fn empty_reply_is_rejected() {
        let err = reconciler(Arc::new(FixedStub("   \n ")))
            .merge("I like tea", "I like coffee now", now())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ReconciliationFailed(_)));
    }

    #[tokio::test]
    async fn guard_rejects_drastic_shrink() {
        let existing = "I have a dog named Max [recorded:2024-01-01]. I live in Lisbon [since:2022].";
        let guarded = reconciler(Arc::new(FixedStub("I like tea"))).with_guard(MergeGuard::new(0.5));

        let err = guarded.merge(existing, "I like tea", now()).await.unwrap_err();
        assert!(matches!(err, Error::ReconciliationFailed(_)));

        // No guard on first write
        let merged = guarded.merge("", "I like tea", now()).await.unwrap();
        assert_eq!(merged, "I like tea");
    }

    #[tokio::test]
    async fn malformed_markers_do_not_fail_merge() {
        let merged = reconciler(Arc::new(FixedStub("I like tea [recorded:yesterday]")))
            .merge("", "I like tea", now())
            .await
            .unwrap();
        assert_eq!(merged, "I like tea [recorded:yesterday]");
    }

    #[tokio::test]
    async fn updater_persists_merge() {
        let store = Arc::new(MemoryStore::in_memory().unwrap());
        store
            .write("alice", "I have a dog named Max [recorded:2024-01-01]")
            .unwrap();
        let updater = MemoryUpdater::new(store.clone(), reconciler(MergeStub::new()));

        let merged = updater
            .update_at("alice", "I also have a cat named Luna", now())
            .await
            .unwrap();

        assert_eq!(store.read("alice").unwrap(), merged);
        assert!(merged.contains("Max") && merged.contains("Luna"));
    }

    #[tokio::test]
    async fn failed_update_leaves_memory_untouched() {
        let store = Arc::new(MemoryStore::in_memory().unwrap());
        store.write("alice", "I like tea").unwrap();
        let before = store.record("alice").unwrap().unwrap();

        for stub in [
            Arc::new(FailingStub) as Arc<dyn CompletionService>,
            Arc::new(FixedStub("")),
        ] {
            let updater = MemoryUpdater::new(store.clone(), reconciler(stub));
            assert!(updater.update("alice", "I like coffee now").await.is_err());
        }

        let updater = MemoryUpdater::new(
            store.clone(),
            MemoryReconciler::new(Arc::new(SlowStub), Duration::from_millis(10)),
        );
        assert!(updater.update("alice", "I like coffee now").await.is_err());

        assert_eq!(store.record("alice").unwrap().unwrap(), before);
    }

    #[tokio::test]
    async fn blank_update_writes_nothing() {
        let store = Arc::new(MemoryStore::in_memory().unwrap());
        let updater = MemoryUpdater::new(store.clone(), reconciler(MergeStub::new()));

        assert_eq!(updater.update("bob", "").await.unwrap(), "");
        assert!(store.list_users().unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_updates_for_one_user_are_not_lost() {
        let store = Arc::new(MemoryStore::in_memory().unwrap());
        let updater = Arc::new(MemoryUpdater::new(store.clone(), reconciler(MergeStub::new())));

        let tasks: Vec<_> = ["I like tea", "I have a cat named Luna", "I live in Lisbon"]
            .into_iter()
            .map(|fact| {
                let updater = updater.clone();
                tokio::spawn(async move { updater.update("alice", fact).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let memory = store.read("alice").unwrap();
        for fact in ["tea", "Luna", "Lisbon"] {
            assert!(memory.contains(fact), "lost {fact}: {memory}");
        }
    }
}
