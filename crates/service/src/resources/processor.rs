use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use configs::ProcessorConfig;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use models::{Operation, OperationAction, Resource, ResourceStatus};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::metrics;
use super::repository::ResourceRepository;
use crate::errors::ServiceError;
use crate::serial::{JobHandle, KeyedSerialExecutor};

const DRAIN_POLL: Duration = Duration::from_millis(10);

/// Applies accepted operations, one resource at a time.
///
/// Operations are queued on a [`KeyedSerialExecutor`] keyed by resource id.
/// The processor also tracks which resources have an operation in flight, so
/// an overlap would be detected and failed rather than silently applied.
#[derive(Clone)]
pub struct ResourceProcessor {
    inner: Arc<ProcessorInner>,
}

struct ProcessorInner {
    repo: Arc<ResourceRepository>,
    executor: KeyedSerialExecutor<Uuid>,
    in_flight: DashMap<Uuid, Uuid>,
    violations: AtomicU64,
    step_delay: Duration,
}

impl ResourceProcessor {
    pub fn new(repo: Arc<ResourceRepository>, cfg: &ProcessorConfig) -> Self {
        Self {
            inner: Arc::new(ProcessorInner {
                repo,
                executor: KeyedSerialExecutor::new(cfg.max_workers),
                in_flight: DashMap::new(),
                violations: AtomicU64::new(0),
                step_delay: Duration::from_millis(cfg.step_delay_ms),
            }),
        }
    }

    /// Queue an operation behind earlier operations on the same resource.
    pub fn submit(&self, op: &Operation) -> Result<JobHandle<Option<Operation>>, ServiceError> {
        let inner = Arc::clone(&self.inner);
        let op_id = op.id;
        metrics::QUEUED_OPERATIONS.inc();
        let handle = self
            .inner
            .executor
            .submit(op.resource_id, async move {
                let out = inner.process(op_id).await;
                metrics::QUEUED_OPERATIONS.dec();
                out
            })
            .map_err(|e| {
                metrics::QUEUED_OPERATIONS.dec();
                e
            })?;
        debug!(operation_id = %op.id, resource_id = %op.resource_id, action = ?op.action, "operation queued");
        Ok(handle)
    }

    /// Operations that started while another one on the same resource ran.
    pub fn violations(&self) -> u64 {
        self.inner.violations.load(Ordering::SeqCst)
    }

    /// Operations queued or running for a resource.
    pub fn pending(&self, resource_id: Uuid) -> usize {
        self.inner.executor.pending(&resource_id)
    }

    pub fn shutdown(&self) {
        self.inner.executor.shutdown();
    }

    /// Wait until every queued operation has run, giving up after `limit`.
    /// Returns whether the queues drained.
    pub async fn drain(&self, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        while self.inner.executor.active_keys() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            sleep(DRAIN_POLL).await;
        }
        true
    }
}

impl ProcessorInner {
    async fn process(&self, op_id: Uuid) -> Option<Operation> {
        let op = self.repo.get_operation(op_id)?;
        let started = Instant::now();
        let action_label = action_label(op.action);

        let running = match self.in_flight.entry(op.resource_id) {
            Entry::Occupied(e) => Some(*e.get()),
            Entry::Vacant(v) => {
                v.insert(op.id);
                None
            }
        };
        if let Some(other) = running {
            self.violations.fetch_add(1, Ordering::SeqCst);
            metrics::SERIALIZATION_VIOLATIONS_TOTAL.inc();
            warn!(operation_id = %op.id, resource_id = %op.resource_id, running = %other, "operation overlapped another on the same resource");
            // the resource belongs to the running operation; only fail this one
            return self.finish(&op, Err(format!("operation {other} is already in progress")), false, started);
        }

        // a deleted resource is final; later operations fail without touching it
        match self.repo.get_resource(op.resource_id) {
            Some(r) if !r.is_deleted() => {}
            stored => {
                self.in_flight.remove(&op.resource_id);
                let reason = if stored.is_some() { "resource has been deleted" } else { "resource no longer exists" };
                return self.finish(&op, Err(reason.to_string()), false, started);
            }
        }

        let in_progress = op.action.in_progress_status();
        self.repo.update_operation(op.id, |o| o.transition(in_progress, format!("{action_label} in progress")));
        self.repo.update_resource(op.resource_id, |r| r.deployment_status = in_progress);
        debug!(operation_id = %op.id, resource_id = %op.resource_id, action = action_label, "operation started");

        if !self.step_delay.is_zero() {
            sleep(self.step_delay).await;
        }

        let outcome = self.apply(&op);
        self.in_flight.remove(&op.resource_id);
        self.finish(&op, outcome, true, started)
    }

    fn apply(&self, op: &Operation) -> Result<(), String> {
        let resource = self
            .repo
            .get_resource(op.resource_id)
            .ok_or_else(|| "resource no longer exists".to_string())?;
        match op.action {
            OperationAction::Install => Ok(()),
            OperationAction::Upgrade => {
                let patch = op.patch.clone().unwrap_or_default();
                self.repo.update_resource(op.resource_id, |r| r.apply_patch(&patch));
                Ok(())
            }
            OperationAction::Uninstall => {
                if resource.is_enabled {
                    return Err("resource must be disabled before it is deleted".into());
                }
                Ok(())
            }
        }
    }

    fn finish(
        &self,
        op: &Operation,
        outcome: Result<(), String>,
        update_resource: bool,
        started: Instant,
    ) -> Option<Operation> {
        let action_label = action_label(op.action);
        let (status, message) = match &outcome {
            Ok(()) => (op.action.success_status(), format!("{action_label} succeeded")),
            Err(e) => (op.action.failure_status(), format!("{action_label} failed: {e}")),
        };

        if update_resource {
            self.repo.update_resource(op.resource_id, |r: &mut Resource| {
                r.deployment_status = status;
            });
        }
        let finished = self.repo.update_operation(op.id, |o| o.transition(status, message.clone()));

        metrics::OPERATIONS_TOTAL.with_label_values(&[action_label, status_label(status)]).inc();
        metrics::OPERATION_DURATION
            .with_label_values(&[action_label])
            .observe(started.elapsed().as_secs_f64());

        match outcome {
            Ok(()) => info!(operation_id = %op.id, resource_id = %op.resource_id, action = action_label, ?status, "operation finished"),
            Err(e) => warn!(operation_id = %op.id, resource_id = %op.resource_id, action = action_label, error = %e, "operation failed"),
        }
        finished
    }
}

fn action_label(action: OperationAction) -> &'static str {
    match action {
        OperationAction::Install => "install",
        OperationAction::Upgrade => "upgrade",
        OperationAction::Uninstall => "uninstall",
    }
}

fn status_label(status: ResourceStatus) -> &'static str {
    if status.is_failure() { "failed" } else { "succeeded" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use models::{template, ResourceInput, ResourceParent, ResourcePatch, ResourceType};
    use serde_json::json;

    fn vm(repo: &ResourceRepository) -> Resource {
        let tpl = template::find("tre-service-dev-vm").unwrap();
        let input = ResourceInput {
            template_name: tpl.name.into(),
            properties: json!({"display_name": "vm", "description": "", "os_image": "Ubuntu 18.04"})
                .as_object()
                .cloned()
                .unwrap(),
        };
        let parent = ResourceParent::workspace_service(Uuid::new_v4(), Uuid::new_v4());
        let r = Resource::new(ResourceType::UserResource, tpl, input, parent).unwrap();
        repo.insert_resource(r.clone());
        r
    }

    fn rename(i: usize) -> ResourcePatch {
        ResourcePatch {
            is_enabled: None,
            properties: json!({ "display_name": format!("update {i}") }).as_object().cloned(),
        }
    }

    fn processor(repo: &Arc<ResourceRepository>, step_delay_ms: u64) -> ResourceProcessor {
        ResourceProcessor::new(Arc::clone(repo), &ProcessorConfig { max_workers: 4, step_delay_ms })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn stacked_patches_apply_in_order() -> anyhow::Result<()> {
        let repo = Arc::new(ResourceRepository::new());
        let proc = processor(&repo, 2);
        let r = vm(&repo);

        let mut handles = Vec::new();
        for i in 0..5 {
            let op = Operation::new(&r, OperationAction::Upgrade, Some(rename(i)));
            repo.insert_operation(op.clone());
            handles.push(proc.submit(&op)?);
        }
        let disable = Operation::new(&r, OperationAction::Upgrade, Some(ResourcePatch::disable()));
        repo.insert_operation(disable.clone());
        let last = proc.submit(&disable)?.wait().await?.expect("operation stored");
        assert!(last.succeeded());

        for h in handles {
            assert!(h.wait().await?.expect("operation stored").succeeded());
        }
        let after = repo.get_resource(r.id).unwrap();
        assert_eq!(after.display_name(), Some("update 4"));
        assert_eq!(after.resource_version, 6);
        assert!(!after.is_enabled);
        assert_eq!(proc.violations(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn uninstall_requires_disabled_resource() -> anyhow::Result<()> {
        let repo = Arc::new(ResourceRepository::new());
        let proc = processor(&repo, 0);
        let r = vm(&repo);

        let op = Operation::new(&r, OperationAction::Uninstall, None);
        repo.insert_operation(op.clone());
        let done = proc.submit(&op)?.wait().await?.unwrap();
        assert_eq!(done.status, ResourceStatus::DeletionFailed);
        assert_eq!(repo.get_resource(r.id).unwrap().deployment_status, ResourceStatus::DeletionFailed);
        Ok(())
    }

    #[tokio::test]
    async fn operations_behind_a_delete_leave_the_resource_deleted() -> anyhow::Result<()> {
        let repo = Arc::new(ResourceRepository::new());
        let proc = processor(&repo, 1);
        let r = vm(&repo);
        repo.update_resource(r.id, |r| r.is_enabled = false);

        let uninstall = Operation::new(&r, OperationAction::Uninstall, None);
        let enable = Operation::new(
            &r,
            OperationAction::Upgrade,
            Some(ResourcePatch { is_enabled: Some(true), properties: None }),
        );
        let second_uninstall = Operation::new(&r, OperationAction::Uninstall, None);
        for op in [&uninstall, &enable, &second_uninstall] {
            repo.insert_operation(op.clone());
        }
        let h1 = proc.submit(&uninstall)?;
        let h2 = proc.submit(&enable)?;
        let h3 = proc.submit(&second_uninstall)?;

        assert_eq!(h1.wait().await?.unwrap().status, ResourceStatus::Deleted);
        assert_eq!(h2.wait().await?.unwrap().status, ResourceStatus::UpdateFailed);
        assert_eq!(h3.wait().await?.unwrap().status, ResourceStatus::DeletionFailed);

        let after = repo.get_resource(r.id).unwrap();
        assert_eq!(after.deployment_status, ResourceStatus::Deleted);
        assert!(!after.is_enabled);
        assert_eq!(after.resource_version, 0);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_drains_queued_operations() -> anyhow::Result<()> {
        let repo = Arc::new(ResourceRepository::new());
        let proc = processor(&repo, 5);
        let r = vm(&repo);
        for i in 0..4 {
            let op = Operation::new(&r, OperationAction::Upgrade, Some(rename(i)));
            repo.insert_operation(op.clone());
            proc.submit(&op)?;
        }
        proc.shutdown();
        let late = Operation::new(&r, OperationAction::Upgrade, Some(rename(9)));
        assert!(proc.submit(&late).is_err());

        assert!(proc.drain(Duration::from_secs(5)).await);
        let after = repo.get_resource(r.id).unwrap();
        assert_eq!(after.display_name(), Some("update 3"));
        assert_eq!(after.resource_version, 4);
        Ok(())
    }

    #[tokio::test]
    async fn drain_gives_up_after_limit() -> anyhow::Result<()> {
        let repo = Arc::new(ResourceRepository::new());
        let proc = processor(&repo, 200);
        let r = vm(&repo);
        let op = Operation::new(&r, OperationAction::Upgrade, Some(rename(1)));
        repo.insert_operation(op.clone());
        let handle = proc.submit(&op)?;

        assert!(!proc.drain(Duration::from_millis(20)).await);
        assert!(handle.wait().await?.expect("operation stored").succeeded());
        assert!(proc.drain(Duration::from_secs(1)).await);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn overlap_outside_executor_is_detected() {
        let repo = Arc::new(ResourceRepository::new());
        let proc = processor(&repo, 50);
        let r = vm(&repo);
        let a = Operation::new(&r, OperationAction::Upgrade, Some(rename(1)));
        let b = Operation::new(&r, OperationAction::Upgrade, Some(rename(2)));
        repo.insert_operation(a.clone());
        repo.insert_operation(b.clone());

        // bypass the executor on purpose
        let (ia, ib) = (Arc::clone(&proc.inner), Arc::clone(&proc.inner));
        let (ra, rb) = tokio::join!(
            tokio::spawn(async move { ia.process(a.id).await }),
            tokio::spawn(async move {
                sleep(Duration::from_millis(10)).await;
                ib.process(b.id).await
            })
        );
        assert!(ra.unwrap().unwrap().succeeded());
        assert_eq!(rb.unwrap().unwrap().status, ResourceStatus::UpdateFailed);
        assert_eq!(proc.violations(), 1);
        assert_eq!(repo.get_resource(r.id).unwrap().deployment_status, ResourceStatus::Deployed);
    }
}
