//! Integration tests for Executor runs against an in-memory fake API.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dialtone_config::{Hook, KeyRule, Lifecycle, LifecycleVariant, Lookup, OperationDef, Param};
use dialtone_plan::{Plan, submit};
use dialtone_runtime::{
  ChannelNotifier, ExecutionEvent, Executor, ExecutorConfig, NodeError, RunReport, TraceKind,
};
use dialtone_store::{RecordState, ResultStore, SkipReason};
use dialtone_transport::{Request, Response, Transport, TransportError};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct ApiState {
  resources: BTreeMap<String, Value>,
  /// Idempotency key -> resource id
  tokens: HashMap<String, String>,
  next_id: u32,
  calls: Vec<Request>,
}

/// A management API that treats repeated idempotency keys as no-ops.
///
/// - `Create*` returns the existing resource when the key is a known token or
///   resource id, and creates a new one otherwise
/// - `Update*` echoes the key
/// - `Delete*` removes the resource named by the key
/// - `Search*` finds resources by their `Name` parameter
#[derive(Default)]
struct FakeApi {
  state: Mutex<ApiState>,
  responses: HashMap<String, Value>,
  failing: HashSet<String>,
  panicking: HashSet<String>,
  delay_ms: u64,
  cancel_on: Option<(String, CancellationToken)>,
  in_flight: AtomicUsize,
  peak: AtomicUsize,
}

impl FakeApi {
  fn new() -> Self {
    Self::default()
  }

  fn respond(mut self, action: &str, response: Value) -> Self {
    self.responses.insert(action.to_string(), response);
    self
  }

  fn fail(mut self, action: &str) -> Self {
    self.failing.insert(action.to_string());
    self
  }

  fn panic_on(mut self, action: &str) -> Self {
    self.panicking.insert(action.to_string());
    self
  }

  fn with_delay(mut self, delay_ms: u64) -> Self {
    self.delay_ms = delay_ms;
    self
  }

  fn cancel_on(mut self, action: &str, token: CancellationToken) -> Self {
    self.cancel_on = Some((action.to_string(), token));
    self
  }

  fn seed(self, id: &str, resource: Value) -> Self {
    self
      .state
      .lock()
      .unwrap()
      .resources
      .insert(id.to_string(), resource);
    self
  }

  fn calls(&self) -> Vec<Request> {
    self.state.lock().unwrap().calls.clone()
  }

  fn actions(&self) -> Vec<String> {
    self.calls().into_iter().map(|r| r.action).collect()
  }

  fn calls_to(&self, action: &str) -> Vec<Request> {
    self
      .calls()
      .into_iter()
      .filter(|r| r.action == action)
      .collect()
  }

  fn resource_count(&self) -> usize {
    self.state.lock().unwrap().resources.len()
  }

  fn handle(&self, request: &Request) -> Result<Response, TransportError> {
    let mut state = self.state.lock().unwrap();
    state.calls.push(request.clone());

    if self.failing.contains(&request.action) {
      return Err(TransportError::new(
        "InternalFailure",
        format!("{} failed", request.action),
      ));
    }
    if let Some(response) = self.responses.get(&request.action) {
      return Ok(Response::new(response.clone()));
    }

    let key = request.idempotency_key.clone();

    if request.action.starts_with("Search") {
      let name = request.parameters.get("Name").cloned();
      let items: Vec<Value> = state
        .resources
        .iter()
        .filter(|(_, r)| name.is_some() && r.get("Name") == name.as_ref())
        .map(|(id, _)| json!({ "Id": id }))
        .collect();
      return Ok(Response::new(json!({ "Items": items })));
    }

    if request.action.starts_with("Delete") {
      let key = key.unwrap_or_default();
      let id = state.tokens.remove(&key).unwrap_or(key);
      let existed = state.resources.remove(&id).is_some();
      return Ok(Response::new(json!({ "Deleted": id, "Existed": existed })));
    }

    if request.action.starts_with("Update") {
      return Ok(Response::new(json!({ "Id": key, "Updated": true })));
    }

    let existing = key.as_ref().and_then(|k| {
      state
        .tokens
        .get(k)
        .cloned()
        .or_else(|| state.resources.contains_key(k).then(|| k.clone()))
    });
    let id = match existing {
      Some(id) => id,
      None => {
        state.next_id += 1;
        let id = format!(
          "{}-{}",
          request.action.trim_start_matches("Create").to_lowercase(),
          state.next_id
        );
        if let Some(k) = &key {
          state.tokens.insert(k.clone(), id.clone());
        }
        id
      }
    };

    let mut body = request.parameters.clone();
    body["Id"] = json!(id);
    body["Arn"] = json!(format!("arn:{}", id));
    state.resources.insert(id, body.clone());
    Ok(Response::new(body))
  }
}

#[async_trait]
impl Transport for FakeApi {
  async fn invoke(&self, request: &Request) -> Result<Response, TransportError> {
    // Before taking the state lock so it is not poisoned
    if self.panicking.contains(&request.action) {
      panic!("{} blew up", request.action);
    }
    let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    self.peak.fetch_max(now, Ordering::SeqCst);

    if self.delay_ms > 0 {
      tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
    }
    let result = self.handle(request);

    self.in_flight.fetch_sub(1, Ordering::SeqCst);
    if let Some((action, token)) = &self.cancel_on {
      if *action == request.action {
        token.cancel();
      }
    }
    result
  }
}

fn executor(api: &Arc<FakeApi>) -> Executor {
  Executor::new(api.clone()).with_config(ExecutorConfig { max_parallel: 1 })
}

async fn run(api: &Arc<FakeApi>, plan: &Plan, lifecycle: Lifecycle) -> RunReport {
  executor(api)
    .run(plan, lifecycle, CancellationToken::new())
    .await
    .unwrap()
}

async fn run_after(
  api: &Arc<FakeApi>,
  plan: &Plan,
  lifecycle: Lifecycle,
  previous: &RunReport,
) -> RunReport {
  executor(api)
    .run_with_store(
      plan,
      lifecycle,
      ResultStore::with_prior(previous.snapshot()),
      CancellationToken::new(),
    )
    .await
    .unwrap()
}

/// A -> B -> C, each deletable.
fn chain() -> Plan {
  submit(vec![
    OperationDef::new("A", "CreateA").on_delete(Hook::new("DeleteA")),
    OperationDef::new("B", "CreateB")
      .param("Parent", Param::reference("A", "Id"))
      .on_delete(Hook::new("DeleteB")),
    OperationDef::new("C", "CreateC")
      .param("Parent", Param::reference("B", "Id"))
      .on_delete(Hook::new("DeleteC")),
  ])
  .unwrap()
}

fn upstream_failed(failed: &str) -> RecordState {
  RecordState::Skipped(SkipReason::UpstreamFailed {
    failed: failed.to_string(),
  })
}

#[tokio::test]
async fn test_deferred_reference_resolves_first_item() {
  let api = Arc::new(FakeApi::new().respond("SearchQueues", json!({ "Items": [{ "Id": "q-1" }] })));
  let plan = submit(vec![
    OperationDef::new("A", "SearchQueues"),
    OperationDef::new("B", "CreateUser").param("QueueId", Param::reference("A", "Items.0.Id")),
  ])
  .unwrap();

  let report = run(&api, &plan, Lifecycle::Create).await;

  assert!(report.is_success());
  let record = report.store().record("B").unwrap();
  assert_eq!(record.resolved_parameters.as_ref().unwrap()["QueueId"], "q-1");
  assert_eq!(api.calls_to("CreateUser")[0].parameters["QueueId"], "q-1");
  assert_eq!(report.lookup("A", "Items.0.Id").unwrap(), json!("q-1"));
}

#[tokio::test]
async fn test_create_follows_plan_order() {
  let api = Arc::new(FakeApi::new());
  let plan = chain();

  let report = run(&api, &plan, Lifecycle::Create).await;

  assert!(report.is_success());
  assert_eq!(report.started(), vec!["A", "B", "C"]);
  assert_eq!(api.actions(), vec!["CreateA", "CreateB", "CreateC"]);
  // B was created under A's id
  assert_eq!(report.lookup("B", "Parent").unwrap(), report.lookup("A", "Id").unwrap());
}

#[tokio::test]
async fn test_delete_visits_in_reverse_order() {
  let api = Arc::new(FakeApi::new());
  let plan = chain();

  let created = run(&api, &plan, Lifecycle::Create).await;
  assert_eq!(api.resource_count(), 3);

  let deleted = run_after(&api, &plan, Lifecycle::Delete, &created).await;

  assert!(deleted.is_success());
  assert_eq!(deleted.started(), vec!["C", "B", "A"]);
  assert_eq!(api.resource_count(), 0);

  // Delete calls carry the same keys the creates used
  let delete_keys: Vec<Option<String>> = api
    .calls_to("DeleteC")
    .into_iter()
    .map(|r| r.idempotency_key)
    .collect();
  assert_eq!(delete_keys, vec![Some("C".to_string())]);

  let snapshot = deleted.snapshot();
  assert!(snapshot.responses.is_empty());
  assert!(snapshot.keys.is_empty());
}

#[tokio::test]
async fn test_failure_cascades_but_independent_branches_finish() {
  let api = Arc::new(FakeApi::new().fail("CreateA"));
  let plan = submit(vec![
    OperationDef::new("A", "CreateA"),
    OperationDef::new("B", "CreateB").depends_on("A"),
    OperationDef::new("C", "CreateC").depends_on("B"),
    OperationDef::new("D", "CreateD"),
  ])
  .unwrap();

  let report = run(&api, &plan, Lifecycle::Create).await;

  assert!(!report.is_success());
  assert_eq!(report.state("A"), Some(&RecordState::Failed));
  assert_eq!(report.state("B"), Some(&upstream_failed("A")));
  assert_eq!(report.state("C"), Some(&upstream_failed("A")));
  assert_eq!(report.state("D"), Some(&RecordState::Succeeded));

  assert!(matches!(
    report.outcome("A").unwrap().error,
    Some(NodeError::Transport(ref e)) if e.code == "InternalFailure"
  ));
  assert!(api.calls_to("CreateB").is_empty());
  assert!(api.calls_to("CreateC").is_empty());
  assert_eq!(report.failed().count(), 1);
}

#[tokio::test]
async fn test_unresolved_dependency_fails_without_calling_transport() {
  let api = Arc::new(FakeApi::new().respond("SearchQueues", json!({ "Items": [] })));
  let plan = submit(vec![
    OperationDef::new("A", "SearchQueues"),
    OperationDef::new("B", "CreateUser").param("QueueId", Param::reference("A", "Items.0.Id")),
    OperationDef::new("C", "CreateRule").depends_on("B"),
  ])
  .unwrap();

  let report = run(&api, &plan, Lifecycle::Create).await;

  assert_eq!(report.state("A"), Some(&RecordState::Succeeded));
  assert_eq!(report.state("B"), Some(&RecordState::Failed));
  assert!(matches!(
    &report.outcome("B").unwrap().error,
    Some(NodeError::UnresolvedDependency { reference, .. }) if reference == "A.Items.0.Id"
  ));
  assert_eq!(report.state("C"), Some(&upstream_failed("B")));
  assert_eq!(api.actions(), vec!["SearchQueues"]);
}

#[tokio::test]
async fn test_unsupported_lifecycle_is_a_noop() {
  let api = Arc::new(FakeApi::new());
  let plan = submit(vec![
    OperationDef::new("storage", "CreateStorage").variant(LifecycleVariant::CreateOnly),
    OperationDef::new("queue", "CreateQueue").param("Storage", Param::reference("storage", "Id")),
  ])
  .unwrap();

  let created = run(&api, &plan, Lifecycle::Create).await;
  let updated = run_after(&api, &plan, Lifecycle::Update, &created).await;

  assert!(updated.is_success());
  assert_eq!(
    updated.state("storage"),
    Some(&RecordState::Skipped(SkipReason::Unsupported))
  );
  assert_eq!(updated.state("queue"), Some(&RecordState::Succeeded));
  assert_eq!(api.calls_to("CreateStorage").len(), 1);

  // Deletes skip both: neither has a delete hook
  let deleted = run_after(&api, &plan, Lifecycle::Delete, &updated).await;
  assert!(deleted.is_success());
  assert!(deleted.started().is_empty());
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
  let api = Arc::new(FakeApi::new());
  let plan = submit(vec![
    OperationDef::new("instance", "CreateInstance")
      .param("Alias", "demo")
      .key(KeyRule::from_response("Id")),
    OperationDef::new("queue", "CreateQueue")
      .param("InstanceId", Param::reference("instance", "Id"))
      .key(KeyRule::literal("basic-queue")),
    OperationDef::new("user", "CreateUser")
      .param("InstanceId", Param::reference("instance", "Id"))
      .param("Username", "agent")
      .key(KeyRule::template("user-{{ Username }}")),
  ])
  .unwrap();

  let first = run(&api, &plan, Lifecycle::Create).await;
  let resources = api.resource_count();
  let second = run_after(&api, &plan, Lifecycle::Create, &first).await;

  assert!(first.is_success());
  assert!(second.is_success());
  assert_eq!(resources, 3);
  assert_eq!(api.resource_count(), resources);

  for (a, b) in first.outcomes.iter().zip(&second.outcomes) {
    assert_eq!(a.operation, b.operation);
    assert_eq!(a.state, b.state);
    assert_eq!(a.idempotency_key, b.idempotency_key);
  }
  assert_eq!(
    second.outcome("user").unwrap().idempotency_key.as_deref(),
    Some("user-agent")
  );
}

#[tokio::test]
async fn test_response_key_is_cached_for_update_and_delete() {
  let api = Arc::new(FakeApi::new());
  let plan = submit(vec![
    OperationDef::new("queue", "CreateQueue")
      .param("Name", "Basic")
      .key(KeyRule::from_response("Id"))
      .on_update(Hook::new("UpdateQueue").param("QueueId", Param::reference("queue", "Id")))
      .on_delete(Hook::new("DeleteQueue").param("QueueId", Param::reference("queue", "Id"))),
  ])
  .unwrap();

  let created = run(&api, &plan, Lifecycle::Create).await;
  let key = created.outcome("queue").unwrap().idempotency_key.clone().unwrap();
  assert_eq!(api.calls_to("CreateQueue")[0].idempotency_key, None);

  let updated = run_after(&api, &plan, Lifecycle::Update, &created).await;
  assert!(updated.is_success());
  let update = &api.calls_to("UpdateQueue")[0];
  assert_eq!(update.idempotency_key.as_deref(), Some(key.as_str()));
  assert_eq!(update.parameters["QueueId"], json!(key));

  let deleted = run_after(&api, &plan, Lifecycle::Delete, &updated).await;
  assert!(deleted.is_success());
  let delete = &api.calls_to("DeleteQueue")[0];
  assert_eq!(delete.idempotency_key.as_deref(), Some(key.as_str()));
  assert_eq!(api.resource_count(), 0);
}

#[tokio::test]
async fn test_delete_of_never_created_operation_is_skipped() {
  let api = Arc::new(FakeApi::new());
  let plan = submit(vec![
    OperationDef::new("queue", "CreateQueue")
      .key(KeyRule::from_response("Id"))
      .on_delete(Hook::new("DeleteQueue")),
  ])
  .unwrap();

  let report = run(&api, &plan, Lifecycle::Delete).await;

  assert!(report.is_success());
  assert_eq!(
    report.state("queue"),
    Some(&RecordState::Skipped(SkipReason::NotProvisioned))
  );
  assert!(api.calls().is_empty());
}

#[tokio::test]
async fn test_missing_key_with_recorded_response() {
  let api = Arc::new(FakeApi::new());
  let plan = submit(vec![
    OperationDef::new("queue", "CreateQueue")
      .key(KeyRule::from_response("Id"))
      .on_delete(Hook::new("DeleteQueue")),
  ])
  .unwrap();

  // Created once, but the key was never saved
  let mut prior = dialtone_store::Snapshot::new("default");
  prior
    .responses
    .insert("queue".to_string(), json!({ "Name": "Basic" }));

  let report = executor(&api)
    .run_with_store(
      &plan,
      Lifecycle::Delete,
      ResultStore::with_prior(prior),
      CancellationToken::new(),
    )
    .await
    .unwrap();

  assert_eq!(report.state("queue"), Some(&RecordState::Failed));
  assert_eq!(report.outcome("queue").unwrap().error, Some(NodeError::MissingKey));
  assert!(api.calls().is_empty());
}

#[tokio::test]
async fn test_destroy_after_partial_apply_deletes_what_was_created() {
  let api = Arc::new(FakeApi::new().fail("CreateB"));
  let plan = submit(vec![
    OperationDef::new("A", "CreateA")
      .key(KeyRule::from_response("Id"))
      .on_delete(Hook::new("DeleteA")),
    OperationDef::new("B", "CreateB")
      .key(KeyRule::from_response("Id"))
      .param("Parent", Param::reference("A", "Id"))
      .on_delete(Hook::new("DeleteB")),
  ])
  .unwrap();

  let applied = run(&api, &plan, Lifecycle::Create).await;
  assert_eq!(applied.state("A"), Some(&RecordState::Succeeded));
  assert_eq!(applied.state("B"), Some(&RecordState::Failed));
  assert_eq!(api.resource_count(), 1);

  let destroyed = run_after(&api, &plan, Lifecycle::Delete, &applied).await;

  assert!(destroyed.is_success());
  assert_eq!(
    destroyed.state("B"),
    Some(&RecordState::Skipped(SkipReason::NotProvisioned))
  );
  assert_eq!(destroyed.state("A"), Some(&RecordState::Succeeded));
  assert!(api.calls_to("DeleteB").is_empty());

  let deletes = api.calls_to("DeleteA");
  assert_eq!(deletes.len(), 1);
  assert_eq!(deletes[0].idempotency_key.as_deref(), Some("a-1"));
  assert_eq!(api.resource_count(), 0);
  assert!(destroyed.snapshot().keys.is_empty());
}

#[tokio::test]
async fn test_delete_failure_cascades_to_prerequisites() {
  let api = Arc::new(FakeApi::new().fail("DeleteC"));
  let plan = chain();

  let created = run(&api, &plan, Lifecycle::Create).await;
  let deleted = run_after(&api, &plan, Lifecycle::Delete, &created).await;

  assert!(!deleted.is_success());
  assert_eq!(deleted.state("C"), Some(&RecordState::Failed));
  assert_eq!(deleted.state("B"), Some(&upstream_failed("C")));
  assert_eq!(deleted.state("A"), Some(&upstream_failed("C")));
  assert!(api.calls_to("DeleteB").is_empty());
  assert!(api.calls_to("DeleteA").is_empty());
  assert_eq!(api.resource_count(), 3);

  // Nothing was deleted, so every key survives for the next attempt
  let snapshot = deleted.snapshot();
  assert_eq!(snapshot.keys.len(), 3);
}

#[tokio::test]
async fn test_delete_failure_spares_independent_branch() {
  let api = Arc::new(FakeApi::new().fail("DeleteC"));
  let plan = submit(vec![
    OperationDef::new("A", "CreateA").on_delete(Hook::new("DeleteA")),
    OperationDef::new("B", "CreateB")
      .param("Parent", Param::reference("A", "Id"))
      .on_delete(Hook::new("DeleteB")),
    OperationDef::new("C", "CreateC")
      .param("Parent", Param::reference("B", "Id"))
      .on_delete(Hook::new("DeleteC")),
    OperationDef::new("D", "CreateD").on_delete(Hook::new("DeleteD")),
  ])
  .unwrap();

  let created = run(&api, &plan, Lifecycle::Create).await;
  let deleted = run_after(&api, &plan, Lifecycle::Delete, &created).await;

  assert_eq!(deleted.state("C"), Some(&RecordState::Failed));
  assert_eq!(deleted.state("A"), Some(&upstream_failed("C")));
  assert_eq!(deleted.state("D"), Some(&RecordState::Succeeded));
  assert_eq!(api.calls_to("DeleteD").len(), 1);
  assert_eq!(deleted.failed().count(), 1);

  let snapshot = deleted.snapshot();
  assert!(!snapshot.keys.contains_key("D"));
  assert!(snapshot.keys.contains_key("A"));
}

#[tokio::test]
async fn test_panicking_call_fails_only_its_operation() {
  let api = Arc::new(FakeApi::new().panic_on("CreateP"));
  let plan = submit(vec![
    OperationDef::new("P", "CreateP"),
    OperationDef::new("Q", "CreateQ"),
    OperationDef::new("R", "CreateR").depends_on("P"),
  ])
  .unwrap();

  let report = Executor::new(api.clone())
    .with_config(ExecutorConfig { max_parallel: 2 })
    .run(&plan, Lifecycle::Create, CancellationToken::new())
    .await
    .unwrap();

  assert!(!report.is_success());
  assert_eq!(report.state("P"), Some(&RecordState::Failed));
  assert!(matches!(
    report.outcome("P").unwrap().error,
    Some(NodeError::Panicked { .. })
  ));
  assert_eq!(report.state("Q"), Some(&RecordState::Succeeded));
  assert_eq!(report.outcome("Q").unwrap().idempotency_key.as_deref(), Some("Q"));
  assert_eq!(report.state("R"), Some(&upstream_failed("P")));
  assert!(api.calls_to("CreateR").is_empty());
}

#[tokio::test]
async fn test_changed_response_key_is_unstable() {
  let api = Arc::new(FakeApi::new());
  let plan = submit(vec![
    OperationDef::new("queue", "CreateQueue").key(KeyRule::from_response("Id")),
  ])
  .unwrap();

  let mut prior = dialtone_store::Snapshot::new("default");
  prior.keys.insert("queue".to_string(), "stale-id".to_string());

  let report = executor(&api)
    .run_with_store(
      &plan,
      Lifecycle::Create,
      ResultStore::with_prior(prior),
      CancellationToken::new(),
    )
    .await
    .unwrap();

  assert!(matches!(
    &report.outcome("queue").unwrap().error,
    Some(NodeError::UnstableKey { cached, .. }) if cached == "stale-id"
  ));
}

#[tokio::test]
async fn test_lookup_adopts_existing_resource() {
  let api = Arc::new(
    FakeApi::new().seed("queue-0", json!({ "Id": "queue-0", "Name": "BasicQueue" })),
  );
  let plan = submit(vec![
    OperationDef::new("queue", "CreateQueue")
      .param("Name", "BasicQueue")
      .key(
        KeyRule::from_response("Id")
          .with_lookup(Lookup::new("SearchQueues", "Items.0.Id").param("Name", "BasicQueue")),
      ),
  ])
  .unwrap();

  let report = run(&api, &plan, Lifecycle::Create).await;

  assert!(report.is_success());
  assert_eq!(
    report.outcome("queue").unwrap().idempotency_key.as_deref(),
    Some("queue-0")
  );
  // Adoption replays the create call against the found resource
  assert_eq!(api.actions(), vec!["SearchQueues", "CreateQueue"]);
  assert_eq!(
    api.calls_to("CreateQueue")[0].idempotency_key.as_deref(),
    Some("queue-0")
  );
  assert_eq!(api.resource_count(), 1);
}

#[tokio::test]
async fn test_create_only_adoption_records_lookup_response() {
  let api = Arc::new(
    FakeApi::new().seed("queue-0", json!({ "Id": "queue-0", "Name": "BasicQueue" })),
  );
  let plan = submit(vec![
    OperationDef::new("queue", "CreateQueue")
      .variant(LifecycleVariant::CreateOnly)
      .key(
        KeyRule::from_response("Id")
          .with_lookup(Lookup::new("SearchQueues", "Items.0.Id").param("Name", "BasicQueue")),
      ),
  ])
  .unwrap();

  let report = run(&api, &plan, Lifecycle::Create).await;

  assert!(report.is_success());
  assert_eq!(api.actions(), vec!["SearchQueues"]);
  assert_eq!(report.lookup("queue", "Items.0.Id").unwrap(), json!("queue-0"));
}

#[tokio::test]
async fn test_lookup_miss_falls_back_to_create() {
  let api = Arc::new(FakeApi::new());
  let plan = submit(vec![
    OperationDef::new("queue", "CreateQueue")
      .param("Name", "BasicQueue")
      .key(
        KeyRule::from_response("Id")
          .with_lookup(Lookup::new("SearchQueues", "Items.0.Id").param("Name", "BasicQueue")),
      ),
  ])
  .unwrap();

  let report = run(&api, &plan, Lifecycle::Create).await;

  assert!(report.is_success());
  assert_eq!(api.actions(), vec!["SearchQueues", "CreateQueue"]);
  assert_eq!(api.calls_to("CreateQueue")[0].idempotency_key, None);
  assert_eq!(
    report.outcome("queue").unwrap().idempotency_key.as_deref(),
    Some("queue-1")
  );
}

#[tokio::test]
async fn test_template_key_uses_resolved_parameters() {
  let api = Arc::new(FakeApi::new().respond("SearchQueues", json!({ "Items": [{ "Id": "q-1" }] })));
  let plan = submit(vec![
    OperationDef::new("basic_queue", "SearchQueues"),
    OperationDef::new("outbound", "UpdateQueueOutboundCallerConfig")
      .param("QueueId", Param::reference("basic_queue", "Items.0.Id"))
      .key(KeyRule::template("outbound-{{ QueueId }}")),
  ])
  .unwrap();

  let report = run(&api, &plan, Lifecycle::Create).await;

  assert!(report.is_success());
  let call = &api.calls_to("UpdateQueueOutboundCallerConfig")[0];
  assert_eq!(call.idempotency_key.as_deref(), Some("outbound-q-1"));
}

#[tokio::test]
async fn test_cancellation_skips_unstarted_and_resume_finishes() {
  let cancel = CancellationToken::new();
  let api = Arc::new(FakeApi::new().cancel_on("CreateA", cancel.clone()));
  let plan = chain();

  let report = executor(&api)
    .run(&plan, Lifecycle::Create, cancel)
    .await
    .unwrap();

  assert!(report.cancelled);
  assert!(!report.is_success());
  assert_eq!(report.state("A"), Some(&RecordState::Succeeded));
  assert_eq!(
    report.state("B"),
    Some(&RecordState::Skipped(SkipReason::Cancelled))
  );
  assert_eq!(
    report.state("C"),
    Some(&RecordState::Skipped(SkipReason::Cancelled))
  );

  let resumed = executor(&api)
    .run_with_store(
      &plan,
      Lifecycle::Create,
      report.into_store(),
      CancellationToken::new(),
    )
    .await
    .unwrap();

  assert!(resumed.is_success());
  assert_eq!(resumed.started(), vec!["B", "C"]);
  assert_eq!(api.calls_to("CreateA").len(), 1);
}

#[tokio::test]
async fn test_resume_from_snapshot_reissues_with_cached_keys() {
  let cancel = CancellationToken::new();
  let api = Arc::new(FakeApi::new().cancel_on("CreateA", cancel.clone()));
  let plan = submit(vec![
    OperationDef::new("A", "CreateA").key(KeyRule::from_response("Id")),
    OperationDef::new("B", "CreateB").param("Parent", Param::reference("A", "Id")),
  ])
  .unwrap();

  let interrupted = executor(&api)
    .run(&plan, Lifecycle::Create, cancel)
    .await
    .unwrap();
  assert!(interrupted.cancelled);
  assert_eq!(interrupted.snapshot().key("A"), Some("a-1"));

  // A fresh process only has the saved snapshot
  let resumed = run_after(&api, &plan, Lifecycle::Create, &interrupted).await;

  assert!(resumed.is_success());
  assert_eq!(resumed.started(), vec!["A", "B"]);
  let creates = api.calls_to("CreateA");
  assert_eq!(creates.len(), 2);
  assert_eq!(creates[1].idempotency_key.as_deref(), Some("a-1"));
  assert_eq!(api.resource_count(), 2);
  assert_eq!(api.calls_to("CreateB")[0].parameters["Parent"], "a-1");
}

#[tokio::test]
async fn test_parallel_batches_respect_limit() {
  let api = Arc::new(FakeApi::new().with_delay(20));
  let plan = submit((0..5).map(|i| OperationDef::new(format!("op{}", i), "CreateThing"))).unwrap();

  let report = Executor::new(api.clone())
    .with_config(ExecutorConfig { max_parallel: 2 })
    .run(&plan, Lifecycle::Create, CancellationToken::new())
    .await
    .unwrap();

  assert!(report.is_success());
  assert_eq!(report.outcomes.len(), 5);
  assert_eq!(api.peak.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_events_and_trace() {
  let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
  let api = Arc::new(FakeApi::new().fail("CreateB"));
  let plan = chain();

  let report = executor(&api)
    .with_notifier(Arc::new(ChannelNotifier::new(tx)))
    .run(&plan, Lifecycle::Create, CancellationToken::new())
    .await
    .unwrap();

  let mut events = Vec::new();
  while let Ok(event) = rx.try_recv() {
    events.push(event);
  }

  assert!(matches!(events.first(), Some(ExecutionEvent::RunStarted { .. })));
  assert!(matches!(
    events.last(),
    Some(ExecutionEvent::RunCompleted {
      success: false,
      cancelled: false,
      ..
    })
  ));
  assert!(events.iter().any(|e| matches!(
    e,
    ExecutionEvent::NodeFailed { operation, .. } if operation == "B"
  )));

  let kinds: Vec<(&str, &TraceKind)> = report
    .trace
    .iter()
    .map(|e| (e.operation.as_str(), &e.kind))
    .collect();
  assert_eq!(
    kinds,
    vec![
      ("A", &TraceKind::Started),
      ("A", &TraceKind::Succeeded),
      ("B", &TraceKind::Started),
      ("B", &TraceKind::Failed),
      (
        "C",
        &TraceKind::Skipped(SkipReason::UpstreamFailed {
          failed: "B".to_string()
        })
      ),
    ]
  );
  assert!(report.trace.iter().enumerate().all(|(i, e)| e.seq == i as u64));
}
