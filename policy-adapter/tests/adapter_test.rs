use policy_adapter::{
    Adapter, AdapterConfig, AdapterOptions, CasbinRule, ConnectionOptions, DocumentAdapter, ErrorKind,
    FilteredAdapter, InMemoryRuleStore, MemoryModel, Model, RuleFilter, RuleStore,
    UpdatableAdapter, DEFAULT_DATABASE,
};
use proptest::prelude::*;
use rstest::rstest;
use serde_json::Value;
use std::time::Duration;
use tokio_stream::StreamExt;

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn sorted(rules: &[Vec<String>]) -> Vec<Vec<String>> {
    let mut rules = rules.to_vec();
    rules.sort();
    rules
}

async fn open(options: AdapterOptions) -> (DocumentAdapter<InMemoryRuleStore>, InMemoryRuleStore) {
    let store = InMemoryRuleStore::new();
    let adapter = DocumentAdapter::open(store.clone(), options)
        .await
        .expect("open adapter");
    (adapter, store)
}

async fn seed(adapter: &DocumentAdapter<InMemoryRuleStore>) {
    for rule in [
        ["alice", "data1", "read"],
        ["bob", "data2", "write"],
        ["data2_admin", "data2", "read"],
        ["data2_admin", "data2", "write"],
    ] {
        adapter.add_policy("p", "p", &strings(&rule)).await.unwrap();
    }
    adapter
        .add_policy("g", "g", &strings(&["alice", "data2_admin"]))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_load_all_yields_every_rule() {
    let (mut adapter, _store) = open(AdapterOptions::default()).await;
    seed(&adapter).await;

    let mut model = MemoryModel::new();
    adapter.load_policy(&mut model).await.unwrap();

    assert_eq!(
        sorted(model.get_policy("p", "p")),
        vec![
            strings(&["alice", "data1", "read"]),
            strings(&["bob", "data2", "write"]),
            strings(&["data2_admin", "data2", "read"]),
            strings(&["data2_admin", "data2", "write"]),
        ]
    );
    assert_eq!(model.get_policy("g", "g"), &[strings(&["alice", "data2_admin"])]);
    assert!(!adapter.is_filtered());
    adapter.close().await.unwrap();
}

#[tokio::test]
async fn test_add_then_remove_leaves_no_residue() {
    let (adapter, store) = open(AdapterOptions::default()).await;
    seed(&adapter).await;
    let before = store.len().await;

    let rule = strings(&["carol", "data3", "read"]);
    adapter.add_policy("p", "p", &rule).await.unwrap();
    assert_eq!(store.len().await, before + 1);
    adapter.remove_policy("p", "p", &rule).await.unwrap();
    assert_eq!(store.len().await, before);

    // removing again is a no-op
    adapter.remove_policy("p", "p", &rule).await.unwrap();
    assert_eq!(store.len().await, before);
    adapter.close().await.unwrap();
}

#[tokio::test]
async fn test_remove_filtered_by_first_field() {
    let (mut adapter, store) = open(AdapterOptions::default()).await;
    seed(&adapter).await;

    adapter
        .remove_filtered_policy("p", "p", 0, &strings(&["data2_admin"]))
        .await
        .unwrap();
    assert_eq!(store.len().await, 3);

    let mut model = MemoryModel::new();
    adapter.load_policy(&mut model).await.unwrap();
    assert_eq!(
        sorted(model.get_policy("p", "p")),
        vec![strings(&["alice", "data1", "read"]), strings(&["bob", "data2", "write"])]
    );
    assert_eq!(model.get_policy("g", "g").len(), 1);
    adapter.close().await.unwrap();
}

#[rstest]
#[case(1, &["data2", ""], 1)]
#[case(1, &["", "write"], 2)]
#[case(2, &["read"], 2)]
#[case(0, &[], 0)]
#[tokio::test]
async fn test_remove_filtered_wildcards(
    #[case] field_index: usize,
    #[case] values: &[&str],
    #[case] remaining_p: usize,
) {
    let (mut adapter, _store) = open(AdapterOptions::default()).await;
    seed(&adapter).await;

    adapter
        .remove_filtered_policy("p", "p", field_index, &strings(values))
        .await
        .unwrap();

    let mut model = MemoryModel::new();
    adapter.load_policy(&mut model).await.unwrap();
    assert_eq!(model.get_policy("p", "p").len(), remaining_p);
    assert_eq!(model.get_policy("g", "g").len(), 1);
    adapter.close().await.unwrap();
}

#[tokio::test]
async fn test_save_replaces_stored_rules() {
    let (mut adapter, store) = open(AdapterOptions::default()).await;
    seed(&adapter).await;

    let model = MemoryModel::from_lines([
        "p, dave, data4, read",
        "g, dave, admin",
    ])
    .unwrap();
    adapter.save_policy(&model).await.unwrap();
    assert_eq!(store.len().await, 2);

    let mut loaded = MemoryModel::new();
    adapter.load_policy(&mut loaded).await.unwrap();
    assert_eq!(loaded.get_policy("p", "p"), &[strings(&["dave", "data4", "read"])]);
    assert_eq!(loaded.get_policy("g", "g"), &[strings(&["dave", "admin"])]);
    adapter.close().await.unwrap();
}

#[tokio::test]
async fn test_save_empty_model_clears_storage() {
    let (adapter, store) = open(AdapterOptions::default()).await;
    seed(&adapter).await;

    adapter.save_policy(&MemoryModel::new()).await.unwrap();
    assert!(store.is_empty().await);
    assert_eq!(store.unique_indexes().await.len(), 1);
    adapter.close().await.unwrap();
}

#[tokio::test]
async fn test_save_after_filtered_load_is_refused() {
    let (mut adapter, store) = open(AdapterOptions::default()).await;
    seed(&adapter).await;
    let before = store.documents().await;

    let filter = RuleFilter::new().value(0, "bob");
    let mut model = MemoryModel::new();
    adapter
        .load_filtered_policy(&mut model, Some(&filter))
        .await
        .unwrap();
    assert!(adapter.is_filtered());
    assert_eq!(model.get_policy("p", "p"), &[strings(&["bob", "data2", "write"])]);
    assert!(model.get_policy("g", "g").is_empty());
    assert_eq!(store.documents().await, before);

    let err = adapter.save_policy(&model).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::State);
    assert_eq!(store.documents().await, before);

    let mut full = MemoryModel::new();
    adapter.load_policy(&mut full).await.unwrap();
    assert!(!adapter.is_filtered());
    adapter.save_policy(&full).await.unwrap();
    assert_eq!(store.len().await, 5);
    adapter.close().await.unwrap();
}

#[tokio::test]
async fn test_filtered_flag_at_construction() {
    let (mut adapter, store) = open(AdapterOptions::default().filtered(true)).await;
    assert!(adapter.is_filtered());

    let err = adapter.save_policy(&MemoryModel::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::State);

    adapter
        .load_filtered_policy(&mut MemoryModel::new(), None)
        .await
        .unwrap();
    assert!(!adapter.is_filtered());
    assert_eq!(store.unique_indexes().await.len(), 1);
    adapter.close().await.unwrap();
}

#[tokio::test]
async fn test_update_requires_updatable_mode() {
    let (adapter, store) = open(AdapterOptions::default()).await;
    seed(&adapter).await;
    let before = store.documents().await;

    let err = adapter
        .update_policy(
            "p",
            "p",
            &strings(&["alice", "data1", "read"]),
            &strings(&["alice", "data1", "write"]),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::State);
    assert!(!adapter.is_updatable());
    assert_eq!(store.documents().await, before);
    adapter.close().await.unwrap();
}

#[tokio::test]
async fn test_update_keeps_record_identifier() {
    let (mut adapter, store) = open(AdapterOptions::default().updatable(true)).await;
    seed(&adapter).await;

    let id_of = |documents: &[Value], v2: &str| {
        documents
            .iter()
            .find(|d| d["v0"] == "alice" && d["v1"] == "data1" && d["v2"] == v2)
            .map(|d| d["_id"].clone())
    };
    let original = id_of(&store.documents().await, "read").expect("seeded rule");

    adapter
        .update_policy(
            "p",
            "p",
            &strings(&["alice", "data1", "read"]),
            &strings(&["alice", "data1", "write"]),
        )
        .await
        .unwrap();

    let documents = store.documents().await;
    assert_eq!(documents.len(), 5);
    assert_eq!(id_of(&documents, "write"), Some(original));
    assert_eq!(id_of(&documents, "read"), None);

    let mut model = MemoryModel::new();
    adapter.load_policy(&mut model).await.unwrap();
    assert!(model.has_policy("p", "p", &strings(&["alice", "data1", "write"])));
    assert!(!model.has_policy("p", "p", &strings(&["alice", "data1", "read"])));
    adapter.close().await.unwrap();
}

#[tokio::test]
async fn test_update_onto_existing_rule_conflicts() {
    let (adapter, _store) = open(AdapterOptions::default().updatable(true)).await;
    seed(&adapter).await;

    let err = adapter
        .update_policy(
            "p",
            "p",
            &strings(&["data2_admin", "data2", "read"]),
            &strings(&["data2_admin", "data2", "write"]),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    adapter.close().await.unwrap();
}

#[tokio::test]
async fn test_reconstruct_keeps_interior_empty_fields() {
    let (mut adapter, store) = open(AdapterOptions::default()).await;
    adapter
        .add_policy("p", "p", &strings(&["alice", "", "read"]))
        .await
        .unwrap();

    let stored = store.documents().await;
    assert_eq!(stored[0]["v1"], "");
    assert_eq!(stored[0]["v3"], "");

    let mut model = MemoryModel::new();
    adapter.load_policy(&mut model).await.unwrap();
    assert_eq!(model.get_policy("p", "p"), &[strings(&["alice", "", "read"])]);
    adapter.close().await.unwrap();
}

#[tokio::test]
async fn test_clear_policy_keeps_index() {
    let (adapter, store) = open(AdapterOptions::default()).await;
    seed(&adapter).await;

    adapter.clear_policy().await.unwrap();
    assert!(store.is_empty().await);
    assert_eq!(store.unique_indexes().await.len(), 1);
    adapter.close().await.unwrap();
}

#[tokio::test]
async fn test_connect_by_target() {
    let adapter = DocumentAdapter::<InMemoryRuleStore>::new("memory://target-test")
        .await
        .unwrap();
    assert_eq!(adapter.database(), DEFAULT_DATABASE);
    adapter
        .add_policy("p", "p", &strings(&["alice", "data1", "read"]))
        .await
        .unwrap();
    adapter.close().await.unwrap();

    // same target and database reach the same collection
    let mut reopened = DocumentAdapter::<InMemoryRuleStore>::new("memory://target-test")
        .await
        .unwrap();
    let mut model = MemoryModel::new();
    reopened.load_policy(&mut model).await.unwrap();
    assert_eq!(model.get_policy("p", "p").len(), 1);
    reopened.close().await.unwrap();
}

#[rstest]
#[case("memory://db-test/embedded", AdapterOptions::default(), "embedded")]
#[case("memory://db-test/embedded", AdapterOptions::default().database("explicit"), "explicit")]
#[case("memory://db-test", AdapterOptions::default(), "casbin_rule")]
#[tokio::test]
async fn test_database_resolution(
    #[case] target: &str,
    #[case] options: AdapterOptions,
    #[case] expected: &str,
) {
    let adapter = DocumentAdapter::<InMemoryRuleStore>::with_options(target, options)
        .await
        .unwrap();
    assert_eq!(adapter.database(), expected);
    adapter.close().await.unwrap();
}

#[rstest]
#[case("localhost:40001?foo=1&bar=2")]
#[case("couchbase://localhost")]
#[case("memory://host:notaport")]
#[tokio::test]
async fn test_bad_target_is_connection_error(#[case] target: &str) {
    let err = DocumentAdapter::<InMemoryRuleStore>::new(target)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
}

#[tokio::test]
async fn test_connect_with_built_options() {
    let connection = ConnectionOptions::new("memory", "builder-test");
    let adapter = DocumentAdapter::<InMemoryRuleStore>::with_connection_options(
        connection,
        AdapterOptions::default().database("built"),
    )
    .await
    .unwrap();
    assert_eq!(adapter.database(), "built");
    adapter.close().await.unwrap();

    // credentials are ignored by the in-memory store
    let connection = ConnectionOptions::new("memory", "builder-test").with_credentials("admin", "secret");
    assert_eq!(connection.username.as_deref(), Some("admin"));
    let adapter = DocumentAdapter::<InMemoryRuleStore>::with_connection_options(
        connection,
        AdapterOptions::default(),
    )
    .await
    .unwrap();
    assert_eq!(adapter.database(), DEFAULT_DATABASE);
    adapter.close().await.unwrap();
}

#[tokio::test]
async fn test_from_config() {
    let config = AdapterConfig::from_lookup(|key| match key {
        "POLICY_STORE_URL" => Some("memory://config-test".to_string()),
        "POLICY_STORE_TIMEOUT_SECS" => Some("3".to_string()),
        "POLICY_STORE_UPDATABLE" => Some("true".to_string()),
        _ => None,
    })
    .unwrap();

    let adapter = DocumentAdapter::<InMemoryRuleStore>::from_config(&config)
        .await
        .unwrap();
    assert_eq!(adapter.timeout(), Duration::from_secs(3));
    assert!(adapter.is_updatable());
    adapter.close().await.unwrap();
}

#[tokio::test]
async fn test_stored_shape() {
    let (adapter, store) = open(AdapterOptions::default()).await;
    adapter
        .add_policy("g", "g", &strings(&["alice", "admin"]))
        .await
        .unwrap();

    let mut found = store.find(None).await.unwrap();
    let rule: CasbinRule = found.next().await.expect("one row").expect("decodes");
    assert!(rule.id.is_some());
    assert_eq!(rule.ptype, "g");
    assert_eq!(rule.policy_fields(), strings(&["alice", "admin"]));
    assert!(found.next().await.is_none());

    let mut model = MemoryModel::new();
    model.add_policy("g", "g", strings(&["alice", "admin"]));
    assert_eq!(model.policy_groups().len(), 1);
    adapter.close().await.unwrap();
}

#[rstest]
#[case(&["alice", "data1,data2", "read"])]
#[case(&[" alice ", "data1", "read "])]
#[case(&["alice", "", "données, 日本"])]
#[tokio::test]
async fn test_load_keeps_stored_fields_verbatim(#[case] rule: &[&str]) {
    let (mut adapter, store) = open(AdapterOptions::default().updatable(true)).await;
    let rule = strings(rule);
    adapter.add_policy("p", "p", &rule).await.unwrap();

    let mut model = MemoryModel::new();
    adapter.load_policy(&mut model).await.unwrap();
    assert_eq!(model.get_policy("p", "p"), &[rule.clone()]);

    // the loaded rule still addresses the stored document
    let mut changed = rule.clone();
    changed[0] = "carol".to_string();
    adapter.update_policy("p", "p", &rule, &changed).await.unwrap();
    adapter.remove_policy("p", "p", &changed).await.unwrap();
    assert!(store.is_empty().await);
    adapter.close().await.unwrap();
}

#[tokio::test]
async fn test_save_after_load_preserves_stored_fields() {
    let (mut adapter, store) = open(AdapterOptions::default()).await;
    adapter
        .add_policy("p", "p", &strings(&["alice", "data1,data2", "read"]))
        .await
        .unwrap();
    let before = store.documents().await;

    let mut model = MemoryModel::new();
    adapter.load_policy(&mut model).await.unwrap();
    adapter.save_policy(&model).await.unwrap();

    let after = store.documents().await;
    assert_eq!(after.len(), 1);
    assert_eq!(after[0]["v1"], before[0]["v1"]);
    assert_eq!(after[0]["v2"], "read");
    assert_eq!(after[0]["v3"], "");
    adapter.close().await.unwrap();
}

fn field_value() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        "[a-z0-9_]{1,8}",
        "[ ,a-zé日#]{1,8}",
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_add_then_load_returns_the_stored_rule(
        fields in prop::collection::vec(field_value(), 0..=6)
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let loaded = runtime.block_on(async {
            let (mut adapter, _store) = open(AdapterOptions::default()).await;
            adapter.add_policy("p", "p", &fields).await.unwrap();

            let mut model = MemoryModel::new();
            adapter.load_policy(&mut model).await.unwrap();
            adapter.close().await.unwrap();
            model.get_policy("p", "p").to_vec()
        });

        let len = fields.iter().rposition(|f| !f.is_empty()).map_or(0, |i| i + 1);
        let expected: Vec<Vec<String>> = if len == 0 {
            Vec::new()
        } else {
            vec![fields[..len].to_vec()]
        };
        prop_assert_eq!(loaded, expected);
    }
}
