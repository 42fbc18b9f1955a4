use std::collections::HashSet;
use std::time::Duration;

use futures_util::future::join_all;
use proptest::prelude::*;
use serde_json::json;

use super::*;
use crate::memory::MemoryDriver;

fn tree() -> SessionTree<MemoryDriver> {
	SessionTree::new(MemoryDriver::default(), TreeOptions::default()).unwrap()
}

async fn chain(tree: &SessionTree<MemoryDriver>) -> (String, String, String) {
	let t = tree.create_top(json!({})).await.unwrap().id;
	let c = tree.create_child(&t, json!({})).await.unwrap().id;
	let s = tree.create_child(&c, json!({})).await.unwrap().id;
	(t, c, s)
}

fn all_ids(nodes: &[TreeNode], out: &mut Vec<(String, Option<String>)>) {
	for node in nodes {
		out.push((node.info.id.clone(), node.info.parent_id.clone()));
		all_ids(&node.children, out);
	}
}

#[tokio::test]
async fn test_close_top_cascades_deepest_first() {
	let tree = tree();
	let (t, c, s) = chain(&tree).await;
	assert_eq!((t.as_str(), c.as_str(), s.as_str()), ("instance-1", "context-2", "surface-3"));

	let report = tree.close(&t).await.unwrap();
	assert_eq!(report.closed_ids, vec![s.clone(), c, t]);
	assert!(report.failures.is_empty());
	assert!(tree.get(&s).unwrap_err().is_not_found());
	assert!(tree.is_empty());
}

#[tokio::test]
async fn test_close_unknown_is_not_found_and_changes_nothing() {
	let tree = tree();
	chain(&tree).await;
	let before = tree.list();

	let err = tree.close("surface-99").await.unwrap_err();
	assert!(matches!(err, Error::NotFound { ref id } if id == "surface-99"));
	assert_eq!(tree.list(), before);
}

#[tokio::test]
async fn test_double_close_reports_not_found() {
	let tree = tree();
	let (t, _, _) = chain(&tree).await;
	let first = tree.close(&t);
	let second = tree.close(&t);
	assert!(first.await.is_ok());
	assert!(matches!(second.await, Err(Error::NotFound { .. })));
}

#[tokio::test]
async fn test_create_child_with_unknown_parent_registers_nothing() {
	let tree = tree();
	let err = tree.create_child("context-5", json!({})).await.unwrap_err();
	assert!(matches!(err, Error::ParentNotFound { ref id } if id == "context-5"));
	assert_eq!(err.code(), tether_protocol::ErrorCode::NotFound);
	assert!(tree.is_empty());
}

#[tokio::test]
async fn test_leaf_level_cannot_have_children() {
	let tree = tree();
	let (_, _, s) = chain(&tree).await;
	let err = tree.create_child(&s, json!({})).await.unwrap_err();
	assert!(matches!(err, Error::NoChildLevel { ref kind } if kind == "surface"));
	assert_eq!(tree.len(), 3);
}

#[tokio::test]
async fn test_failed_spawn_registers_nothing() {
	let tree = tree();
	let err = tree.create_top(json!({ "fail": "engine missing" })).await.unwrap_err();
	assert!(matches!(err, Error::Driver(_)));
	assert!(tree.is_empty());
}

#[tokio::test]
async fn test_child_close_failure_does_not_abort_cascade() {
	let tree = tree();
	let t = tree.create_top(json!({})).await.unwrap().id;
	let bad = tree
		.create_child(&t, json!({ "failOnClose": true }))
		.await
		.unwrap()
		.id;
	let good = tree.create_child(&t, json!({})).await.unwrap().id;

	let report = tree.close(&t).await.unwrap();
	assert_eq!(report.closed_ids, vec![bad.clone(), good, t]);
	assert_eq!(report.failures.len(), 1);
	assert_eq!(report.failures[0].id, bad);
	assert!(tree.is_empty());
}

#[tokio::test]
async fn test_closing_child_leaves_parent() {
	let tree = tree();
	let (t, c, s) = chain(&tree).await;
	let report = tree.close(&c).await.unwrap();
	assert_eq!(report.closed_ids, vec![s, c]);
	assert_eq!(tree.list().len(), 1);
	assert!(tree.list()[0].children.is_empty());
	assert!(tree.get(&t).is_ok());
}

#[tokio::test]
async fn test_invoke_after_close_is_not_found() {
	let tree = tree();
	let (t, _, s) = chain(&tree).await;
	tree.close(&t).await.unwrap();
	let err = tree.invoke(&s, "write", json!({ "text": "hi" })).await.unwrap_err();
	assert!(matches!(err, Error::NotFound { ref id } if *id == s));
}

#[tokio::test]
async fn test_invoke_queued_behind_close_sees_not_found() {
	let tree = tree();
	let (t, _, s) = chain(&tree).await;

	let close = tree.close(&t);
	let write = tree.invoke(&s, "write", json!({ "text": "late" }));
	let (written, closed) = tokio::join!(write, close);

	assert!(written.unwrap_err().is_not_found());
	assert_eq!(closed.unwrap().closed_ids.len(), 3);
}

#[tokio::test]
async fn test_create_child_queued_behind_close_is_parent_not_found() {
	let tree = tree();
	let t = tree.create_top(json!({})).await.unwrap().id;

	let close = tree.close(&t);
	let create = tree.create_child(&t, json!({}));
	let (created, closed) = tokio::join!(create, close);

	assert!(matches!(created, Err(Error::ParentNotFound { .. })));
	assert!(closed.is_ok());
	assert!(tree.is_empty());
}

#[tokio::test]
async fn test_child_created_while_close_waits_is_swept() {
	let tree = tree();
	let t = tree.create_top(json!({})).await.unwrap().id;

	let create = tree.create_child(&t, json!({}));
	let close = tree.close(&t);
	let (closed, created) = tokio::join!(close, create);

	let child = created.unwrap().id;
	assert!(closed.unwrap().closed_ids.contains(&child));
	assert!(tree.is_empty());
}

#[tokio::test]
async fn test_descendant_close_during_ancestor_cascade_fails_fast() {
	let tree = tree();
	let (t, c, s1) = chain(&tree).await;

	let slow = tree.invoke(&s1, "sleep", json!({ "ms": 200 }));
	let create = tree.create_child(&c, json!({}));
	let outer = tokio::spawn(tree.close(&t));
	let slow = tokio::spawn(slow);

	// The child lands inside a subtree that is already closing.
	let created = create.await.unwrap().id;
	assert_eq!(created, "surface-4");
	let inner = tree.close(&c);

	let (outer, inner) = tokio::time::timeout(Duration::from_secs(3), async move {
		(outer.await.unwrap(), inner.await)
	})
	.await
	.expect("overlapping closes must both answer");

	assert!(inner.unwrap_err().is_not_found());
	let report = outer.unwrap();
	assert_eq!(report.closed_ids, vec![s1, created, c, t]);
	assert!(slow.await.unwrap().is_ok());
	assert!(tree.is_empty());
}

#[tokio::test]
async fn test_ancestor_close_waits_for_descendant_cascade() {
	let tree = tree();
	let (t, c, s1) = chain(&tree).await;

	let slow = tree.invoke(&s1, "sleep", json!({ "ms": 100 }));
	let create = tree.create_child(&c, json!({}));
	let inner = tree.close(&c);
	let outer = tree.close(&t);

	let (slow, created, inner, outer) = tokio::time::timeout(Duration::from_secs(3), async move {
		tokio::join!(slow, create, inner, outer)
	})
	.await
	.expect("nested closes must both answer");

	assert!(slow.is_ok());
	let created = created.unwrap().id;
	assert_eq!(inner.unwrap().closed_ids, vec![s1, created, c]);
	assert_eq!(outer.unwrap().closed_ids, vec![t]);
	assert!(tree.is_empty());
}

#[tokio::test]
async fn test_work_on_closing_entries_fails_fast() {
	let tree = tree();
	let (t, c, s) = chain(&tree).await;

	let slow = tree.invoke(&s, "sleep", json!({ "ms": 100 }));
	let close = tree.close(&t);

	let rejected = tokio::time::timeout(Duration::from_millis(50), async {
		(
			tree.invoke(&s, "write", json!({ "text": "late" })).await,
			tree.create_child(&c, json!({})).await,
			tree.close(&s).await,
		)
	})
	.await
	.expect("work on a closing subtree should not queue");

	assert!(matches!(rejected.0, Err(Error::NotFound { .. })));
	assert!(matches!(rejected.1, Err(Error::ParentNotFound { .. })));
	assert!(matches!(rejected.2, Err(Error::NotFound { .. })));
	assert!(tree.get(&s).is_ok());

	let (slow, closed) = tokio::join!(slow, close);
	assert!(slow.is_ok());
	assert_eq!(closed.unwrap().closed_ids.len(), 3);
}

#[tokio::test]
async fn test_dropped_close_releases_its_claim() {
	let tree = tree();
	let (t, _, s) = chain(&tree).await;

	drop(tree.close(&t));
	tree.invoke(&s, "write", json!({ "text": "still here" }))
		.await
		.unwrap();

	let report = tree.close(&t).await.unwrap();
	assert_eq!(report.closed_ids.len(), 3);
}

#[tokio::test]
async fn test_close_all_waits_for_running_cascade() {
	let tree = tree();
	let (t, _, s) = chain(&tree).await;

	let slow = tree.invoke(&s, "sleep", json!({ "ms": 50 }));
	let close = tree.close(&t);
	let (_, closed, report) = tokio::join!(slow, close, tree.close_all());

	assert_eq!(closed.unwrap().closed_ids.len(), 3);
	assert!(report.clean());
	assert!(report.closed_ids.is_empty());
	assert!(tree.is_empty());
}

#[tokio::test]
async fn test_same_id_operations_run_in_call_order() {
	let tree = tree();
	let (_, _, s) = chain(&tree).await;

	let calls = vec![
		tree.invoke(&s, "sleep", json!({ "ms": 40 })),
		tree.invoke(&s, "write", json!({ "text": "a" })),
		tree.invoke(&s, "sleep", json!({ "ms": 10 })),
		tree.invoke(&s, "write", json!({ "text": "b" })),
		tree.invoke(&s, "read", json!({})),
	];
	let results = join_all(calls.into_iter().rev()).await;
	assert_eq!(results[0].as_ref().unwrap(), &json!({ "text": "ab" }));
}

#[tokio::test]
async fn test_unrelated_ids_do_not_wait_on_each_other() {
	let tree = tree();
	let (_, c, s1) = chain(&tree).await;
	let s2 = tree.create_child(&c, json!({})).await.unwrap().id;

	let slow = tokio::spawn(tree.invoke(&s1, "sleep", json!({ "ms": 500 })));
	tokio::time::timeout(
		Duration::from_millis(200),
		tree.invoke(&s2, "write", json!({ "text": "fast" })),
	)
	.await
	.expect("sibling should not be blocked")
	.unwrap();
	slow.abort();
}

#[tokio::test]
async fn test_invoke_merges_metadata() {
	let tree = tree();
	let (_, _, s) = chain(&tree).await;
	tree.invoke(&s, "navigate", json!({ "url": "https://example.com" }))
		.await
		.unwrap();
	assert_eq!(tree.get(&s).unwrap().metadata["url"], "https://example.com");
}

#[tokio::test]
async fn test_operation_timeout_is_distinct_error() {
	let options = TreeOptions {
		operation_timeout: Some(Duration::from_millis(30)),
	};
	let tree = SessionTree::new(MemoryDriver::default(), options).unwrap();
	let t = tree.create_top(json!({})).await.unwrap().id;

	let err = tree.invoke(&t, "sleep", json!({ "ms": 2000 })).await.unwrap_err();
	assert!(err.is_timeout());
	assert!(tree.get(&t).is_ok());
}

#[tokio::test]
async fn test_query_runs_while_entries_are_busy() {
	let tree = tree();
	let (_, _, s) = chain(&tree).await;

	let slow = tree.invoke(&s, "sleep", json!({ "ms": 500 }));
	let status = tokio::time::timeout(Duration::from_millis(100), tree.query("status", json!({})))
		.await
		.expect("queries do not wait for turns")
		.unwrap();
	assert_eq!(status["driver"], "memory");
	assert!(matches!(
		tree.query("nope", json!({})).await,
		Err(Error::Unsupported { ref op }) if op == "nope"
	));
	drop(slow);
}

#[tokio::test]
async fn test_list_is_nested() {
	let tree = tree();
	let (t, c, s) = chain(&tree).await;
	let t2 = tree.create_top(json!({ "label": "second" })).await.unwrap().id;

	let forest = tree.list();
	assert_eq!(forest.len(), 2);
	assert_eq!(forest[0].info.id, t);
	assert_eq!(forest[0].children[0].info.id, c);
	assert_eq!(forest[0].children[0].children[0].info.id, s);
	assert_eq!(forest[1].info.id, t2);
	assert_eq!(forest[1].info.metadata["label"], "second");

	let value = serde_json::to_value(&forest).unwrap();
	assert_eq!(value[0]["children"][0]["parentId"], json!(t));
}

#[tokio::test]
async fn test_close_all_reports_failed_tops() {
	let tree = tree();
	chain(&tree).await;
	let stubborn = tree
		.create_top(json!({ "failOnClose": true }))
		.await
		.unwrap()
		.id;

	let report = tree.close_all().await;
	assert!(!report.clean());
	assert_eq!(report.failed.len(), 1);
	assert_eq!(report.failed[0].id, stubborn);
	assert_eq!(report.closed_ids.len(), 4);
	assert!(tree.is_empty());
}

#[tokio::test]
async fn test_close_all_on_empty_tree_is_clean() {
	assert!(tree().close_all().await.clean());
}

#[tokio::test]
async fn test_single_level_hierarchy() {
	let tree = SessionTree::new(MemoryDriver::new(["instance"]), TreeOptions::default()).unwrap();
	let t = tree.create_top(json!({})).await.unwrap().id;
	assert!(matches!(
		tree.create_child(&t, json!({})).await,
		Err(Error::NoChildLevel { .. })
	));
	assert_eq!(tree.close(&t).await.unwrap().closed_ids, vec![t]);
}

#[test]
fn test_rejects_deep_hierarchy() {
	let driver = MemoryDriver::new(["a", "b", "c", "d"]);
	assert!(matches!(
		SessionTree::new(driver, TreeOptions::default()),
		Err(Error::InvalidHierarchy(_))
	));
}

#[derive(Debug, Clone)]
enum Step {
	Top,
	Child(usize),
	Close(usize),
	Sleep(usize, u64),
}

fn arb_step() -> impl Strategy<Value = Step> {
	prop_oneof![
		1 => Just(Step::Top),
		3 => any::<usize>().prop_map(Step::Child),
		2 => any::<usize>().prop_map(Step::Close),
		2 => (any::<usize>(), 0u64..15).prop_map(|(i, ms)| Step::Sleep(i, ms)),
	]
}

fn live_ids(tree: &SessionTree<MemoryDriver>) -> Vec<(String, Option<String>)> {
	let mut out = Vec::new();
	all_ids(&tree.list(), &mut out);
	out
}

enum Done {
	Created(String),
	Closed(Vec<String>),
	Other,
}

/// Runs one step after `delay_ms`, picking its target from the tree as it
/// is at that moment.
async fn run_step(tree: SessionTree<MemoryDriver>, step: Step, delay_ms: u64) -> Result<Done> {
	tokio::time::sleep(Duration::from_millis(delay_ms)).await;
	let live = live_ids(&tree);
	let pick = |i: usize| live.get(i % live.len().max(1)).map(|(id, _)| id.clone());

	match step {
		Step::Top => {
			let info = tree.create_top(json!({})).await?;
			Ok(Done::Created(info.id))
		}
		Step::Child(i) => match pick(i) {
			Some(parent) => match tree.create_child(&parent, json!({})).await {
				Ok(info) => {
					assert_eq!(info.parent_id.as_deref(), Some(parent.as_str()));
					Ok(Done::Created(info.id))
				}
				Err(Error::NoChildLevel { .. }) => Ok(Done::Other),
				Err(err) => Err(err),
			},
			None => Ok(Done::Other),
		},
		Step::Close(i) => match pick(i) {
			Some(id) => Ok(Done::Closed(tree.close(&id).await?.closed_ids)),
			None => Ok(Done::Other),
		},
		Step::Sleep(i, ms) => match pick(i) {
			Some(id) => tree.invoke(&id, "sleep", json!({ "ms": ms })).await.map(|_| Done::Other),
			None => Ok(Done::Other),
		},
	}
}

proptest! {
	#![proptest_config(ProptestConfig::with_cases(48))]

	/// Overlapping create/close/invoke rounds always settle and never leave
	/// a dangling parent or a reused id.
	#[test]
	fn test_random_rounds_settle_and_keep_parents_live(
		rounds in prop::collection::vec(
			prop::collection::vec((arb_step(), 0u64..10), 1..5),
			1..10,
		)
	) {
		let runtime = tokio::runtime::Builder::new_current_thread()
			.enable_all()
			.build()
			.unwrap();

		runtime.block_on(async {
			let tree = tree();
			let mut seen: HashSet<String> = HashSet::new();

			for round in rounds {
				let steps = round
					.into_iter()
					.map(|(step, delay)| run_step(tree.clone(), step, delay));
				let settled = tokio::time::timeout(Duration::from_secs(5), join_all(steps)).await;
				prop_assert!(settled.is_ok(), "round did not settle");

				let mut closed = Vec::new();
				for done in settled.unwrap() {
					match done {
						Ok(Done::Created(id)) => {
							prop_assert!(seen.insert(id.clone()), "id {} reused", id);
						}
						Ok(Done::Closed(ids)) => closed.extend(ids),
						Ok(Done::Other) => {}
						Err(err) => {
							prop_assert!(err.is_not_found(), "unexpected error: {}", err);
						}
					}
				}

				let listed = live_ids(&tree);
				let ids: HashSet<_> = listed.iter().map(|(id, _)| id.clone()).collect();
				for (_, parent) in &listed {
					if let Some(parent) = parent {
						prop_assert!(ids.contains(parent), "dangling parent {}", parent);
					}
				}
				for id in &closed {
					prop_assert!(!ids.contains(id), "closed id {} still listed", id);
				}
				prop_assert_eq!(listed.len(), tree.len());
			}
			Ok(())
		})?;
	}
}
