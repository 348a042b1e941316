//! Dispatcher end-to-end scenarios: routing, interception, bulk, failures.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use pwmcp_proxy_proto::types::{ChildState, ErrorKind};
use serde_json::json;

use super::helpers::stack;
use crate::testutil::{FakeLauncher, FakeReply};

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn navigate_passes_through_with_routing_params_stripped() {
	let launcher = FakeLauncher::with_script(|method, _| match method {
		"browser_navigate" => Some(FakeReply::Result(json!({"success": true}))),
		_ => None,
	});
	let stack = stack(1, launcher).await;

	let result = stack
		.dispatcher
		.dispatch(
			"browser_navigate",
			json!({"url": "https://example.com", "browser_pool": "default"}),
			&stack.cancel,
		)
		.await
		.unwrap();
	assert_eq!(result, json!({"success": true}));

	// The child saw exactly one request with the url and no routing params.
	assert_eq!(stack.calls_to("browser_navigate"), 1);
	let params = stack.launcher.params_of("browser_navigate").unwrap();
	assert_eq!(params["url"], "https://example.com");
	assert!(params.get("browser_pool").is_none());
	assert!(params.get("browser_instance").is_none());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn screenshot_result_is_blobified() {
	let payload: Vec<u8> = (0..600 * 1024).map(|i| (i % 253) as u8).collect();
	let encoded = BASE64.encode(&payload);
	let launcher = FakeLauncher::with_script(move |method, _| match method {
		"browser_screenshot" => Some(FakeReply::Result(json!({"screenshot": encoded.clone()}))),
		_ => None,
	});
	let stack = stack(1, launcher).await;

	let result = stack
		.dispatcher
		.dispatch("browser_screenshot", json!({}), &stack.cancel)
		.await
		.unwrap();

	let uri = result["screenshot"].as_str().unwrap();
	assert!(uri.starts_with("blob://"));
	assert!(uri.ends_with(".png"));
	assert_eq!(result["screenshot_size_kb"], 600);
	assert_eq!(result["screenshot_mime_type"], "image/png");
	assert!(result["screenshot_expires_at"].is_string());

	let blob_id = uri
		.strip_prefix("blob://")
		.and_then(|s| s.strip_suffix(".png"))
		.unwrap();
	let stored = stack.blobs.get(blob_id).await.unwrap();
	assert_eq!(stored.bytes.len(), 614_400);
	assert_eq!(stored.bytes, payload);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn child_crash_fails_the_call_and_quarantines_the_instance() {
	let launcher = FakeLauncher::with_script(|method, _| match method {
		"browser_crash" => Some(FakeReply::Exit),
		"browser_navigate" => Some(FakeReply::Result(json!({"success": true}))),
		_ => None,
	});
	let stack = stack(2, launcher).await;

	let err = stack
		.dispatcher
		.dispatch("browser_crash", json!({}), &stack.cancel)
		.await
		.unwrap_err();
	assert_eq!(err.kind(), ErrorKind::ChildGone);

	let status = &stack.registry.status(None).unwrap()[0];
	assert_eq!(status.healthy_instances, 1);
	assert_eq!(status.total_instances, 2);
	let failed: Vec<_> = status
		.instances
		.iter()
		.filter(|i| i.state == ChildState::Failed)
		.collect();
	assert_eq!(failed.len(), 1);

	// The surviving instance keeps serving; the failed one is never leased.
	for _ in 0..3 {
		let result = stack
			.dispatcher
			.dispatch("browser_navigate", json!({"url": "https://a"}), &stack.cancel)
			.await
			.unwrap();
		assert_eq!(result["success"], true);
	}
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn remote_error_releases_the_lease() {
	let launcher = FakeLauncher::with_script(|method, _| match method {
		"browser_click" => Some(FakeReply::Error {
			code: -32000,
			message: "no such element".to_string(),
		}),
		"browser_navigate" => Some(FakeReply::Result(json!({"success": true}))),
		_ => None,
	});
	let stack = stack(1, launcher).await;

	let err = stack
		.dispatcher
		.dispatch("browser_click", json!({"selector": "#gone"}), &stack.cancel)
		.await
		.unwrap_err();
	assert_eq!(err.kind(), ErrorKind::RemoteError);

	// The single child was released and serves the next call.
	let result = stack
		.dispatcher
		.dispatch("browser_navigate", json!({"url": "https://a"}), &stack.cancel)
		.await
		.unwrap();
	assert_eq!(result["success"], true);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn cancelled_call_releases_the_lease() {
	let launcher = FakeLauncher::with_script(|method, _| match method {
		"browser_hang" => Some(FakeReply::Ignore),
		"browser_navigate" => Some(FakeReply::Result(json!({"success": true}))),
		_ => None,
	});
	let stack = std::sync::Arc::new(stack(1, launcher).await);

	let dispatch = {
		let stack = stack.clone();
		tokio::spawn(async move {
			stack
				.dispatcher
				.dispatch("browser_hang", json!({}), &stack.cancel)
				.await
		})
	};
	tokio::task::yield_now().await;

	stack.cancel.cancel();
	let result = dispatch.await.unwrap();
	assert_eq!(result.unwrap_err().kind(), ErrorKind::Cancelled);

	// Lease released on the cancellation path too.
	let fresh = tokio_util::sync::CancellationToken::new();
	let result = stack
		.dispatcher
		.dispatch("browser_navigate", json!({"url": "https://a"}), &fresh)
		.await
		.unwrap();
	assert_eq!(result["success"], true);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn bulk_runs_all_commands_under_one_lease() {
	let launcher = FakeLauncher::with_script(|method, _| match method {
		"browser_navigate" => Some(FakeReply::Result(json!({"success": true}))),
		"browser_snapshot" => Some(FakeReply::Result(json!({"snapshot": "- page"}))),
		_ => None,
	});
	let stack = stack(1, launcher).await;

	let result = stack
		.dispatcher
		.dispatch(
			"browser_execute_bulk",
			json!({
				"commands": [
					{"tool": "browser_navigate", "args": {"url": "https://a"}},
					{"tool": "browser_snapshot"},
				],
				"stop_on_error": true,
			}),
			&stack.cancel,
		)
		.await
		.unwrap();

	assert_eq!(result["results"].as_array().unwrap().len(), 2);
	assert!(result["errors"].as_array().unwrap().is_empty());
	assert_eq!(stack.calls_to("browser_navigate"), 1);
	assert_eq!(stack.calls_to("browser_snapshot"), 1);

	// Released exactly once: the only child is idle again.
	let status = &stack.registry.status(None).unwrap()[0];
	assert_eq!(status.instances[0].state, ChildState::Ready);
	assert!(status.instances[0].lease.is_none());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn bulk_stop_on_error_halts_with_partial_results() {
	let launcher = FakeLauncher::with_script(|method, _| match method {
		"browser_boom" => Some(FakeReply::Error {
			code: -32000,
			message: "nope".to_string(),
		}),
		"browser_navigate" => Some(FakeReply::Result(json!({"success": true}))),
		_ => None,
	});
	let stack = stack(1, launcher).await;

	let result = stack
		.dispatcher
		.dispatch(
			"browser_execute_bulk",
			json!({
				"commands": [
					{"tool": "browser_boom"},
					{"tool": "browser_navigate", "args": {"url": "https://a"}},
				],
				"stopOnError": true,
			}),
			&stack.cancel,
		)
		.await
		.unwrap();

	assert!(result["results"].as_array().unwrap().is_empty());
	let errors = result["errors"].as_array().unwrap();
	assert_eq!(errors.len(), 1);
	assert_eq!(errors[0]["index"], 0);
	assert_eq!(errors[0]["kind"], "remote_error");
	// The second command never ran.
	assert_eq!(stack.calls_to("browser_navigate"), 0);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn bulk_without_stop_on_error_accumulates_errors() {
	let launcher = FakeLauncher::with_script(|method, _| match method {
		"browser_boom" => Some(FakeReply::Error {
			code: -32000,
			message: "nope".to_string(),
		}),
		"browser_navigate" => Some(FakeReply::Result(json!({"success": true}))),
		_ => None,
	});
	let stack = stack(1, launcher).await;

	let result = stack
		.dispatcher
		.dispatch(
			"browser_execute_bulk",
			json!({
				"commands": [
					{"tool": "browser_boom"},
					{"tool": "browser_navigate", "args": {"url": "https://a"}},
				],
			}),
			&stack.cancel,
		)
		.await
		.unwrap();

	assert_eq!(result["results"].as_array().unwrap().len(), 1);
	assert_eq!(result["errors"].as_array().unwrap().len(), 1);
	assert_eq!(stack.calls_to("browser_navigate"), 1);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn unknown_pool_is_not_found() {
	let stack = stack(1, FakeLauncher::new()).await;
	let err = stack
		.dispatcher
		.dispatch(
			"browser_navigate",
			json!({"url": "https://a", "browser_pool": "nope"}),
			&stack.cancel,
		)
		.await
		.unwrap_err();
	assert_eq!(err.kind(), ErrorKind::NotFound);

	let payload = err.to_payload();
	assert_eq!(payload["error"]["kind"], "not_found");
	assert!(payload["error"]["message"].is_string());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn pool_status_tool_reports_the_fleet() {
	let stack = stack(2, FakeLauncher::new()).await;

	let result = stack
		.dispatcher
		.dispatch("browser_pool_status", json!({}), &stack.cancel)
		.await
		.unwrap();
	let pools = result["pools"].as_array().unwrap();
	assert_eq!(pools.len(), 1);
	assert_eq!(pools[0]["name"], "default");
	assert_eq!(pools[0]["healthy_instances"], 2);
	assert_eq!(pools[0]["instances"].as_array().unwrap().len(), 2);

	let err = stack
		.dispatcher
		.dispatch(
			"browser_pool_status",
			json!({"pool_name": "missing"}),
			&stack.cancel,
		)
		.await
		.unwrap_err();
	assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn non_object_arguments_are_rejected() {
	let stack = stack(1, FakeLauncher::new()).await;
	let err = stack
		.dispatcher
		.dispatch("browser_navigate", json!("https://a"), &stack.cancel)
		.await
		.unwrap_err();
	assert_eq!(err.kind(), ErrorKind::Internal);
}
