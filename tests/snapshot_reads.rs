//! Snapshot Read Tests
//!
//! Batched snapshot reads pass through the readSnapshots action:
//! - Silent rejections drop documents without surfacing an error
//! - A loud rejection drops its document and fails the call
//! - Documents that do not exist are omitted

use std::collections::HashMap;

use serde_json::json;
use uuid::Uuid;

use quillsync::middleware::{
    actions, HookError, HookFuture, Middleware, Next, Request,
};
use quillsync::{Backend, DocId, OpMetadata, OpRecord};

fn meta(seq: u64) -> OpMetadata {
    OpMetadata::new(Uuid::new_v4(), seq)
}

fn read_request(pairs: &[(&str, &str)]) -> HashMap<String, Vec<String>> {
    let mut request: HashMap<String, Vec<String>> = HashMap::new();
    for (collection, doc) in pairs {
        request
            .entry(collection.to_string())
            .or_default()
            .push(doc.to_string());
    }
    request
}

/// Rejects documents whose name matches, silently or loudly.
struct NameFilter {
    name: &'static str,
    silent: bool,
}

impl Middleware for NameFilter {
    fn handle<'a>(&'a self, request: &'a mut Request, next: Next<'a>) -> HookFuture<'a> {
        Box::pin(async move {
            if let Some(ctx) = request.snapshot_read_mut() {
                let matching: Vec<DocId> = ctx
                    .snapshots
                    .iter()
                    .filter(|(doc, _)| doc.doc == self.name)
                    .map(|(doc, _)| doc.clone())
                    .collect();
                for doc in matching {
                    let error = if self.silent {
                        HookError::silent_rejection()
                    } else {
                        HookError::rejection("no access")
                    };
                    ctx.reject(doc, error);
                }
            }
            next.run(request).await
        })
    }
}

async fn seeded_backend() -> Backend {
    let backend = Backend::new();
    for (i, name) in ["a", "b", "secret"].iter().enumerate() {
        backend
            .submit(
                &DocId::new("notes", *name),
                OpRecord::create(0, "json", json!({"i": i}), meta(i as u64 + 1)),
            )
            .await
            .unwrap();
    }
    backend
}

/// Without middleware, all existing documents come back keyed by
/// collection and name; missing ones are omitted.
#[tokio::test]
async fn test_bulk_read_shape() {
    let backend = seeded_backend().await;

    let result = backend
        .get_snapshots(&read_request(&[
            ("notes", "a"),
            ("notes", "b"),
            ("notes", "missing"),
        ]))
        .await
        .unwrap();

    let notes = &result["notes"];
    assert_eq!(notes.len(), 2);
    assert_eq!(notes["a"].data, Some(json!({"i": 0})));
    assert_eq!(notes["b"].data, Some(json!({"i": 1})));
    assert!(!notes.contains_key("missing"));
}

/// A silent rejection removes its document and the call still
/// succeeds.
#[tokio::test]
async fn test_silent_rejection_drops_document() {
    let backend = seeded_backend().await;
    backend.use_for(
        actions::READ_SNAPSHOTS,
        NameFilter {
            name: "secret",
            silent: true,
        },
    );

    let result = backend
        .get_snapshots(&read_request(&[("notes", "a"), ("notes", "secret")]))
        .await
        .unwrap();

    let notes = &result["notes"];
    assert!(notes.contains_key("a"));
    assert!(!notes.contains_key("secret"));
}

/// A loud rejection surfaces as the call's error.
#[tokio::test]
async fn test_loud_rejection_fails_the_call() {
    let backend = seeded_backend().await;
    backend.use_for(
        actions::READ_SNAPSHOTS,
        NameFilter {
            name: "secret",
            silent: false,
        },
    );

    let err = backend
        .get_snapshots(&read_request(&[("notes", "a"), ("notes", "secret")]))
        .await
        .unwrap_err();
    match err {
        quillsync::SubmitError::Rejected(hook) => {
            assert_eq!(hook.code, "ERR_SNAPSHOT_READ_REJECTED");
            assert_eq!(hook.message, "no access");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}
