//! Drives a few transactions against the in-memory stores and prints every
//! bridge event as one JSON line.

mod logging;

use std::{process, sync::Arc, time::Duration};

use tokio::time::timeout;
use tracing::{error, info};
use txbridge_core::{
    BackendTarget, BridgeCommand, BridgeEvent, DocumentData, EventStream, FieldOperation,
    NativeLeaf, SetOptions, StoreKind, TaggedValue, TransactionCommand, TransactionEvent,
    TransactionEventKind, TreeNode,
};
use txbridge_runtime::{BridgeConfig, RuntimeHandle, spawn_runtime};
use txbridge_store::InMemoryStoreProvider;

const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    logging::init();

    let config = match BridgeConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Invalid configuration: {err}");
            process::exit(2);
        }
    };

    let provider = Arc::new(InMemoryStoreProvider::new(config.store_limits()));
    let target = BackendTarget::default();
    if let Err(err) = seed(&provider, &target) {
        eprintln!("Failed to seed in-memory stores: {err}");
        process::exit(1);
    }

    let handle = spawn_runtime(&config, provider);
    let mut events = handle.subscribe();

    let result = run(&handle, &mut events, &target).await;
    handle.shutdown().await;
    if let Err(message) = result {
        error!(%message, "smoke run failed");
        process::exit(1);
    }
    info!("smoke run finished");
}

fn seed(
    provider: &InMemoryStoreProvider,
    target: &BackendTarget,
) -> Result<(), txbridge_store::StoreError> {
    provider.tree(target)?.set(
        "counters/visits",
        TreeNode::leaf(NativeLeaf::Long(41)),
    )?;
    provider.documents(target)?.set_document(
        "counters/likes",
        DocumentData::from([("count".to_owned(), TaggedValue::Integer(9))]),
    )?;
    Ok(())
}

async fn run(
    handle: &RuntimeHandle,
    events: &mut EventStream,
    target: &BackendTarget,
) -> Result<(), String> {
    // Tree commit: increment the value the worker publishes.
    handle
        .call(BridgeCommand::BeginTreeTransaction {
            session_id: "tree-commit".into(),
            target: target.clone(),
            path: "counters/visits".into(),
            apply_locally: false,
        })
        .await
        .map_err(|err| err.to_string())?;
    let current = match next_transaction(events).await?.kind {
        TransactionEventKind::Update { value: Some(value) } => value,
        other => return Err(format!("expected tree update, got {other:?}")),
    };
    let next = match current {
        TaggedValue::Integer(count) => TaggedValue::Integer(count + 1),
        _ => TaggedValue::Integer(1),
    };
    submit_verdict(handle, "tree-commit", next, false).await?;
    next_transaction(events).await?;

    // Tree abort.
    handle
        .call(BridgeCommand::BeginTreeTransaction {
            session_id: "tree-abort".into(),
            target: target.clone(),
            path: "counters/visits".into(),
            apply_locally: false,
        })
        .await
        .map_err(|err| err.to_string())?;
    next_transaction(events).await?;
    submit_verdict(handle, "tree-abort", TaggedValue::Null, true).await?;
    next_transaction(events).await?;

    // Document buffer: read, then increment and tag in one transaction.
    handle
        .call(BridgeCommand::BeginDocumentTransaction {
            session_id: "document-buffer".into(),
            target: target.clone(),
        })
        .await
        .map_err(|err| err.to_string())?;
    next_transaction(events).await?;
    let reply = handle
        .call(BridgeCommand::GetDocument {
            session_id: "document-buffer".into(),
            path: "counters/likes".into(),
        })
        .await
        .map_err(|err| err.to_string())?;
    print_json(&reply);

    let increment = DocumentData::from([(
        "count".to_owned(),
        TaggedValue::FieldOp(FieldOperation::Increment(1.0)),
    )]);
    let audit = DocumentData::from([
        ("counter".to_owned(), TaggedValue::Reference("counters/likes".into())),
        ("at".to_owned(), TaggedValue::FieldOp(FieldOperation::ServerTimestamp)),
    ]);
    handle
        .call(BridgeCommand::ApplyDocumentBuffer {
            session_id: "document-buffer".into(),
            commands: vec![
                TransactionCommand::update("counters/likes", &increment),
                TransactionCommand::set("audit/last", &audit, SetOptions { merge: true }),
            ],
        })
        .await
        .map_err(|err| err.to_string())?;
    next_transaction(events).await?;

    handle
        .call(BridgeCommand::DisposeTransaction {
            store: StoreKind::Document,
            session_id: "document-buffer".into(),
        })
        .await
        .map_err(|err| err.to_string())?;
    info!("dispose after completion is a no-op");
    Ok(())
}

async fn submit_verdict(
    handle: &RuntimeHandle,
    session_id: &str,
    value: TaggedValue,
    abort: bool,
) -> Result<(), String> {
    handle
        .send(BridgeCommand::SubmitTreeVerdict {
            session_id: session_id.to_owned(),
            value,
            abort,
        })
        .await
        .map_err(|err| err.to_string())
}

async fn next_transaction(events: &mut EventStream) -> Result<TransactionEvent, String> {
    let event = timeout(EVENT_TIMEOUT, events.recv())
        .await
        .map_err(|_| "timed out waiting for a bridge event".to_owned())?
        .map_err(|err| err.to_string())?;
    print_json(&event);

    match event {
        BridgeEvent::Transaction(event) => Ok(event),
        BridgeEvent::CommandFailed { code, message, .. } => {
            Err(format!("command failed: {code}: {message}"))
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{line}"),
        Err(err) => error!(%err, "failed to serialize bridge output"),
    }
}
