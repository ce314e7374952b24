use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard},
    thread,
};

use tracing::{debug, warn};
use txbridge_core::{
    DocumentData, DocumentSnapshot, FieldOperation, RetryPolicy, SetOptions, StoreKind,
    TaggedValue, Timestamp,
};

use crate::{DocumentStore, DocumentTransaction, DocumentTransactionFn, StoreError, StoreErrorCode};

#[derive(Debug, Default)]
struct DocumentState {
    documents: BTreeMap<String, DocumentData>,
    /// Bumped on every write, including deletes, so a re-created document
    /// never matches a stale read.
    versions: HashMap<String, u64>,
}

impl DocumentState {
    fn version(&self, path: &str) -> u64 {
        self.versions.get(path).copied().unwrap_or(0)
    }
}

fn lock_state(state: &Mutex<DocumentState>) -> Result<MutexGuard<'_, DocumentState>, StoreError> {
    state
        .lock()
        .map_err(|_| StoreError::poisoned(StoreKind::Document))
}

/// In-memory document store with read-version validated commits.
#[derive(Debug)]
pub struct InMemoryDocumentStore {
    state: Arc<Mutex<DocumentState>>,
    retry: RetryPolicy,
}

impl InMemoryDocumentStore {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            state: Arc::new(Mutex::new(DocumentState::default())),
            retry,
        }
    }

    /// Write outside any transaction.
    pub fn set_document(&self, path: &str, data: DocumentData) -> Result<(), StoreError> {
        let path = normalize(path);
        let mut state = lock_state(&self.state)?;
        state.documents.insert(path.clone(), data);
        *state.versions.entry(path).or_default() += 1;
        Ok(())
    }

    pub fn document(&self, path: &str) -> Result<Option<DocumentData>, StoreError> {
        Ok(lock_state(&self.state)?.documents.get(&normalize(path)).cloned())
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn run_transaction(&self, function: &mut DocumentTransactionFn<'_>) -> Result<(), StoreError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let transaction = Arc::new(InMemoryDocumentTransaction::new(Arc::clone(&self.state)));

            let result = function(Arc::clone(&transaction) as Arc<dyn DocumentTransaction>);
            let outcome = match result {
                Ok(()) => transaction.commit(),
                Err(error) => {
                    transaction.finish();
                    debug!(
                        attempt,
                        code = %error.wire_code(),
                        "document transaction function failed"
                    );
                    return Err(error);
                }
            };

            match outcome {
                Ok(()) => return Ok(()),
                Err(CommitError::Conflict) if self.retry.allows_retry_after(attempt) => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "document transaction conflicted; retrying"
                    );
                    thread::sleep(delay);
                }
                Err(CommitError::Conflict) => {
                    warn!(attempt, "document transaction exhausted its attempts");
                    return Err(StoreError::document(
                        StoreErrorCode::Aborted,
                        "The transaction was aborted due to contention after too many attempts.",
                    ));
                }
                Err(CommitError::Store(error)) => return Err(error),
            }
        }
    }
}

#[derive(Debug)]
enum CommitError {
    Conflict,
    Store(StoreError),
}

impl From<StoreError> for CommitError {
    fn from(error: StoreError) -> Self {
        Self::Store(error)
    }
}

#[derive(Debug, Clone)]
enum BufferedWrite {
    Set {
        path: String,
        data: DocumentData,
        options: SetOptions,
    },
    Update {
        path: String,
        data: DocumentData,
    },
    Delete {
        path: String,
    },
}

#[derive(Debug, Default)]
struct AttemptState {
    reads: HashMap<String, u64>,
    writes: Vec<BufferedWrite>,
    finished: bool,
}

/// One attempt: records read versions and buffers writes until commit.
#[derive(Debug)]
struct InMemoryDocumentTransaction {
    store: Arc<Mutex<DocumentState>>,
    attempt: Mutex<AttemptState>,
}

impl InMemoryDocumentTransaction {
    fn new(store: Arc<Mutex<DocumentState>>) -> Self {
        Self {
            store,
            attempt: Mutex::new(AttemptState::default()),
        }
    }

    fn lock_attempt(&self) -> Result<MutexGuard<'_, AttemptState>, StoreError> {
        self.attempt
            .lock()
            .map_err(|_| StoreError::poisoned(StoreKind::Document))
    }

    fn finish(&self) {
        if let Ok(mut attempt) = self.lock_attempt() {
            attempt.finished = true;
        }
    }

    fn push_write(&self, write: BufferedWrite) -> Result<(), StoreError> {
        let mut attempt = self.lock_attempt()?;
        ensure_open(&attempt)?;
        attempt.writes.push(write);
        Ok(())
    }

    /// Validate reads and apply all buffered writes atomically.
    fn commit(&self) -> Result<(), CommitError> {
        let mut attempt = self.lock_attempt()?;
        ensure_open(&attempt)?;
        attempt.finished = true;

        let mut store = lock_state(&self.store)?;
        for (path, read_version) in &attempt.reads {
            if store.version(path) != *read_version {
                debug!(path = %path, "document changed after it was read");
                return Err(CommitError::Conflict);
            }
        }

        let now = Timestamp::now();
        let mut staged: BTreeMap<String, Option<DocumentData>> = BTreeMap::new();
        for write in &attempt.writes {
            let (path, next) = match write {
                BufferedWrite::Set {
                    path,
                    data,
                    options,
                } => {
                    let base = if options.merge {
                        current(&store, &staged, path)
                    } else {
                        None
                    };
                    (path, Some(apply_set(base, data, options.merge, now)))
                }
                BufferedWrite::Update { path, data } => {
                    let Some(base) = current(&store, &staged, path) else {
                        return Err(CommitError::Store(StoreError::document(
                            StoreErrorCode::NotFound,
                            format!("No document to update: {path}"),
                        )));
                    };
                    (path, Some(apply_update(base, data, now)))
                }
                BufferedWrite::Delete { path } => (path, None),
            };
            staged.insert(path.clone(), next);
        }

        for (path, next) in staged {
            match next {
                Some(data) => {
                    store.documents.insert(path.clone(), data);
                }
                None => {
                    store.documents.remove(&path);
                }
            }
            *store.versions.entry(path).or_default() += 1;
        }
        Ok(())
    }
}

impl DocumentTransaction for InMemoryDocumentTransaction {
    fn get(&self, path: &str) -> Result<DocumentSnapshot, StoreError> {
        let path = normalize(path);
        let mut attempt = self.lock_attempt()?;
        ensure_open(&attempt)?;
        if !attempt.writes.is_empty() {
            return Err(StoreError::document(
                StoreErrorCode::InvalidArgument,
                "Transactions require all reads to be executed before all writes.",
            ));
        }

        let store = lock_state(&self.store)?;
        attempt.reads.insert(path.clone(), store.version(&path));
        Ok(match store.documents.get(&path) {
            Some(data) => DocumentSnapshot::found(path, data.clone()),
            None => DocumentSnapshot::missing(path),
        })
    }

    fn set(&self, path: &str, data: DocumentData, options: SetOptions) -> Result<(), StoreError> {
        self.push_write(BufferedWrite::Set {
            path: normalize(path),
            data,
            options,
        })
    }

    fn update(&self, path: &str, data: DocumentData) -> Result<(), StoreError> {
        self.push_write(BufferedWrite::Update {
            path: normalize(path),
            data,
        })
    }

    fn delete(&self, path: &str) -> Result<(), StoreError> {
        self.push_write(BufferedWrite::Delete {
            path: normalize(path),
        })
    }
}

fn ensure_open(attempt: &AttemptState) -> Result<(), StoreError> {
    if attempt.finished {
        return Err(StoreError::document(
            StoreErrorCode::FailedPrecondition,
            "The transaction has already completed.",
        ));
    }
    Ok(())
}

fn normalize(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

fn current(
    store: &DocumentState,
    staged: &BTreeMap<String, Option<DocumentData>>,
    path: &str,
) -> Option<DocumentData> {
    match staged.get(path) {
        Some(next) => next.clone(),
        None => store.documents.get(path).cloned(),
    }
}

fn apply_set(
    base: Option<DocumentData>,
    data: &DocumentData,
    merge: bool,
    now: Timestamp,
) -> DocumentData {
    let mut document = base.unwrap_or_default();
    merge_fields(&mut document, data, merge, now);
    document
}

/// Keys are dotted field paths; each one replaces the value at that path.
fn apply_update(mut document: DocumentData, data: &DocumentData, now: Timestamp) -> DocumentData {
    for (field_path, value) in data {
        let segments: Vec<&str> = field_path.split('.').collect();
        update_field(&mut document, &segments, value, now);
    }
    document
}

fn update_field(fields: &mut DocumentData, segments: &[&str], value: &TaggedValue, now: Timestamp) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    if rest.is_empty() {
        match resolve(fields.get(*head), value, false, now) {
            Some(next) => {
                fields.insert((*head).to_owned(), next);
            }
            None => {
                fields.remove(*head);
            }
        }
        return;
    }

    let child = fields
        .entry((*head).to_owned())
        .or_insert_with(|| TaggedValue::Map(BTreeMap::new()));
    if !matches!(child, TaggedValue::Map(_)) {
        *child = TaggedValue::Map(BTreeMap::new());
    }
    if let TaggedValue::Map(nested) = child {
        update_field(nested, rest, value, now);
    }
}

fn merge_fields(target: &mut DocumentData, incoming: &DocumentData, merge: bool, now: Timestamp) {
    for (key, value) in incoming {
        match resolve(target.get(key), value, merge, now) {
            Some(next) => {
                target.insert(key.clone(), next);
            }
            None => {
                target.remove(key);
            }
        }
    }
}

/// Resolve an incoming field against the stored one. `None` deletes the field.
fn resolve(
    existing: Option<&TaggedValue>,
    incoming: &TaggedValue,
    merge: bool,
    now: Timestamp,
) -> Option<TaggedValue> {
    match incoming {
        TaggedValue::FieldOp(operation) => apply_operation(existing, operation, now),
        TaggedValue::Map(entries) => {
            let mut base = match (merge, existing) {
                (true, Some(TaggedValue::Map(current))) => current.clone(),
                _ => BTreeMap::new(),
            };
            merge_fields(&mut base, entries, merge, now);
            Some(TaggedValue::Map(base))
        }
        other => Some(other.clone()),
    }
}

fn apply_operation(
    existing: Option<&TaggedValue>,
    operation: &FieldOperation,
    now: Timestamp,
) -> Option<TaggedValue> {
    match operation {
        FieldOperation::Delete => None,
        FieldOperation::ServerTimestamp => Some(TaggedValue::Timestamp(now)),
        FieldOperation::Increment(amount) => Some(increment(existing, *amount)),
        FieldOperation::ArrayUnion(items) => {
            let mut list = existing_list(existing);
            for item in items {
                if !list.contains(item) {
                    list.push(item.clone());
                }
            }
            Some(TaggedValue::List(list))
        }
        FieldOperation::ArrayRemove(items) => {
            let mut list = existing_list(existing);
            list.retain(|item| !items.contains(item));
            Some(TaggedValue::List(list))
        }
    }
}

fn increment(existing: Option<&TaggedValue>, amount: f64) -> TaggedValue {
    let integral = amount.fract() == 0.0 && amount.abs() < i64::MAX as f64;
    match existing {
        Some(TaggedValue::Integer(value)) if integral => {
            TaggedValue::Integer(value.saturating_add(amount as i64))
        }
        Some(TaggedValue::Integer(value)) => TaggedValue::Double(*value as f64 + amount),
        Some(TaggedValue::Double(value)) => TaggedValue::Double(value + amount),
        _ if integral => TaggedValue::Integer(amount as i64),
        _ => TaggedValue::Double(amount),
    }
}

fn existing_list(existing: Option<&TaggedValue>) -> Vec<TaggedValue> {
    match existing {
        Some(TaggedValue::List(items)) => items.clone(),
        _ => Vec::new(),
    }
}
