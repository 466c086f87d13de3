//! Reference accounting and diagnostic reference logs.
//!
//! Every strong or weak peer handle created or released anywhere in the
//! process goes through [`ReferenceAccounting`], not only the ones touched by
//! a bridge pass. Counting is lock-free; the optional log sinks take a mutex
//! and are flushed after every entry so the tail survives a crash.
//!
//! Log lines look like:
//!
//! ```text
//! +g+ grefc 3 gwrefc 0 obj-handle 0x11/L -> new-handle 0x12/G from thread 'main'(1)
//! -w- grefc 3 gwrefc 0 handle 0x13/W from thread 'finalizer'(4)
//! ```
//!
//! followed by the origin (a label or a captured call stack), one line at a
//! time.
use crate::{config::BridgeConfig, host::RefKind};
use gcbridge_utils::{
    HostRef,
    sync::{AtomicBool, AtomicI64, Mutex, Ordering},
};
use std::{
    fmt,
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

/// Thread identity attached to every accounting entry.
#[derive(Debug, Clone, Copy)]
pub struct ThreadTag<'a> {
    pub name: &'a str,
    pub id: u64,
}

impl fmt::Display for ThreadTag<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}'({})", self.name, self.id)
    }
}

struct HandleDisplay(Option<HostRef>, RefKind);

impl fmt::Display for HandleDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(h) => write!(f, "{}/{}", h, self.1),
            None => write!(f, "0x0/{}", self.1),
        }
    }
}

/// An append-only log file. Write failures disable the sink after a single
/// warning; they never reach the caller.
pub struct RefLog {
    sink: Mutex<Option<Box<dyn Write + Send>>>,
    failed: AtomicBool,
}

impl fmt::Debug for RefLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefLog")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl RefLog {
    pub fn disabled() -> Self {
        Self {
            sink: Mutex::new(None),
            failed: AtomicBool::new(false),
        }
    }

    pub fn to_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            sink: Mutex::new(Some(writer)),
            failed: AtomicBool::new(false),
        }
    }

    pub fn create(path: &Path) -> Self {
        match File::create(path) {
            Ok(f) => Self::to_writer(Box::new(BufWriter::new(f))),
            Err(e) => {
                tracing::warn!("Failed to create reference log {}: {}", path.display(), e);
                Self::disabled()
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.failed.load(Ordering::Relaxed) && self.sink.lock().is_some()
    }

    fn append(&self, header: &str, origin: &str) {
        if self.failed.load(Ordering::Relaxed) {
            return;
        }
        let mut sink = self.sink.lock();
        let Some(writer) = sink.as_mut() else {
            return;
        };

        let result = (|| {
            writeln!(writer, "{}", header)?;
            for line in origin.lines() {
                writeln!(writer, "{}", line)?;
            }
            writer.flush()
        })();

        if let Err(e) = result {
            tracing::warn!("reference log write failed, disabling it: {}", e);
            self.failed.store(true, Ordering::Relaxed);
            *sink = None;
        }
    }
}

#[derive(Debug)]
pub struct ReferenceAccounting {
    strong: AtomicI64,
    weak: AtomicI64,
    gref_log: RefLog,
    lref_log: RefLog,
    gref_gc_threshold: Option<i64>,
}

impl Default for ReferenceAccounting {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferenceAccounting {
    pub fn new() -> Self {
        Self {
            strong: AtomicI64::new(0),
            weak: AtomicI64::new(0),
            gref_log: RefLog::disabled(),
            lref_log: RefLog::disabled(),
            gref_gc_threshold: None,
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            gref_log: config
                .gref_log
                .as_deref()
                .map_or_else(RefLog::disabled, RefLog::create),
            lref_log: config
                .lref_log
                .as_deref()
                .map_or_else(RefLog::disabled, RefLog::create),
            gref_gc_threshold: config.gref_gc_threshold,
            ..Self::new()
        }
    }

    pub fn with_gref_log(mut self, log: RefLog) -> Self {
        self.gref_log = log;
        self
    }

    pub fn with_lref_log(mut self, log: RefLog) -> Self {
        self.lref_log = log;
        self
    }

    pub fn with_gref_gc_threshold(mut self, threshold: i64) -> Self {
        self.gref_gc_threshold = Some(threshold);
        self
    }

    /// Outstanding strong peer handles.
    pub fn gref_count(&self) -> i64 {
        self.strong.load(Ordering::Relaxed)
    }

    /// Outstanding weak peer handles.
    pub fn weak_gref_count(&self) -> i64 {
        self.weak.load(Ordering::Relaxed)
    }

    /// Whether enough strong handles are outstanding that a managed collection
    /// should be requested.
    pub fn over_gref_threshold(&self) -> bool {
        self.gref_gc_threshold
            .is_some_and(|limit| self.gref_count() > limit)
    }

    fn counter(&self, kind: RefKind) -> Option<&AtomicI64> {
        match kind {
            RefKind::Global => Some(&self.strong),
            RefKind::WeakGlobal => Some(&self.weak),
            RefKind::Local | RefKind::Invalid => None,
        }
    }

    /// Record that `new_handle` of `new_kind` was created from `old_handle`.
    /// Returns the counter value for `new_kind` after the increment.
    pub fn record_promotion(
        &self,
        old_handle: Option<HostRef>,
        old_kind: RefKind,
        new_handle: Option<HostRef>,
        new_kind: RefKind,
        thread: ThreadTag<'_>,
        origin: &str,
    ) -> i64 {
        let count = match self.counter(new_kind) {
            Some(c) => c.fetch_add(1, Ordering::Relaxed) + 1,
            None => 0,
        };

        let tag = if new_kind == RefKind::WeakGlobal {
            "+w+"
        } else {
            "+g+"
        };
        let header = format!(
            "{} grefc {} gwrefc {} obj-handle {} -> new-handle {} from thread {}",
            tag,
            self.gref_count(),
            self.weak_gref_count(),
            HandleDisplay(old_handle, old_kind),
            HandleDisplay(new_handle, new_kind),
            thread
        );
        tracing::trace!(target: "gcbridge::gref", "{}", header);
        self.gref_log.append(&header, origin);
        count
    }

    /// Record that `handle` of `kind` was released. Returns the counter value
    /// for `kind` after the decrement.
    pub fn record_release(
        &self,
        handle: Option<HostRef>,
        kind: RefKind,
        thread: ThreadTag<'_>,
        origin: &str,
    ) -> i64 {
        let count = match self.counter(kind) {
            Some(c) => c.fetch_sub(1, Ordering::Relaxed) - 1,
            None => 0,
        };

        let tag = if kind == RefKind::WeakGlobal {
            "-w-"
        } else {
            "-g-"
        };
        let header = format!(
            "{} grefc {} gwrefc {} handle {} from thread {}",
            tag,
            self.gref_count(),
            self.weak_gref_count(),
            HandleDisplay(handle, kind),
            thread
        );
        tracing::trace!(target: "gcbridge::gref", "{}", header);
        self.gref_log.append(&header, origin);
        count
    }

    /// Log creation of a local handle. Local handles are not counted here;
    /// `lrefc` is the caller's own count for the current frame.
    pub fn record_local_new(
        &self,
        lrefc: i64,
        handle: Option<HostRef>,
        kind: RefKind,
        thread: ThreadTag<'_>,
        origin: &str,
    ) {
        let header = format!(
            "+l+ lrefc {} handle {} from thread {}",
            lrefc,
            HandleDisplay(handle, kind),
            thread
        );
        tracing::trace!(target: "gcbridge::lref", "{}", header);
        self.lref_log.append(&header, origin);
    }

    pub fn record_local_release(
        &self,
        lrefc: i64,
        handle: Option<HostRef>,
        kind: RefKind,
        thread: ThreadTag<'_>,
        origin: &str,
    ) {
        let header = format!(
            "-l- lrefc {} handle {} from thread {}",
            lrefc,
            HandleDisplay(handle, kind),
            thread
        );
        tracing::trace!(target: "gcbridge::lref", "{}", header);
        self.lref_log.append(&header, origin);
    }
}
