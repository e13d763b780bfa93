//! Lifecycle & concurrency glue (spec §2, §4.6, §5, §6): the metadata
//! reader factory, the `Reader`/`VerifiableReader` exposed interfaces, and
//! the close/last-read bookkeeping spec §5 assigns to "Shared-resource
//! policy".

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::barrier::InitBarrier;
use crate::config::{IngestConfig, ReaderConfig};
use crate::error::{CloseErrors, Error};
use crate::file_reader::{LayerReader, ReaderAt};
use crate::gate::VerificationGate;
use crate::kv::store::KvStore;
use crate::metadata::ingest::{ingest_phase1, ingest_tree};
use crate::metadata::reader::MetadataReader;
use crate::metadata::ztoc::Ztoc;
use crate::metrics::{MetricsSink, TelemetryCallback};
use crate::span::{FileExtractor, SectionReader, SpanManager};

/// `new-metadata-reader(kv, sectionReader, extractor, ztoc, opts) →
/// MetadataReader` (spec §6 "Consumed interfaces").
///
/// Runs ingest phase 1 (root + ZTOC record, spec §4.2) synchronously so the
/// returned reader's `root_attr()` fast path is immediately answerable,
/// then hands phases 2 and 3 (tree construction) to a background thread and
/// signals the reader's initialization barrier when they finish. Any query
/// other than `root_attr` blocks on that barrier until ingestion completes
/// (spec §4.3, §5 "Ordering guarantees").
pub fn new_metadata_reader<S>(
    store: Arc<S>,
    section: Arc<dyn SectionReader>,
    extractor: Arc<dyn FileExtractor>,
    ztoc: Ztoc,
    config: IngestConfig,
    reader_config: &ReaderConfig,
    metrics: Arc<dyn MetricsSink>,
    telemetry: Option<Arc<dyn TelemetryCallback>>,
) -> Result<MetadataReader<S>, Error>
where
    S: KvStore + Send + Sync + 'static,
{
    let started = Instant::now();
    let (fs_id, ztoc_id) = ingest_phase1(&*store, &ztoc, &config)?;

    let barrier = Arc::new(InitBarrier::new());
    let reader = MetadataReader::new(Arc::clone(&store), fs_id.clone(), ztoc_id.clone(), Arc::clone(&barrier), section, extractor);

    // SPEC_FULL §0.3: `telemetry_enabled` gates whether the callback is
    // invoked at all, not just whether one was supplied.
    let telemetry_enabled = reader_config.telemetry_enabled;

    std::thread::spawn(move || {
        let result = ingest_tree(&*store, &fs_id, &ztoc_id, &ztoc);
        if let Err(e) = &result {
            tracing::error!(fs_id = %fs_id, error = %e, "tree ingestion failed, discarding namespace");
            let _ = store.delete_namespace(&crate::kv::paths::BucketPath::fs(&fs_id));
        }
        if telemetry_enabled {
            if let Some(cb) = &telemetry {
                cb.on_span_start("init-metadata-store-latency", started);
            }
        }
        barrier.signal(result);
    });

    Ok(reader)
}

/// Exposed interface `Reader` (spec §6): `open-file`, `metadata`, `close`,
/// `last-on-demand-read-time`.
pub struct Reader<S, SM> {
    metadata: MetadataReader<S>,
    span_manager: Arc<SM>,
    metrics: Arc<dyn MetricsSink>,
    config: ReaderConfig,
    last_read: Arc<Mutex<Option<Instant>>>,
    closed: Arc<AtomicBool>,
}

impl<S: KvStore, SM: SpanManager + 'static> Reader<S, SM> {
    pub fn new(metadata: MetadataReader<S>, span_manager: Arc<SM>, metrics: Arc<dyn MetricsSink>, config: ReaderConfig) -> Self {
        Self {
            metadata,
            span_manager,
            metrics,
            config,
            last_read: Arc::new(Mutex::new(None)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn metadata(&self) -> &MetadataReader<S> {
        &self.metadata
    }

    /// spec §4.4 `open-file`: resolves the inode's extent through the
    /// metadata surface and returns a `ReaderAt` backed by the span
    /// manager.
    pub fn open_file(&self, ino: u32) -> Result<Box<dyn ReaderAt>, Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed { op: "open_file" });
        }
        let (extent, _ztoc) = self.metadata.file_extent(ino)?;
        Ok(Box::new(LayerReader::new(
            Arc::clone(&self.span_manager),
            extent,
            ino,
            self.config.layer_digest.clone(),
            Arc::clone(&self.metrics),
            Arc::clone(&self.last_read),
            Arc::clone(&self.closed),
        )))
    }

    /// spec §6 `last-on-demand-read-time`.
    pub fn last_on_demand_read_time(&self) -> Option<Instant> {
        *self.last_read.lock()
    }

    /// Close-idempotent (spec §5 "Shared-resource policy": "double-close is
    /// a no-op"); accumulates internal close failures rather than bailing
    /// out on the first one (spec §7, SPEC_FULL.md §0.5 `CloseErrors`).
    /// Deletes the fsID namespace (spec §3 "Lifecycle") via the underlying
    /// `MetadataReader`, in addition to flipping every open `ReaderAt`'s
    /// shared closed flag.
    pub fn close(&self) -> Result<(), CloseErrors> {
        self.closed.store(true, Ordering::Release);
        let mut errors = CloseErrors::default();
        errors.push_result(self.metadata.close());
        errors.into_result()
    }
}

/// Exposed interface `VerifiableReader` (spec §4.5, §6): the only object a
/// caller holds until it transitions out of `warming`.
pub struct VerifiableReader<S, SM> {
    gate: VerificationGate<Arc<Reader<S, SM>>>,
}

impl<S: KvStore, SM: SpanManager + 'static> VerifiableReader<S, SM> {
    pub fn new(reader: Reader<S, SM>) -> Self {
        Self { gate: VerificationGate::new(Arc::new(reader)) }
    }

    /// The warming-phase failure latch (spec §4.5): pass a clone to
    /// whatever drives background chunk verification.
    pub fn warming_failure_latch(&self) -> Arc<crate::verify::VerificationLatch> {
        self.gate.latch()
    }

    pub fn skip_verify(&self) -> Result<Arc<Reader<S, SM>>, Error> {
        self.gate.skip_verify()
    }

    pub fn verify_toc(&self, expected_digest: &str) -> Result<Arc<Reader<S, SM>>, Error> {
        self.gate.verify_toc(expected_digest)
    }

    /// `metadata()` is answerable in every gate state, including `warming`:
    /// the metadata store has its own initialization barrier (spec §4.3) and
    /// does not depend on the verification transition.
    pub fn metadata(&self) -> &MetadataReader<S> {
        self.gate.reader().metadata()
    }

    /// Close-idempotent (spec §4.5, §5): closes both the gate (so every
    /// later `skip_verify`/`verify_toc` call fails `closed`) and the
    /// underlying reader.
    pub fn close(&self) -> Result<(), CloseErrors> {
        self.gate.close();
        self.gate.reader().close()
    }
}
