//! End-to-end test: a `Ztoc` literal ingested into a `sled`-backed store,
//! read back through the full `VerifiableReader` -> `Reader` ->
//! `MetadataReader` stack, matching the shape of `dialohq-fxfsp`'s
//! `tests/scan_fixture.rs` (build a fixture, collect query results, assert on
//! them) but built from an in-memory `Ztoc` rather than a binary image, since
//! ingestion here consumes the ZTOC directly rather than scanning a block
//! device.

use std::ops::ControlFlow;
use std::sync::Arc;

use ztoc_core::kv::sled_store::SledStore;
use ztoc_core::metrics::NoopMetrics;
use ztoc_core::span::{IdentityFileExtractor, MemSectionReader, MemSpanManager};
use ztoc_core::store::{new_metadata_reader, Reader, VerifiableReader};
use ztoc_core::{EntryType, Error, IngestConfig, ReaderConfig, Ztoc, ZtocEntry, ZtocExtentInput};

fn extent(offset: u64, size: u64) -> ZtocExtentInput {
    ZtocExtentInput { uncompressed_offset: offset, uncompressed_size: size, span_start: 0, span_end: 0, first_span_has_bits: false }
}

/// Uncompressed layer contents the fixture's extents point into: "hello" at
/// offset 0 and "nested!!" at offset 100, mimicking two files packed into
/// one layer at disjoint offsets.
fn layer_bytes() -> Vec<u8> {
    let mut bytes = vec![0u8; 200];
    bytes[0..5].copy_from_slice(b"hello");
    bytes[100..108].copy_from_slice(b"nested!!");
    bytes
}

fn fixture_ztoc() -> Ztoc {
    Ztoc {
        entries: vec![
            ZtocEntry::directory("a"),
            ZtocEntry::regular("a/hello.txt", 5, extent(0, 5)),
            ZtocEntry::hardlink("a/hello2.txt", "a/hello.txt"),
            ZtocEntry::regular("a/b/nested.txt", 8, extent(100, 8)),
        ],
        index_bytes: vec![0xde, 0xad],
        compressed_layer_size: 200,
        max_span_id: 0,
        version: 1,
    }
}

fn build_reader() -> Reader<SledStore, MemSpanManager> {
    let store = Arc::new(SledStore::temporary().unwrap());
    let section: Arc<dyn ztoc_core::SectionReader> = Arc::new(MemSectionReader::new(layer_bytes()));
    let extractor: Arc<dyn ztoc_core::FileExtractor> = Arc::new(IdentityFileExtractor);
    let reader_config = ReaderConfig { layer_digest: "sha256:test".into(), telemetry_enabled: false };
    let metadata = new_metadata_reader(
        store,
        section,
        extractor,
        fixture_ztoc(),
        IngestConfig::default(),
        &reader_config,
        Arc::new(NoopMetrics),
        None,
    )
    .unwrap();
    let span_manager = Arc::new(MemSpanManager::new(layer_bytes()));
    Reader::new(metadata, span_manager, Arc::new(NoopMetrics), reader_config)
}

#[test]
fn tree_matches_fixture_layout() {
    let reader = build_reader();
    let md = reader.metadata();

    let a = md.get_child(md.root_id(), "a").unwrap().expect("a exists");
    assert!(md.get_attr(a).unwrap().is_dir());

    let hello = md.get_child(a, "hello.txt").unwrap().expect("hello.txt exists");
    let hello2 = md.get_child(a, "hello2.txt").unwrap().expect("hello2.txt exists");
    assert_eq!(hello, hello2, "hardlink must resolve to the same inode as its target");
    assert_eq!(md.get_attr(hello).unwrap().num_link, 2);

    let b = md.get_child(a, "b").unwrap().expect("implicit parent b exists");
    assert!(md.get_attr(b).unwrap().is_dir());
    let nested = md.get_child(b, "nested.txt").unwrap().expect("nested.txt exists");
    assert_eq!(md.get_attr(nested).unwrap().size, 8);
}

#[test]
fn foreach_child_reaches_every_inode_exactly_once() {
    let reader = build_reader();
    let md = reader.metadata();

    // Breadth-first walk from the root, counting visits per inode.
    let mut visited = std::collections::HashMap::<u32, u32>::new();
    let mut queue = vec![md.root_id()];
    *visited.entry(md.root_id()).or_insert(0) += 1;
    while let Some(dir) = queue.pop() {
        let mut children = Vec::new();
        md.foreach_child(dir, |_name, id| {
            children.push(id);
            ControlFlow::Continue(())
        })
        .unwrap();
        for child in children {
            *visited.entry(child).or_insert(0) += 1;
            if md.get_attr(child).unwrap().is_dir() {
                queue.push(child);
            }
        }
    }

    // Every count is exactly 1 except the hardlinked file, which is visited
    // once per directory entry pointing at it ("hello.txt" and "hello2.txt"
    // both name the same inode) — the invariant is "every *reachable path*
    // visited once", not "every inode appears once", since hardlinks are
    // exactly the mechanism for one inode having more than one path.
    assert_eq!(visited.len(), 5); // root, a, b, the shared hello inode, nested.txt
}

#[test]
fn open_file_reads_through_span_manager_and_respects_eof() {
    let reader = build_reader();
    let md = reader.metadata();
    let a = md.get_child(md.root_id(), "a").unwrap().unwrap();
    let hello = md.get_child(a, "hello.txt").unwrap().unwrap();

    let handle = reader.open_file(hello).unwrap();
    assert_eq!(handle.size(), 5);

    let mut buf = [0u8; 5];
    assert_eq!(handle.read_at(&mut buf, 0).unwrap(), 5);
    assert_eq!(&buf, b"hello");
    assert_eq!(handle.read_at(&mut buf, 5).unwrap(), 0, "read at size must EOF");
}

#[test]
fn metadata_open_file_reads_through_the_file_extractor_directly() {
    // `MetadataReader::open_file` is the direct path: no span manager
    // involved, just the section reader + file extractor this reader was
    // constructed with.
    let reader = build_reader();
    let md = reader.metadata();
    let a = md.get_child(md.root_id(), "a").unwrap().unwrap();
    let nested = md.get_child(md.get_child(a, "b").unwrap().unwrap(), "nested.txt").unwrap().unwrap();

    let handle = md.open_file(nested).unwrap();
    assert_eq!(handle.size(), 8);
    let mut buf = [0u8; 8];
    assert_eq!(handle.read_at(&mut buf, 0).unwrap(), 8);
    assert_eq!(&buf, b"nested!!");
}

#[test]
fn hardlinked_path_reads_identical_bytes_to_its_target() {
    let reader = build_reader();
    let md = reader.metadata();
    let a = md.get_child(md.root_id(), "a").unwrap().unwrap();
    let hello = md.get_child(a, "hello.txt").unwrap().unwrap();
    let hello2 = md.get_child(a, "hello2.txt").unwrap().unwrap();

    let mut buf_a = [0u8; 5];
    reader.open_file(hello).unwrap().read_at(&mut buf_a, 0).unwrap();
    let mut buf_b = [0u8; 5];
    reader.open_file(hello2).unwrap().read_at(&mut buf_b, 0).unwrap();
    assert_eq!(buf_a, buf_b);
}

#[test]
fn open_file_on_directory_fails_not_regular_file() {
    let reader = build_reader();
    let a = reader.metadata().get_child(reader.metadata().root_id(), "a").unwrap().unwrap();
    assert!(matches!(reader.open_file(a), Err(Error::NotRegularFile { .. })));
}

#[test]
fn verifiable_reader_gates_until_skip_or_verify() {
    let reader = build_reader();
    let vr = VerifiableReader::new(reader);

    // metadata() is answerable before any gate transition.
    assert!(vr.metadata().root_attr().unwrap().is_dir());

    let inner = vr.skip_verify().unwrap();
    let a = inner.metadata().get_child(inner.metadata().root_id(), "a").unwrap().unwrap();
    let hello = inner.metadata().get_child(a, "hello.txt").unwrap().unwrap();
    assert!(inner.open_file(hello).is_ok());
}

#[test]
fn verify_toc_fails_when_warming_phase_latched_a_failure() {
    let reader = build_reader();
    let vr = VerifiableReader::new(reader);
    vr.warming_failure_latch()
        .record_failure("span-3", &Error::VerificationFailed("chunk digest mismatch".into()));

    let err = vr.verify_toc("sha256:deadbeef").unwrap_err();
    assert!(matches!(err, Error::VerificationFailed(_)));
    // Scenario 5 (spec §8): the second call observes the same latched error.
    assert!(vr.verify_toc("sha256:deadbeef").is_err());
}

#[test]
fn num_of_nodes_counts_every_ingested_inode() {
    let reader = build_reader();
    // root, a, hello.txt, b, nested.txt = 5 (hardlink reuses hello.txt's inode).
    assert_eq!(reader.metadata().num_of_nodes().unwrap(), 5);
}

#[test]
fn clone_answers_identical_queries_to_the_original() {
    let reader = build_reader();
    let md = reader.metadata();
    let section: Arc<dyn ztoc_core::SectionReader> = Arc::new(MemSectionReader::new(vec![1, 2, 3]));
    let cloned = md.clone_with_section(section);

    let a1 = md.get_child(md.root_id(), "a").unwrap().unwrap();
    let a2 = cloned.get_child(cloned.root_id(), "a").unwrap().unwrap();
    assert_eq!(a1, a2);
    assert_eq!(md.get_attr(a1).unwrap(), cloned.get_attr(a2).unwrap());
}

#[test]
fn close_then_open_file_fails_closed_even_with_already_open_handle() {
    let reader = build_reader();
    let a = reader.metadata().get_child(reader.metadata().root_id(), "a").unwrap().unwrap();
    let hello = reader.metadata().get_child(a, "hello.txt").unwrap().unwrap();
    let handle = reader.open_file(hello).unwrap();

    reader.close().unwrap();
    assert!(matches!(reader.open_file(hello), Err(Error::Closed { .. })));
    // An already-open handle shares the same close flag and also fails closed.
    let mut buf = [0u8; 1];
    assert!(matches!(handle.read_at(&mut buf, 0), Err(Error::Closed { .. })));
}

#[test]
fn close_deletes_the_fsid_namespace() {
    // spec §3 "Lifecycle": close discards the fsID namespace from the KV
    // store, not just the in-process closed flag.
    let reader = build_reader();
    assert_eq!(reader.metadata().num_of_nodes().unwrap(), 5);
    reader.close().unwrap();
    assert_eq!(reader.metadata().num_of_nodes().unwrap(), 0);
    reader.close().unwrap(); // idempotent: deleting an already-gone namespace is a no-op
}

#[test]
fn background_ingest_failure_is_logged_and_discards_the_namespace() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let store = Arc::new(SledStore::temporary().unwrap());
    let section: Arc<dyn ztoc_core::SectionReader> = Arc::new(MemSectionReader::new(vec![]));
    let extractor: Arc<dyn ztoc_core::FileExtractor> = Arc::new(IdentityFileExtractor);
    let broken = Ztoc {
        entries: vec![ZtocEntry::hardlink("broken-link", "does/not/exist")],
        index_bytes: vec![],
        compressed_layer_size: 0,
        max_span_id: 0,
        version: 1,
    };

    let reader_config = ReaderConfig::default();
    let metadata =
        new_metadata_reader(store, section, extractor, broken, IngestConfig::default(), &reader_config, Arc::new(NoopMetrics), None).unwrap();

    // root_attr is committed by phase 1 and doesn't wait on the barrier.
    assert!(metadata.root_attr().unwrap().is_dir());
    // Any other query blocks on the barrier and observes the background
    // tree-construction failure the unresolved hardlink target caused.
    let err = metadata.get_attr(metadata.root_id()).unwrap_err();
    assert!(matches!(err, Error::IngestFailed(_)));
}
