//! Thin-pack completion: a ref-delta whose base lives in another pack.

use odb_hash::{HashAlgorithm, ObjectId};
use odb_pack::parser::Parser;
use odb_pack::scanner::Scanner;
use odb_pack::PackError;
use odb_store::{MemoryStore, ObjectStore};

const ALGO: HashAlgorithm = HashAlgorithm::Sha1;

const BASE_ID: &str = "8ab686eafeb1f44702738c8b0f24f2567c36da6d";
const THIN_TARGET_ID: &str = "ca078344d9f32af59f36543cddc3cb5e61323596";
const THIN_WHOLE_ID: &str = "bfa1756e7dea48afe0836ee8d4ec58c096b64a3e";

fn fixture(name: &str) -> Vec<u8> {
    let path = format!("{}/tests/fixtures/{name}", env!("CARGO_MANIFEST_DIR"));
    std::fs::read(path).unwrap()
}

fn oid(hex: &str) -> ObjectId {
    ObjectId::from_hex(hex).unwrap()
}

#[test]
fn thin_pack_fails_without_prerequisites() {
    let thin = fixture("thin.pack");
    let store = MemoryStore::new();

    let scanner = Scanner::from_reader(&thin[..]);
    let mut parser = Parser::new(scanner, ALGO).with_store(&store);
    let err = parser.parse().unwrap_err();

    assert!(matches!(err, PackError::ReferenceDeltaNotFound(id) if id == oid(BASE_ID)));
    // The failed parse must not leave partial objects behind.
    assert_eq!(store.len(), 0);
}

#[test]
fn thin_pack_completes_after_ingesting_base_pack() {
    let store = MemoryStore::new();

    // First ingest the base pack that carries the prerequisite blob.
    let base_pack = fixture("small.pack");
    let scanner = Scanner::from_reader(&base_pack[..]);
    let mut parser = Parser::new(scanner, ALGO).with_store(&store);
    parser.parse().unwrap();
    assert!(store.contains(&oid(BASE_ID)));

    // Now the thin pack parses and its delta target materialises.
    let thin = fixture("thin.pack");
    let scanner = Scanner::from_reader(&thin[..]);
    let mut parser = Parser::new(scanner, ALGO).with_store(&store);
    parser.parse().unwrap();

    let target = store.encoded_object(None, &oid(THIN_TARGET_ID)).unwrap();
    assert_eq!(
        target.data().unwrap(),
        b"Hello, World!\nplus thin-pack content\n"
    );
    assert!(store.contains(&oid(THIN_WHOLE_ID)));
}

#[test]
fn completed_thin_objects_hash_correctly() {
    use odb_hash::hasher::Hasher;

    let store = MemoryStore::new();
    for name in ["small.pack", "thin.pack"] {
        let pack = fixture(name);
        let scanner = Scanner::from_reader(&pack[..]);
        let mut parser = Parser::new(scanner, ALGO).with_store(&store);
        parser.parse().unwrap();
    }

    for obj in store.iter_encoded_objects(None).unwrap() {
        let recomputed = Hasher::hash_object(
            ALGO,
            obj.object_type().name().unwrap(),
            &obj.data().unwrap(),
        )
        .unwrap();
        assert_eq!(recomputed, obj.id());
    }
}
