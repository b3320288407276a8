//! End-to-end signing scenarios over real archives, driven by a fake
//! signer engine that produces structurally valid signatures without any
//! real cryptography.

use droidzip_archive::{ZFile, ZFileExtension, ZFileOptions};
use droidzip_core::error::Result;
use droidzip_sign::block::{ApkSigningBlock, V2_BLOCK_ID, v2_signer_value, v2_signers};
use droidzip_sign::engine::{SignableData, SignatureEntry, SignerEngine};
use droidzip_sign::manifest::{MANIFEST_NAME, ManifestGenerationExtension};
use droidzip_sign::signing::{SigningExtension, SigningOptions};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::rc::Rc;

const CERT_C: &[u8] = b"certificate-C-der-bytes";
const CERT_D: &[u8] = b"certificate-D-der-bytes";

#[derive(Default)]
struct EngineState {
    entries: BTreeMap<String, u32>,
    block_computations: u32,
    done: bool,
}

/// Digests entries with CRC-32 and emits fixed-name signature entries.
struct FakeEngine {
    certificate: Vec<u8>,
    emit_manifest: bool,
    state: Rc<RefCell<EngineState>>,
}

impl FakeEngine {
    fn new(certificate: &[u8]) -> (Self, Rc<RefCell<EngineState>>) {
        let state = Rc::new(RefCell::new(EngineState::default()));
        (
            Self {
                certificate: certificate.to_vec(),
                emit_manifest: false,
                state: state.clone(),
            },
            state,
        )
    }
}

impl SignerEngine for FakeEngine {
    fn certificate(&self) -> &[u8] {
        &self.certificate
    }

    fn output_entry(&mut self, name: &str, data: &[u8]) -> Result<()> {
        // Signature-related entries are outputs, not inputs.
        if !name.starts_with("META-INF/") {
            self.state
                .borrow_mut()
                .entries
                .insert(name.to_string(), crc32fast::hash(data));
        }
        Ok(())
    }

    fn output_entry_removed(&mut self, name: &str) -> Result<()> {
        self.state.borrow_mut().entries.remove(name);
        Ok(())
    }

    fn signature_entries(&mut self) -> Result<Vec<SignatureEntry>> {
        let state = self.state.borrow();
        let digest_list: String = state
            .entries
            .iter()
            .map(|(name, crc)| format!("{name}:{crc:08x}\n"))
            .collect();
        let mut entries = vec![
            SignatureEntry {
                name: "META-INF/CERT.SF".to_string(),
                data: digest_list.into_bytes(),
            },
            SignatureEntry {
                name: "META-INF/CERT.RSA".to_string(),
                data: [b"rsa-sig:".as_slice(), &self.certificate].concat(),
            },
        ];
        if self.emit_manifest {
            // Deliberately last; the extension must reorder it first.
            entries.push(SignatureEntry {
                name: MANIFEST_NAME.to_string(),
                data: b"Manifest-Version: 1.0\r\nCreated-By: fake-engine\r\n\r\n".to_vec(),
            });
        }
        Ok(entries)
    }

    fn sign_block(&mut self, data: &SignableData<'_>) -> Result<Vec<u8>> {
        self.state.borrow_mut().block_computations += 1;
        let digest = crc32fast::hash(data.entry_data)
            ^ crc32fast::hash(data.central_directory)
            ^ crc32fast::hash(data.eocd);
        let mut block = ApkSigningBlock::new();
        block.add_pair(
            V2_BLOCK_ID,
            v2_signer_value(
                &self.certificate,
                &digest.to_le_bytes(),
                b"fake-signature",
                b"fake-public-key",
            ),
        );
        Ok(block.to_bytes())
    }

    fn done(&mut self) -> Result<()> {
        self.state.borrow_mut().done = true;
        Ok(())
    }
}

fn sign_fresh_archive(path: &Path, certificate: &[u8]) -> Rc<RefCell<EngineState>> {
    let mut zf = ZFile::open(path, ZFileOptions::default()).unwrap();
    zf.add("a.txt", b"hi", true).unwrap();
    zf.add("assets/data.bin", &vec![0xABu8; 300], true).unwrap();

    Rc::new(ManifestGenerationExtension::new("builder", "droidzip"))
        .register(&mut zf)
        .unwrap();
    let (engine, state) = FakeEngine::new(certificate);
    Rc::new(SigningExtension::new(
        SigningOptions { v1: true, v2: true },
        engine,
    ))
    .register(&mut zf)
    .unwrap();
    zf.close().unwrap();
    state
}

#[test]
fn fresh_archive_gets_signed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.apk");
    let state = sign_fresh_archive(&path, CERT_C);

    assert!(state.borrow().done);
    assert_eq!(state.borrow().block_computations, 1);

    let zf = ZFile::open(&path, ZFileOptions::default()).unwrap();
    assert!(zf.get(MANIFEST_NAME).is_some());
    assert!(zf.get("META-INF/CERT.SF").is_some());
    assert!(zf.get("META-INF/CERT.RSA").is_some());

    // The signing block sits in the gap before the central directory and
    // is exactly as long as the recorded shift.
    let block = ApkSigningBlock::extract_from(&zf).unwrap().unwrap();
    assert_eq!(block.to_bytes().len() as u64, zf.extra_directory_offset());
    let signers = v2_signers(block.value_for(V2_BLOCK_ID).unwrap()).unwrap();
    assert_eq!(signers.len(), 1);
    assert_eq!(signers[0].certificates, vec![CERT_C.to_vec()]);
}

#[test]
fn signed_archive_with_same_certificate_stays_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.apk");
    sign_fresh_archive(&path, CERT_C);
    let signed_bytes = fs::read(&path).unwrap();

    let mut zf = ZFile::open(&path, ZFileOptions::default()).unwrap();
    Rc::new(ManifestGenerationExtension::new("builder", "droidzip"))
        .register(&mut zf)
        .unwrap();
    let (engine, state) = FakeEngine::new(CERT_C);
    let extension = Rc::new(SigningExtension::new(
        SigningOptions { v1: true, v2: true },
        engine,
    ));
    extension.clone().register(&mut zf).unwrap();
    assert!(!extension.is_dirty());
    zf.close().unwrap();

    assert_eq!(fs::read(&path).unwrap(), signed_bytes);
    assert_eq!(state.borrow().block_computations, 0);
    assert!(!state.borrow().done);
}

#[test]
fn certificate_change_forces_resign() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.apk");
    sign_fresh_archive(&path, CERT_C);

    let mut zf = ZFile::open(&path, ZFileOptions::default()).unwrap();
    Rc::new(ManifestGenerationExtension::new("builder", "droidzip"))
        .register(&mut zf)
        .unwrap();
    let (engine, state) = FakeEngine::new(CERT_D);
    let extension = Rc::new(SigningExtension::new(
        SigningOptions { v1: true, v2: true },
        engine,
    ));
    extension.clone().register(&mut zf).unwrap();
    assert!(extension.is_dirty());
    zf.close().unwrap();
    assert!(state.borrow().done);

    let zf = ZFile::open(&path, ZFileOptions::default()).unwrap();
    let block = ApkSigningBlock::extract_from(&zf).unwrap().unwrap();
    let signers = v2_signers(block.value_for(V2_BLOCK_ID).unwrap()).unwrap();
    assert_eq!(signers[0].certificates, vec![CERT_D.to_vec()]);
    assert_eq!(
        zf.read_entry("META-INF/CERT.RSA").unwrap(),
        [b"rsa-sig:".as_slice(), CERT_D].concat()
    );
}

#[test]
fn content_change_invalidates_cached_block() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.apk");
    sign_fresh_archive(&path, CERT_C);

    let mut zf = ZFile::open(&path, ZFileOptions::default()).unwrap();
    Rc::new(ManifestGenerationExtension::new("builder", "droidzip"))
        .register(&mut zf)
        .unwrap();
    let (engine, state) = FakeEngine::new(CERT_C);
    let extension = Rc::new(SigningExtension::new(
        SigningOptions { v1: true, v2: true },
        engine,
    ));
    extension.clone().register(&mut zf).unwrap();
    assert!(!extension.is_dirty());

    zf.add("b.txt", b"new content", true).unwrap();
    assert!(extension.is_dirty());
    zf.close().unwrap();

    assert_eq!(state.borrow().block_computations, 1);
    assert!(state.borrow().done);

    let zf = ZFile::open(&path, ZFileOptions::default()).unwrap();
    assert_eq!(zf.read_entry("b.txt").unwrap(), b"new content");
    assert!(ApkSigningBlock::extract_from(&zf).unwrap().is_some());
    // The fresh digest list covers the new entry.
    let sf = zf.read_entry("META-INF/CERT.SF").unwrap();
    assert!(String::from_utf8(sf).unwrap().contains("b.txt"));
}

/// Records entry names in the order their `added` hooks fire.
#[derive(Default)]
struct AddOrderRecorder {
    names: RefCell<Vec<String>>,
}

impl ZFileExtension for AddOrderRecorder {
    fn added(&self, _zfile: &mut ZFile, name: &str, _replaced: bool) -> Result<()> {
        self.names.borrow_mut().push(name.to_string());
        Ok(())
    }
}

#[test]
fn manifest_is_first_in_the_signature_batch() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.apk");

    let mut zf = ZFile::open(&path, ZFileOptions::default()).unwrap();
    let recorder = Rc::new(AddOrderRecorder::default());
    zf.add_extension(recorder.clone()).unwrap();

    zf.add("a.txt", b"hi", true).unwrap();
    let (mut engine, _state) = FakeEngine::new(CERT_C);
    // The engine reports the manifest last; the extension must write it
    // before the signature files that digest it.
    engine.emit_manifest = true;
    Rc::new(SigningExtension::new(
        SigningOptions { v1: true, v2: true },
        engine,
    ))
    .register(&mut zf)
    .unwrap();
    zf.close().unwrap();

    let names = recorder.names.borrow();
    let batch: Vec<&str> = names
        .iter()
        .map(String::as_str)
        .filter(|name| name.starts_with("META-INF/"))
        .collect();
    assert_eq!(
        batch,
        vec![MANIFEST_NAME, "META-INF/CERT.SF", "META-INF/CERT.RSA"]
    );
}

#[test]
fn v2_only_signing_carries_no_jar_entries() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.apk");

    let mut zf = ZFile::open(&path, ZFileOptions::default()).unwrap();
    zf.add("a.txt", b"hi", true).unwrap();
    let (engine, _state) = FakeEngine::new(CERT_C);
    Rc::new(SigningExtension::new(
        SigningOptions { v1: false, v2: true },
        engine,
    ))
    .register(&mut zf)
    .unwrap();
    zf.close().unwrap();

    let mut zf = ZFile::open(&path, ZFileOptions::default()).unwrap();
    assert!(zf.get(MANIFEST_NAME).is_none());
    assert!(ApkSigningBlock::extract_from(&zf).unwrap().is_some());

    // A v2-only re-register against the same certificate is a no-op.
    let (engine, state) = FakeEngine::new(CERT_C);
    let extension = Rc::new(SigningExtension::new(
        SigningOptions { v1: false, v2: true },
        engine,
    ));
    extension.clone().register(&mut zf).unwrap();
    assert!(!extension.is_dirty());
    zf.close().unwrap();
    assert_eq!(state.borrow().block_computations, 0);
}

#[test]
fn garbage_signing_block_means_resign_not_abort() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.apk");
    sign_fresh_archive(&path, CERT_C);

    // Corrupt the block's magic in place; the directory gap survives, so
    // registration sees a gap it cannot parse.
    let mut zf = ZFile::open(&path, ZFileOptions::default()).unwrap();
    let cd_offset = zf.central_directory_offset();
    zf.direct_write(cd_offset - 16, b"definitely not42").unwrap();

    let (engine, state) = FakeEngine::new(CERT_C);
    let extension = Rc::new(SigningExtension::new(
        SigningOptions { v1: true, v2: true },
        engine,
    ));
    extension.clone().register(&mut zf).unwrap();
    assert!(extension.is_dirty());
    zf.close().unwrap();
    assert_eq!(state.borrow().block_computations, 1);

    let zf = ZFile::open(&path, ZFileOptions::default()).unwrap();
    let block = ApkSigningBlock::extract_from(&zf).unwrap().unwrap();
    let signers = v2_signers(block.value_for(V2_BLOCK_ID).unwrap()).unwrap();
    assert_eq!(signers[0].certificates, vec![CERT_C.to_vec()]);
}

/// Deletes matching entries from inside its own `added` hook, so later
/// extensions see the add of an entry that is already gone.
struct Vetoer {
    name: &'static str,
}

impl ZFileExtension for Vetoer {
    fn added(&self, zfile: &mut ZFile, name: &str, _replaced: bool) -> Result<()> {
        if name == self.name {
            zfile.delete(name)?;
        }
        Ok(())
    }
}

#[test]
fn entry_deleted_during_added_dispatch_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.apk");

    let mut zf = ZFile::open(&path, ZFileOptions::default()).unwrap();
    zf.add_extension(Rc::new(Vetoer { name: "drop.me" })).unwrap();
    let (engine, state) = FakeEngine::new(CERT_C);
    Rc::new(SigningExtension::new(
        SigningOptions { v1: true, v2: true },
        engine,
    ))
    .register(&mut zf)
    .unwrap();

    zf.add("a.txt", b"keep", true).unwrap();
    // The vetoer removes this before the signing extension's hook runs;
    // the engine must never see it, and the add must not fail.
    zf.add("drop.me", b"gone", true).unwrap();
    zf.close().unwrap();

    assert!(state.borrow().entries.contains_key("a.txt"));
    assert!(!state.borrow().entries.contains_key("drop.me"));

    let zf = ZFile::open(&path, ZFileOptions::default()).unwrap();
    assert!(zf.get("drop.me").is_none());
    assert_eq!(zf.read_entry("a.txt").unwrap(), b"keep");
}

#[test]
fn manifest_generation_is_stable_across_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.apk");

    let mut zf = ZFile::open(&path, ZFileOptions::default()).unwrap();
    zf.add("a.txt", b"hi", true).unwrap();
    Rc::new(ManifestGenerationExtension::new("builder", "droidzip"))
        .register(&mut zf)
        .unwrap();
    zf.close().unwrap();
    let first = fs::read(&path).unwrap();

    let manifest = {
        let zf = ZFile::open(&path, ZFileOptions::default()).unwrap();
        zf.read_entry(MANIFEST_NAME).unwrap()
    };
    let text = String::from_utf8(manifest).unwrap();
    assert!(text.contains("Manifest-Version: 1.0"));
    assert!(text.contains("Built-By: builder"));
    assert!(text.contains("Created-By: droidzip"));

    // Re-registering with unchanged attributes rewrites nothing.
    let mut zf = ZFile::open(&path, ZFileOptions::default()).unwrap();
    Rc::new(ManifestGenerationExtension::new("builder", "droidzip"))
        .register(&mut zf)
        .unwrap();
    zf.close().unwrap();
    assert_eq!(fs::read(&path).unwrap(), first);
}

#[test]
fn unsupported_manifest_version_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.apk");

    let mut zf = ZFile::open(&path, ZFileOptions::default()).unwrap();
    zf.add(
        MANIFEST_NAME,
        b"Manifest-Version: 9.9\r\n\r\n",
        true,
    )
    .unwrap();
    let result =
        Rc::new(ManifestGenerationExtension::new("builder", "droidzip")).register(&mut zf);
    assert!(result.is_err());
    zf.close().unwrap();
}
