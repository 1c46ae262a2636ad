//! Trust-map composition over real files.

use std::collections::BTreeSet;
use std::io::Write;
use std::time::SystemTime;

use regex::Regex;
use tempfile::NamedTempFile;
use vouch_pgp::{KeyFingerprint, KeyInfo};
use vouch_policy::{ArtifactInfo, Filter, KeysMap, KeysMapLocationConfig};

const PRIMARY: &str = "58E79B6ABC762159DC0B1591164BD2247B936711";
const OTHER: &str = "AABBCCDDEEFF00112233445566778899AABBCCDD";

fn key(fingerprint: &str) -> KeyInfo {
    KeyInfo {
        fingerprint: KeyFingerprint::parse(fingerprint).unwrap(),
        master: None,
        uids: BTreeSet::new(),
        version: 4,
        algorithm: 1,
        bits: 4096,
        date: SystemTime::UNIX_EPOCH,
        revoked: false,
    }
}

fn write_map(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn multi_file_composition_with_filters() {
    let first = write_map(
        "# project keys\r\n\
         junit:junit:*:[4.0,5.0) = 0x164BD2247B936711\r\n\
         noSig:test1 = noSig\r\n",
    );
    let second = write_map(
        "noSig:test2 = noSig\n\
         org.slow.build:* = 0xAABBCCDDEEFF0011, \\\n\
             noKey\n",
    );

    let mut map = KeysMap::new();
    map.load(&KeysMapLocationConfig::new(first.path())).unwrap();

    let mut second_location = KeysMapLocationConfig::new(second.path());
    second_location.excludes = vec![Filter {
        pattern: Some(Regex::new(r".*:test2").unwrap()),
        value: Some("noSig".to_string()),
    }];
    map.load(&second_location).unwrap();

    // Four entries loaded; the excluded one no longer matches.
    assert_eq!(map.len(), 3);

    let junit = ArtifactInfo::new("junit", "junit", "4.12");
    assert!(map.is_valid_key(&junit, &key(PRIMARY)));
    assert!(!map.is_valid_key(&junit, &key(OTHER)));

    assert!(map.is_no_signature(&ArtifactInfo::new("noSig", "test1", "1.0")));
    assert!(!map.is_no_signature(&ArtifactInfo::new("noSig", "test2", "1.0")));

    let slow = ArtifactInfo::new("org.slow.build", "core", "0.3");
    assert!(map.is_key_missing(&slow));
    assert!(map.is_with_key(&slow));
}

#[test]
fn merging_equals_preloaded_union() {
    // Two entries with the same pattern, loaded separately...
    let split = write_map(
        "org.example:* = 0x164BD2247B936711\n\
         org.example:* = 0xAABBCCDDEEFF0011\n",
    );
    let mut merged = KeysMap::new();
    merged.load(&KeysMapLocationConfig::new(split.path())).unwrap();

    // ...behave exactly like one entry carrying the union.
    let unioned = write_map("org.example:* = 0x164BD2247B936711, 0xAABBCCDDEEFF0011\n");
    let mut reference = KeysMap::new();
    reference
        .load(&KeysMapLocationConfig::new(unioned.path()))
        .unwrap();

    assert_eq!(merged.len(), 1);
    assert_eq!(reference.len(), 1);
    let artifact = ArtifactInfo::new("org.example", "widget", "2.1");
    for fingerprint in [PRIMARY, OTHER, "0011223344556677"] {
        assert_eq!(
            merged.is_valid_key(&artifact, &key(fingerprint)),
            reference.is_valid_key(&artifact, &key(fingerprint)),
            "diverged for {fingerprint}"
        );
    }
}

#[test]
fn includes_narrow_a_shared_file() {
    let shared = write_map(
        "com.a:* = 0x164BD2247B936711, noSig\n\
         com.b:* = noSig\n",
    );

    let mut location = KeysMapLocationConfig::new(shared.path());
    location.includes = vec![Filter {
        pattern: None,
        value: Some("noSig".to_string()),
    }];

    let mut map = KeysMap::new();
    map.load(&location).unwrap();

    // Only the noSig items survived the include filter.
    assert!(map.is_no_signature(&ArtifactInfo::new("com.a", "x", "1")));
    assert!(!map.is_valid_key(
        &ArtifactInfo::new("com.a", "x", "1"),
        &key(PRIMARY)
    ));
}

#[test]
fn snapshot_artifacts_match_on_base_version() {
    let file = write_map("org.dev:*:*:1.0-SNAPSHOT = 0x164BD2247B936711\n");
    let mut map = KeysMap::new();
    map.load(&KeysMapLocationConfig::new(file.path())).unwrap();

    let timestamped = ArtifactInfo::new("org.dev", "widget", "1.0-20240101.120000-7");
    assert!(map.is_valid_key(&timestamped, &key(PRIMARY)));

    let released = ArtifactInfo::new("org.dev", "widget", "1.0");
    assert!(!map.is_valid_key(&released, &key(PRIMARY)));
}
