//! Interoperability with an independent compound document implementation.
//!
//! Files written by the engine must open with the `cfb` crate, and files
//! written by `cfb` must open, read and round-trip through the engine.

use comdoc_signer::{Container, SectorSize};
use std::io::{Cursor, Read, Write};

fn payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(13).wrapping_add(seed))
        .collect()
}

fn cfb_read(comp: &mut cfb::CompoundFile<Cursor<Vec<u8>>>, path: &str) -> Vec<u8> {
    let mut out = Vec::new();
    comp.open_stream(path)
        .unwrap_or_else(|e| panic!("cfb cannot open {path}: {e}"))
        .read_to_end(&mut out)
        .unwrap();
    out
}

fn cfb_file(version: cfb::Version) -> Vec<u8> {
    let mut comp = cfb::CompoundFile::create_with_version(version, Cursor::new(Vec::new())).unwrap();
    comp.create_storage("/Storage").unwrap();
    for (path, data) in [
        ("/Alpha", payload(100, 1)),
        ("/beta", payload(5000, 2)),
        ("/Storage/inner", payload(3000, 3)),
        ("/Storage/big", payload(70_000, 4)),
    ] {
        let mut stream = comp.create_stream(path).unwrap();
        stream.write_all(&data).unwrap();
        stream.flush().unwrap();
    }
    comp.flush().unwrap();
    comp.into_inner().into_inner()
}

fn engine_file(sector_size: SectorSize) -> Vec<u8> {
    let mut c = Container::create(Cursor::new(Vec::new()), sector_size).unwrap();
    c.create_storage("/Storage").unwrap();
    c.put_stream("/Alpha", &payload(100, 1)).unwrap();
    c.put_stream("/beta", &payload(5000, 2)).unwrap();
    c.put_stream("/Storage/inner", &payload(3000, 3)).unwrap();
    c.put_stream("/Storage/big", &payload(70_000, 4)).unwrap();
    c.put_stream("/empty", &[]).unwrap();
    c.commit().unwrap();
    c.into_inner().into_inner()
}

#[test]
fn test_engine_output_opens_with_cfb() {
    for sector_size in [SectorSize::B512, SectorSize::B4096] {
        let bytes = engine_file(sector_size);
        let mut comp = cfb::CompoundFile::open(Cursor::new(bytes)).unwrap();

        assert!(comp.is_storage("/Storage"));
        assert_eq!(cfb_read(&mut comp, "/Alpha"), payload(100, 1));
        assert_eq!(cfb_read(&mut comp, "/beta"), payload(5000, 2));
        assert_eq!(cfb_read(&mut comp, "/Storage/inner"), payload(3000, 3));
        assert_eq!(cfb_read(&mut comp, "/Storage/big"), payload(70_000, 4));
        assert!(cfb_read(&mut comp, "/empty").is_empty());
    }
}

#[test]
fn test_cfb_output_opens_with_engine() {
    for version in [cfb::Version::V3, cfb::Version::V4] {
        let mut c = Container::open(Cursor::new(cfb_file(version))).unwrap();

        assert_eq!(c.read_stream_to_vec("/Alpha").unwrap(), payload(100, 1));
        assert_eq!(c.read_stream_to_vec("/beta").unwrap(), payload(5000, 2));
        assert_eq!(c.read_stream_to_vec("/Storage/inner").unwrap(), payload(3000, 3));
        assert_eq!(c.read_stream_to_vec("/Storage/big").unwrap(), payload(70_000, 4));

        let paths: Vec<String> = c.walk().into_iter().map(|e| e.path).collect();
        assert_eq!(paths.len(), 6);
        assert!(paths.contains(&"/Storage/big".to_string()));
    }
}

#[test]
fn test_engine_edits_to_cfb_file_round_trip() {
    let mut c = Container::open(Cursor::new(cfb_file(cfb::Version::V3))).unwrap();
    c.put_stream("/added", &payload(600, 9)).unwrap();
    c.put_stream("/Storage/added_big", &payload(12_000, 10)).unwrap();
    c.put_stream("/beta", &payload(10, 11)).unwrap();
    c.remove_stream("/Alpha").unwrap();
    c.commit().unwrap();

    let mut comp = cfb::CompoundFile::open(Cursor::new(c.into_inner().into_inner())).unwrap();
    assert!(!comp.exists("/Alpha"));
    assert_eq!(cfb_read(&mut comp, "/added"), payload(600, 9));
    assert_eq!(cfb_read(&mut comp, "/Storage/added_big"), payload(12_000, 10));
    assert_eq!(cfb_read(&mut comp, "/beta"), payload(10, 11));
    assert_eq!(cfb_read(&mut comp, "/Storage/inner"), payload(3000, 3));
    assert_eq!(cfb_read(&mut comp, "/Storage/big"), payload(70_000, 4));
}

#[test]
fn test_large_file_with_msat_opens_with_cfb() {
    let data = payload(14_200 * 512, 5);
    let mut c = Container::create(Cursor::new(Vec::new()), SectorSize::B512).unwrap();
    c.put_stream("/huge", &data).unwrap();
    c.commit().unwrap();
    assert!(c.header().num_msat_sectors >= 1);

    let mut comp = cfb::CompoundFile::open(Cursor::new(c.into_inner().into_inner())).unwrap();
    assert_eq!(cfb_read(&mut comp, "/huge"), data);
}
