#![allow(dead_code)]

use bindelta::{Diff, Patch};
use byteorder::{ByteOrder, LE};
use bzip2::write::BzEncoder;
use bzip2::Compression;
use rand::distributions::uniform::{SampleUniform, Uniform};
use rand::prelude::*;
use std::fs;
use std::fs::File;
use std::io;
use std::io::prelude::*;
use std::path;

pub fn bindiff(s: &[u8], t: &[u8]) -> io::Result<Vec<u8>> {
    let mut p = Vec::new();
    Diff::new(s, t).compare(io::Cursor::new(&mut p))?;
    Ok(p)
}

pub fn binpatch(s: &[u8], p: &[u8]) -> io::Result<Vec<u8>> {
    let patcher = Patch::new(p)?;
    let mut t = Vec::with_capacity(patcher.hint_target_size() as usize);
    patcher.apply(s, io::Cursor::new(&mut t))?;
    Ok(t)
}

pub fn tests_dir() -> path::PathBuf {
    path::Path::new(env!("CARGO_MANIFEST_DIR")).join("tests")
}

pub fn exists_file<P: AsRef<path::Path>>(name: P) -> bool {
    name.as_ref().is_file()
}

pub fn fetch_file<P: AsRef<path::Path>>(name: P) -> io::Result<Vec<u8>> {
    let mut data = Vec::new();
    File::open(name)?.read_to_end(&mut data)?;
    Ok(data)
}

pub fn store_file<P: AsRef<path::Path>, B: AsRef<[u8]>>(name: P, bytes: B) -> io::Result<()> {
    if let Some(dir) = name.as_ref().parent() {
        fs::create_dir_all(dir)?;
    }
    File::create(name)?.write_all(bytes.as_ref())
}

pub fn random_bytes(n: usize) -> Vec<u8> {
    let mut rng = thread_rng();
    let mut bytes = Vec::with_capacity(n);
    for _ in 0..n {
        bytes.push(rng.gen())
    }
    bytes
}

/// Derive a target from `source` resembling it by roughly `similar` (0..=1):
/// interleaved runs of (possibly damaged) source slices and fresh bytes.
pub fn distort(source: &[u8], similar: f64) -> Vec<u8> {
    assert!(!source.is_empty());
    let similar = fraction(similar);
    let rate = convex_mapping(similar);

    let tsize = random_between(
        (source.len() as f64 * 0.75) as usize,
        (source.len() as f64 * 1.25) as usize,
    );
    let dmax = random_between(
        Ord::min(16, (source.len() as f64 * 0.02) as usize),
        Ord::max(32, (source.len() as f64 * 0.33) as usize),
    );
    let emax = random_between(0, (source.len() as f64 * 0.15 * (1.0 - similar)) as usize);

    let mut target = Vec::with_capacity(tsize);
    let mut rng = thread_rng();
    while target.len() < tsize {
        // delta
        let remain = tsize - target.len();
        let dsize = {
            let dhi = Ord::min(Ord::min(dmax, remain), source.len());
            let dlo = Ord::min(16, dhi);
            random_between(dlo, dhi)
        };
        let offset = random_between(0, source.len() - dsize);
        for &x in source[offset..offset + dsize].iter() {
            if random_decide(rate) {
                target.push(x);
            } else {
                target.push(rng.gen());
            }
        }

        // extra
        let remain = tsize - target.len();
        if !random_decide(rate) {
            let esize = random_between(0, Ord::min(emax, remain));
            for _ in 0..esize {
                target.push(rng.gen());
            }
        }
    }

    target
}

fn random_decide(rate: f64) -> bool {
    random_between(0.0, 1.0) <= fraction(rate)
}

fn random_between<X: SampleUniform>(lo: X, hi: X) -> X {
    let mut rng = thread_rng();
    Uniform::new_inclusive(lo, hi).sample(&mut rng)
}

fn fraction(x: f64) -> f64 {
    if x.is_nan() || x.is_sign_negative() {
        0.0
    } else if x.is_infinite() || x > 1.0 {
        1.0
    } else {
        x
    }
}

fn convex_mapping(frac: f64) -> f64 {
    (1.0 - (1.0 - frac) * (1.0 - frac)).sqrt()
}

/// Assemble a container by hand: sign-magnitude control records, the three
/// bzip2 sections, the header. For crafting deliberately broken patches.
pub fn assemble_patch(ctrls: &[(i64, i64, i64)], diff: &[u8], extra: &[u8], tsize: i64) -> Vec<u8> {
    let mut raw_ctrl = Vec::with_capacity(ctrls.len() * 24);
    let mut record = [0; 8];
    for &(add, copy, seek) in ctrls {
        for x in [add, copy, seek].iter() {
            encode_int(*x, &mut record);
            raw_ctrl.extend_from_slice(&record);
        }
    }
    assemble_patch_raw(&raw_ctrl, diff, extra, tsize)
}

/// Same, but with an arbitrary (possibly malformed) raw control stream.
pub fn assemble_patch_raw(raw_ctrl: &[u8], diff: &[u8], extra: &[u8], tsize: i64) -> Vec<u8> {
    let bz_ctrl = compress(raw_ctrl);
    let bz_diff = compress(diff);
    let bz_extra = compress(extra);

    let mut patch = Vec::new();
    patch.extend_from_slice(b"BSDIFF40");
    let mut word = [0; 8];
    encode_int(bz_ctrl.len() as i64, &mut word);
    patch.extend_from_slice(&word);
    encode_int(bz_diff.len() as i64, &mut word);
    patch.extend_from_slice(&word);
    encode_int(tsize, &mut word);
    patch.extend_from_slice(&word);
    patch.extend_from_slice(&bz_ctrl);
    patch.extend_from_slice(&bz_diff);
    patch.extend_from_slice(&bz_extra);
    patch
}

fn compress(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut enc = BzEncoder::new(io::Cursor::new(&mut out), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap();
    out
}

fn encode_int(x: i64, b: &mut [u8]) {
    if x < 0 {
        LE::write_u64(b, x.wrapping_neg() as u64 | 0x8000000000000000);
    } else {
        LE::write_u64(b, x as u64);
    }
}
