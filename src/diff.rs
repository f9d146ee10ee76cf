#![forbid(unsafe_code)]
//! Delta generation: greedy match scanning over the target plus patch
//! container serialization.

use crate::sufsort::SuffixIndex;
use crate::utils::{encode_int, Control};
use bzip2::write::BzEncoder;
use std::io::{Cursor, Result, Write};

/// Compression level of the bzip2 compressor.
pub use bzip2::Compression;

/// Classical acceptance threshold: a fresh match must beat the score of the
/// previous alignment by more than this many bytes.
pub const MISMATCH_CUTOFF: usize = 8;

/// Chunk size for staging diff bytes before compression.
const BUFFER_SIZE: usize = 4096;

/// Delta compressor producing bsdiff 4.x patches.
///
/// Compares source with target and writes the patch container:
/// ```
/// use std::io;
/// use bindelta::{Compression, Diff};
///
/// fn bindiff(source: &[u8], target: &[u8]) -> io::Result<Vec<u8>> {
///     let mut patch = Vec::new();
///     Diff::new(source, target)
///         .compression(Compression::best())
///         .compare(io::Cursor::new(&mut patch))?;
///     Ok(patch)
/// }
/// ```
///
/// The output is deterministic for identical inputs and settings.
pub struct Diff<'o, 'n> {
    old: &'o [u8],
    new: &'n [u8],
    cutoff: usize,
    level: Compression,
}

impl<'o, 'n> Diff<'o, 'n> {
    /// Create new configuration for delta compression.
    pub fn new(old: &'o [u8], new: &'n [u8]) -> Self {
        Diff {
            old,
            new,
            cutoff: MISMATCH_CUTOFF,
            level: Compression::default(),
        }
    }

    /// Set the bzip2 compression level for the patch sections.
    pub fn compression(mut self, level: Compression) -> Self {
        self.level = level;
        self
    }

    /// Set the match acceptance threshold (`cutoff > 0`, default is
    /// [`MISMATCH_CUTOFF`]).
    ///
    /// This tunes patch size, not correctness; the default is the constant
    /// of the reference algorithm.
    pub fn mismatch_cutoff(mut self, mut cutoff: usize) -> Self {
        if cutoff < 1 {
            cutoff = 1;
        }
        self.cutoff = cutoff;
        self
    }

    /// Search matches in the target and write the patch container.
    ///
    /// Returns the size of the patch if no error occurs. Fails only on
    /// write or compression errors, never on content.
    pub fn compare<P: Write>(&self, patch: P) -> Result<u64> {
        let index = SuffixIndex::build(self.old);
        let scan = Scan::new(self.old, self.new, &index, self.cutoff);
        pack(self.old, self.new, scan, patch, self.level)
    }
}

/// Greedy scanner over the target, yielding one control per region.
///
/// Walks the target looking up the longest exact match in the source while
/// scoring how much of the candidate region the previous alignment already
/// explains (`lastoffset` drift). An accepted match is then welded to the
/// previous region: the old region extends forward and the new match extends
/// backward as long as agreement density holds up, absorbing isolated
/// mismatches as diff bytes rather than literals.
struct Scan<'o, 'n, 'i> {
    old: &'o [u8],
    new: &'n [u8],
    index: &'i SuffixIndex<'o>,
    cutoff: usize,

    scan: usize,
    len: usize,
    pos: usize,
    lastscan: usize,
    lastpos: usize,
    lastoffset: isize,
    done: bool,
}

impl<'o, 'n, 'i> Scan<'o, 'n, 'i> {
    fn new(old: &'o [u8], new: &'n [u8], index: &'i SuffixIndex<'o>, cutoff: usize) -> Self {
        Scan {
            old,
            new,
            index,
            cutoff,
            scan: 0,
            len: 0,
            pos: 0,
            lastscan: 0,
            lastpos: 0,
            lastoffset: 0,
            done: false,
        }
    }

    /// Advance to the next region boundary, updating `pos`/`len`/`scan`.
    ///
    /// Returns true when a fresh match was accepted, false when the end of
    /// the target closed the final region. Matches fully explained by the
    /// previous alignment are skipped over without emitting anything.
    fn accept_match(&mut self) -> bool {
        let (old, new) = (self.old, self.new);
        loop {
            let mut oldscore = 0usize;
            self.scan += self.len;
            let mut scsc = self.scan;

            while self.scan < new.len() {
                let (pos, len) = self.index.lookup(&new[self.scan..]);
                self.pos = pos;
                self.len = len;

                while scsc < self.scan + self.len {
                    let k = (scsc as isize + self.lastoffset) as usize;
                    if k < old.len() && old[k] == new[scsc] {
                        oldscore += 1;
                    }
                    scsc += 1;
                }

                if self.len == oldscore && self.len != 0 {
                    // The previous alignment already explains every byte of
                    // this match; skip it and keep scanning.
                    break;
                }
                if self.len > oldscore + self.cutoff {
                    return true;
                }

                let k = (self.scan as isize + self.lastoffset) as usize;
                if k < old.len() && old[k] == new[self.scan] {
                    oldscore -= 1;
                }
                self.scan += 1;
            }

            if self.scan == new.len() {
                return false;
            }
        }
    }

    /// Weld the accepted match to the previous region and emit its control.
    fn emit(&mut self) -> Control {
        let (old, new) = (self.old, self.new);

        // Extend the previous region forward while agreement density holds.
        let mut lenf = 0;
        {
            let mut s = 0isize;
            let mut best = 0isize;
            let mut i = 0;
            while self.lastscan + i < self.scan && self.lastpos + i < old.len() {
                if old[self.lastpos + i] == new[self.lastscan + i] {
                    s += 1;
                }
                i += 1;
                if s * 2 - i as isize > best * 2 - lenf as isize {
                    best = s;
                    lenf = i;
                }
            }
        }

        // Extend the fresh match backward the same way.
        let mut lenb = 0;
        if self.scan < new.len() {
            let mut s = 0isize;
            let mut best = 0isize;
            let mut i = 1;
            while i <= self.scan - self.lastscan && i <= self.pos {
                if old[self.pos - i] == new[self.scan - i] {
                    s += 1;
                }
                if s * 2 - i as isize > best * 2 - lenb as isize {
                    best = s;
                    lenb = i;
                }
                i += 1;
            }
        }

        // The extensions may claim the same target bytes; find the split
        // point where switching alignments scores best.
        if self.lastscan + lenf > self.scan - lenb {
            let overlap = (self.lastscan + lenf) - (self.scan - lenb);
            let mut s = 0isize;
            let mut best = 0isize;
            let mut lens = 0;
            for i in 0..overlap {
                if new[self.lastscan + lenf - overlap + i] == old[self.lastpos + lenf - overlap + i]
                {
                    s += 1;
                }
                if new[self.scan - lenb + i] == old[self.pos - lenb + i] {
                    s -= 1;
                }
                if s > best {
                    best = s;
                    lens = i + 1;
                }
            }
            lenf = lenf + lens - overlap;
            lenb -= lens;
        }

        let ctl = Control {
            add: lenf as u64,
            copy: ((self.scan - lenb) - (self.lastscan + lenf)) as u64,
            seek: (self.pos as i64 - lenb as i64) - (self.lastpos as i64 + lenf as i64),
        };

        self.lastscan = self.scan - lenb;
        self.lastpos = self.pos - lenb;
        self.lastoffset = self.pos as isize - self.scan as isize;
        ctl
    }
}

impl<'o, 'n, 'i> Iterator for Scan<'o, 'n, 'i> {
    type Item = Control;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.new.is_empty() {
            return None;
        }
        if !self.accept_match() {
            self.done = true;
        }
        Some(self.emit())
    }
}

/// Construct the patch container from the control stream.
fn pack<D, P>(old: &[u8], new: &[u8], ctrls: D, mut patch: P, level: Compression) -> Result<u64>
where
    D: Iterator<Item = Control>,
    P: Write,
{
    let mut bz_ctrl = Vec::new();
    let mut bz_diff = Vec::new();
    let mut bz_extra = Vec::new();

    {
        let mut ctrl = BzEncoder::new(Cursor::new(&mut bz_ctrl), level);
        let mut diff = BzEncoder::new(Cursor::new(&mut bz_diff), level);
        let mut extra = BzEncoder::new(Cursor::new(&mut bz_extra), level);

        let mut oldpos = 0;
        let mut newpos = 0;
        let mut cbuf = [0; 24];
        let mut dat = Vec::with_capacity(BUFFER_SIZE);

        for ctl in ctrls {
            encode_int(ctl.add as i64, &mut cbuf[0..8]);
            encode_int(ctl.copy as i64, &mut cbuf[8..16]);
            encode_int(ctl.seek, &mut cbuf[16..24]);
            ctrl.write_all(&cbuf[..])?;

            // Diff bytes are target minus source, staged in bounded chunks.
            let mut n = ctl.add as usize;
            while n > 0 {
                let k = Ord::min(n, BUFFER_SIZE);
                dat.extend(
                    Iterator::zip(new[newpos..].iter(), old[oldpos..].iter())
                        .map(|(y, x)| y.wrapping_sub(*x))
                        .take(k),
                );
                diff.write_all(&dat[..])?;
                dat.clear();
                oldpos += k;
                newpos += k;
                n -= k;
            }

            if ctl.copy > 0 {
                extra.write_all(&new[newpos..newpos + ctl.copy as usize])?;
                newpos += ctl.copy as usize;
            }

            oldpos = (oldpos as i64).wrapping_add(ctl.seek) as usize;
        }
        ctrl.flush()?;
        diff.flush()?;
        extra.flush()?;
    }

    // Header: magic, control size, diff size, target size.
    let mut header = [0; 32];
    let csize = bz_ctrl.len() as u64;
    let dsize = bz_diff.len() as u64;
    let esize = bz_extra.len() as u64;
    header[0..8].copy_from_slice(b"BSDIFF40");
    encode_int(csize as i64, &mut header[8..16]);
    encode_int(dsize as i64, &mut header[16..24]);
    encode_int(new.len() as i64, &mut header[24..32]);
    patch.write_all(&header[..])?;

    patch.write_all(&bz_ctrl[..])?;
    patch.write_all(&bz_diff[..])?;
    patch.write_all(&bz_extra[..])?;
    patch.flush()?;

    Ok(32 + csize + dsize + esize)
}
