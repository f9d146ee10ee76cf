#![forbid(unsafe_code)]
//! Patch application: container parsing and control replay.

use crate::utils::{decode_int, Control};
use bzip2::read::BzDecoder;
use std::io::{Cursor, Error, ErrorKind, Read, Result, Write};

/// Default output buffer size.
pub const BUFFER_SIZE: usize = 16384;

/// Initial size of the diff staging buffer.
const DELTA_MIN: usize = 1024;

/// Patcher reconstructing the target from the source and a patch.
///
/// Parsing the header is eager, so a malformed container is rejected before
/// any source data is touched:
/// ```
/// use std::io;
/// use bindelta::Patch;
///
/// fn binpatch(source: &[u8], patch: &[u8]) -> io::Result<Vec<u8>> {
///     let patcher = Patch::new(patch)?;
///     let mut target = Vec::with_capacity(patcher.hint_target_size() as usize);
///     patcher.apply(source, io::Cursor::new(&mut target))?;
///     Ok(target)
/// }
/// ```
pub struct Patch<'p> {
    patch: PatchFile<'p>,
    buffer_size: usize,
}

impl<'p> Patch<'p> {
    /// Parse the patch container and create new patcher configuration.
    ///
    /// Returns an error if the header is malformed or the advertised
    /// section lengths exceed the container.
    pub fn new(patch: &'p [u8]) -> Result<Self> {
        Ok(Patch {
            patch: parse(patch)?,
            buffer_size: BUFFER_SIZE,
        })
    }

    /// Set the output buffer size (`bs >= 128`, default is [`BUFFER_SIZE`]).
    pub fn buffer_size(mut self, mut bs: usize) -> Self {
        if bs < 128 {
            bs = 128;
        }
        self.buffer_size = bs;
        self
    }

    /// The final target size, as declared in the patch header.
    ///
    /// Lets the caller preallocate before applying.
    pub fn hint_target_size(&self) -> u64 {
        self.patch.tsize
    }

    /// Apply the patch to the source data, streaming the target out.
    ///
    /// Returns the target size if no error occurs. Output is written as it
    /// is produced: when replay fails partway (corrupt or incompatible
    /// patch), `target` may already have received a prefix of the output,
    /// and the caller must discard it. Collect into a scratch buffer first
    /// if all-or-nothing behavior is needed.
    pub fn apply<T: Write>(self, source: &[u8], target: T) -> Result<u64> {
        let ctx = Context::new(self.patch, source, target, self.buffer_size);
        ctx.apply()
    }
}

struct PatchFile<'a> {
    tsize: u64,
    ctrl: BzDecoder<Cursor<&'a [u8]>>,
    diff: BzDecoder<Cursor<&'a [u8]>>,
    extra: BzDecoder<Cursor<&'a [u8]>>,
}

/// Parse the container: magic, section lengths, section slices.
fn parse(patch: &[u8]) -> Result<PatchFile> {
    if patch.len() < 32 || &patch[..8] != b"BSDIFF40" {
        return Err(corrupt("not a BSDIFF40 patch"));
    }

    let csize = decode_int(&patch[8..16]);
    let dsize = decode_int(&patch[16..24]);
    let tsize = decode_int(&patch[24..32]);
    if csize < 0 || dsize < 0 || tsize < 0 {
        return Err(corrupt("negative length in patch header"));
    }
    let (csize, dsize) = (csize as u64, dsize as u64);
    if csize
        .checked_add(dsize)
        .and_then(|n| n.checked_add(32))
        .map_or(true, |n| n > patch.len() as u64)
    {
        return Err(corrupt("section lengths exceed the patch"));
    }

    let (_, remain) = patch.split_at(32);
    let (bz_ctrl, remain) = remain.split_at(csize as usize);
    let (bz_diff, bz_extra) = remain.split_at(dsize as usize);

    Ok(PatchFile {
        tsize: tsize as u64,
        ctrl: BzDecoder::new(Cursor::new(bz_ctrl)),
        diff: BzDecoder::new(Cursor::new(bz_diff)),
        extra: BzDecoder::new(Cursor::new(bz_extra)),
    })
}

/// Replay context.
struct Context<'s, 'p, T>
where
    T: Write,
{
    source: &'s [u8],
    target: T,
    patch: PatchFile<'p>,

    oldpos: i64,
    n: usize,
    buf: Vec<u8>,
    dlt: Vec<u8>,
    ctl: [u8; 24],

    total: u64,
}

impl<'s, 'p, T> Context<'s, 'p, T>
where
    T: Write,
{
    fn new(patch: PatchFile<'p>, source: &'s [u8], target: T, bsize: usize) -> Self {
        Context {
            source,
            target,
            patch,
            oldpos: 0,
            n: 0,
            buf: vec![0; bsize],
            dlt: vec![0; Ord::min(DELTA_MIN, bsize)],
            ctl: [0; 24],
            total: 0,
        }
    }

    /// Replay every control, then check the output against the header.
    fn apply(mut self) -> Result<u64> {
        while let Some(result) = self.next_control() {
            let Control { add, copy, seek } = result?;
            self.add(add)?;
            self.copy(copy)?;
            self.seek(seek)?;
        }
        if self.total != self.patch.tsize {
            return Err(corrupt("patch ended before the declared target size"));
        }
        if self.n > 0 {
            self.target.write_all(&self.buf[..self.n])?;
        }
        self.target.flush()?;
        Ok(self.total)
    }

    /// Read and validate the next control. None at a clean end of stream.
    fn next_control(&mut self) -> Option<Result<Control>> {
        match read_exact_or_eof(&mut self.patch.ctrl, &mut self.ctl[..]) {
            Ok(0) => return None,
            Err(e) => return Some(Err(e)),
            _ => (),
        }

        let add = decode_int(&self.ctl[0..8]);
        let copy = decode_int(&self.ctl[8..16]);
        let seek = decode_int(&self.ctl[16..24]);
        if add < 0 || copy < 0 {
            return Some(Err(corrupt("negative length in control")));
        }
        if (add as u64)
            .checked_add(copy as u64)
            .and_then(|n| n.checked_add(self.total))
            .map_or(true, |n| n > self.patch.tsize)
        {
            return Some(Err(corrupt("controls yield more than the declared target size")));
        }
        Some(Ok(Control {
            add: add as u64,
            copy: copy as u64,
            seek,
        }))
    }

    /// Sum source bytes with the diff stream and push them to the target.
    fn add(&mut self, count: u64) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        if self.oldpos < 0 || self.oldpos as u64 + count > self.source.len() as u64 {
            return Err(corrupt("control walks out of the source"));
        }

        let mut off = self.oldpos as usize;
        let mut count = count as usize;
        self.oldpos += count as i64;
        while count > 0 {
            let k = Ord::min(count, self.buf.len() - self.n);

            self.reserve_delta(k);
            self.patch.diff.read_exact(&mut self.dlt[..k])?;
            for i in 0..k {
                self.buf[self.n + i] = self.dlt[i].wrapping_add(self.source[off + i]);
            }
            self.n += k;
            if self.n >= self.buf.len() {
                self.target.write_all(self.buf.as_ref())?;
                self.n = 0;
            }
            self.total += k as u64;
            off += k;
            count -= k;
        }
        Ok(())
    }

    /// Copy literal bytes from the extra stream to the target.
    fn copy(&mut self, count: u64) -> Result<()> {
        let mut count = count as usize;
        while count > 0 {
            let k = Ord::min(count, self.buf.len() - self.n);

            self.patch.extra.read_exact(&mut self.buf[self.n..self.n + k])?;
            self.n += k;
            if self.n >= self.buf.len() {
                self.target.write_all(self.buf.as_ref())?;
                self.n = 0;
            }
            self.total += k as u64;
            count -= k;
        }
        Ok(())
    }

    /// Move the source cursor. Out-of-range positions are fine as long as
    /// no later control reads from them.
    fn seek(&mut self, offset: i64) -> Result<()> {
        self.oldpos = self
            .oldpos
            .checked_add(offset)
            .ok_or_else(|| corrupt("source seek overflows"))?;
        Ok(())
    }

    /// Extend the diff staging buffer if not large enough.
    fn reserve_delta(&mut self, size: usize) {
        if size > self.dlt.len() {
            self.dlt.resize(size, 0);
        }
    }
}

#[inline]
fn corrupt(what: &str) -> Error {
    Error::new(ErrorKind::InvalidData, what.to_string())
}

/// Read exactly `buf.len()` bytes or a clean EOF; returns the bytes read.
#[inline]
fn read_exact_or_eof<R>(r: &mut R, buf: &mut [u8]) -> Result<usize>
where
    R: Read,
{
    let mut cnt = 0;
    while cnt < buf.len() {
        match r.read(&mut buf[cnt..]) {
            Ok(0) => break,
            Ok(n) => cnt += n,
            Err(ref e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    if cnt != 0 && cnt != buf.len() {
        Err(Error::new(
            ErrorKind::UnexpectedEof,
            "control stream ends inside a record",
        ))
    } else {
        Ok(cnt)
    }
}
