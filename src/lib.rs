/*!
Compact binary deltas compatible with bsdiff 4.x.

A self-updating executable does not need to download its whole new binary:
it downloads a small patch and rebuilds the new binary from the one already
installed. This crate is the codec half of that scheme — it computes the
patch ([`Diff`]) and replays it ([`Patch`]), byte-exact or with a loud
error. Fetching the patch, verifying its signature and swapping the running
executable are the caller's business.

Generate a patch:

```
use std::io;
use bindelta::{Compression, Diff};

fn make_patch(old: &[u8], new: &[u8]) -> io::Result<Vec<u8>> {
    let mut patch = Vec::new();
    Diff::new(old, new)
        .compression(Compression::best())
        .compare(io::Cursor::new(&mut patch))?;
    Ok(patch)
}
```

Apply it:

```
use std::io;
use bindelta::Patch;

fn apply_patch(old: &[u8], patch: &[u8]) -> io::Result<Vec<u8>> {
    let patcher = Patch::new(patch)?;
    let mut new = Vec::with_capacity(patcher.hint_target_size() as usize);
    patcher.apply(old, io::Cursor::new(&mut new))?;
    Ok(new)
}
```
*/

pub mod diff;
pub mod patch;

mod sufsort;
mod utils;

pub use diff::{Compression, Diff};
pub use patch::Patch;
