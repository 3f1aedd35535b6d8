//! Device overwrite with a keyed pseudorandom stream.

use crate::error::VaultResult;
use crate::provider::{DeviceCatalog, Host};
use crate::rng::WipeStream;
use crate::workflow::{event, WorkflowLevel, WorkflowReport};
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};

const MIB: u64 = 1024 * 1024;
const CHUNK: usize = MIB as usize;

/// Overwrite a device with random-looking data.
///
/// With no bound, the whole reported capacity is overwritten. With a bound
/// `N`, only the first and last `N` MiB are, which is enough to destroy
/// partition-table structures without a full pass.
pub fn wipe<H: Host>(
    host: &H,
    device: &str,
    bound_mib: Option<u64>,
) -> VaultResult<WorkflowReport> {
    let identity = host.resolve(device)?;
    let size = host.size_bytes(&identity.node)?;

    let mut target = OpenOptions::new().write(true).open(&identity.node)?;
    let mut stream = WipeStream::new();

    let written = match bound_mib {
        None => write_stream(&mut target, &mut stream, size)?,
        Some(bound) => {
            let span = (bound * MIB).min(size);
            let head = write_stream(&mut target, &mut stream, span)?;
            let tail_offset = size.saturating_sub(span);
            target.seek(SeekFrom::Start(tail_offset))?;
            let tail = write_stream(&mut target, &mut stream, size - tail_offset)?;
            head + tail
        }
    };
    target.sync_all()?;

    let scope = match bound_mib {
        None => format!("{written} bytes (full device)"),
        Some(bound) => format!("{written} bytes (first and last {bound} MiB)"),
    };
    Ok(WorkflowReport {
        title: format!("Wiped {}", identity.node),
        events: vec![event(WorkflowLevel::Success, scope)],
    })
}

fn write_stream<W: Write>(dest: &mut W, stream: &mut WipeStream, len: u64) -> VaultResult<u64> {
    let mut buf = vec![0u8; CHUNK];
    let mut remaining = len;
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        stream.fill(&mut buf[..want]);
        dest.write_all(&buf[..want])?;
        remaining -= want as u64;
    }
    Ok(len)
}
