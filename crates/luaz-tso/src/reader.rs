//! Output reader: captured command output back as lines.
//!
//! Private output DDs are read whole, by record where the host supports
//! it and as an NL-delimited byte stream otherwise. The shared output DD
//! of the legacy path is read with an [`OffsetCursor`] so each call sees
//! only what was appended since the previous one.

use std::io::{self, Read};

use tracing::{debug, warn};

use crate::ebcdic;
use crate::error::{Result, TsoError};
use crate::host::HostServices;
use crate::linkage::Linkage;

/// Filler stripped from the end of every record or line.
const FILLER: [u8; 5] = [
    ebcdic::SPACE,
    0x00,
    ebcdic::CARRIAGE_RETURN,
    ebcdic::NEWLINE,
    ebcdic::LINE_FEED,
];

/// Strip trailing blanks, NULs and line-end characters.
pub fn trim_record(record: &[u8]) -> &[u8] {
    let end = record
        .iter()
        .rposition(|b| !FILLER.contains(b))
        .map_or(0, |i| i + 1);
    &record[..end]
}

/// Split an EBCDIC byte stream into trimmed lines.
///
/// NL and LF both end a line; a final unterminated segment is kept when it
/// holds anything.
pub fn split_stream(bytes: &[u8]) -> Vec<String> {
    let mut lines: Vec<String> = bytes
        .split(|b| *b == ebcdic::NEWLINE || *b == ebcdic::LINE_FEED)
        .map(|line| ebcdic::decode(trim_record(line)))
        .collect();
    if bytes
        .last()
        .map_or(true, |b| *b == ebcdic::NEWLINE || *b == ebcdic::LINE_FEED)
    {
        lines.pop();
    }
    lines
}

/// Read every line of `ddname`, preferring record access.
pub fn read_lines<H: HostServices>(link: &mut Linkage<H>, ddname: &str) -> Result<Vec<String>> {
    if let Some(mut records) = link.host_mut().open_records(ddname)? {
        let mut lines = Vec::new();
        while let Some(record) = records.next_record()? {
            lines.push(ebcdic::decode(trim_record(&record)));
        }
        debug!(ddname, lines = lines.len(), mode = "record", "read output");
        return Ok(lines);
    }

    let mut bytes = Vec::new();
    link.host_mut()
        .open_stream(ddname)?
        .read_to_end(&mut bytes)
        .map_err(|e| read_failed(ddname, &e))?;
    let lines = split_stream(&bytes);
    debug!(ddname, lines = lines.len(), mode = "stream", "read output");
    Ok(lines)
}

fn read_failed(ddname: &str, e: &io::Error) -> TsoError {
    TsoError::ReadFailed {
        ddname: ddname.to_ascii_uppercase(),
        detail: e.to_string(),
    }
}

/// Position in a continuously growing shared stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OffsetCursor {
    offset: u64,
    synced: bool,
}

impl OffsetCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes already consumed.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Whether the cursor has been positioned against the stream.
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn reset(&mut self) {
        self.offset = 0;
    }

    /// Move to the current end of `ddname` so earlier content is skipped.
    pub fn sync_to_end<H: HostServices>(&mut self, link: &mut Linkage<H>, ddname: &str) -> Result<()> {
        let mut stream = link.host_mut().open_stream(ddname)?;
        let len = io::copy(&mut stream, &mut io::sink()).map_err(|e| read_failed(ddname, &e))?;
        self.offset = len;
        self.synced = true;
        debug!(ddname, offset = len, "cursor synced");
        Ok(())
    }

    /// Lines appended to `ddname` since the last read.
    ///
    /// A stream shorter than the cursor has been rotated: the cursor goes
    /// back to zero and the read is retried once.
    pub fn read_new_lines<H: HostServices>(
        &mut self,
        link: &mut Linkage<H>,
        ddname: &str,
    ) -> Result<Vec<String>> {
        let fresh = match read_from(link, ddname, self.offset)? {
            Some(fresh) => fresh,
            None => {
                warn!(ddname, offset = self.offset, "stream shorter than cursor; resynchronizing");
                self.reset();
                read_from(link, ddname, 0)?.unwrap_or_default()
            }
        };
        self.offset += fresh.len() as u64;
        self.synced = true;
        Ok(split_stream(&fresh))
    }
}

/// Skip `skip` bytes and return the rest; `None` if the stream is shorter.
fn read_from<H: HostServices>(
    link: &mut Linkage<H>,
    ddname: &str,
    skip: u64,
) -> Result<Option<Vec<u8>>> {
    let mut stream = link.host_mut().open_stream(ddname)?;
    let skipped = io::copy(&mut (&mut stream).take(skip), &mut io::sink())
        .map_err(|e| read_failed(ddname, &e))?;
    if skipped < skip {
        return Ok(None);
    }
    let mut rest = Vec::new();
    stream
        .read_to_end(&mut rest)
        .map_err(|e| read_failed(ddname, &e))?;
    Ok(Some(rest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::dair::DatasetStatus;
    use crate::emulator::SimHost;

    fn e(text: &str) -> Vec<u8> {
        ebcdic::encode(text)
    }

    #[test]
    fn trims_filler() {
        let mut rec = e("HELLO");
        rec.extend_from_slice(&[0x40, 0x40, 0x00, 0x0D, 0x25]);
        assert_eq!(trim_record(&rec), e("HELLO").as_slice());
        assert_eq!(trim_record(&[0x40; 133]), &[] as &[u8]);
        // interior blanks survive
        assert_eq!(trim_record(&e("A B  ")), e("A B").as_slice());
    }

    #[test]
    fn stream_split() {
        let mut bytes = e("ONE");
        bytes.push(ebcdic::NEWLINE);
        bytes.push(ebcdic::NEWLINE);
        bytes.extend(e("THREE   "));
        bytes.push(ebcdic::LINE_FEED);
        bytes.extend(e("TAIL"));
        assert_eq!(split_stream(&bytes), vec!["ONE", "", "THREE", "TAIL"]);
        assert!(split_stream(&[]).is_empty());
        assert_eq!(split_stream(&[ebcdic::NEWLINE]), vec![""]);
    }

    fn host_with_input(record_access: bool) -> Linkage<SimHost> {
        let mut host = SimHost::builder()
            .record_access(record_access)
            .dataset("IBMUSER.IN", &["FIRST", "", "THIRD"])
            .build();
        host.define_dd("IN", "IBMUSER.IN", DatasetStatus::Shr).unwrap();
        Linkage::new(host)
    }

    #[test]
    fn record_and_stream_reads_agree() {
        let expected = vec!["FIRST".to_string(), String::new(), "THIRD".to_string()];
        assert_eq!(read_lines(&mut host_with_input(true), "IN").unwrap(), expected);
        assert_eq!(read_lines(&mut host_with_input(false), "IN").unwrap(), expected);
    }

    #[test]
    fn unallocated_dd_fails() {
        let mut link = Linkage::new(SimHost::new());
        assert!(matches!(
            read_lines(&mut link, "NOSUCH"),
            Err(TsoError::ReadFailed { .. })
        ));
    }

    #[test]
    fn cursor_returns_only_new_lines() {
        let mut link = Linkage::new(SimHost::new());
        let mut cursor = OffsetCursor::new();
        link.host_mut().append_to_dd("TSOOUT", "OLD LINE").unwrap();
        cursor.sync_to_end(&mut link, "TSOOUT").unwrap();

        link.host_mut().append_to_dd("TSOOUT", "NEW 1").unwrap();
        assert_eq!(cursor.read_new_lines(&mut link, "TSOOUT").unwrap(), vec!["NEW 1"]);
        link.host_mut().append_to_dd("TSOOUT", "NEW 2").unwrap();
        assert_eq!(cursor.read_new_lines(&mut link, "TSOOUT").unwrap(), vec!["NEW 2"]);
        assert!(cursor.read_new_lines(&mut link, "TSOOUT").unwrap().is_empty());
    }

    #[test]
    fn cursor_resyncs_after_rotation() {
        let mut link = Linkage::new(SimHost::new());
        let mut cursor = OffsetCursor::new();
        link.host_mut().append_to_dd("TSOOUT", "A LONG LINE BEFORE ROTATION").unwrap();
        cursor.read_new_lines(&mut link, "TSOOUT").unwrap();
        assert!(cursor.offset() > 0);

        link.host_mut().rotate_stream("TSOOUT").unwrap();
        link.host_mut().append_to_dd("TSOOUT", "AFTER").unwrap();
        assert_eq!(cursor.read_new_lines(&mut link, "TSOOUT").unwrap(), vec!["AFTER"]);
        assert_eq!(cursor.offset(), 6);
    }
}
