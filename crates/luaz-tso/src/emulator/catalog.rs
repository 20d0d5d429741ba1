//! In-memory catalog of datasets backing the emulated DDs.

use std::collections::{BTreeMap, BTreeSet};

use crate::ebcdic;

/// Record length of command output datasets (FBA 133 print lines).
pub const OUTPUT_LRECL: usize = 133;

/// Dataset contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetBody {
    /// Fixed-length records, blank padded.
    Records { lrecl: usize, records: Vec<Vec<u8>> },
    /// Partitioned dataset; only the member directory is modelled.
    Library { members: BTreeSet<String> },
    /// Unstructured byte stream with NL-terminated lines.
    Stream(Vec<u8>),
}

/// A cataloged dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    pub name: String,
    pub body: DatasetBody,
    pub temporary: bool,
}

impl Dataset {
    /// Empty fixed-record dataset.
    pub fn sequential(name: &str, lrecl: usize) -> Self {
        Self {
            name: name.to_ascii_uppercase(),
            body: DatasetBody::Records {
                lrecl,
                records: Vec::new(),
            },
            temporary: false,
        }
    }

    /// Library with the given member names.
    pub fn library(name: &str, members: &[&str]) -> Self {
        Self {
            name: name.to_ascii_uppercase(),
            body: DatasetBody::Library {
                members: members.iter().map(|m| m.to_ascii_uppercase()).collect(),
            },
            temporary: false,
        }
    }

    /// Empty byte-stream dataset.
    pub fn stream(name: &str) -> Self {
        Self {
            name: name.to_ascii_uppercase(),
            body: DatasetBody::Stream(Vec::new()),
            temporary: false,
        }
    }

    /// Append one line of text in the dataset's own format.
    ///
    /// Fixed records longer than LRECL continue in the next record.
    pub fn append_line(&mut self, text: &str) {
        let encoded = ebcdic::encode(text);
        match &mut self.body {
            DatasetBody::Records { lrecl, records } => {
                let lrecl = *lrecl;
                if encoded.is_empty() {
                    records.push(vec![ebcdic::SPACE; lrecl]);
                }
                for chunk in encoded.chunks(lrecl) {
                    let mut rec = chunk.to_vec();
                    rec.resize(lrecl, ebcdic::SPACE);
                    records.push(rec);
                }
            }
            DatasetBody::Stream(bytes) => {
                bytes.extend_from_slice(&encoded);
                bytes.push(ebcdic::NEWLINE);
            }
            DatasetBody::Library { .. } => {}
        }
    }

    /// Contents as a byte stream: records are NL-terminated.
    pub fn stream_bytes(&self) -> Vec<u8> {
        match &self.body {
            DatasetBody::Records { records, .. } => {
                let mut out = Vec::new();
                for rec in records {
                    out.extend_from_slice(rec);
                    out.push(ebcdic::NEWLINE);
                }
                out
            }
            DatasetBody::Stream(bytes) => bytes.clone(),
            DatasetBody::Library { .. } => Vec::new(),
        }
    }

    /// DSORG as LISTDS reports it.
    pub fn dsorg(&self) -> &'static str {
        match self.body {
            DatasetBody::Library { .. } => "PO",
            _ => "PS",
        }
    }

    /// RECFM as LISTDS reports it.
    pub fn recfm(&self) -> String {
        match &self.body {
            DatasetBody::Records { lrecl, .. } => format!("FB  LRECL={lrecl}"),
            DatasetBody::Library { .. } => "U".to_string(),
            DatasetBody::Stream(_) => "VB".to_string(),
        }
    }

    /// Whether the dataset is a library holding `member`.
    pub fn has_member(&self, member: &str) -> bool {
        match &self.body {
            DatasetBody::Library { members } => members.contains(&member.to_ascii_uppercase()),
            _ => false,
        }
    }
}

/// Dataset catalog.
#[derive(Debug, Default)]
pub struct Catalog {
    datasets: BTreeMap<String, Dataset>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog a dataset, replacing any entry of the same name.
    pub fn define(&mut self, dataset: Dataset) {
        self.datasets.insert(dataset.name.clone(), dataset);
    }

    pub fn get(&self, name: &str) -> Option<&Dataset> {
        self.datasets.get(&name.to_ascii_uppercase())
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Dataset> {
        self.datasets.get_mut(&name.to_ascii_uppercase())
    }

    pub fn remove(&mut self, name: &str) -> Option<Dataset> {
        self.datasets.remove(&name.to_ascii_uppercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.datasets.contains_key(&name.to_ascii_uppercase())
    }

    /// Permanent datasets whose name starts with the `level` qualifiers.
    pub fn list_level(&self, level: &str) -> Vec<&Dataset> {
        let level = level.to_ascii_uppercase();
        let prefix = format!("{level}.");
        self.datasets
            .values()
            .filter(|d| !d.temporary && (d.name == level || d.name.starts_with(&prefix)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_are_padded_and_split() {
        let mut ds = Dataset::sequential("A.B", 8);
        ds.append_line("ABC");
        ds.append_line("");
        ds.append_line("0123456789");
        match &ds.body {
            DatasetBody::Records { records, .. } => {
                assert_eq!(records.len(), 4);
                assert_eq!(ebcdic::decode(&records[0]), "ABC     ");
                assert!(records[1].iter().all(|&b| b == ebcdic::SPACE));
                assert_eq!(ebcdic::decode(&records[3]), "89      ");
            }
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[test]
    fn stream_view_of_records() {
        let mut ds = Dataset::sequential("A.B", 4);
        ds.append_line("X");
        let bytes = ds.stream_bytes();
        assert_eq!(bytes.len(), 5);
        assert_eq!(bytes[4], ebcdic::NEWLINE);
    }

    #[test]
    fn list_level_matches_whole_qualifiers() {
        let mut cat = Catalog::new();
        cat.define(Dataset::sequential("IBMUSER.DATA", 80));
        cat.define(Dataset::sequential("IBMUSERX.DATA", 80));
        let mut tmp = Dataset::sequential("IBMUSER.TEMP", 80);
        tmp.temporary = true;
        cat.define(tmp);
        let names: Vec<_> = cat.list_level("ibmuser").iter().map(|d| d.name.clone()).collect();
        assert_eq!(names, vec!["IBMUSER.DATA".to_string()]);
    }

    #[test]
    fn library_members() {
        let lib = Dataset::library("SYS1.SAXREXEC", &["lutso"]);
        assert!(lib.has_member("LUTSO"));
        assert!(!lib.has_member("OTHER"));
        assert_eq!(lib.dsorg(), "PO");
    }
}
