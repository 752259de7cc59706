use async_trait::async_trait;
use std::fmt::Write as _;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::{Block, DriverRecord, MetricSink, MetricSource, Record, RelayRecord, Role, TerminalRecord};
use crate::error::MetricError;

/// Appends one role's records to `<dir>/<role>.log`, one integer per line.
pub struct FileSink {
    role: Role,
    file: File,
    path: PathBuf,
}

impl FileSink {
    pub async fn open(dir: &Path, role: Role) -> Result<Self, MetricError> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(role.file_name());
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        debug!(path = %path.display(), "metric log opened");
        Ok(Self { role, file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl MetricSink for FileSink {
    async fn append(&mut self, record: Record) -> Result<(), MetricError> {
        if record.role() != self.role {
            return Err(MetricError::RoleMismatch {
                expected: self.role,
                got: record.role(),
            });
        }
        let mut block = String::new();
        for value in record.to_values() {
            // Writing to a String cannot fail.
            let _ = writeln!(block, "{value}");
        }
        // One write per block keeps blocks whole in an append-mode file.
        self.file.write_all(block.as_bytes()).await?;
        self.file.flush().await?;
        Ok(())
    }
}

/// Reads the three role logs back from a metrics directory.
#[derive(Debug, Clone)]
pub struct FileSource {
    dir: PathBuf,
}

impl FileSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    async fn read_role<R: Block>(&self) -> Result<Vec<R>, MetricError> {
        let path = self.dir.join(R::ROLE.file_name());
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(path = %path.display(), "no metric log for role");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut reader = BlockReader::new(&text);
        let mut records = Vec::new();
        while let Some(values) = reader.read_next(R::ARITY)? {
            records.push(R::from_values(&values));
        }
        Ok(records)
    }
}

#[async_trait]
impl MetricSource for FileSource {
    async fn read_driver(&mut self) -> Result<Vec<DriverRecord>, MetricError> {
        self.read_role().await
    }

    async fn read_relay(&mut self) -> Result<Vec<RelayRecord>, MetricError> {
        self.read_role().await
    }

    async fn read_terminal(&mut self) -> Result<Vec<TerminalRecord>, MetricError> {
        self.read_role().await
    }
}

/// Sequential reader of fixed-arity blocks of newline-delimited integers.
pub struct BlockReader<'a> {
    lines: std::iter::Enumerate<std::str::Lines<'a>>,
}

impl<'a> BlockReader<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            lines: text.lines().enumerate(),
        }
    }

    /// The next `arity` values, or `None` at end of input.
    ///
    /// A block cut short by the end of input is dropped with a warning; a
    /// writer may still be appending it.
    pub fn read_next(&mut self, arity: usize) -> Result<Option<Vec<u64>>, MetricError> {
        let mut values = Vec::with_capacity(arity);
        while values.len() < arity {
            let Some((idx, line)) = self.lines.next() else {
                if !values.is_empty() {
                    warn!(have = values.len(), arity, "truncated trailing block ignored");
                }
                return Ok(None);
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let value = line.parse().map_err(|_| MetricError::Parse {
                line_no: idx + 1,
                line: line.to_owned(),
            })?;
            values.push(value);
        }
        Ok(Some(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_whole_blocks_and_drops_a_truncated_tail() {
        let mut reader = BlockReader::new("1\n10\n20\n\n2\n30\n40\n3\n50\n");
        assert_eq!(reader.read_next(3).unwrap(), Some(vec![1, 10, 20]));
        assert_eq!(reader.read_next(3).unwrap(), Some(vec![2, 30, 40]));
        assert_eq!(reader.read_next(3).unwrap(), None);
    }

    #[test]
    fn reports_the_offending_line() {
        let mut reader = BlockReader::new("1\nabc\n3\n");
        match reader.read_next(3) {
            Err(MetricError::Parse { line_no, line }) => {
                assert_eq!(line_no, 2);
                assert_eq!(line, "abc");
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn sink_and_source_agree_on_the_format() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FileSink::open(dir.path(), Role::Terminal).await.unwrap();
        for seq in 0..3 {
            sink.append(Record::Terminal(TerminalRecord {
                sequence: seq,
                receive_inner_request: 100 + seq,
                send_inner_response: 200 + seq,
            }))
            .await
            .unwrap();
        }

        let text = std::fs::read_to_string(sink.path()).unwrap();
        assert_eq!(text.lines().count(), 9);

        let mut source = FileSource::new(dir.path());
        let records = source.read_terminal().await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].send_inner_response, 202);
        assert!(source.read_relay().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn refuses_records_of_another_role() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FileSink::open(dir.path(), Role::Driver).await.unwrap();
        let relay = Record::Relay(RelayRecord {
            sequence: 7,
            inner_sequence: 0,
            receive_outer_request: 1,
            send_inner_request: 2,
            receive_inner_response: 3,
            send_outer_response: 4,
        });
        assert!(matches!(
            sink.append(relay).await,
            Err(MetricError::RoleMismatch {
                expected: Role::Driver,
                got: Role::Relay
            })
        ));
        sink.append(Record::Driver(DriverRecord {
            sequence: 8,
            send_outer_request: 10,
            receive_outer_response: 20,
        }))
        .await
        .unwrap();

        let records = FileSource::new(dir.path()).read_driver().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sequence, 8);
    }
}
