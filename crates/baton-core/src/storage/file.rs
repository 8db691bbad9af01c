use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read as _, Write as _};
use std::path::{Path, PathBuf};

use crate::error::CoreError;
use crate::model::{LedgerRecord, SessionId};

use super::backend::{missing_sequences, LedgerBackend, SessionLoad};

const SESSION_PREFIX: &str = "session_";
const SESSION_SUFFIX: &str = ".jsonl";

/// One append-only JSONL file per session under a ledger directory.
///
/// Every write takes an exclusive advisory lock on the session file and is
/// flushed with `sync_data` before returning.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    /// Open (creating if needed) a ledger directory.
    pub fn open(dir: &Path) -> Result<Self, CoreError> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn session_path(&self, session_id: &SessionId) -> PathBuf {
        self.dir
            .join(format!("{SESSION_PREFIX}{}{SESSION_SUFFIX}", session_id.as_str()))
    }

    fn session_files(&self) -> Result<Vec<(SessionId, PathBuf)>, CoreError> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(id) = name
                .strip_prefix(SESSION_PREFIX)
                .and_then(|rest| rest.strip_suffix(SESSION_SUFFIX))
            else {
                continue;
            };
            match SessionId::parse(id) {
                Ok(session_id) => out.push((session_id, entry.path())),
                Err(e) => tracing::warn!("Ignoring ledger file {name}: {e}"),
            }
        }
        out.sort();
        Ok(out)
    }

    fn load_session(path: &Path) -> Result<SessionLoad, CoreError> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        fs2::FileExt::lock_exclusive(&file).map_err(CoreError::Io)?;
        let result = Self::read_locked(&mut file, path);
        fs2::FileExt::unlock(&file).map_err(CoreError::Io)?;
        result
    }

    fn read_locked(file: &mut File, path: &Path) -> Result<SessionLoad, CoreError> {
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        let mut records: Vec<LedgerRecord> = Vec::new();
        let mut unreadable = 0usize;
        let mut offset = 0usize;
        for (idx, line) in data.split_inclusive(|b| *b == b'\n').enumerate() {
            let start = offset;
            offset += line.len();
            let terminated = line.last() == Some(&b'\n');
            let trimmed = line.trim_ascii();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_slice::<LedgerRecord>(trimmed) {
                Ok(record) => records.push(record),
                Err(e) if !terminated => {
                    // Torn final write: the record never became durable.
                    tracing::warn!(
                        path = %path.display(),
                        line = idx + 1,
                        "Truncating torn ledger tail: {e}"
                    );
                    file.set_len(start as u64)?;
                    file.sync_data()?;
                }
                Err(e) => {
                    unreadable += 1;
                    tracing::warn!(
                        path = %path.display(),
                        line = idx + 1,
                        "Skipping unreadable ledger record: {e}"
                    );
                }
            }
        }

        records.sort_by_key(|r| r.sequence);
        if let Some(dup) = records.windows(2).find(|w| w[0].sequence == w[1].sequence) {
            return Err(CoreError::Corrupt {
                path: path.display().to_string(),
                line: 0,
                reason: format!("duplicate sequence {}", dup[0].sequence),
            });
        }
        let mut missing = missing_sequences(&records);
        // Unreadable lines not accounted for by an interior gap held records
        // past the last readable one.
        let next = records.last().map_or(0, |r| r.sequence + 1);
        let lost_tail = unreadable.saturating_sub(missing.len()) as u64;
        missing.extend(next..next + lost_tail);
        Ok(SessionLoad {
            records,
            missing_sequences: missing,
        })
    }

    /// Append one line; on failure cut the file back so a retry starts on a
    /// clean line boundary.
    fn append_line(mut file: &File, line: &[u8]) -> std::io::Result<()> {
        let pre_len = file.metadata()?.len();
        let written = file.write_all(line).and_then(|_| file.sync_data());
        if let Err(e) = written {
            if let Err(trunc) = file.set_len(pre_len).and_then(|_| file.sync_data()) {
                tracing::error!("Failed to roll back partial ledger write: {trunc}");
            }
            return Err(e);
        }
        Ok(())
    }
}

impl LedgerBackend for FileBackend {
    fn load(&self) -> Result<BTreeMap<SessionId, SessionLoad>, CoreError> {
        let mut sessions = BTreeMap::new();
        for (session_id, path) in self.session_files()? {
            let load = Self::load_session(&path)?;
            sessions.insert(session_id, load);
        }
        Ok(sessions)
    }

    fn persist(&self, record: &LedgerRecord) -> Result<(), CoreError> {
        let path = self.session_path(&record.envelope.session_id);
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        fs2::FileExt::lock_exclusive(&file).map_err(CoreError::Io)?;
        let written = Self::append_line(&file, &line);
        fs2::FileExt::unlock(&file).map_err(CoreError::Io)?;
        written?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("file:{}", self.dir.display())
    }
}
