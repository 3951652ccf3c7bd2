/*
    log_file.rs - On-disk layout of a single log

    <data_dir>/<hex(target id)>/<log id>         newline-delimited event records
    <data_dir>/<hex(target id)>/<log id>.index   textual low watermark

    Rewrites go to a temporary sibling and are renamed into place, so a failed
    write never leaves a partial data or index file.
*/

use crate::core_log::codec;
use crate::core_log::descriptor::LogKey;
use crate::core_log::event::Event;
use crate::core_log::store::errors::{StoreError, StoreResult};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

const INDEX_SUFFIX: &str = ".index";
const TEMP_SUFFIX: &str = ".tmp";

/// Directory name used for a target
pub fn target_dir_name(target_id: &str) -> String {
    hex::encode(target_id.as_bytes())
}

/// Inverse of [`target_dir_name`]; `None` for foreign directories
pub fn target_from_dir_name(name: &str) -> Option<String> {
    hex::decode(name).ok().and_then(|bytes| String::from_utf8(bytes).ok())
}

/// Log id encoded in a data or index file name; `None` for anything else
pub fn log_id_from_file_name(name: &str) -> Option<u64> {
    name.strip_suffix(INDEX_SUFFIX).unwrap_or(name).parse().ok()
}

/// Paths of one log's data and watermark files
#[derive(Debug, Clone)]
pub struct LogFile {
    data_path: PathBuf,
    index_path: PathBuf,
}

impl LogFile {
    pub fn new(root: &Path, key: &LogKey) -> Self {
        let dir = root.join(target_dir_name(&key.target_id));
        LogFile {
            data_path: dir.join(key.log_id.to_string()),
            index_path: dir.join(format!("{}{}", key.log_id, INDEX_SUFFIX)),
        }
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    /// All stored events in file order; a missing file is an empty log
    pub fn read_events(&self) -> StoreResult<Vec<Event>> {
        let file = match File::open(&self.data_path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut events = Vec::new();
        for (number, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let event = codec::decode_event(&line).map_err(|e| {
                StoreError::Corrupted(format!(
                    "{} line {}: {}",
                    self.data_path.display(),
                    number + 1,
                    e
                ))
            })?;
            events.push(event);
        }
        Ok(events)
    }

    /// Append events to the end of the data file
    pub fn append_events(&self, events: &[Event]) -> StoreResult<()> {
        self.ensure_dir()?;
        let file = OpenOptions::new().create(true).append(true).open(&self.data_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(codec::encode_events(events).as_bytes())?;
        writer.flush()?;
        Ok(())
    }

    /// Replace the whole data file with `events`
    pub fn rewrite_events(&self, events: &[Event]) -> StoreResult<()> {
        self.ensure_dir()?;
        Ok(write_atomically(&self.data_path, codec::encode_events(events).as_bytes())?)
    }

    /// Persisted watermark. A missing file means 0; an unreadable one is
    /// logged and also treated as 0.
    pub fn read_watermark(&self) -> StoreResult<u64> {
        let contents = match fs::read_to_string(&self.index_path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        match contents.trim().parse() {
            Ok(value) => Ok(value),
            Err(_) => {
                warn!(
                    path = %self.index_path.display(),
                    "unreadable low watermark, treating as 0"
                );
                Ok(0)
            }
        }
    }

    pub fn write_watermark(&self, value: u64) -> StoreResult<()> {
        self.ensure_dir()?;
        Ok(write_atomically(&self.index_path, value.to_string().as_bytes())?)
    }

    fn ensure_dir(&self) -> StoreResult<()> {
        if let Some(parent) = self.data_path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

/// Write to a temporary sibling, sync, then rename over `path`
pub fn write_atomically(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(TEMP_SUFFIX);
    let temp_path = PathBuf::from(temp_name);

    let result = (|| -> std::io::Result<()> {
        let mut file = File::create(&temp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp_path, path)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}
