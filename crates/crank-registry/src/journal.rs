//! Append-only on-disk journal backing the capability registry.
//!
//! Each line is a self-describing JSON record `{seq, ts, kind, payload}`.
//! A truncated or corrupt trailing line is discarded on recovery rather
//! than treated as an error, since it can only result from a crash
//! mid-write.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::CapabilityDefinition;

#[derive(Debug, thiserror::Error)]
pub enum JournalError {
	#[error("opening journal {path}: {source}")]
	Open {
		path: String,
		#[source]
		source: std::io::Error,
	},
	#[error("writing journal {path}: {source}")]
	Write {
		path: String,
		#[source]
		source: std::io::Error,
	},
	#[error("reading journal {path}: {source}")]
	Read {
		path: String,
		#[source]
		source: std::io::Error,
	},
	#[error("journal {path} is corrupt at line {line_no}: {source}")]
	Corrupt {
		path: String,
		line_no: usize,
		#[source]
		source: serde_json::Error,
	},
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalKind {
	Registered,
	Heartbeat,
	Deregistered,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredPayload {
	pub worker_id: String,
	pub worker_url: String,
	pub capabilities: Vec<CapabilityDefinition>,
	#[serde(default)]
	pub registration_metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatPayload {
	pub worker_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeregisteredPayload {
	pub worker_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
	pub seq: u64,
	pub ts: chrono::DateTime<chrono::Utc>,
	pub kind: JournalKind,
	pub payload: serde_json::Value,
}

impl JournalEntry {
	pub fn registered(seq: u64, payload: &RegisteredPayload) -> Self {
		Self {
			seq,
			ts: chrono::Utc::now(),
			kind: JournalKind::Registered,
			payload: serde_json::to_value(payload).expect("RegisteredPayload always serializes"),
		}
	}

	pub fn heartbeat(seq: u64, worker_id: &str) -> Self {
		Self {
			seq,
			ts: chrono::Utc::now(),
			kind: JournalKind::Heartbeat,
			payload: serde_json::to_value(HeartbeatPayload {
				worker_id: worker_id.to_string(),
			})
			.expect("HeartbeatPayload always serializes"),
		}
	}

	pub fn deregistered(seq: u64, worker_id: &str) -> Self {
		Self {
			seq,
			ts: chrono::Utc::now(),
			kind: JournalKind::Deregistered,
			payload: serde_json::to_value(DeregisteredPayload {
				worker_id: worker_id.to_string(),
			})
			.expect("DeregisteredPayload always serializes"),
		}
	}
}

/// Append-only writer over the journal file. A single instance owns the
/// file handle; callers serialize access through the registry's mutex.
pub struct Journal {
	path: PathBuf,
	file: File,
	next_seq: u64,
}

impl Journal {
	/// Opens (creating if absent) the journal at `path`, replaying every
	/// well-formed entry through `apply`. A truncated trailing line is
	/// logged and discarded, not treated as an error.
	pub fn open_and_recover(
		path: impl AsRef<Path>,
		mut apply: impl FnMut(JournalEntry),
	) -> Result<Self, JournalError> {
		let path = path.as_ref().to_path_buf();
		if let Some(parent) = path.parent()
			&& !parent.as_os_str().is_empty()
		{
			std::fs::create_dir_all(parent).map_err(|source| JournalError::Open {
				path: path.display().to_string(),
				source,
			})?;
		}

		let mut next_seq = 0u64;
		if path.exists() {
			let file = File::open(&path).map_err(|source| JournalError::Read {
				path: path.display().to_string(),
				source,
			})?;
			let reader = BufReader::new(file);
			let mut lines = Vec::new();
			for line in reader.lines() {
				match line {
					Ok(l) => lines.push(l),
					Err(_) => break,
				}
			}

			for (idx, line) in lines.iter().enumerate() {
				if line.trim().is_empty() {
					continue;
				}
				match serde_json::from_str::<JournalEntry>(line) {
					Ok(entry) => {
						next_seq = next_seq.max(entry.seq + 1);
						apply(entry);
					}
					Err(source) => {
						let more_follow = lines[idx + 1..].iter().any(|l| !l.trim().is_empty());
						if more_follow {
							return Err(JournalError::Corrupt {
								path: path.display().to_string(),
								line_no: idx + 1,
								source,
							});
						}
						tracing::warn!(
							path = %path.display(),
							"discarding truncated trailing journal line",
						);
						break;
					}
				}
			}
		}

		let file = OpenOptions::new()
			.create(true)
			.append(true)
			.open(&path)
			.map_err(|source| JournalError::Open {
				path: path.display().to_string(),
				source,
			})?;

		Ok(Self {
			path,
			file,
			next_seq,
		})
	}

	/// Allocates the next sequence number without writing anything.
	pub fn next_seq(&mut self) -> u64 {
		let seq = self.next_seq;
		self.next_seq += 1;
		seq
	}

	/// Appends `entry` and fsyncs before returning, per the journal's
	/// durability discipline.
	pub fn append(&mut self, entry: &JournalEntry) -> Result<(), JournalError> {
		let mut line = serde_json::to_string(entry).expect("JournalEntry always serializes");
		line.push('\n');
		self.file
			.write_all(line.as_bytes())
			.map_err(|source| JournalError::Write {
				path: self.path.display().to_string(),
				source,
			})?;
		self.file.sync_data().map_err(|source| JournalError::Write {
			path: self.path.display().to_string(),
			source,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn recovers_empty_journal() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("registry.jsonl");
		let mut seen = Vec::new();
		let journal = Journal::open_and_recover(&path, |e| seen.push(e)).unwrap();
		assert!(seen.is_empty());
		assert_eq!(journal.next_seq, 0);
	}

	#[test]
	fn recovers_and_replays_entries() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("registry.jsonl");
		{
			let mut journal = Journal::open_and_recover(&path, |_| {}).unwrap();
			let seq = journal.next_seq();
			let entry = JournalEntry::registered(
				seq,
				&RegisteredPayload {
					worker_id: "w1".into(),
					worker_url: "https://w1:8500".into(),
					capabilities: vec![],
					registration_metadata: Default::default(),
				},
			);
			journal.append(&entry).unwrap();
		}

		let mut seen = Vec::new();
		let journal = Journal::open_and_recover(&path, |e| seen.push(e)).unwrap();
		assert_eq!(seen.len(), 1);
		assert_eq!(journal.next_seq, 1);
	}

	#[test]
	fn discards_truncated_trailing_line() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("registry.jsonl");
		std::fs::write(
			&path,
			"{\"seq\":0,\"ts\":\"2024-01-01T00:00:00Z\",\"kind\":\"registered\",\"payload\":{\"worker_id\":\"w1\",\"worker_url\":\"https://w1:8500\",\"capabilities\":[]}}\n{\"seq\":1,\"ts\":\"trunc",
		)
		.unwrap();

		let mut seen = Vec::new();
		let journal = Journal::open_and_recover(&path, |e| seen.push(e)).unwrap();
		assert_eq!(seen.len(), 1);
		assert_eq!(journal.next_seq, 1);
	}
}
