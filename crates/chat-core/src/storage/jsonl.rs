use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use super::{sort_by_timestamp, MessageStore};
use crate::conversation::Conversation;
use crate::message::Message;

const JOURNAL_FILE: &str = "messages.jsonl";
const CONVERSATIONS_DIR: &str = "conversations";
/// Superseded journal lines tolerated before a delete triggers compaction.
const COMPACT_THRESHOLD: usize = 256;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum JournalEntry {
    Upsert { message: Message },
    Delete { id: String },
}

/// Append-only message journal plus one JSON file per conversation.
///
/// Every write appends an upsert or delete line; reads replay the journal.
/// Lines that fail to parse are skipped. The journal is rewritten to one line
/// per live message on `init` and whenever a delete finds too many superseded
/// lines.
#[derive(Debug)]
pub struct JsonlMessageStore {
    base_path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlMessageStore {
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub async fn init(&self) -> std::io::Result<()> {
        fs::create_dir_all(self.base_path.join(CONVERSATIONS_DIR)).await?;
        let _guard = self.write_lock.lock().await;
        let replayed = self.replay().await?;
        if replayed.superseded() > 0 {
            self.compact(&replayed.messages).await?;
        }
        Ok(())
    }

    pub async fn save_conversation(&self, conversation: &Conversation) -> std::io::Result<()> {
        let json = serde_json::to_string(conversation)?;
        fs::write(self.conversation_path(&conversation.id), json).await
    }

    pub async fn load_conversation(&self, conversation_id: &str) -> std::io::Result<Option<Conversation>> {
        let path = self.conversation_path(conversation_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path).await?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// All conversations, most recently updated first.
    pub async fn list_conversations(&self) -> std::io::Result<Vec<Conversation>> {
        let dir = self.base_path.join(CONVERSATIONS_DIR);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = fs::read_dir(dir).await?;
        let mut conversations = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let content = fs::read_to_string(&path).await?;
            match serde_json::from_str::<Conversation>(&content) {
                Ok(conversation) => conversations.push(conversation),
                Err(e) => log::warn!("Skipping unreadable conversation {:?}: {}", path, e),
            }
        }
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(conversations)
    }

    async fn append(&self, entry: &JournalEntry) -> std::io::Result<()> {
        let json = serde_json::to_string(entry)?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.journal_path())
            .await?;
        file.write_all(json.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await
    }

    /// Rewrite the journal as one upsert per message. Callers hold the write lock.
    async fn compact(&self, messages: &[Message]) -> std::io::Result<()> {
        let mut contents = String::new();
        for message in messages {
            contents.push_str(&serde_json::to_string(&JournalEntry::Upsert {
                message: message.clone(),
            })?);
            contents.push('\n');
        }

        let tmp = self.journal_path().with_extension("jsonl.tmp");
        fs::write(&tmp, contents).await?;
        fs::rename(&tmp, self.journal_path()).await?;
        log::debug!("Compacted message journal to {} entries", messages.len());
        Ok(())
    }

    /// Current state of every message, in first-insertion order.
    async fn replay(&self) -> std::io::Result<Replayed> {
        let path = self.journal_path();
        if !path.exists() {
            return Ok(Replayed::default());
        }

        let file = fs::File::open(path).await?;
        let mut lines = BufReader::new(file).lines();
        let mut messages: Vec<Message> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        let mut lines_read = 0;

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            lines_read += 1;
            let entry = match serde_json::from_str::<JournalEntry>(&line) {
                Ok(entry) => entry,
                Err(e) => {
                    log::debug!("Skipping malformed journal line: {}", e);
                    continue;
                }
            };
            match entry {
                JournalEntry::Upsert { message } => match positions.get(&message.id) {
                    Some(&index) => messages[index] = message,
                    None => {
                        positions.insert(message.id.clone(), messages.len());
                        messages.push(message);
                    }
                },
                JournalEntry::Delete { id } => {
                    if let Some(index) = positions.remove(&id) {
                        messages.remove(index);
                        for position in positions.values_mut() {
                            if *position > index {
                                *position -= 1;
                            }
                        }
                    }
                }
            }
        }

        Ok(Replayed {
            messages,
            lines: lines_read,
        })
    }

    fn journal_path(&self) -> PathBuf {
        self.base_path.join(JOURNAL_FILE)
    }

    fn conversation_path(&self, conversation_id: &str) -> PathBuf {
        self.base_path
            .join(CONVERSATIONS_DIR)
            .join(format!("{}.json", conversation_id))
    }
}

#[derive(Debug, Default)]
struct Replayed {
    messages: Vec<Message>,
    /// Parsed journal lines, malformed ones excluded.
    lines: usize,
}

impl Replayed {
    fn superseded(&self) -> usize {
        self.lines.saturating_sub(self.messages.len())
    }
}

#[async_trait]
impl MessageStore for JsonlMessageStore {
    async fn insert_or_replace(&self, message: &Message) -> std::io::Result<()> {
        let _guard = self.write_lock.lock().await;
        self.append(&JournalEntry::Upsert {
            message: message.clone(),
        })
        .await
    }

    async fn delete(&self, message_id: &str) -> std::io::Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut replayed = self.replay().await?;
        let Some(index) = replayed.messages.iter().position(|m| m.id == message_id) else {
            return Ok(false);
        };

        replayed.messages.remove(index);
        // The delete line itself would be one more superseded line.
        if replayed.superseded() + 1 >= COMPACT_THRESHOLD {
            self.compact(&replayed.messages).await?;
        } else {
            self.append(&JournalEntry::Delete {
                id: message_id.to_string(),
            })
            .await?;
        }
        Ok(true)
    }

    async fn get_messages(&self, conversation_id: &str) -> std::io::Result<Vec<Message>> {
        let mut messages: Vec<Message> = self
            .replay()
            .await?
            .messages
            .into_iter()
            .filter(|m| m.conversation_id == conversation_id)
            .collect();
        sort_by_timestamp(&mut messages);
        Ok(messages)
    }
}
