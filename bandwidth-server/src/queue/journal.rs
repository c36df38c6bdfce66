// 告警队列持久化日志
//
// 文件格式：连续的记录帧，每帧为 4 字节大端长度 + bincode 编码的 JournalRecord。
// 进程在写入中途崩溃会留下不完整的尾帧，重放时丢弃并告警。

use super::job::JournalRecord;
use async_trait::async_trait;
use common::{MonitorError, Result};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// 单帧上限，超过视为日志损坏
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[async_trait]
pub trait JobJournal: Send + Sync {
    /// 追加一条记录，返回时记录已持久化
    async fn append(&self, record: &JournalRecord) -> Result<()>;

    /// 读取全部记录
    async fn replay(&self) -> Result<Vec<JournalRecord>>;

    /// 用给定记录整体替换日志
    async fn compact(&self, records: &[JournalRecord]) -> Result<()>;
}

fn encode_frame(record: &JournalRecord) -> Result<Vec<u8>> {
    let body = bincode::serialize(record)
        .map_err(|e| MonitorError::Journal(format!("failed to encode record: {}", e)))?;
    let len = u32::try_from(body.len())
        .map_err(|_| MonitorError::Journal("record too large".to_string()))?;
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

fn decode_frames(buf: &[u8]) -> Result<Vec<JournalRecord>> {
    let mut records = Vec::new();
    let mut offset = 0usize;

    while offset < buf.len() {
        if buf.len() - offset < 4 {
            warn!("Discarding truncated journal frame header at offset {}", offset);
            break;
        }
        let len_bytes = [buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]];
        let len = u32::from_be_bytes(len_bytes) as usize;
        if len > MAX_FRAME_LEN {
            return Err(MonitorError::Journal(format!(
                "frame of {} bytes at offset {} exceeds limit",
                len, offset
            )));
        }
        let start = offset + 4;
        let end = start + len;
        if end > buf.len() {
            warn!("Discarding truncated journal frame at offset {}", offset);
            break;
        }
        let record = bincode::deserialize(&buf[start..end]).map_err(|e| {
            MonitorError::Journal(format!("corrupt record at offset {}: {}", offset, e))
        })?;
        records.push(record);
        offset = end;
    }

    Ok(records)
}

/// 基于文件的日志
pub struct FileJournal {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileJournal {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        info!("Alert queue journal opened at {}", path.display());
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }
}

#[async_trait]
impl JobJournal for FileJournal {
    async fn append(&self, record: &JournalRecord) -> Result<()> {
        let frame = encode_frame(record)?;
        let mut file = self.file.lock().await;
        file.write_all(&frame).await?;
        file.flush().await?;
        file.sync_data().await?;
        Ok(())
    }

    async fn replay(&self) -> Result<Vec<JournalRecord>> {
        let _guard = self.file.lock().await;
        let buf = fs::read(&self.path).await?;
        let records = decode_frames(&buf)?;
        debug!("Replayed {} journal records from {}", records.len(), self.path.display());
        Ok(records)
    }

    async fn compact(&self, records: &[JournalRecord]) -> Result<()> {
        let mut buf = Vec::new();
        for record in records {
            buf.extend_from_slice(&encode_frame(record)?);
        }

        let mut file = self.file.lock().await;
        let tmp_path = self.path.with_extension("compact");
        {
            let mut tmp = File::create(&tmp_path).await?;
            tmp.write_all(&buf).await?;
            tmp.flush().await?;
            tmp.sync_all().await?;
        }
        fs::rename(&tmp_path, &self.path).await?;

        // 重命名后旧句柄指向已被替换的文件，需要重新打开
        *file = OpenOptions::new().append(true).open(&self.path).await?;
        info!(
            "Compacted alert queue journal to {} records ({} bytes)",
            records.len(),
            buf.len()
        );
        Ok(())
    }
}

/// 内存日志，不跨重启保留
#[derive(Default)]
pub struct MemoryJournal {
    records: Mutex<Vec<JournalRecord>>,
    #[cfg(test)]
    unavailable: std::sync::atomic::AtomicBool,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// 模拟存储不可用
    #[cfg(test)]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable
            .store(unavailable, std::sync::atomic::Ordering::SeqCst);
    }

    #[cfg(test)]
    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(MonitorError::Journal("storage unavailable".to_string()));
        }
        Ok(())
    }

    #[cfg(not(test))]
    fn check_available(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl JobJournal for MemoryJournal {
    async fn append(&self, record: &JournalRecord) -> Result<()> {
        self.check_available()?;
        self.records.lock().await.push(record.clone());
        Ok(())
    }

    async fn replay(&self) -> Result<Vec<JournalRecord>> {
        Ok(self.records.lock().await.clone())
    }

    async fn compact(&self, records: &[JournalRecord]) -> Result<()> {
        *self.records.lock().await = records.to_vec();
        Ok(())
    }
}
