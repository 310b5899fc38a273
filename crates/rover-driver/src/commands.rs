//! 操作台串口命令
//!
//! 行协议，`\r` 或 `\n` 结束一条命令，只缓冲可打印 ASCII（最多 255 字符）。
//!
//! | 命令 | 响应 |
//! |------|------|
//! | `GET_LOG_FILENAME` | `LOG_FILENAME:/<name>` |
//! | `LIST_FILES` | `FILE_LIST_START`，`FILE:<name>:<size>` / `DIR:<name>`，`FILE_LIST_END` |
//! | `DOWNLOAD_FILE:<name>` | `FILE_SIZE:<n>`，`FILE_START`，原始字节，`\nFILE_END` |
//! | `CONTROLS:<s>,<t>,<c3>` | 无响应，更新共享遥控输入 |
//!
//! 未知命令被忽略。

use crate::control::{ControlSample, SharedControls};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// 单条命令最大长度
pub const MAX_COMMAND_LEN: usize = 255;

/// 文件下载分块大小
const FILE_CHUNK_SIZE: usize = 512;

/// 解析后的命令
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    GetLogFilename,
    ListFiles,
    DownloadFile(String),
    SetControls(ControlSample),
}

impl Command {
    /// 按前缀匹配解析一行；未知命令返回 None
    pub fn parse(line: &str) -> Option<Self> {
        if line.starts_with("GET_LOG_FILENAME") {
            Some(Command::GetLogFilename)
        } else if line.starts_with("LIST_FILES") {
            Some(Command::ListFiles)
        } else if let Some(name) = line.strip_prefix("DOWNLOAD_FILE:") {
            Some(Command::DownloadFile(name.to_string()))
        } else if let Some(values) = line.strip_prefix("CONTROLS:") {
            let mut it = values.split(',').map(|v| v.trim().parse::<f32>());
            match (it.next(), it.next(), it.next()) {
                (Some(Ok(s)), Some(Ok(t)), Some(Ok(c3))) => {
                    Some(Command::SetControls(ControlSample::new(s, t, c3)))
                },
                _ => None,
            }
        } else {
            None
        }
    }
}

/// 逐字节组装命令行
#[derive(Debug, Default)]
pub struct CommandProcessor {
    buffer: String,
}

impl CommandProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 输入一个字节，行结束时返回解析结果
    pub fn feed(&mut self, byte: u8) -> Option<Command> {
        match byte {
            b'\r' | b'\n' => {
                if self.buffer.is_empty() {
                    return None;
                }
                let line = std::mem::take(&mut self.buffer);
                let command = Command::parse(&line);
                if command.is_none() {
                    debug!("Ignoring unknown command: {}", line);
                }
                command
            },
            32..=126 => {
                if self.buffer.len() < MAX_COMMAND_LEN {
                    self.buffer.push(char::from(byte));
                }
                None
            },
            _ => None,
        }
    }
}

/// 命令执行环境
#[derive(Debug, Clone)]
pub struct CommandContext {
    /// 存储根目录（None 表示没有存储）
    pub storage_root: Option<PathBuf>,
    /// 当前会话日志文件名
    pub log_file_name: Option<String>,
    pub controls: SharedControls,
}

impl CommandContext {
    /// 执行命令，响应写入 `out`
    pub fn execute(&self, command: &Command, out: &mut impl Write) -> io::Result<()> {
        match command {
            Command::GetLogFilename => {
                let name = self.log_file_name.as_deref().unwrap_or_default();
                writeln!(out, "LOG_FILENAME:/{}", name)?;
            },
            Command::ListFiles => self.list_files(out)?,
            Command::DownloadFile(name) => self.download_file(name, out)?,
            Command::SetControls(sample) => self.controls.set(*sample),
        }
        out.flush()
    }

    fn list_files(&self, out: &mut impl Write) -> io::Result<()> {
        writeln!(out, "FILE_LIST_START")?;
        let Some(root) = &self.storage_root else {
            return writeln!(out, "FILE_LIST_ERROR:No storage");
        };

        let entries = match std::fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) => {
                return writeln!(
                    out,
                    "FILE_LIST_ERROR:Cannot open directory {} ({})",
                    root.display(),
                    e
                );
            },
        };

        let mut listed: Vec<(String, Option<u64>)> = Vec::new();
        for entry in entries.flatten() {
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            if meta.is_file() {
                listed.push((name, Some(meta.len())));
            } else if meta.is_dir() {
                listed.push((name, None));
            }
        }
        listed.sort();

        for (name, size) in listed {
            match size {
                Some(size) => writeln!(out, "FILE:{}:{}", name, size)?,
                None => writeln!(out, "DIR:{}", name)?,
            }
        }
        writeln!(out, "FILE_LIST_END")
    }

    fn download_file(&self, name: &str, out: &mut impl Write) -> io::Result<()> {
        let Some(path) = self.resolve(name) else {
            return writeln!(out, "FILE_ERROR:File not found");
        };
        let size = match std::fs::metadata(&path) {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => return writeln!(out, "FILE_ERROR:File not found"),
        };
        let Ok(mut file) = File::open(&path) else {
            return writeln!(out, "FILE_ERROR:Cannot open file");
        };

        writeln!(out, "FILE_SIZE:{}", size)?;
        writeln!(out, "FILE_START")?;
        let mut chunk = [0u8; FILE_CHUNK_SIZE];
        loop {
            let n = file.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            out.write_all(&chunk[..n])?;
        }
        write!(out, "\nFILE_END\n")
    }

    /// 把命令中的文件名解析到存储根目录下；拒绝跳出根目录的路径
    fn resolve(&self, name: &str) -> Option<PathBuf> {
        let root = self.storage_root.as_ref()?;
        let relative = Path::new(name.trim_start_matches('/'));
        if relative.as_os_str().is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return None;
        }
        Some(root.join(relative))
    }
}
