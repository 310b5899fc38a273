//! 合成数据流命令
//!
//! 生成与传感器串口输出格式一致的字节流，用于 `run --input` 回放。

use anyhow::{Context, Result, ensure};
use clap::Args;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rover_protocol::{END, FrameHeader, MAX_SIZE, encode_packet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

/// 合成命令参数
#[derive(Args, Debug)]
pub struct SynthCommand {
    /// 输出文件路径
    #[arg(short, long)]
    pub output: PathBuf,

    /// 帧数
    #[arg(short = 'n', long, default_value_t = 100)]
    pub frames: usize,

    /// 每帧行数
    #[arg(long, default_value_t = 25)]
    pub rows: u8,

    /// 每帧列数
    #[arg(long, default_value_t = 25)]
    pub cols: u8,

    /// 帧间噪声字节数上限
    #[arg(long, default_value_t = 0)]
    pub noise: usize,

    /// 随机种子（默认随机）
    #[arg(long)]
    pub seed: Option<u64>,
}

impl SynthCommand {
    pub fn execute(&self) -> Result<()> {
        ensure!(
            (1..=MAX_SIZE).contains(&usize::from(self.rows))
                && (1..=MAX_SIZE).contains(&usize::from(self.cols)),
            "rows/cols must be in 1..={}",
            MAX_SIZE
        );

        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let file = File::create(&self.output)
            .with_context(|| format!("创建输出文件失败: {}", self.output.display()))?;
        let mut out = BufWriter::new(file);
        let written = write_stream(
            &mut out,
            &mut rng,
            self.frames,
            self.rows,
            self.cols,
            self.noise,
        )?;
        out.flush()?;

        println!(
            "✅ 已生成 {} 帧 ({}x{}, {} 字节): {}",
            self.frames,
            self.rows,
            self.cols,
            written,
            self.output.display()
        );
        Ok(())
    }
}

/// 写出 `frames` 个数据包，返回写出的字节数
///
/// 深度值是随帧移动的斜坡加随机抖动，始终小于结束字节；
/// 噪声字节不含起始字节 `0x00`，不会制造伪帧。
pub fn write_stream(
    out: &mut impl Write,
    rng: &mut impl Rng,
    frames: usize,
    rows: u8,
    cols: u8,
    noise: usize,
) -> Result<usize> {
    let header = FrameHeader::with_resolution(rows, cols);
    let mut written = 0;

    for frame in 0..frames {
        let mut payload = Vec::with_capacity(usize::from(rows) * usize::from(cols));
        for r in 0..usize::from(rows) {
            for c in 0..usize::from(cols) {
                let ramp = (r + c + frame) % 150;
                let jitter: usize = rng.gen_range(0..8);
                payload.push((5 + ramp + jitter).min(usize::from(END) - 1) as u8);
            }
        }

        let packet = encode_packet(&header, &payload, [0, 0]);
        out.write_all(&packet)?;
        written += packet.len();

        if noise > 0 {
            let count = rng.gen_range(0..=noise);
            let junk: Vec<u8> = (0..count).map(|_| rng.gen_range(1..=u8::MAX)).collect();
            out.write_all(&junk)?;
            written += junk.len();
        }
    }

    Ok(written)
}
