//! 控制周期统计
//!
//! 按固定窗口（默认 1 秒）汇总帧率、各阶段平均耗时和窗口内的持久化丢弃数。

use std::time::{Duration, Instant};

/// 一个统计窗口的汇总
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleReport {
    pub fps: f32,
    /// 等待完整数据包的平均耗时
    pub avg_wait: Duration,
    /// 解析帧的平均耗时
    pub avg_decode: Duration,
    /// 模式分发（渲染/入队/追加）的平均耗时
    pub avg_dispatch: Duration,
    /// 窗口内丢弃的持久化记录
    pub dropped: u64,
}

/// 周期统计器
#[derive(Debug, Clone)]
pub struct CycleStats {
    window: Duration,
    window_start: Option<Instant>,
    frames: u32,
    wait: Duration,
    decode: Duration,
    dispatch: Duration,
    dropped_at_start: u64,
}

impl CycleStats {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            window_start: None,
            frames: 0,
            wait: Duration::ZERO,
            decode: Duration::ZERO,
            dispatch: Duration::ZERO,
            dropped_at_start: 0,
        }
    }

    /// 记录一帧的各阶段耗时
    pub fn record(&mut self, wait: Duration, decode: Duration, dispatch: Duration) {
        self.frames += 1;
        self.wait += wait;
        self.decode += decode;
        self.dispatch += dispatch;
    }

    /// 检查窗口；窗口结束时返回汇总并开始新窗口
    ///
    /// `dropped_total` 为持久化队列的累计丢弃数。第一次调用只打开窗口。
    pub fn tick(&mut self, now: Instant, dropped_total: u64) -> Option<CycleReport> {
        let Some(start) = self.window_start else {
            self.restart(now, dropped_total);
            return None;
        };

        let elapsed = now.saturating_duration_since(start);
        if elapsed < self.window {
            return None;
        }

        let report = (self.frames > 0).then(|| CycleReport {
            fps: self.frames as f32 / elapsed.as_secs_f32(),
            avg_wait: self.wait / self.frames,
            avg_decode: self.decode / self.frames,
            avg_dispatch: self.dispatch / self.frames,
            dropped: dropped_total.saturating_sub(self.dropped_at_start),
        });
        self.restart(now, dropped_total);
        report
    }

    fn restart(&mut self, now: Instant, dropped_total: u64) {
        self.window_start = Some(now);
        self.frames = 0;
        self.wait = Duration::ZERO;
        self.decode = Duration::ZERO;
        self.dispatch = Duration::ZERO;
        self.dropped_at_start = dropped_total;
    }
}

impl Default for CycleStats {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_after_window() {
        let mut stats = CycleStats::default();
        let t0 = Instant::now();
        assert!(stats.tick(t0, 5).is_none());

        for _ in 0..20 {
            stats.record(
                Duration::from_millis(40),
                Duration::from_micros(300),
                Duration::from_micros(100),
            );
        }
        assert!(stats.tick(t0 + Duration::from_millis(500), 7).is_none());

        let report = stats.tick(t0 + Duration::from_secs(1), 8).unwrap();
        assert!((report.fps - 20.0).abs() < 1e-3);
        assert_eq!(report.avg_wait, Duration::from_millis(40));
        assert_eq!(report.avg_decode, Duration::from_micros(300));
        assert_eq!(report.avg_dispatch, Duration::from_micros(100));
        assert_eq!(report.dropped, 3);

        // 新窗口从零开始
        assert!(stats.tick(t0 + Duration::from_secs(2), 8).is_none());
    }
}
