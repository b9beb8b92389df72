use tokio::time::{self, Duration, Instant, Interval, MissedTickBehavior};

pub const DEFAULT_PERIOD: Duration = Duration::from_millis(100);
pub const DEFAULT_START_DELAY: Duration = Duration::from_millis(500);

/// 固定周期のtick。停止中は永遠にpending
///
/// `select!` の一腕として使う前提。停止すると内部のIntervalを破棄するので、
/// stop後にtickが発火することはない。
#[derive(Debug)]
pub struct Scheduler {
    period: Duration,
    start_delay: Duration,
    interval: Option<Interval>,
    ticks: u64,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(DEFAULT_PERIOD, DEFAULT_START_DELAY)
    }
}

impl Scheduler {
    pub fn new(period: Duration, start_delay: Duration) -> Self {
        Self {
            period: period.max(Duration::from_millis(1)),
            start_delay,
            interval: None,
            ticks: 0,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_running(&self) -> bool {
        self.interval.is_some()
    }

    /// 最初のtickは start_delay 後
    pub fn start(&mut self) {
        let mut interval = time::interval_at(Instant::now() + self.start_delay, self.period);
        // 遅延したtickはまとめて撃たずに捨てる
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.interval = Some(interval);
        self.ticks = 0;
    }

    pub fn stop(&mut self) {
        self.interval = None;
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub async fn tick(&mut self) -> Instant {
        match self.interval.as_mut() {
            Some(interval) => {
                let at = interval.tick().await;
                self.ticks += 1;
                at
            }
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_after_start_delay() {
        let mut scheduler = Scheduler::new(Duration::from_millis(100), Duration::from_millis(500));
        let started = Instant::now();
        scheduler.start();

        let first = scheduler.tick().await;
        assert_eq!(first - started, Duration::from_millis(500));
        let second = scheduler.tick().await;
        assert_eq!(second - first, Duration::from_millis(100));
        assert_eq!(scheduler.ticks(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_tick_after_stop() {
        let mut scheduler = Scheduler::new(Duration::from_millis(100), Duration::ZERO);
        scheduler.start();
        scheduler.tick().await;
        scheduler.stop();
        assert!(!scheduler.is_running());

        let fired = time::timeout(Duration::from_secs(10), scheduler.tick()).await;
        assert!(fired.is_err());
        assert_eq!(scheduler.ticks(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_tick_handler_skips_missed_ticks() {
        let mut scheduler = Scheduler::new(Duration::from_millis(100), Duration::ZERO);
        scheduler.start();
        let first = scheduler.tick().await;

        // ハンドラが350ms掛かった想定
        time::advance(Duration::from_millis(350)).await;
        scheduler.tick().await;
        assert_eq!(Instant::now() - first, Duration::from_millis(350));

        // 取りこぼした200ms/300msは撃たず、次の周期境界に揃う
        let next = scheduler.tick().await;
        assert_eq!(next - first, Duration::from_millis(400));
        assert_eq!(scheduler.ticks(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_resets_tick_count() {
        let mut scheduler = Scheduler::default();
        scheduler.start();
        scheduler.tick().await;
        scheduler.stop();
        scheduler.start();
        assert_eq!(scheduler.ticks(), 0);
        assert_eq!(scheduler.period(), DEFAULT_PERIOD);
    }
}
