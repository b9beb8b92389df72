use tokio::time::{Duration, Instant};

use crate::config::CaptureConfig;
use crate::error::DeviceError;

/// キャプチャ済みフレーム（RGB8, 行優先）
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self { width, height, data }
    }

    /// 全画素ゼロのフレーム
    pub fn black(width: u32, height: u32) -> Self {
        Self::new(width, height, vec![0; (width * height * 3) as usize])
    }

    /// 空/真っ黒でないか（エンコード前のサニティチェック）
    pub fn has_content(&self) -> bool {
        self.width > 0 && self.height > 0 && self.data.iter().any(|&b| b != 0)
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = ((y * self.width + x) * 3) as usize;
        self.data.get(i..i + 3).map(|p| [p[0], p[1], p[2]])
    }
}

/// カメラ等の映像ソース。セッションが排他的に所有する
pub trait FrameSource: Send {
    /// ネイティブ解像度。メタデータ確定前は (0, 0)
    fn resolution(&self) -> (u32, u32);

    fn is_ready(&self) -> bool {
        let (w, h) = self.resolution();
        w > 0 && h > 0
    }

    /// 最新フレーム。初回フレーム到着前はNone
    fn current_frame(&mut self) -> Option<Frame>;

    /// デバイスを停止する。何度呼んでもよい
    fn release(&mut self);

    fn describe(&self) -> String;
}

/// カメラなしで動かすためのテストパターンソース
pub struct SyntheticSource {
    width: u32,
    height: u32,
    ready_at: Instant,
    blank: bool,
    frame_count: u64,
    released: bool,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ready_at: Instant::now(),
            blank: false,
            frame_count: 0,
            released: false,
        }
    }

    /// メタデータ確定までの待ち時間を模擬する
    pub fn with_warmup(mut self, warmup: Duration) -> Self {
        self.ready_at = Instant::now() + warmup;
        self
    }

    /// 真っ黒なフレームしか出さない（エンコード失敗の再現用）
    pub fn blank(mut self) -> Self {
        self.blank = true;
        self
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    fn render_pattern(&self) -> Frame {
        let (w, h) = (self.width, self.height);
        let mut data = Vec::with_capacity((w * h * 3) as usize);
        // 斜めのグラデーションを毎フレーム少しずつ流す
        let shift = (self.frame_count % 256) as u32;
        for y in 0..h {
            for x in 0..w {
                let r = ((x * 255) / w.max(1)) as u8;
                let g = ((y * 255) / h.max(1)) as u8;
                let b = ((x + y + shift) % 256) as u8;
                data.extend_from_slice(&[r, g, b]);
            }
        }
        Frame::new(w, h, data)
    }
}

impl FrameSource for SyntheticSource {
    fn resolution(&self) -> (u32, u32) {
        if self.released || Instant::now() < self.ready_at {
            (0, 0)
        } else {
            (self.width, self.height)
        }
    }

    fn current_frame(&mut self) -> Option<Frame> {
        if !self.is_ready() {
            return None;
        }
        self.frame_count += 1;
        if self.blank {
            return Some(Frame::black(self.width, self.height));
        }
        Some(self.render_pattern())
    }

    fn release(&mut self) {
        if !self.released {
            tracing::debug!("synthetic source released");
        }
        self.released = true;
    }

    fn describe(&self) -> String {
        format!("synthetic {}x{}", self.width, self.height)
    }
}

#[cfg(feature = "desktop")]
pub use self::opencv_camera::OpenCvCamera;

#[cfg(feature = "desktop")]
mod opencv_camera {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    use opencv::core::Mat;
    use opencv::imgproc;
    use opencv::prelude::*;
    use opencv::videoio::{self, VideoCapture, VideoCaptureAPIs};

    use super::{Frame, FrameSource};
    use crate::error::DeviceError;

    /// 別スレッドでカメラキャプチャを行い、最新フレームを提供する
    pub struct OpenCvCamera {
        index: i32,
        latest: Arc<Mutex<Option<Mat>>>,
        running: Arc<AtomicBool>,
        width: u32,
        height: u32,
        handle: Option<thread::JoinHandle<()>>,
    }

    impl OpenCvCamera {
        /// 解像度を指定してカメラを開き、キャプチャスレッドを開始する
        pub fn start(index: i32, width: u32, height: u32) -> Result<Self, DeviceError> {
            let unavailable = |e: opencv::Error| DeviceError::Unavailable(format!("camera {index}: {e}"));

            let mut capture =
                VideoCapture::new(index, VideoCaptureAPIs::CAP_ANY as i32).map_err(unavailable)?;
            if !capture.is_opened().map_err(unavailable)? {
                return Err(DeviceError::Unavailable(format!("camera {index} is not available")));
            }

            capture
                .set(videoio::CAP_PROP_FRAME_WIDTH, width as f64)
                .map_err(unavailable)?;
            capture
                .set(videoio::CAP_PROP_FRAME_HEIGHT, height as f64)
                .map_err(unavailable)?;
            capture.set(videoio::CAP_PROP_BUFFERSIZE, 1.0).map_err(unavailable)?;

            // 要求どおりになるとは限らないので実際の値を使う
            let actual_width = capture.get(videoio::CAP_PROP_FRAME_WIDTH).map_err(unavailable)? as u32;
            let actual_height = capture.get(videoio::CAP_PROP_FRAME_HEIGHT).map_err(unavailable)? as u32;
            tracing::info!(index, width = actual_width, height = actual_height, "camera opened");

            let latest = Arc::new(Mutex::new(None::<Mat>));
            let latest_ref = Arc::clone(&latest);
            let running = Arc::new(AtomicBool::new(true));
            let running_ref = Arc::clone(&running);

            let handle = thread::spawn(move || {
                while running_ref.load(Ordering::Relaxed) {
                    let mut frame = Mat::default();
                    match capture.read(&mut frame) {
                        Ok(true) if !frame.empty() => {
                            if let Ok(mut slot) = latest_ref.lock() {
                                *slot = Some(frame);
                            }
                        }
                        Ok(_) => thread::sleep(Duration::from_millis(5)),
                        Err(e) => {
                            tracing::warn!(index, "camera read error: {e}");
                            thread::sleep(Duration::from_millis(100));
                        }
                    }
                }
                if let Err(e) = capture.release() {
                    tracing::warn!(index, "camera release failed: {e}");
                }
            });

            Ok(Self {
                index,
                latest,
                running,
                width: actual_width,
                height: actual_height,
                handle: Some(handle),
            })
        }

        fn to_frame(mat: &Mat) -> opencv::Result<Frame> {
            let mut rgb = Mat::default();
            imgproc::cvt_color_def(mat, &mut rgb, imgproc::COLOR_BGR2RGB)?;
            let width = rgb.cols() as u32;
            let height = rgb.rows() as u32;
            let data = rgb.data_bytes()?.to_vec();
            Ok(Frame::new(width, height, data))
        }
    }

    impl FrameSource for OpenCvCamera {
        fn resolution(&self) -> (u32, u32) {
            if self.handle.is_none() {
                return (0, 0);
            }
            // 初回フレームが届くまではメタデータ未確定扱い
            match self.latest.lock() {
                Ok(slot) if slot.is_some() => (self.width, self.height),
                _ => (0, 0),
            }
        }

        fn current_frame(&mut self) -> Option<Frame> {
            let mat = self.latest.lock().ok()?.as_ref().map(|m| m.clone())?;
            match Self::to_frame(&mat) {
                Ok(frame) => Some(frame),
                Err(e) => {
                    tracing::debug!(index = self.index, "frame conversion failed: {e}");
                    None
                }
            }
        }

        fn release(&mut self) {
            self.running.store(false, Ordering::Relaxed);
            if let Some(handle) = self.handle.take() {
                if handle.join().is_err() {
                    tracing::warn!(index = self.index, "camera thread panicked");
                }
                tracing::info!(index = self.index, "camera released");
            }
            if let Ok(mut slot) = self.latest.lock() {
                *slot = None;
            }
        }

        fn describe(&self) -> String {
            format!("camera {} ({}x{})", self.index, self.width, self.height)
        }
    }

    impl Drop for OpenCvCamera {
        fn drop(&mut self) {
            self.release();
        }
    }
}

/// 設定に従って映像ソースを取得する
pub fn open_source(config: &CaptureConfig, synthetic: bool) -> Result<Box<dyn FrameSource>, DeviceError> {
    if synthetic {
        return Ok(Box::new(SyntheticSource::new(config.width, config.height)));
    }

    #[cfg(feature = "desktop")]
    {
        let camera = OpenCvCamera::start(config.camera_index, config.width, config.height)?;
        Ok(Box::new(camera))
    }

    #[cfg(not(feature = "desktop"))]
    {
        Err(DeviceError::Unavailable(format!(
            "camera {} requested but camera support is not compiled in (enable the `desktop` feature or use --synthetic)",
            config.camera_index
        )))
    }
}
