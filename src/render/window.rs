use image::RgbaImage;

use crate::camera::Frame;
use crate::protocol::BodyPart;

/// ユーザー操作（キーボード等から）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAction {
    ToggleAnalysis,
    AnalyzeOnce,
    ToggleConnection,
    SelectBodyPart(BodyPart),
    CycleMovement,
    Quit,
}

/// 映像とオーバーレイの表示先
pub trait Display {
    fn present(&mut self, frame: Option<&Frame>, overlay: &RgbaImage, status: &str) -> anyhow::Result<()>;

    fn poll_actions(&mut self) -> Vec<UserAction>;

    fn is_open(&self) -> bool;
}

/// 画面なし。ステータスが変わったときだけログに出す
#[derive(Debug, Default)]
pub struct HeadlessDisplay {
    last_status: String,
    presented: u64,
}

impl HeadlessDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }
}

impl Display for HeadlessDisplay {
    fn present(&mut self, _frame: Option<&Frame>, _overlay: &RgbaImage, status: &str) -> anyhow::Result<()> {
        self.presented += 1;
        if status != self.last_status {
            tracing::info!("{status}");
            self.last_status = status.to_string();
        }
        Ok(())
    }

    fn poll_actions(&mut self) -> Vec<UserAction> {
        Vec::new()
    }

    fn is_open(&self) -> bool {
        true
    }
}

#[cfg(feature = "desktop")]
pub use self::desktop::MinifbDisplay;

#[cfg(feature = "desktop")]
mod desktop {
    use anyhow::Result;
    use image::RgbaImage;
    use minifb::{Key, KeyRepeat, Window, WindowOptions};

    use super::{Display, UserAction};
    use crate::camera::Frame;
    use crate::protocol::BodyPart;
    use crate::render::raster::composite;

    /// minifbを使用したプレビューウィンドウ
    pub struct MinifbDisplay {
        window: Window,
        title: String,
        last_status: String,
        width: usize,
        height: usize,
    }

    impl MinifbDisplay {
        /// ウィンドウを作成
        pub fn new(title: &str, width: usize, height: usize) -> Result<Self> {
            let mut window = Window::new(
                title,
                width,
                height,
                WindowOptions {
                    resize: false,
                    ..WindowOptions::default()
                },
            )?;
            window.set_target_fps(60);

            Ok(Self {
                window,
                title: title.to_string(),
                last_status: String::new(),
                width,
                height,
            })
        }
    }

    impl Display for MinifbDisplay {
        fn present(&mut self, frame: Option<&Frame>, overlay: &RgbaImage, status: &str) -> Result<()> {
            let buffer = match frame {
                Some(frame) => composite(frame, overlay, self.width, self.height),
                None => composite(&Frame::black(0, 0), overlay, self.width, self.height),
            };
            if status != self.last_status {
                self.window.set_title(&format!("{} | {}", self.title, status));
                self.last_status = status.to_string();
            }
            self.window.update_with_buffer(&buffer, self.width, self.height)?;
            Ok(())
        }

        fn poll_actions(&mut self) -> Vec<UserAction> {
            self.window
                .get_keys_pressed(KeyRepeat::No)
                .into_iter()
                .filter_map(|key| match key {
                    Key::Space => Some(UserAction::ToggleAnalysis),
                    Key::O => Some(UserAction::AnalyzeOnce),
                    Key::C => Some(UserAction::ToggleConnection),
                    Key::M => Some(UserAction::CycleMovement),
                    Key::Escape => Some(UserAction::Quit),
                    Key::Key1 => Some(UserAction::SelectBodyPart(BodyPart::LowerBack)),
                    Key::Key2 => Some(UserAction::SelectBodyPart(BodyPart::Shoulder)),
                    Key::Key3 => Some(UserAction::SelectBodyPart(BodyPart::Elbow)),
                    Key::Key4 => Some(UserAction::SelectBodyPart(BodyPart::Hip)),
                    Key::Key5 => Some(UserAction::SelectBodyPart(BodyPart::Knee)),
                    Key::Key6 => Some(UserAction::SelectBodyPart(BodyPart::Ankle)),
                    _ => None,
                })
                .collect()
        }

        /// ウィンドウが開いているか
        fn is_open(&self) -> bool {
            self.window.is_open()
        }
    }
}
