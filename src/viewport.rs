use crate::layout::{SCREEN_HEIGHT, SCREEN_WIDTH};

/// Maps the fixed logical resolution onto a host window: the largest integer
/// scale that fits, centred with letterbox bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub scale: u32,
    pub offset_x: i32,
    pub offset_y: i32,
}

impl Viewport {
    pub fn new(window_width: u32, window_height: u32) -> Self {
        let mut v = Viewport {
            scale: 1,
            offset_x: 0,
            offset_y: 0,
        };
        v.resize(window_width, window_height);
        v
    }

    pub fn resize(&mut self, window_width: u32, window_height: u32) {
        let (w, h) = (SCREEN_WIDTH as u32, SCREEN_HEIGHT as u32);
        self.scale = (window_width / w).min(window_height / h).max(1);
        self.offset_x = (window_width as i32 - (w * self.scale) as i32) / 2;
        self.offset_y = (window_height as i32 - (h * self.scale) as i32) / 2;
    }

    /// window coordinates to logical pixels, clamped to the screen
    pub fn to_logical(&self, x: u16, y: u16) -> (u16, u16) {
        let scale = self.scale as i32;
        let lx = (x as i32 - self.offset_x).div_euclid(scale);
        let ly = (y as i32 - self.offset_y).div_euclid(scale);
        (
            lx.clamp(0, SCREEN_WIDTH as i32 - 1) as u16,
            ly.clamp(0, SCREEN_HEIGHT as i32 - 1) as u16,
        )
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Viewport::new(SCREEN_WIDTH as u32, SCREEN_HEIGHT as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_scale_and_letterbox() {
        let v = Viewport::new(1000, 700);
        assert_eq!(v.scale, 2);
        assert_eq!((v.offset_x, v.offset_y), (180, 110));
    }

    #[test]
    fn test_window_centre_maps_to_screen_centre() {
        for (w, h) in [(640u32, 480u32), (1000, 700), (1920, 1080), (641, 481), (320, 240)] {
            let v = Viewport::new(w, h);
            assert_eq!(
                v.to_logical((w / 2) as u16, (h / 2) as u16),
                (SCREEN_WIDTH as u16 / 2, SCREEN_HEIGHT as u16 / 2),
                "window {}x{}",
                w,
                h
            );
        }
    }

    #[test]
    fn test_small_window_keeps_scale_one() {
        let mut v = Viewport::default();
        v.resize(100, 50);
        assert_eq!(v.scale, 1);
        assert_eq!(v.offset_x, -110);
        assert_eq!(v.to_logical(0, 0), (110, 95));
    }

    #[test]
    fn test_letterbox_clamps_pointer() {
        let v = Viewport::new(1000, 700);
        assert_eq!(v.to_logical(0, 0), (0, 0));
        assert_eq!(v.to_logical(999, 699), (319, 239));
    }
}
